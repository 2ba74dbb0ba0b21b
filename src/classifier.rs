//! Client for the external segmentation service.
//!
//! The service receives a PNG and answers with a same-resolution walkable mask.
//! Any failure is returned to the caller, which falls back to the local
//! image-processing classifier.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{GrayImage, Luma};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::ClassifierSettings;

const SEGMENT_PATH: &str = "/api/v1/segment";

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("classifier returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Produces a walkable mask for a raster, `255` walkable and `0` obstacle.
#[async_trait]
pub trait MaskClassifier: Send + Sync {
    async fn classify(&self, png: &[u8]) -> Result<GrayImage, ClassifierError>;
}

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    walkable_mask_base64: Option<String>,
    #[serde(default)]
    inference_time: f64,
}

/// HTTP segmentation client with bounded retries and exponential backoff.
#[derive(Debug, Clone)]
pub struct HttpMaskClassifier {
    http: Client,
    base_url: String,
    /// Retries after the first attempt.
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpMaskClassifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration, max_retries: u32) -> Result<Self, ClassifierError> {
        let http = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        info!(url = %base_url, "segmentation client initialized");
        Ok(HttpMaskClassifier {
            http,
            base_url,
            max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    /// Builds a client from settings, or `None` if no URL is configured.
    pub fn from_settings(settings: &ClassifierSettings) -> Result<Option<Self>, ClassifierError> {
        settings
            .url
            .as_deref()
            .map(|url| {
                HttpMaskClassifier::new(
                    url,
                    Duration::from_secs(settings.timeout_secs),
                    settings.max_retries,
                )
            })
            .transpose()
    }

    /// Delay before the first retry; doubles on each further attempt.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    async fn request(&self, png: &[u8]) -> Result<GrayImage, ClassifierError> {
        let part = Part::bytes(png.to_vec())
            .file_name("map.png")
            .mime_str("image/png")?;
        let form = Form::new().part("image", part);

        let response = self
            .http
            .post(format!("{}{}", self.base_url, SEGMENT_PATH))
            .query(&[("return_visualization", "false"), ("return_navigation_grid", "false")])
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body: SegmentResponse = response.json().await?;
        info!(inference_time = body.inference_time, "segmentation response received");
        decode_mask(&body)
    }
}

#[async_trait]
impl MaskClassifier for HttpMaskClassifier {
    async fn classify(&self, png: &[u8]) -> Result<GrayImage, ClassifierError> {
        let started = Instant::now();
        let attempts = self.max_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(attempt, attempts, "sending segmentation request");
            match self.request(png).await {
                Ok(mask) => {
                    info!(elapsed_ms = started.elapsed().as_millis() as u64, "segmentation completed");
                    return Ok(mask);
                }
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    let wait = self.retry_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(attempt, error = %e, ?wait, "segmentation request failed, retrying");
                    sleep(wait).await;
                }
            }
        }
    }
}

/// Decodes the base64 PNG mask; any non-zero pixel is walkable.
fn decode_mask(body: &SegmentResponse) -> Result<GrayImage, ClassifierError> {
    let encoded = body
        .walkable_mask_base64
        .as_deref()
        .ok_or_else(|| ClassifierError::Malformed("missing walkable_mask_base64".into()))?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| ClassifierError::Malformed(e.to_string()))?;
    let mut mask = image::load_from_memory(&bytes)
        .map_err(|e| ClassifierError::Malformed(e.to_string()))?
        .to_luma8();
    for p in mask.pixels_mut() {
        *p = Luma([if p.0[0] > 0 { 255 } else { 0 }]);
    }
    Ok(mask)
}
