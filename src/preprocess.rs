use std::io::Cursor;
use std::sync::Arc;

use chrono::Utc;
use image::{DynamicImage, GrayImage, ImageFormat};
use mapnav_navigation::GridBuilder;
use mapnav_navigation::builder::render_overlay;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::RouteCache;
use crate::classifier::MaskClassifier;
use crate::error::RoutingError;
use crate::registry::{MapData, MapId, MapRegistry, MapSummary, ProcessingTicket};
use crate::routing::RouteResult;
use crate::storage::MapStore;
use crate::worker::WorkerPool;

/// Immediate answer to a preprocessing request.
pub enum PreprocessAck {
    /// A background job was started; `summary` shows the `Processing` state.
    Started {
        summary: MapSummary,
        job: JoinHandle<Result<MapSummary, RoutingError>>,
    },
    AlreadyProcessed(MapSummary),
}

impl PreprocessAck {
    pub fn summary(&self) -> &MapSummary {
        match self {
            PreprocessAck::Started { summary, .. } => summary,
            PreprocessAck::AlreadyProcessed(summary) => summary,
        }
    }

    /// Waits for the job, if any, and returns the map's final summary.
    pub async fn wait(self) -> Result<MapSummary, RoutingError> {
        match self {
            PreprocessAck::Started { job, .. } => job
                .await
                .map_err(|e| RoutingError::Worker(e.to_string()))?,
            PreprocessAck::AlreadyProcessed(summary) => Ok(summary),
        }
    }
}

/// Turns uploaded rasters into committed navigation data in the background.
#[derive(Clone)]
pub struct Preprocessor {
    registry: Arc<MapRegistry>,
    store: MapStore,
    cache: Arc<RouteCache<RouteResult>>,
    pool: WorkerPool,
    builder: GridBuilder,
    classifier: Option<Arc<dyn MaskClassifier>>,
}

impl Preprocessor {
    pub fn new(
        registry: Arc<MapRegistry>,
        store: MapStore,
        cache: Arc<RouteCache<RouteResult>>,
        pool: WorkerPool,
        builder: GridBuilder,
        classifier: Option<Arc<dyn MaskClassifier>>,
    ) -> Self {
        Preprocessor {
            registry,
            store,
            cache,
            pool,
            builder,
            classifier,
        }
    }

    /// Starts processing `map_id` unless it is already processed and `force` is off.
    ///
    /// # Errors
    /// `MapNotFound`, or `Conflict` if a job is already running and `force` is off.
    pub fn preprocess(&self, map_id: &MapId, force: bool) -> Result<PreprocessAck, RoutingError> {
        match self.registry.begin_processing(map_id, force)? {
            ProcessingTicket::AlreadyProcessed(summary) => {
                info!(map_id = %map_id, "map already processed");
                Ok(PreprocessAck::AlreadyProcessed(summary))
            }
            ProcessingTicket::Started {
                generation,
                image,
                scale,
            } => {
                let summary = self.registry.summary(map_id)?;
                let this = self.clone();
                let id = map_id.clone();
                let name = summary.name.clone();
                info!(map_id = %map_id, generation, force, "preprocessing started");
                let job = tokio::spawn(async move {
                    this.run_job(id, name, generation, image, scale).await
                });
                Ok(PreprocessAck::Started { summary, job })
            }
        }
    }

    async fn run_job(
        &self,
        id: MapId,
        name: String,
        generation: u64,
        image: Arc<Vec<u8>>,
        scale: f64,
    ) -> Result<MapSummary, RoutingError> {
        match self.build(&id, name, image, scale).await {
            Ok(data) => {
                if self.registry.commit(&id, generation, data) {
                    let dropped = self.cache.invalidate_map(&id);
                    info!(map_id = %id, generation, dropped, "preprocessing committed");
                }
                self.registry.summary(&id)
            }
            Err(e) => {
                error!(map_id = %id, generation, error = %e, "preprocessing failed");
                self.registry.fail(&id, generation, &e);
                Err(e)
            }
        }
    }

    async fn build(
        &self,
        id: &MapId,
        name: String,
        bytes: Arc<Vec<u8>>,
        scale: f64,
    ) -> Result<MapData, RoutingError> {
        let wants_png = self.classifier.is_some();
        let (source, png) = self
            .pool
            .run(move || decode(&bytes, wants_png))
            .await??;

        let mask = match (&self.classifier, png) {
            (Some(classifier), Some(png)) => self.classify(classifier.as_ref(), &png, &source).await,
            _ => None,
        };

        let builder = self.builder.clone();
        let store = self.store.clone();
        let id = id.clone();
        self.pool
            .run(move || -> Result<MapData, RoutingError> {
                let output = match &mask {
                    Some(mask) => builder.build_from_mask(&source, mask),
                    None => builder.build(&source),
                }?;
                let overlay = render_overlay(&source, &output.mask, &output.obstacles, &output.entrances);
                let data = MapData {
                    grid: output.grid.with_scale(scale),
                    obstacles: output.obstacles,
                    entrances: output.entrances,
                    walkable_percentage: output.walkable_percentage,
                    processed_at: Utc::now(),
                };
                store.save(&id, &name, &data, &output.mask, &overlay)?;
                Ok(data)
            })
            .await?
    }

    /// Asks the external classifier for a mask. Any failure, or a mask of the
    /// wrong size, falls back to local classification.
    async fn classify(
        &self,
        classifier: &dyn MaskClassifier,
        png: &[u8],
        source: &DynamicImage,
    ) -> Option<GrayImage> {
        match classifier.classify(png).await {
            Ok(mask) if mask.dimensions() == (source.width(), source.height()) => Some(mask),
            Ok(mask) => {
                warn!(
                    mask = ?mask.dimensions(),
                    image = ?(source.width(), source.height()),
                    "classifier mask size mismatch, using local classification"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "classifier unavailable, using local classification");
                None
            }
        }
    }
}

fn decode(bytes: &[u8], wants_png: bool) -> Result<(DynamicImage, Option<Vec<u8>>), RoutingError> {
    let source = image::load_from_memory(bytes)
        .map_err(|e| RoutingError::ImageUnreadable(e.to_string()))?;
    let png = if wants_png {
        let mut buf = Vec::new();
        source.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Some(buf)
    } else {
        None
    };
    Ok((source, png))
}
