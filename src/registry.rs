use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use mapnav_navigation::NavigationGrid;
use mapnav_navigation::builder::{EntrancePoint, Obstacle};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::{MapEvent, Topic};
use crate::error::RoutingError;

/// Opaque identity of an uploaded map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapId(String);

impl MapId {
    /// A fresh random identity.
    pub fn new() -> Self {
        MapId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MapId {
    fn default() -> Self {
        MapId::new()
    }
}

impl From<&str> for MapId {
    fn from(s: &str) -> Self {
        MapId(s.to_string())
    }
}

impl From<String> for MapId {
    fn from(s: String) -> Self {
        MapId(s)
    }
}

impl fmt::Display for MapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a map's navigation data.
///
/// `Uploaded -> Processing -> Processed | Failed`, and back to `Processing` on
/// re-processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl fmt::Display for MapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MapStatus::Uploaded => "uploaded",
            MapStatus::Processing => "processing",
            MapStatus::Processed => "processed",
            MapStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Committed navigation data of one map version. Never mutated after commit.
#[derive(Debug, Clone)]
pub struct MapData {
    pub grid: NavigationGrid,
    pub obstacles: Vec<Obstacle>,
    pub entrances: Vec<EntrancePoint>,
    pub walkable_percentage: f64,
    pub processed_at: DateTime<Utc>,
}

/// Externally visible state of a map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapSummary {
    pub map_id: MapId,
    pub name: String,
    pub status: MapStatus,
    /// Meters per source pixel.
    pub scale: f64,
    pub walkable_percentage: Option<f64>,
    pub obstacle_count: usize,
    pub entrance_count: usize,
    /// `[cols, rows]` of the committed grid.
    pub grid_size: Option<[usize; 2]>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct MapRecord {
    name: String,
    scale: f64,
    status: MapStatus,
    data: Option<Arc<MapData>>,
    error: Option<String>,
    /// Encoded source raster; absent for maps restored from storage.
    image: Option<Arc<Vec<u8>>>,
    /// Bumped on every processing start so a superseded job cannot commit.
    generation: u64,
    /// Registry-wide stamp of the committed `data`; changes on every commit.
    version: u64,
}

impl MapRecord {
    fn summary(&self, id: &MapId) -> MapSummary {
        let data = self.data.as_deref();
        MapSummary {
            map_id: id.clone(),
            name: self.name.clone(),
            status: self.status,
            scale: self.scale,
            walkable_percentage: data.map(|d| d.walkable_percentage),
            obstacle_count: data.map_or(0, |d| d.obstacles.len()),
            entrance_count: data.map_or(0, |d| d.entrances.len()),
            grid_size: data.map(|d| [d.grid.cols(), d.grid.rows()]),
            processed_at: data.map(|d| d.processed_at),
            error: self.error.clone(),
        }
    }
}

/// Outcome of asking to process a map.
#[derive(Debug, Clone)]
pub enum ProcessingTicket {
    /// The map moved to `Processing`; the holder must commit or fail `generation`.
    Started {
        generation: u64,
        image: Arc<Vec<u8>>,
        scale: f64,
    },
    /// Not forced and already processed.
    AlreadyProcessed(MapSummary),
}

/// All known maps and their navigation data.
pub struct MapRegistry {
    maps: RwLock<HashMap<MapId, MapRecord>>,
    events: Topic<MapEvent>,
    versions: AtomicU64,
}

impl MapRegistry {
    pub fn new(event_capacity: usize) -> Self {
        MapRegistry {
            maps: RwLock::new(HashMap::new()),
            events: Topic::new(event_capacity.max(1)),
            versions: AtomicU64::new(0),
        }
    }

    /// Registers an uploaded raster in the `Uploaded` state.
    ///
    /// # Errors
    /// `InvalidRequest` if `scale` is not a positive finite number.
    pub fn register(
        &self,
        name: impl Into<String>,
        image: Vec<u8>,
        scale: f64,
    ) -> Result<MapId, RoutingError> {
        check_scale(scale)?;
        let id = MapId::new();
        let name = name.into();
        info!(map_id = %id, name = %name, bytes = image.len(), scale, "map registered");
        self.maps.write().insert(
            id.clone(),
            MapRecord {
                name,
                scale,
                status: MapStatus::Uploaded,
                data: None,
                error: None,
                image: Some(Arc::new(image)),
                generation: 0,
                version: 0,
            },
        );
        self.publish(&id, MapStatus::Uploaded, None);
        Ok(id)
    }

    /// Inserts navigation data loaded from storage as an already processed map.
    pub fn restore(&self, id: MapId, name: impl Into<String>, scale: f64, data: MapData) {
        self.maps.write().insert(
            id.clone(),
            MapRecord {
                name: name.into(),
                scale,
                status: MapStatus::Processed,
                data: Some(Arc::new(data)),
                error: None,
                image: None,
                generation: 0,
                version: self.next_version(),
            },
        );
        self.publish(&id, MapStatus::Processed, None);
    }

    pub fn contains(&self, id: &MapId) -> bool {
        self.maps.read().contains_key(id)
    }

    pub fn summary(&self, id: &MapId) -> Result<MapSummary, RoutingError> {
        self.maps
            .read()
            .get(id)
            .map(|r| r.summary(id))
            .ok_or_else(|| RoutingError::MapNotFound(id.clone()))
    }

    pub fn status(&self, id: &MapId) -> Result<MapStatus, RoutingError> {
        self.summary(id).map(|s| s.status)
    }

    /// Summaries of every map, ordered by id.
    pub fn list(&self) -> Vec<MapSummary> {
        let maps = self.maps.read();
        let mut out: Vec<MapSummary> = maps.iter().map(|(id, r)| r.summary(id)).collect();
        out.sort_by(|a, b| a.map_id.cmp(&b.map_id));
        out
    }

    /// Moves a map to `Processing`.
    ///
    /// # Errors
    /// `MapNotFound`; `Conflict` if it is already processing and `force` is off;
    /// `InvalidRequest` if no source raster is held for it.
    pub fn begin_processing(
        &self,
        id: &MapId,
        force: bool,
    ) -> Result<ProcessingTicket, RoutingError> {
        let ticket = {
            let mut maps = self.maps.write();
            let record = maps
                .get_mut(id)
                .ok_or_else(|| RoutingError::MapNotFound(id.clone()))?;

            match record.status {
                MapStatus::Processing if !force => {
                    return Err(RoutingError::Conflict(id.clone()));
                }
                MapStatus::Processed if !force => {
                    return Ok(ProcessingTicket::AlreadyProcessed(record.summary(id)));
                }
                _ => {}
            }

            let image = record.image.clone().ok_or_else(|| {
                RoutingError::InvalidRequest(format!("map {id} has no source image to process"))
            })?;

            record.generation += 1;
            record.status = MapStatus::Processing;
            record.error = None;
            ProcessingTicket::Started {
                generation: record.generation,
                image,
                scale: record.scale,
            }
        };
        self.publish(id, MapStatus::Processing, None);
        Ok(ticket)
    }

    /// Atomically replaces the map's navigation data and marks it `Processed`.
    ///
    /// Returns `false` without changing anything if `generation` has been
    /// superseded by a later processing start.
    pub fn commit(&self, id: &MapId, generation: u64, data: MapData) -> bool {
        {
            let mut maps = self.maps.write();
            let Some(record) = maps.get_mut(id) else {
                return false;
            };
            if record.generation != generation {
                warn!(map_id = %id, generation, current = record.generation, "discarding stale processing result");
                return false;
            }
            record.data = Some(Arc::new(data));
            record.version = self.next_version();
            record.status = MapStatus::Processed;
            record.error = None;
        }
        self.publish(id, MapStatus::Processed, None);
        true
    }

    /// Marks the map `Failed`, retaining the error message.
    pub fn fail(&self, id: &MapId, generation: u64, error: &RoutingError) -> bool {
        let message = error.to_string();
        {
            let mut maps = self.maps.write();
            let Some(record) = maps.get_mut(id) else {
                return false;
            };
            if record.generation != generation {
                return false;
            }
            record.status = MapStatus::Failed;
            record.error = Some(message.clone());
        }
        self.publish(id, MapStatus::Failed, Some(message));
        true
    }

    /// The navigation data a route query should use.
    ///
    /// A `Processing` map keeps serving its previously committed data.
    ///
    /// # Errors
    /// `MapNotFound`, or `GridUnavailable` if nothing servable is committed.
    pub fn grid(&self, id: &MapId) -> Result<Arc<MapData>, RoutingError> {
        self.snapshot(id).map(|(_, data)| data)
    }

    /// Like [`MapRegistry::grid`], paired with the version stamped on the data
    /// when it was committed. Results derived from the data are only valid for
    /// that version.
    pub fn snapshot(&self, id: &MapId) -> Result<(u64, Arc<MapData>), RoutingError> {
        let maps = self.maps.read();
        let record = maps
            .get(id)
            .ok_or_else(|| RoutingError::MapNotFound(id.clone()))?;
        match (record.status, &record.data) {
            (MapStatus::Processed | MapStatus::Processing, Some(data)) => {
                Ok((record.version, data.clone()))
            }
            _ => Err(RoutingError::GridUnavailable(id.clone())),
        }
    }

    fn next_version(&self) -> u64 {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Arc<MapEvent>> {
        self.events.subscribe()
    }

    fn publish(&self, id: &MapId, status: MapStatus, error: Option<String>) {
        self.events.publish(MapEvent {
            map_id: id.clone(),
            status,
            error,
        });
    }
}

impl Default for MapRegistry {
    fn default() -> Self {
        MapRegistry::new(64)
    }
}

pub(crate) fn check_scale(scale: f64) -> Result<(), RoutingError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(RoutingError::InvalidRequest(format!(
            "scale must be a positive number of meters per pixel, got {scale}"
        )))
    }
}
