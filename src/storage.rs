use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::{GrayImage, ImageFormat, RgbImage};
use mapnav_navigation::NavigationGrid;
use mapnav_navigation::builder::{EntrancePoint, Obstacle};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RoutingError;
use crate::registry::{MapData, MapId};

const GRID_FILE: &str = "grid.json";
const OBSTACLES_FILE: &str = "obstacles.json";
const ENTRANCES_FILE: &str = "entrances.json";
const METADATA_FILE: &str = "metadata.json";
const MASK_FILE: &str = "walkable.png";
const OVERLAY_FILE: &str = "visualization.png";
const HISTORY_FILE: &str = "history.jsonl";

/// Everything needed to rebuild a [`NavigationGrid`] besides its cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapMetadata {
    pub map_id: MapId,
    pub name: String,
    pub scale: f64,
    pub image_width: u32,
    pub image_height: u32,
    pub cell_size: u32,
    pub cols: usize,
    pub rows: usize,
    pub walkable_percentage: f64,
    pub obstacle_count: usize,
    pub entrance_count: usize,
    pub processed_at: DateTime<Utc>,
}

/// Persisted map artifacts under `<root>/processed/<map_id>/`.
#[derive(Debug, Clone)]
pub struct MapStore {
    root: PathBuf,
}

impl MapStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MapStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn map_dir(&self, id: &MapId) -> PathBuf {
        self.root.join("processed").join(id.as_str())
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    /// Writes all artifacts of a processed map. Each file is written under a
    /// temporary name and renamed into place.
    pub fn save(
        &self,
        id: &MapId,
        name: &str,
        data: &MapData,
        mask: &GrayImage,
        overlay: &RgbImage,
    ) -> Result<MapMetadata, RoutingError> {
        let dir = self.map_dir(id);
        fs::create_dir_all(&dir)?;

        let grid = &data.grid;
        let metadata = MapMetadata {
            map_id: id.clone(),
            name: name.to_string(),
            scale: grid.scale(),
            image_width: grid.image_width(),
            image_height: grid.image_height(),
            cell_size: grid.cell_size(),
            cols: grid.cols(),
            rows: grid.rows(),
            walkable_percentage: data.walkable_percentage,
            obstacle_count: data.obstacles.len(),
            entrance_count: data.entrances.len(),
            processed_at: data.processed_at,
        };

        write_json(&dir.join(GRID_FILE), &grid.to_rows())?;
        write_json(&dir.join(OBSTACLES_FILE), &data.obstacles)?;
        write_json(&dir.join(ENTRANCES_FILE), &data.entrances)?;
        write_png(&dir.join(MASK_FILE), |tmp| {
            mask.save_with_format(tmp, ImageFormat::Png)
        })?;
        write_png(&dir.join(OVERLAY_FILE), |tmp| {
            overlay.save_with_format(tmp, ImageFormat::Png)
        })?;
        // Metadata last: its presence marks a complete directory.
        write_json(&dir.join(METADATA_FILE), &metadata)?;

        info!(map_id = %id, dir = %dir.display(), "map artifacts saved");
        Ok(metadata)
    }

    /// Loads a processed map back into memory.
    pub fn load(&self, id: &MapId) -> Result<(MapMetadata, MapData), RoutingError> {
        let dir = self.map_dir(id);
        let metadata: MapMetadata = read_json(&dir.join(METADATA_FILE))?;
        let rows: Vec<Vec<u8>> = read_json(&dir.join(GRID_FILE))?;
        let obstacles: Vec<Obstacle> = read_json(&dir.join(OBSTACLES_FILE))?;
        let entrances: Vec<EntrancePoint> = read_json(&dir.join(ENTRANCES_FILE))?;

        let grid = NavigationGrid::from_rows(&rows, metadata.cell_size)?
            .with_image_size(metadata.image_width, metadata.image_height)
            .with_scale(metadata.scale);
        debug!(map_id = %id, cols = grid.cols(), rows = grid.rows(), "map loaded");

        let data = MapData {
            grid,
            obstacles,
            entrances,
            walkable_percentage: metadata.walkable_percentage,
            processed_at: metadata.processed_at,
        };
        Ok((metadata, data))
    }

    /// Ids of every map with a complete artifact directory.
    pub fn list(&self) -> Result<Vec<MapId>, RoutingError> {
        let processed = self.root.join("processed");
        if !processed.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&processed)? {
            let entry = entry?;
            if !entry.path().join(METADATA_FILE).is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => ids.push(MapId::from(name)),
                Err(raw) => warn!(?raw, "skipping non UTF-8 map directory"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Unique per write, so concurrent jobs for one map never share a temp file.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", Uuid::new_v4().simple()));
    path.with_file_name(name)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), RoutingError> {
    let tmp = temp_path(path);
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn write_png(
    path: &Path,
    save: impl FnOnce(&Path) -> image::ImageResult<()>,
) -> Result<(), RoutingError> {
    let tmp = temp_path(path);
    save(&tmp)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RoutingError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}
