use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use mapnav_geometry::NormalizedPoint;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RoutingError;
use crate::registry::MapId;

/// Audit record of one single-route query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub id: Uuid,
    pub map_id: MapId,
    pub start: NormalizedPoint,
    pub end: NormalizedPoint,
    pub distance_meters: f64,
    pub processing_time_ms: f64,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

/// Destination for route records. Failures are reported, and the router logs and
/// ignores them.
pub trait HistorySink: Send + Sync {
    fn record(&self, record: &RouteRecord) -> Result<(), RoutingError>;
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<RouteRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RouteRecord> {
        self.records.lock().clone()
    }
}

impl HistorySink for MemoryHistory {
    fn record(&self, record: &RouteRecord) -> Result<(), RoutingError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Appends records as JSON lines.
#[derive(Debug)]
pub struct JsonlHistory {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonlHistory {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Reads every record back, oldest first.
    pub fn read_all(&self) -> Result<Vec<RouteRecord>, RoutingError> {
        let _guard = self.lock.lock();
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(RoutingError::from))
            .collect()
    }
}

impl HistorySink for JsonlHistory {
    fn record(&self, record: &RouteRecord) -> Result<(), RoutingError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cached: bool) -> RouteRecord {
        RouteRecord {
            id: Uuid::new_v4(),
            map_id: MapId::from("m"),
            start: NormalizedPoint::new(0.25, 0.5),
            end: NormalizedPoint::new(0.75, 0.5),
            distance_meters: 12.5,
            processing_time_ms: 3.0,
            cached,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_memory_history_keeps_order() {
        let history = MemoryHistory::new();
        history.record(&record(false)).unwrap();
        history.record(&record(true)).unwrap();
        let records = history.records();
        assert_eq!(records.len(), 2);
        assert!(!records[0].cached);
        assert!(records[1].cached);
    }

    #[test]
    fn test_jsonl_history_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let history = JsonlHistory::new(dir.path().join("nested").join("history.jsonl"));
        assert!(history.read_all().unwrap().is_empty());

        let first = record(false);
        let second = record(true);
        history.record(&first).unwrap();
        history.record(&second).unwrap();

        let back = history.read_all().unwrap();
        assert_eq!(back, vec![first, second]);
    }

    #[test]
    fn test_jsonl_history_unwritable_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be.
        let history = JsonlHistory::new(dir.path());
        assert!(history.record(&record(false)).is_err());
    }
}
