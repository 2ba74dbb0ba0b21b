//! Floor-plan navigation service: raster maps are turned into occupancy grids in
//! the background, and routes are answered over the processed grids.

pub mod bus;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod history;
pub mod preprocess;
pub mod registry;
pub mod routing;
pub mod storage;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use mapnav_navigation::GridBuilder;
use tracing::{info, warn};

pub use crate::config::Settings;
pub use crate::error::RoutingError;
pub use crate::preprocess::{PreprocessAck, Preprocessor};
pub use crate::registry::{MapId, MapRegistry, MapStatus, MapSummary};
pub use crate::routing::Router;

use crate::cache::RouteCache;
use crate::classifier::{HttpMaskClassifier, MaskClassifier};
use crate::history::{HistorySink, JsonlHistory};
use crate::storage::MapStore;
use crate::worker::WorkerPool;

/// Capacity of the map status event channel.
const EVENT_CAPACITY: usize = 64;

/// One wired-up service instance: registry, storage, cache, workers and the
/// two entry points built on them.
#[derive(Clone)]
pub struct MapNav {
    registry: Arc<MapRegistry>,
    store: MapStore,
    router: Router,
    preprocessor: Preprocessor,
}

impl MapNav {
    pub fn from_settings(settings: &Settings) -> Self {
        let registry = Arc::new(MapRegistry::new(EVENT_CAPACITY));
        let store = MapStore::new(&settings.storage.root);
        let cache = Arc::new(RouteCache::new(
            settings.cache.capacity,
            Duration::from_secs(settings.cache.ttl_secs),
        ));
        let pool = WorkerPool::new(settings.workers.max_concurrent_jobs);
        let history: Arc<dyn HistorySink> = Arc::new(JsonlHistory::new(store.history_path()));

        let classifier: Option<Arc<dyn MaskClassifier>> =
            match HttpMaskClassifier::from_settings(&settings.classifier) {
                Ok(Some(client)) => Some(Arc::new(client)),
                Ok(None) => None,
                Err(e) => {
                    warn!("segmentation client unavailable, using local classifier: {}", e);
                    None
                }
            };

        let router = Router::new(
            registry.clone(),
            cache.clone(),
            settings.cache.enabled,
            history,
            pool.clone(),
            settings.routing.clone(),
        );
        let preprocessor = Preprocessor::new(
            registry.clone(),
            store.clone(),
            cache,
            pool,
            GridBuilder::new(settings.builder.clone()),
            classifier,
        );

        info!(
            root = %settings.storage.root.display(),
            workers = settings.workers.max_concurrent_jobs,
            cache = settings.cache.enabled,
            "map navigation service ready"
        );
        MapNav {
            registry,
            store,
            router,
            preprocessor,
        }
    }

    /// Registers an uploaded raster. `scale` is meters per pixel.
    pub fn upload(
        &self,
        name: impl Into<String>,
        image: Vec<u8>,
        scale: f64,
    ) -> Result<MapId, RoutingError> {
        self.registry.register(name, image, scale)
    }

    pub fn preprocess(&self, map_id: &MapId, force: bool) -> Result<PreprocessAck, RoutingError> {
        self.preprocessor.preprocess(map_id, force)
    }

    /// Loads every persisted map into the registry as processed. Maps whose
    /// artifacts cannot be read are skipped. Returns the number restored.
    pub fn restore(&self) -> Result<usize, RoutingError> {
        let mut restored = 0;
        for id in self.store.list()? {
            if self.registry.contains(&id) {
                continue;
            }
            match self.store.load(&id) {
                Ok((metadata, data)) => {
                    self.registry.restore(id, metadata.name, metadata.scale, data);
                    restored += 1;
                }
                Err(e) => warn!(map_id = %id, "skipping unreadable map: {}", e),
            }
        }
        info!(restored, "processed maps restored");
        Ok(restored)
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn registry(&self) -> &Arc<MapRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &MapStore {
        &self.store
    }
}
