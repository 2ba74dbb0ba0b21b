use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use mapnav_navigation::BuilderConfig;
use serde::Deserialize;
use tracing::{error, info};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Service settings. Every key has a default, so an empty configuration is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub workers: WorkerSettings,
    pub cache: CacheSettings,
    pub routing: RoutingSettings,
    pub builder: BuilderConfig,
    pub classifier: ClassifierSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding processed map artifacts and the route history.
    pub root: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            root: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Upper bound on concurrently running grid builds and searches.
    pub max_concurrent_jobs: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            max_concurrent_jobs: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            enabled: true,
            capacity: 1024,
            ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    /// Nominal walking speed, 5 km/h.
    pub walking_speed_mps: f64,
    /// Search gives up after closing this many cells.
    pub max_expansions: usize,
    /// Straighten raw cell paths by line of sight before optimization.
    pub line_of_sight: bool,
    /// Radius, in cells, searched when correcting a point onto walkable ground.
    pub max_correction_radius: usize,
    pub easy_max_meters: f64,
    pub easy_max_turns: usize,
    pub moderate_max_meters: f64,
    pub moderate_max_turns: usize,
    /// Upper bound on routes returned by an alternatives query, the optimal one included.
    pub max_alternatives: usize,
}

impl Default for RoutingSettings {
    fn default() -> Self {
        RoutingSettings {
            walking_speed_mps: 5000.0 / 3600.0,
            max_expansions: 1_000_000,
            line_of_sight: false,
            max_correction_radius: 50,
            easy_max_meters: 100.0,
            easy_max_turns: 5,
            moderate_max_meters: 500.0,
            moderate_max_turns: 15,
            max_alternatives: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Base URL of the segmentation service. Unset disables it.
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// Retries after the first failed request.
    pub max_retries: u32,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        ClassifierSettings {
            url: None,
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file layered under `MAPNAV__SECTION__KEY`
    /// environment variables.
    ///
    /// An explicit `path` must exist; without one, `config/default.toml` is used
    /// if present.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let (file, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        info!("Attempting to load configuration from {}", file.display());

        let settings = Config::builder()
            .add_source(File::new(&file.to_string_lossy(), FileFormat::Toml).required(required))
            .add_source(
                Environment::with_prefix("MAPNAV")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(Config::try_deserialize::<Settings>);

        match settings {
            Ok(settings) => {
                info!(?settings, "Successfully loaded configuration");
                Ok(settings)
            }
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                Err(e)
            }
        }
    }
}
