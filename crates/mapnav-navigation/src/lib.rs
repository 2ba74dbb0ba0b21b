//! Synchronous navigation core: raster maps to occupancy grids, grid search, and
//! route optimization.
//!
//! Everything here is CPU-bound and blocking; callers running an async runtime
//! should move calls onto a blocking pool.

pub mod astar;
pub mod builder;
pub mod error;
pub mod map;
pub mod optimizer;

pub use astar::{PathResult, SearchOptions, find_path};
pub use builder::{BuildOutput, BuilderConfig, GridBuilder};
pub use error::NavigationError;
pub use map::{Cell, GridPoint, NavigationGrid};
pub use optimizer::{OptimizedPath, PathOptimizer, SmoothingLevel};
