//! Route queries over processed maps: caching, multi-stop trips, alternatives
//! and point validation.

pub mod metrics;
pub mod options;
pub mod ordering;
mod service;

pub use metrics::Difficulty;
pub use options::{MultiRouteOptions, RouteOptions};
pub use service::{
    AlternativeKind, AlternativeRoute, AlternativeRoutes, MultiRouteResult, PointValidation,
    RouteResult, Router, SegmentSummary,
};
