use mapnav_navigation::SmoothingLevel;
use serde::{Deserialize, Serialize};

/// Options recognized by single-route queries. Unknown keys are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteOptions {
    pub smoothing_level: SmoothingLevel,
    /// Serve a fresh cached result if one exists.
    pub use_cache: bool,
    pub allow_diagonal: bool,
    /// Snap endpoints lying on obstacles to the nearest walkable cell instead of
    /// rejecting them.
    pub auto_correct: bool,
}

impl Default for RouteOptions {
    fn default() -> Self {
        RouteOptions {
            smoothing_level: SmoothingLevel::Medium,
            use_cache: true,
            allow_diagonal: true,
            auto_correct: false,
        }
    }
}

impl RouteOptions {
    /// The part of the options that changes the computed route. `use_cache` is
    /// not included.
    pub fn fingerprint(&self) -> String {
        format!(
            "smoothing={};diagonal={};auto_correct={}",
            self.smoothing_level, self.allow_diagonal, self.auto_correct
        )
    }
}

/// Options recognized by multi-stop queries. Unknown keys are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MultiRouteOptions {
    pub smoothing_level: SmoothingLevel,
    pub use_cache: bool,
    pub allow_diagonal: bool,
    pub auto_correct: bool,
    /// Reorder the stops after the first with the greedy nearest-neighbour
    /// heuristic. Only applied to more than three stops.
    pub optimize_order: bool,
    /// Close the loop back to the first stop.
    pub return_to_start: bool,
}

/// Segment defaults match [`RouteOptions::default`]; reordering and looping are off.
impl Default for MultiRouteOptions {
    fn default() -> Self {
        MultiRouteOptions::from(RouteOptions::default())
    }
}

impl MultiRouteOptions {
    /// Options applied to every segment.
    pub fn segment_options(&self) -> RouteOptions {
        RouteOptions {
            smoothing_level: self.smoothing_level,
            use_cache: self.use_cache,
            allow_diagonal: self.allow_diagonal,
            auto_correct: self.auto_correct,
        }
    }
}

impl From<RouteOptions> for MultiRouteOptions {
    fn from(o: RouteOptions) -> Self {
        MultiRouteOptions {
            smoothing_level: o.smoothing_level,
            use_cache: o.use_cache,
            allow_diagonal: o.allow_diagonal,
            auto_correct: o.auto_correct,
            optimize_order: false,
            return_to_start: false,
        }
    }
}
