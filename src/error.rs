use mapnav_geometry::NormalizedPoint;
use mapnav_navigation::NavigationError;
use thiserror::Error;

use crate::registry::MapId;

/// Errors surfaced by the routing service.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("image unreadable: {0}")]
    ImageUnreadable(String),

    #[error("degenerate map: {walkable_percentage:.2}% walkable, at least {minimum:.2}% required")]
    DegenerateMap { walkable_percentage: f64, minimum: f64 },

    /// Outside `[0, 1]`, or on an obstacle. Validation can suggest a correction.
    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("map {0} has no processed navigation grid")]
    GridUnavailable(MapId),

    #[error("map {0} not found")]
    MapNotFound(MapId),

    #[error("map {0} is already being processed")]
    Conflict(MapId),

    /// The search exhausted the reachable cells, or hit its expansion limit.
    #[error("no path from {start} to {end}")]
    NotFound {
        start: NormalizedPoint,
        end: NormalizedPoint,
        limit_reached: bool,
    },

    #[error("segment {index} failed: {source}")]
    SegmentFailure {
        index: usize,
        #[source]
        source: Box<RoutingError>,
    },

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<NavigationError> for RoutingError {
    fn from(e: NavigationError) -> Self {
        match e {
            NavigationError::ImageUnreadable(msg) => RoutingError::ImageUnreadable(msg),
            NavigationError::DegenerateMap {
                walkable_percentage,
                minimum,
            } => RoutingError::DegenerateMap {
                walkable_percentage,
                minimum,
            },
            NavigationError::InvalidCoordinate(msg) => {
                RoutingError::InvalidCoordinate(msg.to_string())
            }
            NavigationError::InvalidDimensions(msg) | NavigationError::OutOfBounds(msg) => {
                RoutingError::InvalidRequest(msg.to_string())
            }
        }
    }
}

impl From<image::ImageError> for RoutingError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => RoutingError::Storage(io),
            other => RoutingError::ImageUnreadable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_errors_map_to_routing_errors() {
        let e: RoutingError = NavigationError::DegenerateMap {
            walkable_percentage: 0.5,
            minimum: 1.0,
        }
        .into();
        assert!(matches!(e, RoutingError::DegenerateMap { .. }));
        assert_eq!(
            e.to_string(),
            "degenerate map: 0.50% walkable, at least 1.00% required"
        );

        let e: RoutingError = NavigationError::InvalidCoordinate("outside").into();
        assert!(matches!(e, RoutingError::InvalidCoordinate(_)));
    }

    #[test]
    fn test_segment_failure_names_index() {
        let e = RoutingError::SegmentFailure {
            index: 2,
            source: Box::new(RoutingError::NotFound {
                start: NormalizedPoint::new(0.1, 0.1),
                end: NormalizedPoint::new(0.9, 0.9),
                limit_reached: false,
            }),
        };
        assert_eq!(
            e.to_string(),
            "segment 2 failed: no path from (0.1000, 0.1000) to (0.9000, 0.9000)"
        );
        assert!(std::error::Error::source(&e).is_some());
    }
}
