//! This module defines the error types used by the `mapnav-navigation` crate.

#![warn(missing_docs)]

/// Error type for grid construction and grid queries.
///
/// An unreachable goal is not an error: the search reports it through
/// [`PathResult::failure`](crate::astar::PathResult::failure).
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationError {
    /// Error for invalid grid dimensions.
    /// This variant is returned when rows, columns or the cell size are zero.
    InvalidDimensions(&'static str),
    /// Error for out-of-bounds access.
    /// This variant is returned when attempting to access cells outside the grid.
    OutOfBounds(&'static str),
    /// Error for a normalized coordinate that is outside `[0, 1]` or not finite.
    InvalidCoordinate(&'static str),
    /// The raster could not be decoded.
    ImageUnreadable(String),
    /// Too little of the raster survived classification to be worth routing on.
    DegenerateMap {
        /// Percentage of source pixels classified walkable.
        walkable_percentage: f64,
        /// Configured minimum percentage.
        minimum: f64,
    },
}

impl core::fmt::Display for NavigationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            NavigationError::InvalidDimensions(msg) => write!(f, "Invalid grid dimensions: {}", msg),
            NavigationError::OutOfBounds(msg) => write!(f, "Grid access out of bounds: {}", msg),
            NavigationError::InvalidCoordinate(msg) => write!(f, "Invalid coordinate: {}", msg),
            NavigationError::ImageUnreadable(msg) => write!(f, "Image unreadable: {}", msg),
            NavigationError::DegenerateMap {
                walkable_percentage,
                minimum,
            } => write!(
                f,
                "Degenerate map: {:.2}% walkable, at least {:.2}% required",
                walkable_percentage, minimum
            ),
        }
    }
}

impl core::error::Error for NavigationError {}

impl From<mapnav_geometry::GeometryError> for NavigationError {
    fn from(e: mapnav_geometry::GeometryError) -> Self {
        match e {
            mapnav_geometry::GeometryError::NonFinite(msg)
            | mapnav_geometry::GeometryError::OutOfUnitSquare(msg) => {
                NavigationError::InvalidCoordinate(msg)
            }
        }
    }
}
