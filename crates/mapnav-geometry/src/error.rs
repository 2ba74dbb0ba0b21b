#![warn(missing_docs)]

//! Error types for the geometry library.

use core::fmt;

/// Errors that can occur when constructing or validating geometric values.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// A coordinate was NaN or infinite.
    NonFinite(&'static str),
    /// A normalized coordinate fell outside `[0, 1]`.
    OutOfUnitSquare(&'static str),
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::NonFinite(msg) => write!(f, "Non-finite coordinate: {}", msg),
            GeometryError::OutOfUnitSquare(msg) => {
                write!(f, "Coordinate outside the unit square: {}", msg)
            }
        }
    }
}

impl core::error::Error for GeometryError {}
