#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![doc = "A `no_std` library of planar geometry helpers for routes in normalized map space."]
#![doc = ""]
#![doc = "All external route interfaces speak normalized coordinates in `[0, 1] x [0, 1]`,"]
#![doc = "independent of the raster resolution. This crate holds that point type and the"]
#![doc = "distance and angle math shared by the search and optimization stages."]

use core::fmt;
use libm::{acos, hypot};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::GeometryError;

/// A point in normalized map coordinates.
///
/// `x` grows to the right and `y` grows downwards, matching image rows.
/// Serialized as a `[x, y]` pair.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "[f64; 2]", into = "[f64; 2]"))]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NormalizedPoint {
    /// Horizontal position, `0.0` is the left image edge.
    pub x: f64,
    /// Vertical position, `0.0` is the top image edge.
    pub y: f64,
}

impl NormalizedPoint {
    /// Construct a point without validation.
    pub const fn new(x: f64, y: f64) -> Self {
        NormalizedPoint { x, y }
    }

    /// Construct a point, rejecting non-finite values and values outside the unit square.
    ///
    /// # Errors
    ///
    /// Returns `Err(GeometryError::NonFinite)` if either coordinate is NaN or infinite.
    /// Returns `Err(GeometryError::OutOfUnitSquare)` if either coordinate is outside `[0, 1]`.
    pub fn try_new(x: f64, y: f64) -> Result<Self, GeometryError> {
        let p = NormalizedPoint { x, y };
        p.validate()?;
        Ok(p)
    }

    /// Check that the point is finite and inside the unit square.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(GeometryError::NonFinite("coordinates must be finite"));
        }
        if !(0.0..=1.0).contains(&self.x) || !(0.0..=1.0).contains(&self.y) {
            return Err(GeometryError::OutOfUnitSquare(
                "coordinates must lie in [0, 1]",
            ));
        }
        Ok(())
    }

    /// Returns `true` if the point is finite and inside the unit square.
    pub fn is_normalized(&self) -> bool {
        self.validate().is_ok()
    }

    /// Clamp both coordinates into `[0, 1]`.
    pub fn clamped(self) -> Self {
        NormalizedPoint {
            x: self.x.clamp(0.0, 1.0),
            y: self.y.clamp(0.0, 1.0),
        }
    }

    /// Euclidean distance in normalized units.
    pub fn distance(&self, other: &NormalizedPoint) -> f64 {
        hypot(other.x - self.x, other.y - self.y)
    }

    /// Euclidean distance after scaling each axis, e.g. by the image width and height
    /// to get a distance in source pixels.
    pub fn scaled_distance(&self, other: &NormalizedPoint, sx: f64, sy: f64) -> f64 {
        hypot((other.x - self.x) * sx, (other.y - self.y) * sy)
    }

    /// Linear interpolation towards `other`, `t = 0` is `self` and `t = 1` is `other`.
    pub fn lerp(&self, other: &NormalizedPoint, t: f64) -> NormalizedPoint {
        NormalizedPoint {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

impl From<[f64; 2]> for NormalizedPoint {
    fn from(value: [f64; 2]) -> Self {
        NormalizedPoint::new(value[0], value[1])
    }
}

impl From<NormalizedPoint> for [f64; 2] {
    fn from(value: NormalizedPoint) -> Self {
        [value.x, value.y]
    }
}

impl fmt::Display for NormalizedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.x, self.y)
    }
}

/// Distance from `p` to the segment `a`-`b`.
///
/// The projection of `p` is clamped onto the segment, so points beyond either end
/// measure to the nearest endpoint. A degenerate segment measures to `a`.
pub fn perpendicular_distance(p: &NormalizedPoint, a: &NormalizedPoint, b: &NormalizedPoint) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq == 0.0 {
        return p.distance(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance(&a.lerp(b, t))
}

/// Change of heading at `b` when travelling `a -> b -> c`, in radians within `[0, PI]`.
///
/// A straight continuation is `0`, a full reversal is `PI`. If either leg has zero
/// length the turn is reported as `0`.
pub fn turn_angle(a: &NormalizedPoint, b: &NormalizedPoint, c: &NormalizedPoint) -> f64 {
    let (ux, uy) = (b.x - a.x, b.y - a.y);
    let (vx, vy) = (c.x - b.x, c.y - b.y);
    let lu = hypot(ux, uy);
    let lv = hypot(vx, vy);
    if lu == 0.0 || lv == 0.0 {
        return 0.0;
    }
    // Rounding can push the cosine slightly outside [-1, 1].
    let cos = ((ux * vx + uy * vy) / (lu * lv)).clamp(-1.0, 1.0);
    acos(cos)
}

/// Sum of the Euclidean lengths of consecutive segments, in normalized units.
pub fn polyline_length(points: &[NormalizedPoint]) -> f64 {
    points.windows(2).map(|w| w[0].distance(&w[1])).sum()
}

/// Sum of segment lengths with each axis scaled by `sx` and `sy`.
pub fn scaled_polyline_length(points: &[NormalizedPoint], sx: f64, sy: f64) -> f64 {
    points
        .windows(2)
        .map(|w| w[0].scaled_distance(&w[1], sx, sy))
        .sum()
}
