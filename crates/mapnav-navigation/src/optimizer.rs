//! Route simplification, smoothing and serialization.
//!
//! The pipeline runs in a fixed order: collapse repeated points, reduce waypoints,
//! smooth, pick key waypoints, serialize, measure.

use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use mapnav_geometry::{NormalizedPoint, perpendicular_distance, polyline_length, turn_angle};
use tracing::warn;

/// Default waypoint reduction tolerance in normalized units.
pub const DEFAULT_TOLERANCE: f64 = 0.001;
/// Default turn, in degrees, above which a waypoint is kept as a key waypoint.
pub const DEFAULT_TURN_THRESHOLD_DEG: f64 = 30.0;

/// How densely the smoothed curve is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SmoothingLevel {
    /// No smoothing, the reduced path is used as is.
    None,
    /// 10 samples per point.
    Low,
    /// 20 samples per point.
    #[default]
    Medium,
    /// 30 samples per point.
    High,
}

impl SmoothingLevel {
    /// Curve samples generated per input point.
    pub fn samples_per_point(self) -> usize {
        match self {
            SmoothingLevel::None => 0,
            SmoothingLevel::Low => 10,
            SmoothingLevel::Medium => 20,
            SmoothingLevel::High => 30,
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            SmoothingLevel::None => "none",
            SmoothingLevel::Low => "low",
            SmoothingLevel::Medium => "medium",
            SmoothingLevel::High => "high",
        }
    }
}

impl fmt::Display for SmoothingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no smoothing level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSmoothingLevelError(pub String);

impl fmt::Display for ParseSmoothingLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown smoothing level '{}', expected none, low, medium or high",
            self.0
        )
    }
}

impl std::error::Error for ParseSmoothingLevelError {}

impl FromStr for SmoothingLevel {
    type Err = ParseSmoothingLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SmoothingLevel::None),
            "low" => Ok(SmoothingLevel::Low),
            "medium" => Ok(SmoothingLevel::Medium),
            "high" => Ok(SmoothingLevel::High),
            other => Err(ParseSmoothingLevelError(other.to_string())),
        }
    }
}

/// Point counts before and after optimization.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptimizationStats {
    /// Points in the raw input.
    pub original_points: usize,
    /// Points after waypoint reduction.
    pub optimized_points: usize,
    /// Points in the smoothed curve.
    pub smoothed_points: usize,
    /// `1 - optimized / original`, zero for an empty input.
    pub reduction_ratio: f64,
}

/// All artifacts derived from one raw path.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizedPath {
    /// The raw input.
    pub original: Vec<NormalizedPoint>,
    /// Waypoint-reduced path.
    pub reduced: Vec<NormalizedPoint>,
    /// Smoothed curve through the reduced path.
    pub smoothed: Vec<NormalizedPoint>,
    /// Endpoints plus every reduced waypoint where the heading turns sharply.
    pub key_waypoints: Vec<NormalizedPoint>,
    /// Move/curve/line command string of the smoothed curve.
    pub vector_path: String,
    /// Length of the smoothed curve in normalized units.
    pub length: f64,
    /// Point counts.
    pub stats: OptimizationStats,
}

impl OptimizedPath {
    /// Interior key waypoints, the number of significant turns.
    pub fn turn_count(&self) -> usize {
        self.key_waypoints.len().saturating_sub(2)
    }

    fn unchanged(path: &[NormalizedPoint]) -> Self {
        OptimizedPath {
            original: path.to_vec(),
            reduced: path.to_vec(),
            smoothed: path.to_vec(),
            key_waypoints: path.to_vec(),
            vector_path: to_vector_path(path),
            length: polyline_length(path),
            stats: OptimizationStats {
                original_points: path.len(),
                optimized_points: path.len(),
                smoothed_points: path.len(),
                reduction_ratio: 0.0,
            },
        }
    }
}

/// Simplifies and smooths raw search paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathOptimizer {
    tolerance: f64,
    turn_threshold: f64,
}

impl Default for PathOptimizer {
    fn default() -> Self {
        PathOptimizer::new(DEFAULT_TOLERANCE, DEFAULT_TURN_THRESHOLD_DEG)
    }
}

impl PathOptimizer {
    /// Creates an optimizer with a reduction tolerance (normalized units) and a key
    /// waypoint turn threshold (degrees).
    pub fn new(tolerance: f64, turn_threshold_deg: f64) -> Self {
        PathOptimizer {
            tolerance,
            turn_threshold: turn_threshold_deg.to_radians(),
        }
    }

    /// Runs the full pipeline.
    ///
    /// Paths with fewer than two points are returned unchanged. A path containing
    /// non-finite coordinates, or one whose smoothing produces them, falls back to
    /// the unsimplified path.
    pub fn optimize(&self, path: &[NormalizedPoint], level: SmoothingLevel) -> OptimizedPath {
        if path.len() < 2 {
            return OptimizedPath::unchanged(path);
        }
        let unique = remove_duplicates(path);
        if unique.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            warn!(points = path.len(), "non-finite path coordinates, skipping optimization");
            let mut result = OptimizedPath::unchanged(&unique);
            result.original = path.to_vec();
            result.stats.original_points = path.len();
            return result;
        }

        let reduced = reduce_waypoints(&unique, self.tolerance);
        let smoothed = match smooth_path(&reduced, level) {
            Some(curve) => curve,
            None => {
                warn!(points = reduced.len(), "smoothing failed, using reduced path");
                reduced.clone()
            }
        };
        let key_waypoints = self.key_waypoints(&reduced);
        let vector_path = to_vector_path(&smoothed);
        let length = polyline_length(&smoothed);

        let stats = OptimizationStats {
            original_points: path.len(),
            optimized_points: reduced.len(),
            smoothed_points: smoothed.len(),
            reduction_ratio: 1.0 - reduced.len() as f64 / path.len() as f64,
        };

        OptimizedPath {
            original: path.to_vec(),
            reduced,
            smoothed,
            key_waypoints,
            vector_path,
            length,
            stats,
        }
    }

    /// Endpoints plus each interior point whose turn exceeds the threshold.
    pub fn key_waypoints(&self, path: &[NormalizedPoint]) -> Vec<NormalizedPoint> {
        if path.len() <= 2 {
            return path.to_vec();
        }
        let mut waypoints = vec![path[0]];
        for w in path.windows(3) {
            if turn_angle(&w[0], &w[1], &w[2]) > self.turn_threshold {
                waypoints.push(w[1]);
            }
        }
        waypoints.push(path[path.len() - 1]);
        waypoints
    }
}

/// Collapses consecutive equal points.
pub fn remove_duplicates(path: &[NormalizedPoint]) -> Vec<NormalizedPoint> {
    let mut unique: Vec<NormalizedPoint> = Vec::with_capacity(path.len());
    for p in path {
        if unique.last() != Some(p) {
            unique.push(*p);
        }
    }
    unique
}

/// Douglas-Peucker reduction with an explicit work stack.
///
/// A span keeps its farthest interior point when that point is more than
/// `tolerance` from the span's chord, and is split there; otherwise the span
/// collapses to its endpoints.
pub fn reduce_waypoints(path: &[NormalizedPoint], tolerance: f64) -> Vec<NormalizedPoint> {
    if path.len() <= 2 {
        return path.to_vec();
    }
    let mut keep = vec![false; path.len()];
    keep[0] = true;
    keep[path.len() - 1] = true;

    let mut stack = vec![(0, path.len() - 1)];
    while let Some((first, last)) = stack.pop() {
        if last <= first + 1 {
            continue;
        }
        let mut max_dist = 0.0;
        let mut max_idx = first;
        for i in first + 1..last {
            let d = perpendicular_distance(&path[i], &path[first], &path[last]);
            if d > max_dist {
                max_dist = d;
                max_idx = i;
            }
        }
        if max_dist > tolerance {
            keep[max_idx] = true;
            stack.push((first, max_idx));
            stack.push((max_idx, last));
        }
    }

    path.iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Resamples the path as a smooth curve.
///
/// Four or more points use a Catmull-Rom spline over chord-length knots, three
/// points use linear interpolation, and fewer points or [`SmoothingLevel::None`]
/// return the input. Samples are clamped to the unit square and the endpoints are
/// kept exact. Returns `None` if the curve is not finite.
pub fn smooth_path(path: &[NormalizedPoint], level: SmoothingLevel) -> Option<Vec<NormalizedPoint>> {
    let per_point = level.samples_per_point();
    if path.len() < 3 || per_point == 0 {
        return Some(path.to_vec());
    }
    let samples = per_point * path.len();

    let curve: Vec<NormalizedPoint> = if path.len() >= 4 {
        let knots = chord_knots(path)?;
        (0..samples)
            .map(|i| catmull_rom(path, &knots, i as f64 / (samples - 1) as f64))
            .collect()
    } else {
        let last = (path.len() - 1) as f64;
        (0..samples)
            .map(|i| {
                let u = i as f64 / (samples - 1) as f64 * last;
                let seg = (u.floor() as usize).min(path.len() - 2);
                path[seg].lerp(&path[seg + 1], u - seg as f64)
            })
            .collect()
    };

    if curve.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return None;
    }
    let mut curve: Vec<NormalizedPoint> = curve.into_iter().map(NormalizedPoint::clamped).collect();
    if let Some(first) = curve.first_mut() {
        *first = path[0];
    }
    if let Some(last) = curve.last_mut() {
        *last = path[path.len() - 1];
    }
    Some(remove_duplicates(&curve))
}

/// Cumulative chord length normalized to `[0, 1]`. `None` for a zero-length path.
fn chord_knots(path: &[NormalizedPoint]) -> Option<Vec<f64>> {
    let mut knots = Vec::with_capacity(path.len());
    let mut acc = 0.0;
    knots.push(0.0);
    for w in path.windows(2) {
        acc += w[0].distance(&w[1]);
        knots.push(acc);
    }
    if acc <= 0.0 || !acc.is_finite() {
        return None;
    }
    for k in knots.iter_mut() {
        *k /= acc;
    }
    if let Some(last) = knots.last_mut() {
        *last = 1.0;
    }
    Some(knots)
}

/// Evaluates the cubic Hermite spline with Catmull-Rom tangents at parameter `u`.
fn catmull_rom(path: &[NormalizedPoint], knots: &[f64], u: f64) -> NormalizedPoint {
    let n = path.len();
    let seg = knots
        .windows(2)
        .position(|k| u <= k[1])
        .unwrap_or(n - 2);
    let h = knots[seg + 1] - knots[seg];
    if h <= 0.0 {
        return path[seg];
    }

    let tangent = |i: usize| -> (f64, f64) {
        let (a, b) = (i.saturating_sub(1), (i + 1).min(n - 1));
        let dt = knots[b] - knots[a];
        if dt <= 0.0 {
            return (0.0, 0.0);
        }
        ((path[b].x - path[a].x) / dt, (path[b].y - path[a].y) / dt)
    };

    let s = ((u - knots[seg]) / h).clamp(0.0, 1.0);
    let (s2, s3) = (s * s, s * s * s);
    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;

    let (p0, p1) = (path[seg], path[seg + 1]);
    let (m0, m1) = (tangent(seg), tangent(seg + 1));
    NormalizedPoint::new(
        h00 * p0.x + h10 * h * m0.0 + h01 * p1.x + h11 * h * m1.0,
        h00 * p0.y + h10 * h * m0.1 + h01 * p1.y + h11 * h * m1.1,
    )
}

/// Serializes a path as `M x,y` followed by `Q cx,cy ex,ey` pairs, with a trailing
/// `L x,y` for an unpaired final point. Coordinates use four decimals. An empty or
/// single-point path yields an empty string.
pub fn to_vector_path(path: &[NormalizedPoint]) -> String {
    if path.len() < 2 {
        return String::new();
    }
    let mut out = format!("M {:.4},{:.4}", path[0].x, path[0].y);
    if path.len() == 2 {
        let _ = write!(out, " L {:.4},{:.4}", path[1].x, path[1].y);
        return out;
    }
    for pair in path[1..].chunks(2) {
        match pair {
            [control, end] => {
                let _ = write!(
                    out,
                    " Q {:.4},{:.4} {:.4},{:.4}",
                    control.x, control.y, end.x, end.y
                );
            }
            [end] => {
                let _ = write!(out, " L {:.4},{:.4}", end.x, end.y);
            }
            _ => {}
        }
    }
    out
}
