use image::GrayImage;
use imageproc::region_labelling::Connectivity;

use super::BuilderConfig;
use super::regions::label_regions;

/// Coarse shape class of an obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ObstacleKind {
    /// Long and thin.
    Wall,
    /// Large and compact.
    Building,
    /// Anything else.
    Obstacle,
}

impl std::fmt::Display for ObstacleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObstacleKind::Wall => write!(f, "wall"),
            ObstacleKind::Building => write!(f, "building"),
            ObstacleKind::Obstacle => write!(f, "obstacle"),
        }
    }
}

/// A connected non-walkable region of the source raster.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Obstacle {
    /// Sequential id in extraction order.
    pub id: usize,
    /// Centroid `[x, y]` in source pixels.
    pub centroid: [f64; 2],
    /// Area in source pixels.
    pub area: u64,
    /// `[min_row, min_col, max_row, max_col]`, max exclusive.
    pub bbox: [u32; 4],
    /// Shape class.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: ObstacleKind,
}

/// Classifies a region by its major/minor axis ratio, then by area.
pub(crate) fn classify(major: f64, minor: f64, area: u64, config: &BuilderConfig) -> ObstacleKind {
    let aspect_ratio = major / (minor + 0.001);
    if aspect_ratio > config.wall_aspect_ratio {
        ObstacleKind::Wall
    } else if area > u64::from(config.building_area) {
        ObstacleKind::Building
    } else {
        ObstacleKind::Obstacle
    }
}

/// Labels the non-walkable pixels of `mask` with 8-connectivity and reports every
/// component of at least `min_obstacle_area` pixels.
pub fn extract_obstacles(mask: &GrayImage, config: &BuilderConfig) -> Vec<Obstacle> {
    let (_, regions) = label_regions(mask, Connectivity::Eight, |v| v == 0);
    regions
        .iter()
        .filter(|r| r.area > 0 && r.area >= u64::from(config.min_obstacle_area))
        .enumerate()
        .map(|(id, r)| {
            let (cx, cy) = r.centroid();
            let (major, minor) = r.axis_lengths();
            Obstacle {
                id,
                centroid: [cx, cy],
                area: r.area,
                bbox: [r.min_y, r.min_x, r.max_y + 1, r.max_x + 1],
                kind: classify(major, minor, r.area, config),
            }
        })
        .collect()
}
