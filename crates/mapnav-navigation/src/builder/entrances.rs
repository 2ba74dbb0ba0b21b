use image::GrayImage;
use mapnav_geometry::NormalizedPoint;

/// Border of the image frame an entrance lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// Top edge.
    North,
    /// Bottom edge.
    South,
    /// Right edge.
    East,
    /// Left edge.
    West,
}

/// A walkable pixel on the image border.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntrancePoint {
    /// Normalized position on the border.
    pub position: NormalizedPoint,
    /// Border the entrance lies on.
    pub direction: Direction,
}

/// Samples the four borders every `stride` pixels and reports each walkable sample,
/// north then south then west then east.
pub fn detect_entrances(mask: &GrayImage, stride: u32) -> Vec<EntrancePoint> {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let step = stride.max(1) as usize;
    let (w, h) = (f64::from(width), f64::from(height));
    let walkable = |x: u32, y: u32| mask.get_pixel(x, y).0[0] != 0;

    let mut entrances = Vec::new();
    let mut push = |x: f64, y: f64, direction: Direction| {
        entrances.push(EntrancePoint {
            position: NormalizedPoint::new(x, y),
            direction,
        });
    };

    for x in (0..width).step_by(step) {
        if walkable(x, 0) {
            push(f64::from(x) / w, 0.0, Direction::North);
        }
    }
    for x in (0..width).step_by(step) {
        if walkable(x, height - 1) {
            push(f64::from(x) / w, 1.0, Direction::South);
        }
    }
    for y in (0..height).step_by(step) {
        if walkable(0, y) {
            push(0.0, f64::from(y) / h, Direction::West);
        }
    }
    for y in (0..height).step_by(step) {
        if walkable(width - 1, y) {
            push(1.0, f64::from(y) / h, Direction::East);
        }
    }
    entrances
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_detect_entrances() {
        let mut mask = GrayImage::from_pixel(40, 20, Luma([0]));
        // Opening on the top edge at x = 10.
        mask.put_pixel(10, 0, Luma([255]));
        // Opening on the right edge at y = 10.
        mask.put_pixel(39, 10, Luma([255]));
        // Not sampled, off stride.
        mask.put_pixel(0, 5, Luma([255]));

        let entrances = detect_entrances(&mask, 10);
        assert_eq!(entrances.len(), 2);
        assert_eq!(entrances[0].direction, Direction::North);
        assert_eq!(entrances[0].position, NormalizedPoint::new(0.25, 0.0));
        assert_eq!(entrances[1].direction, Direction::East);
        assert_eq!(entrances[1].position, NormalizedPoint::new(1.0, 0.5));
    }

    #[test]
    fn test_detect_entrances_open_map() {
        let mask = GrayImage::from_pixel(20, 20, Luma([255]));
        let entrances = detect_entrances(&mask, 10);
        // Two samples per border.
        assert_eq!(entrances.len(), 8);
        assert!(entrances.iter().all(|e| e.position.is_normalized()));
    }
}
