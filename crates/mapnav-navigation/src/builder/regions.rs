use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

/// Per-component pixel statistics collected in one pass over a label image.
#[derive(Debug, Clone, Default)]
pub(crate) struct Region {
    pub area: u64,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub touches_border: bool,
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
}

impl Region {
    fn add(&mut self, x: u32, y: u32, border: bool) {
        if self.area == 0 {
            self.min_x = x;
            self.min_y = y;
            self.max_x = x;
            self.max_y = y;
        } else {
            self.min_x = self.min_x.min(x);
            self.min_y = self.min_y.min(y);
            self.max_x = self.max_x.max(x);
            self.max_y = self.max_y.max(y);
        }
        self.area += 1;
        self.touches_border |= border;
        let (fx, fy) = (x as f64, y as f64);
        self.sum_x += fx;
        self.sum_y += fy;
        self.sum_xx += fx * fx;
        self.sum_yy += fy * fy;
        self.sum_xy += fx * fy;
    }

    /// Centroid as `(x, y)` in pixels.
    pub fn centroid(&self) -> (f64, f64) {
        let n = self.area.max(1) as f64;
        (self.sum_x / n, self.sum_y / n)
    }

    /// Lengths of the major and minor axes of the ellipse with the same second
    /// central moments as the region.
    pub fn axis_lengths(&self) -> (f64, f64) {
        let n = self.area.max(1) as f64;
        let (cx, cy) = self.centroid();
        let mu20 = (self.sum_xx / n - cx * cx).max(0.0);
        let mu02 = (self.sum_yy / n - cy * cy).max(0.0);
        let mu11 = self.sum_xy / n - cx * cy;

        let mean = (mu20 + mu02) / 2.0;
        let spread = (((mu20 - mu02) / 2.0).powi(2) + mu11 * mu11).sqrt();
        let major = 4.0 * (mean + spread).max(0.0).sqrt();
        let minor = 4.0 * (mean - spread).max(0.0).sqrt();
        (major, minor)
    }
}

/// Labels the pixels for which `foreground` holds and collects region statistics.
///
/// Returns the label image (0 for background, `n` for region `n`) and the
/// regions, where `regions[n - 1]` describes label `n`.
pub(crate) fn label_regions(
    mask: &GrayImage,
    connectivity: Connectivity,
    foreground: impl Fn(u8) -> bool,
) -> (ImageBuffer<Luma<u32>, Vec<u32>>, Vec<Region>) {
    let (width, height) = mask.dimensions();
    let selected = GrayImage::from_fn(width, height, |x, y| {
        if foreground(mask.get_pixel(x, y).0[0]) {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let labels = connected_components(&selected, connectivity, Luma([0u8]));

    let mut regions: Vec<Region> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label == 0 {
            continue;
        }
        if regions.len() < label {
            regions.resize(label, Region::default());
        }
        let border = x == 0 || y == 0 || x + 1 == width || y + 1 == height;
        regions[label - 1].add(x, y, border);
    }
    (labels, regions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_regions_stats() {
        let mut mask = GrayImage::new(10, 10);
        for y in 2..4 {
            for x in 1..9 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask.put_pixel(0, 9, Luma([255]));

        let (labels, regions) = label_regions(&mask, Connectivity::Eight, |v| v != 0);
        assert_eq!(regions.len(), 2);
        let bar = &regions[labels.get_pixel(4, 2).0[0] as usize - 1];
        assert_eq!(bar.area, 16);
        assert_eq!((bar.min_x, bar.min_y, bar.max_x, bar.max_y), (1, 2, 8, 3));
        assert!(!bar.touches_border);
        let (cx, cy) = bar.centroid();
        assert!((cx - 4.5).abs() < 1e-9 && (cy - 2.5).abs() < 1e-9);
        let (major, minor) = bar.axis_lengths();
        assert!(major / minor > 3.0);

        let dot = &regions[labels.get_pixel(0, 9).0[0] as usize - 1];
        assert_eq!(dot.area, 1);
        assert!(dot.touches_border);
        assert_eq!(dot.axis_lengths(), (0.0, 0.0));
    }
}
