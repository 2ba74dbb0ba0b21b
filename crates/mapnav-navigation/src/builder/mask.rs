use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::Connectivity;

use super::BuilderConfig;
use super::regions::label_regions;
use crate::error::NavigationError;
use crate::map::{Cell, GridPoint, NavigationGrid};

const WALKABLE: u8 = 255;
const BLOCKED: u8 = 0;

/// Classifies every pixel of a grayscale raster, returning a mask with `255` for
/// walkable pixels and `0` for obstacles.
///
/// Stages: blur, local mean threshold, edge carving, opening then closing,
/// bounded hole filling, and removal of small walkable islands.
pub fn classify_pixels(gray: &GrayImage, config: &BuilderConfig) -> GrayImage {
    let blurred = if config.blur_sigma > 0.0 {
        gaussian_blur_f32(gray, config.blur_sigma)
    } else {
        gray.clone()
    };

    let mut mask = local_threshold(
        &blurred,
        config.adaptive_block_radius,
        config.adaptive_offset,
        config.dark_threshold,
    );

    // Drawn lines must not let the walkable area bleed across them.
    let edges = canny(&blurred, config.canny_low, config.canny_high);
    for (m, e) in mask.pixels_mut().zip(edges.pixels()) {
        if e.0[0] != 0 {
            m.0[0] = BLOCKED;
        }
    }

    if config.morphology_radius > 0 {
        mask = open(&mask, Norm::LInf, config.morphology_radius);
        mask = close(&mask, Norm::LInf, config.morphology_radius);
    }

    fill_holes(&mut mask, config.max_hole_area);
    remove_small_regions(&mut mask, config.min_region_area);
    mask
}

/// Box-mean threshold computed from a summed-area table. A pixel is walkable when it
/// is brighter than `dark_threshold` and exceeds its local mean minus `offset`.
fn local_threshold(gray: &GrayImage, radius: u32, offset: f32, dark_threshold: u8) -> GrayImage {
    let (width, height) = gray.dimensions();
    let (w, h) = (width as usize, height as usize);

    let stride = w + 1;
    let mut table = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += u64::from(gray.get_pixel(x as u32, y as u32).0[0]);
            table[(y + 1) * stride + x + 1] = table[y * stride + x + 1] + row_sum;
        }
    }

    let r = radius as usize;
    GrayImage::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let x0 = x.saturating_sub(r);
        let y0 = y.saturating_sub(r);
        let x1 = (x + r + 1).min(w);
        let y1 = (y + r + 1).min(h);
        let sum = table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y0 * stride + x1]
            - table[y1 * stride + x0];
        let count = ((x1 - x0) * (y1 - y0)) as f32;
        let mean = sum as f32 / count;

        let value = gray.get_pixel(x as u32, y as u32).0[0];
        if value > dark_threshold && f32::from(value) > mean - offset {
            Luma([WALKABLE])
        } else {
            Luma([BLOCKED])
        }
    })
}

/// Marks enclosed non-walkable regions of at most `max_area` pixels walkable.
/// Regions touching the image border are never holes.
fn fill_holes(mask: &mut GrayImage, max_area: u32) {
    if max_area == 0 {
        return;
    }
    let (labels, regions) = label_regions(mask, Connectivity::Four, |v| v == BLOCKED);
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label == 0 {
            continue;
        }
        let region = &regions[label - 1];
        if !region.touches_border && region.area <= u64::from(max_area) {
            mask.put_pixel(x, y, Luma([WALKABLE]));
        }
    }
}

/// Marks walkable regions smaller than `min_area` pixels as obstacles.
fn remove_small_regions(mask: &mut GrayImage, min_area: u32) {
    if min_area <= 1 {
        return;
    }
    let (labels, regions) = label_regions(mask, Connectivity::Four, |v| v != BLOCKED);
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0] as usize;
        if label != 0 && regions[label - 1].area < u64::from(min_area) {
            mask.put_pixel(x, y, Luma([BLOCKED]));
        }
    }
}

/// Tiles the mask into `cell_size` squares. A cell is walkable only if the fraction
/// of walkable pixels in it is strictly greater than `walkable_ratio`.
///
/// Trailing pixels that do not fill a whole cell are dropped.
///
/// # Errors
/// `InvalidDimensions` if the mask is smaller than one cell.
pub fn downsample(
    mask: &GrayImage,
    cell_size: u32,
    walkable_ratio: f64,
) -> Result<NavigationGrid, NavigationError> {
    let (width, height) = mask.dimensions();
    if cell_size == 0 {
        return Err(NavigationError::InvalidDimensions("Cell size must be non-zero"));
    }
    let cols = (width / cell_size) as usize;
    let rows = (height / cell_size) as usize;
    let mut grid = NavigationGrid::new(cols, rows, cell_size)?.with_image_size(width, height);

    let pixels_per_cell = f64::from(cell_size * cell_size);
    for row in 0..rows {
        for col in 0..cols {
            let x0 = col as u32 * cell_size;
            let y0 = row as u32 * cell_size;
            let mut walkable = 0u32;
            for y in y0..y0 + cell_size {
                for x in x0..x0 + cell_size {
                    if mask.get_pixel(x, y).0[0] != BLOCKED {
                        walkable += 1;
                    }
                }
            }
            if f64::from(walkable) / pixels_per_cell <= walkable_ratio {
                grid.set_cell(GridPoint::new(col, row), Cell::Obstacle)?;
            }
        }
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_threshold_marks_dark_lines() {
        let mut gray = GrayImage::from_pixel(30, 30, Luma([220]));
        for y in 0..30 {
            gray.put_pixel(15, y, Luma([40]));
        }
        let mask = local_threshold(&gray, 5, 2.0, 50);
        assert_eq!(mask.get_pixel(15, 10).0[0], BLOCKED);
        assert_eq!(mask.get_pixel(5, 10).0[0], WALKABLE);
        assert_eq!(mask.get_pixel(14, 10).0[0], WALKABLE);
    }

    #[test]
    fn test_local_threshold_handles_uneven_lighting() {
        // A brightness ramp has no dark features, so every pixel whose window lies
        // fully inside the image stays walkable.
        let gray = GrayImage::from_fn(40, 20, |x, _| Luma([60 + (x as u8) * 4]));
        let mask = local_threshold(&gray, 5, 2.0, 50);
        for y in 5..15 {
            for x in 5..35 {
                assert_eq!(mask.get_pixel(x, y).0[0], WALKABLE, "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_fill_holes_respects_area_bound() {
        let mut mask = GrayImage::from_pixel(40, 40, Luma([WALKABLE]));
        // 2x2 speck, a hole.
        for (x, y) in [(5, 5), (6, 5), (5, 6), (6, 6)] {
            mask.put_pixel(x, y, Luma([BLOCKED]));
        }
        // 10x10 interior obstacle, too big to fill.
        for y in 20..30 {
            for x in 20..30 {
                mask.put_pixel(x, y, Luma([BLOCKED]));
            }
        }
        // Border-touching speck.
        mask.put_pixel(0, 39, Luma([BLOCKED]));

        fill_holes(&mut mask, 64);
        assert_eq!(mask.get_pixel(5, 5).0[0], WALKABLE);
        assert_eq!(mask.get_pixel(25, 25).0[0], BLOCKED);
        assert_eq!(mask.get_pixel(0, 39).0[0], BLOCKED);
    }

    #[test]
    fn test_remove_small_regions() {
        let mut mask = GrayImage::from_pixel(30, 30, Luma([BLOCKED]));
        for y in 0..15 {
            for x in 0..15 {
                mask.put_pixel(x, y, Luma([WALKABLE]));
            }
        }
        for y in 25..28 {
            for x in 25..28 {
                mask.put_pixel(x, y, Luma([WALKABLE]));
            }
        }
        remove_small_regions(&mut mask, 100);
        assert_eq!(mask.get_pixel(3, 3).0[0], WALKABLE);
        assert_eq!(mask.get_pixel(26, 26).0[0], BLOCKED);
    }

    #[test]
    fn test_downsample_supermajority() {
        // One 5x5 cell with 18 of 25 pixels walkable (72%) and one with 17 (68%).
        let mut mask = GrayImage::from_pixel(10, 5, Luma([WALKABLE]));
        let mut blocked = 0;
        'outer: for y in 0..5 {
            for x in 0..5 {
                if blocked == 7 {
                    break 'outer;
                }
                mask.put_pixel(x, y, Luma([BLOCKED]));
                blocked += 1;
            }
        }
        for x in 5..10 {
            mask.put_pixel(x, 0, Luma([BLOCKED]));
        }
        for x in 5..8 {
            mask.put_pixel(x, 1, Luma([BLOCKED]));
        }

        let grid = downsample(&mask, 5, 0.7).unwrap();
        assert_eq!((grid.cols(), grid.rows()), (2, 1));
        assert!(grid.is_walkable(GridPoint::new(0, 0)));
        assert!(!grid.is_walkable(GridPoint::new(1, 0)));
    }

    #[test]
    fn test_downsample_exact_threshold_is_not_enough() {
        // 70 of 100 pixels walkable is exactly 70%.
        let mut square = GrayImage::from_pixel(10, 10, Luma([WALKABLE]));
        for y in 0..10 {
            for x in 0..3 {
                square.put_pixel(x, y, Luma([BLOCKED]));
            }
        }
        let grid = downsample(&square, 10, 0.7).unwrap();
        assert_eq!(grid.walkable_count(), 0);
    }

    #[test]
    fn test_classify_pixels_blank_and_lined() {
        let config = BuilderConfig::default();
        let blank = GrayImage::from_pixel(40, 40, Luma([240]));
        assert!(classify_pixels(&blank, &config).pixels().all(|p| p.0[0] == WALKABLE));

        let mut lined = GrayImage::from_pixel(60, 60, Luma([240]));
        for y in 0..60 {
            for x in 27..33 {
                lined.put_pixel(x, y, Luma([10]));
            }
        }
        let mask = classify_pixels(&lined, &config);
        assert_eq!(mask.get_pixel(30, 30).0[0], BLOCKED);
        assert_eq!(mask.get_pixel(8, 30).0[0], WALKABLE);
        assert_eq!(mask.get_pixel(52, 30).0[0], WALKABLE);
    }
}
