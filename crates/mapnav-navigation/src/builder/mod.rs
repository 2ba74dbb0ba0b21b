//! Raster map to navigation grid.
//!
//! [`GridBuilder::build`] classifies every source pixel as walkable or not, tiles
//! the result into a coarse [`NavigationGrid`], and extracts obstacles and border
//! entrances from the same pixel mask.

mod entrances;
mod mask;
mod obstacles;
mod overlay;
mod regions;

pub use entrances::{Direction, EntrancePoint, detect_entrances};
pub use mask::{classify_pixels, downsample};
pub use obstacles::{Obstacle, ObstacleKind, extract_obstacles};
pub use overlay::render_overlay;

use image::{DynamicImage, GrayImage};
use tracing::{debug, info};

use crate::error::NavigationError;
use crate::map::NavigationGrid;

/// Tuning knobs for the raster classifier and grid extraction.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BuilderConfig {
    /// Gaussian blur sigma applied before thresholding. `0` disables the blur.
    pub blur_sigma: f32,
    /// Half-width of the square window used for the local mean threshold.
    pub adaptive_block_radius: u32,
    /// A pixel is walkable when its value exceeds the local mean minus this offset.
    pub adaptive_offset: f32,
    /// Pixels at or below this intensity are never walkable.
    pub dark_threshold: u8,
    /// Lower Canny hysteresis threshold.
    pub canny_low: f32,
    /// Upper Canny hysteresis threshold.
    pub canny_high: f32,
    /// Radius of the square structuring element for opening and closing.
    pub morphology_radius: u8,
    /// Enclosed non-walkable regions up to this many pixels are filled.
    pub max_hole_area: u32,
    /// Walkable regions smaller than this many pixels are discarded as noise.
    pub min_region_area: u32,
    /// Source pixels per grid cell edge.
    pub cell_size: u32,
    /// A cell is walkable only if more than this fraction of its pixels are.
    pub cell_walkable_ratio: f64,
    /// Obstacle components smaller than this many pixels are not reported.
    pub min_obstacle_area: u32,
    /// Major/minor axis ratio above which an obstacle is a wall.
    pub wall_aspect_ratio: f64,
    /// Area in pixels above which a non-wall obstacle is a building.
    pub building_area: u32,
    /// Spacing in pixels between sampled border pixels.
    pub entrance_stride: u32,
    /// Builds with a smaller walkable percentage fail as degenerate.
    pub min_walkable_percentage: f64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            blur_sigma: 1.1,
            adaptive_block_radius: 5,
            adaptive_offset: 2.0,
            dark_threshold: 50,
            canny_low: 50.0,
            canny_high: 150.0,
            morphology_radius: 2,
            max_hole_area: 64,
            min_region_area: 100,
            cell_size: 5,
            cell_walkable_ratio: 0.7,
            min_obstacle_area: 50,
            wall_aspect_ratio: 5.0,
            building_area: 1000,
            entrance_stride: 10,
            min_walkable_percentage: 1.0,
        }
    }
}

/// Everything extracted from one raster.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// The coarse navigation grid.
    pub grid: NavigationGrid,
    /// Connected non-walkable regions.
    pub obstacles: Vec<Obstacle>,
    /// Walkable border samples.
    pub entrances: Vec<EntrancePoint>,
    /// Percentage of source pixels classified walkable.
    pub walkable_percentage: f64,
    /// Full resolution mask, `255` walkable and `0` obstacle.
    pub mask: GrayImage,
}

/// Converts raster maps into navigation data.
#[derive(Debug, Clone, Default)]
pub struct GridBuilder {
    config: BuilderConfig,
}

impl GridBuilder {
    /// Creates a builder with the given configuration.
    pub fn new(config: BuilderConfig) -> Self {
        GridBuilder { config }
    }

    /// The configuration in use.
    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Decodes an encoded raster (PNG, JPEG, ...) and builds from it.
    ///
    /// # Errors
    /// `ImageUnreadable` if the bytes cannot be decoded, otherwise as [`build`](Self::build).
    pub fn build_from_bytes(&self, bytes: &[u8]) -> Result<BuildOutput, NavigationError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| NavigationError::ImageUnreadable(e.to_string()))?;
        self.build(&image)
    }

    /// Classifies the raster's pixels and builds navigation data from the result.
    ///
    /// # Errors
    /// `InvalidDimensions` if the raster is smaller than one cell, `DegenerateMap`
    /// if too little of it is walkable.
    pub fn build(&self, image: &DynamicImage) -> Result<BuildOutput, NavigationError> {
        self.check_size(image)?;
        let gray = image.to_luma8();
        let mask = classify_pixels(&gray, &self.config);
        self.assemble(image, mask)
    }

    /// Builds navigation data from an externally produced walkable mask.
    ///
    /// Mask pixels brighter than `127` are walkable.
    ///
    /// # Errors
    /// `InvalidDimensions` if the mask does not match the raster size or is smaller
    /// than one cell, `DegenerateMap` if too little of it is walkable.
    pub fn build_from_mask(
        &self,
        image: &DynamicImage,
        mask: &GrayImage,
    ) -> Result<BuildOutput, NavigationError> {
        if mask.dimensions() != (image.width(), image.height()) {
            return Err(NavigationError::InvalidDimensions(
                "Mask must match the raster size",
            ));
        }
        self.check_size(image)?;
        let mut binary = mask.clone();
        for p in binary.pixels_mut() {
            p.0[0] = if p.0[0] > 127 { 255 } else { 0 };
        }
        self.assemble(image, binary)
    }

    fn check_size(&self, image: &DynamicImage) -> Result<(), NavigationError> {
        let cell = self.config.cell_size;
        if cell == 0 || image.width() < cell || image.height() < cell {
            return Err(NavigationError::InvalidDimensions(
                "Raster is smaller than one grid cell",
            ));
        }
        Ok(())
    }

    fn assemble(&self, image: &DynamicImage, mask: GrayImage) -> Result<BuildOutput, NavigationError> {
        let (width, height) = mask.dimensions();
        let walkable_pixels = mask.pixels().filter(|p| p.0[0] != 0).count();
        let walkable_percentage = walkable_pixels as f64 * 100.0 / (width as f64 * height as f64);

        if walkable_percentage < self.config.min_walkable_percentage {
            return Err(NavigationError::DegenerateMap {
                walkable_percentage,
                minimum: self.config.min_walkable_percentage,
            });
        }

        let grid = downsample(&mask, self.config.cell_size, self.config.cell_walkable_ratio)?;
        if grid.walkable_count() == 0 {
            return Err(NavigationError::DegenerateMap {
                walkable_percentage: 0.0,
                minimum: self.config.min_walkable_percentage,
            });
        }
        debug!(cols = grid.cols(), rows = grid.rows(), "navigation grid downsampled");

        let obstacles = extract_obstacles(&mask, &self.config);
        let entrances = detect_entrances(&mask, self.config.entrance_stride);

        info!(
            width = image.width(),
            height = image.height(),
            walkable_percentage,
            obstacles = obstacles.len(),
            entrances = entrances.len(),
            "grid build complete"
        );

        Ok(BuildOutput {
            grid,
            obstacles,
            entrances,
            walkable_percentage,
            mask,
        })
    }
}
