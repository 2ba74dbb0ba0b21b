#![warn(missing_docs)]

use mapnav_geometry::{NormalizedPoint, scaled_polyline_length};

use super::GridPoint;
use crate::error::NavigationError;

/// Occupancy of one navigation cell.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Cell {
    /// Not passable.
    Obstacle = 0,
    /// Passable by a routed agent.
    Walkable = 1,
}

impl Cell {
    /// Converts the cell to its persisted `0`/`1` representation.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Any non-zero value is walkable.
    pub fn from_u8(value: u8) -> Self {
        if value == 0 { Cell::Obstacle } else { Cell::Walkable }
    }
}

/// A coarse occupancy grid derived from a raster map.
///
/// Row `y` covers source pixel rows `y * cell_size .. (y + 1) * cell_size`, and the
/// same holds for columns. The grid is immutable once built; re-processing a map
/// produces a new grid.
#[derive(Clone, Debug, PartialEq)]
pub struct NavigationGrid {
    /// Number of columns
    cols: usize,
    /// Number of rows
    rows: usize,
    /// Source pixels per cell edge
    cell_size: u32,
    /// Width of the source raster in pixels
    image_width: u32,
    /// Height of the source raster in pixels
    image_height: u32,
    /// Real-world meters per source pixel
    scale: f64,
    /// Row-major cell storage
    data: Vec<Cell>,
}

impl NavigationGrid {
    /// Creates an all-walkable grid.
    ///
    /// The source raster is assumed to be exactly `cols * cell_size` by
    /// `rows * cell_size` pixels at one meter per pixel; use
    /// [`with_image_size`](Self::with_image_size) and [`with_scale`](Self::with_scale)
    /// to describe the real raster.
    ///
    /// # Arguments
    /// * `cols` - Width of the grid in cells
    /// * `rows` - Height of the grid in cells
    /// * `cell_size` - Source pixels per cell edge
    ///
    /// # Returns
    /// * `Result<Self, NavigationError>` - The grid, or an error if any dimension is zero
    pub fn new(cols: usize, rows: usize, cell_size: u32) -> Result<Self, NavigationError> {
        if cols == 0 || rows == 0 {
            return Err(NavigationError::InvalidDimensions(
                "Rows and columns must be non-zero",
            ));
        }
        if cell_size == 0 {
            return Err(NavigationError::InvalidDimensions("Cell size must be non-zero"));
        }
        let len = cols
            .checked_mul(rows)
            .ok_or(NavigationError::InvalidDimensions(
                "Grid dimensions too large, would cause overflow",
            ))?;

        Ok(NavigationGrid {
            cols,
            rows,
            cell_size,
            image_width: (cols as u32).saturating_mul(cell_size),
            image_height: (rows as u32).saturating_mul(cell_size),
            scale: 1.0,
            data: vec![Cell::Walkable; len],
        })
    }

    /// Builds a grid from persisted rows of `0`/`1` values.
    ///
    /// # Errors
    /// `InvalidDimensions` if there are no rows, the rows are empty or ragged.
    pub fn from_rows(rows: &[Vec<u8>], cell_size: u32) -> Result<Self, NavigationError> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut grid = NavigationGrid::new(cols, rows.len(), cell_size)?;
        for (y, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(NavigationError::InvalidDimensions("Rows must have equal length"));
            }
            for (x, value) in row.iter().enumerate() {
                grid.data[y * cols + x] = Cell::from_u8(*value);
            }
        }
        Ok(grid)
    }

    /// Records the size of the raster this grid was derived from.
    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.image_width = width.max(1);
        self.image_height = height.max(1);
        self
    }

    /// Sets the real-world scale in meters per source pixel.
    /// Non-finite or non-positive values are ignored.
    pub fn with_scale(mut self, meters_per_pixel: f64) -> Self {
        if meters_per_pixel.is_finite() && meters_per_pixel > 0.0 {
            self.scale = meters_per_pixel;
        }
        self
    }

    /// Width in cells.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Height in cells.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Source pixels per cell edge.
    pub fn cell_size(&self) -> u32 {
        self.cell_size
    }

    /// Source raster width in pixels.
    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    /// Source raster height in pixels.
    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    /// Meters per source pixel.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    fn get_index(&self, p: GridPoint) -> usize {
        p.y * self.cols + p.x
    }

    /// Returns `true` if `p` is inside the grid.
    pub fn contains(&self, p: GridPoint) -> bool {
        p.x < self.cols && p.y < self.rows
    }

    /// Gets the occupancy of a cell.
    ///
    /// # Errors
    /// `OutOfBounds` if the point lies outside the grid.
    pub fn get_cell(&self, p: GridPoint) -> Result<Cell, NavigationError> {
        if !self.contains(p) {
            return Err(NavigationError::OutOfBounds("Cell outside the grid"));
        }
        Ok(self.data[self.get_index(p)])
    }

    /// Sets the occupancy of a cell.
    ///
    /// # Errors
    /// `OutOfBounds` if the point lies outside the grid.
    pub fn set_cell(&mut self, p: GridPoint, cell: Cell) -> Result<(), NavigationError> {
        if !self.contains(p) {
            return Err(NavigationError::OutOfBounds("Cell outside the grid"));
        }
        let index = self.get_index(p);
        self.data[index] = cell;
        Ok(())
    }

    /// The walkable predicate used by search, corner rules and line of sight alike:
    /// inside the grid and marked [`Cell::Walkable`].
    pub fn is_walkable(&self, p: GridPoint) -> bool {
        self.contains(p) && self.data[self.get_index(p)] == Cell::Walkable
    }

    /// Maps a normalized point to the cell containing it, `floor(v * dimension)`.
    /// A coordinate of exactly `1.0` maps to the last row or column.
    ///
    /// # Errors
    /// `InvalidCoordinate` if the point is not finite or outside the unit square.
    pub fn normalized_to_grid(&self, p: NormalizedPoint) -> Result<GridPoint, NavigationError> {
        p.validate()?;
        let x = ((p.x * self.cols as f64).floor() as usize).min(self.cols - 1);
        let y = ((p.y * self.rows as f64).floor() as usize).min(self.rows - 1);
        Ok(GridPoint::new(x, y))
    }

    /// Normalized coordinates of a cell's centre.
    pub fn grid_to_normalized(&self, p: GridPoint) -> NormalizedPoint {
        NormalizedPoint::new(
            (p.x as f64 + 0.5) / self.cols as f64,
            (p.y as f64 + 0.5) / self.rows as f64,
        )
    }

    /// Number of walkable cells.
    pub fn walkable_count(&self) -> usize {
        self.data.iter().filter(|c| **c == Cell::Walkable).count()
    }

    /// Percentage of cells that are walkable, in `[0, 100]`.
    pub fn walkable_percentage(&self) -> f64 {
        self.walkable_count() as f64 * 100.0 / self.data.len() as f64
    }

    /// Finds the walkable cell closest to `from` by Euclidean cell distance,
    /// scanning square rings of growing radius up to `max_radius`.
    ///
    /// Returns `from` itself if it is walkable. Ties resolve to the first cell in
    /// row-major order within the ring.
    pub fn nearest_walkable(&self, from: GridPoint, max_radius: usize) -> Option<GridPoint> {
        if self.is_walkable(from) {
            return Some(from);
        }

        let mut best: Option<(f64, GridPoint)> = None;
        for radius in 1..=max_radius {
            // A ring at Chebyshev radius r holds no cell closer than r.
            if let Some((d, _)) = best {
                if (radius as f64) > d {
                    break;
                }
            }
            let r = radius as isize;
            for dy in -r..=r {
                for dx in -r..=r {
                    if dx.abs() != r && dy.abs() != r {
                        continue;
                    }
                    let Some(candidate) = from.offset(dx, dy) else {
                        continue;
                    };
                    if !self.is_walkable(candidate) {
                        continue;
                    }
                    let d = from.euclidean(candidate);
                    if best.is_none_or(|(bd, _)| d < bd) {
                        best = Some((d, candidate));
                    }
                }
            }
        }
        best.map(|(_, p)| p)
    }

    /// Length of a normalized polyline measured in cells.
    pub fn path_length_cells(&self, path: &[NormalizedPoint]) -> f64 {
        scaled_polyline_length(path, self.cols as f64, self.rows as f64)
    }

    /// Length of a normalized polyline measured in source pixels.
    pub fn path_length_pixels(&self, path: &[NormalizedPoint]) -> f64 {
        scaled_polyline_length(path, f64::from(self.image_width), f64::from(self.image_height))
    }

    /// Length of a normalized polyline in meters.
    pub fn path_length_meters(&self, path: &[NormalizedPoint]) -> f64 {
        self.path_length_pixels(path) * self.scale
    }

    /// Rows of `0`/`1` values, the persisted form of the grid.
    pub fn to_rows(&self) -> Vec<Vec<u8>> {
        self.data
            .chunks(self.cols)
            .map(|row| row.iter().map(|c| c.as_u8()).collect())
            .collect()
    }
}

impl std::fmt::Display for NavigationGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "NavigationGrid ({}x{}, cell size: {}px, scale: {:.3}m/px)",
            self.cols, self.rows, self.cell_size, self.scale
        )?;
        for row in self.data.chunks(self.cols) {
            for cell in row {
                let glyph = match cell {
                    Cell::Walkable => '.',
                    Cell::Obstacle => '#',
                };
                write!(f, "{}", glyph)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_with_wall_cell(cols: usize, rows: usize, wall: GridPoint) -> NavigationGrid {
        let mut grid = NavigationGrid::new(cols, rows, 5).unwrap();
        grid.set_cell(wall, Cell::Obstacle).unwrap();
        grid
    }

    #[test]
    fn test_grid_creation() {
        let grid = NavigationGrid::new(10, 4, 5).unwrap();
        assert_eq!(grid.cols(), 10);
        assert_eq!(grid.rows(), 4);
        assert_eq!(grid.image_width(), 50);
        assert_eq!(grid.image_height(), 20);
        assert_eq!(grid.walkable_percentage(), 100.0);
    }

    #[test]
    fn test_invalid_creation() {
        assert!(matches!(
            NavigationGrid::new(0, 10, 5),
            Err(NavigationError::InvalidDimensions(_))
        ));
        assert!(matches!(
            NavigationGrid::new(10, 10, 0),
            Err(NavigationError::InvalidDimensions(_))
        ));
        assert!(matches!(
            NavigationGrid::from_rows(&[vec![1, 1], vec![1]], 5),
            Err(NavigationError::InvalidDimensions(_))
        ));
        assert!(matches!(
            NavigationGrid::from_rows(&[], 5),
            Err(NavigationError::InvalidDimensions(_))
        ));
    }

    #[test]
    fn test_cell_operations() {
        let mut grid = NavigationGrid::new(5, 5, 5).unwrap();
        let p = GridPoint::new(2, 3);
        grid.set_cell(p, Cell::Obstacle).unwrap();
        assert_eq!(grid.get_cell(p).unwrap(), Cell::Obstacle);
        assert!(!grid.is_walkable(p));
        assert!(grid.is_walkable(GridPoint::new(3, 2)));

        assert!(matches!(
            grid.set_cell(GridPoint::new(5, 0), Cell::Obstacle),
            Err(NavigationError::OutOfBounds(_))
        ));
        assert!(!grid.is_walkable(GridPoint::new(0, 5)));
    }

    #[test]
    fn test_rows_round_trip() {
        let rows = vec![vec![1, 0, 1], vec![0, 1, 1]];
        let grid = NavigationGrid::from_rows(&rows, 4).unwrap();
        assert_eq!(grid.cols(), 3);
        assert_eq!(grid.rows(), 2);
        assert!(!grid.is_walkable(GridPoint::new(1, 0)));
        assert!(!grid.is_walkable(GridPoint::new(0, 1)));
        assert_eq!(grid.to_rows(), rows);
    }

    #[test]
    fn test_coordinate_conversion() {
        let grid = NavigationGrid::new(10, 20, 5).unwrap();
        assert_eq!(
            grid.normalized_to_grid(NormalizedPoint::new(0.05, 0.05)).unwrap(),
            GridPoint::new(0, 1)
        );
        assert_eq!(
            grid.normalized_to_grid(NormalizedPoint::new(1.0, 1.0)).unwrap(),
            GridPoint::new(9, 19)
        );
        assert!(matches!(
            grid.normalized_to_grid(NormalizedPoint::new(1.2, 0.5)),
            Err(NavigationError::InvalidCoordinate(_))
        ));

        let centre = grid.grid_to_normalized(GridPoint::new(0, 0));
        assert!((centre.x - 0.05).abs() < 1e-12);
        assert!((centre.y - 0.025).abs() < 1e-12);
        assert_eq!(grid.normalized_to_grid(centre).unwrap(), GridPoint::new(0, 0));
    }

    #[test]
    fn test_nearest_walkable_on_free_cell() {
        let grid = NavigationGrid::new(5, 5, 5).unwrap();
        let p = GridPoint::new(2, 2);
        assert_eq!(grid.nearest_walkable(p, 3), Some(p));
    }

    #[test]
    fn test_nearest_walkable_prefers_orthogonal_neighbour() {
        let grid = grid_with_wall_cell(5, 5, GridPoint::new(2, 2));
        let found = grid.nearest_walkable(GridPoint::new(2, 2), 3).unwrap();
        assert_eq!(GridPoint::new(2, 2).euclidean(found), 1.0);
    }

    #[test]
    fn test_nearest_walkable_none_when_fully_blocked() {
        let rows = vec![vec![0; 4]; 4];
        let grid = NavigationGrid::from_rows(&rows, 5).unwrap();
        assert_eq!(grid.nearest_walkable(GridPoint::new(1, 1), 10), None);
        assert_eq!(grid.walkable_percentage(), 0.0);
    }

    #[test]
    fn test_nearest_walkable_checks_outer_ring_for_closer_cell() {
        // Only (3, 0) and (6, 6) are walkable. From (0, 0), (3, 0) is on ring 3 at
        // distance 3 and must win over anything further out.
        let mut rows = vec![vec![0u8; 8]; 8];
        rows[0][3] = 1;
        rows[6][6] = 1;
        let grid = NavigationGrid::from_rows(&rows, 5).unwrap();
        assert_eq!(
            grid.nearest_walkable(GridPoint::new(0, 0), 10),
            Some(GridPoint::new(3, 0))
        );
    }

    #[test]
    fn test_path_lengths() {
        let grid = NavigationGrid::new(10, 10, 5)
            .unwrap()
            .with_image_size(50, 50)
            .with_scale(0.5);
        let path = [NormalizedPoint::new(0.05, 0.05), NormalizedPoint::new(0.95, 0.95)];
        let span = 0.9 * std::f64::consts::SQRT_2;
        assert!((grid.path_length_cells(&path) - span * 10.0).abs() < 1e-9);
        assert!((grid.path_length_pixels(&path) - span * 50.0).abs() < 1e-9);
        assert!((grid.path_length_meters(&path) - span * 25.0).abs() < 1e-9);
        // Invalid scales are ignored.
        assert_eq!(grid.with_scale(-1.0).scale(), 0.5);
    }

    #[test]
    fn test_display() {
        let grid = grid_with_wall_cell(3, 2, GridPoint::new(1, 0));
        let text = grid.to_string();
        assert!(text.starts_with("NavigationGrid (3x2"));
        assert!(text.contains(".#.\n...\n"));
    }
}
