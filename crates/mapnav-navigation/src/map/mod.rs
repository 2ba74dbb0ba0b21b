mod grid;
mod point_types;

pub use grid::{Cell, NavigationGrid};
pub use point_types::GridPoint;
