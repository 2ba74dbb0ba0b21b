/*

Grid A*: f(n) = g(n) + h(n)

    g(n) = cost from the start cell to n (1 per orthogonal step, sqrt(2) per diagonal step)
    h(n) = Euclidean distance to the goal when diagonal moves are allowed,
           Manhattan distance otherwise

Nodes live in an arena indexed by `y * cols + x` for the duration of one search.
The frontier is a binary heap ordered by f, ties broken by discovery order, so
identical inputs always produce identical paths. A node is closed at most once.

*/

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::f64::consts::SQRT_2;
use std::fmt;

use mapnav_geometry::NormalizedPoint;
use tracing::debug;

use crate::error::NavigationError;
use crate::map::{GridPoint, NavigationGrid};

/// Up, down, left, right.
const ORTHOGONAL: [(isize, isize); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];
const DIAGONAL: [(isize, isize); 4] = [(-1, -1), (1, -1), (-1, 1), (1, 1)];

/// Knobs for a single search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    /// Allow the four diagonal moves.
    pub diagonal: bool,
    /// Give up after closing this many nodes.
    pub max_expansions: usize,
    /// Run line-of-sight smoothing over the raw cell path.
    pub line_of_sight: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            diagonal: true,
            max_expansions: 1_000_000,
            line_of_sight: false,
        }
    }
}

/// Represents the result of a pathfinding operation.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult<T> {
    /// The computed path, if one was found.
    pub path: Option<Vec<T>>,
    /// The total cost of the path in cell units.
    pub total_cost: Option<f64>,
    /// The number of nodes closed during the search.
    pub nodes_explored: usize,
    /// The length of the path (number of waypoints).
    pub path_length: usize,
    /// The search stopped at the expansion limit rather than exhausting the frontier.
    pub limit_reached: bool,
}

impl<T> PathResult<T> {
    /// Creates a new PathResult for a successful path.
    pub fn success(path: Vec<T>, total_cost: f64, nodes_explored: usize) -> Self {
        let path_length = path.len();
        Self {
            path: Some(path),
            total_cost: Some(total_cost),
            nodes_explored,
            path_length,
            limit_reached: false,
        }
    }

    /// Creates a new PathResult for a failed path search.
    pub fn failure(nodes_explored: usize) -> Self {
        Self {
            path: None,
            total_cost: None,
            nodes_explored,
            path_length: 0,
            limit_reached: false,
        }
    }

    /// A failed search that hit the expansion limit.
    pub fn limited(nodes_explored: usize) -> Self {
        Self {
            limit_reached: true,
            ..Self::failure(nodes_explored)
        }
    }

    /// Returns true if a path was found.
    pub fn is_success(&self) -> bool {
        self.path.is_some()
    }

    /// Returns the path if one was found.
    pub fn into_path(self) -> Option<Vec<T>> {
        self.path
    }

    /// Replaces the waypoints, keeping cost and search statistics.
    pub fn map_path<U>(self, f: impl FnOnce(Vec<T>) -> Vec<U>) -> PathResult<U> {
        let path = self.path.map(f);
        PathResult {
            path_length: path.as_ref().map_or(0, Vec::len),
            path,
            total_cost: self.total_cost,
            nodes_explored: self.nodes_explored,
            limit_reached: self.limit_reached,
        }
    }
}

impl<T> fmt::Display for PathResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(_) => write!(
                f,
                "PathResult {{ success: true, path_length: {}, total_cost: {:.3}, nodes_explored: {} }}",
                self.path_length,
                self.total_cost.unwrap_or(0.0),
                self.nodes_explored
            ),
            None => write!(
                f,
                "PathResult {{ success: false, nodes_explored: {}, limit_reached: {} }}",
                self.nodes_explored, self.limit_reached
            ),
        }
    }
}

/// Calculates the Manhattan distance between two grid points.
pub fn manhattan_distance(a: GridPoint, b: GridPoint) -> f64 {
    a.manhattan(b) as f64
}

/// Calculates the Euclidean distance between two grid points.
pub fn euclidean_distance(a: GridPoint, b: GridPoint) -> f64 {
    a.euclidean(b)
}

/// A diagonal step is legal only if both orthogonal cells it passes between are walkable.
fn diagonal_clear(grid: &NavigationGrid, from: GridPoint, dx: isize, dy: isize) -> bool {
    let flank_x = from.offset(dx, 0).is_some_and(|p| grid.is_walkable(p));
    let flank_y = from.offset(0, dy).is_some_and(|p| grid.is_walkable(p));
    flank_x && flank_y
}

#[derive(Clone, Copy)]
struct Node {
    g: f64,
    parent: Option<usize>,
    closed: bool,
}

#[derive(Clone, Copy)]
struct State {
    f: f64,
    seq: u64,
    index: usize,
}

// Reversed so that `BinaryHeap` pops the lowest f first, then the earliest discovery.
impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for State {}

fn reconstruct_path(nodes: &[Node], cols: usize, mut current: usize) -> Vec<GridPoint> {
    let mut path = vec![GridPoint::new(current % cols, current / cols)];
    while let Some(previous) = nodes[current].parent {
        path.push(GridPoint::new(previous % cols, previous / cols));
        current = previous;
    }
    path.reverse();
    path
}

/// Performs A* search on a navigation grid.
///
/// # Arguments
/// * `grid` - The navigation grid to search.
/// * `start` - The starting cell.
/// * `goal` - The goal cell.
/// * `options` - Movement model and expansion limit. `line_of_sight` is ignored here.
///
/// # Returns
/// * `PathResult<GridPoint>` - The cell path from `start` to `goal` inclusive, or a
///   failure if either end is not walkable, no connection exists, or the
///   expansion limit was hit.
pub fn astar_search_grid(
    grid: &NavigationGrid,
    start: GridPoint,
    goal: GridPoint,
    options: &SearchOptions,
) -> PathResult<GridPoint> {
    if !grid.is_walkable(start) || !grid.is_walkable(goal) {
        return PathResult::failure(0);
    }
    if start == goal {
        return PathResult::success(vec![start], 0.0, 0);
    }

    let cols = grid.cols();
    let heuristic = |p: GridPoint| {
        if options.diagonal {
            euclidean_distance(p, goal)
        } else {
            manhattan_distance(p, goal)
        }
    };

    let mut nodes = vec![
        Node {
            g: f64::INFINITY,
            parent: None,
            closed: false,
        };
        cols * grid.rows()
    ];
    let start_index = start.y * cols + start.x;
    let goal_index = goal.y * cols + goal.x;
    nodes[start_index].g = 0.0;

    let mut open_set = BinaryHeap::new();
    let mut seq = 0u64;
    open_set.push(State {
        f: heuristic(start),
        seq,
        index: start_index,
    });

    let mut nodes_explored = 0;
    while let Some(State { index: current, .. }) = open_set.pop() {
        if nodes[current].closed {
            continue;
        }
        nodes[current].closed = true;
        nodes_explored += 1;

        if current == goal_index {
            let path = reconstruct_path(&nodes, cols, current);
            return PathResult::success(path, nodes[current].g, nodes_explored);
        }
        if nodes_explored >= options.max_expansions {
            debug!(nodes_explored, "A* expansion limit reached");
            return PathResult::limited(nodes_explored);
        }

        let position = GridPoint::new(current % cols, current / cols);
        let moves = ORTHOGONAL
            .iter()
            .map(|d| (*d, 1.0))
            .chain(
                DIAGONAL
                    .iter()
                    .filter(|_| options.diagonal)
                    .map(|d| (*d, SQRT_2)),
            );

        for ((dx, dy), step_cost) in moves {
            let Some(neighbor) = position.offset(dx, dy) else {
                continue;
            };
            if !grid.is_walkable(neighbor) {
                continue;
            }
            if dx != 0 && dy != 0 && !diagonal_clear(grid, position, dx, dy) {
                continue;
            }
            let index = neighbor.y * cols + neighbor.x;
            if nodes[index].closed {
                continue;
            }

            let tentative_g = nodes[current].g + step_cost;
            if tentative_g < nodes[index].g {
                nodes[index].g = tentative_g;
                nodes[index].parent = Some(current);
                seq += 1;
                open_set.push(State {
                    f: tentative_g + heuristic(neighbor),
                    seq,
                    index,
                });
            }
        }
    }

    PathResult::failure(nodes_explored)
}

/// Returns `true` if the straight raster line from `a` to `b` crosses only walkable
/// cells, and every diagonal raster step has both flanking cells walkable.
pub fn has_line_of_sight(grid: &NavigationGrid, a: GridPoint, b: GridPoint) -> bool {
    let (mut x, mut y) = (a.x as isize, a.y as isize);
    let (x1, y1) = (b.x as isize, b.y as isize);
    let dx = (x1 - x).abs();
    let dy = -(y1 - y).abs();
    let sx = if x < x1 { 1 } else { -1 };
    let sy = if y < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let walkable = |x: isize, y: isize| {
        x >= 0 && y >= 0 && grid.is_walkable(GridPoint::new(x as usize, y as usize))
    };

    if !walkable(x, y) {
        return false;
    }
    while x != x1 || y != y1 {
        let e2 = 2 * err;
        let step_x = e2 >= dy;
        let step_y = e2 <= dx;
        if step_x && step_y && !(walkable(x + sx, y) && walkable(x, y + sy)) {
            return false;
        }
        if step_x {
            err += dy;
            x += sx;
        }
        if step_y {
            err += dx;
            y += sy;
        }
        if !walkable(x, y) {
            return false;
        }
    }
    true
}

/// Removes staircase artifacts by connecting each anchor to the farthest later
/// waypoint it can see.
pub fn smooth_line_of_sight(grid: &NavigationGrid, path: &[GridPoint]) -> Vec<GridPoint> {
    if path.len() <= 2 {
        return path.to_vec();
    }
    let mut smoothed = vec![path[0]];
    let mut anchor = 0;
    while anchor < path.len() - 1 {
        let mut next = anchor + 1;
        for candidate in (anchor + 2..path.len()).rev() {
            if has_line_of_sight(grid, path[anchor], path[candidate]) {
                next = candidate;
                break;
            }
        }
        smoothed.push(path[next]);
        anchor = next;
    }
    smoothed
}

/// Finds a path between two normalized points.
///
/// The cell path is converted to cell centres, then the first and last points are
/// replaced by the exact query points.
///
/// # Errors
/// `InvalidCoordinate` if either point is outside the unit square. An unreachable
/// goal is reported as a failed [`PathResult`], not an error.
pub fn find_path(
    grid: &NavigationGrid,
    start: NormalizedPoint,
    end: NormalizedPoint,
    options: &SearchOptions,
) -> Result<PathResult<NormalizedPoint>, NavigationError> {
    let start_cell = grid.normalized_to_grid(start)?;
    let end_cell = grid.normalized_to_grid(end)?;

    let result = astar_search_grid(grid, start_cell, end_cell, options);
    debug!(
        start = %start_cell,
        goal = %end_cell,
        nodes_explored = result.nodes_explored,
        success = result.is_success(),
        "grid search finished"
    );

    Ok(result.map_path(|cells| {
        let cells = if options.line_of_sight {
            smooth_line_of_sight(grid, &cells)
        } else {
            cells
        };
        let mut points: Vec<NormalizedPoint> =
            cells.iter().map(|c| grid.grid_to_normalized(*c)).collect();
        if let Some(first) = points.first_mut() {
            *first = start;
        }
        if points.len() == 1 {
            points.push(end);
        } else if let Some(last) = points.last_mut() {
            *last = end;
        }
        points
    }))
}
