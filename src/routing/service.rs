use std::sync::Arc;
use std::time::Instant;

use mapnav_geometry::NormalizedPoint;
use mapnav_navigation::optimizer::OptimizationStats;
use mapnav_navigation::{
    GridPoint, NavigationGrid, PathOptimizer, SearchOptions, SmoothingLevel, find_path,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::metrics::{Difficulty, DifficultyThresholds, accessibility_score, walking_time_secs};
use super::options::{MultiRouteOptions, RouteOptions};
use super::ordering::greedy_order;
use crate::cache::{CacheKey, RouteCache};
use crate::config::RoutingSettings;
use crate::error::RoutingError;
use crate::history::{HistorySink, RouteRecord};
use crate::registry::{MapId, MapRegistry};
use crate::worker::WorkerPool;

/// A computed single route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResult {
    pub path_id: Uuid,
    pub map_id: MapId,
    /// Route start, after any correction onto walkable ground.
    pub start: NormalizedPoint,
    pub end: NormalizedPoint,
    /// Smoothed route, first and last points equal to `start` and `end`.
    pub polyline: Vec<NormalizedPoint>,
    pub key_waypoints: Vec<NormalizedPoint>,
    pub vector_path: String,
    /// Length in grid cells.
    pub distance_cells: f64,
    pub distance_pixels: f64,
    pub distance_meters: f64,
    pub estimated_time_secs: f64,
    pub difficulty: Difficulty,
    pub accessibility_score: f64,
    pub turn_count: usize,
    pub cached: bool,
    pub processing_time_ms: f64,
    pub nodes_explored: usize,
    pub stats: OptimizationStats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub index: usize,
    pub start: NormalizedPoint,
    pub end: NormalizedPoint,
    pub polyline: Vec<NormalizedPoint>,
    pub distance_meters: f64,
    pub estimated_time_secs: f64,
}

/// A route through several stops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiRouteResult {
    pub path_id: Uuid,
    pub map_id: MapId,
    /// Stops in visiting order, including the closing stop of a round trip.
    pub points: Vec<NormalizedPoint>,
    pub segments: Vec<SegmentSummary>,
    /// Segment polylines joined, shared junction points kept once.
    pub polyline: Vec<NormalizedPoint>,
    pub total_distance_meters: f64,
    pub total_time_secs: f64,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternativeKind {
    Optimal,
    NoDiagonal,
    Smooth,
}

impl AlternativeKind {
    pub fn description(self) -> &'static str {
        match self {
            AlternativeKind::Optimal => "Shortest route",
            AlternativeKind::NoDiagonal => "Right-angle moves only",
            AlternativeKind::Smooth => "Smoother curve",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlternativeRoute {
    pub kind: AlternativeKind,
    pub description: &'static str,
    pub route: RouteResult,
}

/// Distinct routes between two points, shortest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlternativeRoutes {
    pub map_id: MapId,
    pub main_route: AlternativeRoute,
    pub alternatives: Vec<AlternativeRoute>,
    pub processing_time_ms: f64,
}

/// Outcome of checking a user-supplied point against the grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PointValidation {
    pub original: NormalizedPoint,
    /// The nearest walkable cell centre, or `original` if no correction was made.
    pub adjusted: NormalizedPoint,
    /// `original` or `adjusted` lies on walkable ground.
    pub valid: bool,
    pub was_adjusted: bool,
    /// Distance moved in source pixels.
    pub adjustment_distance_px: f64,
}

/// Single, multi-stop and alternative route queries over processed maps.
#[derive(Clone)]
pub struct Router {
    registry: Arc<MapRegistry>,
    cache: Arc<RouteCache<RouteResult>>,
    cache_enabled: bool,
    history: Arc<dyn HistorySink>,
    pool: WorkerPool,
    optimizer: PathOptimizer,
    thresholds: DifficultyThresholds,
    settings: RoutingSettings,
}

struct Computed {
    start: NormalizedPoint,
    end: NormalizedPoint,
    polyline: Vec<NormalizedPoint>,
    key_waypoints: Vec<NormalizedPoint>,
    vector_path: String,
    distance_cells: f64,
    distance_pixels: f64,
    distance_meters: f64,
    turn_count: usize,
    nodes_explored: usize,
    stats: OptimizationStats,
}

impl Router {
    pub fn new(
        registry: Arc<MapRegistry>,
        cache: Arc<RouteCache<RouteResult>>,
        cache_enabled: bool,
        history: Arc<dyn HistorySink>,
        pool: WorkerPool,
        settings: RoutingSettings,
    ) -> Self {
        Router {
            registry,
            cache,
            cache_enabled,
            history,
            pool,
            optimizer: PathOptimizer::default(),
            thresholds: DifficultyThresholds::from(&settings),
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<RouteCache<RouteResult>> {
        &self.cache
    }

    /// Finds, optimizes and scores one route.
    ///
    /// # Errors
    /// `InvalidCoordinate` for points outside `[0, 1]` or, without
    /// `auto_correct`, on obstacles; `MapNotFound`/`GridUnavailable` for maps
    /// that cannot serve; `NotFound` when the points are not connected or the
    /// search limit is hit.
    pub async fn find_route(
        &self,
        map_id: &MapId,
        start: NormalizedPoint,
        end: NormalizedPoint,
        options: &RouteOptions,
    ) -> Result<RouteResult, RoutingError> {
        let started = Instant::now();
        check_point(start)?;
        check_point(end)?;

        // Keyed by the data version, so a result computed on a grid that has
        // since been replaced can never be served.
        let (version, data) = self.registry.snapshot(map_id)?;
        let key = CacheKey::new(map_id, version, start, end, options.fingerprint());
        if self.cache_enabled && options.use_cache {
            if let Some(mut hit) = self.cache.get(&key) {
                hit.cached = true;
                hit.processing_time_ms = elapsed_ms(started);
                debug!(map_id = %map_id, "route served from cache");
                self.record(&hit);
                return Ok(hit);
            }
        }

        let search = SearchOptions {
            diagonal: options.allow_diagonal,
            max_expansions: self.settings.max_expansions,
            line_of_sight: self.settings.line_of_sight,
        };
        let optimizer = self.optimizer;
        let radius = self.settings.max_correction_radius;
        let auto_correct = options.auto_correct;
        let level = options.smoothing_level;

        let computed = self
            .pool
            .run(move || {
                compute_route(&data.grid, start, end, &search, &optimizer, level, auto_correct, radius)
            })
            .await??;

        let result = RouteResult {
            path_id: Uuid::new_v4(),
            map_id: map_id.clone(),
            start: computed.start,
            end: computed.end,
            estimated_time_secs: walking_time_secs(computed.distance_meters, self.settings.walking_speed_mps),
            difficulty: self.thresholds.classify(computed.distance_meters, computed.turn_count),
            accessibility_score: accessibility_score(
                computed.key_waypoints.len(),
                computed.stats.reduction_ratio,
            ),
            polyline: computed.polyline,
            key_waypoints: computed.key_waypoints,
            vector_path: computed.vector_path,
            distance_cells: computed.distance_cells,
            distance_pixels: computed.distance_pixels,
            distance_meters: computed.distance_meters,
            turn_count: computed.turn_count,
            cached: false,
            processing_time_ms: elapsed_ms(started),
            nodes_explored: computed.nodes_explored,
            stats: computed.stats,
        };

        info!(
            map_id = %map_id,
            meters = result.distance_meters,
            points = result.polyline.len(),
            elapsed_ms = result.processing_time_ms,
            "route computed"
        );
        self.record(&result);
        if self.cache_enabled {
            self.cache.insert(key, result.clone());
        }
        Ok(result)
    }

    /// Routes through every stop in order, each leg an independent single-route
    /// query.
    ///
    /// # Errors
    /// `InvalidRequest` for fewer than two stops, `InvalidCoordinate` for a stop
    /// outside `[0, 1]`, and `SegmentFailure` naming the first leg that failed.
    pub async fn find_multi_route(
        &self,
        map_id: &MapId,
        points: &[NormalizedPoint],
        options: &MultiRouteOptions,
    ) -> Result<MultiRouteResult, RoutingError> {
        let started = Instant::now();
        if points.len() < 2 {
            return Err(RoutingError::InvalidRequest(
                "a multi-stop route needs at least two points".into(),
            ));
        }
        for p in points {
            check_point(*p)?;
        }

        let mut stops = if options.optimize_order {
            greedy_order(points)
        } else {
            points.to_vec()
        };
        if options.return_to_start {
            stops.push(stops[0]);
        }

        let segment_options = options.segment_options();
        let mut segments = Vec::with_capacity(stops.len() - 1);
        let mut polyline: Vec<NormalizedPoint> = Vec::new();
        let mut total_distance_meters = 0.0;
        let mut total_time_secs = 0.0;

        for (index, pair) in stops.windows(2).enumerate() {
            let route = self
                .find_route(map_id, pair[0], pair[1], &segment_options)
                .await
                .map_err(|e| {
                    warn!(map_id = %map_id, index, error = %e, "multi-stop segment failed");
                    RoutingError::SegmentFailure {
                        index,
                        source: Box::new(e),
                    }
                })?;

            let skip = usize::from(polyline.last().is_some() && polyline.last() == route.polyline.first());
            polyline.extend(route.polyline.iter().skip(skip).copied());
            total_distance_meters += route.distance_meters;
            total_time_secs += route.estimated_time_secs;
            segments.push(SegmentSummary {
                index,
                start: pair[0],
                end: pair[1],
                polyline: route.polyline,
                distance_meters: route.distance_meters,
                estimated_time_secs: route.estimated_time_secs,
            });
        }

        Ok(MultiRouteResult {
            path_id: Uuid::new_v4(),
            map_id: map_id.clone(),
            points: stops,
            segments,
            polyline,
            total_distance_meters,
            total_time_secs,
            processing_time_ms: elapsed_ms(started),
        })
    }

    /// The optimal route plus variants whose polylines differ from it, shortest
    /// first. Variants bypass the cache lookup; a failing variant is skipped.
    pub async fn find_alternative_routes(
        &self,
        map_id: &MapId,
        start: NormalizedPoint,
        end: NormalizedPoint,
        options: &RouteOptions,
    ) -> Result<AlternativeRoutes, RoutingError> {
        let started = Instant::now();
        let optimal = self.find_route(map_id, start, end, options).await?;
        let max_routes = self.settings.max_alternatives.max(1);

        let variants = [
            (
                AlternativeKind::NoDiagonal,
                RouteOptions {
                    allow_diagonal: false,
                    smoothing_level: SmoothingLevel::Low,
                    use_cache: false,
                    ..*options
                },
            ),
            (
                AlternativeKind::Smooth,
                RouteOptions {
                    smoothing_level: SmoothingLevel::High,
                    use_cache: false,
                    ..*options
                },
            ),
        ];

        let mut routes = vec![AlternativeRoute {
            kind: AlternativeKind::Optimal,
            description: AlternativeKind::Optimal.description(),
            route: optimal,
        }];
        for (kind, variant) in variants {
            if routes.len() >= max_routes {
                break;
            }
            match self.find_route(map_id, start, end, &variant).await {
                Ok(route) if route.polyline != routes[0].route.polyline => {
                    routes.push(AlternativeRoute {
                        kind,
                        description: kind.description(),
                        route,
                    });
                }
                Ok(_) => debug!(?kind, "alternative matches the optimal route"),
                Err(e) => debug!(?kind, error = %e, "alternative route unavailable"),
            }
        }

        routes.sort_by(|a, b| a.route.distance_meters.total_cmp(&b.route.distance_meters));
        let mut routes = routes.into_iter();
        let Some(main_route) = routes.next() else {
            return Err(RoutingError::NotFound {
                start,
                end,
                limit_reached: false,
            });
        };

        Ok(AlternativeRoutes {
            map_id: map_id.clone(),
            main_route,
            alternatives: routes.collect(),
            processing_time_ms: elapsed_ms(started),
        })
    }

    /// Checks whether a point lies on walkable ground and, if not, proposes the
    /// nearest walkable cell centre.
    pub fn validate_point(
        &self,
        map_id: &MapId,
        point: NormalizedPoint,
    ) -> Result<PointValidation, RoutingError> {
        check_point(point)?;
        let data = self.registry.grid(map_id)?;
        let grid = &data.grid;
        let cell = grid.normalized_to_grid(point)?;

        if grid.is_walkable(cell) {
            return Ok(PointValidation {
                original: point,
                adjusted: point,
                valid: true,
                was_adjusted: false,
                adjustment_distance_px: 0.0,
            });
        }

        match grid.nearest_walkable(cell, self.settings.max_correction_radius) {
            Some(found) => {
                let adjusted = grid.grid_to_normalized(found);
                let moved = pixel_distance(grid, point, adjusted);
                debug!(map_id = %map_id, %point, %adjusted, moved, "point corrected");
                Ok(PointValidation {
                    original: point,
                    adjusted,
                    valid: true,
                    was_adjusted: true,
                    adjustment_distance_px: moved,
                })
            }
            None => Ok(PointValidation {
                original: point,
                adjusted: point,
                valid: false,
                was_adjusted: false,
                adjustment_distance_px: 0.0,
            }),
        }
    }

    fn record(&self, result: &RouteResult) {
        let record = RouteRecord {
            id: result.path_id,
            map_id: result.map_id.clone(),
            start: result.start,
            end: result.end,
            distance_meters: result.distance_meters,
            processing_time_ms: result.processing_time_ms,
            cached: result.cached,
            timestamp: chrono::Utc::now(),
        };
        if let Err(e) = self.history.record(&record) {
            warn!(map_id = %result.map_id, error = %e, "failed to record route history");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_route(
    grid: &NavigationGrid,
    start: NormalizedPoint,
    end: NormalizedPoint,
    search: &SearchOptions,
    optimizer: &PathOptimizer,
    level: SmoothingLevel,
    auto_correct: bool,
    radius: usize,
) -> Result<Computed, RoutingError> {
    let start = resolve_endpoint(grid, start, auto_correct, radius)?;
    let end = resolve_endpoint(grid, end, auto_correct, radius)?;

    let result = find_path(grid, start, end, search)?;
    let nodes_explored = result.nodes_explored;
    let limit_reached = result.limit_reached;
    let Some(path) = result.into_path() else {
        return Err(RoutingError::NotFound {
            start,
            end,
            limit_reached,
        });
    };

    let optimized = optimizer.optimize(&path, level);
    Ok(Computed {
        start,
        end,
        distance_cells: grid.path_length_cells(&optimized.smoothed),
        distance_pixels: grid.path_length_pixels(&optimized.smoothed),
        distance_meters: grid.path_length_meters(&optimized.smoothed),
        turn_count: optimized.turn_count(),
        polyline: optimized.smoothed,
        key_waypoints: optimized.key_waypoints,
        vector_path: optimized.vector_path,
        nodes_explored,
        stats: optimized.stats,
    })
}

/// Returns the point itself if its cell is walkable, the nearest walkable cell
/// centre if correction is allowed, and `InvalidCoordinate` otherwise.
fn resolve_endpoint(
    grid: &NavigationGrid,
    point: NormalizedPoint,
    auto_correct: bool,
    radius: usize,
) -> Result<NormalizedPoint, RoutingError> {
    let cell = grid.normalized_to_grid(point)?;
    if grid.is_walkable(cell) {
        return Ok(point);
    }
    let corrected = auto_correct
        .then(|| grid.nearest_walkable(cell, radius))
        .flatten()
        .map(|c: GridPoint| grid.grid_to_normalized(c));
    corrected.ok_or_else(|| {
        RoutingError::InvalidCoordinate(format!(
            "{point} lies on an obstacle; validate it to get a walkable position"
        ))
    })
}

fn check_point(p: NormalizedPoint) -> Result<(), RoutingError> {
    p.validate()
        .map_err(|e| RoutingError::InvalidCoordinate(format!("{p}: {e}")))
}

fn pixel_distance(grid: &NavigationGrid, a: NormalizedPoint, b: NormalizedPoint) -> f64 {
    a.scaled_distance(&b, f64::from(grid.image_width()), f64::from(grid.image_height()))
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use crate::registry::ProcessingTicket;
    use crate::registry::tests::map_data;
    use mapnav_navigation::Cell;
    use std::time::Duration;

    const EPS: f64 = 1e-9;

    struct Fixture {
        router: Router,
        registry: Arc<MapRegistry>,
        history: Arc<MemoryHistory>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(MapRegistry::default());
        let history = Arc::new(MemoryHistory::new());
        let router = Router::new(
            registry.clone(),
            Arc::new(RouteCache::new(64, Duration::from_secs(60))),
            true,
            history.clone(),
            WorkerPool::new(2),
            RoutingSettings::default(),
        );
        Fixture {
            router,
            registry,
            history,
        }
    }

    fn add_map(registry: &MapRegistry, name: &str, grid: NavigationGrid) -> MapId {
        let id = MapId::from(name);
        registry.restore(id.clone(), name, 1.0, map_data(grid));
        id
    }

    fn open_grid() -> NavigationGrid {
        NavigationGrid::new(10, 10, 5).unwrap()
    }

    /// Row 5 walled off except column 5.
    fn gap_grid() -> NavigationGrid {
        let mut grid = open_grid();
        for x in 0..10 {
            if x != 5 {
                grid.set_cell(GridPoint::new(x, 5), Cell::Obstacle).unwrap();
            }
        }
        grid
    }

    /// Column 5 walled off completely.
    fn islands_grid() -> NavigationGrid {
        let mut grid = open_grid();
        for y in 0..10 {
            grid.set_cell(GridPoint::new(5, y), Cell::Obstacle).unwrap();
        }
        grid
    }

    fn p(x: f64, y: f64) -> NormalizedPoint {
        NormalizedPoint::new(x, y)
    }

    #[tokio::test]
    async fn test_open_grid_diagonal_route() {
        let f = fixture();
        let id = add_map(&f.registry, "open", open_grid());
        let route = f
            .router
            .find_route(&id, p(0.05, 0.05), p(0.95, 0.95), &RouteOptions::default())
            .await
            .unwrap();

        assert_eq!(route.polyline, vec![p(0.05, 0.05), p(0.95, 0.95)]);
        assert_eq!(route.key_waypoints.len(), 2);
        assert_eq!(route.turn_count, 0);
        assert!((route.distance_cells - 0.9 * 10.0 * 2f64.sqrt()).abs() < 1e-6);
        let expected = 0.9 * 50.0 * 2f64.sqrt();
        assert!((route.distance_pixels - expected).abs() < 1e-6);
        assert!((route.distance_meters - expected).abs() < 1e-6);
        assert_eq!(route.difficulty, Difficulty::Easy);
        assert!(!route.cached);
        assert!((0.0..=1.0).contains(&route.accessibility_score));
        assert!(route.vector_path.starts_with('M'));
    }

    #[tokio::test]
    async fn test_scale_converts_to_meters() {
        let f = fixture();
        let id = MapId::from("scaled");
        f.registry
            .restore(id.clone(), "scaled", 0.5, map_data(open_grid().with_scale(0.5)));
        let route = f
            .router
            .find_route(&id, p(0.05, 0.55), p(0.95, 0.55), &RouteOptions::default())
            .await
            .unwrap();
        assert!((route.distance_pixels - 45.0).abs() < 1e-6);
        assert!((route.distance_meters - 22.5).abs() < 1e-6);
        let speed = RoutingSettings::default().walking_speed_mps;
        assert!((route.estimated_time_secs - 22.5 / speed).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_route_goes_through_the_gap() {
        let f = fixture();
        let id = add_map(&f.registry, "gap", gap_grid());
        let options = RouteOptions {
            smoothing_level: SmoothingLevel::None,
            ..RouteOptions::default()
        };
        let route = f
            .router
            .find_route(&id, p(0.15, 0.15), p(0.85, 0.85), &options)
            .await
            .unwrap();

        assert_eq!(route.polyline.first(), Some(&p(0.15, 0.15)));
        assert_eq!(route.polyline.last(), Some(&p(0.85, 0.85)));
        // Dense samples inside the wall row must stay in the gap column.
        for w in route.polyline.windows(2) {
            for i in 0..=100 {
                let s = w[0].lerp(&w[1], f64::from(i) / 100.0);
                if s.y > 0.5 && s.y < 0.6 {
                    assert!((s.x - 0.55).abs() < 0.01, "sample {s} clips the wall");
                }
            }
        }
    }

    #[tokio::test]
    async fn test_disconnected_islands_not_found() {
        let f = fixture();
        let id = add_map(&f.registry, "islands", islands_grid());
        let err = f
            .router
            .find_route(&id, p(0.15, 0.5), p(0.85, 0.5), &RouteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RoutingError::NotFound {
                limit_reached: false,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_repeat_query_is_cached_until_invalidated() {
        let f = fixture();
        let id = add_map(&f.registry, "open", open_grid());
        let options = RouteOptions::default();

        let first = f.router.find_route(&id, p(0.1, 0.2), p(0.8, 0.7), &options).await.unwrap();
        let second = f.router.find_route(&id, p(0.1, 0.2), p(0.8, 0.7), &options).await.unwrap();
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.polyline, second.polyline);
        assert_eq!(first.path_id, second.path_id);

        f.router.cache().invalidate_map(&id);
        let third = f.router.find_route(&id, p(0.1, 0.2), p(0.8, 0.7), &options).await.unwrap();
        assert!(!third.cached);
        assert_eq!(third.polyline, first.polyline);

        let records = f.history.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records.iter().filter(|r| r.cached).count(), 1);
    }

    /// Row 5 walled off except column 9.
    fn side_gap_grid() -> NavigationGrid {
        let mut grid = open_grid();
        for x in 0..9 {
            grid.set_cell(GridPoint::new(x, 5), Cell::Obstacle).unwrap();
        }
        grid
    }

    #[tokio::test]
    async fn test_result_on_replaced_grid_is_not_served_from_cache() {
        let registry = Arc::new(MapRegistry::default());
        let pool = WorkerPool::new(1);
        let router = Router::new(
            registry.clone(),
            Arc::new(RouteCache::new(64, Duration::from_secs(60))),
            true,
            Arc::new(MemoryHistory::new()),
            pool.clone(),
            RoutingSettings::default(),
        );
        let id = registry.register("floor", vec![0], 1.0).unwrap();
        let ProcessingTicket::Started { generation, .. } =
            registry.begin_processing(&id, false).unwrap()
        else {
            panic!("expected a started ticket");
        };
        registry.commit(&id, generation, map_data(open_grid()));

        // Hold the only worker slot so the query below waits with its snapshot
        // of the open grid.
        let (release, held) = std::sync::mpsc::channel::<()>();
        let blocker = tokio::spawn({
            let pool = pool.clone();
            async move { pool.run(move || held.recv().is_ok()).await }
        });
        while pool.available() > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let (a, b) = (p(0.15, 0.15), p(0.15, 0.85));
        let pending = tokio::spawn({
            let router = router.clone();
            let id = id.clone();
            async move { router.find_route(&id, a, b, &RouteOptions::default()).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Reprocess commits a wall across the straight line.
        let ProcessingTicket::Started { generation, .. } =
            registry.begin_processing(&id, true).unwrap()
        else {
            panic!("expected a started ticket");
        };
        registry.commit(&id, generation, map_data(side_gap_grid()));
        router.cache().invalidate_map(&id);

        release.send(()).unwrap();
        assert!(blocker.await.unwrap().unwrap());
        let stale = pending.await.unwrap().unwrap();
        assert_eq!(stale.polyline.len(), 2);

        let fresh = router.find_route(&id, a, b, &RouteOptions::default()).await.unwrap();
        assert!(!fresh.cached);
        assert!(fresh.polyline.len() > 2);
        assert!(fresh.distance_meters > stale.distance_meters);
    }

    struct BrokenHistory;

    impl HistorySink for BrokenHistory {
        fn record(&self, _record: &RouteRecord) -> Result<(), RoutingError> {
            Err(RoutingError::Storage(std::io::Error::other("disk full")))
        }
    }

    #[tokio::test]
    async fn test_history_failure_does_not_fail_the_query() {
        let registry = Arc::new(MapRegistry::default());
        let router = Router::new(
            registry.clone(),
            Arc::new(RouteCache::new(8, Duration::from_secs(60))),
            true,
            Arc::new(BrokenHistory),
            WorkerPool::new(1),
            RoutingSettings::default(),
        );
        let id = add_map(&registry, "open", open_grid());
        let options = RouteOptions::default();

        let first = router.find_route(&id, p(0.1, 0.2), p(0.8, 0.7), &options).await.unwrap();
        assert!(!first.cached);
        let second = router.find_route(&id, p(0.1, 0.2), p(0.8, 0.7), &options).await.unwrap();
        assert!(second.cached);
    }

    #[tokio::test]
    async fn test_use_cache_false_recomputes() {
        let f = fixture();
        let id = add_map(&f.registry, "open", open_grid());
        let options = RouteOptions {
            use_cache: false,
            ..RouteOptions::default()
        };
        f.router.find_route(&id, p(0.1, 0.2), p(0.8, 0.7), &options).await.unwrap();
        let again = f.router.find_route(&id, p(0.1, 0.2), p(0.8, 0.7), &options).await.unwrap();
        assert!(!again.cached);
    }

    #[tokio::test]
    async fn test_invalid_points_rejected_before_search() {
        let f = fixture();
        let id = add_map(&f.registry, "gap", gap_grid());
        let options = RouteOptions::default();

        let out_of_range = f.router.find_route(&id, p(1.2, 0.5), p(0.5, 0.5), &options).await;
        assert!(matches!(out_of_range, Err(RoutingError::InvalidCoordinate(_))));

        let on_wall = f.router.find_route(&id, p(0.15, 0.55), p(0.85, 0.85), &options).await;
        assert!(matches!(on_wall, Err(RoutingError::InvalidCoordinate(_))));
        assert!(f.history.records().is_empty());
    }

    #[tokio::test]
    async fn test_auto_correct_snaps_endpoint() {
        let f = fixture();
        let id = add_map(&f.registry, "gap", gap_grid());
        let options = RouteOptions {
            auto_correct: true,
            ..RouteOptions::default()
        };
        let route = f
            .router
            .find_route(&id, p(0.15, 0.55), p(0.85, 0.85), &options)
            .await
            .unwrap();
        // (1, 5) is wall; (1, 4) is the first nearest walkable cell.
        assert_eq!(route.start, p(0.15, 0.45));
        assert_eq!(route.polyline.first(), Some(&p(0.15, 0.45)));
    }

    #[tokio::test]
    async fn test_unprocessed_and_unknown_maps() {
        let f = fixture();
        let uploaded = f.registry.register("raw", vec![0], 1.0).unwrap();
        let options = RouteOptions::default();
        assert!(matches!(
            f.router.find_route(&uploaded, p(0.1, 0.1), p(0.2, 0.2), &options).await,
            Err(RoutingError::GridUnavailable(_))
        ));
        assert!(matches!(
            f.router
                .find_route(&MapId::from("missing"), p(0.1, 0.1), p(0.2, 0.2), &options)
                .await,
            Err(RoutingError::MapNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_multi_route_joins_segments() {
        let f = fixture();
        let id = add_map(&f.registry, "open", open_grid());
        let stops = [p(0.05, 0.05), p(0.95, 0.05), p(0.95, 0.95)];
        let result = f
            .router
            .find_multi_route(&id, &stops, &MultiRouteOptions::default())
            .await
            .unwrap();

        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.points, stops.to_vec());
        let seg_points: usize = result.segments.iter().map(|s| s.polyline.len()).sum();
        assert_eq!(result.polyline.len(), seg_points - 1);
        assert_eq!(result.polyline.first(), Some(&stops[0]));
        assert_eq!(result.polyline.last(), Some(&stops[2]));
        assert!((result.total_distance_meters - 90.0).abs() < 1e-6);
        let seg_sum: f64 = result.segments.iter().map(|s| s.estimated_time_secs).sum();
        assert!((result.total_time_secs - seg_sum).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_multi_route_round_trip() {
        let f = fixture();
        let id = add_map(&f.registry, "open", open_grid());
        let options = MultiRouteOptions {
            return_to_start: true,
            ..MultiRouteOptions::default()
        };
        let result = f
            .router
            .find_multi_route(&id, &[p(0.05, 0.05), p(0.95, 0.05)], &options)
            .await
            .unwrap();
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.points.last(), Some(&p(0.05, 0.05)));
        assert_eq!(result.polyline.last(), Some(&p(0.05, 0.05)));
    }

    #[tokio::test]
    async fn test_multi_route_reorders_greedily() {
        let f = fixture();
        let id = add_map(&f.registry, "open", open_grid());
        let options = MultiRouteOptions {
            optimize_order: true,
            ..MultiRouteOptions::default()
        };
        let stops = [p(0.05, 0.05), p(0.95, 0.05), p(0.15, 0.05), p(0.55, 0.05)];
        let result = f.router.find_multi_route(&id, &stops, &options).await.unwrap();
        assert_eq!(
            result.points,
            vec![p(0.05, 0.05), p(0.15, 0.05), p(0.55, 0.05), p(0.95, 0.05)]
        );
    }

    #[tokio::test]
    async fn test_multi_route_names_failing_segment() {
        let f = fixture();
        let id = add_map(&f.registry, "islands", islands_grid());
        let stops = [p(0.15, 0.15), p(0.15, 0.85), p(0.85, 0.85)];
        let err = f
            .router
            .find_multi_route(&id, &stops, &MultiRouteOptions::default())
            .await
            .unwrap_err();
        match err {
            RoutingError::SegmentFailure { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(*source, RoutingError::NotFound { .. }));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_multi_route_needs_two_points() {
        let f = fixture();
        let id = add_map(&f.registry, "open", open_grid());
        assert!(matches!(
            f.router
                .find_multi_route(&id, &[p(0.5, 0.5)], &MultiRouteOptions::default())
                .await,
            Err(RoutingError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_alternatives_keep_distinct_routes_sorted() {
        let f = fixture();
        let id = add_map(&f.registry, "open", open_grid());
        let result = f
            .router
            .find_alternative_routes(&id, p(0.05, 0.05), p(0.95, 0.95), &RouteOptions::default())
            .await
            .unwrap();

        // The straight diagonal cannot be smoothed further, so only the
        // right-angle variant differs.
        assert_eq!(result.main_route.kind, AlternativeKind::Optimal);
        let kinds: Vec<AlternativeKind> = result.alternatives.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AlternativeKind::NoDiagonal]);
        assert!(result.alternatives[0].route.distance_meters > result.main_route.route.distance_meters);
        assert_ne!(result.alternatives[0].route.polyline, result.main_route.route.polyline);
        assert!(!result.alternatives[0].route.cached);
    }

    #[tokio::test]
    async fn test_alternatives_fail_when_unreachable() {
        let f = fixture();
        let id = add_map(&f.registry, "islands", islands_grid());
        assert!(matches!(
            f.router
                .find_alternative_routes(&id, p(0.15, 0.5), p(0.85, 0.5), &RouteOptions::default())
                .await,
            Err(RoutingError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_validate_walkable_point_unchanged() {
        let f = fixture();
        let id = add_map(&f.registry, "gap", gap_grid());
        let v = f.router.validate_point(&id, p(0.33, 0.21)).unwrap();
        assert!(v.valid);
        assert!(!v.was_adjusted);
        assert_eq!(v.adjusted, p(0.33, 0.21));
        assert_eq!(v.adjustment_distance_px, 0.0);
    }

    #[tokio::test]
    async fn test_validate_wall_point_is_adjusted_minimally() {
        let f = fixture();
        let id = add_map(&f.registry, "gap", gap_grid());
        let v = f.router.validate_point(&id, p(0.25, 0.55)).unwrap();
        assert!(v.valid);
        assert!(v.was_adjusted);
        assert_eq!(v.adjusted, p(0.25, 0.45));
        // One cell up, 5 source pixels.
        assert!((v.adjustment_distance_px - 5.0).abs() < EPS);
    }

    #[tokio::test]
    async fn test_validate_without_walkable_neighbourhood() {
        let f = fixture();
        let mut grid = open_grid();
        for y in 0..10 {
            for x in 0..10 {
                if (x, y) != (0, 0) {
                    grid.set_cell(GridPoint::new(x, y), Cell::Obstacle).unwrap();
                }
            }
        }
        let id = add_map(&f.registry, "walled", grid);
        let router = Router::new(
            f.registry.clone(),
            Arc::new(RouteCache::new(4, Duration::from_secs(60))),
            true,
            f.history.clone(),
            WorkerPool::new(1),
            RoutingSettings {
                max_correction_radius: 2,
                ..RoutingSettings::default()
            },
        );
        let v = router.validate_point(&id, p(0.95, 0.95)).unwrap();
        assert!(!v.valid);
        assert!(!v.was_adjusted);
    }

    #[tokio::test]
    async fn test_search_limit_reports_not_found() {
        let f = fixture();
        let id = add_map(&f.registry, "open", open_grid());
        let router = Router::new(
            f.registry.clone(),
            Arc::new(RouteCache::new(4, Duration::from_secs(60))),
            false,
            f.history.clone(),
            WorkerPool::new(1),
            RoutingSettings {
                max_expansions: 3,
                ..RoutingSettings::default()
            },
        );
        let err = router
            .find_route(&id, p(0.05, 0.05), p(0.95, 0.95), &RouteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::NotFound { limit_reached: true, .. }));
    }
}
