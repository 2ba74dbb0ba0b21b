use mapnav_geometry::NormalizedPoint;

/// Reorders stops with the greedy nearest-unvisited heuristic.
///
/// The first stop stays first; each following stop is the closest remaining one
/// by straight-line distance, ties going to the earlier input. This is an
/// approximation of the travelling salesperson tour and can be noticeably worse
/// than optimal. Three or fewer stops are returned as given.
pub fn greedy_order(points: &[NormalizedPoint]) -> Vec<NormalizedPoint> {
    if points.len() <= 3 {
        return points.to_vec();
    }

    let mut ordered = Vec::with_capacity(points.len());
    ordered.push(points[0]);
    let mut remaining: Vec<NormalizedPoint> = points[1..].to_vec();

    while !remaining.is_empty() {
        let current = ordered[ordered.len() - 1];
        let nearest = remaining
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| current.distance(a).total_cmp(&current.distance(b)))
            .map(|(i, _)| i)
            .unwrap_or(0);
        ordered.push(remaining.remove(nearest));
    }
    ordered
}
