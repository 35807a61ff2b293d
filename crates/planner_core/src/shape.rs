use shape_planner_model::{LatLng, RouteId, ShapePoint};

use crate::geo::DistanceMetric;

/// Annotates each vertex of `path` with its sequence number and the distance
/// travelled from the first vertex, using a single running sum.
///
/// The first point is always at distance 0; point `i` adds
/// `metric.distance(path[i - 1], path[i])` to the total of point `i - 1`.
pub fn annotate_path<M>(route_id: &RouteId, path: &[LatLng], metric: &M) -> Vec<ShapePoint>
where
    M: DistanceMetric + ?Sized,
{
    let mut points = Vec::with_capacity(path.len());
    let mut travelled = 0.0;
    let mut previous: Option<LatLng> = None;
    for (sequence, &vertex) in path.iter().enumerate() {
        if let Some(prev) = previous {
            travelled += metric.distance(prev, vertex);
        }
        points.push(ShapePoint {
            route_id: route_id.clone(),
            lat: vertex.lat,
            lon: vertex.lon,
            sequence: sequence as u32,
            cumulative_distance_m: travelled,
        });
        previous = Some(vertex);
    }
    points
}

pub fn total_distance(points: &[ShapePoint]) -> f64 {
    points
        .last()
        .map(|point| point.cumulative_distance_m)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Haversine;

    fn route() -> RouteId {
        RouteId::parse("A_to_B").unwrap()
    }

    fn line(n: usize) -> Vec<LatLng> {
        (0..n)
            .map(|i| LatLng {
                lat: 0.0,
                lon: i as f64,
            })
            .collect()
    }

    #[test]
    fn unit_steps_accumulate() {
        let unit = |_: LatLng, _: LatLng| 1.0;
        let points = annotate_path(&route(), &line(3), &unit);
        let distances: Vec<f64> = points.iter().map(|p| p.cumulative_distance_m).collect();
        assert_eq!(distances, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn sequence_is_dense_and_starts_at_zero() {
        let points = annotate_path(&route(), &line(25), &Haversine);
        assert_eq!(points.len(), 25);
        for (i, point) in points.iter().enumerate() {
            assert_eq!(point.sequence, i as u32);
            assert_eq!(point.route_id, route());
        }
        assert_eq!(points[0].cumulative_distance_m, 0.0);
    }

    #[test]
    fn distances_never_decrease() {
        let path = vec![
            LatLng { lat: 51.50, lon: -0.10 },
            LatLng { lat: 51.50, lon: -0.10 },
            LatLng { lat: 51.51, lon: -0.12 },
            LatLng { lat: 51.49, lon: -0.11 },
        ];
        let points = annotate_path(&route(), &path, &Haversine);
        for pair in points.windows(2) {
            assert!(pair[0].cumulative_distance_m <= pair[1].cumulative_distance_m);
        }
        assert_eq!(points[1].cumulative_distance_m, 0.0);
    }

    #[test]
    fn matches_pairwise_sum() {
        let path = line(4);
        let points = annotate_path(&route(), &path, &Haversine);
        let expected: f64 = path
            .windows(2)
            .map(|pair| Haversine.distance(pair[0], pair[1]))
            .sum();
        assert!((total_distance(&points) - expected).abs() < 1e-9);
    }

    #[test]
    fn first_point_skips_self_distance() {
        let calls = std::cell::Cell::new(0);
        let counting = |_: LatLng, _: LatLng| {
            calls.set(calls.get() + 1);
            5.0
        };
        let points = annotate_path(&route(), &line(1), &counting);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].cumulative_distance_m, 0.0);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn empty_path_yields_no_points() {
        assert!(annotate_path(&route(), &[], &Haversine).is_empty());
        assert_eq!(total_distance(&[]), 0.0);
    }
}
