use std::fmt::Write as _;
use std::io::Read;

use shape_planner_model::{Shape, ShapePoint};

pub const SHAPES_HEADER: &str =
    "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence,shape_dist_traveled";

#[derive(Debug, thiserror::Error)]
pub enum ShapesFileError {
    #[error("malformed shapes file: {0}")]
    Csv(#[from] csv::Error),
    #[error("shapes file has no header row")]
    MissingHeader,
}

/// `{route_id},{lat},{lon},{sequence},{distance:.2}`
pub fn format_row(point: &ShapePoint) -> String {
    format!(
        "{},{},{},{},{:.2}",
        point.route_id, point.lat, point.lon, point.sequence, point.cumulative_distance_m
    )
}

/// Rows without the header, each terminated by a newline.
pub fn format_rows(points: &[ShapePoint]) -> String {
    let mut out = String::with_capacity(points.len() * 48);
    for point in points {
        let _ = writeln!(out, "{}", format_row(point));
    }
    out
}

/// Full file contents: header line followed by `rows` verbatim.
pub fn render_file(rows: &str) -> String {
    let mut out = String::with_capacity(SHAPES_HEADER.len() + 1 + rows.len());
    out.push_str(SHAPES_HEADER);
    out.push('\n');
    out.push_str(rows);
    out
}

pub fn parse_shapes<R: Read>(reader: R) -> Result<Vec<Shape>, ShapesFileError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    if reader.headers()?.is_empty() {
        return Err(ShapesFileError::MissingHeader);
    }
    let mut shapes = Vec::new();
    for record in reader.deserialize() {
        let shape: Shape = record?;
        shapes.push(shape);
    }
    Ok(shapes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Haversine;
    use crate::shape::annotate_path;
    use shape_planner_model::{LatLng, RouteId};

    fn sample_points() -> Vec<ShapePoint> {
        let route_id = RouteId::parse("S1_to_S2").unwrap();
        let path = vec![
            LatLng { lat: 51.5007, lon: -0.1246 },
            LatLng { lat: 51.5014, lon: -0.1419 },
            LatLng { lat: 51.5033, lon: -0.1195 },
        ];
        annotate_path(&route_id, &path, &Haversine)
    }

    #[test]
    fn formats_row_with_two_decimal_distance() {
        let point = ShapePoint {
            route_id: RouteId::parse("A_to_B").unwrap(),
            lat: 1.0,
            lon: -2.25,
            sequence: 3,
            cumulative_distance_m: 1234.5678,
        };
        assert_eq!(format_row(&point), "A_to_B,1,-2.25,3,1234.57");
    }

    #[test]
    fn file_starts_with_header() {
        let contents = render_file(&format_rows(&sample_points()));
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some(SHAPES_HEADER));
        assert_eq!(lines.count(), 3);
    }

    #[test]
    fn header_and_rows_parse_back() {
        let points = sample_points();
        let contents = render_file(&format_rows(&points));
        let shapes = parse_shapes(contents.as_bytes()).unwrap();
        assert_eq!(shapes.len(), points.len());
        for (shape, point) in shapes.iter().zip(&points) {
            assert_eq!(shape.shape_id, point.route_id.as_str());
            assert_eq!(shape.shape_pt_lat, point.lat);
            assert_eq!(shape.shape_pt_lon, point.lon);
            assert_eq!(shape.shape_pt_sequence, point.sequence);
            let dist = shape.shape_dist_traveled.unwrap();
            assert!((dist - point.cumulative_distance_m).abs() <= 0.005);
        }
    }

    #[test]
    fn rejects_rows_with_bad_numbers() {
        let contents = format!("{}\nA,north,1,0,0.00\n", SHAPES_HEADER);
        assert!(parse_shapes(contents.as_bytes()).is_err());
    }

    #[test]
    fn empty_input_has_no_header() {
        assert!(matches!(
            parse_shapes("".as_bytes()),
            Err(ShapesFileError::MissingHeader)
        ));
    }
}
