//! GeoJSON <-> `geo` crate polygon conversion, shared by the coverage indexer
//! and the partitioner's clip step.

use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{Contains, Line, MultiPolygon, Polygon};
use geo_types::{Coord, LineString, MultiLineString, Point};

use crate::model::Geometry;

fn ring(coords: &[[f64; 2]]) -> LineString<f64> {
    LineString::new(coords.iter().map(|c| Coord { x: c[0], y: c[1] }).collect())
}

pub fn geometry_to_multipolygon(geometry: &Geometry) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon { coordinates } => {
            if coordinates.is_empty() {
                return None;
            }
            let exterior = ring(&coordinates[0]);
            let interiors = coordinates[1..].iter().map(|r| ring(r)).collect();
            Some(MultiPolygon::new(vec![Polygon::new(exterior, interiors)]))
        }
        Geometry::MultiPolygon { coordinates } => {
            let polys: Vec<Polygon<f64>> = coordinates
                .iter()
                .filter(|rings| !rings.is_empty())
                .map(|rings| {
                    let exterior = ring(&rings[0]);
                    let interiors = rings[1..].iter().map(|r| ring(r)).collect();
                    Polygon::new(exterior, interiors)
                })
                .collect();
            if polys.is_empty() {
                None
            } else {
                Some(MultiPolygon::new(polys))
            }
        }
        _ => None,
    }
}

pub fn geometry_to_multilinestring(geometry: &Geometry) -> Option<MultiLineString<f64>> {
    match geometry {
        Geometry::LineString { coordinates } => {
            if coordinates.len() < 2 {
                return None;
            }
            Some(MultiLineString::new(vec![ring(coordinates)]))
        }
        Geometry::MultiLineString { coordinates } => {
            let lines: Vec<LineString<f64>> =
                coordinates.iter().filter(|c| c.len() >= 2).map(|c| ring(c)).collect();
            if lines.is_empty() {
                None
            } else {
                Some(MultiLineString::new(lines))
            }
        }
        _ => None,
    }
}

pub fn multilinestring_to_geometry(mls: &MultiLineString<f64>) -> Geometry {
    if mls.0.len() == 1 {
        Geometry::LineString { coordinates: line_string_to_coords(&mls.0[0]) }
    } else {
        Geometry::MultiLineString { coordinates: mls.0.iter().map(line_string_to_coords).collect() }
    }
}

fn point_in_mask(mask: &MultiPolygon<f64>, coord: Coord<f64>) -> bool {
    mask.contains(&Point::new(coord.x, coord.y))
}

fn sq_dist(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (a.x - b.x).powi(2) + (a.y - b.y).powi(2)
}

/// Splits one line into runs that fall inside `mask` and runs that fall
/// outside it, cutting at every boundary crossing. `geo`'s `BooleanOps`
/// trait only covers Polygon/MultiPolygon operands, so line geometry needs
/// its own intersection/difference: walk each segment, find where it
/// crosses a mask ring via `line_intersection`, and classify each resulting
/// run by whether its midpoint sits inside the mask.
fn clip_one_line(line: &LineString<f64>, mask: &MultiPolygon<f64>) -> (Vec<LineString<f64>>, Vec<LineString<f64>>) {
    let coords: Vec<Coord<f64>> = line.0.clone();
    let mut outside = Vec::new();
    let mut inside = Vec::new();
    if coords.len() < 2 {
        return (outside, inside);
    }

    let mut current: Vec<Coord<f64>> = vec![coords[0]];
    for pair in coords.windows(2) {
        let (p0, p1) = (pair[0], pair[1]);
        let seg = Line::new(p0, p1);

        let mut crossings: Vec<Coord<f64>> = Vec::new();
        for poly in &mask.0 {
            for boundary in std::iter::once(poly.exterior()).chain(poly.interiors().iter()) {
                for edge in boundary.lines() {
                    if let Some(LineIntersection::SinglePoint { intersection, .. }) = line_intersection(seg, edge) {
                        crossings.push(intersection);
                    }
                }
            }
        }
        crossings.sort_by(|a, b| sq_dist(p0, *a).partial_cmp(&sq_dist(p0, *b)).unwrap_or(std::cmp::Ordering::Equal));

        for crossing in crossings {
            if sq_dist(*current.last().unwrap(), crossing) < 1e-18 {
                continue;
            }
            current.push(crossing);
            let run = std::mem::replace(&mut current, vec![crossing]);
            flush_run(run, mask, &mut inside, &mut outside);
        }
        current.push(p1);
    }
    flush_run(current, mask, &mut inside, &mut outside);

    (outside, inside)
}

fn flush_run(
    run: Vec<Coord<f64>>,
    mask: &MultiPolygon<f64>,
    inside: &mut Vec<LineString<f64>>,
    outside: &mut Vec<LineString<f64>>,
) {
    if run.len() < 2 {
        return;
    }
    // No crossing falls strictly within a run by construction, so any point
    // along it (the first segment's midpoint) carries the run's classification.
    let mid = Coord { x: (run[0].x + run[1].x) / 2.0, y: (run[0].y + run[1].y) / 2.0 };
    if point_in_mask(mask, mid) {
        inside.push(LineString::new(run));
    } else {
        outside.push(LineString::new(run));
    }
}

/// Intersection and difference of line geometry against a polygon mask,
/// mirroring the `BooleanOps`-based split used for polygon features.
pub fn clip_lines_by_mask(
    mls: &MultiLineString<f64>,
    mask: &MultiPolygon<f64>,
) -> (MultiLineString<f64>, MultiLineString<f64>) {
    let mut outside = Vec::new();
    let mut inside = Vec::new();
    for line in &mls.0 {
        let (o, i) = clip_one_line(line, mask);
        outside.extend(o);
        inside.extend(i);
    }
    (MultiLineString::new(outside), MultiLineString::new(inside))
}

fn line_string_to_coords(ls: &LineString<f64>) -> Vec<[f64; 2]> {
    ls.coords().map(|c| [c.x, c.y]).collect()
}

pub fn multipolygon_to_geometry(mp: &MultiPolygon<f64>) -> Geometry {
    if mp.0.len() == 1 {
        let poly = &mp.0[0];
        let mut rings = vec![line_string_to_coords(poly.exterior())];
        rings.extend(poly.interiors().iter().map(line_string_to_coords));
        Geometry::Polygon { coordinates: rings }
    } else {
        let polys = mp
            .0
            .iter()
            .map(|poly| {
                let mut rings = vec![line_string_to_coords(poly.exterior())];
                rings.extend(poly.interiors().iter().map(line_string_to_coords));
                rings
            })
            .collect();
        Geometry::MultiPolygon { coordinates: polys }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Geometry {
        Geometry::Polygon {
            coordinates: vec![vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]],
        }
    }

    #[test]
    fn polygon_round_trips_through_multipolygon() {
        let original = square();
        let mp = geometry_to_multipolygon(&original).unwrap();
        assert_eq!(mp.0.len(), 1);
        let back = multipolygon_to_geometry(&mp);
        match back {
            Geometry::Polygon { coordinates } => assert_eq!(coordinates[0].len(), 5),
            other => panic!("expected Polygon, got {other:?}"),
        }
    }

    #[test]
    fn non_polygon_geometry_has_no_conversion() {
        let line = Geometry::LineString { coordinates: vec![[0.0, 0.0], [1.0, 1.0]] };
        assert!(geometry_to_multipolygon(&line).is_none());
    }

    #[test]
    fn multiple_polygons_stay_multipolygon_on_round_trip() {
        let mp = MultiPolygon::new(vec![
            geometry_to_multipolygon(&square()).unwrap().0[0].clone(),
            geometry_to_multipolygon(&Geometry::Polygon {
                coordinates: vec![vec![[2.0, 2.0], [2.0, 3.0], [3.0, 3.0], [3.0, 2.0], [2.0, 2.0]]],
            })
            .unwrap()
            .0[0]
                .clone(),
        ]);
        match multipolygon_to_geometry(&mp) {
            Geometry::MultiPolygon { coordinates } => assert_eq!(coordinates.len(), 2),
            other => panic!("expected MultiPolygon, got {other:?}"),
        }
    }

    fn mask() -> MultiPolygon<f64> {
        geometry_to_multipolygon(&square()).unwrap()
    }

    #[test]
    fn line_entirely_inside_mask_has_no_outside_run() {
        let line = Geometry::LineString { coordinates: vec![[0.2, 0.2], [0.8, 0.8]] };
        let mls = geometry_to_multilinestring(&line).unwrap();
        let (outside, inside) = clip_lines_by_mask(&mls, &mask());
        assert!(outside.0.is_empty());
        assert_eq!(inside.0.len(), 1);
    }

    #[test]
    fn line_entirely_outside_mask_has_no_inside_run() {
        let line = Geometry::LineString { coordinates: vec![[5.0, 5.0], [6.0, 6.0]] };
        let mls = geometry_to_multilinestring(&line).unwrap();
        let (outside, inside) = clip_lines_by_mask(&mls, &mask());
        assert!(inside.0.is_empty());
        assert_eq!(outside.0.len(), 1);
    }

    #[test]
    fn line_crossing_the_boundary_splits_into_both_runs() {
        // crosses the mask's right edge (x=1) at (1.0, 0.5)
        let line = Geometry::LineString { coordinates: vec![[0.5, 0.5], [1.5, 0.5]] };
        let mls = geometry_to_multilinestring(&line).unwrap();
        let (outside, inside) = clip_lines_by_mask(&mls, &mask());
        assert_eq!(outside.0.len(), 1);
        assert_eq!(inside.0.len(), 1);
    }

    #[test]
    fn multilinestring_round_trips() {
        let geom = Geometry::MultiLineString {
            coordinates: vec![vec![[0.0, 0.0], [1.0, 1.0]], vec![[2.0, 2.0], [3.0, 3.0]]],
        };
        let mls = geometry_to_multilinestring(&geom).unwrap();
        assert_eq!(mls.0.len(), 2);
        match multilinestring_to_geometry(&mls) {
            Geometry::MultiLineString { coordinates } => assert_eq!(coordinates.len(), 2),
            other => panic!("expected MultiLineString, got {other:?}"),
        }
    }
}
