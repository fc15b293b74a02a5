//! Per-scale coverage union and the higher-scale clip mask table. Geometric
//! union must tolerate invalid input, so every polygon passes through
//! `make_valid` before and after each union step.

use std::collections::HashMap;

use geo::{BooleanOps, MultiPolygon};
use log::warn;

use crate::error::{ComposeError, Result};
use crate::geomconv::geometry_to_multipolygon;
use crate::model::Feature;
use crate::scales::{self, OBJL_MCOVR};

/// Best-effort repair for a polygon ring set that may be self-intersecting
/// or otherwise topologically invalid. `geo`'s boolean ops already tolerate
/// a fair amount of irregularity; this self-union is the buffer-by-zero
/// idiom used to coax the remainder into a valid ring set.
fn make_valid(poly: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    poly.clone().union(poly)
}

#[derive(Default)]
pub struct CoverageIndex {
    /// Per-scale union of CATCOV=1 coverage polygons.
    pub by_scale: HashMap<u8, MultiPolygon<f64>>,
}

impl CoverageIndex {
    pub fn ingest_chart(&mut self, features: &[Feature]) -> Result<()> {
        for feature in features {
            if feature.objl() != Some(OBJL_MCOVR) {
                continue;
            }
            if feature.catcov() != Some(1) {
                continue;
            }
            let Some(scale) = feature.scale_num() else { continue };
            let Some(poly) = geometry_to_multipolygon(&feature.geometry) else {
                continue;
            };
            let valid = make_valid(&poly);
            match self.by_scale.get(&scale) {
                None => {
                    self.by_scale.insert(scale, valid);
                }
                Some(existing) => {
                    let unioned = make_valid(&existing.union(&valid));
                    self.by_scale.insert(scale, unioned);
                }
            }
        }
        Ok(())
    }

    /// Coverage geometry of the next scale up that actually has coverage,
    /// not the union of every higher scale, so a feature is never clipped
    /// against a scale whose own tiles haven't started yet.
    pub fn next_higher_with_coverage(&self, scale: u8) -> Option<(u8, &MultiPolygon<f64>)> {
        for candidate in (scale + 1)..=scales::MAX_SCALE {
            if let Some(poly) = self.by_scale.get(&candidate) {
                return Some((candidate, poly));
            }
        }
        None
    }

    pub fn simplified_geojson_by_scale(&self) -> Result<HashMap<String, serde_json::Value>> {
        use geo::Simplify;
        let mut out = HashMap::new();
        for (scale, poly) in &self.by_scale {
            // ~100m tolerance at equatorial longitude scale, matching the
            // point-archive metadata's coarse boundary use case.
            let simplified = poly.simplify(0.001);
            let value = geo_to_geojson(&simplified).map_err(|e| {
                warn!("failed to serialize coverage boundary for scale {scale}: {e}");
                ComposeError::Geometry(e)
            })?;
            out.insert(scale.to_string(), value);
        }
        Ok(out)
    }
}

fn geo_to_geojson(mp: &MultiPolygon<f64>) -> std::result::Result<serde_json::Value, String> {
    let polys: Vec<serde_json::Value> = mp
        .iter()
        .map(|poly| {
            let mut rings = vec![ring_coords(poly.exterior())];
            for interior in poly.interiors() {
                rings.push(ring_coords(interior));
            }
            serde_json::Value::Array(rings)
        })
        .collect();
    Ok(serde_json::json!({
        "type": "MultiPolygon",
        "coordinates": polys,
    }))
}

fn ring_coords(ls: &geo_types::LineString<f64>) -> serde_json::Value {
    serde_json::Value::Array(
        ls.coords()
            .map(|c| serde_json::json!([c.x, c.y]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Geometry;
    use serde_json::json;

    fn mcovr(scale: u8, catcov: i64) -> Feature {
        Feature {
            type_: "Feature".into(),
            geometry: Geometry::Polygon {
                coordinates: vec![vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]],
            },
            properties: json!({"OBJL": 302, "_scaleNum": scale, "CATCOV": catcov})
                .as_object()
                .unwrap()
                .clone(),
            chart_id: "c".into(),
        }
    }

    #[test]
    fn catcov_2_excluded_from_union() {
        let mut index = CoverageIndex::default();
        index.ingest_chart(&[mcovr(3, 2)]).unwrap();
        assert!(index.by_scale.get(&3).is_none());
    }

    #[test]
    fn next_higher_skips_scales_with_no_coverage() {
        let mut index = CoverageIndex::default();
        index.ingest_chart(&[mcovr(2, 1), mcovr(4, 1)]).unwrap();
        let (scale, _) = index.next_higher_with_coverage(2).unwrap();
        assert_eq!(scale, 4);
    }
}
