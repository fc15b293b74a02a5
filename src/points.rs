//! Point extraction: every Point geometry is diverted out of the per-scale
//! streams and into the point archive, with a usage-band cap applied from
//! higher-scale coverage, and sector lights appended to the light index.

use serde::Serialize;

use crate::coverage::CoverageIndex;
use crate::dedup::{dedup_key, DedupIndex};
use crate::model::{Feature, TippecanoeHint};
use crate::scales::{self, OBJL_LIGHTS, OBJL_SOUNDG};
use crate::tracer::Tracer;

#[derive(Debug, Clone, Serialize)]
pub struct SectorLightEntry {
    pub lon: f64,
    pub lat: f64,
    pub sectr1: f64,
    pub sectr2: f64,
    pub colour: Option<serde_json::Value>,
    pub scamin: Option<f64>,
    pub scale_num: u8,
    pub max_zoom: u8,
    pub valnmr: Option<f64>,
}

pub enum PointSubStream {
    Soundings,
    NavAids,
}

pub struct PointExtractor<'a> {
    pub dedup: &'a DedupIndex,
    pub coverage: &'a CoverageIndex,
    pub headroom: i32,
    pub sector_lights: Vec<SectorLightEntry>,
}

impl<'a> PointExtractor<'a> {
    pub fn new(dedup: &'a DedupIndex, coverage: &'a CoverageIndex, headroom: i32) -> Self {
        PointExtractor { dedup, coverage, headroom, sector_lights: Vec::new() }
    }

    /// Returns `None` if the point is dropped (usage-band clamp left no
    /// visible range), else the substream it belongs to plus the final feature.
    pub fn extract(&mut self, mut feature: Feature, tracer: &Tracer) -> Option<(PointSubStream, Feature)> {
        let objl = feature.objl()?;
        let scale = feature.scale_num()?;
        let (x, y) = feature.geometry.point_xy()?;

        let best_scamin = dedup_key(&feature, objl)
            .and_then(|k| self.dedup.point_scamin.get(&k).copied())
            .filter(|s| *s > 0.0);
        if let Some(scamin) = best_scamin {
            feature.properties.insert("SCAMIN".to_string(), serde_json::json!(scamin));
        }

        let (native_lo, native_hi) = scales::native_zoom_range(scale);
        let minzoom = match best_scamin {
            Some(s) => scales::scamin_to_minzoom(s, self.headroom).max(native_lo),
            None => native_lo,
        };
        let mut maxzoom = native_hi;

        // Usage-band cap: the nearest higher scale whose coverage contains
        // this point clamps visibility to just before that scale takes over.
        for candidate in (scale + 1)..=scales::MAX_SCALE {
            if let Some(poly) = self.coverage.by_scale.get(&candidate) {
                if point_in_multipolygon(poly, x, y) {
                    let higher_floor = scales::native_zoom_range(candidate).0;
                    maxzoom = maxzoom.min(higher_floor.saturating_sub(1));
                    break;
                }
            }
        }

        if maxzoom < minzoom {
            tracer.trace(&feature, "WRITE-SKIPPED", "usage-band-clamped-empty");
            return None;
        }

        if objl == OBJL_LIGHTS {
            if let Some((s1, s2)) = feature.sectr() {
                self.sector_lights.push(SectorLightEntry {
                    lon: (x * 1e6).round() / 1e6,
                    lat: (y * 1e6).round() / 1e6,
                    sectr1: s1,
                    sectr2: s2,
                    colour: feature.properties.get("COLOUR").cloned(),
                    scamin: best_scamin,
                    scale_num: scale,
                    max_zoom: maxzoom,
                    valnmr: feature.properties.get("VALNMR").and_then(|v| v.as_f64()),
                });
            }
        }

        feature.strip_bookkeeping_fields();
        feature.set_tippecanoe_hint(TippecanoeHint { minzoom, maxzoom, layer: "charts".to_string() });

        let substream = if objl == OBJL_SOUNDG { PointSubStream::Soundings } else { PointSubStream::NavAids };
        tracer.trace(&feature, "POINT-EXTRACT", "written");
        Some((substream, feature))
    }
}

fn point_in_multipolygon(mp: &geo::MultiPolygon<f64>, x: f64, y: f64) -> bool {
    use geo::Contains;
    let pt = geo_types::Point::new(x, y);
    mp.contains(&pt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Geometry;
    use serde_json::json;

    fn light(scale: u8, x: f64, y: f64) -> Feature {
        Feature {
            type_: "Feature".into(),
            geometry: Geometry::Point { coordinates: [x, y] },
            properties: json!({"OBJL": 75, "_scaleNum": scale, "SECTR1": 10.0, "SECTR2": 90.0}).as_object().unwrap().clone(),
            chart_id: "c".into(),
        }
    }

    #[test]
    fn sector_light_gets_indexed() {
        let dedup = DedupIndex::default();
        let coverage = CoverageIndex::default();
        let mut extractor = PointExtractor::new(&dedup, &coverage, 2);
        let tracer = Tracer::disabled();
        let out = extractor.extract(light(3, 1.0, 2.0), &tracer);
        assert!(out.is_some());
        assert_eq!(extractor.sector_lights.len(), 1);
    }
}
