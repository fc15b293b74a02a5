//! Pass 1: stream every chart's features once, computing a dedup fingerprint
//! per candidate feature and keeping only the winner's identity plus the
//! cross-scale bookkeeping the partitioner needs in pass 2.

use std::collections::HashMap;

use md5::{Digest, Md5};

use crate::model::{Feature, Geometry};
use crate::scales::{self, is_dedup_candidate};
use crate::tracer::Tracer;

/// Identifies one feature within its source chart file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureRef {
    pub chart_index: usize,
    pub feature_index: usize,
}

#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub winner: FeatureRef,
    pub winner_scale: u8,
    pub scales_seen: Vec<u8>,
    pub best_scamin: Option<f64>,
}

#[derive(Default)]
pub struct DedupIndex {
    pub by_key: HashMap<String, DedupEntry>,
    /// dedup key -> best (largest) SCAMIN, tracked independently of whether
    /// the OBJL is a dedup candidate. Every Point feature is keyed here so
    /// the point extractor can look up the sharpest SCAMIN across scales.
    pub point_scamin: HashMap<String, f64>,
    /// (scale, objl) -> tightest non-zero SCAMIN observed among non-Point
    /// features of that OBJL at that scale.
    pub tightest_scamin: HashMap<(u8, i32), f64>,
    /// (scale, objl) pairs that exist at all, even with no SCAMIN.
    pub objl_present: std::collections::HashSet<(u8, i32)>,
    pub tally: HashMap<&'static str, usize>,
}

/// Geometry-kind-specific dedup fingerprint: sector lights key on position
/// plus sector bearings and colour, other points key on name (if present)
/// and rounded position, lines and polygons key on a hash of their rounded,
/// sorted coordinate set.
pub fn dedup_key(feature: &Feature, objl: i32) -> Option<String> {
    if objl == scales::OBJL_LIGHTS {
        if let Some((x, y)) = feature.geometry.point_xy() {
            let (s1, s2) = feature.sectr().unwrap_or((-1.0, -1.0));
            let colour = feature
                .properties
                .get("COLOUR")
                .map(|v| v.to_string())
                .unwrap_or_default();
            return Some(format!(
                "{objl}:{:.5}:{:.5}:{s1}:{s2}:{colour}",
                x, y
            ));
        }
    }

    if feature.geometry.is_point() {
        let (x, y) = feature.geometry.point_xy()?;
        return Some(match feature.objnam() {
            Some(name) => format!("{objl}:{name}:{:.4}:{:.4}", x, y),
            None => format!("{objl}:{:.5}:{:.5}", x, y),
        });
    }

    let mut coords: Vec<(i64, i64)> = feature
        .geometry
        .flattened_coords()
        .into_iter()
        .map(|(x, y)| ((x * 1e5).round() as i64, (y * 1e5).round() as i64))
        .collect();
    coords.sort_unstable();

    let mut hasher = Md5::new();
    for (x, y) in &coords {
        hasher.update(x.to_le_bytes());
        hasher.update(y.to_le_bytes());
    }
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();

    Some(match feature.objnam() {
        Some(name) => format!("{objl}:{name}:{hex}"),
        None => format!("{objl}:{hex}"),
    })
}

impl DedupIndex {
    /// Feed one chart's worth of already-parsed features into the index.
    /// `chart_index` must match the chart's position in the sorted ingest
    /// list so `FeatureRef`s remain stable between pass 1 and pass 2.
    pub fn ingest_chart(
        &mut self,
        chart_index: usize,
        features: &[Feature],
        tracer: &Tracer,
    ) {
        for (feature_index, feature) in features.iter().enumerate() {
            let Some(objl) = feature.objl() else { continue };
            let Some(scale) = feature.scale_num() else { continue };

            if !feature.geometry.is_point() {
                if let Some(scamin) = feature.scamin() {
                    if scamin > 0.0 {
                        let tightest = self.tightest_scamin.entry((scale, objl)).or_insert(scamin);
                        if scamin < *tightest {
                            *tightest = scamin;
                        }
                    }
                }
                self.objl_present.insert((scale, objl));
            }

            if feature.geometry.is_point() {
                if let Some(key) = dedup_key(feature, objl) {
                    if let Some(scamin) = feature.scamin() {
                        let best = self.point_scamin.entry(key).or_insert(0.0);
                        if scamin > *best {
                            *best = scamin;
                        }
                    }
                }
            }

            if !is_dedup_candidate(objl) {
                continue;
            }
            let Some(key) = dedup_key(feature, objl) else { continue };

            if let Some(category) = scales::dedup_category(objl) {
                *self.tally.entry(category).or_insert(0) += 1;
            }

            let reference = FeatureRef { chart_index, feature_index };
            match self.by_key.get_mut(&key) {
                None => {
                    tracer.trace(feature, "DEDUP-NEW", &key);
                    self.by_key.insert(
                        key,
                        DedupEntry {
                            winner: reference,
                            winner_scale: scale,
                            scales_seen: vec![scale],
                            best_scamin: feature.scamin(),
                        },
                    );
                }
                Some(entry) => {
                    if !entry.scales_seen.contains(&scale) {
                        entry.scales_seen.push(scale);
                    }
                    if let Some(scamin) = feature.scamin() {
                        entry.best_scamin = Some(entry.best_scamin.map_or(scamin, |b| b.max(scamin)));
                    }
                    let replaces = scale > entry.winner_scale
                        || (scale == entry.winner_scale && chart_index < entry.winner.chart_index);
                    if replaces {
                        tracer.trace(feature, "DEDUP-REPLACE", &key);
                        entry.winner = reference;
                        entry.winner_scale = scale;
                    } else {
                        tracer.trace(feature, "DEDUP-SKIP", &key);
                    }
                }
            }
        }
    }

    pub fn is_winner(&self, key: &str, reference: FeatureRef) -> bool {
        self.by_key.get(key).map(|e| e.winner) == Some(reference)
    }

    pub fn scales_for_key(&self, key: &str) -> Option<&[u8]> {
        self.by_key.get(key).map(|e| e.scales_seen.as_slice())
    }

    pub fn best_scamin_for_key(&self, key: &str) -> Option<f64> {
        self.by_key.get(key).and_then(|e| e.best_scamin)
    }

    /// SCAMIN-derived minzoom of the OBJL at the higher scale's native floor,
    /// or `None` if the higher scale never carries this OBJL at all.
    pub fn higher_feature_minzoom(&self, higher_scale: u8, objl: i32, headroom: i32) -> Option<u8> {
        if !self.objl_present.contains(&(higher_scale, objl)) {
            return None;
        }
        let (native_lo, _) = scales::native_zoom_range(higher_scale);
        match self.tightest_scamin.get(&(higher_scale, objl)) {
            Some(&scamin) => Some(scales::scamin_to_minzoom(scamin, headroom).max(native_lo)),
            None => Some(native_lo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point_feature(objl: i32, scale: u8, x: f64, y: f64) -> Feature {
        Feature {
            type_: "Feature".into(),
            geometry: Geometry::Point { coordinates: [x, y] },
            properties: json!({"OBJL": objl, "_scaleNum": scale}).as_object().unwrap().clone(),
            chart_id: "c".into(),
        }
    }

    #[test]
    fn dedup_key_stable_for_unnamed_point() {
        let f = point_feature(71, 3, 1.23456, 4.56789);
        let k1 = dedup_key(&f, 71).unwrap();
        let k2 = dedup_key(&f, 71).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn highest_scale_wins() {
        let mut index = DedupIndex::default();
        let tracer = Tracer::disabled();
        let chart_a = vec![point_feature(71, 2, 1.0, 2.0)];
        let chart_b = vec![point_feature(71, 4, 1.0, 2.0)];
        index.ingest_chart(0, &chart_a, &tracer);
        index.ingest_chart(1, &chart_b, &tracer);
        let key = dedup_key(&chart_a[0], 71).unwrap();
        assert_eq!(index.by_key[&key].winner_scale, 4);
        assert!(index.is_winner(&key, FeatureRef { chart_index: 1, feature_index: 0 }));
    }

    #[test]
    fn tie_break_by_chart_index_ascending() {
        let mut index = DedupIndex::default();
        let tracer = Tracer::disabled();
        let chart_a = vec![point_feature(71, 3, 1.0, 2.0)];
        let chart_b = vec![point_feature(71, 3, 1.0, 2.0)];
        index.ingest_chart(0, &chart_a, &tracer);
        index.ingest_chart(1, &chart_b, &tracer);
        let key = dedup_key(&chart_a[0], 71).unwrap();
        assert!(index.is_winner(&key, FeatureRef { chart_index: 0, feature_index: 0 }));
    }
}
