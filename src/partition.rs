//! Pass 2: zoom ownership, coverage-aware clipping, and SCAMIN-to-minzoom.
//! Modeled as an explicit tagged outcome per feature so tests can assert the
//! exact decision taken, per the sum-type design adopted for this pipeline.

use geo::{BooleanOps, MultiPolygon};

use crate::coverage::CoverageIndex;
use crate::dedup::{dedup_key, DedupIndex, FeatureRef};
use crate::model::{Feature, Geometry, TippecanoeHint};
use crate::scales::{self, is_skin_of_earth};
use crate::tracer::Tracer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomSlice {
    pub scale: u8,
    pub minzoom: u8,
    pub maxzoom: u8,
}

/// Compute zoom ownership for a set of participating scales: for every zoom
/// in the union of their native ranges, the largest scale whose native range
/// contains that zoom owns it. Returns contiguous slices keyed by scale.
pub fn compute_zoom_ownership(scales: &[u8]) -> Vec<ZoomSlice> {
    let mut owner_by_zoom = [0u8; (scales::MAX_ZOOM as usize) + 1];
    for &scale in scales {
        let (lo, hi) = scales::native_zoom_range(scale);
        for z in lo..=hi {
            if scale > owner_by_zoom[z as usize] {
                owner_by_zoom[z as usize] = scale;
            }
        }
    }

    let mut slices = Vec::new();
    let mut current: Option<(u8, u8)> = None; // (scale, start)
    for z in 0..=scales::MAX_ZOOM {
        let owner = owner_by_zoom[z as usize];
        match current {
            Some((cur_scale, _start)) if owner == cur_scale => {}
            Some((cur_scale, start)) => {
                if cur_scale != 0 {
                    slices.push(ZoomSlice { scale: cur_scale, minzoom: start, maxzoom: z - 1 });
                }
                current = if owner != 0 { Some((owner, z)) } else { None };
            }
            None => {
                if owner != 0 {
                    current = Some((owner, z));
                }
            }
        }
    }
    if let Some((cur_scale, start)) = current {
        if cur_scale != 0 {
            slices.push(ZoomSlice { scale: cur_scale, minzoom: start, maxzoom: scales::MAX_ZOOM });
        }
    }
    slices
}

#[derive(Debug)]
pub enum PartitionOutcome {
    Dropped,
    PointDiverted,
    ClippedEntirelyInside { gap: Option<Feature>, filler: Option<Feature> },
    ClippedPartial { outside: Feature, gap: Option<Feature>, filler: Option<Feature> },
    PartitionedDedup { slices: Vec<Feature> },
    PartitionedHint { slices: Vec<Feature> },
    SingleScale { feature: Feature },
}

pub struct Partitioner<'a> {
    pub dedup: &'a DedupIndex,
    pub coverage: &'a CoverageIndex,
    pub headroom: i32,
}

impl<'a> Partitioner<'a> {
    fn effective_minzoom(&self, scale: u8, objl: i32, scamin: Option<f64>) -> u8 {
        let (native_lo, _) = scales::native_zoom_range(scale);
        if is_skin_of_earth(objl) {
            return native_lo;
        }
        match scamin {
            Some(s) if s > 0.0 => scales::scamin_to_minzoom(s, self.headroom).max(native_lo),
            _ => native_lo,
        }
    }

    /// Process one feature from pass 2. `reference` identifies it for the
    /// dedup-winner check; `chart_index`/`feature_index` come from ingest order.
    pub fn process(
        &self,
        mut feature: Feature,
        reference: FeatureRef,
        tracer: &Tracer,
    ) -> PartitionOutcome {
        let Some(objl) = feature.objl() else { return PartitionOutcome::Dropped };
        let Some(scale) = feature.scale_num() else { return PartitionOutcome::Dropped };

        if scales::is_dedup_candidate(objl) {
            if let Some(key) = dedup_key(&feature, objl) {
                if !self.dedup.is_winner(&key, reference) {
                    tracer.trace(&feature, "DEDUP-SKIP", &key);
                    return PartitionOutcome::Dropped;
                }
            }
        }

        if feature.geometry.is_point() {
            tracer.trace(&feature, "POINT-EXTRACT", "diverted");
            return PartitionOutcome::PointDiverted;
        }

        if let Some(hint) = feature.tippecanoe_hint() {
            if !matches!(hint.layer.as_str(), "charts" | "arcs") {
                let mut hint = hint;
                hint.layer = "charts".to_string();
                feature.set_tippecanoe_hint(hint);
            }
        }

        let key = dedup_key(&feature, objl);
        let scales_seen = key.as_deref().and_then(|k| self.dedup.scales_for_key(k));
        let is_partitioned_dedup = scales_seen.map(|s| s.len() > 1).unwrap_or(false);
        let hint = feature.tippecanoe_hint();
        let (native_lo, native_hi) = scales::native_zoom_range(scale);
        let hint_extends_beyond_native =
            hint.as_ref().map(|h| h.minzoom < native_lo || h.maxzoom > native_hi).unwrap_or(false);

        if is_partitioned_dedup || hint_extends_beyond_native {
            return self.partition_multi_scale(feature, key, scales_seen, hint, is_partitioned_dedup, tracer);
        }

        self.clip_against_higher_scale(feature, objl, scale, reference, tracer)
    }

    fn partition_multi_scale(
        &self,
        mut feature: Feature,
        key: Option<String>,
        scales_seen: Option<&[u8]>,
        hint: Option<TippecanoeHint>,
        is_dedup: bool,
        tracer: &Tracer,
    ) -> PartitionOutcome {
        let objl = feature.objl().unwrap();
        let scamin = key
            .as_deref()
            .and_then(|k| self.dedup.best_scamin_for_key(k))
            .or_else(|| feature.scamin());

        let (desired_min, desired_max) = if is_dedup {
            let scales = scales_seen.unwrap_or(&[]);
            let lo = scales.iter().map(|s| scales::native_zoom_range(*s).0).min().unwrap_or(0);
            let hi = scales.iter().map(|s| scales::native_zoom_range(*s).1).max().unwrap_or(scales::MAX_ZOOM);
            (lo, hi)
        } else {
            let h = hint.unwrap();
            (h.minzoom, h.maxzoom)
        };

        let ownership_scales: Vec<u8> = if is_dedup {
            scales_seen.unwrap_or(&[]).to_vec()
        } else {
            (scales::MIN_SCALE..=scales::MAX_SCALE)
                .filter(|s| {
                    let (lo, hi) = scales::native_zoom_range(*s);
                    lo <= desired_max && hi >= desired_min
                })
                .collect()
        };

        let slices = compute_zoom_ownership(&ownership_scales);
        let mut out = Vec::new();
        for slice in slices {
            let mut lo = slice.minzoom.max(desired_min);
            let hi = slice.maxzoom.min(desired_max);
            if lo > hi {
                continue;
            }
            if !is_skin_of_earth(objl) {
                lo = lo.max(self.effective_minzoom(slice.scale, objl, scamin));
            }
            if lo > hi {
                continue;
            }
            let mut f = feature.clone();
            f.properties.insert("_scaleNum".to_string(), serde_json::json!(slice.scale));
            f.set_tippecanoe_hint(TippecanoeHint { minzoom: lo, maxzoom: hi, layer: "charts".to_string() });
            tracer.trace(&f, "WRITE-PARTITIONED", &format!("scale={} [{lo},{hi}]", slice.scale));
            out.push(f);
        }
        feature.properties.remove("tippecanoe");

        if is_dedup {
            PartitionOutcome::PartitionedDedup { slices: out }
        } else {
            PartitionOutcome::PartitionedHint { slices: out }
        }
    }

    fn clip_against_higher_scale(
        &self,
        mut feature: Feature,
        objl: i32,
        scale: u8,
        _reference: FeatureRef,
        tracer: &Tracer,
    ) -> PartitionOutcome {
        let (native_lo, native_hi) = scales::native_zoom_range(scale);
        let my_min = self.effective_minzoom(scale, objl, feature.scamin());

        let Some((higher_scale, higher_poly)) = self.coverage.next_higher_with_coverage(scale) else {
            feature.set_tippecanoe_hint(TippecanoeHint { minzoom: my_min, maxzoom: native_hi, layer: "charts".to_string() });
            tracer.trace(&feature, "WRITE-SINGLE", "no-higher-coverage");
            return PartitionOutcome::SingleScale { feature };
        };

        let Some(split) = split_against_mask(&feature.geometry, higher_poly) else {
            feature.set_tippecanoe_hint(TippecanoeHint { minzoom: my_min, maxzoom: native_hi, layer: "charts".to_string() });
            return PartitionOutcome::SingleScale { feature };
        };

        if let ClipSplit::EntirelyOutside = split {
            feature.set_tippecanoe_hint(TippecanoeHint { minzoom: my_min, maxzoom: native_hi, layer: "charts".to_string() });
            tracer.trace(&feature, "WRITE-SINGLE", "outside-mask");
            return PartitionOutcome::SingleScale { feature };
        }

        let higher_floor = scales::native_zoom_range(higher_scale).0;
        let higher_feature_minzoom = self
            .dedup
            .higher_feature_minzoom(higher_scale, objl, self.headroom)
            .unwrap_or(native_hi + 1);

        let gap = if my_min < higher_floor {
            let mut g = feature.clone();
            g.set_tippecanoe_hint(TippecanoeHint {
                minzoom: my_min,
                maxzoom: higher_floor.saturating_sub(1),
                layer: "charts".to_string(),
            });
            Some(g)
        } else {
            None
        };

        let filler_lo = my_min.max(higher_floor);
        let filler_hi = higher_feature_minzoom.saturating_sub(1);

        match split {
            ClipSplit::EntirelyInside => {
                let filler = if filler_lo <= filler_hi {
                    let mut f = feature.clone();
                    f.set_tippecanoe_hint(TippecanoeHint { minzoom: filler_lo, maxzoom: filler_hi, layer: "charts".to_string() });
                    tracer.trace(&f, "MCOVR-CLIPPED", "entirely-inside");
                    Some(f)
                } else {
                    None
                };
                PartitionOutcome::ClippedEntirelyInside { gap, filler }
            }
            ClipSplit::Crosses { outside: outside_geom, inside: inside_geom } => {
                let mut outside = feature.clone();
                outside.geometry = outside_geom;
                outside.set_tippecanoe_hint(TippecanoeHint { minzoom: my_min, maxzoom: native_hi, layer: "charts".to_string() });
                tracer.trace(&outside, "MCOVR-TRIMMED", "partial");

                let filler = if filler_lo <= filler_hi {
                    let mut f = feature.clone();
                    f.geometry = inside_geom;
                    f.set_tippecanoe_hint(TippecanoeHint { minzoom: filler_lo, maxzoom: filler_hi, layer: "charts".to_string() });
                    Some(f)
                } else {
                    None
                };

                PartitionOutcome::ClippedPartial { outside, gap, filler }
            }
            ClipSplit::EntirelyOutside => unreachable!("handled above"),
        }
    }
}

/// Which side(s) of a higher-scale coverage mask a feature's geometry falls
/// on. Covers both polygon geometry (via `BooleanOps`) and line geometry
/// (via `geomconv::clip_lines_by_mask`, since `BooleanOps` only operates on
/// Polygon/MultiPolygon) behind one classification so the caller's gap/filler
/// logic doesn't need to know which kind it's handling.
enum ClipSplit {
    EntirelyOutside,
    EntirelyInside,
    Crosses { outside: Geometry, inside: Geometry },
}

fn split_against_mask(geometry: &Geometry, mask: &MultiPolygon<f64>) -> Option<ClipSplit> {
    if let Some(my_poly) = crate::geomconv::geometry_to_multipolygon(geometry) {
        let intersection = my_poly.intersection(mask);
        if intersection.0.is_empty() {
            return Some(ClipSplit::EntirelyOutside);
        }
        let difference = my_poly.difference(mask);
        if difference.0.is_empty() {
            return Some(ClipSplit::EntirelyInside);
        }
        return Some(ClipSplit::Crosses {
            outside: crate::geomconv::multipolygon_to_geometry(&difference),
            inside: crate::geomconv::multipolygon_to_geometry(&intersection),
        });
    }

    if let Some(my_lines) = crate::geomconv::geometry_to_multilinestring(geometry) {
        let (outside, inside) = crate::geomconv::clip_lines_by_mask(&my_lines, mask);
        return Some(match (outside.0.is_empty(), inside.0.is_empty()) {
            (true, true) => ClipSplit::EntirelyOutside,
            (true, false) => ClipSplit::EntirelyInside,
            (false, true) => ClipSplit::EntirelyOutside,
            (false, false) => ClipSplit::Crosses {
                outside: crate::geomconv::multilinestring_to_geometry(&outside),
                inside: crate::geomconv::multilinestring_to_geometry(&inside),
            },
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_scale_no_partition() {
        let slices = compute_zoom_ownership(&[1]);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0], ZoomSlice { scale: 1, minzoom: 0, maxzoom: 8 });
    }

    #[test]
    fn disjoint_ranges_split_naturally() {
        let slices = compute_zoom_ownership(&[1, 3]);
        // scale 1: 0-8, scale 3: 4-13 -> scale 3 wins the overlap 4-8
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0], ZoomSlice { scale: 1, minzoom: 0, maxzoom: 3 });
        assert_eq!(slices[1], ZoomSlice { scale: 3, minzoom: 4, maxzoom: 13 });
    }

    #[test]
    fn identical_ranges_larger_scale_wins_entirely() {
        let slices = compute_zoom_ownership(&[4, 5]);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].scale, 5);
        assert_eq!(slices[0], ZoomSlice { scale: 5, minzoom: 6, maxzoom: 15 });
    }

    fn mask_square() -> geo::MultiPolygon<f64> {
        crate::geomconv::geometry_to_multipolygon(&Geometry::Polygon {
            coordinates: vec![vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]],
        })
        .unwrap()
    }

    fn depcnt_line(coordinates: Vec<[f64; 2]>, scale_num: u8) -> Feature {
        Feature {
            type_: "Feature".into(),
            geometry: Geometry::LineString { coordinates },
            properties: serde_json::json!({"OBJL": 43, "_scaleNum": scale_num})
                .as_object()
                .unwrap()
                .clone(),
            chart_id: "c".into(),
        }
    }

    fn partitioner_with_coverage(higher_scale: u8) -> (DedupIndex, CoverageIndex) {
        let dedup = DedupIndex::default();
        let mut coverage = CoverageIndex::default();
        coverage.by_scale.insert(higher_scale, mask_square());
        (dedup, coverage)
    }

    #[test]
    fn line_geometry_entirely_outside_mask_is_single_scale_not_duplicated() {
        let (dedup, coverage) = partitioner_with_coverage(5);
        let partitioner = Partitioner { dedup: &dedup, coverage: &coverage, headroom: 2 };
        let feature = depcnt_line(vec![[5.0, 5.0], [6.0, 6.0]], 4);
        let outcome = partitioner.clip_against_higher_scale(
            feature,
            43,
            4,
            FeatureRef { chart_index: 0, feature_index: 0 },
            &Tracer::disabled(),
        );
        match outcome {
            PartitionOutcome::SingleScale { feature } => {
                let hint = feature.tippecanoe_hint().unwrap();
                assert_eq!((hint.minzoom, hint.maxzoom), (6, 15));
            }
            other => panic!("expected SingleScale for an entirely-outside-mask line, got {other:?}"),
        }
    }

    #[test]
    fn line_geometry_entirely_inside_mask_is_clipped() {
        let (dedup, coverage) = partitioner_with_coverage(5);
        let partitioner = Partitioner { dedup: &dedup, coverage: &coverage, headroom: 2 };
        let feature = depcnt_line(vec![[0.2, 0.2], [0.8, 0.8]], 4);
        let outcome = partitioner.clip_against_higher_scale(
            feature,
            43,
            4,
            FeatureRef { chart_index: 0, feature_index: 0 },
            &Tracer::disabled(),
        );
        assert!(matches!(outcome, PartitionOutcome::ClippedEntirelyInside { .. }));
    }

    #[test]
    fn line_geometry_crossing_mask_boundary_is_partially_clipped() {
        let (dedup, coverage) = partitioner_with_coverage(5);
        let partitioner = Partitioner { dedup: &dedup, coverage: &coverage, headroom: 2 };
        let feature = depcnt_line(vec![[0.5, 0.5], [1.5, 0.5]], 4);
        let outcome = partitioner.clip_against_higher_scale(
            feature,
            43,
            4,
            FeatureRef { chart_index: 0, feature_index: 0 },
            &Tracer::disabled(),
        );
        match outcome {
            PartitionOutcome::ClippedPartial { outside, .. } => {
                assert!(matches!(outside.geometry, Geometry::LineString { .. }));
            }
            other => panic!("expected ClippedPartial for a boundary-crossing line, got {other:?}"),
        }
    }

    #[test]
    fn split_against_mask_classifies_polygon_entirely_outside() {
        let outside_square = Geometry::Polygon {
            coordinates: vec![vec![[5.0, 5.0], [5.0, 6.0], [6.0, 6.0], [6.0, 5.0], [5.0, 5.0]]],
        };
        let split = split_against_mask(&outside_square, &mask_square()).unwrap();
        assert!(matches!(split, ClipSplit::EntirelyOutside));
    }
}
