//! The feature record: a geometry plus a dynamic property bag. Recognized
//! attributes are typed fields; everything else rides through in an opaque
//! `serde_json::Map` so unfamiliar S-57 attributes survive round-tripping to
//! the per-scale streams untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TippecanoeHint {
    pub minzoom: u8,
    pub maxzoom: u8,
    #[serde(default = "default_layer")]
    pub layer: String,
}

fn default_layer() -> String {
    "charts".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub type_: String,
    pub geometry: Geometry,
    pub properties: Map<String, Value>,
    #[serde(skip)]
    pub chart_id: String,
}

fn feature_type() -> String {
    "Feature".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
    MultiPoint { coordinates: Vec<[f64; 2]> },
    LineString { coordinates: Vec<[f64; 2]> },
    MultiLineString { coordinates: Vec<Vec<[f64; 2]>> },
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<[f64; 2]>>> },
}

impl Geometry {
    pub fn is_point(&self) -> bool {
        matches!(self, Geometry::Point { .. } | Geometry::MultiPoint { .. })
    }

    /// Every coordinate pair, flattened, in the order the geometry encodes
    /// them. Used by the dedup fingerprint for line/polygon features.
    pub fn flattened_coords(&self) -> Vec<(f64, f64)> {
        match self {
            Geometry::Point { coordinates } => vec![(coordinates[0], coordinates[1])],
            Geometry::MultiPoint { coordinates } => {
                coordinates.iter().map(|c| (c[0], c[1])).collect()
            }
            Geometry::LineString { coordinates } => {
                coordinates.iter().map(|c| (c[0], c[1])).collect()
            }
            Geometry::MultiLineString { coordinates } => coordinates
                .iter()
                .flatten()
                .map(|c| (c[0], c[1]))
                .collect(),
            Geometry::Polygon { coordinates } => coordinates
                .iter()
                .flatten()
                .map(|c| (c[0], c[1]))
                .collect(),
            Geometry::MultiPolygon { coordinates } => coordinates
                .iter()
                .flatten()
                .flatten()
                .map(|c| (c[0], c[1]))
                .collect(),
        }
    }

    pub fn point_xy(&self) -> Option<(f64, f64)> {
        match self {
            Geometry::Point { coordinates } => Some((coordinates[0], coordinates[1])),
            _ => None,
        }
    }
}

impl Feature {
    pub fn objl(&self) -> Option<i32> {
        self.properties.get("OBJL").and_then(|v| v.as_i64()).map(|v| v as i32)
    }

    pub fn scale_num(&self) -> Option<u8> {
        self.properties
            .get("_scaleNum")
            .and_then(|v| v.as_u64())
            .map(|v| v as u8)
    }

    pub fn objnam(&self) -> Option<&str> {
        self.properties.get("OBJNAM").and_then(|v| v.as_str())
    }

    pub fn scamin(&self) -> Option<f64> {
        self.properties.get("SCAMIN").and_then(|v| v.as_f64())
    }

    pub fn catcov(&self) -> Option<i64> {
        self.properties.get("CATCOV").and_then(|v| v.as_i64())
    }

    pub fn sectr(&self) -> Option<(f64, f64)> {
        let s1 = self.properties.get("SECTR1").and_then(|v| v.as_f64())?;
        let s2 = self.properties.get("SECTR2").and_then(|v| v.as_f64())?;
        Some((s1, s2))
    }

    pub fn tippecanoe_hint(&self) -> Option<TippecanoeHint> {
        let v = self.properties.get("tippecanoe")?;
        serde_json::from_value(v.clone()).ok()
    }

    pub fn set_tippecanoe_hint(&mut self, hint: TippecanoeHint) {
        self.properties.insert(
            "tippecanoe".to_string(),
            serde_json::to_value(hint).expect("hint serializes"),
        );
    }

    pub fn strip_bookkeeping_fields(&mut self) {
        for key in ["RCID", "PRIM", "GRUP", "SORDAT", "SORIND", "CHART_ID", "OBJL_NAME"] {
            self.properties.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(properties: serde_json::Value) -> Feature {
        Feature {
            type_: "Feature".into(),
            geometry: Geometry::Point { coordinates: [0.0, 0.0] },
            properties: properties.as_object().unwrap().clone(),
            chart_id: "c".into(),
        }
    }

    #[test]
    fn recognized_accessors_read_through_the_opaque_bag() {
        let f = feature(json!({
            "OBJL": 75, "_scaleNum": 4, "SCAMIN": 22000.0, "OBJNAM": "Light-A",
            "SECTR1": 10.0, "SECTR2": 90.0, "CATCOV": 1,
        }));
        assert_eq!(f.objl(), Some(75));
        assert_eq!(f.scale_num(), Some(4));
        assert_eq!(f.scamin(), Some(22000.0));
        assert_eq!(f.objnam(), Some("Light-A"));
        assert_eq!(f.sectr(), Some((10.0, 90.0)));
        assert_eq!(f.catcov(), Some(1));
    }

    #[test]
    fn missing_optional_fields_are_none() {
        let f = feature(json!({"OBJL": 71, "_scaleNum": 2}));
        assert_eq!(f.scamin(), None);
        assert_eq!(f.objnam(), None);
        assert_eq!(f.sectr(), None);
    }

    #[test]
    fn strip_bookkeeping_fields_removes_only_the_listed_keys() {
        let mut f = feature(json!({"OBJL": 71, "_scaleNum": 2, "RCID": 1, "OBJNAM": "Keep Me"}));
        f.strip_bookkeeping_fields();
        assert!(f.properties.get("RCID").is_none());
        assert_eq!(f.objnam(), Some("Keep Me"));
    }

    #[test]
    fn tippecanoe_hint_round_trips() {
        let mut f = feature(json!({"OBJL": 71, "_scaleNum": 2}));
        f.set_tippecanoe_hint(TippecanoeHint { minzoom: 3, maxzoom: 9, layer: "charts".into() });
        let hint = f.tippecanoe_hint().unwrap();
        assert_eq!((hint.minzoom, hint.maxzoom, hint.layer.as_str()), (3, 9, "charts"));
    }
}
