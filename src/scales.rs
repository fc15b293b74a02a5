//! Scale-band constants: native zoom ranges, the dedup OBJL set, and the
//! skin-of-earth exemption set. Values carried verbatim from the production
//! chart-compile pipeline this crate replaces.

/// Native (minzoom, maxzoom) for each S-57 scale band 1..=6.
pub fn native_zoom_range(scale_num: u8) -> (u8, u8) {
    match scale_num {
        1 => (0, 8),
        2 => (0, 10),
        3 => (4, 13),
        4 => (6, 15),
        5 => (6, 15),
        6 => (6, 15),
        other => panic!("scale_num out of range 1..=6: {other}"),
    }
}

pub const MIN_SCALE: u8 = 1;
pub const MAX_SCALE: u8 = 6;
pub const MAX_ZOOM: u8 = 15;
pub const HIGH_ZOOM_SPLIT: u8 = 14;

/// OBJL=75, LIGHTS.
pub const OBJL_LIGHTS: i32 = 75;
/// OBJL=302, M_COVR.
pub const OBJL_MCOVR: i32 = 302;
/// OBJL=129, SOUNDG.
pub const OBJL_SOUNDG: i32 = 129;

/// "Skin of earth" object classes: never suppressed by SCAMIN, regardless of
/// the SCAMIN value carried on the feature. These define the fundamental
/// land/water boundary and must always render at their scale's native floor.
pub const SKIN_OF_EARTH_OBJL: [i32; 5] = [
    30, // COALNE
    42, // DEPARE
    43, // DEPCNT
    69, // LAKARE
    71, // LNDARE
];

pub fn is_skin_of_earth(objl: i32) -> bool {
    SKIN_OF_EARTH_OBJL.contains(&objl)
}

/// Object classes that participate in cross-scale deduplication, split into
/// the three categories used for dedup-tally logging. Every other OBJL is
/// pass-through: never deduplicated, never dropped for being a duplicate.
pub const PHYSICAL_OBJECTS_OBJL: &[i32] = &[
    75, // LIGHTS
    17, 14, 18, 19, 16, // BOYLAT, BOYCAR, BOYSAW, BOYSPP, BOYISD
    7, 9, 5, 6, 8, // BCNLAT, BCNSPP, BCNCAR, BCNISD, BCNSAW
    74, // LNDMRK
    159, // WRECKS
    153, // UWTROC
    86, // OBSTRN
    90, // PILPNT
    58, // FOGSIG
    111, // RSCSTA
    39, // DAYMAR
    65, // HULKES
    95, // PONTON
    84, // MORFAC
    11, 21, 22, 94, 122, 26, // BRIDGE, CBLOHD, CBLSUB, PIPSOL, SLCONS, CAUSWY
];

pub const REGULATORY_ZONES_OBJL: &[i32] = &[
    112, // RESARE
    27, // CTNARE
    83, // MIPARE
    4, 3, // ACHARE, ACHBRT
    82, // MARCUL
    20, // CBLARE
    92, // PIPARE
    51, // FAIRWY
    109, // RECTRC
    145, // TSELNE
    148, // TSSLPT
    85, // NAVLNE
    46, // DRGARE
];

pub const HYDROGRAPHIC_OBJL: &[i32] = &[
    43, // DEPCNT
    42, // DEPARE
    30, // COALNE
    71, // LNDARE
    129, // SOUNDG
];

pub fn dedup_category(objl: i32) -> Option<&'static str> {
    if PHYSICAL_OBJECTS_OBJL.contains(&objl) {
        Some("physicalObjects")
    } else if REGULATORY_ZONES_OBJL.contains(&objl) {
        Some("regulatoryZones")
    } else if HYDROGRAPHIC_OBJL.contains(&objl) {
        Some("hydrographicFeatures")
    } else {
        None
    }
}

pub fn is_dedup_candidate(objl: i32) -> bool {
    dedup_category(objl).is_some()
}

/// scamin -> minzoom, per the client-side rendering-threshold formula.
/// `headroom` is the configurable `SCAMIN_HEADROOM` constant (default 2).
/// The whole expression is rounded once, last, not just the log2 term.
pub fn scamin_to_minzoom(scamin: f64, headroom: i32) -> u8 {
    if scamin <= 0.0 {
        return 0;
    }
    let z = (28.0 - headroom as f64 - scamin.log2()).round() as i32;
    z.clamp(0, MAX_ZOOM as i32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_ranges_increase_in_detail() {
        assert_eq!(native_zoom_range(1), (0, 8));
        assert_eq!(native_zoom_range(4), (6, 15));
    }

    #[test]
    fn skin_of_earth_membership() {
        assert!(is_skin_of_earth(71));
        assert!(!is_skin_of_earth(75));
    }

    #[test]
    fn scamin_zero_falls_back_to_floor() {
        assert_eq!(scamin_to_minzoom(0.0, 2), 0);
    }

    #[test]
    fn scamin_formula_matches_known_value() {
        // SCAMIN=40000, headroom=2 => round(28-2-log2(40000)) = round(10.71) = 11
        assert_eq!(scamin_to_minzoom(40000.0, 2), 11);
        // SCAMIN=25000, headroom=2 => round(28-2-log2(25000)) = round(11.39) = 11
        assert_eq!(scamin_to_minzoom(25000.0, 2), 11);
    }

    #[test]
    fn dedup_categories_are_disjoint() {
        for &objl in PHYSICAL_OBJECTS_OBJL {
            assert!(!REGULATORY_ZONES_OBJL.contains(&objl));
        }
    }
}
