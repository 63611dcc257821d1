//! Derivation rule registry
//!
//! Named, versioned pure classification rules applied by the staging loader:
//! bedroom-count estimation from floor area, floor-level banding from the
//! floor-range string, market-region lookup from postal district, and tenure
//! classification from free-text tenure. The registry is constructed
//! explicitly at pipeline startup and passed into the run; `rules_version` is
//! a content hash over the rule tables, computed once at construction so the
//! batch audit record pins the exact rules a run used.

use caveat_common::hash::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Market region implied by postal district
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Region {
    /// Core Central Region
    CCR,
    /// Rest of Central Region
    RCR,
    /// Outside Central Region
    OCR,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Region::CCR => "CCR",
            Region::RCR => "RCR",
            Region::OCR => "OCR",
        }
    }

    /// Parse a declared market-segment value, tolerant of case
    pub fn parse(value: &str) -> Option<Region> {
        match value.trim().to_uppercase().as_str() {
            "CCR" => Some(Region::CCR),
            "RCR" => Some(Region::RCR),
            "OCR" => Some(Region::OCR),
            _ => None,
        }
    }
}

/// Floor-level band derived from the floor-range string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloorLevel {
    /// Basement or landed ("B1-B5", "-", "G")
    Ground,
    Low,
    Mid,
    High,
}

impl FloorLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            FloorLevel::Ground => "ground",
            FloorLevel::Low => "low",
            FloorLevel::Mid => "mid",
            FloorLevel::High => "high",
        }
    }
}

/// Tenure class derived from free-text tenure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenureClass {
    Freehold,
    Lease99,
    Lease999,
    Other,
}

impl TenureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            TenureClass::Freehold => "freehold",
            TenureClass::Lease99 => "99-year",
            TenureClass::Lease999 => "999-year",
            TenureClass::Other => "other",
        }
    }
}

/// Versioned registry of derivation rules
///
/// All rules are pure functions over their inputs. The registry owns its rule
/// tables so the version hash covers exactly what the run will execute.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    /// (exclusive upper area bound in sqft, estimated bedroom count), ascending
    bedroom_bands: Vec<(f64, u32)>,
    /// Bedroom count for areas above the last band
    bedroom_max: u32,
    /// Highest starting floor still classified as a low floor
    low_floor_max: u32,
    /// Highest starting floor still classified as a mid floor
    mid_floor_max: u32,
    ccr_districts: BTreeSet<u8>,
    rcr_districts: BTreeSet<u8>,
    rules_version: String,
}

impl RuleRegistry {
    /// Construct the standard rule tables and compute their version hash
    pub fn standard() -> Self {
        let mut registry = Self {
            bedroom_bands: vec![(550.0, 1), (800.0, 2), (1100.0, 3), (1500.0, 4)],
            bedroom_max: 5,
            low_floor_max: 5,
            mid_floor_max: 15,
            ccr_districts: [1, 2, 6, 9, 10, 11].into_iter().collect(),
            rcr_districts: [3, 4, 5, 7, 8, 12, 13, 14, 15, 20].into_iter().collect(),
            rules_version: String::new(),
        };
        registry.rules_version = registry.compute_version();
        registry
    }

    /// Content hash over the rule tables
    fn compute_version(&self) -> String {
        let mut canonical = String::from("bedroom=");
        for (bound, count) in &self.bedroom_bands {
            canonical.push_str(&format!("{:.0}:{};", bound, count));
        }
        canonical.push_str(&format!("max:{}\n", self.bedroom_max));
        canonical.push_str(&format!(
            "floor=low<={};mid<={}\n",
            self.low_floor_max, self.mid_floor_max
        ));
        let ccr: Vec<String> = self.ccr_districts.iter().map(|d| d.to_string()).collect();
        let rcr: Vec<String> = self.rcr_districts.iter().map(|d| d.to_string()).collect();
        canonical.push_str(&format!("region=ccr:{};rcr:{}\n", ccr.join(","), rcr.join(",")));
        canonical.push_str("tenure=freehold|999|99\n");
        sha256_hex(canonical.as_bytes())
    }

    /// Version identifier carried on the batch audit record
    pub fn rules_version(&self) -> &str {
        &self.rules_version
    }

    /// Estimate bedroom count from floor area
    pub fn classify_bedrooms(&self, area_sqft: f64) -> u32 {
        for (bound, count) in &self.bedroom_bands {
            if area_sqft < *bound {
                return *count;
            }
        }
        self.bedroom_max
    }

    /// Band a floor-range string ("06-10", "B1-B5", "-") into a floor level
    ///
    /// Returns `None` when the string carries no usable floor information.
    pub fn classify_floor_level(&self, floor_range: &str) -> Option<FloorLevel> {
        let trimmed = floor_range.trim();
        if trimmed.is_empty() {
            return None;
        }
        // Basement ranges and landed-property markers sit below floor 1
        if trimmed == "-" || trimmed.eq_ignore_ascii_case("G") || trimmed.starts_with('B') {
            return Some(FloorLevel::Ground);
        }

        let start = trimmed
            .split(['-', ' '])
            .next()
            .and_then(|s| s.trim().parse::<u32>().ok())?;

        Some(if start <= self.low_floor_max {
            FloorLevel::Low
        } else if start <= self.mid_floor_max {
            FloorLevel::Mid
        } else {
            FloorLevel::High
        })
    }

    /// Market region implied by a postal district (1-28)
    pub fn region_for_district(&self, district: u8) -> Region {
        if self.ccr_districts.contains(&district) {
            Region::CCR
        } else if self.rcr_districts.contains(&district) {
            Region::RCR
        } else {
            Region::OCR
        }
    }

    /// Classify free-text tenure ("Freehold", "99 yrs lease commencing from 2015")
    pub fn classify_tenure(&self, tenure: &str) -> TenureClass {
        let lower = tenure.trim().to_lowercase();
        if lower.is_empty() {
            return TenureClass::Other;
        }
        if lower.contains("free") {
            TenureClass::Freehold
        } else if lower.contains("999") {
            TenureClass::Lease999
        } else if lower.contains("99") {
            TenureClass::Lease99
        } else {
            TenureClass::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rules_version_is_deterministic() {
        assert_eq!(
            RuleRegistry::standard().rules_version(),
            RuleRegistry::standard().rules_version()
        );
        assert_eq!(RuleRegistry::standard().rules_version().len(), 64);
    }

    #[test]
    fn bedroom_bands_cover_the_area_range() {
        let rules = RuleRegistry::standard();
        assert_eq!(rules.classify_bedrooms(400.0), 1);
        assert_eq!(rules.classify_bedrooms(550.0), 2);
        assert_eq!(rules.classify_bedrooms(799.9), 2);
        assert_eq!(rules.classify_bedrooms(1000.0), 3);
        assert_eq!(rules.classify_bedrooms(1400.0), 4);
        assert_eq!(rules.classify_bedrooms(3000.0), 5);
    }

    #[test]
    fn floor_ranges_band_by_starting_floor() {
        let rules = RuleRegistry::standard();
        assert_eq!(rules.classify_floor_level("01-05"), Some(FloorLevel::Low));
        assert_eq!(rules.classify_floor_level("06-10"), Some(FloorLevel::Mid));
        assert_eq!(rules.classify_floor_level("16-20"), Some(FloorLevel::High));
        assert_eq!(rules.classify_floor_level("B1-B5"), Some(FloorLevel::Ground));
        assert_eq!(rules.classify_floor_level("-"), Some(FloorLevel::Ground));
        assert_eq!(rules.classify_floor_level(""), None);
        assert_eq!(rules.classify_floor_level("penthouse"), None);
    }

    #[test]
    fn districts_map_to_market_regions() {
        let rules = RuleRegistry::standard();
        assert_eq!(rules.region_for_district(9), Region::CCR);
        assert_eq!(rules.region_for_district(15), Region::RCR);
        assert_eq!(rules.region_for_district(23), Region::OCR);
    }

    #[test]
    fn tenure_text_classifies() {
        let rules = RuleRegistry::standard();
        assert_eq!(rules.classify_tenure("Freehold"), TenureClass::Freehold);
        assert_eq!(
            rules.classify_tenure("99 yrs lease commencing from 2015"),
            TenureClass::Lease99
        );
        assert_eq!(
            rules.classify_tenure("999 yrs from 1885"),
            TenureClass::Lease999
        );
        assert_eq!(rules.classify_tenure("NA"), TenureClass::Other);
    }
}
