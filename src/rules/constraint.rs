//! Constraint model
//!
//! A constraint is a category tag plus a value with independently optional
//! min/opt/max fields and a few category-specific side fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Closed set of constraint categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Clearance,
    HoleClearance,
    HoleToHole,
    EdgeClearance,
    PhysicalClearance,
    CourtyardClearance,
    SilkClearance,
    TrackWidth,
    AnnularWidth,
    ViaDiameter,
    HoleSize,
    TextHeight,
    TextThickness,
    DiffPairGap,
    ConnectionWidth,
    ZoneConnection,
    ThermalReliefGap,
    ThermalSpokeWidth,
    SolderMaskExpansion,
    SolderPasteAbsMargin,
    SolderPasteRelMargin,
    MinResolvedSpokes,
    Disallow,
    Assertion,
    Creepage,
    MaxUncoupledLength,
    Skew,
    /// No constraint configured
    None,
}

/// How a category's numeric value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueUnit {
    /// Nanometres
    Length,
    Count,
    /// Parts per million
    Ratio,
    /// Category carries no numeric value
    NoValue,
}

impl ConstraintKind {
    pub const ALL: [ConstraintKind; 28] = [
        ConstraintKind::Clearance,
        ConstraintKind::HoleClearance,
        ConstraintKind::HoleToHole,
        ConstraintKind::EdgeClearance,
        ConstraintKind::PhysicalClearance,
        ConstraintKind::CourtyardClearance,
        ConstraintKind::SilkClearance,
        ConstraintKind::TrackWidth,
        ConstraintKind::AnnularWidth,
        ConstraintKind::ViaDiameter,
        ConstraintKind::HoleSize,
        ConstraintKind::TextHeight,
        ConstraintKind::TextThickness,
        ConstraintKind::DiffPairGap,
        ConstraintKind::ConnectionWidth,
        ConstraintKind::ZoneConnection,
        ConstraintKind::ThermalReliefGap,
        ConstraintKind::ThermalSpokeWidth,
        ConstraintKind::SolderMaskExpansion,
        ConstraintKind::SolderPasteAbsMargin,
        ConstraintKind::SolderPasteRelMargin,
        ConstraintKind::MinResolvedSpokes,
        ConstraintKind::Disallow,
        ConstraintKind::Assertion,
        ConstraintKind::Creepage,
        ConstraintKind::MaxUncoupledLength,
        ConstraintKind::Skew,
        ConstraintKind::None,
    ];

    /// Name used in rule documents and diagnostics
    pub fn name(self) -> &'static str {
        match self {
            ConstraintKind::Clearance => "clearance",
            ConstraintKind::HoleClearance => "hole_clearance",
            ConstraintKind::HoleToHole => "hole_to_hole",
            ConstraintKind::EdgeClearance => "edge_clearance",
            ConstraintKind::PhysicalClearance => "physical_clearance",
            ConstraintKind::CourtyardClearance => "courtyard_clearance",
            ConstraintKind::SilkClearance => "silk_clearance",
            ConstraintKind::TrackWidth => "track_width",
            ConstraintKind::AnnularWidth => "annular_width",
            ConstraintKind::ViaDiameter => "via_diameter",
            ConstraintKind::HoleSize => "hole_size",
            ConstraintKind::TextHeight => "text_height",
            ConstraintKind::TextThickness => "text_thickness",
            ConstraintKind::DiffPairGap => "diff_pair_gap",
            ConstraintKind::ConnectionWidth => "connection_width",
            ConstraintKind::ZoneConnection => "zone_connection",
            ConstraintKind::ThermalReliefGap => "thermal_relief_gap",
            ConstraintKind::ThermalSpokeWidth => "thermal_spoke_width",
            ConstraintKind::SolderMaskExpansion => "solder_mask_expansion",
            ConstraintKind::SolderPasteAbsMargin => "solder_paste_abs_margin",
            ConstraintKind::SolderPasteRelMargin => "solder_paste_rel_margin",
            ConstraintKind::MinResolvedSpokes => "min_resolved_spokes",
            ConstraintKind::Disallow => "disallow",
            ConstraintKind::Assertion => "assertion",
            ConstraintKind::Creepage => "creepage",
            ConstraintKind::MaxUncoupledLength => "max_uncoupled_length",
            ConstraintKind::Skew => "skew",
            ConstraintKind::None => "none",
        }
    }

    pub fn from_name(name: &str) -> Option<ConstraintKind> {
        ConstraintKind::ALL
            .iter()
            .copied()
            .find(|k| k.name().eq_ignore_ascii_case(name))
    }

    pub fn unit(self) -> ValueUnit {
        match self {
            ConstraintKind::MinResolvedSpokes => ValueUnit::Count,
            ConstraintKind::SolderPasteRelMargin => ValueUnit::Ratio,
            ConstraintKind::ZoneConnection
            | ConstraintKind::Disallow
            | ConstraintKind::Assertion
            | ConstraintKind::None => ValueUnit::NoValue,
            _ => ValueUnit::Length,
        }
    }

    /// Categories whose pad-level queries fall back to the parent footprint
    pub fn inherits_from_footprint(self) -> bool {
        matches!(
            self,
            ConstraintKind::ZoneConnection
                | ConstraintKind::ThermalReliefGap
                | ConstraintKind::ThermalSpokeWidth
                | ConstraintKind::SolderMaskExpansion
                | ConstraintKind::SolderPasteAbsMargin
                | ConstraintKind::SolderPasteRelMargin
        )
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value with independently optional min/opt/max
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinOptMax {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opt: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,
}

impl MinOptMax {
    pub fn is_null(&self) -> bool {
        self.min.is_none() && self.opt.is_none() && self.max.is_none()
    }

    /// Overwrite every field `other` sets
    pub fn overlay(&mut self, other: &MinOptMax) {
        if other.min.is_some() {
            self.min = other.min;
        }
        if other.opt.is_some() {
            self.opt = other.opt;
        }
        if other.max.is_some() {
            self.max = other.max;
        }
    }

    /// Take fields from `other` only where this value has none; returns whether anything changed
    pub fn fill_unset(&mut self, other: &MinOptMax) -> bool {
        let mut changed = false;
        if self.min.is_none() && other.min.is_some() {
            self.min = other.min;
            changed = true;
        }
        if self.opt.is_none() && other.opt.is_some() {
            self.opt = other.opt;
            changed = true;
        }
        if self.max.is_none() && other.max.is_some() {
            self.max = other.max;
            changed = true;
        }
        changed
    }
}

/// How a pad connects to a surrounding zone of the same net
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneConnection {
    Full,
    ThermalRelief,
    /// Thermal reliefs for through-hole pads only
    ThtThermal,
    None,
}

impl ZoneConnection {
    pub fn name(self) -> &'static str {
        match self {
            ZoneConnection::Full => "solid",
            ZoneConnection::ThermalRelief => "thermal reliefs",
            ZoneConnection::ThtThermal => "thermal reliefs for PTH",
            ZoneConnection::None => "none",
        }
    }
}

/// Bit mask of object types a `disallow` constraint forbids
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisallowFlags(u32);

impl DisallowFlags {
    pub const THROUGH_VIAS: DisallowFlags = DisallowFlags(1 << 0);
    pub const MICRO_VIAS: DisallowFlags = DisallowFlags(1 << 1);
    pub const BLIND_VIAS: DisallowFlags = DisallowFlags(1 << 2);
    pub const VIAS: DisallowFlags = DisallowFlags(0b111);
    pub const TRACKS: DisallowFlags = DisallowFlags(1 << 3);
    pub const PADS: DisallowFlags = DisallowFlags(1 << 4);
    pub const ZONES: DisallowFlags = DisallowFlags(1 << 5);
    pub const TEXTS: DisallowFlags = DisallowFlags(1 << 6);
    pub const GRAPHICS: DisallowFlags = DisallowFlags(1 << 7);
    pub const HOLES: DisallowFlags = DisallowFlags(1 << 8);
    pub const FOOTPRINTS: DisallowFlags = DisallowFlags(1 << 9);

    const NAMES: &'static [(&'static str, DisallowFlags)] = &[
        ("through_via", DisallowFlags::THROUGH_VIAS),
        ("micro_via", DisallowFlags::MICRO_VIAS),
        ("buried_via", DisallowFlags::BLIND_VIAS),
        ("via", DisallowFlags::VIAS),
        ("track", DisallowFlags::TRACKS),
        ("pad", DisallowFlags::PADS),
        ("zone", DisallowFlags::ZONES),
        ("text", DisallowFlags::TEXTS),
        ("graphic", DisallowFlags::GRAPHICS),
        ("hole", DisallowFlags::HOLES),
        ("footprint", DisallowFlags::FOOTPRINTS),
    ];

    pub const fn empty() -> Self {
        DisallowFlags(0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        DisallowFlags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: DisallowFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn from_name(name: &str) -> Option<DisallowFlags> {
        DisallowFlags::NAMES
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, f)| *f)
    }
}

impl BitOr for DisallowFlags {
    type Output = DisallowFlags;
    fn bitor(self, rhs: DisallowFlags) -> DisallowFlags {
        DisallowFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for DisallowFlags {
    fn bitor_assign(&mut self, rhs: DisallowFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for DisallowFlags {
    type Output = DisallowFlags;
    fn bitand(self, rhs: DisallowFlags) -> DisallowFlags {
        DisallowFlags(self.0 & rhs.0)
    }
}

impl fmt::Debug for DisallowFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = DisallowFlags::NAMES
            .iter()
            .filter(|(_, flag)| flag.0.count_ones() == 1 && self.contains(*flag))
            .map(|(n, _)| *n)
            .collect();
        write!(f, "DisallowFlags({})", names.join(" | "))
    }
}

/// A single requirement of one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub kind: ConstraintKind,
    #[serde(default)]
    pub value: MinOptMax,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_connection: Option<ZoneConnection>,
    #[serde(default, skip_serializing_if = "DisallowFlags::is_empty")]
    pub disallow: DisallowFlags,
    /// Test expression of an assertion constraint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<String>,
}

impl Constraint {
    pub fn new(kind: ConstraintKind) -> Self {
        Self {
            kind,
            value: MinOptMax::default(),
            zone_connection: None,
            disallow: DisallowFlags::empty(),
            assertion: None,
        }
    }

    /// The "no constraint configured" result
    pub fn null() -> Self {
        Self::new(ConstraintKind::None)
    }

    pub fn min(kind: ConstraintKind, value: i32) -> Self {
        Self::new(kind).with_min(value)
    }

    pub fn opt(kind: ConstraintKind, value: i32) -> Self {
        Self::new(kind).with_opt(value)
    }

    /// min, opt and max all pinned to one value
    pub fn exact(kind: ConstraintKind, value: i32) -> Self {
        Self::new(kind).with_min(value).with_opt(value).with_max(value)
    }

    pub fn zone_connection(connection: ZoneConnection) -> Self {
        Self {
            zone_connection: Some(connection),
            ..Self::new(ConstraintKind::ZoneConnection)
        }
    }

    pub fn disallow(flags: DisallowFlags) -> Self {
        Self {
            disallow: flags,
            ..Self::new(ConstraintKind::Disallow)
        }
    }

    pub fn assertion(test: &str) -> Self {
        Self {
            assertion: Some(test.to_string()),
            ..Self::new(ConstraintKind::Assertion)
        }
    }

    pub fn with_min(mut self, value: i32) -> Self {
        self.value.min = Some(value);
        self
    }

    pub fn with_opt(mut self, value: i32) -> Self {
        self.value.opt = Some(value);
        self
    }

    pub fn with_max(mut self, value: i32) -> Self {
        self.value.max = Some(value);
        self
    }

    /// A constraint with no field set never overrides a resolved one
    pub fn is_null(&self) -> bool {
        self.kind == ConstraintKind::None
            || (self.value.is_null()
                && self.zone_connection.is_none()
                && self.disallow.is_empty()
                && self.assertion.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in ConstraintKind::ALL {
            assert_eq!(ConstraintKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ConstraintKind::from_name("bogus"), None);
    }

    #[test]
    fn test_null_constraint() {
        assert!(Constraint::null().is_null());
        assert!(Constraint::new(ConstraintKind::Clearance).is_null());
        assert!(!Constraint::min(ConstraintKind::Clearance, 0).is_null());
        assert!(!Constraint::zone_connection(ZoneConnection::Full).is_null());
    }

    #[test]
    fn test_overlay_and_fill() {
        let mut value = MinOptMax {
            min: Some(100),
            opt: None,
            max: None,
        };
        value.overlay(&MinOptMax {
            min: None,
            opt: Some(200),
            max: None,
        });
        assert_eq!(value.min, Some(100));
        assert_eq!(value.opt, Some(200));

        let changed = value.fill_unset(&MinOptMax {
            min: Some(50),
            opt: Some(50),
            max: Some(500),
        });
        assert!(changed);
        assert_eq!(value.min, Some(100));
        assert_eq!(value.opt, Some(200));
        assert_eq!(value.max, Some(500));
    }

    #[test]
    fn test_disallow_names() {
        assert_eq!(DisallowFlags::from_name("via"), Some(DisallowFlags::VIAS));
        assert!(DisallowFlags::VIAS.contains(DisallowFlags::MICRO_VIAS));
        let masked = DisallowFlags::VIAS & DisallowFlags::TRACKS;
        assert!(masked.is_empty());
    }
}
