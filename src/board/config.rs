//! Board configuration snapshot
//!
//! Board-wide minimums, net classes, tuning profiles and keepout regions as
//! loaded from the host's board setup. The snapshot is validated once on
//! load; everything downstream treats it as read-only.

use crate::rules::{DisallowFlags, ZoneConnection};
use crate::units::mm;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::layers::{LayerId, LayerSet};

/// Board-wide design settings (all lengths in nanometres)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignSettings {
    pub min_clearance: i32,
    pub min_track_width: i32,
    pub min_connection_width: i32,
    pub min_through_hole: i32,
    pub min_via_annular_width: i32,
    pub min_via_diameter: i32,
    pub min_microvia_diameter: i32,
    pub min_microvia_drill: i32,
    pub min_hole_to_hole: i32,
    pub min_hole_clearance: i32,
    pub copper_edge_clearance: i32,
    pub min_silk_clearance: i32,
    pub min_silk_text_height: i32,
    pub min_silk_text_thickness: i32,
    pub courtyard_clearance: i32,
    pub min_barcode_height: i32,
    pub min_resolved_spokes: i32,
    pub solder_mask_expansion: i32,
    pub solder_paste_margin: i32,
    /// Parts per million
    pub solder_paste_ratio: i32,
    pub default_zone_connection: ZoneConnection,
    pub default_thermal_gap: i32,
    pub default_thermal_spoke_width: i32,
}

impl Default for DesignSettings {
    fn default() -> Self {
        Self {
            min_clearance: 0,
            min_track_width: 0,
            min_connection_width: 0,
            min_through_hole: mm(0.3),
            min_via_annular_width: mm(0.1),
            min_via_diameter: mm(0.5),
            min_microvia_diameter: mm(0.2),
            min_microvia_drill: mm(0.1),
            min_hole_to_hole: mm(0.25),
            min_hole_clearance: mm(0.25),
            copper_edge_clearance: mm(0.5),
            min_silk_clearance: 0,
            min_silk_text_height: mm(0.8),
            min_silk_text_thickness: mm(0.08),
            courtyard_clearance: 0,
            min_barcode_height: 0,
            min_resolved_spokes: 2,
            solder_mask_expansion: 0,
            solder_paste_margin: 0,
            solder_paste_ratio: 0,
            default_zone_connection: ZoneConnection::ThermalRelief,
            default_thermal_gap: mm(0.5),
            default_thermal_spoke_width: mm(0.5),
        }
    }
}

/// Manufacturing defaults for one net class
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetclassSettings {
    pub clearance: Option<i32>,
    pub track_width: Option<i32>,
    pub via_diameter: Option<i32>,
    pub via_drill: Option<i32>,
    pub microvia_diameter: Option<i32>,
    pub microvia_drill: Option<i32>,
    pub diff_pair_width: Option<i32>,
    pub diff_pair_gap: Option<i32>,
    /// Name of the tuning profile nets in this class are routed with
    pub tuning_profile: Option<String>,
}

/// Per-layer target geometry of a tuning profile
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileLayer {
    pub layer: LayerId,
    pub width: i32,
    #[serde(default)]
    pub diff_pair_gap: Option<i32>,
}

/// Impedance/delay tuning profile
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningProfile {
    pub differential: bool,
    pub layers: Vec<ProfileLayer>,
}

/// Per-object-type permissions of a keepout region
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepoutFlags {
    pub tracks: bool,
    pub vias: bool,
    pub pads: bool,
    pub zone_fills: bool,
    pub footprints: bool,
}

impl KeepoutFlags {
    /// Disallow mask for the object types this region keeps out
    pub fn to_disallow_flags(self) -> DisallowFlags {
        let mut flags = DisallowFlags::empty();
        if self.tracks {
            flags |= DisallowFlags::TRACKS;
        }
        if self.vias {
            flags |= DisallowFlags::VIAS;
        }
        if self.pads {
            flags |= DisallowFlags::PADS;
        }
        if self.zone_fills {
            flags |= DisallowFlags::ZONES;
        }
        if self.footprints {
            flags |= DisallowFlags::FOOTPRINTS;
        }
        flags
    }
}

/// A keepout / rule area with its outline
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeepoutRegion {
    /// Stable geometry id
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub layers: LayerSet,
    /// Closed outline, nanometre coordinates
    pub outline: Vec<[i32; 2]>,
    #[serde(default)]
    pub keepout: KeepoutFlags,
}

impl KeepoutRegion {
    /// Name shown in diagnostics; falls back to the geometry id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Complete configuration snapshot consumed by a rule session
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub design: DesignSettings,
    pub netclasses: IndexMap<String, NetclassSettings>,
    pub tuning_profiles: IndexMap<String, TuningProfile>,
    pub keepouts: Vec<KeepoutRegion>,
    pub enabled_layers: LayerSet,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            design: DesignSettings::default(),
            netclasses: IndexMap::new(),
            tuning_profiles: IndexMap::new(),
            keepouts: Vec::new(),
            enabled_layers: LayerSet::all(),
        }
    }
}

impl BoardConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: BoardConfig = serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("Failed to parse board configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration document from disk
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to open file {}: {}", path.as_ref().display(), e)
        })?;
        Self::from_json_str(&text)
    }

    /// Reject settings no board could have been saved with
    pub fn validate(&self) -> anyhow::Result<()> {
        let d = &self.design;
        let lengths = [
            ("min_clearance", d.min_clearance),
            ("min_track_width", d.min_track_width),
            ("min_connection_width", d.min_connection_width),
            ("min_through_hole", d.min_through_hole),
            ("min_via_annular_width", d.min_via_annular_width),
            ("min_via_diameter", d.min_via_diameter),
            ("min_microvia_diameter", d.min_microvia_diameter),
            ("min_microvia_drill", d.min_microvia_drill),
            ("min_hole_to_hole", d.min_hole_to_hole),
            ("min_hole_clearance", d.min_hole_clearance),
            ("copper_edge_clearance", d.copper_edge_clearance),
            ("min_silk_clearance", d.min_silk_clearance),
            ("min_silk_text_height", d.min_silk_text_height),
            ("min_silk_text_thickness", d.min_silk_text_thickness),
            ("min_barcode_height", d.min_barcode_height),
            ("min_resolved_spokes", d.min_resolved_spokes),
        ];
        for (name, value) in lengths {
            anyhow::ensure!(value >= 0, "design setting '{}' is negative ({})", name, value);
        }

        for (class, settings) in &self.netclasses {
            anyhow::ensure!(!class.is_empty(), "net class with empty name");
            if let Some(clearance) = settings.clearance {
                anyhow::ensure!(
                    clearance >= 0,
                    "net class '{}' has negative clearance",
                    class
                );
            }
        }

        for region in &self.keepouts {
            anyhow::ensure!(
                region.outline.len() >= 3,
                "keepout '{}' outline needs at least 3 points",
                region.id
            );
        }
        Ok(())
    }
}
