//! Board items as seen by the rule engine
//!
//! The host board model is reduced to the attributes rule conditions and
//! resolution stages actually read: kind, layers, net membership, footprint
//! parentage and per-item overrides.

use crate::rules::{DisallowFlags, ZoneConnection};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::layers::{LayerId, LayerSet};

/// Net class assigned to connectable items that don't name one
pub const DEFAULT_NETCLASS: &str = "Default";

/// Stable identity of a board item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Via construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViaType {
    Through,
    BlindBuried,
    Micro,
}

/// Pad construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadType {
    Smd,
    ThroughHole,
    NptHole,
}

/// Closed set of item kinds the engine distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Track,
    Arc,
    Via(ViaType),
    Pad(PadType),
    Zone,
    /// Keepout / rule area zone
    RuleArea,
    Footprint,
    Text,
    Graphic,
    Barcode,
}

impl ItemKind {
    /// Items that can belong to a net
    pub fn is_connectable(self) -> bool {
        matches!(
            self,
            ItemKind::Track | ItemKind::Arc | ItemKind::Via(_) | ItemKind::Pad(_) | ItemKind::Zone
        )
    }

    /// Items with a drilled hole
    pub fn has_hole(self) -> bool {
        matches!(
            self,
            ItemKind::Via(_) | ItemKind::Pad(PadType::ThroughHole) | ItemKind::Pad(PadType::NptHole)
        )
    }

    /// Value of the `Type` property in rule conditions
    pub fn type_name(self) -> &'static str {
        match self {
            ItemKind::Track => "Track",
            ItemKind::Arc => "Arc",
            ItemKind::Via(_) => "Via",
            ItemKind::Pad(_) => "Pad",
            ItemKind::Zone => "Zone",
            ItemKind::RuleArea => "Rule Area",
            ItemKind::Footprint => "Footprint",
            ItemKind::Text => "Text",
            ItemKind::Graphic => "Graphic",
            ItemKind::Barcode => "Barcode",
        }
    }

    /// Value of the `Via_Type` property in rule conditions
    pub fn via_type_name(self) -> Option<&'static str> {
        match self {
            ItemKind::Via(ViaType::Through) => Some("Through"),
            ItemKind::Via(ViaType::BlindBuried) => Some("Blind/buried"),
            ItemKind::Via(ViaType::Micro) => Some("Micro"),
            _ => None,
        }
    }

    /// Value of the `Pad_Type` property in rule conditions
    pub fn pad_type_name(self) -> Option<&'static str> {
        match self {
            ItemKind::Pad(PadType::Smd) => Some("SMD"),
            ItemKind::Pad(PadType::ThroughHole) => Some("Through-hole"),
            ItemKind::Pad(PadType::NptHole) => Some("NPTH, mechanical"),
            _ => None,
        }
    }
}

/// Disallow bit for an item kind
///
/// A keepout or `disallow` rule written for one kind must never match
/// another, so every kind maps to exactly one bit.
pub fn disallow_mask_for(kind: ItemKind) -> DisallowFlags {
    match kind {
        ItemKind::Track | ItemKind::Arc => DisallowFlags::TRACKS,
        ItemKind::Via(ViaType::Through) => DisallowFlags::THROUGH_VIAS,
        ItemKind::Via(ViaType::BlindBuried) => DisallowFlags::BLIND_VIAS,
        ItemKind::Via(ViaType::Micro) => DisallowFlags::MICRO_VIAS,
        ItemKind::Pad(PadType::NptHole) => DisallowFlags::HOLES,
        ItemKind::Pad(_) => DisallowFlags::PADS,
        ItemKind::Zone => DisallowFlags::ZONES,
        ItemKind::RuleArea => DisallowFlags::empty(),
        ItemKind::Footprint => DisallowFlags::FOOTPRINTS,
        ItemKind::Text | ItemKind::Barcode => DisallowFlags::TEXTS,
        ItemKind::Graphic => DisallowFlags::GRAPHICS,
    }
}

/// Per-item overrides that bypass the rule set
///
/// Zones use the zone-connection and thermal fields for their own pad
/// connection settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalOverrides {
    pub clearance: Option<i32>,
    pub zone_connection: Option<ZoneConnection>,
    pub thermal_gap: Option<i32>,
    pub thermal_spoke_width: Option<i32>,
    pub solder_mask_expansion: Option<i32>,
    pub solder_paste_margin: Option<i32>,
    /// Parts per million
    pub solder_paste_ratio: Option<i32>,
}

impl LocalOverrides {
    pub fn is_empty(&self) -> bool {
        *self == LocalOverrides::default()
    }
}

/// A physical item on the board
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardItem {
    pub id: ItemId,
    pub kind: ItemKind,
    #[serde(default)]
    pub layers: LayerSet,
    #[serde(default)]
    pub net: Option<String>,
    #[serde(default)]
    pub netclass: Option<String>,
    /// Base name of the differential pair this item's net belongs to
    #[serde(default)]
    pub diff_pair: Option<String>,
    /// [min_x, min_y, max_x, max_y] in nanometres
    #[serde(default)]
    pub bounds: [i32; 4],
    #[serde(default)]
    pub pad_number: Option<String>,
    /// Footprint reference designator (set on footprints)
    #[serde(default)]
    pub reference: Option<String>,
    /// Groups of pad numbers tied together (set on net-tie footprints)
    #[serde(default)]
    pub net_tie_groups: Vec<Vec<String>>,
    #[serde(default)]
    pub overrides: LocalOverrides,
    #[serde(default)]
    pub parent: Option<Arc<BoardItem>>,
}

impl BoardItem {
    pub fn new(id: u64, kind: ItemKind) -> Self {
        Self {
            id: ItemId(id),
            kind,
            layers: LayerSet::empty(),
            net: None,
            netclass: None,
            diff_pair: None,
            bounds: [0; 4],
            pad_number: None,
            reference: None,
            net_tie_groups: Vec::new(),
            overrides: LocalOverrides::default(),
            parent: None,
        }
    }

    pub fn on_layers(mut self, layers: LayerSet) -> Self {
        self.layers = layers;
        self
    }

    pub fn on_layer(self, layer: LayerId) -> Self {
        self.on_layers(LayerSet::single(layer))
    }

    pub fn with_net(mut self, net: &str, netclass: &str) -> Self {
        self.net = Some(net.to_string());
        self.netclass = Some(netclass.to_string());
        self
    }

    pub fn with_diff_pair(mut self, pair: &str) -> Self {
        self.diff_pair = Some(pair.to_string());
        self
    }

    pub fn with_bounds(mut self, bounds: [i32; 4]) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_pad_number(mut self, number: &str) -> Self {
        self.pad_number = Some(number.to_string());
        self
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }

    pub fn with_net_ties(mut self, groups: Vec<Vec<String>>) -> Self {
        self.net_tie_groups = groups;
        self
    }

    pub fn with_overrides(mut self, overrides: LocalOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_parent(mut self, parent: Arc<BoardItem>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Check if the item belongs to a real net
    pub fn is_connected(&self) -> bool {
        self.kind.is_connectable() && self.net.as_deref().is_some_and(|n| !n.is_empty())
    }

    /// Net class used by rule conditions; connectable items fall back to `Default`
    pub fn effective_netclass(&self) -> Option<&str> {
        if !self.kind.is_connectable() {
            return None;
        }
        Some(
            self.netclass
                .as_deref()
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_NETCLASS),
        )
    }

    /// Items that never take part in copper clearance
    pub fn is_non_copper(&self) -> bool {
        self.kind == ItemKind::RuleArea || !self.layers.has_copper()
    }

    pub fn is_on_layer(&self, layer: LayerId) -> bool {
        self.layers.contains(layer)
    }

    pub fn has_hole(&self) -> bool {
        self.kind.has_hole()
    }

    pub fn parent_footprint(&self) -> Option<&BoardItem> {
        self.parent
            .as_deref()
            .filter(|p| p.kind == ItemKind::Footprint)
    }

    /// Reference of the owning footprint, or this item's own reference
    pub fn footprint_reference(&self) -> Option<&str> {
        match self.kind {
            ItemKind::Footprint => self.reference.as_deref(),
            _ => self.parent_footprint().and_then(|p| p.reference.as_deref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_netclass_defaults() {
        let track = BoardItem::new(1, ItemKind::Track).on_layer(LayerId::F_CU);
        assert_eq!(track.effective_netclass(), Some(DEFAULT_NETCLASS));

        let text = BoardItem::new(2, ItemKind::Text).on_layer(LayerId::F_SILKS);
        assert_eq!(text.effective_netclass(), None);

        let power = BoardItem::new(3, ItemKind::Track).with_net("VCC", "Power");
        assert_eq!(power.effective_netclass(), Some("Power"));
        assert!(power.is_connected());
    }

    #[test]
    fn test_non_copper() {
        let silk = BoardItem::new(1, ItemKind::Graphic).on_layer(LayerId::F_SILKS);
        assert!(silk.is_non_copper());

        let area = BoardItem::new(2, ItemKind::RuleArea).on_layers(LayerSet::copper());
        assert!(area.is_non_copper());

        let pad = BoardItem::new(3, ItemKind::Pad(PadType::Smd)).on_layer(LayerId::F_CU);
        assert!(!pad.is_non_copper());
    }

    #[test]
    fn test_disallow_mask_is_single_bit() {
        let kinds = [
            ItemKind::Track,
            ItemKind::Via(ViaType::Through),
            ItemKind::Via(ViaType::Micro),
            ItemKind::Via(ViaType::BlindBuried),
            ItemKind::Pad(PadType::Smd),
            ItemKind::Pad(PadType::NptHole),
            ItemKind::Zone,
            ItemKind::Footprint,
            ItemKind::Text,
            ItemKind::Graphic,
        ];
        for kind in kinds {
            assert_eq!(disallow_mask_for(kind).bits().count_ones(), 1, "{:?}", kind);
        }
        assert_ne!(
            disallow_mask_for(ItemKind::Via(ViaType::Through)),
            disallow_mask_for(ItemKind::Via(ViaType::Micro))
        );
    }

    #[test]
    fn test_item_json() {
        let json = r#"{
            "id": 7,
            "kind": {"via": "micro"},
            "layers": ["F.Cu", "In1.Cu"],
            "net": "GND",
            "overrides": {"clearance": 250000}
        }"#;
        let item: BoardItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.id, ItemId(7));
        assert_eq!(item.kind, ItemKind::Via(ViaType::Micro));
        assert_eq!(item.overrides.clearance, Some(250_000));
        assert_eq!(item.effective_netclass(), Some(DEFAULT_NETCLASS));
    }
}
