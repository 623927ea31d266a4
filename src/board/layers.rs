//! Board layer identifiers and layer sets
//!
//! Copper layers come first (F.Cu, In1.Cu..In30.Cu, B.Cu), followed by the
//! technical layers. A `LayerSet` is a 64-bit mask over those identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of copper layers a board can carry
pub const COPPER_LAYER_COUNT: u8 = 32;

/// Names of the technical layers, in identifier order after the copper block
const TECHNICAL_LAYER_NAMES: &[&str] = &[
    "F.Adhes",
    "B.Adhes",
    "F.Paste",
    "B.Paste",
    "F.SilkS",
    "B.SilkS",
    "F.Mask",
    "B.Mask",
    "Dwgs.User",
    "Cmts.User",
    "Eco1.User",
    "Eco2.User",
    "Edge.Cuts",
    "Margin",
    "B.CrtYd",
    "F.CrtYd",
    "B.Fab",
    "F.Fab",
];

/// Total number of layer identifiers
pub const LAYER_COUNT: u8 = COPPER_LAYER_COUNT + TECHNICAL_LAYER_NAMES.len() as u8;

/// A single board layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LayerId(u8);

impl LayerId {
    pub const F_CU: LayerId = LayerId(0);
    pub const B_CU: LayerId = LayerId(COPPER_LAYER_COUNT - 1);
    pub const F_PASTE: LayerId = LayerId(COPPER_LAYER_COUNT + 2);
    pub const B_PASTE: LayerId = LayerId(COPPER_LAYER_COUNT + 3);
    pub const F_SILKS: LayerId = LayerId(COPPER_LAYER_COUNT + 4);
    pub const B_SILKS: LayerId = LayerId(COPPER_LAYER_COUNT + 5);
    pub const F_MASK: LayerId = LayerId(COPPER_LAYER_COUNT + 6);
    pub const B_MASK: LayerId = LayerId(COPPER_LAYER_COUNT + 7);
    pub const EDGE_CUTS: LayerId = LayerId(COPPER_LAYER_COUNT + 12);
    pub const B_CRTYD: LayerId = LayerId(COPPER_LAYER_COUNT + 14);
    pub const F_CRTYD: LayerId = LayerId(COPPER_LAYER_COUNT + 15);

    /// Inner copper layer `In<n>.Cu` (1-based)
    pub fn inner(n: u8) -> Option<LayerId> {
        if (1..COPPER_LAYER_COUNT - 1).contains(&n) {
            Some(LayerId(n))
        } else {
            None
        }
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// Check if this layer carries copper
    pub fn is_copper(self) -> bool {
        self.0 < COPPER_LAYER_COUNT
    }

    /// Board layer name, e.g. `F.Cu`, `In2.Cu`, `B.SilkS`
    pub fn name(self) -> String {
        match self.0 {
            0 => "F.Cu".to_string(),
            n if n == COPPER_LAYER_COUNT - 1 => "B.Cu".to_string(),
            n if n < COPPER_LAYER_COUNT => format!("In{}.Cu", n),
            n => TECHNICAL_LAYER_NAMES[(n - COPPER_LAYER_COUNT) as usize].to_string(),
        }
    }

    /// Parse a board layer name (case-insensitive)
    pub fn from_name(name: &str) -> Option<LayerId> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("F.Cu") {
            return Some(LayerId::F_CU);
        }
        if name.eq_ignore_ascii_case("B.Cu") {
            return Some(LayerId::B_CU);
        }
        if let Some(rest) = name.strip_prefix("In").or_else(|| name.strip_prefix("in")) {
            if let Some(num) = rest.strip_suffix(".Cu").or_else(|| rest.strip_suffix(".cu")) {
                return num.parse::<u8>().ok().and_then(LayerId::inner);
            }
        }
        TECHNICAL_LAYER_NAMES
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .map(|pos| LayerId(COPPER_LAYER_COUNT + pos as u8))
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl TryFrom<String> for LayerId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        LayerId::from_name(&value).ok_or_else(|| format!("unknown layer '{}'", value))
    }
}

impl From<LayerId> for String {
    fn from(layer: LayerId) -> Self {
        layer.name()
    }
}

/// A set of board layers
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LayerSet(u64);

impl LayerSet {
    pub const fn empty() -> Self {
        LayerSet(0)
    }

    /// Every layer identifier
    pub const fn all() -> Self {
        LayerSet((1u64 << LAYER_COUNT) - 1)
    }

    /// All copper layers
    pub const fn copper() -> Self {
        LayerSet((1u64 << COPPER_LAYER_COUNT) - 1)
    }

    pub fn single(layer: LayerId) -> Self {
        LayerSet(1u64 << layer.0)
    }

    pub fn with(mut self, layer: LayerId) -> Self {
        self.0 |= 1u64 << layer.0;
        self
    }

    pub fn insert(&mut self, layer: LayerId) {
        self.0 |= 1u64 << layer.0;
    }

    pub fn contains(&self, layer: LayerId) -> bool {
        self.0 & (1u64 << layer.0) != 0
    }

    pub fn intersects(&self, other: LayerSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn union(&self, other: LayerSet) -> LayerSet {
        LayerSet(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Check if any copper layer is present
    pub fn has_copper(&self) -> bool {
        self.intersects(LayerSet::copper())
    }

    /// Iterate layers in identifier order
    pub fn iter(&self) -> impl Iterator<Item = LayerId> + '_ {
        (0..LAYER_COUNT)
            .filter(move |i| self.0 & (1u64 << i) != 0)
            .map(LayerId)
    }

    /// Parse a layer-set token: a layer name, `*.Cu` (all copper) or `*` (all layers)
    pub fn parse_token(token: &str) -> Option<LayerSet> {
        match token.trim() {
            "*" | "*.*" => Some(LayerSet::all()),
            t if t.eq_ignore_ascii_case("*.Cu") => Some(LayerSet::copper()),
            t if t.eq_ignore_ascii_case("F&B.Cu") => {
                Some(LayerSet::single(LayerId::F_CU).with(LayerId::B_CU))
            }
            t => LayerId::from_name(t).map(LayerSet::single),
        }
    }
}

impl FromIterator<LayerId> for LayerSet {
    fn from_iter<T: IntoIterator<Item = LayerId>>(iter: T) -> Self {
        iter.into_iter().fold(LayerSet::empty(), LayerSet::with)
    }
}

impl fmt::Debug for LayerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(|l| l.name())).finish()
    }
}

impl TryFrom<Vec<String>> for LayerSet {
    type Error = String;

    fn try_from(tokens: Vec<String>) -> Result<Self, Self::Error> {
        tokens.iter().try_fold(LayerSet::empty(), |set, token| {
            LayerSet::parse_token(token)
                .map(|parsed| set.union(parsed))
                .ok_or_else(|| format!("unknown layer '{}'", token))
        })
    }
}

impl From<LayerSet> for Vec<String> {
    fn from(set: LayerSet) -> Self {
        set.iter().map(|l| l.name()).collect()
    }
}

/// Check if a layer name refers to a copper layer
pub fn is_copper_layer(name: &str) -> bool {
    LayerId::from_name(name).is_some_and(LayerId::is_copper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_copper_layer() {
        assert!(is_copper_layer("F.Cu"));
        assert!(is_copper_layer("f.cu"));
        assert!(is_copper_layer("In4.Cu"));
        assert!(is_copper_layer("B.Cu"));
        assert!(!is_copper_layer("F.SilkS"));
        assert!(!is_copper_layer("Edge.Cuts"));
        assert!(!is_copper_layer("In31.Cu"));
    }

    #[test]
    fn test_layer_names_round_trip() {
        for layer in LayerSet::all().iter() {
            assert_eq!(LayerId::from_name(&layer.name()), Some(layer));
        }
    }

    #[test]
    fn test_layer_set_tokens() {
        let set = LayerSet::try_from(vec!["*.Cu".to_string(), "F.SilkS".to_string()]).unwrap();
        assert_eq!(set.len(), COPPER_LAYER_COUNT as usize + 1);
        assert!(set.contains(LayerId::F_SILKS));
        assert!(!set.contains(LayerId::B_SILKS));
        assert!(LayerSet::try_from(vec!["Nope.Cu".to_string()]).is_err());
    }

    #[test]
    fn test_layer_set_serde() {
        let set = LayerSet::single(LayerId::F_CU).with(LayerId::B_CU);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["F.Cu","B.Cu"]"#);
        let back: LayerSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
