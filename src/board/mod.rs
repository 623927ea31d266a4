//! Board-side inputs to the rule engine
//!
//! # Submodules
//! - `layers` - Layer identifiers and layer sets
//! - `items` - Board items, item kinds and per-item overrides
//! - `config` - Board configuration snapshot (minimums, net classes, profiles, keepouts)
//! - `regions` - R-tree index answering keepout membership queries

mod config;
mod items;
mod layers;
mod regions;

pub use config::{
    BoardConfig, DesignSettings, KeepoutFlags, KeepoutRegion, NetclassSettings, ProfileLayer,
    TuningProfile,
};
pub use items::{
    disallow_mask_for, BoardItem, ItemId, ItemKind, LocalOverrides, PadType, ViaType,
    DEFAULT_NETCLASS,
};
pub use layers::{is_copper_layer, LayerId, LayerSet, COPPER_LAYER_COUNT, LAYER_COUNT};
pub use regions::RegionIndex;
