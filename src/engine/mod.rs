//! Constraint resolution engine
//!
//! # Submodules
//! - `resolve` - Resolution stages and the per-query `ResolutionState`
//! - `cache` - Concurrent per-(item, layer) clearance cache
//! - `session` - Immutable rule sessions and the `DrcEngine` entry point

mod cache;
mod resolve;
mod session;

pub use crate::rules::CompileError;
pub use cache::{CacheKey, ClearanceCache, PopulateStats, POPULATE_BLOCK_SIZE};
pub use resolve::{
    AssertionOutcome, ResolutionState, ResolvedConstraint, Resolver, Stage, BOARD_MINIMUM,
    BOARD_SETUP, FOOTPRINT_OVERRIDE, LOCAL_OVERRIDE, NET_TIE, ZONE_OVERRIDE,
};
pub use session::{DrcEngine, EngineOptions, Session, SessionStats};
