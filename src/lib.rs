//! Design-rule constraint resolution for printed circuit boards
//!
//! Given one or two board items, a constraint category and an optional layer,
//! the engine determines the single winning constraint together with the
//! name of the rule responsible for it.
//!
//! # Module Structure
//! - `board` - Layers, board items, configuration snapshot, keepout index
//! - `rules` - Constraint/rule model, condition language, implicit rules, compiler
//! - `engine` - Resolution stages, clearance cache, session management
//! - `server` - Line-delimited JSON-RPC surface used by `rule_server`

pub mod board;
pub mod engine;
pub mod rules;
pub mod server;
pub mod units;

// Re-export the types most callers need
pub use board::{BoardConfig, BoardItem, ItemId, ItemKind, LayerId, LayerSet};
pub use engine::{CompileError, DrcEngine, EngineOptions, ResolvedConstraint};
pub use rules::{Constraint, ConstraintKind, Rule};
