//! Rule side of the engine
//!
//! # Submodules
//! - `constraint` - Constraint categories, min/opt/max values, disallow masks
//! - `rule` - Rules, built-in predicates, provenance and severity
//! - `error` - Compile and document errors
//! - `condition` - Evaluator traits and built-in predicate evaluation
//! - `expr` - Default condition expression language
//! - `implicit` - Rules synthesized from board configuration
//! - `compiler` - Condition compilation and the category-indexed constraint map
//! - `document` - JSON rule document loader

mod compiler;
mod condition;
mod constraint;
mod document;
mod error;
mod expr;
mod implicit;
mod rule;

pub use compiler::{
    compile_rules, compile_with_fallback, CompiledRule, CompiledRuleSet, ConstraintEntry,
    ConstraintMap, NetclassClearance,
};
pub use condition::{
    eval_predicate, is_coupled_pair, CompiledCondition, ConditionEvaluator, EvalContext,
    EvalQuery, ExpressionEvaluator, Matcher,
};
pub use constraint::{
    Constraint, ConstraintKind, DisallowFlags, MinOptMax, ValueUnit, ZoneConnection,
};
pub use document::{RuleDocument, RULE_DOCUMENT_VERSION};
pub use error::{CompileError, ConditionError, RuleDocumentError};
pub use expr::{wildcard_match, CompiledExpr};
pub use implicit::{
    board_setup_rules, item_type_rules, keepout_rules, netclass_rules,
    synthesize_implicit_rules, tuning_profile_rules,
};
pub use rule::{ImplicitSource, Predicate, Provenance, Rule, RuleCondition, Severity};
