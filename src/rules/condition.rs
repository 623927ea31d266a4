//! Condition evaluation
//!
//! Authored rule conditions are compiled once per session through a
//! `ConditionEvaluator`; the resulting handles are evaluated per query
//! against (A, B, layer). Built-in predicates used by implicit rules are
//! evaluated directly.

use crate::board::{BoardItem, ItemKind, LayerId, RegionIndex};
use std::fmt;
use std::sync::Arc;

use super::constraint::ConstraintKind;
use super::error::ConditionError;
use super::expr;
use super::rule::Predicate;

/// Session-wide data a condition may consult
pub struct EvalContext<'a> {
    pub regions: &'a RegionIndex,
}

/// One evaluation request
#[derive(Clone, Copy)]
pub struct EvalQuery<'a> {
    pub a: &'a BoardItem,
    pub b: Option<&'a BoardItem>,
    pub kind: ConstraintKind,
    pub layer: Option<LayerId>,
}

impl<'a> EvalQuery<'a> {
    /// Same query with a different subject item
    pub fn with_subject(&self, a: &'a BoardItem) -> EvalQuery<'a> {
        EvalQuery { a, ..*self }
    }
}

/// A compiled condition handle
pub trait CompiledCondition: Send + Sync + fmt::Debug {
    fn evaluate(&self, ctx: &EvalContext<'_>, query: &EvalQuery<'_>) -> bool;
}

/// Compiles condition text into evaluable handles
pub trait ConditionEvaluator: Send + Sync {
    fn compile(&self, text: &str) -> Result<Arc<dyn CompiledCondition>, ConditionError>;
}

/// The built-in expression language
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpressionEvaluator;

impl ConditionEvaluator for ExpressionEvaluator {
    fn compile(&self, text: &str) -> Result<Arc<dyn CompiledCondition>, ConditionError> {
        let compiled = expr::compile(text)?;
        Ok(Arc::new(compiled))
    }
}

/// Compiled form of a rule condition
#[derive(Debug, Clone)]
pub enum Matcher {
    Always,
    Builtin(Predicate),
    Compiled(Arc<dyn CompiledCondition>),
}

impl Matcher {
    pub fn matches(&self, ctx: &EvalContext<'_>, query: &EvalQuery<'_>) -> bool {
        match self {
            Matcher::Always => true,
            Matcher::Builtin(predicate) => eval_predicate(predicate, ctx, query),
            Matcher::Compiled(condition) => condition.evaluate(ctx, query),
        }
    }
}

/// Evaluate a built-in predicate
pub fn eval_predicate(predicate: &Predicate, ctx: &EvalContext<'_>, q: &EvalQuery<'_>) -> bool {
    match predicate {
        Predicate::NetclassIs(class) => q.a.effective_netclass() == Some(class.as_str()),
        Predicate::EitherNetclassIs(class) => {
            q.a.effective_netclass() == Some(class.as_str())
                || q.b.and_then(BoardItem::effective_netclass) == Some(class.as_str())
        }
        Predicate::NetclassIn(classes) => q
            .a
            .effective_netclass()
            .is_some_and(|nc| classes.iter().any(|c| c == nc)),
        Predicate::KindIs(kind) => q.a.kind == *kind,
        Predicate::IsVia => matches!(q.a.kind, ItemKind::Via(_)),
        Predicate::InDiffPair => q.a.diff_pair.is_some(),
        Predicate::CoupledDiffPair => q.b.is_some_and(|b| is_coupled_pair(q.a, b)),
        Predicate::IntersectsRegion(id) => ctx.regions.item_intersects(id, q.a),
        Predicate::Not(inner) => !eval_predicate(inner, ctx, q),
        Predicate::All(parts) => parts.iter().all(|p| eval_predicate(p, ctx, q)),
    }
}

/// Two items on the two different nets of one differential pair
pub fn is_coupled_pair(a: &BoardItem, b: &BoardItem) -> bool {
    match (&a.diff_pair, &b.diff_pair, &a.net, &b.net) {
        (Some(pa), Some(pb), Some(na), Some(nb)) => pa == pb && na != nb,
        _ => false,
    }
}
