//! Rule compilation
//!
//! Compiles every rule's condition once and buckets constraints by
//! category. The resulting `CompiledRuleSet` is immutable and shared by all
//! resolver threads of a session.

use crate::board::LayerSet;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

use super::condition::{CompiledCondition, ConditionEvaluator, Matcher};
use super::constraint::{Constraint, ConstraintKind};
use super::error::CompileError;
use super::rule::{ImplicitSource, Predicate, Provenance, Rule, RuleCondition, Severity};

/// A rule with its condition compiled
#[derive(Debug)]
pub struct CompiledRule {
    /// Position in the compiled rule list
    pub id: usize,
    pub rule: Rule,
    pub matcher: Matcher,
}

impl CompiledRule {
    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn is_implicit(&self) -> bool {
        self.rule.is_implicit()
    }

    pub fn severity(&self) -> Severity {
        self.rule.severity.unwrap_or_default()
    }
}

/// One constraint of one rule, filed under its category
#[derive(Debug, Clone)]
pub struct ConstraintEntry {
    pub rule: Arc<CompiledRule>,
    pub constraint: Constraint,
    /// `None` means every layer
    pub layers: Option<LayerSet>,
    /// Compiled test of an assertion constraint
    pub assertion: Option<Arc<dyn CompiledCondition>>,
}

/// Category -> ordered constraint entries
#[derive(Debug, Default)]
pub struct ConstraintMap {
    buckets: HashMap<ConstraintKind, Vec<ConstraintEntry>>,
}

impl ConstraintMap {
    /// Entries of a category in insertion order
    pub fn get(&self, kind: ConstraintKind) -> &[ConstraintEntry] {
        self.buckets.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push(&mut self, entry: ConstraintEntry) {
        self.buckets
            .entry(entry.constraint.kind)
            .or_default()
            .push(entry);
    }

    /// Total number of entries across all categories
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(Vec::is_empty)
    }

    /// Bucket sizes, sorted by category
    pub fn bucket_sizes(&self) -> Vec<(ConstraintKind, usize)> {
        let mut sizes: Vec<(ConstraintKind, usize)> = self
            .buckets
            .iter()
            .map(|(kind, entries)| (*kind, entries.len()))
            .collect();
        sizes.sort();
        sizes
    }
}

/// Clearance of one net class as seen by the fast path
#[derive(Debug, Clone)]
pub struct NetclassClearance {
    pub value: i32,
    /// Position in the clearance bucket; later entries win ties
    pub order: usize,
    pub rule: Arc<CompiledRule>,
}

/// Everything a session needs from the rule set
#[derive(Debug, Default)]
pub struct CompiledRuleSet {
    pub rules: Vec<Arc<CompiledRule>>,
    pub map: ConstraintMap,
    /// Net class name -> implicit clearance rule
    pub netclass_clearances: HashMap<String, NetclassClearance>,
    /// An authored rule carries a clearance constraint
    pub has_explicit_clearance_rules: bool,
    /// A tuning profile narrows clearance between coupled pair members
    pub has_diff_pair_clearance_overrides: bool,
}

impl CompiledRuleSet {
    pub fn implicit_count(&self) -> usize {
        self.rules.iter().filter(|r| r.is_implicit()).count()
    }

    pub fn authored_count(&self) -> usize {
        self.rules.len() - self.implicit_count()
    }

    /// Authored rules in document order
    pub fn authored_rules(&self) -> impl Iterator<Item = &Arc<CompiledRule>> {
        self.rules.iter().filter(|r| !r.is_implicit())
    }
}

fn compile_condition(
    rule: &Rule,
    evaluator: &dyn ConditionEvaluator,
) -> Result<Matcher, CompileError> {
    match &rule.condition {
        None => Ok(Matcher::Always),
        Some(RuleCondition::Builtin(predicate)) => Ok(Matcher::Builtin(predicate.clone())),
        Some(RuleCondition::Expression(text)) if text.trim().is_empty() => Ok(Matcher::Always),
        Some(RuleCondition::Expression(text)) => evaluator
            .compile(text)
            .map(Matcher::Compiled)
            .map_err(|source| CompileError {
                rule: rule.name.clone(),
                expression: text.clone(),
                source,
            }),
    }
}

fn compile_assertion(
    rule: &Rule,
    constraint: &Constraint,
    evaluator: &dyn ConditionEvaluator,
) -> Result<Option<Arc<dyn CompiledCondition>>, CompileError> {
    let Some(test) = constraint.assertion.as_deref() else {
        return Ok(None);
    };
    evaluator
        .compile(test)
        .map(Some)
        .map_err(|source| CompileError {
            rule: rule.name.clone(),
            expression: test.to_string(),
            source,
        })
}

/// Compile rules in order into a constraint map
///
/// The first condition that fails to compile aborts the whole set.
pub fn compile_rules(
    rules: Vec<Rule>,
    evaluator: &dyn ConditionEvaluator,
) -> Result<CompiledRuleSet, CompileError> {
    let mut set = CompiledRuleSet::default();

    for (id, rule) in rules.into_iter().enumerate() {
        let matcher = compile_condition(&rule, evaluator)?;
        let assertions = rule
            .constraints
            .iter()
            .map(|c| compile_assertion(&rule, c, evaluator))
            .collect::<Result<Vec<_>, _>>()?;

        let compiled = Arc::new(CompiledRule { id, rule, matcher });

        for (constraint, assertion) in compiled.rule.constraints.iter().zip(assertions) {
            if constraint.kind == ConstraintKind::Clearance {
                match compiled.rule.provenance {
                    Provenance::Authored => set.has_explicit_clearance_rules = true,
                    Provenance::Implicit(ImplicitSource::TuningProfile) => {
                        set.has_diff_pair_clearance_overrides = true
                    }
                    Provenance::Implicit(ImplicitSource::Netclass) => {
                        record_netclass_clearance(&mut set, &compiled, constraint);
                    }
                    Provenance::Implicit(_) => {}
                }
            }

            set.map.push(ConstraintEntry {
                rule: Arc::clone(&compiled),
                constraint: constraint.clone(),
                layers: compiled.rule.layers,
                assertion,
            });
        }
        set.rules.push(compiled);
    }

    debug!(
        "[Rules] Compiled {} rules into {} constraint entries",
        set.rules.len(),
        set.map.len()
    );
    Ok(set)
}

fn record_netclass_clearance(set: &mut CompiledRuleSet, rule: &Arc<CompiledRule>, constraint: &Constraint) {
    let (Some(RuleCondition::Builtin(Predicate::EitherNetclassIs(class))), Some(value)) =
        (&rule.rule.condition, constraint.value.min)
    else {
        return;
    };
    let order = set.map.get(ConstraintKind::Clearance).len();
    if set.netclass_clearances.contains_key(class) {
        warn!("[Rules] Net class '{}' has more than one clearance rule", class);
    }
    set.netclass_clearances.insert(
        class.clone(),
        NetclassClearance {
            value,
            order,
            rule: Arc::clone(rule),
        },
    );
}

/// Compile implicit and authored rules, falling back to implicit rules alone
///
/// Returns the set to run the session with, plus the error that forced the
/// fallback (if any). Implicit rules carry only built-in predicates, so the
/// fallback compile cannot itself fail.
pub fn compile_with_fallback(
    implicit: Vec<Rule>,
    authored: Vec<Rule>,
    evaluator: &dyn ConditionEvaluator,
) -> (CompiledRuleSet, Option<CompileError>) {
    let mut all = implicit.clone();
    all.extend(authored);

    match compile_rules(all, evaluator) {
        Ok(set) => (set, None),
        Err(err) => {
            warn!("[Rules] {}; continuing with implicit rules only", err);
            match compile_rules(implicit, evaluator) {
                Ok(set) => (set, Some(err)),
                Err(fallback_err) => {
                    warn!("[Rules] Implicit rules failed to compile: {}", fallback_err);
                    (CompiledRuleSet::default(), Some(err))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{BoardConfig, NetclassSettings};
    use crate::rules::{synthesize_implicit_rules, ExpressionEvaluator};
    use crate::units::mm;
    use test_log::test;

    fn config() -> BoardConfig {
        let mut config = BoardConfig::default();
        for (name, clearance) in [("Default", 0.2), ("Power", 0.3)] {
            config.netclasses.insert(
                name.into(),
                NetclassSettings {
                    clearance: Some(mm(clearance)),
                    ..Default::default()
                },
            );
        }
        config
    }

    #[test]
    fn test_buckets_keep_insertion_order() {
        let implicit = synthesize_implicit_rules(&config());
        let authored = Rule::authored("power")
            .when("A.NetClass == 'Power'")
            .with_constraint(Constraint::min(ConstraintKind::Clearance, mm(0.5)));
        let mut rules = implicit;
        rules.push(authored);

        let set = compile_rules(rules, &ExpressionEvaluator).unwrap();
        let names: Vec<&str> = set
            .map
            .get(ConstraintKind::Clearance)
            .iter()
            .map(|e| e.rule.name())
            .collect();
        assert_eq!(names, vec!["netclass 'Default'", "netclass 'Power'", "power"]);
        assert!(set.has_explicit_clearance_rules);
        assert!(!set.has_diff_pair_clearance_overrides);
        assert_eq!(set.authored_count(), 1);
    }

    #[test]
    fn test_netclass_clearance_table() {
        let set = compile_rules(synthesize_implicit_rules(&config()), &ExpressionEvaluator).unwrap();
        assert!(!set.has_explicit_clearance_rules);
        let power = &set.netclass_clearances["Power"];
        assert_eq!(power.value, mm(0.3));
        assert_eq!(power.order, 1);
        assert_eq!(set.netclass_clearances["Default"].order, 0);
    }

    #[test]
    fn test_compile_error_names_rule() {
        let bad = Rule::authored("broken")
            .when("A.NetClass == ")
            .with_constraint(Constraint::min(ConstraintKind::TrackWidth, mm(0.3)));
        let err = compile_rules(vec![bad], &ExpressionEvaluator).unwrap_err();
        assert_eq!(err.rule, "broken");
        assert_eq!(err.expression, "A.NetClass == ");
    }

    #[test]
    fn test_bad_assertion_is_compile_error() {
        let bad = Rule::authored("assert").with_constraint(Constraint::assertion("A.Bogus == 1"));
        assert!(compile_rules(vec![bad], &ExpressionEvaluator).is_err());
    }

    #[test]
    fn test_fallback_keeps_implicit_rules() {
        let implicit = synthesize_implicit_rules(&config());
        let implicit_len = implicit.len();
        let authored = vec![
            Rule::authored("fine").when("A.NetClass == 'Power'"),
            Rule::authored("broken").when("A.("),
        ];
        let (set, err) = compile_with_fallback(implicit, authored, &ExpressionEvaluator);
        assert_eq!(err.map(|e| e.rule), Some("broken".to_string()));
        assert_eq!(set.rules.len(), implicit_len);
        assert_eq!(set.authored_count(), 0);
    }
}
