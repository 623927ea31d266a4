//! Rule sessions and the public engine entry point
//!
//! A `Session` bundles everything compiled from one configuration snapshot
//! and one rule document. It is never mutated after construction apart
//! from its clearance cache; reinitializing the engine swaps in a new
//! session and the old one is dropped once the last reader lets go.

use crate::board::{BoardConfig, BoardItem, ItemId, LayerId, RegionIndex};
use crate::rules::{
    compile_with_fallback, synthesize_implicit_rules, CompileError, CompiledRuleSet,
    ConditionEvaluator, ConstraintKind, ExpressionEvaluator, Rule, ZoneConnection,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use super::cache::{ClearanceCache, PopulateStats};
use super::resolve::{AssertionOutcome, ResolvedConstraint, Resolver};

/// Engine behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Answer plain net class clearance queries from a lookup table
    pub netclass_fast_path: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            netclass_fast_path: true,
        }
    }
}

/// Diagnostic summary of the active session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub implicit_rules: usize,
    pub authored_rules: usize,
    pub constraint_entries: usize,
    /// Entries per category, by category name
    pub buckets: Vec<(String, usize)>,
    pub has_explicit_clearance_rules: bool,
    pub has_diff_pair_clearance_overrides: bool,
    pub netclass_fast_path: bool,
    pub cached_clearances: usize,
    pub keepout_regions: usize,
}

/// Compiled rules, configuration and cache of one validation session
#[derive(Debug)]
pub struct Session {
    rules: CompiledRuleSet,
    config: BoardConfig,
    regions: RegionIndex,
    cache: ClearanceCache,
}

impl Session {
    fn build(config: BoardConfig, rules: CompiledRuleSet) -> Self {
        Self {
            regions: RegionIndex::new(&config.keepouts),
            rules,
            config,
            cache: ClearanceCache::new(),
        }
    }

    pub fn rules(&self) -> &CompiledRuleSet {
        &self.rules
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub fn regions(&self) -> &RegionIndex {
        &self.regions
    }

    pub fn cache(&self) -> &ClearanceCache {
        &self.cache
    }

    pub fn resolver(&self, options: EngineOptions) -> Resolver<'_> {
        Resolver {
            rules: &self.rules,
            config: &self.config,
            regions: &self.regions,
            fast_path: options.netclass_fast_path,
        }
    }

    /// Fill this session's clearance cache for all connected copper items
    ///
    /// Takes `&self` only, so a caller holding an `Arc<Session>` can run it
    /// on a worker thread while the engine keeps answering queries.
    pub fn pre_populate(
        &self,
        options: EngineOptions,
        items: &[BoardItem],
        cancel: &AtomicBool,
    ) -> PopulateStats {
        let resolver = self.resolver(options);
        self.cache
            .pre_populate(items, |item, layer| own_clearance(&resolver, item, layer), cancel)
    }
}

/// Design rule engine: session lifecycle plus every query entry point
pub struct DrcEngine {
    session: Arc<Session>,
    options: EngineOptions,
    evaluator: Arc<dyn ConditionEvaluator>,
}

impl Default for DrcEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DrcEngine {
    /// Engine with the implicit rules of a default board and the built-in
    /// condition language
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(ExpressionEvaluator))
    }

    /// Engine using a host-supplied condition evaluator
    pub fn with_evaluator(evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        let config = BoardConfig::default();
        let (rules, _) =
            compile_with_fallback(synthesize_implicit_rules(&config), Vec::new(), evaluator.as_ref());
        Self {
            session: Arc::new(Session::build(config, rules)),
            options: EngineOptions::default(),
            evaluator,
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn set_options(&mut self, options: EngineOptions) {
        self.options = options;
    }

    /// The active session; holders keep it alive across reinitialization
    pub fn session(&self) -> Arc<Session> {
        Arc::clone(&self.session)
    }

    fn resolver(&self) -> Resolver<'_> {
        self.session.resolver(self.options)
    }

    /// Replace the session with one compiled from `rules` and `config`
    ///
    /// If an authored condition fails to compile, the new session runs on
    /// the implicit rules alone and the compile error is returned.
    pub fn initialize_session(
        &mut self,
        rules: Vec<Rule>,
        config: BoardConfig,
    ) -> Result<(), CompileError> {
        let start = Instant::now();
        let authored_count = rules.len();
        let implicit = synthesize_implicit_rules(&config);
        let (compiled, error) = compile_with_fallback(implicit, rules, self.evaluator.as_ref());

        self.session = Arc::new(Session::build(config, compiled));

        let stats = self.stats();
        info!(
            "[Session] Initialized: {} implicit + {} authored rules, {} constraint entries, {} keepouts in {:?}",
            stats.implicit_rules,
            stats.authored_rules,
            stats.constraint_entries,
            stats.keepout_regions,
            start.elapsed()
        );
        info!(
            "[Session] Fast path flags: explicit clearance rules = {}, diff pair overrides = {}",
            stats.has_explicit_clearance_rules, stats.has_diff_pair_clearance_overrides
        );

        match error {
            Some(err) => {
                warn!(
                    "[Session] Running on implicit rules only; {} authored rules dropped",
                    authored_count
                );
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Winning constraint of `kind` for (a, b) on `layer`
    pub fn resolve(
        &self,
        kind: ConstraintKind,
        a: &BoardItem,
        b: Option<&BoardItem>,
        layer: Option<LayerId>,
    ) -> ResolvedConstraint {
        self.resolver().resolve(kind, a, b, layer)
    }

    /// Same as `resolve`, plus the steps that led to the result
    pub fn resolve_traced(
        &self,
        kind: ConstraintKind,
        a: &BoardItem,
        b: Option<&BoardItem>,
        layer: Option<LayerId>,
    ) -> (ResolvedConstraint, Vec<String>) {
        self.resolver().resolve_traced(kind, a, b, layer)
    }

    /// Uncached clearance an item demands of its surroundings on a layer
    ///
    /// Items with a hole that aren't on `layer` are asking for hole
    /// clearance there.
    pub fn own_clearance(&self, item: &BoardItem, layer: LayerId) -> i32 {
        own_clearance(&self.resolver(), item, layer)
    }

    /// Cached `own_clearance`
    pub fn get_or_compute(&self, item: &BoardItem, layer: LayerId) -> i32 {
        let resolver = self.resolver();
        self.session
            .cache
            .get_or_compute(item.id, layer, || own_clearance(&resolver, item, layer))
    }

    /// Forget cached clearances of an edited item
    pub fn invalidate_cache(&self, item: ItemId) -> usize {
        self.session.cache.invalidate(item)
    }

    /// Fill the clearance cache for all connected copper items in parallel
    pub fn pre_populate_cache(&self, items: &[BoardItem], cancel: &AtomicBool) -> PopulateStats {
        self.session.pre_populate(self.options, items, cancel)
    }

    pub fn check_assertions(
        &self,
        a: &BoardItem,
        b: Option<&BoardItem>,
        layer: Option<LayerId>,
    ) -> Vec<AssertionOutcome> {
        self.resolver().check_assertions(a, b, layer)
    }

    /// Effective pad-to-zone connection style
    pub fn zone_connection(
        &self,
        pad: &BoardItem,
        zone: &BoardItem,
        layer: Option<LayerId>,
    ) -> ZoneConnection {
        self.resolver().zone_connection(pad, zone, layer)
    }

    pub fn stats(&self) -> SessionStats {
        let session = &self.session;
        let rules = &session.rules;
        SessionStats {
            implicit_rules: rules.implicit_count(),
            authored_rules: rules.authored_count(),
            constraint_entries: rules.map.len(),
            buckets: rules
                .map
                .bucket_sizes()
                .into_iter()
                .map(|(kind, size)| (kind.name().to_string(), size))
                .collect(),
            has_explicit_clearance_rules: rules.has_explicit_clearance_rules,
            has_diff_pair_clearance_overrides: rules.has_diff_pair_clearance_overrides,
            netclass_fast_path: self.options.netclass_fast_path,
            cached_clearances: session.cache.len(),
            keepout_regions: session.regions.len(),
        }
    }
}

fn own_clearance(resolver: &Resolver<'_>, item: &BoardItem, layer: LayerId) -> i32 {
    let kind = if item.has_hole() && !item.is_on_layer(layer) {
        ConstraintKind::HoleClearance
    } else {
        ConstraintKind::Clearance
    };
    resolver
        .resolve(kind, item, None, Some(layer))
        .min()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{ItemKind, NetclassSettings};
    use crate::rules::Constraint;
    use crate::units::mm;
    use test_log::test;

    fn config() -> BoardConfig {
        let mut config = BoardConfig::default();
        config.design.min_clearance = mm(0.15);
        config.netclasses.insert(
            "Power".into(),
            NetclassSettings {
                clearance: Some(mm(0.3)),
                ..Default::default()
            },
        );
        config
    }

    #[test]
    fn test_failed_compile_keeps_implicit_session() {
        let mut engine = DrcEngine::new();
        let rules = vec![Rule::authored("broken")
            .when("A.NetClass ==")
            .with_constraint(Constraint::min(ConstraintKind::Clearance, mm(1.0)))];

        let err = engine.initialize_session(rules, config()).unwrap_err();
        assert_eq!(err.rule, "broken");

        let stats = engine.stats();
        assert_eq!(stats.authored_rules, 0);
        assert!(stats.implicit_rules > 0);
        assert!(!stats.has_explicit_clearance_rules);

        let track = BoardItem::new(1, ItemKind::Track)
            .on_layer(LayerId::F_CU)
            .with_net("VCC", "Power");
        assert_eq!(engine.own_clearance(&track, LayerId::F_CU), mm(0.3));
    }

    #[test]
    fn test_reinitialize_drops_cache() {
        let mut engine = DrcEngine::new();
        engine.initialize_session(Vec::new(), config()).unwrap();
        let track = BoardItem::new(1, ItemKind::Track)
            .on_layer(LayerId::F_CU)
            .with_net("VCC", "Power");
        engine.get_or_compute(&track, LayerId::F_CU);

        let old = engine.session();
        assert_eq!(old.cache().len(), 1);

        engine.initialize_session(Vec::new(), config()).unwrap();
        assert_eq!(engine.stats().cached_clearances, 0);
        // The previous session stays usable by whoever still holds it
        assert_eq!(old.cache().get(track.id, LayerId::F_CU), Some(mm(0.3)));
    }

    #[test]
    fn test_hole_clearance_off_layer() {
        let mut engine = DrcEngine::new();
        let mut config = config();
        config.design.min_hole_clearance = mm(0.25);
        engine.initialize_session(Vec::new(), config).unwrap();

        let via = BoardItem::new(1, ItemKind::Via(crate::board::ViaType::BlindBuried))
            .on_layer(LayerId::F_CU)
            .with_net("VCC", "Power");
        assert_eq!(engine.own_clearance(&via, LayerId::F_CU), mm(0.3));
        assert_eq!(engine.own_clearance(&via, LayerId::B_CU), mm(0.25));
    }
}
