//! Constraint resolution
//!
//! A query runs through a fixed sequence of stages, each taking the
//! `ResolutionState` and either handing it on or finishing with it:
//!
//! 1. net tie short-circuit
//! 2. local clearance override
//! 3. local override of pad/footprint settings
//! 4. net class clearance fast path
//! 5. constraint map walk (last match wins)
//! 6. footprint, zone and board-setup fallback
//! 7. board minimum clamp
//! 8. null result when nothing applied

use crate::board::{disallow_mask_for, BoardConfig, BoardItem, ItemKind, LayerId, LocalOverrides, RegionIndex};
use crate::rules::{
    CompiledRuleSet, Constraint, ConstraintEntry, ConstraintKind, EvalContext, EvalQuery,
    NetclassClearance, Severity, ZoneConnection,
};
use crate::units::to_mm;
use serde::Serialize;
use std::ops::ControlFlow;

/// Provenance of a value raised to the board-wide minimum
pub const BOARD_MINIMUM: &str = "board minimum";
/// Provenance of a per-item override
pub const LOCAL_OVERRIDE: &str = "local override";
/// Provenance of a footprint-level override inherited by a pad
pub const FOOTPRINT_OVERRIDE: &str = "footprint override";
/// Provenance of a zone's own connection settings
pub const ZONE_OVERRIDE: &str = "zone override";
/// Provenance of a board setup default used when no rule applied
pub const BOARD_SETUP: &str = "board setup";
/// Provenance of the zero clearance between tied nets
pub const NET_TIE: &str = "net tie";

/// The winning constraint of a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedConstraint {
    pub constraint: Constraint,
    /// Rule name or synthetic label responsible for the value
    pub provenance: String,
    /// The minimum came from an implicit rule or a board setting
    pub implicit_min: bool,
    pub severity: Severity,
}

impl ResolvedConstraint {
    /// "No constraint configured"
    pub fn null() -> Self {
        Self {
            constraint: Constraint::null(),
            provenance: String::new(),
            implicit_min: false,
            severity: Severity::default(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.constraint.kind == ConstraintKind::None
    }

    pub fn kind(&self) -> ConstraintKind {
        self.constraint.kind
    }

    pub fn min(&self) -> Option<i32> {
        self.constraint.value.min
    }

    pub fn opt(&self) -> Option<i32> {
        self.constraint.value.opt
    }

    pub fn max(&self) -> Option<i32> {
        self.constraint.value.max
    }
}

/// Outcome of one assertion constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssertionOutcome {
    pub rule: String,
    pub passed: bool,
    pub severity: Severity,
}

/// Accumulated state of one query
#[derive(Debug)]
pub struct ResolutionState<'q> {
    pub kind: ConstraintKind,
    pub a: &'q BoardItem,
    pub b: Option<&'q BoardItem>,
    pub layer: Option<LayerId>,
    pub constraint: Option<Constraint>,
    pub provenance: String,
    pub severity: Severity,
    pub implicit_min: bool,
    /// An authored rule has applied; implicit rules may only fill gaps now
    pub authored_applied: bool,
    /// Copper clearance doesn't apply to this pair
    pub skip_implicit: bool,
    pub trace: Option<Vec<String>>,
}

impl<'q> ResolutionState<'q> {
    pub fn new(
        kind: ConstraintKind,
        a: &'q BoardItem,
        b: Option<&'q BoardItem>,
        layer: Option<LayerId>,
        traced: bool,
    ) -> Self {
        let skip_implicit = kind == ConstraintKind::Clearance
            && (a.is_non_copper() || b.is_some_and(BoardItem::is_non_copper));
        Self {
            kind,
            a,
            b,
            layer,
            constraint: None,
            provenance: String::new(),
            severity: Severity::default(),
            implicit_min: false,
            authored_applied: false,
            skip_implicit,
            trace: traced.then(Vec::new),
        }
    }

    fn note(&mut self, message: impl FnOnce() -> String) {
        if let Some(trace) = &mut self.trace {
            trace.push(message());
        }
    }

    fn query(&self) -> EvalQuery<'q> {
        EvalQuery {
            a: self.a,
            b: self.b,
            kind: self.kind,
            layer: self.layer,
        }
    }

    /// Replace the accumulated result outright
    fn set(&mut self, constraint: Constraint, provenance: &str, implicit_min: bool) {
        self.constraint = Some(constraint);
        self.provenance = provenance.to_string();
        self.implicit_min = implicit_min;
        self.severity = Severity::default();
    }

    fn current_min(&self) -> Option<i32> {
        self.constraint.as_ref().and_then(|c| c.value.min)
    }

    /// Overlay a matching entry onto the accumulated result
    fn apply(&mut self, entry: &ConstraintEntry, constraint: Constraint) {
        let implicit = entry.rule.is_implicit();

        if self.authored_applied && implicit {
            if let Some(acc) = &mut self.constraint {
                let mut changed = acc.value.fill_unset(&constraint.value);
                if acc.zone_connection.is_none() && constraint.zone_connection.is_some() {
                    acc.zone_connection = constraint.zone_connection;
                    changed = true;
                }
                if changed {
                    self.note(|| format!("  '{}' fills unset fields", entry.rule.name()));
                }
            }
            return;
        }

        let sets_min = constraint.value.min.is_some();
        match &mut self.constraint {
            None => self.constraint = Some(constraint),
            Some(acc) => {
                acc.value.overlay(&constraint.value);
                if constraint.zone_connection.is_some() {
                    acc.zone_connection = constraint.zone_connection;
                }
                if !constraint.disallow.is_empty() {
                    acc.disallow = constraint.disallow;
                }
                if constraint.assertion.is_some() {
                    acc.assertion = constraint.assertion;
                }
            }
        }
        if sets_min {
            self.implicit_min = implicit;
        }
        self.provenance = entry.rule.name().to_string();
        self.severity = entry.rule.severity();
        if !implicit {
            self.authored_applied = true;
        }
    }

    /// Final result and trace
    pub fn finish(self) -> (ResolvedConstraint, Vec<String>) {
        let trace = self.trace.unwrap_or_default();
        let resolved = match self.constraint {
            Some(constraint) => ResolvedConstraint {
                constraint,
                provenance: self.provenance,
                implicit_min: self.implicit_min,
                severity: self.severity,
            },
            None => ResolvedConstraint::null(),
        };
        (resolved, trace)
    }
}

/// Stage result: `Break` ends resolution with the state as is
pub type Stage<'q> = ControlFlow<ResolutionState<'q>, ResolutionState<'q>>;

macro_rules! run_stage {
    ($stage:expr) => {
        match $stage {
            ControlFlow::Break(done) => return done,
            ControlFlow::Continue(state) => state,
        }
    };
}

fn fmt_value(kind: ConstraintKind, value: i32) -> String {
    match kind.unit() {
        crate::rules::ValueUnit::Length => format!("{:.4} mm", to_mm(value)),
        _ => value.to_string(),
    }
}

/// The item's own clearance override, or its footprint's
fn clearance_override(item: &BoardItem) -> Option<i32> {
    item.overrides
        .clearance
        .or_else(|| item.parent_footprint().and_then(|fp| fp.overrides.clearance))
}

/// Override value of a pad/footprint/zone setting category
fn setting_override(kind: ConstraintKind, overrides: &LocalOverrides) -> Option<Constraint> {
    match kind {
        ConstraintKind::ZoneConnection => overrides.zone_connection.map(Constraint::zone_connection),
        ConstraintKind::ThermalReliefGap => overrides.thermal_gap.map(|v| setting_value(kind, v)),
        ConstraintKind::ThermalSpokeWidth => {
            overrides.thermal_spoke_width.map(|v| setting_value(kind, v))
        }
        ConstraintKind::SolderMaskExpansion => {
            overrides.solder_mask_expansion.map(|v| setting_value(kind, v))
        }
        ConstraintKind::SolderPasteAbsMargin => {
            overrides.solder_paste_margin.map(|v| setting_value(kind, v))
        }
        ConstraintKind::SolderPasteRelMargin => {
            overrides.solder_paste_ratio.map(|v| setting_value(kind, v))
        }
        _ => None,
    }
}

/// Mask and paste settings are targets; thermal settings are minimums
fn setting_value(kind: ConstraintKind, value: i32) -> Constraint {
    match kind {
        ConstraintKind::SolderMaskExpansion
        | ConstraintKind::SolderPasteAbsMargin
        | ConstraintKind::SolderPasteRelMargin => Constraint::opt(kind, value),
        _ => Constraint::min(kind, value),
    }
}

fn is_zone_setting(kind: ConstraintKind) -> bool {
    matches!(
        kind,
        ConstraintKind::ZoneConnection
            | ConstraintKind::ThermalReliefGap
            | ConstraintKind::ThermalSpokeWidth
    )
}

/// Two pads of one net-tie footprint whose numbers share a tie group
fn pads_share_tie_group(footprint: &BoardItem, a: &BoardItem, b: &BoardItem) -> bool {
    let (Some(pa), Some(pb)) = (a.pad_number.as_deref(), b.pad_number.as_deref()) else {
        return false;
    };
    footprint
        .net_tie_groups
        .iter()
        .any(|group| group.iter().any(|n| n == pa) && group.iter().any(|n| n == pb))
}

/// Read-only view of a session used to answer queries
pub struct Resolver<'s> {
    pub rules: &'s CompiledRuleSet,
    pub config: &'s BoardConfig,
    pub regions: &'s RegionIndex,
    pub fast_path: bool,
}

impl<'s> Resolver<'s> {
    pub fn resolve(
        &self,
        kind: ConstraintKind,
        a: &BoardItem,
        b: Option<&BoardItem>,
        layer: Option<LayerId>,
    ) -> ResolvedConstraint {
        self.run(ResolutionState::new(kind, a, b, layer, false)).0
    }

    /// Resolve with a step-by-step trace; never takes the fast path
    pub fn resolve_traced(
        &self,
        kind: ConstraintKind,
        a: &BoardItem,
        b: Option<&BoardItem>,
        layer: Option<LayerId>,
    ) -> (ResolvedConstraint, Vec<String>) {
        self.run(ResolutionState::new(kind, a, b, layer, true))
    }

    fn run<'q>(&self, state: ResolutionState<'q>) -> (ResolvedConstraint, Vec<String>) {
        self.run_stages(state).finish()
    }

    fn run_stages<'q>(&self, state: ResolutionState<'q>) -> ResolutionState<'q> {
        let state = run_stage!(self.net_tie(state));
        let state = run_stage!(self.local_clearance_override(state));
        let state = run_stage!(self.local_setting_override(state));
        let state = run_stage!(self.netclass_fast_path(state));
        let state = self.walk_rules(state);
        let state = self.fallback(state);
        self.board_minimum_clamp(state)
    }

    /// Stage 1: zero clearance between nets tied inside one footprint
    pub fn net_tie<'q>(&self, state: ResolutionState<'q>) -> Stage<'q> {
        if state.kind != ConstraintKind::Clearance {
            return ControlFlow::Continue(state);
        }
        let Some(b) = state.b else {
            return ControlFlow::Continue(state);
        };
        let a = state.a;
        if a.is_non_copper() || b.is_non_copper() {
            return ControlFlow::Continue(state);
        }
        let (Some(fa), Some(fb)) = (a.parent_footprint(), b.parent_footprint()) else {
            return ControlFlow::Continue(state);
        };
        if fa.id != fb.id || fa.net_tie_groups.is_empty() {
            return ControlFlow::Continue(state);
        }

        let tied = a.is_connected() != b.is_connected() || pads_share_tie_group(fa, a, b);
        if !tied {
            return ControlFlow::Continue(state);
        }

        let mut state = state;
        state.note(|| format!("Items are tied inside footprint {}; clearance 0", fa.id));
        state.set(Constraint::min(ConstraintKind::Clearance, 0), NET_TIE, true);
        ControlFlow::Break(state)
    }

    /// Stage 2: the larger per-item clearance override wins outright
    pub fn local_clearance_override<'q>(&self, mut state: ResolutionState<'q>) -> Stage<'q> {
        let floor = match state.kind {
            ConstraintKind::Clearance => self.config.design.min_clearance,
            ConstraintKind::HoleClearance => self.config.design.min_hole_clearance,
            _ => return ControlFlow::Continue(state),
        };

        let a = state.a;
        let b = state.b;
        let a_counts = !a.is_non_copper() && b.map_or(true, |b| !b.is_non_copper());
        let b_counts = !a.is_non_copper() && b.is_some_and(|b| !b.is_non_copper());

        let a_override = if a_counts { clearance_override(a) } else { None };
        let b_override = if b_counts { b.and_then(clearance_override) } else { None };
        let Some(value) = a_override.max(b_override) else {
            return ControlFlow::Continue(state);
        };

        let kind = state.kind;
        if value < floor {
            state.note(|| {
                format!(
                    "Local override {} is below board minimum {}",
                    fmt_value(kind, value),
                    fmt_value(kind, floor)
                )
            });
            state.set(Constraint::min(kind, floor), BOARD_MINIMUM, true);
        } else {
            state.note(|| format!("Local override {}", fmt_value(kind, value)));
            state.set(Constraint::min(kind, value), LOCAL_OVERRIDE, false);
        }
        ControlFlow::Break(state)
    }

    /// Stage 3: pad, then footprint, settings overrides
    pub fn local_setting_override<'q>(&self, mut state: ResolutionState<'q>) -> Stage<'q> {
        let kind = state.kind;
        if !kind.inherits_from_footprint() {
            return ControlFlow::Continue(state);
        }

        let a = state.a;
        if a.kind != ItemKind::Zone {
            if let Some(constraint) = setting_override(kind, &a.overrides) {
                state.note(|| format!("Item {} carries its own {} setting", a.id, kind));
                state.set(constraint, LOCAL_OVERRIDE, false);
                return ControlFlow::Break(state);
            }
        }
        if let Some(fp) = a.parent_footprint() {
            if let Some(constraint) = setting_override(kind, &fp.overrides) {
                state.note(|| format!("Footprint {} carries a {} setting", fp.id, kind));
                state.set(constraint, FOOTPRINT_OVERRIDE, false);
                return ControlFlow::Break(state);
            }
        }
        ControlFlow::Continue(state)
    }

    /// Stage 4: net class clearance table lookup
    ///
    /// Only taken when the constraint map walk could not produce anything
    /// else: no authored clearance rules, no coupled-pair overrides, both
    /// items copper and no trace requested.
    pub fn netclass_fast_path<'q>(&self, state: ResolutionState<'q>) -> Stage<'q> {
        if !self.fast_path
            || state.kind != ConstraintKind::Clearance
            || state.trace.is_some()
            || state.skip_implicit
            || self.rules.has_explicit_clearance_rules
            || self.rules.has_diff_pair_clearance_overrides
        {
            return ControlFlow::Continue(state);
        }

        let best = [Some(state.a), state.b]
            .into_iter()
            .flatten()
            .filter_map(|item| item.effective_netclass())
            .filter_map(|class| self.rules.netclass_clearances.get(class))
            .max_by_key(|entry: &&NetclassClearance| (entry.value, entry.order));

        let mut state = state;
        if let Some(entry) = best {
            state.constraint = Some(Constraint::min(ConstraintKind::Clearance, entry.value));
            state.provenance = entry.rule.name().to_string();
            state.implicit_min = true;
            state.severity = entry.rule.severity();
        }
        ControlFlow::Break(self.board_minimum_clamp(state))
    }

    /// Stage 5: walk the category's constraint entries with `subject` as item A
    pub fn walk_rules<'q>(&self, state: ResolutionState<'q>) -> ResolutionState<'q> {
        let subject = state.a;
        self.walk_with_subject(state, subject).0
    }

    fn walk_with_subject<'q>(
        &self,
        mut state: ResolutionState<'q>,
        subject: &'q BoardItem,
    ) -> (ResolutionState<'q>, bool) {
        let ctx = EvalContext {
            regions: self.regions,
        };
        let query = state.query().with_subject(subject);
        let mut matched = false;

        for entry in self.rules.map.get(state.kind) {
            if state.skip_implicit && entry.rule.is_implicit() {
                continue;
            }
            if let Some(rule_layers) = entry.layers {
                let on_layer = match state.layer {
                    Some(layer) => rule_layers.contains(layer),
                    None => rule_layers.intersects(self.config.enabled_layers),
                };
                if !on_layer {
                    continue;
                }
            }
            if entry.constraint.is_null() {
                continue;
            }

            let mut constraint = entry.constraint.clone();
            if state.kind == ConstraintKind::Disallow {
                let masked = constraint.disallow & disallow_mask_for(subject.kind);
                if masked.is_empty() {
                    continue;
                }
                constraint.disallow = masked;
            }

            if !entry.rule.matcher.matches(&ctx, &query) {
                state.note(|| format!("Rule '{}' does not match", entry.rule.name()));
                continue;
            }

            state.note(|| {
                let min = constraint
                    .value
                    .min
                    .map(|v| format!(" min {}", fmt_value(constraint.kind, v)))
                    .unwrap_or_default();
                format!("Rule '{}' matches{}", entry.rule.name(), min)
            });
            state.apply(entry, constraint);
            matched = true;
        }
        (state, matched)
    }

    /// Stage 6: parent footprint rules, zone settings, then board setup defaults
    pub fn fallback<'q>(&self, state: ResolutionState<'q>) -> ResolutionState<'q> {
        let kind = state.kind;
        if !kind.inherits_from_footprint() || state.constraint.is_some() {
            return state;
        }

        let mut state = state;
        let a = state.a;
        if let Some(fp) = a.parent_footprint() {
            state.note(|| format!("Nothing matched; trying parent footprint {}", fp.id));
            let (walked, matched) = self.walk_with_subject(state, fp);
            state = walked;
            if matched {
                return state;
            }
        }

        if is_zone_setting(kind) {
            if let Some(zone) = state.b.filter(|b| b.kind == ItemKind::Zone) {
                if let Some(constraint) = setting_override(kind, &zone.overrides) {
                    state.note(|| format!("Using zone {} {} setting", zone.id, kind));
                    state.set(constraint, ZONE_OVERRIDE, true);
                    return state;
                }
            }
        }

        let d = &self.config.design;
        let default = match kind {
            ConstraintKind::ZoneConnection => Constraint::zone_connection(d.default_zone_connection),
            ConstraintKind::ThermalReliefGap => setting_value(kind, d.default_thermal_gap),
            ConstraintKind::ThermalSpokeWidth => setting_value(kind, d.default_thermal_spoke_width),
            ConstraintKind::SolderMaskExpansion => setting_value(kind, d.solder_mask_expansion),
            ConstraintKind::SolderPasteAbsMargin => setting_value(kind, d.solder_paste_margin),
            ConstraintKind::SolderPasteRelMargin => setting_value(kind, d.solder_paste_ratio),
            _ => return state,
        };
        state.note(|| format!("Using board setup default for {}", kind));
        state.set(default, BOARD_SETUP, true);
        state
    }

    /// Stage 7: raise clearance and coupled gap minimums to the board minimum
    pub fn board_minimum_clamp<'q>(&self, mut state: ResolutionState<'q>) -> ResolutionState<'q> {
        let floor = self.config.design.min_clearance;
        let kind = state.kind;
        match kind {
            ConstraintKind::Clearance if !state.skip_implicit => {
                if state.current_min().map_or(true, |v| v < floor) {
                    state.note(|| format!("Clamped to board minimum {}", fmt_value(kind, floor)));
                    match &mut state.constraint {
                        Some(c) => c.value.min = Some(floor),
                        None => state.constraint = Some(Constraint::min(ConstraintKind::Clearance, floor)),
                    }
                    state.provenance = BOARD_MINIMUM.to_string();
                    state.implicit_min = true;
                }
            }
            ConstraintKind::DiffPairGap => {
                if state.current_min().is_some_and(|v| v < floor) {
                    state.note(|| format!("Gap clamped to board minimum {}", fmt_value(kind, floor)));
                    if let Some(c) = &mut state.constraint {
                        c.value.min = Some(floor);
                    }
                    state.provenance = BOARD_MINIMUM.to_string();
                    state.implicit_min = true;
                }
            }
            _ => {}
        }
        if state.constraint.is_none() {
            state.note(|| "No constraint configured".to_string());
        }
        state
    }

    /// Evaluate every assertion whose rule matches (a, b, layer)
    pub fn check_assertions(
        &self,
        a: &BoardItem,
        b: Option<&BoardItem>,
        layer: Option<LayerId>,
    ) -> Vec<AssertionOutcome> {
        let ctx = EvalContext {
            regions: self.regions,
        };
        let query = EvalQuery {
            a,
            b,
            kind: ConstraintKind::Assertion,
            layer,
        };

        self.rules
            .map
            .get(ConstraintKind::Assertion)
            .iter()
            .filter(|entry| match (entry.layers, layer) {
                (Some(rule_layers), Some(layer)) => rule_layers.contains(layer),
                _ => true,
            })
            .filter(|entry| entry.rule.matcher.matches(&ctx, &query))
            .filter_map(|entry| {
                let test = entry.assertion.as_ref()?;
                Some(AssertionOutcome {
                    rule: entry.rule.name().to_string(),
                    passed: test.evaluate(&ctx, &query),
                    severity: entry.rule.severity(),
                })
            })
            .collect()
    }

    /// Effective connection of a pad to a zone
    pub fn zone_connection(
        &self,
        pad: &BoardItem,
        zone: &BoardItem,
        layer: Option<LayerId>,
    ) -> ZoneConnection {
        let resolved = self.resolve(ConstraintKind::ZoneConnection, pad, Some(zone), layer);
        let connection = resolved
            .constraint
            .zone_connection
            .unwrap_or(self.config.design.default_zone_connection);
        match connection {
            ZoneConnection::ThtThermal if pad.has_hole() => ZoneConnection::ThermalRelief,
            ZoneConnection::ThtThermal => ZoneConnection::Full,
            other => other,
        }
    }
}
