//! Implicit rule synthesis
//!
//! Board setup, net class settings, tuning profiles and keepout regions are
//! turned into ordinary rules so one resolution walk handles them and
//! authored rules alike. Order matters: within a category the last matching
//! rule wins, so rules are emitted from most general to most specific.

use crate::board::{BoardConfig, ItemKind, LayerId, LayerSet, ViaType};
use log::debug;

use super::constraint::{Constraint, ConstraintKind};
use super::rule::{ImplicitSource, Predicate, Rule};

/// Build the complete implicit rule list for a configuration snapshot
pub fn synthesize_implicit_rules(config: &BoardConfig) -> Vec<Rule> {
    let mut rules = board_setup_rules(config);
    rules.extend(item_type_rules(config));
    rules.extend(netclass_rules(config));
    rules.extend(tuning_profile_rules(config));
    rules.extend(keepout_rules(config));

    debug!(
        "[Rules] Synthesized {} implicit rules ({} net classes, {} tuning profiles, {} keepouts)",
        rules.len(),
        config.netclasses.len(),
        config.tuning_profiles.len(),
        config.keepouts.len()
    );
    rules
}

fn setup_rule(name: &str) -> Rule {
    Rule::implicit(&format!("board setup: {}", name), ImplicitSource::BoardSetup)
}

/// One unconditional rule per board-wide metric family
///
/// Copper clearance has no rule here; its board minimum is applied as a
/// clamp after resolution.
pub fn board_setup_rules(config: &BoardConfig) -> Vec<Rule> {
    let d = &config.design;
    let silk_layers = LayerSet::single(LayerId::F_SILKS).with(LayerId::B_SILKS);

    vec![
        setup_rule("minimum hole clearance")
            .with_constraint(Constraint::min(ConstraintKind::HoleClearance, d.min_hole_clearance)),
        setup_rule("minimum hole to hole")
            .with_constraint(Constraint::min(ConstraintKind::HoleToHole, d.min_hole_to_hole)),
        setup_rule("copper to edge clearance")
            .with_constraint(Constraint::min(ConstraintKind::EdgeClearance, d.copper_edge_clearance)),
        setup_rule("courtyard clearance").with_constraint(Constraint::min(
            ConstraintKind::CourtyardClearance,
            d.courtyard_clearance,
        )),
        setup_rule("silkscreen")
            .on_layers(silk_layers)
            .with_constraint(Constraint::min(ConstraintKind::SilkClearance, d.min_silk_clearance))
            .with_constraint(Constraint::min(ConstraintKind::TextHeight, d.min_silk_text_height))
            .with_constraint(Constraint::min(
                ConstraintKind::TextThickness,
                d.min_silk_text_thickness,
            )),
        setup_rule("minimum track width")
            .with_constraint(Constraint::min(ConstraintKind::TrackWidth, d.min_track_width)),
        setup_rule("minimum connection width").with_constraint(Constraint::min(
            ConstraintKind::ConnectionWidth,
            d.min_connection_width,
        )),
        setup_rule("minimum annular width").with_constraint(Constraint::min(
            ConstraintKind::AnnularWidth,
            d.min_via_annular_width,
        )),
        setup_rule("minimum via diameter")
            .with_constraint(Constraint::min(ConstraintKind::ViaDiameter, d.min_via_diameter)),
        setup_rule("minimum through hole")
            .with_constraint(Constraint::min(ConstraintKind::HoleSize, d.min_through_hole)),
        setup_rule("minimum thermal spokes").with_constraint(Constraint::min(
            ConstraintKind::MinResolvedSpokes,
            d.min_resolved_spokes,
        )),
    ]
}

/// Defaults keyed on an item sub-type rather than a net class
pub fn item_type_rules(config: &BoardConfig) -> Vec<Rule> {
    let d = &config.design;
    let mut rules = vec![Rule::implicit("board setup: micro-via", ImplicitSource::ItemType)
        .when_builtin(Predicate::KindIs(ItemKind::Via(ViaType::Micro)))
        .with_constraint(Constraint::min(ConstraintKind::ViaDiameter, d.min_microvia_diameter))
        .with_constraint(Constraint::min(ConstraintKind::HoleSize, d.min_microvia_drill))];

    if d.min_barcode_height > 0 {
        rules.push(
            Rule::implicit("board setup: barcode", ImplicitSource::ItemType)
                .when_builtin(Predicate::KindIs(ItemKind::Barcode))
                .with_constraint(Constraint::min(ConstraintKind::TextHeight, d.min_barcode_height)),
        );
    }
    rules
}

fn netclass_rule(class: &str) -> Rule {
    Rule::implicit(&format!("netclass '{}'", class), ImplicitSource::Netclass)
}

/// Net class rules, clearance rules first and sorted ascending
///
/// When an item pair straddles two classes both clearance rules match; the
/// sort puts the larger value later so it wins. The sort is stable, so equal
/// clearances keep configuration order.
pub fn netclass_rules(config: &BoardConfig) -> Vec<Rule> {
    let mut clearances: Vec<(&str, i32)> = config
        .netclasses
        .iter()
        .filter_map(|(class, settings)| settings.clearance.map(|c| (class.as_str(), c)))
        .collect();
    clearances.sort_by_key(|(_, clearance)| *clearance);

    let mut rules: Vec<Rule> = clearances
        .into_iter()
        .map(|(class, clearance)| {
            netclass_rule(class)
                .when_builtin(Predicate::EitherNetclassIs(class.to_string()))
                .with_constraint(Constraint::min(ConstraintKind::Clearance, clearance))
        })
        .collect();

    for (class, settings) in &config.netclasses {
        let is_class = || Predicate::NetclassIs(class.clone());

        if let Some(width) = settings.track_width {
            rules.push(
                netclass_rule(class)
                    .when_builtin(is_class())
                    .with_constraint(Constraint::opt(ConstraintKind::TrackWidth, width)),
            );
        }

        if settings.via_diameter.is_some() || settings.via_drill.is_some() {
            let mut rule = netclass_rule(class).when_builtin(
                is_class()
                    .and(Predicate::IsVia)
                    .and(Predicate::KindIs(ItemKind::Via(ViaType::Micro)).negate()),
            );
            if let Some(diameter) = settings.via_diameter {
                rule = rule.with_constraint(Constraint::opt(ConstraintKind::ViaDiameter, diameter));
            }
            if let Some(drill) = settings.via_drill {
                rule = rule.with_constraint(Constraint::opt(ConstraintKind::HoleSize, drill));
            }
            rules.push(rule);
        }

        if settings.microvia_diameter.is_some() || settings.microvia_drill.is_some() {
            let mut rule = netclass_rule(class)
                .when_builtin(is_class().and(Predicate::KindIs(ItemKind::Via(ViaType::Micro))));
            if let Some(diameter) = settings.microvia_diameter {
                rule = rule.with_constraint(Constraint::opt(ConstraintKind::ViaDiameter, diameter));
            }
            if let Some(drill) = settings.microvia_drill {
                rule = rule.with_constraint(Constraint::opt(ConstraintKind::HoleSize, drill));
            }
            rules.push(rule);
        }

        if settings.diff_pair_width.is_some() || settings.diff_pair_gap.is_some() {
            let mut rule =
                netclass_rule(class).when_builtin(is_class().and(Predicate::InDiffPair));
            if let Some(width) = settings.diff_pair_width {
                rule = rule.with_constraint(Constraint::opt(ConstraintKind::TrackWidth, width));
            }
            if let Some(gap) = settings.diff_pair_gap {
                rule = rule.with_constraint(Constraint::opt(ConstraintKind::DiffPairGap, gap));
            }
            rules.push(rule);
        }
    }
    rules
}

/// Per-layer geometry targets of tuning profiles
///
/// A net class naming a profile that doesn't exist contributes nothing.
pub fn tuning_profile_rules(config: &BoardConfig) -> Vec<Rule> {
    let mut rules = Vec::new();

    for (class, settings) in &config.netclasses {
        if let Some(profile) = &settings.tuning_profile {
            if !config.tuning_profiles.contains_key(profile) {
                debug!(
                    "[Rules] Net class '{}' references missing tuning profile '{}', skipped",
                    class, profile
                );
            }
        }
    }

    for (name, profile) in &config.tuning_profiles {
        let classes: Vec<(&String, Option<i32>)> = config
            .netclasses
            .iter()
            .filter(|(_, s)| s.tuning_profile.as_deref() == Some(name.as_str()))
            .map(|(class, s)| (class, s.clearance))
            .collect();
        if classes.is_empty() {
            continue;
        }
        let class_names: Vec<String> = classes.iter().map(|(c, _)| (*c).clone()).collect();

        for target in &profile.layers {
            let layer_name = target.layer.name();
            let layers = LayerSet::single(target.layer);

            rules.push(
                Rule::implicit(
                    &format!("tuning profile '{}' ({})", name, layer_name),
                    ImplicitSource::TuningProfile,
                )
                .when_builtin(Predicate::NetclassIn(class_names.clone()))
                .on_layers(layers)
                .with_constraint(Constraint::exact(ConstraintKind::TrackWidth, target.width)),
            );

            let gap = match (profile.differential, target.diff_pair_gap) {
                (true, Some(gap)) => gap,
                _ => continue,
            };

            rules.push(
                Rule::implicit(
                    &format!("tuning profile '{}' ({}) diff pair", name, layer_name),
                    ImplicitSource::TuningProfile,
                )
                .when_builtin(Predicate::NetclassIn(class_names.clone()).and(Predicate::InDiffPair))
                .on_layers(layers)
                .with_constraint(Constraint::exact(ConstraintKind::DiffPairGap, gap)),
            );

            // Coupled traces may sit closer than the class clearance allows
            for (class, clearance) in &classes {
                if clearance.is_some_and(|c| gap < c) {
                    rules.push(
                        Rule::implicit(
                            &format!("tuning profile '{}' ({}) diff pair clearance", name, layer_name),
                            ImplicitSource::TuningProfile,
                        )
                        .when_builtin(
                            Predicate::NetclassIs((*class).clone()).and(Predicate::CoupledDiffPair),
                        )
                        .on_layers(layers)
                        .with_constraint(Constraint::min(ConstraintKind::Clearance, gap)),
                    );
                }
            }
        }
    }
    rules
}

/// One disallow rule per keepout region that keeps anything out
pub fn keepout_rules(config: &BoardConfig) -> Vec<Rule> {
    config
        .keepouts
        .iter()
        .filter_map(|region| {
            let flags = region.keepout.to_disallow_flags();
            if flags.is_empty() {
                return None;
            }
            Some(
                Rule::implicit(
                    &format!("keepout '{}'", region.display_name()),
                    ImplicitSource::Keepout,
                )
                .when_builtin(Predicate::IntersectsRegion(region.id.clone()))
                .on_layers(region.layers)
                .with_constraint(Constraint::disallow(flags)),
            )
        })
        .collect()
}
