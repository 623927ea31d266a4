// Resolution behaviour through the public engine API
use drc_rules::board::{KeepoutFlags, KeepoutRegion, LocalOverrides, NetclassSettings};
use drc_rules::engine::{BOARD_MINIMUM, FOOTPRINT_OVERRIDE, LOCAL_OVERRIDE};
use drc_rules::rules::{DisallowFlags, RuleDocument};
use drc_rules::units::mm;
use drc_rules::{
    BoardConfig, BoardItem, Constraint, ConstraintKind, DrcEngine, EngineOptions, ItemKind,
    LayerId, LayerSet, Rule,
};
use std::sync::Arc;

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn config() -> BoardConfig {
        let mut config = BoardConfig::default();
        config.design.min_clearance = mm(0.15);
        for (name, clearance) in [("Default", 0.2), ("Power", 0.3), ("Tiny", 0.1)] {
            config.netclasses.insert(
                name.to_string(),
                NetclassSettings {
                    clearance: Some(mm(clearance)),
                    ..Default::default()
                },
            );
        }
        config
    }

    fn engine(rules: Vec<Rule>) -> DrcEngine {
        let mut engine = DrcEngine::new();
        engine.initialize_session(rules, config()).unwrap();
        engine
    }

    fn track(id: u64, net: &str, class: &str) -> BoardItem {
        BoardItem::new(id, ItemKind::Track)
            .on_layer(LayerId::F_CU)
            .with_net(net, class)
            .with_bounds([0, 0, mm(1.0), mm(0.2)])
    }

    #[test]
    fn test_power_netclass_clearance() {
        let engine = engine(Vec::new());
        let power = track(1, "VCC", "Power");
        let signal = track(2, "SIG", "Default");

        let resolved = engine.resolve(ConstraintKind::Clearance, &power, Some(&signal), Some(LayerId::F_CU));
        assert_eq!(resolved.min(), Some(mm(0.3)));
        assert_eq!(resolved.provenance, "netclass 'Power'");
        assert!(resolved.implicit_min);
    }

    #[test]
    fn test_authored_rule_wins_over_netclass() {
        let rule = Rule::authored("power to power")
            .when("A.NetClass == 'Power' && B.NetClass == 'Power'")
            .with_constraint(Constraint::min(ConstraintKind::Clearance, mm(0.5)));
        let engine = engine(vec![rule]);

        let a = track(1, "VCC", "Power");
        let b = track(2, "VBAT", "Power");
        let resolved = engine.resolve(ConstraintKind::Clearance, &a, Some(&b), Some(LayerId::F_CU));
        assert_eq!(resolved.min(), Some(mm(0.5)));
        assert_eq!(resolved.provenance, "power to power");
        assert!(!resolved.implicit_min);

        // Power against Default still falls through to the net class rule
        let c = track(3, "SIG", "Default");
        let resolved = engine.resolve(ConstraintKind::Clearance, &a, Some(&c), Some(LayerId::F_CU));
        assert_eq!(resolved.provenance, "netclass 'Power'");
    }

    #[test]
    fn test_non_copper_pair_has_no_clearance() {
        let engine = engine(Vec::new());
        let silk = BoardItem::new(1, ItemKind::Graphic).on_layer(LayerId::F_SILKS);
        let track = track(2, "SIG", "Default");

        let resolved = engine.resolve(ConstraintKind::Clearance, &silk, Some(&track), Some(LayerId::F_CU));
        assert!(resolved.is_null());
    }

    #[test]
    fn test_netclass_order_does_not_matter() {
        let engine = engine(Vec::new());
        let power = track(1, "VCC", "Power");
        let signal = track(2, "SIG", "Default");

        let ab = engine.resolve(ConstraintKind::Clearance, &power, Some(&signal), None);
        let ba = engine.resolve(ConstraintKind::Clearance, &signal, Some(&power), None);
        assert_eq!(ab, ba);
        assert_eq!(ab.min(), Some(mm(0.3)));
    }

    #[test]
    fn test_netclass_below_board_minimum_is_clamped() {
        let engine = engine(Vec::new());
        let a = track(1, "A", "Tiny");
        let b = track(2, "B", "Tiny");

        let resolved = engine.resolve(ConstraintKind::Clearance, &a, Some(&b), None);
        assert_eq!(resolved.min(), Some(mm(0.15)));
        assert_eq!(resolved.provenance, BOARD_MINIMUM);
    }

    #[test]
    fn test_local_override_never_below_board_minimum() {
        let engine = engine(Vec::new());
        let other = track(2, "SIG", "Default");

        for (value, expected, provenance) in [
            (0.05, 0.15, BOARD_MINIMUM),
            (0.15, 0.15, LOCAL_OVERRIDE),
            (0.4, 0.4, LOCAL_OVERRIDE),
        ] {
            let item = track(1, "VCC", "Power").with_overrides(LocalOverrides {
                clearance: Some(mm(value)),
                ..Default::default()
            });
            let resolved = engine.resolve(ConstraintKind::Clearance, &item, Some(&other), None);
            assert_eq!(resolved.min(), Some(mm(expected)), "override {}", value);
            assert_eq!(resolved.provenance, provenance);
        }
    }

    #[test]
    fn test_fast_path_matches_full_walk() {
        let mut fast = engine(Vec::new());
        fast.set_options(EngineOptions {
            netclass_fast_path: true,
        });
        let slow = engine(Vec::new()).with_options(EngineOptions {
            netclass_fast_path: false,
        });

        let classes = ["Default", "Power", "Tiny", "Unconfigured"];
        let items: Vec<BoardItem> = classes
            .iter()
            .enumerate()
            .map(|(i, class)| track(i as u64 + 1, &format!("N{}", i), class))
            .collect();

        for a in &items {
            for b in &items {
                let expected = slow.resolve(ConstraintKind::Clearance, a, Some(b), Some(LayerId::F_CU));
                let actual = fast.resolve(ConstraintKind::Clearance, a, Some(b), Some(LayerId::F_CU));
                assert_eq!(actual.min(), expected.min());
                assert_eq!(actual.provenance, expected.provenance);
            }
        }
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let rule = Rule::authored("wide power")
            .when("A.NetClass == 'Power'")
            .with_constraint(
                Constraint::min(ConstraintKind::TrackWidth, mm(0.4)).with_opt(mm(0.5)),
            );
        let engine = engine(vec![rule]);
        let a = track(1, "VCC", "Power");

        let first = engine.resolve(ConstraintKind::TrackWidth, &a, None, Some(LayerId::F_CU));
        for _ in 0..10 {
            assert_eq!(
                engine.resolve(ConstraintKind::TrackWidth, &a, None, Some(LayerId::F_CU)),
                first
            );
        }
        assert_eq!(first.opt(), Some(mm(0.5)));
    }

    #[test]
    fn test_keepout_disallow_is_masked_per_item_kind() {
        let mut config = config();
        config.keepouts.push(KeepoutRegion {
            id: "ko-1".into(),
            name: "BGA".into(),
            layers: LayerSet::single(LayerId::F_CU),
            outline: vec![[0, 0], [mm(5.0), 0], [mm(5.0), mm(5.0)], [0, mm(5.0)]],
            keepout: KeepoutFlags {
                vias: true,
                tracks: true,
                ..Default::default()
            },
        });
        let mut engine = DrcEngine::new();
        engine.initialize_session(Vec::new(), config).unwrap();

        let via = BoardItem::new(1, ItemKind::Via(drc_rules::board::ViaType::Through))
            .on_layers(LayerSet::single(LayerId::F_CU).with(LayerId::B_CU))
            .with_net("GND", "Default")
            .with_bounds([mm(1.0), mm(1.0), mm(1.5), mm(1.5)]);
        let resolved = engine.resolve(ConstraintKind::Disallow, &via, None, Some(LayerId::F_CU));
        assert_eq!(resolved.provenance, "keepout 'BGA'");
        assert_eq!(resolved.constraint.disallow, DisallowFlags::THROUGH_VIAS);

        let pad = BoardItem::new(2, ItemKind::Pad(drc_rules::board::PadType::Smd))
            .on_layer(LayerId::F_CU)
            .with_bounds([mm(1.0), mm(1.0), mm(1.5), mm(1.5)]);
        assert!(engine
            .resolve(ConstraintKind::Disallow, &pad, None, Some(LayerId::F_CU))
            .is_null());

        let outside = via.clone().with_bounds([mm(10.0), mm(10.0), mm(10.5), mm(10.5)]);
        assert!(engine
            .resolve(ConstraintKind::Disallow, &outside, None, Some(LayerId::F_CU))
            .is_null());
    }

    #[test]
    fn test_pads_inherit_footprint_settings() {
        let rule = Rule::authored("U1 mask")
            .when("A.Type == 'Footprint' && A.Reference == 'U1'")
            .with_constraint(Constraint::opt(ConstraintKind::SolderMaskExpansion, mm(0.1)));
        let engine = engine(vec![rule]);

        let footprint = Arc::new(BoardItem::new(10, ItemKind::Footprint).with_reference("U1"));
        let pad = BoardItem::new(11, ItemKind::Pad(drc_rules::board::PadType::Smd))
            .on_layer(LayerId::F_CU)
            .with_pad_number("1")
            .with_parent(Arc::clone(&footprint));
        let resolved = engine.resolve(ConstraintKind::SolderMaskExpansion, &pad, None, None);
        assert_eq!(resolved.opt(), Some(mm(0.1)));
        assert_eq!(resolved.provenance, "U1 mask");

        // A footprint-level setting beats every rule
        let overridden = Arc::new(
            BoardItem::new(20, ItemKind::Footprint)
                .with_reference("U1")
                .with_overrides(LocalOverrides {
                    solder_mask_expansion: Some(mm(0.02)),
                    ..Default::default()
                }),
        );
        let pad = pad.with_parent(overridden);
        let resolved = engine.resolve(ConstraintKind::SolderMaskExpansion, &pad, None, None);
        assert_eq!(resolved.opt(), Some(mm(0.02)));
        assert_eq!(resolved.provenance, FOOTPRINT_OVERRIDE);
    }

    #[test]
    fn test_broken_document_falls_back_to_implicit_rules() {
        let doc = RuleDocument::from_json_str(
            r#"{"rules": [
                {"name": "ok", "condition": "A.NetClass == 'Power'",
                 "constraints": [{"type": "clearance", "min": 1.0}]},
                {"name": "bad", "condition": "A.NetClass == 'Power' &&",
                 "constraints": [{"type": "clearance", "min": 2.0}]}
            ]}"#,
        )
        .unwrap();

        let mut engine = DrcEngine::new();
        let err = engine
            .initialize_session(doc.into_rules(), config())
            .unwrap_err();
        assert_eq!(err.rule, "bad");

        // Neither authored rule survives, including the valid one
        let a = track(1, "VCC", "Power");
        let b = track(2, "SIG", "Default");
        let resolved = engine.resolve(ConstraintKind::Clearance, &a, Some(&b), None);
        assert_eq!(resolved.min(), Some(mm(0.3)));
        assert_eq!(resolved.provenance, "netclass 'Power'");
        assert_eq!(engine.stats().authored_rules, 0);
    }
}
