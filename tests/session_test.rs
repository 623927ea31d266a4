// End-to-end sessions loaded from configuration and rule documents on disk
use drc_rules::board::{PadType, ViaType};
use drc_rules::engine::BOARD_SETUP;
use drc_rules::rules::{RuleDocument, Severity, ZoneConnection};
use drc_rules::units::mm;
use drc_rules::{BoardConfig, BoardItem, ConstraintKind, DrcEngine, ItemKind, LayerId, LayerSet};

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn engine() -> DrcEngine {
        let config = BoardConfig::from_json_file("tests/data/usb_board.json")
            .expect("Failed to load board configuration");
        let rules = RuleDocument::from_json_file("tests/data/usb_rules.json")
            .expect("Failed to load rule document");

        let mut engine = DrcEngine::new();
        engine.initialize_session(rules.into_rules(), config).unwrap();
        engine
    }

    fn usb(id: u64, net: &str, layer: LayerId) -> BoardItem {
        BoardItem::new(id, ItemKind::Track)
            .on_layer(layer)
            .with_net(net, "USB")
            .with_diff_pair("USB")
            .with_bounds([mm(20.0), mm(20.0), mm(21.0), mm(20.2)])
    }

    #[test]
    fn test_session_stats() {
        let engine = engine();
        let stats = engine.stats();
        println!("{:#?}", stats);

        assert_eq!(stats.authored_rules, 2);
        assert_eq!(stats.keepout_regions, 1);
        assert!(!stats.has_explicit_clearance_rules);
        assert!(stats.has_diff_pair_clearance_overrides);
    }

    #[test]
    fn test_coupled_pair_uses_profile_gap_as_clearance() {
        let engine = engine();
        let p = usb(1, "USB_P", LayerId::F_CU);
        let n = usb(2, "USB_N", LayerId::F_CU);

        let resolved = engine.resolve(ConstraintKind::Clearance, &p, Some(&n), Some(LayerId::F_CU));
        assert_eq!(resolved.min(), Some(mm(0.11)));
        assert_eq!(resolved.provenance, "tuning profile 'usb90' (F.Cu) diff pair clearance");

        // Same class but not the partner net: class clearance applies
        let other = usb(3, "USB2_P", LayerId::F_CU).with_diff_pair("USB2");
        let resolved = engine.resolve(ConstraintKind::Clearance, &p, Some(&other), Some(LayerId::F_CU));
        assert_eq!(resolved.min(), Some(mm(0.2)));
    }

    #[test]
    fn test_profile_geometry_per_layer() {
        let engine = engine();
        let front = usb(1, "USB_P", LayerId::F_CU);
        let back = usb(2, "USB_P", LayerId::B_CU);

        let width = engine.resolve(ConstraintKind::TrackWidth, &front, None, Some(LayerId::F_CU));
        assert_eq!(width.opt(), Some(mm(0.16)));
        assert_eq!(width.provenance, "tuning profile 'usb90' (F.Cu)");

        let width = engine.resolve(ConstraintKind::TrackWidth, &back, None, Some(LayerId::B_CU));
        assert_eq!(width.opt(), Some(mm(0.17)));

        let gap = engine.resolve(ConstraintKind::DiffPairGap, &front, None, Some(LayerId::F_CU));
        assert_eq!(gap.opt(), Some(mm(0.11)));
        assert_eq!(gap.min(), Some(mm(0.11)));
    }

    #[test]
    fn test_layer_filtered_authored_rule() {
        let engine = engine();
        let top = BoardItem::new(1, ItemKind::Track)
            .on_layer(LayerId::F_CU)
            .with_net("SIG", "Default");
        let bottom = BoardItem::new(2, ItemKind::Track)
            .on_layer(LayerId::B_CU)
            .with_net("SIG", "Default");

        let resolved = engine.resolve(ConstraintKind::TrackWidth, &top, None, Some(LayerId::F_CU));
        assert_eq!(resolved.min(), Some(mm(0.15)));
        assert_eq!(resolved.opt(), Some(mm(0.25)));

        let resolved = engine.resolve(ConstraintKind::TrackWidth, &bottom, None, Some(LayerId::B_CU));
        assert_eq!(resolved.min(), Some(mm(0.3)));
        assert_eq!(resolved.opt(), Some(mm(0.25)));
        assert_eq!(resolved.provenance, "bottom signal width");
    }

    #[test]
    fn test_via_settings_by_class() {
        let engine = engine();
        let via = BoardItem::new(1, ItemKind::Via(ViaType::Through))
            .on_layers(LayerSet::single(LayerId::F_CU).with(LayerId::B_CU))
            .with_net("VCC", "Power");

        let diameter = engine.resolve(ConstraintKind::ViaDiameter, &via, None, None);
        assert_eq!(diameter.min(), Some(mm(0.4)));
        assert_eq!(diameter.opt(), Some(mm(0.8)));

        let outcomes = engine.check_assertions(&via, None, None);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].passed);
        assert_eq!(outcomes[0].severity, Severity::Warning);

        let signal_via = BoardItem::new(2, ItemKind::Via(ViaType::Micro))
            .on_layer(LayerId::F_CU)
            .with_net("SIG", "Default");
        let outcomes = engine.check_assertions(&signal_via, None, None);
        assert!(!outcomes[0].passed);

        let drill = engine.resolve(ConstraintKind::HoleSize, &signal_via, None, None);
        assert_eq!(drill.min(), Some(mm(0.1)));
        assert_eq!(drill.provenance, "board setup: micro-via");
    }

    #[test]
    fn test_zone_connection_defaults() {
        let engine = engine();
        let zone = BoardItem::new(1, ItemKind::Zone)
            .on_layer(LayerId::F_CU)
            .with_net("GND", "Default");
        let smd = BoardItem::new(2, ItemKind::Pad(PadType::Smd))
            .on_layer(LayerId::F_CU)
            .with_net("GND", "Default");
        let tht = BoardItem::new(3, ItemKind::Pad(PadType::ThroughHole))
            .on_layers(LayerSet::single(LayerId::F_CU).with(LayerId::B_CU))
            .with_net("GND", "Default");

        assert_eq!(engine.zone_connection(&smd, &zone, None), ZoneConnection::Full);
        assert_eq!(
            engine.zone_connection(&tht, &zone, None),
            ZoneConnection::ThermalRelief
        );

        let resolved = engine.resolve(ConstraintKind::ZoneConnection, &smd, Some(&zone), None);
        assert_eq!(resolved.provenance, BOARD_SETUP);
    }

    #[test]
    fn test_keepout_from_configuration() {
        let engine = engine();
        let track = BoardItem::new(1, ItemKind::Track)
            .on_layer(LayerId::F_CU)
            .with_net("SIG", "Default")
            .with_bounds([mm(1.0), mm(1.0), mm(2.0), mm(1.2)]);

        let resolved = engine.resolve(ConstraintKind::Disallow, &track, None, Some(LayerId::F_CU));
        assert_eq!(resolved.provenance, "keepout 'antenna'");
    }
}
