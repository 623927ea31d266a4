//! Authored rule documents
//!
//! Rules authored by the user arrive as a JSON document. Lengths are given
//! in millimetres and converted to nanometres on load; conditions stay as
//! text until the session compiles them.

use crate::board::LayerSet;
use crate::units::{mm, ratio_to_ppm};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::constraint::{Constraint, ConstraintKind, DisallowFlags, ValueUnit, ZoneConnection};
use super::error::RuleDocumentError;
use super::rule::{Rule, RuleCondition, Severity};

/// Newest document version this loader understands
pub const RULE_DOCUMENT_VERSION: u32 = 1;

/// A parsed rule document
#[derive(Debug, Clone, PartialEq)]
pub struct RuleDocument {
    pub version: u32,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDocument {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    rules: Vec<RawRule>,
}

fn default_version() -> u32 {
    RULE_DOCUMENT_VERSION
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    name: String,
    #[serde(default)]
    condition: Option<String>,
    #[serde(default)]
    layers: Option<LayerSet>,
    #[serde(default)]
    severity: Option<Severity>,
    #[serde(default)]
    constraints: Vec<RawConstraint>,
}

#[derive(Debug, Deserialize)]
#[serde(try_from = "String")]
struct KindName(ConstraintKind);

impl TryFrom<String> for KindName {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        ConstraintKind::from_name(&name)
            .filter(|k| *k != ConstraintKind::None)
            .map(KindName)
            .ok_or_else(|| format!("unknown constraint type '{}'", name))
    }
}

#[derive(Debug, Deserialize)]
#[serde(try_from = "String")]
struct DisallowName(DisallowFlags);

impl TryFrom<String> for DisallowName {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        DisallowFlags::from_name(&name)
            .map(DisallowName)
            .ok_or_else(|| format!("unknown disallow item type '{}'", name))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConstraint {
    #[serde(rename = "type")]
    kind: KindName,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    opt: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    zone_connection: Option<ZoneConnection>,
    #[serde(default)]
    disallow: Vec<DisallowName>,
    #[serde(default)]
    assertion: Option<String>,
}

fn invalid(rule: &str, message: impl Into<String>) -> RuleDocumentError {
    RuleDocumentError::InvalidRule {
        rule: rule.to_string(),
        message: message.into(),
    }
}

fn convert_value(kind: ConstraintKind, value: f64) -> i32 {
    match kind.unit() {
        ValueUnit::Length => mm(value),
        ValueUnit::Ratio => ratio_to_ppm(value),
        ValueUnit::Count | ValueUnit::NoValue => value.round() as i32,
    }
}

impl RawConstraint {
    fn into_constraint(self, rule: &str) -> Result<Constraint, RuleDocumentError> {
        let kind = self.kind.0;
        let has_value = self.min.is_some() || self.opt.is_some() || self.max.is_some();

        if kind.unit() == ValueUnit::NoValue && has_value {
            return Err(invalid(rule, format!("'{}' constraint takes no min/opt/max", kind)));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(invalid(rule, format!("'{}' constraint has min > max", kind)));
            }
        }

        let mut constraint = Constraint::new(kind);
        constraint.value.min = self.min.map(|v| convert_value(kind, v));
        constraint.value.opt = self.opt.map(|v| convert_value(kind, v));
        constraint.value.max = self.max.map(|v| convert_value(kind, v));

        match kind {
            ConstraintKind::ZoneConnection => {
                constraint.zone_connection = Some(
                    self.zone_connection
                        .ok_or_else(|| invalid(rule, "zone_connection constraint needs a value"))?,
                );
            }
            ConstraintKind::Disallow => {
                if self.disallow.is_empty() {
                    return Err(invalid(rule, "disallow constraint names no item types"));
                }
                constraint.disallow = self
                    .disallow
                    .iter()
                    .fold(DisallowFlags::empty(), |acc, name| acc | name.0);
            }
            ConstraintKind::Assertion => {
                let test = self
                    .assertion
                    .filter(|t| !t.trim().is_empty())
                    .ok_or_else(|| invalid(rule, "assertion constraint needs a test expression"))?;
                constraint.assertion = Some(test);
            }
            _ => {}
        }
        Ok(constraint)
    }
}

impl RuleDocument {
    /// Parse a rule document
    pub fn from_json_str(json: &str) -> Result<Self, RuleDocumentError> {
        let raw: RawDocument =
            serde_json::from_str(json).map_err(|e| RuleDocumentError::Syntax {
                line: e.line(),
                column: e.column(),
                message: e.to_string(),
            })?;

        if raw.version > RULE_DOCUMENT_VERSION {
            return Err(RuleDocumentError::UnsupportedVersion(raw.version));
        }

        let mut rules = Vec::with_capacity(raw.rules.len());
        for (index, raw_rule) in raw.rules.into_iter().enumerate() {
            let name = raw_rule.name.trim().to_string();
            if name.is_empty() {
                return Err(invalid(&format!("#{}", index + 1), "rule has no name"));
            }

            let mut rule = Rule::authored(&name);
            rule.condition = raw_rule
                .condition
                .filter(|c| !c.trim().is_empty())
                .map(RuleCondition::Expression);
            rule.layers = raw_rule.layers;
            rule.severity = raw_rule.severity;
            for raw_constraint in raw_rule.constraints {
                rule.constraints.push(raw_constraint.into_constraint(&name)?);
            }
            rules.push(rule);
        }

        Ok(RuleDocument {
            version: raw.version,
            rules,
        })
    }

    /// Load a rule document from disk
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = fs::read_to_string(&path).map_err(|e| {
            anyhow::anyhow!("Failed to open file {}: {}", path.as_ref().display(), e)
        })?;
        Ok(Self::from_json_str(&text)?)
    }

    pub fn into_rules(self) -> Vec<Rule> {
        self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::LayerId;

    #[test]
    fn test_parse_document() {
        let json = r#"{
            "version": 1,
            "rules": [
                {
                    "name": "power clearance",
                    "condition": "A.NetClass == 'Power' && B.NetClass == 'Power'",
                    "constraints": [{"type": "clearance", "min": 0.5}]
                },
                {
                    "name": "outer widths",
                    "layers": ["F.Cu", "B.Cu"],
                    "severity": "warning",
                    "constraints": [
                        {"type": "track_width", "min": 0.2, "opt": 0.25, "max": 1.0},
                        {"type": "solder_paste_rel_margin", "opt": -0.05},
                        {"type": "min_resolved_spokes", "min": 3}
                    ]
                },
                {
                    "name": "no vias under BGA",
                    "condition": "A.intersectsArea('BGA')",
                    "constraints": [{"type": "disallow", "disallow": ["through_via", "micro_via"]}]
                }
            ]
        }"#;

        let doc = RuleDocument::from_json_str(json).unwrap();
        assert_eq!(doc.rules.len(), 3);

        let power = &doc.rules[0];
        assert_eq!(power.constraints[0].value.min, Some(500_000));
        assert!(matches!(power.condition, Some(RuleCondition::Expression(_))));

        let widths = &doc.rules[1];
        assert_eq!(widths.severity, Some(Severity::Warning));
        assert_eq!(
            widths.layers,
            Some(LayerSet::single(LayerId::F_CU).with(LayerId::B_CU))
        );
        assert_eq!(widths.constraints[0].value.max, Some(1_000_000));
        assert_eq!(widths.constraints[1].value.opt, Some(-50_000));
        assert_eq!(widths.constraints[2].value.min, Some(3));

        let vias = &doc.rules[2];
        assert_eq!(
            vias.constraints[0].disallow,
            DisallowFlags::THROUGH_VIAS | DisallowFlags::MICRO_VIAS
        );
        assert!(!vias.is_implicit());
    }

    #[test]
    fn test_syntax_error_position() {
        let json = "{\n  \"rules\": [\n    {\"name\": \"x\",, }\n  ]\n}";
        match RuleDocument::from_json_str(json) {
            Err(RuleDocumentError::Syntax { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_constraint_type() {
        let json = r#"{"rules": [{"name": "x", "constraints": [{"type": "wobble", "min": 1}]}]}"#;
        match RuleDocument::from_json_str(json) {
            Err(RuleDocumentError::Syntax { message, .. }) => {
                assert!(message.contains("unknown constraint type 'wobble'"))
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_rules() {
        let no_value = r#"{"rules": [{"name": "z", "constraints": [{"type": "zone_connection"}]}]}"#;
        assert!(matches!(
            RuleDocument::from_json_str(no_value),
            Err(RuleDocumentError::InvalidRule { .. })
        ));

        let inverted = r#"{"rules": [{"name": "w", "constraints": [{"type": "track_width", "min": 2, "max": 1}]}]}"#;
        assert!(matches!(
            RuleDocument::from_json_str(inverted),
            Err(RuleDocumentError::InvalidRule { .. })
        ));

        let future = r#"{"version": 9, "rules": []}"#;
        assert_eq!(
            RuleDocument::from_json_str(future),
            Err(RuleDocumentError::UnsupportedVersion(9))
        );
    }
}
