//! Rule model
//!
//! A rule is a name, an optional condition, an optional layer filter and an
//! ordered list of constraints. Rules synthesized from board configuration
//! carry built-in predicates; authored rules carry condition text that the
//! compiler hands to the condition evaluator.

use crate::board::{ItemKind, LayerSet};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::constraint::Constraint;

/// Where an implicit rule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplicitSource {
    BoardSetup,
    ItemType,
    Netclass,
    TuningProfile,
    Keepout,
}

/// Implicit (synthesized) or authored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Implicit(ImplicitSource),
    Authored,
}

impl Provenance {
    pub fn is_implicit(self) -> bool {
        matches!(self, Provenance::Implicit(_))
    }
}

/// Violation severity attached to a rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Info,
    Ignore,
}

/// Built-in condition used by implicit rules
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    /// A's net class is exactly this class
    NetclassIs(String),
    /// A's or B's net class is exactly this class
    EitherNetclassIs(String),
    /// A's net class is one of these
    NetclassIn(Vec<String>),
    /// A is of this kind
    KindIs(ItemKind),
    /// A is a via of any construction
    IsVia,
    /// A's net belongs to a differential pair
    InDiffPair,
    /// A and B are the two nets of one differential pair
    CoupledDiffPair,
    /// A overlaps the keepout region with this geometry id
    IntersectsRegion(String),
    Not(Box<Predicate>),
    All(Vec<Predicate>),
}

impl Predicate {
    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::All(mut parts) => {
                parts.push(other);
                Predicate::All(parts)
            }
            first => Predicate::All(vec![first, other]),
        }
    }

    pub fn negate(self) -> Predicate {
        Predicate::Not(Box::new(self))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::NetclassIs(class) => write!(f, "A.NetClass == '{}'", class),
            Predicate::EitherNetclassIs(class) => {
                write!(f, "A.NetClass == '{0}' || B.NetClass == '{0}'", class)
            }
            Predicate::NetclassIn(classes) => {
                let parts: Vec<String> = classes
                    .iter()
                    .map(|c| format!("A.NetClass == '{}'", c))
                    .collect();
                write!(f, "({})", parts.join(" || "))
            }
            Predicate::KindIs(kind) => match kind.via_type_name() {
                Some(via) => write!(f, "A.Via_Type == '{}'", via),
                None => write!(f, "A.Type == '{}'", kind.type_name()),
            },
            Predicate::IsVia => f.write_str("A.Type == 'Via'"),
            Predicate::InDiffPair => f.write_str("A.inDiffPair('*')"),
            Predicate::CoupledDiffPair => f.write_str("A.isCoupledDiffPair()"),
            Predicate::IntersectsRegion(id) => write!(f, "A.intersectsArea('{}')", id),
            Predicate::Not(inner) => write!(f, "!({})", inner),
            Predicate::All(parts) => {
                let parts: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
                f.write_str(&parts.join(" && "))
            }
        }
    }
}

/// Condition attached to a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuleCondition {
    /// Condition text for the condition evaluator
    Expression(String),
    Builtin(Predicate),
}

impl RuleCondition {
    /// Text shown in diagnostics
    pub fn text(&self) -> String {
        match self {
            RuleCondition::Expression(text) => text.clone(),
            RuleCondition::Builtin(predicate) => predicate.to_string(),
        }
    }
}

/// A design rule
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub condition: Option<RuleCondition>,
    /// `None` means every layer
    pub layers: Option<LayerSet>,
    pub constraints: Vec<Constraint>,
    pub severity: Option<Severity>,
    pub provenance: Provenance,
}

impl Rule {
    pub fn authored(name: &str) -> Self {
        Self {
            name: name.to_string(),
            condition: None,
            layers: None,
            constraints: Vec::new(),
            severity: None,
            provenance: Provenance::Authored,
        }
    }

    pub fn implicit(name: &str, source: ImplicitSource) -> Self {
        Self {
            provenance: Provenance::Implicit(source),
            ..Self::authored(name)
        }
    }

    /// Attach condition text
    pub fn when(mut self, expression: &str) -> Self {
        self.condition = Some(RuleCondition::Expression(expression.to_string()));
        self
    }

    pub fn when_builtin(mut self, predicate: Predicate) -> Self {
        self.condition = Some(RuleCondition::Builtin(predicate));
        self
    }

    pub fn on_layers(mut self, layers: LayerSet) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn is_implicit(&self) -> bool {
        self.provenance.is_implicit()
    }
}
