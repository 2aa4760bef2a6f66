//! The intent IR: the structured action plan the core executes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CoreError;

/// Risk tier of a single step, 0 (read-only) through 3 (destructive).
///
/// Serializes as the bare integer on the wire (§6), not the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Risk {
    ReadOnly = 0,
    Modify = 1,
    Significant = 2,
    Destructive = 3,
}

impl Risk {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Risk::ReadOnly),
            1 => Some(Risk::Modify),
            2 => Some(Risk::Significant),
            3 => Some(Risk::Destructive),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Risk {
    type Error = CoreError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Risk::from_u8(v).ok_or_else(|| CoreError::Schema {
            message: format!("risk must be 0..=3, got {v}"),
        })
    }
}

impl From<Risk> for u8 {
    fn from(r: Risk) -> u8 {
        r.as_u8()
    }
}

impl Serialize for Risk {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for Risk {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        Risk::from_u8(v).ok_or_else(|| serde::de::Error::custom(format!("risk must be 0..=3, got {v}")))
    }
}

/// One unit of work: a symbolic (tool, action) pair plus arguments.
///
/// Immutable once validated — `IntentIR::validate` is the only place a
/// `Step` transitions from "just parsed" to "safe to schedule."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub tool: String,
    pub action: String,
    pub args: BTreeMap<String, serde_json::Value>,
    pub risk: Risk,
}

impl Step {
    pub fn new(
        tool: impl Into<String>,
        action: impl Into<String>,
        risk: Risk,
    ) -> Self {
        Self {
            tool: tool.into(),
            action: action.into(),
            args: BTreeMap::new(),
            risk,
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// String arg if present and a JSON string.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.tool.is_empty() || self.action.is_empty() {
            return Err(CoreError::Schema {
                message: format!(
                    "step has empty tool or action (tool={:?}, action={:?})",
                    self.tool, self.action
                ),
            });
        }
        for key in self.args.keys() {
            if key.is_empty() {
                return Err(CoreError::Schema {
                    message: format!("step {}.{} has an empty arg key", self.tool, self.action),
                });
            }
        }
        Ok(())
    }
}

/// A validated, structured action plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentIr {
    pub goal: String,
    pub requires_confirmation: bool,
    pub steps: Vec<Step>,
}

impl IntentIr {
    pub fn new(goal: impl Into<String>, requires_confirmation: bool, steps: Vec<Step>) -> Self {
        Self {
            goal: goal.into(),
            requires_confirmation,
            steps,
        }
    }

    /// Validate every step; tool/action non-empty, risk already typed as
    /// `Risk` so the 0..=3 range check happens at deserialization.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.steps.is_empty() {
            return Err(CoreError::Schema {
                message: "intent has no steps".to_string(),
            });
        }
        for step in &self.steps {
            step.validate()?;
        }
        Ok(())
    }

    /// Parse and validate from the wire JSON format (§6).
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let ir: IntentIr = serde_json::from_str(raw).map_err(|e| CoreError::Schema {
            message: format!("invalid IntentIR JSON: {e}"),
        })?;
        ir.validate()?;
        Ok(ir)
    }
}
