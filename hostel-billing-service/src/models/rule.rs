//! Checkout deduction rule model.

use super::EntityKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// How `deduction_value` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionType {
    /// Percent of the monthly base amount, 0..=100.
    Percentage,
    /// Flat amount per 30 days away.
    Fixed,
}

impl DeductionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeductionType::Percentage => "percentage",
            DeductionType::Fixed => "fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(DeductionType::Percentage),
            "fixed" => Some(DeductionType::Fixed),
            _ => None,
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            DeductionType::Percentage => 1,
            DeductionType::Fixed => 2,
        }
    }

    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(DeductionType::Percentage),
            2 => Some(DeductionType::Fixed),
            _ => None,
        }
    }
}

impl fmt::Display for DeductionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DeductionType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DeductionType::parse(&value).ok_or_else(|| format!("unknown deduction type: {}", value))
    }
}

/// Deduction policy for checkouts of one entity kind.
///
/// A rule without `entity_id` is universal. Only one rule per scope may be
/// active at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CheckoutRule {
    pub rule_id: Uuid,
    #[sqlx(try_from = "String")]
    pub entity_kind: EntityKind,
    pub entity_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub deduction_type: DeductionType,
    pub deduction_value: Decimal,
    pub min_days: Option<i32>,
    pub max_days: Option<i32>,
    pub priority: i32,
    pub is_active: bool,
    pub name: String,
    pub description: Option<String>,
    /// Rule sentence such as "checkout duration >= 15 days".
    pub condition: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl CheckoutRule {
    pub fn is_universal(&self) -> bool {
        self.entity_id.is_none()
    }
}

/// Input for creating a rule.
#[derive(Debug, Clone)]
pub struct CreateRule {
    pub entity_kind: EntityKind,
    pub entity_id: Option<Uuid>,
    pub deduction_type: DeductionType,
    pub deduction_value: Decimal,
    pub min_days: Option<i32>,
    pub max_days: Option<i32>,
    pub priority: i32,
    pub is_active: bool,
    pub name: String,
    pub description: Option<String>,
    pub condition: Option<String>,
}

/// Partial update of a rule. `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct UpdateRule {
    pub deduction_type: Option<DeductionType>,
    pub deduction_value: Option<Decimal>,
    pub min_days: Option<i32>,
    pub max_days: Option<i32>,
    pub priority: Option<i32>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub condition: Option<String>,
}

impl UpdateRule {
    /// The rule as it would look after this update.
    pub fn merged_into(&self, rule: &CheckoutRule) -> CheckoutRule {
        CheckoutRule {
            deduction_type: self.deduction_type.unwrap_or(rule.deduction_type),
            deduction_value: self.deduction_value.unwrap_or(rule.deduction_value),
            min_days: self.min_days.or(rule.min_days),
            max_days: self.max_days.or(rule.max_days),
            priority: self.priority.unwrap_or(rule.priority),
            name: self.name.clone().unwrap_or_else(|| rule.name.clone()),
            description: self.description.clone().or_else(|| rule.description.clone()),
            condition: self.condition.clone().or_else(|| rule.condition.clone()),
            ..rule.clone()
        }
    }
}

/// Filter parameters for listing rules.
#[derive(Debug, Clone, Copy)]
pub struct ListRulesFilter {
    pub entity_kind: EntityKind,
    pub active_only: bool,
}
