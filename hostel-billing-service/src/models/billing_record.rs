//! Periodic billing record model (student invoice / staff payroll).

use super::EntityKind;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A Bikram Sambat billing period plus the day it was observed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub year: i32,
    pub month: i32,
    pub day: i32,
    /// BS date as `YYYY-MM-DD`.
    pub display_date: String,
    pub gregorian_date: NaiveDate,
}

impl BillingPeriod {
    pub fn is_first_day(&self) -> bool {
        self.day == 1
    }
}

/// Invoice or payroll row. At most one per (kind, entity, BS month, BS year).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingRecord {
    pub record_id: Uuid,
    #[sqlx(try_from = "String")]
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub record_number: String,
    pub amount: Decimal,
    pub billing_month_bs: i32,
    pub billing_year_bs: i32,
    pub nepali_date: String,
    pub due_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a billing record.
#[derive(Debug, Clone)]
pub struct NewBillingRecord {
    pub entity_kind: EntityKind,
    pub entity_id: Uuid,
    pub record_number: String,
    pub amount: Decimal,
    pub billing_month_bs: i32,
    pub billing_year_bs: i32,
    pub nepali_date: String,
    pub due_date: NaiveDate,
}

/// Deterministic record number, e.g. `INV-BS2081-04-<entity uuid>`.
pub fn record_number(kind: EntityKind, year: i32, month: i32, entity_id: Uuid) -> String {
    format!(
        "{}-BS{}-{:02}-{}",
        kind.record_prefix(),
        year,
        month,
        entity_id
    )
}

/// Filter parameters for listing billing records of one period.
#[derive(Debug, Clone)]
pub struct ListBillingRecordsFilter {
    pub entity_kind: EntityKind,
    pub billing_year_bs: i32,
    pub billing_month_bs: i32,
    pub page_size: i32,
    pub page_token: Option<Uuid>,
}
