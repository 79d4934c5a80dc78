//! Persistence seams. `Database` implements all of these against Postgres.

use crate::error::BillingError;
use crate::models::{
    ApprovedDeduction, BillableEntity, BillingRecord, CheckoutRecord, CheckoutRule, CreateRule,
    EntityKind, ListBillingRecordsFilter, ListRulesFilter, NewBillingRecord, SubmitCheckout,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn create_rule(&self, input: &CreateRule) -> Result<CheckoutRule, BillingError>;

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<CheckoutRule>, BillingError>;

    /// Overwrite the mutable fields of an existing rule.
    async fn update_rule(&self, rule: &CheckoutRule) -> Result<CheckoutRule, BillingError>;

    async fn set_rule_active(
        &self,
        rule_id: Uuid,
        is_active: bool,
    ) -> Result<CheckoutRule, BillingError>;

    async fn list_rules(&self, filter: &ListRulesFilter) -> Result<Vec<CheckoutRule>, BillingError>;

    /// The active rule for a scope: universal when `entity_id` is `None`.
    async fn find_active_rule(
        &self,
        kind: EntityKind,
        entity_id: Option<Uuid>,
    ) -> Result<Option<CheckoutRule>, BillingError>;
}

#[async_trait]
pub trait CheckoutStore: Send + Sync {
    async fn create_checkout(&self, input: &SubmitCheckout) -> Result<CheckoutRecord, BillingError>;

    async fn get_checkout(&self, checkout_id: Uuid) -> Result<Option<CheckoutRecord>, BillingError>;

    /// pending -> approved with the computed deduction. Fails with
    /// `InvalidTransition` if the record is no longer pending.
    async fn approve_checkout(
        &self,
        checkout_id: Uuid,
        deduction: &ApprovedDeduction,
    ) -> Result<CheckoutRecord, BillingError>;

    /// pending -> declined.
    async fn decline_checkout(&self, checkout_id: Uuid) -> Result<CheckoutRecord, BillingError>;

    /// approved -> checked_in, setting the actual return time.
    async fn record_return(
        &self,
        checkout_id: Uuid,
        checkin_time: DateTime<Utc>,
    ) -> Result<CheckoutRecord, BillingError>;
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn billing_record_exists(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        year: i32,
        month: i32,
    ) -> Result<bool, BillingError>;

    /// Insert a record. A period duplicate surfaces as `Conflict`.
    async fn create_billing_record(
        &self,
        input: &NewBillingRecord,
    ) -> Result<BillingRecord, BillingError>;

    async fn list_billing_records(
        &self,
        filter: &ListBillingRecordsFilter,
    ) -> Result<Vec<BillingRecord>, BillingError>;
}

/// Read-only view of staff or students.
#[async_trait]
pub trait EntityDirectory<E: BillableEntity>: Send + Sync {
    /// Active entities with a positive base amount, ordered by id, after `after`.
    async fn list_billable(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<E>, BillingError>;

    async fn get_entity(&self, entity_id: Uuid) -> Result<Option<E>, BillingError>;
}
