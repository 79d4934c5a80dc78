//! Prorated checkout deductions, shared by staff and students.

use crate::error::BillingError;
use crate::models::{
    ApprovedDeduction, BillableEntity, CheckoutRecord, CheckoutRule, CheckoutStatus,
    DeductionType, EntityKind,
};
use crate::services::metrics::record_deduction_applied;
use crate::services::notifier::NotificationEvent;
use crate::services::rules::RuleCache;
use crate::services::store::{CheckoutStore, EntityDirectory};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Days in a billing month for proration.
const PRORATE_DAYS: i64 = 30;

/// Result of a deduction calculation. Nothing is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DeductionOutcome {
    pub deduction_amount: Decimal,
    pub adjusted_amount: Decimal,
    /// Name of the rule used, stored on the checkout as a snapshot.
    pub rule_applied: String,
    /// `duration_days / 30`, rounded to 4 places.
    pub prorate_ratio: Decimal,
    pub rule_id: Uuid,
    pub deduction_type: DeductionType,
    pub duration_days: i64,
    pub base_amount: Decimal,
}

/// A persisted approval together with what produced it.
#[derive(Debug, Clone)]
pub struct AppliedDeduction<E> {
    pub checkout: CheckoutRecord,
    pub outcome: DeductionOutcome,
    pub entity: E,
}

impl<E: BillableEntity> AppliedDeduction<E> {
    /// Event for the entity's contact address, if it has one.
    pub fn notification(&self) -> Option<NotificationEvent> {
        let recipient = self.entity.contact_email()?;
        Some(NotificationEvent::DeductionApplied {
            recipient: recipient.to_string(),
            name: self.entity.name().to_string(),
            entity_kind: E::KIND,
            checkout_id: self.checkout.checkout_id,
            duration_days: self.outcome.duration_days,
            deduction_amount: self.outcome.deduction_amount,
            adjusted_amount: self.outcome.adjusted_amount,
            rule_applied: self.outcome.rule_applied.clone(),
        })
    }
}

/// Computes and applies deductions for one entity kind.
pub struct DeductionCalculator<E: BillableEntity> {
    checkouts: Arc<dyn CheckoutStore>,
    directory: Arc<dyn EntityDirectory<E>>,
    rules: RuleCache,
    _entity: PhantomData<fn() -> E>,
}

impl<E: BillableEntity> DeductionCalculator<E> {
    pub fn new(
        checkouts: Arc<dyn CheckoutStore>,
        directory: Arc<dyn EntityDirectory<E>>,
        rules: RuleCache,
    ) -> Self {
        Self {
            checkouts,
            directory,
            rules,
            _entity: PhantomData,
        }
    }

    pub fn kind(&self) -> EntityKind {
        E::KIND
    }

    /// Compute the deduction for a checkout without writing anything.
    #[instrument(skip(self, record), fields(checkout_id = %record.checkout_id, entity_kind = %E::KIND))]
    pub async fn calculate(&self, record: &CheckoutRecord) -> Result<DeductionOutcome, BillingError> {
        self.evaluate(record).await.map(|(_, outcome)| outcome)
    }

    async fn evaluate(&self, record: &CheckoutRecord) -> Result<(E, DeductionOutcome), BillingError> {
        if record.entity_kind != E::KIND {
            return Err(BillingError::Validation(format!(
                "checkout {} belongs to a {}, not a {}",
                record.checkout_id, record.entity_kind, E::KIND
            )));
        }

        let entity = self
            .directory
            .get_entity(record.entity_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("{} {}", E::KIND, record.entity_id)))?;

        let rule = self
            .rules
            .active_universal_rule(E::KIND)
            .await?
            .ok_or_else(|| {
                BillingError::Configuration(format!(
                    "universal rule not configured for {}",
                    E::KIND
                ))
            })?;

        let days = checkout_duration_days(record);
        let outcome = compute_deduction(&rule, entity.base_amount(), days);
        Ok((entity, outcome))
    }

    /// Approve a pending checkout, persisting its deduction atomically.
    #[instrument(skip(self), fields(checkout_id = %checkout_id, entity_kind = %E::KIND))]
    pub async fn apply(&self, checkout_id: Uuid) -> Result<AppliedDeduction<E>, BillingError> {
        let record = self
            .checkouts
            .get_checkout(checkout_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("checkout {}", checkout_id)))?;

        record.status.transition(CheckoutStatus::Approved)?;

        let (entity, outcome) = self.evaluate(&record).await?;
        let approved = ApprovedDeduction {
            duration_days: i32::try_from(outcome.duration_days).unwrap_or(i32::MAX),
            deduction_amount: outcome.deduction_amount,
            adjusted_amount: outcome.adjusted_amount,
            rule_applied: outcome.rule_applied.clone(),
        };

        let updated = self.checkouts.approve_checkout(checkout_id, &approved).await?;

        record_deduction_applied(
            E::KIND.as_str(),
            outcome.deduction_type.as_str(),
            outcome.deduction_amount.to_f64().unwrap_or(0.0),
        );
        info!(
            checkout_id = %checkout_id,
            entity_id = %updated.entity_id,
            days = outcome.duration_days,
            deduction = %outcome.deduction_amount,
            adjusted = %outcome.adjusted_amount,
            rule = %outcome.rule_applied,
            "Deduction applied"
        );

        Ok(AppliedDeduction {
            checkout: updated,
            outcome,
            entity,
        })
    }

    /// Invalidate cached rules. Unrelated cache keys are kept.
    pub async fn clear_rule_cache(&self) -> Result<u64, BillingError> {
        self.rules.clear().await
    }
}

/// Whole days away: actual return if known, else the estimate, else the
/// stored duration. Never negative.
pub fn checkout_duration_days(record: &CheckoutRecord) -> i64 {
    match record.checkin_time.or(record.estimated_return_time) {
        Some(end) => (end - record.checkout_time).num_days().max(0),
        None => record.checkout_duration.map(i64::from).unwrap_or(0).max(0),
    }
}

/// Prorate a rule over `days` against `base`, clamped to `[0, base]`.
pub fn compute_deduction(rule: &CheckoutRule, base: Decimal, days: i64) -> DeductionOutcome {
    let days = days.max(0);
    let days_dec = Decimal::from(days);
    let period = Decimal::from(PRORATE_DAYS);

    let raw = match rule.deduction_type {
        DeductionType::Percentage => {
            rule.deduction_value * base * days_dec / (Decimal::ONE_HUNDRED * period)
        }
        DeductionType::Fixed => rule.deduction_value * days_dec / period,
    };

    let ceiling = base.max(Decimal::ZERO);
    let deduction = round_money(raw.max(Decimal::ZERO).min(ceiling));
    let adjusted = round_money(base - deduction);

    DeductionOutcome {
        deduction_amount: deduction,
        adjusted_amount: adjusted,
        rule_applied: rule.name.clone(),
        prorate_ratio: (days_dec / period)
            .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero),
        rule_id: rule.rule_id,
        deduction_type: rule.deduction_type,
        duration_days: days,
        base_amount: base,
    }
}

fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn rule(deduction_type: DeductionType, value: Decimal) -> CheckoutRule {
        CheckoutRule {
            rule_id: Uuid::new_v4(),
            entity_kind: EntityKind::Student,
            entity_id: None,
            deduction_type,
            deduction_value: value,
            min_days: None,
            max_days: None,
            priority: 0,
            is_active: true,
            name: "Standard leave".to_string(),
            description: None,
            condition: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn checkout(days_away: Option<Duration>) -> CheckoutRecord {
        let start = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();
        CheckoutRecord {
            checkout_id: Uuid::new_v4(),
            entity_kind: EntityKind::Student,
            entity_id: Uuid::new_v4(),
            checkout_time: start,
            checkin_time: None,
            estimated_return_time: days_away.map(|d| start + d),
            checkout_duration: None,
            status: CheckoutStatus::Pending,
            deduction_amount: None,
            adjusted_amount: None,
            rule_applied: None,
            reason: None,
            created_utc: start,
            updated_utc: start,
        }
    }

    #[test]
    fn ten_percent_over_sixteen_days() {
        let outcome = compute_deduction(&rule(DeductionType::Percentage, dec!(10)), dec!(1000), 16);
        assert_eq!(outcome.deduction_amount, dec!(53.33));
        assert_eq!(outcome.adjusted_amount, dec!(946.67));
        assert_eq!(outcome.prorate_ratio, dec!(0.5333));
        assert_eq!(outcome.rule_applied, "Standard leave");
    }

    #[test]
    fn fixed_amount_is_prorated() {
        let outcome = compute_deduction(&rule(DeductionType::Fixed, dec!(3000)), dec!(12000), 15);
        assert_eq!(outcome.deduction_amount, dec!(1500.00));
        assert_eq!(outcome.adjusted_amount, dec!(10500.00));
    }

    #[test]
    fn midpoint_rounds_away_from_zero() {
        // 0.15 / 30 = 0.005 and 0.45 / 30 = 0.015
        let outcome = compute_deduction(&rule(DeductionType::Fixed, dec!(0.15)), dec!(100), 1);
        assert_eq!(outcome.deduction_amount, dec!(0.01));
        let outcome = compute_deduction(&rule(DeductionType::Fixed, dec!(0.45)), dec!(100), 1);
        assert_eq!(outcome.deduction_amount, dec!(0.02));
    }

    #[test]
    fn deduction_never_exceeds_base() {
        for value in [dec!(0), dec!(1), dec!(50), dec!(100), dec!(99999)] {
            for days in [0, 1, 29, 30, 31, 90, 400] {
                for base in [dec!(0), dec!(0.01), dec!(1000), dec!(25000.50)] {
                    for kind in [DeductionType::Percentage, DeductionType::Fixed] {
                        let outcome = compute_deduction(&rule(kind, value), base, days);
                        assert!(outcome.deduction_amount >= Decimal::ZERO);
                        assert!(outcome.deduction_amount <= base);
                        assert_eq!(outcome.adjusted_amount, base - outcome.deduction_amount);
                    }
                }
            }
        }
    }

    #[test]
    fn duration_prefers_actual_return() {
        let mut record = checkout(Some(Duration::days(10)));
        assert_eq!(checkout_duration_days(&record), 10);

        record.checkin_time = Some(record.checkout_time + Duration::days(4));
        assert_eq!(checkout_duration_days(&record), 4);
    }

    #[test]
    fn partial_days_are_floored() {
        let record = checkout(Some(Duration::hours(47)));
        assert_eq!(checkout_duration_days(&record), 1);
    }

    #[test]
    fn return_before_checkout_counts_as_zero() {
        let record = checkout(Some(Duration::days(-3)));
        assert_eq!(checkout_duration_days(&record), 0);
    }

    #[test]
    fn stored_duration_is_the_fallback() {
        let mut record = checkout(None);
        assert_eq!(checkout_duration_days(&record), 0);

        record.checkout_duration = Some(12);
        assert_eq!(checkout_duration_days(&record), 12);
    }
}
