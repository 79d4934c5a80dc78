//! Exactly-once periodic billing: staff payrolls and student invoices.

use crate::error::BillingError;
use crate::models::{
    record_number, BillableEntity, BillingPeriod, BillingRecord, EntityKind, NewBillingRecord,
};
use crate::services::calendar::CalendarAdapter;
use crate::services::metrics::record_billing_outcome;
use crate::services::notifier::{NotificationDispatcher, NotificationEvent};
use crate::services::store::{BillingStore, EntityDirectory};
use chrono::Duration;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Counts for one generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSummary {
    pub entity_kind: EntityKind,
    pub period: BillingPeriod,
    pub processed: u64,
    pub created: u64,
    pub skipped_existing: u64,
    pub errors: u64,
    /// The run did nothing because it is not day 1 of the period.
    pub gated: bool,
}

impl GenerationSummary {
    fn empty(entity_kind: EntityKind, period: BillingPeriod) -> Self {
        Self {
            entity_kind,
            period,
            processed: 0,
            created: 0,
            skipped_existing: 0,
            errors: 0,
            gated: false,
        }
    }
}

enum EntityOutcome {
    Created(BillingRecord),
    AlreadyBilled,
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub chunk_size: i64,
    pub due_days: i64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            due_days: 7,
        }
    }
}

pub struct PeriodicGenerationService<E: BillableEntity> {
    billing: Arc<dyn BillingStore>,
    directory: Arc<dyn EntityDirectory<E>>,
    calendar: Arc<dyn CalendarAdapter>,
    notifier: Arc<dyn NotificationDispatcher>,
    settings: GenerationSettings,
    _entity: PhantomData<fn() -> E>,
}

impl<E: BillableEntity> PeriodicGenerationService<E> {
    pub fn new(
        billing: Arc<dyn BillingStore>,
        directory: Arc<dyn EntityDirectory<E>>,
        calendar: Arc<dyn CalendarAdapter>,
        notifier: Arc<dyn NotificationDispatcher>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            billing,
            directory,
            calendar,
            notifier,
            settings: GenerationSettings {
                chunk_size: settings.chunk_size.max(1),
                due_days: settings.due_days.max(0),
            },
            _entity: PhantomData,
        }
    }

    pub fn kind(&self) -> EntityKind {
        E::KIND
    }

    /// Create this period's record for every billable entity that lacks one.
    ///
    /// Without `force` the run only proceeds on BS day 1. Per-entity failures
    /// are counted and the run continues; a failed chunk read aborts it.
    #[instrument(skip(self), fields(entity_kind = %E::KIND))]
    pub async fn generate_for_current_period(
        &self,
        force: bool,
    ) -> Result<GenerationSummary, BillingError> {
        let period = self.calendar.current_period()?;
        let mut summary = GenerationSummary::empty(E::KIND, period.clone());

        if !force && !period.is_first_day() {
            debug!(
                bs_date = %period.display_date,
                "Not the first day of the billing period, skipping generation"
            );
            summary.gated = true;
            return Ok(summary);
        }

        info!(
            year = period.year,
            month = period.month,
            force = force,
            "Starting {} generation",
            E::KIND.record_label()
        );

        let mut after = None;
        loop {
            let chunk = self
                .directory
                .list_billable(after, self.settings.chunk_size)
                .await
                .map_err(|e| {
                    BillingError::Persistence(format!(
                        "failed to read billable {} entities: {}",
                        E::KIND,
                        e
                    ))
                })?;

            let Some(last) = chunk.last() else {
                break;
            };
            after = Some(last.entity_id());
            let chunk_len = chunk.len() as i64;

            for entity in &chunk {
                if !entity.is_billable() {
                    continue;
                }
                summary.processed += 1;

                match self.generate_for_entity(entity, &period).await {
                    Ok(EntityOutcome::Created(record)) => {
                        summary.created += 1;
                        record_billing_outcome(E::KIND.as_str(), "created");
                        self.notify(entity, &record);
                    }
                    Ok(EntityOutcome::AlreadyBilled) => {
                        summary.skipped_existing += 1;
                        record_billing_outcome(E::KIND.as_str(), "skipped");
                    }
                    Err(e) => {
                        summary.errors += 1;
                        record_billing_outcome(E::KIND.as_str(), "failed");
                        error!(
                            entity_id = %entity.entity_id(),
                            error = %e,
                            "Failed to generate {}",
                            E::KIND.record_label()
                        );
                    }
                }
            }

            if chunk_len < self.settings.chunk_size {
                break;
            }
        }

        info!(
            year = period.year,
            month = period.month,
            processed = summary.processed,
            created = summary.created,
            skipped_existing = summary.skipped_existing,
            errors = summary.errors,
            "Finished {} generation",
            E::KIND.record_label()
        );

        Ok(summary)
    }

    async fn generate_for_entity(
        &self,
        entity: &E,
        period: &BillingPeriod,
    ) -> Result<EntityOutcome, BillingError> {
        let entity_id = entity.entity_id();

        if self
            .billing
            .billing_record_exists(E::KIND, entity_id, period.year, period.month)
            .await?
        {
            return Ok(EntityOutcome::AlreadyBilled);
        }

        let due_date = period
            .gregorian_date
            .checked_add_signed(Duration::days(self.settings.due_days))
            .ok_or_else(|| {
                BillingError::Validation(format!(
                    "due date out of range for {}",
                    period.gregorian_date
                ))
            })?;

        let input = NewBillingRecord {
            entity_kind: E::KIND,
            entity_id,
            record_number: record_number(E::KIND, period.year, period.month, entity_id),
            amount: entity.base_amount(),
            billing_month_bs: period.month,
            billing_year_bs: period.year,
            nepali_date: period.display_date.clone(),
            due_date,
        };

        match self.billing.create_billing_record(&input).await {
            Ok(record) => Ok(EntityOutcome::Created(record)),
            // A concurrent run got there first.
            Err(BillingError::Conflict(_)) => Ok(EntityOutcome::AlreadyBilled),
            Err(e) => Err(e),
        }
    }

    fn notify(&self, entity: &E, record: &BillingRecord) {
        let Some(recipient) = entity.contact_email() else {
            return;
        };
        self.notifier.dispatch(NotificationEvent::BillingRecordCreated {
            recipient: recipient.to_string(),
            name: entity.name().to_string(),
            entity_kind: E::KIND,
            record_number: record.record_number.clone(),
            amount: record.amount,
            nepali_date: record.nepali_date.clone(),
            due_date: record.due_date,
        });
    }
}
