//! In-process trigger for periodic billing.

use crate::models::{Staff, Student};
use crate::services::calendar::CalendarAdapter;
use crate::services::generation::{GenerationSummary, PeriodicGenerationService};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Runs both generators on a fixed interval without `force`. Ticks outside
/// day 1 of a BS month do nothing, and repeated day-1 ticks are no-ops.
pub struct BillingScheduler {
    staff: Arc<PeriodicGenerationService<Staff>>,
    students: Arc<PeriodicGenerationService<Student>>,
    calendar: Arc<dyn CalendarAdapter>,
    interval: Duration,
}

impl BillingScheduler {
    pub fn new(
        staff: Arc<PeriodicGenerationService<Staff>>,
        students: Arc<PeriodicGenerationService<Student>>,
        calendar: Arc<dyn CalendarAdapter>,
        interval: Duration,
    ) -> Self {
        Self {
            staff,
            students,
            calendar,
            interval,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Billing scheduler started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }

    /// One scheduler pass over staff then students. Empty outside day 1.
    pub async fn tick(&self) -> Vec<GenerationSummary> {
        match self.calendar.is_first_day_of_period() {
            Ok(true) => {}
            Ok(false) => {
                debug!("Not the first day of the billing period, nothing to schedule");
                return Vec::new();
            }
            Err(e) => {
                error!(error = %e, "Could not read the billing calendar");
                return Vec::new();
            }
        }

        let mut summaries = Vec::with_capacity(2);

        match self.staff.generate_for_current_period(false).await {
            Ok(summary) => summaries.push(summary),
            Err(e) => error!(entity_kind = "staff", error = %e, "Scheduled payroll generation failed"),
        }
        match self.students.generate_for_current_period(false).await {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                error!(entity_kind = "student", error = %e, "Scheduled invoice generation failed")
            }
        }

        summaries
    }
}
