//! Database service for hostel-billing-service.

use crate::error::BillingError;
use crate::models::{
    ApprovedDeduction, BillingRecord, CheckoutRecord, CheckoutRule, CheckoutStatus, CreateRule,
    EntityKind, ListBillingRecordsFilter, ListRulesFilter, NewBillingRecord, Staff, Student,
    SubmitCheckout,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{BillingStore, CheckoutStore, EntityDirectory, RuleStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

macro_rules! rule_columns {
    () => {
        "rule_id, entity_kind, entity_id, deduction_type, deduction_value, min_days, max_days, priority, is_active, name, description, condition, created_utc, updated_utc"
    };
}

macro_rules! checkout_columns {
    () => {
        "checkout_id, entity_kind, entity_id, checkout_time, checkin_time, estimated_return_time, checkout_duration, status, deduction_amount, adjusted_amount, rule_applied, reason, created_utc, updated_utc"
    };
}

macro_rules! billing_record_columns {
    () => {
        "record_id, entity_kind, entity_id, record_number, amount, billing_month_bs, billing_year_bs, nepali_date, due_date, created_utc"
    };
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "hostel-billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Lock a checkout row and check that it may move to `next`.
    async fn lock_checkout_for(
        tx: &mut Transaction<'_, Postgres>,
        checkout_id: Uuid,
        next: CheckoutStatus,
    ) -> Result<CheckoutStatus, BillingError> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM checkout_records WHERE checkout_id = $1 FOR UPDATE",
        )
        .bind(checkout_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to lock checkout", e))?;

        let status = status
            .ok_or_else(|| BillingError::NotFound(format!("checkout {}", checkout_id)))?;
        let current = CheckoutStatus::parse(&status).ok_or_else(|| {
            BillingError::Persistence(format!("unknown checkout status: {}", status))
        })?;

        current.transition(next)
    }
}

// =========================================================================
// Rule Operations
// =========================================================================

#[async_trait]
impl RuleStore for Database {
    #[instrument(skip(self, input), fields(entity_kind = %input.entity_kind))]
    async fn create_rule(&self, input: &CreateRule) -> Result<CheckoutRule, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_rule"])
            .start_timer();

        let rule_id = Uuid::new_v4();
        let rule = sqlx::query_as::<_, CheckoutRule>(concat!(
            r#"
            INSERT INTO checkout_rules (rule_id, entity_kind, entity_id, deduction_type, deduction_value, min_days, max_days, priority, is_active, name, description, condition)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING "#,
            rule_columns!()
        ))
        .bind(rule_id)
        .bind(input.entity_kind.as_str())
        .bind(input.entity_id)
        .bind(input.deduction_type.as_str())
        .bind(input.deduction_value)
        .bind(input.min_days)
        .bind(input.max_days)
        .bind(input.priority)
        .bind(input.is_active)
        .bind(&input.name)
        .bind(&input.description)
        .bind(&input.condition)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to create rule", e))?;

        timer.observe_duration();
        info!(rule_id = %rule.rule_id, name = %rule.name, "Checkout rule created");

        Ok(rule)
    }

    #[instrument(skip(self), fields(rule_id = %rule_id))]
    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<CheckoutRule>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_rule"])
            .start_timer();

        let rule = sqlx::query_as::<_, CheckoutRule>(concat!(
            "SELECT ",
            rule_columns!(),
            " FROM checkout_rules WHERE rule_id = $1"
        ))
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to get rule", e))?;

        timer.observe_duration();

        Ok(rule)
    }

    #[instrument(skip(self, rule), fields(rule_id = %rule.rule_id))]
    async fn update_rule(&self, rule: &CheckoutRule) -> Result<CheckoutRule, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_rule"])
            .start_timer();

        let updated = sqlx::query_as::<_, CheckoutRule>(concat!(
            r#"
            UPDATE checkout_rules
            SET deduction_type = $2, deduction_value = $3, min_days = $4, max_days = $5,
                priority = $6, name = $7, description = $8, condition = $9, updated_utc = NOW()
            WHERE rule_id = $1
            RETURNING "#,
            rule_columns!()
        ))
        .bind(rule.rule_id)
        .bind(rule.deduction_type.as_str())
        .bind(rule.deduction_value)
        .bind(rule.min_days)
        .bind(rule.max_days)
        .bind(rule.priority)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(&rule.condition)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to update rule", e))?
        .ok_or_else(|| BillingError::NotFound(format!("rule {}", rule.rule_id)))?;

        timer.observe_duration();
        info!(rule_id = %updated.rule_id, "Checkout rule updated");

        Ok(updated)
    }

    #[instrument(skip(self), fields(rule_id = %rule_id, is_active = is_active))]
    async fn set_rule_active(
        &self,
        rule_id: Uuid,
        is_active: bool,
    ) -> Result<CheckoutRule, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["set_rule_active"])
            .start_timer();

        let rule = sqlx::query_as::<_, CheckoutRule>(concat!(
            "UPDATE checkout_rules SET is_active = $2, updated_utc = NOW() WHERE rule_id = $1 RETURNING ",
            rule_columns!()
        ))
        .bind(rule_id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to change rule activation", e))?
        .ok_or_else(|| BillingError::NotFound(format!("rule {}", rule_id)))?;

        timer.observe_duration();
        info!(rule_id = %rule_id, is_active = is_active, "Checkout rule activation changed");

        Ok(rule)
    }

    #[instrument(skip(self, filter), fields(entity_kind = %filter.entity_kind))]
    async fn list_rules(&self, filter: &ListRulesFilter) -> Result<Vec<CheckoutRule>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_rules"])
            .start_timer();

        let rules = sqlx::query_as::<_, CheckoutRule>(concat!(
            "SELECT ",
            rule_columns!(),
            r#"
            FROM checkout_rules
            WHERE entity_kind = $1 AND ($2::bool = FALSE OR is_active = TRUE)
            ORDER BY priority DESC, created_utc
            "#
        ))
        .bind(filter.entity_kind.as_str())
        .bind(filter.active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to list rules", e))?;

        timer.observe_duration();

        Ok(rules)
    }

    #[instrument(skip(self), fields(entity_kind = %kind))]
    async fn find_active_rule(
        &self,
        kind: EntityKind,
        entity_id: Option<Uuid>,
    ) -> Result<Option<CheckoutRule>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_active_rule"])
            .start_timer();

        let rule = sqlx::query_as::<_, CheckoutRule>(concat!(
            "SELECT ",
            rule_columns!(),
            r#"
            FROM checkout_rules
            WHERE entity_kind = $1 AND entity_id IS NOT DISTINCT FROM $2 AND is_active = TRUE
            ORDER BY priority DESC
            LIMIT 1
            "#
        ))
        .bind(kind.as_str())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to find active rule", e))?;

        timer.observe_duration();

        Ok(rule)
    }
}

// =========================================================================
// Checkout Operations
// =========================================================================

#[async_trait]
impl CheckoutStore for Database {
    #[instrument(skip(self, input), fields(entity_kind = %input.entity_kind, entity_id = %input.entity_id))]
    async fn create_checkout(&self, input: &SubmitCheckout) -> Result<CheckoutRecord, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_checkout"])
            .start_timer();

        let checkout_id = Uuid::new_v4();
        let record = sqlx::query_as::<_, CheckoutRecord>(concat!(
            r#"
            INSERT INTO checkout_records (checkout_id, entity_kind, entity_id, checkout_time, estimated_return_time, status, reason)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            RETURNING "#,
            checkout_columns!()
        ))
        .bind(checkout_id)
        .bind(input.entity_kind.as_str())
        .bind(input.entity_id)
        .bind(input.checkout_time)
        .bind(input.estimated_return_time)
        .bind(&input.reason)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to create checkout", e))?;

        timer.observe_duration();
        info!(checkout_id = %record.checkout_id, "Checkout submitted");

        Ok(record)
    }

    #[instrument(skip(self), fields(checkout_id = %checkout_id))]
    async fn get_checkout(&self, checkout_id: Uuid) -> Result<Option<CheckoutRecord>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_checkout"])
            .start_timer();

        let record = sqlx::query_as::<_, CheckoutRecord>(concat!(
            "SELECT ",
            checkout_columns!(),
            " FROM checkout_records WHERE checkout_id = $1"
        ))
        .bind(checkout_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to get checkout", e))?;

        timer.observe_duration();

        Ok(record)
    }

    #[instrument(skip(self, deduction), fields(checkout_id = %checkout_id))]
    async fn approve_checkout(
        &self,
        checkout_id: Uuid,
        deduction: &ApprovedDeduction,
    ) -> Result<CheckoutRecord, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["approve_checkout"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::from_sqlx("Failed to begin transaction", e))?;

        Self::lock_checkout_for(&mut tx, checkout_id, CheckoutStatus::Approved).await?;

        let record = sqlx::query_as::<_, CheckoutRecord>(concat!(
            r#"
            UPDATE checkout_records
            SET status = 'approved', checkout_duration = $2, deduction_amount = $3,
                adjusted_amount = $4, rule_applied = $5, updated_utc = NOW()
            WHERE checkout_id = $1 AND status = 'pending'
            RETURNING "#,
            checkout_columns!()
        ))
        .bind(checkout_id)
        .bind(deduction.duration_days)
        .bind(deduction.deduction_amount)
        .bind(deduction.adjusted_amount)
        .bind(&deduction.rule_applied)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to approve checkout", e))?;

        tx.commit()
            .await
            .map_err(|e| BillingError::from_sqlx("Failed to commit transaction", e))?;

        timer.observe_duration();
        info!(
            checkout_id = %checkout_id,
            deduction = %deduction.deduction_amount,
            "Checkout approved"
        );

        Ok(record)
    }

    #[instrument(skip(self), fields(checkout_id = %checkout_id))]
    async fn decline_checkout(&self, checkout_id: Uuid) -> Result<CheckoutRecord, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["decline_checkout"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::from_sqlx("Failed to begin transaction", e))?;

        Self::lock_checkout_for(&mut tx, checkout_id, CheckoutStatus::Declined).await?;

        let record = sqlx::query_as::<_, CheckoutRecord>(concat!(
            "UPDATE checkout_records SET status = 'declined', updated_utc = NOW() WHERE checkout_id = $1 RETURNING ",
            checkout_columns!()
        ))
        .bind(checkout_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to decline checkout", e))?;

        tx.commit()
            .await
            .map_err(|e| BillingError::from_sqlx("Failed to commit transaction", e))?;

        timer.observe_duration();
        info!(checkout_id = %checkout_id, "Checkout declined");

        Ok(record)
    }

    #[instrument(skip(self), fields(checkout_id = %checkout_id))]
    async fn record_return(
        &self,
        checkout_id: Uuid,
        checkin_time: DateTime<Utc>,
    ) -> Result<CheckoutRecord, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_return"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::from_sqlx("Failed to begin transaction", e))?;

        Self::lock_checkout_for(&mut tx, checkout_id, CheckoutStatus::CheckedIn).await?;

        // Financial fields stay as approved.
        let record = sqlx::query_as::<_, CheckoutRecord>(concat!(
            "UPDATE checkout_records SET status = 'checked_in', checkin_time = $2, updated_utc = NOW() WHERE checkout_id = $1 RETURNING ",
            checkout_columns!()
        ))
        .bind(checkout_id)
        .bind(checkin_time)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to record return", e))?;

        tx.commit()
            .await
            .map_err(|e| BillingError::from_sqlx("Failed to commit transaction", e))?;

        timer.observe_duration();
        info!(checkout_id = %checkout_id, "Checkout return recorded");

        Ok(record)
    }
}

// =========================================================================
// Billing Record Operations
// =========================================================================

#[async_trait]
impl BillingStore for Database {
    #[instrument(skip(self), fields(entity_kind = %kind, entity_id = %entity_id))]
    async fn billing_record_exists(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        year: i32,
        month: i32,
    ) -> Result<bool, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["billing_record_exists"])
            .start_timer();

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM billing_records
                WHERE entity_kind = $1 AND entity_id = $2 AND billing_year_bs = $3 AND billing_month_bs = $4
            )
            "#,
        )
        .bind(kind.as_str())
        .bind(entity_id)
        .bind(year)
        .bind(month)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to check billing record", e))?;

        timer.observe_duration();

        Ok(exists)
    }

    #[instrument(skip(self, input), fields(record_number = %input.record_number))]
    async fn create_billing_record(
        &self,
        input: &NewBillingRecord,
    ) -> Result<BillingRecord, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_billing_record"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BillingError::from_sqlx("Failed to begin transaction", e))?;

        let record_id = Uuid::new_v4();
        let result = sqlx::query_as::<_, BillingRecord>(concat!(
            r#"
            INSERT INTO billing_records (record_id, entity_kind, entity_id, record_number, amount, billing_month_bs, billing_year_bs, nepali_date, due_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING "#,
            billing_record_columns!()
        ))
        .bind(record_id)
        .bind(input.entity_kind.as_str())
        .bind(input.entity_id)
        .bind(&input.record_number)
        .bind(input.amount)
        .bind(input.billing_month_bs)
        .bind(input.billing_year_bs)
        .bind(&input.nepali_date)
        .bind(input.due_date)
        .fetch_one(&mut *tx)
        .await;

        let record = match result {
            Ok(record) => record,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                warn!(
                    record_number = %input.record_number,
                    "Billing record already exists for period"
                );
                return Err(BillingError::Conflict(format!(
                    "billing record {} already exists",
                    input.record_number
                )));
            }
            Err(e) => return Err(BillingError::from_sqlx("Failed to create billing record", e)),
        };

        tx.commit()
            .await
            .map_err(|e| BillingError::from_sqlx("Failed to commit transaction", e))?;

        timer.observe_duration();
        info!(
            record_id = %record.record_id,
            record_number = %record.record_number,
            "Billing record created"
        );

        Ok(record)
    }

    #[instrument(skip(self, filter), fields(entity_kind = %filter.entity_kind))]
    async fn list_billing_records(
        &self,
        filter: &ListBillingRecordsFilter,
    ) -> Result<Vec<BillingRecord>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_billing_records"])
            .start_timer();

        let limit = filter.page_size.clamp(1, 100) as i64;

        let records = sqlx::query_as::<_, BillingRecord>(concat!(
            "SELECT ",
            billing_record_columns!(),
            r#"
            FROM billing_records
            WHERE entity_kind = $1 AND billing_year_bs = $2 AND billing_month_bs = $3
              AND ($4::uuid IS NULL OR record_id > $4)
            ORDER BY record_id
            LIMIT $5
            "#
        ))
        .bind(filter.entity_kind.as_str())
        .bind(filter.billing_year_bs)
        .bind(filter.billing_month_bs)
        .bind(filter.page_token)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to list billing records", e))?;

        timer.observe_duration();

        Ok(records)
    }
}

// =========================================================================
// Entity Directory
// =========================================================================

#[async_trait]
impl EntityDirectory<Staff> for Database {
    #[instrument(skip(self))]
    async fn list_billable(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<Staff>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_billable_staff"])
            .start_timer();

        let staff = sqlx::query_as::<_, Staff>(
            r#"
            SELECT staff_id, name, email, salary, is_active, created_utc
            FROM staff
            WHERE is_active = TRUE AND salary > 0
              AND ($1::uuid IS NULL OR staff_id > $1)
            ORDER BY staff_id
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to list billable staff", e))?;

        timer.observe_duration();

        Ok(staff)
    }

    #[instrument(skip(self), fields(staff_id = %entity_id))]
    async fn get_entity(&self, entity_id: Uuid) -> Result<Option<Staff>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_staff"])
            .start_timer();

        let staff = sqlx::query_as::<_, Staff>(
            "SELECT staff_id, name, email, salary, is_active, created_utc FROM staff WHERE staff_id = $1",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to get staff", e))?;

        timer.observe_duration();

        Ok(staff)
    }
}

#[async_trait]
impl EntityDirectory<Student> for Database {
    #[instrument(skip(self))]
    async fn list_billable(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Student>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_billable_students"])
            .start_timer();

        let students = sqlx::query_as::<_, Student>(
            r#"
            SELECT student_id, name, email, monthly_fee, is_active, created_utc
            FROM students
            WHERE is_active = TRUE AND monthly_fee > 0
              AND ($1::uuid IS NULL OR student_id > $1)
            ORDER BY student_id
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to list billable students", e))?;

        timer.observe_duration();

        Ok(students)
    }

    #[instrument(skip(self), fields(student_id = %entity_id))]
    async fn get_entity(&self, entity_id: Uuid) -> Result<Option<Student>, BillingError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_student"])
            .start_timer();

        let student = sqlx::query_as::<_, Student>(
            "SELECT student_id, name, email, monthly_fee, is_active, created_utc FROM students WHERE student_id = $1",
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BillingError::from_sqlx("Failed to get student", e))?;

        timer.observe_duration();

        Ok(student)
    }
}
