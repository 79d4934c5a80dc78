//! Test helpers for hostel-billing-service integration tests.
//!
//! The real services are wired over in-memory stores, a fixed calendar and a
//! recording notifier, so most tests need no database. `postgres` runs the
//! whole application against `TEST_DATABASE_URL`.

#![allow(dead_code)]

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use hostel_billing_service::error::BillingError;
use hostel_billing_service::grpc::{BillingComponents, HostelBillingServiceImpl};
use hostel_billing_service::models::{
    ApprovedDeduction, BillingPeriod, BillingRecord, CheckoutRecord, CheckoutRule,
    CheckoutStatus, CreateRule, DeductionType, EntityKind, ListBillingRecordsFilter,
    ListRulesFilter, NewBillingRecord, Staff, Student, SubmitCheckout,
};
use hostel_billing_service::services::{
    BillingStore, Cache, CalendarAdapter, CalendarError, CheckoutStore, EntityDirectory,
    GenerationSettings, InMemoryCache, NotificationDispatcher, NotificationEvent, RuleStore,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// In-memory implementation of every persistence seam.
#[derive(Default)]
pub struct InMemoryStore {
    rules: Mutex<HashMap<Uuid, CheckoutRule>>,
    checkouts: Mutex<HashMap<Uuid, CheckoutRecord>>,
    billing_records: Mutex<Vec<BillingRecord>>,
    staff: Mutex<Vec<Staff>>,
    students: Mutex<Vec<Student>>,

    /// Entities whose billing insert fails with a persistence error.
    pub failing_entities: Mutex<HashSet<Uuid>>,
    /// Make entity listing fail.
    pub fail_listing: AtomicBool,
    /// Pretend no record exists so only the unique constraint catches duplicates.
    pub skip_existence_check: AtomicBool,

    pub active_rule_lookups: AtomicUsize,
    pub approvals: AtomicUsize,
}

impl InMemoryStore {
    pub fn add_staff(&self, name: &str, email: Option<&str>, salary: Decimal, is_active: bool) -> Staff {
        let staff = Staff {
            staff_id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.map(str::to_string),
            salary,
            is_active,
            created_utc: Utc::now(),
        };
        self.staff.lock().unwrap().push(staff.clone());
        staff
    }

    pub fn add_student(
        &self,
        name: &str,
        email: Option<&str>,
        monthly_fee: Decimal,
        is_active: bool,
    ) -> Student {
        let student = Student {
            student_id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.map(str::to_string),
            monthly_fee,
            is_active,
            created_utc: Utc::now(),
        };
        self.students.lock().unwrap().push(student.clone());
        student
    }

    pub fn billing_records(&self) -> Vec<BillingRecord> {
        self.billing_records.lock().unwrap().clone()
    }

    pub fn checkout(&self, checkout_id: Uuid) -> Option<CheckoutRecord> {
        self.checkouts.lock().unwrap().get(&checkout_id).cloned()
    }

    pub fn fail_billing_for(&self, entity_id: Uuid) {
        self.failing_entities.lock().unwrap().insert(entity_id);
    }

    fn transition(
        &self,
        checkout_id: Uuid,
        next: CheckoutStatus,
        update: impl FnOnce(&mut CheckoutRecord),
    ) -> Result<CheckoutRecord, BillingError> {
        let mut checkouts = self.checkouts.lock().unwrap();
        let record = checkouts
            .get_mut(&checkout_id)
            .ok_or_else(|| BillingError::NotFound(format!("checkout {}", checkout_id)))?;
        record.status = record.status.transition(next)?;
        update(record);
        record.updated_utc = Utc::now();
        Ok(record.clone())
    }
}

#[async_trait]
impl RuleStore for InMemoryStore {
    async fn create_rule(&self, input: &CreateRule) -> Result<CheckoutRule, BillingError> {
        let now = Utc::now();
        let rule = CheckoutRule {
            rule_id: Uuid::new_v4(),
            entity_kind: input.entity_kind,
            entity_id: input.entity_id,
            deduction_type: input.deduction_type,
            deduction_value: input.deduction_value,
            min_days: input.min_days,
            max_days: input.max_days,
            priority: input.priority,
            is_active: input.is_active,
            name: input.name.clone(),
            description: input.description.clone(),
            condition: input.condition.clone(),
            created_utc: now,
            updated_utc: now,
        };
        self.rules.lock().unwrap().insert(rule.rule_id, rule.clone());
        Ok(rule)
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<CheckoutRule>, BillingError> {
        Ok(self.rules.lock().unwrap().get(&rule_id).cloned())
    }

    async fn update_rule(&self, rule: &CheckoutRule) -> Result<CheckoutRule, BillingError> {
        let mut rules = self.rules.lock().unwrap();
        let stored = rules
            .get_mut(&rule.rule_id)
            .ok_or_else(|| BillingError::NotFound(format!("rule {}", rule.rule_id)))?;
        *stored = CheckoutRule {
            is_active: stored.is_active,
            updated_utc: Utc::now(),
            ..rule.clone()
        };
        Ok(stored.clone())
    }

    async fn set_rule_active(
        &self,
        rule_id: Uuid,
        is_active: bool,
    ) -> Result<CheckoutRule, BillingError> {
        let mut rules = self.rules.lock().unwrap();
        let stored = rules
            .get_mut(&rule_id)
            .ok_or_else(|| BillingError::NotFound(format!("rule {}", rule_id)))?;
        stored.is_active = is_active;
        stored.updated_utc = Utc::now();
        Ok(stored.clone())
    }

    async fn list_rules(&self, filter: &ListRulesFilter) -> Result<Vec<CheckoutRule>, BillingError> {
        let mut rules: Vec<CheckoutRule> = self
            .rules
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.entity_kind == filter.entity_kind)
            .filter(|r| !filter.active_only || r.is_active)
            .cloned()
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_utc.cmp(&b.created_utc)));
        Ok(rules)
    }

    async fn find_active_rule(
        &self,
        kind: EntityKind,
        entity_id: Option<Uuid>,
    ) -> Result<Option<CheckoutRule>, BillingError> {
        self.active_rule_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .rules
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.entity_kind == kind && r.entity_id == entity_id && r.is_active)
            .max_by_key(|r| r.priority)
            .cloned())
    }
}

#[async_trait]
impl CheckoutStore for InMemoryStore {
    async fn create_checkout(&self, input: &SubmitCheckout) -> Result<CheckoutRecord, BillingError> {
        let now = Utc::now();
        let record = CheckoutRecord {
            checkout_id: Uuid::new_v4(),
            entity_kind: input.entity_kind,
            entity_id: input.entity_id,
            checkout_time: input.checkout_time,
            checkin_time: None,
            estimated_return_time: input.estimated_return_time,
            checkout_duration: None,
            status: CheckoutStatus::Pending,
            deduction_amount: None,
            adjusted_amount: None,
            rule_applied: None,
            reason: input.reason.clone(),
            created_utc: now,
            updated_utc: now,
        };
        self.checkouts
            .lock()
            .unwrap()
            .insert(record.checkout_id, record.clone());
        Ok(record)
    }

    async fn get_checkout(&self, checkout_id: Uuid) -> Result<Option<CheckoutRecord>, BillingError> {
        Ok(self.checkout(checkout_id))
    }

    async fn approve_checkout(
        &self,
        checkout_id: Uuid,
        deduction: &ApprovedDeduction,
    ) -> Result<CheckoutRecord, BillingError> {
        self.approvals.fetch_add(1, Ordering::SeqCst);
        self.transition(checkout_id, CheckoutStatus::Approved, |record| {
            record.checkout_duration = Some(deduction.duration_days);
            record.deduction_amount = Some(deduction.deduction_amount);
            record.adjusted_amount = Some(deduction.adjusted_amount);
            record.rule_applied = Some(deduction.rule_applied.clone());
        })
    }

    async fn decline_checkout(&self, checkout_id: Uuid) -> Result<CheckoutRecord, BillingError> {
        self.transition(checkout_id, CheckoutStatus::Declined, |_| {})
    }

    async fn record_return(
        &self,
        checkout_id: Uuid,
        checkin_time: DateTime<Utc>,
    ) -> Result<CheckoutRecord, BillingError> {
        self.transition(checkout_id, CheckoutStatus::CheckedIn, |record| {
            record.checkin_time = Some(checkin_time);
        })
    }
}

#[async_trait]
impl BillingStore for InMemoryStore {
    async fn billing_record_exists(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        year: i32,
        month: i32,
    ) -> Result<bool, BillingError> {
        if self.skip_existence_check.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.billing_records.lock().unwrap().iter().any(|r| {
            r.entity_kind == kind
                && r.entity_id == entity_id
                && r.billing_year_bs == year
                && r.billing_month_bs == month
        }))
    }

    async fn create_billing_record(
        &self,
        input: &NewBillingRecord,
    ) -> Result<BillingRecord, BillingError> {
        if self
            .failing_entities
            .lock()
            .unwrap()
            .contains(&input.entity_id)
        {
            return Err(BillingError::Persistence("connection reset".to_string()));
        }

        let mut records = self.billing_records.lock().unwrap();
        let duplicate = records.iter().any(|r| {
            r.record_number == input.record_number
                || (r.entity_kind == input.entity_kind
                    && r.entity_id == input.entity_id
                    && r.billing_year_bs == input.billing_year_bs
                    && r.billing_month_bs == input.billing_month_bs)
        });
        if duplicate {
            return Err(BillingError::Conflict(format!(
                "billing record {} already exists",
                input.record_number
            )));
        }

        let record = BillingRecord {
            record_id: Uuid::new_v4(),
            entity_kind: input.entity_kind,
            entity_id: input.entity_id,
            record_number: input.record_number.clone(),
            amount: input.amount,
            billing_month_bs: input.billing_month_bs,
            billing_year_bs: input.billing_year_bs,
            nepali_date: input.nepali_date.clone(),
            due_date: input.due_date,
            created_utc: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn list_billing_records(
        &self,
        filter: &ListBillingRecordsFilter,
    ) -> Result<Vec<BillingRecord>, BillingError> {
        let mut records: Vec<BillingRecord> = self
            .billing_records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.entity_kind == filter.entity_kind
                    && r.billing_year_bs == filter.billing_year_bs
                    && r.billing_month_bs == filter.billing_month_bs
                    && filter.page_token.map_or(true, |after| r.record_id > after)
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.record_id);
        records.truncate(filter.page_size.max(1) as usize);
        Ok(records)
    }
}

fn page<E: Clone>(
    entities: &[E],
    id: impl Fn(&E) -> Uuid,
    billable: impl Fn(&E) -> bool,
    after: Option<Uuid>,
    limit: i64,
) -> Vec<E> {
    let mut page: Vec<E> = entities
        .iter()
        .filter(|e| billable(e) && after.map_or(true, |a| id(e) > a))
        .cloned()
        .collect();
    page.sort_by_key(|e| id(e));
    page.truncate(limit.max(0) as usize);
    page
}

#[async_trait]
impl EntityDirectory<Staff> for InMemoryStore {
    async fn list_billable(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<Staff>, BillingError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(BillingError::Persistence("staff table unavailable".to_string()));
        }
        let staff = self.staff.lock().unwrap();
        Ok(page(
            &staff,
            |s| s.staff_id,
            |s| s.is_active && s.salary > Decimal::ZERO,
            after,
            limit,
        ))
    }

    async fn get_entity(&self, entity_id: Uuid) -> Result<Option<Staff>, BillingError> {
        Ok(self
            .staff
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.staff_id == entity_id)
            .cloned())
    }
}

#[async_trait]
impl EntityDirectory<Student> for InMemoryStore {
    async fn list_billable(
        &self,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<Student>, BillingError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(BillingError::Persistence("students table unavailable".to_string()));
        }
        let students = self.students.lock().unwrap();
        Ok(page(
            &students,
            |s| s.student_id,
            |s| s.is_active && s.monthly_fee > Decimal::ZERO,
            after,
            limit,
        ))
    }

    async fn get_entity(&self, entity_id: Uuid) -> Result<Option<Student>, BillingError> {
        Ok(self
            .students
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.student_id == entity_id)
            .cloned())
    }
}

/// Rule store that can hold one active-rule lookup after it has read the
/// store, until the test releases it.
pub struct PausingRuleStore {
    inner: Arc<InMemoryStore>,
    armed: AtomicBool,
    pub paused: Notify,
    pub release: Notify,
}

impl PausingRuleStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(false),
            paused: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Pause the next `find_active_rule` call.
    pub fn pause_next_lookup(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RuleStore for PausingRuleStore {
    async fn create_rule(&self, input: &CreateRule) -> Result<CheckoutRule, BillingError> {
        self.inner.create_rule(input).await
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<CheckoutRule>, BillingError> {
        self.inner.get_rule(rule_id).await
    }

    async fn update_rule(&self, rule: &CheckoutRule) -> Result<CheckoutRule, BillingError> {
        self.inner.update_rule(rule).await
    }

    async fn set_rule_active(
        &self,
        rule_id: Uuid,
        is_active: bool,
    ) -> Result<CheckoutRule, BillingError> {
        self.inner.set_rule_active(rule_id, is_active).await
    }

    async fn list_rules(&self, filter: &ListRulesFilter) -> Result<Vec<CheckoutRule>, BillingError> {
        self.inner.list_rules(filter).await
    }

    async fn find_active_rule(
        &self,
        kind: EntityKind,
        entity_id: Option<Uuid>,
    ) -> Result<Option<CheckoutRule>, BillingError> {
        let found = self.inner.find_active_rule(kind, entity_id).await;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.paused.notify_one();
            self.release.notified().await;
        }
        found
    }
}

/// In-memory cache whose prefix clear always fails.
#[derive(Default)]
pub struct UnclearableCache {
    inner: InMemoryCache,
}

#[async_trait]
impl Cache for UnclearableCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), anyhow::Error> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<u64, anyhow::Error> {
        Err(anyhow::anyhow!("cache unavailable"))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Err(anyhow::anyhow!("cache unavailable"))
    }
}

/// Calendar pinned to one BS date.
pub struct FixedCalendar {
    period: Mutex<BillingPeriod>,
}

impl FixedCalendar {
    /// 2081-04-01 BS, which is 2024-07-16.
    pub fn first_of_shrawan_2081() -> Self {
        Self {
            period: Mutex::new(period(2081, 4, 1, NaiveDate::from_ymd_opt(2024, 7, 16).unwrap())),
        }
    }

    pub fn set(&self, year: i32, month: i32, day: i32, gregorian: NaiveDate) {
        *self.period.lock().unwrap() = period(year, month, day, gregorian);
    }
}

fn period(year: i32, month: i32, day: i32, gregorian_date: NaiveDate) -> BillingPeriod {
    BillingPeriod {
        year,
        month,
        day,
        display_date: format!("{:04}-{:02}-{:02}", year, month, day),
        gregorian_date,
    }
}

impl CalendarAdapter for FixedCalendar {
    fn current_period(&self) -> Result<BillingPeriod, CalendarError> {
        Ok(self.period.lock().unwrap().clone())
    }
}

/// Notifier that keeps every event.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl NotificationDispatcher for RecordingNotifier {
    fn dispatch(&self, event: NotificationEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Fully wired services over the in-memory fakes.
pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub cache: Arc<InMemoryCache>,
    pub calendar: Arc<FixedCalendar>,
    pub notifier: Arc<RecordingNotifier>,
    pub components: BillingComponents,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_chunk_size(100)
    }

    pub fn with_chunk_size(chunk_size: i64) -> Self {
        let store = Arc::new(InMemoryStore::default());
        let cache = Arc::new(InMemoryCache::new());
        let calendar = Arc::new(FixedCalendar::first_of_shrawan_2081());
        let notifier = Arc::new(RecordingNotifier::default());

        let components = BillingComponents::assemble(
            store.clone(),
            cache.clone() as Arc<dyn Cache>,
            calendar.clone() as Arc<dyn CalendarAdapter>,
            notifier.clone() as Arc<dyn NotificationDispatcher>,
            Duration::from_secs(3600),
            GenerationSettings {
                chunk_size,
                due_days: 7,
            },
        );

        Self {
            store,
            cache,
            calendar,
            notifier,
            components,
        }
    }

    pub fn grpc(&self) -> HostelBillingServiceImpl {
        HostelBillingServiceImpl::new(self.components.clone())
    }

    /// Create and activate the universal rule for `kind`.
    pub async fn universal_rule(
        &self,
        kind: EntityKind,
        deduction_type: DeductionType,
        value: Decimal,
    ) -> CheckoutRule {
        self.components
            .rules
            .create_rule(CreateRule {
                entity_kind: kind,
                entity_id: None,
                deduction_type,
                deduction_value: value,
                min_days: None,
                max_days: None,
                priority: 0,
                is_active: true,
                name: format!("{} leave", kind),
                description: None,
                condition: Some("checkout duration >= 1 day".to_string()),
            })
            .await
            .expect("universal rule should be created")
    }

    /// Submit a pending checkout lasting `days` (estimated return).
    pub async fn pending_checkout(&self, kind: EntityKind, entity_id: Uuid, days: i64) -> CheckoutRecord {
        let checkout_time = Utc::now() - chrono::Duration::days(days + 1);
        self.store
            .create_checkout(&SubmitCheckout {
                entity_kind: kind,
                entity_id,
                checkout_time,
                estimated_return_time: Some(checkout_time + chrono::Duration::days(days)),
                reason: Some("family visit".to_string()),
            })
            .await
            .expect("checkout should be created")
    }
}
