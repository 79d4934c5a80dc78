//! HostelBillingService gRPC implementation.

use crate::error::BillingError;
use crate::grpc::proto::{self, hostel_billing_service_server::HostelBillingService};
use crate::models::{
    BillingPeriod, BillingRecord, CheckoutRecord, CheckoutRule, CreateRule, DeductionType,
    EntityKind, ListBillingRecordsFilter, ListRulesFilter, Staff, Student, SubmitCheckout,
    UpdateRule,
};
use crate::services::metrics::{record_error, record_grpc_request, record_grpc_request_duration};
use crate::services::{
    BillingStore, Cache, CalendarAdapter, CheckoutStore, DeductionCalculator, DeductionOutcome,
    EntityDirectory, GenerationSettings, GenerationSummary, NotificationDispatcher,
    PeriodicGenerationService, RuleCache, RuleParser, RuleService, RuleStore,
};
use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tonic::{Request, Response, Status};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i32 = 50;
const MAX_PAGE_SIZE: i32 = 100;

/// The wired services behind the gRPC surface. Shared with the scheduler.
#[derive(Clone)]
pub struct BillingComponents {
    pub rules: RuleService,
    pub checkouts: Arc<dyn CheckoutStore>,
    pub billing: Arc<dyn BillingStore>,
    pub staff_deductions: Arc<DeductionCalculator<Staff>>,
    pub student_deductions: Arc<DeductionCalculator<Student>>,
    pub staff_generation: Arc<PeriodicGenerationService<Staff>>,
    pub student_generation: Arc<PeriodicGenerationService<Student>>,
    pub calendar: Arc<dyn CalendarAdapter>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

impl BillingComponents {
    /// Wire every component over one store that implements all persistence seams.
    pub fn assemble<S>(
        store: Arc<S>,
        cache: Arc<dyn Cache>,
        calendar: Arc<dyn CalendarAdapter>,
        notifier: Arc<dyn NotificationDispatcher>,
        rule_cache_ttl: Duration,
        settings: GenerationSettings,
    ) -> Self
    where
        S: RuleStore
            + CheckoutStore
            + BillingStore
            + EntityDirectory<Staff>
            + EntityDirectory<Student>
            + 'static,
    {
        let rule_store: Arc<dyn RuleStore> = store.clone();
        let checkouts: Arc<dyn CheckoutStore> = store.clone();
        let billing: Arc<dyn BillingStore> = store.clone();
        let staff: Arc<dyn EntityDirectory<Staff>> = store.clone();
        let students: Arc<dyn EntityDirectory<Student>> = store;

        let rule_cache = RuleCache::new(rule_store.clone(), cache, rule_cache_ttl);

        Self {
            rules: RuleService::new(rule_store, rule_cache.clone()),
            staff_deductions: Arc::new(DeductionCalculator::new(
                checkouts.clone(),
                staff.clone(),
                rule_cache.clone(),
            )),
            student_deductions: Arc::new(DeductionCalculator::new(
                checkouts.clone(),
                students.clone(),
                rule_cache,
            )),
            staff_generation: Arc::new(PeriodicGenerationService::new(
                billing.clone(),
                staff,
                calendar.clone(),
                notifier.clone(),
                settings,
            )),
            student_generation: Arc::new(PeriodicGenerationService::new(
                billing.clone(),
                students,
                calendar.clone(),
                notifier.clone(),
                settings,
            )),
            checkouts,
            billing,
            calendar,
            notifier,
        }
    }
}

/// HostelBillingService implementation.
pub struct HostelBillingServiceImpl {
    components: BillingComponents,
}

impl HostelBillingServiceImpl {
    pub fn new(components: BillingComponents) -> Self {
        Self { components }
    }
}

// Helper functions for type conversions
fn parse_uuid(field: &str, s: &str) -> Result<Uuid, BillingError> {
    Uuid::parse_str(s).map_err(|_| BillingError::Validation(format!("Invalid {}: {}", field, s)))
}

fn parse_optional_uuid(field: &str, s: &str) -> Result<Option<Uuid>, BillingError> {
    if s.is_empty() {
        Ok(None)
    } else {
        parse_uuid(field, s).map(Some)
    }
}

fn parse_decimal(field: &str, s: &str) -> Result<Decimal, BillingError> {
    Decimal::from_str(s.trim())
        .map_err(|_| BillingError::Validation(format!("Invalid {}: {}", field, s)))
}

fn parse_kind(value: i32) -> Result<EntityKind, BillingError> {
    EntityKind::from_proto(value)
        .ok_or_else(|| BillingError::Validation("entity_kind must be staff or student".to_string()))
}

fn parse_deduction_type(value: i32) -> Result<DeductionType, BillingError> {
    DeductionType::from_proto(value).ok_or_else(|| {
        BillingError::Validation("deduction_type must be percentage or fixed".to_string())
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

fn datetime_to_timestamp(dt: DateTime<Utc>) -> Option<Timestamp> {
    Some(Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    })
}

fn timestamp_to_datetime(field: &str, ts: Timestamp) -> Result<DateTime<Utc>, BillingError> {
    DateTime::from_timestamp(ts.seconds, ts.nanos.max(0) as u32)
        .ok_or_else(|| BillingError::Validation(format!("Invalid {} timestamp", field)))
}

fn rule_to_proto(rule: CheckoutRule) -> proto::CheckoutRule {
    proto::CheckoutRule {
        rule_id: rule.rule_id.to_string(),
        entity_kind: rule.entity_kind.to_proto(),
        entity_id: rule.entity_id.map(|id| id.to_string()).unwrap_or_default(),
        deduction_type: rule.deduction_type.to_proto(),
        deduction_value: rule.deduction_value.to_string(),
        min_days: rule.min_days,
        max_days: rule.max_days,
        priority: rule.priority,
        is_active: rule.is_active,
        name: rule.name,
        description: rule.description.unwrap_or_default(),
        condition: rule.condition.unwrap_or_default(),
        created_at: datetime_to_timestamp(rule.created_utc),
        updated_at: datetime_to_timestamp(rule.updated_utc),
    }
}

fn checkout_to_proto(record: CheckoutRecord) -> proto::CheckoutRecord {
    proto::CheckoutRecord {
        checkout_id: record.checkout_id.to_string(),
        entity_kind: record.entity_kind.to_proto(),
        entity_id: record.entity_id.to_string(),
        checkout_time: datetime_to_timestamp(record.checkout_time),
        checkin_time: record.checkin_time.and_then(datetime_to_timestamp),
        estimated_return_time: record.estimated_return_time.and_then(datetime_to_timestamp),
        checkout_duration: record.checkout_duration,
        status: record.status.to_proto(),
        deduction_amount: record
            .deduction_amount
            .map(|d| d.to_string())
            .unwrap_or_default(),
        adjusted_amount: record
            .adjusted_amount
            .map(|d| d.to_string())
            .unwrap_or_default(),
        rule_applied: record.rule_applied.unwrap_or_default(),
        reason: record.reason.unwrap_or_default(),
        created_at: datetime_to_timestamp(record.created_utc),
        updated_at: datetime_to_timestamp(record.updated_utc),
    }
}

fn breakdown_to_proto(outcome: DeductionOutcome) -> proto::DeductionBreakdown {
    proto::DeductionBreakdown {
        deduction_amount: outcome.deduction_amount.to_string(),
        adjusted_amount: outcome.adjusted_amount.to_string(),
        rule_applied: outcome.rule_applied,
        prorate_ratio: outcome.prorate_ratio.to_string(),
        rule_id: outcome.rule_id.to_string(),
        duration_days: outcome.duration_days,
        base_amount: outcome.base_amount.to_string(),
    }
}

fn period_to_proto(period: BillingPeriod) -> proto::BillingPeriod {
    proto::BillingPeriod {
        month: period.month,
        year: period.year,
        is_first_day: period.is_first_day(),
        display_date: period.display_date,
        gregorian_date: period.gregorian_date.to_string(),
    }
}

fn billing_record_to_proto(record: BillingRecord) -> proto::BillingRecord {
    proto::BillingRecord {
        record_id: record.record_id.to_string(),
        entity_kind: record.entity_kind.to_proto(),
        entity_id: record.entity_id.to_string(),
        record_number: record.record_number,
        amount: record.amount.to_string(),
        billing_month_bs: record.billing_month_bs,
        billing_year_bs: record.billing_year_bs,
        nepali_date: record.nepali_date,
        due_date: record.due_date.to_string(),
        created_at: datetime_to_timestamp(record.created_utc),
    }
}

fn summary_to_proto(summary: GenerationSummary) -> proto::GenerationSummary {
    let count = |n: u64| i32::try_from(n).unwrap_or(i32::MAX);
    proto::GenerationSummary {
        entity_kind: summary.entity_kind.to_proto(),
        processed: count(summary.processed),
        created: count(summary.created),
        skipped_existing: count(summary.skipped_existing),
        errors: count(summary.errors),
        gated: summary.gated,
        period: Some(period_to_proto(summary.period)),
    }
}

/// Record metrics for a finished call and convert the result.
#[allow(clippy::result_large_err)]
fn finish<T>(
    method: &'static str,
    start: Instant,
    result: Result<T, BillingError>,
) -> Result<Response<T>, Status> {
    record_grpc_request_duration(method, start.elapsed().as_secs_f64());
    match result {
        Ok(response) => {
            record_grpc_request(method, "ok");
            Ok(Response::new(response))
        }
        Err(e) => {
            record_grpc_request(method, "error");
            record_error(e.kind(), method);
            match &e {
                BillingError::Persistence(_)
                | BillingError::Calendar(_)
                | BillingError::Cache(_) => {
                    tracing::error!(method = method, error = %e, "Request failed")
                }
                _ => tracing::warn!(method = method, error = %e, "Request rejected"),
            }
            Err(e.into())
        }
    }
}

impl HostelBillingServiceImpl {
    async fn load_checkout(&self, checkout_id: &str) -> Result<CheckoutRecord, BillingError> {
        let checkout_id = parse_uuid("checkout_id", checkout_id)?;
        self.components
            .checkouts
            .get_checkout(checkout_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("checkout {}", checkout_id)))
    }

    async fn handle_evaluate_rule(
        &self,
        req: proto::EvaluateRuleRequest,
    ) -> Result<proto::EvaluateRuleResponse, BillingError> {
        let parsed = RuleParser::parse(&req.rule)?;
        Ok(proto::EvaluateRuleResponse {
            matched: parsed.matches(req.actual_value),
            variable: parsed.variable.to_string(),
            operator: parsed.operator.symbol().to_string(),
            threshold: parsed.threshold,
            canonical: parsed.to_string(),
        })
    }

    async fn handle_create_rule(
        &self,
        req: proto::CreateCheckoutRuleRequest,
    ) -> Result<proto::CreateCheckoutRuleResponse, BillingError> {
        let input = CreateRule {
            entity_kind: parse_kind(req.entity_kind)?,
            entity_id: parse_optional_uuid("entity_id", &req.entity_id)?,
            deduction_type: parse_deduction_type(req.deduction_type)?,
            deduction_value: parse_decimal("deduction_value", &req.deduction_value)?,
            min_days: req.min_days,
            max_days: req.max_days,
            priority: req.priority,
            is_active: req.is_active,
            name: req.name,
            description: non_empty(req.description),
            condition: non_empty(req.condition),
        };

        tracing::info!(entity_kind = %input.entity_kind, name = %input.name, "Creating checkout rule");
        let rule = self.components.rules.create_rule(input).await?;

        Ok(proto::CreateCheckoutRuleResponse {
            rule: Some(rule_to_proto(rule)),
        })
    }

    async fn handle_update_rule(
        &self,
        req: proto::UpdateCheckoutRuleRequest,
    ) -> Result<proto::UpdateCheckoutRuleResponse, BillingError> {
        let rule_id = parse_uuid("rule_id", &req.rule_id)?;
        let update = UpdateRule {
            deduction_type: req.deduction_type.map(parse_deduction_type).transpose()?,
            deduction_value: req
                .deduction_value
                .as_deref()
                .map(|v| parse_decimal("deduction_value", v))
                .transpose()?,
            min_days: req.min_days,
            max_days: req.max_days,
            priority: req.priority,
            name: req.name,
            description: req.description,
            condition: req.condition,
        };

        let rule = self.components.rules.update_rule(rule_id, update).await?;

        Ok(proto::UpdateCheckoutRuleResponse {
            rule: Some(rule_to_proto(rule)),
        })
    }

    async fn handle_set_rule_active(
        &self,
        req: proto::SetCheckoutRuleActiveRequest,
    ) -> Result<proto::SetCheckoutRuleActiveResponse, BillingError> {
        let rule_id = parse_uuid("rule_id", &req.rule_id)?;
        let rule = self
            .components
            .rules
            .set_rule_active(rule_id, req.is_active)
            .await?;

        Ok(proto::SetCheckoutRuleActiveResponse {
            rule: Some(rule_to_proto(rule)),
        })
    }

    async fn handle_get_rule(
        &self,
        req: proto::GetCheckoutRuleRequest,
    ) -> Result<proto::GetCheckoutRuleResponse, BillingError> {
        let rule_id = parse_uuid("rule_id", &req.rule_id)?;
        let rule = self.components.rules.get_rule(rule_id).await?;

        Ok(proto::GetCheckoutRuleResponse {
            rule: Some(rule_to_proto(rule)),
        })
    }

    async fn handle_list_rules(
        &self,
        req: proto::ListCheckoutRulesRequest,
    ) -> Result<proto::ListCheckoutRulesResponse, BillingError> {
        let filter = ListRulesFilter {
            entity_kind: parse_kind(req.entity_kind)?,
            active_only: req.active_only,
        };
        let rules = self.components.rules.list_rules(&filter).await?;

        Ok(proto::ListCheckoutRulesResponse {
            rules: rules.into_iter().map(rule_to_proto).collect(),
        })
    }

    async fn handle_submit_checkout(
        &self,
        req: proto::SubmitCheckoutRequest,
    ) -> Result<proto::SubmitCheckoutResponse, BillingError> {
        let checkout_time = req
            .checkout_time
            .map(|ts| timestamp_to_datetime("checkout_time", ts))
            .transpose()?
            .ok_or_else(|| BillingError::Validation("checkout_time is required".to_string()))?;
        let estimated_return_time = req
            .estimated_return_time
            .map(|ts| timestamp_to_datetime("estimated_return_time", ts))
            .transpose()?;

        if estimated_return_time.is_some_and(|end| end < checkout_time) {
            return Err(BillingError::Validation(
                "estimated_return_time must not be before checkout_time".to_string(),
            ));
        }

        let input = SubmitCheckout {
            entity_kind: parse_kind(req.entity_kind)?,
            entity_id: parse_uuid("entity_id", &req.entity_id)?,
            checkout_time,
            estimated_return_time,
            reason: non_empty(req.reason),
        };

        let record = self.components.checkouts.create_checkout(&input).await?;

        Ok(proto::SubmitCheckoutResponse {
            checkout: Some(checkout_to_proto(record)),
        })
    }

    async fn handle_get_checkout(
        &self,
        req: proto::GetCheckoutRequest,
    ) -> Result<proto::GetCheckoutResponse, BillingError> {
        let record = self.load_checkout(&req.checkout_id).await?;
        Ok(proto::GetCheckoutResponse {
            checkout: Some(checkout_to_proto(record)),
        })
    }

    async fn handle_decline_checkout(
        &self,
        req: proto::DeclineCheckoutRequest,
    ) -> Result<proto::DeclineCheckoutResponse, BillingError> {
        let checkout_id = parse_uuid("checkout_id", &req.checkout_id)?;
        let record = self
            .components
            .checkouts
            .decline_checkout(checkout_id)
            .await?;

        Ok(proto::DeclineCheckoutResponse {
            checkout: Some(checkout_to_proto(record)),
        })
    }

    async fn handle_record_return(
        &self,
        req: proto::RecordReturnRequest,
    ) -> Result<proto::RecordReturnResponse, BillingError> {
        let checkout_id = parse_uuid("checkout_id", &req.checkout_id)?;
        let checkin_time = match req.checkin_time {
            Some(ts) => timestamp_to_datetime("checkin_time", ts)?,
            None => Utc::now(),
        };

        let record = self
            .components
            .checkouts
            .record_return(checkout_id, checkin_time)
            .await?;

        Ok(proto::RecordReturnResponse {
            checkout: Some(checkout_to_proto(record)),
        })
    }

    async fn handle_calculate_deduction(
        &self,
        req: proto::CalculateDeductionRequest,
    ) -> Result<proto::CalculateDeductionResponse, BillingError> {
        let record = self.load_checkout(&req.checkout_id).await?;

        let outcome = match record.entity_kind {
            EntityKind::Staff => self.components.staff_deductions.calculate(&record).await?,
            EntityKind::Student => self.components.student_deductions.calculate(&record).await?,
        };

        Ok(proto::CalculateDeductionResponse {
            breakdown: Some(breakdown_to_proto(outcome)),
        })
    }

    async fn handle_apply_deduction(
        &self,
        req: proto::ApplyDeductionRequest,
    ) -> Result<proto::ApplyDeductionResponse, BillingError> {
        let record = self.load_checkout(&req.checkout_id).await?;

        let (checkout, outcome, event) = match record.entity_kind {
            EntityKind::Staff => {
                let applied = self
                    .components
                    .staff_deductions
                    .apply(record.checkout_id)
                    .await?;
                let event = applied.notification();
                (applied.checkout, applied.outcome, event)
            }
            EntityKind::Student => {
                let applied = self
                    .components
                    .student_deductions
                    .apply(record.checkout_id)
                    .await?;
                let event = applied.notification();
                (applied.checkout, applied.outcome, event)
            }
        };

        if let Some(event) = event {
            self.components.notifier.dispatch(event);
        }

        Ok(proto::ApplyDeductionResponse {
            checkout: Some(checkout_to_proto(checkout)),
            breakdown: Some(breakdown_to_proto(outcome)),
        })
    }

    async fn handle_generate_billing(
        &self,
        req: proto::GenerateBillingRequest,
    ) -> Result<proto::GenerateBillingResponse, BillingError> {
        let kind = parse_kind(req.entity_kind)?;
        tracing::info!(entity_kind = %kind, force = req.force, "Billing generation requested");

        let summary = match kind {
            EntityKind::Staff => {
                self.components
                    .staff_generation
                    .generate_for_current_period(req.force)
                    .await?
            }
            EntityKind::Student => {
                self.components
                    .student_generation
                    .generate_for_current_period(req.force)
                    .await?
            }
        };

        Ok(proto::GenerateBillingResponse {
            summary: Some(summary_to_proto(summary)),
        })
    }

    async fn handle_list_billing_records(
        &self,
        req: proto::ListBillingRecordsRequest,
    ) -> Result<proto::ListBillingRecordsResponse, BillingError> {
        if !(1..=12).contains(&req.billing_month_bs) {
            return Err(BillingError::Validation(
                "billing_month_bs must be between 1 and 12".to_string(),
            ));
        }

        let page_size = if req.page_size > 0 {
            req.page_size.min(MAX_PAGE_SIZE)
        } else {
            DEFAULT_PAGE_SIZE
        };

        let filter = ListBillingRecordsFilter {
            entity_kind: parse_kind(req.entity_kind)?,
            billing_year_bs: req.billing_year_bs,
            billing_month_bs: req.billing_month_bs,
            page_size,
            page_token: parse_optional_uuid("page_token", &req.page_token)?,
        };

        let records = self.components.billing.list_billing_records(&filter).await?;

        let next_page_token = if records.len() as i32 == page_size {
            records
                .last()
                .map(|r| r.record_id.to_string())
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(proto::ListBillingRecordsResponse {
            records: records.into_iter().map(billing_record_to_proto).collect(),
            next_page_token,
        })
    }

    async fn handle_get_current_period(&self) -> Result<proto::GetCurrentPeriodResponse, BillingError> {
        let period = self.components.calendar.current_period()?;
        Ok(proto::GetCurrentPeriodResponse {
            period: Some(period_to_proto(period)),
        })
    }
}

#[tonic::async_trait]
impl HostelBillingService for HostelBillingServiceImpl {
    async fn evaluate_rule(
        &self,
        request: Request<proto::EvaluateRuleRequest>,
    ) -> Result<Response<proto::EvaluateRuleResponse>, Status> {
        let start = Instant::now();
        let method = "EvaluateRule";
        let result = self.handle_evaluate_rule(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn create_checkout_rule(
        &self,
        request: Request<proto::CreateCheckoutRuleRequest>,
    ) -> Result<Response<proto::CreateCheckoutRuleResponse>, Status> {
        let start = Instant::now();
        let method = "CreateCheckoutRule";
        let result = self.handle_create_rule(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn update_checkout_rule(
        &self,
        request: Request<proto::UpdateCheckoutRuleRequest>,
    ) -> Result<Response<proto::UpdateCheckoutRuleResponse>, Status> {
        let start = Instant::now();
        let method = "UpdateCheckoutRule";
        let result = self.handle_update_rule(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn set_checkout_rule_active(
        &self,
        request: Request<proto::SetCheckoutRuleActiveRequest>,
    ) -> Result<Response<proto::SetCheckoutRuleActiveResponse>, Status> {
        let start = Instant::now();
        let method = "SetCheckoutRuleActive";
        let result = self.handle_set_rule_active(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn get_checkout_rule(
        &self,
        request: Request<proto::GetCheckoutRuleRequest>,
    ) -> Result<Response<proto::GetCheckoutRuleResponse>, Status> {
        let start = Instant::now();
        let method = "GetCheckoutRule";
        let result = self.handle_get_rule(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn list_checkout_rules(
        &self,
        request: Request<proto::ListCheckoutRulesRequest>,
    ) -> Result<Response<proto::ListCheckoutRulesResponse>, Status> {
        let start = Instant::now();
        let method = "ListCheckoutRules";
        let result = self.handle_list_rules(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn submit_checkout(
        &self,
        request: Request<proto::SubmitCheckoutRequest>,
    ) -> Result<Response<proto::SubmitCheckoutResponse>, Status> {
        let start = Instant::now();
        let method = "SubmitCheckout";
        let result = self.handle_submit_checkout(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn get_checkout(
        &self,
        request: Request<proto::GetCheckoutRequest>,
    ) -> Result<Response<proto::GetCheckoutResponse>, Status> {
        let start = Instant::now();
        let method = "GetCheckout";
        let result = self.handle_get_checkout(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn decline_checkout(
        &self,
        request: Request<proto::DeclineCheckoutRequest>,
    ) -> Result<Response<proto::DeclineCheckoutResponse>, Status> {
        let start = Instant::now();
        let method = "DeclineCheckout";
        let result = self.handle_decline_checkout(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn record_return(
        &self,
        request: Request<proto::RecordReturnRequest>,
    ) -> Result<Response<proto::RecordReturnResponse>, Status> {
        let start = Instant::now();
        let method = "RecordReturn";
        let result = self.handle_record_return(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn calculate_deduction(
        &self,
        request: Request<proto::CalculateDeductionRequest>,
    ) -> Result<Response<proto::CalculateDeductionResponse>, Status> {
        let start = Instant::now();
        let method = "CalculateDeduction";
        let result = self.handle_calculate_deduction(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn apply_deduction(
        &self,
        request: Request<proto::ApplyDeductionRequest>,
    ) -> Result<Response<proto::ApplyDeductionResponse>, Status> {
        let start = Instant::now();
        let method = "ApplyDeduction";
        let result = self.handle_apply_deduction(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn generate_billing(
        &self,
        request: Request<proto::GenerateBillingRequest>,
    ) -> Result<Response<proto::GenerateBillingResponse>, Status> {
        let start = Instant::now();
        let method = "GenerateBilling";
        let result = self.handle_generate_billing(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn list_billing_records(
        &self,
        request: Request<proto::ListBillingRecordsRequest>,
    ) -> Result<Response<proto::ListBillingRecordsResponse>, Status> {
        let start = Instant::now();
        let method = "ListBillingRecords";
        let result = self.handle_list_billing_records(request.into_inner()).await;
        finish(method, start, result)
    }

    async fn get_current_period(
        &self,
        _request: Request<proto::GetCurrentPeriodRequest>,
    ) -> Result<Response<proto::GetCurrentPeriodResponse>, Status> {
        let start = Instant::now();
        let method = "GetCurrentPeriod";
        let result = self.handle_get_current_period().await;
        finish(method, start, result)
    }
}
