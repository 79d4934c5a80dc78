//! Checkout rule management and the cached universal-rule lookup.

use crate::error::BillingError;
use crate::models::{CheckoutRule, CreateRule, DeductionType, EntityKind, ListRulesFilter, UpdateRule};
use crate::services::cache::{Cache, ScopedCache};
use crate::services::metrics::record_rule_cache_lookup;
use crate::services::rule_parser::RuleParser;
use crate::services::store::RuleStore;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Largest value a `NUMERIC(12, 2)` deduction column holds.
fn max_deduction_value() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

/// Prefix of every rule key in the shared cache.
pub const RULE_CACHE_PREFIX: &str = "checkout_rule:";

/// Read-through cache of the active universal rule per entity kind.
///
/// `generation` moves on every clear. A reader that loaded a rule before a
/// clear removes what it wrote, so a rule read before a change is never left
/// behind in the cache.
#[derive(Clone)]
pub struct RuleCache {
    store: Arc<dyn RuleStore>,
    cache: ScopedCache,
    ttl: Duration,
    generation: Arc<AtomicU64>,
}

impl RuleCache {
    pub fn new(store: Arc<dyn RuleStore>, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            store,
            cache: ScopedCache::new(cache, RULE_CACHE_PREFIX),
            ttl,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn universal_key(kind: EntityKind) -> String {
        format!("universal:{}", kind.as_str())
    }

    /// Active universal rule for `kind`. Cache failures degrade to a store read.
    #[instrument(skip(self), fields(entity_kind = %kind))]
    pub async fn active_universal_rule(
        &self,
        kind: EntityKind,
    ) -> Result<Option<CheckoutRule>, BillingError> {
        let key = Self::universal_key(kind);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CheckoutRule>(&raw) {
                Ok(rule) => {
                    record_rule_cache_lookup("hit");
                    return Ok(Some(rule));
                }
                Err(e) => warn!(key = %key, error = %e, "Discarding undecodable cached rule"),
            },
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Rule cache read failed, treating as miss"),
        }
        record_rule_cache_lookup("miss");

        let generation = self.generation.load(Ordering::SeqCst);
        let rule = self.store.find_active_rule(kind, None).await?;

        if let Some(ref rule) = rule {
            match serde_json::to_string(rule) {
                Ok(raw) => self.fill(&key, &raw, generation).await,
                Err(e) => warn!(rule_id = %rule.rule_id, error = %e, "Failed to encode rule for cache"),
            }
        }

        Ok(rule)
    }

    /// Write a rule read at `generation`, backing it out if a clear ran meanwhile.
    async fn fill(&self, key: &str, raw: &str, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if let Err(e) = self.cache.set(key, raw, self.ttl).await {
            warn!(key = %key, error = %e, "Rule cache write failed");
            return;
        }
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(key = %key, "Rule changed during lookup, dropping cached copy");
            if let Err(e) = self.cache.delete(key).await {
                warn!(key = %key, error = %e, "Failed to drop stale cached rule");
            }
        }
    }

    /// Drop all rule entries; other keys in the shared cache survive.
    pub async fn clear(&self) -> Result<u64, BillingError> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let removed = self
            .cache
            .clear()
            .await
            .map_err(|e| BillingError::Cache(format!("Failed to clear rule cache: {}", e)))?;
        info!(removed = removed, prefix = %self.cache.prefix(), "Rule cache cleared");
        Ok(removed)
    }
}

/// Rule CRUD with field validation and the single-active-rule-per-scope check.
#[derive(Clone)]
pub struct RuleService {
    store: Arc<dyn RuleStore>,
    cache: RuleCache,
}

impl RuleService {
    pub fn new(store: Arc<dyn RuleStore>, cache: RuleCache) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    #[instrument(skip(self, input), fields(entity_kind = %input.entity_kind))]
    pub async fn create_rule(&self, input: CreateRule) -> Result<CheckoutRule, BillingError> {
        validate_rule_fields(
            input.deduction_type,
            input.deduction_value,
            input.min_days,
            input.max_days,
            &input.name,
            input.condition.as_deref(),
        )?;

        if input.is_active {
            self.ensure_scope_free(input.entity_kind, input.entity_id, None)
                .await?;
        }

        let rule = self.store.create_rule(&input).await?;
        self.invalidate_cache().await;

        Ok(rule)
    }

    #[instrument(skip(self, update), fields(rule_id = %rule_id))]
    pub async fn update_rule(
        &self,
        rule_id: Uuid,
        update: UpdateRule,
    ) -> Result<CheckoutRule, BillingError> {
        let existing = self.get_rule(rule_id).await?;
        let merged = update.merged_into(&existing);

        validate_rule_fields(
            merged.deduction_type,
            merged.deduction_value,
            merged.min_days,
            merged.max_days,
            &merged.name,
            merged.condition.as_deref(),
        )?;

        let rule = self.store.update_rule(&merged).await?;
        self.invalidate_cache().await;

        Ok(rule)
    }

    #[instrument(skip(self), fields(rule_id = %rule_id, is_active = is_active))]
    pub async fn set_rule_active(
        &self,
        rule_id: Uuid,
        is_active: bool,
    ) -> Result<CheckoutRule, BillingError> {
        let existing = self.get_rule(rule_id).await?;

        if is_active && !existing.is_active {
            self.ensure_scope_free(existing.entity_kind, existing.entity_id, Some(rule_id))
                .await?;
        }

        let rule = self.store.set_rule_active(rule_id, is_active).await?;
        self.invalidate_cache().await;

        Ok(rule)
    }

    pub async fn get_rule(&self, rule_id: Uuid) -> Result<CheckoutRule, BillingError> {
        self.store
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("rule {}", rule_id)))
    }

    pub async fn list_rules(
        &self,
        filter: &ListRulesFilter,
    ) -> Result<Vec<CheckoutRule>, BillingError> {
        self.store.list_rules(filter).await
    }

    /// The write is already committed, so a failed clear is logged, not returned.
    async fn invalidate_cache(&self) {
        if let Err(e) = self.cache.clear().await {
            warn!(error = %e, "Rule saved but cache invalidation failed");
        }
    }

    async fn ensure_scope_free(
        &self,
        kind: EntityKind,
        entity_id: Option<Uuid>,
        except: Option<Uuid>,
    ) -> Result<(), BillingError> {
        match self.store.find_active_rule(kind, entity_id).await? {
            Some(active) if Some(active.rule_id) != except => {
                let scope = entity_id
                    .map(|id| format!("entity {}", id))
                    .unwrap_or_else(|| "universal scope".to_string());
                Err(BillingError::Conflict(format!(
                    "rule '{}' is already active for {} {}",
                    active.name, kind, scope
                )))
            }
            _ => Ok(()),
        }
    }
}

fn validate_rule_fields(
    deduction_type: DeductionType,
    deduction_value: Decimal,
    min_days: Option<i32>,
    max_days: Option<i32>,
    name: &str,
    condition: Option<&str>,
) -> Result<(), BillingError> {
    if name.trim().is_empty() {
        return Err(BillingError::Validation("rule name is required".to_string()));
    }
    if deduction_value < Decimal::ZERO {
        return Err(BillingError::Validation(
            "deduction_value must not be negative".to_string(),
        ));
    }
    if deduction_value > max_deduction_value() {
        return Err(BillingError::Validation(format!(
            "deduction_value must be at most {}",
            max_deduction_value()
        )));
    }
    if deduction_value.normalize().scale() > 2 {
        return Err(BillingError::Validation(
            "deduction_value must have at most 2 decimal places".to_string(),
        ));
    }
    if deduction_type == DeductionType::Percentage && deduction_value > Decimal::ONE_HUNDRED {
        return Err(BillingError::Validation(
            "percentage deduction_value must be at most 100".to_string(),
        ));
    }
    if min_days.is_some_and(|d| d < 0) || max_days.is_some_and(|d| d < 0) {
        return Err(BillingError::Validation(
            "min_days and max_days must not be negative".to_string(),
        ));
    }
    if let (Some(min), Some(max)) = (min_days, max_days) {
        if min > max {
            return Err(BillingError::Validation(format!(
                "min_days ({}) must not exceed max_days ({})",
                min, max
            )));
        }
    }
    if let Some(condition) = condition.filter(|c| !c.trim().is_empty()) {
        RuleParser::parse(condition)?;
    }
    Ok(())
}
