pub mod cache;
pub mod calendar;
pub mod database;
pub mod deduction;
pub mod generation;
pub mod metrics;
pub mod notifier;
pub mod rule_parser;
pub mod rules;
pub mod scheduler;
pub mod store;

pub use cache::{Cache, InMemoryCache, RedisCache, ScopedCache};
pub use calendar::{BikramSambatCalendar, CalendarAdapter, CalendarError};
pub use database::Database;
pub use deduction::{AppliedDeduction, DeductionCalculator, DeductionOutcome};
pub use generation::{GenerationSettings, GenerationSummary, PeriodicGenerationService};
pub use metrics::{get_metrics, init_metrics};
pub use notifier::{
    EmailSender, LogEmailSender, NotificationDispatcher, NotificationEvent, QueuedNotifier,
    SmtpEmailSender,
};
pub use rule_parser::{ComparisonOperator, ParsedRule, RuleParser};
pub use rules::{RuleCache, RuleService, RULE_CACHE_PREFIX};
pub use scheduler::BillingScheduler;
pub use store::{BillingStore, CheckoutStore, EntityDirectory, RuleStore};
