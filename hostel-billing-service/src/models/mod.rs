//! Domain models for hostel-billing-service.

mod billing_record;
mod checkout;
mod entity;
mod rule;

pub use billing_record::{
    record_number, BillingPeriod, BillingRecord, ListBillingRecordsFilter, NewBillingRecord,
};
pub use checkout::{ApprovedDeduction, CheckoutRecord, CheckoutStatus, SubmitCheckout};
pub use entity::{BillableEntity, EntityKind, Staff, Student};
pub use rule::{CheckoutRule, CreateRule, DeductionType, ListRulesFilter, UpdateRule};
