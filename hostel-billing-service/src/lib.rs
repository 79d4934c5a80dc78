//! Hostel billing: prorated checkout deductions and exactly-once monthly
//! invoices and payrolls keyed to the Bikram Sambat calendar.

pub mod config;
pub mod error;
pub mod grpc;
pub mod models;
pub mod services;
pub mod startup;
