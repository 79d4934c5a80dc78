//! gRPC module for hostel-billing-service.

mod service;
mod trace_interceptor;

pub use service::{BillingComponents, HostelBillingServiceImpl};
pub use trace_interceptor::{parent_context, trace_context_interceptor};

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("hostel.billing.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("hostel_billing_descriptor");
}
