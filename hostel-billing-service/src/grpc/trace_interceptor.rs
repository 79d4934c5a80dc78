//! W3C trace-context propagation for incoming gRPC calls.

use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tonic::metadata::{KeyRef, MetadataMap};
use tonic::{Request, Status};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

const TRACEPARENT_HEADER: &str = "traceparent";

struct MetadataExtractor<'a>(&'a MetadataMap);

impl Extractor for MetadataExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0
            .keys()
            .filter_map(|k| match k {
                KeyRef::Ascii(key) => Some(key.as_str()),
                KeyRef::Binary(_) => None,
            })
            .collect()
    }
}

/// Remote parent context carried by `traceparent`/`tracestate`, if any.
pub fn parent_context(metadata: &MetadataMap) -> Context {
    TraceContextPropagator::new().extract(&MetadataExtractor(metadata))
}

/// Interceptor that parents the current span on the caller's trace.
#[allow(clippy::result_large_err)]
pub fn trace_context_interceptor(request: Request<()>) -> Result<Request<()>, Status> {
    Span::current().set_parent(parent_context(request.metadata()));

    if let Some(traceparent) = request
        .metadata()
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        tracing::debug!(traceparent = %traceparent, "gRPC request with trace context");
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::TraceContextExt;

    #[test]
    fn traceparent_becomes_remote_parent() {
        let mut metadata = MetadataMap::new();
        metadata.insert(
            "traceparent",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
                .parse()
                .unwrap(),
        );

        let context = parent_context(&metadata);
        let span = context.span();
        let span_context = span.span_context();
        assert!(span_context.is_valid());
        assert!(span_context.is_remote());
        assert_eq!(
            span_context.trace_id().to_string(),
            "0af7651916cd43dd8448eb211c80319c"
        );
    }

    #[test]
    fn missing_header_gives_empty_context() {
        let context = parent_context(&MetadataMap::new());
        assert!(!context.span().span_context().is_valid());
    }

    #[test]
    fn interceptor_passes_request_through() {
        let request = Request::new(());
        assert!(trace_context_interceptor(request).is_ok());
    }
}
