//! Observability module for correlation and tracing

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation ID tying every log line of one mint run together
///
/// A resumed run reuses the run id, so its lines correlate with the
/// original attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Trace/span identifiers for one pipeline run and its steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceContext {
    /// Unique trace identifier for the entire run
    pub trace_id: String,

    /// Unique span identifier for this step
    pub span_id: String,

    pub correlation_id: CorrelationId,

    pub parent_span_id: Option<String>,

    /// Operation name, e.g. `mint` or `tx1`
    pub operation: String,

    /// Creation timestamp (Unix epoch seconds)
    pub timestamp: u64,
}

impl TraceContext {
    /// Create a new trace context for an operation
    pub fn new(operation: &str) -> Self {
        Self::with_correlation(operation, CorrelationId::new())
    }

    /// Root context correlated with an existing id (the run id)
    pub fn with_correlation(operation: &str, correlation_id: CorrelationId) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id,
            parent_span_id: None,
            operation: operation.to_string(),
            timestamp: unix_now(),
        }
    }

    /// Create a child span context
    pub fn child_span(&self, operation: &str) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            correlation_id: self.correlation_id.clone(),
            parent_span_id: Some(self.span_id.clone()),
            operation: operation.to_string(),
            timestamp: unix_now(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// `tracing` span carrying the identifiers as fields
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "mint_run",
            trace_id = %self.trace_id,
            span_id = %self.span_id,
            correlation_id = %self.correlation_id,
            operation = %self.operation,
        )
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new("default")
    }
}
