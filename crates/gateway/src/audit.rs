//! Audit trail of proxied calls.
//!
//! One event per proxied request, emitted on the `dashproxy::audit` target. Credentials,
//! authorization headers and bodies are never part of an event.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ProxyAuditEvent {
    pub scope: &'static str,
    pub project: Option<String>,
    pub dashboard: Option<String>,
    pub datasource: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub elapsed: Duration,
}

pub fn duration_ms(elapsed: Duration) -> Option<i64> {
    i64::try_from(elapsed.as_millis()).ok()
}

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: ProxyAuditEvent);
}

/// Writes audit events to the log.
#[derive(Default)]
pub struct TracingAuditSink;

#[async_trait::async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: ProxyAuditEvent) {
        tracing::info!(
            target: "dashproxy::audit",
            scope = event.scope,
            project = event.project.as_deref().unwrap_or(""),
            dashboard = event.dashboard.as_deref().unwrap_or(""),
            datasource = %event.datasource,
            method = %event.method,
            path = %event.path,
            status = event.status,
            duration_ms = duration_ms(event.elapsed).unwrap_or(i64::MAX),
            "datasource proxy call"
        );
    }
}
