use signflow_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Writes audit events to the `signflow::audit` tracing target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let sign_no = event.sign_no.map(|sign_no| sign_no.to_string()).unwrap_or_default();
        let temp_id = event.temp_id.map(|temp_id| temp_id.to_string()).unwrap_or_default();
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                target: "signflow::audit",
                event_name = %event.event_type,
                event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                actor_id = %event.actor,
                sign_no = %sign_no,
                temp_id = %temp_id,
                category = ?event.category,
                metadata = %metadata,
                occurred_at = %event.occurred_at.to_rfc3339(),
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                target: "signflow::audit",
                event_name = %event.event_type,
                event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                actor_id = %event.actor,
                sign_no = %sign_no,
                temp_id = %temp_id,
                category = ?event.category,
                outcome = ?event.outcome,
                metadata = %metadata,
                occurred_at = %event.occurred_at.to_rfc3339(),
                "audit event"
            ),
        }
    }
}
