// src/audit.rs

use serde::Serialize;

/// Material actions recorded for auditing. The service only ever appends;
/// reading the log back is someone else's job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ExamUploaded {
        tenant_id: i64,
        subject_id: i64,
        exam_id: i64,
        uploaded_by: i64,
    },
    AssignmentsMaterialized {
        tenant_id: i64,
        subject_id: i64,
        created: u64,
        skipped: u64,
    },
    ManualAssignment {
        tenant_id: i64,
        assigned_by: i64,
        students: usize,
        created: u64,
    },
    AttemptStarted {
        tenant_id: i64,
        assignment_id: i64,
        attempt_id: i64,
        student_id: i64,
    },
    AttemptSubmitted {
        tenant_id: i64,
        attempt_id: i64,
        student_id: i64,
        score_percent: i64,
        status: String,
    },
}

/// Append-only audit event sink. Fire-and-forget: recording must never block
/// or fail the calling operation.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Audit sink that writes structured events to the tracing pipeline under
/// the `audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "audit", "{}", json),
            Err(e) => tracing::warn!(target: "audit", "unserializable audit event: {}", e),
        }
    }
}
