//! Approve / reject / hold transitions and their administrative
//! counterparts.
//!
//! The processor validates a decision against a loaded document and
//! returns the mutated copy; committing it (with a revision check) is the
//! caller's job.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::document::{ApprovalDocument, DocStatus, RouteStatus};
use crate::errors::ApprovalError;
use crate::sequencer::{current_line, derive_doc_status};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineAction {
    Approve,
    Reject,
    Hold,
}

impl LineAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Hold => "hold",
        }
    }

    fn route_status(self) -> RouteStatus {
        match self {
            Self::Approve => RouteStatus::Approved,
            Self::Reject => RouteStatus::Rejected,
            Self::Hold => RouteStatus::Hold,
        }
    }
}

impl FromStr for LineAction {
    type Err = ApprovalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "hold" => Ok(Self::Hold),
            other => Err(ApprovalError::validation(format!(
                "unsupported action `{other}` (expected approve|reject|hold)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionOutcome {
    pub document: ApprovalDocument,
    pub order_seq: u32,
    pub previous_status: DocStatus,
}

impl ActionOutcome {
    pub fn became_terminal(&self) -> bool {
        !self.previous_status.is_terminal() && self.document.doc_status.is_terminal()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActionProcessor;

impl ActionProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Applies `action` by `actor_id` to the document's current line.
    ///
    /// Validation order: the document must be open (in progress or held),
    /// a current line must exist and belong to the actor, and that line
    /// must still be pending.
    pub fn act(
        &self,
        mut doc: ApprovalDocument,
        actor_id: &str,
        action: LineAction,
        comment: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, ApprovalError> {
        let previous_status = doc.doc_status;
        ensure_open(&doc)?;

        let Some(current) = current_line(&doc) else {
            return Err(ApprovalError::invalid_state(format!(
                "document {} has no actionable line while {}",
                doc.sign_no,
                doc.doc_status.as_str()
            )));
        };

        if current.approver_id != actor_id {
            return Err(self.wrong_actor(&doc, actor_id));
        }
        if current.route_status != RouteStatus::Pending {
            return Err(ApprovalError::invalid_state(format!(
                "line {} of document {} is already {}",
                current.order_seq,
                doc.sign_no,
                current.route_status.as_str()
            )));
        }

        let order_seq = current.order_seq;
        let comment = normalize_comment(comment);
        if let Some(line) = doc.lines.iter_mut().find(|line| line.order_seq == order_seq) {
            line.route_status = action.route_status();
            line.action_at = Some(now);
            line.comment = comment;
        }

        settle(&mut doc, now);
        Ok(ActionOutcome { document: doc, order_seq, previous_status })
    }

    /// Administrative resume of a held document: the held line returns to
    /// pending and the chain continues from it.
    pub fn resume(
        &self,
        mut doc: ApprovalDocument,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, ApprovalError> {
        let previous_status = doc.doc_status;
        if doc.doc_status != DocStatus::Hold {
            return Err(ApprovalError::invalid_state(format!(
                "document {} is {}, only held documents can be resumed",
                doc.sign_no,
                doc.doc_status.as_str()
            )));
        }

        let mut held: Vec<&mut _> =
            doc.lines.iter_mut().filter(|line| line.route_status == RouteStatus::Hold).collect();
        held.sort_by_key(|line| line.order_seq);
        let Some(line) = held.into_iter().next() else {
            return Err(ApprovalError::invalid_state(format!(
                "document {} is marked held but has no held line",
                doc.sign_no
            )));
        };
        line.route_status = RouteStatus::Pending;
        line.action_at = None;
        let order_seq = line.order_seq;

        settle(&mut doc, now);
        Ok(ActionOutcome { document: doc, order_seq, previous_status })
    }

    /// Replaces the approver of a still-pending line.
    pub fn reassign(
        &self,
        mut doc: ApprovalDocument,
        order_seq: u32,
        approver_id: &str,
        approver_name: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, ApprovalError> {
        let previous_status = doc.doc_status;
        ensure_open(&doc)?;

        let approver_id = approver_id.trim();
        if approver_id.is_empty() {
            return Err(ApprovalError::validation("approver is required"));
        }
        if doc.lines.iter().any(|line| line.order_seq != order_seq && line.approver_id == approver_id)
        {
            return Err(ApprovalError::validation(format!(
                "approver `{approver_id}` already owns a line on document {}",
                doc.sign_no
            )));
        }

        let sign_no = doc.sign_no;
        let Some(line) = doc.lines.iter_mut().find(|line| line.order_seq == order_seq) else {
            return Err(ApprovalError::NotFound(format!("line {order_seq} of document {sign_no}")));
        };
        if line.route_status != RouteStatus::Pending {
            return Err(ApprovalError::invalid_state(format!(
                "line {order_seq} of document {sign_no} is already {}",
                line.route_status.as_str()
            )));
        }
        line.approver_id = approver_id.to_string();
        line.approver_name = approver_name.to_string();

        settle(&mut doc, now);
        Ok(ActionOutcome { document: doc, order_seq, previous_status })
    }

    fn wrong_actor(&self, doc: &ApprovalDocument, actor_id: &str) -> ApprovalError {
        let mut owned = doc.lines.iter().filter(|line| line.approver_id == actor_id).peekable();
        let has_lines = owned.peek().is_some();
        let all_resolved = owned.all(|line| line.route_status != RouteStatus::Pending);

        if has_lines && all_resolved {
            ApprovalError::invalid_state(format!(
                "actor `{actor_id}` has already decided on document {}",
                doc.sign_no
            ))
        } else {
            ApprovalError::NotAuthorizedStep { sign_no: doc.sign_no, actor_id: actor_id.to_string() }
        }
    }
}

fn ensure_open(doc: &ApprovalDocument) -> Result<(), ApprovalError> {
    match doc.doc_status {
        DocStatus::InProgress | DocStatus::Hold => Ok(()),
        other => Err(ApprovalError::invalid_state(format!(
            "document {} is {}",
            doc.sign_no,
            other.as_str()
        ))),
    }
}

/// Recomputes `doc_status` and stamps `complete_at` on the first terminal
/// resolution.
fn settle(doc: &mut ApprovalDocument, now: DateTime<Utc>) {
    doc.doc_status = derive_doc_status(doc);
    if doc.doc_status.is_terminal() {
        doc.complete_at.get_or_insert(now);
    } else {
        doc.complete_at = None;
    }
}

fn normalize_comment(comment: Option<&str>) -> Option<String> {
    comment.map(str::trim).filter(|value| !value.is_empty()).map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{ActionProcessor, LineAction};
    use crate::domain::document::{DocStatus, RouteStatus};
    use crate::errors::{ApprovalError, ErrorKind};
    use crate::sequencer::test_support::document;
    use crate::sequencer::{check_invariants, current_line};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 10, 30, 0).single().expect("valid time")
    }

    #[test]
    fn three_step_chain_scenario() {
        let processor = ActionProcessor::new();
        let doc = document(&["A", "B", "C"]);

        let after_a = processor
            .act(doc, "A", LineAction::Approve, Some("ok"), now())
            .expect("A is current approver");
        let doc = after_a.document;
        assert_eq!(doc.doc_status, DocStatus::InProgress);
        assert_eq!(current_line(&doc).map(|line| line.approver_id.as_str()), Some("B"));

        let early = processor.act(doc.clone(), "C", LineAction::Approve, None, now());
        assert!(matches!(early, Err(ApprovalError::NotAuthorizedStep { ref actor_id, .. }) if actor_id == "C"));

        let rejected = processor
            .act(doc, "B", LineAction::Reject, Some("budget"), now() + Duration::minutes(5))
            .expect("B is current approver");
        assert!(rejected.became_terminal());
        let doc = rejected.document;
        assert_eq!(doc.doc_status, DocStatus::Rejected);
        assert_eq!(doc.complete_at, Some(now() + Duration::minutes(5)));
        assert_eq!(doc.line(3).map(|line| line.route_status), Some(RouteStatus::Pending));
        assert!(current_line(&doc).is_none());
        assert!(check_invariants(&doc).is_empty());

        let late = processor.act(doc, "C", LineAction::Approve, None, now());
        assert_eq!(late.map(|_| ()).map_err(|error| error.kind()), Err(ErrorKind::InvalidState));
    }

    #[test]
    fn single_line_approval_completes_document() {
        let outcome = ActionProcessor::new()
            .act(document(&["A"]), "A", LineAction::Approve, None, now())
            .expect("approve");

        assert_eq!(outcome.document.doc_status, DocStatus::Complete);
        assert_eq!(outcome.document.complete_at, Some(now()));
        assert!(current_line(&outcome.document).is_none());
    }

    #[test]
    fn replayed_decision_fails_with_invalid_state_and_changes_nothing() {
        let processor = ActionProcessor::new();
        let first = processor
            .act(document(&["A", "B"]), "A", LineAction::Approve, Some("ok"), now())
            .expect("first decision");

        let replay = processor.act(first.document.clone(), "A", LineAction::Approve, Some("ok"), now());
        assert_eq!(replay.map(|_| ()).map_err(|error| error.kind()), Err(ErrorKind::InvalidState));
    }

    #[test]
    fn outsider_is_not_authorized() {
        let result = ActionProcessor::new().act(document(&["A"]), "Z", LineAction::Approve, None, now());
        assert_eq!(
            result.map(|_| ()).map_err(|error| error.kind()),
            Err(ErrorKind::NotAuthorizedStep)
        );
    }

    #[test]
    fn hold_blocks_until_resumed() {
        let processor = ActionProcessor::new();
        let held = processor
            .act(document(&["A", "B"]), "A", LineAction::Hold, Some("need receipts"), now())
            .expect("hold");
        let doc = held.document;
        assert_eq!(doc.doc_status, DocStatus::Hold);
        assert!(doc.complete_at.is_none());
        assert_eq!(doc.line(1).map(|line| line.route_status), Some(RouteStatus::Hold));

        let blocked = processor.act(doc.clone(), "B", LineAction::Approve, None, now());
        assert_eq!(blocked.map(|_| ()).map_err(|error| error.kind()), Err(ErrorKind::InvalidState));

        let resumed = processor.resume(doc, now()).expect("resume");
        let doc = resumed.document;
        assert_eq!(resumed.order_seq, 1);
        assert_eq!(doc.doc_status, DocStatus::InProgress);
        assert_eq!(doc.line(1).and_then(|line| line.comment.as_deref()), Some("need receipts"));
        assert_eq!(current_line(&doc).map(|line| line.approver_id.as_str()), Some("A"));
    }

    #[test]
    fn resume_requires_held_document() {
        let result = ActionProcessor::new().resume(document(&["A"]), now());
        assert_eq!(result.map(|_| ()).map_err(|error| error.kind()), Err(ErrorKind::InvalidState));
    }

    #[test]
    fn reassign_moves_pending_line_to_new_approver() {
        let processor = ActionProcessor::new();
        let outcome =
            processor.reassign(document(&["A", "B"]), 2, "D", "Deputy", now()).expect("reassign");

        assert_eq!(outcome.document.line(2).map(|line| line.approver_id.as_str()), Some("D"));
        assert_eq!(outcome.document.doc_status, DocStatus::InProgress);
    }

    #[test]
    fn reassign_rejects_resolved_lines_and_duplicates() {
        let processor = ActionProcessor::new();
        let approved = processor
            .act(document(&["A", "B"]), "A", LineAction::Approve, None, now())
            .expect("approve")
            .document;

        let resolved = processor.reassign(approved.clone(), 1, "D", "Deputy", now());
        assert_eq!(resolved.map(|_| ()).map_err(|error| error.kind()), Err(ErrorKind::InvalidState));

        let duplicate = processor.reassign(approved.clone(), 2, "A", "A", now());
        assert_eq!(duplicate.map(|_| ()).map_err(|error| error.kind()), Err(ErrorKind::Validation));

        let missing = processor.reassign(approved, 9, "D", "Deputy", now());
        assert_eq!(missing.map(|_| ()).map_err(|error| error.kind()), Err(ErrorKind::NotFound));
    }

    #[test]
    fn blank_comments_are_dropped() {
        let outcome = ActionProcessor::new()
            .act(document(&["A"]), "A", LineAction::Reject, Some("   "), now())
            .expect("reject");
        assert_eq!(outcome.document.line(1).and_then(|line| line.comment.clone()), None);
    }

    #[test]
    fn action_names_parse_case_insensitively() {
        assert_eq!("Approve".parse::<LineAction>().expect("parse"), LineAction::Approve);
        assert!("escalate".parse::<LineAction>().is_err());
    }
}
