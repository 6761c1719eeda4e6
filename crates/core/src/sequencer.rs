//! Routing line sequencing.
//!
//! Everything here is a pure function of a document's line set. Callers
//! re-derive the current line and document status after every mutation
//! instead of caching a position, because administrative amendments can
//! change the chain underneath them.

use std::collections::BTreeSet;

use crate::domain::document::{ApprovalDocument, ApprovalLine, DocStatus, RouteStatus};

/// Returns the line that may be acted on next, if any.
///
/// Lines are scanned in `order_seq` order. The first line that is not yet
/// approved is current only while it is still pending; a held or rejected
/// line blocks everything after it.
pub fn current_line(doc: &ApprovalDocument) -> Option<&ApprovalLine> {
    current_in(&doc.lines)
}

pub fn current_in(lines: &[ApprovalLine]) -> Option<&ApprovalLine> {
    let mut ordered: Vec<&ApprovalLine> = lines.iter().collect();
    ordered.sort_by_key(|line| line.order_seq);

    ordered
        .into_iter()
        .find(|line| line.route_status != RouteStatus::Approved)
        .filter(|line| line.route_status == RouteStatus::Pending)
}

/// Computes the document status implied by its lines.
pub fn derive_doc_status(doc: &ApprovalDocument) -> DocStatus {
    derive_from_lines(&doc.lines)
}

pub fn derive_from_lines(lines: &[ApprovalLine]) -> DocStatus {
    if lines.is_empty() {
        return DocStatus::InProgress;
    }

    if lines.iter().any(|line| line.route_status == RouteStatus::Rejected) {
        return DocStatus::Rejected;
    }

    if lines.iter().all(|line| line.route_status == RouteStatus::Approved) {
        return DocStatus::Complete;
    }

    let mut ordered: Vec<&ApprovalLine> = lines.iter().collect();
    ordered.sort_by_key(|line| line.order_seq);
    let first_unresolved = ordered.iter().find(|line| line.route_status != RouteStatus::Approved);
    if matches!(first_unresolved, Some(line) if line.route_status == RouteStatus::Hold) {
        return DocStatus::Hold;
    }

    DocStatus::InProgress
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    StatusDrift { stored: DocStatus, derived: DocStatus },
    DuplicateOrderSeq(u32),
    NonContiguousOrderSeq { expected: u32, found: u32 },
    CompleteAtOnOpenDocument,
    MissingCompleteAt,
    EmptyChain,
}

/// Reports every way a stored document disagrees with the routing rules.
pub fn check_invariants(doc: &ApprovalDocument) -> Vec<InvariantViolation> {
    let mut violations = Vec::new();

    if doc.lines.is_empty() {
        violations.push(InvariantViolation::EmptyChain);
    }

    let derived = derive_doc_status(doc);
    if derived != doc.doc_status {
        violations.push(InvariantViolation::StatusDrift { stored: doc.doc_status, derived });
    }

    let mut seen = BTreeSet::new();
    for line in &doc.lines {
        if !seen.insert(line.order_seq) {
            violations.push(InvariantViolation::DuplicateOrderSeq(line.order_seq));
        }
    }
    for (expected, found) in (1u32..).zip(seen.iter().copied()) {
        if expected != found {
            violations.push(InvariantViolation::NonContiguousOrderSeq { expected, found });
            break;
        }
    }

    match (doc.doc_status.is_terminal(), doc.complete_at.is_some()) {
        (false, true) => violations.push(InvariantViolation::CompleteAtOnOpenDocument),
        (true, false) => violations.push(InvariantViolation::MissingCompleteAt),
        _ => {}
    }

    violations
}
