use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignNo(pub i64);

impl fmt::Display for SignNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("unknown {kind} code {code}")]
pub struct UnknownStatusCode {
    pub kind: &'static str,
    pub code: u8,
}

/// Lifecycle status of an approval document.
///
/// Serialized as the integer code the presentation layer understands
/// (`0..=4`); unknown codes fail to decode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DocStatus {
    Draft,
    InProgress,
    Complete,
    Rejected,
    Hold,
}

impl DocStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Draft => 0,
            Self::InProgress => 1,
            Self::Complete => 2,
            Self::Rejected => 3,
            Self::Hold => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Draft),
            1 => Some(Self::InProgress),
            2 => Some(Self::Complete),
            3 => Some(Self::Rejected),
            4 => Some(Self::Hold),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Rejected => "rejected",
            Self::Hold => "hold",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Rejected)
    }
}

impl From<DocStatus> for u8 {
    fn from(value: DocStatus) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for DocStatus {
    type Error = UnknownStatusCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(UnknownStatusCode { kind: "document status", code })
    }
}

/// Per-line routing decision. Serialized as `0..=3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RouteStatus {
    Pending,
    Approved,
    Rejected,
    Hold,
}

impl RouteStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Approved => 1,
            Self::Rejected => 2,
            Self::Hold => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            1 => Some(Self::Approved),
            2 => Some(Self::Rejected),
            3 => Some(Self::Hold),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Hold => "hold",
        }
    }
}

impl From<RouteStatus> for u8 {
    fn from(value: RouteStatus) -> Self {
        value.code()
    }
}

impl TryFrom<u8> for RouteStatus {
    type Error = UnknownStatusCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(UnknownStatusCode { kind: "route status", code })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalLine {
    pub sign_no: SignNo,
    pub order_seq: u32,
    pub approver_id: String,
    pub approver_name: String,
    pub route_status: RouteStatus,
    pub action_at: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRecipient {
    pub sign_no: SignNo,
    pub approver_id: String,
    pub approver_name: String,
}

/// A submitted document together with its routing chain and cc list.
///
/// Content fields are frozen at submission; only line state, `doc_status`,
/// `complete_at` and `revision` change afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDocument {
    pub sign_no: SignNo,
    pub sformno: Option<String>,
    pub form_name: Option<String>,
    pub title: String,
    pub content: String,
    pub emergency: bool,
    pub drafter_id: String,
    pub drafter_name: String,
    pub doc_status: DocStatus,
    pub due_date: Option<NaiveDate>,
    pub attachments: Vec<String>,
    pub draft_at: DateTime<Utc>,
    pub complete_at: Option<DateTime<Utc>>,
    pub revision: i64,
    pub lines: Vec<ApprovalLine>,
    pub refs: Vec<ReferenceRecipient>,
}

impl ApprovalDocument {
    pub fn line(&self, order_seq: u32) -> Option<&ApprovalLine> {
        self.lines.iter().find(|line| line.order_seq == order_seq)
    }

    pub fn is_reference_recipient(&self, actor_id: &str) -> bool {
        self.refs.iter().any(|recipient| recipient.approver_id == actor_id)
    }
}

/// Routing step planned at submission time, before the store assigns a
/// sign number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedLine {
    pub order_seq: u32,
    pub approver_id: String,
    pub approver_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedRecipient {
    pub approver_id: String,
    pub approver_name: String,
}

/// Fully validated submission waiting for the store to allocate a
/// [`SignNo`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub sformno: Option<String>,
    pub form_name: Option<String>,
    pub title: String,
    pub content: String,
    pub emergency: bool,
    pub drafter_id: String,
    pub drafter_name: String,
    pub due_date: Option<NaiveDate>,
    pub attachments: Vec<String>,
    pub draft_at: DateTime<Utc>,
    pub lines: Vec<PlannedLine>,
    pub refs: Vec<PlannedRecipient>,
}

impl NewDocument {
    pub fn into_document(self, sign_no: SignNo) -> ApprovalDocument {
        ApprovalDocument {
            sign_no,
            sformno: self.sformno,
            form_name: self.form_name,
            title: self.title,
            content: self.content,
            emergency: self.emergency,
            drafter_id: self.drafter_id,
            drafter_name: self.drafter_name,
            doc_status: DocStatus::InProgress,
            due_date: self.due_date,
            attachments: self.attachments,
            draft_at: self.draft_at,
            complete_at: None,
            revision: 1,
            lines: self
                .lines
                .into_iter()
                .map(|line| ApprovalLine {
                    sign_no,
                    order_seq: line.order_seq,
                    approver_id: line.approver_id,
                    approver_name: line.approver_name,
                    route_status: RouteStatus::Pending,
                    action_at: None,
                    comment: None,
                })
                .collect(),
            refs: self
                .refs
                .into_iter()
                .map(|recipient| ReferenceRecipient {
                    sign_no,
                    approver_id: recipient.approver_id,
                    approver_name: recipient.approver_name,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DocStatus, RouteStatus};

    #[test]
    fn status_codes_serialize_as_integers() {
        assert_eq!(serde_json::to_string(&DocStatus::Hold).expect("serialize"), "4");
        assert_eq!(serde_json::to_string(&RouteStatus::Rejected).expect("serialize"), "2");
    }

    #[test]
    fn unknown_status_codes_fail_closed() {
        assert!(serde_json::from_str::<DocStatus>("5").is_err());
        assert!(serde_json::from_str::<RouteStatus>("4").is_err());
        assert_eq!(serde_json::from_str::<DocStatus>("1").expect("decode"), DocStatus::InProgress);
    }

    #[test]
    fn only_complete_and_rejected_are_terminal() {
        let terminal: Vec<DocStatus> = [
            DocStatus::Draft,
            DocStatus::InProgress,
            DocStatus::Complete,
            DocStatus::Rejected,
            DocStatus::Hold,
        ]
        .into_iter()
        .filter(|status| status.is_terminal())
        .collect();

        assert_eq!(terminal, vec![DocStatus::Complete, DocStatus::Rejected]);
    }
}
