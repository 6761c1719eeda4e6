use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(pub i64);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unsubmitted, owner-private draft. Routing choices are remembered but no
/// lines exist until promotion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempDocument {
    pub temp_id: TempId,
    pub owner_id: String,
    pub owner_name: String,
    pub sformno: Option<String>,
    pub form_name: Option<String>,
    pub title: String,
    pub content: String,
    pub emergency: bool,
    pub due_date: Option<NaiveDate>,
    pub approver_ids: Vec<String>,
    pub ref_ids: Vec<String>,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editor payload for a temp save. Every field is optional: absent fields
/// keep the stored value (or the empty default on first save).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DraftPayload {
    pub temp_id: Option<TempId>,
    pub sformno: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub emergency: Option<bool>,
    pub due: Option<NaiveDate>,
    pub assignee_id: Option<String>,
    pub approver_ids: Option<Vec<String>>,
    pub ref_ids: Option<Vec<String>>,
    pub attachments: Option<Vec<String>>,
}

impl DraftPayload {
    /// Approver chain carried by the payload, if the editor sent one.
    pub fn chain(&self) -> Option<Vec<String>> {
        match (&self.approver_ids, &self.assignee_id) {
            (Some(ids), _) if !ids.is_empty() => Some(ids.clone()),
            (_, Some(assignee)) => Some(vec![assignee.clone()]),
            (Some(ids), None) => Some(ids.clone()),
            (None, None) => None,
        }
    }
}

/// Temp record prepared by the draft manager, not yet assigned a
/// [`TempId`] when `temp_id` is `None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempDraft {
    pub temp_id: Option<TempId>,
    pub owner_id: String,
    pub owner_name: String,
    pub sformno: Option<String>,
    pub form_name: Option<String>,
    pub title: String,
    pub content: String,
    pub emergency: bool,
    pub due_date: Option<NaiveDate>,
    pub approver_ids: Vec<String>,
    pub ref_ids: Vec<String>,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TempDraft {
    pub fn into_temp(self, temp_id: TempId) -> TempDocument {
        TempDocument {
            temp_id,
            owner_id: self.owner_id,
            owner_name: self.owner_name,
            sformno: self.sformno,
            form_name: self.form_name,
            title: self.title,
            content: self.content,
            emergency: self.emergency,
            due_date: self.due_date,
            approver_ids: self.approver_ids,
            ref_ids: self.ref_ids,
            attachments: self.attachments,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
