//! Temp-document merging and submission planning.
//!
//! Nothing here touches the store: the planner turns an editor payload
//! (optionally layered over an existing temp record) into either the next
//! temp state or a validated [`NewDocument`] ready for atomic promotion.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::directory::{Directory, FormCatalog};
use crate::domain::document::{NewDocument, PlannedLine, PlannedRecipient};
use crate::domain::draft::{DraftPayload, TempDocument, TempDraft};
use crate::errors::ApprovalError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DraftLimits {
    pub max_chain_length: usize,
}

impl Default for DraftLimits {
    fn default() -> Self {
        Self { max_chain_length: 10 }
    }
}

pub struct DraftPlanner<'a> {
    directory: &'a dyn Directory,
    catalog: &'a dyn FormCatalog,
    limits: DraftLimits,
}

impl<'a> DraftPlanner<'a> {
    pub fn new(
        directory: &'a dyn Directory,
        catalog: &'a dyn FormCatalog,
        limits: DraftLimits,
    ) -> Self {
        Self { directory, catalog, limits }
    }

    /// Next temp state for `owner_id`. Fields missing from the payload keep
    /// their stored value; nothing is required.
    pub fn prepare_temp(
        &self,
        owner_id: &str,
        existing: Option<&TempDocument>,
        payload: &DraftPayload,
        now: DateTime<Utc>,
    ) -> TempDraft {
        let sformno = merged_sformno(payload, existing);
        let form_name = self.form_name(sformno.as_deref(), existing);

        TempDraft {
            temp_id: existing.map(|temp| temp.temp_id),
            owner_id: owner_id.to_string(),
            owner_name: self.directory.display_name(owner_id),
            sformno,
            form_name,
            title: payload
                .title
                .clone()
                .or_else(|| existing.map(|temp| temp.title.clone()))
                .unwrap_or_default(),
            content: payload
                .content
                .clone()
                .or_else(|| existing.map(|temp| temp.content.clone()))
                .unwrap_or_default(),
            emergency: payload
                .emergency
                .or_else(|| existing.map(|temp| temp.emergency))
                .unwrap_or(false),
            due_date: payload.due.or_else(|| existing.and_then(|temp| temp.due_date)),
            approver_ids: payload
                .chain()
                .or_else(|| existing.map(|temp| temp.approver_ids.clone()))
                .unwrap_or_default(),
            ref_ids: payload
                .ref_ids
                .clone()
                .or_else(|| existing.map(|temp| temp.ref_ids.clone()))
                .unwrap_or_default(),
            attachments: payload
                .attachments
                .clone()
                .or_else(|| existing.map(|temp| temp.attachments.clone()))
                .unwrap_or_default(),
            created_at: existing.map(|temp| temp.created_at).unwrap_or(now),
            updated_at: now,
        }
    }

    /// Validates a submission and materializes its routing chain.
    ///
    /// `base` is the temp record being promoted, if any; payload fields
    /// override it in memory only, so a failed plan leaves the temp record
    /// untouched.
    pub fn plan_submission(
        &self,
        drafter_id: &str,
        base: Option<&TempDocument>,
        payload: &DraftPayload,
        now: DateTime<Utc>,
    ) -> Result<NewDocument, ApprovalError> {
        let title = payload
            .title
            .as_deref()
            .or_else(|| base.map(|temp| temp.title.as_str()))
            .unwrap_or_default()
            .trim()
            .to_string();
        if title.is_empty() {
            return Err(ApprovalError::validation("title is required"));
        }

        let chain = self.resolve_chain(payload, base)?;
        let refs = dedupe_ids(
            payload
                .ref_ids
                .as_deref()
                .or_else(|| base.map(|temp| temp.ref_ids.as_slice()))
                .unwrap_or_default(),
        );

        let sformno = merged_sformno(payload, base);
        let form_name = self.form_name(sformno.as_deref(), base);

        Ok(NewDocument {
            sformno,
            form_name,
            title,
            content: payload
                .content
                .clone()
                .or_else(|| base.map(|temp| temp.content.clone()))
                .unwrap_or_default(),
            emergency: payload.emergency.or_else(|| base.map(|temp| temp.emergency)).unwrap_or(false),
            drafter_id: drafter_id.to_string(),
            drafter_name: self.directory.display_name(drafter_id),
            due_date: payload.due.or_else(|| base.and_then(|temp| temp.due_date)),
            attachments: payload
                .attachments
                .clone()
                .or_else(|| base.map(|temp| temp.attachments.clone()))
                .unwrap_or_default(),
            draft_at: now,
            lines: chain
                .into_iter()
                .zip(1u32..)
                .map(|(approver_id, order_seq)| PlannedLine {
                    order_seq,
                    approver_name: self.directory.display_name(&approver_id),
                    approver_id,
                })
                .collect(),
            refs: refs
                .into_iter()
                .map(|approver_id| PlannedRecipient {
                    approver_name: self.directory.display_name(&approver_id),
                    approver_id,
                })
                .collect(),
        })
    }

    fn resolve_chain(
        &self,
        payload: &DraftPayload,
        base: Option<&TempDocument>,
    ) -> Result<Vec<String>, ApprovalError> {
        let explicit = payload.approver_ids.as_deref().filter(|ids| !ids.is_empty());
        let assignee = payload.assignee_id.as_deref().map(str::trim).filter(|id| !id.is_empty());

        let raw: Vec<String> = match (explicit, assignee) {
            (Some(ids), Some(assignee)) => {
                if ids.first().map(|id| id.trim()) != Some(assignee) {
                    return Err(ApprovalError::validation(
                        "assigneeId must be the first entry of approverIds",
                    ));
                }
                ids.to_vec()
            }
            (Some(ids), None) => ids.to_vec(),
            (None, Some(assignee)) => vec![assignee.to_string()],
            (None, None) => base.map(|temp| temp.approver_ids.clone()).unwrap_or_default(),
        };

        if raw.is_empty() {
            return Err(ApprovalError::validation("approver is required"));
        }

        let mut seen = HashSet::new();
        let mut chain = Vec::with_capacity(raw.len());
        for id in raw {
            let id = id.trim().to_string();
            if id.is_empty() {
                return Err(ApprovalError::validation("approver ids must not be blank"));
            }
            if !seen.insert(id.clone()) {
                return Err(ApprovalError::validation(format!(
                    "approver `{id}` appears more than once in the chain"
                )));
            }
            chain.push(id);
        }

        if chain.len() > self.limits.max_chain_length {
            return Err(ApprovalError::validation(format!(
                "approval chain has {} steps, limit is {}",
                chain.len(),
                self.limits.max_chain_length
            )));
        }

        Ok(chain)
    }

    fn form_name(&self, sformno: Option<&str>, base: Option<&TempDocument>) -> Option<String> {
        sformno
            .and_then(|sformno| self.catalog.form_name(sformno))
            .or_else(|| base.and_then(|temp| temp.form_name.clone()))
    }
}

fn merged_sformno(payload: &DraftPayload, base: Option<&TempDocument>) -> Option<String> {
    payload
        .sformno
        .as_deref()
        .map(str::trim)
        .map(ToString::to_string)
        .or_else(|| base.and_then(|temp| temp.sformno.clone()))
        .filter(|sformno| !sformno.is_empty())
}

/// Trims, drops blanks and keeps the first occurrence of each id.
pub fn dedupe_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(ToString::to_string)
        .collect()
}
