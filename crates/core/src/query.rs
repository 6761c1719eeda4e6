//! Read-side value types: list boxes, keyword/period filters, paging.

use std::str::FromStr;

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::document::{
    ApprovalDocument, ApprovalLine, DocStatus, ReferenceRecipient, SignNo,
};
use crate::domain::draft::{TempDocument, TempId};
use crate::errors::ApprovalError;
use crate::sequencer::current_line;

pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxKind {
    /// Owned temp documents.
    Temp,
    /// Submitted documents the actor authored.
    Drafted,
    /// Documents the actor is a reference recipient of.
    Viewer,
    Complete,
    /// Documents whose current line belongs to the actor.
    Approve,
}

impl BoxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temp => "temp",
            Self::Drafted => "drafted",
            Self::Viewer => "viewer",
            Self::Complete => "complete",
            Self::Approve => "approve",
        }
    }

    /// Membership test for submitted documents. Temp documents live in a
    /// separate store and never match.
    pub fn includes(self, doc: &ApprovalDocument, actor_id: &str) -> bool {
        match self {
            Self::Temp => false,
            Self::Drafted => doc.drafter_id == actor_id,
            Self::Viewer => doc.is_reference_recipient(actor_id),
            Self::Complete => doc.doc_status == DocStatus::Complete,
            Self::Approve => current_line(doc).is_some_and(|line| line.approver_id == actor_id),
        }
    }
}

impl FromStr for BoxKind {
    type Err = ApprovalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "temp" | "draft" => Ok(Self::Temp),
            "drafted" => Ok(Self::Drafted),
            "viewer" => Ok(Self::Viewer),
            "complete" => Ok(Self::Complete),
            "approve" => Ok(Self::Approve),
            other => Err(ApprovalError::validation(format!(
                "unknown box `{other}` (expected temp|drafted|viewer|complete|approve)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Title,
    Form,
    Drafter,
}

impl FromStr for SearchField {
    type Err = ApprovalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(Self::Title),
            "form" => Ok(Self::Form),
            "drafter" => Ok(Self::Drafter),
            other => Err(ApprovalError::validation(format!(
                "unknown search field `{other}` (expected title|form|drafter)"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    #[default]
    All,
    Week,
    Month,
    Quarter,
    HalfYear,
    Year,
}

impl Period {
    /// Earliest timestamp still inside the period.
    pub fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::All => None,
            Self::Week => Some(now - Duration::weeks(1)),
            Self::Month => now.checked_sub_months(Months::new(1)),
            Self::Quarter => now.checked_sub_months(Months::new(3)),
            Self::HalfYear => now.checked_sub_months(Months::new(6)),
            Self::Year => now.checked_sub_months(Months::new(12)),
        }
    }
}

impl FromStr for Period {
    type Err = ApprovalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "1w" => Ok(Self::Week),
            "1m" => Ok(Self::Month),
            "3m" => Ok(Self::Quarter),
            "6m" => Ok(Self::HalfYear),
            "1y" => Ok(Self::Year),
            other => Err(ApprovalError::validation(format!(
                "unknown period `{other}` (expected all|1w|1m|3m|6m|1y)"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListQuery {
    pub field: Option<SearchField>,
    pub keyword: Option<String>,
    pub period: Period,
    pub urgent_only: bool,
    pub page: u32,
    pub size: u32,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self { field: None, keyword: None, period: Period::All, urgent_only: false, page: 1, size: 10 }
    }
}

impl ListQuery {
    /// Normalizes raw request parameters; unknown field or period names are
    /// rejected rather than ignored.
    pub fn from_params(
        field: Option<&str>,
        keyword: Option<&str>,
        period: Option<&str>,
        urgent: Option<bool>,
        page: Option<u32>,
        size: Option<u32>,
        default_size: u32,
    ) -> Result<Self, ApprovalError> {
        let field = match field.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => Some(value.parse()?),
            None => None,
        };
        let period = match period {
            Some(value) => value.parse()?,
            None => Period::All,
        };

        Ok(Self {
            field,
            keyword: keyword.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string),
            period,
            urgent_only: urgent.unwrap_or(false),
            page: page.unwrap_or(1).max(1),
            size: size.unwrap_or(default_size).clamp(1, MAX_PAGE_SIZE),
        })
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.size)
    }

    pub fn matches(&self, entry: &ListEntry, now: DateTime<Utc>) -> bool {
        if self.urgent_only && !entry.emergency {
            return false;
        }

        if let Some(cutoff) = self.period.cutoff(now) {
            if entry.drafted_at < cutoff {
                return false;
            }
        }

        let Some(keyword) = &self.keyword else {
            return true;
        };
        let keyword = keyword.to_lowercase();
        let contains = |value: Option<&str>| {
            value.is_some_and(|value| value.to_lowercase().contains(&keyword))
        };

        match self.field {
            Some(SearchField::Title) => contains(Some(&entry.title)),
            Some(SearchField::Form) => {
                contains(entry.form_name.as_deref()) || contains(entry.sformno.as_deref())
            }
            Some(SearchField::Drafter) => contains(Some(&entry.drafter_name)),
            None => {
                contains(Some(&entry.title))
                    || contains(entry.form_name.as_deref())
                    || contains(Some(&entry.drafter_name))
            }
        }
    }

    /// Applies paging to an already filtered, already ordered result set.
    pub fn paginate<T>(&self, items: Vec<T>) -> Page<T> {
        let total_elements = items.len() as u64;
        let offset = usize::try_from(self.offset()).unwrap_or(usize::MAX);
        let content = items.into_iter().skip(offset).take(self.size as usize).collect();
        Page::new(content, self, total_elements)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u32,
    pub size: u32,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, query: &ListQuery, total_elements: u64) -> Self {
        let size = u64::from(query.size.max(1));
        Self {
            content,
            page: query.page,
            size: query.size,
            total_elements,
            total_pages: total_elements.div_ceil(size),
        }
    }
}

/// One row of a box listing. Temp rows carry `temp_id`, submitted rows
/// carry `sign_no`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListEntry {
    pub sign_no: Option<SignNo>,
    pub temp_id: Option<TempId>,
    pub sformno: Option<String>,
    pub form_name: Option<String>,
    pub title: String,
    pub drafter_id: String,
    pub drafter_name: String,
    pub doc_status: DocStatus,
    pub emergency: bool,
    pub drafted_at: DateTime<Utc>,
    pub complete_at: Option<DateTime<Utc>>,
    pub current_approver_id: Option<String>,
    pub current_approver_name: Option<String>,
}

impl ListEntry {
    pub fn from_document(doc: &ApprovalDocument) -> Self {
        let current = current_line(doc);
        Self {
            sign_no: Some(doc.sign_no),
            temp_id: None,
            sformno: doc.sformno.clone(),
            form_name: doc.form_name.clone(),
            title: doc.title.clone(),
            drafter_id: doc.drafter_id.clone(),
            drafter_name: doc.drafter_name.clone(),
            doc_status: doc.doc_status,
            emergency: doc.emergency,
            drafted_at: doc.draft_at,
            complete_at: doc.complete_at,
            current_approver_id: current.map(|line| line.approver_id.clone()),
            current_approver_name: current.map(|line| line.approver_name.clone()),
        }
    }

    pub fn from_temp(temp: &TempDocument) -> Self {
        Self {
            sign_no: None,
            temp_id: Some(temp.temp_id),
            sformno: temp.sformno.clone(),
            form_name: temp.form_name.clone(),
            title: temp.title.clone(),
            drafter_id: temp.owner_id.clone(),
            drafter_name: temp.owner_name.clone(),
            doc_status: DocStatus::Draft,
            emergency: temp.emergency,
            drafted_at: temp.updated_at,
            complete_at: None,
            current_approver_id: None,
            current_approver_name: None,
        }
    }
}

/// Document fields without the routing chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentHeader {
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
}

/// Detail view: header, ordered lines and references from one snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetail {
    pub doc: DocumentHeader,
    pub lines: Vec<ApprovalLine>,
    pub refs: Vec<ReferenceRecipient>,
    pub current_order_seq: Option<u32>,
}

impl From<ApprovalDocument> for DocumentDetail {
    fn from(doc: ApprovalDocument) -> Self {
        let current_order_seq = current_line(&doc).map(|line| line.order_seq);
        let mut lines = doc.lines;
        lines.sort_by_key(|line| line.order_seq);

        Self {
            doc: DocumentHeader {
                sign_no: doc.sign_no,
                sformno: doc.sformno,
                form_name: doc.form_name,
                title: doc.title,
                content: doc.content,
                emergency: doc.emergency,
                drafter_id: doc.drafter_id,
                drafter_name: doc.drafter_name,
                doc_status: doc.doc_status,
                due_date: doc.due_date,
                attachments: doc.attachments,
                draft_at: doc.draft_at,
                complete_at: doc.complete_at,
                revision: doc.revision,
            },
            lines,
            refs: doc.refs,
            current_order_seq,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoxCounts {
    pub temp: u64,
    pub drafted: u64,
    pub viewer: u64,
    pub complete: u64,
    pub approve: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeSummary {
    pub counts: BoxCounts,
    pub recent_drafted: Vec<ListEntry>,
    pub waiting: Vec<ListEntry>,
}
