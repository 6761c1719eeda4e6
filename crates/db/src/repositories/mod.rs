use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use signflow_core::domain::document::{ApprovalDocument, NewDocument, SignNo};
use signflow_core::domain::draft::{TempDocument, TempDraft, TempId};
use signflow_core::errors::ApprovalError;
use signflow_core::query::{BoxKind, ListEntry, ListQuery, Page};

pub mod document;
pub mod memory;
pub(crate) mod search;
pub mod temp;

pub use document::SqlDocumentRepository;
pub use memory::InMemoryApprovalStore;
pub use temp::SqlTempDocumentRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("revision conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ApprovalError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(what) => ApprovalError::NotFound(what),
            RepositoryError::Conflict(what) => ApprovalError::Conflict(what),
            other => ApprovalError::Store(other.to_string()),
        }
    }
}

/// The temp record a submission was planned from, as it was when read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumedTemp {
    pub temp_id: TempId,
    pub updated_at: DateTime<Utc>,
}

impl From<&TempDocument> for ConsumedTemp {
    fn from(temp: &TempDocument) -> Self {
        Self { temp_id: temp.temp_id, updated_at: temp.updated_at }
    }
}

#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Allocates a sign number and stores the document with its lines and
    /// references. When `consumed_temp` is given, the owner's temp record is
    /// deleted in the same transaction. A missing or foreign temp record
    /// aborts the whole promotion with `NotFound`; one saved again since it
    /// was read aborts it with `Conflict` and is left in place.
    async fn promote(
        &self,
        document: NewDocument,
        consumed_temp: Option<ConsumedTemp>,
    ) -> Result<ApprovalDocument, RepositoryError>;

    /// Loads the document, its lines and references as one snapshot.
    async fn find(&self, sign_no: SignNo) -> Result<Option<ApprovalDocument>, RepositoryError>;

    /// Persists routing state if the stored revision still equals
    /// `expected_revision`, returning the document at its new revision.
    async fn update_routing(
        &self,
        document: &ApprovalDocument,
        expected_revision: i64,
    ) -> Result<ApprovalDocument, RepositoryError>;

    async fn list_box(
        &self,
        kind: BoxKind,
        actor_id: &str,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page<ListEntry>, RepositoryError>;
}

#[async_trait]
pub trait TempDocumentRepository: Send + Sync {
    /// Inserts a new temp record or overwrites the owner's existing one.
    async fn save_temp(&self, draft: TempDraft) -> Result<TempDocument, RepositoryError>;

    async fn find_owned(
        &self,
        owner_id: &str,
        temp_id: TempId,
    ) -> Result<Option<TempDocument>, RepositoryError>;

    /// Deletes the listed records that belong to `owner_id`; returns how many
    /// actually went away.
    async fn delete_owned(&self, owner_id: &str, ids: &[TempId]) -> Result<u64, RepositoryError>;

    async fn list_owned(
        &self,
        owner_id: &str,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page<ListEntry>, RepositoryError>;
}

pub(crate) fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp `{value}`: {e}")))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_optional_date(
    value: Option<String>,
) -> Result<Option<chrono::NaiveDate>, RepositoryError> {
    value
        .as_deref()
        .map(|raw| {
            raw.parse::<chrono::NaiveDate>()
                .map_err(|e| RepositoryError::Decode(format!("invalid date `{raw}`: {e}")))
        })
        .transpose()
}

pub(crate) fn encode_ids(ids: &[String]) -> Result<String, RepositoryError> {
    serde_json::to_string(ids).map_err(|e| RepositoryError::Decode(e.to_string()))
}

pub(crate) fn decode_ids(raw: &str) -> Result<Vec<String>, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Decode(e.to_string()))
}

/// `LIKE` pattern for a case-insensitive substring match, with `\` as the
/// escape character.
pub(crate) fn like_pattern(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len() + 2);
    escaped.push('%');
    for ch in keyword.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}
