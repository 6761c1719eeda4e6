pub mod audit;
pub mod config;
pub mod directory;
pub mod domain;
pub mod drafts;
pub mod errors;
pub mod processor;
pub mod query;
pub mod sequencer;

pub use directory::{Directory, FormCatalog, Member, StaticDirectory, StaticFormCatalog};
pub use domain::document::{
    ApprovalDocument, ApprovalLine, DocStatus, NewDocument, ReferenceRecipient, RouteStatus,
    SignNo,
};
pub use domain::draft::{DraftPayload, TempDocument, TempDraft, TempId};
pub use drafts::{DraftLimits, DraftPlanner};
pub use errors::{ApprovalError, ErrorKind};
pub use processor::{ActionOutcome, ActionProcessor, LineAction};
pub use query::{
    BoxCounts, BoxKind, DocumentDetail, DocumentHeader, HomeSummary, ListEntry, ListQuery, Page,
    Period, SearchField,
};
pub use sequencer::{current_line, derive_doc_status};
