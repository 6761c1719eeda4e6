use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use signflow_core::domain::document::{ApprovalDocument, NewDocument, SignNo};
use signflow_core::domain::draft::{TempDocument, TempDraft, TempId};
use signflow_core::query::{BoxKind, ListEntry, ListQuery, Page};

use super::{ConsumedTemp, DocumentRepository, RepositoryError, TempDocumentRepository};

#[derive(Default)]
struct StoreState {
    documents: BTreeMap<i64, ApprovalDocument>,
    temps: BTreeMap<i64, TempDocument>,
    last_sign_no: i64,
    last_temp_id: i64,
}

/// Documents and temp records behind one lock, so promotion is atomic the
/// same way the SQL transaction is.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    state: RwLock<StoreState>,
}

fn newest_first(mut entries: Vec<ListEntry>) -> Vec<ListEntry> {
    entries.sort_by(|left, right| {
        right
            .drafted_at
            .cmp(&left.drafted_at)
            .then_with(|| right.sign_no.cmp(&left.sign_no))
            .then_with(|| right.temp_id.cmp(&left.temp_id))
    });
    entries
}

#[async_trait::async_trait]
impl DocumentRepository for InMemoryApprovalStore {
    async fn promote(
        &self,
        document: NewDocument,
        consumed_temp: Option<ConsumedTemp>,
    ) -> Result<ApprovalDocument, RepositoryError> {
        let mut state = self.state.write().await;

        if let Some(consumed) = consumed_temp {
            let temp_id = consumed.temp_id;
            match state.temps.get(&temp_id.0) {
                Some(temp) if temp.owner_id == document.drafter_id => {
                    if temp.updated_at != consumed.updated_at {
                        return Err(RepositoryError::Conflict(format!(
                            "temp document {temp_id} was saved again after it was read"
                        )));
                    }
                }
                _ => return Err(RepositoryError::NotFound(format!("temp document {temp_id}"))),
            }
            state.temps.remove(&temp_id.0);
        }

        state.last_sign_no += 1;
        let stored = document.into_document(SignNo(state.last_sign_no));
        state.documents.insert(stored.sign_no.0, stored.clone());
        Ok(stored)
    }

    async fn find(&self, sign_no: SignNo) -> Result<Option<ApprovalDocument>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.documents.get(&sign_no.0).cloned())
    }

    async fn update_routing(
        &self,
        document: &ApprovalDocument,
        expected_revision: i64,
    ) -> Result<ApprovalDocument, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(current) = state.documents.get_mut(&document.sign_no.0) else {
            return Err(RepositoryError::NotFound(format!("document {}", document.sign_no)));
        };
        if current.revision != expected_revision {
            return Err(RepositoryError::Conflict(format!(
                "document {} moved past revision {expected_revision}",
                document.sign_no
            )));
        }

        current.doc_status = document.doc_status;
        current.complete_at = document.complete_at;
        current.lines = document.lines.clone();
        current.revision = expected_revision + 1;
        Ok(current.clone())
    }

    async fn list_box(
        &self,
        kind: BoxKind,
        actor_id: &str,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page<ListEntry>, RepositoryError> {
        let state = self.state.read().await;
        let entries = state
            .documents
            .values()
            .filter(|doc| kind.includes(doc, actor_id))
            .map(ListEntry::from_document)
            .filter(|entry| query.matches(entry, now))
            .collect();

        Ok(query.paginate(newest_first(entries)))
    }
}

#[async_trait::async_trait]
impl TempDocumentRepository for InMemoryApprovalStore {
    async fn save_temp(&self, draft: TempDraft) -> Result<TempDocument, RepositoryError> {
        let mut state = self.state.write().await;

        let temp_id = match draft.temp_id {
            Some(temp_id) => {
                let owned = state
                    .temps
                    .get(&temp_id.0)
                    .is_some_and(|temp| temp.owner_id == draft.owner_id);
                if !owned {
                    return Err(RepositoryError::NotFound(format!("temp document {temp_id}")));
                }
                temp_id
            }
            None => {
                state.last_temp_id += 1;
                TempId(state.last_temp_id)
            }
        };

        let temp = draft.into_temp(temp_id);
        state.temps.insert(temp_id.0, temp.clone());
        Ok(temp)
    }

    async fn find_owned(
        &self,
        owner_id: &str,
        temp_id: TempId,
    ) -> Result<Option<TempDocument>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.temps.get(&temp_id.0).filter(|temp| temp.owner_id == owner_id).cloned())
    }

    async fn delete_owned(&self, owner_id: &str, ids: &[TempId]) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let mut deleted = 0;
        for id in ids {
            let owned = state.temps.get(&id.0).is_some_and(|temp| temp.owner_id == owner_id);
            if owned && state.temps.remove(&id.0).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn list_owned(
        &self,
        owner_id: &str,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page<ListEntry>, RepositoryError> {
        let state = self.state.read().await;
        let entries = state
            .temps
            .values()
            .filter(|temp| temp.owner_id == owner_id)
            .map(ListEntry::from_temp)
            .filter(|entry| query.matches(entry, now))
            .collect();

        Ok(query.paginate(newest_first(entries)))
    }
}
