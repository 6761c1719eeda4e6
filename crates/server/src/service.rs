//! Request-driven orchestration of drafts, routing actions and queries.
//!
//! Every mutation loads fresh state, runs the pure engine from
//! `signflow-core`, and commits through the repositories. Routing mutations
//! are compare-and-swap writes on the document revision; a lost race is
//! retried against reloaded state a bounded number of times.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{info, warn};

use signflow_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use signflow_core::config::RoutingConfig;
use signflow_core::sequencer::check_invariants;
use signflow_core::{
    ActionOutcome, ActionProcessor, ApprovalDocument, ApprovalError, BoxCounts, BoxKind,
    Directory, DocumentDetail, DraftLimits, DraftPayload, DraftPlanner, ErrorKind, FormCatalog,
    HomeSummary, LineAction, ListEntry, ListQuery, Page, SignNo, TempDocument, TempId,
};
use signflow_db::{ConsumedTemp, DocumentRepository, TempDocumentRepository};

const HOME_PREVIEW_SIZE: u32 = 5;

/// Who is calling and under which correlation id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub actor_id: String,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(actor_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self { actor_id: actor_id.into(), correlation_id: correlation_id.into() }
    }

    fn audit(&self) -> AuditContext {
        AuditContext::new(self.correlation_id.clone(), self.actor_id.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceSettings {
    pub limits: DraftLimits,
    pub conflict_retries: u32,
    pub default_page_size: u32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&RoutingConfig::default())
    }
}

impl From<&RoutingConfig> for ServiceSettings {
    fn from(config: &RoutingConfig) -> Self {
        Self {
            limits: DraftLimits { max_chain_length: config.max_chain_length },
            conflict_retries: config.conflict_retries,
            default_page_size: config.default_page_size,
        }
    }
}

pub struct ApprovalService {
    documents: Arc<dyn DocumentRepository>,
    temps: Arc<dyn TempDocumentRepository>,
    directory: Arc<dyn Directory>,
    catalog: Arc<dyn FormCatalog>,
    audit: Arc<dyn AuditSink>,
    processor: ActionProcessor,
    settings: ServiceSettings,
}

impl ApprovalService {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        temps: Arc<dyn TempDocumentRepository>,
        directory: Arc<dyn Directory>,
        catalog: Arc<dyn FormCatalog>,
        audit: Arc<dyn AuditSink>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            documents,
            temps,
            directory,
            catalog,
            audit,
            processor: ActionProcessor::new(),
            settings,
        }
    }

    pub fn default_page_size(&self) -> u32 {
        self.settings.default_page_size
    }

    fn planner(&self) -> DraftPlanner<'_> {
        DraftPlanner::new(self.directory.as_ref(), self.catalog.as_ref(), self.settings.limits)
    }

    pub async fn save_temp(
        &self,
        ctx: &RequestContext,
        payload: DraftPayload,
    ) -> Result<TempDocument, ApprovalError> {
        let result = self.save_temp_inner(ctx, &payload).await;
        match &result {
            Ok(temp) => {
                info!(
                    event_name = "draft.saved",
                    correlation_id = %ctx.correlation_id,
                    actor_id = %ctx.actor_id,
                    temp_id = %temp.temp_id,
                    "temp document saved"
                );
                self.audit.emit(
                    ctx.audit()
                        .with_temp_id(temp.temp_id)
                        .event("draft.saved", AuditCategory::Draft, AuditOutcome::Success)
                        .with_metadata("approver_count", temp.approver_ids.len().to_string()),
                );
            }
            Err(error) => {
                let mut audit = ctx.audit();
                if let Some(temp_id) = payload.temp_id {
                    audit = audit.with_temp_id(temp_id);
                }
                self.reject(ctx, audit, "draft.save", AuditCategory::Draft, error);
            }
        }
        result
    }

    async fn save_temp_inner(
        &self,
        ctx: &RequestContext,
        payload: &DraftPayload,
    ) -> Result<TempDocument, ApprovalError> {
        let existing = match payload.temp_id {
            Some(temp_id) => Some(self.owned_temp(&ctx.actor_id, temp_id).await?),
            None => None,
        };
        // Every re-save moves `updated_at` strictly forward.
        let saved_at = match &existing {
            Some(temp) => now().max(temp.updated_at + Duration::microseconds(1)),
            None => now(),
        };
        let draft =
            self.planner().prepare_temp(&ctx.actor_id, existing.as_ref(), payload, saved_at);
        Ok(self.temps.save_temp(draft).await?)
    }

    pub async fn load_temp(
        &self,
        ctx: &RequestContext,
        temp_id: TempId,
    ) -> Result<TempDocument, ApprovalError> {
        self.owned_temp(&ctx.actor_id, temp_id).await
    }

    /// Deletes the caller's temp records among `ids`. Ids that do not exist
    /// or belong to someone else are skipped silently, so an empty or fully
    /// foreign set deletes nothing and reports 0.
    pub async fn delete_temp(
        &self,
        ctx: &RequestContext,
        ids: &[TempId],
    ) -> Result<u64, ApprovalError> {
        let deleted = match self.temps.delete_owned(&ctx.actor_id, ids).await {
            Ok(deleted) => deleted,
            Err(error) => {
                let error = ApprovalError::from(error);
                self.reject(ctx, ctx.audit(), "draft.delete", AuditCategory::Draft, &error);
                return Err(error);
            }
        };

        info!(
            event_name = "draft.deleted",
            correlation_id = %ctx.correlation_id,
            actor_id = %ctx.actor_id,
            requested = ids.len(),
            deleted,
            "temp documents deleted"
        );
        self.audit.emit(
            ctx.audit()
                .event("draft.deleted", AuditCategory::Draft, AuditOutcome::Success)
                .with_metadata("requested", ids.len().to_string())
                .with_metadata("deleted", deleted.to_string()),
        );
        Ok(deleted)
    }

    /// Submits a document. With a `tempId` the owner's temp record is the
    /// base and is consumed atomically with the insert; without one the
    /// payload alone is submitted. A temp saved again between the read and
    /// the insert fails the submission with `Conflict` and is kept.
    pub async fn submit(
        &self,
        ctx: &RequestContext,
        payload: DraftPayload,
    ) -> Result<ApprovalDocument, ApprovalError> {
        let result = self.submit_inner(ctx, &payload).await;
        match &result {
            Ok(doc) => {
                info!(
                    event_name = "document.submitted",
                    correlation_id = %ctx.correlation_id,
                    actor_id = %ctx.actor_id,
                    sign_no = %doc.sign_no,
                    line_count = doc.lines.len(),
                    "document submitted for approval"
                );
                let mut audit = ctx.audit().with_sign_no(doc.sign_no);
                if let Some(temp_id) = payload.temp_id {
                    audit = audit.with_temp_id(temp_id);
                }
                self.audit.emit(
                    audit
                        .event("document.submitted", AuditCategory::Draft, AuditOutcome::Success)
                        .with_metadata("line_count", doc.lines.len().to_string())
                        .with_metadata("ref_count", doc.refs.len().to_string()),
                );
            }
            Err(error) => {
                let mut audit = ctx.audit();
                if let Some(temp_id) = payload.temp_id {
                    audit = audit.with_temp_id(temp_id);
                }
                self.reject(ctx, audit, "document.submit", AuditCategory::Draft, error);
            }
        }
        result
    }

    async fn submit_inner(
        &self,
        ctx: &RequestContext,
        payload: &DraftPayload,
    ) -> Result<ApprovalDocument, ApprovalError> {
        let base = match payload.temp_id {
            Some(temp_id) => Some(self.owned_temp(&ctx.actor_id, temp_id).await?),
            None => None,
        };
        let planned =
            self.planner().plan_submission(&ctx.actor_id, base.as_ref(), payload, now())?;
        Ok(self.documents.promote(planned, base.as_ref().map(ConsumedTemp::from)).await?)
    }

    pub async fn act(
        &self,
        ctx: &RequestContext,
        sign_no: SignNo,
        action: LineAction,
        comment: Option<&str>,
    ) -> Result<ActionOutcome, ApprovalError> {
        let result = self
            .commit_with_retries(ctx, sign_no, |doc| {
                self.processor.act(doc, &ctx.actor_id, action, comment, now())
            })
            .await;

        let event_type = match action {
            LineAction::Approve => "line.approved",
            LineAction::Reject => "line.rejected",
            LineAction::Hold => "line.held",
        };
        self.record_routing(ctx, sign_no, event_type, "line.act", AuditCategory::Routing, &result);
        result
    }

    /// Administrative resume of a held document.
    pub async fn resume(
        &self,
        ctx: &RequestContext,
        sign_no: SignNo,
    ) -> Result<ActionOutcome, ApprovalError> {
        let result = match self.require_administrator(ctx, "resume") {
            Ok(()) => {
                self.commit_with_retries(ctx, sign_no, |doc| self.processor.resume(doc, now()))
                    .await
            }
            Err(error) => Err(error),
        };
        self.record_routing(
            ctx,
            sign_no,
            "line.resumed",
            "line.resume",
            AuditCategory::Administration,
            &result,
        );
        result
    }

    /// Administrative replacement of a pending line's approver.
    pub async fn reassign(
        &self,
        ctx: &RequestContext,
        sign_no: SignNo,
        order_seq: u32,
        approver_id: &str,
    ) -> Result<ActionOutcome, ApprovalError> {
        let result = match self.require_administrator(ctx, "reassign") {
            Ok(()) => {
                let approver_name = self.directory.display_name(approver_id.trim());
                self.commit_with_retries(ctx, sign_no, |doc| {
                    self.processor.reassign(doc, order_seq, approver_id, &approver_name, now())
                })
                .await
            }
            Err(error) => Err(error),
        };
        self.record_routing(
            ctx,
            sign_no,
            "line.reassigned",
            "line.reassign",
            AuditCategory::Administration,
            &result,
        );
        result
    }

    pub async fn detail(&self, sign_no: SignNo) -> Result<DocumentDetail, ApprovalError> {
        let doc = self
            .documents
            .find(sign_no)
            .await?
            .ok_or_else(|| ApprovalError::document_not_found(sign_no))?;
        Ok(DocumentDetail::from(doc))
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        kind: BoxKind,
        query: &ListQuery,
    ) -> Result<Page<ListEntry>, ApprovalError> {
        let now = now();
        let page = match kind {
            BoxKind::Temp => self.temps.list_owned(&ctx.actor_id, query, now).await?,
            other => self.documents.list_box(other, &ctx.actor_id, query, now).await?,
        };
        Ok(page)
    }

    pub async fn home(&self, ctx: &RequestContext) -> Result<HomeSummary, ApprovalError> {
        let preview = ListQuery { size: HOME_PREVIEW_SIZE, ..ListQuery::default() };

        let temp = self.list(ctx, BoxKind::Temp, &preview).await?;
        let drafted = self.list(ctx, BoxKind::Drafted, &preview).await?;
        let viewer = self.list(ctx, BoxKind::Viewer, &preview).await?;
        let complete = self.list(ctx, BoxKind::Complete, &preview).await?;
        let approve = self.list(ctx, BoxKind::Approve, &preview).await?;

        Ok(HomeSummary {
            counts: BoxCounts {
                temp: temp.total_elements,
                drafted: drafted.total_elements,
                viewer: viewer.total_elements,
                complete: complete.total_elements,
                approve: approve.total_elements,
            },
            recent_drafted: drafted.content,
            waiting: approve.content,
        })
    }

    async fn owned_temp(
        &self,
        owner_id: &str,
        temp_id: TempId,
    ) -> Result<TempDocument, ApprovalError> {
        self.temps
            .find_owned(owner_id, temp_id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(format!("temp document {temp_id}")))
    }

    fn require_administrator(
        &self,
        ctx: &RequestContext,
        operation: &str,
    ) -> Result<(), ApprovalError> {
        if self.directory.is_administrator(&ctx.actor_id) {
            return Ok(());
        }
        Err(ApprovalError::Forbidden(format!(
            "actor `{}` may not {operation} approval lines",
            ctx.actor_id
        )))
    }

    /// Loads the document, applies `transition`, and commits the result
    /// against the revision it was computed from.
    async fn commit_with_retries<F>(
        &self,
        ctx: &RequestContext,
        sign_no: SignNo,
        transition: F,
    ) -> Result<ActionOutcome, ApprovalError>
    where
        F: Fn(ApprovalDocument) -> Result<ActionOutcome, ApprovalError> + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            let doc = self
                .documents
                .find(sign_no)
                .await?
                .ok_or_else(|| ApprovalError::document_not_found(sign_no))?;

            let drift = check_invariants(&doc);
            if !drift.is_empty() {
                warn!(
                    event_name = "routing.invariant_drift",
                    correlation_id = %ctx.correlation_id,
                    sign_no = %sign_no,
                    violations = ?drift,
                    "stored document disagrees with routing rules"
                );
            }

            let expected_revision = doc.revision;
            let outcome = transition(doc)?;

            let committed =
                self.documents.update_routing(&outcome.document, expected_revision).await;
            let error = match committed {
                Ok(stored) => return Ok(ActionOutcome { document: stored, ..outcome }),
                Err(error) => ApprovalError::from(error),
            };
            if !error.is_retryable() || attempt >= self.settings.conflict_retries {
                return Err(error);
            }

            attempt += 1;
            warn!(
                event_name = "routing.conflict_retry",
                correlation_id = %ctx.correlation_id,
                sign_no = %sign_no,
                actor_id = %ctx.actor_id,
                attempt,
                error = %error,
                "revision conflict, retrying against fresh state"
            );
        }
    }

    fn record_routing(
        &self,
        ctx: &RequestContext,
        sign_no: SignNo,
        event_type: &str,
        operation: &str,
        category: AuditCategory,
        result: &Result<ActionOutcome, ApprovalError>,
    ) {
        let audit = ctx.audit().with_sign_no(sign_no);
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                self.reject(ctx, audit, operation, category, error);
                return;
            }
        };

        let doc_status = outcome.document.doc_status.as_str();
        info!(
            event_name = event_type,
            correlation_id = %ctx.correlation_id,
            sign_no = %sign_no,
            actor_id = %ctx.actor_id,
            order_seq = outcome.order_seq,
            doc_status,
            "approval line updated"
        );
        if outcome.became_terminal() {
            info!(
                event_name = "document.finalized",
                correlation_id = %ctx.correlation_id,
                sign_no = %sign_no,
                doc_status,
                "document reached a terminal status"
            );
        }

        self.audit.emit(
            audit
                .event(event_type, category, AuditOutcome::Success)
                .with_metadata("order_seq", outcome.order_seq.to_string())
                .with_metadata("doc_status", doc_status)
                .with_metadata("previous_status", outcome.previous_status.as_str())
                .with_metadata("revision", outcome.document.revision.to_string()),
        );
    }

    fn reject(
        &self,
        ctx: &RequestContext,
        audit: AuditContext,
        operation: &str,
        category: AuditCategory,
        error: &ApprovalError,
    ) {
        let kind = error.kind();
        let outcome =
            if kind == ErrorKind::Store { AuditOutcome::Failed } else { AuditOutcome::Rejected };
        let event_type = format!("{operation}.rejected");

        warn!(
            event_name = %event_type,
            correlation_id = %ctx.correlation_id,
            actor_id = %ctx.actor_id,
            error_kind = kind.as_str(),
            error = %error,
            "approval request rejected"
        );
        self.audit.emit(
            audit
                .event(event_type, category, outcome)
                .with_metadata("error_kind", kind.as_str())
                .with_metadata("message", error.to_string()),
        );
    }
}

/// Wall clock truncated to the precision the store keeps.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    use chrono::{DateTime, Duration, Utc};

    use signflow_core::audit::{AuditOutcome, InMemoryAuditSink};
    use signflow_core::{
        ApprovalDocument, ApprovalError, BoxKind, DocStatus, DraftPayload, ErrorKind, LineAction,
        ListQuery, Member, NewDocument, RouteStatus, SignNo, StaticDirectory, StaticFormCatalog,
        TempDocument, TempDraft, TempId,
    };
    use signflow_db::{
        ConsumedTemp, DocumentRepository, InMemoryApprovalStore, RepositoryError,
        TempDocumentRepository,
    };

    use super::{ApprovalService, RequestContext, ServiceSettings};

    struct Harness {
        service: ApprovalService,
        store: Arc<InMemoryApprovalStore>,
        audit: InMemoryAuditSink,
    }

    fn directory() -> StaticDirectory {
        let members = ["E001", "E200", "E300", "E400", "E900"]
            .into_iter()
            .map(|id| Member { id: id.to_string(), name: format!("Member {id}"), department: None })
            .collect();
        StaticDirectory::new(members, vec!["ADMIN".to_string()])
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryApprovalStore::default());
        let audit = InMemoryAuditSink::default();
        let service = ApprovalService::new(
            store.clone(),
            store.clone(),
            Arc::new(directory()),
            Arc::new(StaticFormCatalog::default()),
            Arc::new(audit.clone()),
            ServiceSettings::default(),
        );
        Harness { service, store, audit }
    }

    fn ctx(actor: &str) -> RequestContext {
        RequestContext::new(actor, format!("req-{actor}"))
    }

    fn payload(title: &str, approvers: &[&str]) -> DraftPayload {
        DraftPayload {
            title: Some(title.to_string()),
            content: Some("<p>body</p>".to_string()),
            approver_ids: Some(approvers.iter().map(|id| id.to_string()).collect()),
            ref_ids: Some(vec!["E900".to_string()]),
            ..DraftPayload::default()
        }
    }

    #[tokio::test]
    async fn three_line_chain_completes_in_order() {
        let h = harness();
        let doc = h
            .service
            .submit(&ctx("E001"), payload("Trip", &["E200", "E300", "E400"]))
            .await
            .expect("submit");
        assert_eq!(doc.doc_status, DocStatus::InProgress);

        let early = h
            .service
            .act(&ctx("E300"), doc.sign_no, LineAction::Approve, None)
            .await
            .expect_err("second approver is not current");
        assert_eq!(early.kind(), ErrorKind::NotAuthorizedStep);

        for approver in ["E200", "E300"] {
            let outcome = h
                .service
                .act(&ctx(approver), doc.sign_no, LineAction::Approve, Some("  ok "))
                .await
                .expect("approve");
            assert_eq!(outcome.document.doc_status, DocStatus::InProgress);
        }

        let last = h
            .service
            .act(&ctx("E400"), doc.sign_no, LineAction::Approve, None)
            .await
            .expect("final approval");
        assert_eq!(last.document.doc_status, DocStatus::Complete);
        assert!(last.document.complete_at.is_some());
        assert!(last.became_terminal());
        assert_eq!(last.document.lines[0].comment.as_deref(), Some("ok"));

        let detail = h.service.detail(doc.sign_no).await.expect("detail");
        assert_eq!(detail.current_order_seq, None);
        assert!(detail.lines.iter().all(|line| line.route_status == RouteStatus::Approved));
    }

    #[tokio::test]
    async fn rejection_is_terminal_and_replays_are_invalid_state() {
        let h = harness();
        let doc = h
            .service
            .submit(&ctx("E001"), payload("Trip", &["E200", "E300"]))
            .await
            .expect("submit");

        h.service
            .act(&ctx("E200"), doc.sign_no, LineAction::Approve, None)
            .await
            .expect("approve");
        let replay = h
            .service
            .act(&ctx("E200"), doc.sign_no, LineAction::Approve, None)
            .await
            .expect_err("replayed decision");
        assert_eq!(replay.kind(), ErrorKind::InvalidState);

        let rejected = h
            .service
            .act(&ctx("E300"), doc.sign_no, LineAction::Reject, None)
            .await
            .expect("reject");
        assert_eq!(rejected.document.doc_status, DocStatus::Rejected);

        let after = h
            .service
            .act(&ctx("E300"), doc.sign_no, LineAction::Approve, None)
            .await
            .expect_err("terminal document");
        assert_eq!(after.kind(), ErrorKind::InvalidState);

        let types = h.audit.event_types();
        assert!(types.contains(&"line.approved".to_string()));
        assert!(types.contains(&"line.rejected".to_string()));
        assert!(types.contains(&"line.act.rejected".to_string()));
    }

    #[tokio::test]
    async fn promotion_consumes_temp_and_failure_keeps_it() {
        let h = harness();
        let owner = ctx("E001");
        let temp = h
            .service
            .save_temp(&owner, payload("", &["E200"]))
            .await
            .expect("temp save allows empty title");

        let missing_title = DraftPayload { temp_id: Some(temp.temp_id), ..DraftPayload::default() };
        let error = h.service.submit(&owner, missing_title).await.expect_err("title required");
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(h.service.load_temp(&owner, temp.temp_id).await.is_ok());
        assert_eq!(
            h.store
                .list_box(BoxKind::Drafted, "E001", &ListQuery::default(), Utc::now())
                .await
                .expect("list")
                .total_elements,
            0
        );

        let with_title = DraftPayload {
            temp_id: Some(temp.temp_id),
            title: Some("Trip".to_string()),
            ..DraftPayload::default()
        };
        let doc = h.service.submit(&owner, with_title).await.expect("submit from temp");
        assert_eq!(doc.lines.len(), 1, "stored chain is reused");
        assert_eq!(doc.lines[0].approver_name, "Member E200");

        let gone = h.service.load_temp(&owner, temp.temp_id).await.expect_err("consumed");
        assert_eq!(gone.kind(), ErrorKind::NotFound);
    }

    /// Saves an edit to the temp record right after the first read that
    /// follows `arm`, as a second editor tab would.
    struct EditAfterRead {
        inner: Arc<InMemoryApprovalStore>,
        armed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl TempDocumentRepository for EditAfterRead {
        async fn save_temp(&self, draft: TempDraft) -> Result<TempDocument, RepositoryError> {
            self.inner.save_temp(draft).await
        }

        async fn find_owned(
            &self,
            owner_id: &str,
            temp_id: TempId,
        ) -> Result<Option<TempDocument>, RepositoryError> {
            let found = self.inner.find_owned(owner_id, temp_id).await?;
            if let Some(temp) = &found {
                if self.armed.swap(false, Ordering::SeqCst) {
                    self.inner
                        .save_temp(TempDraft {
                            temp_id: Some(temp.temp_id),
                            owner_id: temp.owner_id.clone(),
                            owner_name: temp.owner_name.clone(),
                            sformno: temp.sformno.clone(),
                            form_name: temp.form_name.clone(),
                            title: "Edited in another tab".to_string(),
                            content: "<p>new body</p>".to_string(),
                            emergency: temp.emergency,
                            due_date: temp.due_date,
                            approver_ids: temp.approver_ids.clone(),
                            ref_ids: temp.ref_ids.clone(),
                            attachments: temp.attachments.clone(),
                            created_at: temp.created_at,
                            updated_at: temp.updated_at + Duration::seconds(1),
                        })
                        .await?;
                }
            }
            Ok(found)
        }

        async fn delete_owned(
            &self,
            owner_id: &str,
            ids: &[TempId],
        ) -> Result<u64, RepositoryError> {
            self.inner.delete_owned(owner_id, ids).await
        }

        async fn list_owned(
            &self,
            owner_id: &str,
            query: &ListQuery,
            now: DateTime<Utc>,
        ) -> Result<signflow_core::Page<signflow_core::ListEntry>, RepositoryError> {
            self.inner.list_owned(owner_id, query, now).await
        }
    }

    #[tokio::test]
    async fn submission_does_not_swallow_a_concurrent_temp_save() {
        let store = Arc::new(InMemoryApprovalStore::default());
        let temps =
            Arc::new(EditAfterRead { inner: store.clone(), armed: AtomicBool::new(false) });
        let audit = InMemoryAuditSink::default();
        let service = ApprovalService::new(
            store.clone(),
            temps.clone(),
            Arc::new(directory()),
            Arc::new(StaticFormCatalog::default()),
            Arc::new(audit.clone()),
            ServiceSettings::default(),
        );
        let owner = ctx("E001");
        let temp = service.save_temp(&owner, payload("Original", &["E200"])).await.expect("save");

        temps.armed.store(true, Ordering::SeqCst);
        let submit = DraftPayload { temp_id: Some(temp.temp_id), ..DraftPayload::default() };
        let error = service.submit(&owner, submit).await.expect_err("stale temp read");
        assert_eq!(error.kind(), ErrorKind::Conflict);

        let kept = service.load_temp(&owner, temp.temp_id).await.expect("edited temp kept");
        assert_eq!(kept.title, "Edited in another tab");
        assert_eq!(kept.content, "<p>new body</p>");
        let drafted = store
            .list_box(BoxKind::Drafted, "E001", &ListQuery::default(), Utc::now())
            .await
            .expect("list");
        assert_eq!(drafted.total_elements, 0);
        assert!(audit.events().iter().any(|event| event.event_type == "document.submit.rejected"));

        let retry = DraftPayload { temp_id: Some(temp.temp_id), ..DraftPayload::default() };
        let doc = service.submit(&owner, retry).await.expect("submit after re-read");
        assert_eq!(doc.title, "Edited in another tab");
    }

    #[tokio::test]
    async fn resaving_a_temp_moves_its_timestamp_forward() {
        let h = harness();
        let owner = ctx("E001");
        let first = h.service.save_temp(&owner, payload("Trip", &["E200"])).await.expect("save");
        let again = DraftPayload { temp_id: Some(first.temp_id), ..payload("Trip v2", &[]) };
        let second = h.service.save_temp(&owner, again).await.expect("resave");
        assert!(second.updated_at > first.updated_at);
    }

    #[tokio::test]
    async fn foreign_temp_records_are_not_disclosed() {
        let h = harness();
        let temp = h.service.save_temp(&ctx("E001"), payload("Trip", &["E200"])).await.expect("save");

        let stranger = ctx("E300");
        let load = h.service.load_temp(&stranger, temp.temp_id).await.expect_err("foreign");
        assert_eq!(load.kind(), ErrorKind::NotFound);

        let overwrite = DraftPayload { temp_id: Some(temp.temp_id), ..payload("Mine", &[]) };
        let save = h.service.save_temp(&stranger, overwrite).await.expect_err("foreign");
        assert_eq!(save.kind(), ErrorKind::NotFound);

        let deleted = h
            .service
            .delete_temp(&stranger, &[temp.temp_id, TempId(99)])
            .await
            .expect("delete");
        assert_eq!(deleted, 0);

        let nothing = h.service.delete_temp(&ctx("E001"), &[]).await.expect("empty set");
        assert_eq!(nothing, 0);
        assert!(h.service.load_temp(&ctx("E001"), temp.temp_id).await.is_ok());
    }

    #[tokio::test]
    async fn hold_blocks_until_an_administrator_resumes() {
        let h = harness();
        let doc = h
            .service
            .submit(&ctx("E001"), payload("Trip", &["E200", "E300"]))
            .await
            .expect("submit");

        let held = h
            .service
            .act(&ctx("E200"), doc.sign_no, LineAction::Hold, Some("need receipts"))
            .await
            .expect("hold");
        assert_eq!(held.document.doc_status, DocStatus::Hold);

        let blocked = h
            .service
            .act(&ctx("E300"), doc.sign_no, LineAction::Approve, None)
            .await
            .expect_err("held chain");
        assert_eq!(blocked.kind(), ErrorKind::InvalidState);

        let forbidden = h.service.resume(&ctx("E200"), doc.sign_no).await.expect_err("not admin");
        assert_eq!(forbidden.kind(), ErrorKind::Forbidden);

        let resumed = h.service.resume(&ctx("ADMIN"), doc.sign_no).await.expect("resume");
        assert_eq!(resumed.document.doc_status, DocStatus::InProgress);
        assert_eq!(resumed.document.lines[0].comment.as_deref(), Some("need receipts"));

        h.service
            .act(&ctx("E200"), doc.sign_no, LineAction::Approve, None)
            .await
            .expect("approve after resume");
    }

    #[tokio::test]
    async fn reassign_moves_the_queue_to_the_new_approver() {
        let h = harness();
        let doc = h
            .service
            .submit(&ctx("E001"), payload("Trip", &["E200", "E300"]))
            .await
            .expect("submit");

        let outcome =
            h.service.reassign(&ctx("ADMIN"), doc.sign_no, 1, "E400").await.expect("reassign");
        assert_eq!(outcome.document.lines[0].approver_name, "Member E400");

        let queue = h
            .service
            .list(&ctx("E400"), BoxKind::Approve, &ListQuery::default())
            .await
            .expect("approve box");
        assert_eq!(queue.total_elements, 1);

        let duplicate =
            h.service.reassign(&ctx("ADMIN"), doc.sign_no, 1, "E300").await.expect_err("dup");
        assert_eq!(duplicate.kind(), ErrorKind::Validation);

        let events = h.audit.events();
        let reassigned = events
            .iter()
            .find(|event| event.event_type == "line.reassigned")
            .expect("reassign audit");
        assert_eq!(reassigned.outcome, AuditOutcome::Success);
        assert_eq!(reassigned.sign_no, Some(doc.sign_no));
    }

    #[tokio::test]
    async fn home_counts_boxes_and_previews_recent_entries() {
        let h = harness();
        for title in ["One", "Two"] {
            h.service.submit(&ctx("E001"), payload(title, &["E200"])).await.expect("submit");
        }
        h.service.save_temp(&ctx("E001"), payload("Draft", &[])).await.expect("save");

        let home = h.service.home(&ctx("E001")).await.expect("home");
        assert_eq!(home.counts.drafted, 2);
        assert_eq!(home.counts.temp, 1);
        assert_eq!(home.recent_drafted[0].title, "Two");
        assert!(home.waiting.is_empty());

        let approver = h.service.home(&ctx("E200")).await.expect("home");
        assert_eq!(approver.counts.approve, 2);
        assert_eq!(approver.waiting.len(), 2);

        let viewer = h.service.home(&ctx("E900")).await.expect("home");
        assert_eq!(viewer.counts.viewer, 2);
    }

    /// Fails the first `conflicts` routing writes, then delegates.
    struct ContendedStore {
        inner: InMemoryApprovalStore,
        conflicts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl DocumentRepository for ContendedStore {
        async fn promote(
            &self,
            document: NewDocument,
            consumed_temp: Option<ConsumedTemp>,
        ) -> Result<ApprovalDocument, RepositoryError> {
            self.inner.promote(document, consumed_temp).await
        }

        async fn find(&self, sign_no: SignNo) -> Result<Option<ApprovalDocument>, RepositoryError> {
            self.inner.find(sign_no).await
        }

        async fn update_routing(
            &self,
            document: &ApprovalDocument,
            expected_revision: i64,
        ) -> Result<ApprovalDocument, RepositoryError> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                return Err(RepositoryError::Conflict("simulated race".to_string()));
            }
            self.inner.update_routing(document, expected_revision).await
        }

        async fn list_box(
            &self,
            kind: BoxKind,
            actor_id: &str,
            query: &ListQuery,
            now: DateTime<Utc>,
        ) -> Result<signflow_core::Page<signflow_core::ListEntry>, RepositoryError> {
            self.inner.list_box(kind, actor_id, query, now).await
        }
    }

    fn contended(conflicts: u32, retries: u32) -> (ApprovalService, Arc<InMemoryApprovalStore>) {
        let temps = Arc::new(InMemoryApprovalStore::default());
        let documents = Arc::new(ContendedStore {
            inner: InMemoryApprovalStore::default(),
            conflicts: AtomicU32::new(conflicts),
        });
        let service = ApprovalService::new(
            documents,
            temps.clone(),
            Arc::new(directory()),
            Arc::new(StaticFormCatalog::default()),
            Arc::new(InMemoryAuditSink::default()),
            ServiceSettings { conflict_retries: retries, ..ServiceSettings::default() },
        );
        (service, temps)
    }

    #[tokio::test]
    async fn conflicts_are_retried_within_budget() {
        let (service, _) = contended(2, 3);
        let doc = service.submit(&ctx("E001"), payload("Trip", &["E200"])).await.expect("submit");

        let outcome = service
            .act(&ctx("E200"), doc.sign_no, LineAction::Approve, None)
            .await
            .expect("third attempt commits");
        assert_eq!(outcome.document.revision, 2);
    }

    #[tokio::test]
    async fn conflicts_surface_once_retries_are_exhausted() {
        let (service, _) = contended(5, 1);
        let doc = service.submit(&ctx("E001"), payload("Trip", &["E200"])).await.expect("submit");

        let error = service
            .act(&ctx("E200"), doc.sign_no, LineAction::Approve, None)
            .await
            .expect_err("retries exhausted");
        assert!(matches!(error, ApprovalError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_documents_are_not_found() {
        let h = harness();
        let error = h.service.detail(SignNo(404)).await.expect_err("missing");
        assert_eq!(error.kind(), ErrorKind::NotFound);

        let act = h
            .service
            .act(&ctx("E200"), SignNo(404), LineAction::Approve, None)
            .await
            .expect_err("missing");
        assert_eq!(act.kind(), ErrorKind::NotFound);
    }
}
