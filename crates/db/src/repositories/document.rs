use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use signflow_core::domain::document::{
    ApprovalDocument, ApprovalLine, DocStatus, NewDocument, ReferenceRecipient, RouteStatus,
    SignNo,
};
use signflow_core::query::{BoxKind, ListEntry, ListQuery, Page};

use super::search::{push_search_filters, SearchColumns};
use super::{
    decode_ids, encode_ids, parse_optional_date, parse_optional_timestamp, parse_timestamp,
    timestamp, ConsumedTemp, DocumentRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlDocumentRepository {
    pool: DbPool,
}

impl SqlDocumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const DOCUMENT_SEARCH: SearchColumns = SearchColumns {
    title: "d.title",
    form_name: "d.form_name",
    sformno: "d.sformno",
    person_name: "d.drafter_name",
    emergency: "d.emergency",
    timestamp: "d.draft_at",
};

// `cur` is the first non-approved line when it is still pending (route
// status 0 = pending, 1 = approved).
const ENTRY_SELECT: &str = "SELECT d.sign_no, d.sformno, d.form_name, d.title, d.drafter_id,
        d.drafter_name, d.doc_status, d.emergency, d.draft_at, d.complete_at,
        cur.approver_id AS current_approver_id, cur.approver_name AS current_approver_name
 FROM approval_document d
 LEFT JOIN approval_line cur
   ON cur.sign_no = d.sign_no
  AND cur.route_status = 0
  AND NOT EXISTS (
      SELECT 1 FROM approval_line p
      WHERE p.sign_no = cur.sign_no AND p.order_seq < cur.order_seq AND p.route_status <> 1
  )
 WHERE 1=1";

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn doc_status(code: i64) -> Result<DocStatus, RepositoryError> {
    u8::try_from(code)
        .ok()
        .and_then(DocStatus::from_code)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown document status code {code}")))
}

fn route_status(code: i64) -> Result<RouteStatus, RepositoryError> {
    u8::try_from(code)
        .ok()
        .and_then(RouteStatus::from_code)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown route status code {code}")))
}

fn order_seq(value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Decode(format!("invalid order_seq {value}")))
}

fn row_to_document(row: &SqliteRow) -> Result<ApprovalDocument, RepositoryError> {
    let attachments_json: String = row.try_get("attachments_json").map_err(decode)?;
    let draft_at: String = row.try_get("draft_at").map_err(decode)?;

    Ok(ApprovalDocument {
        sign_no: SignNo(row.try_get("sign_no").map_err(decode)?),
        sformno: row.try_get("sformno").map_err(decode)?,
        form_name: row.try_get("form_name").map_err(decode)?,
        title: row.try_get("title").map_err(decode)?,
        content: row.try_get("content").map_err(decode)?,
        emergency: row.try_get("emergency").map_err(decode)?,
        drafter_id: row.try_get("drafter_id").map_err(decode)?,
        drafter_name: row.try_get("drafter_name").map_err(decode)?,
        doc_status: doc_status(row.try_get("doc_status").map_err(decode)?)?,
        due_date: parse_optional_date(row.try_get("due_date").map_err(decode)?)?,
        attachments: decode_ids(&attachments_json)?,
        draft_at: parse_timestamp(&draft_at)?,
        complete_at: parse_optional_timestamp(row.try_get("complete_at").map_err(decode)?)?,
        revision: row.try_get("revision").map_err(decode)?,
        lines: Vec::new(),
        refs: Vec::new(),
    })
}

fn row_to_line(row: &SqliteRow) -> Result<ApprovalLine, RepositoryError> {
    Ok(ApprovalLine {
        sign_no: SignNo(row.try_get("sign_no").map_err(decode)?),
        order_seq: order_seq(row.try_get("order_seq").map_err(decode)?)?,
        approver_id: row.try_get("approver_id").map_err(decode)?,
        approver_name: row.try_get("approver_name").map_err(decode)?,
        route_status: route_status(row.try_get("route_status").map_err(decode)?)?,
        action_at: parse_optional_timestamp(row.try_get("action_at").map_err(decode)?)?,
        comment: row.try_get("comment").map_err(decode)?,
    })
}

fn row_to_reference(row: &SqliteRow) -> Result<ReferenceRecipient, RepositoryError> {
    Ok(ReferenceRecipient {
        sign_no: SignNo(row.try_get("sign_no").map_err(decode)?),
        approver_id: row.try_get("approver_id").map_err(decode)?,
        approver_name: row.try_get("approver_name").map_err(decode)?,
    })
}

fn row_to_entry(row: &SqliteRow) -> Result<ListEntry, RepositoryError> {
    let draft_at: String = row.try_get("draft_at").map_err(decode)?;

    Ok(ListEntry {
        sign_no: Some(SignNo(row.try_get("sign_no").map_err(decode)?)),
        temp_id: None,
        sformno: row.try_get("sformno").map_err(decode)?,
        form_name: row.try_get("form_name").map_err(decode)?,
        title: row.try_get("title").map_err(decode)?,
        drafter_id: row.try_get("drafter_id").map_err(decode)?,
        drafter_name: row.try_get("drafter_name").map_err(decode)?,
        doc_status: doc_status(row.try_get("doc_status").map_err(decode)?)?,
        emergency: row.try_get("emergency").map_err(decode)?,
        drafted_at: parse_timestamp(&draft_at)?,
        complete_at: parse_optional_timestamp(row.try_get("complete_at").map_err(decode)?)?,
        current_approver_id: row.try_get("current_approver_id").map_err(decode)?,
        current_approver_name: row.try_get("current_approver_name").map_err(decode)?,
    })
}

async fn load_snapshot(
    conn: &mut SqliteConnection,
    sign_no: SignNo,
) -> Result<Option<ApprovalDocument>, RepositoryError> {
    let row = sqlx::query(
        "SELECT sign_no, sformno, form_name, title, content, emergency, drafter_id,
                drafter_name, doc_status, due_date, attachments_json, draft_at, complete_at,
                revision
         FROM approval_document WHERE sign_no = ?",
    )
    .bind(sign_no.0)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut document = row_to_document(&row)?;

    let lines = sqlx::query(
        "SELECT sign_no, order_seq, approver_id, approver_name, route_status, action_at, comment
         FROM approval_line WHERE sign_no = ? ORDER BY order_seq ASC",
    )
    .bind(sign_no.0)
    .fetch_all(&mut *conn)
    .await?;
    document.lines = lines.iter().map(row_to_line).collect::<Result<Vec<_>, _>>()?;

    let refs = sqlx::query(
        "SELECT sign_no, approver_id, approver_name
         FROM approval_reference WHERE sign_no = ? ORDER BY rowid ASC",
    )
    .bind(sign_no.0)
    .fetch_all(&mut *conn)
    .await?;
    document.refs = refs.iter().map(row_to_reference).collect::<Result<Vec<_>, _>>()?;

    Ok(Some(document))
}

fn push_box_filter(builder: &mut QueryBuilder<'_, Sqlite>, kind: BoxKind, actor_id: &str) {
    match kind {
        BoxKind::Temp => {
            builder.push(" AND 0");
        }
        BoxKind::Drafted => {
            builder.push(" AND d.drafter_id = ");
            builder.push_bind(actor_id.to_string());
        }
        BoxKind::Viewer => {
            builder.push(
                " AND EXISTS (SELECT 1 FROM approval_reference r
                              WHERE r.sign_no = d.sign_no AND r.approver_id = ",
            );
            builder.push_bind(actor_id.to_string());
            builder.push(")");
        }
        BoxKind::Complete => {
            builder.push(" AND d.doc_status = ");
            builder.push_bind(i64::from(DocStatus::Complete.code()));
        }
        BoxKind::Approve => {
            builder.push(" AND cur.approver_id = ");
            builder.push_bind(actor_id.to_string());
        }
    }
}

#[async_trait::async_trait]
impl DocumentRepository for SqlDocumentRepository {
    async fn promote(
        &self,
        document: NewDocument,
        consumed_temp: Option<ConsumedTemp>,
    ) -> Result<ApprovalDocument, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if let Some(consumed) = consumed_temp {
            let temp_id = consumed.temp_id;
            let deleted = sqlx::query(
                "DELETE FROM temp_document WHERE temp_id = ? AND owner_id = ? AND updated_at = ?",
            )
            .bind(temp_id.0)
            .bind(&document.drafter_id)
            .bind(timestamp(consumed.updated_at))
            .execute(&mut *tx)
            .await?;
            if deleted.rows_affected() == 0 {
                let still_owned: Option<i64> = sqlx::query_scalar(
                    "SELECT temp_id FROM temp_document WHERE temp_id = ? AND owner_id = ?",
                )
                .bind(temp_id.0)
                .bind(&document.drafter_id)
                .fetch_optional(&mut *tx)
                .await?;
                return Err(match still_owned {
                    Some(_) => RepositoryError::Conflict(format!(
                        "temp document {temp_id} was saved again after it was read"
                    )),
                    None => RepositoryError::NotFound(format!("temp document {temp_id}")),
                });
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO approval_document (sformno, form_name, title, content, emergency,
                                            drafter_id, drafter_name, doc_status, due_date,
                                            attachments_json, draft_at, complete_at, revision)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 1)",
        )
        .bind(&document.sformno)
        .bind(&document.form_name)
        .bind(&document.title)
        .bind(&document.content)
        .bind(document.emergency)
        .bind(&document.drafter_id)
        .bind(&document.drafter_name)
        .bind(i64::from(DocStatus::InProgress.code()))
        .bind(document.due_date.map(|date| date.to_string()))
        .bind(encode_ids(&document.attachments)?)
        .bind(timestamp(document.draft_at))
        .execute(&mut *tx)
        .await?;
        let sign_no = SignNo(inserted.last_insert_rowid());

        for line in &document.lines {
            sqlx::query(
                "INSERT INTO approval_line (sign_no, order_seq, approver_id, approver_name,
                                            route_status, action_at, comment)
                 VALUES (?, ?, ?, ?, ?, NULL, NULL)",
            )
            .bind(sign_no.0)
            .bind(i64::from(line.order_seq))
            .bind(&line.approver_id)
            .bind(&line.approver_name)
            .bind(i64::from(RouteStatus::Pending.code()))
            .execute(&mut *tx)
            .await?;
        }

        for recipient in &document.refs {
            sqlx::query(
                "INSERT INTO approval_reference (sign_no, approver_id, approver_name)
                 VALUES (?, ?, ?)",
            )
            .bind(sign_no.0)
            .bind(&recipient.approver_id)
            .bind(&recipient.approver_name)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(document.into_document(sign_no))
    }

    async fn find(&self, sign_no: SignNo) -> Result<Option<ApprovalDocument>, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let document = load_snapshot(&mut *tx, sign_no).await?;
        tx.commit().await?;
        Ok(document)
    }

    async fn update_routing(
        &self,
        document: &ApprovalDocument,
        expected_revision: i64,
    ) -> Result<ApprovalDocument, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE approval_document
             SET doc_status = ?, complete_at = ?, revision = revision + 1
             WHERE sign_no = ? AND revision = ?",
        )
        .bind(i64::from(document.doc_status.code()))
        .bind(document.complete_at.map(timestamp))
        .bind(document.sign_no.0)
        .bind(expected_revision)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM approval_document WHERE sign_no = ?")
                .bind(document.sign_no.0)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            return Err(if exists {
                RepositoryError::Conflict(format!(
                    "document {} moved past revision {expected_revision}",
                    document.sign_no
                ))
            } else {
                RepositoryError::NotFound(format!("document {}", document.sign_no))
            });
        }

        for line in &document.lines {
            sqlx::query(
                "UPDATE approval_line
                 SET approver_id = ?, approver_name = ?, route_status = ?, action_at = ?,
                     comment = ?
                 WHERE sign_no = ? AND order_seq = ?",
            )
            .bind(&line.approver_id)
            .bind(&line.approver_name)
            .bind(i64::from(line.route_status.code()))
            .bind(line.action_at.map(timestamp))
            .bind(&line.comment)
            .bind(document.sign_no.0)
            .bind(i64::from(line.order_seq))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut stored = document.clone();
        stored.revision = expected_revision + 1;
        Ok(stored)
    }

    async fn list_box(
        &self,
        kind: BoxKind,
        actor_id: &str,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page<ListEntry>, RepositoryError> {
        let mut count = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) AS total FROM (",
        );
        count.push(ENTRY_SELECT);
        push_box_filter(&mut count, kind, actor_id);
        push_search_filters(&mut count, &DOCUMENT_SEARCH, query, now);
        count.push(")");
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total").map_err(decode)?;

        let mut select = QueryBuilder::<Sqlite>::new(ENTRY_SELECT);
        push_box_filter(&mut select, kind, actor_id);
        push_search_filters(&mut select, &DOCUMENT_SEARCH, query, now);
        select.push(" ORDER BY d.draft_at DESC, d.sign_no DESC LIMIT ");
        select.push_bind(i64::from(query.size));
        select.push(" OFFSET ");
        select.push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));

        let rows = select.build().fetch_all(&self.pool).await?;
        let content = rows.iter().map(row_to_entry).collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(content, query, u64::try_from(total).unwrap_or_default()))
    }
}
