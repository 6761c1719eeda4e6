use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use signflow_core::domain::draft::{TempDocument, TempDraft, TempId};
use signflow_core::query::{ListEntry, ListQuery, Page};

use super::search::{push_search_filters, SearchColumns};
use super::{
    decode_ids, encode_ids, parse_optional_date, parse_timestamp, timestamp, RepositoryError,
    TempDocumentRepository,
};
use crate::DbPool;

pub struct SqlTempDocumentRepository {
    pool: DbPool,
}

impl SqlTempDocumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const TEMP_SEARCH: SearchColumns = SearchColumns {
    title: "t.title",
    form_name: "t.form_name",
    sformno: "t.sformno",
    person_name: "t.owner_name",
    emergency: "t.emergency",
    timestamp: "t.updated_at",
};

const TEMP_COLUMNS: &str = "t.temp_id, t.owner_id, t.owner_name, t.sformno, t.form_name, t.title,
        t.content, t.emergency, t.due_date, t.approver_ids_json, t.ref_ids_json,
        t.attachments_json, t.created_at, t.updated_at";

fn decode(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn row_to_temp(row: &SqliteRow) -> Result<TempDocument, RepositoryError> {
    let approver_ids: String = row.try_get("approver_ids_json").map_err(decode)?;
    let ref_ids: String = row.try_get("ref_ids_json").map_err(decode)?;
    let attachments: String = row.try_get("attachments_json").map_err(decode)?;
    let created_at: String = row.try_get("created_at").map_err(decode)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode)?;

    Ok(TempDocument {
        temp_id: TempId(row.try_get("temp_id").map_err(decode)?),
        owner_id: row.try_get("owner_id").map_err(decode)?,
        owner_name: row.try_get("owner_name").map_err(decode)?,
        sformno: row.try_get("sformno").map_err(decode)?,
        form_name: row.try_get("form_name").map_err(decode)?,
        title: row.try_get("title").map_err(decode)?,
        content: row.try_get("content").map_err(decode)?,
        emergency: row.try_get("emergency").map_err(decode)?,
        due_date: parse_optional_date(row.try_get("due_date").map_err(decode)?)?,
        approver_ids: decode_ids(&approver_ids)?,
        ref_ids: decode_ids(&ref_ids)?,
        attachments: decode_ids(&attachments)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait::async_trait]
impl TempDocumentRepository for SqlTempDocumentRepository {
    async fn save_temp(&self, draft: TempDraft) -> Result<TempDocument, RepositoryError> {
        let approver_ids = encode_ids(&draft.approver_ids)?;
        let ref_ids = encode_ids(&draft.ref_ids)?;
        let attachments = encode_ids(&draft.attachments)?;
        let due_date = draft.due_date.map(|date| date.to_string());

        let Some(temp_id) = draft.temp_id else {
            let inserted = sqlx::query(
                "INSERT INTO temp_document (owner_id, owner_name, sformno, form_name, title, content,
                                            emergency, due_date, approver_ids_json, ref_ids_json,
                                            attachments_json, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&draft.owner_id)
            .bind(&draft.owner_name)
            .bind(&draft.sformno)
            .bind(&draft.form_name)
            .bind(&draft.title)
            .bind(&draft.content)
            .bind(draft.emergency)
            .bind(&due_date)
            .bind(&approver_ids)
            .bind(&ref_ids)
            .bind(&attachments)
            .bind(timestamp(draft.created_at))
            .bind(timestamp(draft.updated_at))
            .execute(&self.pool)
            .await?;

            return Ok(draft.into_temp(TempId(inserted.last_insert_rowid())));
        };

        let updated = sqlx::query(
            "UPDATE temp_document
             SET owner_name = ?, sformno = ?, form_name = ?, title = ?, content = ?,
                 emergency = ?, due_date = ?, approver_ids_json = ?, ref_ids_json = ?,
                 attachments_json = ?, updated_at = ?
             WHERE temp_id = ? AND owner_id = ?",
        )
        .bind(&draft.owner_name)
        .bind(&draft.sformno)
        .bind(&draft.form_name)
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(draft.emergency)
        .bind(&due_date)
        .bind(&approver_ids)
        .bind(&ref_ids)
        .bind(&attachments)
        .bind(timestamp(draft.updated_at))
        .bind(temp_id.0)
        .bind(&draft.owner_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("temp document {temp_id}")));
        }

        Ok(draft.into_temp(temp_id))
    }

    async fn find_owned(
        &self,
        owner_id: &str,
        temp_id: TempId,
    ) -> Result<Option<TempDocument>, RepositoryError> {
        let row = sqlx::query(
            "SELECT temp_id, owner_id, owner_name, sformno, form_name, title, content, emergency,
                    due_date, approver_ids_json, ref_ids_json, attachments_json, created_at,
                    updated_at
             FROM temp_document WHERE temp_id = ? AND owner_id = ?",
        )
        .bind(temp_id.0)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_temp(r)?)),
            None => Ok(None),
        }
    }

    async fn delete_owned(&self, owner_id: &str, ids: &[TempId]) -> Result<u64, RepositoryError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("DELETE FROM temp_document WHERE owner_id = ");
        builder.push_bind(owner_id.to_string());
        builder.push(" AND temp_id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.0);
        }
        separated.push_unseparated(")");

        let deleted = builder.build().execute(&self.pool).await?;
        Ok(deleted.rows_affected())
    }

    async fn list_owned(
        &self,
        owner_id: &str,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page<ListEntry>, RepositoryError> {
        let mut count =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS total FROM temp_document t WHERE t.owner_id = ");
        count.push_bind(owner_id.to_string());
        push_search_filters(&mut count, &TEMP_SEARCH, query, now);
        let total: i64 = count.build().fetch_one(&self.pool).await?.try_get("total").map_err(decode)?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT ");
        select.push(TEMP_COLUMNS);
        select.push(" FROM temp_document t WHERE t.owner_id = ");
        select.push_bind(owner_id.to_string());
        push_search_filters(&mut select, &TEMP_SEARCH, query, now);
        select.push(" ORDER BY t.updated_at DESC, t.temp_id DESC LIMIT ");
        select.push_bind(i64::from(query.size));
        select.push(" OFFSET ");
        select.push_bind(i64::try_from(query.offset()).unwrap_or(i64::MAX));

        let rows = select.build().fetch_all(&self.pool).await?;
        let content = rows
            .iter()
            .map(|row| row_to_temp(row).map(|temp| ListEntry::from_temp(&temp)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(content, query, u64::try_from(total).unwrap_or_default()))
    }
}
