use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};

use signflow_core::query::{ListQuery, SearchField};

use super::{like_pattern, timestamp};

/// Column names a box listing filters on.
pub(crate) struct SearchColumns {
    pub title: &'static str,
    pub form_name: &'static str,
    pub sformno: &'static str,
    pub person_name: &'static str,
    pub emergency: &'static str,
    pub timestamp: &'static str,
}

fn push_like(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, pattern: &str) {
    builder.push(column);
    builder.push(" LIKE ");
    builder.push_bind(pattern.to_string());
    builder.push(" ESCAPE '\\'");
}

/// Appends urgency, period and keyword conditions. Assumes the statement
/// already ends in a `WHERE` clause.
pub(crate) fn push_search_filters(
    builder: &mut QueryBuilder<'_, Sqlite>,
    columns: &SearchColumns,
    query: &ListQuery,
    now: DateTime<Utc>,
) {
    if query.urgent_only {
        builder.push(" AND ");
        builder.push(columns.emergency);
        builder.push(" = 1");
    }

    if let Some(cutoff) = query.period.cutoff(now) {
        builder.push(" AND ");
        builder.push(columns.timestamp);
        builder.push(" >= ");
        builder.push_bind(timestamp(cutoff));
    }

    let Some(keyword) = &query.keyword else {
        return;
    };
    let pattern = like_pattern(keyword);

    builder.push(" AND (");
    match query.field {
        Some(SearchField::Title) => push_like(builder, columns.title, &pattern),
        Some(SearchField::Form) => {
            push_like(builder, columns.form_name, &pattern);
            builder.push(" OR ");
            push_like(builder, columns.sformno, &pattern);
        }
        Some(SearchField::Drafter) => push_like(builder, columns.person_name, &pattern),
        None => {
            push_like(builder, columns.title, &pattern);
            builder.push(" OR ");
            push_like(builder, columns.form_name, &pattern);
            builder.push(" OR ");
            push_like(builder, columns.person_name, &pattern);
        }
    }
    builder.push(")");
}
