//! Translation of [`NotificationQuery`] into SQLite statements.
//!
//! # Invariants
//! - Every user value is bound as a parameter; only column names and
//!   operators from closed enums are spliced into SQL text.
//! - Row ordering is `created_at` in the requested direction, then `id ASC`.

use crate::query::builder::{
    GroupingMode, NotificationQuery, Predicate, PredicateValue, SortOrder, StateFilter,
};
use rusqlite::types::Value;

const NOTIFICATION_COLUMNS: &[&str] = &[
    "id",
    "target_type",
    "target_id",
    "notifiable_type",
    "notifiable_id",
    "key",
    "group_owner_id",
    "group_type",
    "group_id",
    "notifier_type",
    "notifier_id",
    "parameters",
    "opened_at",
    "created_at",
];

const ROW_ALIAS: &str = "n";
const OWNER_ALIAS: &str = "g";

/// SQL text plus positional bind values.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub binds: Vec<Value>,
}

impl Statement {
    fn new(sql: String) -> Self {
        Self {
            sql,
            binds: Vec::new(),
        }
    }
}

/// `SELECT <all columns>` for index listings.
pub(crate) fn select_notifications(query: &NotificationQuery) -> Statement {
    let mut stmt = Statement::new(format!(
        "SELECT {} FROM notifications {ROW_ALIAS} WHERE 1 = 1",
        column_list(ROW_ALIAS)
    ));
    push_conditions(&mut stmt, query, ROW_ALIAS, 0);
    push_order_and_page(&mut stmt, query, ROW_ALIAS);
    stmt
}

/// Row count of the (paged) query.
pub(crate) fn count_notifications(query: &NotificationQuery) -> Statement {
    let inner = select_ids(query, ROW_ALIAS, 0);
    Statement {
        sql: format!("SELECT COUNT(*) FROM ({})", inner.sql),
        binds: inner.binds,
    }
}

/// Distinct keys of the (paged) query, ascending.
pub(crate) fn uniq_keys(query: &NotificationQuery) -> Statement {
    let mut inner = Statement::new(format!(
        "SELECT {ROW_ALIAS}.key AS key FROM notifications {ROW_ALIAS} WHERE 1 = 1"
    ));
    push_conditions(&mut inner, query, ROW_ALIAS, 0);
    push_order_and_page(&mut inner, query, ROW_ALIAS);
    Statement {
        sql: format!(
            "SELECT DISTINCT key FROM ({}) ORDER BY key ASC",
            inner.sql
        ),
        binds: inner.binds,
    }
}

/// `(group_owner_id, COUNT(*))` over matching member rows.
pub(crate) fn member_counts_by_owner(query: &NotificationQuery) -> Statement {
    let mut stmt = Statement::new(format!(
        "SELECT {ROW_ALIAS}.group_owner_id, COUNT(*)
         FROM notifications {ROW_ALIAS}
         WHERE {ROW_ALIAS}.group_owner_id IS NOT NULL"
    ));
    push_conditions(&mut stmt, query, ROW_ALIAS, 0);
    stmt.sql
        .push_str(&format!(" GROUP BY {ROW_ALIAS}.group_owner_id"));
    stmt
}

/// `(group_owner_id, notifier_type, COUNT(DISTINCT notifier_id))` over
/// matching members whose notifier shares the owner's notifier type but is
/// not the owner's notifier.
pub(crate) fn notifier_counts_by_owner(query: &NotificationQuery) -> Statement {
    let mut stmt = Statement::new(format!(
        "SELECT {ROW_ALIAS}.group_owner_id, {ROW_ALIAS}.notifier_type, COUNT(DISTINCT {ROW_ALIAS}.notifier_id)
         FROM notifications {ROW_ALIAS}
         INNER JOIN notifications {OWNER_ALIAS} ON {OWNER_ALIAS}.id = {ROW_ALIAS}.group_owner_id
         WHERE {OWNER_ALIAS}.notifier_type = {ROW_ALIAS}.notifier_type
           AND {OWNER_ALIAS}.notifier_id <> {ROW_ALIAS}.notifier_id"
    ));
    push_conditions(&mut stmt, query, ROW_ALIAS, 0);
    stmt.sql.push_str(&format!(
        " GROUP BY {ROW_ALIAS}.group_owner_id, {ROW_ALIAS}.notifier_type"
    ));
    stmt
}

/// Sets `opened_at` on every unopened row of the (paged) query.
pub(crate) fn open_matching(query: &NotificationQuery, now_ms: i64) -> Statement {
    let unopened = query.clone().unopened_only();
    let inner = select_ids(&unopened, ROW_ALIAS, 0);
    let mut binds = vec![Value::Integer(now_ms)];
    binds.extend(inner.binds);
    Statement {
        sql: format!(
            "UPDATE notifications SET opened_at = ? WHERE opened_at IS NULL AND id IN ({})",
            inner.sql
        ),
        binds,
    }
}

fn select_ids(query: &NotificationQuery, alias: &str, depth: usize) -> Statement {
    let mut stmt = Statement::new(format!(
        "SELECT {alias}.id FROM notifications {alias} WHERE 1 = 1"
    ));
    push_conditions(&mut stmt, query, alias, depth);
    push_order_and_page(&mut stmt, query, alias);
    stmt
}

fn column_list(alias: &str) -> String {
    NOTIFICATION_COLUMNS
        .iter()
        .map(|column| format!("{alias}.{column} AS {column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_conditions(stmt: &mut Statement, query: &NotificationQuery, alias: &str, depth: usize) {
    match query.state {
        StateFilter::All => {}
        StateFilter::Unopened => stmt.sql.push_str(&format!(" AND {alias}.opened_at IS NULL")),
        StateFilter::Opened { .. } | StateFilter::OpenedUnbounded => stmt
            .sql
            .push_str(&format!(" AND {alias}.opened_at IS NOT NULL")),
    }

    match query.grouping {
        GroupingMode::IncludeAll => {}
        GroupingMode::OwnersOnly => stmt
            .sql
            .push_str(&format!(" AND {alias}.group_owner_id IS NULL")),
        GroupingMode::MembersOnly => stmt
            .sql
            .push_str(&format!(" AND {alias}.group_owner_id IS NOT NULL")),
    }

    if let Some(target) = query.target.as_ref() {
        push_pair(
            stmt,
            alias,
            ("target_type", target.entity_type()),
            ("target_id", target.entity_id()),
        );
    }
    if let Some(target_type) = query.target_type.as_ref() {
        push_text(stmt, alias, "target_type", target_type);
    }
    if let Some(notifiable) = query.notifiable.as_ref() {
        push_pair(
            stmt,
            alias,
            ("notifiable_type", notifiable.entity_type()),
            ("notifiable_id", notifiable.entity_id()),
        );
    }
    if let Some(notifiable_type) = query.notifiable_type.as_ref() {
        push_text(stmt, alias, "notifiable_type", notifiable_type);
    }
    if let Some((group_type, group_id)) = query.group.as_ref() {
        push_pair(stmt, alias, ("group_type", group_type), ("group_id", group_id));
    }
    if let Some(key) = query.key.as_ref() {
        push_text(stmt, alias, "key", key);
    }

    if let Some(owner_ids) = query.owner_ids.as_ref() {
        if owner_ids.is_empty() {
            stmt.sql.push_str(" AND 0 = 1");
        } else {
            stmt.sql.push_str(&format!(
                " AND {alias}.group_owner_id IN ({})",
                placeholders(owner_ids.len())
            ));
            stmt.binds
                .extend(owner_ids.iter().map(|id| Value::Integer(*id)));
        }
    }

    if let Some(owner_index) = query.owner_index.as_deref() {
        let sub_alias = format!("o{depth}");
        let inner = select_ids(owner_index, &sub_alias, depth + 1);
        stmt.sql
            .push_str(&format!(" AND {alias}.group_owner_id IN ({})", inner.sql));
        stmt.binds.extend(inner.binds);
    }

    for predicate in &query.predicates {
        push_predicate(stmt, alias, predicate);
    }

    if let Some(cutoff) = query.created_after {
        stmt.sql.push_str(&format!(" AND {alias}.created_at > ?"));
        stmt.binds.push(Value::Integer(cutoff));
    }
}

fn push_predicate(stmt: &mut Statement, alias: &str, predicate: &Predicate) {
    match predicate {
        Predicate::Compare { column, op, value } => {
            stmt.sql.push_str(&format!(
                " AND {alias}.{} {} ?",
                column.as_sql(),
                op.as_sql()
            ));
            stmt.binds.push(to_value(value));
        }
        Predicate::IsNull(column) => stmt
            .sql
            .push_str(&format!(" AND {alias}.{} IS NULL", column.as_sql())),
        Predicate::IsNotNull(column) => stmt
            .sql
            .push_str(&format!(" AND {alias}.{} IS NOT NULL", column.as_sql())),
        Predicate::In(column, values) => {
            if values.is_empty() {
                stmt.sql.push_str(" AND 0 = 1");
                return;
            }
            stmt.sql.push_str(&format!(
                " AND {alias}.{} IN ({})",
                column.as_sql(),
                placeholders(values.len())
            ));
            stmt.binds.extend(values.iter().map(to_value));
        }
    }
}

fn push_order_and_page(stmt: &mut Statement, query: &NotificationQuery, alias: &str) {
    let direction = match query.order {
        SortOrder::LatestFirst => "DESC",
        SortOrder::EarliestFirst => "ASC",
    };
    stmt.sql.push_str(&format!(
        " ORDER BY {alias}.created_at {direction}, {alias}.id ASC"
    ));

    match query.effective_limit() {
        Some(limit) => {
            stmt.sql.push_str(" LIMIT ?");
            stmt.binds.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                stmt.sql.push_str(" OFFSET ?");
                stmt.binds.push(Value::Integer(i64::from(query.offset)));
            }
        }
        None if query.offset > 0 => {
            stmt.sql.push_str(" LIMIT -1 OFFSET ?");
            stmt.binds.push(Value::Integer(i64::from(query.offset)));
        }
        None => {}
    }
}

fn push_text(stmt: &mut Statement, alias: &str, column: &str, value: &str) {
    stmt.sql.push_str(&format!(" AND {alias}.{column} = ?"));
    stmt.binds.push(Value::Text(value.to_string()));
}

fn push_pair(stmt: &mut Statement, alias: &str, first: (&str, &str), second: (&str, &str)) {
    push_text(stmt, alias, first.0, first.1);
    push_text(stmt, alias, second.0, second.1);
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn to_value(value: &PredicateValue) -> Value {
    match value {
        PredicateValue::Integer(number) => Value::Integer(*number),
        PredicateValue::Text(text) => Value::Text(text.clone()),
    }
}
