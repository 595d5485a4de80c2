//! Notification repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist notifications and run the find-or-create-owner step in one
//!   write transaction.
//! - Execute index, count and grouped aggregate queries built by
//!   [`NotificationQuery`].
//!
//! # Invariants
//! - Write paths validate input before SQL mutations.
//! - The grouping read and the insert share one `BEGIN IMMEDIATE`
//!   transaction, so concurrent creators for one target serialize.
//! - Read paths reject invalid persisted rows instead of masking them.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::grouping::GroupingPolicy;
use crate::model::notification::{
    EntityRef, NewNotification, Notification, NotificationId, NotificationValidationError,
    Parameters,
};
use crate::query::builder::{Column, NotificationQuery, Predicate, PredicateValue};
use crate::query::sql;
use rusqlite::{params, params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

const NOTIFICATION_SELECT_SQL: &str = "SELECT
    id,
    target_type,
    target_id,
    notifiable_type,
    notifiable_id,
    key,
    group_owner_id,
    group_type,
    group_id,
    notifier_type,
    notifier_id,
    parameters,
    opened_at,
    created_at
FROM notifications";

const REQUIRED_COLUMNS: &[&str] = &[
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

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for notification persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(NotificationValidationError),
    Db(DbError),
    NotFound(NotificationId),
    /// Grouping transaction kept hitting lock contention.
    ConcurrencyConflict {
        attempts: u32,
    },
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl RepoError {
    /// Lock contention that a fresh attempt may resolve.
    pub fn is_retryable_conflict(&self) -> bool {
        match self {
            Self::Db(err) => err.is_busy(),
            _ => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "notification not found: {id}"),
            Self::ConcurrencyConflict { attempts } => write!(
                f,
                "notification grouping conflicted with a concurrent writer after {attempts} attempts"
            ),
            Self::InvalidData(message) => {
                write!(f, "invalid persisted notification data: {message}")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "notification repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "notification repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "notification repository requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<NotificationValidationError> for RepoError {
    fn from(value: NotificationValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for notification storage.
pub trait NotificationRepository {
    /// Inserts one notification, joining an existing group when `policy`
    /// accepts the most recent unopened owner for `(target, group)`.
    fn insert_grouped(
        &self,
        input: &NewNotification,
        policy: &dyn GroupingPolicy,
        now_ms: i64,
    ) -> RepoResult<Notification>;
    fn get_notification(&self, id: NotificationId) -> RepoResult<Option<Notification>>;
    /// Loads rows by id, ordered by id. Unknown ids are skipped.
    fn get_notifications(&self, ids: &[NotificationId]) -> RepoResult<Vec<Notification>>;
    /// Sets `opened_at` once. Already-opened rows are returned unchanged.
    fn open_notification(&self, id: NotificationId, now_ms: i64) -> RepoResult<Notification>;
    /// Opens every unopened row matched by `query`; returns rows changed.
    fn open_matching(&self, query: &NotificationQuery, now_ms: i64) -> RepoResult<usize>;
    fn list_notifications(&self, query: &NotificationQuery) -> RepoResult<Vec<Notification>>;
    fn count_notifications(&self, query: &NotificationQuery) -> RepoResult<u64>;
    fn uniq_keys(&self, query: &NotificationQuery) -> RepoResult<Vec<String>>;
    /// Grouped member count per owner id over the member rows of `members`.
    fn member_counts_by_owner(
        &self,
        members: &NotificationQuery,
    ) -> RepoResult<HashMap<NotificationId, u64>>;
    /// Grouped distinct-notifier count per `(owner id, notifier type)`.
    fn notifier_counts_by_owner(
        &self,
        members: &NotificationQuery,
    ) -> RepoResult<HashMap<(NotificationId, String), u64>>;
    /// Deletes groups whose owner and every member were created at or
    /// before `cutoff_ms`.
    ///
    /// A group with any younger member is kept whole. Returns the number of
    /// owners deleted.
    fn delete_groups_created_before(&self, cutoff_ms: i64) -> RepoResult<usize>;
}

/// SQLite-backed notification repository.
pub struct SqliteNotificationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNotificationRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

impl NotificationRepository for SqliteNotificationRepository<'_> {
    fn insert_grouped(
        &self,
        input: &NewNotification,
        policy: &dyn GroupingPolicy,
        now_ms: i64,
    ) -> RepoResult<Notification> {
        let (target, notifiable) = input.validate()?;
        let parameters = serde_json::to_string(&input.parameters)
            .map_err(|err| RepoError::InvalidData(format!("parameters: {err}")))?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let owner_id = match find_group_candidate(&tx, input, policy)? {
            Some(candidate) if policy.accepts(&candidate, input, now_ms) => Some(candidate.id),
            _ => None,
        };

        tx.execute(
            "INSERT INTO notifications (
                target_type,
                target_id,
                notifiable_type,
                notifiable_id,
                key,
                group_owner_id,
                group_type,
                group_id,
                notifier_type,
                notifier_id,
                parameters,
                opened_at,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, ?12);",
            params![
                target.entity_type(),
                target.entity_id(),
                notifiable.entity_type(),
                notifiable.entity_id(),
                input.key.trim(),
                owner_id,
                input.group.as_ref().map(EntityRef::entity_type),
                input.group.as_ref().map(EntityRef::entity_id),
                input.notifier.as_ref().map(EntityRef::entity_type),
                input.notifier.as_ref().map(EntityRef::entity_id),
                parameters,
                now_ms,
            ],
        )?;
        let id = tx.last_insert_rowid();
        let created = load_notification(&tx, id)?
            .ok_or_else(|| RepoError::InvalidData(format!("inserted row {id} not readable")))?;
        tx.commit()?;

        Ok(created)
    }

    fn get_notification(&self, id: NotificationId) -> RepoResult<Option<Notification>> {
        load_notification(self.conn, id)
    }

    fn get_notifications(&self, ids: &[NotificationId]) -> RepoResult<Vec<Notification>> {
        let query = NotificationQuery::new()
            .earliest_order()
            .custom_filter(Predicate::In(
                Column::Id,
                ids.iter().copied().map(PredicateValue::Integer).collect(),
            ));
        self.list_notifications(&query)
    }

    fn open_notification(&self, id: NotificationId, now_ms: i64) -> RepoResult<Notification> {
        self.conn.execute(
            "UPDATE notifications
             SET opened_at = ?2
             WHERE id = ?1
               AND opened_at IS NULL;",
            params![id, now_ms],
        )?;

        load_notification(self.conn, id)?.ok_or(RepoError::NotFound(id))
    }

    fn open_matching(&self, query: &NotificationQuery, now_ms: i64) -> RepoResult<usize> {
        let stmt = sql::open_matching(query, now_ms);
        let changed = self
            .conn
            .execute(&stmt.sql, params_from_iter(stmt.binds))?;
        Ok(changed)
    }

    fn list_notifications(&self, query: &NotificationQuery) -> RepoResult<Vec<Notification>> {
        let stmt = sql::select_notifications(query);
        let mut prepared = self.conn.prepare(&stmt.sql)?;
        let mut rows = prepared.query(params_from_iter(stmt.binds))?;
        let mut notifications = Vec::new();
        while let Some(row) = rows.next()? {
            notifications.push(parse_notification_row(row)?);
        }
        Ok(notifications)
    }

    fn count_notifications(&self, query: &NotificationQuery) -> RepoResult<u64> {
        let stmt = sql::count_notifications(query);
        let count: i64 = self
            .conn
            .query_row(&stmt.sql, params_from_iter(stmt.binds), |row| row.get(0))?;
        to_count(count)
    }

    fn uniq_keys(&self, query: &NotificationQuery) -> RepoResult<Vec<String>> {
        let stmt = sql::uniq_keys(query);
        let mut prepared = self.conn.prepare(&stmt.sql)?;
        let mut rows = prepared.query(params_from_iter(stmt.binds))?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            keys.push(row.get(0)?);
        }
        Ok(keys)
    }

    fn member_counts_by_owner(
        &self,
        members: &NotificationQuery,
    ) -> RepoResult<HashMap<NotificationId, u64>> {
        let stmt = sql::member_counts_by_owner(members);
        let mut prepared = self.conn.prepare(&stmt.sql)?;
        let mut rows = prepared.query(params_from_iter(stmt.binds))?;
        let mut counts = HashMap::new();
        while let Some(row) = rows.next()? {
            let owner_id: NotificationId = row.get(0)?;
            let count: i64 = row.get(1)?;
            counts.insert(owner_id, to_count(count)?);
        }
        Ok(counts)
    }

    fn notifier_counts_by_owner(
        &self,
        members: &NotificationQuery,
    ) -> RepoResult<HashMap<(NotificationId, String), u64>> {
        let stmt = sql::notifier_counts_by_owner(members);
        let mut prepared = self.conn.prepare(&stmt.sql)?;
        let mut rows = prepared.query(params_from_iter(stmt.binds))?;
        let mut counts = HashMap::new();
        while let Some(row) = rows.next()? {
            let owner_id: NotificationId = row.get(0)?;
            let notifier_type: String = row.get(1)?;
            let count: i64 = row.get(2)?;
            counts.insert((owner_id, notifier_type), to_count(count)?);
        }
        Ok(counts)
    }

    fn delete_groups_created_before(&self, cutoff_ms: i64) -> RepoResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM notifications
             WHERE group_owner_id IS NULL
               AND created_at <= ?1
               AND NOT EXISTS (
                   SELECT 1
                   FROM notifications m
                   WHERE m.group_owner_id = notifications.id
                     AND m.created_at > ?1
               );",
            [cutoff_ms],
        )?;
        Ok(deleted)
    }
}

fn find_group_candidate(
    conn: &Connection,
    input: &NewNotification,
    policy: &dyn GroupingPolicy,
) -> RepoResult<Option<Notification>> {
    let (Some(target), Some(group)) = (input.target.as_ref(), input.group.as_ref()) else {
        return Ok(None);
    };
    let same_key = policy.candidate_scope().same_key;

    let mut stmt = conn.prepare(&format!(
        "{NOTIFICATION_SELECT_SQL}
         WHERE target_type = ?1
           AND target_id = ?2
           AND group_type = ?3
           AND group_id = ?4
           AND group_owner_id IS NULL
           AND opened_at IS NULL
           AND (?5 = 0 OR key = ?6)
         ORDER BY created_at DESC, id DESC
         LIMIT 1;"
    ))?;
    let mut rows = stmt.query(params![
        target.entity_type(),
        target.entity_id(),
        group.entity_type(),
        group.entity_id(),
        i64::from(same_key),
        input.key.trim(),
    ])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_notification_row(row)?));
    }
    Ok(None)
}

fn load_notification(conn: &Connection, id: NotificationId) -> RepoResult<Option<Notification>> {
    let mut stmt = conn.prepare(&format!("{NOTIFICATION_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_notification_row(row)?));
    }
    Ok(None)
}

fn parse_notification_row(row: &Row<'_>) -> RepoResult<Notification> {
    let id: NotificationId = row.get("id")?;
    let target = parse_required_ref(row, "target_type", "target_id")?;
    let notifiable = parse_required_ref(row, "notifiable_type", "notifiable_id")?;
    let group = parse_optional_ref(row, "group_type", "group_id")?;
    let notifier = parse_optional_ref(row, "notifier_type", "notifier_id")?;

    let parameters_text: String = row.get("parameters")?;
    let parameters: Parameters = serde_json::from_str(&parameters_text).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid parameters json in notifications.parameters for id {id}: {err}"
        ))
    })?;

    let notification = Notification {
        id,
        target,
        notifiable,
        key: row.get("key")?,
        group_owner_id: row.get("group_owner_id")?,
        group,
        notifier,
        parameters,
        opened_at: row.get("opened_at")?,
        created_at: row.get("created_at")?,
    };
    notification.validate()?;
    Ok(notification)
}

fn parse_required_ref(
    row: &Row<'_>,
    type_column: &'static str,
    id_column: &'static str,
) -> RepoResult<EntityRef> {
    let entity_type: String = row.get(type_column)?;
    let entity_id: String = row.get(id_column)?;
    EntityRef::new(entity_type, entity_id).map_err(|err| {
        RepoError::InvalidData(format!(
            "invalid reference in notifications.{type_column}/{id_column}: {err}"
        ))
    })
}

fn parse_optional_ref(
    row: &Row<'_>,
    type_column: &'static str,
    id_column: &'static str,
) -> RepoResult<Option<EntityRef>> {
    let entity_type: Option<String> = row.get(type_column)?;
    let entity_id: Option<String> = row.get(id_column)?;
    match (entity_type, entity_id) {
        (None, None) => Ok(None),
        (Some(entity_type), Some(entity_id)) => EntityRef::new(entity_type, entity_id)
            .map(Some)
            .map_err(|err| {
                RepoError::InvalidData(format!(
                    "invalid reference in notifications.{type_column}/{id_column}: {err}"
                ))
            }),
        _ => Err(RepoError::InvalidData(format!(
            "half-set reference in notifications.{type_column}/{id_column}"
        ))),
    }
}

fn to_count(value: i64) -> RepoResult<u64> {
    u64::try_from(value).map_err(|_| RepoError::InvalidData(format!("negative count {value}")))
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "notifications")? {
        return Err(RepoError::MissingRequiredTable("notifications"));
    }
    for &column in REQUIRED_COLUMNS {
        if !table_has_column(conn, "notifications", column)? {
            return Err(RepoError::MissingRequiredColumn {
                table: "notifications",
                column,
            });
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
