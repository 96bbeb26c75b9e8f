use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use crate::tree_path;

pub const FLAG_SUGGEST_REMOVAL: &str = "removal suggestion";
pub const FLAG_MODERATOR_DELETION: &str = "moderator deletion";
pub const FLAG_MODERATOR_APPROVAL: &str = "moderator approval";

pub const DEFAULT_FEED_LIMIT: usize = 40;

/// Engine-wide policy knobs, passed to the store constructor. Ambient module
/// state is deliberately avoided.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// When true, removed comments disappear from listings entirely; when
    /// false they are returned with their flags intact so the caller can
    /// render a tombstone.
    pub hide_removed: bool,
    /// How long after submission an author may still edit. `None` means
    /// forever.
    pub edit_window_secs: Option<i64>,
    /// Offset applied before taking the calendar date for the duplicate
    /// check, so a site pins its own day boundary.
    pub dedup_utc_offset_minutes: i32,
    /// Upper bound for the site-wide recent-comments feed.
    pub feed_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hide_removed: true,
            edit_window_secs: None,
            dedup_utc_offset_minutes: 0,
            feed_limit: DEFAULT_FEED_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCommentInput {
    pub content_type: String,
    pub object_pk: String,
    pub site_id: i64,
    pub user_id: Option<String>,
    pub body: String,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentRecord {
    pub id: i64,
    pub content_type: String,
    pub object_pk: String,
    pub site_id: i64,
    pub user_id: Option<String>,
    pub body: String,
    pub submit_time: i64,
    pub edit_time: i64,
    pub is_public: bool,
    pub is_removed: bool,
    pub parent_id: Option<i64>,
    pub path: String,
    pub leaf_id: Option<i64>,
}

impl CommentRecord {
    pub fn is_edited(&self) -> bool {
        self.submit_time != self.edit_time
    }

    pub fn depth(&self) -> usize {
        tree_path::depth(&self.path)
    }

    pub fn root_id(&self) -> Option<i64> {
        tree_path::root_id(&self.path)
    }

    pub fn ancestor_ids(&self) -> HashSet<i64> {
        tree_path::ancestor_ids(&self.path)
    }

    /// Plain-text rendering, suitable for notification emails.
    pub fn as_plain_text(&self, author_display: &str, url: Option<&str>) -> String {
        let when = DateTime::from_timestamp_millis(self.submit_time).unwrap_or(DateTime::UNIX_EPOCH);
        let mut text = format!("Posted by {author_display} at {when}\n\n{}", self.body);
        if let Some(url) = url {
            text.push_str("\n\n");
            text.push_str(url);
        }
        text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentFlagRecord {
    pub id: i64,
    pub user_id: String,
    pub comment_id: i64,
    pub flag: String,
    pub flag_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOutcome {
    Created,
    /// The (user, comment, kind) triple already exists; a benign no-op.
    AlreadyFlagged,
}

pub struct CommentStore {
    conn: Mutex<Connection>,
    config: EngineConfig,
}

impl CommentStore {
    pub fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open comments database {}", path.display()))?;
        Self::from_connection(conn, config)
    }

    pub fn open_in_memory(config: EngineConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: EngineConfig) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS comments (
                 id           INTEGER PRIMARY KEY AUTOINCREMENT,
                 content_type TEXT    NOT NULL,
                 object_pk    TEXT    NOT NULL,
                 site_id      INTEGER NOT NULL,
                 user_id      TEXT,
                 body         TEXT    NOT NULL,
                 submit_time  INTEGER NOT NULL,
                 edit_time    INTEGER NOT NULL,
                 is_public    INTEGER NOT NULL DEFAULT 1,
                 is_removed   INTEGER NOT NULL DEFAULT 0,
                 parent_id    INTEGER REFERENCES comments(id) ON DELETE CASCADE,
                 path         TEXT    NOT NULL DEFAULT '',
                 leaf_id      INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_comments_target
                 ON comments(content_type, object_pk);
             CREATE INDEX IF NOT EXISTS idx_comments_submit_time
                 ON comments(submit_time);
             CREATE TABLE IF NOT EXISTS comment_flags (
                 id         INTEGER PRIMARY KEY AUTOINCREMENT,
                 user_id    TEXT    NOT NULL,
                 comment_id INTEGER NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
                 flag       TEXT    NOT NULL,
                 flag_time  INTEGER NOT NULL,
                 UNIQUE (user_id, comment_id, flag)
             );
             CREATE INDEX IF NOT EXISTS idx_comment_flags_flag
                 ON comment_flags(flag);",
        )
        .context("failed to initialize comments schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Insert a comment, assigning its materialized path and updating the
    /// parent's leaf pointer in the same transaction. If an identical
    /// submission (same target, author and body) already exists on the same
    /// calendar date, the existing row is returned instead and the second
    /// element is true.
    pub fn create(&self, input: NewCommentInput) -> Result<(CommentRecord, bool)> {
        self.create_at(input, now_ms())
    }

    fn create_at(&self, input: NewCommentInput, now: i64) -> Result<(CommentRecord, bool)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to begin create transaction")?;

        if let Some(existing) =
            find_duplicate(&tx, &input, now, self.config.dedup_utc_offset_minutes)?
        {
            tx.commit().context("failed to commit dedup lookup")?;
            return Ok((existing, true));
        }

        let parent = match input.parent_id {
            Some(parent_id) => Some(
                get_in_tx(&tx, parent_id)?
                    .with_context(|| format!("parent comment {parent_id} not found"))?,
            ),
            None => None,
        };
        if let Some(parent) = &parent {
            if parent.content_type != input.content_type || parent.object_pk != input.object_pk {
                anyhow::bail!(
                    "parent comment {} belongs to a different content object",
                    parent.id
                );
            }
        }

        tx.execute(
            "INSERT INTO comments
                 (content_type, object_pk, site_id, user_id, body,
                  submit_time, edit_time, is_public, is_removed, parent_id, path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 1, 0, ?7, '')",
            params![
                input.content_type,
                input.object_pk,
                input.site_id,
                input.user_id,
                input.body,
                now,
                input.parent_id,
            ],
        )
        .context("failed to insert comment")?;
        let id = tx.last_insert_rowid();

        // Two-phase write: the path needs the id the insert just assigned.
        let path = tree_path::child_path(parent.as_ref().map(|p| p.path.as_str()), id);
        tx.execute("UPDATE comments SET path = ?1 WHERE id = ?2", params![path, id])
            .context("failed to set comment path")?;

        if let Some(parent) = &parent {
            // Guarded so that concurrent sibling inserts converge on the most
            // recently submitted child regardless of commit order.
            tx.execute(
                "UPDATE comments SET leaf_id = ?1
                 WHERE id = ?2
                   AND (leaf_id IS NULL
                        OR ?3 >= (SELECT child.submit_time FROM comments AS child
                                  WHERE child.id = comments.leaf_id))",
                params![id, parent.id, now],
            )
            .context("failed to update parent leaf pointer")?;
        }

        let record = get_in_tx(&tx, id)?.context("comment vanished inside its own transaction")?;
        tx.commit().context("failed to commit comment create")?;
        Ok((record, false))
    }

    pub fn get(&self, id: i64) -> Result<Option<CommentRecord>> {
        let conn = self.conn.lock();
        conn.query_row(&select_sql("WHERE id = ?1"), [id], row_to_comment)
            .optional()
            .context("failed to fetch comment")
    }

    /// Thread listing for one content object, ordered parent-before-child
    /// (numeric path order, submit time as tiebreak). Non-public comments are
    /// always excluded; removed ones follow the `hide_removed` policy.
    pub fn list_for_target(&self, content_type: &str, object_pk: &str) -> Result<Vec<CommentRecord>> {
        let sql = if self.config.hide_removed {
            select_sql("WHERE content_type = ?1 AND object_pk = ?2 AND is_public = 1 AND is_removed = 0")
        } else {
            select_sql("WHERE content_type = ?1 AND object_pk = ?2 AND is_public = 1")
        };
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).context("failed to prepare listing query")?;
        let mut rows = stmt
            .query_map(params![content_type, object_pk], row_to_comment)
            .context("failed to list comments")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read comment rows")?;
        rows.sort_by(|left, right| {
            tree_path::compare_paths(&left.path, &right.path)
                .then(left.submit_time.cmp(&right.submit_time))
        });
        Ok(rows)
    }

    /// Most recent public comments across a site, newest first, bounded by
    /// the configured feed limit.
    pub fn recent_public(&self, site_id: i64, limit: Option<usize>) -> Result<Vec<CommentRecord>> {
        let limit = limit.unwrap_or(self.config.feed_limit).min(self.config.feed_limit);
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&select_sql(
                "WHERE site_id = ?1 AND is_public = 1 AND is_removed = 0
                 ORDER BY submit_time DESC, id DESC LIMIT ?2",
            ))
            .context("failed to prepare feed query")?;
        let rows = stmt
            .query_map(params![site_id, limit as i64], row_to_comment)
            .context("failed to query recent comments")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read recent comment rows")?;
        Ok(rows)
    }

    /// Editability: the author, and only the author, within the configured
    /// window (unlimited by default).
    pub fn is_editable_by(&self, comment: &CommentRecord, user_id: &str) -> bool {
        if comment.user_id.as_deref() != Some(user_id) {
            return false;
        }
        match self.config.edit_window_secs {
            Some(window) => now_ms() - comment.submit_time <= window * 1000,
            None => true,
        }
    }

    pub fn update_body(&self, id: i64, body: &str) -> Result<Option<CommentRecord>> {
        let body = body.trim();
        if body.is_empty() {
            anyhow::bail!("comment body cannot be empty");
        }
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE comments SET body = ?1, edit_time = ?2 WHERE id = ?3",
                params![body, now_ms(), id],
            )
            .context("failed to update comment body")?;
        if changed == 0 {
            return Ok(None);
        }
        conn.query_row(&select_sql("WHERE id = ?1"), [id], row_to_comment)
            .optional()
            .context("failed to reload edited comment")
    }

    pub fn set_removed(&self, id: i64, removed: bool) -> Result<Option<CommentRecord>> {
        self.set_mod_field(id, "is_removed", removed)
    }

    pub fn set_public(&self, id: i64, public: bool) -> Result<Option<CommentRecord>> {
        self.set_mod_field(id, "is_public", public)
    }

    fn set_mod_field(&self, id: i64, column: &str, value: bool) -> Result<Option<CommentRecord>> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                &format!("UPDATE comments SET {column} = ?1, edit_time = ?2 WHERE id = ?3"),
                params![value, now_ms(), id],
            )
            .with_context(|| format!("failed to update {column}"))?;
        if changed == 0 {
            return Ok(None);
        }
        conn.query_row(&select_sql("WHERE id = ?1"), [id], row_to_comment)
            .optional()
            .context("failed to reload moderated comment")
    }

    /// Hard delete: removes the comment and every descendant (matched by path
    /// prefix), then re-derives the parent's leaf pointer, all in one
    /// transaction. Returns the number of comments deleted.
    pub fn delete(&self, id: i64) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to begin delete transaction")?;

        let Some(comment) = get_in_tx(&tx, id)? else {
            return Ok(0);
        };
        if !tree_path::is_valid_path(&comment.path) {
            anyhow::bail!("comment {} has a corrupt path {:?}", comment.id, comment.path);
        }

        let deleted = tx
            .execute(
                "DELETE FROM comments WHERE path = ?1 OR path LIKE ?2",
                params![comment.path, format!("{}/%", comment.path)],
            )
            .context("failed to delete comment subtree")?;

        if let Some(parent_id) = comment.parent_id {
            let survivor: Option<i64> = tx
                .query_row(
                    "SELECT id FROM comments WHERE parent_id = ?1
                     ORDER BY submit_time DESC, id DESC LIMIT 1",
                    [parent_id],
                    |row| row.get(0),
                )
                .optional()
                .context("failed to find surviving sibling")?;
            tx.execute(
                "UPDATE comments SET leaf_id = ?1 WHERE id = ?2",
                params![survivor, parent_id],
            )
            .context("failed to re-derive parent leaf pointer")?;
        }

        tx.commit().context("failed to commit comment delete")?;
        Ok(deleted)
    }

    /// Idempotent-by-uniqueness flag insert; a duplicate (user, comment,
    /// kind) is reported as `AlreadyFlagged`, not an error.
    pub fn flag(&self, user_id: &str, comment_id: i64, kind: &str) -> Result<FlagOutcome> {
        let conn = self.conn.lock();
        let exists: Option<i64> = conn
            .query_row("SELECT id FROM comments WHERE id = ?1", [comment_id], |row| row.get(0))
            .optional()
            .context("failed to check flag target")?;
        if exists.is_none() {
            anyhow::bail!("comment {comment_id} not found");
        }
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO comment_flags (user_id, comment_id, flag, flag_time)
                 VALUES (?1, ?2, ?3, ?4)",
                params![user_id, comment_id, kind, now_ms()],
            )
            .context("failed to insert comment flag")?;
        Ok(if inserted == 0 {
            FlagOutcome::AlreadyFlagged
        } else {
            FlagOutcome::Created
        })
    }

    pub fn list_flags(&self, comment_id: i64) -> Result<Vec<CommentFlagRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, comment_id, flag, flag_time
                 FROM comment_flags WHERE comment_id = ?1 ORDER BY flag_time, id",
            )
            .context("failed to prepare flag query")?;
        let rows = stmt
            .query_map([comment_id], |row| {
                Ok(CommentFlagRecord {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    comment_id: row.get(2)?,
                    flag: row.get(3)?,
                    flag_time: row.get(4)?,
                })
            })
            .context("failed to list comment flags")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read flag rows")?;
        Ok(rows)
    }
}

const COMMENT_COLUMNS: &str = "id, content_type, object_pk, site_id, user_id, body, \
                               submit_time, edit_time, is_public, is_removed, parent_id, \
                               path, leaf_id";

fn select_sql(tail: &str) -> String {
    format!("SELECT {COMMENT_COLUMNS} FROM comments {tail}")
}

fn row_to_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommentRecord> {
    Ok(CommentRecord {
        id: row.get(0)?,
        content_type: row.get(1)?,
        object_pk: row.get(2)?,
        site_id: row.get(3)?,
        user_id: row.get(4)?,
        body: row.get(5)?,
        submit_time: row.get(6)?,
        edit_time: row.get(7)?,
        is_public: row.get(8)?,
        is_removed: row.get(9)?,
        parent_id: row.get(10)?,
        path: row.get(11)?,
        leaf_id: row.get(12)?,
    })
}

fn get_in_tx(tx: &Transaction<'_>, id: i64) -> Result<Option<CommentRecord>> {
    tx.query_row(&select_sql("WHERE id = ?1"), [id], row_to_comment)
        .optional()
        .context("failed to fetch comment inside transaction")
}

/// Duplicate = same target, same author, same body, submitted on the same
/// calendar date (not the same instant). Candidates are narrowed in SQL and
/// the date comparison happens here.
fn find_duplicate(
    tx: &Transaction<'_>,
    input: &NewCommentInput,
    now: i64,
    offset_minutes: i32,
) -> Result<Option<CommentRecord>> {
    let mut stmt = tx
        .prepare(&select_sql(
            "WHERE content_type = ?1 AND object_pk = ?2 AND body = ?3 AND user_id IS ?4",
        ))
        .context("failed to prepare duplicate query")?;
    let candidates = stmt
        .query_map(
            params![input.content_type, input.object_pk, input.body, input.user_id],
            row_to_comment,
        )
        .context("failed to query duplicates")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to read duplicate rows")?;

    let today = calendar_date(now, offset_minutes);
    Ok(candidates
        .into_iter()
        .find(|candidate| calendar_date(candidate.submit_time, offset_minutes) == today))
}

fn calendar_date(ts_ms: i64, offset_minutes: i32) -> chrono::NaiveDate {
    let offset = FixedOffset::east_opt(offset_minutes * 60)
        .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is always valid"));
    DateTime::from_timestamp_millis(ts_ms)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .with_timezone(&offset)
        .date_naive()
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
