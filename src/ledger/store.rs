use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;
use x402_chat_types::chain::ChecksummedAddress;

use crate::ledger::LedgerError;
use crate::ledger::model::{
    Comment, FeedItem, LikeDelta, LikeUpdate, Page, PopularPage, Thread, normalize_text,
};
use crate::pricing::UsageCounter;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS comments (
    id TEXT PRIMARY KEY,
    owner_address TEXT NOT NULL,
    from_address TEXT NOT NULL,
    text TEXT NOT NULL,
    parent_comment_id TEXT REFERENCES comments(id),
    likes_count INTEGER NOT NULL DEFAULT 0 CHECK (likes_count >= 0),
    created_at_ms INTEGER NOT NULL,
    updated_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS comments_owner_created
    ON comments(owner_address, created_at_ms);
CREATE INDEX IF NOT EXISTS comments_parent_created
    ON comments(parent_comment_id, created_at_ms);
CREATE INDEX IF NOT EXISTS comments_created
    ON comments(created_at_ms);
"#;

const COLUMNS: &str = "id, owner_address, from_address, text, parent_comment_id, likes_count, created_at_ms, updated_at_ms";

/// Durable store of comments and replies, backed by a pooled SQLite database.
///
/// All queries run on the blocking thread pool. Records that share a
/// creation timestamp are ordered by insertion.
#[derive(Clone)]
pub struct Ledger {
    pool: Pool<SqliteConnectionManager>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl Ledger {
    /// Opens (or creates) the database file at `path` and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(init_connection);
        let pool = Pool::builder().max_size(8).build(manager)?;
        Self::from_pool(pool)
    }

    /// A private in-memory database. The pool holds a single connection that
    /// never expires, so every query sees the same data.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: Pool<SqliteConnectionManager>) -> Result<Self, LedgerError> {
        let conn = pool.get()?;
        conn.execute_batch(SCHEMA)?;
        drop(conn);
        Ok(Self { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Connection) -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, LedgerError> {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }

    /// Appends a record. A reply is filed under its parent's wall whatever
    /// `owner` says; the parent must exist and must itself be top-level.
    #[instrument(skip_all, err, fields(owner = %owner, author = %author))]
    pub async fn insert(
        &self,
        owner: ChecksummedAddress,
        author: ChecksummedAddress,
        text: &str,
        parent: Option<Uuid>,
    ) -> Result<Comment, LedgerError> {
        let text = normalize_text(text).ok_or_else(|| {
            LedgerError::Validation("Comment text must be between 1 and 1000 characters".into())
        })?;
        self.with_conn(move |conn| insert_comment(conn, owner, author, text, parent))
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Comment, LedgerError> {
        self.with_conn(move |conn| {
            select_comment(conn, id)?.ok_or(LedgerError::NotFound("Comment"))
        })
        .await
    }

    /// Top-level records newest first, each with its replies oldest first.
    /// Without an `owner`, lists every wall.
    pub async fn list_top_level(
        &self,
        owner: Option<ChecksummedAddress>,
        page: Page,
    ) -> Result<Vec<Thread>, LedgerError> {
        self.with_conn(move |conn| {
            let owner = owner.map(|o| o.to_string());
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {COLUMNS} FROM comments
                 WHERE parent_comment_id IS NULL AND (?1 IS NULL OR owner_address = ?1)
                 ORDER BY created_at_ms DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let roots = stmt
                .query_map(params![owner, page.limit, page.offset], comment_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            roots
                .into_iter()
                .map(|root| -> Result<Thread, LedgerError> {
                    let replies = select_replies(conn, root.id)?;
                    Ok(Thread { root, replies })
                })
                .collect()
        })
        .await
    }

    /// The thread containing `id`: the record itself if top-level, its
    /// parent otherwise.
    pub async fn thread_root(&self, id: Uuid) -> Result<Thread, LedgerError> {
        self.with_conn(move |conn| {
            let comment = select_comment(conn, id)?.ok_or(LedgerError::NotFound("Comment"))?;
            let root = match comment.parent_comment_id {
                None => comment,
                Some(parent_id) => select_comment(conn, parent_id)?
                    .ok_or_else(|| LedgerError::Corrupt(format!("reply {id} has no parent")))?,
            };
            let replies = select_replies(conn, root.id)?;
            Ok(Thread { root, replies })
        })
        .await
    }

    /// Number of records filed under `owner`, replies included.
    pub async fn count_for_subject(&self, owner: ChecksummedAddress) -> Result<u64, LedgerError> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM comments WHERE owner_address = ?1",
                params![owner.to_string()],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    /// Atomically moves the like counter by one, never below zero.
    #[instrument(skip(self), err)]
    pub async fn toggle_like(&self, id: Uuid, delta: LikeDelta) -> Result<LikeUpdate, LedgerError> {
        self.with_conn(move |conn| {
            let updated = conn
                .query_row(
                    "UPDATE comments
                     SET likes_count = MAX(0, likes_count + ?2), updated_at_ms = ?3
                     WHERE id = ?1
                     RETURNING likes_count, owner_address",
                    params![id.to_string(), delta.as_i64(), now_ms()],
                    |row| {
                        let likes: i64 = row.get(0)?;
                        let owner = address_column(row, 1)?;
                        Ok(LikeUpdate {
                            likes_count: likes.max(0) as u64,
                            owner_address: owner,
                        })
                    },
                )
                .optional()?;
            updated.ok_or(LedgerError::NotFound("Comment"))
        })
        .await
    }

    /// The most recent records site-wide; replies carry their parent.
    pub async fn latest(&self, limit: u32) -> Result<Vec<FeedItem>, LedgerError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {COLUMNS} FROM comments
                 ORDER BY created_at_ms DESC, rowid DESC
                 LIMIT ?1"
            ))?;
            let comments = stmt
                .query_map(params![limit], comment_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            comments
                .into_iter()
                .map(|comment| -> Result<FeedItem, LedgerError> {
                    let parent = match comment.parent_comment_id {
                        Some(parent_id) => select_comment(conn, parent_id)?,
                        None => None,
                    };
                    Ok(FeedItem { comment, parent })
                })
                .collect()
        })
        .await
    }

    /// Walls with the most records, busiest first.
    pub async fn popular_pages(&self, limit: u32) -> Result<Vec<PopularPage>, LedgerError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT owner_address, COUNT(*) AS n, MAX(created_at_ms) AS latest
                 FROM comments
                 GROUP BY owner_address
                 ORDER BY n DESC, latest DESC
                 LIMIT ?1",
            )?;
            let pages = stmt
                .query_map(params![limit], |row| {
                    let count: i64 = row.get(1)?;
                    Ok(PopularPage {
                        owner_address: address_column(row, 0)?,
                        comment_count: count.max(0) as u64,
                        latest_comment_at: timestamp_column(row, 2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(pages)
        })
        .await
    }
}

impl UsageCounter for Ledger {
    type Error = LedgerError;

    async fn count_for_subject(&self, subject: &ChecksummedAddress) -> Result<u64, Self::Error> {
        Ledger::count_for_subject(self, *subject).await
    }
}

fn init_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;",
    )
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn insert_comment(
    conn: &mut Connection,
    owner: ChecksummedAddress,
    author: ChecksummedAddress,
    text: String,
    parent: Option<Uuid>,
) -> Result<Comment, LedgerError> {
    let tx = conn.transaction()?;
    let owner = match parent {
        None => owner,
        Some(parent_id) => {
            let parent_row = tx
                .query_row(
                    "SELECT owner_address, parent_comment_id FROM comments WHERE id = ?1",
                    params![parent_id.to_string()],
                    |row| {
                        let owner = address_column(row, 0)?;
                        let grandparent: Option<String> = row.get(1)?;
                        Ok((owner, grandparent))
                    },
                )
                .optional()?;
            match parent_row {
                None => return Err(LedgerError::NotFound("Parent comment")),
                Some((_, Some(_))) => {
                    return Err(LedgerError::Validation(
                        "Replies can only be made to top-level comments".into(),
                    ));
                }
                Some((parent_owner, None)) => parent_owner,
            }
        }
    };
    let now = now_ms();
    let created_at = millis_to_datetime(now)
        .ok_or_else(|| LedgerError::Corrupt(format!("clock reading {now} out of range")))?;
    let comment = Comment {
        id: Uuid::new_v4(),
        owner_address: owner,
        from_address: author,
        text,
        parent_comment_id: parent,
        likes_count: 0,
        created_at,
        updated_at: created_at,
    };
    tx.execute(
        &format!("INSERT INTO comments ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)"),
        params![
            comment.id.to_string(),
            comment.owner_address.to_string(),
            comment.from_address.to_string(),
            comment.text,
            comment.parent_comment_id.map(|p| p.to_string()),
            now,
        ],
    )?;
    tx.commit()?;
    Ok(comment)
}

fn select_comment(conn: &Connection, id: Uuid) -> Result<Option<Comment>, LedgerError> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {COLUMNS} FROM comments WHERE id = ?1"))?;
    Ok(stmt
        .query_row(params![id.to_string()], comment_from_row)
        .optional()?)
}

fn select_replies(conn: &Connection, parent: Uuid) -> Result<Vec<Comment>, LedgerError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {COLUMNS} FROM comments
         WHERE parent_comment_id = ?1
         ORDER BY created_at_ms ASC, rowid ASC"
    ))?;
    let replies = stmt
        .query_map(params![parent.to_string()], comment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(replies)
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let parent: Option<String> = row.get(4)?;
    let parent_comment_id = parent
        .map(|p| Uuid::parse_str(&p).map_err(|e| conversion_error(4, e)))
        .transpose()?;
    let likes: i64 = row.get(5)?;
    Ok(Comment {
        id: uuid_column(row, 0)?,
        owner_address: address_column(row, 1)?,
        from_address: address_column(row, 2)?,
        text: row.get(3)?,
        parent_comment_id,
        likes_count: likes.max(0) as u64,
        created_at: timestamp_column(row, 6)?,
        updated_at: timestamp_column(row, 7)?,
    })
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn address_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<ChecksummedAddress> {
    let raw: String = row.get(idx)?;
    raw.parse::<ChecksummedAddress>()
        .map_err(|e| conversion_error(idx, e))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    millis_to_datetime(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> ChecksummedAddress {
        ChecksummedAddress(alloy_primitives::Address::repeat_byte(byte))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let ledger = Ledger::in_memory().unwrap();
        let comment = ledger
            .insert(addr(0x11), addr(0x22), "  gm wallet  ", None)
            .await
            .unwrap();
        assert_eq!(comment.text, "gm wallet");
        assert_eq!(comment.likes_count, 0);
        assert!(!comment.is_reply());

        let stored = ledger.get(comment.id).await.unwrap();
        assert_eq!(stored, comment);
    }

    #[tokio::test]
    async fn test_insert_rejects_blank_and_long_text() {
        let ledger = Ledger::in_memory().unwrap();
        let err = ledger
            .insert(addr(0x11), addr(0x22), "   ", None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        let err = ledger
            .insert(addr(0x11), addr(0x22), &"x".repeat(1001), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(ledger.count_for_subject(addr(0x11)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reply_inherits_parent_owner() {
        let ledger = Ledger::in_memory().unwrap();
        let root = ledger
            .insert(addr(0x11), addr(0x22), "root", None)
            .await
            .unwrap();
        let reply = ledger
            .insert(addr(0x99), addr(0x33), "reply", Some(root.id))
            .await
            .unwrap();
        assert_eq!(reply.owner_address, addr(0x11));
        assert_eq!(reply.parent_comment_id, Some(root.id));
        assert_eq!(ledger.count_for_subject(addr(0x11)).await.unwrap(), 2);
        assert_eq!(ledger.count_for_subject(addr(0x99)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reply_to_missing_or_nested_parent() {
        let ledger = Ledger::in_memory().unwrap();
        let err = ledger
            .insert(addr(0x11), addr(0x22), "orphan", Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        let root = ledger
            .insert(addr(0x11), addr(0x22), "root", None)
            .await
            .unwrap();
        let reply = ledger
            .insert(addr(0x11), addr(0x33), "reply", Some(root.id))
            .await
            .unwrap();
        let err = ledger
            .insert(addr(0x11), addr(0x22), "nested", Some(reply.id))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(ledger.count_for_subject(addr(0x11)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_list_top_level_orders_and_pages() {
        let ledger = Ledger::in_memory().unwrap();
        let first = ledger
            .insert(addr(0x11), addr(0x22), "first", None)
            .await
            .unwrap();
        let second = ledger
            .insert(addr(0x11), addr(0x22), "second", None)
            .await
            .unwrap();
        ledger
            .insert(addr(0x44), addr(0x22), "elsewhere", None)
            .await
            .unwrap();
        let r1 = ledger
            .insert(addr(0x11), addr(0x33), "r1", Some(first.id))
            .await
            .unwrap();
        let r2 = ledger
            .insert(addr(0x11), addr(0x33), "r2", Some(first.id))
            .await
            .unwrap();

        let threads = ledger
            .list_top_level(Some(addr(0x11)), Page::default())
            .await
            .unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].root.id, second.id);
        assert_eq!(threads[1].root.id, first.id);
        let reply_ids: Vec<_> = threads[1].replies.iter().map(|c| c.id).collect();
        assert_eq!(reply_ids, vec![r1.id, r2.id]);

        let paged = ledger
            .list_top_level(Some(addr(0x11)), Page::new(Some(1), Some(1)))
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].root.id, first.id);

        let all = ledger.list_top_level(None, Page::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_thread_root_from_reply() {
        let ledger = Ledger::in_memory().unwrap();
        let root = ledger
            .insert(addr(0x11), addr(0x22), "root", None)
            .await
            .unwrap();
        let reply = ledger
            .insert(addr(0x11), addr(0x33), "reply", Some(root.id))
            .await
            .unwrap();
        let thread = ledger.thread_root(reply.id).await.unwrap();
        assert_eq!(thread.root.id, root.id);
        assert_eq!(thread.replies, vec![reply]);
        let err = ledger.thread_root(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_toggle_like_never_negative() {
        let ledger = Ledger::in_memory().unwrap();
        let comment = ledger
            .insert(addr(0x11), addr(0x22), "like me", None)
            .await
            .unwrap();
        let up = ledger
            .toggle_like(comment.id, LikeDelta::Increment)
            .await
            .unwrap();
        assert_eq!(up.likes_count, 1);
        assert_eq!(up.owner_address, addr(0x11));
        ledger
            .toggle_like(comment.id, LikeDelta::Decrement)
            .await
            .unwrap();
        let down = ledger
            .toggle_like(comment.id, LikeDelta::Decrement)
            .await
            .unwrap();
        assert_eq!(down.likes_count, 0);
        let err = ledger
            .toggle_like(Uuid::new_v4(), LikeDelta::Increment)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_latest_and_popular() {
        let ledger = Ledger::in_memory().unwrap();
        let root = ledger
            .insert(addr(0x11), addr(0x22), "a", None)
            .await
            .unwrap();
        ledger
            .insert(addr(0x11), addr(0x22), "b", None)
            .await
            .unwrap();
        ledger
            .insert(addr(0x44), addr(0x22), "c", None)
            .await
            .unwrap();
        let reply = ledger
            .insert(addr(0x11), addr(0x33), "d", Some(root.id))
            .await
            .unwrap();

        let feed = ledger.latest(2).await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].comment.id, reply.id);
        assert_eq!(feed[0].parent.as_ref().map(|p| p.id), Some(root.id));
        assert!(feed[1].parent.is_none());

        let popular = ledger.popular_pages(10).await.unwrap();
        assert_eq!(popular.len(), 2);
        assert_eq!(popular[0].owner_address, addr(0x11));
        assert_eq!(popular[0].comment_count, 3);
        assert_eq!(popular[1].comment_count, 1);
    }

    #[tokio::test]
    async fn test_file_backed_ledger_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.sqlite");
        let id = {
            let ledger = Ledger::open(&path).unwrap();
            ledger
                .insert(addr(0x11), addr(0x22), "durable", None)
                .await
                .unwrap()
                .id
        };
        let reopened = Ledger::open(&path).unwrap();
        assert_eq!(reopened.get(id).await.unwrap().text, "durable");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_likes_are_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("likes.sqlite")).unwrap();
        let comment = ledger
            .insert(addr(0x11), addr(0x22), "popular", None)
            .await
            .unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.toggle_like(comment.id, LikeDelta::Increment).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(ledger.get(comment.id).await.unwrap().likes_count, 50);

        let tasks: Vec<_> = (0..60)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.toggle_like(comment.id, LikeDelta::Decrement).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(ledger.get(comment.id).await.unwrap().likes_count, 0);
    }
}
