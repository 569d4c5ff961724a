//! SQLite datastore for hearth.
//!
//! Owns the schema and row-level CRUD for every entity: auth identities and
//! sessions, profiles and roles, conversations, messages, follow and
//! close-friend edges, ephemeral content, posts, notifications, and object
//! metadata. Authorization is not decided here; callers go through
//! [`crate::policy`] first.

use std::path::{Path, PathBuf};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
}

// ---------------------------------------------------------------------------
// Enumerations stored as text
// ---------------------------------------------------------------------------

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                $name::parse(s).ok_or_else(|| {
                    FromSqlError::Other(
                        format!("unknown {} value: {s}", stringify!($name)).into(),
                    )
                })
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

text_enum!(MessageKind {
    Text => "text",
    Image => "image",
    File => "file",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeKind {
    Blue,
    Red,
    Gold,
}

text_enum!(BadgeKind {
    Blue => "blue",
    Red => "red",
    Gold => "gold",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Story,
    Note,
}

text_enum!(ContentKind {
    Story => "story",
    Note => "note",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    StoryLike,
    NoteLike,
}

text_enum!(NotificationKind {
    Like => "like",
    Comment => "comment",
    Follow => "follow",
    StoryLike => "story_like",
    NoteLike => "note_like",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

text_enum!(Role {
    Admin => "admin",
    User => "user",
});

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Raw authentication identity. Distinct from the [`Profile`] it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUserRow {
    pub id: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub token: String,
    pub user_id: String,
    /// Profile an admin is currently viewing as, if any.
    pub impersonating_id: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub is_private: bool,
    pub last_seen_at: Option<u64>,
    pub is_verified: bool,
    pub badge_kind: Option<BadgeKind>,
    pub badge_label: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Profile {
    pub fn new(id: &str, username: &str, now: u64) -> Self {
        Self {
            id: id.to_string(),
            username: username.to_string(),
            display_name: None,
            avatar_url: None,
            bio: None,
            is_private: false,
            last_seen_at: None,
            is_verified: false,
            badge_kind: None,
            badge_label: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Profile fields embedded in join results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSummary {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_verified: bool,
    pub badge_kind: Option<BadgeKind>,
}

impl From<&Profile> for ActorSummary {
    fn from(p: &Profile) -> Self {
        Self {
            id: p.id.clone(),
            username: p.username.clone(),
            display_name: p.display_name.clone(),
            avatar_url: p.avatar_url.clone(),
            is_verified: p.is_verified,
            badge_kind: p.badge_kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRow {
    pub id: String,
    pub created_at: u64,
    /// Last activity; drives list ordering only.
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRow {
    pub conversation_id: String,
    pub profile_id: String,
    pub joined_at: u64,
    pub last_read_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub is_read: bool,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemeralContent {
    pub id: String,
    pub author_id: String,
    pub kind: ContentKind,
    /// Note text, or story caption.
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub close_friends_only: bool,
    pub created_at: u64,
    pub expires_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub caption: Option<String>,
    pub media_url: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: i64,
    pub recipient_id: String,
    pub actor_id: String,
    pub kind: NotificationKind,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub message: Option<String>,
    pub is_read: bool,
    pub created_at: u64,
}

/// Notification about to be written alongside a primary row.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: String,
    pub actor_id: String,
    pub kind: NotificationKind,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub message: Option<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRow {
    pub bucket: String,
    pub path: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub updated_at: u64,
}

/// One row of "who viewed my story".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerRow {
    pub viewer: ActorSummary,
    pub viewed_at: u64,
}

// ---------------------------------------------------------------------------
// Column lists and row mappers
// ---------------------------------------------------------------------------

const PROFILE_COLUMNS: &str = "id, username, display_name, avatar_url, bio, is_private,
     last_seen_at, is_verified, badge_kind, badge_label, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, kind, content, file_url, file_name, is_read, created_at";

const EPHEMERAL_COLUMNS: &str = "id, author_id, kind, text, media_url, media_type,
     close_friends_only, created_at, expires_at";

const POST_COLUMNS: &str = "id, author_id, caption, media_url, created_at";

const NOTIFICATION_COLUMNS: &str =
    "id, recipient_id, actor_id, kind, entity_type, entity_id, message, is_read, created_at";

fn get_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    Ok(row.get::<_, i64>(idx)? as u64)
}

fn get_opt_u64(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u64>> {
    Ok(row.get::<_, Option<i64>>(idx)?.map(|t| t as u64))
}

fn get_bool(row: &Row<'_>, idx: usize) -> rusqlite::Result<bool> {
    Ok(row.get::<_, i32>(idx)? != 0)
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<Profile> {
    Ok(Profile {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        bio: row.get(4)?,
        is_private: get_bool(row, 5)?,
        last_seen_at: get_opt_u64(row, 6)?,
        is_verified: get_bool(row, 7)?,
        badge_kind: row.get(8)?,
        badge_label: row.get(9)?,
        created_at: get_u64(row, 10)?,
        updated_at: get_u64(row, 11)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        kind: row.get(3)?,
        content: row.get(4)?,
        file_url: row.get(5)?,
        file_name: row.get(6)?,
        is_read: get_bool(row, 7)?,
        created_at: get_u64(row, 8)?,
    })
}

fn ephemeral_from_row(row: &Row<'_>) -> rusqlite::Result<EphemeralContent> {
    Ok(EphemeralContent {
        id: row.get(0)?,
        author_id: row.get(1)?,
        kind: row.get(2)?,
        text: row.get(3)?,
        media_url: row.get(4)?,
        media_type: row.get(5)?,
        close_friends_only: get_bool(row, 6)?,
        created_at: get_u64(row, 7)?,
        expires_at: get_u64(row, 8)?,
    })
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        author_id: row.get(1)?,
        caption: row.get(2)?,
        media_url: row.get(3)?,
        created_at: get_u64(row, 4)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        actor_id: row.get(2)?,
        kind: row.get(3)?,
        entity_type: row.get(4)?,
        entity_id: row.get(5)?,
        message: row.get(6)?,
        is_read: get_bool(row, 7)?,
        created_at: get_u64(row, 8)?,
    })
}

fn insert_notification_on(conn: &Connection, n: &NewNotification) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO notifications
         (recipient_id, actor_id, kind, entity_type, entity_id, message, is_read, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![
            n.recipient_id,
            n.actor_id,
            n.kind,
            n.entity_type,
            n.entity_id,
            n.message,
            n.created_at as i64,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Join tables keyed by (entity, profile) that support toggling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinTable {
    EphemeralLikes,
    EphemeralViews,
    PostLikes,
    SavedPosts,
}

impl JoinTable {
    fn table(&self) -> &'static str {
        match self {
            JoinTable::EphemeralLikes => "ephemeral_likes",
            JoinTable::EphemeralViews => "ephemeral_views",
            JoinTable::PostLikes => "post_likes",
            JoinTable::SavedPosts => "saved_posts",
        }
    }
}

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

/// Main storage handle wrapping a SQLite connection.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create a database at the given path. Creates schema if needed.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let storage = Self { conn };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS auth_users (
                id              TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE,
                password_hash   TEXT NOT NULL,
                created_at      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                token               TEXT PRIMARY KEY,
                user_id             TEXT NOT NULL REFERENCES auth_users(id),
                impersonating_id    TEXT,
                created_at          INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS profiles (
                id              TEXT PRIMARY KEY REFERENCES auth_users(id),
                username        TEXT NOT NULL UNIQUE,
                display_name    TEXT,
                avatar_url      TEXT,
                bio             TEXT,
                is_private      INTEGER NOT NULL DEFAULT 0,
                last_seen_at    INTEGER,
                is_verified     INTEGER NOT NULL DEFAULT 0,
                badge_kind      TEXT,
                badge_label     TEXT,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL,
                CHECK (badge_kind IS NULL OR is_verified = 1)
            );

            -- Roles live apart from profiles so a profile self-update can
            -- never grant a role.
            CREATE TABLE IF NOT EXISTS user_roles (
                user_id     TEXT NOT NULL REFERENCES profiles(id),
                role        TEXT NOT NULL,
                PRIMARY KEY (user_id, role)
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversation_participants (
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                profile_id      TEXT NOT NULL REFERENCES profiles(id),
                joined_at       INTEGER NOT NULL,
                last_read_at    INTEGER,
                PRIMARY KEY (conversation_id, profile_id)
            );

            CREATE INDEX IF NOT EXISTS idx_participants_profile
                ON conversation_participants(profile_id);

            CREATE TABLE IF NOT EXISTS messages (
                id              TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id       TEXT NOT NULL REFERENCES profiles(id),
                kind            TEXT NOT NULL,
                content         TEXT,
                file_url        TEXT,
                file_name       TEXT,
                is_read         INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id, created_at);

            CREATE TABLE IF NOT EXISTS follows (
                follower_id     TEXT NOT NULL REFERENCES profiles(id),
                following_id    TEXT NOT NULL REFERENCES profiles(id),
                created_at      INTEGER NOT NULL,
                PRIMARY KEY (follower_id, following_id),
                CHECK (follower_id <> following_id)
            );

            CREATE INDEX IF NOT EXISTS idx_follows_following
                ON follows(following_id);

            CREATE TABLE IF NOT EXISTS close_friends (
                owner_id    TEXT NOT NULL REFERENCES profiles(id),
                friend_id   TEXT NOT NULL REFERENCES profiles(id),
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (owner_id, friend_id),
                CHECK (owner_id <> friend_id)
            );

            CREATE TABLE IF NOT EXISTS ephemeral_content (
                id                  TEXT PRIMARY KEY,
                author_id           TEXT NOT NULL REFERENCES profiles(id),
                kind                TEXT NOT NULL,
                text                TEXT,
                media_url           TEXT,
                media_type          TEXT,
                close_friends_only  INTEGER NOT NULL DEFAULT 0,
                created_at          INTEGER NOT NULL,
                expires_at          INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ephemeral_author
                ON ephemeral_content(author_id, kind, expires_at);

            CREATE TABLE IF NOT EXISTS ephemeral_views (
                entity_id   TEXT NOT NULL REFERENCES ephemeral_content(id),
                profile_id  TEXT NOT NULL REFERENCES profiles(id),
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (entity_id, profile_id)
            );

            CREATE TABLE IF NOT EXISTS ephemeral_likes (
                entity_id   TEXT NOT NULL REFERENCES ephemeral_content(id),
                profile_id  TEXT NOT NULL REFERENCES profiles(id),
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (entity_id, profile_id)
            );

            CREATE TABLE IF NOT EXISTS posts (
                id          TEXT PRIMARY KEY,
                author_id   TEXT NOT NULL REFERENCES profiles(id),
                caption     TEXT,
                media_url   TEXT,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_posts_author
                ON posts(author_id, created_at);

            CREATE TABLE IF NOT EXISTS post_likes (
                entity_id   TEXT NOT NULL REFERENCES posts(id),
                profile_id  TEXT NOT NULL REFERENCES profiles(id),
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (entity_id, profile_id)
            );

            CREATE TABLE IF NOT EXISTS saved_posts (
                entity_id   TEXT NOT NULL REFERENCES posts(id),
                profile_id  TEXT NOT NULL REFERENCES profiles(id),
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (entity_id, profile_id)
            );

            CREATE TABLE IF NOT EXISTS post_comments (
                id          TEXT PRIMARY KEY,
                post_id     TEXT NOT NULL REFERENCES posts(id),
                author_id   TEXT NOT NULL REFERENCES profiles(id),
                content     TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_comments_post
                ON post_comments(post_id, created_at);

            CREATE TABLE IF NOT EXISTS notifications (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id    TEXT NOT NULL REFERENCES profiles(id),
                actor_id        TEXT NOT NULL REFERENCES profiles(id),
                kind            TEXT NOT NULL,
                entity_type     TEXT,
                entity_id       TEXT,
                message         TEXT,
                is_read         INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_recipient
                ON notifications(recipient_id, is_read, created_at);

            CREATE TABLE IF NOT EXISTS objects (
                bucket          TEXT NOT NULL,
                path            TEXT NOT NULL,
                content_type    TEXT NOT NULL,
                size_bytes      INTEGER NOT NULL,
                sha256          TEXT NOT NULL,
                updated_at      INTEGER NOT NULL,
                PRIMARY KEY (bucket, path)
            );
            ",
        )?;
        Ok(())
    }

    fn collect<T>(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, StorageError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, map)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    fn count(&self, sql: &str, params: &[&dyn ToSql]) -> Result<u32, StorageError> {
        let count: i64 = self.conn.query_row(sql, params, |row| row.get(0))?;
        Ok(count as u32)
    }

    // -----------------------------------------------------------------------
    // Auth identities and sessions
    // -----------------------------------------------------------------------

    /// Insert an auth identity together with its profile. Fails with
    /// `AlreadyExists` if the login identifier or handle is taken.
    pub fn insert_auth_user_with_profile(
        &self,
        user: &AuthUserRow,
        profile: &Profile,
    ) -> Result<(), StorageError> {
        if self.get_auth_user_by_email(&user.email)?.is_some() {
            return Err(StorageError::AlreadyExists(format!("login {}", user.email)));
        }
        if self.get_profile_by_username(&profile.username)?.is_some() {
            return Err(StorageError::AlreadyExists(format!(
                "handle {}",
                profile.username
            )));
        }

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO auth_users (id, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.email, user.password_hash, user.created_at as i64],
        )?;
        insert_profile_on(&tx, profile)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_auth_user(&self, id: &str) -> Result<Option<AuthUserRow>, StorageError> {
        self.auth_user_where("id = ?1", id)
    }

    pub fn get_auth_user_by_email(&self, email: &str) -> Result<Option<AuthUserRow>, StorageError> {
        self.auth_user_where("email = ?1", email)
    }

    fn auth_user_where(&self, clause: &str, value: &str) -> Result<Option<AuthUserRow>, StorageError> {
        let sql = format!(
            "SELECT id, email, password_hash, created_at FROM auth_users WHERE {clause}"
        );
        let row = self
            .conn
            .query_row(&sql, params![value], |row| {
                Ok(AuthUserRow {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    password_hash: row.get(2)?,
                    created_at: get_u64(row, 3)?,
                })
            })
            .optional()?;
        Ok(row)
    }

    pub fn insert_session(&self, row: &SessionRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO sessions (token, user_id, impersonating_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                row.token,
                row.user_id,
                row.impersonating_id,
                row.created_at as i64
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, token: &str) -> Result<Option<SessionRow>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT token, user_id, impersonating_id, created_at
                 FROM sessions WHERE token = ?1",
                params![token],
                |row| {
                    Ok(SessionRow {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        impersonating_id: row.get(2)?,
                        created_at: get_u64(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn delete_session(&self, token: &str) -> Result<bool, StorageError> {
        let affected = self
            .conn
            .execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
        Ok(affected > 0)
    }

    pub fn set_session_impersonation(
        &self,
        token: &str,
        target: Option<&str>,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE sessions SET impersonating_id = ?1 WHERE token = ?2",
            params![target, token],
        )?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Profiles
    // -----------------------------------------------------------------------

    /// Create a profile unless one already exists for this identity.
    pub fn insert_profile_if_absent(&self, profile: &Profile) -> Result<bool, StorageError> {
        if self.get_profile(&profile.id)?.is_some() {
            return Ok(false);
        }
        insert_profile_on(&self.conn, profile)?;
        Ok(true)
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<Profile>, StorageError> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], profile_from_row)
            .optional()?)
    }

    pub fn get_profile_by_username(&self, username: &str) -> Result<Option<Profile>, StorageError> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE username = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![username], profile_from_row)
            .optional()?)
    }

    /// Handles starting with `prefix`, alphabetical.
    pub fn search_profiles(&self, prefix: &str, limit: u32) -> Result<Vec<Profile>, StorageError> {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("{escaped}%");
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles
             WHERE username LIKE ?1 ESCAPE '\\'
             ORDER BY username LIMIT ?2"
        );
        self.collect(&sql, &[&pattern, &(limit as i64)], profile_from_row)
    }

    pub fn list_profiles(&self, limit: u32, offset: u32) -> Result<Vec<Profile>, StorageError> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at, id LIMIT ?1 OFFSET ?2"
        );
        self.collect(&sql, &[&(limit as i64), &(offset as i64)], profile_from_row)
    }

    /// Update the fields an actor may change on their own profile.
    pub fn update_profile_fields(&self, profile: &Profile) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE profiles SET display_name = ?1, avatar_url = ?2, bio = ?3,
                    is_private = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                profile.display_name,
                profile.avatar_url,
                profile.bio,
                profile.is_private as i32,
                profile.updated_at as i64,
                profile.id,
            ],
        )?;
        Ok(affected > 0)
    }

    pub fn update_last_seen(&self, id: &str, at: u64) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE profiles SET last_seen_at = ?1 WHERE id = ?2",
            params![at as i64, id],
        )?;
        Ok(affected > 0)
    }

    pub fn set_badge(
        &self,
        id: &str,
        is_verified: bool,
        kind: Option<BadgeKind>,
        label: Option<&str>,
        at: u64,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE profiles SET is_verified = ?1, badge_kind = ?2, badge_label = ?3,
                    updated_at = ?4
             WHERE id = ?5",
            params![is_verified as i32, kind, label, at as i64, id],
        )?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Roles
    // -----------------------------------------------------------------------

    pub fn grant_role(&self, user_id: &str, role: Role) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
            params![user_id, role],
        )?;
        Ok(affected > 0)
    }

    pub fn revoke_role(&self, user_id: &str, role: Role) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM user_roles WHERE user_id = ?1 AND role = ?2",
            params![user_id, role],
        )?;
        Ok(affected > 0)
    }

    pub fn has_role(&self, user_id: &str, role: Role) -> Result<bool, StorageError> {
        let n = self.count(
            "SELECT COUNT(*) FROM user_roles WHERE user_id = ?1 AND role = ?2",
            &[&user_id, &role],
        )?;
        Ok(n > 0)
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Ids of every conversation `profile_id` participates in.
    pub fn list_conversation_ids_for(&self, profile_id: &str) -> Result<Vec<String>, StorageError> {
        self.collect(
            "SELECT conversation_id FROM conversation_participants
             WHERE profile_id = ?1 ORDER BY joined_at, conversation_id",
            &[&profile_id],
            |row| row.get(0),
        )
    }

    pub fn is_participant(&self, conversation_id: &str, profile_id: &str) -> Result<bool, StorageError> {
        let n = self.count(
            "SELECT COUNT(*) FROM conversation_participants
             WHERE conversation_id = ?1 AND profile_id = ?2",
            &[&conversation_id, &profile_id],
        )?;
        Ok(n > 0)
    }

    /// Insert a conversation and its participants atomically.
    pub fn insert_conversation_with_participants(
        &self,
        conversation: &ConversationRow,
        participants: &[ParticipantRow],
    ) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?3)",
            params![
                conversation.id,
                conversation.created_at as i64,
                conversation.updated_at as i64
            ],
        )?;
        for p in participants {
            tx.execute(
                "INSERT INTO conversation_participants
                 (conversation_id, profile_id, joined_at, last_read_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    p.conversation_id,
                    p.profile_id,
                    p.joined_at as i64,
                    p.last_read_at.map(|t| t as i64)
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationRow>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, created_at, updated_at FROM conversations WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        created_at: get_u64(row, 1)?,
                        updated_at: get_u64(row, 2)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn touch_conversation(&self, id: &str, at: u64) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            params![at as i64, id],
        )?;
        Ok(affected > 0)
    }

    /// Conversations of `profile_id`, most recently active first, ties by id.
    pub fn list_conversations_for(&self, profile_id: &str) -> Result<Vec<ConversationRow>, StorageError> {
        self.collect(
            "SELECT c.id, c.created_at, c.updated_at
             FROM conversations c
             JOIN conversation_participants p ON p.conversation_id = c.id
             WHERE p.profile_id = ?1
             ORDER BY c.updated_at DESC, c.id ASC",
            &[&profile_id],
            |row| {
                Ok(ConversationRow {
                    id: row.get(0)?,
                    created_at: get_u64(row, 1)?,
                    updated_at: get_u64(row, 2)?,
                })
            },
        )
    }

    pub fn list_participants(&self, conversation_id: &str) -> Result<Vec<ParticipantRow>, StorageError> {
        self.collect(
            "SELECT conversation_id, profile_id, joined_at, last_read_at
             FROM conversation_participants
             WHERE conversation_id = ?1 ORDER BY joined_at, profile_id",
            &[&conversation_id],
            |row| {
                Ok(ParticipantRow {
                    conversation_id: row.get(0)?,
                    profile_id: row.get(1)?,
                    joined_at: get_u64(row, 2)?,
                    last_read_at: get_opt_u64(row, 3)?,
                })
            },
        )
    }

    /// Advance the read watermark. Never moves it backwards.
    pub fn advance_last_read(
        &self,
        conversation_id: &str,
        profile_id: &str,
        at: u64,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE conversation_participants SET last_read_at = ?1
             WHERE conversation_id = ?2 AND profile_id = ?3
               AND (last_read_at IS NULL OR last_read_at < ?1)",
            params![at as i64, conversation_id, profile_id],
        )?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub fn insert_message(&self, m: &Message) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO messages
             (id, conversation_id, sender_id, kind, content, file_url, file_name,
              is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                m.id,
                m.conversation_id,
                m.sender_id,
                m.kind,
                m.content,
                m.file_url,
                m.file_name,
                m.is_read as i32,
                m.created_at as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>, StorageError> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], message_from_row)
            .optional()?)
    }

    /// Messages in a conversation, oldest first, insertion order on ties.
    pub fn list_messages(&self, conversation_id: &str, limit: u32) -> Result<Vec<Message>, StorageError> {
        // Take the newest `limit`, then flip back to chronological order.
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM (
                 SELECT {MESSAGE_COLUMNS}, rowid AS seq FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at DESC, seq DESC LIMIT ?2
             ) ORDER BY created_at ASC, seq ASC"
        );
        self.collect(&sql, &[&conversation_id, &(limit as i64)], message_from_row)
    }

    pub fn last_message(&self, conversation_id: &str) -> Result<Option<Message>, StorageError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![conversation_id], message_from_row)
            .optional()?)
    }

    /// Flip `is_read` for the listed messages not sent by `reader`, limited
    /// to conversations `reader` participates in. Returns rows changed.
    pub fn mark_messages_read(&self, ids: &[String], reader: &str) -> Result<u32, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut changed = 0;
        for id in ids {
            changed += tx.execute(
                "UPDATE messages SET is_read = 1
                 WHERE id = ?1 AND sender_id <> ?2 AND is_read = 0
                   AND conversation_id IN (
                       SELECT conversation_id FROM conversation_participants
                       WHERE profile_id = ?2)",
                params![id, reader],
            )?;
        }
        tx.commit()?;
        Ok(changed as u32)
    }

    pub fn mark_conversation_read(&self, conversation_id: &str, reader: &str) -> Result<u32, StorageError> {
        let affected = self.conn.execute(
            "UPDATE messages SET is_read = 1
             WHERE conversation_id = ?1 AND sender_id <> ?2 AND is_read = 0",
            params![conversation_id, reader],
        )?;
        Ok(affected as u32)
    }

    pub fn count_unread(&self, conversation_id: &str, viewer: &str) -> Result<u32, StorageError> {
        self.count(
            "SELECT COUNT(*) FROM messages
             WHERE conversation_id = ?1 AND sender_id <> ?2 AND is_read = 0",
            &[&conversation_id, &viewer],
        )
    }

    pub fn count_unread_total(&self, viewer: &str) -> Result<u32, StorageError> {
        self.count(
            "SELECT COUNT(*) FROM messages m
             JOIN conversation_participants p
               ON p.conversation_id = m.conversation_id AND p.profile_id = ?1
             WHERE m.sender_id <> ?1 AND m.is_read = 0",
            &[&viewer],
        )
    }

    // -----------------------------------------------------------------------
    // Follows and close friends
    // -----------------------------------------------------------------------

    /// Insert a follow edge and, only when the edge is new, its notification.
    pub fn insert_follow(
        &self,
        follower: &str,
        following: &str,
        at: u64,
        notify: Option<&NewNotification>,
    ) -> Result<bool, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO follows (follower_id, following_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![follower, following, at as i64],
        )? > 0;
        if inserted {
            if let Some(n) = notify {
                insert_notification_on(&tx, n)?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn delete_follow(&self, follower: &str, following: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM follows WHERE follower_id = ?1 AND following_id = ?2",
            params![follower, following],
        )?;
        Ok(affected > 0)
    }

    pub fn is_following(&self, follower: &str, following: &str) -> Result<bool, StorageError> {
        let n = self.count(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?1 AND following_id = ?2",
            &[&follower, &following],
        )?;
        Ok(n > 0)
    }

    pub fn list_following(&self, profile_id: &str) -> Result<Vec<Profile>, StorageError> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id IN (
                 SELECT following_id FROM follows WHERE follower_id = ?1)
             ORDER BY username"
        );
        self.collect(&sql, &[&profile_id], profile_from_row)
    }

    pub fn list_followers(&self, profile_id: &str) -> Result<Vec<Profile>, StorageError> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id IN (
                 SELECT follower_id FROM follows WHERE following_id = ?1)
             ORDER BY username"
        );
        self.collect(&sql, &[&profile_id], profile_from_row)
    }

    pub fn count_followers(&self, profile_id: &str) -> Result<u32, StorageError> {
        self.count(
            "SELECT COUNT(*) FROM follows WHERE following_id = ?1",
            &[&profile_id],
        )
    }

    pub fn count_following(&self, profile_id: &str) -> Result<u32, StorageError> {
        self.count(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ?1",
            &[&profile_id],
        )
    }

    pub fn insert_close_friend(&self, owner: &str, friend: &str, at: u64) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO close_friends (owner_id, friend_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![owner, friend, at as i64],
        )?;
        Ok(affected > 0)
    }

    pub fn delete_close_friend(&self, owner: &str, friend: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM close_friends WHERE owner_id = ?1 AND friend_id = ?2",
            params![owner, friend],
        )?;
        Ok(affected > 0)
    }

    pub fn is_close_friend(&self, owner: &str, friend: &str) -> Result<bool, StorageError> {
        let n = self.count(
            "SELECT COUNT(*) FROM close_friends WHERE owner_id = ?1 AND friend_id = ?2",
            &[&owner, &friend],
        )?;
        Ok(n > 0)
    }

    pub fn list_close_friends(&self, owner: &str) -> Result<Vec<Profile>, StorageError> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id IN (
                 SELECT friend_id FROM close_friends WHERE owner_id = ?1)
             ORDER BY username"
        );
        self.collect(&sql, &[&owner], profile_from_row)
    }

    // -----------------------------------------------------------------------
    // Ephemeral content (stories, notes)
    // -----------------------------------------------------------------------

    pub fn insert_ephemeral(&self, c: &EphemeralContent) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO ephemeral_content
             (id, author_id, kind, text, media_url, media_type, close_friends_only,
              created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                c.id,
                c.author_id,
                c.kind,
                c.text,
                c.media_url,
                c.media_type,
                c.close_friends_only as i32,
                c.created_at as i64,
                c.expires_at as i64,
            ],
        )?;
        Ok(())
    }

    /// Fetch a row regardless of expiry. Read paths must check `expires_at`.
    pub fn get_ephemeral(&self, id: &str) -> Result<Option<EphemeralContent>, StorageError> {
        let sql = format!("SELECT {EPHEMERAL_COLUMNS} FROM ephemeral_content WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], ephemeral_from_row)
            .optional()?)
    }

    pub fn delete_ephemeral(&self, id: &str) -> Result<bool, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM ephemeral_views WHERE entity_id = ?1", params![id])?;
        tx.execute("DELETE FROM ephemeral_likes WHERE entity_id = ?1", params![id])?;
        let affected = tx.execute("DELETE FROM ephemeral_content WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    /// Unexpired content of `kind` authored by `viewer` or by anyone `viewer`
    /// follows, oldest first. Privacy and close-friends filtering is the
    /// caller's job.
    pub fn list_ephemeral_candidates(
        &self,
        viewer: &str,
        kind: ContentKind,
        now: u64,
    ) -> Result<Vec<EphemeralContent>, StorageError> {
        let sql = format!(
            "SELECT {EPHEMERAL_COLUMNS} FROM ephemeral_content
             WHERE kind = ?2 AND expires_at > ?3
               AND (author_id = ?1 OR author_id IN (
                    SELECT following_id FROM follows WHERE follower_id = ?1))
             ORDER BY created_at ASC, rowid ASC"
        );
        self.collect(&sql, &[&viewer, &kind, &(now as i64)], ephemeral_from_row)
    }

    pub fn list_ephemeral_by_author(
        &self,
        author: &str,
        kind: ContentKind,
        now: u64,
    ) -> Result<Vec<EphemeralContent>, StorageError> {
        let sql = format!(
            "SELECT {EPHEMERAL_COLUMNS} FROM ephemeral_content
             WHERE author_id = ?1 AND kind = ?2 AND expires_at > ?3
             ORDER BY created_at ASC, rowid ASC"
        );
        self.collect(&sql, &[&author, &kind, &(now as i64)], ephemeral_from_row)
    }

    pub fn list_viewers(&self, content_id: &str) -> Result<Vec<ViewerRow>, StorageError> {
        let sql = format!(
            "SELECT {}, v.created_at FROM ephemeral_views v
             JOIN profiles p ON p.id = v.profile_id
             WHERE v.entity_id = ?1
             ORDER BY v.created_at DESC",
            PROFILE_COLUMNS
                .split(',')
                .map(|c| format!("p.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.collect(&sql, &[&content_id], |row| {
            let profile = profile_from_row(row)?;
            Ok(ViewerRow {
                viewer: ActorSummary::from(&profile),
                viewed_at: get_u64(row, 12)?,
            })
        })
    }

    // -----------------------------------------------------------------------
    // (entity, profile) join rows: views, likes, saves
    // -----------------------------------------------------------------------

    /// Insert if absent. Returns whether a row was added.
    pub fn insert_join(
        &self,
        table: JoinTable,
        entity_id: &str,
        profile_id: &str,
        at: u64,
    ) -> Result<bool, StorageError> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (entity_id, profile_id, created_at) VALUES (?1, ?2, ?3)",
            table.table()
        );
        let affected = self
            .conn
            .execute(&sql, params![entity_id, profile_id, at as i64])?;
        Ok(affected > 0)
    }

    pub fn has_join(&self, table: JoinTable, entity_id: &str, profile_id: &str) -> Result<bool, StorageError> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE entity_id = ?1 AND profile_id = ?2",
            table.table()
        );
        Ok(self.count(&sql, &[&entity_id, &profile_id])? > 0)
    }

    pub fn count_join(&self, table: JoinTable, entity_id: &str) -> Result<u32, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE entity_id = ?1", table.table());
        self.count(&sql, &[&entity_id])
    }

    /// Delete-if-present, else insert-if-absent, in one transaction. The
    /// notification (if any) is written only on the transition to present.
    /// Returns the new state.
    pub fn toggle_join(
        &self,
        table: JoinTable,
        entity_id: &str,
        profile_id: &str,
        at: u64,
        notify: Option<&NewNotification>,
    ) -> Result<bool, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(
            &format!(
                "DELETE FROM {} WHERE entity_id = ?1 AND profile_id = ?2",
                table.table()
            ),
            params![entity_id, profile_id],
        )? > 0;
        if !removed {
            tx.execute(
                &format!(
                    "INSERT INTO {} (entity_id, profile_id, created_at) VALUES (?1, ?2, ?3)",
                    table.table()
                ),
                params![entity_id, profile_id, at as i64],
            )?;
            if let Some(n) = notify {
                insert_notification_on(&tx, n)?;
            }
        }
        tx.commit()?;
        Ok(!removed)
    }

    // -----------------------------------------------------------------------
    // Posts and comments
    // -----------------------------------------------------------------------

    pub fn insert_post(&self, p: &Post) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO posts (id, author_id, caption, media_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![p.id, p.author_id, p.caption, p.media_url, p.created_at as i64],
        )?;
        Ok(())
    }

    pub fn get_post(&self, id: &str) -> Result<Option<Post>, StorageError> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], post_from_row)
            .optional()?)
    }

    pub fn delete_post(&self, id: &str) -> Result<bool, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM post_likes WHERE entity_id = ?1", params![id])?;
        tx.execute("DELETE FROM saved_posts WHERE entity_id = ?1", params![id])?;
        tx.execute("DELETE FROM post_comments WHERE post_id = ?1", params![id])?;
        let affected = tx.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(affected > 0)
    }

    pub fn list_posts_by_author(&self, author: &str, limit: u32) -> Result<Vec<Post>, StorageError> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE author_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        );
        self.collect(&sql, &[&author, &(limit as i64)], post_from_row)
    }

    /// Posts by `viewer` and by everyone `viewer` follows, newest first.
    pub fn list_feed(&self, viewer: &str, limit: u32) -> Result<Vec<Post>, StorageError> {
        let sql = format!(
            "SELECT {POST_COLUMNS} FROM posts
             WHERE author_id = ?1 OR author_id IN (
                 SELECT following_id FROM follows WHERE follower_id = ?1)
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        );
        self.collect(&sql, &[&viewer, &(limit as i64)], post_from_row)
    }

    pub fn list_saved_posts(&self, profile_id: &str) -> Result<Vec<Post>, StorageError> {
        let sql = format!(
            "SELECT {} FROM posts p JOIN saved_posts s ON s.entity_id = p.id
             WHERE s.profile_id = ?1 ORDER BY s.created_at DESC",
            POST_COLUMNS
                .split(',')
                .map(|c| format!("p.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.collect(&sql, &[&profile_id], post_from_row)
    }

    pub fn insert_comment(&self, c: &Comment, notify: Option<&NewNotification>) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO post_comments (id, post_id, author_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![c.id, c.post_id, c.author_id, c.content, c.created_at as i64],
        )?;
        if let Some(n) = notify {
            insert_notification_on(&tx, n)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_comments(&self, post_id: &str) -> Result<Vec<Comment>, StorageError> {
        self.collect(
            "SELECT id, post_id, author_id, content, created_at FROM post_comments
             WHERE post_id = ?1 ORDER BY created_at ASC, rowid ASC",
            &[&post_id],
            |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    post_id: row.get(1)?,
                    author_id: row.get(2)?,
                    content: row.get(3)?,
                    created_at: get_u64(row, 4)?,
                })
            },
        )
    }

    pub fn count_comments(&self, post_id: &str) -> Result<u32, StorageError> {
        self.count(
            "SELECT COUNT(*) FROM post_comments WHERE post_id = ?1",
            &[&post_id],
        )
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    pub fn insert_notification(&self, n: &NewNotification) -> Result<i64, StorageError> {
        Ok(insert_notification_on(&self.conn, n)?)
    }

    pub fn list_notifications(
        &self,
        recipient: &str,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<NotificationRow>, StorageError> {
        let filter = if unread_only { "AND is_read = 0" } else { "" };
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE recipient_id = ?1 {filter}
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        );
        self.collect(&sql, &[&recipient, &(limit as i64)], notification_from_row)
    }

    /// Mark one notification read, only if it belongs to `recipient`.
    pub fn mark_notification_read(&self, id: i64, recipient: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND recipient_id = ?2",
            params![id, recipient],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_all_notifications_read(&self, recipient: &str) -> Result<u32, StorageError> {
        let affected = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE recipient_id = ?1 AND is_read = 0",
            params![recipient],
        )?;
        Ok(affected as u32)
    }

    pub fn count_unread_notifications(&self, recipient: &str) -> Result<u32, StorageError> {
        self.count(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = ?1 AND is_read = 0",
            &[&recipient],
        )
    }

    // -----------------------------------------------------------------------
    // Object metadata
    // -----------------------------------------------------------------------

    pub fn upsert_object(&self, row: &ObjectRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO objects
             (bucket, path, content_type, size_bytes, sha256, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.bucket,
                row.path,
                row.content_type,
                row.size_bytes as i64,
                row.sha256,
                row.updated_at as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_object(&self, bucket: &str, path: &str) -> Result<Option<ObjectRow>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT bucket, path, content_type, size_bytes, sha256, updated_at
                 FROM objects WHERE bucket = ?1 AND path = ?2",
                params![bucket, path],
                |row| {
                    Ok(ObjectRow {
                        bucket: row.get(0)?,
                        path: row.get(1)?,
                        content_type: row.get(2)?,
                        size_bytes: get_u64(row, 3)?,
                        sha256: row.get(4)?,
                        updated_at: get_u64(row, 5)?,
                    })
                },
            )
            .optional()?)
    }
}

fn insert_profile_on(conn: &Connection, p: &Profile) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO profiles
         (id, username, display_name, avatar_url, bio, is_private, last_seen_at,
          is_verified, badge_kind, badge_label, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            p.id,
            p.username,
            p.display_name,
            p.avatar_url,
            p.bio,
            p.is_private as i32,
            p.last_seen_at.map(|t| t as i64),
            p.is_verified as i32,
            p.badge_kind,
            p.badge_label,
            p.created_at as i64,
            p.updated_at as i64,
        ],
    )
}

/// Path to the SQLite database inside a data directory.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("hearth.db")
}
