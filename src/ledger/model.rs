use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use x402_chat_types::chain::ChecksummedAddress;

/// Upper bound on comment length, in characters, after trimming.
pub const MAX_TEXT_CHARS: usize = 1000;

/// One ledger record: a post on `owner_address`'s wall, or a reply to one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub owner_address: ChecksummedAddress,
    pub from_address: ChecksummedAddress,
    pub text: String,
    pub parent_comment_id: Option<Uuid>,
    pub likes_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn is_reply(&self) -> bool {
        self.parent_comment_id.is_some()
    }
}

/// A thread root with its replies, oldest reply first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    #[serde(flatten)]
    pub root: Comment,
    pub replies: Vec<Comment>,
}

/// An entry of the site-wide feed; replies carry the record they answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    #[serde(flatten)]
    pub comment: Comment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<Comment>,
}

/// A wall ranked by how many records it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularPage {
    pub owner_address: ChecksummedAddress,
    pub comment_count: u64,
    pub latest_comment_at: DateTime<Utc>,
}

/// Direction of a like toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeDelta {
    Increment,
    Decrement,
}

impl LikeDelta {
    pub fn as_i64(self) -> i64 {
        match self {
            LikeDelta::Increment => 1,
            LikeDelta::Decrement => -1,
        }
    }
}

impl From<bool> for LikeDelta {
    fn from(increment: bool) -> Self {
        if increment {
            LikeDelta::Increment
        } else {
            LikeDelta::Decrement
        }
    }
}

/// Result of a like toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeUpdate {
    pub likes_count: u64,
    pub owner_address: ChecksummedAddress,
}

/// Paging window for wall listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub const DEFAULT_LIMIT: u32 = 30;
    pub const MAX_LIMIT: u32 = 100;

    /// Applies defaults and clamps `limit` to `1..=MAX_LIMIT`.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Trims `text` and checks it is between 1 and [`MAX_TEXT_CHARS`] characters.
pub fn normalize_text(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let chars = trimmed.chars().count();
    (1..=MAX_TEXT_CHARS)
        .contains(&chars)
        .then(|| trimmed.to_string())
}
