//! Data model (spec §3): Subscription, CommunityRescan, InitialPost,
//! PostRescan, UpdatedPost, ScrapedComment.
//!
//! Blob fields (`metadata`, `updated_metadata`, `comment_data`) are
//! opaque `serde_json::Value` — the core never interprets them beyond
//! the small set of control fields pulled out during collection
//! (post id, comment id/parent id, `createdAt`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, FromRow)]
pub struct Subscription {
    pub community_name: String,
    pub is_subscribed: bool,
    pub scan_interval_seconds: i64,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub is_currently_queued: bool,
}

impl Subscription {
    /// spec §4.2 sub-pass A eligibility rule.
    pub fn rescan_required(&self, now: DateTime<Utc>) -> bool {
        self.is_subscribed
            && !self.is_currently_queued
            && match self.last_scanned_at {
                None => true,
                Some(last) => now >= last + chrono::Duration::seconds(self.scan_interval_seconds),
            }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CommunityRescan {
    pub id: i64,
    pub community_name: String,
    pub ran_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct InitialPost {
    pub id: String,
    pub metadata: serde_json::Value,
    pub rescan_id: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct PostRescan {
    pub id: i64,
    pub post_id: String,
    pub scheduled_start_at: DateTime<Utc>,
    pub began_processing: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UpdatedPost {
    pub id: i64,
    pub updated_metadata: serde_json::Value,
    pub post_scan_id: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ScrapedComment {
    pub id: String,
    pub parent_id: Option<String>,
    pub comment_data: serde_json::Value,
    pub post_scan_id: i64,
}

/// The maturity window after which a post is considered to have
/// accumulated sufficient engagement (spec §4.3.2, glossary).
pub const MATURITY_WINDOW: chrono::Duration = chrono::Duration::days(7);

/// `maturity_time(createdAt)` from spec §4.3.2: schedule immediately
/// if the post is already at or past the maturity window, otherwise
/// schedule for when it will reach it.
pub fn maturity_time(created_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let age = now - created_at;
    if age >= MATURITY_WINDOW {
        now
    } else {
        now + (MATURITY_WINDOW - age)
    }
}

/// The HTTP verb encoding used on the wire for queued `post.rescan`
/// messages (spec §4.1.3 convenience variant / §6 queue payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QueuedMethod {
    Get = 0,
    Post = 1,
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct ApiRequest {
    pub url: String,
    pub method: QueuedMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option))]
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityRescanMessage {
    pub community: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostRescanMessageType {
    Base,
    More,
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRescanMessage {
    pub post_id: String,
    pub post_rescans_id: i64,
    #[serde(rename = "type")]
    pub kind: PostRescanMessageType,
    pub api_request: ApiRequest,
}

// serde_repr is a small, single-purpose dependency; rather than pull it in
// for one enum, implement the numeric (de)serialization by hand.
use serde::de::{self, Deserializer};
use serde::ser::Serializer;

impl Serialize for QueuedMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for QueuedMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        match value {
            0 => Ok(QueuedMethod::Get),
            1 => Ok(QueuedMethod::Post),
            other => Err(de::Error::custom(format!("unknown method code {other}"))),
        }
    }
}
