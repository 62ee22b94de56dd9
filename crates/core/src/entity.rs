//! Entity kinds, stream keys and the per-kind field records.
//!
//! Every field of a record is an explicit `Option`: the source may omit any of
//! them, and [`crate::schema`] decides which absences are legitimate for a kind.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::id::{Identity, PeerKind, normalize};

/// Kind of a versioned entity; selects its table and field policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Chat,
    Channel,
    Supergroup,
    Message,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::User,
        EntityKind::Chat,
        EntityKind::Channel,
        EntityKind::Supergroup,
        EntityKind::Message,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Chat => "chat",
            EntityKind::Channel => "channel",
            EntityKind::Supergroup => "supergroup",
            EntityKind::Message => "message",
        }
    }
}

impl From<PeerKind> for EntityKind {
    fn from(kind: PeerKind) -> Self {
        match kind {
            PeerKind::User => EntityKind::User,
            PeerKind::Chat => EntityKind::Chat,
            PeerKind::Channel => EntityKind::Channel,
            PeerKind::Supergroup => EntityKind::Supergroup,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of one entity's history.
///
/// Peers are keyed by their normalized identity. Message ids are only unique
/// within their chat or channel, so messages are keyed by the identity of that
/// context plus the message id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamKey {
    Peer { kind: PeerKind, identity: Identity },
    Message { context: Identity, message_id: i64 },
}

impl StreamKey {
    /// Key of a peer given its raw source id.
    pub fn peer(kind: PeerKind, raw: i64) -> Result<Self, SnapshotError> {
        Ok(StreamKey::Peer {
            kind,
            identity: normalize(kind, raw)?,
        })
    }

    /// Key of a message given its context's raw source id.
    pub fn message(
        context_kind: PeerKind,
        context_raw: i64,
        message_id: i64,
    ) -> Result<Self, SnapshotError> {
        Ok(StreamKey::Message {
            context: normalize(context_kind, context_raw)?,
            message_id,
        })
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            StreamKey::Peer { kind, .. } => EntityKind::from(*kind),
            StreamKey::Message { .. } => EntityKind::Message,
        }
    }

    /// Identity of the peer, or of the containing context for messages.
    pub fn identity(&self) -> Identity {
        match self {
            StreamKey::Peer { identity, .. } => *identity,
            StreamKey::Message { context, .. } => *context,
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKey::Peer { kind, identity } => write!(f, "{kind}:{identity}"),
            StreamKey::Message {
                context,
                message_id,
            } => write!(f, "message:{context}/{message_id}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFields {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub bot: Option<bool>,
    pub common_chats_count: Option<i64>,
    pub picture_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatFields {
    pub title: Option<String>,
    /// Identity of the supergroup this chat was upgraded to.
    pub migrated_to_id: Option<i64>,
    pub picture_id: Option<i64>,
}

/// Fields shared by channels and supergroups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelFields {
    pub title: Option<String>,
    pub about: Option<String>,
    pub username: Option<String>,
    pub picture_id: Option<i64>,
    pub pinned_message_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageFields {
    /// Send date, seconds since the epoch.
    pub date: Option<i64>,
    pub from_id: Option<i64>,
    pub text: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub forward_id: Option<i64>,
    pub post_author: Option<String>,
    pub view_count: Option<i64>,
    pub media_id: Option<i64>,
    /// Encoded formatting entities (bold, links, ...).
    pub formatting: Option<String>,
    /// Friendly name of the action for service messages.
    pub service_action: Option<String>,
}

/// Kind-specific content of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fields {
    User(UserFields),
    Chat(ChatFields),
    Channel(ChannelFields),
    Supergroup(ChannelFields),
    Message(MessageFields),
}

/// Borrowed value of one column, `Null` when the field is absent.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Null,
    Int(i64),
    Bool(bool),
    Text(&'a str),
}

impl<'a> FieldValue<'a> {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl<'a> From<&'a Option<String>> for FieldValue<'a> {
    fn from(value: &'a Option<String>) -> Self {
        value.as_deref().map_or(FieldValue::Null, FieldValue::Text)
    }
}

impl From<&Option<i64>> for FieldValue<'_> {
    fn from(value: &Option<i64>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Int)
    }
}

impl From<&Option<bool>> for FieldValue<'_> {
    fn from(value: &Option<bool>) -> Self {
        value.map_or(FieldValue::Null, FieldValue::Bool)
    }
}

/// One named column of a record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Column<'a> {
    pub name: &'static str,
    pub value: FieldValue<'a>,
}

fn col<'a>(name: &'static str, value: impl Into<FieldValue<'a>>) -> Column<'a> {
    Column {
        name,
        value: value.into(),
    }
}

impl Fields {
    pub fn kind(&self) -> EntityKind {
        match self {
            Fields::User(_) => EntityKind::User,
            Fields::Chat(_) => EntityKind::Chat,
            Fields::Channel(_) => EntityKind::Channel,
            Fields::Supergroup(_) => EntityKind::Supergroup,
            Fields::Message(_) => EntityKind::Message,
        }
    }

    /// Columns in storage order (the order of the kind's field policy).
    pub fn columns(&self) -> Vec<Column<'_>> {
        match self {
            Fields::User(u) => vec![
                col("first_name", &u.first_name),
                col("last_name", &u.last_name),
                col("username", &u.username),
                col("phone", &u.phone),
                col("bio", &u.bio),
                col("bot", &u.bot),
                col("common_chats_count", &u.common_chats_count),
                col("picture_id", &u.picture_id),
            ],
            Fields::Chat(c) => vec![
                col("title", &c.title),
                col("migrated_to_id", &c.migrated_to_id),
                col("picture_id", &c.picture_id),
            ],
            Fields::Channel(c) | Fields::Supergroup(c) => vec![
                col("title", &c.title),
                col("about", &c.about),
                col("username", &c.username),
                col("picture_id", &c.picture_id),
                col("pinned_message_id", &c.pinned_message_id),
            ],
            Fields::Message(m) => vec![
                col("date", &m.date),
                col("from_id", &m.from_id),
                col("text", &m.text),
                col("reply_to_message_id", &m.reply_to_message_id),
                col("forward_id", &m.forward_id),
                col("post_author", &m.post_author),
                col("view_count", &m.view_count),
                col("media_id", &m.media_id),
                col("formatting", &m.formatting),
                col("service_action", &m.service_action),
            ],
        }
    }
}
