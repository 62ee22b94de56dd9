//! Per-kind field policy: which fields may be absent, and which take part in
//! change detection.
//!
//! The policy is consulted when a snapshot is written ([`validate`]) and by the
//! comparator to skip presentational columns. It holds no comparison or
//! invalidation logic of its own.

use crate::entity::{EntityKind, Fields, StreamKey};
use crate::error::SnapshotError;

/// Whether a field may be absent, and why.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Presence {
    Required,
    /// Absence is structural at the source; the string says where it comes from.
    Nullable(&'static str),
}

/// Whether a change in the field should produce a new snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldRole {
    Content,
    /// Stored verbatim but ignored by change detection.
    Presentational,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub presence: Presence,
    pub role: FieldRole,
}

impl FieldSpec {
    pub fn is_nullable(&self) -> bool {
        matches!(self.presence, Presence::Nullable(_))
    }
}

const fn required(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        presence: Presence::Required,
        role: FieldRole::Content,
    }
}

const fn nullable(name: &'static str, why: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        presence: Presence::Nullable(why),
        role: FieldRole::Content,
    }
}

const NO_PICTURE: &str = "no profile picture set";

const USER_FIELDS: &[FieldSpec] = &[
    required("first_name"),
    nullable("last_name", "last name is optional at the source"),
    nullable("username", "username is optional"),
    nullable("phone", "phone is only visible to contacts"),
    nullable("bio", "bio is optional"),
    nullable("bot", "not reported for deleted accounts"),
    required("common_chats_count"),
    nullable("picture_id", NO_PICTURE),
];

const CHAT_FIELDS: &[FieldSpec] = &[
    required("title"),
    nullable("migrated_to_id", "only set once the chat was upgraded to a supergroup"),
    nullable("picture_id", NO_PICTURE),
];

const CHANNEL_FIELDS: &[FieldSpec] = &[
    required("title"),
    nullable("about", "description is optional"),
    nullable("username", "private channels have no username"),
    nullable("picture_id", NO_PICTURE),
    nullable("pinned_message_id", "nothing pinned"),
];

const MESSAGE_FIELDS: &[FieldSpec] = &[
    required("date"),
    nullable("from_id", "channel posts carry no sender"),
    nullable("text", "media without caption and some service messages carry no text"),
    nullable("reply_to_message_id", "not a reply"),
    nullable("forward_id", "not forwarded"),
    nullable("post_author", "only signed channel posts carry an author"),
    FieldSpec {
        name: "view_count",
        presence: Presence::Nullable("only channel posts are counted"),
        role: FieldRole::Presentational,
    },
    nullable("media_id", "text-only message"),
    nullable("formatting", "plain text"),
    nullable("service_action", "regular message"),
];

/// Field specs for a kind, in storage order.
pub fn fields_for(kind: EntityKind) -> &'static [FieldSpec] {
    match kind {
        EntityKind::User => USER_FIELDS,
        EntityKind::Chat => CHAT_FIELDS,
        EntityKind::Channel | EntityKind::Supergroup => CHANNEL_FIELDS,
        EntityKind::Message => MESSAGE_FIELDS,
    }
}

pub fn field_spec(kind: EntityKind, name: &str) -> Option<&'static FieldSpec> {
    fields_for(kind).iter().find(|spec| spec.name == name)
}

/// Reject records whose kind does not match the key or that lack a required field.
pub fn validate(key: &StreamKey, fields: &Fields) -> Result<(), SnapshotError> {
    let kind = key.kind();
    if fields.kind() != kind {
        return Err(SnapshotError::KindMismatch {
            key: *key,
            found: fields.kind(),
        });
    }

    for column in fields.columns() {
        let nullable = field_spec(kind, column.name).is_some_and(FieldSpec::is_nullable);
        if column.value.is_null() && !nullable {
            return Err(SnapshotError::SchemaViolation {
                kind,
                field: column.name,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ChannelFields, MessageFields, UserFields};
    use crate::id::PeerKind;

    fn sample(kind: EntityKind) -> Fields {
        match kind {
            EntityKind::User => Fields::User(UserFields::default()),
            EntityKind::Chat => Fields::Chat(Default::default()),
            EntityKind::Channel => Fields::Channel(ChannelFields::default()),
            EntityKind::Supergroup => Fields::Supergroup(ChannelFields::default()),
            EntityKind::Message => Fields::Message(MessageFields::default()),
        }
    }

    #[test]
    fn policy_covers_every_column_in_order() {
        for kind in EntityKind::ALL {
            let names: Vec<_> = sample(kind).columns().iter().map(|c| c.name).collect();
            let policy: Vec<_> = fields_for(kind).iter().map(|s| s.name).collect();
            assert_eq!(names, policy, "policy drift for {kind}");
        }
    }

    #[test]
    fn missing_required_field_is_a_schema_violation() {
        let key = StreamKey::peer(PeerKind::Channel, 1).unwrap();
        let err = validate(&key, &Fields::Channel(ChannelFields::default())).unwrap_err();
        assert_eq!(
            err,
            SnapshotError::SchemaViolation {
                kind: EntityKind::Channel,
                field: "title",
            }
        );
    }

    #[test]
    fn channel_posts_without_sender_or_caption_are_valid() {
        let key = StreamKey::message(PeerKind::Channel, 1, 10).unwrap();
        let post = Fields::Message(MessageFields {
            date: Some(1_500_000_000),
            media_id: Some(3),
            ..Default::default()
        });
        assert!(validate(&key, &post).is_ok());
    }

    #[test]
    fn fields_of_another_kind_are_rejected() {
        let key = StreamKey::peer(PeerKind::Supergroup, 1).unwrap();
        let fields = Fields::Channel(ChannelFields {
            title: Some("t".into()),
            ..Default::default()
        });
        assert!(matches!(
            validate(&key, &fields),
            Err(SnapshotError::KindMismatch {
                found: EntityKind::Channel,
                ..
            })
        ));
    }

    #[test]
    fn only_view_count_is_presentational() {
        let presentational: Vec<_> = EntityKind::ALL
            .iter()
            .flat_map(|k| fields_for(*k))
            .filter(|s| s.role == FieldRole::Presentational)
            .map(|s| s.name)
            .collect();
        assert_eq!(presentational, vec!["view_count"]);
    }
}
