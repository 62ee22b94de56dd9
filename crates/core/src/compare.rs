//! Change detection between a candidate observation and the latest snapshot.

use crate::entity::Fields;
use crate::schema::{FieldRole, field_spec};
use crate::snapshot::Snapshot;

/// Whether `candidate` must be stored because its content differs from `previous`.
///
/// A first observation (`previous == None`) is always a change. Otherwise every
/// content column is compared; `observed_at` and presentational columns are
/// ignored. Absent and empty values are different states, so a transition in
/// either direction counts as a change.
pub fn is_changed(previous: Option<&Snapshot>, candidate: &Snapshot) -> bool {
    match previous {
        None => true,
        Some(previous) => content_differs(&previous.fields, &candidate.fields),
    }
}

/// Column-wise content comparison of two records.
pub fn content_differs(previous: &Fields, candidate: &Fields) -> bool {
    let kind = candidate.kind();
    if previous.kind() != kind {
        return true;
    }

    previous
        .columns()
        .into_iter()
        .zip(candidate.columns())
        .filter(|(old, _)| {
            field_spec(kind, old.name).is_none_or(|spec| spec.role == FieldRole::Content)
        })
        .any(|(old, new)| old.value != new.value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ChannelFields, MessageFields, StreamKey, UserFields};
    use crate::id::PeerKind;
    use crate::snapshot::Timestamp;

    fn user(at: i64, first_name: &str, bio: Option<&str>) -> Snapshot {
        Snapshot::new(
            StreamKey::peer(PeerKind::User, 42).unwrap(),
            Timestamp::from_secs(at),
            Fields::User(UserFields {
                first_name: Some(first_name.into()),
                bio: bio.map(Into::into),
                common_chats_count: Some(0),
                ..Default::default()
            }),
        )
    }

    fn post(at: i64, text: Option<&str>, views: i64) -> Snapshot {
        Snapshot::new(
            StreamKey::message(PeerKind::Channel, 9, 1).unwrap(),
            Timestamp::from_secs(at),
            Fields::Message(MessageFields {
                date: Some(100),
                text: text.map(Into::into),
                view_count: Some(views),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn first_observation_is_always_a_change() {
        assert!(is_changed(None, &user(0, "Alice", None)));
    }

    #[test]
    fn identical_content_at_a_later_time_is_unchanged() {
        assert!(!is_changed(Some(&user(0, "Alice", None)), &user(3600, "Alice", None)));
    }

    #[test]
    fn any_content_difference_is_a_change() {
        assert!(is_changed(Some(&user(0, "Alice", None)), &user(1, "Alicia", None)));
    }

    #[test]
    fn null_and_empty_are_distinct_states() {
        let absent = user(0, "Alice", None);
        let empty = user(1, "Alice", Some(""));
        assert!(is_changed(Some(&absent), &empty));
        assert!(is_changed(Some(&empty), &absent));
    }

    #[test]
    fn caption_appearing_on_a_media_post_is_a_change() {
        assert!(is_changed(Some(&post(0, None, 1)), &post(10, Some("caption"), 1)));
    }

    #[test]
    fn view_count_alone_does_not_trigger_a_write() {
        assert!(!is_changed(Some(&post(0, Some("hi"), 1)), &post(10, Some("hi"), 500)));
    }

    #[test]
    fn channel_and_supergroup_records_never_compare_equal() {
        let fields = ChannelFields {
            title: Some("t".into()),
            ..Default::default()
        };
        assert!(content_differs(
            &Fields::Channel(fields.clone()),
            &Fields::Supergroup(fields)
        ));
    }
}
