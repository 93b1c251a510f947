//! Event constructors for catalog mutations.
//!
//! The data layer calls these after a write succeeds. Each returns an
//! [`Event`] without an identifier; the emitter assigns one on the way out.
//! Payloads carry the entity's internal `id` and public `uid`, plus any
//! action-specific fields.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::event::{Event, EventType, Payload};

/// Minimum identity of a mutated catalog entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Internal database identifier.
    pub id: i64,
    /// Public identifier.
    pub uid: String,
}

impl EntityRef {
    /// Build a reference from its two identifiers.
    pub fn new(id: i64, uid: impl Into<String>) -> Self {
        Self {
            id,
            uid: uid.into(),
        }
    }

    fn to_payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("id".to_owned(), json!(self.id));
        payload.insert("uid".to_owned(), json!(self.uid));
        payload
    }
}

fn entity_event(event_type: EventType, entity: &EntityRef) -> Event {
    Event::new(event_type, entity.to_payload())
}

/// Generates one constructor per `(fn, tag)` pair with an `{id, uid}` payload.
macro_rules! entity_constructors {
    ($($(#[$meta:meta])* $name:ident => $variant:ident;)+) => {
        $(
            $(#[$meta])*
            pub fn $name(entity: &EntityRef) -> Event {
                entity_event(EventType::$variant, entity)
            }
        )+
    };
}

entity_constructors! {
    /// A collection was created.
    collection_create => CollectionCreate;
    /// A collection was updated.
    collection_update => CollectionUpdate;
    /// A collection was deleted.
    collection_delete => CollectionDelete;
    /// A collection was published or unpublished.
    collection_published_change => CollectionPublishedChange;
    /// Content units were associated with or removed from a collection.
    collection_content_units_change => CollectionContentUnitsChange;
    /// A content unit was created.
    content_unit_create => ContentUnitCreate;
    /// A content unit was updated.
    content_unit_update => ContentUnitUpdate;
    /// A content unit was deleted.
    content_unit_delete => ContentUnitDelete;
    /// A content unit was published or unpublished.
    content_unit_published_change => ContentUnitPublishedChange;
    /// Derived units of a content unit changed.
    content_unit_derivatives_change => ContentUnitDerivativesChange;
    /// Sources of a content unit changed.
    content_unit_sources_change => ContentUnitSourcesChange;
    /// Tags of a content unit changed.
    content_unit_tags_change => ContentUnitTagsChange;
    /// Persons of a content unit changed.
    content_unit_persons_change => ContentUnitPersonsChange;
    /// Publishers of a content unit changed.
    content_unit_publishers_change => ContentUnitPublishersChange;
    /// File metadata was updated.
    file_update => FileUpdate;
    /// A file was published.
    file_published => FilePublished;
    /// A file was removed.
    file_remove => FileRemove;
    /// A source was created.
    source_create => SourceCreate;
    /// A source was updated.
    source_update => SourceUpdate;
    /// A tag was created.
    tag_create => TagCreate;
    /// A tag was updated.
    tag_update => TagUpdate;
    /// A person was created.
    person_create => PersonCreate;
    /// A person was updated.
    person_update => PersonUpdate;
    /// A person was deleted.
    person_delete => PersonDelete;
    /// A publisher was created.
    publisher_create => PublisherCreate;
    /// A publisher was updated.
    publisher_update => PublisherUpdate;
}

/// A file was inserted through the given insert workflow.
pub fn file_insert(file: &EntityRef, insert_type: &str) -> Event {
    let mut payload = file.to_payload();
    payload.insert("insert_type".to_owned(), json!(insert_type));
    Event::new(EventType::FileInsert, payload)
}

/// `new_file` replaced `old_file` through the given insert workflow.
pub fn file_replace(old_file: &EntityRef, new_file: &EntityRef, insert_type: &str) -> Event {
    let mut payload = Payload::new();
    payload.insert("old".to_owned(), old_file.to_payload().into());
    payload.insert("new".to_owned(), new_file.to_payload().into());
    payload.insert("insert_type".to_owned(), json!(insert_type));
    Event::new(EventType::FileReplace, payload)
}
