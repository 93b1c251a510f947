//! The [`Event`] value and its type taxonomy.
//!
//! An event is created by a constructor in [`crate::catalog`] with an empty
//! `id`. The [`crate::emitter::Emitter`] assigns the identifier exactly once;
//! after that the event is only ever cloned, never mutated.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form event payload. Key order carries no meaning.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// One domain-level occurrence destined for observability sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Time-ordered unique identifier. Empty until emitted.
    pub id: String,
    /// Type tag from the catalog taxonomy.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Arbitrary key/value payload.
    pub payload: Payload,
}

impl Event {
    /// Create an event that has not been through the emitter yet.
    pub const fn new(event_type: EventType, payload: Payload) -> Self {
        Self {
            id: String::new(),
            event_type,
            payload,
        }
    }

    /// Whether the emitter has assigned an identifier.
    pub const fn has_id(&self) -> bool {
        !self.id.is_empty()
    }
}

/// Generates the [`EventType`] enum together with its wire tags.
macro_rules! event_types {
    ($($(#[$meta:meta])* $variant:ident => $tag:literal,)+) => {
        /// Closed set of catalog event tags.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum EventType {
            $(
                $(#[$meta])*
                #[serde(rename = $tag)]
                $variant,
            )+
        }

        impl EventType {
            /// Every tag, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant,)+];

            /// The wire tag, e.g. `COLLECTION_CREATE`.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $tag,)+
                }
            }
        }
    };
}

event_types! {
    /// A collection was created.
    CollectionCreate => "COLLECTION_CREATE",
    /// A collection was updated.
    CollectionUpdate => "COLLECTION_UPDATE",
    /// A collection was deleted.
    CollectionDelete => "COLLECTION_DELETE",
    /// A collection's publication state changed.
    CollectionPublishedChange => "COLLECTION_PUBLISHED_CHANGE",
    /// A collection's member content units changed.
    CollectionContentUnitsChange => "COLLECTION_CONTENT_UNITS_CHANGE",
    /// A content unit was created.
    ContentUnitCreate => "CONTENT_UNIT_CREATE",
    /// A content unit was updated.
    ContentUnitUpdate => "CONTENT_UNIT_UPDATE",
    /// A content unit was deleted.
    ContentUnitDelete => "CONTENT_UNIT_DELETE",
    /// A content unit's publication state changed.
    ContentUnitPublishedChange => "CONTENT_UNIT_PUBLISHED_CHANGE",
    /// A content unit's derived units changed.
    ContentUnitDerivativesChange => "CONTENT_UNIT_DERIVATIVES_CHANGE",
    /// A content unit's sources changed.
    ContentUnitSourcesChange => "CONTENT_UNIT_SOURCES_CHANGE",
    /// A content unit's tags changed.
    ContentUnitTagsChange => "CONTENT_UNIT_TAGS_CHANGE",
    /// A content unit's persons changed.
    ContentUnitPersonsChange => "CONTENT_UNIT_PERSONS_CHANGE",
    /// A content unit's publishers changed.
    ContentUnitPublishersChange => "CONTENT_UNIT_PUBLISHERS_CHANGE",
    /// A file was updated.
    FileUpdate => "FILE_UPDATE",
    /// A file was inserted.
    FileInsert => "FILE_INSERT",
    /// A file replaced another file.
    FileReplace => "FILE_REPLACE",
    /// A file was published.
    FilePublished => "FILE_PUBLISHED",
    /// A file was removed.
    FileRemove => "FILE_REMOVE",
    /// A source was created.
    SourceCreate => "SOURCE_CREATE",
    /// A source was updated.
    SourceUpdate => "SOURCE_UPDATE",
    /// A tag was created.
    TagCreate => "TAG_CREATE",
    /// A tag was updated.
    TagUpdate => "TAG_UPDATE",
    /// A person was created.
    PersonCreate => "PERSON_CREATE",
    /// A person was updated.
    PersonUpdate => "PERSON_UPDATE",
    /// A person was deleted.
    PersonDelete => "PERSON_DELETE",
    /// A publisher was created.
    PublisherCreate => "PUBLISHER_CREATE",
    /// A publisher was updated.
    PublisherUpdate => "PUBLISHER_UPDATE",
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
