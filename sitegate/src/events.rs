//! Closed catalog of domain events that webhooks can subscribe to.
//!
//! Event names travel as dotted strings (`entry.created`) on the wire and in
//! the `X-Event` header. Parsing an unknown name is a validation error rather
//! than a filter that silently never matches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

macro_rules! event_catalog {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// A domain event emitted by the site builder.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum EventKind {
            $(
                #[serde(rename = $name)]
                $variant,
            )+
        }

        impl EventKind {
            /// Every event in the catalog.
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant),+];

            /// Wire name of the event.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(EventKind::$variant => $name,)+
                }
            }
        }

        impl FromStr for EventKind {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(EventKind::$variant),)+
                    other => Err(ValidationError::UnknownEvent(other.to_string())),
                }
            }
        }
    };
}

event_catalog! {
    EntryCreated => "entry.created",
    EntryUpdated => "entry.updated",
    EntryDeleted => "entry.deleted",
    EntryPublished => "entry.published",
    EntryUnpublished => "entry.unpublished",
    ContentTypeCreated => "content_type.created",
    ContentTypeUpdated => "content_type.updated",
    ContentTypeDeleted => "content_type.deleted",
    FieldCreated => "field.created",
    FieldUpdated => "field.updated",
    FieldDeleted => "field.deleted",
    TaxonomyCreated => "taxonomy.created",
    TaxonomyUpdated => "taxonomy.updated",
    TaxonomyDeleted => "taxonomy.deleted",
    TermCreated => "term.created",
    TermUpdated => "term.updated",
    TermDeleted => "term.deleted",
    DesignUpdated => "design.updated",
    ComponentCreated => "component.created",
    ComponentUpdated => "component.updated",
    ComponentDeleted => "component.deleted",
    TemplateCreated => "template.created",
    TemplateUpdated => "template.updated",
    TemplateDeleted => "template.deleted",
    CssUpdated => "css.updated",
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
