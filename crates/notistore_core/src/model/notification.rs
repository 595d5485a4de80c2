//! Notification domain model.
//!
//! # Responsibility
//! - Define the persisted notification record and its creation input.
//! - Validate required references before any persistence happens.
//!
//! # Invariants
//! - `target`, `notifiable` and a non-blank `key` are always present on a
//!   persisted record.
//! - `group_owner_id == None` marks a group owner; `Some(owner)` marks a
//!   member whose owner is itself an owner.
//! - `opened_at` is written at most once.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

static ENTITY_TYPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*(::[A-Za-z][A-Za-z0-9_]*)*$")
        .expect("valid entity type regex")
});

/// Stable row identifier. Allocated in insertion order.
pub type NotificationId = i64;

/// Opaque key/value payload carried by a notification.
///
/// Never queried; stored as JSON text and compared by map equality.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Role of a polymorphic reference inside a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceField {
    Target,
    Notifiable,
    Group,
    Notifier,
}

impl ReferenceField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Notifiable => "notifiable",
            Self::Group => "group",
            Self::Notifier => "notifier",
        }
    }
}

/// Validation errors raised before a notification reaches storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationValidationError {
    MissingTarget,
    MissingNotifiable,
    MissingKey,
    /// Type tag does not look like `Name` or `Namespace::Name`.
    InvalidEntityType(String),
    /// Reference id is blank.
    EmptyEntityId,
    /// Type tag is not registered in the entity registry.
    UnknownEntityType {
        field: ReferenceField,
        entity_type: String,
    },
    /// Registered resolver found no entity for the reference.
    UnresolvedEntity {
        field: ReferenceField,
        entity_type: String,
    },
    /// Persisted row points at itself as group owner.
    SelfOwned(NotificationId),
}

impl Display for NotificationValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTarget => write!(f, "notification target is required"),
            Self::MissingNotifiable => write!(f, "notification notifiable is required"),
            Self::MissingKey => write!(f, "notification key must not be blank"),
            Self::InvalidEntityType(value) => write!(f, "invalid entity type `{value}`"),
            Self::EmptyEntityId => write!(f, "entity id must not be blank"),
            Self::UnknownEntityType { field, entity_type } => write!(
                f,
                "{} entity type `{entity_type}` is not registered",
                field.as_str()
            ),
            Self::UnresolvedEntity { field, entity_type } => write!(
                f,
                "{} reference of type `{entity_type}` does not resolve to an entity",
                field.as_str()
            ),
            Self::SelfOwned(id) => write!(f, "notification {id} references itself as group owner"),
        }
    }
}

impl Error for NotificationValidationError {}

/// Polymorphic reference: type tag plus id.
///
/// Both halves are always present; a reference cannot be half-set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "EntityRefParts")]
pub struct EntityRef {
    entity_type: String,
    entity_id: String,
}

#[derive(Deserialize)]
struct EntityRefParts {
    entity_type: String,
    entity_id: String,
}

impl TryFrom<EntityRefParts> for EntityRef {
    type Error = NotificationValidationError;

    fn try_from(value: EntityRefParts) -> Result<Self, Self::Error> {
        Self::new(value.entity_type, value.entity_id)
    }
}

impl EntityRef {
    /// Creates a validated reference. Surrounding whitespace is trimmed.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Result<Self, NotificationValidationError> {
        let entity_type = entity_type.into().trim().to_string();
        let entity_id = entity_id.into().trim().to_string();
        if !is_valid_entity_type(&entity_type) {
            return Err(NotificationValidationError::InvalidEntityType(entity_type));
        }
        if entity_id.is_empty() {
            return Err(NotificationValidationError::EmptyEntityId);
        }
        Ok(Self {
            entity_type,
            entity_id,
        })
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.entity_id)
    }
}

/// Returns whether `value` is an accepted entity type tag.
pub fn is_valid_entity_type(value: &str) -> bool {
    ENTITY_TYPE_RE.is_match(value)
}

/// Persisted notification row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    /// Entity being notified.
    pub target: EntityRef,
    /// Entity whose event produced this notification.
    pub notifiable: EntityRef,
    /// Semantic type, e.g. `comment.reply`.
    pub key: String,
    /// `None` for group owners.
    pub group_owner_id: Option<NotificationId>,
    /// Grouping subject, e.g. the article comments belong to.
    pub group: Option<EntityRef>,
    /// Actor who caused the event.
    pub notifier: Option<EntityRef>,
    pub parameters: Parameters,
    /// Unix epoch milliseconds; `None` while unopened.
    pub opened_at: Option<i64>,
    /// Unix epoch milliseconds. Immutable.
    pub created_at: i64,
}

impl Notification {
    pub fn is_group_owner(&self) -> bool {
        self.group_owner_id.is_none()
    }

    pub fn is_group_member(&self) -> bool {
        self.group_owner_id.is_some()
    }

    pub fn is_opened(&self) -> bool {
        self.opened_at.is_some()
    }

    pub fn is_unopened(&self) -> bool {
        self.opened_at.is_none()
    }

    /// Validates invariants for a row loaded from storage.
    pub fn validate(&self) -> Result<(), NotificationValidationError> {
        if self.key.trim().is_empty() {
            return Err(NotificationValidationError::MissingKey);
        }
        if self.group_owner_id == Some(self.id) {
            return Err(NotificationValidationError::SelfOwned(self.id));
        }
        Ok(())
    }
}

/// Creation input for one notification.
///
/// Required references are `Option` so that absent input surfaces as a
/// [`NotificationValidationError`] instead of a constructor panic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewNotification {
    pub target: Option<EntityRef>,
    pub notifiable: Option<EntityRef>,
    pub key: String,
    pub group: Option<EntityRef>,
    pub notifier: Option<EntityRef>,
    pub parameters: Parameters,
}

impl NewNotification {
    pub fn new(target: EntityRef, notifiable: EntityRef, key: impl Into<String>) -> Self {
        Self {
            target: Some(target),
            notifiable: Some(notifiable),
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_group(mut self, group: EntityRef) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_notifier(mut self, notifier: EntityRef) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Checks required fields and returns borrowed required references.
    pub fn validate(&self) -> Result<(&EntityRef, &EntityRef), NotificationValidationError> {
        let target = self
            .target
            .as_ref()
            .ok_or(NotificationValidationError::MissingTarget)?;
        let notifiable = self
            .notifiable
            .as_ref()
            .ok_or(NotificationValidationError::MissingNotifiable)?;
        if self.key.trim().is_empty() {
            return Err(NotificationValidationError::MissingKey);
        }
        Ok((target, notifiable))
    }

    /// Iterates over every reference set on this input with its role.
    pub fn references(&self) -> impl Iterator<Item = (ReferenceField, &EntityRef)> {
        [
            (ReferenceField::Target, self.target.as_ref()),
            (ReferenceField::Notifiable, self.notifiable.as_ref()),
            (ReferenceField::Group, self.group.as_ref()),
            (ReferenceField::Notifier, self.notifier.as_ref()),
        ]
        .into_iter()
        .filter_map(|(field, reference)| reference.map(|value| (field, value)))
    }
}
