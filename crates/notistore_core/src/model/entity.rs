//! Explicit type registry for polymorphic references.
//!
//! # Responsibility
//! - Map entity type tags (`User`, `Article`) to host-provided resolvers.
//! - Validate that required references point at existing entities.
//! - Batch-resolve references for a page of notifications, one resolver
//!   call per type tag.
//!
//! # Invariants
//! - Type tags are registered at most once.
//! - Resolution never falls back to guessing an unregistered type.

use crate::model::notification::{
    is_valid_entity_type, EntityRef, NewNotification, Notification, NotificationValidationError,
    ReferenceField,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Host entity as seen by the notification store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub reference: EntityRef,
    /// Human readable label for presentation layers.
    pub display_name: String,
}

/// Host-side lookup for one entity type.
pub trait EntityResolver: Send + Sync {
    /// Resolves one entity id of this resolver's type.
    fn resolve(&self, entity_id: &str) -> Option<Entity>;

    /// Resolves many ids in one call. Missing ids are simply absent.
    fn resolve_many(&self, entity_ids: &[&str]) -> Vec<Entity> {
        entity_ids
            .iter()
            .filter_map(|entity_id| self.resolve(entity_id))
            .collect()
    }
}

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRegistryError {
    InvalidEntityType(String),
    DuplicateEntityType(String),
}

impl Display for EntityRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEntityType(value) => write!(f, "entity type is invalid: {value}"),
            Self::DuplicateEntityType(value) => {
                write!(f, "entity type already registered: {value}")
            }
        }
    }
}

impl Error for EntityRegistryError {}

/// Registry of resolvers keyed by entity type tag.
#[derive(Default, Clone)]
pub struct EntityRegistry {
    resolvers: BTreeMap<String, Arc<dyn EntityResolver>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the resolver for one type tag.
    pub fn register(
        &mut self,
        entity_type: &str,
        resolver: Arc<dyn EntityResolver>,
    ) -> Result<(), EntityRegistryError> {
        let entity_type = entity_type.trim().to_string();
        if !is_valid_entity_type(&entity_type) {
            return Err(EntityRegistryError::InvalidEntityType(entity_type));
        }
        if self.resolvers.contains_key(entity_type.as_str()) {
            return Err(EntityRegistryError::DuplicateEntityType(entity_type));
        }
        self.resolvers.insert(entity_type, resolver);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// Returns sorted registered type tags.
    pub fn entity_types(&self) -> Vec<String> {
        self.resolvers.keys().cloned().collect()
    }

    /// Resolves a single reference, or `None` when type or entity is unknown.
    pub fn resolve(&self, reference: &EntityRef) -> Option<Entity> {
        self.resolvers
            .get(reference.entity_type())
            .and_then(|resolver| resolver.resolve(reference.entity_id()))
    }

    /// Checks that `target` and `notifiable` of `input` resolve.
    ///
    /// Optional references (`group`, `notifier`) must use a registered type
    /// when set, but are not required to resolve.
    pub fn validate_new(&self, input: &NewNotification) -> Result<(), NotificationValidationError> {
        for (field, reference) in input.references() {
            let Some(resolver) = self.resolvers.get(reference.entity_type()) else {
                return Err(NotificationValidationError::UnknownEntityType {
                    field,
                    entity_type: reference.entity_type().to_string(),
                });
            };
            let required = matches!(field, ReferenceField::Target | ReferenceField::Notifiable);
            if required && resolver.resolve(reference.entity_id()).is_none() {
                return Err(NotificationValidationError::UnresolvedEntity {
                    field,
                    entity_type: reference.entity_type().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolves every reference of `fields` across `notifications`.
    ///
    /// Issues one `resolve_many` per distinct type tag.
    pub fn preload(
        &self,
        notifications: &[Notification],
        fields: &[ReferenceField],
    ) -> ResolvedEntities {
        let mut wanted: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for notification in notifications {
            for field in fields {
                if let Some(reference) = reference_of(notification, *field) {
                    wanted
                        .entry(reference.entity_type())
                        .or_default()
                        .insert(reference.entity_id());
                }
            }
        }

        let mut entities = HashMap::new();
        for (entity_type, ids) in wanted {
            let Some(resolver) = self.resolvers.get(entity_type) else {
                continue;
            };
            let ids = ids.into_iter().collect::<Vec<_>>();
            for entity in resolver.resolve_many(&ids) {
                entities.insert(entity.reference.clone(), entity);
            }
        }
        ResolvedEntities { entities }
    }
}

/// Batch resolution result produced by [`EntityRegistry::preload`].
#[derive(Debug, Clone, Default)]
pub struct ResolvedEntities {
    entities: HashMap<EntityRef, Entity>,
}

impl ResolvedEntities {
    pub fn get(&self, reference: &EntityRef) -> Option<&Entity> {
        self.entities.get(reference)
    }

    /// Looks up the resolved entity behind one field of `notification`.
    pub fn for_field(&self, notification: &Notification, field: ReferenceField) -> Option<&Entity> {
        reference_of(notification, field).and_then(|reference| self.entities.get(reference))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

fn reference_of(notification: &Notification, field: ReferenceField) -> Option<&EntityRef> {
    match field {
        ReferenceField::Target => Some(&notification.target),
        ReferenceField::Notifiable => Some(&notification.notifiable),
        ReferenceField::Group => notification.group.as_ref(),
        ReferenceField::Notifier => notification.notifier.as_ref(),
    }
}

#[cfg(test)]
mod tests {
    use super::{Entity, EntityRegistry, EntityRegistryError, EntityResolver};
    use crate::model::notification::{
        EntityRef, NewNotification, Notification, NotificationValidationError, Parameters,
        ReferenceField,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedResolver {
        entity_type: &'static str,
        known: Vec<&'static str>,
        batch_calls: AtomicUsize,
    }

    impl FixedResolver {
        fn new(entity_type: &'static str, known: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                entity_type,
                known,
                batch_calls: AtomicUsize::new(0),
            })
        }
    }

    impl EntityResolver for FixedResolver {
        fn resolve(&self, entity_id: &str) -> Option<Entity> {
            self.known.contains(&entity_id).then(|| Entity {
                reference: EntityRef::new(self.entity_type, entity_id).unwrap(),
                display_name: format!("{} {entity_id}", self.entity_type),
            })
        }

        fn resolve_many(&self, entity_ids: &[&str]) -> Vec<Entity> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            entity_ids.iter().filter_map(|id| self.resolve(id)).collect()
        }
    }

    fn reference(entity_type: &str, id: &str) -> EntityRef {
        EntityRef::new(entity_type, id).unwrap()
    }

    fn notification(id: i64, target: &str, notifier: &str) -> Notification {
        Notification {
            id,
            target: reference("User", target),
            notifiable: reference("Comment", "1"),
            key: "comment.reply".to_string(),
            group_owner_id: None,
            group: None,
            notifier: Some(reference("User", notifier)),
            parameters: Parameters::new(),
            opened_at: None,
            created_at: 0,
        }
    }

    #[test]
    fn register_rejects_invalid_and_duplicate_types() {
        let mut registry = EntityRegistry::new();
        registry
            .register("User", FixedResolver::new("User", vec!["1"]))
            .unwrap();

        assert_eq!(
            registry.register("User", FixedResolver::new("User", vec![])),
            Err(EntityRegistryError::DuplicateEntityType("User".to_string()))
        );
        assert!(matches!(
            registry.register("no spaces", FixedResolver::new("User", vec![])),
            Err(EntityRegistryError::InvalidEntityType(_))
        ));
        assert_eq!(registry.entity_types(), vec!["User".to_string()]);
    }

    #[test]
    fn validate_new_requires_resolvable_target_and_notifiable() {
        let mut registry = EntityRegistry::new();
        registry
            .register("User", FixedResolver::new("User", vec!["1"]))
            .unwrap();
        registry
            .register("Comment", FixedResolver::new("Comment", vec!["10"]))
            .unwrap();

        let ok = NewNotification::new(reference("User", "1"), reference("Comment", "10"), "k");
        registry.validate_new(&ok).unwrap();

        let missing_target =
            NewNotification::new(reference("User", "2"), reference("Comment", "10"), "k");
        assert_eq!(
            registry.validate_new(&missing_target),
            Err(NotificationValidationError::UnresolvedEntity {
                field: ReferenceField::Target,
                entity_type: "User".to_string(),
            })
        );

        let unknown_group = ok.clone().with_group(reference("Article", "1"));
        assert!(matches!(
            registry.validate_new(&unknown_group),
            Err(NotificationValidationError::UnknownEntityType {
                field: ReferenceField::Group,
                ..
            })
        ));
    }

    #[test]
    fn preload_calls_resolver_once_per_type() {
        let users = FixedResolver::new("User", vec!["1", "2", "3"]);
        let mut registry = EntityRegistry::new();
        registry.register("User", users.clone()).unwrap();

        let page = vec![
            notification(1, "1", "2"),
            notification(2, "1", "3"),
            notification(3, "1", "2"),
        ];
        let resolved = registry.preload(&page, &[ReferenceField::Target, ReferenceField::Notifier]);

        assert_eq!(users.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolved.len(), 3);
        let notifier = resolved
            .for_field(&page[1], ReferenceField::Notifier)
            .unwrap();
        assert_eq!(notifier.display_name, "User 3");
        assert!(resolved
            .for_field(&page[0], ReferenceField::Notifiable)
            .is_none());
    }
}
