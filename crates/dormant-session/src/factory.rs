//! Immutable bootstrap state shared by every session.
//!
//! A [`SessionFactory`] freezes mapping metadata, the listener registry, the
//! session configuration and the statistics counters. It is validated once
//! at build time; sessions opened from it never see a partially configured
//! mapping.

use std::collections::HashMap;
use std::sync::Arc;

use dormant_collection::CollectionMetadata;
use dormant_core::{Connection, Dialect, EntityMetadata, Error, Model, Result};
use dormant_event::{EventListenerRegistry, EventType, ListenerIdentity};

use crate::config::SessionConfig;
use crate::flush::FlushOrderer;
use crate::persister::{CollectionPersister, EntityPersister};
use crate::session::Session;
use crate::statistics::Statistics;

#[derive(Debug)]
struct FactoryInner {
    dialect: Dialect,
    config: SessionConfig,
    entities: HashMap<String, Arc<EntityPersister>>,
    collections: HashMap<String, Arc<CollectionPersister>>,
    orderer: FlushOrderer,
    listeners: EventListenerRegistry,
    statistics: Arc<Statistics>,
}

/// Shared, immutable mapping and runtime configuration. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    inner: Arc<FactoryInner>,
}

impl SessionFactory {
    pub fn builder() -> SessionFactoryBuilder {
        SessionFactoryBuilder::default()
    }

    pub fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.inner.statistics
    }

    pub fn listeners(&self) -> &EventListenerRegistry {
        &self.inner.listeners
    }

    pub(crate) fn orderer(&self) -> &FlushOrderer {
        &self.inner.orderer
    }

    #[allow(clippy::result_large_err)]
    pub fn entity_persister(&self, entity: &str) -> Result<&Arc<EntityPersister>> {
        self.inner
            .entities
            .get(entity)
            .ok_or_else(|| Error::UnsupportedOperation(format!("unknown entity: {entity}")))
    }

    #[allow(clippy::result_large_err)]
    pub fn collection_persister(&self, role: &str) -> Result<&Arc<CollectionPersister>> {
        self.inner
            .collections
            .get(role)
            .ok_or_else(|| Error::UnsupportedOperation(format!("unknown collection role: {role}")))
    }

    /// Names of the mapped entities, sorted.
    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Open a session on `connection`, which must speak the factory's dialect.
    #[allow(clippy::result_large_err)]
    pub fn open_session<C: Connection + 'static>(&self, connection: C) -> Result<Session<C>> {
        if connection.dialect() != self.inner.dialect {
            return Err(Error::config(format!(
                "connection dialect {} does not match session factory dialect {}",
                connection.dialect().name(),
                self.inner.dialect.name()
            )));
        }
        Ok(Session::new(self.clone(), connection))
    }
}

/// Collects mappings and listeners, then validates them into a [`SessionFactory`].
#[derive(Debug, Default)]
pub struct SessionFactoryBuilder {
    dialect: Dialect,
    config: SessionConfig,
    entities: Vec<EntityMetadata>,
    collections: Vec<CollectionMetadata>,
    listeners: EventListenerRegistry,
    statistics: Option<Arc<Statistics>>,
    error: Option<Error>,
}

impl SessionFactoryBuilder {
    #[must_use]
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Map the entity described by `M`.
    #[must_use]
    pub fn entity<M: Model>(mut self) -> Self {
        match M::metadata() {
            Ok(metadata) => self.entities.push(metadata),
            Err(e) => self.fail(e),
        }
        self
    }

    #[must_use]
    pub fn entity_metadata(mut self, metadata: EntityMetadata) -> Self {
        self.entities.push(metadata);
        self
    }

    #[must_use]
    pub fn collection(mut self, metadata: CollectionMetadata) -> Self {
        self.collections.push(metadata);
        self
    }

    /// Append a listener to the group of `event_type`.
    ///
    /// Registration failures (duplicates rejected by the group's strategy)
    /// are reported by [`build`](Self::build).
    #[must_use]
    pub fn listener<L>(mut self, event_type: EventType<L>, listener: Arc<L>) -> Self
    where
        L: ?Sized + ListenerIdentity + Send + Sync,
    {
        if let Err(e) = self.listeners.append_listener(event_type, listener) {
            self.fail(e);
        }
        self
    }

    /// Replace the registry wholesale.
    #[must_use]
    pub fn listeners(mut self, registry: EventListenerRegistry) -> Self {
        self.listeners = registry;
        self
    }

    /// Share counters with another factory.
    #[must_use]
    pub fn statistics(mut self, statistics: Arc<Statistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn build(self) -> Result<SessionFactory> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut entities: HashMap<String, Arc<EntityPersister>> = HashMap::new();
        let mut orderer = FlushOrderer::new();
        for metadata in self.entities {
            if entities.contains_key(&metadata.name) {
                return Err(Error::config(format!("entity {} is mapped twice", metadata.name)));
            }
            orderer.register_entity(&metadata);
            let name = metadata.name.clone();
            let persister = EntityPersister::new(Arc::new(metadata), self.dialect, &self.config)?;
            entities.insert(name, Arc::new(persister));
        }

        let mut collections: HashMap<String, Arc<CollectionPersister>> = HashMap::new();
        for metadata in self.collections {
            let owner = entities.get(&metadata.owner_entity).ok_or_else(|| {
                Error::config(format!(
                    "collection {} is owned by unmapped entity {}",
                    metadata.role, metadata.owner_entity
                ))
            })?;
            if !owner.metadata().collections.contains(&metadata.role) {
                return Err(Error::config(format!(
                    "entity {} does not declare collection {}",
                    metadata.owner_entity, metadata.role
                )));
            }
            if collections.contains_key(&metadata.role) {
                return Err(Error::config(format!("collection {} is mapped twice", metadata.role)));
            }
            let role = metadata.role.clone();
            collections.insert(role, Arc::new(CollectionPersister::new(Arc::new(metadata), self.dialect)));
        }

        for persister in entities.values() {
            let metadata = persister.metadata();
            for role in &metadata.collections {
                if !collections.contains_key(role) {
                    return Err(Error::config(format!(
                        "entity {} declares collection {} but it is not mapped",
                        metadata.name, role
                    )));
                }
            }
            for target in metadata.dependencies() {
                if !entities.contains_key(target) {
                    return Err(Error::config(format!(
                        "entity {} references unmapped entity {}",
                        metadata.name, target
                    )));
                }
            }
        }

        tracing::info!(
            dialect = self.dialect.name(),
            entities = entities.len(),
            collections = collections.len(),
            listeners = self.listeners.listener_count(),
            "Built session factory"
        );
        Ok(SessionFactory {
            inner: Arc::new(FactoryInner {
                dialect: self.dialect,
                config: self.config,
                entities,
                collections,
                orderer,
                listeners: self.listeners,
                statistics: self.statistics.unwrap_or_default(),
            }),
        })
    }
}
