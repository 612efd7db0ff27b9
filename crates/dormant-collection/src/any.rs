//! A persistent collection of any shape.

use std::sync::Arc;

use dormant_core::{Cx, Error, Outcome, Value};

use crate::array::PersistentArrayHolder;
use crate::list::PersistentList;
use crate::loader::SessionLink;
use crate::map::PersistentMap;
use crate::metadata::{CollectionKind, CollectionMetadata};
use crate::persistent::PersistentCollection;
use crate::set::PersistentSet;
use crate::snapshot::Snapshot;
use crate::state::CollectionState;

/// The collections a persistence context holds, one variant per shape.
#[derive(Debug)]
pub enum AnyCollection {
    Set(PersistentSet),
    List(PersistentList),
    Array(PersistentArrayHolder),
    Map(PersistentMap),
}

macro_rules! delegate {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            AnyCollection::Set($c) => $body,
            AnyCollection::List($c) => $body,
            AnyCollection::Array($c) => $body,
            AnyCollection::Map($c) => $body,
        }
    };
}

impl AnyCollection {
    /// An unloaded collection of the role's shape.
    pub fn uninitialized(metadata: Arc<CollectionMetadata>, key: Value, session: SessionLink) -> Self {
        match metadata.kind {
            CollectionKind::Set => AnyCollection::Set(PersistentSet::uninitialized(metadata, key, session)),
            CollectionKind::List => AnyCollection::List(PersistentList::uninitialized(metadata, key, session)),
            CollectionKind::Array => {
                AnyCollection::Array(PersistentArrayHolder::uninitialized(metadata, key, session))
            }
            CollectionKind::Map => AnyCollection::Map(PersistentMap::uninitialized(metadata, key, session)),
        }
    }

    /// A new, empty collection of the role's shape.
    pub fn empty(metadata: Arc<CollectionMetadata>) -> Self {
        match metadata.kind {
            CollectionKind::Set => AnyCollection::Set(PersistentSet::new(metadata, Vec::new())),
            CollectionKind::List => AnyCollection::List(PersistentList::new(metadata, Vec::new())),
            CollectionKind::Array => AnyCollection::Array(PersistentArrayHolder::new(metadata, Vec::new())),
            CollectionKind::Map => AnyCollection::Map(PersistentMap::new(metadata, Vec::new())),
        }
    }

    pub fn kind(&self) -> CollectionKind {
        match self {
            AnyCollection::Set(_) => CollectionKind::Set,
            AnyCollection::List(_) => CollectionKind::List,
            AnyCollection::Array(_) => CollectionKind::Array,
            AnyCollection::Map(_) => CollectionKind::Map,
        }
    }

    pub async fn initialize(&mut self, cx: &Cx) -> Outcome<(), Error> {
        match self {
            AnyCollection::Set(c) => c.initialize(cx).await,
            AnyCollection::List(c) => c.initialize(cx).await,
            AnyCollection::Array(c) => c.initialize(cx).await,
            AnyCollection::Map(c) => c.initialize(cx).await,
        }
    }

    pub fn as_set_mut(&mut self) -> Option<&mut PersistentSet> {
        match self {
            AnyCollection::Set(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut PersistentList> {
        match self {
            AnyCollection::List(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut PersistentArrayHolder> {
        match self {
            AnyCollection::Array(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut PersistentMap> {
        match self {
            AnyCollection::Map(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&PersistentSet> {
        match self {
            AnyCollection::Set(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&PersistentList> {
        match self {
            AnyCollection::List(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&PersistentMap> {
        match self {
            AnyCollection::Map(c) => Some(c),
            _ => None,
        }
    }
}

impl PersistentCollection for AnyCollection {
    fn state(&self) -> &CollectionState {
        delegate!(self, c => c.state())
    }

    fn state_mut(&mut self) -> &mut CollectionState {
        delegate!(self, c => c.state_mut())
    }

    fn get_snapshot(&self) -> Snapshot {
        delegate!(self, c => c.get_snapshot())
    }
}

impl From<PersistentSet> for AnyCollection {
    fn from(c: PersistentSet) -> Self {
        AnyCollection::Set(c)
    }
}

impl From<PersistentList> for AnyCollection {
    fn from(c: PersistentList) -> Self {
        AnyCollection::List(c)
    }
}

impl From<PersistentArrayHolder> for AnyCollection {
    fn from(c: PersistentArrayHolder) -> Self {
        AnyCollection::Array(c)
    }
}

impl From<PersistentMap> for AnyCollection {
    fn from(c: PersistentMap) -> Self {
        AnyCollection::Map(c)
    }
}
