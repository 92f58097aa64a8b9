use std::collections::BTreeMap;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, instrument, trace};
use uuid::Uuid;

/// A record kept in its own collection.
pub trait Entity: Serialize + DeserializeOwned + Clone {
    const COLLECTION: &'static str;

    fn id(&self) -> Uuid;

    /// Key that must be unique within the collection (`None` = unconstrained).
    fn unique_key(&self) -> Option<String> {
        None
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{collection} record {id} not found")]
    NotFound { collection: &'static str, id: Uuid },
    #[error("{collection} record conflicts with an existing record on '{key}'")]
    Conflict { collection: &'static str, key: String },
    #[error("{0}")]
    Transaction(String),
    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
}

/// Repository-style access to persisted records.
pub trait Store {
    fn get<T: Entity>(&self, id: &Uuid) -> Result<Option<T>, StoreError>;

    /// Inserts or replaces the record with the same id.
    fn persist<T: Entity>(&mut self, entity: &T) -> Result<(), StoreError>;

    /// Returns `false` if there was nothing to remove.
    fn remove<T: Entity>(&mut self, id: &Uuid) -> Result<bool, StoreError>;

    fn find_by<T, F>(&self, filter: F) -> Result<Vec<T>, StoreError>
    where
        T: Entity,
        F: Fn(&T) -> bool;

    fn find_one_by<T, F>(&self, filter: F) -> Result<Option<T>, StoreError>
    where
        T: Entity,
        F: Fn(&T) -> bool,
    {
        Ok(self.find_by(filter)?.into_iter().next())
    }

    /// Like `get`, but a missing record is an error.
    fn fetch<T: Entity>(&self, id: &Uuid) -> Result<T, StoreError> {
        self.get(id)?.ok_or(StoreError::NotFound {
            collection: T::COLLECTION,
            id: *id,
        })
    }

    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;
}

#[derive(Clone, Debug, Default)]
struct Collections {
    documents: BTreeMap<&'static str, BTreeMap<Uuid, Value>>,
    unique: BTreeMap<&'static str, BTreeMap<String, Uuid>>,
}

/// Document store held in memory. Records are kept as JSON, so every read
/// hands out an independent copy, exactly like a database round trip.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    current: Collections,
    snapshot: Option<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Number of records in the collection of `T`.
    pub fn count<T: Entity>(&self) -> usize {
        self.current
            .documents
            .get(T::COLLECTION)
            .map_or(0, BTreeMap::len)
    }
}

impl Store for MemoryStore {
    fn get<T: Entity>(&self, id: &Uuid) -> Result<Option<T>, StoreError> {
        let document = self
            .current
            .documents
            .get(T::COLLECTION)
            .and_then(|collection| collection.get(id));
        match document {
            Some(document) => Ok(Some(serde_json::from_value(document.clone())?)),
            None => Ok(None),
        }
    }

    #[instrument(skip_all, fields(collection = T::COLLECTION, id = %entity.id()))]
    fn persist<T: Entity>(&mut self, entity: &T) -> Result<(), StoreError> {
        let id = entity.id();
        let previous_key = match self.get::<T>(&id)? {
            Some(previous) => previous.unique_key(),
            None => None,
        };
        let key = entity.unique_key();

        let unique = self.current.unique.entry(T::COLLECTION).or_default();
        if let Some(key) = &key {
            if let Some(owner) = unique.get(key) {
                if *owner != id {
                    debug!(%key, %owner, "unique key already taken");
                    return Err(StoreError::Conflict {
                        collection: T::COLLECTION,
                        key: key.clone(),
                    });
                }
            }
        }
        if let Some(previous_key) = previous_key {
            unique.remove(&previous_key);
        }
        if let Some(key) = key {
            unique.insert(key, id);
        }

        let document = serde_json::to_value(entity)?;
        self.current
            .documents
            .entry(T::COLLECTION)
            .or_default()
            .insert(id, document);
        trace!("record persisted");
        Ok(())
    }

    fn remove<T: Entity>(&mut self, id: &Uuid) -> Result<bool, StoreError> {
        let Some(previous) = self.get::<T>(id)? else {
            return Ok(false);
        };
        if let Some(key) = previous.unique_key() {
            if let Some(unique) = self.current.unique.get_mut(T::COLLECTION) {
                unique.remove(&key);
            }
        }
        if let Some(collection) = self.current.documents.get_mut(T::COLLECTION) {
            collection.remove(id);
        }
        trace!(collection = T::COLLECTION, %id, "record removed");
        Ok(true)
    }

    fn find_by<T, F>(&self, filter: F) -> Result<Vec<T>, StoreError>
    where
        T: Entity,
        F: Fn(&T) -> bool,
    {
        let Some(collection) = self.current.documents.get(T::COLLECTION) else {
            return Ok(vec![]);
        };
        let mut found = vec![];
        for document in collection.values() {
            let record: T = serde_json::from_value(document.clone())?;
            if filter(&record) {
                found.push(record);
            }
        }
        Ok(found)
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        if self.snapshot.is_some() {
            return Err(StoreError::Transaction(
                "a transaction is already in progress".to_string(),
            ));
        }
        self.snapshot = Some(self.current.clone());
        debug!("transaction started");
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        if self.snapshot.take().is_none() {
            return Err(StoreError::Transaction(
                "no transaction to commit".to_string(),
            ));
        }
        debug!("transaction committed");
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let Some(snapshot) = self.snapshot.take() else {
            return Err(StoreError::Transaction(
                "no transaction to roll back".to_string(),
            ));
        };
        self.current = snapshot;
        debug!("transaction rolled back");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EnrolledUser, TemplateTest};
    use pretty_assertions::assert_eq;

    #[test]
    fn persist_and_get_round_trip() {
        let mut store = MemoryStore::new();
        let test = TemplateTest::new("Algebra".into(), None, None);
        store.persist(&test).unwrap();

        let loaded: TemplateTest = store.fetch(&test.id).unwrap();
        assert_eq!(loaded, test);
        assert_eq!(store.count::<TemplateTest>(), 1);
    }

    #[test]
    fn unique_key_conflict_is_rejected() {
        let mut store = MemoryStore::new();
        let term_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let first = EnrolledUser::new(term_id, user_id, 7);
        let second = EnrolledUser::new(term_id, user_id, 8);

        store.persist(&first).unwrap();
        let err = store.persist(&second).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // updating the owner of the key is fine
        let mut first = first;
        first.locked = true;
        store.persist(&first).unwrap();

        // once removed, the pair may be enrolled again
        assert!(store.remove::<EnrolledUser>(&first.id).unwrap());
        store.persist(&second).unwrap();
    }

    #[test]
    fn rollback_restores_snapshot() {
        let mut store = MemoryStore::new();
        let kept = TemplateTest::new("Kept".into(), None, None);
        store.persist(&kept).unwrap();

        store.begin().unwrap();
        assert!(store.begin().is_err());
        let dropped = TemplateTest::new("Dropped".into(), None, None);
        store.persist(&dropped).unwrap();
        store.rollback().unwrap();

        assert!(store.get::<TemplateTest>(&dropped.id).unwrap().is_none());
        assert!(store.get::<TemplateTest>(&kept.id).unwrap().is_some());
        assert!(store.commit().is_err());
    }

    #[test]
    fn find_by_filters_records() {
        let mut store = MemoryStore::new();
        for caption in ["a", "b", "c"] {
            store
                .persist(&TemplateTest::new(caption.into(), None, None))
                .unwrap();
        }
        let found: Vec<TemplateTest> = store
            .find_by(|t: &TemplateTest| t.caption.resolve("en") != "b")
            .unwrap();
        assert_eq!(found.len(), 2);
        let none: Option<TemplateTest> = store
            .find_one_by(|t: &TemplateTest| t.caption.resolve("en") == "z")
            .unwrap();
        assert!(none.is_none());
    }
}
