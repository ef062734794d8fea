use crate::domain::Entity;
use crate::ports::EntityStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use shared::Result;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug)]
struct Tables<E> {
    rows: BTreeMap<i64, E>,
    by_parent: BTreeSet<(i64, i64)>,
    by_natural: HashMap<String, i64>,
}

impl<E: Entity> Tables<E> {
    fn index(&mut self, id: i64, entity: &E) {
        if let Some(parent_id) = entity.parent_id() {
            self.by_parent.insert((parent_id, id));
        }
        if let Some(natural) = entity.natural_key() {
            self.by_natural.insert(natural, id);
        }
    }

    fn unindex(&mut self, id: i64, entity: &E) {
        if let Some(parent_id) = entity.parent_id() {
            self.by_parent.remove(&(parent_id, id));
        }
        if let Some(natural) = entity.natural_key() {
            self.by_natural.remove(&natural);
        }
    }

    fn parent_ids(&self, parent_id: i64) -> impl Iterator<Item = i64> + '_ {
        self.by_parent
            .range((parent_id, i64::MIN)..=(parent_id, i64::MAX))
            .rev()
            .map(|&(_, id)| id)
    }

    fn max_id(&self) -> i64 {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }
}

/// In-memory entity store with the same contract as the sled store.
/// Used for tests and for seeding large synthetic families.
#[derive(Debug)]
pub struct MemoryEntityStore<E: Entity> {
    tables: RwLock<Tables<E>>,
}

impl<E: Entity> MemoryEntityStore<E> {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                rows: BTreeMap::new(),
                by_parent: BTreeSet::new(),
                by_natural: HashMap::new(),
            }),
        }
    }

    /// Bulk-load entities that already carry their ids.
    /// Entities without an id are assigned the next free one.
    pub fn with_entities(entities: impl IntoIterator<Item = E>) -> Self {
        let store = Self::new();
        {
            let mut tables = store.tables.write();
            for mut entity in entities {
                let id = match entity.id() {
                    Some(id) => id,
                    None => {
                        let id = tables.max_id() + 1;
                        entity.set_id(id);
                        id
                    }
                };
                tables.index(id, &entity);
                tables.rows.insert(id, entity);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.tables.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Entity> Default for MemoryEntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for MemoryEntityStore<E> {
    async fn find_by_id(&self, id: i64) -> Result<Option<E>> {
        Ok(self.tables.read().rows.get(&id).cloned())
    }

    async fn find_max_id(&self) -> Result<i64> {
        Ok(self.tables.read().max_id())
    }

    async fn find_ids_by_parent(&self, parent_id: i64, limit: usize) -> Result<Vec<i64>> {
        Ok(self.tables.read().parent_ids(parent_id).take(limit).collect())
    }

    async fn find_page_by_parent(
        &self,
        parent_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<E>> {
        let tables = self.tables.read();
        Ok(tables
            .parent_ids(parent_id)
            .skip(offset)
            .take(limit)
            .filter_map(|id| tables.rows.get(&id).cloned())
            .collect())
    }

    async fn find_id_by_natural_key(&self, natural_key: &str) -> Result<Option<i64>> {
        Ok(self.tables.read().by_natural.get(natural_key).copied())
    }

    async fn insert(&self, entity: &mut E) -> Result<u64> {
        let mut tables = self.tables.write();
        if let Some(natural) = entity.natural_key() {
            if tables.by_natural.contains_key(&natural) {
                return Ok(0);
            }
        }

        let id = tables.max_id() + 1;
        entity.set_id(id);
        tables.index(id, entity);
        tables.rows.insert(id, entity.clone());
        Ok(1)
    }

    async fn update_by_id(&self, entity: &E) -> Result<u64> {
        let id = entity.require_id()?;
        let mut tables = self.tables.write();

        let Some(before) = tables.rows.get(&id).cloned() else {
            return Ok(0);
        };
        if let Some(natural) = entity.natural_key() {
            if tables.by_natural.get(&natural).is_some_and(|&owner| owner != id) {
                return Ok(0);
            }
        }

        tables.unindex(id, &before);
        tables.index(id, entity);
        tables.rows.insert(id, entity.clone());
        Ok(1)
    }

    async fn delete_by_id(&self, id: i64) -> Result<u64> {
        let mut tables = self.tables.write();
        let Some(before) = tables.rows.remove(&id) else {
            return Ok(0);
        };
        tables.unindex(id, &before);
        Ok(1)
    }
}
