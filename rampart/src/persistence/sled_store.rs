use crate::domain::Entity;
use crate::ports::EntityStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::{Error, Result};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::Path;

/// Sled-backed persistent store for one entity family
///
/// Trees per family: `<family>:entities` (id -> JSON), `<family>:by_parent`
/// (parent ++ id -> empty) and `<family>:by_natural` (natural key -> id).
/// Ids are big-endian so tree order is id order.
pub struct SledEntityStore<E: Entity> {
    db: sled::Db,
    entities: sled::Tree,
    by_parent: sled::Tree,
    by_natural: sled::Tree,
    // Serialises writes so the secondary trees never disagree with `entities`
    write_lock: Mutex<()>,
    _family: PhantomData<fn() -> E>,
}

impl<E: Entity> SledEntityStore<E> {
    /// Open a dedicated database at `path`.
    /// Creates the parent directory if it doesn't exist
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Internal(format!("Failed to open Sled database: {}", e)))?;

        Self::with_db(db)
    }

    /// Share one database between several families.
    pub fn with_db(db: sled::Db) -> Result<Self> {
        let open = |suffix: &str| {
            db.open_tree(format!("{}:{}", E::FAMILY, suffix))
                .map_err(|e| Error::Internal(format!("Failed to open tree: {}", e)))
        };

        Ok(Self {
            entities: open("entities")?,
            by_parent: open("by_parent")?,
            by_natural: open("by_natural")?,
            db,
            write_lock: Mutex::new(()),
            _family: PhantomData,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| Error::Store(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }

    fn load_row(&self, id: i64) -> Result<Option<E>> {
        let value = self
            .entities
            .get(id.to_be_bytes())
            .map_err(|e| Error::Store(format!("Failed to get entity: {}", e)))?;

        match value {
            Some(bytes) => {
                let entity: E = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::Serialization(format!("Failed to deserialize entity: {}", e))
                })?;
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    fn write_row(&self, id: i64, entity: &E) -> Result<()> {
        let value = serde_json::to_vec(entity)
            .map_err(|e| Error::Serialization(format!("Failed to serialize entity: {}", e)))?;
        self.entities
            .insert(id.to_be_bytes(), value)
            .map_err(|e| Error::Store(format!("Failed to save entity: {}", e)))?;
        Ok(())
    }

    fn max_id(&self) -> Result<i64> {
        let last = self
            .entities
            .last()
            .map_err(|e| Error::Store(format!("Failed to read last entity: {}", e)))?;
        match last {
            Some((key, _)) => decode_id(&key),
            None => Ok(0),
        }
    }

    fn natural_owner(&self, natural_key: &str) -> Result<Option<i64>> {
        let value = self
            .by_natural
            .get(natural_key.as_bytes())
            .map_err(|e| Error::Store(format!("Failed to read natural key: {}", e)))?;
        value.map(|bytes| decode_id(&bytes)).transpose()
    }

    fn index(&self, id: i64, entity: &E) -> Result<()> {
        if let Some(parent_id) = entity.parent_id() {
            self.by_parent
                .insert(parent_key(parent_id, id), sled::IVec::default())
                .map_err(|e| Error::Store(format!("Failed to index parent: {}", e)))?;
        }
        if let Some(natural) = entity.natural_key() {
            self.by_natural
                .insert(natural.as_bytes(), id.to_be_bytes().to_vec())
                .map_err(|e| Error::Store(format!("Failed to index natural key: {}", e)))?;
        }
        Ok(())
    }

    fn unindex(&self, id: i64, entity: &E) -> Result<()> {
        if let Some(parent_id) = entity.parent_id() {
            self.by_parent
                .remove(parent_key(parent_id, id))
                .map_err(|e| Error::Store(format!("Failed to unindex parent: {}", e)))?;
        }
        if let Some(natural) = entity.natural_key() {
            self.by_natural
                .remove(natural.as_bytes())
                .map_err(|e| Error::Store(format!("Failed to unindex natural key: {}", e)))?;
        }
        Ok(())
    }

    /// Ids under `parent_id`, newest first.
    fn parent_ids(&self, parent_id: i64) -> impl Iterator<Item = Result<i64>> + '_ {
        self.by_parent
            .scan_prefix(parent_id.to_be_bytes())
            .rev()
            .map(|entry| {
                let (key, _) =
                    entry.map_err(|e| Error::Store(format!("Failed to scan index: {}", e)))?;
                decode_id(&key[8..])
            })
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for SledEntityStore<E> {
    async fn find_by_id(&self, id: i64) -> Result<Option<E>> {
        self.load_row(id)
    }

    async fn find_max_id(&self) -> Result<i64> {
        self.max_id()
    }

    async fn find_ids_by_parent(&self, parent_id: i64, limit: usize) -> Result<Vec<i64>> {
        self.parent_ids(parent_id).take(limit).collect()
    }

    async fn find_page_by_parent(
        &self,
        parent_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<E>> {
        let mut page = Vec::new();
        for id in self.parent_ids(parent_id).skip(offset).take(limit) {
            if let Some(entity) = self.load_row(id?)? {
                page.push(entity);
            }
        }
        Ok(page)
    }

    async fn find_id_by_natural_key(&self, natural_key: &str) -> Result<Option<i64>> {
        self.natural_owner(natural_key)
    }

    async fn insert(&self, entity: &mut E) -> Result<u64> {
        let _guard = self.write_lock.lock();

        if let Some(natural) = entity.natural_key() {
            if self.natural_owner(&natural)?.is_some() {
                return Ok(0);
            }
        }

        let id = self.max_id()? + 1;
        entity.set_id(id);
        self.write_row(id, entity)?;
        self.index(id, entity)?;
        Ok(1)
    }

    async fn update_by_id(&self, entity: &E) -> Result<u64> {
        let id = entity.require_id()?;
        let _guard = self.write_lock.lock();

        let Some(before) = self.load_row(id)? else {
            return Ok(0);
        };
        if let Some(natural) = entity.natural_key() {
            if self.natural_owner(&natural)?.is_some_and(|owner| owner != id) {
                return Ok(0);
            }
        }

        self.unindex(id, &before)?;
        self.write_row(id, entity)?;
        self.index(id, entity)?;
        Ok(1)
    }

    async fn delete_by_id(&self, id: i64) -> Result<u64> {
        let _guard = self.write_lock.lock();

        let Some(before) = self.load_row(id)? else {
            return Ok(0);
        };
        self.entities
            .remove(id.to_be_bytes())
            .map_err(|e| Error::Store(format!("Failed to delete entity: {}", e)))?;
        self.unindex(id, &before)?;
        Ok(1)
    }
}

impl<E: Entity> Debug for SledEntityStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledEntityStore")
            .field("family", &E::FAMILY)
            .field("entities", &self.entities.len())
            .finish()
    }
}

fn parent_key(parent_id: i64, id: i64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&parent_id.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

fn decode_id(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Store(format!("Corrupt id of {} bytes", bytes.len())))?;
    Ok(i64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Goods, User};

    fn open<E: Entity>(dir: &tempfile::TempDir) -> SledEntityStore<E> {
        SledEntityStore::new(dir.path().join("test.sled")).unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open::<Goods>(&temp_dir);

        assert_eq!(store.find_max_id().await.unwrap(), 0);

        let mut apple = Goods::new(1, "apple", 3, 120);
        let mut pear = Goods::new(1, "pear", 4, 90);
        assert_eq!(store.insert(&mut apple).await.unwrap(), 1);
        assert_eq!(store.insert(&mut pear).await.unwrap(), 1);

        assert_eq!(apple.id, Some(1));
        assert_eq!(pear.id, Some(2));
        assert_eq!(store.find_max_id().await.unwrap(), 2);
        assert_eq!(store.find_by_id(2).await.unwrap(), Some(pear));
        assert_eq!(store.find_by_id(3).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_parent_index_is_newest_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open::<Goods>(&temp_dir);

        for (store_id, name) in [(1, "a"), (2, "b"), (1, "c"), (1, "d")] {
            store
                .insert(&mut Goods::new(store_id, name, 1, 1))
                .await
                .unwrap();
        }

        assert_eq!(store.find_ids_by_parent(1, 10).await.unwrap(), vec![4, 3, 1]);
        assert_eq!(store.find_ids_by_parent(1, 2).await.unwrap(), vec![4, 3]);
        assert_eq!(store.find_ids_by_parent(9, 10).await.unwrap(), Vec::<i64>::new());

        let page = store.find_page_by_parent(1, 1, 5).await.unwrap();
        let names: Vec<&str> = page.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_natural_key_is_unique() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open::<User>(&temp_dir);

        assert_eq!(store.insert(&mut User::new("Ada", "ada")).await.unwrap(), 1);
        assert_eq!(store.insert(&mut User::new("Other", "ada")).await.unwrap(), 0);
        assert_eq!(store.find_id_by_natural_key("ada").await.unwrap(), Some(1));
        assert_eq!(store.find_id_by_natural_key("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_moves_indexes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open::<Goods>(&temp_dir);

        let mut goods = Goods::new(1, "kiwi", 1, 50);
        store.insert(&mut goods).await.unwrap();

        goods.store_id = 2;
        goods.name = "gold kiwi".to_string();
        assert_eq!(store.update_by_id(&goods).await.unwrap(), 1);

        assert!(store.find_ids_by_parent(1, 10).await.unwrap().is_empty());
        assert_eq!(store.find_ids_by_parent(2, 10).await.unwrap(), vec![1]);
        assert_eq!(store.find_id_by_natural_key("1:kiwi").await.unwrap(), None);
        assert_eq!(
            store.find_id_by_natural_key("2:gold kiwi").await.unwrap(),
            Some(1)
        );

        let mut ghost = goods.clone();
        ghost.id = Some(99);
        assert_eq!(store.update_by_id(&ghost).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open::<Goods>(&temp_dir);

        let mut goods = Goods::new(1, "fig", 1, 50);
        store.insert(&mut goods).await.unwrap();

        assert_eq!(store.delete_by_id(1).await.unwrap(), 1);
        assert_eq!(store.delete_by_id(1).await.unwrap(), 0);
        assert_eq!(store.find_by_id(1).await.unwrap(), None);
        assert!(store.find_ids_by_parent(1, 10).await.unwrap().is_empty());
        assert_eq!(store.find_id_by_natural_key("1:fig").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_families_share_a_database() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db = sled::open(temp_dir.path().join("shared.sled")).unwrap();
        let goods = SledEntityStore::<Goods>::with_db(db.clone()).unwrap();
        let users = SledEntityStore::<User>::with_db(db).unwrap();

        goods.insert(&mut Goods::new(1, "plum", 1, 1)).await.unwrap();
        assert_eq!(users.find_max_id().await.unwrap(), 0);
        assert_eq!(goods.find_max_id().await.unwrap(), 1);
    }
}
