use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, Iter};
use mongodb::bson::oid::ObjectId;

use crate::models::{InsertAck, User};
use crate::services::repository::{UserRepository, NAME_INDEX};
use crate::utils::error::StoreError;

#[derive(Debug, Default)]
struct MemoryState {
    documents: Vec<(ObjectId, User)>,
    unique_name: bool,
}

/// In-process [`UserRepository`] with the same uniqueness rules as the server:
/// duplicates are only rejected once `ensure_unique_index` has run.
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    state: Mutex<MemoryState>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl UserRepository for MemoryUserStore {
    type Users = Iter<std::vec::IntoIter<Result<User, StoreError>>>;

    async fn ensure_unique_index(&self) -> Result<String, StoreError> {
        let mut state = self.state();
        if state.unique_name {
            return Ok(NAME_INDEX.to_string());
        }

        let duplicate = {
            let mut seen = std::collections::HashSet::new();
            state
                .documents
                .iter()
                .find(|(_, user)| !seen.insert(user.name.as_str()))
                .map(|(_, user)| user.name.clone())
        };
        if let Some(name) = duplicate {
            return Err(StoreError::IndexCreation {
                reason: format!("duplicate name '{}' prevents building {}", name, NAME_INDEX),
                source: None,
            });
        }

        state.unique_name = true;
        Ok(NAME_INDEX.to_string())
    }

    async fn insert(&self, user: &User) -> Result<InsertAck, StoreError> {
        let mut state = self.state();
        if state.unique_name && state.documents.iter().any(|(_, u)| u.name == user.name) {
            return Err(StoreError::DuplicateKey {
                name: user.name.clone(),
            });
        }

        let id = ObjectId::new();
        state.documents.push((id, user.clone()));
        Ok(InsertAck {
            inserted_id: id.to_hex(),
        })
    }

    async fn find_by_name(&self, name: &str) -> Result<User, StoreError> {
        self.state()
            .documents
            .iter()
            .find(|(_, user)| user.name == name)
            .map(|(_, user)| user.clone())
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }

    async fn find_all(&self) -> Result<Self::Users, StoreError> {
        let snapshot: Vec<_> = self
            .state()
            .documents
            .iter()
            .map(|(_, user)| Ok(user.clone()))
            .collect();
        Ok(stream::iter(snapshot))
    }

    async fn drop_collection(&self) -> Result<(), StoreError> {
        *self.state() = MemoryState::default();
        Ok(())
    }

    async fn drop_database(&self) -> Result<(), StoreError> {
        self.drop_collection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use rstest::rstest;

    async fn all_users(store: &MemoryUserStore) -> Vec<User> {
        store.find_all().await.unwrap().try_collect().await.unwrap()
    }

    #[rstest]
    #[case("Kevin", 20)]
    #[case("Ana", 0)]
    #[case("José da Silva", 104)]
    #[tokio::test]
    async fn test_insert_then_find_returns_equal_user(#[case] name: &str, #[case] age: i32) {
        let store = MemoryUserStore::new();
        store.ensure_unique_index().await.unwrap();

        let user = User::new(name, age);
        let ack = store.insert(&user).await.unwrap();
        assert_eq!(ack.inserted_id.len(), 24);
        assert_eq!(store.find_by_name(name).await.unwrap(), user);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_after_index() {
        let store = MemoryUserStore::new();
        store.ensure_unique_index().await.unwrap();

        store.insert(&User::new("Kevin", 20)).await.unwrap();
        let err = store.insert(&User::new("Kevin", 60)).await.unwrap_err();

        assert!(err.is_duplicate_key());
        assert_eq!(all_users(&store).await, vec![User::new("Kevin", 20)]);
    }

    #[tokio::test]
    async fn test_duplicates_allowed_without_index() {
        let store = MemoryUserStore::new();
        store.insert(&User::new("Kevin", 20)).await.unwrap();
        store.insert(&User::new("Kevin", 60)).await.unwrap();
        assert_eq!(store.len(), 2);

        // first match wins
        assert_eq!(store.find_by_name("Kevin").await.unwrap().age, 20);

        let err = store.ensure_unique_index().await.unwrap_err();
        assert!(matches!(err, StoreError::IndexCreation { .. }));
    }

    #[tokio::test]
    async fn test_ensure_unique_index_is_idempotent() {
        let store = MemoryUserStore::new();
        assert_eq!(store.ensure_unique_index().await.unwrap(), NAME_INDEX);
        assert_eq!(store.ensure_unique_index().await.unwrap(), NAME_INDEX);
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let store = MemoryUserStore::new();
        store.insert(&User::new("Kevin", 20)).await.unwrap();

        match store.find_by_name("Nobody").await {
            Err(StoreError::NotFound { name }) => assert_eq!(name, "Nobody"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_find_all_yields_exactly_inserted_users() {
        let store = MemoryUserStore::new();
        store.ensure_unique_index().await.unwrap();
        store.insert(&User::new("Kevin", 20)).await.unwrap();
        store.insert(&User::new("Ana", 30)).await.unwrap();

        let mut users = all_users(&store).await;
        users.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(users, vec![User::new("Ana", 30), User::new("Kevin", 20)]);
    }

    #[tokio::test]
    async fn test_find_all_is_a_snapshot() {
        let store = MemoryUserStore::new();
        store.insert(&User::new("Kevin", 20)).await.unwrap();

        let cursor = store.find_all().await.unwrap();
        store.insert(&User::new("Ana", 30)).await.unwrap();

        let users: Vec<User> = cursor.try_collect().await.unwrap();
        assert_eq!(users, vec![User::new("Kevin", 20)]);
    }

    #[tokio::test]
    async fn test_drop_collection_empties_and_removes_index() {
        let store = MemoryUserStore::new();
        store.ensure_unique_index().await.unwrap();
        store.insert(&User::new("Kevin", 20)).await.unwrap();

        store.drop_collection().await.unwrap();
        assert!(all_users(&store).await.is_empty());

        // index went with the collection
        store.insert(&User::new("Kevin", 20)).await.unwrap();
        store.insert(&User::new("Kevin", 21)).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_drops_are_idempotent() {
        let store = MemoryUserStore::new();
        store.drop_collection().await.unwrap();
        store.drop_collection().await.unwrap();
        store.drop_database().await.unwrap();
        assert!(store.is_empty());
    }
}
