use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson};
use mongodb::options::IndexOptions;
use mongodb::{Collection, Database, IndexModel};
use tokio_util::sync::CancellationToken;

use crate::config::StoreConfig;
use crate::database::MongoDB;
use crate::models::{InsertAck, User};
use crate::services::cursor::UserCursor;
use crate::services::repository::{UserRepository, NAME_INDEX};
use crate::utils::error::{is_namespace_not_found, StoreError};
use crate::utils::guard::CallGuard;

#[derive(Clone, Debug)]
enum StoreState {
    Disconnected,
    Connected {
        database: Database,
        users: Collection<User>,
    },
}

/// MongoDB-backed [`UserRepository`] over a single collection.
#[derive(Clone, Debug)]
pub struct UserStore {
    state: StoreState,
    guard: CallGuard,
}

impl UserStore {
    /// Binds the store to `config.collection` on an already connected handle.
    pub fn new(db: &MongoDB, config: &StoreConfig) -> Self {
        Self::with_collection(db, &config.collection)
            .with_guard(CallGuard::default().with_timeout(config.operation_timeout))
    }

    pub fn with_collection(db: &MongoDB, collection: &str) -> Self {
        Self {
            state: StoreState::Connected {
                database: db.database().clone(),
                users: db.collection::<User>(collection),
            },
            guard: CallGuard::default(),
        }
    }

    /// A store with no connection; every operation fails with `NotConnected`.
    pub fn disconnected() -> Self {
        Self {
            state: StoreState::Disconnected,
            guard: CallGuard::default(),
        }
    }

    pub fn with_guard(mut self, guard: CallGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Every subsequent call (and cursor read) aborts once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.guard = self.guard.with_cancellation(token);
        self
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, StoreState::Connected { .. })
    }

    /// Releases this store's collection handle. The shared client stays open.
    pub fn disconnect(&mut self) {
        self.state = StoreState::Disconnected;
    }

    fn users(&self) -> Result<&Collection<User>, StoreError> {
        match &self.state {
            StoreState::Connected { users, .. } => Ok(users),
            StoreState::Disconnected => Err(StoreError::NotConnected),
        }
    }

    fn database(&self) -> Result<&Database, StoreError> {
        match &self.state {
            StoreState::Connected { database, .. } => Ok(database),
            StoreState::Disconnected => Err(StoreError::NotConnected),
        }
    }

    /// Looks up an index whose only key is a descending `name`.
    /// Returns its name and whether it enforces uniqueness over the whole collection.
    async fn existing_name_index(
        users: &Collection<User>,
    ) -> Result<Option<(String, bool)>, StoreError> {
        let mut cursor = match users.list_indexes().await {
            Ok(cursor) => cursor,
            // Collection does not exist yet, so neither does the index
            Err(e) if is_namespace_not_found(&e) => return Ok(None),
            Err(e) => return Err(StoreError::index_creation(e)),
        };

        while let Some(index) = cursor.try_next().await.map_err(StoreError::index_creation)? {
            if !is_descending_name_key(&index.keys) {
                continue;
            }
            let options = index.options.unwrap_or_default();
            let enforced = is_collection_wide_unique(&options);
            let name = options.name.unwrap_or_else(|| NAME_INDEX.to_string());
            return Ok(Some((name, enforced)));
        }

        Ok(None)
    }
}

/// True when `keys` is exactly `{ name: -1 }`, whatever numeric type the server echoes back.
pub(crate) fn is_descending_name_key(keys: &mongodb::bson::Document) -> bool {
    if keys.len() != 1 {
        return false;
    }
    match keys.get("name") {
        Some(Bson::Int32(v)) => *v == -1,
        Some(Bson::Int64(v)) => *v == -1,
        Some(Bson::Double(v)) => *v == -1.0,
        _ => false,
    }
}

/// A partial or collated unique index lets equal names coexist, so only a plain one counts.
pub(crate) fn is_collection_wide_unique(options: &IndexOptions) -> bool {
    options.unique.unwrap_or(false)
        && options.partial_filter_expression.is_none()
        && options.collation.is_none()
}

#[async_trait]
impl UserRepository for UserStore {
    type Users = UserCursor;

    async fn ensure_unique_index(&self) -> Result<String, StoreError> {
        let users = self.users()?;

        self.guard
            .run("ensure_unique_index", async {
                match Self::existing_name_index(users).await? {
                    Some((name, true)) => {
                        log::debug!("Index already exists: {}", name);
                        return Ok(name);
                    }
                    Some((name, false)) => {
                        return Err(StoreError::IndexCreation {
                            reason: format!(
                                "index '{}' on {} does not enforce uniqueness across the collection",
                                name,
                                users.name()
                            ),
                            source: None,
                        });
                    }
                    None => {}
                }

                let index = IndexModel::builder()
                    .keys(doc! { "name": -1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name(NAME_INDEX.to_string())
                            .build(),
                    )
                    .build();

                let created = users
                    .create_index(index)
                    .await
                    .map_err(StoreError::index_creation)?;

                log::info!("Index created: {}({})", users.name(), created.index_name);
                Ok::<_, StoreError>(created.index_name)
            })
            .await
    }

    async fn insert(&self, user: &User) -> Result<InsertAck, StoreError> {
        let users = self.users()?;

        self.guard
            .run("insert", async {
                users
                    .insert_one(user)
                    .await
                    .map(|result| InsertAck::from_bson(&result.inserted_id))
                    .map_err(|e| StoreError::from_insert(e, &user.name))
            })
            .await
    }

    async fn find_by_name(&self, name: &str) -> Result<User, StoreError> {
        let users = self.users()?;

        self.guard
            .run("find_by_name", async {
                // With the unique index in place at most one document can match
                users
                    .find_one(doc! { "name": name })
                    .await
                    .map_err(StoreError::from_driver)?
                    .ok_or_else(|| StoreError::NotFound {
                        name: name.to_string(),
                    })
            })
            .await
    }

    async fn find_all(&self) -> Result<UserCursor, StoreError> {
        let users = self.users()?;

        let cursor = self
            .guard
            .run("find_all", async {
                users.find(doc! {}).await.map_err(StoreError::from_driver)
            })
            .await?;

        Ok(UserCursor::new(cursor, &self.guard))
    }

    async fn drop_collection(&self) -> Result<(), StoreError> {
        let users = self.users()?;

        self.guard
            .run("drop_collection", async { StoreError::tolerate_missing(users.drop().await) })
            .await
    }

    async fn drop_database(&self) -> Result<(), StoreError> {
        let database = self.database()?;

        self.guard
            .run("drop_database", async { StoreError::tolerate_missing(database.drop().await) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rstest::rstest;

    #[rstest]
    #[case(doc! { "name": -1 }, true)]
    #[case(doc! { "name": -1_i64 }, true)]
    #[case(doc! { "name": -1.0 }, true)]
    #[case(doc! { "name": 1 }, false)]
    #[case(doc! { "name": "text" }, false)]
    #[case(doc! { "name": -1, "age": 1 }, false)]
    #[case(doc! { "_id": 1 }, false)]
    fn test_descending_name_key_detection(
        #[case] keys: mongodb::bson::Document,
        #[case] expected: bool,
    ) {
        assert_eq!(is_descending_name_key(&keys), expected);
    }

    #[test]
    fn test_only_plain_unique_index_counts_as_enforcing() {
        use mongodb::options::Collation;

        let plain = IndexOptions::builder().unique(true).build();
        assert!(is_collection_wide_unique(&plain));

        assert!(!is_collection_wide_unique(&IndexOptions::default()));
        assert!(!is_collection_wide_unique(&IndexOptions::builder().unique(false).build()));

        let partial = IndexOptions::builder()
            .unique(true)
            .partial_filter_expression(doc! { "age": { "$gte": 18 } })
            .build();
        assert!(!is_collection_wide_unique(&partial));

        let collated = IndexOptions::builder()
            .unique(true)
            .collation(Collation::builder().locale("en".to_string()).build())
            .build();
        assert!(!is_collection_wide_unique(&collated));
    }

    #[tokio::test]
    async fn test_disconnected_store_rejects_every_operation() {
        let store = UserStore::disconnected();
        assert!(!store.is_connected());

        assert!(matches!(store.ensure_unique_index().await, Err(StoreError::NotConnected)));
        assert!(matches!(
            store.insert(&User::new("Kevin", 20)).await,
            Err(StoreError::NotConnected)
        ));
        assert!(matches!(store.find_by_name("Kevin").await, Err(StoreError::NotConnected)));
        assert!(matches!(store.find_all().await, Err(StoreError::NotConnected)));
        assert!(matches!(store.drop_collection().await, Err(StoreError::NotConnected)));
        assert!(matches!(store.drop_database().await, Err(StoreError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_moves_store_to_disconnected() {
        // Client construction is lazy; no server is contacted here.
        let client = mongodb::Client::with_uri_str("mongodb://localhost:27017")
            .await
            .unwrap();
        let mut store = UserStore {
            state: StoreState::Connected {
                database: client.database("test"),
                users: client.database("test").collection("users"),
            },
            guard: CallGuard::default(),
        };
        assert!(store.is_connected());

        store.disconnect();
        assert!(!store.is_connected());
        assert!(matches!(store.find_by_name("Kevin").await, Err(StoreError::NotConnected)));
    }

    async fn live_store() -> (MongoDB, UserStore) {
        dotenv::dotenv().ok();
        let mut config = StoreConfig::from_env().unwrap();
        config.database = format!("user_store_test_{}", mongodb::bson::oid::ObjectId::new().to_hex());
        let db = MongoDB::connect(&config).await.unwrap();
        let store = UserStore::new(&db, &config);
        (db, store)
    }

    #[tokio::test]
    #[ignore] // Requires MongoDB to be running
    async fn test_ensure_unique_index_is_idempotent() {
        let (db, store) = live_store().await;

        let first = store.ensure_unique_index().await.unwrap();
        let second = store.ensure_unique_index().await.unwrap();
        assert_eq!(first, NAME_INDEX);
        assert_eq!(first, second);

        store.drop_database().await.unwrap();
        db.shutdown().await;
    }

    #[tokio::test]
    #[ignore] // Requires MongoDB to be running
    async fn test_non_unique_name_index_is_a_conflict() {
        let (db, store) = live_store().await;

        let plain = IndexModel::builder().keys(doc! { "name": -1 }).build();
        store.users().unwrap().create_index(plain).await.unwrap();

        let err = store.ensure_unique_index().await.unwrap_err();
        assert!(matches!(err, StoreError::IndexCreation { .. }));

        store.drop_database().await.unwrap();
        db.shutdown().await;
    }

    #[tokio::test]
    #[ignore] // Requires MongoDB to be running
    async fn test_partial_unique_name_index_is_a_conflict() {
        let (db, store) = live_store().await;

        let partial = IndexModel::builder()
            .keys(doc! { "name": -1 })
            .options(
                IndexOptions::builder()
                    .unique(true)
                    .partial_filter_expression(doc! { "age": { "$gte": 18 } })
                    .build(),
            )
            .build();
        store.users().unwrap().create_index(partial).await.unwrap();

        let err = store.ensure_unique_index().await.unwrap_err();
        assert!(matches!(err, StoreError::IndexCreation { source: None, .. }));

        store.drop_database().await.unwrap();
        db.shutdown().await;
    }

    #[tokio::test]
    #[ignore] // Requires MongoDB to be running
    async fn test_early_break_releases_cursor() {
        let (db, store) = live_store().await;
        for (name, age) in [("Kevin", 20), ("Ana", 30), ("Rui", 41)] {
            store.insert(&User::new(name, age)).await.unwrap();
        }

        {
            let mut cursor = store.find_all().await.unwrap();
            let first = cursor.next().await.unwrap().unwrap();
            assert!(!first.name.is_empty());
        }

        let all = store.find_all().await.unwrap().collect_users().await.unwrap();
        assert_eq!(all.len(), 3);

        store.drop_database().await.unwrap();
        db.shutdown().await;
    }

    #[tokio::test]
    #[ignore] // Requires MongoDB to be running
    async fn test_malformed_document_is_decode_error() {
        let (db, store) = live_store().await;
        store
            .users()
            .unwrap()
            .clone_with_type::<mongodb::bson::Document>()
            .insert_one(doc! { "name": "Broken", "age": "old" })
            .await
            .unwrap();

        let err = store.find_by_name("Broken").await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));

        let err = store.find_all().await.unwrap().collect_users().await.unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));

        store.drop_database().await.unwrap();
        db.shutdown().await;
    }

    #[tokio::test]
    #[ignore] // Requires MongoDB to be running
    async fn test_drops_are_idempotent() {
        let (db, store) = live_store().await;

        store.drop_collection().await.unwrap();
        store.drop_collection().await.unwrap();
        store.drop_database().await.unwrap();
        store.drop_database().await.unwrap();

        db.shutdown().await;
    }
}
