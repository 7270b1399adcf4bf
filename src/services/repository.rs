use async_trait::async_trait;
use futures::Stream;

use crate::models::{InsertAck, User};
use crate::utils::error::StoreError;

/// Name given to the descending unique index over `name`.
pub const NAME_INDEX: &str = "name_-1";

/// CRUD-style access to one users collection.
///
/// Every method returns a typed [`StoreError`] instead of terminating; the only
/// failure a caller is expected to treat as a normal outcome is
/// [`StoreError::DuplicateKey`] from [`UserRepository::insert`].
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Lazy, single-consumer sequence of users produced by `find_all`.
    type Users: Stream<Item = Result<User, StoreError>> + Send + Unpin;

    /// Creates the unique `name` index if it is absent and returns its name.
    async fn ensure_unique_index(&self) -> Result<String, StoreError>;

    async fn insert(&self, user: &User) -> Result<InsertAck, StoreError>;

    /// Fails with `NotFound` when no user has this name.
    async fn find_by_name(&self, name: &str) -> Result<User, StoreError>;

    async fn find_all(&self) -> Result<Self::Users, StoreError>;

    /// Idempotent.
    async fn drop_collection(&self) -> Result<(), StoreError>;

    /// Idempotent.
    async fn drop_database(&self) -> Result<(), StoreError>;
}
