//! The walkthrough the demo binary performs: index, insert, lookup, cursor scan,
//! then a second insert that the unique index must reject.

use futures::TryStreamExt;

use crate::models::{InsertAck, User};
use crate::services::UserRepository;
use crate::utils::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub index_name: String,
    pub insert: InsertAck,
    pub found: User,
    pub all_users: Vec<User>,
    /// Set when the second insert of the same name was refused with `DuplicateKey`
    pub duplicate_rejected: bool,
}

pub async fn run<R: UserRepository>(repo: &R) -> Result<ScenarioReport, StoreError> {
    let index_name = repo.ensure_unique_index().await?;
    log::info!("Index created: {}", index_name);

    let insert = repo.insert(&User::new("Kevin", 20)).await?;
    log::info!("Insert result: {}", insert);

    let found = repo.find_by_name("Kevin").await?;
    log::info!("Name: {}", found.name);
    log::info!("Age: {}", found.age);

    let all_users: Vec<User> = repo.find_all().await?.try_collect().await?;
    log::info!(
        "All items: [{}]",
        all_users
            .iter()
            .map(User::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    );

    let duplicate_rejected = match repo.insert(&User::new("Kevin", 60)).await {
        Ok(ack) => {
            log::warn!("Duplicate insert was accepted: {}", ack);
            false
        }
        Err(e) if e.is_duplicate_key() => {
            log::info!("Failed to insert: {}", e);
            true
        }
        Err(e) => return Err(e),
    };

    Ok(ScenarioReport {
        index_name,
        insert,
        found,
        all_users,
        duplicate_rejected,
    })
}

/// Drops the collection, then its database. Both steps run even if the first fails.
pub async fn teardown<R: UserRepository>(repo: &R) -> Result<(), StoreError> {
    let collection = repo.drop_collection().await;
    let database = repo.drop_database().await;
    collection.and(database)
}
