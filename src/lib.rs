//! Repository-style access to a MongoDB `users` collection.
//!
//! [`services::UserStore`] wraps one collection behind [`services::UserRepository`];
//! [`services::MemoryUserStore`] implements the same trait in process.

pub mod config;
pub mod database;
pub mod models;
pub mod scenario;
pub mod services;
pub mod utils;

pub use config::StoreConfig;
pub use database::MongoDB;
pub use models::{InsertAck, User};
pub use services::{MemoryUserStore, UserCursor, UserRepository, UserStore};
pub use utils::{CallGuard, StoreError};
