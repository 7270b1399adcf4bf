pub mod cursor;
pub mod memory_store;
pub mod repository;
pub mod user_store;

pub use cursor::*;
pub use memory_store::*;
pub use repository::*;
pub use user_store::*;
