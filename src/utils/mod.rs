// Utility functions
pub mod error;
pub mod guard;

pub use error::*;
pub use guard::*;
