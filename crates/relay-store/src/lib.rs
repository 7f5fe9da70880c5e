pub mod schema;
pub mod store;
pub mod types;

pub use store::{SqliteStore, Store};
pub use types::*;
