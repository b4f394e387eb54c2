pub mod models;
pub mod queries;
pub mod queue;
mod sqlite;

pub use sqlite::Database;
