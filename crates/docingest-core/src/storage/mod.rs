pub mod queries;
pub mod sqlite;

pub use queries::ReviewFilter;
pub use sqlite::{lock, Database, SharedDatabase};
