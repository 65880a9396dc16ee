//! Store access for the three pipeline stages
//!
//! - `analytical`: embedded staging store (SQLite file)
//! - `relational`: PostgreSQL, reached through a sqlx pool
//! - `document`: MongoDB collection of cleaned trips

pub mod analytical;
pub mod connection;
pub mod document;
pub mod relational;

pub use analytical::{AnalyticalStore, StoreStatistics};
pub use connection::{init_pool, DbPool};
pub use document::{DocumentStore, MongoDocumentStore, TripDocument};
pub use relational::{PgRelationalStore, RelationalStore};
