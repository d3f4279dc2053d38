//! Persistence layer: user records and device preferences.

mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Fields, PreferenceStore, UserRecord, UserRecordStore, field_keys};
