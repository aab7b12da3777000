//! Services shared by every client of the engine.

mod database;

pub use database::DatabaseService;
