//! booxsync-core - Core library for booxsync
//!
//! This crate contains the local-first synchronization engine used by the
//! e-reading client: the entity models, the local store, the token
//! authenticator, the per-entity sync gateway, the realtime change listener,
//! and the streaming client used for AI requests.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod realtime;
pub mod services;
pub mod storage;
pub mod streaming;
pub mod util;

pub use error::{Error, ErrorKind, Result};
pub use models::{AiNote, AiProfile, Bookmark, LibraryItem, LocalId, Locator, ReadingPosition};
