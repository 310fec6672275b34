//! Persistent state layer for plexaccess.
//!
//! This module provides:
//! - An ordered key-value engine over an embedded SQLite database
//! - A fixed key namespace for singleton records and per-user records
//! - A JSON codec for the persisted entities
//! - The `Store`, which composes the above with envelope encryption of
//!   the upstream token
//!
//! # Architecture
//! Callers only see `Store`. Every `Store` method runs inside exactly one
//! engine transaction, so no caller ever observes a partial write.

pub mod codec;
pub mod config;
pub mod engine;
pub mod keys;
pub mod model;
pub mod store;

pub use codec::{decode, encode, Entity};
pub use config::StoreOptions;
pub use model::{AssignedMedia, PlexPin, Server, User};
pub use store::Store;
