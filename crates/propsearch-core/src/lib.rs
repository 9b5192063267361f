//! # propsearch core
//!
//! Runtime-free logic for propsearch: listing models, streaming chunk
//! adapters, structured-output recovery, intent validation, filter merging,
//! amenity synonyms, hybrid ranking, and the listing store abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or other I/O. The
//! application crate wires these pieces to a chat provider, a SQLite store
//! and an HTTP/SSE surface.

pub mod chunk;
pub mod extract;
pub mod filters;
pub mod intent;
pub mod models;
pub mod ranking;
pub mod store;
pub mod synonyms;
