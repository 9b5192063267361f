//! # propsearch
//!
//! Natural-language search over real-estate listings.
//!
//! A free-text query ("3 bedroom condo in Punggol under 1.5M") is sent to a
//! chat model, whose streamed answer is recovered into a validated intent,
//! merged with any explicit filters, and run against a SQLite listing store
//! with FTS5 text relevance. Results are ranked by text relevance, price fit
//! and recency, each with human-readable match reasons.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────┐
//! │ Chat model │──▶│ Intent       │──▶│ Retrieval  │──▶│  SQLite  │
//! │ (stream)   │   │ extract+check│   │ + ranking  │   │ FTS5     │
//! └────────────┘   └──────────────┘   └─────┬──────┘   └──────────┘
//!                                           │
//!                          ┌────────────────┤
//!                          ▼                ▼
//!                    ┌──────────┐     ┌────────────┐
//!                    │   CLI    │     │ HTTP + SSE │
//!                    └──────────┘     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! propsearch init
//! propsearch import listings.json
//! propsearch search "3 bedroom condo in Punggol under 1.5M" --stream
//! propsearch serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite listing store with FTS5 ranking |
//! | [`import`] | JSON listing import |
//! | [`llm`] | Streaming chat providers |
//! | [`intent`] | Query → intent service |
//! | [`search`] | Retrieval and ranking service |
//! | [`events`] | Streaming progress events |
//! | [`search_log`] | Search analytics records |
//! | [`progress`] | CLI progress rendering |
//! | [`server`] | HTTP server |
//!
//! Domain types, the extractor, filter merging and ranking live in the
//! `propsearch-core` crate.

pub mod config;
pub mod db;
pub mod events;
pub mod import;
pub mod intent;
pub mod llm;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod search_log;
pub mod server;
pub mod sqlite_store;
