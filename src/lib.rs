//! # kb-retrieval
//!
//! Multi-tenant knowledge base retrieval: hybrid search (vector +
//! keyword fusion with optional reranking), a document processing
//! pipeline, and a migration coordinator that re-embeds indexed content
//! between embedding stores.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌───────────────┐   ┌─────────────┐
//! │   Documents    │──▶│   Pipeline    │──▶│   SQLite     │
//! │ (uploaded kb)  │   │ chunk+embed   │   │ FTS5 + vec  │
//! └───────────────┘   └───────────────┘   └──────┬──────┘
//!                                                │
//!                        ┌──────────────┬────────┤
//!                        ▼              ▼        ▼
//!                  ┌──────────┐  ┌──────────┐ ┌──────────┐
//!                  │  Search  │  │ Migrate  │ │   CLI    │
//!                  │ (hybrid) │  │ (stores) │ │  (kbr)   │
//!                  └──────────┘  └──────────┘ └──────────┘
//! ```
//!
//! The algorithms live in [`kb_retrieval_core`]; this crate provides the
//! SQLite adapters, the HTTP embedding/rerank providers, TOML
//! configuration, and the `kbr` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite connection and schema |
//! | [`sqlite_store`] | Capability-trait adapters over SQLite |
//! | [`embedding`] | OpenAI-compatible embedding provider |
//! | [`reranker`] | HTTP reranker provider |

pub mod config;
pub mod db;
pub mod embedding;
pub mod reranker;
pub mod sqlite_store;
