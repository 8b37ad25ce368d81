//! # memledger
//!
//! A durable memory ledger for long-running agents, with hybrid
//! retrieval and bounded context-pack assembly.
//!
//! memledger indexes observation records for lexical (FTS5) and
//! semantic (vector) retrieval, extracts actionable items without any
//! model calls, and assembles bounded, auditable context packs for
//! injection into an agent prompt. Output is deterministic and
//! explainable even under partial degradation: a missing embedding
//! gateway, an index built with a drifted model, or a query in the
//! wrong language all degrade to a working lexical path with recorded
//! warnings.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌───────────────┐
//! │ Record Store │──▶│ Query Planner │──▶│ Hybrid Scorer │
//! │ SQLite       │   │ lexical+vector│   │ fuse + dedupe │
//! │ FTS5 + Vec   │   │ + fallback    │   └──────┬────────┘
//! └──────┬───────┘   └───────────────┘          │
//!        │                              ┌───────┴───────┐
//!        ▼                              ▼               ▼
//! ┌──────────────┐               ┌──────────┐   ┌──────────────┐
//! │ Triage Engine│               │  search  │   │ Context      │
//! │ tasks/errors │               │  results │   │ Packer       │
//! └──────────────┘               └──────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mled init                         # create database
//! mled load observations.jsonl      # load captured records
//! mled rebuild                      # build the vector index
//! mled search "deploy timeout"      # hybrid search
//! mled pack "deploy timeout"        # assemble a context pack
//! mled triage                       # extract tasks and error alerts
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`store`] | Record store access (FTS, vectors, metadata) |
//! | [`embedding`] | Embedding gateway abstraction |
//! | [`fingerprint`] | Vector-index fingerprint drift detection |
//! | [`planner`] | Query planning, concurrent execution, fallback |
//! | [`scorer`] | Hybrid score fusion and deduplication |
//! | [`triage`] | Deterministic task/error extraction |
//! | [`packer`] | Budgeted context-pack assembly |
//! | [`status`] | Health and index status surface |
//! | [`load`] | JSONL record loading |
//! | [`rebuild`] | Explicit vector index rebuild |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod embedding;
pub mod fingerprint;
pub mod load;
pub mod migrate;
pub mod models;
pub mod packer;
pub mod planner;
pub mod rebuild;
pub mod scorer;
pub mod search;
pub mod status;
pub mod store;
pub mod triage;
