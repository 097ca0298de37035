//! # ShelfSync
//!
//! A validation, normalization, and synchronization engine for book catalog
//! records scraped from reading platforms.
//!
//! ShelfSync takes heterogeneous raw records (Readmoo, Kindle, Kobo,
//! BookWalker, Books.com) and runs them through a batched validation
//! pipeline that repairs what it can, normalizes survivors into one
//! canonical schema with content-addressed identity, and scores batch
//! quality. A separate orchestrator diffs two canonical record sets,
//! detects concurrent-edit conflicts, picks a sync strategy, and executes
//! the sync under retry management.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Raw records  │──▶│  Pipeline    │──▶│  Canonical   │
//! │ per platform │   │ validate+fix │   │ books (v2.0) │
//! └──────────────┘   │ +normalize   │   └──────┬───────┘
//!                    └──────┬───────┘          │
//!                           │ cache            ▼
//!                           ▼           ┌──────────────┐
//!                    ┌──────────────┐   │ Orchestrator │
//!                    │  TTL cache   │   │ diff→conflict│
//!                    │  + store     │   │ →strategy→run│
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! shelfsync validate books.json --platform readmoo
//! shelfsync sync local.json remote.json
//! shelfsync stats local.json remote.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and option validation |
//! | [`models`] | Raw and canonical record types |
//! | [`error`] | Pipeline and sync error taxonomy |
//! | [`normalize`] | Field decoders and the canonical transform |
//! | [`validate`] | Platform rule tables, auto-fix, validation passes |
//! | [`quality`] | Batch quality scoring |
//! | [`cache`] | Bounded TTL validation cache |
//! | [`pipeline`] | Batched validation pipeline with timeout |
//! | [`progress`] | Pipeline event stream |
//! | [`compare`] | Record-set diffing |
//! | [`conflict`] | Conflict detection and resolution |
//! | [`retry`] | Bounded-attempt retry with backoff |
//! | [`sync`] | Staged synchronization orchestrator |
//! | [`store`] | Key-value persistence seam |

pub mod cache;
pub mod compare;
pub mod config;
pub mod conflict;
pub mod error;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod quality;
pub mod retry;
pub mod store;
pub mod sync;
pub mod validate;
