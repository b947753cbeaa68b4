//! # code-search-web
//!
//! Web front end for a regex code search backend, with a line-level blame
//! viewer computed from `git log` hunk headers.
//!
//! ## Architecture
//!
//! ```text
//!   browser ──ws──▶ ws::dispatcher ──▶ backend::Pool ──▶ backend::Client ──tcp──▶ search backend
//!   browser ──http──▶ api::search ──────────┘
//!
//!   git log ──▶ history::ingest ──▶ GitHistory ──▶ blame ──▶ blame::annotate ──▶ api::blame
//!                                                              ▲
//!                                   git::blob (file contents) ─┘
//! ```
//!
//! - [`history`] parses `git log -U0` (or its stripped form) into an arena of
//!   per-commit, per-path hunk lists.
//! - [`blame`] replays those hunks to attribute every line of a file to the
//!   commit that introduced it and the commit that next changes it.
//! - [`codec`] frames both wire protocols as newline-delimited JSON
//!   envelopes.
//! - [`backend`] keeps a supervised pool of connections per search backend.
//! - [`ws`] runs one live-search session per websocket, superseding stale
//!   queries.
//! - [`query`] parses the user's search expression.

pub mod api;
pub mod backend;
pub mod blame;
pub mod codec;
pub mod config;
pub mod git;
pub mod history;
pub mod models;
pub mod query;
pub mod state;
pub mod ws;
