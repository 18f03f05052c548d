//! # examsync-core
//!
//! Server-side reconciliation of an authored assessment tree.
//!
//! ## Overview
//!
//! An author edits a **Test** made of ordered **Sections**, each holding ordered **Questions**,
//! each holding ordered answer **Options**. The editor keeps a local copy of the whole tree and
//! periodically sends the full section list back. Nodes the client created carry placeholder ids
//! (`temp-...`) that mean nothing to storage; nodes it loaded carry real ids. examsync-core
//! decides, for every node, whether it is created, updated or deleted, and applies the whole
//! decision in a single storage transaction.
//!
//! ## Architecture
//!
//! - **[`nodekey`]**: `NodeKey`, the ephemeral-or-persisted identifier sum type, and per-parent
//!   classification
//! - **[`payload`]**: strict typed ingress of request bodies (`Snapshot`, `NewTest`, ...)
//! - **[`plan`]**: the diff planner. Pure; turns (stored tree, snapshot) into a `SyncPlan`
//! - **[`event`]**: the `TreeEvent`s a plan is made of
//! - **[`properties`]**: ids, rows and the canonical `TestTree`
//! - **[`db`]** (`service`): SQLite store, tree loader and the transactional executor
//! - **[`server`]** (`service`): the axum HTTP API
//! - **[`config`]** (`service`): TOML service configuration
//!
//! Control flow of one reconciliation:
//!
//! ```text
//! identity + ownership gate -> load stored tree -> SyncPlan::new -> SyncTransaction::apply
//!                                                                   -> commit -> reload
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "service")]
//! # async fn example() -> Result<(), examsync_core::SyncError> {
//! use examsync_core::{
//!     db::DbConnection,
//!     payload::{NewTest, Snapshot},
//!     properties::UserId,
//! };
//! use std::time::Duration;
//!
//! let db = DbConnection::open("examsync.db", Duration::from_secs(5)).await?;
//! let author = UserId::new("author-1")?;
//! let test = db.create_test(&author, &NewTest::titled("Midterm")).await?;
//!
//! let snapshot = Snapshot::from_json(
//!     br#"{"sections":[{"id":"temp-1","title":"Part A","questions":[
//!         {"id":"temp-2","type":"text","text":"Define entropy"}]}]}"#,
//! )?;
//! let outcome = db.sync_sections(&author, test.test.id, &snapshot).await?;
//! for section in &outcome.tree.sections {
//!     println!("{}: {}", section.id, section.title);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **default**: `service`
//! - **service**: SQLite store (`sqlx`), HTTP API (`axum`, `tower-http`), configuration
//! - **bin**: the `examsync` command line tool

#[cfg(feature = "service")]
pub mod config;
#[cfg(feature = "service")]
pub mod db;
pub mod error;
pub mod event;
pub mod nodekey;
pub mod payload;
pub mod plan;
pub mod properties;
#[cfg(feature = "service")]
pub mod server;
#[cfg(test)]
mod tests;

pub use error::*;
