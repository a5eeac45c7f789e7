//! # Apply Governor
//!
//! Session lifecycle and rate control for automated Easy Apply runs.
//!
//! Every run is bound to one platform identity (a logged-in account). The governor
//! guarantees that at most one run per identity executes at any time, even across
//! worker processes sharing a record store, and that every run's outcome feeds a
//! cooldown policy that backs off identities the platform has started to throttle
//! or challenge.
//!
//! ## Pieces
//!
//! - **Outcome classifier** ([`core::classify`]): maps raw driver signals onto a closed
//!   set of outcome kinds, with an explicit soft-failure fallback.
//! - **Cooldown policy** ([`core::CooldownPolicy`]): base duration per kind, escalated
//!   for repeats inside a lookback window and capped at a ceiling.
//! - **Admission** ([`core::AdmissionController`]): a single conditional update on the
//!   persisted record; no in-process lock is involved.
//! - **Run supervisor** ([`core::RunSupervisor`]): runs the driver with a wall-clock
//!   budget and cooperative cancellation, then persists the outcome and clears the
//!   running flag on every exit path.
//! - **Dispatcher** ([`core::RunDispatcher`]): priority queue of scheduled runs under a
//!   global concurrency limit.
//! - **Facade** ([`runtime::Governor`]): `request_run`, `cancel_run`, `get_status`.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use apply_governor::builders::build_governor;
//! use apply_governor::config::GovernorConfig;
//! use apply_governor::infra::InMemoryProgressMailbox;
//! use apply_governor::runtime::TokioSpawner;
//! use apply_governor::util::serde::IdentityId;
//!
//! let governor = build_governor(
//!     &GovernorConfig::from_env()?,
//!     my_driver, // implements AutomationDriver
//!     Arc::new(InMemoryProgressMailbox::default()),
//!     TokioSpawner::current(),
//! )?;
//!
//! let id = IdentityId::from("account-7");
//! match governor.request_run(&id)? {
//!     decision if decision.is_admitted() => println!("started"),
//!     rejected => println!("not now: {rejected:?}"),
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Outcome classification, cooldown policy, admission and run supervision.
pub mod core;
/// Configuration models for policy, supervision, dispatch and storage.
pub mod config;
/// Builders to construct governor components from configuration.
pub mod builders;
/// Infrastructure adapters for record stores, run queues and progress delivery.
pub mod infra;
/// Tokio spawner and the caller-facing facade.
pub mod runtime;
/// Shared utilities.
pub mod util;
