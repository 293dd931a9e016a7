//! Governance pipeline for AI-proposed actions.
//!
//! A proposal is gated by the [`policy`] engine, routed to a human through
//! the [`workqueue`], decided exactly once in the [`decision`] ledger, and
//! executed by the [`jobs`] engine behind a [`breaker`]. Alerts leave through
//! the transactional [`outbox`]. [`governance::Governance`] wires it all up.

pub mod audit;
pub mod breaker;
pub mod clock;
pub mod collab;
pub mod config;
pub mod decision;
pub mod error;
pub mod governance;
pub mod io;
pub mod jobs;
pub mod outbox;
pub mod paths;
pub mod policy;
pub mod proposal;
pub mod store;
pub mod types;
pub mod workqueue;

pub use error::{ErrorKind, ExternalErrorKind, GovernError, Result};
pub use governance::{Collaborators, Governance};
