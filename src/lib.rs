//! Core of the ReWear clothing swap marketplace.
//!
//! Users list garments, negotiate direct (item for item) or points based
//! swaps, rate each other once a swap completes, and administrators moderate
//! listings and accounts. Everything is persisted in an embedded sled
//! database; every multi-document change runs inside one sled transaction.
//!
//! The entry points are the services in [`service`]:
//!
//! - [`service::swaps::SwapService`] drives the swap lifecycle and ledger.
//! - [`service::listings::ListingService`] handles listings, images and likes.
//! - [`service::users::UserService`] handles accounts and profiles.
//! - [`service::admin::AdminService`] handles moderation and reports.

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod ledger;
pub mod listing;
pub mod pagination;
pub mod reporting;
pub mod service;
pub mod store;
pub mod swap;
pub mod telemetry;
pub mod types;
pub mod user;
pub mod utils;
pub mod validation;

pub use config::{EscrowPolicy, MarketConfig};
pub use error::{ErrorKind, MarketError, Result};
