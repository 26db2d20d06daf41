//! Service layer: the operations the REST surface maps onto.
//!
//! Every service shares one [`Store`] and one [`MarketConfig`]; cloning a
//! service is cheap and clones can be used from several threads.
pub mod admin;
pub mod listings;
pub mod swaps;
pub mod users;

use crate::config::{MarketConfig, StoreConfig};
use crate::error::{ErrorKind, MarketError, Result};
use crate::store::{Store, Tx, TxResult, abort};
use crate::types::UserId;
use crate::user::User;
use std::sync::Arc;

pub use admin::AdminService;
pub use listings::ListingService;
pub use swaps::SwapService;
pub use users::UserService;

/// All four services over one database.
#[derive(Clone)]
pub struct Marketplace {
    pub swaps: SwapService,
    pub listings: ListingService,
    pub users: UserService,
    pub admin: AdminService,
}

impl Marketplace {
    pub fn new(instance: Arc<sled::Db>, config: MarketConfig) -> Result<Self> {
        let store = Store::new(instance)?;
        Ok(Self::with_store(store, config))
    }

    pub fn open(store_config: &StoreConfig, config: MarketConfig) -> Result<Self> {
        let store = Store::open(store_config)?;
        Ok(Self::with_store(store, config))
    }

    fn with_store(store: Store, config: MarketConfig) -> Self {
        let config = Arc::new(config);
        Self {
            swaps: SwapService::with_store(store.clone(), config.clone()),
            listings: ListingService::with_store(store.clone(), config.clone()),
            users: UserService::with_store(store.clone(), config.clone()),
            admin: AdminService::with_store(store, config),
        }
    }
}

/// Misuse (wrong actor, conflicting request) is worth a warning; plain
/// validation failures are not.
pub(crate) fn note_refusal(operation: &'static str, actor: &UserId, err: &MarketError) {
    match err.kind() {
        ErrorKind::Forbidden | ErrorKind::Unauthenticated => {
            tracing::warn!(operation, actor = %actor, error = %err, "refused actor")
        }
        _ if matches!(err, MarketError::Conflict(_)) => {
            tracing::warn!(operation, actor = %actor, error = %err, "conflicting request")
        }
        ErrorKind::Internal => {
            tracing::error!(operation, actor = %actor, error = %err, "operation failed")
        }
        _ => tracing::debug!(operation, actor = %actor, error = %err, "request refused"),
    }
}

fn unknown_actor() -> MarketError {
    MarketError::Unauthenticated("Invalid token. User not found.".into())
}

/// Load the acting user outside a transaction; unknown or deactivated
/// accounts are unauthenticated.
pub(crate) fn load_actor(store: &Store, id: &UserId) -> Result<User> {
    let user = store.user(id)?.ok_or_else(unknown_actor)?;
    user.ensure_active()?;
    Ok(user)
}

pub(crate) fn tx_actor(tx: &Tx<'_>, id: &UserId) -> TxResult<User> {
    let user = tx.user(id)?.ok_or_else(|| abort(unknown_actor()))?;
    user.ensure_active().map_err(abort)?;
    Ok(user)
}

pub(crate) fn load_admin(store: &Store, id: &UserId) -> Result<User> {
    let user = load_actor(store, id)?;
    if let Err(err) = user.ensure_admin() {
        tracing::warn!(actor = %id, "non-admin attempted an admin operation");
        return Err(err);
    }
    Ok(user)
}

pub(crate) fn tx_admin(tx: &Tx<'_>, id: &UserId) -> TxResult<User> {
    let user = tx_actor(tx, id)?;
    user.ensure_admin().map_err(abort)?;
    Ok(user)
}
