//! sled backed document store.
//!
//! One tree per collection, documents encoded with minicbor and keyed by their
//! bech32 id. Every multi-document change goes through [`Store::transaction`],
//! a serializable transaction over all document trees.
use crate::config::StoreConfig;
use crate::error::{MarketError, Result};
use crate::listing::Listing;
use crate::swap::Swap;
use crate::types::{ListingId, SwapId, UserId};
use crate::user::User;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use std::sync::Arc;

pub type TxResult<T> = std::result::Result<T, ConflictableTransactionError<MarketError>>;

/// Abort the surrounding transaction with `err`; nothing written so far lands.
pub fn abort(err: impl Into<MarketError>) -> ConflictableTransactionError<MarketError> {
    ConflictableTransactionError::Abort(err.into())
}

/// Lifts a fallible domain call into a transaction body.
pub trait OrAbort<T> {
    fn or_abort(self) -> TxResult<T>;
}

impl<T, E: Into<MarketError>> OrAbort<T> for std::result::Result<T, E> {
    fn or_abort(self) -> TxResult<T> {
        self.map_err(abort)
    }
}

/// A value stored in its own tree under its id.
pub trait Document: minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()> {
    /// Name used in "not found" errors.
    const ENTITY: &'static str;
    fn key(&self) -> &[u8];
}

impl Document for User {
    const ENTITY: &'static str = "User";
    fn key(&self) -> &[u8] {
        self.id.as_bytes()
    }
}

impl Document for Listing {
    const ENTITY: &'static str = "Item";
    fn key(&self) -> &[u8] {
        self.id.as_bytes()
    }
}

impl Document for Swap {
    const ENTITY: &'static str = "Swap";
    fn key(&self) -> &[u8] {
        self.id.as_bytes()
    }
}

#[derive(Clone)]
pub struct Store {
    db: Arc<Db>,
    users: Tree,
    listings: Tree,
    swaps: Tree,
    // listing id -> id of the pending or accepted swap referencing it
    outstanding: Tree,
    // "username:<name>" / "email:<address>" -> user id
    handles: Tree,
    // listing id -> u64 big endian view count
    views: Tree,
}

impl Store {
    pub fn new(db: Arc<Db>) -> Result<Self> {
        Ok(Self {
            users: db.open_tree("users")?,
            listings: db.open_tree("listings")?,
            swaps: db.open_tree("swaps")?,
            outstanding: db.open_tree("outstanding")?,
            handles: db.open_tree("handles")?,
            views: db.open_tree("listing_views")?,
            db,
        })
    }

    pub fn open(config: &StoreConfig) -> Result<Self> {
        tracing::debug!(path = %config.path.display(), temporary = config.temporary, "opening store");
        Self::new(Arc::new(config.to_sled().open()?))
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn user(&self, id: &UserId) -> Result<Option<User>> {
        get(&self.users, id.as_bytes())
    }

    pub fn listing(&self, id: &ListingId) -> Result<Option<Listing>> {
        get(&self.listings, id.as_bytes())
    }

    pub fn swap(&self, id: &SwapId) -> Result<Option<Swap>> {
        get(&self.swaps, id.as_bytes())
    }

    pub fn require_user(&self, id: &UserId) -> Result<User> {
        self.user(id)?
            .ok_or_else(|| MarketError::not_found(User::ENTITY, id))
    }

    pub fn require_listing(&self, id: &ListingId) -> Result<Listing> {
        self.listing(id)?
            .ok_or_else(|| MarketError::not_found(Listing::ENTITY, id))
    }

    pub fn require_swap(&self, id: &SwapId) -> Result<Swap> {
        self.swap(id)?
            .ok_or_else(|| MarketError::not_found(Swap::ENTITY, id))
    }

    pub fn users(&self) -> Result<Vec<User>> {
        scan(&self.users)
    }

    pub fn listings(&self) -> Result<Vec<Listing>> {
        scan(&self.listings)
    }

    pub fn swaps(&self) -> Result<Vec<Swap>> {
        scan(&self.swaps)
    }

    pub fn views(&self, id: &ListingId) -> Result<u64> {
        Ok(self
            .views
            .get(id.as_bytes())?
            .as_deref()
            .and_then(read_counter)
            .unwrap_or(0))
    }

    /// Atomic read-modify-write on the counter; concurrent viewers never lose an increment.
    pub fn increment_views(&self, id: &ListingId) -> Result<u64> {
        let updated = self.views.update_and_fetch(id.as_bytes(), |old| {
            let next = old.and_then(read_counter).unwrap_or(0).saturating_add(1);
            Some(next.to_be_bytes().to_vec())
        })?;
        Ok(updated.as_deref().and_then(read_counter).unwrap_or(0))
    }

    /// Run `body` as one serializable transaction over the document trees.
    ///
    /// sled re-runs the body when it conflicts with a concurrent transaction,
    /// so it must not have side effects outside the [`Tx`] it is handed.
    pub fn transaction<T, F>(&self, body: F) -> Result<T>
    where
        F: Fn(&Tx<'_>) -> TxResult<T>,
    {
        let outcome = (
            &self.users,
            &self.listings,
            &self.swaps,
            &self.outstanding,
            &self.handles,
        )
            .transaction(|trees| {
                let (users, listings, swaps, outstanding, handles) = trees;
                body(&Tx {
                    users,
                    listings,
                    swaps,
                    outstanding,
                    handles,
                })
            });
        Ok(outcome?)
    }
}

/// The transactional view handed to [`Store::transaction`] bodies.
pub struct Tx<'a> {
    users: &'a TransactionalTree,
    listings: &'a TransactionalTree,
    swaps: &'a TransactionalTree,
    outstanding: &'a TransactionalTree,
    handles: &'a TransactionalTree,
}

impl Tx<'_> {
    pub fn user(&self, id: &UserId) -> TxResult<Option<User>> {
        tx_get(self.users, id.as_bytes())
    }

    pub fn require_user(&self, id: &UserId) -> TxResult<User> {
        self.user(id)?
            .ok_or_else(|| abort(MarketError::not_found(User::ENTITY, id)))
    }

    pub fn listing(&self, id: &ListingId) -> TxResult<Option<Listing>> {
        tx_get(self.listings, id.as_bytes())
    }

    /// `entity` names the listing in the error, e.g. "Requested item".
    pub fn require_listing(&self, id: &ListingId, entity: &'static str) -> TxResult<Listing> {
        self.listing(id)?
            .ok_or_else(|| abort(MarketError::not_found(entity, id)))
    }

    pub fn swap(&self, id: &SwapId) -> TxResult<Option<Swap>> {
        tx_get(self.swaps, id.as_bytes())
    }

    pub fn require_swap(&self, id: &SwapId) -> TxResult<Swap> {
        self.swap(id)?
            .ok_or_else(|| abort(MarketError::not_found(Swap::ENTITY, id)))
    }

    pub fn put_user(&self, user: &User) -> TxResult<()> {
        tx_put(self.users, user)
    }

    pub fn put_listing(&self, listing: &Listing) -> TxResult<()> {
        tx_put(self.listings, listing)
    }

    pub fn put_swap(&self, swap: &Swap) -> TxResult<()> {
        tx_put(self.swaps, swap)
    }

    /// The pending or accepted swap currently referencing `listing`, if any.
    pub fn outstanding(&self, listing: &ListingId) -> TxResult<Option<SwapId>> {
        match self.outstanding.get(listing.as_bytes())? {
            Some(raw) => {
                let raw = std::str::from_utf8(&raw).map_err(|_| {
                    abort(MarketError::Corrupted(format!(
                        "outstanding entry of {listing} is not utf-8"
                    )))
                })?;
                Ok(Some(SwapId::parse(raw).or_abort()?))
            }
            None => Ok(None),
        }
    }

    /// Mark every listing of `swap` as referenced by it.
    pub fn claim(&self, swap: &Swap) -> TxResult<()> {
        for listing in swap.listing_ids() {
            self.outstanding
                .insert(listing.as_bytes(), swap.id.as_bytes())?;
        }
        Ok(())
    }

    /// Drop the markers `swap` holds. Markers owned by other swaps are left alone.
    pub fn release(&self, swap: &Swap) -> TxResult<()> {
        for listing in swap.listing_ids() {
            if self.outstanding(listing)?.as_ref() == Some(&swap.id) {
                self.outstanding.remove(listing.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Claim a unique handle such as a username. Returns false when another
    /// account already holds it.
    pub fn reserve_handle(&self, handle: &str, owner: &UserId) -> TxResult<bool> {
        if let Some(existing) = self.handles.get(handle.as_bytes())? {
            return Ok(existing.as_ref() == owner.as_bytes());
        }
        self.handles.insert(handle.as_bytes(), owner.as_bytes())?;
        Ok(true)
    }
}

fn encode<T: Document>(doc: &T) -> Result<Vec<u8>> {
    Ok(minicbor::to_vec(doc)?)
}

fn decode<T: Document>(bytes: &[u8]) -> Result<T> {
    Ok(minicbor::decode(bytes)?)
}

fn get<T: Document>(tree: &Tree, key: &[u8]) -> Result<Option<T>> {
    tree.get(key)?.map(|bytes| decode(&bytes)).transpose()
}

fn scan<T: Document>(tree: &Tree) -> Result<Vec<T>> {
    tree.iter()
        .values()
        .map(|bytes| decode(&bytes?))
        .collect()
}

fn tx_get<T: Document>(tree: &TransactionalTree, key: &[u8]) -> TxResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(decode(&bytes).or_abort()?)),
        None => Ok(None),
    }
}

fn tx_put<T: Document>(tree: &TransactionalTree, doc: &T) -> TxResult<()> {
    let bytes = encode(doc).or_abort()?;
    tracing::debug!(entity = T::ENTITY, key = %String::from_utf8_lossy(doc.key()), "writing document");
    tree.insert(doc.key(), bytes)?;
    Ok(())
}

fn read_counter(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
}
