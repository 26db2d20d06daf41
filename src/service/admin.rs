//! Moderation, account administration and reports. Every operation requires
//! an active admin.
use super::{load_admin, note_refusal, tx_admin};
use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::listing::{Listing, ListingStatus};
use crate::pagination::{Page, Paginated};
use crate::reporting::{self, Dashboard, Reports};
use crate::store::{OrAbort, Store, Tx, TxResult, abort};
use crate::swap::{Swap, SwapStatus};
use crate::types::{ListingId, TimeStamp, UserId};
use crate::user::User;
use crate::validation;
use std::cmp::Reverse;
use std::sync::Arc;

const RECENT_ENTRIES: usize = 5;
const MAX_REPORT_DAYS: u32 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointsAdjustment {
    pub previous: u64,
    pub current: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deactivation {
    pub user: User,
    pub removed_listings: Vec<ListingId>,
}

#[derive(Clone)]
pub struct AdminService {
    store: Store,
    config: Arc<MarketConfig>,
}

impl AdminService {
    pub fn new(instance: Arc<sled::Db>, config: MarketConfig) -> Result<Self> {
        Ok(Self::with_store(Store::new(instance)?, Arc::new(config)))
    }

    pub(crate) fn with_store(store: Store, config: Arc<MarketConfig>) -> Self {
        Self { store, config }
    }

    /// Listings in `status` (pending by default), newest first.
    pub fn moderation_queue(&self, admin: &UserId, status: Option<ListingStatus>, page: Page) -> Result<Paginated<Listing>> {
        load_admin(&self.store, admin)?;
        let wanted = status.unwrap_or(ListingStatus::Pending);
        let mut listings: Vec<Listing> = self
            .store
            .listings()?
            .into_iter()
            .filter(|l| l.status == wanted)
            .collect();
        listings.sort_by_key(|l| Reverse(l.created_at.clone()));
        Ok(page.apply(listings))
    }

    pub fn approve_listing(&self, admin: &UserId, id: &ListingId, notes: Option<&str>) -> Result<Listing> {
        let listing = self
            .moderate(admin, id, |listing| listing.approve(notes.map(str::to_owned)))
            .inspect_err(|err| note_refusal("approve_listing", admin, err))?;
        tracing::info!(listing_id = %id, admin = %admin, status = %listing.status, "listing approved");
        Ok(listing)
    }

    pub fn reject_listing(&self, admin: &UserId, id: &ListingId, reason: &str, notes: Option<&str>) -> Result<Listing> {
        let listing = self
            .moderate(admin, id, |listing| listing.reject(reason, notes.map(str::to_owned)))
            .inspect_err(|err| note_refusal("reject_listing", admin, err))?;
        tracing::info!(listing_id = %id, admin = %admin, reason, "listing rejected");
        Ok(listing)
    }

    pub fn toggle_featured(&self, admin: &UserId, id: &ListingId) -> Result<Listing> {
        let listing = self
            .moderate(admin, id, |listing| listing.toggle_featured().map(|_| ()))
            .inspect_err(|err| note_refusal("toggle_featured", admin, err))?;
        tracing::info!(listing_id = %id, admin = %admin, featured = listing.is_featured, "featured flag toggled");
        Ok(listing)
    }

    /// Take a listing down whatever its status; the reason lands in the admin notes.
    pub fn remove_listing(&self, admin: &UserId, id: &ListingId, reason: Option<&str>) -> Result<Listing> {
        let listing = self
            .moderate(admin, id, |listing| listing.remove(reason.map(str::to_owned)))
            .inspect_err(|err| note_refusal("remove_listing", admin, err))?;
        tracing::info!(listing_id = %id, admin = %admin, "listing removed by admin");
        Ok(listing)
    }

    /// Accounts, newest first, optionally filtered on the active flag.
    pub fn list_users(&self, admin: &UserId, active: Option<bool>, page: Page) -> Result<Paginated<User>> {
        load_admin(&self.store, admin)?;
        let mut users: Vec<User> = self
            .store
            .users()?
            .into_iter()
            .filter(|u| active.is_none_or(|a| u.is_active == a))
            .collect();
        users.sort_by_key(|u| Reverse(u.created_at.clone()));
        Ok(page.apply(users))
    }

    pub fn verify_user(&self, admin: &UserId, id: &UserId) -> Result<User> {
        let (user, ()) = self.administer(admin, id, |user| user.is_verified = true)?;
        tracing::info!(user_id = %id, admin = %admin, "user verified");
        Ok(user)
    }

    pub fn activate_user(&self, admin: &UserId, id: &UserId) -> Result<User> {
        let (user, ()) = self.administer(admin, id, |user| user.is_active = true)?;
        tracing::info!(user_id = %id, admin = %admin, "user activated");
        Ok(user)
    }

    /// Deactivate an account and take its listings off the market. Admin
    /// accounts are protected. Listings already swapped or removed are kept as
    /// they are; `reason` lands in the removed listings' admin notes.
    pub fn deactivate_user(&self, admin: &UserId, id: &UserId, reason: Option<&str>) -> Result<Deactivation> {
        load_admin(&self.store, admin)?;
        let reason = validation::optional_text("reason", "Reason", reason, 200)?;
        let candidates = self.cascade_candidates(id)?;

        let mut outcome = self
            .store
            .transaction(|tx| {
                let mut user = self.load_target(tx, admin, id)?;
                if user.is_admin() {
                    return Err(abort(MarketError::rule("Cannot deactivate admin accounts")));
                }
                user.is_active = false;
                tx.put_user(&user)?;
                Ok(Deactivation {
                    removed_listings: take_down(tx, &user.id, &candidates, reason.as_deref())?,
                    user,
                })
            })
            .inspect_err(|err| note_refusal("deactivate_user", admin, err))?;

        // A listing committed between the scan and the deactivation escaped the
        // first pass. Deactivated owners cannot list, so one more pass is final.
        let stragglers = self.cascade_candidates(id)?;
        if !stragglers.is_empty() {
            let swept = self
                .store
                .transaction(|tx| take_down(tx, id, &stragglers, reason.as_deref()))
                .inspect_err(|err| note_refusal("deactivate_user", admin, err))?;
            outcome.removed_listings.extend(swept);
        }

        tracing::info!(
            user_id = %id,
            admin = %admin,
            removed_listings = outcome.removed_listings.len(),
            reason = reason.as_deref().unwrap_or(""),
            "user deactivated"
        );
        Ok(outcome)
    }

    /// Add a signed delta to a user's available points, clamping at zero.
    pub fn adjust_points(&self, admin: &UserId, id: &UserId, delta: i64, reason: Option<&str>) -> Result<PointsAdjustment> {
        let reason = validation::optional_text("reason", "Reason", reason, 200)?;
        let (user, previous) = self.administer(admin, id, |user| user.balance.adjust(delta))?;

        tracing::info!(
            user_id = %id,
            admin = %admin,
            delta,
            previous,
            current = user.points(),
            reason = reason.as_deref().unwrap_or(""),
            "points adjusted"
        );
        Ok(PointsAdjustment {
            previous,
            current: user.points(),
        })
    }

    pub fn list_swaps(&self, admin: &UserId, status: Option<SwapStatus>, page: Page) -> Result<Paginated<Swap>> {
        load_admin(&self.store, admin)?;
        let mut swaps: Vec<Swap> = self
            .store
            .swaps()?
            .into_iter()
            .filter(|s| status.is_none_or(|wanted| s.status == wanted))
            .collect();
        swaps.sort_by_key(|s| Reverse(s.created_at.clone()));
        Ok(page.apply(swaps))
    }

    pub fn dashboard(&self, admin: &UserId) -> Result<Dashboard> {
        load_admin(&self.store, admin)?;
        Ok(reporting::dashboard(
            &self.store.users()?,
            &self.store.listings()?,
            &self.store.swaps()?,
            RECENT_ENTRIES,
        ))
    }

    /// Trends over the last `days` days (the configured window by default),
    /// category distribution and the most active users.
    pub fn reports(&self, admin: &UserId, days: Option<u32>) -> Result<Reports> {
        load_admin(&self.store, admin)?;
        let days = days.unwrap_or(self.config.trend_window_days);
        if days == 0 || days > MAX_REPORT_DAYS {
            return Err(MarketError::validation("days", "Days must be between 1 and 365"));
        }
        let users = self.store.users()?;
        let listings = self.store.listings()?;
        let swaps = self.store.swaps()?;

        Ok(Reports {
            trends: reporting::trends(&users, &listings, &swaps, days, &TimeStamp::new()),
            categories: reporting::category_distribution(&listings),
            top_users: reporting::top_users(&users, &listings, &swaps, self.config.top_users_limit),
        })
    }

    fn moderate<F>(&self, admin: &UserId, id: &ListingId, action: F) -> Result<Listing>
    where
        F: Fn(&mut Listing) -> Result<()>,
    {
        self.store.transaction(|tx| {
            tx_admin(tx, admin)?;
            let mut listing = tx.require_listing(id, "Item")?;
            action(&mut listing).or_abort()?;
            tx.put_listing(&listing)?;
            Ok(listing)
        })
    }

    /// Listings of `owner` the deactivation cascade still has to take down.
    fn cascade_candidates(&self, owner: &UserId) -> Result<Vec<ListingId>> {
        Ok(self
            .store
            .listings()?
            .into_iter()
            .filter(|l| l.owner == *owner && still_listed(l))
            .map(|l| l.id)
            .collect())
    }

    fn load_target(&self, tx: &Tx<'_>, admin: &UserId, id: &UserId) -> TxResult<User> {
        tx_admin(tx, admin)?;
        tx.require_user(id)
    }

    /// Load the target account, apply `change` and write it back.
    fn administer<T, F>(&self, admin: &UserId, id: &UserId, change: F) -> Result<(User, T)>
    where
        F: Fn(&mut User) -> T,
    {
        self.store
            .transaction(|tx| {
                let mut user = self.load_target(tx, admin, id)?;
                let outcome = change(&mut user);
                tx.put_user(&user)?;
                Ok((user, outcome))
            })
            .inspect_err(|err| note_refusal("administer_user", admin, err))
    }
}

fn still_listed(listing: &Listing) -> bool {
    !matches!(listing.status, ListingStatus::Swapped | ListingStatus::Removed)
}

/// Remove the listed `candidates` still owned by `owner` and on the market.
fn take_down(tx: &Tx<'_>, owner: &UserId, candidates: &[ListingId], reason: Option<&str>) -> TxResult<Vec<ListingId>> {
    let mut removed = Vec::new();
    for listing_id in candidates {
        let Some(mut listing) = tx.listing(listing_id)? else {
            continue;
        };
        if listing.owner != *owner || !still_listed(&listing) {
            continue;
        }
        listing.remove(reason.map(str::to_owned)).or_abort()?;
        tx.put_listing(&listing)?;
        removed.push(listing.id);
    }
    Ok(removed)
}
