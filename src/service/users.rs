//! Accounts and public profiles.
use super::listings::owned_by;
use super::{load_actor, note_refusal, tx_actor};
use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::listing::{Listing, ListingStatus};
use crate::pagination::{Page, Paginated};
use crate::reporting::{self, UserStats};
use crate::store::{Store, abort};
use crate::types::UserId;
use crate::user::{Preferences, ProfileUpdate, PublicProfile, Registration, User};
use std::sync::Arc;

#[derive(Clone)]
pub struct UserService {
    store: Store,
    config: Arc<MarketConfig>,
}

impl UserService {
    pub fn new(instance: Arc<sled::Db>, config: MarketConfig) -> Result<Self> {
        Ok(Self::with_store(Store::new(instance)?, Arc::new(config)))
    }

    pub(crate) fn with_store(store: Store, config: Arc<MarketConfig>) -> Self {
        Self { store, config }
    }

    /// Create an account with the starting points grant. Usernames
    /// (case-insensitively) and emails are unique.
    pub fn register(&self, registration: Registration) -> Result<User> {
        let user = registration.validate_and_finalise(UserId::generate()?, self.config.starting_points)?;
        let username = format!("username:{}", user.username.to_lowercase());
        let email = format!("email:{}", user.email);

        self.store.transaction(|tx| {
            if !tx.reserve_handle(&username, &user.id)? || !tx.reserve_handle(&email, &user.id)? {
                return Err(abort(MarketError::Conflict(
                    "User with this email or username already exists".into(),
                )));
            }
            tx.put_user(&user)
        })?;

        tracing::info!(user_id = %user.id, username = %user.username, role = %user.role, "user registered");
        Ok(user)
    }

    /// Public profile of an active account.
    pub fn get_profile(&self, id: &UserId) -> Result<PublicProfile> {
        Ok(self.active_user(id)?.public_profile())
    }

    pub fn update_profile(&self, actor: &UserId, update: ProfileUpdate) -> Result<User> {
        let user = self
            .store
            .transaction(|tx| {
                let mut user = tx_actor(tx, actor)?;
                user.apply_update(update.clone()).map_err(abort)?;
                tx.put_user(&user)?;
                Ok(user)
            })
            .inspect_err(|err| note_refusal("update_profile", actor, err))?;

        tracing::info!(user_id = %actor, "profile updated");
        Ok(user)
    }

    pub fn update_preferences(&self, actor: &UserId, preferences: Preferences) -> Result<User> {
        self.store.transaction(|tx| {
            let mut user = tx_actor(tx, actor)?;
            user.preferences = preferences;
            tx.put_user(&user)?;
            Ok(user)
        })
    }

    /// Available listings of an active user, newest first.
    pub fn user_listings(&self, id: &UserId, page: Page) -> Result<Paginated<Listing>> {
        let user = self.active_user(id)?;
        let listings = owned_by(&self.store, &user.id, Listing::is_available)?
            .iter()
            .map(Listing::redacted)
            .collect();
        Ok(page.apply(listings))
    }

    /// The actor's own listings in any status.
    pub fn my_listings(&self, actor: &UserId, status: Option<ListingStatus>, page: Page) -> Result<Paginated<Listing>> {
        let user = load_actor(&self.store, actor)?;
        let listings = owned_by(&self.store, &user.id, |l| {
            status.is_none_or(|wanted| l.status == wanted)
        })?
        .iter()
        .map(Listing::owner_view)
        .collect();
        Ok(page.apply(listings))
    }

    /// Active users whose username or name contains `query`, by username.
    pub fn search_users(&self, query: Option<&str>, page: Page) -> Result<Paginated<PublicProfile>> {
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        let mut users: Vec<User> = self
            .store
            .users()?
            .into_iter()
            .filter(|u| u.is_active && query.is_none_or(|q| u.matches_search(q)))
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(page.apply(users.iter().map(User::public_profile).collect()))
    }

    /// Self-service account deletion: the account is deactivated, never erased.
    pub fn deactivate_account(&self, actor: &UserId) -> Result<User> {
        let user = self.store.transaction(|tx| {
            let mut user = tx_actor(tx, actor)?;
            user.is_active = false;
            tx.put_user(&user)?;
            Ok(user)
        })?;

        tracing::info!(user_id = %actor, "account deactivated by its owner");
        Ok(user)
    }

    pub fn user_stats(&self, id: &UserId) -> Result<UserStats> {
        let user = self.store.require_user(id)?;
        Ok(reporting::user_stats(
            &user,
            &self.store.listings()?,
            &self.store.swaps()?,
        ))
    }

    fn active_user(&self, id: &UserId) -> Result<User> {
        match self.store.user(id)? {
            Some(user) if user.is_active => Ok(user),
            _ => Err(MarketError::not_found("User", id)),
        }
    }
}
