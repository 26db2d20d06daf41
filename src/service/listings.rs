//! Listings as their owners and browsers see them.
use super::{note_refusal, tx_actor};
use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::listing::{Listing, ListingDraft, ListingImage, ListingUpdate};
use crate::pagination::{Page, Paginated};
use crate::store::{OrAbort, Store, Tx, TxResult, abort};
use crate::types::{Category, Condition, ListingId, SIZES, Style, SwapPreference, UserId};
use crate::user::PublicProfile;
use std::cmp::Reverse;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingSort {
    #[default]
    Newest,
    Oldest,
    PriceHigh,
    PriceLow,
    /// Most viewed first.
    Popular,
}

impl FromStr for ListingSort {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "price-high" => Ok(Self::PriceHigh),
            "price-low" => Ok(Self::PriceLow),
            "popular" => Ok(Self::Popular),
            _ => Err(MarketError::validation("sort", "Invalid sort option")),
        }
    }
}

/// Browse filters. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingQuery {
    pub text: Option<String>,
    pub category: Option<Category>,
    pub style: Option<Style>,
    pub size: Option<String>,
    pub condition: Option<Condition>,
    pub swap_type: Option<SwapPreference>,
    pub sort: ListingSort,
}

impl ListingQuery {
    fn matches(&self, listing: &Listing) -> bool {
        listing.is_available()
            && self.text.as_deref().is_none_or(|q| listing.matches_text(q))
            && self.category.is_none_or(|c| listing.category == c)
            && self.style.is_none_or(|s| listing.style == s)
            && self.size.as_deref().is_none_or(|s| listing.size == s)
            && self.condition.is_none_or(|c| listing.condition == c)
            && self.swap_type.is_none_or(|t| listing.swap_type == t)
    }
}

/// A listing in a result list, annotated for the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingView {
    pub listing: Listing,
    pub views: u64,
    pub is_liked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingDetail {
    pub listing: Listing,
    pub owner: PublicProfile,
    pub views: u64,
    pub is_liked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeState {
    pub liked: bool,
    pub likes: usize,
}

#[derive(Clone)]
pub struct ListingService {
    store: Store,
    config: Arc<MarketConfig>,
}

impl ListingService {
    pub fn new(instance: Arc<sled::Db>, config: MarketConfig) -> Result<Self> {
        Ok(Self::with_store(Store::new(instance)?, Arc::new(config)))
    }

    pub(crate) fn with_store(store: Store, config: Arc<MarketConfig>) -> Self {
        Self { store, config }
    }

    /// New listings wait for moderation.
    pub fn create_listing(&self, actor: &UserId, draft: ListingDraft) -> Result<Listing> {
        let id = ListingId::generate()?;
        let listing = self
            .store
            .transaction(|tx| {
                let owner = tx_actor(tx, actor)?;
                let listing = draft
                    .clone()
                    .validate_and_finalise(id.clone(), owner.id, self.config.max_images)
                    .or_abort()?;
                tx.put_listing(&listing)?;
                Ok(listing)
            })
            .inspect_err(|err| note_refusal("create_listing", actor, err))?;

        tracing::info!(listing_id = %listing.id, actor = %actor, images = listing.images.len(), "listing created");
        Ok(listing)
    }

    /// Available listings are public; anything else only shows to its owner.
    /// Every successful read counts as a view.
    pub fn get_listing(&self, viewer: Option<&UserId>, id: &ListingId) -> Result<ListingDetail> {
        let listing = self.store.require_listing(id)?;
        let is_owner = viewer.is_some_and(|v| *v == listing.owner);
        if !listing.is_available() && !is_owner {
            return Err(MarketError::not_found("Item", id));
        }
        let owner = self.store.require_user(&listing.owner)?.public_profile();
        let views = self.store.increment_views(id)?;

        Ok(ListingDetail {
            is_liked: viewer.is_some_and(|v| listing.is_liked_by(v)),
            listing: if is_owner {
                listing.owner_view()
            } else {
                listing.redacted()
            },
            owner,
            views,
        })
    }

    pub fn search(&self, viewer: Option<&UserId>, query: &ListingQuery, page: Page) -> Result<Paginated<ListingView>> {
        let mut found = self
            .store
            .listings()?
            .into_iter()
            .filter(|l| query.matches(l))
            .map(|l| self.view(viewer, l))
            .collect::<Result<Vec<_>>>()?;

        match query.sort {
            ListingSort::Newest => found.sort_by_key(|v| Reverse(v.listing.created_at.clone())),
            ListingSort::Oldest => found.sort_by_key(|v| v.listing.created_at.clone()),
            ListingSort::PriceHigh => found.sort_by_key(|v| Reverse(v.listing.points_value)),
            ListingSort::PriceLow => found.sort_by_key(|v| v.listing.points_value),
            ListingSort::Popular => found.sort_by_key(|v| Reverse(v.views)),
        }
        Ok(page.apply(found))
    }

    /// Featured available listings, newest first.
    pub fn featured(&self, viewer: Option<&UserId>) -> Result<Vec<ListingView>> {
        let mut featured: Vec<Listing> = self
            .store
            .listings()?
            .into_iter()
            .filter(|l| l.is_available() && l.is_featured)
            .collect();
        featured.sort_by_key(|l| Reverse(l.created_at.clone()));
        featured
            .into_iter()
            .take(self.config.featured_limit)
            .map(|l| self.view(viewer, l))
            .collect()
    }

    pub fn update_listing(&self, actor: &UserId, id: &ListingId, update: ListingUpdate) -> Result<Listing> {
        let listing = self
            .owned(actor, id, "update", |_, listing| {
                listing
                    .apply_update(update.clone(), self.config.max_images)
                    .or_abort()
            })
            .inspect_err(|err| note_refusal("update_listing", actor, err))?;

        tracing::info!(listing_id = %id, actor = %actor, "listing updated");
        Ok(listing.owner_view())
    }

    /// Owner removal. The document stays for the swap audit trail.
    pub fn delete_listing(&self, actor: &UserId, id: &ListingId) -> Result<()> {
        self.owned(actor, id, "delete", |tx, listing| {
            if tx.outstanding(&listing.id)?.is_some() {
                return Err(abort(MarketError::rule("Cannot delete an item with an active swap")));
            }
            listing.remove(None).or_abort()
        })
        .inspect_err(|err| note_refusal("delete_listing", actor, err))?;

        tracing::info!(listing_id = %id, actor = %actor, "listing removed by owner");
        Ok(())
    }

    pub fn toggle_like(&self, actor: &UserId, id: &ListingId) -> Result<LikeState> {
        let state = self
            .store
            .transaction(|tx| {
                let user = tx_actor(tx, actor)?;
                let mut listing = tx.require_listing(id, "Item")?;
                if !listing.is_available() {
                    return Err(abort(MarketError::rule("Cannot like unavailable item")));
                }
                let liked = listing.toggle_like(&user.id);
                tx.put_listing(&listing)?;
                Ok(LikeState {
                    liked,
                    likes: listing.like_count(),
                })
            })
            .inspect_err(|err| note_refusal("toggle_like", actor, err))?;

        tracing::debug!(listing_id = %id, actor = %actor, liked = state.liked, "like toggled");
        Ok(state)
    }

    /// Drop one image. The returned image tells the upload collaborator which
    /// file to delete.
    pub fn remove_image(&self, actor: &UserId, id: &ListingId, public_id: &str) -> Result<ListingImage> {
        let removed = self
            .store
            .transaction(|tx| {
                let mut listing = self.load_owned(tx, actor, id, "update")?;
                let removed = listing.remove_image(public_id).or_abort()?;
                tx.put_listing(&listing)?;
                Ok(removed)
            })
            .inspect_err(|err| note_refusal("remove_image", actor, err))?;

        tracing::info!(listing_id = %id, actor = %actor, image = public_id, "image removed");
        Ok(removed)
    }

    pub fn set_primary_image(&self, actor: &UserId, id: &ListingId, public_id: &str) -> Result<Listing> {
        let listing = self
            .owned(actor, id, "update", |_, listing| {
                listing.set_primary_image(public_id).or_abort()
            })
            .inspect_err(|err| note_refusal("set_primary_image", actor, err))?;
        Ok(listing.owner_view())
    }

    pub fn views(&self, id: &ListingId) -> Result<u64> {
        self.store.views(id)
    }

    pub fn categories(&self) -> &'static [Category] {
        Category::ALL
    }

    pub fn styles(&self) -> &'static [Style] {
        Style::ALL
    }

    pub fn conditions(&self) -> &'static [Condition] {
        Condition::ALL
    }

    pub fn sizes(&self) -> &'static [&'static str] {
        SIZES
    }

    fn view(&self, viewer: Option<&UserId>, listing: Listing) -> Result<ListingView> {
        Ok(ListingView {
            views: self.store.views(&listing.id)?,
            is_liked: viewer.is_some_and(|v| listing.is_liked_by(v)),
            listing: listing.redacted(),
        })
    }

    fn load_owned(&self, tx: &Tx<'_>, actor: &UserId, id: &ListingId, action: &str) -> TxResult<Listing> {
        let owner = tx_actor(tx, actor)?;
        let listing = tx.require_listing(id, "Item")?;
        if listing.owner != owner.id {
            return Err(abort(MarketError::forbidden(format!(
                "Not authorized to {action} this item"
            ))));
        }
        Ok(listing)
    }

    /// Load an owned listing, change it with `edit` and write it back in one transaction.
    fn owned<F>(&self, actor: &UserId, id: &ListingId, action: &str, edit: F) -> Result<Listing>
    where
        F: Fn(&Tx<'_>, &mut Listing) -> TxResult<()>,
    {
        self.store.transaction(|tx| {
            let mut listing = self.load_owned(tx, actor, id, action)?;
            edit(tx, &mut listing)?;
            tx.put_listing(&listing)?;
            Ok(listing)
        })
    }
}

/// Listings of `owner` matching `keep`, newest first.
pub(crate) fn owned_by(store: &Store, owner: &UserId, keep: impl Fn(&Listing) -> bool) -> Result<Vec<Listing>> {
    let mut listings: Vec<Listing> = store
        .listings()?
        .into_iter()
        .filter(|l| l.owner == *owner && keep(l))
        .collect();
    listings.sort_by_key(|l| Reverse(l.created_at.clone()));
    Ok(listings)
}

