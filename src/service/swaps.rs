//! Swap workflow: proposal, answer, settlement and rating.
use super::{load_actor, note_refusal, tx_actor};
use crate::config::{EscrowPolicy, MarketConfig};
use crate::error::{MarketError, Result};
use crate::listing::{Listing, ListingStatus};
use crate::pagination::{Page, Paginated};
use crate::reporting::{self, SwapStats};
use crate::store::{OrAbort, Store, TxResult, abort};
use crate::swap::{Rating, Swap, SwapEvent, SwapKind, SwapStatus, SwapTerms};
use crate::types::{ListingId, SwapId, UserId};
use std::sync::Arc;

/// A swap request as the initiator sends it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSwap {
    pub kind: SwapKind,
    pub requested_item: ListingId,
    pub offered_item: Option<ListingId>,
    pub points_amount: Option<u64>,
    pub message: Option<String>,
}

impl CreateSwap {
    pub fn direct(requested_item: ListingId, offered_item: ListingId) -> Self {
        Self {
            kind: SwapKind::Direct,
            requested_item,
            offered_item: Some(offered_item),
            points_amount: None,
            message: None,
        }
    }

    pub fn points(requested_item: ListingId, amount: u64) -> Self {
        Self {
            kind: SwapKind::Points,
            requested_item,
            offered_item: None,
            points_amount: Some(amount),
            message: None,
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_owned());
        self
    }

    fn terms(&self) -> Result<SwapTerms> {
        match self.kind {
            SwapKind::Direct => self
                .offered_item
                .clone()
                .map(|offered_item| SwapTerms::Direct { offered_item })
                .ok_or_else(|| {
                    MarketError::validation("offeredItem", "Offered item is required for direct swaps")
                }),
            SwapKind::Points => match self.points_amount {
                Some(amount) if amount > 0 => Ok(SwapTerms::Points { amount }),
                _ => Err(MarketError::validation(
                    "pointsAmount",
                    "Valid points amount is required for points swaps",
                )),
            },
        }
    }
}

#[derive(Clone)]
pub struct SwapService {
    store: Store,
    config: Arc<MarketConfig>,
}

impl SwapService {
    pub fn new(instance: Arc<sled::Db>, config: MarketConfig) -> Result<Self> {
        Ok(Self::with_store(Store::new(instance)?, Arc::new(config)))
    }

    pub(crate) fn with_store(store: Store, config: Arc<MarketConfig>) -> Self {
        Self { store, config }
    }

    /// Propose a swap on someone else's available listing.
    ///
    /// The guards and the insertion run in one transaction together with the
    /// outstanding-swap markers, so two concurrent proposals on the same
    /// listing admit at most one.
    pub fn create_swap(&self, actor: &UserId, request: CreateSwap) -> Result<Swap> {
        let terms = request.terms()?;
        let id = SwapId::generate()?;

        let swap = self
            .store
            .transaction(|tx| {
                let initiator = tx_actor(tx, actor)?;
                let requested = tx.require_listing(&request.requested_item, "Requested item")?;
                if !requested.is_available() {
                    return Err(abort(MarketError::rule("Requested item is not available")));
                }
                if requested.owner == initiator.id {
                    return Err(abort(MarketError::rule("Cannot swap your own item")));
                }

                match &terms {
                    SwapTerms::Direct { offered_item } => {
                        let offered = tx.require_listing(offered_item, "Offered item")?;
                        if offered.owner != initiator.id {
                            return Err(abort(MarketError::forbidden(
                                "You can only offer your own items",
                            )));
                        }
                        if !offered.is_available() {
                            return Err(abort(MarketError::rule("Offered item is not available")));
                        }
                        if !offered.accepts(SwapKind::Direct) {
                            return Err(abort(MarketError::rule(
                                "Offered item does not support direct swaps",
                            )));
                        }
                        if tx.outstanding(offered_item)?.is_some() {
                            return Err(abort(MarketError::Conflict(
                                "Offered item already has a pending swap request".into(),
                            )));
                        }
                    }
                    SwapTerms::Points { amount } => {
                        if !initiator.balance.covers(*amount) {
                            return Err(abort(MarketError::InsufficientPoints {
                                needed: *amount,
                                available: initiator.points(),
                            }));
                        }
                        if !requested.accepts(SwapKind::Points) {
                            return Err(abort(MarketError::rule(
                                "Requested item does not support points swaps",
                            )));
                        }
                        if let Some((min, max)) = self.config.points_band(requested.points_value) {
                            if !(min..=max).contains(amount) {
                                return Err(abort(MarketError::rule(format!(
                                    "Points amount should be between {min} and {max}"
                                ))));
                            }
                        }
                    }
                }

                if tx.outstanding(&requested.id)?.is_some() {
                    return Err(abort(MarketError::Conflict(
                        "This item already has a pending swap request".into(),
                    )));
                }

                let swap = Swap::propose(
                    id.clone(),
                    initiator.id.clone(),
                    requested.owner.clone(),
                    requested.id.clone(),
                    terms.clone(),
                    request.message.as_deref(),
                )
                .or_abort()?;
                tx.put_swap(&swap)?;
                tx.claim(&swap)?;
                Ok(swap)
            })
            .inspect_err(|err| note_refusal("create_swap", actor, err))?;

        tracing::info!(
            swap_id = %swap.id,
            actor = %actor,
            kind = %swap.kind(),
            requested_item = %swap.requested_item,
            status = %swap.status,
            "swap proposed"
        );
        Ok(swap)
    }

    /// Recipient accepts: both listings are reserved and, under escrow, the
    /// initiator's points move to their held bucket.
    pub fn accept_swap(&self, actor: &UserId, id: &SwapId) -> Result<Swap> {
        let swap = self
            .store
            .transaction(|tx| {
                let recipient = tx_actor(tx, actor)?;
                let mut swap = tx.require_swap(id)?;
                swap.record(&recipient.id, SwapEvent::Accept).or_abort()?;

                if let Some(amount) = swap.points_amount() {
                    if self.config.recipient_cover_check && !recipient.balance.covers(amount) {
                        return Err(abort(MarketError::InsufficientPoints {
                            needed: amount,
                            available: recipient.points(),
                        }));
                    }
                    if self.config.escrow == EscrowPolicy::HoldOnAccept {
                        let mut initiator = tx.require_user(&swap.initiator)?;
                        initiator.balance.hold(amount).or_abort()?;
                        tx.put_user(&initiator)?;
                        swap.escrowed = Some(amount);
                    }
                }

                for listing_id in swap.listing_ids() {
                    let mut listing = tx.require_listing(listing_id, "Item")?;
                    if !listing.is_available() {
                        return Err(abort(MarketError::rule(format!(
                            "Item {} is no longer available",
                            listing.title
                        ))));
                    }
                    listing.reserve();
                    tx.put_listing(&listing)?;
                }

                tx.put_swap(&swap)?;
                Ok(swap)
            })
            .inspect_err(|err| note_refusal("accept_swap", actor, err))?;

        tracing::info!(swap_id = %id, actor = %actor, status = %swap.status, escrowed = ?swap.escrowed, "swap accepted");
        Ok(swap)
    }

    /// Recipient declines. Listings and balances are untouched.
    pub fn reject_swap(&self, actor: &UserId, id: &SwapId) -> Result<Swap> {
        let swap = self
            .store
            .transaction(|tx| {
                let recipient = tx_actor(tx, actor)?;
                let mut swap = tx.require_swap(id)?;
                swap.record(&recipient.id, SwapEvent::Reject).or_abort()?;
                tx.release(&swap)?;
                tx.put_swap(&swap)?;
                Ok(swap)
            })
            .inspect_err(|err| note_refusal("reject_swap", actor, err))?;

        tracing::info!(swap_id = %id, actor = %actor, status = %swap.status, "swap rejected");
        Ok(swap)
    }

    /// Either party withdraws a pending or accepted swap. Undoing an accepted
    /// swap puts the reserved listings back on the market and returns any
    /// escrowed points.
    pub fn cancel_swap(&self, actor: &UserId, id: &SwapId, reason: Option<&str>) -> Result<Swap> {
        let swap = self
            .store
            .transaction(|tx| {
                let canceller = tx_actor(tx, actor)?;
                let mut swap = tx.require_swap(id)?;
                let previous = swap
                    .record(
                        &canceller.id,
                        SwapEvent::Cancel {
                            reason: reason.map(str::to_owned),
                        },
                    )
                    .or_abort()?;

                if previous == SwapStatus::Accepted {
                    for listing_id in swap.listing_ids() {
                        let mut listing = tx.require_listing(listing_id, "Item")?;
                        if listing.status == ListingStatus::Reserved {
                            listing.release();
                            tx.put_listing(&listing)?;
                        }
                    }
                    if let Some(held) = swap.escrowed.take() {
                        let mut initiator = tx.require_user(&swap.initiator)?;
                        initiator.balance.release(held).or_abort()?;
                        tx.put_user(&initiator)?;
                    }
                }

                tx.release(&swap)?;
                tx.put_swap(&swap)?;
                Ok(swap)
            })
            .inspect_err(|err| note_refusal("cancel_swap", actor, err))?;

        tracing::info!(
            swap_id = %id,
            actor = %actor,
            status = %swap.status,
            reason = swap.cancellation_reason.as_deref().unwrap_or(""),
            "swap cancelled"
        );
        Ok(swap)
    }

    /// Settle an accepted swap: ownership moves, listings become swapped and
    /// points change hands. Either all of it lands or none of it does.
    pub fn complete_swap(&self, actor: &UserId, id: &SwapId) -> Result<Swap> {
        let swap = self
            .store
            .transaction(|tx| {
                let participant = tx_actor(tx, actor)?;
                let mut swap = tx.require_swap(id)?;
                swap.record(&participant.id, SwapEvent::Complete).or_abort()?;

                // moderation may have taken a reserved listing down since acceptance
                let reserved = |listing_id: &ListingId, entity: &'static str| -> TxResult<Listing> {
                    let listing = tx.require_listing(listing_id, entity)?;
                    if listing.status != ListingStatus::Reserved {
                        return Err(abort(MarketError::rule(format!(
                            "Item {} is no longer reserved for this swap",
                            listing.title
                        ))));
                    }
                    Ok(listing)
                };

                let mut requested = reserved(&swap.requested_item, "Requested item")?;
                let offered = match swap.offered_item() {
                    Some(offered_item) => Some(reserved(offered_item, "Offered item")?),
                    None => None,
                };

                requested.hand_over(&swap.initiator);
                tx.put_listing(&requested)?;

                match swap.terms.clone() {
                    SwapTerms::Direct { .. } => {
                        if let Some(mut offered) = offered {
                            offered.hand_over(&swap.recipient);
                            tx.put_listing(&offered)?;
                        }
                    }
                    SwapTerms::Points { amount } => {
                        let mut initiator = tx.require_user(&swap.initiator)?;
                        let mut recipient = tx.require_user(&swap.recipient)?;
                        match swap.escrowed.take() {
                            Some(held) => initiator.balance.spend_held(held),
                            None => initiator.balance.debit(amount),
                        }
                        .or_abort()?;
                        recipient.balance.credit(amount).or_abort()?;
                        tx.put_user(&initiator)?;
                        tx.put_user(&recipient)?;
                    }
                }

                tx.release(&swap)?;
                tx.put_swap(&swap)?;
                Ok(swap)
            })
            .inspect_err(|err| note_refusal("complete_swap", actor, err))?;

        tracing::info!(
            swap_id = %id,
            actor = %actor,
            status = %swap.status,
            points = ?swap.points_amount(),
            "swap completed"
        );
        Ok(swap)
    }

    /// Rate the counterpart of a completed swap. Rating again overwrites.
    pub fn rate_swap(&self, actor: &UserId, id: &SwapId, rating: u8, comment: Option<&str>) -> Result<Swap> {
        Rating::new(rating, comment)?;

        let swap = self
            .store
            .transaction(|tx| {
                let rater = tx_actor(tx, actor)?;
                let mut swap = tx.require_swap(id)?;
                swap.record(
                    &rater.id,
                    SwapEvent::Rate {
                        rating,
                        comment: comment.map(str::to_owned),
                    },
                )
                .or_abort()?;
                tx.put_swap(&swap)?;
                Ok(swap)
            })
            .inspect_err(|err| note_refusal("rate_swap", actor, err))?;

        tracing::info!(swap_id = %id, actor = %actor, rating, "swap rated");
        Ok(swap)
    }

    /// A single swap, for its participants and for admins. The witness chain
    /// is verified on the way out.
    pub fn get_swap(&self, actor: &UserId, id: &SwapId) -> Result<Swap> {
        let viewer = load_actor(&self.store, actor)?;
        let swap = self.store.require_swap(id)?;
        if !swap.is_participant(&viewer.id) && !viewer.is_admin() {
            let err = MarketError::forbidden("Access denied - not authorized to view this swap");
            note_refusal("get_swap", actor, &err);
            return Err(err);
        }
        swap.verify_history()?;
        Ok(swap)
    }

    /// The actor's swaps as either party, newest first.
    pub fn list_swaps(&self, actor: &UserId, status: Option<SwapStatus>, page: Page) -> Result<Paginated<Swap>> {
        let viewer = load_actor(&self.store, actor)?;
        let swaps = self.filtered(|s| {
            s.is_participant(&viewer.id) && status.is_none_or(|wanted| s.status == wanted)
        })?;
        Ok(page.apply(swaps))
    }

    /// Proposals waiting for the actor's answer.
    pub fn pending_swaps(&self, actor: &UserId, page: Page) -> Result<Paginated<Swap>> {
        let viewer = load_actor(&self.store, actor)?;
        let swaps = self.filtered(|s| s.recipient == viewer.id && s.status == SwapStatus::Pending)?;
        Ok(page.apply(swaps))
    }

    pub fn swap_stats(&self, actor: &UserId) -> Result<SwapStats> {
        let viewer = load_actor(&self.store, actor)?;
        Ok(reporting::swap_stats(&viewer.id, &self.store.swaps()?))
    }

    pub(crate) fn filtered(&self, keep: impl Fn(&Swap) -> bool) -> Result<Vec<Swap>> {
        let mut swaps: Vec<Swap> = self.store.swaps()?.into_iter().filter(|s| keep(s)).collect();
        swaps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(swaps)
    }
}
