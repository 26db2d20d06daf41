//! Swaps and their state machine.
//!
//! A swap's status only ever changes through [`Swap::record`], which runs the
//! event through [`SwapStatus::apply`] and appends a [`Witness`] to the swap's
//! log. Each witness carries the sha256 of the one before it, so the log can
//! be replayed to re-derive the status and checked for tampering.
use crate::error::{MarketError, Result};
use crate::types::{ListingId, SwapId, TimeStamp, UserId};
use crate::validation;
use chrono::Utc;

labelled_enum!(
    SwapStatus, "status" {
        0 => Pending = "pending",
        1 => Accepted = "accepted",
        2 => Completed = "completed",
        3 => Cancelled = "cancelled",
        4 => Rejected = "rejected",
    }
);

labelled_enum!(
    SwapKind, "type" {
        0 => Direct = "direct",
        1 => Points = "points",
    }
);

/// What the initiator gives: one of their listings, or points.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum SwapTerms {
    #[n(0)]
    Direct {
        #[n(0)]
        offered_item: ListingId,
    },
    #[n(1)]
    Points {
        #[n(0)]
        amount: u64,
    },
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum SwapEvent {
    #[n(0)]
    Propose,
    #[n(1)]
    Accept,
    #[n(2)]
    Reject,
    #[n(3)]
    Cancel {
        #[n(0)]
        reason: Option<String>,
    },
    #[n(4)]
    Complete,
    #[n(5)]
    Rate {
        #[n(0)]
        rating: u8,
        #[n(1)]
        comment: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Initiator,
    Recipient,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Witness {
    #[n(0)]
    pub swap_id: SwapId,
    #[n(1)]
    pub actor: UserId,
    #[n(2)]
    pub timestamp: TimeStamp<Utc>,
    #[n(3)]
    pub event: SwapEvent,
    #[n(4)]
    pub prev_hash: Option<String>, // sha256 of the previous witness, None for the first
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Rating {
    #[n(0)]
    pub rating: u8,
    #[n(1)]
    pub comment: Option<String>,
    #[n(2)]
    pub created_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Swap {
    #[n(0)]
    pub id: SwapId,
    #[n(1)]
    pub terms: SwapTerms,
    #[n(2)]
    pub status: SwapStatus,
    #[n(3)]
    pub initiator: UserId,
    #[n(4)]
    pub recipient: UserId,
    #[n(5)]
    pub requested_item: ListingId,
    #[n(6)]
    pub message: Option<String>,
    #[n(7)]
    pub initiator_rating: Option<Rating>,
    #[n(8)]
    pub recipient_rating: Option<Rating>,
    #[n(9)]
    pub completed_at: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub cancelled_at: Option<TimeStamp<Utc>>,
    #[n(11)]
    pub cancelled_by: Option<UserId>,
    #[n(12)]
    pub cancellation_reason: Option<String>,
    #[n(13)]
    pub admin_notes: Option<String>,
    #[n(14)]
    pub created_at: TimeStamp<Utc>,
    #[n(15)]
    pub updated_at: TimeStamp<Utc>,
    #[n(16)]
    pub witness_set: Vec<Witness>,
    /// Points sitting in the initiator's held bucket on behalf of this swap.
    #[n(17)]
    pub escrowed: Option<u64>,
}

impl SwapStatus {
    /// The transition function. Every (state, event) pair not listed is refused.
    pub fn apply(self, event: &SwapEvent) -> Result<SwapStatus> {
        use SwapStatus::*;

        match (self, event) {
            (Pending, SwapEvent::Accept) => Ok(Accepted),
            (Pending, SwapEvent::Reject) => Ok(Rejected),
            (Pending | Accepted, SwapEvent::Cancel { .. }) => Ok(Cancelled),
            (Accepted, SwapEvent::Complete) => Ok(Completed),
            (Completed, SwapEvent::Rate { .. }) => Ok(Completed),
            (from, event) => Err(MarketError::InvalidTransition {
                from,
                event: event.name(),
            }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Cancelled | SwapStatus::Rejected
        )
    }

    /// Pending or accepted: the swap still holds a claim on its listings.
    pub fn is_active(self) -> bool {
        matches!(self, SwapStatus::Pending | SwapStatus::Accepted)
    }
}

impl SwapEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SwapEvent::Propose => "propose",
            SwapEvent::Accept => "accept",
            SwapEvent::Reject => "reject",
            SwapEvent::Cancel { .. } => "cancel",
            SwapEvent::Complete => "complete",
            SwapEvent::Rate { .. } => "rate",
        }
    }
}

impl SwapTerms {
    pub fn kind(&self) -> SwapKind {
        match self {
            SwapTerms::Direct { .. } => SwapKind::Direct,
            SwapTerms::Points { .. } => SwapKind::Points,
        }
    }
}

impl Witness {
    pub fn new(
        swap_id: SwapId,
        actor: UserId,
        timestamp: TimeStamp<Utc>,
        event: SwapEvent,
        prev_hash: Option<String>,
    ) -> Self {
        Self {
            swap_id,
            actor,
            timestamp,
            event,
            prev_hash,
        }
    }
    pub fn build(&self) -> Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

impl Rating {
    pub fn new(rating: u8, comment: Option<&str>) -> Result<Self> {
        if !(1..=5).contains(&rating) {
            return Err(MarketError::validation("rating", "Rating must be between 1 and 5"));
        }
        Ok(Self {
            rating,
            comment: validation::optional_text("comment", "Comment", comment, 200)?,
            created_at: TimeStamp::new(),
        })
    }
}

impl Swap {
    /// A new swap in `pending`, its log opened by the initiator's proposal.
    pub fn propose(
        id: SwapId,
        initiator: UserId,
        recipient: UserId,
        requested_item: ListingId,
        terms: SwapTerms,
        message: Option<&str>,
    ) -> Result<Self> {
        if let SwapTerms::Points { amount: 0 } = terms {
            return Err(MarketError::validation(
                "pointsAmount",
                "Points amount must be a positive integer for points swaps",
            ));
        }
        let message = validation::optional_text("message", "Message", message, 500)?;
        let now = TimeStamp::new();
        let genesis = Witness::new(
            id.clone(),
            initiator.clone(),
            now.clone(),
            SwapEvent::Propose,
            None,
        );

        Ok(Self {
            id,
            terms,
            status: SwapStatus::Pending,
            initiator,
            recipient,
            requested_item,
            message,
            initiator_rating: None,
            recipient_rating: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            admin_notes: None,
            created_at: now.clone(),
            updated_at: now,
            witness_set: vec![genesis],
            escrowed: None,
        })
    }

    pub fn kind(&self) -> SwapKind {
        self.terms.kind()
    }

    pub fn offered_item(&self) -> Option<&ListingId> {
        match &self.terms {
            SwapTerms::Direct { offered_item } => Some(offered_item),
            SwapTerms::Points { .. } => None,
        }
    }

    pub fn points_amount(&self) -> Option<u64> {
        match self.terms {
            SwapTerms::Points { amount } => Some(amount),
            SwapTerms::Direct { .. } => None,
        }
    }

    /// The requested listing, followed by the offered one for direct swaps.
    pub fn listing_ids(&self) -> Vec<&ListingId> {
        let mut ids = vec![&self.requested_item];
        ids.extend(self.offered_item());
        ids
    }

    pub fn side(&self, user: &UserId) -> Option<Side> {
        if *user == self.initiator {
            Some(Side::Initiator)
        } else if *user == self.recipient {
            Some(Side::Recipient)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.side(user).is_some()
    }

    /// Who may fire `event`: the recipient answers a proposal, either party
    /// cancels, completes or rates.
    pub fn authorize(&self, actor: &UserId, event: &SwapEvent) -> Result<Side> {
        let side = self.side(actor);
        match (event, side) {
            (SwapEvent::Accept | SwapEvent::Reject, Some(Side::Recipient)) => Ok(Side::Recipient),
            (SwapEvent::Accept | SwapEvent::Reject, _) => Err(MarketError::forbidden(format!(
                "Only the recipient can {} swap requests",
                event.name()
            ))),
            (SwapEvent::Propose, _) => Err(MarketError::forbidden("A swap is proposed only once")),
            (_, Some(side)) => Ok(side),
            (_, None) => Err(MarketError::forbidden(
                "Access denied - not authorized to access this swap",
            )),
        }
    }

    /// Check the actor, run the transition, append the witness and apply the
    /// bookkeeping fields of the event. Returns the status before the event.
    pub fn record(&mut self, actor: &UserId, event: SwapEvent) -> Result<SwapStatus> {
        let side = self.authorize(actor, &event)?;
        let previous = self.status;
        let next = previous.apply(&event)?;
        let now = TimeStamp::new();

        match &event {
            SwapEvent::Cancel { reason } => {
                self.cancellation_reason =
                    validation::optional_text("reason", "Cancellation reason", reason.as_deref(), 200)?;
                self.cancelled_at = Some(now.clone());
                self.cancelled_by = Some(actor.clone());
            }
            SwapEvent::Complete => self.completed_at = Some(now.clone()),
            SwapEvent::Rate { rating, comment } => {
                let rating = Rating::new(*rating, comment.as_deref())?;
                match side {
                    Side::Initiator => self.initiator_rating = Some(rating),
                    Side::Recipient => self.recipient_rating = Some(rating),
                }
            }
            SwapEvent::Propose | SwapEvent::Accept | SwapEvent::Reject => {}
        }

        let prev_hash = match self.witness_set.last() {
            Some(last) => Some(last.build()?.0),
            None => None,
        };
        self.witness_set.push(Witness::new(
            self.id.clone(),
            actor.clone(),
            now.clone(),
            event,
            prev_hash,
        ));
        self.status = next;
        self.updated_at = now;
        Ok(previous)
    }

    /// Re-derive the status from the witness log.
    pub fn replay(&self) -> Result<SwapStatus> {
        let mut witnesses = self.witness_set.iter();
        match witnesses.next() {
            Some(w) if w.event == SwapEvent::Propose => {}
            _ => {
                return Err(MarketError::Corrupted(format!(
                    "swap {} does not start with a proposal",
                    self.id
                )));
            }
        }
        witnesses.try_fold(SwapStatus::Pending, |status, w| status.apply(&w.event))
    }

    /// Check every witness points at the hash of its predecessor and that the
    /// replayed status matches the stored one.
    pub fn verify_history(&self) -> Result<()> {
        let mut expected: Option<String> = None;
        for (index, witness) in self.witness_set.iter().enumerate() {
            if witness.prev_hash != expected || witness.swap_id != self.id {
                return Err(MarketError::Corrupted(format!(
                    "witness chain of swap {} broken at {index}",
                    self.id
                )));
            }
            expected = Some(witness.build()?.0);
        }
        let replayed = self.replay()?;
        if replayed != self.status {
            return Err(MarketError::Corrupted(format!(
                "swap {} is stored as {} but its history says {}",
                self.id, self.status, replayed
            )));
        }
        Ok(())
    }
}
