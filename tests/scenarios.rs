//! End to end swap workflows against a real sled database.
//!
//! Sled locks its directory, so every test opens its own database inside a
//! temp dir that is cleaned up when the test ends.

use anyhow::Context;
use rewear::{
    EscrowPolicy, MarketConfig, MarketError,
    listing::{ListingDraft, ListingStatus},
    pagination::Page,
    service::{Marketplace, swaps::CreateSwap},
    swap::SwapStatus,
    types::{Category, Condition, ListingId, Role, Style, SwapPreference, UserId},
    user::Registration,
};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

struct Fixture {
    _dir: TempDir,
    market: Marketplace,
    admin: UserId,
}

fn setup(config: MarketConfig) -> anyhow::Result<Fixture> {
    rewear::telemetry::init_tracing();
    let dir = tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("market.db"))?);
    let market = Marketplace::new(db, config)?;
    let admin = market
        .users
        .register(
            Registration::new("moderator", "mod@rewear.com")
                .set_name("Mod", "Erator")
                .set_role(Role::Admin),
        )?
        .id;
    Ok(Fixture {
        _dir: dir,
        market,
        admin,
    })
}

fn register(fx: &Fixture, username: &str) -> anyhow::Result<UserId> {
    let user = fx.market.users.register(
        Registration::new(username, &format!("{username}@rewear.com")).set_name("Test", "Swapper"),
    )?;
    Ok(user.id)
}

/// A listing that went through moderation and is on the market.
fn approved_listing(fx: &Fixture, owner: &UserId, points: u64, swap_type: SwapPreference) -> anyhow::Result<ListingId> {
    let draft = ListingDraft::new()
        .set_title("Linen summer dress")
        .set_description("Breezy linen dress, worn twice")
        .set_category(Category::Dresses)
        .set_style(Style::Casual)
        .set_size("S")
        .set_condition(Condition::LikeNew)
        .set_color("white")
        .set_swap_type(swap_type)
        .set_points_value(points);
    let listing = fx.market.listings.create_listing(owner, draft)?;
    fx.market.admin.approve_listing(&fx.admin, &listing.id, None)?;
    Ok(listing.id)
}

fn points_of(fx: &Fixture, user: &UserId) -> anyhow::Result<u64> {
    Ok(fx.market.users.get_profile(user)?.points)
}

#[test]
fn points_swap_moves_item_and_points() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let jacket = approved_listing(&fx, &bob, 100, SwapPreference::Both)?;

    let swap = fx
        .market
        .swaps
        .create_swap(&alice, CreateSwap::points(jacket.clone(), 80).with_message("Love it"))
        .context("proposal failed")?;
    assert_eq!(swap.status, SwapStatus::Pending);
    assert_eq!(swap.recipient, bob);

    let swap = fx.market.swaps.accept_swap(&bob, &swap.id).context("accept failed")?;
    assert_eq!(swap.status, SwapStatus::Accepted);
    let listing = fx.market.listings.get_listing(Some(&bob), &jacket)?.listing;
    assert_eq!(listing.status, ListingStatus::Reserved);
    // escrowed, not spendable any more
    assert_eq!(points_of(&fx, &alice)?, 20);

    let swap = fx.market.swaps.complete_swap(&alice, &swap.id).context("completion failed")?;
    assert_eq!(swap.status, SwapStatus::Completed);
    assert!(swap.completed_at.is_some());

    let listing = fx.market.listings.get_listing(Some(&alice), &jacket)?.listing;
    assert_eq!(listing.owner, alice);
    assert_eq!(listing.status, ListingStatus::Swapped);
    assert_eq!(points_of(&fx, &alice)?, 20);
    assert_eq!(points_of(&fx, &bob)?, 180);

    let history = fx.market.swaps.get_swap(&bob, &swap.id)?;
    assert_eq!(history.witness_set.len(), 3);
    Ok(())
}

#[test]
fn direct_swap_exchanges_owners() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let wanted = approved_listing(&fx, &bob, 0, SwapPreference::Direct)?;
    let offered = approved_listing(&fx, &alice, 0, SwapPreference::Both)?;

    let swap = fx
        .market
        .swaps
        .create_swap(&alice, CreateSwap::direct(wanted.clone(), offered.clone()))?;
    fx.market.swaps.accept_swap(&bob, &swap.id)?;
    assert_eq!(
        fx.market.listings.get_listing(Some(&alice), &offered)?.listing.status,
        ListingStatus::Reserved
    );

    fx.market.swaps.complete_swap(&bob, &swap.id)?;

    let wanted = fx.market.listings.get_listing(Some(&alice), &wanted)?.listing;
    let offered = fx.market.listings.get_listing(Some(&bob), &offered)?.listing;
    assert_eq!((wanted.owner, wanted.status), (alice.clone(), ListingStatus::Swapped));
    assert_eq!((offered.owner, offered.status), (bob.clone(), ListingStatus::Swapped));
    // no points involved
    assert_eq!(points_of(&fx, &alice)?, 100);
    assert_eq!(points_of(&fx, &bob)?, 100);
    Ok(())
}

#[test]
fn cancel_after_accept_restores_listings_and_points() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let coat = approved_listing(&fx, &bob, 60, SwapPreference::Points)?;

    let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(coat.clone(), 60))?;
    fx.market.swaps.accept_swap(&bob, &swap.id)?;
    assert_eq!(points_of(&fx, &alice)?, 40);

    let swap = fx
        .market
        .swaps
        .cancel_swap(&bob, &swap.id, Some("sold it elsewhere"))?;
    assert_eq!(swap.status, SwapStatus::Cancelled);
    assert_eq!(swap.cancelled_by.as_ref(), Some(&bob));
    assert_eq!(swap.cancellation_reason.as_deref(), Some("sold it elsewhere"));
    assert_eq!(swap.escrowed, None);

    let listing = fx.market.listings.get_listing(None, &coat)?.listing;
    assert_eq!(listing.status, ListingStatus::Available);
    assert_eq!(points_of(&fx, &alice)?, 100);

    // the listing is free for a new proposal
    fx.market.swaps.create_swap(&alice, CreateSwap::points(coat, 60))?;
    Ok(())
}

#[test]
fn cancel_pending_leaves_listings_alone() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let scarf = approved_listing(&fx, &bob, 0, SwapPreference::Both)?;

    let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(scarf.clone(), 15))?;
    fx.market.swaps.cancel_swap(&alice, &swap.id, None)?;

    let listing = fx.market.listings.get_listing(None, &scarf)?.listing;
    assert_eq!(listing.status, ListingStatus::Available);
    assert_eq!(points_of(&fx, &alice)?, 100);

    let err = fx.market.swaps.accept_swap(&bob, &swap.id).unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { from: SwapStatus::Cancelled, .. }));
    Ok(())
}

#[test]
fn offering_someone_elses_item_is_forbidden() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let carol = register(&fx, "carol")?;
    let wanted = approved_listing(&fx, &bob, 0, SwapPreference::Both)?;
    let not_alices = approved_listing(&fx, &carol, 0, SwapPreference::Both)?;

    let err = fx
        .market
        .swaps
        .create_swap(&alice, CreateSwap::direct(wanted, not_alices))
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
    assert_eq!(err.public_message(), "You can only offer your own items");

    let swaps = fx.market.admin.list_swaps(&fx.admin, None, Page::first(10)?)?;
    assert_eq!(swaps.total, 0);
    Ok(())
}

#[test]
fn proposal_guards() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let boots = approved_listing(&fx, &bob, 100, SwapPreference::Both)?;
    let direct_only = approved_listing(&fx, &bob, 100, SwapPreference::Direct)?;

    // outside the 50..=150 band
    let err = fx.market.swaps.create_swap(&alice, CreateSwap::points(boots.clone(), 40)).unwrap_err();
    assert_eq!(err.to_string(), "Points amount should be between 50 and 150");

    // own listing
    let err = fx.market.swaps.create_swap(&bob, CreateSwap::points(boots.clone(), 100)).unwrap_err();
    assert_eq!(err.to_string(), "Cannot swap your own item");

    // more than alice has
    let err = fx.market.swaps.create_swap(&alice, CreateSwap::points(boots.clone(), 120)).unwrap_err();
    assert!(matches!(err, MarketError::InsufficientPoints { needed: 120, available: 100 }));

    let err = fx.market.swaps.create_swap(&alice, CreateSwap::points(direct_only, 100)).unwrap_err();
    assert_eq!(err.status_code(), 400);

    let err = fx.market.swaps.create_swap(&alice, CreateSwap::points(boots.clone(), 0)).unwrap_err();
    assert!(matches!(err, MarketError::Validation { field: "pointsAmount", .. }));

    let missing = ListingId::generate()?;
    let err = fx.market.swaps.create_swap(&alice, CreateSwap::points(missing, 50)).unwrap_err();
    assert_eq!(err.public_message(), "Requested item not found");
    Ok(())
}

#[test]
fn points_band_ends_are_inclusive() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default().with_starting_points(500))?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;

    // 50% of 101 rounds down to 50, 150% rounds up to 152
    let jacket = approved_listing(&fx, &bob, 101, SwapPreference::Points)?;
    for outside in [49, 153] {
        let err = fx
            .market
            .swaps
            .create_swap(&alice, CreateSwap::points(jacket.clone(), outside))
            .unwrap_err();
        assert_eq!(err.to_string(), "Points amount should be between 50 and 152");
    }
    for edge in [50, 152] {
        let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(jacket.clone(), edge))?;
        assert_eq!(swap.points_amount(), Some(edge));
        fx.market.swaps.cancel_swap(&alice, &swap.id, None)?;
    }

    // a one point listing still takes one or two points
    let socks = approved_listing(&fx, &bob, 1, SwapPreference::Points)?;
    let err = fx.market.swaps.create_swap(&alice, CreateSwap::points(socks.clone(), 3)).unwrap_err();
    assert_eq!(err.to_string(), "Points amount should be between 1 and 2");
    for edge in [1, 2] {
        let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(socks.clone(), edge))?;
        fx.market.swaps.cancel_swap(&alice, &swap.id, None)?;
    }
    Ok(())
}

#[test]
fn held_points_settle_after_balance_drops() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let dress = approved_listing(&fx, &bob, 100, SwapPreference::Points)?;

    let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(dress.clone(), 80))?;
    let accepted = fx.market.swaps.accept_swap(&bob, &swap.id)?;
    assert_eq!(accepted.escrowed, Some(80));
    assert_eq!(points_of(&fx, &alice)?, 20);

    let adjustment = fx.market.admin.adjust_points(&fx.admin, &alice, -1000, Some("chargeback"))?;
    assert_eq!((adjustment.previous, adjustment.current), (20, 0));

    let completed = fx.market.swaps.complete_swap(&bob, &swap.id)?;
    assert_eq!(completed.status, SwapStatus::Completed);
    assert_eq!(completed.escrowed, None);
    assert_eq!(points_of(&fx, &alice)?, 0);
    assert_eq!(points_of(&fx, &bob)?, 180);

    let listing = fx.market.listings.get_listing(Some(&alice), &dress)?.listing;
    assert_eq!((listing.owner, listing.status), (alice.clone(), ListingStatus::Swapped));
    Ok(())
}

#[test]
fn completion_refuses_listings_taken_down_after_acceptance() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let dress = approved_listing(&fx, &bob, 100, SwapPreference::Points)?;

    let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(dress.clone(), 80))?;
    fx.market.swaps.accept_swap(&bob, &swap.id)?;
    fx.market.admin.remove_listing(&fx.admin, &dress, Some("counterfeit"))?;

    let err = fx.market.swaps.complete_swap(&alice, &swap.id).unwrap_err();
    assert!(matches!(err, MarketError::Rule(_)));

    let listing = fx.market.listings.get_listing(Some(&bob), &dress)?.listing;
    assert_eq!((listing.owner, listing.status), (bob.clone(), ListingStatus::Removed));
    assert_eq!(fx.market.swaps.get_swap(&alice, &swap.id)?.status, SwapStatus::Accepted);
    assert_eq!(points_of(&fx, &alice)?, 20);
    assert_eq!(points_of(&fx, &bob)?, 100);

    // backing out returns the escrow and leaves the takedown in place
    fx.market.swaps.cancel_swap(&alice, &swap.id, Some("item removed"))?;
    assert_eq!(points_of(&fx, &alice)?, 100);
    let listing = fx.market.listings.get_listing(Some(&bob), &dress)?.listing;
    assert_eq!(listing.status, ListingStatus::Removed);
    Ok(())
}

#[test]
fn one_outstanding_swap_per_listing() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let carol = register(&fx, "carol")?;
    let bag = approved_listing(&fx, &bob, 0, SwapPreference::Both)?;

    let first = fx.market.swaps.create_swap(&alice, CreateSwap::points(bag.clone(), 30))?;
    let err = fx.market.swaps.create_swap(&carol, CreateSwap::points(bag.clone(), 30)).unwrap_err();
    assert!(matches!(err, MarketError::Conflict(_)));

    fx.market.swaps.reject_swap(&bob, &first.id)?;
    fx.market
        .swaps
        .create_swap(&carol, CreateSwap::points(bag, 30))
        .context("a rejected swap should free the listing")?;
    Ok(())
}

#[test]
fn only_the_recipient_answers() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let carol = register(&fx, "carol")?;
    let hat = approved_listing(&fx, &bob, 0, SwapPreference::Both)?;
    let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(hat, 10))?;

    assert_eq!(fx.market.swaps.accept_swap(&alice, &swap.id).unwrap_err().status_code(), 403);
    assert_eq!(fx.market.swaps.reject_swap(&carol, &swap.id).unwrap_err().status_code(), 403);
    assert_eq!(fx.market.swaps.cancel_swap(&carol, &swap.id, None).unwrap_err().status_code(), 403);
    assert_eq!(fx.market.swaps.get_swap(&carol, &swap.id).unwrap_err().status_code(), 403);
    fx.market.swaps.get_swap(&fx.admin, &swap.id).context("admins may read any swap")?;

    let pending = fx.market.swaps.pending_swaps(&bob, Page::first(10)?)?;
    assert_eq!(pending.total, 1);
    assert_eq!(fx.market.swaps.pending_swaps(&alice, Page::first(10)?)?.total, 0);
    Ok(())
}

#[test]
fn settle_on_complete_aborts_without_partial_transfer() -> anyhow::Result<()> {
    let config = MarketConfig::default().with_escrow(EscrowPolicy::SettleOnComplete);
    let fx = setup(config)?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let dress = approved_listing(&fx, &bob, 100, SwapPreference::Points)?;

    let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(dress.clone(), 80))?;
    fx.market.swaps.accept_swap(&bob, &swap.id)?;
    // nothing held under this policy
    assert_eq!(points_of(&fx, &alice)?, 100);

    fx.market.admin.adjust_points(&fx.admin, &alice, -90, Some("chargeback"))?;
    let err = fx.market.swaps.complete_swap(&alice, &swap.id).unwrap_err();
    assert!(matches!(err, MarketError::InsufficientPoints { needed: 80, available: 10 }));

    let stored = fx.market.swaps.get_swap(&alice, &swap.id)?;
    assert_eq!(stored.status, SwapStatus::Accepted);
    let listing = fx.market.listings.get_listing(Some(&bob), &dress)?.listing;
    assert_eq!((listing.owner, listing.status), (bob.clone(), ListingStatus::Reserved));
    assert_eq!(points_of(&fx, &alice)?, 10);
    assert_eq!(points_of(&fx, &bob)?, 100);
    Ok(())
}

#[test]
fn recipient_cover_check_is_configurable() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let tee = approved_listing(&fx, &bob, 100, SwapPreference::Both)?;
    let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(tee, 90))?;

    fx.market.admin.adjust_points(&fx.admin, &bob, -50, None)?;
    let err = fx.market.swaps.accept_swap(&bob, &swap.id).unwrap_err();
    assert!(matches!(err, MarketError::InsufficientPoints { .. }));

    let relaxed = setup(MarketConfig::default().with_recipient_cover_check(false))?;
    let alice = register(&relaxed, "alice")?;
    let bob = register(&relaxed, "bob")?;
    let tee = approved_listing(&relaxed, &bob, 100, SwapPreference::Both)?;
    let swap = relaxed.market.swaps.create_swap(&alice, CreateSwap::points(tee, 90))?;
    relaxed.market.admin.adjust_points(&relaxed.admin, &bob, -50, None)?;
    relaxed.market.swaps.accept_swap(&bob, &swap.id)?;
    Ok(())
}

#[test]
fn concurrent_accepts_admit_exactly_one() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let skirt = approved_listing(&fx, &bob, 100, SwapPreference::Both)?;
    let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(skirt, 100))?;

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| fx.market.swaps.accept_swap(&bob, &swap.id)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(err, MarketError::InvalidTransition { from: SwapStatus::Accepted, .. }));
    }
    // held exactly once
    assert_eq!(points_of(&fx, &alice)?, 0);
    Ok(())
}

#[test]
fn concurrent_proposals_admit_at_most_one() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let owner = register(&fx, "owner")?;
    let bidders = ["ann", "ben", "cat", "dan"]
        .iter()
        .map(|name| register(&fx, name))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let shoes = approved_listing(&fx, &owner, 0, SwapPreference::Both)?;

    let created = std::thread::scope(|scope| {
        let handles: Vec<_> = bidders
            .iter()
            .map(|bidder| {
                let shoes = shoes.clone();
                let market = fx.market.clone();
                scope.spawn(move || market.swaps.create_swap(bidder, CreateSwap::points(shoes, 20)))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count()
    });

    assert_eq!(created, 1);
    Ok(())
}

#[test]
fn rating_follows_completion() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let belt = approved_listing(&fx, &bob, 20, SwapPreference::Both)?;
    let swap = fx.market.swaps.create_swap(&alice, CreateSwap::points(belt, 20))?;

    let err = fx.market.swaps.rate_swap(&alice, &swap.id, 5, None).unwrap_err();
    assert!(matches!(err, MarketError::InvalidTransition { from: SwapStatus::Pending, .. }));

    fx.market.swaps.accept_swap(&bob, &swap.id)?;
    fx.market.swaps.complete_swap(&bob, &swap.id)?;

    let err = fx.market.swaps.rate_swap(&alice, &swap.id, 6, None).unwrap_err();
    assert!(matches!(err, MarketError::Validation { field: "rating", .. }));

    fx.market.swaps.rate_swap(&alice, &swap.id, 3, Some("ok"))?;
    let swap = fx.market.swaps.rate_swap(&alice, &swap.id, 5, Some("great after all"))?;
    let rating = swap.initiator_rating.context("initiator rating missing")?;
    assert_eq!(rating.rating, 5);
    assert_eq!(rating.comment.as_deref(), Some("great after all"));
    assert!(swap.recipient_rating.is_none());
    assert_eq!(swap.status, SwapStatus::Completed);

    let stats = fx.market.swaps.swap_stats(&alice)?;
    assert_eq!(stats.get(SwapStatus::Completed), 1);
    assert_eq!(stats.get(SwapStatus::Cancelled), 0);
    Ok(())
}

#[test]
fn deactivated_users_cannot_act() -> anyhow::Result<()> {
    let fx = setup(MarketConfig::default())?;
    let alice = register(&fx, "alice")?;
    let bob = register(&fx, "bob")?;
    let cap = approved_listing(&fx, &bob, 0, SwapPreference::Both)?;

    fx.market.users.deactivate_account(&alice)?;
    let err = fx.market.swaps.create_swap(&alice, CreateSwap::points(cap, 10)).unwrap_err();
    assert_eq!(err.status_code(), 401);

    let stranger = UserId::generate()?;
    assert_eq!(fx.market.swaps.swap_stats(&stranger).unwrap_err().status_code(), 401);
    Ok(())
}
