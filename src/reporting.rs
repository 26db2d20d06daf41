//! Read-only projections behind the user and admin dashboards.
//!
//! Everything here works on documents already loaded from the store, so the
//! functions are pure and the services decide what to feed them.
use crate::listing::{Listing, ListingStatus};
use crate::swap::{Swap, SwapStatus};
use crate::types::{Category, TimeStamp, UserId};
use crate::user::{PublicProfile, User};
use chrono::Utc;
use std::collections::BTreeMap;

/// Counts per key; every key of the vocabulary is present, zeros included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally<K: Ord> {
    pub counts: BTreeMap<K, usize>,
    pub total: usize,
}

impl<K: Ord + Copy> Tally<K> {
    pub fn zeroed(keys: &[K]) -> Self {
        Self {
            counts: keys.iter().map(|k| (*k, 0)).collect(),
            total: 0,
        }
    }

    pub fn add(&mut self, key: K) {
        *self.counts.entry(key).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn get(&self, key: K) -> usize {
        self.counts.get(&key).copied().unwrap_or(0)
    }
}

pub type SwapStats = Tally<SwapStatus>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserTotals {
    pub total: usize,
    pub active: usize,
    pub verified: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dashboard {
    pub users: UserTotals,
    pub listings: Tally<ListingStatus>,
    pub swaps: Tally<SwapStatus>,
    pub recent_listings: Vec<Listing>,
    pub recent_swaps: Vec<Swap>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayCount {
    /// `YYYY-MM-DD`
    pub day: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trends {
    pub days: u32,
    pub registrations: Vec<DayCount>,
    pub listings: Vec<DayCount>,
    pub completed_swaps: Vec<DayCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryCount {
    pub category: Category,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopUser {
    pub user: PublicProfile,
    pub listings: usize,
    pub swaps: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reports {
    pub trends: Trends,
    pub categories: Vec<CategoryCount>,
    pub top_users: Vec<TopUser>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListingCounts {
    pub total: usize,
    pub available: usize,
    pub reserved: usize,
    pub swapped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStats {
    pub listings: ListingCounts,
    pub swaps: SwapStats,
    pub points: u64,
    /// Points received as the recipient of completed points swaps.
    pub points_earned: u64,
}

pub fn swap_stats<'a>(user: &UserId, swaps: impl IntoIterator<Item = &'a Swap>) -> SwapStats {
    let mut stats = Tally::zeroed(SwapStatus::ALL);
    swaps
        .into_iter()
        .filter(|s| s.is_participant(user))
        .for_each(|s| stats.add(s.status));
    stats
}

pub fn dashboard(users: &[User], listings: &[Listing], swaps: &[Swap], recent: usize) -> Dashboard {
    let mut totals = UserTotals::default();
    for user in users {
        totals.total += 1;
        totals.active += usize::from(user.is_active);
        totals.verified += usize::from(user.is_verified);
    }

    let mut listing_counts = Tally::zeroed(ListingStatus::ALL);
    listings.iter().for_each(|l| listing_counts.add(l.status));
    let mut swap_counts = Tally::zeroed(SwapStatus::ALL);
    swaps.iter().for_each(|s| swap_counts.add(s.status));

    let mut recent_listings = listings.to_vec();
    recent_listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent_listings.truncate(recent);
    let mut recent_swaps = swaps.to_vec();
    recent_swaps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent_swaps.truncate(recent);

    Dashboard {
        users: totals,
        listings: listing_counts,
        swaps: swap_counts,
        recent_listings,
        recent_swaps,
    }
}

/// Per day counts over the trailing `days` days ending at `now`.
pub fn trends(
    users: &[User],
    listings: &[Listing],
    swaps: &[Swap],
    days: u32,
    now: &TimeStamp<Utc>,
) -> Trends {
    let since = now.days_before(days);
    Trends {
        days,
        registrations: bucket_by_day(users.iter().map(|u| &u.created_at), &since),
        listings: bucket_by_day(listings.iter().map(|l| &l.created_at), &since),
        completed_swaps: bucket_by_day(swaps.iter().filter_map(|s| s.completed_at.as_ref()), &since),
    }
}

fn bucket_by_day<'a>(
    stamps: impl Iterator<Item = &'a TimeStamp<Utc>>,
    since: &TimeStamp<Utc>,
) -> Vec<DayCount> {
    let mut buckets: BTreeMap<String, usize> = BTreeMap::new();
    for stamp in stamps.filter(|s| *s >= since) {
        *buckets.entry(stamp.day_key()).or_insert(0) += 1;
    }
    buckets
        .into_iter()
        .map(|(day, count)| DayCount { day, count })
        .collect()
}

/// Available listings per category, most populated first.
pub fn category_distribution(listings: &[Listing]) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<Category, usize> = BTreeMap::new();
    for listing in listings.iter().filter(|l| l.is_available()) {
        *counts.entry(listing.category).or_insert(0) += 1;
    }
    let mut distribution: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, count)| CategoryCount { category, count })
        .collect();
    // stable sort keeps category order among ties
    distribution.sort_by(|a, b| b.count.cmp(&a.count));
    distribution
}

pub fn top_users(users: &[User], listings: &[Listing], swaps: &[Swap], limit: usize) -> Vec<TopUser> {
    let mut ranked: Vec<TopUser> = users
        .iter()
        .map(|user| TopUser {
            user: user.public_profile(),
            listings: listings.iter().filter(|l| l.owner == user.id).count(),
            swaps: swaps.iter().filter(|s| s.is_participant(&user.id)).count(),
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.listings
            .cmp(&a.listings)
            .then_with(|| b.swaps.cmp(&a.swaps))
    });
    ranked.truncate(limit);
    ranked
}

pub fn user_stats(user: &User, listings: &[Listing], swaps: &[Swap]) -> UserStats {
    let mut counts = ListingCounts::default();
    for listing in listings.iter().filter(|l| l.owner == user.id) {
        counts.total += 1;
        match listing.status {
            ListingStatus::Available => counts.available += 1,
            ListingStatus::Reserved => counts.reserved += 1,
            ListingStatus::Swapped => counts.swapped += 1,
            _ => {}
        }
    }

    let points_earned = swaps
        .iter()
        .filter(|s| s.recipient == user.id && s.status == SwapStatus::Completed)
        .filter_map(Swap::points_amount)
        .sum();

    UserStats {
        listings: counts,
        swaps: swap_stats(&user.id, swaps),
        points: user.points(),
        points_earned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::ListingDraft;
    use crate::swap::{SwapEvent, SwapTerms};
    use crate::types::{Condition, ListingId, Style, SwapId};
    use crate::user::Registration;

    fn user(name: &str) -> User {
        Registration::new(name, &format!("{name}@example.com"))
            .set_name("Test", "User")
            .validate_and_finalise(UserId::generate().unwrap(), 100)
            .unwrap()
    }

    fn listing(owner: &UserId, category: Category, status: ListingStatus) -> Listing {
        let mut listing = ListingDraft::new()
            .set_title("Something to wear")
            .set_description("A perfectly fine garment")
            .set_category(category)
            .set_style(Style::Casual)
            .set_size("M")
            .set_condition(Condition::Good)
            .set_color("black")
            .validate_and_finalise(ListingId::generate().unwrap(), owner.clone(), 5)
            .unwrap();
        listing.status = status;
        listing
    }

    fn completed_points_swap(initiator: &UserId, recipient: &UserId, amount: u64) -> Swap {
        let mut swap = Swap::propose(
            SwapId::generate().unwrap(),
            initiator.clone(),
            recipient.clone(),
            ListingId::generate().unwrap(),
            SwapTerms::Points { amount },
            None,
        )
        .unwrap();
        swap.record(recipient, SwapEvent::Accept).unwrap();
        swap.record(initiator, SwapEvent::Complete).unwrap();
        swap
    }

    #[test]
    fn swap_stats_include_zeros() {
        let alice = user("alice");
        let bob = user("bob");
        let swaps = vec![completed_points_swap(&alice.id, &bob.id, 40)];

        let stats = swap_stats(&alice.id, &swaps);
        assert_eq!(stats.counts.len(), SwapStatus::ALL.len());
        assert_eq!(stats.get(SwapStatus::Completed), 1);
        assert_eq!(stats.get(SwapStatus::Pending), 0);
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn categories_sorted_by_count() {
        let owner = UserId::generate().unwrap();
        let listings = vec![
            listing(&owner, Category::Shoes, ListingStatus::Available),
            listing(&owner, Category::Tops, ListingStatus::Available),
            listing(&owner, Category::Tops, ListingStatus::Available),
            listing(&owner, Category::Bags, ListingStatus::Pending),
        ];

        let distribution = category_distribution(&listings);
        assert_eq!(
            distribution,
            vec![
                CategoryCount { category: Category::Tops, count: 2 },
                CategoryCount { category: Category::Shoes, count: 1 },
            ]
        );
    }

    #[test]
    fn trends_bucket_inside_the_window() {
        let mut old = user("old_timer");
        old.created_at = TimeStamp::new_with(2020, 1, 1, 0, 0, 0).unwrap();
        let recent = user("newcomer");
        let now = TimeStamp::new();

        let trends = trends(&[old, recent], &[], &[], 30, &now);
        assert_eq!(trends.registrations.len(), 1);
        assert_eq!(trends.registrations[0].day, now.day_key());
        assert!(trends.completed_swaps.is_empty());
    }

    #[test]
    fn user_stats_count_earned_points() {
        let alice = user("alice");
        let bob = user("bob");
        let listings = vec![
            listing(&bob.id, Category::Tops, ListingStatus::Available),
            listing(&bob.id, Category::Tops, ListingStatus::Swapped),
            listing(&alice.id, Category::Tops, ListingStatus::Available),
        ];
        let swaps = vec![
            completed_points_swap(&alice.id, &bob.id, 80),
            completed_points_swap(&bob.id, &alice.id, 30),
        ];

        let stats = user_stats(&bob, &listings, &swaps);
        assert_eq!(stats.listings.total, 2);
        assert_eq!(stats.listings.swapped, 1);
        assert_eq!(stats.points_earned, 80);
        assert_eq!(stats.swaps.get(SwapStatus::Completed), 2);
    }

    #[test]
    fn top_users_rank_by_listings_then_swaps() {
        let alice = user("alice");
        let bob = user("bob");
        let carol = user("carol");
        let listings = vec![
            listing(&bob.id, Category::Tops, ListingStatus::Available),
            listing(&carol.id, Category::Tops, ListingStatus::Available),
        ];
        let swaps = vec![completed_points_swap(&alice.id, &carol.id, 10)];

        let ranked = top_users(&[alice.clone(), bob.clone(), carol.clone()], &listings, &swaps, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].user.id, carol.id);
        assert_eq!(ranked[1].user.id, bob.id);
    }
}
