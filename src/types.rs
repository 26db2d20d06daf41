//! Shared value types: identifiers, timestamps and the closed vocabularies
//! listings and accounts are described with.
use chrono::{DateTime, Duration, TimeZone, Utc};

entity_id!(
    /// bech32m encoded uuid7 with the `user_` prefix.
    UserId,
    "user_",
    "userId"
);
entity_id!(
    /// bech32m encoded uuid7 with the `item_` prefix.
    ListingId,
    "item_",
    "itemId"
);
entity_id!(
    /// bech32m encoded uuid7 with the `swap_` prefix.
    SwapId,
    "swap_",
    "swapId"
);

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// Calendar day bucket used by the trend reports.
    pub fn day_key(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }
    pub fn days_before(&self, days: u32) -> Self {
        Self(self.0 - Duration::days(i64::from(days)))
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

labelled_enum!(
    Role, "role" {
        0 => User = "user",
        1 => Admin = "admin",
    }
);

labelled_enum!(
    /// Garment category.
    Category, "category" {
        0 => Tops = "tops",
        1 => Bottoms = "bottoms",
        2 => Dresses = "dresses",
        3 => Outerwear = "outerwear",
        4 => Shoes = "shoes",
        5 => Accessories = "accessories",
        6 => Jewelry = "jewelry",
        7 => Bags = "bags",
        8 => Hats = "hats",
        9 => Scarves = "scarves",
    }
);

labelled_enum!(
    /// The listing's "type": the style of the garment.
    Style, "type" {
        0 => Casual = "casual",
        1 => Formal = "formal",
        2 => Business = "business",
        3 => Sportswear = "sportswear",
        4 => Vintage = "vintage",
        5 => Streetwear = "streetwear",
        6 => Bohemian = "bohemian",
        7 => Minimalist = "minimalist",
        8 => Luxury = "luxury",
        9 => EcoFriendly = "eco-friendly",
    }
);

labelled_enum!(
    Condition, "condition" {
        0 => New = "new",
        1 => LikeNew = "like-new",
        2 => Excellent = "excellent",
        3 => Good = "good",
        4 => Fair = "fair",
        5 => Poor = "poor",
    }
);

labelled_enum!(
    /// Which kinds of swap a listing may be the target (or offer) of.
    SwapPreference, "swapType" {
        0 => Direct = "direct",
        1 => Points = "points",
        2 => Both = "both",
    }
);

/// Letter sizes, numeric clothing sizes and shoe sizes accepted on listings.
pub const SIZES: &[&str] = &[
    "XS", "S", "M", "L", "XL", "XXL", "XXXL", "2", "4", "6", "8", "10", "12", "14", "16", "18",
    "20", "22", "24", "26", "28", "30", "32", "34", "36", "38", "40", "42", "44", "46", "48", "50",
    "52", "54", "56", "58", "60", "5", "5.5", "6.5", "7", "7.5", "8.5", "9", "9.5", "10.5", "11",
    "11.5", "12.5", "13", "13.5", "one-size", "custom",
];

pub fn is_known_size(size: &str) -> bool {
    SIZES.contains(&size)
}
