//! Marketplace tunables.
use std::path::PathBuf;
use std::str::FromStr;

/// When the points of a points swap leave the initiator's spendable balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EscrowPolicy {
    /// Points are held at acceptance, spent at completion, released on cancel.
    #[default]
    HoldOnAccept,
    /// Nothing is held; the initiator's live balance is debited at completion
    /// and the completion aborts if it no longer covers the amount.
    SettleOnComplete,
}

impl FromStr for EscrowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hold" | "hold-on-accept" => Ok(Self::HoldOnAccept),
            "settle" | "settle-on-complete" => Ok(Self::SettleOnComplete),
            other => Err(format!("unknown escrow policy {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketConfig {
    /// Points granted at registration.
    pub starting_points: u64,
    /// Lowest acceptable offer, as a percentage of the listing's points value.
    pub band_floor_percent: u64,
    /// Highest acceptable offer, as a percentage of the listing's points value.
    pub band_ceiling_percent: u64,
    pub escrow: EscrowPolicy,
    /// Require the recipient's own balance to cover a points offer before accepting it.
    pub recipient_cover_check: bool,
    pub max_images: usize,
    pub featured_limit: usize,
    pub trend_window_days: u32,
    pub top_users_limit: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            starting_points: 100,
            band_floor_percent: 50,
            band_ceiling_percent: 150,
            escrow: EscrowPolicy::default(),
            recipient_cover_check: true,
            max_images: 5,
            featured_limit: 8,
            trend_window_days: 30,
            top_users_limit: 10,
        }
    }
}

impl MarketConfig {
    /// Read `REWEAR_*` variables on top of the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            starting_points: env_or("REWEAR_STARTING_POINTS", defaults.starting_points),
            band_floor_percent: env_or("REWEAR_BAND_FLOOR_PERCENT", defaults.band_floor_percent),
            band_ceiling_percent: env_or(
                "REWEAR_BAND_CEILING_PERCENT",
                defaults.band_ceiling_percent,
            ),
            escrow: env_or("REWEAR_ESCROW", defaults.escrow),
            recipient_cover_check: env_or(
                "REWEAR_RECIPIENT_COVER_CHECK",
                defaults.recipient_cover_check,
            ),
            max_images: env_or("REWEAR_MAX_IMAGES", defaults.max_images),
            featured_limit: env_or("REWEAR_FEATURED_LIMIT", defaults.featured_limit),
            trend_window_days: env_or("REWEAR_TREND_WINDOW_DAYS", defaults.trend_window_days),
            top_users_limit: env_or("REWEAR_TOP_USERS_LIMIT", defaults.top_users_limit),
        }
    }

    pub fn with_starting_points(mut self, points: u64) -> Self {
        self.starting_points = points;
        self
    }

    pub fn with_escrow(mut self, escrow: EscrowPolicy) -> Self {
        self.escrow = escrow;
        self
    }

    pub fn with_recipient_cover_check(mut self, enabled: bool) -> Self {
        self.recipient_cover_check = enabled;
        self
    }

    /// Inclusive range of acceptable points offers for a listing worth `points_value`.
    /// `None` when the listing has no price, in which case any positive offer goes.
    pub fn points_band(&self, points_value: u64) -> Option<(u64, u64)> {
        if points_value == 0 {
            return None;
        }
        let floor = (points_value.saturating_mul(self.band_floor_percent) / 100).max(1);
        let ceiling = points_value
            .saturating_mul(self.band_ceiling_percent)
            .div_ceil(100);
        Some((floor, ceiling))
    }
}

/// Where and how the sled database is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Delete the database when the last handle is dropped.
    pub temporary: bool,
    pub cache_capacity: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("rewear.db"),
            temporary: false,
            cache_capacity: 64 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            path: std::env::var("REWEAR_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            temporary: env_or("REWEAR_DB_TEMPORARY", defaults.temporary),
            cache_capacity: env_or("REWEAR_DB_CACHE_BYTES", defaults.cache_capacity),
        }
    }

    pub fn temporary(mut self) -> Self {
        self.temporary = true;
        self
    }

    pub(crate) fn to_sled(&self) -> sled::Config {
        sled::Config::new()
            .path(&self.path)
            .temporary(self.temporary)
            .cache_capacity(self.cache_capacity)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable configuration value");
            default
        }),
        Err(_) => default,
    }
}
