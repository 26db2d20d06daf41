use crate::error::{MarketError, Result};

pub const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    page: usize,
    limit: usize,
}

impl Page {
    /// `page` starts at 1, `limit` is between 1 and 100.
    pub fn new(page: usize, limit: usize) -> Result<Self> {
        if page == 0 {
            return Err(MarketError::validation("page", "Page must be a positive integer"));
        }
        if limit == 0 || limit > MAX_LIMIT {
            return Err(MarketError::validation("limit", "Limit must be between 1 and 100"));
        }
        Ok(Self { page, limit })
    }

    /// First page with `limit` entries; callers pick their own default sizes.
    pub fn first(limit: usize) -> Result<Self> {
        Self::new(1, limit)
    }

    pub fn page(&self) -> usize {
        self.page
    }
    pub fn limit(&self) -> usize {
        self.limit
    }
    fn skip(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }

    /// Slice an already filtered and sorted collection.
    pub fn apply<T>(&self, items: Vec<T>) -> Paginated<T> {
        let total = items.len();
        let items = items.into_iter().skip(self.skip()).take(self.limit).collect();
        Paginated {
            items,
            page: self.page,
            limit: self.limit,
            total,
            pages: total.div_ceil(self.limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}
