/// Pagination window of the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageState {
    pub offset: u64,
    pub limit: u64,
    pub total: u64,
}

impl PageState {
    pub fn new(limit: u64) -> Self {
        Self {
            offset: 0,
            limit,
            total: 0,
        }
    }

    /// 1-based number of the page containing `offset`.
    pub fn current_page(&self) -> u64 {
        if self.limit == 0 {
            return 1;
        }
        self.offset / self.limit + 1
    }

    pub fn page_count(&self) -> u64 {
        if self.limit == 0 {
            return 1;
        }
        self.total.div_ceil(self.limit).max(1)
    }

    /// Updates the window from a completed list response.
    ///
    /// The server total wins when present and non-zero, otherwise the page
    /// row count stands in for it. The server offset is trusted only when it
    /// echoed a positive limit.
    pub fn apply_response(
        &mut self,
        requested_offset: u64,
        limit: u64,
        rows: usize,
        total: Option<u64>,
        response_limit: Option<u64>,
        response_offset: Option<u64>,
    ) {
        self.limit = limit;
        self.total = match total {
            Some(total) if total > 0 => total,
            _ => rows as u64,
        };
        self.offset = match response_limit {
            Some(echoed) if echoed > 0 => response_offset.unwrap_or(0),
            _ => requested_offset,
        };
    }

    pub fn reset(&mut self) {
        self.offset = 0;
        self.total = 0;
    }
}

/// Offset of a 1-based page; page 0 is treated as the first page.
///
/// Pages past the addressable range clamp to `u64::MAX`, which the server
/// answers with an empty window.
pub fn offset_for_page(page: u64, limit: u64) -> u64 {
    page.saturating_sub(1).saturating_mul(limit)
}

/// Moves `offset` down to the nearest boundary of `limit`.
pub fn rebase_offset(offset: u64, limit: u64) -> u64 {
    if limit == 0 {
        return 0;
    }
    offset / limit * limit
}
