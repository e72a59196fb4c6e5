//! Pagination parameters and paged results.

use serde::{Deserialize, Serialize};

use orderflow_core::{DomainError, DomainResult};

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    pub const DEFAULT_PAGE: u32 = 0;
    pub const DEFAULT_PAGE_SIZE: u32 = 10;

    pub fn new(page: u32, page_size: u32) -> DomainResult<Self> {
        if page_size == 0 {
            return Err(DomainError::validation("pageSize must be at least 1"));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Number of elements preceding this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page) * u64::from(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: Self::DEFAULT_PAGE,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of results plus totals across all pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub request: PageRequest,
    pub total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_elements: u64) -> Self {
        Self {
            items,
            request,
            total_elements,
        }
    }

    /// `ceil(total_elements / page_size)`.
    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(u64::from(self.request.page_size()))
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            request: self.request,
            total_elements: self.total_elements,
        }
    }
}
