//! Query keys, page metadata, and fetched pages.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    record::Record,
    types::{PageNumber, PageSize},
};

/// Scalar filter parameter sent alongside `page`/`take`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer id or count.
    Int(i64),
    /// Free text.
    Text(String),
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for FilterValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Identity of one paginated collection fetch.
///
/// Two keys are equal iff resource, every filter, page and page size are
/// equal. Filters are kept sorted so insertion order never matters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    /// Resource path, e.g. `courses` or `course-classes/7/students`.
    pub resource: String,
    /// Filter parameters.
    pub filters: BTreeMap<String, FilterValue>,
    /// One-based page number.
    pub page: PageNumber,
    /// Page size.
    pub take: PageSize,
}

impl QueryKey {
    /// Key for page 1 of `resource` with `take` items per page.
    pub fn new(resource: impl Into<String>, take: PageSize) -> Self {
        Self {
            resource: resource.into(),
            filters: BTreeMap::new(),
            page: 1,
            take,
        }
    }

    /// Adds or replaces a filter parameter.
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Same key pointed at `page`.
    pub fn with_page(mut self, page: PageNumber) -> Self {
        self.page = page;
        self
    }

    /// Query-string pairs in wire order: `page`, `take`, then filters.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.filters.len() + 2);
        pairs.push(("page".to_string(), self.page.to_string()));
        pairs.push(("take".to_string(), self.take.to_string()));
        for (name, value) in &self.filters {
            pairs.push((name.clone(), value.to_string()));
        }
        pairs
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?page={}&take={}", self.resource, self.page, self.take)?;
        for (name, value) in &self.filters {
            write!(f, "&{name}={value}")?;
        }
        Ok(())
    }
}

/// Pagination metadata as returned by list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    /// Page these items belong to.
    pub current_page: PageNumber,
    /// Number of pages available.
    pub total_pages: u32,
    /// Page size the server applied.
    pub items_per_page: PageSize,
    /// Total items across all pages.
    pub total_items: u64,
}

impl PageMeta {
    /// Meta for a list that fits in a single page.
    pub fn single_page(len: usize) -> Self {
        Self {
            current_page: 1,
            total_pages: 1,
            items_per_page: PageSize::try_from(len).unwrap_or(PageSize::MAX),
            total_items: len as u64,
        }
    }

    /// Clamps `current_page` into `1..=max(total_pages, 1)`.
    pub fn normalized(mut self) -> Self {
        let last = self.total_pages.max(1);
        let clamped = self.current_page.clamp(1, last);
        if clamped != self.current_page {
            warn!(
                current_page = self.current_page,
                total_pages = self.total_pages,
                "page meta out of range, clamping"
            );
            self.current_page = clamped;
        }
        self
    }

    /// True when another page follows this one.
    pub fn has_next(&self) -> bool {
        self.current_page < self.total_pages
    }
}

/// One fetched page: `{data, meta}` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// Items in server order.
    pub data: Vec<Record>,
    /// Pagination metadata.
    pub meta: PageMeta,
}
