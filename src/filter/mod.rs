mod predicates;

pub use predicates::{strict_equals, FilterPredicate, FilterPredicates, PublishState};

use crate::models::QueryState;
use once_cell::unsync::OnceCell;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Field lookup over a caller-owned item.
pub trait Record {
    fn field(&self, name: &str) -> Option<&Value>;
}

impl Record for Map<String, Value> {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Record for Value {
    fn field(&self, name: &str) -> Option<&Value> {
        self.as_object().and_then(|object| object.get(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterConfig {
    pub search_fields: Vec<String>,
    pub items_per_page: usize,
    pub initial_filters: BTreeMap<String, String>,
}

impl FilterConfig {
    pub fn new<I, S>(search_fields: I, items_per_page: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            search_fields: search_fields.into_iter().map(Into::into).collect(),
            items_per_page,
            initial_filters: BTreeMap::new(),
        }
    }

    pub fn with_initial_filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.initial_filters.insert(key.into(), value.into());
        self
    }
}

/// Search, filter and paginate an in-memory collection.
///
/// The filtered index list is memoized and only recomputed after the search text, the filters,
/// the predicates or the items change. Paging never touches it.
pub struct FilterEngine<T> {
    items: Vec<T>,
    config: FilterConfig,
    predicates: FilterPredicates,
    query: QueryState,
    filtered: OnceCell<Vec<usize>>,
}

impl<T: Record> FilterEngine<T> {
    pub fn new(items: Vec<T>, mut config: FilterConfig) -> Self {
        if config.items_per_page == 0 {
            tracing::warn!("items_per_page must be positive; clamping to 1");
            config.items_per_page = 1;
        }
        let query = QueryState {
            filters: config.initial_filters.clone(),
            ..QueryState::default()
        };
        Self {
            items,
            config,
            predicates: FilterPredicates::default(),
            query,
            filtered: OnceCell::new(),
        }
    }

    pub fn with_predicates(mut self, predicates: FilterPredicates) -> Self {
        self.predicates = predicates;
        self.invalidate();
        self
    }

    pub fn predicates_mut(&mut self) -> &mut FilterPredicates {
        self.invalidate();
        &mut self.predicates
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn query(&self) -> &QueryState {
        &self.query
    }

    pub fn search_query(&self) -> &str {
        &self.query.search_query
    }

    pub fn filters(&self) -> &BTreeMap<String, String> {
        &self.query.filters
    }

    pub fn current_page(&self) -> usize {
        self.query.current_page
    }

    /// Echo of the input box; leaves the page alone.
    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.query.search_query = query.into();
        self.invalidate();
    }

    pub fn handle_search(&mut self, query: impl Into<String>) {
        self.set_search_query(query);
        self.query.current_page = 1;
    }

    pub fn set_filter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query.filters.insert(key.into(), value.into());
        self.query.current_page = 1;
        self.invalidate();
    }

    pub fn clear_filters(&mut self) {
        self.query = QueryState::default();
        self.invalidate();
    }

    /// Clamped to `1..=max(1, total_pages)`.
    pub fn set_current_page(&mut self, page: usize) {
        let last = self.total_pages().max(1);
        self.query.current_page = page.clamp(1, last);
    }

    pub fn replace_items(&mut self, items: Vec<T>) {
        self.items = items;
        self.invalidate();
    }

    pub fn restore_query(&mut self, state: QueryState) {
        self.query = state;
        self.query.current_page = self.query.current_page.max(1);
        self.invalidate();
    }

    pub fn is_filtered(&self) -> bool {
        !self.query.search_query.is_empty()
            || self.query.filters.values().any(|value| !value.is_empty())
    }

    pub fn filtered_len(&self) -> usize {
        self.filtered_indices().len()
    }

    pub fn filtered_data(&self) -> Vec<&T> {
        self.filtered_indices().iter().map(|&index| &self.items[index]).collect()
    }

    pub fn current_page_data(&self) -> Vec<&T> {
        let indices = self.filtered_indices();
        let (start, end) = self.page_bounds(indices.len());
        indices[start..end].iter().map(|&index| &self.items[index]).collect()
    }

    pub fn total_pages(&self) -> usize {
        self.filtered_len().div_ceil(self.config.items_per_page)
    }

    /// 1-based inclusive positions of the current page within the filtered set.
    pub fn page_range(&self) -> Option<(usize, usize)> {
        let (start, end) = self.page_bounds(self.filtered_len());
        (start < end).then_some((start + 1, end))
    }

    /// Distinct non-empty string values of `key` across all items, for filter dropdowns.
    pub fn filter_options(&self, key: &str) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| item.field(key).and_then(Value::as_str))
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn page_bounds(&self, len: usize) -> (usize, usize) {
        let per_page = self.config.items_per_page;
        let start = self.query.current_page.saturating_sub(1).saturating_mul(per_page).min(len);
        let end = start.saturating_add(per_page).min(len);
        (start, end)
    }

    fn filtered_indices(&self) -> &[usize] {
        self.filtered.get_or_init(|| {
            let search_lower = self.query.search_query.to_lowercase();
            self.items
                .iter()
                .enumerate()
                .filter(|(_, item)| {
                    self.matches_search(*item, &search_lower) && self.matches_filters(*item)
                })
                .map(|(index, _)| index)
                .collect()
        })
    }

    fn matches_search(&self, item: &T, search_lower: &str) -> bool {
        if search_lower.is_empty() {
            return true;
        }
        self.config.search_fields.iter().any(|field| match item.field(field) {
            Some(Value::String(text)) => text.to_lowercase().contains(search_lower),
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(Value::as_str)
                .any(|text| text.to_lowercase().contains(search_lower)),
            _ => false,
        })
    }

    fn matches_filters(&self, item: &T) -> bool {
        self.query
            .filters
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .all(|(key, value)| self.predicates.matches(item, key, value))
    }

    fn invalidate(&mut self) {
        self.filtered.take();
    }
}
