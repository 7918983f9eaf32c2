use super::Record;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Decides whether `item` satisfies the constraint `value` stored under filter key `key`.
pub type FilterPredicate = Arc<dyn Fn(&dyn Record, &str, &str) -> bool + Send + Sync>;

pub fn strict_equals(item: &dyn Record, key: &str, value: &str) -> bool {
    matches!(item.field(key), Some(Value::String(actual)) if actual == value)
}

#[derive(Clone)]
pub struct FilterPredicates {
    by_key: HashMap<String, FilterPredicate>,
}

impl Default for FilterPredicates {
    fn default() -> Self {
        let mut predicates = Self::strict();
        predicates.register("status", PublishState::default().into_predicate());
        predicates
    }
}

impl fmt::Debug for FilterPredicates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.by_key.keys().collect::<Vec<_>>();
        keys.sort();
        f.debug_struct("FilterPredicates").field("keys", &keys).finish()
    }
}

impl FilterPredicates {
    /// Every key compared by strict string equality.
    pub fn strict() -> Self {
        Self { by_key: HashMap::new() }
    }

    pub fn register(&mut self, key: impl Into<String>, predicate: FilterPredicate) -> &mut Self {
        self.by_key.insert(key.into(), predicate);
        self
    }

    pub fn register_fn<F>(&mut self, key: impl Into<String>, predicate: F) -> &mut Self
    where
        F: Fn(&dyn Record, &str, &str) -> bool + Send + Sync + 'static,
    {
        self.register(key, Arc::new(predicate))
    }

    pub fn remove(&mut self, key: &str) -> Option<FilterPredicate> {
        self.by_key.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn matches(&self, item: &dyn Record, key: &str, value: &str) -> bool {
        match self.by_key.get(key) {
            Some(predicate) => predicate(item, key, value),
            None => strict_equals(item, key, value),
        }
    }
}

/// Maps the localized published/draft labels on a status filter onto the boolean `published` field.
/// Values that are neither label fall back to strict equality on the filtered field itself.
#[derive(Debug, Clone)]
pub struct PublishState {
    pub published_labels: Vec<String>,
    pub draft_labels: Vec<String>,
    pub flag_field: String,
}

impl Default for PublishState {
    fn default() -> Self {
        Self {
            published_labels: vec!["已发布".to_string()],
            draft_labels: vec!["草稿".to_string()],
            flag_field: "published".to_string(),
        }
    }
}

impl PublishState {
    pub fn evaluate(&self, item: &dyn Record, key: &str, value: &str) -> bool {
        if self.published_labels.iter().any(|label| label == value) {
            return self.is_published(item);
        }
        if self.draft_labels.iter().any(|label| label == value) {
            return !self.is_published(item);
        }
        strict_equals(item, key, value)
    }

    fn is_published(&self, item: &dyn Record) -> bool {
        matches!(item.field(&self.flag_field), Some(Value::Bool(true)))
    }

    pub fn into_predicate(self) -> FilterPredicate {
        Arc::new(move |item: &dyn Record, key: &str, value: &str| self.evaluate(item, key, value))
    }
}
