//! Client-side field filters, applied to event bodies after the
//! server-side predicate has done its narrowing.

use crate::engine::field_path;
use serde_json::Value;

/// Field-path equality criteria over an event body. Repeating a path
/// widens that path's accepted set (OR within the set); distinct paths
/// must all match (AND across paths).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldFilter {
    criteria: Vec<Criterion>,
}

#[derive(Debug, Clone, PartialEq)]
struct Criterion {
    path: String,
    accepted: Vec<Value>,
}

impl FieldFilter {
    pub fn new() -> Self {
        FieldFilter::default()
    }

    /// Accepts `value` at `path`.
    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        let path = path.into();
        let value = value.into();
        match self.criteria.iter_mut().find(|c| c.path == path) {
            Some(criterion) => criterion.accepted.push(value),
            None => self.criteria.push(Criterion { path, accepted: vec![value] }),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Whether every path's actual value is among that path's accepted
    /// values. Paths that do not resolve fail the filter.
    pub fn matches(&self, body: &Value) -> bool {
        self.criteria.iter().all(|criterion| {
            field_path(body, &criterion.path)
                .is_some_and(|actual| criterion.accepted.contains(actual))
        })
    }
}

/// Filter-list semantics: an empty list, or a list of only empty
/// filters, matches everything; otherwise at least one non-empty filter
/// must match.
pub(crate) fn matches_any(filters: &[FieldFilter], body: &Value) -> bool {
    let mut constrained = false;
    for filter in filters {
        if filter.is_empty() {
            continue;
        }
        constrained = true;
        if filter.matches(body) {
            return true;
        }
    }
    !constrained
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> Value {
        json!({
            "kind": "created",
            "actor": { "name": "ada", "role": "admin" },
            "attempt": 2
        })
    }

    #[test]
    fn test_empty_filter_list_matches_all() {
        assert!(matches_any(&[], &body()));
    }

    #[test]
    fn test_all_empty_filters_match_all() {
        assert!(matches_any(&[FieldFilter::new(), FieldFilter::new()], &body()));
    }

    #[test]
    fn test_values_within_one_path_are_alternatives() {
        let filter = FieldFilter::new().eq("kind", "updated").eq("kind", "created");
        assert!(filter.matches(&body()));
    }

    #[test]
    fn test_paths_within_one_filter_must_all_match() {
        let matching = FieldFilter::new().eq("kind", "created").eq("actor.role", "admin");
        assert!(matching.matches(&body()));
        let failing = FieldFilter::new().eq("kind", "created").eq("actor.role", "guest");
        assert!(!failing.matches(&body()));
    }

    #[test]
    fn test_unresolvable_path_fails_the_filter() {
        let filter = FieldFilter::new().eq("actor.email", "a@b");
        assert!(!filter.matches(&body()));
    }

    #[test]
    fn test_one_matching_filter_among_many_suffices() {
        let filters =
            [FieldFilter::new().eq("kind", "deleted"), FieldFilter::new().eq("attempt", 2)];
        assert!(matches_any(&filters, &body()));
    }

    #[test]
    fn test_no_matching_filter_rejects() {
        let filters =
            [FieldFilter::new().eq("kind", "deleted"), FieldFilter::new().eq("attempt", 9)];
        assert!(!matches_any(&filters, &body()));
    }

    #[test]
    fn test_empty_filters_are_skipped_next_to_real_ones() {
        let filters = [FieldFilter::new(), FieldFilter::new().eq("kind", "deleted")];
        assert!(!matches_any(&filters, &body()));
    }
}
