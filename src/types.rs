/// Shared request/response shapes used across handlers

use serde::{Deserialize, Serialize};

use crate::config::QueryConfig;

/// `?limit=&offset=` on list endpoints
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    /// Clamp to configured bounds: limit in `1..=max_limit`, offset ≥ 0
    pub fn resolve(&self, config: &QueryConfig) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(config.default_limit)
            .clamp(1, config.max_limit);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

/// One page of a list endpoint
#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    pub limit: i64,
    pub offset: i64,
}

impl<T: Serialize> Page<T> {
    pub fn new(items: Vec<T>, (limit, offset): (i64, i64)) -> Self {
        Self { items, limit, offset }
    }
}

/// PATCH bodies distinguish "absent" from "set to null" with `Option<Option<T>>`
pub fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_config() -> QueryConfig {
        QueryConfig {
            default_limit: 25,
            max_limit: 100,
        }
    }

    #[test]
    fn pagination_defaults_and_clamps() {
        let config = query_config();
        assert_eq!(Pagination::default().resolve(&config), (25, 0));
        assert_eq!(
            Pagination { limit: Some(10_000), offset: Some(-5) }.resolve(&config),
            (100, 0)
        );
        assert_eq!(
            Pagination { limit: Some(0), offset: Some(40) }.resolve(&config),
            (1, 40)
        );
    }

    #[derive(Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "double_option")]
        due_on: Option<Option<String>>,
    }

    #[test]
    fn double_option_separates_null_from_missing() {
        let missing: Patch = serde_json::from_str("{}").unwrap();
        assert_eq!(missing.due_on, None);

        let cleared: Patch = serde_json::from_str(r#"{"due_on": null}"#).unwrap();
        assert_eq!(cleared.due_on, Some(None));

        let set: Patch = serde_json::from_str(r#"{"due_on": "2024-01-01"}"#).unwrap();
        assert_eq!(set.due_on, Some(Some("2024-01-01".to_string())));
    }
}
