use std::collections::HashMap;

use async_trait::async_trait;

use crate::db::error::DbResult;

/// One row of the key/value options table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionRecord {
    pub name: String,
    pub value: String,
    pub autoload: bool,
}

#[async_trait]
pub trait OptionRepo: Send + Sync {
    /// Get a single option value
    async fn get(&self, name: &str) -> DbResult<Option<String>>;

    /// Get several option values at once. Missing names are absent from the map.
    async fn get_many(&self, names: &[&str]) -> DbResult<HashMap<String, String>>;

    /// Insert or update an option.
    ///
    /// When the option already exists only its value changes; `autoload` is
    /// kept as originally stored.
    async fn set(&self, name: &str, value: &str, autoload: bool) -> DbResult<()>;

    /// All options flagged for autoload, ordered by name
    async fn get_all_autoload(&self) -> DbResult<Vec<OptionRecord>>;

    /// Every option, ordered by name
    async fn fetch_all(&self) -> DbResult<Vec<OptionRecord>>;

    /// Delete an option. Returns whether a row was removed.
    async fn delete(&self, name: &str) -> DbResult<bool>;
}
