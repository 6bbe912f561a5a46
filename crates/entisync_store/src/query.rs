//! Query builder.
//!
//! A `Query` is a class name plus a `where` document in the server's
//! constraint language, with ordering and paging. The same query can be sent
//! to the server (`to_json`) or evaluated offline against the local
//! datastore.

use crate::error::{StoreError, StoreResult};
use crate::matcher;
use entisync_core::codec::{JsonMap, JsonValue};
use serde_json::json;

/// A query over one class.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    class_name: String,
    where_clause: JsonMap,
    order: Vec<String>,
    skip: usize,
    limit: Option<usize>,
    select: Option<Vec<String>>,
    include: Vec<String>,
    pin_name: Option<String>,
}

impl Query {
    /// Creates a query matching every object of `class_name`.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            where_clause: JsonMap::new(),
            order: Vec::new(),
            skip: 0,
            limit: None,
            select: None,
            include: Vec::new(),
            pin_name: None,
        }
    }

    /// Builds a query from a raw `where` document.
    pub fn with_where(class_name: impl Into<String>, where_clause: JsonMap) -> Self {
        let mut query = Self::new(class_name);
        query.where_clause = where_clause;
        query
    }

    /// Matches objects matching any of `queries`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the queries are empty or target different
    /// classes.
    pub fn or(queries: Vec<Query>) -> StoreResult<Self> {
        Self::compound("$or", queries)
    }

    /// Matches objects matching all of `queries`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the queries are empty or target different
    /// classes.
    pub fn and(queries: Vec<Query>) -> StoreResult<Self> {
        Self::compound("$and", queries)
    }

    /// Matches objects matching none of `queries`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the queries are empty or target different
    /// classes.
    pub fn nor(queries: Vec<Query>) -> StoreResult<Self> {
        Self::compound("$nor", queries)
    }

    fn compound(operator: &str, queries: Vec<Query>) -> StoreResult<Self> {
        let Some(class_name) = queries.first().map(|q| q.class_name.clone()) else {
            return Err(StoreError::invalid_query(format!(
                "{operator} needs at least one query"
            )));
        };
        if queries.iter().any(|q| q.class_name != class_name) {
            return Err(StoreError::invalid_query(
                "all queries must be for the same class",
            ));
        }
        let clauses = queries
            .into_iter()
            .map(|q| JsonValue::Object(q.where_clause))
            .collect();
        let mut query = Self::new(class_name);
        query
            .where_clause
            .insert(operator.to_string(), JsonValue::Array(clauses));
        Ok(query)
    }

    /// Returns the class this query targets.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Returns the `where` document.
    pub fn where_clause(&self) -> &JsonMap {
        &self.where_clause
    }

    /// Returns the sort keys, `-` prefixed when descending.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Returns the number of results skipped.
    pub fn skip_count(&self) -> usize {
        self.skip
    }

    /// Returns the result limit, if any.
    pub fn limit_count(&self) -> Option<usize> {
        self.limit
    }

    /// Returns the selected keys, if restricted.
    pub fn selected_keys(&self) -> Option<&[String]> {
        self.select.as_deref()
    }

    /// Returns the keys of pointers to include.
    pub fn included_keys(&self) -> &[String] {
        &self.include
    }

    /// Returns the pin this query is restricted to, if any.
    pub fn pin_name(&self) -> Option<&str> {
        self.pin_name.as_deref()
    }

    fn add_condition(mut self, key: &str, operator: &str, value: JsonValue) -> Self {
        let entry = self
            .where_clause
            .entry(key.to_string())
            .or_insert_with(|| JsonValue::Object(JsonMap::new()));
        let is_operator_map = entry
            .as_object()
            .is_some_and(|m| m.keys().all(|k| k.starts_with('$')));
        if !is_operator_map {
            *entry = JsonValue::Object(JsonMap::new());
        }
        if let JsonValue::Object(conditions) = entry {
            conditions.insert(operator.to_string(), value);
        }
        self
    }

    /// Requires `key` to equal `value`, or contain it when the field is an
    /// array.
    pub fn equal_to(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.where_clause.insert(key.to_string(), value.into());
        self
    }

    /// Requires `key` to differ from `value`.
    pub fn not_equal_to(self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.add_condition(key, "$ne", value.into())
    }

    /// Requires `key` to be less than `value`.
    pub fn less_than(self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.add_condition(key, "$lt", value.into())
    }

    /// Requires `key` to be less than or equal to `value`.
    pub fn less_than_or_equal_to(self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.add_condition(key, "$lte", value.into())
    }

    /// Requires `key` to be greater than `value`.
    pub fn greater_than(self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.add_condition(key, "$gt", value.into())
    }

    /// Requires `key` to be greater than or equal to `value`.
    pub fn greater_than_or_equal_to(self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.add_condition(key, "$gte", value.into())
    }

    /// Requires `key` to be one of `values`.
    pub fn contained_in(self, key: &str, values: Vec<JsonValue>) -> Self {
        self.add_condition(key, "$in", JsonValue::Array(values))
    }

    /// Requires `key` to be none of `values`.
    pub fn not_contained_in(self, key: &str, values: Vec<JsonValue>) -> Self {
        self.add_condition(key, "$nin", JsonValue::Array(values))
    }

    /// Requires the array at `key` to contain every one of `values`.
    pub fn contains_all(self, key: &str, values: Vec<JsonValue>) -> Self {
        self.add_condition(key, "$all", JsonValue::Array(values))
    }

    /// Requires every item of the array at `key` to be one of `values`.
    pub fn contained_by(self, key: &str, values: Vec<JsonValue>) -> Self {
        self.add_condition(key, "$containedBy", JsonValue::Array(values))
    }

    /// Requires `key` to be set.
    pub fn exists(self, key: &str) -> Self {
        self.add_condition(key, "$exists", JsonValue::Bool(true))
    }

    /// Requires `key` to be unset.
    pub fn does_not_exist(self, key: &str) -> Self {
        self.add_condition(key, "$exists", JsonValue::Bool(false))
    }

    /// Requires the string at `key` to match `pattern`.
    ///
    /// `options` takes the flags `i`, `m`, `s` and `x`.
    pub fn matches(self, key: &str, pattern: &str, options: Option<&str>) -> Self {
        let query = self.add_condition(key, "$regex", JsonValue::String(pattern.to_string()));
        match options {
            Some(options) => query.add_condition(key, "$options", JsonValue::String(options.into())),
            None => query,
        }
    }

    /// Requires the string at `key` to start with `prefix`.
    pub fn starts_with(self, key: &str, prefix: &str) -> Self {
        let pattern = format!("^{}", regex::escape(prefix));
        self.add_condition(key, "$regex", JsonValue::String(pattern))
    }

    /// Sorts ascending by `keys`, replacing any previous order.
    pub fn ascending(mut self, keys: &[&str]) -> Self {
        self.order.clear();
        self.add_ascending(keys)
    }

    /// Sorts descending by `keys`, replacing any previous order.
    pub fn descending(mut self, keys: &[&str]) -> Self {
        self.order.clear();
        self.add_descending(keys)
    }

    /// Appends ascending sort keys.
    pub fn add_ascending(mut self, keys: &[&str]) -> Self {
        self.order.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    /// Appends descending sort keys.
    pub fn add_descending(mut self, keys: &[&str]) -> Self {
        self.order.extend(keys.iter().map(|k| format!("-{k}")));
        self
    }

    /// Skips the first `n` results.
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    /// Returns at most `n` results.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Restricts results to `keys`.
    pub fn select(mut self, keys: &[&str]) -> Self {
        self.select = Some(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    /// Includes the objects pointed to by `keys` in server responses.
    pub fn include(mut self, keys: &[&str]) -> Self {
        self.include.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    /// Restricts an offline query to the objects of one pin.
    pub fn from_pin_with_name(mut self, name: impl Into<String>) -> Self {
        self.pin_name = Some(name.into());
        self
    }

    /// Restricts an offline query to the default pin.
    pub fn from_pin(self) -> Self {
        self.from_pin_with_name(crate::datastore::DEFAULT_PIN)
    }

    /// Checks every operator in the `where` document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for unsupported operators or malformed
    /// constraints.
    pub fn validate(&self) -> StoreResult<()> {
        matcher::validate_where(&self.where_clause)
    }

    /// Returns true if `object` (an estimated-attribute JSON snapshot)
    /// matches the `where` document.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for unsupported operators.
    pub fn matches_object(&self, object: &JsonMap) -> StoreResult<bool> {
        matcher::matches_where(object, &self.where_clause)
    }

    /// Filters, sorts, pages and projects `candidates`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` for unsupported operators.
    pub fn evaluate(&self, candidates: Vec<JsonMap>) -> StoreResult<Vec<JsonMap>> {
        self.validate()?;
        let mut results = Vec::new();
        for object in candidates {
            if self.matches_object(&object)? {
                results.push(object);
            }
        }
        matcher::sort_objects(&mut results, &self.order);

        let limit = self.limit.unwrap_or(usize::MAX);
        Ok(results
            .into_iter()
            .skip(self.skip)
            .take(limit)
            .map(|object| match &self.select {
                Some(keys) => matcher::select_keys(object, keys),
                None => object,
            })
            .collect())
    }

    /// Returns the request body sent to the server's find endpoint.
    pub fn to_json(&self) -> JsonValue {
        let mut body = JsonMap::new();
        body.insert("where".into(), JsonValue::Object(self.where_clause.clone()));
        if !self.order.is_empty() {
            body.insert("order".into(), json!(self.order.join(",")));
        }
        if self.skip > 0 {
            body.insert("skip".into(), json!(self.skip));
        }
        if let Some(limit) = self.limit {
            body.insert("limit".into(), json!(limit));
        }
        if let Some(keys) = &self.select {
            body.insert("keys".into(), json!(keys.join(",")));
        }
        if !self.include.is_empty() {
            body.insert("include".into(), json!(self.include.join(",")));
        }
        JsonValue::Object(body)
    }
}
