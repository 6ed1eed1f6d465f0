//! Filters, ordering and paging for driver queries
//!
//! A [`Filter`] is a boolean tree of [`FilterCondition`]s. Drivers translate
//! it into their own predicate language (SQL for PostgreSQL, a direct
//! evaluator for the in-memory store).
//!
//! # Example
//!
//! ```rust
//! use cms_kernel::storage::{Filter, FilterCondition, FindQuery, OrderBy, Pagination};
//!
//! let filter = Filter::from(FilterCondition::eq("status_id", "sts_01"))
//!     .and(FilterCondition::is_null("deleted_at").into());
//!
//! let query = FindQuery::new(filter)
//!     .order_by(vec![OrderBy::desc("created_at")])
//!     .paginate(Pagination::page(2, 20));
//!
//! assert_eq!(query.pagination.map(|p| p.offset), Some(20));
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Direction for ordering results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Sort in ascending order (A-Z, 0-9)
    #[default]
    Ascending,
    /// Sort in descending order (Z-A, 9-0)
    Descending,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// One ordering key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Column to sort on
    pub column: String,
    /// Sort direction
    pub direction: OrderDirection,
}

impl OrderBy {
    /// Ascending order on `column`
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Ascending,
        }
    }

    /// Descending order on `column`
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Descending,
        }
    }
}

/// Offset/limit window for a query
///
/// ```rust
/// use cms_kernel::storage::Pagination;
///
/// let page3 = Pagination::page(3, 20);
/// assert_eq!(page3.offset, 40);
/// assert_eq!(page3.limit, 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Number of results to skip
    pub offset: u64,
    /// Maximum number of results to return
    pub limit: u64,
}

impl Pagination {
    /// Create new pagination parameters
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Pagination for a specific page number (1-indexed)
    #[must_use]
    pub const fn page(page_number: u64, page_size: u64) -> Self {
        let offset = page_number.saturating_sub(1).saturating_mul(page_size);
        Self {
            offset,
            limit: page_size,
        }
    }
}

/// Comparison operators for filter conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    /// Equal to (=)
    Equal,
    /// Not equal to (!=)
    NotEqual,
    /// Greater than (>)
    GreaterThan,
    /// Greater than or equal to (>=)
    GreaterThanOrEqual,
    /// Less than (<)
    LessThan,
    /// Less than or equal to (<=)
    LessThanOrEqual,
    /// Pattern matching (LIKE)
    Like,
    /// Case-insensitive substring match
    ContainsInsensitive,
    /// Value is in a list (IN)
    In,
    /// Value is null (IS NULL)
    IsNull,
    /// Value is not null (IS NOT NULL)
    IsNotNull,
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equal => write!(f, "="),
            Self::NotEqual => write!(f, "!="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterThanOrEqual => write!(f, ">="),
            Self::LessThan => write!(f, "<"),
            Self::LessThanOrEqual => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
            Self::ContainsInsensitive => write!(f, "ILIKE"),
            Self::In => write!(f, "IN"),
            Self::IsNull => write!(f, "IS NULL"),
            Self::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

/// A value that can be used in filter conditions
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// String value
    String(String),
    /// 64-bit integer value
    Integer(i64),
    /// 64-bit floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// UTC timestamp
    Timestamp(DateTime<Utc>),
    /// List of string values (for IN operator)
    StringList(Vec<String>),
    /// List of integer values (for IN operator)
    IntegerList(Vec<i64>),
    /// Null value (for IS NULL / IS NOT NULL)
    Null,
}

impl FilterValue {
    /// JSON form of a scalar value; lists map to JSON arrays
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Integer(n) => Value::from(*n),
            Self::Float(n) => Value::from(*n),
            Self::Boolean(b) => Value::Bool(*b),
            Self::Timestamp(ts) => Value::String(ts.to_rfc3339()),
            Self::StringList(list) => list.iter().cloned().map(Value::String).collect(),
            Self::IntegerList(list) => list.iter().copied().map(Value::from).collect(),
            Self::Null => Value::Null,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for FilterValue {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(list: Vec<String>) -> Self {
        Self::StringList(list)
    }
}

impl From<Vec<i64>> for FilterValue {
    fn from(list: Vec<i64>) -> Self {
        Self::IntegerList(list)
    }
}

/// A single column predicate
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    /// The field name to filter on
    pub field: String,
    /// The comparison operator
    pub operator: FilterOperator,
    /// The value to compare against
    pub value: FilterValue,
}

impl FilterCondition {
    /// Create a new filter condition
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::Equal, value.into())
    }

    /// `field != value`
    pub fn ne(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::NotEqual, value.into())
    }

    /// `field > value`
    pub fn gt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::GreaterThan, value.into())
    }

    /// `field >= value`
    pub fn gte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::GreaterThanOrEqual, value.into())
    }

    /// `field < value`
    pub fn lt(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::LessThan, value.into())
    }

    /// `field <= value`
    pub fn lte(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::new(field, FilterOperator::LessThanOrEqual, value.into())
    }

    /// SQL `LIKE` pattern (`%` any run, `_` any single character)
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Like, FilterValue::String(pattern.into()))
    }

    /// Case-insensitive substring match, used by free-text search
    pub fn contains_insensitive(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::new(
            field,
            FilterOperator::ContainsInsensitive,
            FilterValue::String(needle.into()),
        )
    }

    /// IN list filter for strings
    pub fn in_strings(field: impl Into<String>, values: Vec<String>) -> Self {
        Self::new(field, FilterOperator::In, FilterValue::StringList(values))
    }

    /// IN list filter for integers
    pub fn in_integers(field: impl Into<String>, values: Vec<i64>) -> Self {
        Self::new(field, FilterOperator::In, FilterValue::IntegerList(values))
    }

    /// `field IS NULL`
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNull, FilterValue::Null)
    }

    /// `field IS NOT NULL`
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::IsNotNull, FilterValue::Null)
    }
}

/// Boolean predicate tree
///
/// `And(vec![])` is always true and `Or(vec![])` is always false.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Filter {
    /// Matches every row
    #[default]
    All,
    /// Single column predicate
    Condition(FilterCondition),
    /// Every child matches
    And(Vec<Filter>),
    /// At least one child matches
    Or(Vec<Filter>),
    /// Child does not match
    Not(Box<Filter>),
}

impl Filter {
    /// Conjunction of `self` and `other`, flattening nested `And`s
    #[must_use]
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::All, other) => other,
            (this, Filter::All) => this,
            (Filter::And(mut left), Filter::And(right)) => {
                left.extend(right);
                Filter::And(left)
            }
            (Filter::And(mut left), other) => {
                left.push(other);
                Filter::And(left)
            }
            (this, Filter::And(mut right)) => {
                right.insert(0, this);
                Filter::And(right)
            }
            (this, other) => Filter::And(vec![this, other]),
        }
    }

    /// Disjunction of the given filters
    pub fn any_of(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::Or(filters.into_iter().collect())
    }

    /// Conjunction of the given filters
    pub fn all_of(filters: impl IntoIterator<Item = Filter>) -> Filter {
        filters.into_iter().fold(Filter::All, Filter::and)
    }

    /// Negation
    #[must_use]
    pub fn negate(self) -> Filter {
        Filter::Not(Box::new(self))
    }

    /// Whether any condition in the tree references `field`
    pub fn references(&self, field: &str) -> bool {
        match self {
            Filter::All => false,
            Filter::Condition(c) => c.field == field,
            Filter::And(children) | Filter::Or(children) => {
                children.iter().any(|c| c.references(field))
            }
            Filter::Not(inner) => inner.references(field),
        }
    }
}

impl From<FilterCondition> for Filter {
    fn from(condition: FilterCondition) -> Self {
        Filter::Condition(condition)
    }
}

/// A read against one table
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FindQuery {
    /// Row predicate
    pub filter: Filter,
    /// Ordering keys, applied in order
    pub order_by: Vec<OrderBy>,
    /// Offset/limit window; `None` reads every matching row
    pub pagination: Option<Pagination>,
    /// Column projection; `None` returns whole rows
    pub select: Option<Vec<String>>,
}

impl FindQuery {
    /// Query matching `filter`
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Set ordering keys
    #[must_use]
    pub fn order_by(mut self, order_by: Vec<OrderBy>) -> Self {
        self.order_by = order_by;
        self
    }

    /// Set the offset/limit window
    #[must_use]
    pub fn paginate(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Limit to at most `limit` rows from the start
    #[must_use]
    pub fn limit(self, limit: u64) -> Self {
        self.paginate(Pagination::new(0, limit))
    }

    /// Set the column projection
    #[must_use]
    pub fn select(mut self, columns: Option<Vec<String>>) -> Self {
        self.select = columns;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_direction_display() {
        assert_eq!(OrderDirection::Ascending.to_string(), "asc");
        assert_eq!(OrderDirection::Descending.to_string(), "desc");
    }

    #[test]
    fn test_page_offsets() {
        assert_eq!(Pagination::page(1, 20).offset, 0);
        assert_eq!(Pagination::page(3, 20).offset, 40);
        // page 0 behaves like page 1
        assert_eq!(Pagination::page(0, 20).offset, 0);
    }

    #[test]
    fn test_and_flattens() {
        let a: Filter = FilterCondition::eq("a", 1_i64).into();
        let b: Filter = FilterCondition::eq("b", 2_i64).into();
        let c: Filter = FilterCondition::eq("c", 3_i64).into();

        let combined = a.clone().and(b.clone()).and(c.clone());
        assert_eq!(combined, Filter::And(vec![a.clone(), b, c]));

        assert_eq!(Filter::All.and(a.clone()), a);
        assert_eq!(a.clone().and(Filter::All), a);
    }

    #[test]
    fn test_all_of_empty_is_all() {
        assert_eq!(Filter::all_of(Vec::new()), Filter::All);
    }

    #[test]
    fn test_references() {
        let filter = Filter::from(FilterCondition::eq("name", "Tech"))
            .and(FilterCondition::is_null("deleted_at").into());
        assert!(filter.references("deleted_at"));
        assert!(!filter.references("slug"));

        let negated = Filter::from(FilterCondition::is_null("deleted_at")).negate();
        assert!(negated.references("deleted_at"));
    }

    #[test]
    fn test_filter_value_json() {
        let ts = DateTime::parse_from_rfc3339("2025-01-02T03:04:05Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap();
        assert_eq!(
            FilterValue::from(ts).to_json(),
            Value::String("2025-01-02T03:04:05+00:00".into())
        );
        assert_eq!(
            FilterValue::from(vec!["a".to_string()]).to_json(),
            serde_json::json!(["a"])
        );
        assert_eq!(FilterValue::Null.to_json(), Value::Null);
    }

    #[test]
    fn test_find_query_builder() {
        let query = FindQuery::new(Filter::All)
            .order_by(vec![OrderBy::asc("name")])
            .limit(1);
        assert_eq!(query.pagination, Some(Pagination::new(0, 1)));
        assert_eq!(query.order_by[0].direction, OrderDirection::Ascending);
    }
}
