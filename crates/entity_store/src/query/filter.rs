//! Translatable filter predicates.
//!
//! # Responsibility
//! - Represent a row predicate as a small expression tree.
//! - Compile it to a parameterised SQL `WHERE` fragment for the engine.
//! - Evaluate it in-process against an entity with SQL three-valued logic.
//!
//! # Invariants
//! - Column names are checked against the entity mapping before any SQL is
//!   built; values are always bound as parameters, never interpolated.
//! - `compile` and `matches` agree for values whose storage class matches
//!   the column they are compared with.

use crate::error::{StoreError, StoreResult};
use crate::model::entity::{column_value, is_mapped_column, quote_ident, Entity};
use regex::Regex;
use rusqlite::types::Value;
use std::cmp::Ordering;

/// Comparison operator used by `Filter::Compare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// Boolean predicate over an entity's mapped columns.
///
/// Build with the constructor helpers and combine with [`Filter::and`],
/// [`Filter::or`], and `!`.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row.
    Always,
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    /// SQL `LIKE` with `%` and `_` wildcards, ASCII case-insensitive.
    Like {
        column: String,
        pattern: String,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Default for Filter {
    fn default() -> Self {
        Self::Always
    }
}

/// Parameterised SQL produced by [`Filter::compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Filter {
    pub fn all() -> Self {
        Self::Always
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
            negated: false,
        }
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::IsNull {
            column: column.into(),
            negated: true,
        }
    }

    pub fn in_list<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    /// Conjunction; flattens nested `And` nodes on the left.
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::Always => other,
            Self::And(mut items) => {
                items.push(other);
                Self::And(items)
            }
            current => Self::And(vec![current, other]),
        }
    }

    /// Disjunction; flattens nested `Or` nodes on the left.
    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut items) => {
                items.push(other);
                Self::Or(items)
            }
            current => Self::Or(vec![current, other]),
        }
    }

    /// Compiles this predicate to SQL for `T`'s table.
    ///
    /// # Errors
    /// - `StoreError::UnknownColumn` when a column is not mapped on `T`.
    pub fn compile<T: Entity>(&self) -> StoreResult<SqlFragment> {
        let mut params = Vec::new();
        let sql = self.write_sql::<T>(&mut params)?;
        Ok(SqlFragment { sql, params })
    }

    /// Evaluates this predicate against one entity value.
    ///
    /// Rows for which the predicate is unknown (SQL `NULL`) do not match,
    /// mirroring how a `WHERE` clause treats them.
    ///
    /// # Errors
    /// - `StoreError::UnknownColumn` when a column is not mapped on `T`.
    pub fn matches<T: Entity>(&self, entity: &T) -> StoreResult<bool> {
        Ok(self.evaluate(entity)? == Some(true))
    }

    fn write_sql<T: Entity>(&self, params: &mut Vec<Value>) -> StoreResult<String> {
        let sql = match self {
            Self::Always => "1 = 1".to_string(),
            Self::Compare { column, op, value } => {
                let column = checked_column::<T>(column)?;
                params.push(value.clone());
                format!("{column} {} ?", op.as_sql())
            }
            Self::IsNull { column, negated } => {
                let column = checked_column::<T>(column)?;
                if *negated {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                }
            }
            Self::In { column, values } => {
                let column = checked_column::<T>(column)?;
                if values.is_empty() {
                    "1 = 0".to_string()
                } else {
                    params.extend(values.iter().cloned());
                    let placeholders = vec!["?"; values.len()].join(", ");
                    format!("{column} IN ({placeholders})")
                }
            }
            Self::Like { column, pattern } => {
                let column = checked_column::<T>(column)?;
                params.push(Value::Text(pattern.clone()));
                format!("{column} LIKE ?")
            }
            Self::And(items) => join_sql::<T>(items, " AND ", "1 = 1", params)?,
            Self::Or(items) => join_sql::<T>(items, " OR ", "1 = 0", params)?,
            Self::Not(inner) => format!("NOT ({})", inner.write_sql::<T>(params)?),
        };
        Ok(sql)
    }

    fn evaluate<T: Entity>(&self, entity: &T) -> StoreResult<Option<bool>> {
        let result = match self {
            Self::Always => Some(true),
            Self::Compare { column, op, value } => {
                let current = resolve::<T>(entity, column)?;
                compare_values(&current, value).map(|ordering| op.holds(ordering))
            }
            Self::IsNull { column, negated } => {
                let current = resolve::<T>(entity, column)?;
                Some(matches!(current, Value::Null) != *negated)
            }
            Self::In { column, values } => {
                let current = resolve::<T>(entity, column)?;
                evaluate_in(&current, values)
            }
            Self::Like { column, pattern } => {
                let current = resolve::<T>(entity, column)?;
                evaluate_like(&current, pattern)?
            }
            Self::And(items) => {
                let mut outcome = Some(true);
                for item in items {
                    match item.evaluate(entity)? {
                        Some(false) => return Ok(Some(false)),
                        None => outcome = None,
                        Some(true) => {}
                    }
                }
                outcome
            }
            Self::Or(items) => {
                let mut outcome = Some(false);
                for item in items {
                    match item.evaluate(entity)? {
                        Some(true) => return Ok(Some(true)),
                        None => outcome = None,
                        Some(false) => {}
                    }
                }
                outcome
            }
            Self::Not(inner) => inner.evaluate(entity)?.map(|value| !value),
        };
        Ok(result)
    }
}

impl std::ops::Not for Filter {
    type Output = Filter;

    fn not(self) -> Self::Output {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

fn checked_column<T: Entity>(column: &str) -> StoreResult<String> {
    if !is_mapped_column::<T>(column) {
        return Err(StoreError::UnknownColumn {
            table: T::TABLE,
            column: column.to_string(),
        });
    }
    Ok(quote_ident(column))
}

fn resolve<T: Entity>(entity: &T, column: &str) -> StoreResult<Value> {
    column_value(entity, column).ok_or_else(|| StoreError::UnknownColumn {
        table: T::TABLE,
        column: column.to_string(),
    })
}

fn join_sql<T: Entity>(
    items: &[Filter],
    separator: &str,
    empty: &str,
    params: &mut Vec<Value>,
) -> StoreResult<String> {
    if items.is_empty() {
        return Ok(empty.to_string());
    }
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        parts.push(item.write_sql::<T>(params)?);
    }
    Ok(format!("({})", parts.join(separator)))
}

/// Orders two values the way SQLite orders storage classes:
/// numbers < text < blob, with `NULL` comparing as unknown.
fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Real(b)) => (*a as f64).partial_cmp(b),
        (Value::Real(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
        (Value::Text(a), Value::Text(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (Value::Blob(a), Value::Blob(b)) => Some(a.cmp(b)),
        (a, b) => Some(class_rank(a).cmp(&class_rank(b))),
    }
}

fn class_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Integer(_) | Value::Real(_) => 1,
        Value::Text(_) => 2,
        Value::Blob(_) => 3,
    }
}

fn evaluate_in(current: &Value, candidates: &[Value]) -> Option<bool> {
    if matches!(current, Value::Null) {
        return if candidates.is_empty() {
            Some(false)
        } else {
            None
        };
    }
    let mut saw_unknown = false;
    for candidate in candidates {
        match compare_values(current, candidate) {
            Some(Ordering::Equal) => return Some(true),
            None => saw_unknown = true,
            Some(_) => {}
        }
    }
    if saw_unknown {
        None
    } else {
        Some(false)
    }
}

fn evaluate_like(current: &Value, pattern: &str) -> StoreResult<Option<bool>> {
    let text = match current {
        Value::Null => return Ok(None),
        Value::Integer(value) => value.to_string(),
        Value::Real(value) => value.to_string(),
        Value::Text(value) => value.clone(),
        Value::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    };
    let regex = like_regex(pattern)?;
    Ok(Some(regex.is_match(&text.to_ascii_lowercase())))
}

fn like_regex(pattern: &str) -> StoreResult<Regex> {
    let mut source = String::from("(?s)^");
    for ch in pattern.to_ascii_lowercase().chars() {
        match ch {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source)
        .map_err(|err| StoreError::InvalidData(format!("invalid LIKE pattern `{pattern}`: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{CompareOp, Filter};
    use crate::error::StoreError;
    use crate::model::entity::{Entity, EntityBase};
    use rusqlite::types::Value;
    use rusqlite::Row;

    #[derive(Debug, Clone)]
    struct Book {
        id: i64,
        title: String,
        pages: Option<i64>,
    }

    impl EntityBase for Book {
        fn id(&self) -> i64 {
            self.id
        }
        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
        fn timestamp(&self) -> Option<&[u8]> {
            None
        }
        fn set_timestamp(&mut self, _timestamp: Option<Vec<u8>>) {}
    }

    impl Entity for Book {
        const TABLE: &'static str = "books";
        const COLUMNS: &'static [&'static str] = &["title", "pages"];

        fn values(&self) -> Vec<Value> {
            vec![Value::Text(self.title.clone()), self.pages.into()]
        }

        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                title: row.get("title")?,
                pages: row.get("pages")?,
            })
        }
    }

    fn book(id: i64, title: &str, pages: Option<i64>) -> Book {
        Book {
            id,
            title: title.to_string(),
            pages,
        }
    }

    #[test]
    fn compile_binds_values_and_quotes_columns() {
        let filter = Filter::eq("title", "Dune".to_string()).and(Filter::gt("pages", 100));
        let fragment = filter.compile::<Book>().unwrap();
        assert_eq!(fragment.sql, "(\"title\" = ? AND \"pages\" > ?)");
        assert_eq!(
            fragment.params,
            vec![Value::Text("Dune".to_string()), Value::Integer(100)]
        );
    }

    #[test]
    fn compile_handles_empty_lists_and_negation() {
        let empty_in = Filter::in_list::<i64>("id", Vec::new());
        assert_eq!(empty_in.compile::<Book>().unwrap().sql, "1 = 0");

        let negated = !Filter::is_null("pages");
        assert_eq!(
            negated.compile::<Book>().unwrap().sql,
            "NOT (\"pages\" IS NULL)"
        );
        assert_eq!(!negated, Filter::is_null("pages"));
    }

    #[test]
    fn unknown_columns_are_rejected_by_compile_and_matches() {
        let filter = Filter::eq("author", "x".to_string());
        let err = filter.compile::<Book>().unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { table: "books", .. }));

        let err = filter.matches(&book(1, "a", None)).unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }

    #[test]
    fn matches_uses_three_valued_logic_for_nulls() {
        let short = Filter::compare("pages", CompareOp::Lt, 50);
        let unknown = book(1, "Pamphlet", None);
        assert!(!short.matches(&unknown).unwrap());
        assert!(!(!short.clone()).matches(&unknown).unwrap());
        assert!(short.clone().or(Filter::all()).matches(&unknown).unwrap());
        assert!(Filter::is_null("pages").matches(&unknown).unwrap());
    }

    #[test]
    fn matches_supports_in_and_like() {
        let dune = book(7, "Dune Messiah", Some(256));
        assert!(Filter::in_list("id", [3, 7]).matches(&dune).unwrap());
        assert!(!Filter::in_list("id", [3, 4]).matches(&dune).unwrap());
        assert!(Filter::like("title", "dune%").matches(&dune).unwrap());
        assert!(Filter::like("title", "D_ne M%").matches(&dune).unwrap());
        assert!(!Filter::like("title", "%children%").matches(&dune).unwrap());
        assert!(Filter::like("title", "dune.messiah").matches(&dune).is_ok());
        assert!(!Filter::like("title", "dune.messiah").matches(&dune).unwrap());
    }

    #[test]
    fn and_flattens_and_always_is_identity() {
        let filter = Filter::all()
            .and(Filter::gt("pages", 1))
            .and(Filter::lt("pages", 9));
        match filter {
            Filter::And(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected filter shape: {other:?}"),
        }
    }
}
