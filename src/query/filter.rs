//! Composable filter algebra compiled to parameterized SQL.
//!
//! Conditions compare one column against a value; groups combine
//! filters with AND/OR/NOT. Compilation renumbers `$n` placeholders from
//! an arbitrary starting index so the caller can prepend its own bound
//! parameters (tenancy scope, tombstone guard).

use sqlx::postgres::PgArguments;
use sqlx::query::QueryAs;
use sqlx::Postgres;

/// A bindable filter value.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Int(i64),
    Bool(bool),
    TextList(Vec<String>),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(value: Vec<String>) -> Self {
        Self::TextList(value)
    }
}

/// Comparison operators supported by the algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Like,
    ILike,
    StartsWith,
    EndsWith,
    Contains,
    IsNull,
}

/// A filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Condition {
        column: String,
        op: Op,
        value: Option<FilterValue>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn condition(column: impl Into<String>, op: Op, value: impl Into<FilterValue>) -> Self {
        Self::Condition {
            column: column.into(),
            op,
            value: Some(value.into()),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::condition(column, Op::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::condition(column, Op::Ne, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::Condition {
            column: column.into(),
            op: Op::IsNull,
            value: None,
        }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Self::Or(filters)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Compiles the tree into SQL text and its bind list. Placeholders
    /// start at `start_index` and the next free index is returned.
    pub fn compile(&self, start_index: usize) -> CompiledFilter {
        let mut binds = Vec::new();
        let mut next_index = start_index;
        let sql = self.compile_inner(&mut next_index, &mut binds);
        CompiledFilter {
            sql,
            binds,
            next_index,
        }
    }

    fn compile_inner(&self, next_index: &mut usize, binds: &mut Vec<FilterValue>) -> String {
        match self {
            Self::Condition { column, op, value } => {
                Self::compile_condition(column, *op, value.as_ref(), next_index, binds)
            }
            Self::And(filters) if filters.is_empty() => "TRUE".to_owned(),
            Self::And(filters) => {
                let parts: Vec<String> = filters
                    .iter()
                    .map(|filter| filter.compile_inner(next_index, binds))
                    .collect();
                format!("({})", parts.join(" AND "))
            }
            Self::Or(filters) if filters.is_empty() => "FALSE".to_owned(),
            Self::Or(filters) => {
                let parts: Vec<String> = filters
                    .iter()
                    .map(|filter| filter.compile_inner(next_index, binds))
                    .collect();
                format!("({})", parts.join(" OR "))
            }
            Self::Not(filter) => {
                format!("(NOT {})", filter.compile_inner(next_index, binds))
            }
        }
    }

    fn compile_condition(
        column: &str,
        op: Op,
        value: Option<&FilterValue>,
        next_index: &mut usize,
        binds: &mut Vec<FilterValue>,
    ) -> String {
        let mut take = |value: FilterValue| {
            let index = *next_index;
            *next_index += 1;
            binds.push(value);
            index
        };

        match (op, value) {
            (Op::IsNull, _) => format!("{column} IS NULL"),
            (Op::Eq, Some(value)) => format!("{column} = ${}", take(value.clone())),
            (Op::Ne, Some(value)) => format!("{column} != ${}", take(value.clone())),
            (Op::Lt, Some(value)) => format!("{column} < ${}", take(value.clone())),
            (Op::Lte, Some(value)) => format!("{column} <= ${}", take(value.clone())),
            (Op::Gt, Some(value)) => format!("{column} > ${}", take(value.clone())),
            (Op::Gte, Some(value)) => format!("{column} >= ${}", take(value.clone())),
            (Op::In, Some(value)) => format!("{column} = ANY(${})", take(value.clone())),
            (Op::NotIn, Some(value)) => format!("{column} != ALL(${})", take(value.clone())),
            (Op::Like, Some(value)) => format!("{column} LIKE ${}", take(value.clone())),
            (Op::ILike, Some(value)) => format!("{column} ILIKE ${}", take(value.clone())),
            (Op::StartsWith, Some(FilterValue::Text(text))) => {
                format!("{column} LIKE ${}", take(FilterValue::Text(format!("{}%", escape_like(text)))))
            }
            (Op::EndsWith, Some(FilterValue::Text(text))) => {
                format!("{column} LIKE ${}", take(FilterValue::Text(format!("%{}", escape_like(text)))))
            }
            (Op::Contains, Some(FilterValue::Text(text))) => {
                format!("{column} LIKE ${}", take(FilterValue::Text(format!("%{}%", escape_like(text)))))
            }
            // A pattern operator on a non-text value degenerates to
            // equality; a missing value can never match.
            (_, Some(value)) => format!("{column} = ${}", take(value.clone())),
            (_, None) => "FALSE".to_owned(),
        }
    }
}

/// `%`/`_` in user input are literals, not wildcards.
fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// The result of [`Filter::compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub sql: String,
    pub binds: Vec<FilterValue>,
    pub next_index: usize,
}

impl CompiledFilter {
    /// Appends the bind list to a query in compile order.
    pub fn bind_to<'q, O>(
        &self,
        mut query: QueryAs<'q, Postgres, O, PgArguments>,
    ) -> QueryAs<'q, Postgres, O, PgArguments>
    where
        O: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow>,
    {
        for value in &self.binds {
            query = match value {
                FilterValue::Text(text) => query.bind(text.clone()),
                FilterValue::Int(int) => query.bind(*int),
                FilterValue::Bool(boolean) => query.bind(*boolean),
                FilterValue::TextList(list) => query.bind(list.clone()),
            };
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_simple_condition_with_renumbering() {
        let filter = Filter::eq("username", "alice");
        let compiled = filter.compile(3);
        assert_eq!(compiled.sql, "username = $3");
        assert_eq!(compiled.binds, vec![FilterValue::Text("alice".to_owned())]);
        assert_eq!(compiled.next_index, 4);
    }

    #[test]
    fn compiles_nested_groups() {
        let filter = Filter::and(vec![
            Filter::eq("state", "active"),
            Filter::or(vec![
                Filter::condition("email", Op::EndsWith, "@acme.test"),
                Filter::not(Filter::is_null("phone")),
            ]),
        ]);
        let compiled = filter.compile(1);
        assert_eq!(
            compiled.sql,
            "(state = $1 AND (email LIKE $2 OR (NOT phone IS NULL)))"
        );
        assert_eq!(compiled.binds.len(), 2);
        assert_eq!(compiled.next_index, 3);
    }

    #[test]
    fn contains_escapes_wildcards() {
        let filter = Filter::condition("name", Op::Contains, "50%_off");
        let compiled = filter.compile(1);
        assert_eq!(
            compiled.binds,
            vec![FilterValue::Text("%50\\%\\_off%".to_owned())]
        );
    }

    #[test]
    fn in_compiles_to_any() {
        let filter = Filter::condition(
            "state",
            Op::In,
            vec!["active".to_owned(), "inactive".to_owned()],
        );
        let compiled = filter.compile(1);
        assert_eq!(compiled.sql, "state = ANY($1)");
    }

    #[test]
    fn empty_groups_are_neutral() {
        assert_eq!(Filter::and(vec![]).compile(1).sql, "TRUE");
        assert_eq!(Filter::or(vec![]).compile(1).sql, "FALSE");
    }
}
