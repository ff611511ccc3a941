//! Structured table requests to parameterized SQL.
//!
//! Every identifier emitted here has already been resolved against the
//! catalog and is quoted for the dialect; every value is a placeholder.

use crate::models::{DatabaseType, FilterOp, QueryParam, SortDirection};

/// A resolved filter: canonical column name plus operator and values.
#[derive(Debug, Clone)]
pub struct ResolvedFilter<'a> {
    pub column: &'a str,
    pub op: FilterOp,
    pub values: &'a [QueryParam],
}

/// Builds one `SELECT` over a single table.
#[derive(Debug)]
pub struct SelectBuilder<'a> {
    db_type: DatabaseType,
    schema: &'a str,
    table: &'a str,
    columns: Vec<&'a str>,
    filters: Vec<ResolvedFilter<'a>>,
    order_by: Option<(&'a str, SortDirection)>,
    limit: u64,
    offset: u64,
}

impl<'a> SelectBuilder<'a> {
    pub fn new(db_type: DatabaseType, schema: &'a str, table: &'a str) -> Self {
        Self {
            db_type,
            schema,
            table,
            columns: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: 0,
            offset: 0,
        }
    }

    pub fn columns(mut self, columns: Vec<&'a str>) -> Self {
        self.columns = columns;
        self
    }

    pub fn filter(mut self, filter: ResolvedFilter<'a>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: &'a str, direction: SortDirection) -> Self {
        self.order_by = Some((column, direction));
        self
    }

    /// Rows requested from the server. Callers pass the row cap plus one.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Render SQL text and the parameter list in placeholder order.
    pub fn build(self) -> (String, Vec<QueryParam>) {
        let quote = |ident: &str| self.db_type.quote_identifier(ident);
        let mut params: Vec<QueryParam> = Vec::new();

        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| quote(c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut sql = format!(
            "SELECT {} FROM {}.{}",
            projection,
            quote(self.schema),
            quote(self.table)
        );

        let mut predicates = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let column = quote(filter.column);
            let predicate = match filter.op {
                FilterOp::IsNull | FilterOp::IsNotNull => {
                    format!("{} {}", column, filter.op.as_sql())
                }
                FilterOp::In | FilterOp::NotIn => {
                    let mut slots = Vec::with_capacity(filter.values.len());
                    for value in filter.values {
                        params.push(value.clone());
                        slots.push(self.db_type.placeholder(params.len()));
                    }
                    format!("{} {} ({})", column, filter.op.as_sql(), slots.join(", "))
                }
                _ => {
                    let value = filter.values.first().cloned().unwrap_or(QueryParam::Null);
                    params.push(value);
                    format!(
                        "{} {} {}",
                        column,
                        filter.op.as_sql(),
                        self.db_type.placeholder(params.len())
                    )
                }
            };
            predicates.push(predicate);
        }
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }

        if let Some((column, direction)) = self.order_by {
            sql.push_str(&format!(" ORDER BY {} {}", quote(column), direction.as_sql()));
        }

        sql.push_str(&format!(" LIMIT {}", self.limit));
        if self.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", self.offset));
        }

        (sql, params)
    }
}
