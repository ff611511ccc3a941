//! Query admission.
//!
//! Free-form SQL passes two layers before it may run:
//!
//! 1. A token scan over the normalized text ([`lexer`](super::lexer)):
//!    forbidden keywords, dangerous procedure prefixes, file and admin
//!    functions, multi-statement batches and the leading keyword.
//! 2. A parse with [sqlparser](https://docs.rs/sqlparser/) in the backend's
//!    dialect: exactly one statement, and it must be a query. Every relation,
//!    `TABLE` body, table function and schema-qualified function call it
//!    references is checked against the schema allow-list.
//!
//! Anything either layer cannot classify is rejected. Structured table
//! requests skip the token scan: their identifiers are checked against the
//! catalog and their values are only ever bound.

use super::allow_list::SchemaAllowList;
use super::catalog::KnownColumns;
use super::lexer::{self, NormalizedSql, Token};
use super::query_builder::{ResolvedFilter, SelectBuilder};
use crate::error::GatewayError;
use crate::models::{DatabaseType, QueryParam, TableQuery};
use sqlparser::ast::{
    Expr, ObjectName, ObjectNamePart, Query, SetExpr, Statement, TableFactor, Visit, Visitor,
};
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::ops::ControlFlow;
use tracing::debug;

/// Classification of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Unsafe,
    Unsupported,
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Mutating, administrative or otherwise dangerous content.
    Unsafe { reason: String },
    /// Not a single read-only query the gateway can vouch for.
    Unsupported { reason: String },
    /// References a schema outside the allow-list.
    SchemaDenied { schema: String, object: String },
}

impl Rejection {
    fn unsafe_(reason: impl Into<String>) -> Self {
        Self::Unsafe {
            reason: reason.into(),
        }
    }

    fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> StatementKind {
        match self {
            Self::Unsupported { .. } => StatementKind::Unsupported,
            Self::Unsafe { .. } | Self::SchemaDenied { .. } => StatementKind::Unsafe,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsafe { reason } | Self::Unsupported { reason } => f.write_str(reason),
            Self::SchemaDenied { schema, object } => {
                write!(f, "schema '{}' is not allowed (object: {})", schema, object)
            }
        }
    }
}

impl From<Rejection> for GatewayError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::SchemaDenied { schema, object } => {
                GatewayError::schema_access_denied(schema, object)
            }
            Rejection::Unsafe { reason } | Rejection::Unsupported { reason } => {
                GatewayError::validation_rejected(reason)
            }
        }
    }
}

/// Outcome of [`QueryValidator::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Accepted(StatementKind),
    Rejected(Rejection),
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

/// A statement that passed validation. Only the validator constructs these,
/// and the gateway executes nothing else.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmittedQuery {
    sql: String,
    params: Vec<QueryParam>,
}

impl AdmittedQuery {
    pub(crate) fn new(sql: String, params: Vec<QueryParam>) -> Self {
        Self { sql, params }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }
}

/// Table addressed by a structured request, after allow-list checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub schema: String,
    pub table: String,
}

const MUTATING: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "DROP", "ALTER", "CREATE", "TRUNCATE",
    "RENAME",
];

const ADMINISTRATIVE: &[&str] = &[
    "GRANT", "REVOKE", "DENY", "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX", "SHUTDOWN",
    "KILL", "BACKUP", "RESTORE", "DBCC",
];

const PROCEDURE_CALLS: &[&str] = &["EXEC", "EXECUTE", "CALL"];

/// Functions that reach the file system, other servers or other sessions.
const DANGEROUS_FUNCTIONS: &[&str] = &[
    "OPENROWSET",
    "OPENDATASOURCE",
    "OPENQUERY",
    "LOAD_FILE",
    "LOAD_EXTENSION",
    "PG_READ_FILE",
    "PG_READ_BINARY_FILE",
    "PG_LS_DIR",
    "PG_STAT_FILE",
    "PG_TERMINATE_BACKEND",
    "PG_CANCEL_BACKEND",
    "PG_RELOAD_CONF",
    "SET_CONFIG",
    "LO_IMPORT",
    "LO_EXPORT",
    "DBLINK",
    "DBLINK_EXEC",
    "READFILE",
    "WRITEFILE",
];

/// Extended and system stored procedure prefixes.
const DANGEROUS_PREFIXES: &[&str] = &["XP_", "SP_"];

/// Get the appropriate SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Read-only admission policy for one backend.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    db_type: DatabaseType,
    allowed_procedures: BTreeSet<String>,
}

impl QueryValidator {
    pub fn new(db_type: DatabaseType) -> Self {
        Self {
            db_type,
            allowed_procedures: BTreeSet::new(),
        }
    }

    /// Procedures whose `EXEC`/`CALL` is not treated as unsafe.
    pub fn with_allowed_procedures<I, S>(mut self, procedures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_procedures = procedures
            .into_iter()
            .map(|p| p.as_ref().trim().to_uppercase())
            .filter(|p| !p.is_empty())
            .collect();
        self
    }

    pub fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    /// Classify `sql` against `allowed`.
    pub fn validate(&self, sql: &str, allowed: &SchemaAllowList) -> ValidationVerdict {
        match self.check(sql, allowed) {
            Ok(()) => ValidationVerdict::Accepted(StatementKind::Select),
            Err(rejection) => ValidationVerdict::Rejected(rejection),
        }
    }

    /// Validate and wrap free-form SQL for execution.
    pub fn admit_sql(
        &self,
        sql: &str,
        params: Vec<QueryParam>,
        allowed: &SchemaAllowList,
    ) -> Result<AdmittedQuery, Rejection> {
        self.check(sql, allowed)?;
        Ok(AdmittedQuery::new(sql.trim().to_string(), params))
    }

    fn check(&self, sql: &str, allowed: &SchemaAllowList) -> Result<(), Rejection> {
        let normalized = lexer::normalize(sql, self.db_type)
            .map_err(|e| Rejection::unsupported(format!("Malformed SQL: {}", e)))?;
        if normalized.is_empty() {
            return Err(Rejection::unsupported("Empty SQL statement"));
        }
        debug!(normalized = %normalized.normalized_text(), "Validating statement");

        self.scan_tokens(&normalized)?;

        if normalized.has_multiple_statements() {
            return Err(Rejection::unsupported(
                "Multiple statements are not allowed; submit a single SELECT",
            ));
        }

        match normalized.leading_keyword() {
            Some("SELECT") | Some("WITH") => {}
            Some(other) => {
                return Err(Rejection::unsupported(format!(
                    "Only SELECT queries are allowed (found {})",
                    other
                )));
            }
            None => {
                return Err(Rejection::unsupported(
                    "Only SELECT queries are allowed",
                ));
            }
        }

        let statement = self.parse_single(sql)?;
        check_relations(&statement, allowed, self.db_type)
    }

    /// Forbidden keywords, prefixes and functions anywhere in the text.
    ///
    /// Literal contents are scanned too; values that legitimately contain
    /// such words should be passed as parameters.
    fn scan_tokens(&self, normalized: &NormalizedSql) -> Result<(), Rejection> {
        let tokens = normalized.tokens();
        for (idx, token) in tokens.iter().enumerate() {
            match token {
                Token::Word(word) => self.check_word(word, &tokens[idx + 1..])?,
                Token::Literal(text) | Token::QuotedIdent(text) => {
                    for word in words_in(text) {
                        check_keyword(&word)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_word(&self, word: &str, rest: &[Token]) -> Result<(), Rejection> {
        if PROCEDURE_CALLS.contains(&word) {
            return match procedure_name(rest) {
                Some(name) if self.allowed_procedures.contains(&name) => Ok(()),
                Some(name) => Err(Rejection::unsafe_(format!(
                    "{} of procedure '{}' is not allowed",
                    word, name
                ))),
                None => Err(Rejection::unsafe_(format!("{} is not allowed", word))),
            };
        }
        check_keyword(word)
    }

    fn parse_single(&self, sql: &str) -> Result<Statement, Rejection> {
        let dialect = get_dialect(self.db_type);
        let mut statements = Parser::parse_sql(dialect.as_ref(), sql)
            .map_err(|e| Rejection::unsupported(format!("Failed to parse SQL statement: {}", e)))?;
        if statements.len() != 1 {
            return Err(Rejection::unsupported(
                "Multiple statements are not allowed; submit a single SELECT",
            ));
        }
        let statement = statements.remove(0);
        match &statement {
            Statement::Query(_) => Ok(statement),
            other => Err(Rejection::unsupported(format!(
                "Only SELECT queries are allowed (found {})",
                statement_label(other)
            ))),
        }
    }

    /// Check a structured request's table reference.
    pub fn resolve_table(
        &self,
        table: &str,
        allowed: &SchemaAllowList,
    ) -> Result<TableTarget, Rejection> {
        let table = table.trim();
        let (schema, name) = match table.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, table),
        };
        let schema_ok = schema.is_none_or(|s| !s.is_empty() && s.chars().all(is_plain_ident_char));
        let name_ok = !name.is_empty() && name.chars().all(|c| is_plain_ident_char(c) || c == '$');
        if !schema_ok || !name_ok {
            return Err(Rejection::unsafe_(format!(
                "Invalid table name '{}': use letters, digits, '_' or '$', optionally schema-qualified",
                table
            )));
        }
        let schema = allowed.resolve(schema);
        if !allowed.contains(schema) {
            return Err(Rejection::SchemaDenied {
                schema: schema.to_string(),
                object: name.to_string(),
            });
        }
        Ok(TableTarget {
            schema: schema.to_string(),
            table: name.to_string(),
        })
    }

    /// Build the statement for a structured request.
    ///
    /// Columns are resolved against `known`; `row_cap + 1` rows are requested
    /// so truncation can be detected.
    pub fn admit_table(
        &self,
        query: &TableQuery,
        target: &TableTarget,
        known: &KnownColumns,
        row_cap: u32,
    ) -> Result<AdmittedQuery, Rejection> {
        let resolve = |column: &str| {
            known.resolve(column.trim()).ok_or_else(|| {
                Rejection::unsupported(format!(
                    "Unknown column '{}' in table '{}'",
                    column,
                    known.table()
                ))
            })
        };

        let mut columns = Vec::with_capacity(query.columns.len());
        for column in &query.columns {
            columns.push(resolve(column)?);
        }

        let mut builder = SelectBuilder::new(self.db_type, &target.schema, known.table())
            .columns(columns)
            .limit(u64::from(row_cap) + 1)
            .offset(query.offset);

        for filter in &query.filters {
            builder = builder.filter(ResolvedFilter {
                column: resolve(&filter.column)?,
                op: filter.op,
                values: &filter.values,
            });
        }
        if let Some(sort) = &query.sort {
            builder = builder.order_by(resolve(&sort.column)?, sort.direction);
        }

        let (sql, params) = builder.build();
        Ok(AdmittedQuery::new(sql, params))
    }
}

fn is_plain_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn check_keyword(word: &str) -> Result<(), Rejection> {
    if MUTATING.contains(&word) {
        return Err(Rejection::unsafe_(format!(
            "{} is not allowed; the gateway is read-only",
            word
        )));
    }
    if ADMINISTRATIVE.contains(&word) {
        return Err(Rejection::unsafe_(format!(
            "Administrative operation {} is not allowed",
            word
        )));
    }
    if PROCEDURE_CALLS.contains(&word) {
        return Err(Rejection::unsafe_(format!("{} is not allowed", word)));
    }
    if word == "INTO" {
        return Err(Rejection::unsafe_(
            "SELECT ... INTO and INTO OUTFILE/DUMPFILE are not allowed",
        ));
    }
    if DANGEROUS_FUNCTIONS.contains(&word) {
        return Err(Rejection::unsafe_(format!(
            "Function {} is not allowed",
            word
        )));
    }
    if let Some(prefix) = DANGEROUS_PREFIXES.iter().find(|p| word.starts_with(*p)) {
        return Err(Rejection::unsafe_(format!(
            "System procedures ({}*) are not allowed",
            prefix.to_lowercase()
        )));
    }
    Ok(())
}

/// Upper-cased words inside literal text.
fn words_in(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .filter(|w| !w.is_empty())
        .map(str::to_uppercase)
}

/// Name of the procedure following `EXEC`/`CALL`, last part if qualified.
fn procedure_name(rest: &[Token]) -> Option<String> {
    let mut name = None;
    let mut expect_part = true;
    for token in rest {
        match token {
            Token::Word(w) | Token::QuotedIdent(w) if expect_part => {
                name = Some(w.to_uppercase());
                expect_part = false;
            }
            Token::Symbol('.') if !expect_part => expect_part = true,
            _ => break,
        }
    }
    name
}

fn statement_label(statement: &Statement) -> String {
    let text = statement.to_string();
    text.split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_uppercase()
}

#[derive(Debug)]
struct ObjectRef {
    parts: Vec<String>,
    label: String,
}

/// Collects every schema-addressable name in a statement, plus CTE aliases.
///
/// Breaks on any FROM item it cannot classify.
#[derive(Default)]
struct RelationCollector {
    ctes: HashSet<String>,
    objects: Vec<ObjectRef>,
}

impl RelationCollector {
    fn push_name(&mut self, name: &ObjectName) -> ControlFlow<Rejection> {
        let mut parts = Vec::with_capacity(name.0.len());
        for part in &name.0 {
            match part {
                ObjectNamePart::Identifier(ident) => parts.push(ident.value.clone()),
                _ => {
                    return ControlFlow::Break(Rejection::unsupported(format!(
                        "Unsupported object reference '{}'",
                        name
                    )));
                }
            }
        }
        self.objects.push(ObjectRef {
            parts,
            label: name.to_string(),
        });
        ControlFlow::Continue(())
    }

    /// `TABLE name` bodies, including those inside set operations.
    fn collect_set_expr(&mut self, body: &SetExpr) -> ControlFlow<Rejection> {
        match body {
            SetExpr::Table(table) => {
                let Some(name) = &table.table_name else {
                    return ControlFlow::Break(Rejection::unsupported(
                        "TABLE without a table name",
                    ));
                };
                let mut parts: Vec<String> = table.schema_name.iter().cloned().collect();
                parts.push(name.clone());
                let label = parts.join(".");
                self.objects.push(ObjectRef { parts, label });
                ControlFlow::Continue(())
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left)?;
                self.collect_set_expr(right)
            }
            SetExpr::Select(_) | SetExpr::Query(_) | SetExpr::Values(_) => {
                ControlFlow::Continue(())
            }
            SetExpr::Insert(_) | SetExpr::Update(_) | SetExpr::Delete(_) | SetExpr::Merge(_) => {
                ControlFlow::Break(Rejection::unsafe_("Data modification is not allowed"))
            }
        }
    }
}

impl Visitor for RelationCollector {
    type Break = Rejection;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
            }
        }
        self.collect_set_expr(&query.body)
    }

    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
        self.push_name(relation)
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            // Names and subqueries inside these are visited on their own.
            TableFactor::Table { .. }
            | TableFactor::Derived { .. }
            | TableFactor::NestedJoin { .. }
            | TableFactor::UNNEST { .. } => ControlFlow::Continue(()),
            TableFactor::Function { name, .. } => self.push_name(name),
            TableFactor::TableFunction {
                expr: Expr::Function(function),
                ..
            } => self.push_name(&function.name),
            other => ControlFlow::Break(Rejection::unsupported(format!(
                "Unsupported FROM item '{}'",
                other
            ))),
        }
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            // Only schema-qualified calls can reach outside the allow-list.
            Expr::Function(function) if function.name.0.len() > 1 => {
                self.push_name(&function.name)
            }
            _ => ControlFlow::Continue(()),
        }
    }
}

fn check_relations(
    statement: &Statement,
    allowed: &SchemaAllowList,
    db_type: DatabaseType,
) -> Result<(), Rejection> {
    let mut collector = RelationCollector::default();
    if let ControlFlow::Break(rejection) = statement.visit(&mut collector) {
        return Err(rejection);
    }

    for object in &collector.objects {
        let (schema, name) = match object.parts.as_slice() {
            [name] => {
                if collector.ctes.contains(&name.to_lowercase()) {
                    continue;
                }
                // PostgreSQL resolves pg_* through pg_catalog regardless of search_path.
                if db_type == DatabaseType::PostgreSQL && name.to_lowercase().starts_with("pg_") {
                    return Err(Rejection::SchemaDenied {
                        schema: "pg_catalog".to_string(),
                        object: name.clone(),
                    });
                }
                (allowed.default_schema(), name)
            }
            [schema, name] => (schema.as_str(), name),
            [_database, schema, name] => (schema.as_str(), name),
            _ => {
                return Err(Rejection::unsupported(format!(
                    "Object reference '{}' has too many parts",
                    object.label
                )));
            }
        };

        if !allowed.contains(schema) {
            return Err(Rejection::SchemaDenied {
                schema: schema.to_string(),
                object: name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TableColumns;
    use crate::models::{Filter, SortDirection};
    use serde_json::json;

    fn dbo() -> SchemaAllowList {
        SchemaAllowList::new(["dbo"], "dbo").unwrap()
    }

    fn validator() -> QueryValidator {
        QueryValidator::new(DatabaseType::SQLite)
    }

    fn rejected(sql: &str) -> Rejection {
        match validator().validate(sql, &dbo()) {
            ValidationVerdict::Rejected(r) => r,
            ValidationVerdict::Accepted(_) => panic!("accepted: {}", sql),
        }
    }

    #[test]
    fn test_plain_select_accepted() {
        let v = validator();
        for sql in [
            "SELECT 1",
            "select * from dbo.Orders where id = ?",
            "SELECT o.id FROM Orders o JOIN dbo.Customers c ON c.id = o.customer_id",
            "WITH recent AS (SELECT * FROM dbo.Orders) SELECT * FROM recent",
            "SELECT * FROM Orders;",
            "SELECT COUNT(*) FROM (SELECT id FROM dbo.Orders) t",
        ] {
            assert_eq!(
                v.validate(sql, &dbo()),
                ValidationVerdict::Accepted(StatementKind::Select),
                "{}",
                sql
            );
        }
    }

    #[test]
    fn test_mutating_statements_rejected() {
        for sql in [
            "INSERT INTO dbo.Orders VALUES (1)",
            "UPDATE dbo.Orders SET x = 1",
            "DELETE FROM dbo.Orders",
            "DROP TABLE dbo.Orders",
            "ALTER TABLE dbo.Orders ADD c INT",
            "TRUNCATE TABLE dbo.Orders",
            "MERGE INTO dbo.Orders USING x ON 1=1 WHEN MATCHED THEN DELETE",
            "GRANT SELECT ON dbo.Orders TO bob",
            "REVOKE SELECT ON dbo.Orders FROM bob",
            "CREATE TABLE t (id INT)",
        ] {
            assert_eq!(rejected(sql).kind(), StatementKind::Unsafe, "{}", sql);
        }
    }

    #[test]
    fn test_comment_obfuscation_rejected() {
        for sql in [
            "SELECT 1 /* harmless */; DR/**/OP TABLE x",
            "SELECT * FROM dbo.Orders -- \n; DELETE FROM dbo.Orders",
            "sElEcT 1; dElEtE fRoM dbo.Orders",
        ] {
            assert!(!validator().validate(sql, &dbo()).is_accepted(), "{}", sql);
        }
    }

    #[test]
    fn test_dangerous_procedures_rejected() {
        assert_eq!(
            rejected("SELECT * FROM dbo.Orders WHERE 1 = xp_cmdshell('dir')").kind(),
            StatementKind::Unsafe
        );
        assert_eq!(rejected("EXEC xp_cmdshell 'dir'").kind(), StatementKind::Unsafe);
        assert_eq!(rejected("EXEC dbo.cleanup").kind(), StatementKind::Unsafe);
    }

    #[test]
    fn test_whitelisted_procedure_is_not_unsafe() {
        let v = QueryValidator::new(DatabaseType::SQLite).with_allowed_procedures(["report_daily"]);
        match v.validate("EXEC dbo.report_daily", &dbo()) {
            ValidationVerdict::Rejected(r) => assert_eq!(r.kind(), StatementKind::Unsupported),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_multi_statement_rejected() {
        let r = rejected("SELECT 1; SELECT 2");
        assert_eq!(r.kind(), StatementKind::Unsupported);
        assert!(r.to_string().contains("Multiple statements"));
    }

    #[test]
    fn test_orders_drop_batch_rejected() {
        let err: GatewayError = rejected("SELECT * FROM dbo.Orders; DROP TABLE dbo.Orders;").into();
        assert_eq!(err.kind(), "validation_rejected");
    }

    #[test]
    fn test_foreign_schema_denied() {
        let r = rejected("SELECT * FROM sys.objects");
        assert_eq!(
            r,
            Rejection::SchemaDenied {
                schema: "sys".into(),
                object: "objects".into()
            }
        );
        let err: GatewayError = r.into();
        assert_eq!(err.kind(), "schema_access_denied");

        let r = rejected("SELECT * FROM dbo.Orders o JOIN hr.Salaries s ON s.id = o.id");
        assert!(matches!(r, Rejection::SchemaDenied { ref schema, .. } if schema == "hr"));

        let r = rejected("SELECT * FROM dbo.Orders WHERE id IN (SELECT id FROM audit.events)");
        assert!(matches!(r, Rejection::SchemaDenied { .. }));
    }

    #[test]
    fn test_three_part_names_check_the_schema() {
        let v = validator();
        assert!(v.validate("SELECT * FROM shop.dbo.Orders", &dbo()).is_accepted());
        assert!(matches!(
            rejected("SELECT * FROM shop.sys.objects"),
            Rejection::SchemaDenied { .. }
        ));
    }

    #[test]
    fn test_unqualified_names_use_default_schema() {
        let list = SchemaAllowList::new(["sales"], "dbo").unwrap();
        match validator().validate("SELECT * FROM Orders", &list) {
            ValidationVerdict::Rejected(Rejection::SchemaDenied { schema, object }) => {
                assert_eq!(schema, "dbo");
                assert_eq!(object, "Orders");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_select_into_and_file_functions_rejected() {
        assert!(rejected("SELECT * INTO dbo.copy FROM dbo.Orders").to_string().contains("INTO"));
        assert_eq!(rejected("SELECT load_file('/etc/passwd')").kind(), StatementKind::Unsafe);
        assert_eq!(
            rejected("SELECT * FROM OPENROWSET('SQLNCLI', 'x', 'y')").kind(),
            StatementKind::Unsafe
        );
    }

    #[test]
    fn test_keywords_inside_literals_are_rejected() {
        assert_eq!(
            rejected("SELECT * FROM dbo.Orders WHERE note = 'please delete'").kind(),
            StatementKind::Unsafe
        );
    }

    #[test]
    fn test_identifiers_containing_keywords_accepted() {
        let v = validator();
        assert!(v.validate("SELECT updated_at, created_by FROM dbo.Orders", &dbo()).is_accepted());
    }

    #[test]
    fn test_non_select_rejected_as_unsupported() {
        for sql in ["SHOW TABLES", "EXPLAIN SELECT 1", "VALUES (1)", "BEGIN", ""] {
            assert_eq!(rejected(sql).kind(), StatementKind::Unsupported, "{:?}", sql);
        }
    }

    #[test]
    fn test_unparseable_rejected() {
        assert_eq!(rejected("SELECT FROM WHERE (").kind(), StatementKind::Unsupported);
        assert_eq!(rejected("SELECT 'open").kind(), StatementKind::Unsupported);
    }

    #[test]
    fn test_postgres_catalog_tables_denied() {
        let v = QueryValidator::new(DatabaseType::PostgreSQL);
        let list = SchemaAllowList::new(["public"], "public").unwrap();
        assert!(!v.validate("SELECT * FROM pg_user", &list).is_accepted());
        assert!(!v.validate("SELECT * FROM pg_catalog.pg_user", &list).is_accepted());
        assert!(!v.validate("SELECT * FROM information_schema.tables", &list).is_accepted());
        assert!(v.validate("SELECT * FROM accounts", &list).is_accepted());
    }

    fn pg_rejected(sql: &str) -> Rejection {
        let v = QueryValidator::new(DatabaseType::PostgreSQL);
        let list = SchemaAllowList::new(["public"], "public").unwrap();
        match v.validate(sql, &list) {
            ValidationVerdict::Rejected(r) => r,
            ValidationVerdict::Accepted(_) => panic!("accepted: {}", sql),
        }
    }

    fn pg_accepted(sql: &str) -> bool {
        let v = QueryValidator::new(DatabaseType::PostgreSQL);
        let list = SchemaAllowList::new(["public"], "public").unwrap();
        v.validate(sql, &list).is_accepted()
    }

    #[test]
    fn test_table_body_checked_against_allow_list() {
        let r = pg_rejected("SELECT * FROM (TABLE pg_catalog.pg_shadow) s");
        assert!(matches!(r, Rejection::SchemaDenied { ref schema, .. } if schema == "pg_catalog"));

        let r = pg_rejected("WITH x AS (TABLE secret.t) SELECT * FROM x");
        assert!(matches!(r, Rejection::SchemaDenied { ref schema, .. } if schema == "secret"));

        let r = pg_rejected("SELECT * FROM (SELECT 1 UNION ALL TABLE secret.t) s");
        assert!(matches!(r, Rejection::SchemaDenied { ref schema, .. } if schema == "secret"));

        // The parser cannot read an unqualified TABLE body followed by more tokens.
        pg_rejected("SELECT * FROM (TABLE pg_shadow) s");

        assert!(pg_accepted("SELECT * FROM (TABLE public.accounts) s"));
        assert!(pg_accepted("SELECT * FROM (SELECT 1 UNION ALL TABLE public.accounts) s"));
    }

    #[test]
    fn test_table_functions_checked_against_allow_list() {
        let r = pg_rejected("SELECT * FROM accounts a JOIN LATERAL secret.fn(a.id) f ON true");
        assert!(matches!(r, Rejection::SchemaDenied { ref schema, .. } if schema == "secret"));

        let r = pg_rejected("SELECT * FROM secret.fn() f");
        assert!(matches!(r, Rejection::SchemaDenied { ref schema, .. } if schema == "secret"));

        let r = pg_rejected("SELECT * FROM accounts a, LATERAL (SELECT * FROM secret.t) s");
        assert!(matches!(r, Rejection::SchemaDenied { ref schema, .. } if schema == "secret"));

        assert!(pg_accepted("SELECT * FROM accounts a JOIN LATERAL public.fn(a.id) f ON true"));
        assert!(pg_accepted("SELECT * FROM generate_series(1, 3) g"));
    }

    #[test]
    fn test_qualified_function_calls_checked_against_allow_list() {
        let r = pg_rejected("SELECT secret.lookup(id) FROM accounts");
        assert!(matches!(r, Rejection::SchemaDenied { ref schema, .. } if schema == "secret"));

        assert!(pg_accepted("SELECT public.lookup(id) FROM accounts"));
        assert!(pg_accepted("SELECT lower(name), count(*) FROM accounts GROUP BY 1"));
    }

    #[test]
    fn test_admit_sql_keeps_params() {
        let admitted = validator()
            .admit_sql(" SELECT * FROM Orders WHERE id = ? ", vec![QueryParam::Int(3)], &dbo())
            .unwrap();
        assert_eq!(admitted.sql(), "SELECT * FROM Orders WHERE id = ?");
        assert_eq!(admitted.params(), &[QueryParam::Int(3)]);
    }

    #[test]
    fn test_resolve_table() {
        let v = validator();
        let list = SchemaAllowList::new(["main"], "main").unwrap();
        assert_eq!(
            v.resolve_table("Customers", &list).unwrap(),
            TableTarget {
                schema: "main".into(),
                table: "Customers".into()
            }
        );
        assert!(v.resolve_table("main.Customers", &list).is_ok());
        assert!(matches!(
            v.resolve_table("temp.Customers", &list),
            Err(Rejection::SchemaDenied { .. })
        ));
        for bad in ["Customers; DROP TABLE x", "a.b.c", "Cust omers", "", "\"x\""] {
            assert!(
                matches!(v.resolve_table(bad, &list), Err(Rejection::Unsafe { .. })),
                "{}",
                bad
            );
        }
    }

    fn customers() -> KnownColumns {
        KnownColumns::from(TableColumns {
            table: "Customers".into(),
            columns: vec!["Id".into(), "Name".into(), "City".into()],
        })
    }

    #[test]
    fn test_admit_table_resolves_columns() {
        let v = validator();
        let target = TableTarget {
            schema: "main".into(),
            table: "customers".into(),
        };
        let query = TableQuery::new("customers")
            .with_filter(Filter::parse("city", &json!("Springfield")).unwrap())
            .with_columns(["name"])
            .with_sort("id", SortDirection::Asc)
            .with_limit(2);
        let admitted = v.admit_table(&query, &target, &customers(), 2).unwrap();
        assert_eq!(
            admitted.sql(),
            r#"SELECT "Name" FROM "main"."Customers" WHERE "City" = ? ORDER BY "Id" ASC LIMIT 3"#
        );
        assert_eq!(admitted.params(), &[QueryParam::String("Springfield".into())]);
    }

    #[test]
    fn test_admit_table_unknown_column() {
        let v = validator();
        let target = TableTarget {
            schema: "main".into(),
            table: "Customers".into(),
        };
        let query = TableQuery::new("Customers")
            .with_filter(Filter::parse("password", &json!("x")).unwrap());
        let r = v.admit_table(&query, &target, &customers(), 10).unwrap_err();
        assert_eq!(r.kind(), StatementKind::Unsupported);
        assert!(r.to_string().contains("password"));

        let query = TableQuery::new("Customers").with_columns(["Name; DROP TABLE x"]);
        assert!(v.admit_table(&query, &target, &customers(), 10).is_err());
    }
}
