//! Catalog statements for schema discovery.
//!
//! Each backend reads its own catalog: `information_schema` on MySQL and
//! PostgreSQL, the `pragma_*` table-valued functions on SQLite. Schema and
//! table names are always bound, never spliced into the text. Column names
//! are the same on every backend so callers see one shape.

use super::validator::TableTarget;
use crate::models::{DatabaseType, QueryParam};

/// A gateway-authored catalog statement and its bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// SQL constants by backend.
mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
            SELECT
                table_schema::text AS table_schema,
                table_name::text AS table_name,
                table_type::text AS table_type
            FROM information_schema.tables
            WHERE lower(table_schema) IN "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                c.column_name::text AS column_name,
                c.data_type::text AS data_type,
                c.is_nullable::text AS is_nullable,
                c.column_default::text AS column_default,
                CASE WHEN pk.column_name IS NULL THEN 'NO' ELSE 'YES' END AS is_primary_key
            FROM information_schema.columns c
            LEFT JOIN (
                SELECT kcu.table_schema, kcu.table_name, kcu.column_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON tc.constraint_name = kcu.constraint_name
                    AND tc.table_schema = kcu.table_schema
                WHERE tc.constraint_type = 'PRIMARY KEY'
            ) pk
                ON pk.table_schema = c.table_schema
                AND pk.table_name = c.table_name
                AND pk.column_name = c.column_name
            WHERE lower(c.table_schema) = lower($1)
              AND (c.table_name = $2 OR c.table_name = lower($2))
            ORDER BY (c.table_name = $2) DESC, c.ordinal_position
            "#;

        pub const FOREIGN_KEYS: &str = r#"
            SELECT
                kcu.constraint_name::text AS constraint_name,
                kcu.column_name::text AS column_name,
                ref.table_schema::text AS referenced_schema,
                ref.table_name::text AS referenced_table,
                ref.column_name::text AS referenced_column
            FROM information_schema.key_column_usage kcu
            JOIN information_schema.referential_constraints rc
                ON rc.constraint_schema = kcu.constraint_schema
                AND rc.constraint_name = kcu.constraint_name
            JOIN information_schema.key_column_usage ref
                ON ref.constraint_schema = rc.unique_constraint_schema
                AND ref.constraint_name = rc.unique_constraint_name
                AND ref.ordinal_position = kcu.position_in_unique_constraint
            WHERE lower(kcu.table_schema) = lower($1)
              AND (kcu.table_name = $2 OR kcu.table_name = lower($2))
            ORDER BY kcu.constraint_name, kcu.ordinal_position
            "#;
    }

    pub mod mysql {
        pub const LIST_TABLES: &str = r#"
            SELECT
                CONVERT(TABLE_SCHEMA USING utf8mb4) AS table_schema,
                CONVERT(TABLE_NAME USING utf8mb4) AS table_name,
                CONVERT(TABLE_TYPE USING utf8mb4) AS table_type
            FROM information_schema.TABLES
            WHERE lower(TABLE_SCHEMA) IN "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                CONVERT(COLUMN_NAME USING utf8mb4) AS column_name,
                CONVERT(COLUMN_TYPE USING utf8mb4) AS data_type,
                CONVERT(IS_NULLABLE USING utf8mb4) AS is_nullable,
                CONVERT(COLUMN_DEFAULT USING utf8mb4) AS column_default,
                CASE WHEN COLUMN_KEY = 'PRI' THEN 'YES' ELSE 'NO' END AS is_primary_key
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#;

        pub const FOREIGN_KEYS: &str = r#"
            SELECT
                CONVERT(CONSTRAINT_NAME USING utf8mb4) AS constraint_name,
                CONVERT(COLUMN_NAME USING utf8mb4) AS column_name,
                CONVERT(REFERENCED_TABLE_SCHEMA USING utf8mb4) AS referenced_schema,
                CONVERT(REFERENCED_TABLE_NAME USING utf8mb4) AS referenced_table,
                CONVERT(REFERENCED_COLUMN_NAME USING utf8mb4) AS referenced_column
            FROM information_schema.KEY_COLUMN_USAGE
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
              AND REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
            "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
            SELECT
                schema AS table_schema,
                name AS table_name,
                CASE type WHEN 'view' THEN 'VIEW' ELSE 'BASE TABLE' END AS table_type
            FROM pragma_table_list
            WHERE name NOT LIKE 'sqlite_%'
              AND lower(schema) IN "#;

        /// Binds the table, then the schema.
        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                name AS column_name,
                type AS data_type,
                CASE WHEN "notnull" = 0 THEN 'YES' ELSE 'NO' END AS is_nullable,
                dflt_value AS column_default,
                CASE WHEN pk > 0 THEN 'YES' ELSE 'NO' END AS is_primary_key
            FROM pragma_table_info(?, ?)
            ORDER BY cid
            "#;

        /// Binds the schema, the table, then the schema again.
        pub const FOREIGN_KEYS: &str = r#"
            SELECT
                'fk_' || id AS constraint_name,
                "from" AS column_name,
                ? AS referenced_schema,
                "table" AS referenced_table,
                "to" AS referenced_column
            FROM pragma_foreign_key_list(?, ?)
            ORDER BY id, seq
            "#;
    }
}

/// Tables (and optionally views) in `schemas`, ordered by schema then name.
///
/// `schemas` must not be empty.
pub fn list_tables(
    db_type: DatabaseType,
    schemas: &[String],
    include_views: bool,
) -> CatalogQuery {
    let (prefix, type_column) = match db_type {
        DatabaseType::PostgreSQL => (queries::postgres::LIST_TABLES, "table_type"),
        DatabaseType::MySQL => (queries::mysql::LIST_TABLES, "TABLE_TYPE"),
        DatabaseType::SQLite => (queries::sqlite::LIST_TABLES, "type"),
    };
    let (tables, with_views) = match db_type {
        DatabaseType::SQLite => ("'table'", "'table', 'view'"),
        DatabaseType::PostgreSQL | DatabaseType::MySQL => ("'BASE TABLE'", "'BASE TABLE', 'VIEW'"),
    };

    let slots: Vec<String> = (1..=schemas.len()).map(|i| db_type.placeholder(i)).collect();
    let sql = format!(
        "{}({})\n              AND {} IN ({})\n            ORDER BY table_schema, table_name",
        prefix.trim_end(),
        slots.join(", "),
        type_column,
        if include_views { with_views } else { tables },
    );
    CatalogQuery {
        sql,
        params: schemas
            .iter()
            .map(|s| QueryParam::String(s.to_lowercase()))
            .collect(),
    }
}

/// Columns of one table with type, nullability, default and primary-key flag.
pub fn describe_table(db_type: DatabaseType, target: &TableTarget) -> CatalogQuery {
    let schema = QueryParam::String(target.schema.clone());
    let table = QueryParam::String(target.table.clone());
    match db_type {
        DatabaseType::PostgreSQL => CatalogQuery {
            sql: queries::postgres::DESCRIBE_COLUMNS.to_string(),
            params: vec![schema, table],
        },
        DatabaseType::MySQL => CatalogQuery {
            sql: queries::mysql::DESCRIBE_COLUMNS.to_string(),
            params: vec![schema, table],
        },
        DatabaseType::SQLite => CatalogQuery {
            sql: queries::sqlite::DESCRIBE_COLUMNS.to_string(),
            params: vec![table, schema],
        },
    }
}

/// Outgoing foreign keys of one table, one row per referencing column.
pub fn foreign_keys(db_type: DatabaseType, target: &TableTarget) -> CatalogQuery {
    let schema = QueryParam::String(target.schema.clone());
    let table = QueryParam::String(target.table.clone());
    match db_type {
        DatabaseType::PostgreSQL => CatalogQuery {
            sql: queries::postgres::FOREIGN_KEYS.to_string(),
            params: vec![schema, table],
        },
        DatabaseType::MySQL => CatalogQuery {
            sql: queries::mysql::FOREIGN_KEYS.to_string(),
            params: vec![schema, table],
        },
        DatabaseType::SQLite => CatalogQuery {
            sql: queries::sqlite::FOREIGN_KEYS.to_string(),
            params: vec![schema.clone(), table, schema],
        },
    }
}
