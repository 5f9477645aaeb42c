// Rewrites a query so a principal only sees what its grants allow.
//
// Every table a query reads is shadowed by a CTE of the same name that
// projects the visible columns and applies the row filter. The CTE body reads
// the real table through `main.`, which SQLite never resolves to a CTE.

use std::ops::ControlFlow;

use sqlparser::ast::{visit_relations, Statement};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;

use crate::backend::sqlite::SqliteBackend;
use crate::security::Principal;

#[derive(Debug, Clone, PartialEq)]
pub enum GuardError {
    Parse(String),
    NotAQuery,
    /// Missing or not readable by the principal; both look the same from outside.
    UnknownIndex { index: String, column: usize },
    Backend(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardedQuery {
    pub sql: String,
    /// Tables the query reads, in their stored spelling.
    pub indices: Vec<String>,
}

pub fn guard(sql: &str, principal: &Principal, backend: &SqliteBackend) -> Result<GuardedQuery, GuardError> {
    let sql = sql.trim();
    let statements = Parser::parse_sql(&SQLiteDialect {}, sql)
        .map_err(|e| GuardError::Parse(e.to_string()))?;
    let query = match statements.as_slice() {
        [Statement::Query(query)] => query,
        _ => return Err(GuardError::NotAQuery),
    };

    let local_names: Vec<String> = query
        .with
        .as_ref()
        .map(|with| {
            with.cte_tables
                .iter()
                .map(|cte| cte.alias.name.value.to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    let mut relations: Vec<String> = Vec::new();
    let _ = visit_relations(&statements, |relation| {
        let name = relation_name(&relation.to_string());
        if !relations.contains(&name) {
            relations.push(name);
        }
        ControlFlow::<()>::Continue(())
    });

    let mut shadows = Vec::new();
    let mut indices = Vec::new();
    for name in relations {
        if local_names.contains(&name.to_ascii_lowercase()) {
            continue;
        }
        let table = match backend.find_table(&name).map_err(GuardError::Backend)? {
            Some(table) if principal.can_read(&table) => table,
            _ => return Err(unknown_index(sql, &name)),
        };
        // one shadow per table, whatever case it was spelled in
        if indices.contains(&table) {
            continue;
        }
        let all: Vec<String> = backend
            .table_columns(&table)
            .map_err(GuardError::Backend)?
            .into_iter()
            .map(|c| c.name)
            .collect();
        let visible = principal.visible_columns(&table, &all);
        if visible.is_empty() {
            return Err(unknown_index(sql, &name));
        }
        let filter = principal.row_filter(&table);
        if visible.len() != all.len() || filter.is_some() {
            shadows.push(shadow_cte(&name, &table, &visible, filter.as_deref()));
        }
        indices.push(table);
    }

    let sql = if shadows.is_empty() {
        sql.to_string()
    } else {
        prepend_ctes(sql, &shadows)
    };
    Ok(GuardedQuery { sql, indices })
}

fn unknown_index(sql: &str, name: &str) -> GuardError {
    GuardError::UnknownIndex {
        index: name.to_string(),
        column: locate(sql, name),
    }
}

/// Unquote a single-part name. Qualified names come back unchanged and never
/// match a table, so `main.test` cannot sidestep the shadow CTE.
fn relation_name(raw: &str) -> String {
    for (open, close) in [('"', '"'), ('`', '`'), ('[', ']')] {
        if let Some(inner) = raw.strip_prefix(open).and_then(|r| r.strip_suffix(close)) {
            if !inner.contains(&format!("{}.{}", close, open)) {
                return inner.to_string();
            }
        }
    }
    raw.to_string()
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn shadow_cte(name: &str, table: &str, columns: &[String], filter: Option<&str>) -> String {
    let projection: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    let mut cte = format!(
        "{} AS (SELECT {} FROM main.{}",
        quote(name),
        projection.join(", "),
        quote(table)
    );
    if let Some(filter) = filter {
        cte.push_str(" WHERE ");
        cte.push_str(filter);
    }
    cte.push(')');
    cte
}

fn prepend_ctes(sql: &str, shadows: &[String]) -> String {
    let joined = shadows.join(", ");
    match strip_keyword(sql, "WITH") {
        None => format!("WITH {} {}", joined, sql),
        Some(rest) => match strip_keyword(rest, "RECURSIVE") {
            Some(rest) => format!("WITH RECURSIVE {}, {}", joined, rest),
            None => format!("WITH {}, {}", joined, rest),
        },
    }
}

fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let head = s.get(..keyword.len())?;
    let rest = &s[keyword.len()..];
    if head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// 1-based column of the first whole-word occurrence of `word`, or 1.
pub fn locate(sql: &str, word: &str) -> usize {
    let haystack = sql.to_ascii_lowercase();
    let needle = word.to_ascii_lowercase();
    if needle.is_empty() {
        return 1;
    }
    let mut from = 0;
    while let Some(idx) = haystack[from..].find(&needle) {
        let start = from + idx;
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        if !before.is_some_and(is_ident_char) && !after.is_some_and(is_ident_char) {
            return haystack[..start].chars().count() + 1;
        }
        from = end;
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{FieldGrant, IndexGrant, Role};

    fn backend() -> SqliteBackend {
        let backend = SqliteBackend::new(":memory:").unwrap();
        backend
            .execute_batch(
                "CREATE TABLE test (a BIGINT, b BIGINT, c BIGINT);
                 INSERT INTO test VALUES (1, 2, 3), (4, 5, 6);
                 CREATE TABLE bort (a BIGINT);",
            )
            .unwrap();
        backend
    }

    fn principal(role: Role) -> Principal {
        Principal {
            name: "user".into(),
            connect: role.connect,
            sql: role.sql,
            grants: role.grants,
        }
    }

    fn only_a() -> Principal {
        principal(Role::new("r").grant(
            IndexGrant::read("test").with_fields(FieldGrant::Only(vec!["a".into()])),
        ))
    }

    // ========================================================================
    // PASS-THROUGH
    // ========================================================================

    #[test]
    fn test_superuser_query_unchanged() {
        let admin = principal(Role::superuser("admin"));
        let guarded = guard("SELECT * FROM test ORDER BY a", &admin, &backend()).unwrap();
        assert_eq!(guarded.sql, "SELECT * FROM test ORDER BY a");
        assert_eq!(guarded.indices, vec!["test"]);
    }

    #[test]
    fn test_query_without_tables() {
        let user = only_a();
        let guarded = guard("SELECT 1", &user, &backend()).unwrap();
        assert!(guarded.indices.is_empty());
    }

    // ========================================================================
    // FIELD AND DOCUMENT LEVEL SECURITY
    // ========================================================================

    #[test]
    fn test_field_level_security_projects_columns() {
        let backend = backend();
        let guarded = guard("SELECT * FROM test ORDER BY a", &only_a(), &backend).unwrap();
        assert!(guarded.sql.starts_with("WITH \"test\" AS (SELECT \"a\" FROM main.\"test\")"));
        let result = backend.query(&guarded.sql).unwrap();
        assert_eq!(result.columns, vec!["a"]);
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn test_self_join_in_mixed_case_shadows_once() {
        let backend = backend();
        let sql = "SELECT t1.a, t2.a FROM test t1 JOIN TEST t2 ON t1.a = t2.a ORDER BY t1.a";
        let guarded = guard(sql, &only_a(), &backend).unwrap();
        assert_eq!(guarded.sql.matches("AS (SELECT").count(), 1);
        assert_eq!(guarded.indices, vec!["test"]);
        let result = backend.query(&guarded.sql).unwrap();
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn test_hidden_column_is_unknown_to_sqlite() {
        let backend = backend();
        let guarded = guard("SELECT c FROM test", &only_a(), &backend).unwrap();
        let err = backend.query(&guarded.sql).unwrap_err();
        assert!(err.contains("no such column: c"), "{}", err);
    }

    #[test]
    fn test_document_level_security_filters_rows() {
        let backend = backend();
        let no_3s = principal(Role::new("r").grant(IndexGrant::read("test").with_row_filter("c != 3")));
        let guarded = guard("SELECT * FROM test ORDER BY a", &no_3s, &backend).unwrap();
        let result = backend.query(&guarded.sql).unwrap();
        assert_eq!(result.columns, vec!["a", "b", "c"]);
        assert_eq!(result.rows, vec![vec![Some("4".into()), Some("5".into()), Some("6".into())]]);
    }

    #[test]
    fn test_user_cte_is_extended() {
        let backend = backend();
        let sql = "WITH t AS (SELECT a FROM test) SELECT * FROM t ORDER BY a";
        let guarded = guard(sql, &only_a(), &backend).unwrap();
        assert!(guarded.sql.starts_with("WITH \"test\" AS ("));
        assert!(guarded.sql.contains("), t AS (SELECT a FROM test)"));
        assert_eq!(backend.query(&guarded.sql).unwrap().rows.len(), 2);
    }

    // ========================================================================
    // REJECTIONS
    // ========================================================================

    #[test]
    fn test_unreadable_table_is_unknown_index() {
        let wrong = principal(Role::new("r").grant(IndexGrant::read("something_else")));
        let err = guard("SELECT * FROM test", &wrong, &backend()).unwrap_err();
        assert_eq!(err, GuardError::UnknownIndex { index: "test".into(), column: 15 });
    }

    #[test]
    fn test_missing_table_is_unknown_index() {
        let admin = principal(Role::superuser("admin"));
        let err = guard("SELECT * FROM missing", &admin, &backend()).unwrap_err();
        assert_eq!(err, GuardError::UnknownIndex { index: "missing".into(), column: 15 });
    }

    #[test]
    fn test_schema_qualified_name_cannot_bypass_shadow() {
        let err = guard("SELECT * FROM main.test", &only_a(), &backend()).unwrap_err();
        assert!(matches!(err, GuardError::UnknownIndex { .. }));
    }

    #[test]
    fn test_only_queries_are_allowed() {
        let admin = principal(Role::superuser("admin"));
        assert_eq!(guard("DROP TABLE test", &admin, &backend()), Err(GuardError::NotAQuery));
        assert_eq!(
            guard("SELECT 1; SELECT 2", &admin, &backend()),
            Err(GuardError::NotAQuery)
        );
        assert!(matches!(guard("SELEC 1", &admin, &backend()), Err(GuardError::Parse(_))));
    }

    #[test]
    fn test_locate_whole_words() {
        assert_eq!(locate("SELECT c FROM test", "c"), 8);
        assert_eq!(locate("SELECT abc, c FROM test", "c"), 13);
        assert_eq!(locate("SELECT * FROM missing", "missing"), 15);
        assert_eq!(locate("SELECT 1", "zzz"), 1);
    }

    #[test]
    fn test_relation_name_unquoting() {
        assert_eq!(relation_name("test"), "test");
        assert_eq!(relation_name("\".security\""), ".security");
        assert_eq!(relation_name("main.test"), "main.test");
        assert_eq!(relation_name("\"main\".\"test\""), "\"main\".\"test\"");
    }
}
