use crate::backend::sqlite::SqliteBackend;
use crate::security::Principal;

/// Shell commands answered from the catalog instead of running SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogQuery {
    Describe(String),
    ShowTables,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CatalogError {
    UnknownIndex(String),
    Backend(String),
}

/// Recognize `DESCRIBE <table>`, `DESC <table>` and `SHOW TABLES`.
pub fn intercept_catalog_query(sql: &str) -> Option<CatalogQuery> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let mut words = trimmed.split_whitespace();
    let first = words.next()?.to_ascii_uppercase();
    let second = words.next();
    let extra = words.next();

    match (first.as_str(), second, extra) {
        ("DESCRIBE" | "DESC", Some(table), None) => {
            let table = table.trim_matches(|c| c == '"' || c == '`');
            Some(CatalogQuery::Describe(table.to_string()))
        }
        ("SHOW", Some(what), None) if what.eq_ignore_ascii_case("TABLES") => Some(CatalogQuery::ShowTables),
        _ => None,
    }
}

pub fn get_catalog_result(
    query: &CatalogQuery,
    backend: &SqliteBackend,
    principal: &Principal,
) -> Result<CatalogResult, CatalogError> {
    match query {
        CatalogQuery::Describe(table) => describe(backend, principal, table),
        CatalogQuery::ShowTables => show_tables(backend, principal),
    }
}

fn describe(backend: &SqliteBackend, principal: &Principal, table: &str) -> Result<CatalogResult, CatalogError> {
    let stored = backend
        .find_table(table)
        .map_err(CatalogError::Backend)?
        .filter(|t| principal.can_read(t))
        .ok_or_else(|| CatalogError::UnknownIndex(table.to_string()))?;

    let columns = backend.table_columns(&stored).map_err(CatalogError::Backend)?;
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    let visible = principal.visible_columns(&stored, &names);

    let rows = columns
        .into_iter()
        .filter(|c| visible.contains(&c.name))
        .map(|c| vec![c.name, c.type_name])
        .collect();

    Ok(CatalogResult {
        columns: vec!["column".to_string(), "type".to_string()],
        rows,
    })
}

fn show_tables(backend: &SqliteBackend, principal: &Principal) -> Result<CatalogResult, CatalogError> {
    let rows = backend
        .table_names()
        .map_err(CatalogError::Backend)?
        .into_iter()
        .filter(|t| principal.can_read(t))
        .map(|t| vec![t, "INDEX".to_string()])
        .collect();

    Ok(CatalogResult {
        columns: vec!["name".to_string(), "type".to_string()],
        rows,
    })
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
                 CREATE TABLE bort (a BIGINT);
                 CREATE TABLE \".security\" (doc TEXT);",
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

    #[test]
    fn test_intercept_describe() {
        assert_eq!(
            intercept_catalog_query("DESCRIBE test"),
            Some(CatalogQuery::Describe("test".into()))
        );
        assert_eq!(
            intercept_catalog_query("desc \"test\";"),
            Some(CatalogQuery::Describe("test".into()))
        );
    }

    #[test]
    fn test_intercept_show_tables() {
        assert_eq!(intercept_catalog_query("SHOW TABLES"), Some(CatalogQuery::ShowTables));
        assert_eq!(intercept_catalog_query("show tables;"), Some(CatalogQuery::ShowTables));
    }

    #[test]
    fn test_no_intercept_normal_query() {
        assert_eq!(intercept_catalog_query("SELECT * FROM test"), None);
        assert_eq!(intercept_catalog_query("SHOW FUNCTIONS"), None);
        assert_eq!(intercept_catalog_query("DESCRIBE"), None);
    }

    #[test]
    fn test_describe_applies_field_grants() {
        let user = principal(Role::new("r").grant(
            IndexGrant::read("test").with_fields(FieldGrant::Except(vec!["c".into()])),
        ));
        let result = get_catalog_result(&CatalogQuery::Describe("test".into()), &backend(), &user).unwrap();
        assert_eq!(result.columns, vec!["column", "type"]);
        assert_eq!(
            result.rows,
            vec![vec!["a".to_string(), "BIGINT".to_string()], vec!["b".to_string(), "BIGINT".to_string()]]
        );
    }

    #[test]
    fn test_describe_unreadable_table() {
        let user = principal(Role::new("r").grant(IndexGrant::read("bort")));
        let err = get_catalog_result(&CatalogQuery::Describe("test".into()), &backend(), &user).unwrap_err();
        assert_eq!(err, CatalogError::UnknownIndex("test".into()));
    }

    #[test]
    fn test_show_tables_filters_by_grant() {
        let admin = principal(Role::superuser("admin"));
        let all = get_catalog_result(&CatalogQuery::ShowTables, &backend(), &admin).unwrap();
        let names: Vec<&str> = all.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(names, vec![".security", "bort", "test"]);

        let user = principal(Role::new("r").grant(IndexGrant::read("test")));
        let some = get_catalog_result(&CatalogQuery::ShowTables, &backend(), &user).unwrap();
        assert_eq!(some.rows, vec![vec!["test".to_string(), "INDEX".to_string()]]);
    }
}
