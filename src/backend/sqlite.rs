use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// SQL type name as the shell reports it in DESCRIBE.
    pub type_name: String,
}

/// Map a SQLite declared column type to the type name the shell displays.
pub fn decltype_to_sql_type(decltype: &str) -> &'static str {
    let upper = decltype.to_uppercase();
    // VARCHAR(255) -> VARCHAR
    let base = match upper.find('(') {
        Some(idx) => upper[..idx].trim(),
        None => upper.trim(),
    };
    match base {
        "INTEGER" | "INT" | "BIGINT" | "INT8" | "LONG" => "BIGINT",
        "INT4" | "MEDIUMINT" => "INTEGER",
        "SMALLINT" | "INT2" | "SHORT" => "SMALLINT",
        "TINYINT" | "BYTE" => "TINYINT",
        "REAL" | "FLOAT" | "FLOAT4" => "REAL",
        "DOUBLE" | "DOUBLE PRECISION" | "FLOAT8" => "DOUBLE",
        "NUMERIC" | "DECIMAL" => "DECIMAL",
        "BOOLEAN" | "BOOL" => "BOOLEAN",
        "BLOB" | "BINARY" => "BINARY",
        "TIMESTAMP" | "DATETIME" | "DATE" => "TIMESTAMP",
        _ => "VARCHAR",
    }
}

impl SqliteBackend {
    pub fn new(path: &str) -> Result<Self, String> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(path)
        }
        .map_err(|e| format!("Failed to open SQLite: {}", e))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| format!("Failed to set pragmas: {}", e))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, String> {
        self.conn
            .lock()
            .map_err(|_| "SQLite connection lock poisoned".to_string())
    }

    /// Run statements that return no rows (fixture DDL and inserts).
    pub fn execute_batch(&self, sql: &str) -> Result<(), String> {
        self.lock()?
            .execute_batch(sql)
            .map_err(|e| format!("Execute error: {}", e))
    }

    pub fn query(&self, sql: &str) -> Result<QueryResult, String> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| format!("Prepare error: {}", e))?;

        let column_count = stmt.column_count();
        let columns: Vec<String> = (0..column_count)
            .map(|i| stmt.column_name(i).unwrap_or("?").to_string())
            .collect();

        let mut rows = Vec::new();
        let mut cursor = stmt
            .query([])
            .map_err(|e| format!("Query error: {}", e))?;
        while let Some(row) = cursor.next().map_err(|e| format!("Query error: {}", e))? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value = match row.get_ref(i) {
                    Ok(ValueRef::Null) => None,
                    Ok(ValueRef::Integer(n)) => Some(n.to_string()),
                    Ok(ValueRef::Real(f)) => Some(f.to_string()),
                    Ok(ValueRef::Text(s)) => Some(String::from_utf8_lossy(s).to_string()),
                    Ok(ValueRef::Blob(b)) => Some(hex::encode(b)),
                    Err(e) => return Err(format!("Query error: {}", e)),
                };
                values.push(value);
            }
            rows.push(values);
        }

        Ok(QueryResult { columns, rows })
    }

    /// User tables, sorted by name.
    pub fn table_names(&self) -> Result<Vec<String>, String> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .map_err(|e| format!("Prepare error: {}", e))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| format!("Query error: {}", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Query error: {}", e))?;
        Ok(names)
    }

    /// The stored spelling of `table`, matched case-insensitively.
    pub fn find_table(&self, table: &str) -> Result<Option<String>, String> {
        Ok(self
            .table_names()?
            .into_iter()
            .find(|name| name.eq_ignore_ascii_case(table)))
    }

    pub fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, String> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(|e| format!("Prepare error: {}", e))?;
        let columns = stmt
            .query_map(params![table], |row| {
                let name: String = row.get(0)?;
                let decltype: String = row.get(1)?;
                Ok(ColumnInfo {
                    name,
                    type_name: decltype_to_sql_type(&decltype).to_string(),
                })
            })
            .map_err(|e| format!("Query error: {}", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("Query error: {}", e))?;
        Ok(columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_backend() -> SqliteBackend {
        let backend = SqliteBackend::new(":memory:").unwrap();
        backend
            .execute_batch(
                "CREATE TABLE test (a BIGINT, b BIGINT, c BIGINT);
                 INSERT INTO test VALUES (1, 2, 3), (4, 5, 6);",
            )
            .unwrap();
        backend
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    #[test]
    fn test_query_returns_rows_as_text() {
        let backend = new_backend();
        let result = backend.query("SELECT * FROM test ORDER BY a").unwrap();
        assert_eq!(result.columns, vec!["a", "b", "c"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0][0], Some("1".to_string()));
        assert_eq!(result.rows[1][2], Some("6".to_string()));
    }

    #[test]
    fn test_query_null_real_and_blob() {
        let backend = new_backend();
        let result = backend.query("SELECT NULL, 1.5, x'0aff'").unwrap();
        assert_eq!(result.rows[0], vec![None, Some("1.5".to_string()), Some("0aff".to_string())]);
    }

    #[test]
    fn test_query_unknown_column_message() {
        let backend = new_backend();
        let err = backend.query("SELECT d FROM test").unwrap_err();
        assert!(err.contains("no such column: d"), "{}", err);
    }

    // ========================================================================
    // CATALOG
    // ========================================================================

    #[test]
    fn test_table_names_sorted() {
        let backend = new_backend();
        backend.execute_batch("CREATE TABLE bort (a BIGINT)").unwrap();
        assert_eq!(backend.table_names().unwrap(), vec!["bort", "test"]);
    }

    #[test]
    fn test_find_table_ignores_case() {
        let backend = new_backend();
        assert_eq!(backend.find_table("TEST").unwrap(), Some("test".to_string()));
        assert_eq!(backend.find_table("missing").unwrap(), None);
    }

    #[test]
    fn test_table_columns_with_types() {
        let backend = new_backend();
        backend.execute_batch("CREATE TABLE typed (id INTEGER, name VARCHAR(255), ok BOOLEAN, x)").unwrap();
        let columns = backend.table_columns("typed").unwrap();
        let summary: Vec<(&str, &str)> = columns
            .iter()
            .map(|c| (c.name.as_str(), c.type_name.as_str()))
            .collect();
        assert_eq!(summary, vec![("id", "BIGINT"), ("name", "VARCHAR"), ("ok", "BOOLEAN"), ("x", "VARCHAR")]);
    }

    #[test]
    fn test_decltype_mapping() {
        assert_eq!(decltype_to_sql_type("bigint"), "BIGINT");
        assert_eq!(decltype_to_sql_type("DOUBLE PRECISION"), "DOUBLE");
        assert_eq!(decltype_to_sql_type("varchar(10)"), "VARCHAR");
        assert_eq!(decltype_to_sql_type(""), "VARCHAR");
    }
}
