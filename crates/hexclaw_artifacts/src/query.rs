//! SQL over parquet artifacts via an in-memory DuckDB connection.
//!
//! Each call opens a fresh connection - parquet files on disk are the
//! source of truth, DuckDB is stateless query machinery on top.

use duckdb::types::ValueRef;
use duckdb::Connection;
use serde_json::Value;
use std::path::Path;

use crate::error::Result;
use crate::records::Record;

/// Run `sql` against a single parquet file exposed as view `data`.
/// `None` sql means select-all.
pub fn query_parquet(path: &Path, sql: Option<&str>) -> Result<Vec<Record>> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(&format!(
        "CREATE VIEW data AS SELECT * FROM '{}'",
        escape_path(path)
    ))?;
    run_query(&conn, sql.unwrap_or("SELECT * FROM data"))
}

/// Run `sql` against the union of all parquet files matching `glob`,
/// exposed as view `data`.
pub fn query_parquet_glob(glob: &str, sql: &str) -> Result<Vec<Record>> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(&format!(
        "CREATE VIEW data AS SELECT * FROM read_parquet('{}')",
        glob.replace('\'', "''")
    ))?;
    run_query(&conn, sql)
}

fn run_query(conn: &Connection, sql: &str) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows_iter = stmt.query([])?;

    let (column_count, columns) = match rows_iter.as_ref() {
        Some(stmt_ref) => {
            let count = stmt_ref.column_count();
            let names: Vec<String> = (0..count)
                .map(|i| {
                    stmt_ref
                        .column_name(i)
                        .map(|s| s.to_string())
                        .unwrap_or_else(|_| format!("col{}", i))
                })
                .collect();
            (count, names)
        }
        None => return Ok(Vec::new()),
    };

    let mut records = Vec::new();
    while let Some(row) = rows_iter.next()? {
        let mut record = Record::new();
        for i in 0..column_count {
            record.insert(columns[i].clone(), value_ref_to_json(row.get_ref(i)?));
        }
        records.push(record);
    }
    Ok(records)
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(v) => Value::from(v),
        ValueRef::TinyInt(v) => Value::from(v as i64),
        ValueRef::SmallInt(v) => Value::from(v as i64),
        ValueRef::Int(v) => Value::from(v as i64),
        ValueRef::BigInt(v) => Value::from(v),
        ValueRef::HugeInt(v) => Value::from(v as i64),
        ValueRef::UTinyInt(v) => Value::from(v as i64),
        ValueRef::USmallInt(v) => Value::from(v as i64),
        ValueRef::UInt(v) => Value::from(v as i64),
        ValueRef::UBigInt(v) => Value::from(v as i64),
        ValueRef::Float(v) => Value::from(v as f64),
        ValueRef::Double(v) => Value::from(v),
        ValueRef::Text(v) => Value::from(String::from_utf8_lossy(v).to_string()),
        ValueRef::Blob(v) => Value::from(format!("<{} bytes>", v.len())),
        other => Value::from(format!("{:?}", other)),
    }
}

pub(crate) fn escape_path(path: &Path) -> String {
    path.display().to_string().replace('\'', "''")
}
