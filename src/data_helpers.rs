use crate::db;

/// Read a JSON value cached in `local_settings` (category `cache`).
/// Malformed or missing entries read as `Null`, never as an error surfaced
/// to the page.
pub(crate) fn read_local_json(db: &db::DbState, key: &str) -> Result<serde_json::Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let raw = db::get_setting(&conn, "cache", key);
    if let Some(raw) = raw {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&raw) {
            return Ok(parsed);
        }
    }
    Ok(serde_json::Value::Null)
}

/// Read a cached JSON array; anything that is not an array reads as empty.
pub(crate) fn read_local_json_array(
    db: &db::DbState,
    key: &str,
) -> Result<Vec<serde_json::Value>, String> {
    let parsed = read_local_json(db, key)?;
    Ok(parsed.as_array().cloned().unwrap_or_default())
}

/// Cache a JSON value in `local_settings` (category `cache`).
pub(crate) fn write_local_json(
    db: &db::DbState,
    key: &str,
    value: &serde_json::Value,
) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    db::set_setting(&conn, "cache", key, &value.to_string())
}

/// Keep only the digits of a phone number.
pub(crate) fn normalize_phone(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbState;
    use rusqlite::Connection;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    #[test]
    fn json_cache_roundtrip() {
        let db = test_db();
        let value = serde_json::json!([{"id": 1}, {"id": 2}]);
        write_local_json(&db, "users", &value).expect("write");
        assert_eq!(read_local_json(&db, "users").expect("read"), value);
        assert_eq!(read_local_json_array(&db, "users").expect("read").len(), 2);
    }

    #[test]
    fn missing_or_malformed_cache_reads_as_empty() {
        let db = test_db();
        assert!(read_local_json(&db, "absent").expect("read").is_null());
        assert!(read_local_json_array(&db, "absent").expect("read").is_empty());

        // Write junk straight into the settings table
        {
            let conn = db.conn.lock().expect("lock");
            crate::db::set_setting(&conn, "cache", "users", "{broken").expect("set");
        }
        assert!(read_local_json(&db, "users").expect("read").is_null());
        assert!(read_local_json_array(&db, "users").expect("read").is_empty());
    }

    #[test]
    fn normalize_phone_strips_formatting() {
        assert_eq!(normalize_phone("+63 (917) 555-0123"), "639175550123");
        assert_eq!(normalize_phone("no digits"), "");
    }
}
