//! `loader.source_database` persistence (spec §3 SourceDatabase).

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};

#[derive(Debug, Clone, PartialEq)]
pub struct SourceDatabase {
    pub db_code: String,
    pub db_type: String,
    pub ip: String,
    pub port: i32,
    pub db_name: String,
    pub user_name: String,
    pub pass_word_encrypted: String,
}

impl SourceDatabase {
    /// Cheap fingerprint of the connection-relevant fields, used by
    /// [`crate::sourcepool`] to detect when a pool needs rebuilding because
    /// the admin changed the underlying connection parameters.
    pub fn checksum(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.db_type.hash(&mut hasher);
        self.ip.hash(&mut hasher);
        self.port.hash(&mut hasher);
        self.db_name.hash(&mut hasher);
        self.user_name.hash(&mut hasher);
        self.pass_word_encrypted.hash(&mut hasher);
        hasher.finish()
    }
}

pub async fn fetch_by_code(pool: &PgPool, db_code: &str) -> Result<Option<SourceDatabase>> {
    let row = sqlx::query(
        r#"
        select db_code, db_type, ip, port, db_name, user_name, pass_word
        from loader.source_database
        where db_code = $1
        "#,
    )
    .bind(db_code)
    .fetch_optional(pool)
    .await
    .context("sourcedb::fetch_by_code failed")?;

    let Some(row) = row else { return Ok(None) };

    Ok(Some(SourceDatabase {
        db_code: row.try_get("db_code")?,
        db_type: row.try_get("db_type")?,
        ip: row.try_get("ip")?,
        port: row.try_get("port")?,
        db_name: row.try_get("db_name")?,
        user_name: row.try_get("user_name")?,
        pass_word_encrypted: row.try_get("pass_word")?,
    }))
}
