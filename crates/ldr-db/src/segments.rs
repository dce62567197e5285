//! `loader.segment_dictionary` persistence (spec §4.6 step 4, C7).
//!
//! Implements [`ldr_transform::SegmentDictionary`] so the transformer never
//! depends on this crate's database types directly.

use anyhow::{Context, Result};
use ldr_schemas::SegmentKey;
use ldr_transform::SegmentDictionary;
use sqlx::{PgPool, Row};

pub struct PgSegmentDictionary {
    pool: PgPool,
}

impl PgSegmentDictionary {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Insert-with-fallback-select, the same idempotent-enqueue shape as an
/// outbox insert (`insert ... on conflict do nothing returning ...`): the
/// unique index on the 10-tuple guarantees at most one row is ever inserted
/// per tuple, so a losing concurrent caller simply re-reads the winner's
/// code instead of erroring.
async fn get_or_create_code(pool: &PgPool, loader_code: &str, key: &SegmentKey) -> Result<i64> {
    let seg = key.as_array();

    let inserted: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into loader.segment_dictionary
            (loader_code, seg1, seg2, seg3, seg4, seg5, seg6, seg7, seg8, seg9, seg10, segment_code)
        select $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
               coalesce(
                   (select max(segment_code) from loader.segment_dictionary where loader_code = $1),
                   0
               ) + 1
        where not exists (
            select 1 from loader.segment_dictionary
            where loader_code = $1
              and coalesce(seg1, '\0') = coalesce($2, '\0')
              and coalesce(seg2, '\0') = coalesce($3, '\0')
              and coalesce(seg3, '\0') = coalesce($4, '\0')
              and coalesce(seg4, '\0') = coalesce($5, '\0')
              and coalesce(seg5, '\0') = coalesce($6, '\0')
              and coalesce(seg6, '\0') = coalesce($7, '\0')
              and coalesce(seg7, '\0') = coalesce($8, '\0')
              and coalesce(seg8, '\0') = coalesce($9, '\0')
              and coalesce(seg9, '\0') = coalesce($10, '\0')
              and coalesce(seg10, '\0') = coalesce($11, '\0')
        )
        on conflict on constraint uq_segment_dictionary_tuple do nothing
        returning segment_code
        "#,
    )
    .bind(loader_code)
    .bind(seg[0])
    .bind(seg[1])
    .bind(seg[2])
    .bind(seg[3])
    .bind(seg[4])
    .bind(seg[5])
    .bind(seg[6])
    .bind(seg[7])
    .bind(seg[8])
    .bind(seg[9])
    .fetch_optional(pool)
    .await
    .context("segment_dictionary insert failed")?;

    if let Some((code,)) = inserted {
        return Ok(code);
    }

    // Someone else won the race (or the tuple already existed) — read back
    // the code that insert would have reused. The winner may not have
    // committed yet, so retry briefly rather than erroring on a transient
    // "not found".
    for attempt in 0..5 {
        if let Some(code) = fetch_existing_code(pool, loader_code, &seg).await? {
            return Ok(code);
        }
        tokio::time::sleep(std::time::Duration::from_millis(10 * (attempt + 1))).await;
    }

    fetch_existing_code(pool, loader_code, &seg)
        .await?
        .context("segment_dictionary: tuple vanished after losing insert race")
}

async fn fetch_existing_code(
    pool: &PgPool,
    loader_code: &str,
    seg: &[Option<&str>; 10],
) -> Result<Option<i64>> {
    let row = sqlx::query(
        r#"
        select segment_code from loader.segment_dictionary
        where loader_code = $1
          and coalesce(seg1, '\0') = coalesce($2, '\0')
          and coalesce(seg2, '\0') = coalesce($3, '\0')
          and coalesce(seg3, '\0') = coalesce($4, '\0')
          and coalesce(seg4, '\0') = coalesce($5, '\0')
          and coalesce(seg5, '\0') = coalesce($6, '\0')
          and coalesce(seg6, '\0') = coalesce($7, '\0')
          and coalesce(seg7, '\0') = coalesce($8, '\0')
          and coalesce(seg8, '\0') = coalesce($9, '\0')
          and coalesce(seg9, '\0') = coalesce($10, '\0')
          and coalesce(seg10, '\0') = coalesce($11, '\0')
        "#,
    )
    .bind(loader_code)
    .bind(seg[0])
    .bind(seg[1])
    .bind(seg[2])
    .bind(seg[3])
    .bind(seg[4])
    .bind(seg[5])
    .bind(seg[6])
    .bind(seg[7])
    .bind(seg[8])
    .bind(seg[9])
    .fetch_optional(pool)
    .await
    .context("segment_dictionary fallback select failed")?;

    row.map(|r| r.try_get::<i64, _>("segment_code")).transpose().map_err(Into::into)
}

#[async_trait::async_trait]
impl SegmentDictionary for PgSegmentDictionary {
    async fn get_or_create_code(&self, loader_code: &str, key: &SegmentKey) -> Result<i64> {
        get_or_create_code(&self.pool, loader_code, key).await
    }
}
