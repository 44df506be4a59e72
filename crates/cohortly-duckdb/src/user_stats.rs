use anyhow::{Context, Result};

use cohortly_core::checkpoint::CheckpointSet;
use cohortly_core::model::UserStats;
use cohortly_core::paging::Page;
use cohortly_core::projection::StatsFields;

use crate::users::limit_param;
use crate::DuckDbBackend;

const STATS_COLUMNS: &str = "id, user_id, cohort, fields, checkpoint";

type RawStats = (String, String, i64, String, String);

fn map_raw(row: &duckdb::Row<'_>) -> duckdb::Result<RawStats> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode((id, user_id, cohort, fields, checkpoint): RawStats) -> Result<UserStats> {
    let fields: StatsFields = serde_json::from_str(&fields)
        .with_context(|| format!("user_stats {id}: bad fields json"))?;
    let checkpoint = CheckpointSet::from_json(&checkpoint)
        .with_context(|| format!("user_stats {id}: bad checkpoint"))?;
    Ok(UserStats {
        id,
        user_id,
        cohort,
        fields,
        checkpoint,
    })
}

pub(crate) async fn save_user_stats_inner(db: &DuckDbBackend, stats: &UserStats) -> Result<()> {
    let fields = serde_json::to_string(&stats.fields)?;
    let checkpoint = stats.checkpoint.to_json()?;
    let conn = db.conn.lock().await;
    conn.execute(
        r#"INSERT INTO user_stats (id, user_id, cohort, fields, checkpoint, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, CURRENT_TIMESTAMP)
           ON CONFLICT (id) DO UPDATE SET
               user_id = EXCLUDED.user_id,
               cohort = EXCLUDED.cohort,
               fields = EXCLUDED.fields,
               checkpoint = EXCLUDED.checkpoint,
               updated_at = EXCLUDED.updated_at"#,
        duckdb::params![stats.id, stats.user_id, stats.cohort, fields, checkpoint],
    )?;
    Ok(())
}

pub(crate) async fn delete_user_stats_inner(db: &DuckDbBackend, stats_id: &str) -> Result<bool> {
    let conn = db.conn.lock().await;
    let deleted = conn.execute("DELETE FROM user_stats WHERE id = ?1", duckdb::params![stats_id])?;
    Ok(deleted > 0)
}

pub(crate) async fn delete_user_stats_batch_inner(db: &DuckDbBackend, limit: usize) -> Result<usize> {
    let conn = db.conn.lock().await;
    let deleted = conn.execute(
        "DELETE FROM user_stats WHERE id IN (SELECT id FROM user_stats ORDER BY id LIMIT ?1)",
        duckdb::params![limit_param(limit)],
    )?;
    Ok(deleted)
}

pub(crate) async fn user_stats_page_inner(
    db: &DuckDbBackend,
    cohort: i64,
    after: Option<&str>,
    limit: usize,
) -> Result<Page<UserStats>> {
    let raw = {
        let conn = db.conn.lock().await;
        let (sql, params): (String, Vec<Box<dyn duckdb::types::ToSql>>) = if let Some(after) = after
        {
            (
                format!(
                    "SELECT {STATS_COLUMNS} FROM user_stats \
                     WHERE cohort = ?1 AND user_id > ?2 ORDER BY user_id LIMIT ?3"
                ),
                vec![
                    Box::new(cohort) as Box<dyn duckdb::types::ToSql>,
                    Box::new(after.to_string()),
                    Box::new(limit_param(limit)),
                ],
            )
        } else {
            (
                format!(
                    "SELECT {STATS_COLUMNS} FROM user_stats \
                     WHERE cohort = ?1 ORDER BY user_id LIMIT ?2"
                ),
                vec![
                    Box::new(cohort) as Box<dyn duckdb::types::ToSql>,
                    Box::new(limit_param(limit)),
                ],
            )
        };
        let param_refs: Vec<&dyn duckdb::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), map_raw)?;
        let mut raw = Vec::new();
        for row in rows {
            raw.push(row?);
        }
        raw
    };

    let stats = raw.into_iter().map(decode).collect::<Result<Vec<_>>>()?;
    Ok(Page::from_rows(stats, |s| s.user_id.clone()))
}

pub(crate) async fn user_stats_by_ids(db: &DuckDbBackend, ids: &[String]) -> Result<Vec<UserStats>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let raw = {
        let conn = db.conn.lock().await;
        let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT {STATS_COLUMNS} FROM user_stats WHERE id IN ({})",
            placeholders.join(", ")
        );
        let param_refs: Vec<&dyn duckdb::types::ToSql> =
            ids.iter().map(|id| id as &dyn duckdb::types::ToSql).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), map_raw)?;
        let mut raw = Vec::new();
        for row in rows {
            raw.push(row?);
        }
        raw
    };
    raw.into_iter().map(decode).collect()
}
