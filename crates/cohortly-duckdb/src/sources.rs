//! Incremental reads of the four event sources.
//!
//! Cursors compare on `epoch_ms(...)` so the strict `>` bound is exact to the
//! millisecond, which is the precision checkpoints are stored at.

use anyhow::Result;
use chrono::{DateTime, Utc};

use cohortly_core::model::{ActionEvent, Purchase};

use crate::backend::{from_epoch_ms, ts_param};
use crate::DuckDbBackend;

type Params = Vec<Box<dyn duckdb::types::ToSql>>;

/// Appends `AND <column> IN (...)` and the optional cursor bound to `sql`.
fn push_filters(
    sql: &mut String,
    params: &mut Params,
    name_column: Option<(&str, &[&str])>,
    time_column: &str,
    after: Option<DateTime<Utc>>,
) {
    if let Some((column, names)) = name_column {
        let placeholders: Vec<String> = names
            .iter()
            .map(|name| {
                params.push(Box::new(name.to_string()));
                format!("?{}", params.len())
            })
            .collect();
        sql.push_str(&format!(" AND {column} IN ({})", placeholders.join(", ")));
    }
    if let Some(after) = after {
        params.push(Box::new(after.timestamp_millis()));
        sql.push_str(&format!(" AND epoch_ms({time_column}) > ?{}", params.len()));
    }
}

pub(crate) async fn activities_after_inner(
    db: &DuckDbBackend,
    user_id: &str,
    actions: &[&str],
    after: Option<DateTime<Utc>>,
) -> Result<Vec<ActionEvent>> {
    if actions.is_empty() {
        return Ok(Vec::new());
    }
    let conn = db.conn.lock().await;
    let mut sql = "SELECT activity_type, epoch_ms(created_at) FROM activities \
                   WHERE from_user = ?1 AND NOT deleted"
        .to_string();
    let mut params: Params = vec![Box::new(user_id.to_string())];
    push_filters(&mut sql, &mut params, Some(("activity_type", actions)), "created_at", after);
    sql.push_str(" ORDER BY created_at, id");

    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(ActionEvent {
            action: row.get(0)?,
            at: from_epoch_ms(row.get(1)?)?,
            session_seconds: None,
        })
    })?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

pub(crate) async fn imported_events_after_inner(
    db: &DuckDbBackend,
    user_id: &str,
    names: &[&str],
    after: Option<DateTime<Utc>>,
) -> Result<Vec<ActionEvent>> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let conn = db.conn.lock().await;
    let mut sql = "SELECT event, epoch_ms(occurred_at), session_seconds FROM imported_events \
                   WHERE user_id = ?1"
        .to_string();
    let mut params: Params = vec![Box::new(user_id.to_string())];
    push_filters(&mut sql, &mut params, Some(("event", names)), "occurred_at", after);
    sql.push_str(" ORDER BY occurred_at, id");

    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(ActionEvent {
            action: row.get(0)?,
            at: from_epoch_ms(row.get(1)?)?,
            session_seconds: row.get(2)?,
        })
    })?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

pub(crate) async fn posts_after_inner(
    db: &DuckDbBackend,
    user_id: &str,
    after: Option<DateTime<Utc>>,
) -> Result<Vec<DateTime<Utc>>> {
    let conn = db.conn.lock().await;
    let mut sql = "SELECT epoch_ms(created_at) FROM posts WHERE owner = ?1 AND NOT deleted".to_string();
    let mut params: Params = vec![Box::new(user_id.to_string())];
    push_filters(&mut sql, &mut params, None, "created_at", after);
    sql.push_str(" ORDER BY created_at, id");

    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| from_epoch_ms(row.get(0)?))?;
    let mut dates = Vec::new();
    for row in rows {
        dates.push(row?);
    }
    Ok(dates)
}

pub(crate) async fn purchases_after_inner(
    db: &DuckDbBackend,
    user_id: &str,
    after: Option<DateTime<Utc>>,
) -> Result<Vec<Purchase>> {
    let conn = db.conn.lock().await;
    let mut sql = "SELECT epoch_ms(created_at), status, quantity FROM purchases \
                   WHERE user_id = ?1 AND NOT deleted"
        .to_string();
    let mut params: Params = vec![Box::new(user_id.to_string())];
    push_filters(&mut sql, &mut params, None, "created_at", after);
    sql.push_str(" ORDER BY created_at, id");

    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), |row| {
        Ok(Purchase {
            created_at: from_epoch_ms(row.get(0)?)?,
            status: row.get(1)?,
            quantity: row.get(2)?,
        })
    })?;
    let mut purchases = Vec::new();
    for row in rows {
        purchases.push(row?);
    }
    Ok(purchases)
}

/// Writers for the source tables. In production these are filled by the app
/// and the import job; the pipeline only reads them.
impl DuckDbBackend {
    pub async fn insert_activity(
        &self,
        id: &str,
        user_id: &str,
        activity_type: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO activities (id, from_user, activity_type, created_at) VALUES (?1, ?2, ?3, ?4)",
            duckdb::params![id, user_id, activity_type, ts_param(&at)],
        )?;
        Ok(())
    }

    pub async fn insert_imported_event(
        &self,
        id: &str,
        user_id: &str,
        event: &str,
        at: DateTime<Utc>,
        session_seconds: Option<f64>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO imported_events (id, user_id, event, session_seconds, occurred_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            duckdb::params![id, user_id, event, session_seconds, ts_param(&at)],
        )?;
        Ok(())
    }

    pub async fn insert_post(&self, id: &str, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO posts (id, owner, created_at) VALUES (?1, ?2, ?3)",
            duckdb::params![id, user_id, ts_param(&at)],
        )?;
        Ok(())
    }

    pub async fn insert_purchase(
        &self,
        id: &str,
        user_id: &str,
        at: DateTime<Utc>,
        status: Option<&str>,
        quantity: i64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO purchases (id, user_id, status, quantity, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            duckdb::params![id, user_id, status, quantity, ts_param(&at)],
        )?;
        Ok(())
    }
}
