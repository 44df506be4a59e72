use anyhow::{anyhow, Result};
use chrono::NaiveDate;

use cohortly_core::dates;
use cohortly_core::model::{StoreCounts, UserProfile};
use cohortly_core::paging::Page;

use crate::backend::{from_epoch_ms, optional, ts_param};
use crate::DuckDbBackend;

pub(crate) const USER_COLUMNS: &str = "id, epoch_ms(created_at), username, email, email_verified, \
     CAST(date_of_birth AS VARCHAR), facebook_id, people_id, follower_count, following_count, \
     epoch_ms(last_notification_at), signup_source, stats_id, stats_need_update";

const ACTIVE: &str = "NOT blocked AND NOT deleted";

pub(crate) fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

pub(crate) fn map_user(row: &duckdb::Row<'_>) -> duckdb::Result<UserProfile> {
    let date_of_birth: Option<String> = row.get(5)?;
    let last_notification: Option<i64> = row.get(10)?;
    Ok(UserProfile {
        id: row.get(0)?,
        created_at: from_epoch_ms(row.get(1)?)?,
        username: row.get(2)?,
        email: row.get(3)?,
        email_verified: row.get(4)?,
        date_of_birth: date_of_birth
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
        facebook_id: row.get(6)?,
        people_id: row.get(7)?,
        follower_count: row.get(8)?,
        following_count: row.get(9)?,
        last_notification_at: last_notification.map(from_epoch_ms).transpose()?,
        signup_source: row.get(11)?,
        stats_id: row.get(12)?,
        stats_need_update: row.get(13)?,
    })
}

impl DuckDbBackend {
    /// Insert a user row and attach an empty stats row to it, the way user
    /// creation does.
    pub async fn create_user(&self, user: &UserProfile) -> Result<String> {
        {
            let conn = self.conn.lock().await;
            conn.execute(
                r#"INSERT INTO users (
                    id, created_at, username, email, email_verified, date_of_birth,
                    facebook_id, people_id, follower_count, following_count,
                    last_notification_at, signup_source, stats_need_update
                ) VALUES (?1, ?2, ?3, ?4, ?5, CAST(?6 AS DATE), ?7, ?8, ?9, ?10, ?11, ?12, TRUE)"#,
                duckdb::params![
                    user.id,
                    ts_param(&user.created_at),
                    user.username,
                    user.email,
                    user.email_verified,
                    user.date_of_birth.map(dates::format_day),
                    user.facebook_id,
                    user.people_id,
                    user.follower_count,
                    user.following_count,
                    user.last_notification_at.as_ref().map(ts_param),
                    user.signup_source,
                ],
            )?;
        }
        attach_empty_stats_inner(self, &user.id).await
    }

    /// Set the blocked/deleted state of a user.
    pub async fn set_user_state(&self, user_id: &str, blocked: bool, deleted: bool) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE users SET blocked = ?1, deleted = ?2 WHERE id = ?3",
            duckdb::params![blocked, deleted, user_id],
        )?;
        Ok(())
    }

    /// Flag one user for recompilation, as the app does whenever the user
    /// creates content.
    pub async fn mark_user_dirty(&self, user_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE users SET stats_need_update = TRUE WHERE id = ?1",
            duckdb::params![user_id],
        )?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        let mut stmt = conn.prepare(&sql)?;
        Ok(optional(stmt.query_row(duckdb::params![user_id], map_user))?)
    }
}

pub(crate) async fn users_needing_stats_inner(
    db: &DuckDbBackend,
    limit: usize,
) -> Result<Vec<UserProfile>> {
    let conn = db.conn.lock().await;
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users \
         WHERE {ACTIVE} AND (stats_need_update OR stats_id IS NULL) \
         ORDER BY created_at, id LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(duckdb::params![limit_param(limit)], map_user)?;
    let mut users = Vec::new();
    for row in rows {
        users.push(row?);
    }
    Ok(users)
}

pub(crate) async fn finish_user_stats_inner(
    db: &DuckDbBackend,
    user_id: &str,
    stats_id: &str,
) -> Result<()> {
    let conn = db.conn.lock().await;
    conn.execute(
        "UPDATE users SET stats_id = ?1, stats_need_update = FALSE WHERE id = ?2",
        duckdb::params![stats_id, user_id],
    )?;
    Ok(())
}

pub(crate) async fn clear_user_stats_ref_inner(db: &DuckDbBackend, user_id: &str) -> Result<()> {
    let conn = db.conn.lock().await;
    conn.execute(
        "UPDATE users SET stats_id = NULL WHERE id = ?1",
        duckdb::params![user_id],
    )?;
    Ok(())
}

/// Keyset page over users holding a stats reference, optionally restricted to
/// blocked or deleted ones.
pub(crate) async fn users_with_stats_inner(
    db: &DuckDbBackend,
    inactive_only: bool,
    after: Option<&str>,
    limit: usize,
) -> Result<Page<UserProfile>> {
    let conn = db.conn.lock().await;
    let state_filter = if inactive_only {
        " AND (blocked OR deleted)"
    } else {
        ""
    };
    let (sql, params): (String, Vec<Box<dyn duckdb::types::ToSql>>) = if let Some(after) = after {
        (
            format!(
                "SELECT {USER_COLUMNS} FROM users \
                 WHERE stats_id IS NOT NULL{state_filter} AND id > ?1 ORDER BY id LIMIT ?2"
            ),
            vec![
                Box::new(after.to_string()) as Box<dyn duckdb::types::ToSql>,
                Box::new(limit_param(limit)),
            ],
        )
    } else {
        (
            format!(
                "SELECT {USER_COLUMNS} FROM users \
                 WHERE stats_id IS NOT NULL{state_filter} ORDER BY id LIMIT ?1"
            ),
            vec![Box::new(limit_param(limit)) as Box<dyn duckdb::types::ToSql>],
        )
    };

    let param_refs: Vec<&dyn duckdb::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), map_user)?;
    let mut users = Vec::new();
    for row in rows {
        users.push(row?);
    }
    Ok(Page::from_rows(users, |u| u.id.clone()))
}

pub(crate) async fn mark_clean_users_dirty_inner(db: &DuckDbBackend, limit: usize) -> Result<usize> {
    let conn = db.conn.lock().await;
    let updated = conn.execute(
        &format!(
            "UPDATE users SET stats_need_update = TRUE WHERE id IN ( \
                 SELECT id FROM users \
                 WHERE {ACTIVE} AND stats_id IS NOT NULL AND NOT stats_need_update \
                 ORDER BY id LIMIT ?1)"
        ),
        duckdb::params![limit_param(limit)],
    )?;
    Ok(updated)
}

pub(crate) async fn attach_empty_stats_inner(db: &DuckDbBackend, user_id: &str) -> Result<String> {
    let mut conn = db.conn.lock().await;
    let tx = conn.transaction()?;
    let created_ms: i64 = optional(tx.query_row(
        "SELECT epoch_ms(created_at) FROM users WHERE id = ?1",
        duckdb::params![user_id],
        |row| row.get(0),
    ))?
    .ok_or_else(|| anyhow!("user {user_id} not found"))?;
    let cohort = dates::cohort_week(from_epoch_ms(created_ms)?);
    let stats_id = uuid::Uuid::new_v4().to_string();

    tx.execute(
        "INSERT INTO user_stats (id, user_id, cohort, fields, checkpoint) VALUES (?1, ?2, ?3, '{}', '{}')",
        duckdb::params![stats_id, user_id, cohort],
    )?;
    tx.execute(
        "UPDATE users SET stats_id = ?1, stats_need_update = TRUE WHERE id = ?2",
        duckdb::params![stats_id, user_id],
    )?;
    tx.commit()?;
    Ok(stats_id)
}

pub(crate) async fn counts_inner(db: &DuckDbBackend) -> Result<StoreCounts> {
    let conn = db.conn.lock().await;
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };
    Ok(StoreCounts {
        users: count(&format!("SELECT COUNT(*) FROM users WHERE {ACTIVE}"))?,
        users_needing_update: count(&format!(
            "SELECT COUNT(*) FROM users WHERE {ACTIVE} AND (stats_need_update OR stats_id IS NULL)"
        ))?,
        user_stats: count("SELECT COUNT(*) FROM user_stats")?,
        cohorts: count("SELECT COUNT(*) FROM cohort_stats")?,
    })
}
