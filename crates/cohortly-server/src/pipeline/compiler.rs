//! Incremental per-user stats compilation.
//!
//! A user's checkpoint remembers the newest event folded into every bucket.
//! Each run fetches only events newer than those cursors, folds them in and
//! re-projects the full field set.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde_json::json;
use tracing::{debug, info, warn};

use cohortly_core::actions::{self, ActionSource, SESSION};
use cohortly_core::bucket::{add_monthly_amount, is_after_cursor, DateBoundaries};
use cohortly_core::checkpoint::CheckpointSet;
use cohortly_core::dates;
use cohortly_core::external::PeopleSink;
use cohortly_core::model::{ActionEvent, Purchase, UserProfile, UserStats};
use cohortly_core::projection::{fields, project, ProjectionInput};
use cohortly_core::store::{RelatedRequest, StatsBackend};

/// Everything fetched for one user in one pass.
#[derive(Debug, Default, Clone)]
pub struct NewEvents {
    pub activities: Vec<ActionEvent>,
    pub imported: Vec<ActionEvent>,
    pub posts: Vec<DateTime<Utc>>,
    pub purchases: Vec<Purchase>,
}

/// Fold `events` into `checkpoint`.
///
/// Each event is compared with its bucket's `last_seen` as it stood before
/// this pass, so rows sharing a timestamp are all counted while rows at or
/// before the stored checkpoint are skipped. The global buckets follow
/// whatever the owning bucket accepted.
pub fn fold_events(checkpoint: &mut CheckpointSet, boundaries: &DateBoundaries, events: NewEvents) {
    let action_cursors: HashMap<&str, Option<DateTime<Utc>>> = actions::tracked_actions()
        .map(|spec| (spec.id, checkpoint.last_seen(spec.id)))
        .collect();
    let posts_cursor = checkpoint.posts.last_seen;
    let orders_cursor = checkpoint.orders.last_seen;

    for event in events.activities.iter().chain(events.imported.iter()) {
        let Some(cursor) = action_cursors.get(event.action.as_str()) else {
            continue;
        };
        if !is_after_cursor(event.at, *cursor) {
            continue;
        }
        checkpoint.action_mut(&event.action).record(boundaries, event.at);

        if event.action == SESSION.id {
            let seconds = event.session_seconds.unwrap_or(0.0);
            add_monthly_amount(
                &mut checkpoint.monthly_session_seconds,
                boundaries,
                event.at,
                seconds,
            );
        } else {
            checkpoint.global_incl_posts.record(boundaries, event.at);
            checkpoint.global_excl_posts.record(boundaries, event.at);
        }
    }

    for at in events.posts {
        if !is_after_cursor(at, posts_cursor) {
            continue;
        }
        checkpoint.posts.record(boundaries, at);
        checkpoint.global_incl_posts.record(boundaries, at);
    }

    for purchase in events.purchases {
        if !purchase.counts_toward_stats() || !is_after_cursor(purchase.created_at, orders_cursor) {
            continue;
        }
        checkpoint.orders.record(boundaries, purchase.created_at);
        add_monthly_amount(
            &mut checkpoint.monthly_bottles,
            boundaries,
            purchase.created_at,
            purchase.quantity,
        );
    }
}

/// Fetch everything newer than the checkpoint cursors. The four sources are
/// queried concurrently.
async fn fetch_new_events(
    store: &dyn StatsBackend,
    user_id: &str,
    checkpoint: &CheckpointSet,
) -> Result<NewEvents> {
    let activity_ids = actions::ids_from(ActionSource::Activity);
    let imported_ids = actions::ids_from(ActionSource::Imported);
    let activity_cursor = checkpoint.fetch_cursor(activity_ids.iter().copied());
    let imported_cursor = checkpoint.fetch_cursor(imported_ids.iter().copied());

    let (activities, imported, posts, purchases) = tokio::join!(
        store.activities_after(user_id, &activity_ids, activity_cursor),
        store.imported_events_after(user_id, &imported_ids, imported_cursor),
        store.posts_after(user_id, checkpoint.posts.last_seen),
        store.purchases_after(user_id, checkpoint.orders.last_seen),
    );
    Ok(NewEvents {
        activities: activities.context("activity fetch failed")?,
        imported: imported.context("imported event fetch failed")?,
        posts: posts.context("post fetch failed")?,
        purchases: purchases.context("purchase fetch failed")?,
    })
}

/// Compile one user and persist the result. `existing` is the user's current
/// stats row, if it has one.
pub async fn compile_user(
    store: &dyn StatsBackend,
    people: Option<&dyn PeopleSink>,
    user: &UserProfile,
    existing: Option<UserStats>,
) -> Result<UserStats> {
    let (stats_id, cohort, mut checkpoint) = match existing {
        Some(stats) => (stats.id, stats.cohort, stats.checkpoint),
        None => (
            uuid::Uuid::new_v4().to_string(),
            dates::cohort_week(user.created_at),
            CheckpointSet::new(),
        ),
    };

    let events = fetch_new_events(store, &user.id, &checkpoint)
        .await
        .with_context(|| format!("fetching events for user {}", user.id))?;
    let boundaries = DateBoundaries::from_signup(user.created_at);
    fold_events(&mut checkpoint, &boundaries, events);

    let fields = project(&ProjectionInput {
        user,
        cohort,
        checkpoint: &checkpoint,
    });
    let stats = UserStats {
        id: stats_id,
        user_id: user.id.clone(),
        cohort,
        fields,
        checkpoint,
    };
    store.save_user_stats(&stats).await?;
    store.finish_user_stats(&user.id, &stats.id).await?;

    if let (Some(sink), Some(people_id)) = (people, user.people_id.as_deref()) {
        let properties = json!({
            "user_id": user.id,
            "cohort": stats.cohort,
            "total_posts": stats.fields.int(fields::TOTAL_POSTS),
            "total_purchases": stats.fields.int(fields::TOTAL_PURCHASES),
        });
        if let Err(e) = sink.set_properties(people_id, properties).await {
            warn!(user_id = %user.id, error = %e, "People profile update failed");
        }
    }

    debug!(user_id = %user.id, cohort = stats.cohort, "User stats compiled");
    Ok(stats)
}

/// Compile every user that needs it, in batches of `batch_size`, stopping
/// after `limit` users when one is given. Returns the number compiled.
pub async fn compile_pending(
    store: &dyn StatsBackend,
    people: Option<&dyn PeopleSink>,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<usize> {
    let batch_size = batch_size.max(1);
    let mut compiled = 0;
    loop {
        let want = match limit {
            Some(limit) => limit.saturating_sub(compiled).min(batch_size),
            None => batch_size,
        };
        if want == 0 {
            break;
        }

        let users = store.users_needing_stats(want).await?;
        let stats_ids: Vec<String> = users.iter().filter_map(|u| u.stats_id.clone()).collect();
        let mut related = store
            .fetch_related(&[RelatedRequest::user_stats(stats_ids)])
            .await?;

        let mut work = Vec::with_capacity(users.len());
        for user in &users {
            let existing = match user.stats_id.as_deref() {
                Some(id) => match related.user_stats.remove(id) {
                    Some(stats) => Some(stats),
                    None => {
                        warn!(user_id = %user.id, stats_id = id, "Dangling stats reference cleared");
                        store.clear_user_stats_ref(&user.id).await?;
                        None
                    }
                },
                None => None,
            };
            work.push(compile_user(store, people, user, existing));
        }
        try_join_all(work).await?;

        compiled += users.len();
        info!(batch = users.len(), compiled, "User stats batch compiled");
        if users.len() < want {
            break;
        }
    }
    Ok(compiled)
}
