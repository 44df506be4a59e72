use chrono::{DateTime, Duration, TimeZone, Utc};

use cohortly_core::checkpoint::CheckpointSet;
use cohortly_core::cohort::CohortAccumulator;
use cohortly_core::dates;
use cohortly_core::model::{CohortStats, ExternalField, UserProfile, UserStats};
use cohortly_core::projection::{FieldValue, StatsFields};
use cohortly_core::store::{RelatedRequest, StatsBackend};
use cohortly_duckdb::DuckDbBackend;

fn user(id: &str, created_at: DateTime<Utc>) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        created_at,
        username: None,
        email: Some(format!("{id}@example.com")),
        email_verified: true,
        date_of_birth: chrono::NaiveDate::from_ymd_opt(1988, 7, 14),
        facebook_id: None,
        people_id: Some(format!("people-{id}")),
        follower_count: Some(12),
        following_count: Some(4),
        last_notification_at: None,
        signup_source: Some("web".to_string()),
        stats_id: None,
        stats_need_update: true,
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 5, 6, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn created_user_gets_empty_stats_row() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    let stats_id = db.create_user(&user("u1", base())).await.unwrap();

    let stored = db.get_user("u1").await.unwrap().expect("user row");
    assert_eq!(stored.stats_id.as_deref(), Some(stats_id.as_str()));
    assert!(stored.stats_need_update);
    assert_eq!(stored.date_of_birth, chrono::NaiveDate::from_ymd_opt(1988, 7, 14));
    assert_eq!(stored.created_at, base());

    let related = db
        .fetch_related(&[RelatedRequest::user_stats([stats_id.clone()])])
        .await
        .unwrap();
    let row = &related.user_stats[&stats_id];
    assert_eq!(row.cohort, dates::cohort_week(base()));
    assert_eq!(row.checkpoint, CheckpointSet::new());
}

#[tokio::test]
async fn selection_skips_blocked_and_clean_users() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        db.create_user(&user(id, base() + Duration::minutes(i as i64)))
            .await
            .unwrap();
    }
    db.set_user_state("b", true, false).await.unwrap();
    let c = db.get_user("c").await.unwrap().unwrap();
    db.finish_user_stats("c", c.stats_id.as_deref().unwrap())
        .await
        .unwrap();

    let pending: Vec<String> = db
        .users_needing_stats(10)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(pending, vec!["a".to_string()]);

    let inactive = db.inactive_users_with_stats(None, 10).await.unwrap();
    assert_eq!(inactive.rows.len(), 1);
    assert_eq!(inactive.rows[0].id, "b");

    let counts = db.counts().await.unwrap();
    assert_eq!(counts.users, 2);
    assert_eq!(counts.users_needing_update, 1);
    assert_eq!(counts.user_stats, 3);
}

#[tokio::test]
async fn mark_dirty_is_bounded_per_call() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    for i in 0..5 {
        let id = format!("u{i}");
        let stats_id = db.create_user(&user(&id, base())).await.unwrap();
        db.finish_user_stats(&id, &stats_id).await.unwrap();
    }
    assert_eq!(db.mark_clean_users_dirty(3).await.unwrap(), 3);
    assert_eq!(db.mark_clean_users_dirty(3).await.unwrap(), 2);
    assert_eq!(db.mark_clean_users_dirty(3).await.unwrap(), 0);
}

#[tokio::test]
async fn user_stats_page_is_ordered_by_user() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    for id in ["u3", "u1", "u2"] {
        let stats = UserStats {
            id: format!("s-{id}"),
            user_id: id.to_string(),
            cohort: 7,
            fields: StatsFields(
                [("cohort".to_string(), FieldValue::Int(7))].into_iter().collect(),
            ),
            checkpoint: CheckpointSet::new(),
        };
        db.save_user_stats(&stats).await.unwrap();
    }

    let first = db.user_stats_page(7, None, 2).await.unwrap();
    let ids: Vec<_> = first.rows.iter().map(|s| s.user_id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "u2"]);
    assert_eq!(first.next.as_deref(), Some("u2"));

    let rest = db.user_stats_page(7, first.next.as_deref(), 2).await.unwrap();
    assert_eq!(rest.rows.len(), 1);
    assert_eq!(rest.rows[0].fields.int("cohort"), 7);
    assert!(db.user_stats_page(8, None, 2).await.unwrap().rows.is_empty());
}

#[tokio::test]
async fn cohort_record_round_trips_with_funnels() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    let mut stats = CohortStats::new(42);
    stats.user = Some(CohortAccumulator::new().finish());
    stats.external.downloads = Some(310);
    stats.external.funnels.insert(
        "referrer".to_string(),
        [("signups".to_string(), 40), ("invite_friends_complete".to_string(), 3)]
            .into_iter()
            .collect(),
    );
    db.save_cohort_stats(&stats).await.unwrap();

    let loaded = db.cohort_stats(42).await.unwrap().expect("row");
    assert_eq!(loaded, stats);

    stats.external.funnels.clear();
    stats.external.ad_spend = Some(12.5);
    db.save_cohort_stats(&stats).await.unwrap();
    let loaded = db.cohort_stats(42).await.unwrap().expect("row");
    assert!(loaded.external.funnels.is_empty());
    assert_eq!(loaded.external.ad_spend, Some(12.5));

    assert_eq!(db.count_cohorts_with(&ExternalField::Downloads).await.unwrap(), 1);
    assert_eq!(db.count_cohorts_with(&ExternalField::AdInstalls).await.unwrap(), 0);
    assert_eq!(
        db.count_cohorts_with(&ExternalField::Funnel("referrer".to_string()))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn settings_upsert() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    assert_eq!(StatsBackend::get_setting(&db, "ads_access_token").await.unwrap(), None);
    StatsBackend::set_setting(&db, "ads_access_token", "t1").await.unwrap();
    StatsBackend::set_setting(&db, "ads_access_token", "t2").await.unwrap();
    assert_eq!(
        StatsBackend::get_setting(&db, "ads_access_token").await.unwrap().as_deref(),
        Some("t2")
    );
}
