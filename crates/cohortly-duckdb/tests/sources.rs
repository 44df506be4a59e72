use chrono::{DateTime, Duration, TimeZone, Utc};

use cohortly_core::model::UserProfile;
use cohortly_core::store::StatsBackend;
use cohortly_duckdb::DuckDbBackend;

fn signup() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 2, 3, 10, 0, 0).unwrap()
}

fn user(id: &str) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        created_at: signup(),
        username: Some(id.to_string()),
        email: None,
        email_verified: false,
        date_of_birth: None,
        facebook_id: None,
        people_id: None,
        follower_count: None,
        following_count: None,
        last_notification_at: None,
        signup_source: None,
        stats_id: None,
        stats_need_update: true,
    }
}

#[tokio::test]
async fn activity_cursor_is_strictly_exclusive() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    db.create_user(&user("u1")).await.expect("user");

    let checkpoint = signup() + Duration::days(2) + Duration::milliseconds(250);
    db.insert_activity("a1", "u1", "comment", signup() + Duration::days(1))
        .await
        .unwrap();
    db.insert_activity("a2", "u1", "comment", checkpoint).await.unwrap();
    db.insert_activity("a3", "u1", "comment", checkpoint + Duration::milliseconds(1))
        .await
        .unwrap();
    db.insert_activity("a4", "u1", "unrelated", checkpoint + Duration::days(1))
        .await
        .unwrap();

    let all = db
        .activities_after("u1", &["comment", "followgroup"], None)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].at <= w[1].at));

    let newer = db
        .activities_after("u1", &["comment"], Some(checkpoint))
        .await
        .unwrap();
    assert_eq!(newer.len(), 1, "event at the checkpoint itself must be excluded");
    assert_eq!(newer[0].at, checkpoint + Duration::milliseconds(1));
}

#[tokio::test]
async fn deleted_activities_and_posts_are_skipped() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    db.create_user(&user("u1")).await.unwrap();
    db.insert_activity("a1", "u1", "comment", signup()).await.unwrap();
    db.insert_post("p1", "u1", signup()).await.unwrap();
    db.insert_post("p2", "u1", signup() + Duration::hours(1)).await.unwrap();
    {
        let conn = db.conn_for_test().await;
        conn.execute("UPDATE activities SET deleted = TRUE WHERE id = 'a1'", [])
            .unwrap();
        conn.execute("UPDATE posts SET deleted = TRUE WHERE id = 'p1'", [])
            .unwrap();
    }

    assert!(db.activities_after("u1", &["comment"], None).await.unwrap().is_empty());
    let posts = db.posts_after("u1", None).await.unwrap();
    assert_eq!(posts, vec![signup() + Duration::hours(1)]);
}

#[tokio::test]
async fn imported_events_carry_session_seconds() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    db.insert_imported_event("e1", "u1", "Session", signup(), Some(95.5))
        .await
        .unwrap();
    db.insert_imported_event("e2", "u1", "Wine log sorted", signup() + Duration::minutes(1), None)
        .await
        .unwrap();
    db.insert_imported_event("e3", "u2", "Session", signup(), Some(10.0))
        .await
        .unwrap();

    let events = db
        .imported_events_after("u1", &["Session", "Wine log sorted"], None)
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].action, "Session");
    assert_eq!(events[0].session_seconds, Some(95.5));
    assert_eq!(events[1].session_seconds, None);
}

#[tokio::test]
async fn purchases_expose_status_and_quantity() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    db.insert_purchase("o1", "u1", signup(), Some("completed"), 6)
        .await
        .unwrap();
    db.insert_purchase("o2", "u1", signup() + Duration::days(3), None, 2)
        .await
        .unwrap();

    let after_first = db.purchases_after("u1", Some(signup())).await.unwrap();
    assert_eq!(after_first.len(), 1);
    assert_eq!(after_first[0].quantity, 2);
    assert_eq!(after_first[0].status, None);

    let all = db.purchases_after("u1", None).await.unwrap();
    assert_eq!(all[0].status.as_deref(), Some("completed"));
}

#[tokio::test]
async fn rows_sharing_a_timestamp_are_all_returned() {
    let db = DuckDbBackend::open_in_memory().expect("open");
    db.create_user(&user("u1")).await.unwrap();
    let at = signup() + Duration::hours(6);
    db.insert_post("p1", "u1", at).await.unwrap();
    db.insert_post("p2", "u1", at).await.unwrap();
    db.insert_activity("a1", "u1", "comment", at).await.unwrap();
    db.insert_activity("a2", "u1", "comment", at).await.unwrap();

    assert_eq!(db.posts_after("u1", None).await.unwrap(), vec![at, at]);
    assert_eq!(
        db.posts_after("u1", Some(at - Duration::milliseconds(1)))
            .await
            .unwrap()
            .len(),
        2
    );
    assert!(db.posts_after("u1", Some(at)).await.unwrap().is_empty());
    assert_eq!(
        db.activities_after("u1", &["comment"], None).await.unwrap().len(),
        2
    );
}
