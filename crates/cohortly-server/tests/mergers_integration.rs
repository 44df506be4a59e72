use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use tokio::sync::Notify;

use cohortly_core::config::{Config, AD_TOKEN_SETTING, DEFAULT_DIRTY_BATCH_SIZE, DEFAULT_USER_BATCH_SIZE};
use cohortly_core::external::{
    AdReportApi, AdReportPage, AdReportRow, DownloadReportApi, FunnelApi, PeopleSink,
};
use cohortly_core::model::UserProfile;
use cohortly_core::store::StatsBackend;
use cohortly_duckdb::DuckDbBackend;
use cohortly_server::external::ExternalApis;
use cohortly_server::pipeline::{JobKind, JobStatus, Orchestrator};

fn test_config() -> Config {
    Config {
        port: 0,
        data_dir: "/tmp/cohortly-test".to_string(),
        duckdb_memory_limit: "256MB".to_string(),
        user_batch_size: DEFAULT_USER_BATCH_SIZE,
        dirty_batch_size: DEFAULT_DIRTY_BATCH_SIZE,
        schedule_enabled: false,
        schedule_interval_secs: 86_400,
        ad_poll_interval_ms: 1,
        http_timeout_secs: 5,
        funnels: None,
        downloads: None,
        ads: None,
        people: None,
    }
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Wednesday of cohort week 3.
fn today() -> NaiveDate {
    day(2013, 6, 26)
}

/// Returns `[week_start_day, 7]` so each week's counts identify the window
/// that was queried.
#[derive(Default)]
struct FakeFunnels {
    calls: Mutex<Vec<(u64, NaiveDate, NaiveDate)>>,
}

#[async_trait]
impl FunnelApi for FakeFunnels {
    async fn step_counts(&self, funnel_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<i64>> {
        self.calls.lock().unwrap().push((funnel_id, from, to));
        Ok(vec![i64::from(chrono::Datelike::day(&from)), 7])
    }
}

struct FakeDownloads {
    starts: Mutex<Vec<NaiveDate>>,
}

#[async_trait]
impl DownloadReportApi for FakeDownloads {
    async fn daily_downloads(&self, start: NaiveDate) -> Result<Vec<(NaiveDate, i64)>> {
        self.starts.lock().unwrap().push(start);
        Ok(vec![
            (day(2013, 6, 3), 10),
            (day(2013, 6, 4), 5),
            (day(2013, 6, 18), 8),
        ])
    }
}

/// Completes after `pending_polls` polls and serves two result pages.
struct FakeAds {
    pending_polls: AtomicUsize,
    submitted: Mutex<Vec<(String, NaiveDate, NaiveDate)>>,
    fail_submit: bool,
    gate: Option<Arc<Notify>>,
}

impl FakeAds {
    fn new() -> Self {
        Self {
            pending_polls: AtomicUsize::new(2),
            submitted: Mutex::new(Vec::new()),
            fail_submit: false,
            gate: None,
        }
    }
}

#[async_trait]
impl AdReportApi for FakeAds {
    async fn submit_report(&self, token: &str, start: NaiveDate, stop: NaiveDate) -> Result<String> {
        if self.fail_submit {
            anyhow::bail!("ad network unavailable");
        }
        self.submitted
            .lock()
            .unwrap()
            .push((token.to_string(), start, stop));
        Ok("job-1".to_string())
    }

    async fn is_complete(&self, _token: &str, _job_id: &str) -> Result<bool> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let left = self.pending_polls.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(true);
        }
        self.pending_polls.store(left - 1, Ordering::SeqCst);
        Ok(false)
    }

    async fn report_page(&self, _token: &str, _job_id: &str, next: Option<&str>) -> Result<AdReportPage> {
        let row = |start: NaiveDate, stop: NaiveDate, spend: f64, installs: i64| AdReportRow {
            date_start: start,
            date_stop: stop,
            spend,
            installs,
        };
        Ok(match next {
            None => AdReportPage {
                rows: vec![
                    row(day(2013, 6, 10), day(2013, 6, 10), 4.5, 4),
                    row(day(2013, 6, 15), day(2013, 6, 17), 99.0, 99),
                ],
                next: Some("page-2".to_string()),
            },
            Some(_) => AdReportPage {
                rows: vec![row(day(2013, 6, 12), day(2013, 6, 12), 1.5, 1)],
                next: None,
            },
        })
    }
}

#[derive(Default)]
struct RecordingPeople {
    updates: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl PeopleSink for RecordingPeople {
    async fn set_properties(&self, distinct_id: &str, properties: serde_json::Value) -> Result<()> {
        self.updates
            .lock()
            .unwrap()
            .push((distinct_id.to_string(), properties));
        anyhow::bail!("people sink rejects everything")
    }
}

fn orchestrator(db: &Arc<DuckDbBackend>, apis: ExternalApis) -> Orchestrator {
    let store: Arc<dyn StatsBackend> = db.clone();
    Orchestrator::new(store, apis, Arc::new(test_config()))
}

#[tokio::test]
async fn full_update_merges_every_configured_source() {
    let db = Arc::new(DuckDbBackend::open_in_memory().unwrap());
    StatsBackend::set_setting(db.as_ref(), AD_TOKEN_SETTING, "tok")
        .await
        .unwrap();
    let funnels = Arc::new(FakeFunnels::default());
    let downloads = Arc::new(FakeDownloads {
        starts: Mutex::new(Vec::new()),
    });
    let ads = Arc::new(FakeAds::new());
    let jobs = orchestrator(
        &db,
        ExternalApis {
            funnels: Some(funnels.clone()),
            downloads: Some(downloads.clone()),
            ads: Some(ads.clone()),
            people: None,
        },
    );

    let outcome = jobs.run_at(JobKind::FullStatsUpdate, None, today()).await;
    assert_eq!(outcome.status, JobStatus::Success, "{}", outcome.message);

    // First run: every week 0..=3 for each of the three funnels.
    assert_eq!(funnels.calls.lock().unwrap().len(), 12);
    let week2 = db.cohort_stats(2).await.unwrap().unwrap();
    assert_eq!(week2.external.funnels["referrer"]["signups"], 17);
    assert_eq!(week2.external.funnels["bwb_detailed"]["complete"], 0);
    assert!(week2.user.is_some(), "merger keeps the aggregated section");

    assert_eq!(downloads.starts.lock().unwrap()[0], day(2013, 6, 3));
    assert_eq!(db.cohort_stats(0).await.unwrap().unwrap().external.downloads, Some(15));
    assert_eq!(db.cohort_stats(1).await.unwrap().unwrap().external.downloads, None);
    assert_eq!(db.cohort_stats(2).await.unwrap().unwrap().external.downloads, Some(8));

    let submitted = ads.submitted.lock().unwrap().clone();
    assert_eq!(submitted, vec![("tok".to_string(), day(2013, 6, 3), day(2013, 7, 1))]);
    let week1 = db.cohort_stats(1).await.unwrap().unwrap();
    assert_eq!(week1.external.ad_installs, Some(5));
    assert_eq!(week1.external.ad_spend, Some(6.0));
    assert_eq!(db.cohort_stats(0).await.unwrap().unwrap().external.ad_spend, None);
}

#[tokio::test]
async fn refresh_run_narrows_every_window() {
    let db = Arc::new(DuckDbBackend::open_in_memory().unwrap());
    StatsBackend::set_setting(db.as_ref(), AD_TOKEN_SETTING, "tok")
        .await
        .unwrap();
    let funnels = Arc::new(FakeFunnels::default());
    let downloads = Arc::new(FakeDownloads {
        starts: Mutex::new(Vec::new()),
    });
    let ads = Arc::new(FakeAds::new());
    let jobs = orchestrator(
        &db,
        ExternalApis {
            funnels: Some(funnels.clone()),
            downloads: Some(downloads.clone()),
            ads: Some(ads.clone()),
            people: None,
        },
    );
    jobs.run_at(JobKind::FullStatsUpdate, None, today()).await;

    let later = day(2013, 9, 4); // week 13
    funnels.calls.lock().unwrap().clear();
    let outcome = jobs.run_at(JobKind::FullStatsUpdate, None, later).await;
    assert_eq!(outcome.status, JobStatus::Success, "{}", outcome.message);

    // Weeks 4..=13 lack funnels; 7..=13 are the trailing window anyway.
    let calls = funnels.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 3 * 10);
    assert!(calls.iter().all(|(_, from, _)| *from >= day(2013, 7, 1)));

    assert_eq!(downloads.starts.lock().unwrap()[1], day(2013, 7, 29));
    let (_, start, stop) = ads.submitted.lock().unwrap()[1].clone();
    assert_eq!((start, stop), (day(2013, 8, 26), day(2013, 9, 9)));
}

#[tokio::test]
async fn failed_ad_submit_skips_only_ads() {
    let db = Arc::new(DuckDbBackend::open_in_memory().unwrap());
    StatsBackend::set_setting(db.as_ref(), AD_TOKEN_SETTING, "tok")
        .await
        .unwrap();
    let mut ads = FakeAds::new();
    ads.fail_submit = true;
    let downloads = Arc::new(FakeDownloads {
        starts: Mutex::new(Vec::new()),
    });
    let jobs = orchestrator(
        &db,
        ExternalApis {
            funnels: None,
            downloads: Some(downloads),
            ads: Some(Arc::new(ads)),
            people: None,
        },
    );

    let outcome = jobs.run_at(JobKind::FullStatsUpdate, None, today()).await;
    assert_eq!(outcome.status, JobStatus::Success, "{}", outcome.message);
    assert_eq!(db.cohort_stats(0).await.unwrap().unwrap().external.downloads, Some(15));
    assert_eq!(db.cohort_stats(1).await.unwrap().unwrap().external.ad_spend, None);
}

#[tokio::test]
async fn missing_ad_token_skips_submission() {
    let db = Arc::new(DuckDbBackend::open_in_memory().unwrap());
    let ads = Arc::new(FakeAds::new());
    let jobs = orchestrator(
        &db,
        ExternalApis {
            ads: Some(ads.clone()),
            ..ExternalApis::default()
        },
    );
    let outcome = jobs.run_at(JobKind::FullStatsUpdate, None, today()).await;
    assert_eq!(outcome.status, JobStatus::Success);
    assert!(ads.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn user_and_cohort_only_never_calls_external_apis() {
    let db = Arc::new(DuckDbBackend::open_in_memory().unwrap());
    StatsBackend::set_setting(db.as_ref(), AD_TOKEN_SETTING, "tok")
        .await
        .unwrap();
    let funnels = Arc::new(FakeFunnels::default());
    let ads = Arc::new(FakeAds::new());
    let jobs = orchestrator(
        &db,
        ExternalApis {
            funnels: Some(funnels.clone()),
            ads: Some(ads.clone()),
            ..ExternalApis::default()
        },
    );
    jobs.run_at(JobKind::UserAndCohortOnly, None, today()).await;
    assert!(funnels.calls.lock().unwrap().is_empty());
    assert!(ads.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn people_sink_failure_does_not_fail_the_job() {
    let db = Arc::new(DuckDbBackend::open_in_memory().unwrap());
    let signup = Utc.with_ymd_and_hms(2013, 6, 4, 8, 0, 0).unwrap();
    db.create_user(&UserProfile {
        id: "u1".to_string(),
        created_at: signup,
        username: None,
        email: None,
        email_verified: false,
        date_of_birth: None,
        facebook_id: None,
        people_id: Some("people-u1".to_string()),
        follower_count: None,
        following_count: None,
        last_notification_at: None,
        signup_source: None,
        stats_id: None,
        stats_need_update: true,
    })
    .await
    .unwrap();
    db.insert_post("p1", "u1", signup + Duration::hours(2)).await.unwrap();
    let people = Arc::new(RecordingPeople::default());
    let jobs = orchestrator(
        &db,
        ExternalApis {
            people: Some(people.clone()),
            ..ExternalApis::default()
        },
    );

    let outcome = jobs.run_at(JobKind::UserAndCohortOnly, None, today()).await;
    assert_eq!(outcome.status, JobStatus::Success, "{}", outcome.message);
    let updates = people.updates.lock().unwrap().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, "people-u1");
    assert_eq!(updates[0].1["cohort"], 0);
    assert_eq!(updates[0].1["total_posts"], 1);
}

#[tokio::test]
async fn second_job_is_rejected_while_one_runs() {
    let db = Arc::new(DuckDbBackend::open_in_memory().unwrap());
    StatsBackend::set_setting(db.as_ref(), AD_TOKEN_SETTING, "tok")
        .await
        .unwrap();
    let gate = Arc::new(Notify::new());
    let mut ads = FakeAds::new();
    ads.pending_polls = AtomicUsize::new(0);
    ads.gate = Some(gate.clone());
    let jobs = Arc::new(orchestrator(
        &db,
        ExternalApis {
            ads: Some(Arc::new(ads)),
            ..ExternalApis::default()
        },
    ));

    let running = {
        let jobs = Arc::clone(&jobs);
        tokio::spawn(async move { jobs.run_at(JobKind::FullStatsUpdate, None, today()).await })
    };
    // Let the first job reach the ad poll, which waits on the gate.
    for _ in 0..50 {
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let rejected = jobs.run_at(JobKind::MarkAllDirty, None, today()).await;
    assert_eq!(rejected.status, JobStatus::AlreadyRunning);

    gate.notify_one();
    let first = running.await.unwrap();
    assert_eq!(first.status, JobStatus::Success, "{}", first.message);

    let after = jobs.run_at(JobKind::MarkAllDirty, None, today()).await;
    assert_eq!(after.status, JobStatus::Success);
}
