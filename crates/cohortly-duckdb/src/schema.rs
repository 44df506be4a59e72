/// DuckDB initialization SQL.
///
/// Executed once at database open time via `Connection::execute_batch`.
/// All statements use `IF NOT EXISTS` so they are safe to re-run on every
/// startup.
///
/// `user_stats` and `cohort_stats` are upserted with `ON CONFLICT ... DO
/// UPDATE` and must not carry secondary indexes. `cohort_funnel_steps` is
/// rewritten per week with delete + insert inside one transaction, so it has
/// no key constraint.
pub fn init_sql(memory_limit: &str) -> String {
    format!(
        r#"SET memory_limit = '{memory_limit}';
SET threads = 2;

-- Keys stored in this table:
--   'version'           - schema version
--   'ads_access_token'  - ad-network token, written by the token exchange
CREATE TABLE IF NOT EXISTS settings (
    key             VARCHAR PRIMARY KEY,
    value           VARCHAR NOT NULL
);

-- ===========================================
-- SOURCE TABLES
-- ===========================================
CREATE TABLE IF NOT EXISTS users (
    id                   VARCHAR PRIMARY KEY,
    created_at           TIMESTAMP NOT NULL,
    username             VARCHAR,
    email                VARCHAR,
    email_verified       BOOLEAN NOT NULL DEFAULT FALSE,
    date_of_birth        DATE,
    facebook_id          VARCHAR,
    people_id            VARCHAR,
    follower_count       BIGINT,
    following_count      BIGINT,
    last_notification_at TIMESTAMP,
    signup_source        VARCHAR,
    blocked              BOOLEAN NOT NULL DEFAULT FALSE,
    deleted              BOOLEAN NOT NULL DEFAULT FALSE,
    stats_id             VARCHAR,                 -- user_stats.id, NULL until compiled
    stats_need_update    BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS activities (
    id              VARCHAR PRIMARY KEY,
    from_user       VARCHAR NOT NULL,
    activity_type   VARCHAR NOT NULL,
    deleted         BOOLEAN NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_activities_user ON activities(from_user, created_at);

-- Populated by an external import job.
CREATE TABLE IF NOT EXISTS imported_events (
    id              VARCHAR PRIMARY KEY,
    user_id         VARCHAR NOT NULL,
    event           VARCHAR NOT NULL,
    session_seconds DOUBLE,
    occurred_at     TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_imported_events_user ON imported_events(user_id, occurred_at);

CREATE TABLE IF NOT EXISTS posts (
    id              VARCHAR PRIMARY KEY,
    owner           VARCHAR NOT NULL,
    deleted         BOOLEAN NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_posts_owner ON posts(owner, created_at);

CREATE TABLE IF NOT EXISTS purchases (
    id              VARCHAR PRIMARY KEY,
    user_id         VARCHAR NOT NULL,
    status          VARCHAR,
    quantity        BIGINT NOT NULL DEFAULT 0,
    deleted         BOOLEAN NOT NULL DEFAULT FALSE,
    created_at      TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_purchases_user ON purchases(user_id, created_at);

-- ===========================================
-- STATS TABLES
-- ===========================================
CREATE TABLE IF NOT EXISTS user_stats (
    id              VARCHAR PRIMARY KEY,
    user_id         VARCHAR NOT NULL,
    cohort          BIGINT NOT NULL,
    fields          VARCHAR NOT NULL,             -- JSON object of projected fields
    checkpoint      VARCHAR NOT NULL,             -- JSON checkpoint set
    updated_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS cohort_stats (
    cohort_week     BIGINT PRIMARY KEY,
    cohort_date     DATE NOT NULL,
    user_metrics    VARCHAR,                      -- JSON, owned by the aggregator
    downloads       BIGINT,
    ad_installs     BIGINT,
    ad_spend        DOUBLE,
    updated_at      TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS cohort_funnel_steps (
    cohort_week     BIGINT NOT NULL,
    funnel          VARCHAR NOT NULL,
    step            VARCHAR NOT NULL,
    count           BIGINT NOT NULL
);
"#
    )
}
