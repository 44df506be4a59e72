use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,
    pub duckdb_memory_limit: String,
    pub user_batch_size: usize,
    pub dirty_batch_size: usize,
    pub schedule_enabled: bool,
    pub schedule_interval_secs: u64,
    pub ad_poll_interval_ms: u64,
    pub http_timeout_secs: u64,
    pub funnels: Option<FunnelApiConfig>,
    pub downloads: Option<DownloadApiConfig>,
    pub ads: Option<AdApiConfig>,
    pub people: Option<PeopleSinkConfig>,
}

/// Conversion-funnel query API, authenticated with HTTP basic auth.
#[derive(Debug, Clone, PartialEq)]
pub struct FunnelApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

/// App-store sales report API.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadApiConfig {
    pub base_url: String,
    pub token: String,
    pub account_id: String,
    pub app_id: String,
}

/// Ad-network insights API. The access token lives in the settings table
/// under [`AD_TOKEN_SETTING`].
#[derive(Debug, Clone, PartialEq)]
pub struct AdApiConfig {
    pub base_url: String,
    pub account_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeopleSinkConfig {
    pub url: String,
    pub token: String,
}

pub const AD_TOKEN_SETTING: &str = "ads_access_token";

pub const DEFAULT_USER_BATCH_SIZE: usize = 25;
pub const DEFAULT_DIRTY_BATCH_SIZE: usize = 100;

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            port: std::env::var("COHORTLY_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|e| format!("invalid port: {e}"))?,
            data_dir: std::env::var("COHORTLY_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            duckdb_memory_limit: std::env::var("COHORTLY_DUCKDB_MEMORY")
                .unwrap_or_else(|_| "1GB".to_string()),
            user_batch_size: env_parse("COHORTLY_USER_BATCH_SIZE", DEFAULT_USER_BATCH_SIZE).max(1),
            dirty_batch_size: env_parse("COHORTLY_DIRTY_BATCH_SIZE", DEFAULT_DIRTY_BATCH_SIZE)
                .max(1),
            schedule_enabled: std::env::var("COHORTLY_SCHEDULE")
                .map(|v| v == "true")
                .unwrap_or(false),
            schedule_interval_secs: env_parse("COHORTLY_SCHEDULE_INTERVAL_SECS", 86_400),
            ad_poll_interval_ms: env_parse("COHORTLY_AD_POLL_INTERVAL_MS", 10_000),
            http_timeout_secs: env_parse("COHORTLY_HTTP_TIMEOUT_SECS", 30),
            funnels: match (
                env("COHORTLY_FUNNEL_API_KEY"),
                env("COHORTLY_FUNNEL_API_SECRET"),
            ) {
                (Some(api_key), Some(api_secret)) => Some(FunnelApiConfig {
                    base_url: env("COHORTLY_FUNNEL_API_URL")
                        .unwrap_or_else(|| "https://mixpanel.com/api/2.0".to_string()),
                    api_key,
                    api_secret,
                }),
                _ => None,
            },
            downloads: match (
                env("COHORTLY_DOWNLOADS_TOKEN"),
                env("COHORTLY_DOWNLOADS_ACCOUNT"),
                env("COHORTLY_DOWNLOADS_APP"),
            ) {
                (Some(token), Some(account_id), Some(app_id)) => Some(DownloadApiConfig {
                    base_url: env("COHORTLY_DOWNLOADS_API_URL")
                        .unwrap_or_else(|| "https://api.appfigures.com/v2".to_string()),
                    token,
                    account_id,
                    app_id,
                }),
                _ => None,
            },
            ads: env("COHORTLY_ADS_ACCOUNT").map(|account_id| AdApiConfig {
                base_url: env("COHORTLY_ADS_API_URL")
                    .unwrap_or_else(|| "https://graph.facebook.com".to_string()),
                account_id,
            }),
            people: env("COHORTLY_PEOPLE_TOKEN").map(|token| PeopleSinkConfig {
                url: env("COHORTLY_PEOPLE_URL")
                    .unwrap_or_else(|| "https://api.mixpanel.com/engage/".to_string()),
                token,
            }),
        })
    }

    pub fn ad_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ad_poll_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn schedule_interval(&self) -> Duration {
        Duration::from_secs(self.schedule_interval_secs.clamp(60, 7 * 86_400))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_interval_is_clamped() {
        let mut config = Config {
            port: 3000,
            data_dir: "./data".to_string(),
            duckdb_memory_limit: "1GB".to_string(),
            user_batch_size: DEFAULT_USER_BATCH_SIZE,
            dirty_batch_size: DEFAULT_DIRTY_BATCH_SIZE,
            schedule_enabled: false,
            schedule_interval_secs: 1,
            ad_poll_interval_ms: 10,
            http_timeout_secs: 30,
            funnels: None,
            downloads: None,
            ads: None,
            people: None,
        };
        assert_eq!(config.schedule_interval(), Duration::from_secs(60));
        config.schedule_interval_secs = u64::MAX;
        assert_eq!(config.schedule_interval(), Duration::from_secs(7 * 86_400));
    }
}
