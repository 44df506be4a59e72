use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use cohortly_server::external::ExternalApis;
use cohortly_server::pipeline::{JobKind, JobStatus};
use cohortly_server::state::AppState;

/// `cohortly health`: liveness probe for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$COHORTLY_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("COHORTLY_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

/// Parse `run <job> [--limit N]` arguments.
fn parse_run_args(args: &[String]) -> Result<(JobKind, Option<usize>)> {
    let name = args
        .first()
        .ok_or_else(|| anyhow::anyhow!("usage: cohortly run <job> [--limit N]"))?;
    let job = JobKind::parse(name).ok_or_else(|| anyhow::anyhow!("unknown job {name:?}"))?;
    let limit = match args.get(1).map(String::as_str) {
        None => None,
        Some("--limit") => {
            let raw = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("--limit needs a value"))?;
            let limit = raw
                .parse::<usize>()
                .map_err(|e| anyhow::anyhow!("invalid --limit: {e}"))?;
            if limit == 0 {
                anyhow::bail!("--limit must be at least 1");
            }
            Some(limit)
        }
        Some(other) => anyhow::bail!("unexpected argument {other:?}"),
    };
    Ok((job, limit))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Initialise structured JSON logging. Level controlled via RUST_LOG env var.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cohortly=info".parse()?),
        )
        .json()
        .init();

    let cfg = cohortly_server::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    // Ensure data directory exists before opening DuckDB.
    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/cohortly.db", cfg.data_dir);
    let db = cohortly_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    let apis = ExternalApis::from_config(&cfg)?;
    let state = Arc::new(AppState::new(db, cfg.clone(), apis));

    if args.get(1).map(|s| s.as_str()) == Some("run") {
        let (job, limit) = parse_run_args(&args[2..])?;
        let outcome = state.jobs.run(job, limit).await;
        println!("{}", serde_json::to_string(&outcome)?);
        if outcome.status != JobStatus::Success {
            std::process::exit(1);
        }
        return Ok(());
    }

    if cfg.schedule_enabled {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            cohortly_server::scheduler::run_scheduler_loop(state).await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = cohortly_server::app::build_app(Arc::clone(&state));

    info!(port = cfg.port, schedule = cfg.schedule_enabled, "Cohortly listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn run_args_accept_limit() {
        let (job, limit) = parse_run_args(&args(&["full-stats-update", "--limit", "10"])).unwrap();
        assert_eq!(job, JobKind::FullStatsUpdate);
        assert_eq!(limit, Some(10));
        assert!(parse_run_args(&args(&["mark-all-dirty", "--limit"])).is_err());
        assert!(parse_run_args(&args(&["nope"])).is_err());
    }

    #[test]
    fn run_args_reject_zero_limit() {
        let err = parse_run_args(&args(&["user-and-cohort-only", "--limit", "0"])).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
        let (_, limit) = parse_run_args(&args(&["user-and-cohort-only"])).unwrap();
        assert_eq!(limit, None);
    }
}
