use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_job_scraper::{
    EngineConfig, IdentityHint, IdentityRotator, JobConfig, JobExecutor, RobotsPolicyCache,
};

#[derive(Parser)]
#[command(
    name = "rust-job-scraper",
    about = "Run polite, rate-limited scraping jobs",
    version
)]
struct Cli {
    /// Engine settings (TOML). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every job in a JSON or TOML jobs file and print the final progress as JSON.
    Run {
        /// A single job, a list of jobs, or a TOML file with `[[jobs]]` tables.
        jobs: PathBuf,

        /// Progress polling interval in milliseconds.
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,
    },

    /// Ask the robots.txt cache whether a URL may be scraped.
    Robots {
        url: String,

        /// Identity to check; defaults to the engine's default browser identity.
        #[arg(long)]
        identity: Option<String>,

        #[arg(long)]
        ignore_robots: bool,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JobsDocument {
    Many(Vec<JobConfig>),
    One(Box<JobConfig>),
}

#[derive(Deserialize)]
struct TomlJobs {
    jobs: Vec<JobConfig>,
}

fn load_jobs(path: &Path) -> Result<Vec<JobConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read jobs file {}", path.display()))?;

    let is_toml = path.extension().is_some_and(|ext| ext == "toml");
    if is_toml {
        let parsed: TomlJobs = toml::from_str(&raw)
            .with_context(|| format!("Invalid TOML jobs file {}", path.display()))?;
        return Ok(parsed.jobs);
    }

    let parsed: JobsDocument = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid JSON jobs file {}", path.display()))?;
    Ok(match parsed {
        JobsDocument::Many(jobs) => jobs,
        JobsDocument::One(job) => vec![*job],
    })
}

async fn run_jobs(config: EngineConfig, jobs_path: &Path, poll: Duration) -> Result<()> {
    let jobs = load_jobs(jobs_path)?;
    if jobs.is_empty() {
        anyhow::bail!("No jobs found in {}", jobs_path.display());
    }

    let executor = JobExecutor::new(config)?;
    let mut ids = Vec::with_capacity(jobs.len());
    for job in jobs {
        let id = job.id;
        if executor.start(id, job) {
            ids.push(id);
        } else {
            log::warn!("Skipping duplicate job id {}", id);
        }
    }
    log::info!("🚀 Started {} job(s)", ids.len());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to listen for Ctrl-C")?;
                log::info!("🛑 Interrupted, stopping jobs");
                let stopped = executor.stop_all().await;
                log::info!("⏸️  Paused {} job(s)", stopped);
                break;
            }
            _ = tokio::time::sleep(poll) => {
                for id in &ids {
                    if let Some(progress) = executor.progress(*id) {
                        log::info!(
                            "📊 Job {}: {:?} {}/{} ({:.1}%)",
                            id,
                            progress.status,
                            progress.pages_scraped,
                            progress.total_pages,
                            progress.percentage
                        );
                    }
                }
                if ids.iter().all(|id| !executor.is_running(*id)) {
                    break;
                }
            }
        }
    }

    let snapshots: Vec<_> = ids.iter().filter_map(|id| executor.progress(*id)).collect();
    let report = serde_json::json!({
        "jobs": snapshots,
        "stats": executor.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn check_robots(
    config: EngineConfig,
    url: &str,
    identity: Option<String>,
    ignore: bool,
) -> Result<()> {
    let cache = RobotsPolicyCache::from_config(&config)?;
    let identity =
        identity.unwrap_or_else(|| IdentityRotator::new().identity_for(IdentityHint::Default));

    let verdict = cache.evaluate(url, &identity, !ignore).await;
    println!("{}", serde_json::to_string_pretty(&verdict)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Run { jobs, poll_ms } => {
            run_jobs(config, &jobs, Duration::from_millis(poll_ms.max(10))).await
        }
        Commands::Robots {
            url,
            identity,
            ignore_robots,
        } => check_robots(config, &url, identity, ignore_robots).await,
    }
}
