//! mci - matrix CI command line
//!
//! ## Commands
//!
//! - `run`: execute the full matrix described by a pipeline spec file
//! - `key`: print the environment cache key for given inputs
//! - `fingerprint`: print the content digest of a set of manifests

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_cache::{
    fingerprint, CacheKeyBuilder, CommandProvisioner, DirEnvironmentCache, EnvironmentCache,
    MemoryEnvironmentCache,
};
use matrix_ci::{JobMatrixRunner, PipelineSpec, Trigger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "mci")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build-environment cache and test-matrix orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TriggerArg {
    Push,
    PullRequest,
    Manual,
    Schedule,
}

impl From<TriggerArg> for Trigger {
    fn from(value: TriggerArg) -> Self {
        match value {
            TriggerArg::Push => Trigger::Push,
            TriggerArg::PullRequest => Trigger::PullRequest,
            TriggerArg::Manual => Trigger::Manual,
            TriggerArg::Schedule => Trigger::Schedule,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full matrix described by a pipeline spec
    Run {
        /// Path to the pipeline spec (JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// What caused this run
        #[arg(long, value_enum, default_value = "push")]
        trigger: TriggerArg,

        /// Environment variable holding the optional upload credential.
        /// Absence skips the upload step, it never fails it.
        #[arg(long, default_value = "UPLOAD_TOKEN")]
        secret_env: String,

        /// Directory for the cross-run environment cache. Omitted = run
        /// with an in-memory cache only.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Emit the full report as JSON instead of the text summary
        #[arg(long)]
        report_json: bool,
    },

    /// Print the cache key for given inputs
    Key {
        /// Runner OS name
        #[arg(long, default_value = "linux")]
        os: String,

        /// Project namespace
        #[arg(long, default_value = "improver")]
        namespace: String,

        /// Cache epoch (bump manually to invalidate every key)
        #[arg(long)]
        epoch: u32,

        /// Environment axis value
        #[arg(long)]
        env: String,

        /// Manifest files, in hash order
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },

    /// Print the content digest of a set of manifests
    Fingerprint {
        /// Manifest files, in hash order
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

/// Credential presence: set and non-empty.
fn secret_present(var: &str) -> bool {
    std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json);

    match cli.command {
        Commands::Run {
            spec,
            trigger,
            secret_env,
            cache_dir,
            report_json,
        } => {
            let spec = PipelineSpec::from_json_file(&spec)
                .with_context(|| format!("failed to load pipeline spec {}", spec.display()))?;

            let cache: Arc<dyn EnvironmentCache> = match cache_dir {
                Some(dir) => Arc::new(
                    DirEnvironmentCache::open(&dir)
                        .with_context(|| format!("failed to open cache dir {}", dir.display()))?,
                ),
                None => Arc::new(MemoryEnvironmentCache::new()),
            };

            let provisioner = Arc::new(CommandProvisioner::new(
                spec.provisioner.program.clone(),
                spec.provisioner.args.clone(),
                &spec.provisioner.envs_root,
                spec.provisioner.timeout_secs,
            ));

            let has_secret = secret_present(&secret_env);
            if !has_secret {
                info!(var = %secret_env, "Upload credential not present, upload steps will be skipped");
            }

            let runner = JobMatrixRunner::new(cache, provisioner);
            let report = runner.run(&spec, trigger.into(), has_secret).await?;

            if report_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render_summary());
            }

            std::process::exit(report.exit_code());
        }

        Commands::Key {
            os,
            namespace,
            epoch,
            env,
            manifests,
        } => {
            let digest = fingerprint(&manifests)?;
            let key = CacheKeyBuilder::new(os, namespace, epoch).build(&env, &digest);
            println!("{key}");
        }

        Commands::Fingerprint { manifests } => {
            let digest = fingerprint(&manifests)?;
            println!("{digest}");
        }
    }

    Ok(())
}
