use anyhow::Result;
use batchwait_core::generate::{generate_batch, GeneratorConfig};
use batchwait_core::{CancelHandle, DetectionReport, DetectionSession, DetectorConfig};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "batchwait")]
#[command(about = "Wait until a batch of files in a shared directory is fully written", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Wait for the batch in DIR to become ready and print its files
    Wait {
        /// Directory the producer writes into
        dir: PathBuf,

        #[command(flatten)]
        detector: DetectorArgs,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a synthetic batch into DIR
    Generate {
        dir: PathBuf,

        #[command(flatten)]
        generator: GeneratorArgs,
    },
    /// Generate a batch and detect it concurrently, then compare the sets
    Demo {
        dir: PathBuf,

        #[command(flatten)]
        detector: DetectorArgs,

        #[command(flatten)]
        generator: GeneratorArgs,
    },
}

#[derive(Args, Debug)]
struct DetectorArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Filename suffix of batch files
    #[arg(long)]
    suffix: Option<String>,

    #[arg(long)]
    max_wait_ms: Option<u64>,

    #[arg(long)]
    poll_interval_ms: Option<u64>,

    #[arg(long)]
    stable_cycles: Option<u32>,

    #[arg(long)]
    lock_retry_count: Option<u32>,

    #[arg(long)]
    lock_retry_delay_ms: Option<u64>,
}

impl DetectorArgs {
    fn load(&self) -> Result<DetectorConfig> {
        let mut config = batchwait_core::config::load_config(self.config.as_deref())?;

        if let Some(suffix) = &self.suffix {
            config.file_suffix = suffix.clone();
        }
        if let Some(ms) = self.max_wait_ms {
            config.max_wait_ms = ms;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(cycles) = self.stable_cycles {
            config.stable_cycles = cycles;
        }
        if let Some(count) = self.lock_retry_count {
            config.lock_retry_count = count;
        }
        if let Some(ms) = self.lock_retry_delay_ms {
            config.lock_retry_delay_ms = ms;
        }

        batchwait_core::config::validate_config(&config)?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct GeneratorArgs {
    /// Number of files to write
    #[arg(long, default_value_t = 20)]
    count: usize,

    #[arg(long, default_value_t = 10)]
    min_delay_ms: u64,

    #[arg(long, default_value_t = 50)]
    max_delay_ms: u64,

    #[arg(long, default_value_t = 100)]
    rows: usize,

    /// Files written at the same time
    #[arg(long, default_value_t = 4)]
    parallel: usize,
}

impl GeneratorArgs {
    fn to_config(&self, suffix: &str) -> GeneratorConfig {
        GeneratorConfig {
            file_count: self.count,
            min_delay_ms: self.min_delay_ms,
            max_delay_ms: self.max_delay_ms,
            rows_per_file: self.rows,
            max_parallel: self.parallel,
            file_suffix: suffix.to_string(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging with timestamps and levels
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Wait {
            dir,
            detector,
            json,
        } => {
            let config = detector.load()?;
            let report = run_session(&dir, config).await?;

            if json {
                println!("{}", report.to_json()?);
            } else {
                for path in report.outcome.files() {
                    println!("{}", path.display());
                }
            }

            Ok(exit_code(&report))
        }
        Command::Generate { dir, generator } => {
            let config = generator.to_config(&DetectorConfig::default().file_suffix);
            let written = generate_batch(&dir, &config).await?;
            for path in &written {
                println!("{}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Demo {
            dir,
            detector,
            generator,
        } => {
            let config = detector.load()?;
            let generator = generator.to_config(&config.file_suffix);
            run_demo(&dir, config, generator).await
        }
    }
}

/// Run one detection session, cancelling it on Ctrl-C.
async fn run_session(dir: &Path, config: DetectorConfig) -> Result<DetectionReport> {
    info!(
        "Watching {} for *{} (poll {} ms, {} stable cycles, max wait {} ms)",
        dir.display(),
        config.file_suffix,
        config.poll_interval_ms,
        config.stable_cycles,
        config.max_wait_ms
    );

    let (handle, token) = CancelHandle::new();
    let session = DetectionSession::new(dir, config)?.with_cancel(token);

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling detection");
            handle.cancel();
        }
    });

    let report = session.wait_for_ready().await;
    ctrl_c.abort();
    Ok(report)
}

async fn run_demo(
    dir: &Path,
    config: DetectorConfig,
    generator: GeneratorConfig,
) -> Result<ExitCode> {
    std::fs::create_dir_all(dir)?;

    let producer_dir = dir.to_path_buf();
    let producer = tokio::spawn(async move { generate_batch(&producer_dir, &generator).await });

    let report = run_session(dir, config).await?;
    let generated = producer.await??;

    let expected: BTreeSet<_> = generated.iter().collect();
    let detected: BTreeSet<_> = report.outcome.files().iter().collect();

    if report.outcome.is_ready() && expected == detected {
        info!(
            "Detected all {} generated files in {} cycles ({} ms)",
            generated.len(),
            report.cycles,
            report.elapsed().num_milliseconds()
        );
        Ok(ExitCode::SUCCESS)
    } else {
        error!(
            "Mismatch: outcome {:?}, {} generated, {} detected",
            report.outcome.kind(),
            expected.len(),
            detected.len()
        );
        for missing in expected.difference(&detected) {
            error!("Not detected: {}", missing.display());
        }
        for extra in detected.difference(&expected) {
            error!("Unexpected: {}", extra.display());
        }
        Ok(ExitCode::FAILURE)
    }
}

fn exit_code(report: &DetectionReport) -> ExitCode {
    if report.outcome.is_ready() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
