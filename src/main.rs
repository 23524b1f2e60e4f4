use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use tracing::{error, info};

use seqmeta::config::{Config, DEFAULT_CONFIG_PATH};
use seqmeta::infra::http_client::ReqwestHttp;
use seqmeta::observability::{init_logging, logging::directive_for_verbosity, metrics};
use seqmeta::pipeline::MetadataPipeline;

#[derive(Parser)]
#[command(name = "seqmeta")]
#[command(about = "Clean sequence metadata and merge it with case and vaccination series")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Metadata TSV to read instead of the configured one
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Directory for all outputs
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Processing date (YYYY-MM-DD); collection dates after it are suspect
    #[arg(long)]
    reference_date: Option<NaiveDate>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(metadata) = cli.metadata {
        config.sources.metadata_path = metadata;
    }
    if let Some(output_dir) = cli.output_dir {
        config.outputs.output_dir = output_dir;
    }
    if cli.reference_date.is_some() {
        config.run.reference_date = cli.reference_date;
    }

    let _guard = init_logging(&config.run.log_dir, directive_for_verbosity(cli.verbose));

    let prometheus = match &config.outputs.metrics_file {
        Some(_) => Some(metrics::install_recorder()?),
        None => None,
    };

    let http = ReqwestHttp::new(Duration::from_secs(config.run.timeout_seconds))
        .context("building HTTP client")?;

    let result = MetadataPipeline::new(&config, &http).run();

    if let (Some(handle), Some(file)) = (&prometheus, &config.outputs.metrics_file) {
        metrics::write_textfile_or_warn(handle, &config.output_path(file));
    }

    match result {
        Ok(summary) => {
            info!(
                "Run {} finished: {} records ({} abnormal), outputs in {}",
                summary.run_id,
                summary.quality.total_records,
                summary.quality.any_abnormal,
                config.outputs.output_dir.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("❌ Run failed: {}", e);
            Err(e).context("metadata pipeline failed")
        }
    }
}
