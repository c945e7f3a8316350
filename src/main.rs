use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint};
use email_address::EmailAddress;
use iocraft::prelude::*;
use oncosweep::{
    ApiError, BatchPlan, DEFAULT_CHUNK_SIZE_BYTES, OncosweepClient, UploadOptions,
    default_experiment_name,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::ui::{ProgressBar, UploadStatus, print_error, print_success, print_value};

mod config;
mod ui;

#[derive(Parser)]
#[command(name = "oncosweep")]
#[command(version)]
#[command(
    about = "Send requests to perform miRNA quantification and prediction with the Oncosweep platform"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ExperimentArgs {
    /// Experiment name
    #[arg(short, long)]
    name: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the platform URL, notification email and API key
    Init {
        /// API key to access the platform (stored in the OS keyring)
        #[arg(long)]
        key: String,
        /// URL of the platform
        #[arg(long)]
        url: Url,
        /// Email receiving the notifications
        #[arg(long)]
        email: String,
        /// Who to contact when a request fails
        #[arg(long)]
        contact: Option<String>,
    },
    /// Upload the zipped FASTQ files (*.fastq.gz) of a directory
    Upload {
        #[arg(long, value_hint = ValueHint::DirPath)]
        fastq_dir: PathBuf,
        /// Experiment name, generated from the current time when omitted
        #[arg(short, long)]
        name: Option<String>,
        /// Size of each uploaded chunk in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE_BYTES, value_parser = clap::value_parser!(u64).range(1..))]
        chunk_size: u64,
    },
    /// Upload the annotation file of an experiment
    Annotate {
        /// Experiment name
        #[arg(short, long)]
        name: String,
        #[arg(long, value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// Size of each uploaded chunk in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE_BYTES, value_parser = clap::value_parser!(u64).range(1..))]
        chunk_size: u64,
    },
    /// Perform quantification
    Quant(ExperimentArgs),
    /// Show quality control results
    Qc(ExperimentArgs),
    /// Perform prediction
    Predict {
        #[command(flatten)]
        experiment: ExperimentArgs,
        /// Include CA19-9 measurements in the prediction
        #[arg(long = "with-ca19-9")]
        with_ca19_9: bool,
    },
    /// Show the report of an experiment
    Report(ExperimentArgs),
    /// List experiments
    List,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let _rt_guard = rt.enter();
    clap_complete::CompleteEnv::with_factory(Cli::command).complete();
    let Cli {
        config: config_path,
        command,
    } = Cli::parse();

    rt.block_on(async move {
        match command {
            Commands::Init {
                key,
                url,
                email,
                contact,
            } => init(config_path.as_deref(), &key, url, email, contact),
            requires_config => {
                let config = config::read_config(config_path.as_deref())?;
                let client = OncosweepClient::new(config.base_url, config.api_key, config.contact);
                let email = config.email;

                match requires_config {
                    Commands::Upload {
                        fastq_dir,
                        name,
                        chunk_size,
                    } => upload_fastq(&client, &email, name, &fastq_dir, chunk_size).await,
                    Commands::Annotate {
                        name,
                        file,
                        chunk_size,
                    } => upload_annotation(&client, &email, &name, &file, chunk_size).await,
                    Commands::Quant(args) => {
                        print_response(&client, client.quant(&args.name, &email).await)
                    }
                    Commands::Qc(args) => print_response(&client, client.qc(&args.name, &email).await),
                    Commands::Predict {
                        experiment,
                        with_ca19_9,
                    } => print_response(
                        &client,
                        client.predict(&experiment.name, &email, with_ca19_9).await,
                    ),
                    Commands::Report(args) => {
                        print_response(&client, client.report(&args.name, &email).await)
                    }
                    Commands::List => print_response(&client, client.list(&email).await),
                    Commands::Init { .. } => unreachable!("init does not read the configuration"),
                }
            }
        }
    })
}

fn init(
    config_path: Option<&Path>,
    key: &str,
    url: Url,
    email: String,
    contact: Option<String>,
) -> Result<()> {
    if key.trim().is_empty() {
        bail!("API key cannot be empty");
    }
    if !EmailAddress::is_valid(&email) {
        bail!("Invalid email address: {}", email);
    }

    let file_api_key = match config::set_api_key_keyring(key) {
        Ok(()) => None,
        Err(e) => {
            tracing::warn!(error = %e, "OS keyring unavailable, storing the API key in the configuration file");
            Some(key.to_string())
        }
    };
    let written = config::write_config(
        config_path,
        &config::ConfigFile {
            base_url: Some(url),
            email: Some(email),
            contact,
            api_key: file_api_key,
        },
    )?;

    print_success(format!("Configuration written to {}", written.display()));
    Ok(())
}

/// Request failures are reported to the user and do not fail the process.
fn print_response(client: &OncosweepClient, response: Result<Value, ApiError>) -> Result<()> {
    match response {
        Ok(value) => print_value(&value),
        Err(e) => {
            tracing::debug!(error = ?e, "request failed");
            print_error(format!("An error occurred: {}. {}", e, client.contact()));
            Ok(())
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Drives `upload` while a progress bar renders the latest status.
async fn with_progress_bar<T>(
    status: watch::Receiver<UploadStatus>,
    upload: impl Future<Output = T>,
) -> T {
    tokio::pin!(upload);
    let mut progress_bar = element!(ProgressBar(status: Some(status)));

    // If the terminal cannot render, the upload still runs to completion.
    tokio::select! {
        result = &mut upload => result,
        _ = progress_bar.render_loop() => upload.await,
    }
}

async fn upload_fastq(
    client: &OncosweepClient,
    email: &str,
    name: Option<String>,
    fastq_dir: &Path,
    chunk_size: u64,
) -> Result<()> {
    let plan = BatchPlan::scan(fastq_dir)
        .with_context(|| format!("Unable to read {}", fastq_dir.display()))?;
    let name = name.unwrap_or_else(|| default_experiment_name(&Local::now()));
    println!("Experiment: {}", name);

    let options = UploadOptions::default()
        .with_chunk_size(chunk_size)
        .with_email(Some(email.to_string()));
    let (tx, rx) = watch::channel(UploadStatus::default());
    let upload = client.upload_batch(&name, &plan, options, |file, progress| {
        let _ = tx.send(UploadStatus {
            title: format!("{} ({}/{})", file.file_name(), file.index, plan.len()),
            progress: progress.clone(),
        });
    });

    match with_progress_bar(rx, upload).await {
        Ok(report) => print_success(format!("Upload FASTQ complete successfully ({}).", report)),
        Err(e) => print_error(format!(
            "Failed to upload chunk of {} ({}/{}). {}. {}",
            e.file_name,
            e.index,
            e.report.total,
            e.source,
            client.contact()
        )),
    }
    Ok(())
}

async fn upload_annotation(
    client: &OncosweepClient,
    email: &str,
    name: &str,
    file: &Path,
    chunk_size: u64,
) -> Result<()> {
    let options = UploadOptions::annotation()
        .with_chunk_size(chunk_size)
        .with_email(Some(email.to_string()));

    let (tx, rx) = watch::channel(UploadStatus {
        title: display_name(file),
        ..UploadStatus::default()
    });
    let upload = client.upload_file_with_progress(name, file, options, |progress| {
        let _ = tx.send(UploadStatus {
            title: display_name(file),
            progress: progress.clone(),
        });
    });

    match with_progress_bar(rx, upload).await {
        Ok(summary) => print_success(format!(
            "Upload annotation {} complete successfully ({} parts).",
            summary.file_name, summary.parts
        )),
        Err(e) => print_error(format!(
            "Failed to upload annotation {}. {}. {}",
            display_name(file),
            e,
            client.contact()
        )),
    }
    Ok(())
}
