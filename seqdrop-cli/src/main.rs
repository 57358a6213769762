use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use seqdrop_sniff::{sniff_file, SniffReport};
use seqdrop_types::ApiToken;
use seqdrop_upload::config::MIN_PART_SIZE;
use seqdrop_upload::{
    ClientKind, Config, Diagnostics, S3Connector, ServiceClient, UploadEvent, UploadResult,
    UploadSession,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "seqdrop")]
#[command(about = "Sniff FASTA/FASTQ files and upload them to the ingestion service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Ingestion service URL
    #[arg(long, env = "SEQDROP_SERVER")]
    server: Option<String>,

    /// Timeout for service requests in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the format and sequence properties of a file
    Sniff {
        /// File to inspect
        file: PathBuf,

        /// Output format (json or text)
        #[arg(long, default_value = "text")]
        output: OutputFormat,
    },

    /// Exchange a username and password for an API key
    Login {
        #[command(flatten)]
        credentials: Credentials,
    },

    /// Check whether this client is still supported by the service
    CheckVersion,

    /// Sniff a file and upload it
    Upload {
        /// File to upload
        file: PathBuf,

        /// API key; when absent, log in with username and password
        #[arg(long, env = "SEQDROP_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        #[command(flatten)]
        credentials: Credentials,

        /// Multipart part size in MiB (at least 5)
        #[arg(long)]
        part_size_mb: Option<u64>,

        /// Output format (json or text)
        #[arg(long, default_value = "text")]
        output: OutputFormat,
    },
}

#[derive(clap::Args)]
struct Credentials {
    /// Account email
    #[arg(long, env = "SEQDROP_USERNAME")]
    username: Option<String>,

    /// Account password
    #[arg(long, env = "SEQDROP_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Clone, Debug)]
enum OutputFormat {
    Json,
    Text,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "text" => Ok(OutputFormat::Text),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so that stdout stays machine readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if let Some(timeout) = cli.timeout {
        config.request_timeout = Duration::from_secs(timeout);
    }

    let diagnostics = Arc::new(Diagnostics::new(VERSION));
    tracing::debug!(release = VERSION, platform = diagnostics.platform(), "starting seqdrop");

    match cli.command {
        Commands::Sniff { file, output } => {
            let report = sniff(&file).await?;
            print_report(&report, &output)?;
            report.acceptance()?;
        }
        Commands::Login { credentials } => {
            let service = ServiceClient::from_config(&config)
                .context("Failed to create HTTP client")?;
            let token = login(&service, &diagnostics, credentials).await?;
            println!("{}", token.as_str());
        }
        Commands::CheckVersion => {
            let service = ServiceClient::from_config(&config)
                .context("Failed to create HTTP client")?;
            check_version(&service).await?;
            println!("✅ seqdrop v{} is supported", VERSION);
        }
        Commands::Upload {
            file,
            api_key,
            credentials,
            part_size_mb,
            output,
        } => {
            if let Some(mb) = part_size_mb {
                let part_size = mb * 1024 * 1024;
                if part_size < MIN_PART_SIZE {
                    bail!("--part-size-mb must be at least 5");
                }
                config.part_size = part_size;
            }
            upload(&config, diagnostics, &file, api_key, credentials, output).await?;
        }
    }

    Ok(())
}

async fn sniff(file: &Path) -> Result<SniffReport> {
    let path = file.to_path_buf();
    tokio::task::spawn_blocking(move || sniff_file(path))
        .await
        .context("Sniffer task failed")
}

fn print_report(report: &SniffReport, output_format: &OutputFormat) -> Result<()> {
    match output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Text => {
            println!("compression:    {}", report.compression);
            if let Some(message) = &report.error_message {
                println!("file type:      bad ({})", message);
                return Ok(());
            }
            println!("file type:      {:?}", report.file_type);
            println!("sequence type:  {:?}", report.seq_type);
            println!("multiline:      {}", report.seq_multiline);
            println!("gaps:           {}", report.seq_has_gaps);
            println!("lowercase:      {}", report.seq_has_lowercase);
            println!("IUPAC codes:    {}", report.seq_has_iupac);
            println!("unknown bases:  {}", report.seq_has_unknowns);
            println!("avg length:     {:.1}", report.seq_est_avg_len);
            println!("GC content:     {:.3}", report.seq_est_gc);
            println!("interleaved:    {}", report.interleaved);
        }
    }
    Ok(())
}

async fn login(
    service: &ServiceClient,
    diagnostics: &Diagnostics,
    credentials: Credentials,
) -> Result<ApiToken> {
    let username = credentials
        .username
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| anyhow!("Please enter a username"))?;
    let password = credentials
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| anyhow!("Please enter a password"))?;

    let token = service
        .login(&username, &password)
        .await
        .context("Could not authenticate successfully.")?
        .ok_or_else(|| anyhow!("Could not authenticate successfully."))?;
    diagnostics.set_user(username);
    Ok(token)
}

async fn check_version(service: &ServiceClient) -> Result<()> {
    match service.check_version(VERSION, ClientKind::Cli).await {
        Ok(check) => {
            if let Some(message) = &check.message {
                eprintln!("⚠️  {}", message);
            }
            if check.must_upgrade {
                bail!("seqdrop v{} is no longer supported", VERSION);
            }
        }
        Err(e) => {
            tracing::warn!("version check failed: {}", e);
            eprintln!("⚠️  Error connecting to server");
        }
    }
    Ok(())
}

async fn upload(
    config: &Config,
    diagnostics: Arc<Diagnostics>,
    file: &Path,
    api_key: Option<String>,
    credentials: Credentials,
    output_format: OutputFormat,
) -> Result<()> {
    let metadata = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("Failed to read file metadata: {}", file.display()))?;

    let report = sniff(file).await?;
    report.acceptance()?;
    eprintln!(
        "🔍 {} ({} bytes): {:?}, {} compression",
        file.display(),
        metadata.len(),
        report.file_type,
        report.compression
    );

    let service = ServiceClient::from_config(config).context("Failed to create HTTP client")?;
    check_version(&service).await?;

    let token = match api_key.map(ApiToken::new).filter(|key| !key.is_blank()) {
        Some(token) => token,
        None => login(&service, &diagnostics, credentials).await?,
    };

    let connector = Arc::new(S3Connector::from_config(config));
    let session = UploadSession::new(service, connector, diagnostics, config);
    let mut handle = session.spawn(file.to_path_buf(), token);

    let steps = u64::from(config.progress_steps);
    let pb = ProgressBar::new(steps);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent}% {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message("Uploading...");

    let mut cancelling = false;
    let result = loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(UploadEvent::Progress(fraction)) => {
                    pb.set_position((fraction * steps as f64).round() as u64);
                }
                Some(UploadEvent::Finished(result)) => break result,
                None => bail!("Upload worker stopped unexpectedly"),
            },
            _ = tokio::signal::ctrl_c(), if !cancelling => {
                cancelling = true;
                pb.set_message("Cancelling...");
                handle.cancel();
            }
        }
    };

    let state = handle.join().await.context("Upload worker panicked")?;
    match &result {
        UploadResult::Success => pb.finish_with_message("Done"),
        UploadResult::Failed(_) => pb.abandon_with_message("Failed"),
    }

    match output_format {
        OutputFormat::Json => {
            let json_output = serde_json::json!({
                "success": result.is_success(),
                "state": format!("{:?}", state),
                "message": result.message(),
            });
            println!("{}", serde_json::to_string_pretty(&json_output)?);
        }
        OutputFormat::Text => {
            if result.is_success() {
                println!("✅ {}", result.message());
            }
        }
    }

    match result {
        UploadResult::Success => Ok(()),
        UploadResult::Failed(e) => Err(anyhow!(e.to_string())),
    }
}
