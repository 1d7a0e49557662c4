use clap::Parser;
use fruit_client::{failure_message, format_report, ClientError, DetectClient, DEFAULT_URL};
use std::{path::PathBuf, process::ExitCode, time::Duration};
use tracing_subscriber::EnvFilter;

/// Uploads an image to the fruit detection service and prints what it found.
#[derive(Parser, Debug)]
#[command(name = "fruit-client", version, about)]
struct Args {
    /// Image file to upload
    image: PathBuf,

    /// Detection endpoint
    #[arg(long, env = "FRUIT_DETECT_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Media type sent with the upload, guessed from the extension if omitted
    #[arg(long)]
    mime: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args).await {
        Ok(report) => {
            print!("{}", report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", failure_message(&e, &args.url, args.timeout));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<String, ClientError> {
    let client = DetectClient::new(args.url.as_str(), Duration::from_secs(args.timeout))?;
    tracing::info!(image = %args.image.display(), url = %args.url, "Sending detection request");

    let response = client.detect(&args.image, args.mime.as_deref()).await?;
    Ok(format_report(&response))
}
