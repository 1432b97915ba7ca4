use notify_webhook::git::SystemGit;
use notify_webhook::logging::{FileLogger, parse_rotation, setup_logging};
use notify_webhook::{Config, Notifier, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::BufReader;
use tracing::{info, warn};

const CONFIG_PATH_ENV: &str = "NOTIFY_WEBHOOK_CONFIG";
const LOG_DIR_ENV: &str = "NOTIFY_WEBHOOK_LOG_DIR";
const LOG_ROTATION_ENV: &str = "NOTIFY_WEBHOOK_LOG_ROTATION";

fn file_logger() -> Option<FileLogger> {
    let logger = FileLogger::new(PathBuf::from(std::env::var_os(LOG_DIR_ENV)?));
    let rotation = std::env::var(LOG_ROTATION_ENV).ok();
    match rotation.as_deref().map(|value| (value, parse_rotation(value))) {
        Some((_, Some(rotation))) => Some(logger.with_rotation(rotation)),
        Some((value, None)) => {
            eprintln!("notify-webhook: unknown log rotation '{}', using daily", value);
            Some(logger)
        }
        None => Some(logger),
    }
}

async fn run() -> Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
    let git = SystemGit::new();

    let config = Config::load(&git, config_path.as_deref()).await?;
    let notifier = Notifier::new(&git, &config).await?;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout().lock();
    let outcomes = notifier.run(stdin, &mut stdout).await?;

    let failed = outcomes
        .iter()
        .filter_map(|o| o.delivery.as_ref())
        .map(|report| report.failures.len())
        .sum::<usize>();
    if failed > 0 {
        warn!("{} delivery attempt(s) failed", failed);
    }
    info!("Processed {} ref update(s)", outcomes.len());
    Ok(())
}

// git waits on the hook, so everything runs in order on one thread
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let file_logger = file_logger();
    let _guard = setup_logging(file_logger.as_ref());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("notify-webhook: {}", e);
            ExitCode::FAILURE
        }
    }
}
