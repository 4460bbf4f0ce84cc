use cloudvaultd::daemon::{DaemonConfig, DaemonRuntime};
use cloudvaultd::logging;
use cloudvaultd::sync::events::SyncStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Once,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CliOptions {
    mode: CliMode,
    status_json: bool,
}

fn parse_cli<I>(args: I) -> anyhow::Result<CliOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut options = CliOptions {
        mode: CliMode::Run,
        status_json: false,
    };
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--once" => options.mode = CliMode::Once,
            "--status-json" => options.status_json = true,
            "--help" | "-h" => options.mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(options)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let options = parse_cli(std::env::args())?;
    if options.mode == CliMode::Help {
        println!("Usage: cloudvaultd [--once] [--status-json]");
        println!("  --once          Run a single sync pass and exit");
        println!("  --status-json   Print the final sync status as JSON on exit");
        return Ok(());
    }
    if let Err(err) = logging::init() {
        eprintln!("cloudvaultd: failed to initialise logging: {err}");
    }

    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config).await?;
    let snapshot = match options.mode {
        CliMode::Once => daemon.run_once().await?,
        _ => daemon.run().await?,
    };
    if options.status_json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    if options.mode == CliMode::Once && snapshot.status == SyncStatus::Error {
        anyhow::bail!(
            "sync pass failed: {}",
            snapshot.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
