use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleetsync::{router, state, AppState};
use fleetsync_core::{runlog, Config, Step};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fleet maintenance sync CLI and API server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the sync API server
    Serve(ServeArgs),
    /// Run one sync step, or follow the chain to completion
    Run(RunArgs),
    /// Run the fast refresh (alerts + recent faults)
    Cron,
    /// Print the destination status summary
    Status,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value_t = 3000)]
    port: u16,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Step identifier: 0, 1, 2, 2b, 3, 4 or 5
    #[arg(long, default_value = "0")]
    step: String,
    #[arg(long, default_value_t = 0)]
    sector: usize,
    #[arg(long, default_value_t = 0)]
    period: usize,
    /// Keep invoking the returned next pointer until the chain completes
    #[arg(long)]
    follow: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env().context("incomplete environment configuration")?;

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(config, args.port).await,
        Command::Run(args) => run(config, args).await,
        Command::Cron => {
            let mut pipeline = state::build_pipeline(&config)?;
            let report = pipeline.run_cron().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Status => {
            let pipeline = state::build_pipeline(&config)?;
            let summary = runlog::status_summary(pipeline.store().as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

async fn serve(config: Config, port: u16) -> Result<()> {
    let pipeline = state::build_pipeline(&config)?;
    let app = router(AppState::new(pipeline));

    let listener = TcpListener::bind((std::net::Ipv4Addr::UNSPECIFIED, port)).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

async fn run(config: Config, args: RunArgs) -> Result<()> {
    let mut pipeline = state::build_pipeline(&config)?;
    let mut step = Step::parse(&args.step, args.sector, args.period)
        .with_context(|| format!("unknown step identifier '{}'", args.step))?;

    loop {
        let report = pipeline.execute(step).await;
        println!("{}", serde_json::to_string_pretty(&report)?);

        let next = match report.next.as_deref() {
            Some(next) if args.follow => parse_next(next),
            _ => None,
        };
        match next {
            Some(next_step) => step = next_step,
            None => break,
        }
    }
    Ok(())
}

/// Parses a returned `?step=2&sector=3` pointer back into a step — the CLI
/// flavor of the trampoline the HTTP scheduler drives.
fn parse_next(query: &str) -> Option<Step> {
    let mut step = "";
    let mut sector = 0;
    let mut period = 0;
    for pair in query.trim_start_matches('?').split('&') {
        match pair.split_once('=') {
            Some(("step", value)) => step = value,
            Some(("sector", value)) => sector = value.parse().ok()?,
            Some(("period", value)) => period = value.parse().ok()?,
            _ => {}
        }
    }
    Step::parse(step, sector, period)
}
