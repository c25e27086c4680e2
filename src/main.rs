//! View service - main entry point.
//!
//! - `serve`: HTTP surface over the view catalogue
//! - `run`: run one view and print its result
//! - `backtest block-deal`: block-deal signal backtest

use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use view_service::app::DEFAULT_MANIFEST;
use view_service::backtest::block_deal::{self, BlockDealOptions, BlockDealRule};
use view_service::backtest::BacktestFramework;
use view_service::http::{cancel_on_ctrl_c, serve};
use view_service::views::run_view;
use view_service::{App, Config, Error, Result};

#[derive(Parser)]
#[command(name = "view-service")]
#[command(about = "Resilient financial data views", long_about = None)]
struct Cli {
    /// Tool manifest (JSON list of function descriptors)
    #[arg(long, global = true, env = "FINSKILLS_MANIFEST", default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address (overrides FINSKILLS_LISTEN_ADDR)
        #[arg(long)]
        addr: Option<String>,

        /// Directory of declarative JSON views
        #[arg(long, env = "FINSKILLS_VIEWS_DIR")]
        views_dir: Option<PathBuf>,
    },

    /// Run one view and print the result as JSON
    Run {
        /// View name
        view: String,

        /// View params as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Bypass cached responses
        #[arg(long)]
        refresh: bool,

        /// Directory of declarative JSON views
        #[arg(long, env = "FINSKILLS_VIEWS_DIR")]
        views_dir: Option<PathBuf>,
    },

    /// Backtest a signal rule set
    Backtest {
        #[command(subcommand)]
        suite: BacktestCommand,
    },
}

#[derive(Subcommand)]
enum BacktestCommand {
    /// Block-deal (大宗交易) rules
    BlockDeal(BlockDealArgs),
}

#[derive(Args)]
struct BlockDealArgs {
    /// Rule number (1 building position, 2 selling pressure, 3 premium warning, 4 liquidity risk)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=4))]
    rule: u8,

    #[arg(long, default_value = "2020-01-01")]
    start: String,

    #[arg(long, default_value = "2023-12-31")]
    end: String,

    /// Holding period in trading days (default depends on the rule)
    #[arg(long)]
    holding: Option<u32>,

    #[arg(long, default_value_t = 2000)]
    max_signals: usize,

    /// Market argument passed to the block-deal source
    #[arg(long, default_value = "A股")]
    symbol: String,

    /// Cap on distinct symbols whose prices are fetched
    #[arg(long, default_value_t = 200)]
    max_symbols: usize,

    #[arg(long, default_value = "backtest_cache/block_deal")]
    cache_dir: PathBuf,

    /// Result document (default backtest_results/block_deal/<rule>.json)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    view_service::observability::init_tracing();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "command_failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::load()?;

    match cli.command {
        Commands::Serve { addr, views_dir } => {
            if let Some(addr) = addr {
                config.server.listen_addr = addr;
            }
            let app = App::build(config, &cli.manifest, views_dir.as_deref())?;
            let listener = TcpListener::bind(&app.config.server.listen_addr).await?;

            let shutdown = CancellationToken::new();
            cancel_on_ctrl_c(shutdown.clone());
            serve(listener, app.state(), shutdown).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            view,
            params,
            refresh,
            views_dir,
        } => {
            let params = parse_params(&params)?;
            let app = App::build(config, &cli.manifest, views_dir.as_deref())?;
            let spec = app
                .views
                .get(&view)
                .ok_or_else(|| Error::not_found(format!("Unknown view: {}", view)))?;

            let result = run_view(
                spec,
                &params,
                app.provider.as_ref(),
                refresh,
                app.config.server.view_parallelism,
            )
            .await;
            println!("{}", serde_json::to_string_pretty(&result.to_value())?);
            Ok(if result.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Backtest {
            suite: BacktestCommand::BlockDeal(args),
        } => {
            let app = App::build(config, &cli.manifest, None)?;
            run_block_deal(&app, args).await
        }
    }
}

fn parse_params(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(params)) => Ok(params),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) => Err(Error::validation("--params must be a JSON object")),
        Err(e) => Err(Error::validation(format!("--params is not valid JSON: {}", e))),
    }
}

async fn run_block_deal(app: &App, args: BlockDealArgs) -> Result<ExitCode> {
    let rule = BlockDealRule::from_number(args.rule)
        .ok_or_else(|| Error::validation(format!("unknown rule: {}", args.rule)))?;
    let out = args
        .out
        .unwrap_or_else(|| Path::new("backtest_results/block_deal").join(format!("{}.json", rule.slug())));

    let framework = BacktestFramework::from_provider(&args.cache_dir, app.provider.clone());
    let options = BlockDealOptions {
        rule,
        start: args.start,
        end: args.end,
        holding: args.holding,
        max_signals: args.max_signals,
        symbol: args.symbol,
        max_symbols: args.max_symbols,
    };

    let result = block_deal::run(&framework, &options).await?;
    result.save(&out).await?;
    tracing::info!(
        rule = rule.slug(),
        signals = result.signals.len(),
        out = %out.display(),
        "backtest_saved"
    );

    let summary = serde_json::json!({
        "rule": rule.slug(),
        "statistics": result.statistics.rounded(),
        "out": out.display().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(ExitCode::SUCCESS)
}
