use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use sixdice_execution::{
    EngineConfig, PhaseConfig, SettlementConfig, SixMatchPolicy, TableRules,
};
use sixdice_types::normalize_amount;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Six-dice live table")]
pub struct Args {
    /// Host interface to bind.
    #[arg(long, env = "SIXDICE_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(short, long, env = "SIXDICE_PORT", default_value_t = 9123)]
    pub port: u16,

    /// Emit logs as JSON lines.
    #[arg(long, env = "SIXDICE_LOG_JSON")]
    pub log_json: bool,

    /// Gap between rounds in milliseconds.
    #[arg(long, env = "SIXDICE_WAITING_MS", default_value_t = 5_000)]
    pub waiting_ms: u64,

    /// Betting window in milliseconds.
    #[arg(long, env = "SIXDICE_BETTING_MS", default_value_t = 30_000)]
    pub betting_ms: u64,

    /// Time between betting closing and dice resolution in milliseconds.
    #[arg(long, env = "SIXDICE_CLOSED_MS", default_value_t = 21_000)]
    pub closed_ms: u64,

    /// How long results stay on display in milliseconds.
    #[arg(long, env = "SIXDICE_RESULT_MS", default_value_t = 20_000)]
    pub result_ms: u64,

    #[arg(long, env = "SIXDICE_COMPLETED_MS", default_value_t = 1_000)]
    pub completed_ms: u64,

    /// Phase clock resolution in milliseconds.
    #[arg(long, env = "SIXDICE_TICK_MS", default_value_t = 250)]
    pub tick_ms: u64,

    #[arg(long, env = "SIXDICE_MIN_BET", default_value = "1")]
    pub min_bet: Decimal,

    #[arg(long, env = "SIXDICE_MAX_BET", default_value = "10000")]
    pub max_bet: Decimal,

    /// Six-match payout: `zero`, `top-tier` or `jackpot:<multiplier>`.
    #[arg(long, env = "SIXDICE_SIX_MATCH", default_value = "top-tier")]
    pub six_match: SixMatchPolicy,

    /// Settlement attempts before a round is voided.
    #[arg(long, env = "SIXDICE_SETTLEMENT_ATTEMPTS", default_value_t = 5)]
    pub settlement_attempts: u32,

    /// Settlement grace period in milliseconds before a round is voided.
    #[arg(long, env = "SIXDICE_SETTLEMENT_GRACE_MS", default_value_t = 10_000)]
    pub settlement_grace_ms: u64,

    /// Completed rounds kept for results, history and stats.
    #[arg(long, env = "SIXDICE_ARCHIVE_RETENTION", default_value_t = EngineConfig::DEFAULT_ARCHIVE_RETENTION)]
    pub archive_retention: usize,

    /// Frames buffered per streaming session before it is pruned.
    #[arg(long, env = "SIXDICE_WS_OUTBOUND_CAPACITY", default_value_t = 64)]
    pub ws_outbound_capacity: usize,

    /// Token required by operator routes. Operator routes are not mounted
    /// without it.
    #[arg(long, env = "SIXDICE_OPERATOR_TOKEN")]
    pub operator_token: Option<String>,

    /// Seed for reproducible dice (optional).
    #[arg(long, env = "SIXDICE_DICE_SEED")]
    pub dice_seed: Option<u64>,

    /// Development only: deposit credited the first time a user is seen.
    #[arg(long, env = "SIXDICE_STARTING_BALANCE")]
    pub starting_balance: Option<Decimal>,
}

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub listen: SocketAddr,
    pub tick_ms: u64,
    pub ws_outbound_capacity: usize,
    pub operator_token: Option<String>,
    pub starting_balance: Option<Decimal>,
    pub engine: EngineConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 9123)),
            tick_ms: 250,
            ws_outbound_capacity: 64,
            operator_token: None,
            starting_balance: None,
            engine: EngineConfig::default(),
        }
    }
}

pub fn build_config(args: &Args) -> Result<ServiceConfig> {
    if args.tick_ms == 0 {
        anyhow::bail!("tick_ms must be > 0");
    }
    if args.ws_outbound_capacity == 0 {
        anyhow::bail!("ws_outbound_capacity must be > 0");
    }
    let starting_balance = match args.starting_balance {
        Some(amount) => Some(
            normalize_amount(amount)
                .with_context(|| format!("invalid starting_balance: {amount}"))?,
        ),
        None => None,
    };
    let operator_token = args
        .operator_token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    let engine = EngineConfig {
        phases: PhaseConfig::new(
            args.waiting_ms,
            args.betting_ms,
            args.closed_ms,
            args.result_ms,
            args.completed_ms,
        ),
        rules: TableRules {
            min_bet: args.min_bet,
            max_bet: args.max_bet,
            six_match: args.six_match,
        },
        settlement: SettlementConfig {
            max_attempts: args.settlement_attempts,
            grace_ms: args.settlement_grace_ms,
        },
        archive_retention: args.archive_retention,
        dice_seed: args.dice_seed,
    };
    engine.validate().context("invalid table configuration")?;

    Ok(ServiceConfig {
        listen: SocketAddr::new(args.host, args.port),
        tick_ms: args.tick_ms,
        ws_outbound_capacity: args.ws_outbound_capacity,
        operator_token,
        starting_balance,
        engine,
    })
}
