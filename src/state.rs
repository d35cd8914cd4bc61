use crate::config::AppConfig;
use crate::db::DbPool;
use crate::errors::EngineResult;
use crate::models::volatility::RealizedVolState;
use crate::models::{ExerciseStyle, Greeks, OptionKind, PricingEngine};
use crate::paper::position::{OpenRequest, Position, PositionMark};
use crate::paper::tracker::PortfolioSummary;
use portable_atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

// ── Engine State Machine ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Ticking, but realized vol not yet ready for every flavor
    Warming,
    Running,
    /// Day budget exhausted
    Finished,
    Halted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warming => write!(f, "warming"),
            Self::Running => write!(f, "running"),
            Self::Finished => write!(f, "finished"),
            Self::Halted => write!(f, "halted"),
        }
    }
}

// ── Messages INTO the engine (bounded channel) ──

#[derive(Debug)]
pub enum EngineEvent {
    Tick,
    OpenPosition {
        request: OpenRequest,
        reply: oneshot::Sender<EngineResult<Position>>,
    },
    Shutdown,
}

// ── Messages OUT of the engine ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct FlavorPrice {
    pub flavor: String,
    pub price: f64,
    pub jump: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "type")]
pub enum WsMessage {
    #[serde(rename = "day_advanced")]
    DayAdvanced {
        day: u64,
        prices: Vec<FlavorPrice>,
        timestamp: String,
    },

    #[serde(rename = "portfolio_update")]
    PortfolioUpdate {
        day: u64,
        market_value: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
        total_pnl: f64,
        greeks: Greeks,
        open_positions: usize,
    },

    #[serde(rename = "position_opened")]
    PositionOpened {
        position_id: String,
        flavor: String,
        instrument: String,
        quantity: f64,
        entry_price: f64,
        day: u64,
    },

    #[serde(rename = "position_settled")]
    PositionSettled {
        position_id: String,
        flavor: String,
        exit_value: f64,
        pnl: f64,
        day: u64,
    },

    #[serde(rename = "engine_state")]
    EngineStateMsg {
        state: String,
        reason: String,
    },
}

// ── DB Commands (sent to writer task via bounded channel) ──

#[derive(Debug)]
pub enum DbCommand {
    InsertPrice {
        day: u64,
        flavor: String,
        price: f64,
        jump: f64,
        timestamp: String,
    },
    InsertPosition {
        id: String,
        flavor: String,
        instrument: String,
        quantity: f64,
        entry_price: f64,
        opened_day: u64,
        opened_at: String,
    },
    SettlePosition {
        id: String,
        exit_value: f64,
        pnl: f64,
        closed_day: u64,
        closed_at: String,
    },
    InsertPortfolioSnapshot {
        day: u64,
        timestamp: String,
        market_value: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
        greeks: Greeks,
    },
}

// ── Snapshot pieces ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct FlavorSnapshot {
    pub name: String,
    pub spot: f64,
    pub long_run_mean: f64,
    pub last_jump: f64,
    /// Annualized volatility used for this flavor's quotes
    pub quote_volatility: f64,
    pub realized: RealizedVolState,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct QuoteRow {
    pub flavor: String,
    pub strike: f64,
    pub expiry_day: u64,
    pub kind: OptionKind,
    pub style: ExerciseStyle,
    pub price: f64,
    pub greeks: Greeks,
}

// ── Engine snapshot for dashboard (sent via watch channel) ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineSnapshot {
    pub engine_state: EngineState,
    pub day: u64,
    pub timestamp: String,
    pub rate: f64,
    pub flavors: Vec<FlavorSnapshot>,
    pub quotes: Vec<QuoteRow>,
    pub positions: Vec<PositionMark>,
    pub portfolio: PortfolioSummary,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            engine_state: EngineState::Warming,
            day: 0,
            timestamp: String::new(),
            rate: 0.0,
            flavors: Vec::new(),
            quotes: Vec::new(),
            positions: Vec::new(),
            portfolio: PortfolioSummary::default(),
        }
    }
}

// ── Performance Counters (lock-free) ──

pub struct PerfCounters {
    pub ticks_processed: AtomicU64,
    pub quotes_priced: AtomicU64,
    pub positions_opened: AtomicU64,
    pub positions_settled: AtomicU64,
    pub errors_recovered: AtomicU64,
    pub ws_messages_sent: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            ticks_processed: AtomicU64::new(0),
            quotes_priced: AtomicU64::new(0),
            positions_opened: AtomicU64::new(0),
            positions_settled: AtomicU64::new(0),
            errors_recovered: AtomicU64::new(0),
            ws_messages_sent: AtomicU64::new(0),
        }
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

// ── Application shared state (channels, not locks) ──

pub struct AppState {
    pub config: AppConfig,
    pub db: DbPool,

    /// Stateless; REST handlers price on-demand quotes with it
    pub engine: PricingEngine,

    // Engine -> Dashboard: latest snapshot (watch = single producer, multi consumer)
    pub snapshot_tx: watch::Sender<EngineSnapshot>,
    pub snapshot_rx: watch::Receiver<EngineSnapshot>,

    // Engine -> Dashboard: event stream (broadcast for WS clients)
    pub ws_tx: broadcast::Sender<WsMessage>,

    // Ticker/REST -> Engine: bounded event channel
    pub engine_tx: mpsc::Sender<EngineEvent>,

    // Engine -> DB Writer: bounded command channel
    pub db_tx: mpsc::Sender<DbCommand>,

    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: DbPool,
        engine: PricingEngine,
        engine_tx: mpsc::Sender<EngineEvent>,
        db_tx: mpsc::Sender<DbCommand>,
    ) -> Arc<Self> {
        let (ws_tx, _) = broadcast::channel(2048);
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());

        Arc::new(Self {
            config,
            db,
            engine,
            snapshot_tx,
            snapshot_rx,
            ws_tx,
            engine_tx,
            db_tx,
            counters: PerfCounters::new(),
        })
    }

    #[inline]
    pub fn broadcast(&self, msg: WsMessage) {
        self.counters.ws_messages_sent.fetch_add(1, Ordering::Relaxed);
        let _ = self.ws_tx.send(msg);
    }
}
