use flavor_market::config::AppConfig;
use flavor_market::db;
use flavor_market::errors::EngineError;
use flavor_market::paper::session::{EngineAction, Session};
use flavor_market::server;
use flavor_market::state::*;
use portable_atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    // Structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("flavor_market engine starting");

    let cfg = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    // Built before any task starts, so a bad calibration or correlation matrix fails fast
    let session = match Session::new(&cfg) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("session init error: {e}");
            std::process::exit(1);
        }
    };

    let db_pool = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    // Create bounded channels
    let (engine_tx, engine_rx) = mpsc::channel::<EngineEvent>(512);
    let (db_tx, db_rx) = mpsc::channel::<DbCommand>(1024);

    let app_state = AppState::new(
        cfg.clone(),
        db_pool.clone(),
        session.engine().clone(),
        engine_tx.clone(),
        db_tx.clone(),
    );

    // ── Spawn tasks ──

    // 1. DB writer task (dedicated, sole writer)
    let db_pool_writer = db_pool.clone();
    tokio::spawn(async move {
        db::run_db_writer(db_pool_writer, db_rx).await;
    });

    // 2. Tick generator (one simulated step per interval)
    let tick_tx = engine_tx.clone();
    let tick_ms = cfg.tick_interval_ms;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(tick_ms));
        loop {
            interval.tick().await;
            if tick_tx.send(EngineEvent::Tick).await.is_err() {
                break;
            }
        }
    });

    // 3. Engine task (owns the market and the paper book)
    let engine_state = app_state.clone();
    let max_days = cfg.max_days;
    tokio::spawn(async move {
        run_engine(engine_state, session, max_days, engine_rx).await;
    });

    // 4. Ctrl-C -> orderly engine shutdown
    let shutdown_tx = engine_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(EngineEvent::Shutdown).await;
        }
    });

    // 5. Axum HTTP + WS server
    let port = cfg.server_port;

    let app = axum::Router::new()
        .route("/api/state", axum::routing::get(server::routes::get_state))
        .route("/api/history", axum::routing::get(server::routes::get_history))
        .route("/api/quote", axum::routing::get(server::routes::get_quote))
        .route(
            "/api/positions",
            axum::routing::get(server::routes::get_positions).post(server::routes::open_position),
        )
        .route("/api/portfolio", axum::routing::get(server::routes::get_portfolio))
        .route("/api/counters", axum::routing::get(server::routes::get_counters))
        .route("/ws", axum::routing::get(server::ws::ws_handler))
        .fallback_service(
            tower_http::services::ServeDir::new("dashboard/dist")
                .fallback(tower_http::services::ServeFile::new("dashboard/dist/index.html")),
        )
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(app_state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}

/// Core engine loop. Receives events, advances the session, emits actions.
/// No locks and no IO inside the session itself.
async fn run_engine(
    state: Arc<AppState>,
    mut session: Session,
    max_days: u64,
    mut rx: mpsc::Receiver<EngineEvent>,
) {
    tracing::info!(flavors = session.flavors().len(), max_days, "engine task started");

    let mut engine_state = EngineState::Warming;
    publish_snapshot(&state, &session, engine_state);

    while let Some(event) = rx.recv().await {
        if let Err(e) = process_event(event, &mut engine_state, &mut session, max_days, &state).await {
            tracing::error!(error = %e, "engine error");
            state.counters.errors_recovered.fetch_add(1, Ordering::Relaxed);

            if matches!(e, EngineError::ChannelClosed(_)) {
                set_state(&state, &mut engine_state, EngineState::Halted, &e.to_string());
                publish_snapshot(&state, &session, engine_state);
                tracing::error!("ENGINE HALTED: {e}");
                break;
            }
        }

        if engine_state == EngineState::Halted {
            break;
        }
    }

    tracing::info!(day = session.day(), "engine task shutting down");
}

async fn process_event(
    event: EngineEvent,
    engine_state: &mut EngineState,
    session: &mut Session,
    max_days: u64,
    state: &Arc<AppState>,
) -> Result<(), EngineError> {
    match event {
        EngineEvent::Tick => {
            if matches!(*engine_state, EngineState::Finished | EngineState::Halted) {
                return Ok(());
            }

            let now = chrono::Utc::now().to_rfc3339();
            let actions = session.tick(&now);

            state.counters.ticks_processed.fetch_add(1, Ordering::Relaxed);
            state
                .counters
                .quotes_priced
                .fetch_add(session.quotes().len() as u64, Ordering::Relaxed);

            execute_actions(actions, state).await?;

            if *engine_state == EngineState::Warming && session.vol_ready() {
                set_state(state, engine_state, EngineState::Running, "realized volatility ready");
            }
            if max_days > 0 && session.day() >= max_days {
                let portfolio = session.portfolio();
                tracing::info!(
                    day = session.day(),
                    realized = portfolio.realized_pnl,
                    unrealized = portfolio.unrealized_pnl,
                    open = portfolio.open_positions,
                    "day budget reached"
                );
                set_state(state, engine_state, EngineState::Finished, "day budget reached");
            }

            publish_snapshot(state, session, *engine_state);
        }

        EngineEvent::OpenPosition { request, reply } => {
            let now = chrono::Utc::now().to_rfc3339();
            let result = if *engine_state == EngineState::Finished {
                Err(EngineError::InvalidParameter("session finished".into()))
            } else {
                session.open(&request, &now)
            };

            match result {
                Ok((position, actions)) => {
                    state.counters.positions_opened.fetch_add(1, Ordering::Relaxed);
                    execute_actions(actions, state).await?;
                    publish_snapshot(state, session, *engine_state);
                    let _ = reply.send(Ok(position));
                }
                Err(e) => {
                    tracing::warn!(flavor = %request.flavor, error = %e, "open rejected");
                    state.counters.errors_recovered.fetch_add(1, Ordering::Relaxed);
                    let _ = reply.send(Err(e));
                }
            }
        }

        EngineEvent::Shutdown => {
            tracing::info!("shutdown event received");
            set_state(state, engine_state, EngineState::Halted, "shutdown requested");
            publish_snapshot(state, session, *engine_state);
        }
    }

    Ok(())
}

fn set_state(state: &Arc<AppState>, current: &mut EngineState, next: EngineState, reason: &str) {
    if *current == next {
        return;
    }
    tracing::info!(from = %current, to = %next, reason, "engine state change");
    *current = next;
    state.broadcast(WsMessage::EngineStateMsg {
        state: next.to_string(),
        reason: reason.to_string(),
    });
}

/// Latest view for REST and new WS clients (watch channel, no lock)
fn publish_snapshot(state: &Arc<AppState>, session: &Session, engine_state: EngineState) {
    let now = chrono::Utc::now().to_rfc3339();
    let _ = state.snapshot_tx.send(session.snapshot(engine_state, &now));
}

/// Execute engine actions (cold path -- involves channel sends)
async fn execute_actions(
    actions: smallvec::SmallVec<[EngineAction; 16]>,
    state: &Arc<AppState>,
) -> Result<(), EngineError> {
    for action in actions {
        match action {
            EngineAction::SettlePosition { .. } => {
                state.counters.positions_settled.fetch_add(1, Ordering::Relaxed);
            }
            EngineAction::ValuationFailed { .. } => {
                state.counters.errors_recovered.fetch_add(1, Ordering::Relaxed);
            }
            EngineAction::BroadcastUpdate(msg) => {
                state.broadcast(msg);
            }
            EngineAction::DbWrite(cmd) => {
                state
                    .db_tx
                    .send(cmd)
                    .await
                    .map_err(|_| EngineError::ChannelClosed("db writer".into()))?;
            }
        }
    }
    Ok(())
}
