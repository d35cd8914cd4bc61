use crate::config::AppConfig;
use crate::errors::EngineResult;
use crate::market::{FlavorProcessState, Market};
use crate::models::volatility::RealizedVol;
use crate::models::{ExerciseStyle, OptionKind, OptionParameters, PricingEngine, DAYS_PER_YEAR};
use crate::paper::book::PaperBook;
use crate::paper::position::{MarketQuote, OpenRequest, Position, PositionMark};
use crate::paper::tracker::{compute_portfolio, PortfolioSummary};
use crate::state::*;
use smallvec::SmallVec;

/// Quote board strikes, as multiples of spot
const BOARD_MONEYNESS: [f64; 3] = [0.9, 1.0, 1.1];
const BOARD_KINDS: [OptionKind; 2] = [OptionKind::Call, OptionKind::Put];
const BOARD_STYLES: [ExerciseStyle; 2] = [ExerciseStyle::European, ExerciseStyle::American];

/// Bounds on a realized estimate before it is used to quote
const MIN_QUOTE_VOL: f64 = 0.01;
const MAX_QUOTE_VOL: f64 = 5.0;

/// Output actions from one engine step.
#[derive(Debug)]
pub enum EngineAction {
    SettlePosition {
        position_id: uuid::Uuid,
        flavor: String,
        pnl: f64,
    },
    ValuationFailed {
        position_id: uuid::Uuid,
        reason: String,
    },
    BroadcastUpdate(WsMessage),
    DbWrite(DbCommand),
}

/// Quote inputs that stay fixed for a session.
#[derive(Debug, Clone, Copy)]
struct QuoteSettings {
    rate: f64,
    dt_days: f64,
    fallback_vol: f64,
    expiry_days: u64,
}

/// Realized vol when the estimator has enough history, else the configured fallback.
pub fn quote_volatility(realized: &RealizedVol, dt_days: f64, fallback: f64) -> f64 {
    if !realized.is_ready() {
        return fallback;
    }
    let vol = realized.annualized_vol(dt_days);
    if vol.is_finite() && vol > 0.0 {
        vol.clamp(MIN_QUOTE_VOL, MAX_QUOTE_VOL)
    } else {
        fallback
    }
}

fn lookup_quote(
    market: &Market,
    vols: &[RealizedVol],
    settings: QuoteSettings,
    flavor: &str,
) -> Option<MarketQuote> {
    let idx = market.flavors().iter().position(|f| f.name == flavor)?;
    Some(MarketQuote {
        spot: market.flavors()[idx].spot,
        day: market.day(),
        volatility: quote_volatility(&vols[idx], settings.dt_days, settings.fallback_vol),
        rate: settings.rate,
    })
}

/// The engine task's whole world: market, estimators, book and the last published marks.
pub struct Session {
    market: Market,
    vols: Vec<RealizedVol>,
    book: PaperBook,
    engine: PricingEngine,
    settings: QuoteSettings,
    quotes: Vec<QuoteRow>,
    marks: Vec<PositionMark>,
    portfolio: PortfolioSummary,
}

impl Session {
    pub fn new(config: &AppConfig) -> EngineResult<Self> {
        let flavors = config.flavors()?;
        let market = Market::seeded(flavors, config.correlation.as_deref(), config.seed)?;
        let engine = PricingEngine::new(config.lattice_steps)?;

        let vols = market
            .flavors()
            .iter()
            .map(|f| {
                let mut rv = RealizedVol::new();
                rv.update(f.spot);
                rv
            })
            .collect();

        let mut session = Self {
            market,
            vols,
            book: PaperBook::new(),
            engine,
            settings: QuoteSettings {
                rate: config.risk_free_rate,
                dt_days: config.dt_days,
                fallback_vol: config.quote_volatility,
                expiry_days: config.quote_expiry_days,
            },
            quotes: Vec::new(),
            marks: Vec::new(),
            portfolio: PortfolioSummary::default(),
        };
        session.quotes = session.build_quote_board();
        Ok(session)
    }

    #[inline]
    pub fn day(&self) -> u64 {
        self.market.day()
    }

    #[inline]
    pub fn flavors(&self) -> &[FlavorProcessState] {
        self.market.flavors()
    }

    #[inline]
    pub fn quotes(&self) -> &[QuoteRow] {
        &self.quotes
    }

    #[inline]
    pub fn portfolio(&self) -> &PortfolioSummary {
        &self.portfolio
    }

    #[inline]
    pub fn engine(&self) -> &PricingEngine {
        &self.engine
    }

    #[inline]
    pub fn book(&self) -> &PaperBook {
        &self.book
    }

    /// True once every flavor's realized estimator can drive its quotes.
    pub fn vol_ready(&self) -> bool {
        self.vols.iter().all(RealizedVol::is_ready)
    }

    pub fn quote_for(&self, flavor: &str) -> Option<MarketQuote> {
        lookup_quote(&self.market, &self.vols, self.settings, flavor)
    }

    /// Advance one simulated day.
    ///
    /// Four phases per tick:
    ///   1. Step the market and feed each flavor's realized-vol estimator
    ///   2. Reprice the quote board against the fresh spots
    ///   3. Mark the paper book
    ///   4. Settle everything that reached expiry, then summarize the portfolio
    pub fn tick(&mut self, timestamp: &str) -> SmallVec<[EngineAction; 16]> {
        let mut actions: SmallVec<[EngineAction; 16]> = SmallVec::new();

        // ── PHASE 1: Market step ──
        let outcomes = self.market.step(self.settings.dt_days);
        let day = self.market.day();
        let mut prices = Vec::with_capacity(outcomes.len());

        for outcome in &outcomes {
            let flavor = &self.market.flavors()[outcome.index];
            self.vols[outcome.index].update(outcome.price);

            if outcome.jump != 0.0 {
                tracing::debug!(flavor = %flavor.name, day, jump = outcome.jump, "price jump");
            }

            actions.push(EngineAction::DbWrite(DbCommand::InsertPrice {
                day,
                flavor: flavor.name.clone(),
                price: outcome.price,
                jump: outcome.jump,
                timestamp: timestamp.to_string(),
            }));
            prices.push(FlavorPrice {
                flavor: flavor.name.clone(),
                price: outcome.price,
                jump: outcome.jump,
            });
        }

        actions.push(EngineAction::BroadcastUpdate(WsMessage::DayAdvanced {
            day,
            prices,
            timestamp: timestamp.to_string(),
        }));

        // ── PHASE 2: Quote board ──
        self.quotes = self.build_quote_board();

        // ── PHASE 3: Mark-to-market ──
        for (position_id, err) in self.revalue() {
            tracing::warn!(%position_id, error = %err, "position valuation failed");
            actions.push(EngineAction::ValuationFailed {
                position_id,
                reason: err.to_string(),
            });
        }

        // ── PHASE 4: Settlement + portfolio ──
        for settled in self.book.settle_expired(&self.marks) {
            let id = settled.position.id;
            tracing::info!(
                %id,
                flavor = %settled.position.flavor,
                instrument = %settled.position.instrument.label(),
                exit = settled.exit_value,
                pnl = settled.pnl,
                "position settled"
            );

            actions.push(EngineAction::SettlePosition {
                position_id: id,
                flavor: settled.position.flavor.clone(),
                pnl: settled.pnl,
            });
            actions.push(EngineAction::DbWrite(DbCommand::SettlePosition {
                id: id.to_string(),
                exit_value: settled.exit_value,
                pnl: settled.pnl,
                closed_day: day,
                closed_at: timestamp.to_string(),
            }));
            actions.push(EngineAction::BroadcastUpdate(WsMessage::PositionSettled {
                position_id: id.to_string(),
                flavor: settled.position.flavor,
                exit_value: settled.exit_value,
                pnl: settled.pnl,
                day,
            }));
        }
        self.marks.retain(|m| !m.expired);
        self.portfolio = compute_portfolio(&self.marks, self.book.realized_pnl());

        actions.push(EngineAction::BroadcastUpdate(WsMessage::PortfolioUpdate {
            day,
            market_value: self.portfolio.market_value,
            unrealized_pnl: self.portfolio.unrealized_pnl,
            realized_pnl: self.portfolio.realized_pnl,
            total_pnl: self.portfolio.total_pnl,
            greeks: self.portfolio.greeks,
            open_positions: self.portfolio.open_positions,
        }));
        actions.push(EngineAction::DbWrite(DbCommand::InsertPortfolioSnapshot {
            day,
            timestamp: timestamp.to_string(),
            market_value: self.portfolio.market_value,
            unrealized_pnl: self.portfolio.unrealized_pnl,
            realized_pnl: self.portfolio.realized_pnl,
            greeks: self.portfolio.greeks,
        }));

        actions
    }

    /// Open a paper position at the current quote and refresh the marks.
    pub fn open(
        &mut self,
        request: &OpenRequest,
        timestamp: &str,
    ) -> EngineResult<(Position, SmallVec<[EngineAction; 16]>)> {
        let market = &self.market;
        let vols = &self.vols;
        let settings = self.settings;
        let position = self.book.open(
            request,
            |flavor| lookup_quote(market, vols, settings, flavor),
            &self.engine,
        )?;
        let instrument_json = serde_json::to_string(&position.instrument)?;

        tracing::info!(
            id = %position.id,
            flavor = %position.flavor,
            instrument = %position.instrument.label(),
            quantity = position.quantity,
            entry = position.entry_price,
            "position opened"
        );

        let mut actions: SmallVec<[EngineAction; 16]> = SmallVec::new();
        actions.push(EngineAction::DbWrite(DbCommand::InsertPosition {
            id: position.id.to_string(),
            flavor: position.flavor.clone(),
            instrument: instrument_json,
            quantity: position.quantity,
            entry_price: position.entry_price,
            opened_day: position.opened_day,
            opened_at: timestamp.to_string(),
        }));
        actions.push(EngineAction::BroadcastUpdate(WsMessage::PositionOpened {
            position_id: position.id.to_string(),
            flavor: position.flavor.clone(),
            instrument: position.instrument.label(),
            quantity: position.quantity,
            entry_price: position.entry_price,
            day: position.opened_day,
        }));

        for (position_id, err) in self.revalue() {
            actions.push(EngineAction::ValuationFailed {
                position_id,
                reason: err.to_string(),
            });
        }
        self.portfolio = compute_portfolio(&self.marks, self.book.realized_pnl());

        Ok((position, actions))
    }

    pub fn snapshot(&self, engine_state: EngineState, timestamp: &str) -> EngineSnapshot {
        let flavors = self
            .market
            .flavors()
            .iter()
            .zip(&self.vols)
            .map(|(f, rv)| FlavorSnapshot {
                name: f.name.clone(),
                spot: f.spot,
                long_run_mean: f.params.long_run_mean,
                last_jump: f.last_jump,
                quote_volatility: quote_volatility(rv, self.settings.dt_days, self.settings.fallback_vol),
                realized: rv.state,
            })
            .collect();

        EngineSnapshot {
            engine_state,
            day: self.market.day(),
            timestamp: timestamp.to_string(),
            rate: self.settings.rate,
            flavors,
            quotes: self.quotes.clone(),
            positions: self.marks.clone(),
            portfolio: self.portfolio.clone(),
        }
    }

    fn revalue(&mut self) -> Vec<(uuid::Uuid, crate::errors::EngineError)> {
        let market = &self.market;
        let vols = &self.vols;
        let settings = self.settings;
        let (marks, failures) = self
            .book
            .mark_all(|flavor| lookup_quote(market, vols, settings, flavor), &self.engine);
        self.marks = marks;
        failures
    }

    fn build_quote_board(&self) -> Vec<QuoteRow> {
        let expiry_day = self.market.day() + self.settings.expiry_days;
        let t = self.settings.expiry_days as f64 / DAYS_PER_YEAR;
        let mut rows = Vec::with_capacity(
            self.market.flavors().len() * BOARD_MONEYNESS.len() * BOARD_KINDS.len() * BOARD_STYLES.len(),
        );

        for (flavor, rv) in self.market.flavors().iter().zip(&self.vols) {
            let vol = quote_volatility(rv, self.settings.dt_days, self.settings.fallback_vol);
            for m in BOARD_MONEYNESS {
                let strike = ((flavor.spot * m * 100.0).round() / 100.0).max(0.01);
                for kind in BOARD_KINDS {
                    for style in BOARD_STYLES {
                        let params = OptionParameters {
                            spot: flavor.spot,
                            strike,
                            time_to_expiry: t,
                            volatility: vol,
                            rate: self.settings.rate,
                            kind,
                            style,
                        };
                        let priced = self
                            .engine
                            .price(&params)
                            .and_then(|price| self.engine.greeks(&params).map(|greeks| (price, greeks)));
                        match priced {
                            Ok((price, greeks)) => rows.push(QuoteRow {
                                flavor: flavor.name.clone(),
                                strike,
                                expiry_day,
                                kind,
                                style,
                                price,
                                greeks,
                            }),
                            Err(e) => tracing::warn!(
                                flavor = %flavor.name,
                                strike,
                                %kind,
                                %style,
                                error = %e,
                                "quote failed"
                            ),
                        }
                    }
                }
            }
        }
        rows
    }
}
