use crate::errors::{invalid, EngineError, EngineResult};
use crate::models::PricingEngine;
use crate::paper::position::{mark_position, open_position, MarketQuote, OpenRequest, Position, PositionMark};

/// A position that reached expiry and was closed at its final mark.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SettledPosition {
    pub position: Position,
    pub exit_value: f64,
    pub pnl: f64,
}

/// Open paper positions plus realized P&L. Owned by the engine task.
#[derive(Debug, Default)]
pub struct PaperBook {
    positions: Vec<Position>,
    realized_pnl: f64,
}

impl PaperBook {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    #[inline]
    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    /// Price and record a new position. `quote_for` resolves a flavor to its quote.
    pub fn open<F>(
        &mut self,
        request: &OpenRequest,
        quote_for: F,
        engine: &PricingEngine,
    ) -> EngineResult<Position>
    where
        F: Fn(&str) -> Option<MarketQuote>,
    {
        let quote = quote_for(&request.flavor)
            .ok_or_else(|| invalid(format!("unknown flavor {}", request.flavor)))?;
        let position = open_position(request, &quote, engine)?;
        self.positions.push(position.clone());
        Ok(position)
    }

    /// Mark every open position. Positions that fail to value are reported, not dropped.
    pub fn mark_all<F>(
        &self,
        quote_for: F,
        engine: &PricingEngine,
    ) -> (Vec<PositionMark>, Vec<(uuid::Uuid, EngineError)>)
    where
        F: Fn(&str) -> Option<MarketQuote>,
    {
        let mut marks = Vec::with_capacity(self.positions.len());
        let mut failures = Vec::new();
        for position in &self.positions {
            let result = quote_for(&position.flavor)
                .ok_or_else(|| invalid(format!("unknown flavor {}", position.flavor)))
                .and_then(|quote| mark_position(position, &quote, engine));
            match result {
                Ok(mark) => marks.push(mark),
                Err(e) => failures.push((position.id, e)),
            }
        }
        (marks, failures)
    }

    /// Close every position whose mark says it has expired, realizing its P&L.
    pub fn settle_expired(&mut self, marks: &[PositionMark]) -> Vec<SettledPosition> {
        let mut settled = Vec::new();
        for mark in marks.iter().filter(|m| m.expired) {
            if let Some(idx) = self.positions.iter().position(|p| p.id == mark.position_id) {
                let position = self.positions.swap_remove(idx);
                self.realized_pnl += mark.unrealized_pnl;
                settled.push(SettledPosition {
                    position,
                    exit_value: mark.unit_value,
                    pnl: mark.unrealized_pnl,
                });
            }
        }
        settled
    }
}
