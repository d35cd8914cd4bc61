/// Portfolio aggregation.
/// All functions are pure -- they take marks and return computed values.

use crate::models::Greeks;
use crate::paper::position::PositionMark;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PortfolioSummary {
    pub open_positions: usize,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub total_pnl: f64,
    pub greeks: Greeks,
    pub flavors: Vec<FlavorExposure>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FlavorExposure {
    pub flavor: String,
    pub positions: usize,
    pub market_value: f64,
    pub net_delta: f64,
}

/// Sum position marks into a portfolio view. Flavor order follows first appearance.
pub fn compute_portfolio(marks: &[PositionMark], realized_pnl: f64) -> PortfolioSummary {
    let mut summary = PortfolioSummary {
        open_positions: marks.len(),
        realized_pnl,
        ..PortfolioSummary::default()
    };

    for mark in marks {
        summary.market_value += mark.market_value;
        summary.unrealized_pnl += mark.unrealized_pnl;
        summary.greeks.accumulate(&mark.greeks);

        match summary.flavors.iter_mut().find(|f| f.flavor == mark.flavor) {
            Some(exposure) => {
                exposure.positions += 1;
                exposure.market_value += mark.market_value;
                exposure.net_delta += mark.greeks.delta;
            }
            None => summary.flavors.push(FlavorExposure {
                flavor: mark.flavor.clone(),
                positions: 1,
                market_value: mark.market_value,
                net_delta: mark.greeks.delta,
            }),
        }
    }

    summary.total_pnl = summary.realized_pnl + summary.unrealized_pnl;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mark(flavor: &str, value: f64, pnl: f64, delta: f64) -> PositionMark {
        PositionMark {
            position_id: uuid::Uuid::new_v4(),
            flavor: flavor.into(),
            unit_value: value,
            market_value: value,
            unrealized_pnl: pnl,
            greeks: Greeks { delta, gamma: 0.1, ..Greeks::default() },
            expired: false,
        }
    }

    #[test]
    fn test_empty_book() {
        let s = compute_portfolio(&[], 1.5);
        assert_eq!(s.open_positions, 0);
        assert_eq!(s.total_pnl, 1.5);
        assert!(s.flavors.is_empty());
    }

    #[test]
    fn test_sums_by_flavor() {
        let marks = [
            mark("vanilla", 1.0, 0.2, 0.5),
            mark("mint", 2.0, -0.5, -0.3),
            mark("vanilla", 0.5, 0.1, 0.25),
        ];
        let s = compute_portfolio(&marks, 0.0);
        assert_eq!(s.open_positions, 3);
        assert!((s.market_value - 3.5).abs() < 1e-12);
        assert!((s.unrealized_pnl + 0.2).abs() < 1e-12);
        assert!((s.greeks.delta - 0.45).abs() < 1e-12);
        assert!((s.greeks.gamma - 0.3).abs() < 1e-12);
        assert_eq!(s.flavors.len(), 2);
        assert_eq!(s.flavors[0].flavor, "vanilla");
        assert_eq!(s.flavors[0].positions, 2);
        assert!((s.flavors[0].net_delta - 0.75).abs() < 1e-12);
    }
}
