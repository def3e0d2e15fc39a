//! Liquidity, trend, and volatility metrics derived from the order book and
//! the 48-hour statistics series.
//!
//! The raw metrics here are strategy-independent and captured into each
//! `SetDatum`; the strategy-weighted multipliers are pure functions of those
//! metrics so rescoring can recompute them without refetching.

use crate::models::{OrderBook, StatPoint, Strategy, TrendDirection};
use chrono::Duration;

/// Slope band (normalized, per day) below which a trend counts as flat.
const TREND_EPSILON: f64 = 0.01;

/// Competition counts online sell orders within this fraction of the best ask.
const COMPETITION_BAND: f64 = 0.10;

/// Raw, strategy-independent activity metrics for one set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityMetrics {
    pub volume_48h: u64,
    pub bid_ask_ratio: f64,
    pub sell_competition: u32,
    pub velocity: f64,
    pub volatility: f64,
    pub trend_slope: f64,
    pub trend_direction: TrendDirection,
}

/// Derive every raw metric from one set's book and statistics series.
pub fn analyze(book: &OrderBook, stats: &[StatPoint]) -> ActivityMetrics {
    let slope = trend_slope(stats);
    ActivityMetrics {
        volume_48h: volume_48h(stats),
        bid_ask_ratio: bid_ask_ratio(book),
        sell_competition: sell_competition(book),
        velocity: velocity(stats),
        volatility: volatility(stats),
        trend_slope: slope,
        trend_direction: trend_direction(slope),
    }
}

/// Total traded volume within 48h of the newest data point.
pub fn volume_48h(stats: &[StatPoint]) -> u64 {
    let Some(newest) = stats.iter().map(|p| p.datetime).max() else {
        return 0;
    };
    let cutoff = newest - Duration::hours(48);
    stats
        .iter()
        .filter(|p| p.datetime > cutoff)
        .map(|p| p.volume as u64)
        .sum()
}

/// Online buy quantity over online sell quantity; 1.0 when there is nothing
/// on the sell side to compare against.
pub fn bid_ask_ratio(book: &OrderBook) -> f64 {
    let buys: u64 = book
        .buy
        .iter()
        .filter(|o| o.online)
        .map(|o| o.quantity as u64)
        .sum();
    let sells: u64 = book
        .sell
        .iter()
        .filter(|o| o.online)
        .map(|o| o.quantity as u64)
        .sum();
    if sells == 0 {
        1.0
    } else {
        buys as f64 / sells as f64
    }
}

/// Number of online sell orders priced at or within 10% of the best ask.
pub fn sell_competition(book: &OrderBook) -> u32 {
    let best = book
        .sell
        .iter()
        .filter(|o| o.online)
        .map(|o| o.price)
        .min_by(|a, b| a.total_cmp(b));
    let Some(best) = best else {
        return 0;
    };
    let ceiling = best * (1.0 + COMPETITION_BAND);
    book.sell
        .iter()
        .filter(|o| o.online && o.price <= ceiling)
        .count() as u32
}

/// Recent-day volume over prior-day volume. >1 means trading is
/// accelerating. Neutral (1.0) when the prior day is empty.
pub fn velocity(stats: &[StatPoint]) -> f64 {
    let Some(newest) = stats.iter().map(|p| p.datetime).max() else {
        return 1.0;
    };
    let day_ago = newest - Duration::hours(24);
    let two_days_ago = newest - Duration::hours(48);

    let recent: u64 = stats
        .iter()
        .filter(|p| p.datetime > day_ago)
        .map(|p| p.volume as u64)
        .sum();
    let older: u64 = stats
        .iter()
        .filter(|p| p.datetime > two_days_ago && p.datetime <= day_ago)
        .map(|p| p.volume as u64)
        .sum();

    if older == 0 {
        1.0
    } else {
        recent as f64 / older as f64
    }
}

/// Coefficient of variation (sigma over mu) of the median prices.
pub fn volatility(stats: &[StatPoint]) -> f64 {
    if stats.len() < 2 {
        return 0.0;
    }
    let n = stats.len() as f64;
    let mean = stats.iter().map(|p| p.median).sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = stats
        .iter()
        .map(|p| {
            let d = p.median - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    variance.sqrt() / mean
}

/// Least-squares slope of the median price series, normalized by the mean
/// price so it reads as fractional change per day.
pub fn trend_slope(stats: &[StatPoint]) -> f64 {
    let n = stats.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mean_x = (nf - 1.0) / 2.0;
    let mean_y = stats.iter().map(|p| p.median).sum::<f64>() / nf;
    if mean_y == 0.0 {
        return 0.0;
    }

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, p) in stats.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (p.median - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        return 0.0;
    }
    (num / den) / mean_y
}

pub fn trend_direction(slope: f64) -> TrendDirection {
    if slope > TREND_EPSILON {
        TrendDirection::Rising
    } else if slope < -TREND_EPSILON {
        TrendDirection::Falling
    } else {
        TrendDirection::Stable
    }
}

/// `1 + clamp(slope × k, −0.5, +0.5)` with `k` already strategy-scaled.
pub fn trend_multiplier(slope: f64, sensitivity: f64) -> f64 {
    1.0 + (slope * sensitivity).clamp(-0.5, 0.5)
}

pub fn volatility_penalty(volatility: f64, weight: f64) -> f64 {
    1.0 + volatility * weight
}

/// Geometric blend of book balance, inverse competition, and velocity,
/// clamped to [0.5, 1.5].
pub fn liquidity_multiplier(bid_ask_ratio: f64, sell_competition: u32, velocity: f64) -> f64 {
    let balance = bid_ask_ratio.clamp(0.25, 4.0);
    let scarcity = 1.0 / (1.0 + sell_competition as f64 / 5.0);
    let pace = velocity.clamp(0.25, 4.0);
    (balance * scarcity * pace).powf(1.0 / 3.0).clamp(0.5, 1.5)
}

/// Volatility buckets; conservative profiles tolerate less.
pub fn risk_level(volatility: f64, strategy: Strategy) -> crate::models::RiskLevel {
    use crate::models::RiskLevel;
    let (low, medium) = match strategy {
        Strategy::SafeSteady => (0.10, 0.25),
        Strategy::Balanced => (0.15, 0.35),
        Strategy::Aggressive => (0.20, 0.45),
    };
    if volatility < low {
        RiskLevel::Low
    } else if volatility < medium {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}
