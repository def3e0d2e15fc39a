//! Composite scoring under a strategy profile.
//!
//! The score is deliberately multiplicative: zeroing any factor zeroes the
//! whole score, which is what makes the volume and margin gates absolute.

use crate::analysis::liquidity::{self, ActivityMetrics};
use crate::analysis::profit::{self, PartQuote, ProfitBreakdown};
use crate::models::{
    AnalysisResult, ExecutionMode, ScoreFactors, SetDatum, Strategy, TrendDirection,
};

/// Multiplied by the profile's trend weight to get the slope sensitivity
/// `k`; a balanced profile maps a ±5%/day slope onto the full ±0.5 band.
const TREND_SENSITIVITY_BASE: f64 = 10.0;

/// Factor weights and thresholds for one strategy (closed set).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct StrategyProfile {
    pub strategy: Strategy,
    pub volatility_weight: f64,
    pub trend_weight: f64,
    pub roi_weight: f64,
    pub min_volume: u64,
}

impl StrategyProfile {
    pub fn of(strategy: Strategy) -> Self {
        match strategy {
            Strategy::SafeSteady => Self {
                strategy,
                volatility_weight: 1.5,
                trend_weight: 0.5,
                roi_weight: 0.8,
                min_volume: 50,
            },
            Strategy::Balanced => Self {
                strategy,
                volatility_weight: 1.0,
                trend_weight: 1.0,
                roi_weight: 1.0,
                min_volume: 10,
            },
            Strategy::Aggressive => Self {
                strategy,
                volatility_weight: 0.6,
                trend_weight: 1.3,
                roi_weight: 1.4,
                min_volume: 5,
            },
        }
    }

    pub fn trend_sensitivity(&self) -> f64 {
        TREND_SENSITIVITY_BASE * self.trend_weight
    }
}

/// Assemble a datum from raw per-set results. Strategy-dependent fields are
/// left at their neutral values until [`score_datum`] runs.
pub fn build_datum(
    slug: &str,
    name: &str,
    breakdown: ProfitBreakdown,
    metrics: ActivityMetrics,
    note: Option<String>,
) -> SetDatum {
    SetDatum {
        set_slug: slug.to_string(),
        set_name: name.to_string(),
        set_price: breakdown.set_price,
        part_cost: breakdown.part_cost,
        profit_margin: breakdown.profit_margin,
        profit_percentage: breakdown.profit_percentage,
        instant_set_price: breakdown.instant_set_price,
        patient_set_price: breakdown.patient_set_price,
        instant_part_cost: breakdown.instant_part_cost,
        patient_part_cost: breakdown.patient_part_cost,
        parts: breakdown.parts,
        volume_48h: metrics.volume_48h,
        bid_ask_ratio: metrics.bid_ask_ratio,
        sell_competition: metrics.sell_competition,
        liquidity_velocity: metrics.velocity,
        liquidity_multiplier: 1.0,
        trend_slope: metrics.trend_slope,
        trend_multiplier: 1.0,
        trend_direction: metrics.trend_direction,
        volatility: metrics.volatility,
        volatility_penalty: 1.0,
        risk_level: crate::models::RiskLevel::Low,
        factors: ScoreFactors::default(),
        composite_score: 0.0,
        profitable: false,
        note,
    }
}

/// A datum carrying no usable data at all (per-set fetch failure).
pub fn error_datum(slug: &str, name: &str, note: String) -> SetDatum {
    let breakdown = profit::compute(None, None, &[], ExecutionMode::Instant);
    let mut datum = build_datum(slug, name, breakdown, ActivityMetrics::default(), Some(note));
    datum.instant_part_cost = None;
    datum.patient_part_cost = None;
    datum.bid_ask_ratio = 1.0;
    datum.liquidity_velocity = 1.0;
    datum.trend_direction = TrendDirection::Stable;
    datum
}

/// Compute the strategy-dependent multipliers and the composite score for a
/// datum whose raw metrics and primary profit figures are in place.
pub fn score_datum(datum: &mut SetDatum, profile: &StrategyProfile) {
    datum.trend_multiplier =
        liquidity::trend_multiplier(datum.trend_slope, profile.trend_sensitivity());
    datum.volatility_penalty =
        liquidity::volatility_penalty(datum.volatility, profile.volatility_weight);
    datum.liquidity_multiplier = liquidity::liquidity_multiplier(
        datum.bid_ask_ratio,
        datum.sell_competition,
        datum.liquidity_velocity,
    );
    datum.risk_level = liquidity::risk_level(datum.volatility, profile.strategy);

    let volume_factor = (datum.volume_48h.max(10) as f64).log10();
    let roi_factor = 1.0 + datum.profit_percentage / 100.0 * profile.roi_weight;

    datum.profitable =
        datum.profit_margin > 0.0 && datum.volume_48h >= profile.min_volume;

    datum.composite_score = if datum.profitable {
        datum.profit_margin * volume_factor * roi_factor * datum.trend_multiplier
            * datum.liquidity_multiplier
            / datum.volatility_penalty
    } else {
        0.0
    };

    datum.factors = ScoreFactors {
        // Zeroing the profit contribution keeps the factor product equal to
        // the (zero) score for gated-out sets.
        profit: if datum.profitable {
            datum.profit_margin
        } else {
            0.0
        },
        volume: volume_factor,
        roi: roi_factor,
        trend: datum.trend_multiplier,
        liquidity: datum.liquidity_multiplier,
        volatility: datum.volatility_penalty,
    };
}

/// Final run ordering: score desc, margin desc, slug asc.
pub fn sort_data(sets: &mut [SetDatum]) {
    sets.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then(b.profit_margin.total_cmp(&a.profit_margin))
            .then_with(|| a.set_slug.cmp(&b.set_slug))
    });
}

/// Score + sort a full set list, returning the profitable count.
pub fn score_all(sets: &mut Vec<SetDatum>, profile: &StrategyProfile) -> u32 {
    for datum in sets.iter_mut() {
        score_datum(datum, profile);
    }
    sort_data(sets);
    sets.iter().filter(|s| s.profitable).count() as u32
}

/// Re-run scoring for an already-captured run under a new strategy and
/// execution mode. Uses only the stored price variants and raw metrics;
/// never touches the upstream.
pub fn rescore(
    result: &AnalysisResult,
    strategy: Strategy,
    mode: ExecutionMode,
) -> AnalysisResult {
    let profile = StrategyProfile::of(strategy);
    let mut sets = result.sets.clone();

    for datum in &mut sets {
        let quotes: Vec<PartQuote> = datum
            .parts
            .iter()
            .map(|p| PartQuote {
                slug: p.slug.clone(),
                name: p.name.clone(),
                quantity: p.quantity,
                instant_unit: p.instant_unit_price,
                patient_unit: p.patient_unit_price,
            })
            .collect();

        let breakdown = profit::compute(
            datum.instant_set_price,
            datum.patient_set_price,
            &quotes,
            mode,
        );
        datum.set_price = breakdown.set_price;
        datum.part_cost = breakdown.part_cost;
        datum.profit_margin = breakdown.profit_margin;
        datum.profit_percentage = breakdown.profit_percentage;
        datum.parts = breakdown.parts;
    }

    let profitable = score_all(&mut sets, &profile);

    AnalysisResult {
        run_id: result.run_id,
        timestamp: result.timestamp,
        strategy,
        execution_mode: mode,
        total_sets: sets.len() as u32,
        profitable_sets: profitable,
        sets,
    }
}
