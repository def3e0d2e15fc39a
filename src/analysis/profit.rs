//! Set-versus-parts profit arithmetic.

use crate::models::{ExecutionMode, PartCost};

/// Resolved prices for one part in both execution modes.
#[derive(Debug, Clone)]
pub struct PartQuote {
    pub slug: String,
    pub name: String,
    pub quantity: u32,
    pub instant_unit: Option<f64>,
    pub patient_unit: Option<f64>,
}

/// Profit figures for one set. Primary fields follow the run's execution
/// mode; both variants are retained for rescoring. When any required price
/// is missing for the primary mode, the primary figures are zeroed and the
/// set is flagged unsellable so it never counts as profitable.
#[derive(Debug, Clone)]
pub struct ProfitBreakdown {
    pub set_price: f64,
    pub part_cost: f64,
    pub profit_margin: f64,
    pub profit_percentage: f64,
    /// All prices required by the primary mode were resolvable.
    pub complete: bool,

    pub instant_set_price: Option<f64>,
    pub patient_set_price: Option<f64>,
    pub instant_part_cost: Option<f64>,
    pub patient_part_cost: Option<f64>,

    pub parts: Vec<PartCost>,
}

fn cost_of(parts: &[PartQuote], pick: impl Fn(&PartQuote) -> Option<f64>) -> Option<f64> {
    let mut total = 0.0;
    for part in parts {
        total += pick(part)? * part.quantity as f64;
    }
    Some(total)
}

pub fn compute(
    instant_set_price: Option<f64>,
    patient_set_price: Option<f64>,
    parts: &[PartQuote],
    mode: ExecutionMode,
) -> ProfitBreakdown {
    let instant_part_cost = cost_of(parts, |p| p.instant_unit);
    let patient_part_cost = cost_of(parts, |p| p.patient_unit);

    let (set_opt, cost_opt) = match mode {
        ExecutionMode::Instant => (instant_set_price, instant_part_cost),
        ExecutionMode::Patient => (patient_set_price, patient_part_cost),
    };

    let (set_price, part_cost, profit_margin, complete) = match (set_opt, cost_opt) {
        (Some(set), Some(cost)) => (set, cost, set - cost, true),
        _ => (0.0, 0.0, 0.0, false),
    };

    let profit_percentage = if part_cost > 0.0 {
        profit_margin / part_cost * 100.0
    } else {
        0.0
    };

    let part_rows = parts
        .iter()
        .map(|p| {
            let unit = match mode {
                ExecutionMode::Instant => p.instant_unit,
                ExecutionMode::Patient => p.patient_unit,
            }
            .unwrap_or(0.0);
            PartCost {
                slug: p.slug.clone(),
                name: p.name.clone(),
                quantity: p.quantity,
                unit_price: unit,
                total: unit * p.quantity as f64,
                instant_unit_price: p.instant_unit,
                patient_unit_price: p.patient_unit,
            }
        })
        .collect();

    ProfitBreakdown {
        set_price,
        part_cost,
        profit_margin,
        profit_percentage,
        complete,
        instant_set_price,
        patient_set_price,
        instant_part_cost,
        patient_part_cost,
        parts: part_rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_parts() -> Vec<PartQuote> {
        vec![
            PartQuote {
                slug: "demo_blade".into(),
                name: "Demo Blade".into(),
                quantity: 1,
                instant_unit: Some(30.0),
                patient_unit: Some(31.0),
            },
            PartQuote {
                slug: "demo_hilt".into(),
                name: "Demo Hilt".into(),
                quantity: 2,
                instant_unit: Some(20.0),
                patient_unit: Some(21.0),
            },
        ]
    }

    #[test]
    fn instant_margin_is_exact() {
        let out = compute(
            Some(150.0),
            Some(149.0),
            &demo_parts(),
            ExecutionMode::Instant,
        );
        assert_eq!(out.set_price, 150.0);
        assert_eq!(out.part_cost, 70.0);
        assert_eq!(out.profit_margin, 80.0);
        assert_eq!(out.profit_margin, out.set_price - out.part_cost);
        assert!((out.profit_percentage - 114.285714).abs() < 1e-4);
        assert!(out.complete);
    }

    #[test]
    fn patient_variant_tracks_undercut_prices() {
        let out = compute(
            Some(150.0),
            Some(149.0),
            &demo_parts(),
            ExecutionMode::Patient,
        );
        assert_eq!(out.part_cost, 31.0 + 42.0);
        assert_eq!(out.profit_margin, 76.0);
        // The other variant stays available for rescoring.
        assert_eq!(out.instant_part_cost, Some(70.0));
        assert_eq!(out.instant_set_price, Some(150.0));
    }

    #[test]
    fn missing_part_price_zeroes_the_primary_figures() {
        let mut parts = demo_parts();
        parts[1].instant_unit = None;
        let out = compute(Some(150.0), None, &parts, ExecutionMode::Instant);
        assert_eq!(out.profit_margin, 0.0);
        assert_eq!(out.set_price, 0.0);
        assert_eq!(out.part_cost, 0.0);
        assert!(!out.complete);
        // Patient side is independently incomplete here too.
        assert_eq!(out.patient_part_cost, Some(31.0 + 42.0));
        assert_eq!(out.patient_set_price, None);
    }

    #[test]
    fn zero_part_cost_has_zero_percentage() {
        let out = compute(Some(10.0), Some(9.0), &[], ExecutionMode::Instant);
        assert_eq!(out.part_cost, 0.0);
        assert_eq!(out.profit_margin, 10.0);
        assert_eq!(out.profit_percentage, 0.0);
    }
}
