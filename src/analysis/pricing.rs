//! Order-book price resolution per execution mode.
//!
//! Only orders whose owner is online are eligible; offline listings cannot
//! be transacted against and routinely carry stale prices.

use crate::models::{ExecutionMode, OrderBook, OrderEntry};

const UNDERCUT: f64 = 1.0;
const PRICE_FLOOR: f64 = 1.0;

fn best_online_sell(book: &OrderBook) -> Option<&OrderEntry> {
    // Sell side is kept ascending by price.
    book.sell.iter().find(|o| o.online)
}

fn best_online_buy(book: &OrderBook) -> Option<&OrderEntry> {
    // Buy side is kept descending by price.
    book.buy.iter().find(|o| o.online)
}

/// Price at which we can dispose of the assembled set.
///
/// `instant`: hit the top of the bid. `patient`: list one unit under the
/// cheapest online seller (never below the floor).
pub fn resolve_set_price(book: &OrderBook, mode: ExecutionMode) -> Option<f64> {
    match mode {
        ExecutionMode::Instant => best_online_buy(book).map(|o| o.price),
        ExecutionMode::Patient => {
            best_online_sell(book).map(|o| (o.price - UNDERCUT).max(PRICE_FLOOR))
        }
    }
}

/// Price at which we can acquire one part.
///
/// `instant`: lift the top of the ask. `patient`: post one unit over the
/// best online buyer and wait to be filled.
pub fn resolve_part_price(book: &OrderBook, mode: ExecutionMode) -> Option<f64> {
    match mode {
        ExecutionMode::Instant => best_online_sell(book).map(|o| o.price),
        ExecutionMode::Patient => best_online_buy(book).map(|o| o.price + UNDERCUT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(sell: &[(f64, bool)], buy: &[(f64, bool)]) -> OrderBook {
        let mut book = OrderBook {
            sell: sell
                .iter()
                .map(|&(price, online)| OrderEntry {
                    price,
                    quantity: 1,
                    online,
                })
                .collect(),
            buy: buy
                .iter()
                .map(|&(price, online)| OrderEntry {
                    price,
                    quantity: 1,
                    online,
                })
                .collect(),
        };
        book.sell.sort_by(|a, b| a.price.total_cmp(&b.price));
        book.buy.sort_by(|a, b| b.price.total_cmp(&a.price));
        book
    }

    #[test]
    fn instant_set_price_is_top_of_bid() {
        let book = book(&[(160.0, true)], &[(150.0, true), (140.0, true)]);
        assert_eq!(
            resolve_set_price(&book, ExecutionMode::Instant),
            Some(150.0)
        );
    }

    #[test]
    fn patient_set_price_undercuts_lowest_online_sell() {
        let book = book(&[(150.0, true), (155.0, true)], &[(120.0, true)]);
        assert_eq!(
            resolve_set_price(&book, ExecutionMode::Patient),
            Some(149.0)
        );
    }

    #[test]
    fn patient_part_price_outbids_best_online_buy() {
        let book = book(&[(40.0, true)], &[(30.0, true), (28.0, true)]);
        assert_eq!(resolve_part_price(&book, ExecutionMode::Patient), Some(31.0));
    }

    #[test]
    fn offline_orders_are_ignored() {
        let book = book(&[(100.0, false), (110.0, true)], &[(90.0, false)]);
        assert_eq!(
            resolve_part_price(&book, ExecutionMode::Instant),
            Some(110.0)
        );
        assert_eq!(resolve_set_price(&book, ExecutionMode::Instant), None);
        assert_eq!(
            resolve_set_price(&book, ExecutionMode::Patient),
            Some(109.0)
        );
    }

    #[test]
    fn empty_side_yields_no_price() {
        let book = book(&[], &[]);
        assert_eq!(resolve_set_price(&book, ExecutionMode::Instant), None);
        assert_eq!(resolve_part_price(&book, ExecutionMode::Patient), None);
    }

    #[test]
    fn undercut_never_goes_below_floor() {
        let book = book(&[(1.0, true)], &[]);
        assert_eq!(resolve_set_price(&book, ExecutionMode::Patient), Some(1.0));
    }
}
