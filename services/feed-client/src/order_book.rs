//! Order book reconstruction
//!
//! Rebuilds a per-product level-2 book from the feed: a snapshot
//! establishes the base state, level-2 diffs overwrite individual levels,
//! and trade prints deplete resting quantity.
//!
//! Uses `BTreeMap<Price, Quantity>` per side for sorted iteration. Prices
//! are exact decimals, so a diff and a trade at the same price always hit
//! the same level.
//!
//! Ordering rule: every diff and trade carries an event time. Anything at or
//! before the book's `last_event_time` is stale and dropped without
//! touching the book.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use types::ids::ProductId;
use types::market::Level2Update;
use types::numeric::{Price, Quantity};
use types::order::Side;
use types::time::UnixNanos;
use types::trade::MarketTrade;

/// A single price level in the order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Quantity,
}

/// Outcome of applying one diff or trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookApply {
    Applied,
    /// Event time at or before the book's last event time; nothing changed.
    Stale,
}

/// Reconstructed book for a single product.
///
/// Bids iterate in descending price order (best bid first), asks in
/// ascending order. A zero quantity is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBook {
    product_id: ProductId,
    bids: BTreeMap<Price, Quantity>,
    asks: BTreeMap<Price, Quantity>,
    last_event_time: UnixNanos,
}

impl OrderBook {
    pub fn new(product_id: ProductId) -> Self {
        Self {
            product_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_event_time: 0,
        }
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    /// Replace the whole book.
    ///
    /// `last_event_time` becomes the latest event time in the snapshot; a
    /// snapshot without event times leaves it unchanged.
    pub fn apply_snapshot(&mut self, levels: &[Level2Update]) {
        self.bids.clear();
        self.asks.clear();

        for level in levels {
            if level.new_quantity.is_empty() {
                continue;
            }
            self.side_mut(level.side).insert(level.price_level, level.new_quantity);
        }

        if let Some(latest) = levels.iter().map(|l| l.event_time).filter(|t| *t != 0).max() {
            self.last_event_time = latest;
        }

        debug!(
            product = %self.product_id,
            bids = self.bids.len(),
            asks = self.asks.len(),
            last_event_time = self.last_event_time,
            "Snapshot applied"
        );
    }

    /// Set (or remove, on zero quantity) one level.
    pub fn apply_update(
        &mut self,
        side: Side,
        price: Price,
        quantity: Quantity,
        event_time: UnixNanos,
    ) -> BookApply {
        if event_time <= self.last_event_time {
            return BookApply::Stale;
        }

        let levels = self.side_mut(side);
        if quantity.is_empty() {
            levels.remove(&price);
        } else {
            levels.insert(price, quantity);
        }
        self.last_event_time = event_time;
        BookApply::Applied
    }

    /// Deplete resting quantity at `price` by a trade of `size`.
    ///
    /// BUY trades are matched against bids and SELL trades against asks.
    /// A trade at a price with no resting level changes no level but still
    /// advances the event time.
    pub fn apply_trade(
        &mut self,
        side: Side,
        price: Price,
        size: Quantity,
        event_time: UnixNanos,
    ) -> BookApply {
        if event_time <= self.last_event_time {
            return BookApply::Stale;
        }

        let levels = self.side_mut(side);
        if let Some(resting) = levels.get(&price).copied() {
            let remaining = resting.saturating_sub(size);
            if remaining.is_zero() {
                levels.remove(&price);
            } else {
                levels.insert(price, remaining);
            }
        }
        self.last_event_time = event_time;
        BookApply::Applied
    }

    /// Apply a batch of level-2 diffs in order; returns how many were stale.
    pub fn apply_updates(&mut self, updates: &[Level2Update]) -> usize {
        updates
            .iter()
            .filter(|u| {
                self.apply_update(u.side, u.price_level, u.new_quantity, u.event_time) == BookApply::Stale
            })
            .count()
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(price, quantity)| PriceLevel { price: *price, quantity: *quantity })
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks
            .iter()
            .next()
            .map(|(price, quantity)| PriceLevel { price: *price, quantity: *quantity })
    }

    /// Get the mid-market price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                Some((bid.price.as_decimal() + ask.price.as_decimal()) / Decimal::from(2))
            }
            _ => None,
        }
    }

    /// Get the spread between best ask and best bid.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price.as_decimal() - bid.price.as_decimal()),
            _ => None,
        }
    }

    /// Resting quantity at an exact price, if the level exists.
    pub fn quantity_at(&self, side: Side, price: Price) -> Option<Quantity> {
        self.side(side).get(&price).copied()
    }

    /// Build a depth snapshot with the specified max levels per side.
    pub fn depth(&self, max_levels: usize) -> DepthSnapshot {
        DepthSnapshot {
            product_id: self.product_id.clone(),
            bids: self.bid_iter().take(max_levels).collect(),
            asks: self.ask_iter().take(max_levels).collect(),
            last_event_time: self.last_event_time,
        }
    }

    /// Get all bid levels (descending price order).
    pub fn bid_levels(&self) -> Vec<PriceLevel> {
        self.bid_iter().collect()
    }

    /// Get all ask levels (ascending price order).
    pub fn ask_levels(&self) -> Vec<PriceLevel> {
        self.ask_iter().collect()
    }

    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn last_event_time(&self) -> UnixNanos {
        self.last_event_time
    }

    fn bid_iter(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.bids
            .iter()
            .rev()
            .map(|(price, quantity)| PriceLevel { price: *price, quantity: *quantity })
    }

    fn ask_iter(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.asks
            .iter()
            .map(|(price, quantity)| PriceLevel { price: *price, quantity: *quantity })
    }

    fn side(&self, side: Side) -> &BTreeMap<Price, Quantity> {
        match side {
            Side::BUY => &self.bids,
            Side::SELL => &self.asks,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Price, Quantity> {
        match side {
            Side::BUY => &mut self.bids,
            Side::SELL => &mut self.asks,
        }
    }
}

/// A snapshot of the order book depth at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub product_id: ProductId,
    /// Bids in descending price order (best first).
    pub bids: Vec<PriceLevel>,
    /// Asks in ascending price order (best first).
    pub asks: Vec<PriceLevel>,
    pub last_event_time: UnixNanos,
}

/// All books maintained by one processing pipeline.
///
/// Books are only created by a snapshot. Diffs and trades for products
/// without a snapshot are ignored rather than building a partial book.
#[derive(Debug, Default)]
pub struct BookManager {
    books: BTreeMap<ProductId, OrderBook>,
}

/// Counts from applying one batch of diffs or trades.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub stale: usize,
    /// Entries for products that have no book yet.
    pub unknown: usize,
}

impl BookManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the book for `product`.
    pub fn apply_snapshot(&mut self, product: &ProductId, levels: &[Level2Update]) -> &OrderBook {
        let book = self
            .books
            .entry(product.clone())
            .or_insert_with(|| OrderBook::new(product.clone()));
        book.apply_snapshot(levels);
        book
    }

    pub fn apply_updates(&mut self, product: &ProductId, updates: &[Level2Update]) -> BatchOutcome {
        let Some(book) = self.books.get_mut(product) else {
            debug!(%product, count = updates.len(), "Ignoring diffs for product without snapshot");
            return BatchOutcome {
                unknown: updates.len(),
                ..BatchOutcome::default()
            };
        };

        let stale = book.apply_updates(updates);
        BatchOutcome {
            applied: updates.len() - stale,
            stale,
            unknown: 0,
        }
    }

    /// Apply trades in order, each against its own product's book.
    pub fn apply_trades(&mut self, trades: &[MarketTrade]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for trade in trades {
            match self.books.get_mut(&trade.product_id) {
                Some(book) => match book.apply_trade(trade.side, trade.price, trade.size, trade.time) {
                    BookApply::Applied => outcome.applied += 1,
                    BookApply::Stale => outcome.stale += 1,
                },
                None => outcome.unknown += 1,
            }
        }
        outcome
    }

    pub fn book(&self, product: &str) -> Option<&OrderBook> {
        self.books.get(product)
    }

    pub fn products(&self) -> impl Iterator<Item = &ProductId> {
        self.books.keys()
    }

    pub fn remove(&mut self, product: &str) -> Option<OrderBook> {
        self.books.remove(product)
    }

    /// Drop every book, e.g. after the application decides a gap made them
    /// untrustworthy.
    pub fn clear(&mut self) {
        self.books.clear();
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn level(side: Side, price: &str, quantity: &str, event_time: UnixNanos) -> Level2Update {
        Level2Update {
            side,
            event_time,
            price_level: Price::from_str(price).unwrap(),
            new_quantity: Quantity::from_str(quantity).unwrap(),
        }
    }

    fn price(s: &str) -> Price {
        Price::from_str(s).unwrap()
    }

    fn qty(s: &str) -> Quantity {
        Quantity::from_str(s).unwrap()
    }

    fn make_book() -> OrderBook {
        let mut book = OrderBook::new(ProductId::new("BTC-USD"));
        book.apply_snapshot(&[
            level(Side::BUY, "100", "1", 1),
            level(Side::SELL, "101", "1", 1),
        ]);
        book
    }

    #[test]
    fn test_empty_book() {
        let book = OrderBook::new(ProductId::new("BTC-USD"));
        assert!(book.is_empty());
        assert!(book.best_bid().is_none());
        assert!(book.mid_price().is_none());
        assert!(book.spread().is_none());
    }

    #[test]
    fn test_snapshot_establishes_state() {
        let book = make_book();
        assert_eq!(book.best_bid().unwrap().price, price("100"));
        assert_eq!(book.best_ask().unwrap().price, price("101"));
        assert_eq!(book.mid_price(), Some(Decimal::from_str("100.5").unwrap()));
        assert_eq!(book.spread(), Some(Decimal::ONE));
        assert_eq!(book.last_event_time(), 1);
    }

    #[test]
    fn test_zero_update_removes_level() {
        let mut book = make_book();
        assert_eq!(book.apply_update(Side::BUY, price("100"), Quantity::ZERO, 2), BookApply::Applied);
        assert_eq!(book.bid_depth(), 0);
        assert_eq!(book.last_event_time(), 2);

        // Removing an absent level is not an error
        assert_eq!(book.apply_update(Side::BUY, price("99"), Quantity::ZERO, 3), BookApply::Applied);
    }

    #[test]
    fn test_trade_depletes_then_removes_level() {
        let mut book = make_book();
        book.apply_update(Side::BUY, price("100"), Quantity::ZERO, 2);

        book.apply_trade(Side::SELL, price("101"), qty("0.5"), 3);
        assert_eq!(book.quantity_at(Side::SELL, price("101")), Some(qty("0.5")));

        book.apply_trade(Side::SELL, price("101"), qty("1.0"), 4);
        assert_eq!(book.quantity_at(Side::SELL, price("101")), None);
        assert_eq!(book.ask_depth(), 0);
    }

    #[test]
    fn test_trade_at_missing_level_is_noop() {
        let mut book = make_book();
        let before = book.ask_levels();
        assert_eq!(book.apply_trade(Side::SELL, price("105"), qty("1"), 5), BookApply::Applied);
        assert_eq!(book.ask_levels(), before);
        assert_eq!(book.last_event_time(), 5);
    }

    #[test]
    fn test_stale_events_are_dropped() {
        let mut book = OrderBook::new(ProductId::new("ETH-USD"));
        book.apply_snapshot(&[level(Side::BUY, "10", "1", 100)]);
        let before = book.clone();

        assert_eq!(book.apply_update(Side::BUY, price("10"), qty("5"), 50), BookApply::Stale);
        assert_eq!(book.apply_update(Side::BUY, price("10"), qty("5"), 100), BookApply::Stale);
        assert_eq!(book.apply_trade(Side::BUY, price("10"), qty("1"), 99), BookApply::Stale);
        assert_eq!(book, before);

        assert_eq!(book.apply_update(Side::BUY, price("10"), qty("5"), 150), BookApply::Applied);
        assert_eq!(book.quantity_at(Side::BUY, price("10")), Some(qty("5")));
    }

    #[test]
    fn test_snapshot_replaces_previous_state() {
        let mut book = make_book();
        book.apply_snapshot(&[level(Side::BUY, "90", "3", 10)]);
        assert_eq!(book.bid_levels(), vec![PriceLevel { price: price("90"), quantity: qty("3") }]);
        assert_eq!(book.ask_depth(), 0);
        assert_eq!(book.last_event_time(), 10);
    }

    #[test]
    fn test_snapshot_without_event_time_keeps_last() {
        let mut book = make_book();
        book.apply_update(Side::BUY, price("100"), qty("2"), 40);
        book.apply_snapshot(&[level(Side::BUY, "100", "1", 0)]);
        assert_eq!(book.last_event_time(), 40);
    }

    #[test]
    fn test_snapshot_skips_zero_levels() {
        let mut book = OrderBook::new(ProductId::new("BTC-USD"));
        book.apply_snapshot(&[level(Side::BUY, "100", "0", 1), level(Side::SELL, "101", "2", 1)]);
        assert_eq!(book.bid_depth(), 0);
        assert_eq!(book.ask_depth(), 1);
    }

    #[test]
    fn test_equal_prices_share_a_level() {
        let mut book = make_book();
        book.apply_update(Side::SELL, price("101.000"), qty("4"), 2);
        assert_eq!(book.ask_depth(), 1);
        assert_eq!(book.quantity_at(Side::SELL, price("101")), Some(qty("4")));
    }

    #[test]
    fn test_depth_ordering() {
        let mut book = OrderBook::new(ProductId::new("BTC-USD"));
        book.apply_snapshot(&[
            level(Side::BUY, "99", "1", 1),
            level(Side::BUY, "100", "1", 1),
            level(Side::BUY, "98", "1", 1),
            level(Side::SELL, "102", "1", 1),
            level(Side::SELL, "101", "1", 1),
        ]);

        let depth = book.depth(2);
        let bids: Vec<Price> = depth.bids.iter().map(|l| l.price).collect();
        let asks: Vec<Price> = depth.asks.iter().map(|l| l.price).collect();
        assert_eq!(bids, vec![price("100"), price("99")]);
        assert_eq!(asks, vec![price("101"), price("102")]);
    }

    #[test]
    fn test_manager_ignores_unknown_products() {
        let mut books = BookManager::new();
        let product = ProductId::new("BTC-USD");

        let outcome = books.apply_updates(&product, &[level(Side::BUY, "1", "1", 5)]);
        assert_eq!(outcome.unknown, 1);
        assert!(books.is_empty());

        books.apply_snapshot(&product, &[level(Side::BUY, "1", "1", 5)]);
        let outcome = books.apply_updates(&product, &[level(Side::BUY, "1", "2", 4), level(Side::BUY, "2", "1", 6)]);
        assert_eq!(outcome, BatchOutcome { applied: 1, stale: 1, unknown: 0 });
        assert_eq!(books.book("BTC-USD").unwrap().bid_depth(), 2);
    }

    #[test]
    fn test_manager_routes_trades_by_product() {
        let mut books = BookManager::new();
        books.apply_snapshot(&ProductId::new("BTC-USD"), &[level(Side::SELL, "101", "1", 1)]);
        books.apply_snapshot(&ProductId::new("ETH-USD"), &[level(Side::SELL, "11", "1", 1)]);

        let trade = |product: &str, p: &str, time| MarketTrade {
            trade_id: "t".to_string(),
            product_id: ProductId::new(product),
            price: price(p),
            size: qty("1"),
            side: Side::SELL,
            time,
        };

        let outcome = books.apply_trades(&[trade("ETH-USD", "11", 2), trade("SOL-USD", "1", 2)]);
        assert_eq!(outcome, BatchOutcome { applied: 1, stale: 0, unknown: 1 });
        assert_eq!(books.book("ETH-USD").unwrap().ask_depth(), 0);
        assert_eq!(books.book("BTC-USD").unwrap().ask_depth(), 1);

        assert!(books.remove("BTC-USD").is_some());
        assert_eq!(books.products().count(), 1);
        books.clear();
        assert!(books.is_empty());
    }

    fn arb_update() -> impl Strategy<Value = Level2Update> {
        (any::<bool>(), 95u64..105, 0u64..4, 0i64..50).prop_map(|(buy, price, quantity, event_time)| Level2Update {
            side: if buy { Side::BUY } else { Side::SELL },
            event_time,
            price_level: Price::from_u64(price),
            new_quantity: Quantity::from_u64(quantity),
        })
    }

    proptest! {
        #[test]
        fn prop_snapshot_is_idempotent(levels in proptest::collection::vec(arb_update(), 0..40)) {
            let mut once = OrderBook::new(ProductId::new("BTC-USD"));
            once.apply_snapshot(&levels);
            let mut twice = once.clone();
            twice.apply_snapshot(&levels);
            prop_assert_eq!(once.depth(usize::MAX), twice.depth(usize::MAX));
        }

        #[test]
        fn prop_event_time_is_monotonic(updates in proptest::collection::vec(arb_update(), 1..100)) {
            let mut book = make_book();
            for update in updates {
                let before = book.depth(usize::MAX);
                let applied = book.apply_update(update.side, update.price_level, update.new_quantity, update.event_time);
                let after = book.depth(usize::MAX);

                prop_assert!(after.last_event_time >= before.last_event_time);
                match applied {
                    BookApply::Stale => {
                        prop_assert!(update.event_time <= before.last_event_time);
                        prop_assert_eq!(&before, &after);
                    }
                    BookApply::Applied => prop_assert_eq!(after.last_event_time, update.event_time),
                }
                prop_assert!(after.bids.iter().chain(&after.asks).all(|level| !level.quantity.is_zero()));
            }
        }
    }
}
