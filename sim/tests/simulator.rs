//! Simulator command behavior and determinism

use chrono::{TimeZone, Utc};
use common::{
    Actor, CancelStatus, Direction, ErrorCategory, ExecutionStatus, Market, Order, OrderParams,
    OrderUpdate, Side, TimeInForce, Trade, Transaction,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sim::{SimConfig, Simulator};

fn config() -> SimConfig {
    SimConfig {
        market: Market {
            symbol: "BTCUSDT".into(),
            base_asset: "BTC".into(),
            quote_asset: "USDT".into(),
            direction: Direction::Linear,
            contract_asset: None,
            price_tick: dec!(0.5),
            lot_size: dec!(0.001),
        },
        maker_fee: dec!(0.0001),
        taker_fee: dec!(0.0005),
    }
}

fn order(id: &str, side: Side, actor: Option<Actor>, price: Option<Decimal>, size: Decimal) -> Order {
    Order::new(
        id,
        "BTCUSDT",
        OrderParams {
            time_in_force: TimeInForce::GoodTillCancel,
            size,
            side,
            actor,
            price,
        },
    )
}

fn trade(id: &str, secs: i64, price: Decimal, size: Decimal, side: Side) -> Trade {
    Trade {
        id: id.into(),
        symbol: "BTCUSDT".into(),
        at: Utc.timestamp_opt(secs, 0).unwrap(),
        transaction: Transaction {
            price,
            size,
            side,
            actor: Actor::Taker,
        },
        fee: None,
    }
}

#[test]
fn maker_fill_attributes_fee() {
    let mut sim = Simulator::new(config());
    sim.ingest_trades(vec![trade("t0", 0, dec!(100), dec!(1), Side::Buy)]);

    let opened = sim.open_orders(vec![order(
        "m1",
        Side::Sell,
        Some(Actor::Maker),
        Some(dec!(101)),
        dec!(2),
    )]);
    assert_eq!(opened.len(), 1);
    assert!(opened[0].error.is_none());
    assert_eq!(opened[0].order.execution.status, ExecutionStatus::Created);

    let updates = sim.ingest_trades(vec![trade("t1", 1, dec!(101), dec!(3), Side::Buy)]);
    assert_eq!(updates.len(), 1);
    let filled = &updates[0].order;
    assert_eq!(filled.execution.status, ExecutionStatus::Filled);
    assert_eq!(filled.execution.size, dec!(2));
    assert_eq!(filled.execution.value, dec!(202));
    assert_eq!(filled.execution.price, Some(dec!(101)));
    let fee = filled.execution.fee.as_ref().unwrap();
    assert_eq!(fee.balance_change, dec!(-0.0202));
    assert_eq!(fee.asset.as_deref(), Some("USDT"));

    assert!(sim.book().is_empty());
    assert_eq!(sim.timestamp(), Some(Utc.timestamp_opt(1, 0).unwrap()));
}

#[test]
fn maker_must_post_relative_to_latest_trade() {
    let mut sim = Simulator::new(config());
    sim.ingest_trades(vec![trade("t0", 0, dec!(100), dec!(1), Side::Buy)]);

    // a buy resting at the last buy print would have taken
    let updates = sim.open_orders(vec![order(
        "m1",
        Side::Buy,
        Some(Actor::Maker),
        Some(dec!(100)),
        dec!(1),
    )]);
    assert_eq!(updates[0].error, Some(ErrorCategory::InvalidParams));
    assert_eq!(updates[0].order.execution.status, ExecutionStatus::Rejected);

    // strictly below posts
    let updates = sim.open_orders(vec![order(
        "m2",
        Side::Buy,
        Some(Actor::Maker),
        Some(dec!(99.5)),
        dec!(1),
    )]);
    assert!(updates[0].error.is_none());

    // after a sell print, a buy at the same price posts
    sim.ingest_trades(vec![trade("t1", 1, dec!(99), dec!(1), Side::Sell)]);
    let updates = sim.open_orders(vec![order(
        "m3",
        Side::Buy,
        Some(Actor::Maker),
        Some(dec!(99)),
        dec!(1),
    )]);
    assert!(updates[0].error.is_none());
}

#[test]
fn unspecified_actor_prefers_maker_then_taker() {
    let mut sim = Simulator::new(config());
    sim.ingest_trades(vec![trade("t0", 0, dec!(100), dec!(1), Side::Buy)]);

    let updates = sim.open_orders(vec![
        order("a", Side::Buy, None, Some(dec!(99)), dec!(1)),
        order("b", Side::Buy, None, Some(dec!(100)), dec!(1)),
        order("c", Side::Buy, None, None, dec!(1)),
    ]);
    assert!(updates.iter().all(|u| u.error.is_none()));
    assert_eq!(sim.order("a").unwrap().params.actor, Some(Actor::Maker));
    assert_eq!(sim.order("b").unwrap().params.actor, Some(Actor::Taker));
    assert_eq!(sim.order("c").unwrap().params.actor, Some(Actor::Taker));
}

#[test]
fn duplicate_id_is_rejected() {
    let mut sim = Simulator::new(config());
    sim.open_orders(vec![order(
        "dup",
        Side::Buy,
        Some(Actor::Taker),
        None,
        dec!(1),
    )]);
    let updates = sim.open_orders(vec![order(
        "dup",
        Side::Buy,
        Some(Actor::Taker),
        None,
        dec!(1),
    )]);
    assert_eq!(updates[0].error, Some(ErrorCategory::InvalidParams));
    assert_eq!(updates[0].order.execution.status, ExecutionStatus::Rejected);
}

#[test]
fn takers_fill_fifo_and_split_trades() {
    let mut sim = Simulator::new(config());
    let updates = sim.open_orders(vec![
        order("q1", Side::Buy, Some(Actor::Taker), None, dec!(2)),
        order("q2", Side::Buy, Some(Actor::Taker), None, dec!(3)),
    ]);
    assert!(updates.iter().all(|u| u.error.is_none()));

    // a sell print does not feed the buy queue
    let updates = sim.ingest_trades(vec![trade("t0", 0, dec!(100), dec!(5), Side::Sell)]);
    assert!(updates.is_empty());

    // 3 of volume: q1 takes 2 and completes, q2 takes 1
    let updates = sim.ingest_trades(vec![trade("t1", 1, dec!(100), dec!(3), Side::Buy)]);
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].order.id, "q1");
    assert_eq!(updates[0].order.execution.status, ExecutionStatus::Filled);
    assert_eq!(updates[1].order.id, "q2");
    assert_eq!(
        updates[1].order.execution.status,
        ExecutionStatus::PartiallyFilled
    );
    assert_eq!(updates[1].order.execution.size, dec!(1));

    // taker fee at the trade price
    let fee = updates[0].order.execution.fee.as_ref().unwrap();
    assert_eq!(fee.balance_change, dec!(200) * dec!(-0.0005));

    // the rest of q2 fills from the next print
    let updates = sim.ingest_trades(vec![trade("t2", 2, dec!(101), dec!(9), Side::Buy)]);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].order.id, "q2");
    assert_eq!(updates[0].order.execution.status, ExecutionStatus::Filled);
}

#[test]
fn cancel_paths() {
    let mut sim = Simulator::new(config());
    sim.ingest_trades(vec![trade("t0", 0, dec!(100), dec!(1), Side::Buy)]);
    sim.open_orders(vec![
        order("m1", Side::Sell, Some(Actor::Maker), Some(dec!(105)), dec!(1)),
        order("q1", Side::Buy, Some(Actor::Taker), None, dec!(1)),
    ]);

    // maker cancel succeeds and leaves the book
    let updates = sim.cancel_orders(vec![order(
        "m1",
        Side::Sell,
        Some(Actor::Maker),
        Some(dec!(105)),
        dec!(1),
    )]);
    assert!(updates[0].error.is_none());
    assert_eq!(updates[0].order.execution.status, ExecutionStatus::Cancelled);
    assert_eq!(updates[0].order.cancellation, Some(CancelStatus::Created));
    assert!(sim.book().is_empty());

    // unknown order
    let updates = sim.cancel_orders(vec![order(
        "ghost",
        Side::Buy,
        None,
        None,
        dec!(1),
    )]);
    assert_eq!(updates[0].error, Some(ErrorCategory::NotFound));
    assert_eq!(updates[0].order.cancellation, Some(CancelStatus::Rejected));

    // queued takers cannot be withdrawn
    let updates = sim.cancel_orders(vec![order("q1", Side::Buy, None, None, dec!(1))]);
    assert_eq!(updates[0].error, Some(ErrorCategory::Unsupported));
}

fn scripted_run() -> Vec<OrderUpdate> {
    let mut sim = Simulator::new(config());
    let mut updates = Vec::new();
    updates.extend(sim.ingest_trades(vec![trade("t0", 0, dec!(100), dec!(1), Side::Buy)]));
    updates.extend(sim.open_orders(vec![
        order("m1", Side::Sell, Some(Actor::Maker), Some(dec!(101)), dec!(2)),
        order("m2", Side::Buy, Some(Actor::Maker), Some(dec!(99)), dec!(1)),
        order("q1", Side::Buy, Some(Actor::Taker), None, dec!(4)),
    ]));
    updates.extend(sim.ingest_trades(vec![
        trade("t1", 1, dec!(101), dec!(3), Side::Buy),
        trade("t2", 2, dec!(99), dec!(2), Side::Sell),
        trade("t3", 3, dec!(100), dec!(2), Side::Buy),
    ]));
    updates.extend(sim.cancel_orders(vec![order("q1", Side::Buy, None, None, dec!(4))]));
    updates
}

#[test]
fn identical_runs_emit_identical_updates() {
    let first = scripted_run();
    let second = scripted_run();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn state_snapshots_round_trip() {
    let mut sim = Simulator::new(config());
    sim.ingest_trades(vec![trade("t0", 0, dec!(100), dec!(1), Side::Buy)]);
    sim.open_orders(vec![
        order("m1", Side::Sell, Some(Actor::Maker), Some(dec!(101)), dec!(2)),
        order("q1", Side::Buy, Some(Actor::Taker), None, dec!(4)),
    ]);

    let snapshot = serde_json::to_string(&sim).unwrap();
    let mut restored: Simulator = serde_json::from_str(&snapshot).unwrap();

    // the restored simulator continues identically
    let a = sim.ingest_trades(vec![trade("t1", 1, dec!(101), dec!(3), Side::Buy)]);
    let b = restored.ingest_trades(vec![trade("t1", 1, dec!(101), dec!(3), Side::Buy)]);
    assert_eq!(a, b);
    assert_eq!(sim.latest_trade(), restored.latest_trade());
}
