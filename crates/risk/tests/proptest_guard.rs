use chrono::Utc;
use common::{OpenPosition, OrderSide, Position};
use proptest::prelude::*;
use risk::{exit_prices, fallback_trigger, FallbackReason, RiskConfig};
use rust_decimal::Decimal;

fn price() -> impl Strategy<Value = Decimal> {
    (1u64..100_000_000u64).prop_map(|cents| Decimal::new(cents as i64, 2))
}

fn open(entry: Decimal) -> OpenPosition {
    OpenPosition {
        entry_price: entry,
        quantity: Decimal::new(2, 3),
        opened_at: Utc::now(),
    }
}

proptest! {
    /// The fallback never fires inside the band the exchange orders cover.
    #[test]
    fn no_fallback_between_protective_levels(entry in price(), bps in -30i64..=50i64) {
        let config = RiskConfig::default();
        let close = entry * (Decimal::ONE + Decimal::new(bps, 4));
        prop_assert_eq!(fallback_trigger(&Position::Long(open(entry)), close, &config), None);
        let mirrored = entry * (Decimal::ONE - Decimal::new(bps, 4));
        prop_assert_eq!(fallback_trigger(&Position::Short(open(entry)), mirrored, &config), None);
    }

    /// Past stop-loss plus slack, a long always falls back to a stop-loss exit.
    #[test]
    fn long_beyond_stop_and_slack_always_triggers(entry in price(), extra_bps in 1i64..5_000i64) {
        let config = RiskConfig::default();
        let drop = config.stop_loss_pct + config.fallback_slack_pct + Decimal::new(extra_bps, 4);
        let close = entry * (Decimal::ONE - drop);
        prop_assert_eq!(
            fallback_trigger(&Position::Long(open(entry)), close, &config),
            Some(FallbackReason::StopLoss)
        );
    }

    /// Take-profit sits on the profitable side of entry and stop-loss on the
    /// losing side, for both directions, once rounded.
    #[test]
    fn exit_prices_bracket_entry(entry in price()) {
        let config = RiskConfig::default();
        let (tp, sl) = exit_prices(OrderSide::Buy, entry, &config);
        prop_assert!(tp >= entry && sl <= entry);
        let (tp, sl) = exit_prices(OrderSide::Sell, entry, &config);
        prop_assert!(tp <= entry && sl >= entry);
    }
}
