//! Farmer ledger calculation
//!
//! Balances are derived from order and payout records on every read. Nothing
//! here touches storage: the store aggregates raw sums into [`LedgerTotals`]
//! and these functions turn them into the earnings summary and the
//! withdrawable balance used when accepting a payout request.
//!
//! All arithmetic is exact decimal arithmetic. Rounding happens when a value
//! is rendered, and when the available balance is cut down to whole cents so
//! the figure a farmer sees is exactly the figure they can withdraw.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Platform fee applied to gross delivered revenue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub platform_fee_rate: Decimal,
}

impl FeePolicy {
    pub fn new(platform_fee_rate: Decimal) -> Self {
        Self { platform_fee_rate }
    }

    /// Revenue left to the farmer after the platform fee
    pub fn net_of_fee(&self, gross: Decimal) -> Decimal {
        gross * (Decimal::ONE - self.platform_fee_rate)
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self::new(Decimal::new(10, 2))
    }
}

/// Raw per-farmer sums. Empty sets aggregate to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct LedgerTotals {
    /// Sum of `total_price` over delivered orders
    pub delivered_revenue: Decimal,
    /// Sum of completed payout amounts
    pub completed_payouts: Decimal,
    /// Sum of pending payout amounts
    pub pending_payouts: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EarningsSummary {
    pub total_earned: Decimal,
    pub net_earned: Decimal,
    pub total_withdrawn: Decimal,
    pub pending_withdrawal: Decimal,
    pub available_balance: Decimal,
}

pub fn earnings_summary(totals: &LedgerTotals, fees: &FeePolicy) -> EarningsSummary {
    let net_earned = fees.net_of_fee(totals.delivered_revenue);
    EarningsSummary {
        total_earned: totals.delivered_revenue,
        net_earned,
        total_withdrawn: totals.completed_payouts,
        pending_withdrawal: totals.pending_payouts,
        available_balance: net_earned - totals.completed_payouts - totals.pending_payouts,
    }
}

/// Balance a new payout request is checked against.
///
/// Pending and completed payouts both count as withdrawn, so a second pending
/// request cannot be filed against funds an earlier one already claimed.
pub fn withdrawable_balance(totals: &LedgerTotals, fees: &FeePolicy) -> Decimal {
    let committed = totals.completed_payouts + totals.pending_payouts;
    floor_to_cents(fees.net_of_fee(totals.delivered_revenue) - committed)
}

/// Round toward negative infinity at two decimal places
pub fn floor_to_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::ToNegativeInfinity)
}

/// True when `amount` has no fraction below one cent
pub fn is_whole_cents(amount: Decimal) -> bool {
    amount.normalize().scale() <= 2
}

/// Render an amount with exactly two decimal places, rounding half away from zero.
pub fn format_money(amount: Decimal) -> String {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}

/// Whole-unit amount for the payment gateway, rounded half away from zero.
/// `None` when the value does not fit an `i64`.
pub fn to_whole_units(amount: Decimal) -> Option<i64> {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

/// Dashboard rendering of [`EarningsSummary`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsSummaryView {
    pub total_earned: String,
    pub net_earned: String,
    pub total_withdrawn: String,
    pub pending_withdrawal: String,
    pub available_balance: String,
}

impl From<EarningsSummary> for EarningsSummaryView {
    fn from(summary: EarningsSummary) -> Self {
        Self {
            total_earned: format_money(summary.total_earned),
            net_earned: format_money(summary.net_earned),
            total_withdrawn: format_money(summary.total_withdrawn),
            pending_withdrawal: format_money(summary.pending_withdrawal),
            available_balance: format_money(floor_to_cents(summary.available_balance)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    #[test]
    fn empty_ledger_has_zero_balance() {
        let summary = earnings_summary(&LedgerTotals::default(), &FeePolicy::default());
        let view = EarningsSummaryView::from(summary);

        assert_eq!(summary.available_balance, Decimal::ZERO);
        assert_eq!(view.total_earned, "0.00");
        assert_eq!(view.net_earned, "0.00");
        assert_eq!(view.total_withdrawn, "0.00");
        assert_eq!(view.pending_withdrawal, "0.00");
        assert_eq!(view.available_balance, "0.00");
    }

    #[test]
    fn delivered_order_with_completed_payout() {
        let totals = LedgerTotals {
            delivered_revenue: dec("1000"),
            completed_payouts: dec("400"),
            pending_payouts: Decimal::ZERO,
        };
        let view = EarningsSummaryView::from(earnings_summary(&totals, &FeePolicy::default()));

        assert_eq!(
            view,
            EarningsSummaryView {
                total_earned: "1000.00".to_string(),
                net_earned: "900.00".to_string(),
                total_withdrawn: "400.00".to_string(),
                pending_withdrawal: "0.00".to_string(),
                available_balance: "500.00".to_string(),
            }
        );
    }

    #[test]
    fn available_balance_matches_formula_exactly() {
        let cases = [
            ("1234.56", "100.10", "33.33"),
            ("0.01", "0", "0"),
            ("999999.99", "123456.78", "0.01"),
            ("10.05", "0", "9.04"),
        ];
        for (earned, withdrawn, pending) in cases {
            let totals = LedgerTotals {
                delivered_revenue: dec(earned),
                completed_payouts: dec(withdrawn),
                pending_payouts: dec(pending),
            };
            let summary = earnings_summary(&totals, &FeePolicy::default());
            let expected = dec(earned) * dec("0.9") - dec(withdrawn) - dec(pending);
            assert_eq!(summary.available_balance, expected);
            assert_eq!(
                format_money(summary.available_balance),
                format_money(expected)
            );
        }
    }

    #[test]
    fn withdrawable_counts_pending_as_withdrawn() {
        let totals = LedgerTotals {
            delivered_revenue: dec("1000"),
            completed_payouts: dec("100"),
            pending_payouts: dec("300"),
        };
        let fees = FeePolicy::default();
        assert_eq!(withdrawable_balance(&totals, &fees), dec("500"));
        assert_eq!(
            withdrawable_balance(&totals, &fees),
            earnings_summary(&totals, &fees).available_balance
        );
    }

    #[test]
    fn sub_cent_balance_is_shown_as_what_can_be_withdrawn() {
        let totals = LedgerTotals {
            delivered_revenue: dec("10.05"),
            ..Default::default()
        };
        let fees = FeePolicy::default();
        let summary = earnings_summary(&totals, &fees);

        assert_eq!(summary.available_balance, dec("9.045"));
        assert_eq!(withdrawable_balance(&totals, &fees), dec("9.04"));
        assert_eq!(EarningsSummaryView::from(summary).available_balance, "9.04");
    }

    #[test]
    fn cent_precision() {
        assert!(is_whole_cents(dec("300.50")));
        assert!(is_whole_cents(dec("1.000")));
        assert!(is_whole_cents(dec("7")));
        assert!(!is_whole_cents(dec("0.001")));
        assert_eq!(floor_to_cents(dec("-0.001")), dec("-0.01"));
    }

    #[test]
    fn custom_fee_rate() {
        let totals = LedgerTotals {
            delivered_revenue: dec("200"),
            ..Default::default()
        };
        let fees = FeePolicy::new(dec("0.025"));
        assert_eq!(format_money(earnings_summary(&totals, &fees).net_earned), "195.00");
    }

    #[test]
    fn money_formatting_rounds_half_away_from_zero() {
        assert_eq!(format_money(dec("0.005")), "0.01");
        assert_eq!(format_money(dec("2.344")), "2.34");
        assert_eq!(format_money(dec("-0.005")), "-0.01");
        assert_eq!(format_money(dec("7")), "7.00");
        assert_eq!(format_money(dec("7.1")), "7.10");
    }

    #[test]
    fn gateway_amount_rounds_to_nearest_whole_unit() {
        assert_eq!(to_whole_units(dec("500")), Some(500));
        assert_eq!(to_whole_units(dec("499.5")), Some(500));
        assert_eq!(to_whole_units(dec("499.49")), Some(499));
        assert_eq!(to_whole_units(dec("0.4")), Some(0));
    }
}
