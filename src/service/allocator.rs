use crate::models::{InvoiceTotals, LineAllocation};
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};

const MONEY_SCALE: i64 = 2;
const UNIT_COST_SCALE: i64 = 6;

/// What to do with the cents lost to per-line rounding.
///
/// `None` keeps every split independently rounded, so the allocated sum may
/// drift from the invoice total by up to half a cent per line. `LastLine`
/// pushes the drift into the last matched line, the way the purchase-order
/// installment generator closes its schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    #[default]
    None,
    LastLine,
}

/// Per-line input to the allocator.
#[derive(Debug, Clone)]
pub struct AllocationLine {
    pub gross: BigDecimal,
    pub quantity: BigDecimal,
    pub own_discount: Option<BigDecimal>,
}

/// Half-up (away from zero) rounding to `scale` decimals.
pub fn round_half_up(value: &BigDecimal, scale: i64) -> BigDecimal {
    let half = BigDecimal::new(5.into(), scale + 1);
    let shifted = if *value < BigDecimal::zero() {
        value - half
    } else {
        value + half
    };
    // with_scale truncates toward zero
    shifted.with_scale(scale)
}

/// Distributes invoice freight, other costs and discount over the matched
/// lines, proportionally to their gross value.
///
/// The base is the sum of the matched lines' gross values; a zero base is
/// treated as 1 so every share (and every allocation) comes out zero.
pub fn allocate(
    lines: &[AllocationLine],
    totals: &InvoiceTotals,
    policy: RemainderPolicy,
) -> Vec<LineAllocation> {
    let mut base: BigDecimal = lines.iter().map(|l| &l.gross).sum();
    if base.is_zero() {
        base = BigDecimal::from(1);
    }

    let mut splits: Vec<Split> = lines
        .iter()
        .map(|line| {
            let share = &line.gross / &base;
            Split {
                discount: round_half_up(&(&totals.discount * &share), MONEY_SCALE),
                freight: round_half_up(&(&totals.freight * &share), MONEY_SCALE),
                other: round_half_up(&(&totals.other * &share), MONEY_SCALE),
            }
        })
        .collect();

    if policy == RemainderPolicy::LastLine && !lines.iter().all(|l| l.gross.is_zero()) {
        if let Some((last, rest)) = splits.split_last_mut() {
            last.discount = &totals.discount - rest.iter().map(|s| &s.discount).sum::<BigDecimal>();
            last.freight = &totals.freight - rest.iter().map(|s| &s.freight).sum::<BigDecimal>();
            last.other = &totals.other - rest.iter().map(|s| &s.other).sum::<BigDecimal>();
        }
    }

    lines
        .iter()
        .zip(splits)
        .map(|(line, split)| {
            let alloc_discount = match &line.own_discount {
                Some(own) => own + &split.discount,
                None => split.discount,
            };
            let net = &line.gross - &alloc_discount + &split.freight + &split.other;
            let landed_unit_cost = if line.quantity.is_zero() {
                BigDecimal::zero().with_scale(UNIT_COST_SCALE)
            } else {
                round_half_up(&(net / &line.quantity), UNIT_COST_SCALE)
            };
            LineAllocation {
                alloc_discount,
                alloc_freight: split.freight,
                alloc_other: split.other,
                landed_unit_cost,
            }
        })
        .collect()
}

struct Split {
    discount: BigDecimal,
    freight: BigDecimal,
    other: BigDecimal,
}
