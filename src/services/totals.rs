//! Order totals and the kiosk cart.
//!
//! Every amount is a [`Decimal`]. Line totals and line taxes are rounded to
//! two places (midpoint away from zero) before they are summed, so the
//! receipt always adds up to the stored total.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{entities::product, errors::ServiceError};

const MONEY_SCALE: u32 = 2;

/// Largest amount a `decimal(12,2)` money column holds.
pub const MAX_MONEY: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// A product snapshot with a quantity, ready to be priced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub tax_percentage: Option<Decimal>,
    pub quantity: i32,
}

impl PricedLine {
    pub fn from_product(product: &product::Model, quantity: i32) -> Self {
        Self {
            product_id: product.id,
            name: product.name.clone(),
            unit_price: product.price,
            tax_percentage: product.tax_percentage,
            quantity,
        }
    }

    pub fn line_total(&self) -> Result<Decimal, ServiceError> {
        line_total(self.unit_price, self.quantity)
    }

    pub fn line_tax(&self) -> Result<Decimal, ServiceError> {
        line_tax(self.line_total()?, self.tax_percentage)
    }

    fn validate(&self) -> Result<(), ServiceError> {
        if self.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity for {} must be positive",
                self.name
            )));
        }
        if self.unit_price.is_sign_negative() {
            return Err(ServiceError::ValidationError(format!(
                "price for {} must not be negative",
                self.name
            )));
        }
        if self.unit_price > MAX_MONEY {
            return Err(ServiceError::ValidationError(format!(
                "price for {} exceeds the maximum amount",
                self.name
            )));
        }
        if self.tax_percentage.is_some_and(|pct| pct.is_sign_negative()) {
            return Err(ServiceError::ValidationError(format!(
                "tax percentage for {} must not be negative",
                self.name
            )));
        }
        Ok(())
    }
}

fn overflow() -> ServiceError {
    ServiceError::ValidationError("order amount exceeds the maximum amount".to_string())
}

fn checked_sum(a: Decimal, b: Decimal) -> Result<Decimal, ServiceError> {
    a.checked_add(b).filter(|sum| *sum <= MAX_MONEY).ok_or_else(overflow)
}

pub fn line_total(unit_price: Decimal, quantity: i32) -> Result<Decimal, ServiceError> {
    unit_price
        .checked_mul(Decimal::from(quantity))
        .map(round_money)
        .filter(|total| *total <= MAX_MONEY)
        .ok_or_else(overflow)
}

pub fn line_tax(line_total: Decimal, tax_percentage: Option<Decimal>) -> Result<Decimal, ServiceError> {
    let pct = tax_percentage.unwrap_or(Decimal::ZERO);
    line_total
        .checked_mul(pct)
        .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
        .map(round_money)
        .ok_or_else(overflow)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub tip_amount: Decimal,
    pub total_amount: Decimal,
}

/// Computes subtotal, tax and total for a set of lines plus a tip.
pub fn compute_totals(lines: &[PricedLine], tip: Decimal) -> Result<OrderTotals, ServiceError> {
    if tip.is_sign_negative() && !tip.is_zero() {
        return Err(ServiceError::ValidationError(
            "tip must not be negative".to_string(),
        ));
    }
    if tip > MAX_MONEY {
        return Err(ServiceError::ValidationError(
            "tip exceeds the maximum amount".to_string(),
        ));
    }

    let mut subtotal = Decimal::ZERO;
    let mut tax_amount = Decimal::ZERO;
    for line in lines {
        line.validate()?;
        let total = line.line_total()?;
        subtotal = checked_sum(subtotal, total)?;
        tax_amount = checked_sum(tax_amount, line_tax(total, line.tax_percentage)?)?;
    }

    let tip_amount = round_money(tip);
    let total_amount = checked_sum(checked_sum(subtotal, tax_amount)?, tip_amount)?;
    Ok(OrderTotals {
        subtotal,
        tax_amount,
        tip_amount,
        total_amount,
    })
}

/// Kiosk cart held client-side (or by the CLI) until checkout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<PricedLine>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one unit of `product`, merging with an existing line.
    pub fn add(&mut self, product: &product::Model) {
        match self.lines.iter_mut().find(|l| l.product_id == product.id) {
            Some(line) => line.quantity += 1,
            None => self.lines.push(PricedLine::from_product(product, 1)),
        }
    }

    /// Sets a line's quantity; zero or less removes the line.
    pub fn set_quantity(&mut self, product_id: Uuid, quantity: i32) {
        if quantity <= 0 {
            self.lines.retain(|l| l.product_id != product_id);
        } else if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = quantity;
        }
    }

    pub fn item_count(&self) -> i64 {
        self.lines.iter().map(|l| i64::from(l.quantity)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> &[PricedLine] {
        &self.lines
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn totals(&self, tip: Decimal) -> Result<OrderTotals, ServiceError> {
        compute_totals(&self.lines, tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn line(price: Decimal, tax: Option<Decimal>, quantity: i32) -> PricedLine {
        PricedLine {
            product_id: Uuid::new_v4(),
            name: "Masala Dosa".to_string(),
            unit_price: price,
            tax_percentage: tax,
            quantity,
        }
    }

    fn product(price: Decimal) -> product::Model {
        let now = Utc::now();
        product::Model {
            id: Uuid::new_v4(),
            store_id: Uuid::new_v4(),
            category_id: None,
            name: "Filter Coffee".to_string(),
            description: None,
            price,
            image_url: None,
            is_available: Some(true),
            is_trending: None,
            is_recommended: None,
            prep_time_minutes: Some(5),
            tax_percentage: Some(dec!(5)),
            tax_type: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn two_units_at_five_percent_with_tip() {
        let totals = compute_totals(&[line(dec!(100), Some(dec!(5)), 2)], dec!(10)).unwrap();
        assert_eq!(totals.subtotal, dec!(200));
        assert_eq!(totals.tax_amount, dec!(10));
        assert_eq!(totals.tip_amount, dec!(10));
        assert_eq!(totals.total_amount, dec!(220));
    }

    #[test]
    fn missing_tax_percentage_means_untaxed() {
        let totals = compute_totals(&[line(dec!(49.50), None, 3)], Decimal::ZERO).unwrap();
        assert_eq!(totals.subtotal, dec!(148.50));
        assert_eq!(totals.tax_amount, Decimal::ZERO);
        assert_eq!(totals.total_amount, dec!(148.50));
    }

    #[test]
    fn line_tax_rounds_midpoint_away_from_zero() {
        // 2.50 * 5% = 0.125
        assert_eq!(line_tax(dec!(2.50), Some(dec!(5))).unwrap(), dec!(0.13));
        // 10.05 * 5% = 0.5025
        assert_eq!(line_tax(dec!(10.05), Some(dec!(5))).unwrap(), dec!(0.50));
    }

    #[test]
    fn tax_is_rounded_per_line_before_summing() {
        let lines = [
            line(dec!(2.50), Some(dec!(5)), 1),
            line(dec!(2.50), Some(dec!(5)), 1),
        ];
        let totals = compute_totals(&lines, Decimal::ZERO).unwrap();
        assert_eq!(totals.tax_amount, dec!(0.26));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert_matches!(
            compute_totals(&[line(dec!(10), None, 0)], Decimal::ZERO),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            compute_totals(&[line(dec!(-1), None, 1)], Decimal::ZERO),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            compute_totals(&[line(dec!(10), Some(dec!(-5)), 1)], Decimal::ZERO),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            compute_totals(&[line(dec!(10), None, 1)], dec!(-0.01)),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn max_money_is_the_column_limit() {
        assert_eq!(MAX_MONEY, dec!(9999999999.99));
    }

    #[test]
    fn oversized_amounts_are_rejected_not_overflowed() {
        assert_matches!(
            compute_totals(&[line(dec!(10), None, 1)], Decimal::MAX),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            compute_totals(&[line(Decimal::MAX, None, 2)], Decimal::ZERO),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            compute_totals(&[line(MAX_MONEY, None, i32::MAX)], Decimal::ZERO),
            Err(ServiceError::ValidationError(_))
        );
        let near_limit = [line(MAX_MONEY, None, 1), line(dec!(0.01), None, 1)];
        assert_matches!(
            compute_totals(&near_limit, Decimal::ZERO),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            compute_totals(&[line(MAX_MONEY, Some(dec!(100)), 1)], Decimal::ZERO),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn empty_lines_total_to_tip() {
        let totals = compute_totals(&[], dec!(5)).unwrap();
        assert_eq!(totals.subtotal, Decimal::ZERO);
        assert_eq!(totals.total_amount, dec!(5));
    }

    #[test]
    fn cart_add_merges_lines() {
        let coffee = product(dec!(40));
        let mut cart = Cart::new();
        cart.add(&coffee);
        cart.add(&coffee);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.item_count(), 2);
        let totals = cart.totals(Decimal::ZERO).unwrap();
        assert_eq!(totals.subtotal, dec!(80));
        assert_eq!(totals.tax_amount, dec!(4));
    }

    #[test]
    fn cart_set_quantity_to_zero_removes_line() {
        let coffee = product(dec!(40));
        let tea = product(dec!(25));
        let mut cart = Cart::new();
        cart.add(&coffee);
        cart.add(&tea);
        cart.set_quantity(tea.id, 4);
        assert_eq!(cart.item_count(), 5);
        cart.set_quantity(coffee.id, 0);
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].product_id, tea.id);
        cart.set_quantity(tea.id, -2);
        assert!(cart.is_empty());
    }

    fn arb_line() -> impl Strategy<Value = PricedLine> {
        (0i64..100_000, proptest::option::of(0i64..=1000), 1i32..50).prop_map(
            |(cents, tax_tenths, quantity)| {
                line(
                    Decimal::new(cents, 2),
                    tax_tenths.map(|t| Decimal::new(t, 1)),
                    quantity,
                )
            },
        )
    }

    proptest! {
        #[test]
        fn totals_add_up(lines in proptest::collection::vec(arb_line(), 0..12), tip_cents in 0i64..50_000) {
            let tip = Decimal::new(tip_cents, 2);
            let totals = compute_totals(&lines, tip).unwrap();
            prop_assert_eq!(totals.total_amount, totals.subtotal + totals.tax_amount + totals.tip_amount);
            prop_assert!(totals.subtotal >= Decimal::ZERO);
            prop_assert!(totals.tax_amount >= Decimal::ZERO);
            prop_assert!(totals.total_amount.scale() <= MONEY_SCALE);
        }

        #[test]
        fn recomputation_is_idempotent(lines in proptest::collection::vec(arb_line(), 0..12), tip_cents in 0i64..50_000) {
            let tip = Decimal::new(tip_cents, 2);
            prop_assert_eq!(compute_totals(&lines, tip).unwrap(), compute_totals(&lines, tip).unwrap());
        }
    }
}
