//! Fixed-point money, quantity and VAT-rate types.
//!
//! # Motivation
//!
//! Billing amounts must reconcile to the cent across dozens of cumulative
//! statements. Floating point drifts; raw `i64` allows accidental arithmetic
//! between prices and quantities. Three newtypes keep the scales apart:
//!
//! - [`Micros`]: money at 1e-6 scale (1 EUR = `Micros::new(1_000_000)`).
//! - [`Qty`]: billable quantities at 1e-3 scale (m², m³, hours, units...).
//! - [`VatRate`]: VAT rate in basis points (20 % = `VatRate::from_bps(2_000)`).
//!
//! # Rounding
//!
//! The only operations that change scale are [`Qty::checked_mul_price`] and
//! [`VatRate::checked_apply`]. Both compute in `i128` and round half away from
//! zero to the micro, then narrow back to `i64`. `None` means overflow; callers
//! surface it as a validation failure rather than clamping.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Money scale: micros (1e-6).
pub const MICROS_SCALE: i64 = 1_000_000;

/// Quantity scale: thousandths of a unit (1e-3).
pub const QTY_SCALE: i64 = 1_000;

/// VAT scale: basis points (1e-4).
pub const BPS_SCALE: i64 = 10_000;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Failure to parse a decimal string into a fixed-point value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFixedError {
    #[error("empty decimal string")]
    Empty,
    #[error("invalid decimal format: {0:?}")]
    Format(String),
    #[error("too many decimal places in {input:?} (max {max})")]
    Precision { input: String, max: usize },
    #[error("decimal out of range: {0:?}")]
    Overflow(String),
}

/// Parse `"[-+]digits[.digits]"` into an integer scaled by `10^decimals`.
///
/// Rejects more fractional digits than the scale carries instead of rounding,
/// so an input never silently changes value on the way in.
fn parse_scaled(input: &str, decimals: usize) -> Result<i64, ParseFixedError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(ParseFixedError::Empty);
    }

    let (negative, digits) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let mut parts = digits.split('.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("");
    if parts.next().is_some() || (int_part.is_empty() && frac_part.is_empty()) {
        return Err(ParseFixedError::Format(input.to_string()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ParseFixedError::Format(input.to_string()));
    }
    if frac_part.len() > decimals {
        return Err(ParseFixedError::Precision {
            input: input.to_string(),
            max: decimals,
        });
    }

    let overflow = || ParseFixedError::Overflow(input.to_string());
    let scale = 10_i64.pow(decimals as u32);

    let int_val: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| overflow())?
    };
    let mut frac_val: i64 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().map_err(|_| overflow())?
    };
    for _ in frac_part.len()..decimals {
        frac_val *= 10;
    }

    let raw = int_val
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_val))
        .ok_or_else(overflow)?;
    Ok(if negative { -raw } else { raw })
}

fn fmt_scaled(f: &mut fmt::Formatter<'_>, raw: i64, scale: i64, decimals: usize) -> fmt::Result {
    let whole = raw / scale;
    let frac = (raw % scale).abs();
    // |value| < 1 with a negative sign truncates `whole` to 0; keep the sign.
    if raw < 0 && whole == 0 {
        write!(f, "-0.{frac:0decimals$}")
    } else {
        write!(f, "{whole}.{frac:0decimals$}")
    }
}

/// `n / d` rounded half away from zero. `d` must be positive.
fn div_round_half_away(n: i128, d: i128) -> i128 {
    let q = n / d;
    let r = n % d;
    if r.abs() * 2 >= d {
        q + n.signum()
    } else {
        q
    }
}

// ---------------------------------------------------------------------------
// Micros
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount at 1e-6 scale.
///
/// There is no `From<i64>`: use [`Micros::new`] when a raw integer is known
/// to be a micros amount, or [`Micros::from_units`] for whole currency units.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Micros(i64);

impl Micros {
    pub const ZERO: Micros = Micros(0);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Micros(raw)
    }

    /// Whole currency units (e.g. `from_units(10)` = 10.000000).
    pub fn from_units(units: i64) -> Option<Self> {
        units.checked_mul(MICROS_SCALE).map(Micros)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn checked_add(self, rhs: Micros) -> Option<Micros> {
        self.0.checked_add(rhs.0).map(Micros)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Micros) -> Option<Micros> {
        self.0.checked_sub(rhs.0).map(Micros)
    }
}

impl Add for Micros {
    type Output = Micros;
    #[inline]
    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0 + rhs.0)
    }
}

impl Sub for Micros {
    type Output = Micros;
    #[inline]
    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0 - rhs.0)
    }
}

impl Neg for Micros {
    type Output = Micros;
    #[inline]
    fn neg(self) -> Micros {
        Micros(-self.0)
    }
}

impl AddAssign for Micros {
    #[inline]
    fn add_assign(&mut self, rhs: Micros) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Micros {
    #[inline]
    fn sub_assign(&mut self, rhs: Micros) {
        self.0 -= rhs.0;
    }
}

impl Sum for Micros {
    fn sum<I: Iterator<Item = Micros>>(iter: I) -> Micros {
        iter.fold(Micros::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Micros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_scaled(f, self.0, MICROS_SCALE, 6)
    }
}

impl FromStr for Micros {
    type Err = ParseFixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_scaled(s, 6).map(Micros)
    }
}

// ---------------------------------------------------------------------------
// Qty
// ---------------------------------------------------------------------------

/// A billable quantity at 1e-3 scale (`Qty::new(1_500)` = 1.5 units).
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Qty(i64);

impl Qty {
    pub const ZERO: Qty = Qty(0);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Qty(raw)
    }

    pub fn from_units(units: i64) -> Option<Self> {
        units.checked_mul(QTY_SCALE).map(Qty)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub fn checked_add(self, rhs: Qty) -> Option<Qty> {
        self.0.checked_add(rhs.0).map(Qty)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Qty) -> Option<Qty> {
        self.0.checked_sub(rhs.0).map(Qty)
    }

    /// Price this quantity: `self × unit_price`, rounded half away from zero
    /// to the micro. `None` on overflow.
    pub fn checked_mul_price(self, unit_price: Micros) -> Option<Micros> {
        let product = i128::from(self.0) * i128::from(unit_price.0);
        let rounded = div_round_half_away(product, i128::from(QTY_SCALE));
        i64::try_from(rounded).ok().map(Micros)
    }
}

impl Add for Qty {
    type Output = Qty;
    #[inline]
    fn add(self, rhs: Qty) -> Qty {
        Qty(self.0 + rhs.0)
    }
}

impl Sub for Qty {
    type Output = Qty;
    #[inline]
    fn sub(self, rhs: Qty) -> Qty {
        Qty(self.0 - rhs.0)
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_scaled(f, self.0, QTY_SCALE, 3)
    }
}

impl FromStr for Qty {
    type Err = ParseFixedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_scaled(s, 3).map(Qty)
    }
}

// ---------------------------------------------------------------------------
// VatRate
// ---------------------------------------------------------------------------

/// VAT rate in basis points. French standard rate 20 % is `from_bps(2_000)`,
/// the renovation rate 10 % is `from_bps(1_000)`.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VatRate(i64);

impl VatRate {
    pub const ZERO: VatRate = VatRate(0);

    #[inline]
    pub const fn from_bps(bps: i64) -> Self {
        VatRate(bps)
    }

    #[inline]
    pub const fn bps(self) -> i64 {
        self.0
    }

    /// VAT due on `base`, rounded half away from zero to the micro.
    pub fn checked_apply(self, base: Micros) -> Option<Micros> {
        let product = i128::from(base.0) * i128::from(self.0);
        let rounded = div_round_half_away(product, i128::from(BPS_SCALE));
        i64::try_from(rounded).ok().map(Micros)
    }
}

impl fmt::Display for VatRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_scaled(f, self.0, 100, 2)?;
        f.write_str("%")
    }
}

impl FromStr for VatRate {
    type Err = ParseFixedError;

    /// Parses a percentage: `"20"` or `"5.5"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_scaled(s.trim().trim_end_matches('%'), 2).map(VatRate)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qty_times_price_is_exact_on_whole_units() {
        let qty = Qty::from_units(40).unwrap();
        let price = Micros::from_units(10).unwrap();
        assert_eq!(qty.checked_mul_price(price), Micros::from_units(400));
    }

    #[test]
    fn qty_times_price_rounds_half_away_from_zero() {
        // 0.001 × 0.000500 = 0.0000005 -> rounds up to 1 micro
        assert_eq!(Qty::new(1).checked_mul_price(Micros::new(500)), Some(Micros::new(1)));
        // 0.001 × 0.000499 rounds down to 0
        assert_eq!(Qty::new(1).checked_mul_price(Micros::new(499)), Some(Micros::ZERO));
        // symmetric for negatives
        assert_eq!(Qty::new(-1).checked_mul_price(Micros::new(500)), Some(Micros::new(-1)));
    }

    #[test]
    fn qty_times_price_overflow_is_none() {
        let qty = Qty::new(i64::MAX);
        assert_eq!(qty.checked_mul_price(Micros::new(i64::MAX)), None);
    }

    #[test]
    fn vat_twenty_percent() {
        let base = Micros::from_units(1_000).unwrap();
        assert_eq!(
            VatRate::from_bps(2_000).checked_apply(base),
            Micros::from_units(200)
        );
    }

    #[test]
    fn vat_rounds_to_the_micro() {
        // 5.5 % of 0.000010 = 0.00000055 -> 1 micro
        assert_eq!(
            VatRate::from_bps(550).checked_apply(Micros::new(10)),
            Some(Micros::new(1))
        );
    }

    #[test]
    fn parse_micros_and_qty() {
        assert_eq!("12.5".parse::<Micros>().unwrap(), Micros::new(12_500_000));
        assert_eq!("+0.000001".parse::<Micros>().unwrap(), Micros::new(1));
        assert_eq!("3".parse::<Qty>().unwrap(), Qty::new(3_000));
        assert_eq!("-2.25".parse::<Qty>().unwrap(), Qty::new(-2_250));
        assert_eq!(".5".parse::<Qty>().unwrap(), Qty::new(500));
    }

    #[test]
    fn parse_rejects_excess_precision_and_garbage() {
        assert!(matches!(
            "1.0001".parse::<Qty>(),
            Err(ParseFixedError::Precision { max: 3, .. })
        ));
        assert!(matches!("1.2.3".parse::<Micros>(), Err(ParseFixedError::Format(_))));
        assert!(matches!("abc".parse::<Micros>(), Err(ParseFixedError::Format(_))));
        assert!(matches!("".parse::<Micros>(), Err(ParseFixedError::Empty)));
        assert!(matches!("-".parse::<Qty>(), Err(ParseFixedError::Format(_))));
    }

    #[test]
    fn parse_vat_percentage() {
        assert_eq!("20".parse::<VatRate>().unwrap(), VatRate::from_bps(2_000));
        assert_eq!("5.5%".parse::<VatRate>().unwrap(), VatRate::from_bps(550));
    }

    #[test]
    fn display_keeps_sign_below_one() {
        assert_eq!(Micros::new(-250_000).to_string(), "-0.250000");
        assert_eq!(Qty::new(-5).to_string(), "-0.005");
        assert_eq!(Qty::new(70_000).to_string(), "70.000");
        assert_eq!(VatRate::from_bps(2_000).to_string(), "20.00%");
    }

    #[test]
    fn sum_of_micros() {
        let total: Micros = [Micros::new(1), Micros::new(2), Micros::new(3)]
            .into_iter()
            .sum();
        assert_eq!(total, Micros::new(6));
    }
}
