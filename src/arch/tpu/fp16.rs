//! Approximate FP16 arithmetic
//!
//! Both operations work on raw 16-bit patterns `{sign:1, exponent:5, mantissa:10}`
//! with bias 15. Exponent 0 is an exact signed zero (subnormals flush), exponent 31
//! is a signed special that propagates through both operations. The multiplier only
//! reads the top `mul_bits` of each 11-bit significand; the adder aligns the smaller
//! operand with a shifter limited to `add_shift` positions and renormalizes in a
//! single step.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TpuError};

/// Significand width including the implicit leading one
pub const SIG_BITS: u32 = 11;
pub const EXP_BIAS: i32 = 15;
pub const DEFAULT_MUL_BITS: u32 = 6;
pub const DEFAULT_ADD_SHIFT: u32 = 4;

pub const FP16_ZERO: u16 = 0x0000;
pub const FP16_ONE: u16 = 0x3C00;
pub const FP16_INF: u16 = 0x7C00;

const SIGN_MASK: u16 = 0x8000;
const MANT_MASK: u32 = 0x03FF;
const HIDDEN_BIT: u32 = 0x0400;
const EXP_SPECIAL: i32 = 31;

/// Approximation level of the arithmetic core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproxConfig {
  /// Significand bits (of 11) the multiplier reads
  pub mul_bits: u32,
  /// Largest alignment shift the adder performs
  pub add_shift: u32,
}

impl ApproxConfig {
  pub fn new(mul_bits: u32, add_shift: u32) -> Result<Self> {
    if !(1..=SIG_BITS).contains(&mul_bits) {
      return Err(TpuError::invalid_config(format!(
        "mul_bits must be in 1..={}, got {}",
        SIG_BITS, mul_bits
      )));
    }
    if add_shift > 31 {
      return Err(TpuError::invalid_config(format!(
        "add_shift must be in 0..=31, got {}",
        add_shift
      )));
    }
    Ok(Self { mul_bits, add_shift })
  }

  /// Full-width multiplier and unbounded alignment; results differ from
  /// IEEE only by truncation instead of rounding.
  pub const fn widest() -> Self {
    Self {
      mul_bits: SIG_BITS,
      add_shift: 31,
    }
  }
}

impl Default for ApproxConfig {
  fn default() -> Self {
    Self {
      mul_bits: DEFAULT_MUL_BITS,
      add_shift: DEFAULT_ADD_SHIFT,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fp16Class {
  Zero,
  Normal,
  Special,
}

/// Decoded fields of an FP16 pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fp16Parts {
  pub sign: bool,
  /// Biased exponent, 0..=31
  pub exp: i32,
  /// 11-bit significand with the implicit bit; 0 for the zero class
  pub sig: u32,
}

pub fn classify(bits: u16) -> Fp16Class {
  match (bits >> 10) & 0x1F {
    0 => Fp16Class::Zero,
    31 => Fp16Class::Special,
    _ => Fp16Class::Normal,
  }
}

pub fn decompose(bits: u16) -> Fp16Parts {
  let exp = ((bits >> 10) & 0x1F) as i32;
  let sig = if exp == 0 {
    0
  } else {
    HIDDEN_BIT | (bits as u32 & MANT_MASK)
  };
  Fp16Parts {
    sign: bits & SIGN_MASK != 0,
    exp,
    sig,
  }
}

pub fn signed_zero(sign: bool) -> u16 {
  if sign {
    SIGN_MASK
  } else {
    FP16_ZERO
  }
}

pub fn signed_special(sign: bool) -> u16 {
  signed_zero(sign) | FP16_INF
}

/// Assemble a result; exponent underflow flushes to zero, overflow saturates to special.
/// Only the low 10 bits of `sig` reach the mantissa field.
fn pack(sign: bool, exp: i32, sig: u32) -> u16 {
  if exp <= 0 {
    signed_zero(sign)
  } else if exp >= EXP_SPECIAL {
    signed_special(sign)
  } else {
    signed_zero(sign) | ((exp as u16) << 10) | (sig & MANT_MASK) as u16
  }
}

/// Numeric value of a pattern under this core's interpretation
/// (subnormals read as zero, specials as infinity).
pub fn fp16_value(bits: u16) -> f64 {
  let parts = decompose(bits);
  let magnitude = match classify(bits) {
    Fp16Class::Zero => 0.0,
    Fp16Class::Special => f64::INFINITY,
    Fp16Class::Normal => parts.sig as f64 * 2f64.powi(parts.exp - EXP_BIAS - 10),
  };
  if parts.sign {
    -magnitude
  } else {
    magnitude
  }
}

/// Approximate product of two FP16 patterns.
pub fn approx_mul(a: u16, b: u16, config: &ApproxConfig) -> u16 {
  let pa = decompose(a);
  let pb = decompose(b);
  let sign = pa.sign ^ pb.sign;

  // zero wins over special: 0 * inf is a signed zero
  if classify(a) == Fp16Class::Zero || classify(b) == Fp16Class::Zero {
    return signed_zero(sign);
  }
  if classify(a) == Fp16Class::Special || classify(b) == Fp16Class::Special {
    return signed_special(sign);
  }

  let m = config.mul_bits;
  let ta = pa.sig >> (SIG_BITS - m);
  let tb = pb.sig >> (SIG_BITS - m);
  let product = ta * tb;

  // both truncated significands have their top bit set, so the product's
  // leading one is at 2m-1 or 2m-2
  let (top, carry) = if product & (1 << (2 * m - 1)) != 0 {
    (2 * m - 1, 1)
  } else {
    (2 * m - 2, 0)
  };
  let frac = if top >= 10 {
    product >> (top - 10)
  } else {
    product << (10 - top)
  };

  pack(sign, pa.exp + pb.exp - EXP_BIAS + carry, frac)
}

/// Approximate sum of two FP16 patterns.
pub fn approx_add(a: u16, b: u16, config: &ApproxConfig) -> u16 {
  let pa = decompose(a);
  let pb = decompose(b);
  let class_a = classify(a);
  let class_b = classify(b);

  if class_a == Fp16Class::Special {
    return signed_special(pa.sign);
  }
  if class_b == Fp16Class::Special {
    return signed_special(pb.sign);
  }
  match (class_a, class_b) {
    (Fp16Class::Zero, Fp16Class::Zero) => return signed_zero(pa.sign && pb.sign),
    (Fp16Class::Zero, _) => return b,
    (_, Fp16Class::Zero) => return a,
    _ => {},
  }

  let (big, small) = if (pa.exp, pa.sig) >= (pb.exp, pb.sig) {
    (pa, pb)
  } else {
    (pb, pa)
  };

  let diff = (big.exp - small.exp) as u32;
  let shift = diff.min(config.add_shift);
  // a gap wider than the shifter drops the small operand outright rather than
  // adding it shifted by only `add_shift`
  let aligned = if diff > shift { 0 } else { small.sig >> shift };

  let mut sum = if big.sign == small.sign {
    big.sig + aligned
  } else {
    big.sig - aligned
  };
  if sum == 0 {
    return FP16_ZERO;
  }

  let mut exp = big.exp;
  if sum & (HIDDEN_BIT << 1) != 0 {
    sum >>= 1;
    exp += 1;
  } else if sum & HIDDEN_BIT == 0 && sum & (HIDDEN_BIT >> 1) != 0 {
    sum <<= 1;
    exp -= 1;
  }
  // a leading one further down is left where it is

  pack(big.sign, exp, sum)
}

#[cfg(test)]
mod tests {
  use super::*;
  use half::f16;
  use proptest::prelude::*;

  fn fp(v: f32) -> u16 {
    f16::from_f32(v).to_bits()
  }

  fn normal_bits() -> impl Strategy<Value = u16> {
    (any::<bool>(), 1u16..31, 0u16..1024).prop_map(|(s, e, m)| ((s as u16) << 15) | (e << 10) | m)
  }

  #[test]
  fn test_decompose() {
    let parts = decompose(0xC600);
    assert!(parts.sign);
    assert_eq!(parts.exp, 17);
    assert_eq!(parts.sig, 0x600);
    assert_eq!(decompose(0x0001).sig, 0);
    assert_eq!(classify(0x0001), Fp16Class::Zero);
    assert_eq!(classify(0x7E00), Fp16Class::Special);
    assert_eq!(classify(0x3C00), Fp16Class::Normal);
  }

  #[test]
  fn test_config_validation() {
    assert!(ApproxConfig::new(0, 4).is_err());
    assert!(ApproxConfig::new(12, 4).is_err());
    assert!(ApproxConfig::new(6, 32).is_err());
    assert_eq!(ApproxConfig::new(6, 4).unwrap(), ApproxConfig::default());
  }

  #[test]
  fn test_simple_products() {
    let cfg = ApproxConfig::default();
    assert_eq!(approx_mul(FP16_ONE, FP16_ONE, &cfg), FP16_ONE);
    assert_eq!(approx_mul(fp(2.0), fp(3.0), &cfg), fp(6.0));
    assert_eq!(approx_mul(fp(-2.0), fp(3.0), &cfg), fp(-6.0));
    assert_eq!(approx_mul(fp(-1.5), fp(-1.5), &cfg), fp(2.25));
    assert_eq!(approx_mul(fp(0.5), fp(8.0), &cfg), fp(4.0));
  }

  #[test]
  fn test_mul_zero_and_special() {
    let cfg = ApproxConfig::default();
    assert_eq!(approx_mul(FP16_ONE, 0x0000, &cfg), 0x0000);
    assert_eq!(approx_mul(0x8000, FP16_ONE, &cfg), 0x8000);
    assert_eq!(approx_mul(0x0001, 0x7BFF, &cfg), 0x0000);
    assert_eq!(approx_mul(FP16_INF, FP16_ONE, &cfg), FP16_INF);
    assert_eq!(approx_mul(0xFC00, FP16_ONE, &cfg), 0xFC00);
    assert_eq!(approx_mul(0x7E00, 0xFE00, &cfg), 0xFC00);
    assert_eq!(approx_mul(FP16_INF, 0x8000, &cfg), 0x8000);
  }

  #[test]
  fn test_mul_exponent_range() {
    let cfg = ApproxConfig::default();
    // 65504 * 2 saturates
    assert_eq!(approx_mul(0x7BFF, fp(2.0), &cfg), FP16_INF);
    // 2^-14 * 0.5 underflows
    assert_eq!(approx_mul(0x0400, fp(0.5), &cfg), 0x0000);
    assert_eq!(approx_mul(0x8400, fp(0.5), &cfg), 0x8000);
  }

  #[test]
  fn test_mul_truncation() {
    let cfg = ApproxConfig::default();
    // 1.0009765625 * 1.0009765625: the low mantissa bit is never read
    assert_eq!(approx_mul(0x3C01, 0x3C01, &cfg), FP16_ONE);
    // 1.96875 has top-6 significand 0b111111
    let r = fp16_value(approx_mul(fp(1.96875), fp(1.96875), &cfg));
    assert!((r - 3.875).abs() < 1e-9, "got {}", r);
  }

  #[test]
  fn test_simple_sums() {
    let cfg = ApproxConfig::default();
    assert_eq!(approx_add(FP16_ONE, FP16_ONE, &cfg), fp(2.0));
    assert_eq!(approx_add(fp(3.0), fp(5.0), &cfg), fp(8.0));
    assert_eq!(approx_add(fp(7.0), FP16_ONE, &cfg), fp(8.0));
    assert_eq!(approx_add(fp(-3.0), fp(1.0), &cfg), fp(-2.0));
    assert_eq!(approx_add(FP16_ONE, fp(-0.25), &cfg), fp(0.75));
  }

  #[test]
  fn test_add_zero_and_special() {
    let cfg = ApproxConfig::default();
    assert_eq!(approx_add(0x0000, fp(3.5), &cfg), fp(3.5));
    assert_eq!(approx_add(fp(-3.5), 0x8000, &cfg), fp(-3.5));
    assert_eq!(approx_add(0x8000, 0x8000, &cfg), 0x8000);
    assert_eq!(approx_add(0x8000, 0x0000, &cfg), 0x0000);
    assert_eq!(approx_add(FP16_ONE, 0xBC00, &cfg), 0x0000);
    assert_eq!(approx_add(FP16_INF, FP16_ONE, &cfg), FP16_INF);
    assert_eq!(approx_add(FP16_ONE, 0xFC00, &cfg), 0xFC00);
    assert_eq!(approx_add(0xFC00, FP16_INF, &cfg), 0xFC00);
    assert_eq!(approx_add(0x7BFF, 0x7BFF, &cfg), FP16_INF);
  }

  #[test]
  fn test_add_shift_limit() {
    let cfg = ApproxConfig::default();
    // exponent difference 4 is still aligned
    assert_eq!(approx_add(fp(16.0), FP16_ONE, &cfg), fp(17.0));
    // difference 5 is past the shifter
    assert_eq!(approx_add(fp(32.0), FP16_ONE, &cfg), fp(32.0));
    assert_eq!(approx_add(FP16_ONE, fp(1024.0), &cfg), fp(1024.0));

    let wide = ApproxConfig::new(6, 31).unwrap();
    assert_eq!(approx_add(fp(32.0), FP16_ONE, &wide), fp(33.0));
  }

  #[test]
  fn test_add_single_step_normalization() {
    let cfg = ApproxConfig::default();
    // leading one one position low: corrected
    assert_eq!(approx_add(FP16_ONE, fp(-0.25), &cfg), fp(0.75));
    // 1.0 - 0.875: leading one three positions low stays put, exponent unchanged
    assert_eq!(approx_add(FP16_ONE, fp(-0.875), &cfg), 0x3C80);
  }

  #[test]
  fn test_add_picks_larger_magnitude() {
    let cfg = ApproxConfig::default();
    assert_eq!(approx_add(fp(1.0), fp(-4.0), &cfg), fp(-3.0));
    assert_eq!(approx_add(fp(-4.0), fp(1.0), &cfg), fp(-3.0));
    // same exponent, ordering by significand
    assert_eq!(approx_add(fp(1.25), fp(-1.75), &cfg), fp(-0.5));
    assert_eq!(approx_add(fp(-1.75), fp(1.25), &cfg), fp(-0.5));
  }

  #[test]
  fn test_widest_mul_matches_ieee() {
    let cfg = ApproxConfig::new(10, 31).unwrap();
    // operands whose lowest significand bit is clear, so a 10-bit multiplier sees them whole
    for ea in [10u16, 13, 15, 17, 20] {
      for eb in [11u16, 14, 15, 16, 19] {
        for ma in (0u16..1024).step_by(62) {
          for mb in (0u16..1024).step_by(94) {
            let a = (ea << 10) | (ma & !1);
            let b = (eb << 10) | (mb & !1);
            let exact = (f16::from_bits(a) * f16::from_bits(b)).to_bits();
            let approx = approx_mul(a, b, &cfg);
            let ulps = (exact as i32 - approx as i32).abs();
            assert!(ulps <= 1, "{:#06x} * {:#06x}: exact {:#06x} approx {:#06x}", a, b, exact, approx);
          }
        }
      }
    }
  }

  #[test]
  fn test_widest_add_matches_ieee() {
    let cfg = ApproxConfig::new(10, 31).unwrap();
    for ea in [12u16, 14, 15, 16, 18, 21] {
      for eb in [10u16, 13, 15, 17, 20] {
        for ma in (0u16..1024).step_by(71) {
          for mb in (0u16..1024).step_by(83) {
            let a = (ea << 10) | ma;
            let b = (eb << 10) | mb;
            let exact = (f16::from_bits(a) + f16::from_bits(b)).to_bits();
            let approx = approx_add(a, b, &cfg);
            let ulps = (exact as i32 - approx as i32).abs();
            assert!(ulps <= 1, "{:#06x} + {:#06x}: exact {:#06x} approx {:#06x}", a, b, exact, approx);
          }
        }
      }
    }

    // mixed signs with at most one renormalization step
    let pairs = [
      (10.0, -1.0),
      (8.0, -0.5),
      (100.0, -4.0),
      (3.0, -0.75),
      (-20.0, 2.5),
      (1000.0, -24.0),
      (6.5, -1.25),
      (64.0, -3.0),
    ];
    for (x, y) in pairs {
      let exact = (f16::from_f32(x) + f16::from_f32(y)).to_bits();
      assert_eq!(approx_add(fp(x), fp(y), &cfg), exact, "{} + {}", x, y);
    }
  }

  #[test]
  fn test_mul_error_sweep_default() {
    let cfg = ApproxConfig::default();
    let mut worst = 0.0f64;
    for ea in 8u16..=22 {
      for eb in 8u16..=22 {
        for ma in (0u16..1024).step_by(37) {
          for mb in (5u16..1024).step_by(53) {
            let a = (ea << 10) | ma;
            let b = (eb << 10) | mb;
            let exact = fp16_value(a) * fp16_value(b);
            let approx = fp16_value(approx_mul(a, b, &cfg));
            worst = worst.max(((approx - exact) / exact).abs());
          }
        }
      }
    }
    assert!(worst < 0.10, "worst relative error {}", worst);
  }

  proptest! {
    #[test]
    fn prop_total_over_all_patterns(a in any::<u16>(), b in any::<u16>(), m in 1u32..=11, s in 0u32..=31) {
      let cfg = ApproxConfig::new(m, s).unwrap();
      let _ = approx_mul(a, b, &cfg);
      let _ = approx_add(a, b, &cfg);
    }

    #[test]
    fn prop_mul_by_zero_is_signed_zero(a in any::<u16>(), neg in any::<bool>(), m in 1u32..=11) {
      let cfg = ApproxConfig::new(m, 4).unwrap();
      let zero = signed_zero(neg);
      let expected = signed_zero((a & SIGN_MASK != 0) ^ neg);
      prop_assert_eq!(approx_mul(a, zero, &cfg), expected);
      prop_assert_eq!(approx_mul(zero, a, &cfg), expected);
    }

    #[test]
    fn prop_special_propagates(a in normal_bits(), neg in any::<bool>(), payload in 0u16..1024) {
      let cfg = ApproxConfig::default();
      let special = signed_special(neg) | payload;
      prop_assert_eq!(classify(approx_mul(a, special, &cfg)), Fp16Class::Special);
      prop_assert_eq!(classify(approx_add(a, special, &cfg)), Fp16Class::Special);
      prop_assert_eq!(classify(approx_add(special, a, &cfg)), Fp16Class::Special);
    }

    #[test]
    fn prop_mul_ignores_low_bits(a in normal_bits(), b in normal_bits(), noise in any::<u16>(), m in 1u32..=11) {
      let cfg = ApproxConfig::new(m, 4).unwrap();
      let low = ((1u32 << (SIG_BITS - m)) - 1) as u16;
      prop_assert_eq!(approx_mul(a, b, &cfg), approx_mul(a ^ (noise & low), b, &cfg));
    }

    #[test]
    fn prop_mul_error_bound(
      ea in 8u16..=22, ma in 0u16..1024,
      eb in 8u16..=22, mb in 0u16..1024,
      m in 4u32..=11,
    ) {
      let cfg = ApproxConfig::new(m, 4).unwrap();
      let a = (ea << 10) | ma;
      let b = (eb << 10) | mb;
      let exact = fp16_value(a) * fp16_value(b);
      let approx = fp16_value(approx_mul(a, b, &cfg));
      let bound = 2f64.powi(2 - m as i32) + 2f64.powi(-9);
      prop_assert!(((approx - exact) / exact).abs() < bound);
    }

    #[test]
    fn prop_add_commutes_for_finite(a in any::<u16>(), b in any::<u16>()) {
      prop_assume!(classify(a) != Fp16Class::Special && classify(b) != Fp16Class::Special);
      let cfg = ApproxConfig::default();
      prop_assert_eq!(approx_add(a, b, &cfg), approx_add(b, a, &cfg));
    }
  }
}
