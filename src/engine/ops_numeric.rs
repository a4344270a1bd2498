//! Bitwise, arithmetic and comparison operations on arbitrary-precision
//! integers.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Pow, Signed, ToPrimitive, Zero};

use crate::engine::ExecutionEngine;
use crate::error::VMError;

impl ExecutionEngine {
    pub(super) fn op_unary_integer(&mut self, f: fn(BigInt) -> BigInt) -> Result<(), VMError> {
        let x = self.pop_integer()?;
        self.push_integer(f(x))
    }

    pub(super) fn op_binary_integer(
        &mut self,
        f: fn(BigInt, BigInt) -> Result<BigInt, VMError>,
    ) -> Result<(), VMError> {
        let x2 = self.pop_integer()?;
        let x1 = self.pop_integer()?;
        self.push_integer(f(x1, x2)?)
    }

    pub(super) fn op_invert(&mut self) -> Result<(), VMError> {
        let x = self.pop_integer()?;
        self.push_integer(-(x + 1i32))
    }

    pub(super) fn op_equal(&mut self, expect_equal: bool) -> Result<(), VMError> {
        let x2 = self.pop()?;
        let x1 = self.pop()?;
        self.push_bool(x1.equals(&x2) == expect_equal)
    }

    pub(super) fn op_sign(&mut self) -> Result<(), VMError> {
        let x = self.pop_integer()?;
        self.push_integer(x.signum())
    }

    pub(super) fn op_div(&mut self) -> Result<(), VMError> {
        let x2 = self.pop_integer()?;
        let x1 = self.pop_integer()?;
        if x2.is_zero() {
            return Err(VMError::DivisionByZero);
        }
        self.push_integer(x1 / x2)
    }

    pub(super) fn op_mod(&mut self) -> Result<(), VMError> {
        let x2 = self.pop_integer()?;
        let x1 = self.pop_integer()?;
        if x2.is_zero() {
            return Err(VMError::DivisionByZero);
        }
        self.push_integer(x1 % x2)
    }

    pub(super) fn op_pow(&mut self) -> Result<(), VMError> {
        let exponent = self.pop_integer()?;
        let base = self.pop_integer()?;
        let exponent = exponent
            .to_i32()
            .filter(|e| *e >= 0)
            .ok_or_else(|| VMError::NumberOutOfRange {
                op: "POW",
                value: exponent.to_string(),
            })?;
        // Reject results past the integer bound before computing them.
        let bits = base.bits();
        if bits > 1 && (bits - 1).saturating_mul(exponent as u64) > 256 {
            return Err(VMError::IntegerTooLarge {
                size: ((bits - 1).saturating_mul(exponent as u64) / 8) as usize,
            });
        }
        self.push_integer(Pow::pow(base, exponent as u32))
    }

    pub(super) fn op_sqrt(&mut self) -> Result<(), VMError> {
        let x = self.pop_integer()?;
        if x.is_negative() {
            return Err(VMError::NumberOutOfRange {
                op: "SQRT",
                value: x.to_string(),
            });
        }
        self.push_integer(x.sqrt())
    }

    pub(super) fn op_modmul(&mut self) -> Result<(), VMError> {
        let modulus = self.pop_integer()?;
        let x2 = self.pop_integer()?;
        let x1 = self.pop_integer()?;
        if modulus.is_zero() {
            return Err(VMError::DivisionByZero);
        }
        self.push_integer(x1 * x2 % modulus)
    }

    pub(super) fn op_modpow(&mut self) -> Result<(), VMError> {
        let modulus = self.pop_integer()?;
        let exponent = self.pop_integer()?;
        let value = self.pop_integer()?;
        let modulus_abs = modulus.abs();
        if modulus_abs.is_zero() {
            return Err(VMError::DivisionByZero);
        }
        if exponent == BigInt::from(-1) {
            return self.push_integer(modular_inverse(&value, &modulus_abs)?);
        }
        if exponent.is_negative() {
            return Err(VMError::NumberOutOfRange {
                op: "MODPOW",
                value: exponent.to_string(),
            });
        }
        let base = value.mod_floor(&modulus_abs);
        let mut result = base.modpow(&exponent, &modulus_abs);
        // Remainder semantics: the result carries the dividend's sign.
        if value.is_negative() && exponent.is_odd() && !result.is_zero() {
            result -= &modulus_abs;
        }
        self.push_integer(result)
    }

    /// SHL and SHR. A zero shift pops only the shift amount and leaves the
    /// value untouched.
    pub(super) fn op_shift(&mut self, left: bool) -> Result<(), VMError> {
        let shift = self.pop_integer()?;
        let shift = shift.to_i64().ok_or_else(|| VMError::NumberOutOfRange {
            op: if left { "SHL" } else { "SHR" },
            value: shift.to_string(),
        })?;
        self.limits().assert_shift(shift)?;
        if shift == 0 {
            return Ok(());
        }
        let x = self.pop_integer()?;
        let shifted = if left {
            x << shift as usize
        } else {
            x >> shift as usize
        };
        self.push_integer(shifted)
    }

    pub(super) fn op_not(&mut self) -> Result<(), VMError> {
        let x = self.pop_boolean()?;
        self.push_bool(!x)
    }

    pub(super) fn op_boolean_binary(&mut self, f: fn(bool, bool) -> bool) -> Result<(), VMError> {
        let x2 = self.pop_boolean()?;
        let x1 = self.pop_boolean()?;
        self.push_bool(f(x1, x2))
    }

    pub(super) fn op_nz(&mut self) -> Result<(), VMError> {
        let x = self.pop_integer()?;
        self.push_bool(!x.is_zero())
    }

    pub(super) fn op_numeric_equal(&mut self, expect_equal: bool) -> Result<(), VMError> {
        let x2 = self.pop_integer()?;
        let x1 = self.pop_integer()?;
        self.push_bool((x1 == x2) == expect_equal)
    }

    /// LT/LE/GT/GE: a null operand makes the comparison false.
    pub(super) fn op_compare(&mut self, f: fn(&BigInt, &BigInt) -> bool) -> Result<(), VMError> {
        let x2 = self.pop()?;
        let x1 = self.pop()?;
        if x1.is_null() || x2.is_null() {
            return self.push_bool(false);
        }
        let x2 = x2.get_integer()?;
        let x1 = x1.get_integer()?;
        self.push_bool(f(&x1, &x2))
    }

    /// WITHIN: `a <= x < b` for popped b, x, a.
    pub(super) fn op_within(&mut self) -> Result<(), VMError> {
        let b = self.pop_integer()?;
        let x = self.pop_integer()?;
        let a = self.pop_integer()?;
        self.push_bool(a <= x && x < b)
    }
}

/// Extended-GCD modular inverse; `modulus` is positive.
fn modular_inverse(value: &BigInt, modulus: &BigInt) -> Result<BigInt, VMError> {
    let value = value.mod_floor(modulus);
    let (mut old_r, mut r) = (value, modulus.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    while !r.is_zero() {
        let quotient = &old_r / &r;
        let next_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }
    if !old_r.is_one() {
        return Err(VMError::NoModularInverse);
    }
    Ok(old_s.mod_floor(modulus))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modular_inverse_of_three_mod_seven() {
        let inverse = modular_inverse(&BigInt::from(3), &BigInt::from(7)).unwrap();
        assert_eq!(inverse, BigInt::from(5));
    }

    #[test]
    fn modular_inverse_requires_coprime_operands() {
        assert!(matches!(
            modular_inverse(&BigInt::from(4), &BigInt::from(8)),
            Err(VMError::NoModularInverse)
        ));
    }
}
