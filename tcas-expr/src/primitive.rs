//! Functions to construct and manipulate [`Rational`]s.

use rug::Rational;

/// Creates a [`Rational`] with the given value.
pub fn rat<T>(n: T) -> Rational
where
    Rational: From<T>,
{
    Rational::from(n)
}

/// Raises a [`Rational`] to an integer power.
///
/// Negative exponents invert the base; raising zero to a negative power is a programmer error and
/// panics.
pub fn rat_pow(base: &Rational, exp: i32) -> Rational {
    let (positive, k) = if exp < 0 {
        assert!(*base != 0, "zero raised to a negative power");
        (base.clone().recip(), exp.unsigned_abs())
    } else {
        (base.clone(), exp as u32)
    };

    let mut result = rat(1);
    for _ in 0..k {
        result *= &positive;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rational_powers() {
        assert_eq!(rat_pow(&rat((2, 3)), 2), rat((4, 9)));
        assert_eq!(rat_pow(&rat((2, 3)), -1), rat((3, 2)));
        assert_eq!(rat_pow(&rat(5), 0), rat(1));
    }
}
