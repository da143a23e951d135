/// Arithmetic and conversions for `f64`-style newtypes such as prices and rewards.
///
/// Generates `From` in both directions, `Add`/`Sub` between wrappers, scaling
/// by the primitive and `Sum`.
#[macro_export]
macro_rules! impl_numeric_newtype {
    ($wrapper:ident, $primitive:ty) => {
        impl From<$primitive> for $wrapper {
            fn from(value: $primitive) -> Self {
                Self(value)
            }
        }

        impl From<$wrapper> for $primitive {
            fn from(wrapper: $wrapper) -> Self {
                wrapper.0
            }
        }

        impl std::ops::Add for $wrapper {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl std::ops::Sub for $wrapper {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl std::ops::Mul<$primitive> for $wrapper {
            type Output = Self;

            fn mul(self, rhs: $primitive) -> Self {
                Self(self.0 * rhs)
            }
        }

        impl std::iter::Sum for $wrapper {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }
    };
}
