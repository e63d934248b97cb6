//! Bit-flag newtypes shared by the page, block and arena layers.

/// Declare a `Copy` bit-flag newtype with named constants and set operations.
macro_rules! bit_flags {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_meta:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name($ty);

        impl $name {
            $(
                $(#[$flag_meta])*
                pub const $flag: Self = Self($value);
            )*

            const NAMED: &'static [(&'static str, $ty)] = &[$((stringify!($flag), $value)),*];

            /// No flags set.
            #[inline]
            pub const fn empty() -> Self {
                Self(0)
            }

            /// Raw bit representation.
            #[inline]
            pub const fn bits(self) -> $ty {
                self.0
            }

            /// Build from raw bits, keeping unknown bits.
            #[inline]
            pub const fn from_bits_retain(bits: $ty) -> Self {
                Self(bits)
            }

            #[inline]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            /// True when every bit of `other` is set in `self`.
            #[inline]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// True when any bit of `other` is set in `self`.
            #[inline]
            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            #[inline]
            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            #[inline]
            pub const fn difference(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }
        }

        impl core::ops::BitOr for $name {
            type Output = Self;

            #[inline]
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }

        impl core::ops::BitOrAssign for $name {
            #[inline]
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl core::ops::BitAnd for $name {
            type Output = Self;

            #[inline]
            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                let mut first = true;
                write!(f, "{}(", stringify!($name))?;
                for (name, bits) in Self::NAMED {
                    // Composite constants (e.g. READ_WRITE) are reported through their parts.
                    if bits.count_ones() == 1 && self.0 & bits == *bits {
                        if !first {
                            f.write_str(" | ")?;
                        }
                        f.write_str(name)?;
                        first = false;
                    }
                }
                if first {
                    f.write_str("empty")?;
                }
                f.write_str(")")
            }
        }
    };
}

pub(crate) use bit_flags;

#[cfg(test)]
mod tests {
    bit_flags! {
        struct Sample: u8 {
            const A = 1 << 0;
            const B = 1 << 1;
            const AB = (1 << 0) | (1 << 1);
        }
    }

    #[test]
    fn contains_and_intersects() {
        let ab = Sample::A | Sample::B;
        assert_eq!(ab, Sample::AB);
        assert!(ab.contains(Sample::A));
        assert!(!Sample::A.contains(Sample::AB));
        assert!(Sample::A.intersects(Sample::AB));
        assert!(Sample::empty().is_empty());
        assert_eq!(ab.difference(Sample::A), Sample::B);
    }

    #[test]
    fn debug_lists_single_bit_names() {
        assert_eq!(format!("{:?}", Sample::AB), "Sample(A | B)");
        assert_eq!(format!("{:?}", Sample::empty()), "Sample(empty)");
    }
}
