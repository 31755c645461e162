use std::fmt::{Display, Formatter};
use std::ops::Deref;

use strata_error::strata_panic;

/// The alignment of a buffer, always a power of two.
#[derive(Clone, Debug, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Alignment(usize);

impl Alignment {
    /// Create a new alignment.
    ///
    /// ## Panics
    ///
    /// Panics if `align` is not a power of 2.
    #[inline]
    pub const fn new(align: usize) -> Self {
        assert!(align > 0, "Alignment must be greater than 0");
        assert!(align.is_power_of_two(), "Alignment must be a power of 2");
        Self(align)
    }

    /// An alignment of one byte, i.e. no alignment at all.
    #[inline]
    pub const fn none() -> Self {
        Self::new(1)
    }

    /// The natural alignment of `T`.
    #[inline]
    pub const fn of<T>() -> Self {
        Self::new(align_of::<T>())
    }

    /// Check if this alignment is a multiple of the other alignment.
    #[inline]
    pub fn is_aligned_to(&self, other: Alignment) -> bool {
        self.0 % other.0 == 0
    }

    /// The padding needed to bring `ptr` up to this alignment.
    #[inline]
    pub(crate) fn padding_for(&self, ptr: *const u8) -> usize {
        let padding = ptr.align_offset(self.0);
        if padding == usize::MAX {
            strata_panic!("cannot align pointer to {}", self.0);
        }
        padding
    }
}

impl Display for Alignment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for Alignment {
    type Target = usize;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<usize> for Alignment {
    #[inline]
    fn from(value: usize) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    #[should_panic]
    fn alignment_zero() {
        Alignment::new(0);
    }

    #[test]
    #[should_panic]
    fn alignment_not_power_of_two() {
        Alignment::new(3);
    }

    #[test]
    fn is_aligned_to() {
        assert!(Alignment::new(64).is_aligned_to(Alignment::of::<u32>()));
        assert!(!Alignment::of::<u8>().is_aligned_to(Alignment::new(8)));
    }
}
