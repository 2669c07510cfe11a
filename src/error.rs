use core::alloc::Layout;
use core::fmt;

/// The error type for fallible allocation in [`Dict`](crate::Dict) and
/// [`HashTable`](crate::HashTable).
///
/// Returned by the `try_*` constructors, by `set` when a load-factor growth
/// could not be completed, by `try_reserve`, and by `try_clone`. Lookups and
/// enumeration never fail.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TryReserveError {
    /// The requested capacity does not fit the address space, or the storage
    /// size computation overflowed.
    CapacityOverflow,

    /// The allocator returned an error.
    AllocError {
        /// The layout of the allocation request that failed.
        layout: Layout,
    },
}

impl fmt::Display for TryReserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryReserveError::CapacityOverflow => {
                f.write_str("memory allocation failed because the computed capacity exceeded the collection's maximum")
            }
            TryReserveError::AllocError { layout } => write!(
                f,
                "memory allocation of {} bytes (align {}) failed",
                layout.size(),
                layout.align()
            ),
        }
    }
}

impl core::error::Error for TryReserveError {}

impl TryReserveError {
    /// Turns the error into a panic or an allocation abort, for the
    /// infallible API surface.
    #[cold]
    #[inline(never)]
    pub(crate) fn raise(self) -> ! {
        match self {
            TryReserveError::CapacityOverflow => panic!("capacity overflow"),
            TryReserveError::AllocError { layout } => {
                alloc::alloc::handle_alloc_error(layout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn display_names_the_failed_layout() {
        let layout = Layout::from_size_align(4096, 16).unwrap();
        let message = TryReserveError::AllocError { layout }.to_string();
        assert!(message.contains("4096 bytes"), "{message}");
        assert!(message.contains("align 16"), "{message}");
    }

    #[test]
    fn capacity_overflow_is_distinct() {
        let layout = Layout::new::<u64>();
        assert_ne!(
            TryReserveError::CapacityOverflow,
            TryReserveError::AllocError { layout }
        );
    }
}
