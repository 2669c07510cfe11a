#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// A dictionary with `Hash + Eq` keys, built on the raw [`HashTable`].
pub mod dict;

mod error;
mod group;

pub mod hash_table;

pub use dict::Dict;
pub use error::TryReserveError;
pub use hash_table::Cursor;
pub use hash_table::DEFAULT_MAX_LOAD;
pub use hash_table::HashTable;
pub use hash_table::LOAD_SCALE;
#[cfg(feature = "stats")]
pub use hash_table::DebugStats;
#[cfg(feature = "stats")]
pub use hash_table::ProbeHistogram;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// The hasher builder [`Dict`] uses unless told otherwise.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// The hasher builder [`Dict`] uses unless told otherwise.
        pub type DefaultHashBuilder = std::hash::RandomState;
    } else {
        /// Placeholder hasher builder when neither `std` nor `foldhash` is
        /// enabled. It cannot be constructed; pick a hasher explicitly.
        #[derive(Clone, Copy, Debug)]
        pub enum DefaultHashBuilder {}
    }
}
