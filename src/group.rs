//! Per-slot metadata and the 16-lane group compare.
//!
//! Every slot owns one metadata byte: the high bit marks the slot occupied
//! and the low seven bits hold the low seven bits of the key's hash. Sixteen
//! of these bytes form a [`Group`], which a single SSE2 compare plus
//! `movemask` reduces to a 16-bit [`BitMask`].

/// Number of slots sharing one metadata group.
pub(crate) const GROUP_WIDTH: usize = 16;

/// Metadata byte of a slot that holds nothing.
pub(crate) const EMPTY: u8 = 0x00;

/// Occupied flag. Lives in the sign bit so `movemask` over the raw bytes
/// yields the occupancy mask directly.
const OCCUPIED: u8 = 0x80;

const HASH_FRAGMENT: u8 = 0x7F;

/// Metadata byte for an occupied slot holding a key with this hash.
#[inline(always)]
pub(crate) fn tag(hash: u64) -> u8 {
    (hash as u8 & HASH_FRAGMENT) | OCCUPIED
}

/// A 16-bit slot mask, consumed lowest slot first.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BitMask(pub(crate) u16);

impl BitMask {
    #[inline(always)]
    pub(crate) fn any(self) -> bool {
        self.0 != 0
    }

    #[inline(always)]
    pub(crate) fn is_full(self) -> bool {
        self.0 == u16::MAX
    }

    #[inline(always)]
    pub(crate) fn lowest_set(self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    /// Index of the first clear bit, i.e. the first empty slot when applied
    /// to an occupancy mask.
    #[inline(always)]
    pub(crate) fn lowest_unset(self) -> Option<usize> {
        BitMask(!self.0).lowest_set()
    }

    /// Clears every bit below `slot`.
    #[inline(always)]
    pub(crate) fn from_slot(self, slot: usize) -> BitMask {
        debug_assert!(slot < GROUP_WIDTH);
        BitMask(self.0 & (u16::MAX << slot))
    }
}

impl Iterator for BitMask {
    type Item = usize;

    #[inline(always)]
    fn next(&mut self) -> Option<usize> {
        let bit = self.lowest_set()?;
        self.0 &= self.0 - 1;
        Some(bit)
    }
}

/// Sixteen metadata bytes, aligned so the SIMD path can use aligned loads.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(C, align(16))]
pub(crate) struct Group {
    bytes: [u8; GROUP_WIDTH],
}

impl Group {
    #[inline(always)]
    pub(crate) const fn empty() -> Self {
        Group {
            bytes: [EMPTY; GROUP_WIDTH],
        }
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: [u8; GROUP_WIDTH]) -> Self {
        Group { bytes }
    }

    #[inline(always)]
    pub(crate) fn byte(&self, slot: usize) -> u8 {
        self.bytes[slot]
    }

    #[inline(always)]
    pub(crate) fn set(&mut self, slot: usize, tag: u8) {
        debug_assert!(tag & OCCUPIED != 0);
        self.bytes[slot] = tag;
    }

    cfg_if::cfg_if! {
        if #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))] {
            /// Slots whose metadata byte equals `tag` exactly.
            #[inline(always)]
            pub(crate) fn match_tag(&self, tag: u8) -> BitMask {
                self.match_tag_sse2(tag)
            }

            /// Slots that are occupied.
            #[inline(always)]
            pub(crate) fn match_occupied(&self) -> BitMask {
                self.match_occupied_sse2()
            }
        } else {
            /// Slots whose metadata byte equals `tag` exactly.
            #[inline(always)]
            pub(crate) fn match_tag(&self, tag: u8) -> BitMask {
                self.match_tag_portable(tag)
            }

            /// Slots that are occupied.
            #[inline(always)]
            pub(crate) fn match_occupied(&self) -> BitMask {
                self.match_occupied_portable()
            }
        }
    }

    #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
    #[inline(always)]
    fn match_tag_sse2(&self, tag: u8) -> BitMask {
        use core::arch::x86_64::*;
        // SAFETY: `Group` is `#[repr(C, align(16))]` with `bytes` at offset 0,
        // so the aligned 16-byte load stays inside `self`.
        unsafe {
            let data = _mm_load_si128(self.bytes.as_ptr() as *const __m128i);
            let cmp = _mm_cmpeq_epi8(data, _mm_set1_epi8(tag as i8));
            BitMask(_mm_movemask_epi8(cmp) as u16)
        }
    }

    #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
    #[inline(always)]
    fn match_occupied_sse2(&self) -> BitMask {
        use core::arch::x86_64::*;
        // SAFETY: See `match_tag_sse2`.
        unsafe {
            let data = _mm_load_si128(self.bytes.as_ptr() as *const __m128i);
            BitMask(_mm_movemask_epi8(data) as u16)
        }
    }

    #[cfg_attr(
        all(target_arch = "x86_64", target_feature = "sse2", not(test)),
        allow(dead_code)
    )]
    #[inline(always)]
    fn match_tag_portable(&self, tag: u8) -> BitMask {
        let mut bits: u16 = 0;
        for (i, &byte) in self.bytes.iter().enumerate() {
            if byte == tag {
                bits |= 1 << i;
            }
        }
        BitMask(bits)
    }

    #[cfg_attr(
        all(target_arch = "x86_64", target_feature = "sse2", not(test)),
        allow(dead_code)
    )]
    #[inline(always)]
    fn match_occupied_portable(&self) -> BitMask {
        let mut bits: u16 = 0;
        for (i, &byte) in self.bytes.iter().enumerate() {
            if byte & OCCUPIED != 0 {
                bits |= 1 << i;
            }
        }
        BitMask(bits)
    }
}
