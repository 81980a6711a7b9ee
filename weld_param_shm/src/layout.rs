//! Byte-exact parameter segment layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐ offset 0
//! │ version                              u32     │
//! │ values.settings    [f32; JS]                 │
//! │ values.control     [u32; JC]                 │
//! │ values.doku        [f32; DOKU]               │
//! │ extended.settings  [ExtendedSlot; JS]        │
//! │ extended.control   [ExtendedSlot; JC]        │
//! │ extended.doku      [ExtendedSlot; DOKU]      │
//! │ settings_flags     [u32; JS]                 │
//! │ control_flags      [u32; JC]                 │
//! │ doku_flags         [u32; DOKU]               │
//! │ version2                             u32     │
//! ├──────────────────────────────────────────────┤ next 64-byte boundary
//! │ SignalBlock (generation, waiters, pid)  64 B │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Every word is 4-byte aligned with no implicit padding. Words are declared
//! as `AtomicU32`, which has the size and alignment of `u32`; float values are
//! stored as their IEEE-754 bit pattern. Whole-word atomic access is the
//! platform prerequisite for the lock-free publish-after-write protocol:
//! a reader never observes a partially written word.

use crate::catalog::{ArraySelector, ParameterSlot};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::sync::atomic::{AtomicU32, Ordering, fence};
use weld::consts::{CACHE_LINE_SIZE, DOKU_PAR_N, JC_PAR_N, JS_PAR_N, TOTAL_PAR_N};

bitflags! {
    /// Per-parameter flag word.
    ///
    /// Bits 3 and above are reserved and always written as zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParamFlags: u32 {
        /// Parameter is initialized and may be interpreted.
        const USED             = 0x1;
        /// Value changed in the last committed update cycle.
        const CHANGED          = 0x2;
        /// Extended metadata changed in the last committed update cycle.
        const EXTENDED_CHANGED = 0x4;
    }
}

impl ParamFlags {
    /// Both change bits.
    pub const CHANGE_MASK: Self =
        Self::from_bits_truncate(Self::CHANGED.bits() | Self::EXTENDED_CHANGED.bits());
}

impl Default for ParamFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Descriptive metadata of one parameter (limits and scaling)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendedInfo {
    /// Lower limit
    pub min: f32,
    /// Upper limit
    pub max: f32,
    /// Factory default
    pub default: f32,
    /// Display scaling factor
    pub scale: f32,
    /// Unit code
    pub unit: u32,
    /// Display precision (decimal places)
    pub precision: u32,
}

/// Shared-memory representation of [`ExtendedInfo`]
///
/// `seq` follows the odd/even protocol: odd while the writer updates the
/// entry, even once committed. Readers copy the six payload words and retry
/// if `seq` moved.
#[repr(C)]
pub struct ExtendedSlot {
    /// Entry write sequence
    pub seq: AtomicU32,
    /// `min` bit pattern
    pub min: AtomicU32,
    /// `max` bit pattern
    pub max: AtomicU32,
    /// `default` bit pattern
    pub default: AtomicU32,
    /// `scale` bit pattern
    pub scale: AtomicU32,
    /// Unit code
    pub unit: AtomicU32,
    /// Display precision
    pub precision: AtomicU32,
}

impl ExtendedSlot {
    /// Writer side: publish a new entry.
    pub(crate) fn store(&self, info: &ExtendedInfo) {
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.min.store(info.min.to_bits(), Ordering::Relaxed);
        self.max.store(info.max.to_bits(), Ordering::Relaxed);
        self.default.store(info.default.to_bits(), Ordering::Relaxed);
        self.scale.store(info.scale.to_bits(), Ordering::Relaxed);
        self.unit.store(info.unit, Ordering::Relaxed);
        self.precision.store(info.precision, Ordering::Relaxed);

        self.seq.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Reader side: one copy attempt. `None` if the writer was mid-update.
    pub(crate) fn try_load(&self) -> Option<ExtendedInfo> {
        let before = self.seq.load(Ordering::Acquire);
        if before % 2 == 1 {
            return None;
        }

        let info = ExtendedInfo {
            min: f32::from_bits(self.min.load(Ordering::Relaxed)),
            max: f32::from_bits(self.max.load(Ordering::Relaxed)),
            default: f32::from_bits(self.default.load(Ordering::Relaxed)),
            scale: f32::from_bits(self.scale.load(Ordering::Relaxed)),
            unit: self.unit.load(Ordering::Relaxed),
            precision: self.precision.load(Ordering::Relaxed),
        };

        fence(Ordering::Acquire);
        let after = self.seq.load(Ordering::Relaxed);
        (before == after).then_some(info)
    }

    /// Zero every word, sequence included.
    pub(crate) fn clear(&self) {
        for word in [
            &self.seq,
            &self.min,
            &self.max,
            &self.default,
            &self.scale,
            &self.unit,
            &self.precision,
        ] {
            word.store(0, Ordering::Relaxed);
        }
    }
}

/// Value arrays
#[repr(C)]
pub struct ParameterValues<const JS: usize, const JC: usize, const DK: usize> {
    /// Job settings (`f32` bit patterns)
    pub settings: [AtomicU32; JS],
    /// Job control values
    pub control: [AtomicU32; JC],
    /// Documentation values (`f32` bit patterns)
    pub doku: [AtomicU32; DK],
}

/// Extended metadata arrays, index-for-index with [`ParameterValues`]
#[repr(C)]
pub struct ParameterExtended<const JS: usize, const JC: usize, const DK: usize> {
    /// Settings metadata
    pub settings: [ExtendedSlot; JS],
    /// Control metadata
    pub control: [ExtendedSlot; JC],
    /// Doku metadata
    pub doku: [ExtendedSlot; DK],
}

/// The whole parameter segment
#[repr(C)]
pub struct SharedParameterSegment<
    const JS: usize = JS_PAR_N,
    const JC: usize = JC_PAR_N,
    const DK: usize = DOKU_PAR_N,
> {
    /// Leading protocol version
    pub version: AtomicU32,
    /// Parameter values
    pub values: ParameterValues<JS, JC, DK>,
    /// Parameter metadata
    pub extended: ParameterExtended<JS, JC, DK>,
    /// Settings flag words
    pub settings_flags: [AtomicU32; JS],
    /// Control flag words
    pub control_flags: [AtomicU32; JC],
    /// Doku flag words
    pub doku_flags: [AtomicU32; DK],
    /// Trailing protocol version, equal to `version` when consistent
    pub version2: AtomicU32,
}

/// Segment with the build-time bounds
pub type WeldSegment = SharedParameterSegment;

impl<const JS: usize, const JC: usize, const DK: usize> SharedParameterSegment<JS, JC, DK> {
    /// Value word of a resolved slot
    #[inline]
    pub fn value_word(&self, slot: &ParameterSlot) -> &AtomicU32 {
        match slot.array {
            ArraySelector::Settings => &self.values.settings[slot.index],
            ArraySelector::Control => &self.values.control[slot.index],
            ArraySelector::Doku => &self.values.doku[slot.index],
        }
    }

    /// Metadata entry of a resolved slot
    #[inline]
    pub fn extended_slot(&self, slot: &ParameterSlot) -> &ExtendedSlot {
        match slot.array {
            ArraySelector::Settings => &self.extended.settings[slot.index],
            ArraySelector::Control => &self.extended.control[slot.index],
            ArraySelector::Doku => &self.extended.doku[slot.index],
        }
    }

    /// Flag word of a resolved slot
    #[inline]
    pub fn flag_word(&self, slot: &ParameterSlot) -> &AtomicU32 {
        match slot.array {
            ArraySelector::Settings => &self.settings_flags[slot.index],
            ArraySelector::Control => &self.control_flags[slot.index],
            ArraySelector::Doku => &self.doku_flags[slot.index],
        }
    }

    /// Flag word by flat catalog position
    #[inline]
    pub(crate) fn flag_word_at(&self, pos: usize) -> &AtomicU32 {
        if pos < JS {
            &self.settings_flags[pos]
        } else if pos < JS + JC {
            &self.control_flags[pos - JS]
        } else {
            &self.doku_flags[pos - JS - JC]
        }
    }

    /// Current flags of a resolved slot
    #[inline]
    pub fn flags(&self, slot: &ParameterSlot) -> ParamFlags {
        ParamFlags::from_bits_truncate(self.flag_word(slot).load(Ordering::Acquire))
    }

    /// All flag words in catalog order
    pub(crate) fn flag_words(&self) -> impl Iterator<Item = &AtomicU32> {
        self.settings_flags
            .iter()
            .chain(self.control_flags.iter())
            .chain(self.doku_flags.iter())
    }

    /// Zero every value, metadata entry and flag word.
    pub(crate) fn clear_payload(&self) {
        let values = self
            .values
            .settings
            .iter()
            .chain(self.values.control.iter())
            .chain(self.values.doku.iter());
        for word in values.chain(self.flag_words()) {
            word.store(0, Ordering::Relaxed);
        }
        let extended = self
            .extended
            .settings
            .iter()
            .chain(self.extended.control.iter())
            .chain(self.extended.doku.iter());
        for slot in extended {
            slot.clear();
        }
    }
}

/// Cross-process wakeup block, placed after the segment on its own cache line
#[repr(C, align(64))]
pub struct SignalBlock {
    /// Commit generation and futex word. Odd while an update cycle is open.
    pub generation: AtomicU32,
    /// Readers currently blocked in a wait
    pub waiters: AtomicU32,
    /// PID of the owning writer
    pub writer_pid: AtomicU32,
    _reserved: [u32; 13],
}

/// Size in bytes of an extended metadata entry
pub const EXTENDED_SLOT_SIZE: usize = 7 * 4;

/// Expected segment size for the given bounds
pub const fn expected_segment_size(js: usize, jc: usize, dk: usize) -> usize {
    let n = js + jc + dk;
    4 + n * 4 + n * EXTENDED_SLOT_SIZE + n * 4 + 4
}

/// Byte offset of the signal block
pub const fn signal_offset<const JS: usize, const JC: usize, const DK: usize>() -> usize {
    let size = core::mem::size_of::<SharedParameterSegment<JS, JC, DK>>();
    (size + CACHE_LINE_SIZE - 1) & !(CACHE_LINE_SIZE - 1)
}

/// Total mapped region size: segment plus signal block
pub const fn region_size<const JS: usize, const JC: usize, const DK: usize>() -> usize {
    signal_offset::<JS, JC, DK>() + core::mem::size_of::<SignalBlock>()
}

const_assert_eq!(core::mem::size_of::<AtomicU32>(), core::mem::size_of::<u32>());
const_assert_eq!(core::mem::align_of::<AtomicU32>(), core::mem::align_of::<u32>());
const_assert_eq!(core::mem::size_of::<ExtendedSlot>(), EXTENDED_SLOT_SIZE);
const_assert_eq!(core::mem::size_of::<SignalBlock>(), CACHE_LINE_SIZE);
const_assert_eq!(core::mem::align_of::<WeldSegment>(), 4);
const_assert_eq!(
    core::mem::size_of::<WeldSegment>(),
    expected_segment_size(JS_PAR_N, JC_PAR_N, DOKU_PAR_N)
);
const_assert_eq!(core::mem::offset_of!(WeldSegment, values), 4);
const_assert_eq!(core::mem::offset_of!(WeldSegment, extended), 4 + TOTAL_PAR_N * 4);
const_assert_eq!(
    core::mem::offset_of!(WeldSegment, settings_flags),
    4 + TOTAL_PAR_N * (4 + EXTENDED_SLOT_SIZE)
);
const_assert_eq!(
    core::mem::offset_of!(WeldSegment, version2),
    expected_segment_size(JS_PAR_N, JC_PAR_N, DOKU_PAR_N) - 4
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ParameterCatalog;

    type SmallSegment = SharedParameterSegment<4, 2, 3>;

    fn zeroed_small() -> Box<SmallSegment> {
        // SAFETY: every field is an AtomicU32 or an array of them; zero is valid.
        Box::new(unsafe { core::mem::zeroed() })
    }

    #[test]
    fn small_layout_has_no_padding() {
        assert_eq!(
            core::mem::size_of::<SmallSegment>(),
            expected_segment_size(4, 2, 3)
        );
        assert_eq!(core::mem::offset_of!(SmallSegment, control_flags), 4 + 9 * 32 + 16);
        assert_eq!(signal_offset::<4, 2, 3>() % CACHE_LINE_SIZE, 0);
        assert!(region_size::<4, 2, 3>() >= core::mem::size_of::<SmallSegment>() + 64);
    }

    #[test]
    fn flag_bits_match_wire_values() {
        assert_eq!(ParamFlags::USED.bits(), 0x1);
        assert_eq!(ParamFlags::CHANGED.bits(), 0x2);
        assert_eq!(ParamFlags::EXTENDED_CHANGED.bits(), 0x4);
        assert_eq!(ParamFlags::CHANGE_MASK.bits(), 0x6);
        // Reserved bits are dropped on decode.
        assert_eq!(ParamFlags::from_bits_truncate(0xF9), ParamFlags::USED);
    }

    #[test]
    fn flat_positions_follow_catalog_order() {
        let segment = zeroed_small();
        for id in ParameterCatalog::<4, 2, 3>::ids() {
            let slot = ParameterCatalog::<4, 2, 3>::locate(id).unwrap();
            assert!(core::ptr::eq(
                segment.flag_word_at(id.0 as usize),
                segment.flag_word(&slot)
            ));
        }
    }

    #[test]
    fn extended_slot_roundtrip_and_torn_detection() {
        let slot: ExtendedSlot = unsafe { core::mem::zeroed() };
        let info = ExtendedInfo {
            min: 0.5,
            max: 25.0,
            default: 8.0,
            scale: 0.1,
            unit: 7,
            precision: 1,
        };
        slot.store(&info);
        assert_eq!(slot.try_load(), Some(info));
        assert_eq!(slot.seq.load(Ordering::Relaxed), 2);

        // Simulate a writer caught mid-update.
        slot.seq.store(3, Ordering::Relaxed);
        assert_eq!(slot.try_load(), None);

        slot.clear();
        assert_eq!(slot.try_load(), Some(ExtendedInfo::default()));
    }

    #[test]
    fn clear_payload_zeroes_everything() {
        let segment = zeroed_small();
        segment.values.control[1].store(42, Ordering::Relaxed);
        segment.doku_flags[2].store(ParamFlags::all().bits(), Ordering::Relaxed);
        segment.extended.settings[0].unit.store(9, Ordering::Relaxed);

        segment.clear_payload();

        assert_eq!(segment.values.control[1].load(Ordering::Relaxed), 0);
        assert_eq!(segment.doku_flags[2].load(Ordering::Relaxed), 0);
        assert_eq!(segment.extended.settings[0].unit.load(Ordering::Relaxed), 0);
    }
}
