//! Single writer with exclusive segment ownership
//!
//! The writer is the only process that mutates values, metadata and flags.
//! Mutations are grouped into update cycles: the first mutation after a
//! commit opens a cycle (clearing the previous cycle's change bits) and
//! [`WriterSynchronizer::commit`] closes it and wakes every waiting reader
//! once. Batch all changes of one logical update before committing.

use crate::catalog::{ParameterCatalog, ParameterId, ParameterValue};
use crate::error::{ShmError, ShmResult};
use crate::layout::{ExtendedInfo, ParamFlags};
use crate::platform::{LinuxMemoryConfig, get_current_pid};
use crate::region::SegmentRegion;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, trace};
use weld::config::ParamShmConfig;
use weld::consts::{DOKU_PAR_N, JC_PAR_N, JS_PAR_N, PROTOCOL_VERSION, RETIRED_VERSION};

/// Committed cycles skipped by (re)initialization, so that readers attached
/// before it fall into a resync scan.
const INIT_GENERATION_STEPS: u32 = 2;

/// Parameter writer handle
pub struct WriterSynchronizer<
    const JS: usize = JS_PAR_N,
    const JC: usize = JC_PAR_N,
    const DK: usize = DOKU_PAR_N,
> {
    region: Arc<SegmentRegion<JS, JC, DK>>,
    catalog: ParameterCatalog<JS, JC, DK>,
    version: u32,
    cycle_open: bool,
    pending: usize,
    writer_pid: u32,
}

/// Writer with the build-time bounds
pub type ParameterWriter = WriterSynchronizer;

impl<const JS: usize, const JC: usize, const DK: usize> WriterSynchronizer<JS, JC, DK> {
    /// Create the file-backed segment named in `config` and initialize it.
    pub fn create(
        catalog: ParameterCatalog<JS, JC, DK>,
        config: &ParamShmConfig,
    ) -> ShmResult<Self> {
        let memory = LinuxMemoryConfig {
            locked: config.lock_pages,
        };
        let region = SegmentRegion::create(&config.segment_name, &memory)?;
        Self::initialize_versioned(Arc::new(region), catalog, config.expected_version)
    }

    /// Initialize `region` with the compiled protocol version.
    ///
    /// Must be the first operation on a freshly created region.
    pub fn initialize(
        region: Arc<SegmentRegion<JS, JC, DK>>,
        catalog: ParameterCatalog<JS, JC, DK>,
    ) -> ShmResult<Self> {
        Self::initialize_versioned(region, catalog, PROTOCOL_VERSION)
    }

    /// Initialize `region`, stamping `version`.
    pub fn initialize_versioned(
        region: Arc<SegmentRegion<JS, JC, DK>>,
        catalog: ParameterCatalog<JS, JC, DK>,
        version: u32,
    ) -> ShmResult<Self> {
        let mut writer = Self {
            region,
            catalog,
            version,
            cycle_open: false,
            pending: 0,
            writer_pid: get_current_pid(),
        };
        writer.reinitialize();
        info!(
            segment = writer.region.name(),
            version,
            parameters = writer.catalog.present_count(),
            "Parameter segment initialized"
        );
        Ok(writer)
    }

    /// Zero all values and metadata, mark catalog parameters used, clear all
    /// change bits and stamp both version words. Idempotent.
    pub fn reinitialize(&mut self) {
        let segment = self.region.segment();
        let signal = self.region.signal();

        // Readers validating from here on are rejected until the stamp below.
        segment.version.store(RETIRED_VERSION, Ordering::Release);

        segment.clear_payload();
        for id in self.catalog.present_ids() {
            if let Some(slot) = ParameterCatalog::<JS, JC, DK>::locate(id) {
                segment
                    .flag_word(&slot)
                    .store(ParamFlags::USED.bits(), Ordering::Relaxed);
            }
        }
        signal.writer_pid.store(self.writer_pid, Ordering::Relaxed);

        segment.version2.store(self.version, Ordering::Release);
        segment.version.store(self.version, Ordering::Release);

        self.cycle_open = false;
        self.pending = 0;
        let generation = signal.advance(INIT_GENERATION_STEPS);
        debug!(segment = self.region.name(), generation, "Segment stamped");
    }

    /// Write a value and mark it changed.
    pub fn set_value(&mut self, id: ParameterId, value: ParameterValue) -> ShmResult<()> {
        let slot = self.catalog.resolve(id)?;
        if value.element_type() != slot.element {
            return Err(ShmError::TypeMismatch {
                id,
                expected: slot.element,
            });
        }
        self.open_cycle();

        let segment = self.region.segment();
        segment
            .value_word(&slot)
            .store(value.to_bits(), Ordering::Relaxed);
        // Release: the value is visible to anyone who observes CHANGED.
        segment
            .flag_word(&slot)
            .fetch_or(ParamFlags::CHANGED.bits(), Ordering::Release);

        self.pending += 1;
        Ok(())
    }

    /// Write metadata and mark it changed.
    pub fn set_extended(&mut self, id: ParameterId, info: &ExtendedInfo) -> ShmResult<()> {
        let slot = self.catalog.resolve(id)?;
        self.open_cycle();

        let segment = self.region.segment();
        segment.extended_slot(&slot).store(info);
        segment
            .flag_word(&slot)
            .fetch_or(ParamFlags::EXTENDED_CHANGED.bits(), Ordering::Release);

        self.pending += 1;
        Ok(())
    }

    /// Activate or deactivate a parameter in the running configuration.
    ///
    /// The transition is reported to readers as a value change.
    pub fn set_used(&mut self, id: ParameterId, used: bool) -> ShmResult<()> {
        let slot = self.catalog.resolve(id)?;
        self.open_cycle();

        let word = self.region.segment().flag_word(&slot);
        if used {
            word.fetch_or((ParamFlags::USED | ParamFlags::CHANGED).bits(), Ordering::Release);
        } else {
            word.fetch_and(!ParamFlags::USED.bits(), Ordering::Relaxed);
            word.fetch_or(ParamFlags::CHANGED.bits(), Ordering::Release);
        }

        self.pending += 1;
        Ok(())
    }

    /// Close the update cycle and wake all waiting readers.
    ///
    /// Returns the committed generation. A commit without mutations still
    /// publishes an (empty) cycle.
    pub fn commit(&mut self) -> u32 {
        self.open_cycle();
        let generation = self.region.signal().end_cycle();
        trace!(generation, changes = self.pending, "Parameter cycle committed");
        self.cycle_open = false;
        self.pending = 0;
        generation
    }

    /// Open a cycle if none is open, clearing the last cycle's change bits.
    fn open_cycle(&mut self) {
        if self.cycle_open {
            return;
        }
        self.region.signal().begin_cycle();

        let mask = ParamFlags::CHANGE_MASK.bits();
        for word in self.region.segment().flag_words() {
            if word.load(Ordering::Relaxed) & mask != 0 {
                word.fetch_and(!mask, Ordering::Relaxed);
            }
        }
        self.cycle_open = true;
    }

    /// Mutations in the open cycle
    pub fn pending_changes(&self) -> usize {
        self.pending
    }

    /// Current generation
    pub fn generation(&self) -> u32 {
        self.region.signal().generation()
    }

    /// Stamped protocol version
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Writer process ID
    pub fn writer_pid(&self) -> u32 {
        self.writer_pid
    }

    /// Active catalog
    pub fn catalog(&self) -> &ParameterCatalog<JS, JC, DK> {
        &self.catalog
    }

    /// Shared region, e.g. to attach an in-process reader
    pub fn region(&self) -> &Arc<SegmentRegion<JS, JC, DK>> {
        &self.region
    }
}

impl<const JS: usize, const JC: usize, const DK: usize> Drop for WriterSynchronizer<JS, JC, DK> {
    fn drop(&mut self) {
        // Retire: readers fail validation instead of trusting an orphaned layout.
        self.region
            .segment()
            .version
            .store(RETIRED_VERSION, Ordering::Release);
        self.region.signal().advance(1);
        info!(segment = self.region.name(), "Parameter segment retired");
    }
}
