//! Reader handles: guarded attach, commit wait and change scan
//!
//! Readers never write values or flags; the only shared word they touch is
//! the waiter count of the signal block. Each reader keeps a private cursor
//! (the last committed generation it acknowledged) and derives from it
//! whether the change bits in the segment describe exactly what it missed:
//!
//! - cursor == last commit: nothing new
//! - cursor == last commit - 1 cycle: the change bits are exact
//! - anything else: the reader lagged, every slot is reported as a value
//!   change (so deactivations are not lost) and every used slot also as a
//!   metadata change

use crate::catalog::{ParameterCatalog, ParameterId, ParameterValue};
use crate::error::{GuardError, ShmError, ShmResult};
use crate::guard::VersionGuard;
use crate::layout::{ExtendedInfo, ParamFlags};
use crate::platform::is_process_alive;
use crate::region::SegmentRegion;
use crate::signal::{committed_floor, is_committed};
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};
use std::time::Duration;
use tracing::{debug, error, info};
use weld::consts::{DOKU_PAR_N, JC_PAR_N, JS_PAR_N};

/// Copy attempts for a metadata entry before giving up
const MAX_READ_RETRIES: usize = 10;

/// Kind of a reported change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// Value (or used state) changed
    ValueChanged,
    /// Metadata changed
    ExtendedChanged,
}

/// One reported change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParameterChange {
    /// Changed parameter
    pub id: ParameterId,
    /// What changed
    pub kind: ChangeKind,
}

/// How a scan interprets the segment's change bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// No commit since the cursor
    Unchanged,
    /// Exactly one commit since the cursor; change bits are reported as-is
    Exact,
    /// The reader missed cycles; every slot is reported, metadata only for
    /// used ones
    Resync,
}

/// Lazy, restartable iteration over the changes of one commit
///
/// Changes come in catalog order (settings, control, doku by index), value
/// before metadata for the same parameter. The scan reads flags only.
pub struct ChangeScan<'a, const JS: usize, const JC: usize, const DK: usize> {
    region: &'a SegmentRegion<JS, JC, DK>,
    observed: u32,
    target: u32,
    mode: ScanMode,
    pos: usize,
    queued: Option<ParameterId>,
}

impl<'a, const JS: usize, const JC: usize, const DK: usize> ChangeScan<'a, JS, JC, DK> {
    fn new(region: &'a SegmentRegion<JS, JC, DK>, cursor: u32) -> Self {
        let observed = region.signal().generation();
        let target = committed_floor(observed);
        let lag = target.wrapping_sub(cursor);

        let mode = if lag == 0 {
            ScanMode::Unchanged
        } else if lag == 2 && is_committed(observed) {
            ScanMode::Exact
        } else {
            ScanMode::Resync
        };

        Self {
            region,
            observed,
            target,
            mode,
            pos: 0,
            queued: None,
        }
    }

    /// Scan mode chosen at creation
    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Committed generation this scan reports up to
    pub fn generation(&self) -> u32 {
        self.target
    }

    /// Start over from the first parameter
    pub fn restart(&mut self) {
        self.pos = 0;
        self.queued = None;
    }

    /// Whether the writer left the segment alone since the scan started.
    ///
    /// If not, the reported set may be incomplete and the scan must not be
    /// acknowledged.
    pub fn is_consistent(&self) -> bool {
        fence(Ordering::Acquire);
        self.region.signal().generation.load(Ordering::Relaxed) == self.observed
    }

    /// Finish the scan: the receipt to acknowledge, or `None` if the writer
    /// interfered.
    pub fn finish(self) -> Option<ScanReceipt> {
        self.is_consistent().then_some(ScanReceipt {
            generation: self.target,
        })
    }
}

impl<const JS: usize, const JC: usize, const DK: usize> Iterator for ChangeScan<'_, JS, JC, DK> {
    type Item = ParameterChange;

    fn next(&mut self) -> Option<ParameterChange> {
        if let Some(id) = self.queued.take() {
            return Some(ParameterChange {
                id,
                kind: ChangeKind::ExtendedChanged,
            });
        }
        if self.mode == ScanMode::Unchanged {
            return None;
        }

        let segment = self.region.segment();
        while self.pos < ParameterCatalog::<JS, JC, DK>::LEN {
            let pos = self.pos;
            self.pos += 1;

            let flags =
                ParamFlags::from_bits_truncate(segment.flag_word_at(pos).load(Ordering::Acquire));
            let (value, extended) = match self.mode {
                ScanMode::Exact => (
                    flags.contains(ParamFlags::CHANGED),
                    flags.contains(ParamFlags::EXTENDED_CHANGED),
                ),
                _ => (true, flags.contains(ParamFlags::USED)),
            };

            let id = ParameterId(pos as u32);
            match (value, extended) {
                (true, true) => {
                    self.queued = Some(id);
                    return Some(ParameterChange {
                        id,
                        kind: ChangeKind::ValueChanged,
                    });
                }
                (true, false) => {
                    return Some(ParameterChange {
                        id,
                        kind: ChangeKind::ValueChanged,
                    });
                }
                (false, true) => {
                    return Some(ParameterChange {
                        id,
                        kind: ChangeKind::ExtendedChanged,
                    });
                }
                (false, false) => {}
            }
        }
        None
    }
}

/// Proof of a consistent scan, consumed by [`ReaderSynchronizer::acknowledge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanReceipt {
    generation: u32,
}

impl ScanReceipt {
    /// Generation the receipt acknowledges
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Parameter reader handle
///
/// Any number of readers may attach to one region. A failed version check
/// latches: every later call returns the same error until the process
/// attaches again.
pub struct ReaderSynchronizer<
    const JS: usize = JS_PAR_N,
    const JC: usize = JC_PAR_N,
    const DK: usize = DOKU_PAR_N,
> {
    region: Arc<SegmentRegion<JS, JC, DK>>,
    guard: VersionGuard,
    cursor: u32,
    failure: Cell<Option<GuardError>>,
}

/// Reader with the build-time bounds
pub type ParameterReader = ReaderSynchronizer;

impl<const JS: usize, const JC: usize, const DK: usize> ReaderSynchronizer<JS, JC, DK> {
    /// Attach to `region` after validating its version words.
    pub fn attach(region: Arc<SegmentRegion<JS, JC, DK>>, expected_version: u32) -> ShmResult<Self> {
        let guard = VersionGuard::new(expected_version);
        if let Err(failure) = guard.validate(region.segment()) {
            error!(segment = region.name(), %failure, "Parameter segment rejected");
            return Err(failure.into());
        }

        let cursor = committed_floor(region.signal().generation());
        info!(segment = region.name(), cursor, "Reader attached");
        Ok(Self {
            region,
            guard,
            cursor,
            failure: Cell::new(None),
        })
    }

    /// Map the file-backed region `name` and attach to it.
    pub fn open(name: &str, expected_version: u32) -> ShmResult<Self> {
        let region = SegmentRegion::open(name, expected_version)?;
        Self::attach(Arc::new(region), expected_version)
    }

    /// Re-run the version check.
    pub fn revalidate(&self) -> ShmResult<()> {
        if let Some(failure) = self.failure.get() {
            return Err(failure.into());
        }
        if let Err(failure) = self.guard.validate(self.region.segment()) {
            error!(segment = self.region.name(), %failure, "Parameter segment invalidated");
            self.failure.set(Some(failure));
            return Err(failure.into());
        }
        Ok(())
    }

    /// Block until the writer commits a cycle this reader has not
    /// acknowledged, or `timeout` elapses.
    ///
    /// Returns immediately if such a commit already happened.
    pub fn wait_for_change(&self, timeout: Duration) -> ShmResult<()> {
        self.revalidate()?;
        match self.region.signal().wait_for_commit(self.cursor, timeout) {
            Some(_) => self.revalidate(),
            None => Err(ShmError::Timeout { waited: timeout }),
        }
    }

    /// Start a change scan against the current commit.
    pub fn scan(&self) -> ShmResult<ChangeScan<'_, JS, JC, DK>> {
        self.revalidate()?;
        let scan = ChangeScan::new(&self.region, self.cursor);
        if scan.mode() == ScanMode::Resync {
            debug!(
                segment = self.region.name(),
                cursor = self.cursor,
                generation = scan.generation(),
                "Reader lagged, resynchronizing"
            );
        }
        Ok(scan)
    }

    /// Mark the scanned commit as consumed.
    pub fn acknowledge(&mut self, receipt: ScanReceipt) {
        self.cursor = receipt.generation;
    }

    /// Scan, collect and acknowledge in one step.
    ///
    /// If the writer opened a new cycle mid-scan, the changes are returned
    /// but not acknowledged, so the next scan resynchronizes.
    pub fn drain_changes(&mut self) -> ShmResult<Vec<ParameterChange>> {
        let (changes, receipt) = {
            let mut scan = self.scan()?;
            let changes: Vec<_> = scan.by_ref().collect();
            (changes, scan.finish())
        };
        match receipt {
            Some(receipt) => self.acknowledge(receipt),
            None => debug!(segment = self.region.name(), "Scan raced with writer"),
        }
        Ok(changes)
    }

    /// Current value of a used parameter.
    pub fn read_value(&self, id: ParameterId) -> ShmResult<ParameterValue> {
        self.revalidate()?;
        let slot = ParameterCatalog::<JS, JC, DK>::locate(id)
            .ok_or(ShmError::UnknownParameterId { id })?;

        let segment = self.region.segment();
        if !segment.flags(&slot).contains(ParamFlags::USED) {
            return Err(ShmError::ParameterNotUsed { id });
        }
        let bits = segment.value_word(&slot).load(Ordering::Acquire);
        Ok(ParameterValue::from_bits(slot.element, bits))
    }

    /// Current metadata of a used parameter.
    ///
    /// Retries while the writer is mid-update; fails with `ReadConflict`
    /// under sustained contention.
    pub fn read_extended(&self, id: ParameterId) -> ShmResult<ExtendedInfo> {
        self.revalidate()?;
        let slot = ParameterCatalog::<JS, JC, DK>::locate(id)
            .ok_or(ShmError::UnknownParameterId { id })?;

        let segment = self.region.segment();
        if !segment.flags(&slot).contains(ParamFlags::USED) {
            return Err(ShmError::ParameterNotUsed { id });
        }

        let entry = segment.extended_slot(&slot);
        for _ in 0..MAX_READ_RETRIES {
            if let Some(info) = entry.try_load() {
                return Ok(info);
            }
            std::thread::yield_now();
        }
        Err(ShmError::ReadConflict { id })
    }

    /// Values of every used parameter, in catalog order
    pub fn snapshot(&self) -> ShmResult<Vec<(ParameterId, ParameterValue)>> {
        self.revalidate()?;
        let mut values = Vec::new();
        for id in ParameterCatalog::<JS, JC, DK>::ids() {
            match self.read_value(id) {
                Ok(value) => values.push((id, value)),
                Err(ShmError::ParameterNotUsed { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    /// Whether the recorded writer process still exists
    pub fn writer_alive(&self) -> bool {
        is_process_alive(self.region.signal().writer_pid.load(Ordering::Acquire))
    }

    /// Last acknowledged generation
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Region name
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Shared region
    pub fn region(&self) -> &Arc<SegmentRegion<JS, JC, DK>> {
        &self.region
    }
}
