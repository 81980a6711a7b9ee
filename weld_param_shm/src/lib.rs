//! # Weld Parameter Shared Memory
//!
//! Publishes the weld controller's job parameters (settings, control values
//! and documentation values) from one writer process to any number of reader
//! processes through a fixed-layout shared memory segment.
//!
//! ## Features
//!
//! - **Fixed ABI**: `#[repr(C)]` layout of 32-bit words, checked at compile
//!   time, bracketed by two version words
//! - **Version Guard**: readers refuse segments stamped with another protocol
//!   version or with disagreeing version words, and latch the failure
//! - **Change Tracking**: per-parameter `CHANGED` / `EXTENDED_CHANGED` bits
//!   describing exactly the last committed update cycle
//! - **Batched Wakeup**: one futex wake per commit, however many parameters
//!   changed
//! - **Lagging Readers**: a reader that missed cycles falls back to a full
//!   resync instead of silently losing changes
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────┐    ┌────────────────────────┐    ┌──────────────────┐
//! │ Writer           │    │ /dev/shm/weld_<name>   │    │ Reader 1..N      │
//! │                  │    │                        │    │                  │
//! │ set_value()      ├───►│ version                ├───►│ wait_for_change()│
//! │ set_extended()   │    │ values / extended      │    │ scan()           │
//! │ commit()         │    │ flags                  │    │ read_value()     │
//! │                  │    │ version2               │    │                  │
//! │                  │    │ [signal: generation]   │    │                  │
//! └──────────────────┘    └────────────────────────┘    └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use weld_param_shm::{
//!     PROTOCOL_VERSION, ParameterId, ParameterReader, ParameterValue, ParameterWriter, WeldCatalog,
//!     WeldRegion,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let region = Arc::new(WeldRegion::in_memory("doc"));
//! let mut writer = ParameterWriter::initialize(Arc::clone(&region), WeldCatalog::full())?;
//! let mut reader = ParameterReader::attach(region, PROTOCOL_VERSION)?;
//!
//! writer.set_value(ParameterId(0), ParameterValue::F32(7.5))?;
//! writer.commit();
//!
//! reader.wait_for_change(Duration::from_millis(100))?;
//! for change in reader.drain_changes()? {
//!     let value = reader.read_value(change.id)?;
//!     println!("{} = {}", change.id, value);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread Safety
//!
//! - **WriterSynchronizer**: single writer per segment, `&mut self` mutations
//! - **ReaderSynchronizer**: one handle per reading thread; attach as many as
//!   needed to the same region
//!
//! ## Platform Support
//!
//! File-backed regions and futex wakeup target Linux. Other Unix targets
//! fall back to polling.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod error;
pub mod guard;
pub mod layout;
pub mod platform;
pub mod reader;
pub mod region;
pub mod signal;
pub mod writer;

pub use catalog::{
    ArraySelector, CatalogConfig, CatalogEntry, CatalogError, ElementType, ParameterCatalog,
    ParameterId, ParameterSlot, ParameterValue, WeldCatalog,
};
pub use error::{GuardError, ShmError, ShmResult};
pub use guard::VersionGuard;
pub use layout::{ExtendedInfo, ParamFlags, SharedParameterSegment, SignalBlock, WeldSegment};
pub use reader::{
    ChangeKind, ChangeScan, ParameterChange, ParameterReader, ReaderSynchronizer, ScanMode,
    ScanReceipt,
};
pub use region::{SegmentRegion, WeldRegion, segment_path};
pub use writer::{ParameterWriter, WriterSynchronizer};

pub use weld::consts::PROTOCOL_VERSION;

/// Initialize tracing for RT-safe logging
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
