//! Prelude module for common re-exports.
//!
//! ```rust
//! use weld_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, ParamShmConfig, SharedConfig};

// ─── Parameter Layer Constants ──────────────────────────────────────
pub use crate::consts::{DOKU_PAR_N, JC_PAR_N, JS_PAR_N, PROTOCOL_VERSION, TOTAL_PAR_N};
