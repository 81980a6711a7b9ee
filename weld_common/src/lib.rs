//! Weld Common Library
//!
//! Shared build-time constants and configuration loading for the welding
//! controller's parameter layer. Both the real-time writer and every
//! supervisory reader depend on this crate, so the catalog bounds and the
//! protocol version are compiled into all of them from one place.
//!
//! # Module Structure
//!
//! - [`consts`] - Catalog bounds, protocol version, default paths
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use weld_common::consts::{JS_PAR_N, PROTOCOL_VERSION};
//! use weld_common::config::{ConfigLoader, ParamShmConfig, SharedConfig};
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
