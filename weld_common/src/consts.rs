//! Build-time constants shared by the parameter writer and every reader.
//!
//! Single source of truth for the parameter catalog bounds and the protocol
//! version. Writer and readers must be built against the same values; the
//! segment carries no runtime negotiation beyond the version check.

/// Number of job-settings parameters (floating-point array).
pub const JS_PAR_N: usize = 96;

/// Number of job-control parameters (32-bit unsigned array).
pub const JC_PAR_N: usize = 32;

/// Number of documentation/measurement parameters (floating-point array).
pub const DOKU_PAR_N: usize = 64;

/// Total number of addressable parameters.
pub const TOTAL_PAR_N: usize = JS_PAR_N + JC_PAR_N + DOKU_PAR_N;

/// Parameter segment protocol version.
///
/// Bump whenever a field, an array bound or a flag bit meaning changes.
pub const PROTOCOL_VERSION: u32 = 3;

/// Version value stamped into a segment whose writer has shut down.
/// Never a valid protocol version.
pub const RETIRED_VERSION: u32 = 0;

/// Default shared memory segment name (mapped as `/dev/shm/weld_<name>`).
pub const DEFAULT_SEGMENT_NAME: &str = "params";

/// Default reader wait timeout in milliseconds.
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 500;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/weld/params.toml";

/// CPU cache line size in bytes. The signal block is aligned to it.
pub const CACHE_LINE_SIZE: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_are_nonzero() {
        assert!(JS_PAR_N > 0);
        assert!(JC_PAR_N > 0);
        assert!(DOKU_PAR_N > 0);
        assert_eq!(TOTAL_PAR_N, JS_PAR_N + JC_PAR_N + DOKU_PAR_N);
    }

    #[test]
    fn retired_version_is_never_a_protocol_version() {
        assert_ne!(PROTOCOL_VERSION, RETIRED_VERSION);
    }

    #[test]
    fn parameter_ids_fit_in_u32() {
        assert!(TOTAL_PAR_N <= u32::MAX as usize);
    }
}
