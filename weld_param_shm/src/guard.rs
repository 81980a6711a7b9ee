//! Version guard: validates a mapped segment before any field is trusted

use crate::error::GuardError;
use crate::layout::SharedParameterSegment;
use std::sync::atomic::Ordering;

/// Checks the duplicated version words against the compiled protocol version.
///
/// Run on every attach and before every batch of reads: the writer may
/// restart with an incompatible layout at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGuard {
    expected: u32,
}

impl VersionGuard {
    /// Guard for protocol version `expected`
    pub const fn new(expected: u32) -> Self {
        Self { expected }
    }

    /// Expected protocol version
    pub const fn expected(&self) -> u32 {
        self.expected
    }

    /// Validate `segment`.
    ///
    /// Reads `version` first, then `version2`. Nothing else is touched.
    pub fn validate<const JS: usize, const JC: usize, const DK: usize>(
        &self,
        segment: &SharedParameterSegment<JS, JC, DK>,
    ) -> Result<(), GuardError> {
        let version = segment.version.load(Ordering::Acquire);
        let version2 = segment.version2.load(Ordering::Acquire);
        self.check(version, version2)
    }

    /// Apply the validation rule to two observed version words
    pub const fn check(&self, version: u32, version2: u32) -> Result<(), GuardError> {
        if version != self.expected {
            return Err(GuardError::VersionMismatch {
                expected: self.expected,
                found: version,
            });
        }
        if version2 != version {
            return Err(GuardError::AlignmentCorruption { version, version2 });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::SegmentRegion;

    #[test]
    fn matching_versions_pass() {
        assert_eq!(VersionGuard::new(3).check(3, 3), Ok(()));
    }

    #[test]
    fn leading_version_decides_mismatch() {
        // A wrong leading word is a version mismatch even if version2 differs too.
        assert_eq!(
            VersionGuard::new(3).check(2, 7),
            Err(GuardError::VersionMismatch {
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn trailing_disagreement_is_corruption() {
        assert_eq!(
            VersionGuard::new(3).check(3, 4),
            Err(GuardError::AlignmentCorruption {
                version: 3,
                version2: 4
            })
        );
    }

    #[test]
    fn validates_live_segment() {
        let region = SegmentRegion::<4, 2, 3>::in_memory("guard");
        let guard = VersionGuard::new(3);
        assert!(matches!(
            guard.validate(region.segment()),
            Err(GuardError::VersionMismatch { found: 0, .. })
        ));

        region.segment().version2.store(3, Ordering::Release);
        region.segment().version.store(3, Ordering::Release);
        assert_eq!(guard.validate(region.segment()), Ok(()));
    }
}
