//! Recoverable errors of the resident page manager
//!
//! Only outcomes a caller can act on are errors. Broken invariants (double
//! free, freeing a wired page, duplicate lookup keys) panic instead: once
//! the page arena is inconsistent there is nothing a caller could recover.

use thiserror::Error;

/// Errors returned by page manager operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmPageError {
    /// Every eligible freelist is empty
    #[error("out of physical memory")]
    OutOfMemory,

    /// The page is busy and the caller asked not to wait
    #[error("page is busy")]
    Busy,

    /// Bootstrap named a freelist partition that does not exist
    #[error("freelist {index} out of range (max {max})")]
    FreelistOutOfRange { index: usize, max: usize },

    /// Bootstrap registered the same frame twice
    #[error("frame {0:#x} already registered")]
    FrameAlreadyRegistered(u64),

    /// Bootstrap passed an address that is not page aligned
    #[error("address {0:#x} is not page aligned")]
    UnalignedFrame(u64),
}

/// Result type for page manager operations
pub type VmPageResult<T> = Result<T, VmPageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", VmPageError::OutOfMemory), "out of physical memory");
        assert_eq!(
            format!("{}", VmPageError::FreelistOutOfRange { index: 7, max: 4 }),
            "freelist 7 out of range (max 4)"
        );
        assert_eq!(
            format!("{}", VmPageError::FrameAlreadyRegistered(0x3000)),
            "frame 0x3000 already registered"
        );
    }
}
