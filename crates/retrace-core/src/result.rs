//! Native result codes.

use std::fmt;

/// A result code returned by a native entry point.
///
/// Stored sign-extended to 64 bits so both Vulkan-style `VkResult` values
/// (negative = error, zero and positive = success or status) and D3D-style
/// `HRESULT` values (high bit set = failure) share one representation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResultCode(pub i64);

impl ResultCode {
    /// The canonical success code.
    pub const SUCCESS: ResultCode = ResultCode(0);

    /// Whether this code reports success (non-negative).
    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// Build from a 32-bit `HRESULT` bit pattern.
    pub fn from_hresult(hr: u32) -> Self {
        Self(hr as i32 as i64)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ResultCode {
    fn from(v: i32) -> Self {
        Self(v as i64)
    }
}

impl From<i64> for ResultCode {
    fn from(v: i64) -> Self {
        Self(v)
    }
}
