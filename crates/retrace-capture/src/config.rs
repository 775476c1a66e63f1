//! Capture configuration and validation.

use std::collections::HashSet;

use retrace_format::codec::CHAIN_END;

/// How a created object's [`CaptureId`](retrace_core::CaptureId) is chosen.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureIdPolicy {
    /// Use the native handle value as the id.
    #[default]
    NativeHandle,
    /// Assign ids from a session-wide counter starting at 1.
    ///
    /// Needed when the driver recycles handle values while the old object
    /// could still be referenced by an in-flight record.
    Surrogate,
}

/// Configuration for a [`CaptureSession`](crate::CaptureSession).
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// How capture ids are assigned. Default: [`CaptureIdPolicy::NativeHandle`].
    pub capture_id_policy: CaptureIdPolicy,
    /// Open the session paused; [`resume`](crate::CaptureSession::resume)
    /// starts recording. Default: `false`.
    pub start_paused: bool,
    /// Application name written to the trace header.
    pub application_name: String,
    /// Graphics API name written to the trace header. Must not be empty.
    /// Default: `"vulkan"`.
    pub api_name: String,
    /// Extension-chain link tags the capture layer knows how to encode.
    /// `None` accepts every link. Default: `None`.
    pub supported_chain_tags: Option<HashSet<u32>>,
    /// Flush the sink every this many records. `None` flushes only at
    /// finalize. Default: `None`.
    pub flush_interval: Option<u64>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_id_policy: CaptureIdPolicy::default(),
            start_paused: false,
            application_name: String::new(),
            api_name: "vulkan".into(),
            supported_chain_tags: None,
            flush_interval: None,
        }
    }
}

impl CaptureConfig {
    /// Check the configuration before a session is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_name.trim().is_empty() {
            return Err(ConfigError::EmptyApiName);
        }
        if self.flush_interval == Some(0) {
            return Err(ConfigError::ZeroFlushInterval);
        }
        if let Some(tags) = &self.supported_chain_tags {
            if tags.contains(&CHAIN_END) {
                return Err(ConfigError::ReservedChainTag);
            }
        }
        Ok(())
    }
}

/// Invalid [`CaptureConfig`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `api_name` is empty.
    #[error("api_name must not be empty")]
    EmptyApiName,
    /// `flush_interval` is `Some(0)`.
    #[error("flush_interval must be at least 1")]
    ZeroFlushInterval,
    /// `supported_chain_tags` contains the chain terminator tag.
    #[error("chain tag 0 is reserved as the chain terminator")]
    ReservedChainTag,
}
