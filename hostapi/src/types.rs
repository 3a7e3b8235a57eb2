//! Host-side configuration types.

/// Default upper bound on handle table slots (sentinel included).
pub const DEFAULT_MAX_HANDLES: usize = 1 << 20;

/// Largest length an array may be grown to by an index write.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

/// Limits for the host value space of one bridge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Maximum number of handle slots, including the `0` sentinel and
    /// pinned roots. Allocation past this fails with `HandleLimit`.
    pub max_handles: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_handles: DEFAULT_MAX_HANDLES,
        }
    }
}
