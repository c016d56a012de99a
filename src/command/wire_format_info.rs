//! `WireFormatInfo`: the negotiated parameters exchanged immediately
//! after connect. After handshake both peers operate on the element-wise
//! minimum (for `version`) and logical AND (for capability flags) of
//! what was proposed.

pub const MIN_VERSION: u8 = 1;
pub const MAX_VERSION: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFormatInfo {
    pub version: u8,
    pub stack_trace_enabled: bool,
    pub cache_enabled: bool,
    pub tcp_no_delay_enabled: bool,
    pub tight_encoding_enabled: bool,
    pub size_prefix_disabled: bool,
    pub max_inactivity_duration_ms: u64,
    pub max_inactivity_duration_initial_delay_ms: u64,
    pub max_frame_size: u64,
}

impl Default for WireFormatInfo {
    fn default() -> Self {
        WireFormatInfo {
            version: MAX_VERSION,
            stack_trace_enabled: true,
            cache_enabled: true,
            tcp_no_delay_enabled: true,
            tight_encoding_enabled: true,
            size_prefix_disabled: false,
            max_inactivity_duration_ms: 30_000,
            max_inactivity_duration_initial_delay_ms: 10_000,
            max_frame_size: 100 * 1024 * 1024,
        }
    }
}

impl WireFormatInfo {
    /// Computes the negotiated parameters from both peers' proposals:
    /// `version` takes the minimum, every boolean capability is AND-ed,
    /// and size/time bounds take the minimum (the more conservative
    /// side wins, never exceeding either peer's stated limit).
    pub fn negotiate(local: &WireFormatInfo, remote: &WireFormatInfo) -> WireFormatInfo {
        WireFormatInfo {
            version: local.version.min(remote.version).clamp(MIN_VERSION, MAX_VERSION),
            stack_trace_enabled: local.stack_trace_enabled && remote.stack_trace_enabled,
            cache_enabled: local.cache_enabled && remote.cache_enabled,
            tcp_no_delay_enabled: local.tcp_no_delay_enabled && remote.tcp_no_delay_enabled,
            tight_encoding_enabled: local.tight_encoding_enabled && remote.tight_encoding_enabled,
            size_prefix_disabled: local.size_prefix_disabled || remote.size_prefix_disabled,
            max_inactivity_duration_ms: min_nonzero(
                local.max_inactivity_duration_ms,
                remote.max_inactivity_duration_ms,
            ),
            max_inactivity_duration_initial_delay_ms: local
                .max_inactivity_duration_initial_delay_ms
                .min(remote.max_inactivity_duration_initial_delay_ms),
            max_frame_size: local.max_frame_size.min(remote.max_frame_size),
        }
    }
}

/// `0` means "disabled" for the inactivity watchdogs; a plain `min`
/// would let a disabled side silently win, so `0` only wins if both
/// sides disabled it.
fn min_nonzero(a: u64, b: u64) -> u64 {
    match (a, b) {
        (0, 0) => 0,
        (0, x) | (x, 0) => x,
        (a, b) => a.min(b),
    }
}
