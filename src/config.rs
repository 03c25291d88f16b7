//! Runtime configuration (component H). The original source sizes its static arrays from
//! preprocessor constants (`TCPIP_CFG_MAX_SOCKETS`, `TCPIP_CFG_MAX_CONTROLLER`,
//! `TCPIP_CFG_MAX_PACKETSIZE`); Rust has no equivalent compile-time configuration header, so this
//! crate takes the same values as fields of a plain config value handed to [`crate::TcpIp::new`].
//! There is no file or environment loader here — that integration point is explicitly out of
//! scope for this crate.

/// The default maximum packet size (`TCPIP_CFG_MAX_PACKETSIZE` default of 1024 bytes).
pub const DEFAULT_MAX_PACKETSIZE: usize = 1024;

/// The default controller count (`TCPIP_CFG_MAX_CONTROLLER` default of 1).
pub const DEFAULT_MAX_CONTROLLERS: usize = 1;

/// The mode a controller starts in. Only the three externally-commandable modes are represented
/// here; `Startup`/`Shutdown` from the AUTOSAR `TcpIp_StateType` are internal-only states that
/// `request_com_mode` rejects as arguments (see [`crate::state::ControllerMode`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TcpIpConfig {
    /// Number of pre-allocated socket slots (`TCPIP_CFG_MAX_SOCKETS`).
    pub max_sockets: usize,
    /// Number of configured Ethernet controllers (`TCPIP_CFG_MAX_CONTROLLER`).
    pub max_controllers: usize,
    /// Size of the scratch transmit buffer pulled into via `CopyTxData` (`TCPIP_CFG_MAX_PACKETSIZE`).
    pub max_packet_size: usize,
}

impl TcpIpConfig {
    /// Builds a config, rejecting the degenerate sizes that the original's static arrays could
    /// never express either (a zero-length C array is not portable and the original never
    /// defines its constants as zero).
    pub fn new(max_sockets: usize, max_controllers: usize, max_packet_size: usize) -> Option<Self> {
        if max_sockets == 0 || max_controllers == 0 || max_packet_size == 0 {
            return None;
        }
        Some(Self {
            max_sockets,
            max_controllers,
            max_packet_size,
        })
    }
}

impl Default for TcpIpConfig {
    /// Mirrors the original's compiled-in defaults, aside from `max_sockets` which the original
    /// requires the integrator to define explicitly; 16 is a reasonable default for a host
    /// application that hasn't sized its socket pool yet.
    fn default() -> Self {
        Self {
            max_sockets: 16,
            max_controllers: DEFAULT_MAX_CONTROLLERS,
            max_packet_size: DEFAULT_MAX_PACKETSIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_sized_fields() {
        assert!(TcpIpConfig::new(0, 1, 1024).is_none());
        assert!(TcpIpConfig::new(8, 0, 1024).is_none());
        assert!(TcpIpConfig::new(8, 1, 0).is_none());
    }

    #[test]
    fn accepts_reasonable_config() {
        assert!(TcpIpConfig::new(8, 1, 1024).is_some());
    }
}
