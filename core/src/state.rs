//! Connectivity states reported by channels, subchannels, and balancers.

use std::fmt;

/// The connectivity state of a channel, subchannel, or balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    /// No connection and none being established.
    Idle,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and able to carry traffic.
    Ready,
    /// A recent connection attempt failed; backing off.
    TransientFailure,
    /// Shut down; terminal.
    Shutdown,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::Idle => "IDLE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Ready => "READY",
            ConnectivityState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectivityState::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}
