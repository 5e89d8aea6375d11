use std::time::Duration;

/// Tunables for an `Endpoint`, exposed as named, overridable fields instead
/// of hard-coded constants.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Cap on the accumulated handshake request buffer: reads accumulate
    /// until CRLF-CRLF is seen or this cap is reached.
    pub max_handshake_bytes: usize,

    /// Bound on the handshake read loop when the caller doesn't supply its
    /// own `accept(timeout, ..)` value.
    pub handshake_timeout: Duration,

    /// How long the I/O worker's readiness poll blocks per iteration.
    pub poll_interval: Duration,

    /// Largest payload a single frame may declare before it's rejected as
    /// exceeding configured resources.
    pub max_frame_payload: usize,

    /// Largest payload a reassembled message may accumulate to.
    pub max_message_size: usize,

    /// Cap on the reason string appended to an outgoing close frame.
    pub close_reason_cap: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            max_handshake_bytes: 4096,
            handshake_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(50),
            max_frame_payload: 16 << 20,
            max_message_size: 64 << 20,
            close_reason_cap: 123,
        }
    }
}
