//! Client-side per-call and per-attempt tracers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chassis_core::Status;
use opentelemetry::KeyValue;

use crate::instruments::{METHOD_KEY, STATUS_KEY};
use crate::RpcMetrics;

/// Transport-provided facts about one attempt's stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamInfo {
    /// Whether this attempt is a transparent retry: one issued before any
    /// response headers were observed on the previous attempt.
    pub is_transparent_retry: bool,
    /// Time the attempt spent waiting on name resolution, when resolution
    /// had not completed at call start.
    pub name_resolution_delay: Option<Duration>,
}

/// Per-call aggregator owning the attempt tracers of one logical call.
///
/// Create one per outbound call; obtain an [`AttemptTracer`] from
/// [`new_attempt`](Self::new_attempt) for every network attempt, and call
/// [`call_ended`](Self::call_ended) once after the last attempt completes.
pub struct ClientCallTracer {
    metrics: Arc<RpcMetrics>,
    full_method: Arc<str>,
    started_at: Duration,
    attempts_started: AtomicU64,
    attempts_recorded: AtomicU64,
    saw_outbound_headers: AtomicBool,
    call_ended: AtomicBool,
}

impl ClientCallTracer {
    pub fn new(metrics: Arc<RpcMetrics>, full_method: impl Into<Arc<str>>) -> Self {
        let started_at = metrics.clock.now();
        Self {
            metrics,
            full_method: full_method.into(),
            started_at,
            attempts_started: AtomicU64::new(0),
            attempts_recorded: AtomicU64::new(0),
            saw_outbound_headers: AtomicBool::new(false),
            call_ended: AtomicBool::new(false),
        }
    }

    /// Start a new attempt.
    ///
    /// Every invocation counts toward `grpc.client.attempt.started`,
    /// transparent retries included.
    pub fn new_attempt(self: &Arc<Self>, info: StreamInfo) -> AttemptTracer {
        self.attempts_started.fetch_add(1, Ordering::AcqRel);
        self.metrics
            .instruments
            .client_attempt_started
            .add(1, &self.method_attributes());
        AttemptTracer {
            call: Arc::clone(self),
            info,
            started_at: self.metrics.clock.now(),
            sent_bytes: AtomicU64::new(0),
            rcvd_bytes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Record the call-level duration with the terminal `status`.
    ///
    /// Recorded exactly once; later invocations are ignored. If the call
    /// ends without any attempt having recorded its points, and either no
    /// attempt was ever started or none reached its outbound headers, a
    /// zero-sized attempt record is synthesized so the call is visible in
    /// the attempt-level histograms.
    pub fn call_ended(&self, status: &Status) {
        if self.call_ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let elapsed = self.metrics.clock.now().saturating_sub(self.started_at);
        if self.attempts_recorded.load(Ordering::Acquire) == 0
            && (self.attempts_started.load(Ordering::Acquire) == 0
                || !self.saw_outbound_headers.load(Ordering::Acquire))
        {
            self.record_synthetic_attempt(status);
        }
        self.metrics
            .instruments
            .client_call_duration
            .record(elapsed.as_secs_f64(), &self.status_attributes(status));
    }

    /// One zero-sized attempt record for a call that produced no stream.
    fn record_synthetic_attempt(&self, status: &Status) {
        let instruments = &self.metrics.instruments;
        if self.attempts_started.load(Ordering::Acquire) == 0 {
            instruments
                .client_attempt_started
                .add(1, &self.method_attributes());
        }
        let attributes = self.status_attributes(status);
        instruments.client_attempt_duration.record(0.0, &attributes);
        instruments.client_attempt_sent_size.record(0, &attributes);
        instruments.client_attempt_rcvd_size.record(0, &attributes);
    }

    fn method_attributes(&self) -> [KeyValue; 1] {
        [KeyValue::new(METHOD_KEY, self.full_method.to_string())]
    }

    fn status_attributes(&self, status: &Status) -> [KeyValue; 2] {
        [
            KeyValue::new(METHOD_KEY, self.full_method.to_string()),
            KeyValue::new(STATUS_KEY, status.code().name()),
        ]
    }
}

/// Per-network-attempt recorder.
///
/// Wire sizes accumulate lock-free from the transport's stream thread; the
/// three attempt-level histogram points are recorded once, when
/// [`stream_closed`](Self::stream_closed) seals the attempt.
pub struct AttemptTracer {
    call: Arc<ClientCallTracer>,
    info: StreamInfo,
    started_at: Duration,
    sent_bytes: AtomicU64,
    rcvd_bytes: AtomicU64,
    closed: AtomicBool,
}

impl AttemptTracer {
    /// Outbound headers left the client. No direct metric emission, but the
    /// owning call uses this to tell a started attempt from one that never
    /// reached the wire.
    pub fn outbound_headers(&self) {
        self.call
            .saw_outbound_headers
            .store(true, Ordering::Release);
    }

    /// Sequence number of an outbound message. Message counts do not feed
    /// any instrument.
    pub fn outbound_message(&self, _seq: u64) {}

    /// Sequence number of an inbound message. Message counts do not feed
    /// any instrument.
    pub fn inbound_message(&self, _seq: u64) {}

    /// Add compressed bytes sent on the wire.
    pub fn outbound_wire_size(&self, bytes: u64) {
        self.sent_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add compressed bytes received from the wire.
    pub fn inbound_wire_size(&self, bytes: u64) {
        self.rcvd_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Whether this attempt is a transparent retry.
    pub fn is_transparent_retry(&self) -> bool {
        self.info.is_transparent_retry
    }

    /// Name-resolution delay carried on the stream info, if any. Not fed to
    /// any instrument.
    pub fn name_resolution_delay(&self) -> Option<Duration> {
        self.info.name_resolution_delay
    }

    /// Seal the attempt with its terminal `status` and record its duration
    /// and byte totals. Recorded exactly once; later invocations are
    /// ignored.
    pub fn stream_closed(&self, status: &Status) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.call.attempts_recorded.fetch_add(1, Ordering::AcqRel);
        let elapsed = self
            .call
            .metrics
            .clock
            .now()
            .saturating_sub(self.started_at);
        let attributes = self.call.status_attributes(status);
        let instruments = &self.call.metrics.instruments;
        instruments
            .client_attempt_duration
            .record(elapsed.as_secs_f64(), &attributes);
        instruments
            .client_attempt_sent_size
            .record(self.sent_bytes.load(Ordering::Relaxed), &attributes);
        instruments
            .client_attempt_rcvd_size
            .record(self.rcvd_bytes.load(Ordering::Relaxed), &attributes);
    }
}
