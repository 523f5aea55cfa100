//! Server-side per-call tracer. Simpler than the client side: one tracer
//! per call, no retries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chassis_core::Status;
use opentelemetry::KeyValue;
use parking_lot::Mutex;

use crate::instruments::{METHOD_KEY, STATUS_KEY};
use crate::RpcMetrics;

/// Creates one [`ServerCallTracer`] per inbound call.
pub struct ServerTracerFactory {
    metrics: Arc<RpcMetrics>,
}

impl ServerTracerFactory {
    pub fn new(metrics: Arc<RpcMetrics>) -> Self {
        Self { metrics }
    }

    /// Create the tracer for one inbound call. Counts toward
    /// `grpc.server.call.started`.
    pub fn new_server_tracer(&self, full_method: impl Into<String>) -> ServerCallTracer {
        ServerCallTracer::new(Arc::clone(&self.metrics), full_method.into())
    }
}

/// Recorder for one inbound call.
pub struct ServerCallTracer {
    metrics: Arc<RpcMetrics>,
    full_method: Mutex<String>,
    started_at: Duration,
    sent_bytes: AtomicU64,
    rcvd_bytes: AtomicU64,
    closed: AtomicBool,
}

impl ServerCallTracer {
    fn new(metrics: Arc<RpcMetrics>, full_method: String) -> Self {
        let started_at = metrics.clock.now();
        metrics.instruments.server_call_started.add(
            1,
            &[KeyValue::new(METHOD_KEY, full_method.clone())],
        );
        Self {
            metrics,
            full_method: Mutex::new(full_method),
            started_at,
            sent_bytes: AtomicU64::new(0),
            rcvd_bytes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Re-bind the method once the server call object exists. Redundant
    /// with construction; kept as safety against a transport handing the
    /// tracer a provisional name.
    pub fn server_call_started(&self, full_method: &str) {
        let mut method = self.full_method.lock();
        if *method != full_method {
            *method = full_method.to_string();
        }
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

    /// Seal the call with its terminal `status` and record duration and
    /// byte totals. Recorded exactly once; later invocations are ignored.
    pub fn stream_closed(&self, status: &Status) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let elapsed = self.metrics.clock.now().saturating_sub(self.started_at);
        let attributes = [
            KeyValue::new(METHOD_KEY, self.full_method.lock().clone()),
            KeyValue::new(STATUS_KEY, status.code().name()),
        ];
        let instruments = &self.metrics.instruments;
        instruments
            .server_call_duration
            .record(elapsed.as_secs_f64(), &attributes);
        instruments
            .server_call_sent_size
            .record(self.sent_bytes.load(Ordering::Relaxed), &attributes);
        instruments
            .server_call_rcvd_size
            .record(self.rcvd_bytes.load(Ordering::Relaxed), &attributes);
    }
}
