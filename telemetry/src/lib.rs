//! Per-attempt and per-call RPC metrics recorded against OpenTelemetry
//! instruments.
//!
//! A process creates one [`RpcMetrics`] from a `Meter` and shares it across
//! all calls. Each outbound call gets a [`ClientCallTracer`], which hands out
//! one [`AttemptTracer`] per network attempt (retries, transparent or not,
//! each get their own). Each inbound call gets a [`ServerCallTracer`] from
//! the [`ServerTracerFactory`].
//!
//! # Hot path
//!
//! Byte totals accumulate into relaxed atomics written from the transport's
//! stream thread; no tracer takes a lock on the data path. Each attempt
//! records its three histogram points exactly once, when the stream closes,
//! and the call records its duration exactly once, when the call ends.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chassis_core::Code;
//! use chassis_telemetry::{ClientCallTracer, MonotonicClock, RpcMetrics, StreamInfo};
//! use opentelemetry::global;
//!
//! let meter = global::meter(chassis_telemetry::INSTRUMENTATION_SCOPE);
//! let metrics = Arc::new(RpcMetrics::new(&meter, Arc::new(MonotonicClock::new())));
//!
//! let call = Arc::new(ClientCallTracer::new(metrics, "package1.service2/method3"));
//! let attempt = call.new_attempt(StreamInfo::default());
//! attempt.outbound_headers();
//! attempt.outbound_wire_size(1028);
//! attempt.stream_closed(&Code::Ok.into());
//! call.call_ended(&Code::Ok.into());
//! ```

mod client;
mod instruments;
mod server;
mod time;

pub mod testing;

pub use client::{AttemptTracer, ClientCallTracer, StreamInfo};
pub use instruments::{MetricInstruments, INSTRUMENTATION_SCOPE, METHOD_KEY, STATUS_KEY};
pub use server::{ServerCallTracer, ServerTracerFactory};
pub use time::{MonotonicClock, Stopwatch, TimeSource};

use std::sync::Arc;

use opentelemetry::metrics::Meter;

/// Process-wide bundle of the instrument set and the clock the tracers
/// measure against.
pub struct RpcMetrics {
    pub(crate) instruments: MetricInstruments,
    pub(crate) clock: Arc<dyn TimeSource>,
}

impl RpcMetrics {
    /// Register the instrument set against `meter` and measure durations
    /// with `clock`.
    pub fn new(meter: &Meter, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            instruments: MetricInstruments::new(meter),
            clock,
        }
    }

    /// The clock durations are measured against.
    pub fn clock(&self) -> &Arc<dyn TimeSource> {
        &self.clock
    }
}
