//! The fixed OpenTelemetry instrument set recorded by all tracers.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Instrumentation scope under which every instrument is registered.
pub const INSTRUMENTATION_SCOPE: &str = "grpc-chassis";

/// Attribute key carrying the full method name, e.g.
/// `package1.service2/method3`.
pub const METHOD_KEY: &str = "grpc.method";

/// Attribute key carrying the canonical status-code name, e.g. `OK` or
/// `UNAVAILABLE`.
pub const STATUS_KEY: &str = "grpc.status";

/// The instrument bundle. Created once per process against a `Meter` and
/// shared by every tracer.
///
/// Instrument names and units are the externally observable contract of the
/// metrics subsystem and must not drift.
pub struct MetricInstruments {
    pub(crate) client_attempt_started: Counter<u64>,
    pub(crate) client_attempt_duration: Histogram<f64>,
    pub(crate) client_attempt_sent_size: Histogram<u64>,
    pub(crate) client_attempt_rcvd_size: Histogram<u64>,
    pub(crate) client_call_duration: Histogram<f64>,
    pub(crate) server_call_started: Counter<u64>,
    pub(crate) server_call_duration: Histogram<f64>,
    pub(crate) server_call_sent_size: Histogram<u64>,
    pub(crate) server_call_rcvd_size: Histogram<u64>,
}

impl MetricInstruments {
    /// Register the full instrument set against `meter`.
    pub fn new(meter: &Meter) -> Self {
        Self {
            client_attempt_started: meter
                .u64_counter("grpc.client.attempt.started")
                .with_unit("{attempt}")
                .with_description("Number of client call attempts started")
                .build(),
            client_attempt_duration: meter
                .f64_histogram("grpc.client.attempt.duration")
                .with_unit("s")
                .with_description("Time taken to complete a client call attempt")
                .build(),
            client_attempt_sent_size: meter
                .u64_histogram("grpc.client.attempt.sent_total_compressed_message_size")
                .with_unit("By")
                .with_description("Compressed message bytes sent per client call attempt")
                .build(),
            client_attempt_rcvd_size: meter
                .u64_histogram("grpc.client.attempt.rcvd_total_compressed_message_size")
                .with_unit("By")
                .with_description("Compressed message bytes received per call attempt")
                .build(),
            client_call_duration: meter
                .f64_histogram("grpc.client.call.duration")
                .with_unit("s")
                .with_description("Time taken by gRPC to complete an RPC from application's perspective")
                .build(),
            server_call_started: meter
                .u64_counter("grpc.server.call.started")
                .with_unit("{call}")
                .with_description("Number of server calls started")
                .build(),
            server_call_duration: meter
                .f64_histogram("grpc.server.call.duration")
                .with_unit("s")
                .with_description("Time taken to complete a call from server transport's perspective")
                .build(),
            server_call_sent_size: meter
                .u64_histogram("grpc.server.call.sent_total_compressed_message_size")
                .with_unit("By")
                .with_description("Compressed message bytes sent per server call")
                .build(),
            server_call_rcvd_size: meter
                .u64_histogram("grpc.server.call.rcvd_total_compressed_message_size")
                .with_unit("By")
                .with_description("Compressed message bytes received per server call")
                .build(),
        }
    }
}
