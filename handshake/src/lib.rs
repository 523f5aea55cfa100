//! Blocking request/response adapter over a long-lived bidirectional
//! handshaker stream.
//!
//! An external handshaker service speaks a strict one-request-one-response
//! rhythm over a single streaming RPC. [`HandshakerStub`] serialises that
//! exchange: `send` writes one frame and blocks until the single response
//! slot fills or the stream dies. The slot has capacity exactly one. It is
//! a rendezvous, not a queue, and the at-most-one-in-flight invariant is
//! load-bearing for the protocol.

mod stub;

pub use stub::{
    HandshakeError, HandshakeRequest, HandshakeResponse, HandshakerChannel, HandshakerStub,
    ResponseReader, StreamWriter, HANDSHAKE_RPC_DEADLINE,
};
