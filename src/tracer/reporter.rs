//! Span reporting.
//!
//! # Responsibilities
//! - Hand finished spans to a collector
//! - Keep delivery best-effort: errors are returned to the tracer, which logs them
//!
//! # Design Decisions
//! - Reporting sits behind the `SpanReporter` trait; the agent wire format is a
//!   JSON datagram per span
//! - The UDP socket is non-blocking so a slow agent never stalls a request

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

use super::span::FinishedSpan;

/// Upper bound for a single datagram sent to the agent.
const MAX_DATAGRAM_BYTES: usize = 65_000;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("span transport failed: {0}")]
    Transport(#[from] std::io::Error),

    #[error("failed to encode span: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("encoded span is {0} bytes, over the datagram limit")]
    TooLarge(usize),
}

/// Sink for finished spans.
pub trait SpanReporter: Send + Sync {
    fn report(&self, span: FinishedSpan) -> Result<(), ReportError>;

    fn flush(&self) {}
}

/// Sends spans to a tracing agent over UDP.
#[derive(Debug)]
pub struct UdpReporter {
    socket: UdpSocket,
    agent: SocketAddr,
}

impl UdpReporter {
    /// Resolve the agent address and bind an ephemeral local socket.
    pub fn connect(host: &str, port: u16) -> std::io::Result<Self> {
        let agent = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no address found for {}:{}", host, port),
            )
        })?;

        let bind: SocketAddr = if agent.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;

        tracing::debug!(agent = %agent, "Span reporter bound");
        Ok(Self { socket, agent })
    }

    pub fn agent(&self) -> SocketAddr {
        self.agent
    }
}

impl SpanReporter for UdpReporter {
    fn report(&self, span: FinishedSpan) -> Result<(), ReportError> {
        let payload = serde_json::to_vec(&span)?;
        if payload.len() > MAX_DATAGRAM_BYTES {
            return Err(ReportError::TooLarge(payload.len()));
        }
        self.socket.send_to(&payload, self.agent)?;
        Ok(())
    }
}

/// Emits finished spans as log events.
#[derive(Debug, Default)]
pub struct LogReporter;

impl SpanReporter for LogReporter {
    fn report(&self, span: FinishedSpan) -> Result<(), ReportError> {
        let tags = serde_json::to_string(&span.tags)?;
        tracing::info!(
            service = %span.service_name,
            operation = %span.operation_name,
            trace_id = %span.trace_id,
            span_id = %span.span_id,
            parent_id = ?span.parent_id.map(|p| p.to_string()),
            duration_us = span.duration_micros,
            tags = %tags,
            "Span finished"
        );
        Ok(())
    }
}

/// Keeps finished spans in memory.
#[derive(Debug, Default)]
pub struct InMemoryReporter {
    spans: Mutex<Vec<FinishedSpan>>,
}

impl InMemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> Vec<FinishedSpan> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Find the first finished span with the given operation name.
    pub fn find(&self, operation_name: &str) -> Option<FinishedSpan> {
        self.spans()
            .into_iter()
            .find(|s| s.operation_name == operation_name)
    }

    pub fn clear(&self) {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl SpanReporter for InMemoryReporter {
    fn report(&self, span: FinishedSpan) -> Result<(), ReportError> {
        self.spans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(span);
        Ok(())
    }
}
