//! Measurement session capability used by the prober.
//!
//! A [`Transport`] opens a control [`Connection`] to the target, the connection
//! negotiates a test [`Session`], and the session hands out a [`TestRun`] that
//! performs the timestamp exchanges. Release is explicit: [`Session::stop`] and
//! [`Connection::close`] are awaited by the caller on every exit path.

use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;

use crate::{
    resolver::IpVersion,
    stats::{RoundTripSummary, Sample},
};

/// Parameters of one test session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Local UDP port test packets are sent from.
    pub sender_port: u16,
    /// Requested UDP port of the reflector.
    pub receiver_port: u16,
    /// Wait for each reply and for the reflector to give up on the session.
    pub timeout: Duration,
    /// Zero bytes appended to every test packet.
    pub padding: u32,
    pub tos: u8,
    /// Address family of the session, which is that of the resolved target.
    pub ip_version: IpVersion,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connection to {addr} failed: {reason}")]
    ConnectFailed { addr: SocketAddr, reason: String },
    #[error("failed to create session: {0}")]
    SessionFailed(String),
    #[error("failed to create test: {0}")]
    TestCreateFailed(String),
}

/// Opens control connections.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        addr: SocketAddr,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, SessionError>;
}

/// An established control connection.
#[async_trait]
pub trait Connection: Send {
    async fn create_session(
        &mut self,
        config: SessionConfig,
    ) -> Result<Box<dyn Session>, SessionError>;

    /// Closes the connection. Errors are logged, not returned.
    async fn close(&mut self);
}

/// An accepted test session.
#[async_trait]
pub trait Session: Send {
    async fn create_test(&mut self) -> Result<Box<dyn TestRun>, SessionError>;

    /// Stops the session on the server. Errors are logged, not returned.
    async fn stop(&mut self);
}

/// Performs the test exchanges of a session.
#[async_trait]
pub trait TestRun: Send {
    /// Runs `count` exchanges one after the other, calling `on_sample` for
    /// every reply received. Lost exchanges produce no sample.
    async fn run(
        &mut self,
        count: u32,
        on_sample: &mut (dyn FnMut(Sample) + Send),
    ) -> RoundTripSummary;
}
