//! Unauthenticated TWAMP client (RFC 5357) behind the [`crate::session`]
//! traits.
//!
//! The control exchanges run over one TCP connection shared by the connection
//! and its session; test packets go over a UDP socket bound to the negotiated
//! sender port.

pub mod control;

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::{
    net::{TcpStream, UdpSocket},
    sync::Mutex,
    time::{timeout, timeout_at, Instant},
};

use crate::{
    packets::{ReflectedTestPacket, TestPacket, ERROR_ESTIMATE_UNSYNCHRONIZED},
    resolver::IpVersion,
    session::{Connection, Session, SessionConfig, SessionError, TestRun, Transport},
    stats::{RoundTripSummary, RttCollector, Sample},
    time::{from_ntp, ntp_duration, ntp_now},
};

use self::control::{ControlChannel, RequestTwSession};

/// Type-P descriptor carrying the DSCP of `tos` (RFC 4656 Section 3.5).
fn type_p(tos: u8) -> u32 {
    u32::from(tos >> 2)
}

fn unspecified(ip_version: IpVersion) -> IpAddr {
    match ip_version {
        IpVersion::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpVersion::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Opens TWAMP-Control connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwampClient;

impl TwampClient {
    pub fn new() -> Self {
        TwampClient
    }
}

#[async_trait]
impl Transport for TwampClient {
    async fn connect(
        &self,
        addr: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<Box<dyn Connection>, SessionError> {
        let failed = |reason: String| SessionError::ConnectFailed { addr, reason };

        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| failed("connect timed out".to_string()))?
            .map_err(|e| failed(e.to_string()))?;

        let mut channel = ControlChannel::new(stream, connect_timeout);
        channel.handshake().await.map_err(|e| failed(e.to_string()))?;
        log::debug!("control connection to {} established", addr);

        Ok(Box::new(TwampConnection {
            peer: addr,
            channel: Arc::new(Mutex::new(channel)),
        }))
    }
}

/// Established TWAMP-Control connection.
pub struct TwampConnection {
    peer: SocketAddr,
    channel: Arc<Mutex<ControlChannel>>,
}

#[async_trait]
impl Connection for TwampConnection {
    async fn create_session(
        &mut self,
        config: SessionConfig,
    ) -> Result<Box<dyn Session>, SessionError> {
        let request = RequestTwSession {
            ip_version: config.ip_version.number(),
            sender_port: config.sender_port,
            receiver_port: config.receiver_port,
            padding_length: config.padding,
            start_time: ntp_now(),
            timeout: ntp_duration(config.timeout),
            type_p: type_p(config.tos),
        };

        let accept = self
            .channel
            .lock()
            .await
            .request_session(&request)
            .await
            .map_err(|e| SessionError::SessionFailed(e.to_string()))?;
        log::debug!(
            "session accepted by {}, reflector port {}",
            self.peer,
            accept.port
        );

        Ok(Box::new(TwampSession {
            reflector: SocketAddr::new(self.peer.ip(), accept.port),
            config,
            channel: self.channel.clone(),
            started: false,
        }))
    }

    async fn close(&mut self) {
        if let Err(e) = self.channel.lock().await.shutdown().await {
            log::debug!("closing control connection to {}: {}", self.peer, e);
        }
    }
}

/// Session accepted by the server, not necessarily started.
pub struct TwampSession {
    reflector: SocketAddr,
    config: SessionConfig,
    channel: Arc<Mutex<ControlChannel>>,
    started: bool,
}

#[async_trait]
impl Session for TwampSession {
    async fn create_test(&mut self) -> Result<Box<dyn TestRun>, SessionError> {
        let local = SocketAddr::new(unspecified(self.config.ip_version), self.config.sender_port);
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| SessionError::TestCreateFailed(format!("bind {}: {}", local, e)))?;
        socket.connect(self.reflector).await.map_err(|e| {
            SessionError::TestCreateFailed(format!("connect {}: {}", self.reflector, e))
        })?;

        self.channel
            .lock()
            .await
            .start_sessions()
            .await
            .map_err(|e| SessionError::TestCreateFailed(e.to_string()))?;
        self.started = true;

        Ok(Box::new(TwampTest {
            socket,
            padding: self.config.padding as usize,
            timeout: self.config.timeout,
        }))
    }

    async fn stop(&mut self) {
        if !self.started {
            return;
        }
        if let Err(e) = self.channel.lock().await.stop_sessions(1).await {
            log::debug!("stopping session with {}: {}", self.reflector, e);
        }
        self.started = false;
    }
}

/// Sends test packets one at a time and waits for each reply.
pub struct TwampTest {
    socket: UdpSocket,
    padding: usize,
    timeout: Duration,
}

impl TwampTest {
    /// Waits for the reply to `sequence_number` until `deadline`.
    ///
    /// Replies to earlier packets that arrive late are skipped.
    async fn await_reply(
        &self,
        sequence_number: u32,
        deadline: Instant,
        buf: &mut [u8],
    ) -> Option<ReflectedTestPacket> {
        loop {
            match timeout_at(deadline, self.socket.recv(buf)).await {
                Ok(Ok(len)) => {
                    let reply = ReflectedTestPacket::from_bytes_lenient(&buf[..len]);
                    if reply.sess_sender_seq_number == sequence_number {
                        return Some(reply);
                    }
                    log::trace!(
                        "skipping reply to seq={} while waiting for seq={}",
                        reply.sess_sender_seq_number,
                        sequence_number
                    );
                }
                Ok(Err(e)) => {
                    log::debug!("receiving reply to seq={}: {}", sequence_number, e);
                    return None;
                }
                Err(_) => return None,
            }
        }
    }
}

#[async_trait]
impl TestRun for TwampTest {
    async fn run(
        &mut self,
        count: u32,
        on_sample: &mut (dyn FnMut(Sample) + Send),
    ) -> RoundTripSummary {
        let mut rtt = RttCollector::new();
        let mut packets_sent = 0;
        let mut buf = vec![0u8; 1024 + self.padding];

        for sequence_number in 0..count {
            let packet = TestPacket {
                sequence_number,
                timestamp: ntp_now(),
                error_estimate: ERROR_ESTIMATE_UNSYNCHRONIZED,
            };
            packets_sent += 1;
            if let Err(e) = self.socket.send(&packet.to_bytes(self.padding)).await {
                log::debug!("sending seq={}: {}", sequence_number, e);
                continue;
            }

            let deadline = Instant::now() + self.timeout;
            let Some(reply) = self.await_reply(sequence_number, deadline, &mut buf).await else {
                log::debug!("no reply to seq={}", sequence_number);
                continue;
            };

            let sample = Sample {
                sender: from_ntp(packet.timestamp),
                receive: from_ntp(reply.receive_timestamp),
                reflect: from_ntp(reply.timestamp),
                finished: Utc::now(),
            };
            rtt.record(sample.round_trip());
            on_sample(sample);
        }

        rtt.snapshot(packets_sent)
    }
}
