//! TWAMP-Control messages (RFC 5357 Section 3, RFC 4656 Section 3).
//!
//! Only the unauthenticated mode is implemented, so every HMAC, key and IV
//! field is sent as zeros and ignored on receipt.

use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

/// Unauthenticated mode bit of the Modes field.
pub const MODE_UNAUTHENTICATED: u32 = 1;

const CMD_START_SESSIONS: u8 = 2;
const CMD_STOP_SESSIONS: u8 = 3;
const CMD_REQUEST_TW_SESSION: u8 = 5;

pub const SERVER_GREETING_SIZE: usize = 64;
pub const SETUP_RESPONSE_SIZE: usize = 164;
pub const SERVER_START_SIZE: usize = 48;
pub const REQUEST_SESSION_SIZE: usize = 112;
pub const ACCEPT_SESSION_SIZE: usize = 48;
pub const START_SESSIONS_SIZE: usize = 32;
pub const START_ACK_SIZE: usize = 32;
pub const STOP_SESSIONS_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("control channel I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("control channel timed out")]
    Timeout,
    #[error("server supports no unauthenticated mode (modes {0:#x})")]
    UnsupportedModes(u32),
    #[error("{stage} rejected: {}", accept_reason(*code))]
    Rejected { stage: &'static str, code: u8 },
    #[error("malformed message: {0}")]
    Malformed(&'static str),
}

/// Meaning of an Accept field value (RFC 4656 Section 3.3).
pub fn accept_reason(code: u8) -> &'static str {
    match code {
        0 => "ok",
        1 => "failure, reason unspecified",
        2 => "internal error",
        3 => "some aspect of request is not supported",
        4 => "cannot perform request due to permanent resource limitations",
        5 => "cannot perform request due to temporary resource limitations",
        _ => "unknown accept code",
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(bytes)
}

fn read_16(buf: &[u8], at: usize) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&buf[at..at + 16]);
    bytes
}

fn check_len(buf: &[u8], size: usize, what: &'static str) -> Result<(), &'static str> {
    if buf.len() < size {
        return Err(what);
    }
    Ok(())
}

/// First message of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerGreeting {
    pub modes: u32,
    pub challenge: [u8; 16],
    pub salt: [u8; 16],
    pub count: u32,
}

impl ServerGreeting {
    pub fn to_bytes(&self) -> [u8; SERVER_GREETING_SIZE] {
        let mut buf = [0u8; SERVER_GREETING_SIZE];
        buf[12..16].copy_from_slice(&self.modes.to_be_bytes());
        buf[16..32].copy_from_slice(&self.challenge);
        buf[32..48].copy_from_slice(&self.salt);
        buf[48..52].copy_from_slice(&self.count.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, &'static str> {
        check_len(buf, SERVER_GREETING_SIZE, "Buffer too small for ServerGreeting")?;
        Ok(Self {
            modes: read_u32(buf, 12),
            challenge: read_16(buf, 16),
            salt: read_16(buf, 32),
            count: read_u32(buf, 48),
        })
    }
}

/// Client answer to the greeting, selecting a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetUpResponse {
    pub mode: u32,
}

impl SetUpResponse {
    pub fn to_bytes(&self) -> [u8; SETUP_RESPONSE_SIZE] {
        let mut buf = [0u8; SETUP_RESPONSE_SIZE];
        buf[0..4].copy_from_slice(&self.mode.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, &'static str> {
        check_len(buf, SETUP_RESPONSE_SIZE, "Buffer too small for SetUpResponse")?;
        Ok(Self {
            mode: read_u32(buf, 0),
        })
    }
}

/// Server acknowledgement of the set-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerStart {
    pub accept: u8,
    pub start_time: u64,
}

impl ServerStart {
    pub fn to_bytes(&self) -> [u8; SERVER_START_SIZE] {
        let mut buf = [0u8; SERVER_START_SIZE];
        buf[15] = self.accept;
        buf[32..40].copy_from_slice(&self.start_time.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, &'static str> {
        check_len(buf, SERVER_START_SIZE, "Buffer too small for ServerStart")?;
        Ok(Self {
            accept: buf[15],
            start_time: read_u64(buf, 32),
        })
    }
}

/// Request-TW-Session command.
///
/// Sender and receiver addresses are left zero, which tells the server to use
/// the addresses of the control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTwSession {
    /// 4 or 6.
    pub ip_version: u8,
    pub sender_port: u16,
    pub receiver_port: u16,
    pub padding_length: u32,
    /// NTP timestamp of the earliest session start.
    pub start_time: u64,
    /// NTP-format duration the reflector keeps the session after Stop-Sessions.
    pub timeout: u64,
    pub type_p: u32,
}

impl RequestTwSession {
    pub fn to_bytes(&self) -> [u8; REQUEST_SESSION_SIZE] {
        let mut buf = [0u8; REQUEST_SESSION_SIZE];
        buf[0] = CMD_REQUEST_TW_SESSION;
        buf[1] = self.ip_version & 0x0F;
        buf[12..14].copy_from_slice(&self.sender_port.to_be_bytes());
        buf[14..16].copy_from_slice(&self.receiver_port.to_be_bytes());
        buf[64..68].copy_from_slice(&self.padding_length.to_be_bytes());
        buf[68..76].copy_from_slice(&self.start_time.to_be_bytes());
        buf[76..84].copy_from_slice(&self.timeout.to_be_bytes());
        buf[84..88].copy_from_slice(&self.type_p.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, &'static str> {
        check_len(buf, REQUEST_SESSION_SIZE, "Buffer too small for RequestTwSession")?;
        if buf[0] != CMD_REQUEST_TW_SESSION {
            return Err("Not a Request-TW-Session command");
        }
        Ok(Self {
            ip_version: buf[1] & 0x0F,
            sender_port: read_u16(buf, 12),
            receiver_port: read_u16(buf, 14),
            padding_length: read_u32(buf, 64),
            start_time: read_u64(buf, 68),
            timeout: read_u64(buf, 76),
            type_p: read_u32(buf, 84),
        })
    }
}

/// Server answer to Request-TW-Session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptSession {
    pub accept: u8,
    /// Reflector UDP port to send test packets to.
    pub port: u16,
    pub sid: [u8; 16],
}

impl AcceptSession {
    pub fn to_bytes(&self) -> [u8; ACCEPT_SESSION_SIZE] {
        let mut buf = [0u8; ACCEPT_SESSION_SIZE];
        buf[0] = self.accept;
        buf[2..4].copy_from_slice(&self.port.to_be_bytes());
        buf[4..20].copy_from_slice(&self.sid);
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, &'static str> {
        check_len(buf, ACCEPT_SESSION_SIZE, "Buffer too small for AcceptSession")?;
        Ok(Self {
            accept: buf[0],
            port: read_u16(buf, 2),
            sid: read_16(buf, 4),
        })
    }
}

/// Start-Sessions command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartSessions;

impl StartSessions {
    pub fn to_bytes(&self) -> [u8; START_SESSIONS_SIZE] {
        let mut buf = [0u8; START_SESSIONS_SIZE];
        buf[0] = CMD_START_SESSIONS;
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, &'static str> {
        check_len(buf, START_SESSIONS_SIZE, "Buffer too small for StartSessions")?;
        if buf[0] != CMD_START_SESSIONS {
            return Err("Not a Start-Sessions command");
        }
        Ok(StartSessions)
    }
}

/// Server answer to Start-Sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartAck {
    pub accept: u8,
}

impl StartAck {
    pub fn to_bytes(&self) -> [u8; START_ACK_SIZE] {
        let mut buf = [0u8; START_ACK_SIZE];
        buf[0] = self.accept;
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, &'static str> {
        check_len(buf, START_ACK_SIZE, "Buffer too small for StartAck")?;
        Ok(Self { accept: buf[0] })
    }
}

/// Stop-Sessions command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSessions {
    pub accept: u8,
    pub number_of_sessions: u32,
}

impl StopSessions {
    pub fn to_bytes(&self) -> [u8; STOP_SESSIONS_SIZE] {
        let mut buf = [0u8; STOP_SESSIONS_SIZE];
        buf[0] = CMD_STOP_SESSIONS;
        buf[1] = self.accept;
        buf[4..8].copy_from_slice(&self.number_of_sessions.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, &'static str> {
        check_len(buf, STOP_SESSIONS_SIZE, "Buffer too small for StopSessions")?;
        if buf[0] != CMD_STOP_SESSIONS {
            return Err("Not a Stop-Sessions command");
        }
        Ok(Self {
            accept: buf[1],
            number_of_sessions: read_u32(buf, 4),
        })
    }
}

/// TCP control connection with a per-message deadline.
pub struct ControlChannel {
    stream: TcpStream,
    timeout: Duration,
}

impl ControlChannel {
    pub fn new(stream: TcpStream, timeout: Duration) -> Self {
        ControlChannel { stream, timeout }
    }

    pub async fn send(&mut self, message: &[u8]) -> Result<(), ControlError> {
        timeout(self.timeout, self.stream.write_all(message))
            .await
            .map_err(|_| ControlError::Timeout)??;
        Ok(())
    }

    /// Reads exactly one message of `N` bytes.
    pub async fn receive<const N: usize>(&mut self) -> Result<[u8; N], ControlError> {
        let mut buf = [0u8; N];
        timeout(self.timeout, self.stream.read_exact(&mut buf))
            .await
            .map_err(|_| ControlError::Timeout)??;
        Ok(buf)
    }

    /// Runs the greeting / set-up / server-start exchange.
    pub async fn handshake(&mut self) -> Result<(), ControlError> {
        let greeting = self.receive::<SERVER_GREETING_SIZE>().await?;
        let greeting = ServerGreeting::from_bytes(&greeting).map_err(ControlError::Malformed)?;
        if greeting.modes & MODE_UNAUTHENTICATED == 0 {
            return Err(ControlError::UnsupportedModes(greeting.modes));
        }

        let response = SetUpResponse {
            mode: MODE_UNAUTHENTICATED,
        };
        self.send(&response.to_bytes()).await?;

        let start = self.receive::<SERVER_START_SIZE>().await?;
        let start = ServerStart::from_bytes(&start).map_err(ControlError::Malformed)?;
        if start.accept != 0 {
            return Err(ControlError::Rejected {
                stage: "set-up",
                code: start.accept,
            });
        }
        Ok(())
    }

    pub async fn request_session(
        &mut self,
        request: &RequestTwSession,
    ) -> Result<AcceptSession, ControlError> {
        self.send(&request.to_bytes()).await?;
        let accept = self.receive::<ACCEPT_SESSION_SIZE>().await?;
        let accept = AcceptSession::from_bytes(&accept).map_err(ControlError::Malformed)?;
        if accept.accept != 0 {
            return Err(ControlError::Rejected {
                stage: "session request",
                code: accept.accept,
            });
        }
        Ok(accept)
    }

    pub async fn start_sessions(&mut self) -> Result<(), ControlError> {
        self.send(&StartSessions.to_bytes()).await?;
        let ack = self.receive::<START_ACK_SIZE>().await?;
        let ack = StartAck::from_bytes(&ack).map_err(ControlError::Malformed)?;
        if ack.accept != 0 {
            return Err(ControlError::Rejected {
                stage: "session start",
                code: ack.accept,
            });
        }
        Ok(())
    }

    pub async fn stop_sessions(&mut self, number_of_sessions: u32) -> Result<(), ControlError> {
        let stop = StopSessions {
            accept: 0,
            number_of_sessions,
        };
        self.send(&stop.to_bytes()).await
    }

    pub async fn shutdown(&mut self) -> Result<(), ControlError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
