//! TWAMP-Test packets in unauthenticated mode (RFC 5357 Section 4.1.2).
//!
//! Both packets carry trailing padding. The sender decides the padding length,
//! the reflector usually answers with a packet of the same size.

/// Size of a sender test packet without padding.
pub const SENDER_BASE_SIZE: usize = 14;

/// Size of a reflected test packet without padding.
pub const REFLECTED_BASE_SIZE: usize = 41;

/// Largest UDP payload over IPv4.
const MAX_UDP_PAYLOAD: usize = 65507;

/// Largest padding for which both test packets still fit in one UDP datagram.
pub const MAX_PADDING: usize = MAX_UDP_PAYLOAD - REFLECTED_BASE_SIZE;

/// Error estimate of an unsynchronized clock: S=0, Z=0, scale 0, multiplier 1.
pub const ERROR_ESTIMATE_UNSYNCHRONIZED: u16 = 0x0001;

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

/// Test packet sent by the Session-Sender.
///
/// Wire format:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Sequence Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Timestamp                            |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        Error Estimate         |                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               |
/// .                         Packet Padding                        .
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TestPacket {
    pub sequence_number: u32,
    /// NTP timestamp taken right before sending.
    pub timestamp: u64,
    pub error_estimate: u16,
}

impl TestPacket {
    /// Serializes the packet followed by `padding` zero bytes.
    pub fn to_bytes(&self, padding: usize) -> Vec<u8> {
        let mut buf = vec![0u8; SENDER_BASE_SIZE + padding];
        buf[0..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..12].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[12..14].copy_from_slice(&self.error_estimate.to_be_bytes());
        buf
    }

    /// Deserializes a packet, ignoring any padding.
    ///
    /// # Errors
    /// Returns an error if the buffer is smaller than 14 bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, &'static str> {
        if buf.len() < SENDER_BASE_SIZE {
            return Err("Buffer too small for TestPacket");
        }
        Ok(Self {
            sequence_number: read_u32(buf, 0),
            timestamp: read_u64(buf, 4),
            error_estimate: read_u16(buf, 12),
        })
    }
}

/// Test packet sent back by the Session-Reflector.
///
/// Wire format:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        Sequence Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Timestamp                            |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        Error Estimate         |           MBZ                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          Receive Timestamp                    |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 Sender Sequence Number                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      Sender Timestamp                         |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Sender Error Estimate    |           MBZ                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Sender TTL   |                                               |
/// +-+-+-+-+-+-+-+-+                                               |
/// .                         Packet Padding                        .
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReflectedTestPacket {
    /// Reflector's own sequence number.
    pub sequence_number: u32,
    /// NTP timestamp when the reflector sent the reply.
    pub timestamp: u64,
    pub error_estimate: u16,
    /// NTP timestamp when the reflector received the test packet.
    pub receive_timestamp: u64,
    pub sess_sender_seq_number: u32,
    pub sess_sender_timestamp: u64,
    pub sess_sender_err_estimate: u16,
    pub sess_sender_ttl: u8,
}

impl ReflectedTestPacket {
    /// Builds the reply to `packet` as a reflector would.
    pub fn answer(
        packet: &TestPacket,
        sequence_number: u32,
        receive_timestamp: u64,
        timestamp: u64,
        ttl: u8,
    ) -> Self {
        ReflectedTestPacket {
            sequence_number,
            timestamp,
            error_estimate: ERROR_ESTIMATE_UNSYNCHRONIZED,
            receive_timestamp,
            sess_sender_seq_number: packet.sequence_number,
            sess_sender_timestamp: packet.timestamp,
            sess_sender_err_estimate: packet.error_estimate,
            sess_sender_ttl: ttl,
        }
    }

    /// Serializes the packet followed by `padding` zero bytes.
    pub fn to_bytes(&self, padding: usize) -> Vec<u8> {
        let mut buf = vec![0u8; REFLECTED_BASE_SIZE + padding];
        buf[0..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..12].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[12..14].copy_from_slice(&self.error_estimate.to_be_bytes());
        buf[16..24].copy_from_slice(&self.receive_timestamp.to_be_bytes());
        buf[24..28].copy_from_slice(&self.sess_sender_seq_number.to_be_bytes());
        buf[28..36].copy_from_slice(&self.sess_sender_timestamp.to_be_bytes());
        buf[36..38].copy_from_slice(&self.sess_sender_err_estimate.to_be_bytes());
        buf[40] = self.sess_sender_ttl;
        buf
    }

    /// Deserializes a packet from big-endian wire format.
    ///
    /// # Errors
    /// Returns an error if the buffer is smaller than 41 bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, &'static str> {
        if buf.len() < REFLECTED_BASE_SIZE {
            return Err("Buffer too small for ReflectedTestPacket");
        }
        Ok(Self::parse(buf))
    }

    /// Deserializes a packet with zero-fill for missing bytes.
    ///
    /// Some reflectors trim the trailing TTL byte or reply shorter than the
    /// base size when no padding was requested.
    pub fn from_bytes_lenient(buf: &[u8]) -> Self {
        let mut padded = [0u8; REFLECTED_BASE_SIZE];
        let copy_len = buf.len().min(REFLECTED_BASE_SIZE);
        padded[..copy_len].copy_from_slice(&buf[..copy_len]);
        Self::parse(&padded)
    }

    fn parse(buf: &[u8]) -> Self {
        Self {
            sequence_number: read_u32(buf, 0),
            timestamp: read_u64(buf, 4),
            error_estimate: read_u16(buf, 12),
            receive_timestamp: read_u64(buf, 16),
            sess_sender_seq_number: read_u32(buf, 24),
            sess_sender_timestamp: read_u64(buf, 28),
            sess_sender_err_estimate: read_u16(buf, 36),
            sess_sender_ttl: buf[40],
        }
    }
}
