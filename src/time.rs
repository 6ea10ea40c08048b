//! NTP timestamp conversions used on the TWAMP wire.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Seconds between the NTP era start (1900) and the Unix epoch.
const NTP_UNIX_OFFSET: i64 = 2208988800;

/// Current time as a 64-bit NTP timestamp.
///
/// ```
/// use twamp_exporter::time::{from_ntp, ntp_now};
/// let now = ntp_now();
/// println!("Timestamp is {}", from_ntp(now));
/// ```
pub fn ntp_now() -> u64 {
    to_ntp(Utc::now())
}

/// Converts a UTC date to the 32.32 fixed point NTP format.
pub fn to_ntp(date: DateTime<Utc>) -> u64 {
    let secs = (date.timestamp() + NTP_UNIX_OFFSET) as u32;
    let fraction = ((date.timestamp_subsec_nanos() as u64) << 32) / 1_000_000_000;

    ((secs as u64) << 32) | fraction
}

/// Converts a 32.32 fixed point NTP timestamp to a UTC date.
pub fn from_ntp(timestamp: u64) -> DateTime<Utc> {
    let secs = (timestamp >> 32) as i64 - NTP_UNIX_OFFSET;
    let nanos = ((timestamp & 0xFFFF_FFFF) * 1_000_000_000) >> 32;
    DateTime::<Utc>::from_timestamp(secs, nanos as u32).unwrap_or_default()
}

/// Encodes a duration in the 32.32 fixed point format of TWAMP-Control fields.
pub fn ntp_duration(duration: Duration) -> u64 {
    let secs = duration.as_secs().min(u32::MAX as u64);
    let fraction = ((duration.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (secs << 32) | fraction
}
