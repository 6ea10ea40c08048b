//! Command-line flags and probe profiles.
//!
//! Profiles are read from a YAML mapping of module name to [`ProbeConfiguration`].
//! Every profile starts from [`ProbeConfiguration::default`], the fields present
//! in the document overlay those defaults, and the result is validated before it
//! is ever handed to the prober. A single invalid profile fails the whole load.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::Deserialize;

use crate::{packets::MAX_PADDING, resolver::IpVersion};

/// Lowest valid TCP/UDP port.
pub const PORT_MIN: i32 = 1;
/// Highest valid TCP/UDP port.
pub const PORT_MAX: i32 = 65535;

/// Largest sample count. The count is also the test packet padding length.
pub const MAX_COUNT: i64 = MAX_PADDING as i64;

/// Well-known TWAMP-Control port (RFC 5357).
pub const DEFAULT_CONTROL_PORT: i32 = 862;

/// Exporter command-line flags.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Configuration {
    /// Path to the probe profile file
    #[arg(long = "config.file", default_value = "config.yaml")]
    pub config_file: PathBuf,
    /// Listening address and port
    #[arg(long = "web.listen-address", default_value = "localhost:2112")]
    pub listen_address: String,
}

/// Validation failure of a single profile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A port lies outside `[1, 65535]`.
    #[error("the value of [{field}] must be between 1 and 65535, got {value}")]
    OutOfBounds { field: &'static str, value: i32 },
    /// A port range starts after it ends.
    #[error("the start of the port range ({from}) is greater than the end ({to})")]
    InvertedRange { from: i32, to: i32 },
    /// Sample count is not positive or too large to be the padding length.
    #[error("the value of [count] must be between 1 and {max}, got {0}", max = MAX_COUNT)]
    InvalidCount(i64),
    /// Timeout is not a positive number of seconds.
    #[error("the value of [timeout] must be a positive integer, got {0}")]
    InvalidTimeout(i64),
    /// IP version is neither 4 nor 6.
    #[error("the value of [ip.version] must be 4 or 6, got {0}")]
    InvalidIpVersion(i32),
}

/// Failure to load the profile file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("module [{module}] is invalid: {source}")]
    Invalid {
        module: String,
        #[source]
        source: ConfigError,
    },
}

/// Closed interval of UDP ports used for test sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortRange {
    pub from: i32,
    pub to: i32,
}

impl Default for PortRange {
    fn default() -> Self {
        PortRange {
            from: 19000,
            to: 20000,
        }
    }
}

impl PortRange {
    pub fn new(from: i32, to: i32) -> Self {
        PortRange { from, to }
    }

    /// Picks a port from the range.
    ///
    /// Returns `from` for a single-port range, otherwise a uniformly chosen
    /// port from `[from, to]`, both ends included. The range must have passed
    /// [`PortRange::validate`].
    pub fn select(&self) -> u16 {
        debug_assert!(self.validate().is_ok());
        if self.from == self.to {
            return self.from as u16;
        }
        rand::random_range(self.from..=self.to) as u16
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_port("port range from", self.from)?;
        check_port("port range to", self.to)?;
        if self.from > self.to {
            return Err(ConfigError::InvertedRange {
                from: self.from,
                to: self.to,
            });
        }
        Ok(())
    }
}

fn check_port(field: &'static str, value: i32) -> Result<(), ConfigError> {
    if !(PORT_MIN..=PORT_MAX).contains(&value) {
        return Err(ConfigError::OutOfBounds { field, value });
    }
    Ok(())
}

/// Address family preference of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpProtocol {
    pub version: i32,
    /// Allow the other address family when the preferred one cannot be resolved.
    pub fallback: bool,
}

impl Default for IpProtocol {
    fn default() -> Self {
        IpProtocol {
            version: 6,
            fallback: true,
        }
    }
}

/// Parameters of one probe module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ProbeConfiguration {
    /// TWAMP-Control TCP port of the target.
    pub control_port: i32,
    pub sender_port_range: PortRange,
    pub receiver_port_range: PortRange,
    /// Number of test packets per probe. Also used as the test packet padding length.
    pub count: i64,
    /// Seconds allowed for name resolution and for each test exchange.
    pub timeout: i64,
    pub ip: IpProtocol,
}

impl Default for ProbeConfiguration {
    fn default() -> Self {
        ProbeConfiguration {
            control_port: DEFAULT_CONTROL_PORT,
            sender_port_range: PortRange::default(),
            receiver_port_range: PortRange::default(),
            count: 100,
            timeout: 1,
            ip: IpProtocol::default(),
        }
    }
}

impl ProbeConfiguration {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_port("controlPort", self.control_port)?;
        self.receiver_port_range.validate()?;
        self.sender_port_range.validate()?;

        if !(1..=MAX_COUNT).contains(&self.count) {
            return Err(ConfigError::InvalidCount(self.count));
        }
        if self.timeout < 1 {
            return Err(ConfigError::InvalidTimeout(self.timeout));
        }
        if self.ip.version != 4 && self.ip.version != 6 {
            return Err(ConfigError::InvalidIpVersion(self.ip.version));
        }
        Ok(())
    }

    /// Preferred address family. Meaningful only on a validated profile.
    pub fn ip_version(&self) -> IpVersion {
        if self.ip.version == 4 {
            IpVersion::V4
        } else {
            IpVersion::V6
        }
    }

    /// Number of test exchanges. Meaningful only on a validated profile.
    pub fn sample_count(&self) -> u32 {
        self.count as u32
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout as u64)
    }

    pub fn control_port(&self) -> u16 {
        self.control_port as u16
    }
}

/// Validated profiles keyed by module name.
pub type Modules = BTreeMap<String, ProbeConfiguration>;

/// Parses and validates a YAML profile document.
pub fn parse_modules(document: &str) -> Result<Modules, LoadError> {
    if document.trim().is_empty() {
        return Ok(Modules::new());
    }

    let modules: Modules = serde_yaml::from_str(document)?;
    for (name, module) in &modules {
        log::debug!("checking module [{}]", name);
        module.validate().map_err(|source| LoadError::Invalid {
            module: name.clone(),
            source,
        })?;
    }
    Ok(modules)
}

/// Reads, parses and validates the profile file at `path`.
pub fn load_modules(path: &Path) -> Result<Modules, LoadError> {
    log::info!("loading configuration from {}", path.display());
    let document = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_modules(&document)
}
