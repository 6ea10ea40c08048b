//! Target resolution with an optional fallback to the other address family.

use std::{
    fmt, io,
    net::IpAddr,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{timeout_at, Instant};
use trust_dns_resolver::{
    config::{LookupIpStrategy, ResolverConfig, ResolverOpts},
    system_conf, TokioAsyncResolver,
};

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// Numeric version, 4 or 6.
    pub fn number(self) -> u8 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }

    pub fn matches(self, addr: &IpAddr) -> bool {
        IpVersion::of(addr) == self
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ip{}", self.number())
    }
}

/// Address a probe is run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub address: IpAddr,
    pub ip_version: IpVersion,
    /// The address belongs to the non-preferred family.
    pub used_fallback: bool,
}

impl ResolvedTarget {
    fn new(address: IpAddr, used_fallback: bool) -> Self {
        ResolvedTarget {
            address,
            ip_version: IpVersion::of(&address),
            used_fallback,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("failed to resolve [{target}]: {reason}")]
    ResolutionFailed { target: String, reason: String },
}

impl ResolutionError {
    fn failed(target: &str, reason: impl fmt::Display) -> Self {
        ResolutionError::ResolutionFailed {
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Name lookup backend.
#[async_trait]
pub trait NameLookup: Send + Sync {
    /// Looks `host` up, restricted to `family` when one is given and
    /// returning both families otherwise.
    async fn lookup(&self, host: &str, family: Option<IpVersion>) -> io::Result<Vec<IpAddr>>;
}

/// DNS lookup through the system resolver configuration.
pub struct DnsLookup {
    v4: TokioAsyncResolver,
    v6: TokioAsyncResolver,
    any: TokioAsyncResolver,
}

impl DnsLookup {
    /// Builds resolvers from `/etc/resolv.conf` (or the platform equivalent).
    pub fn from_system_conf() -> io::Result<Self> {
        let (config, opts) =
            system_conf::read_system_conf().map_err(|e| io::Error::other(e.to_string()))?;
        Ok(Self::with_config(config, opts))
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        let build = |strategy: LookupIpStrategy| {
            TokioAsyncResolver::tokio(config.clone(), lookup_opts(&opts, strategy))
        };

        DnsLookup {
            v4: build(LookupIpStrategy::Ipv4Only),
            v6: build(LookupIpStrategy::Ipv6Only),
            any: build(LookupIpStrategy::Ipv4AndIpv6),
        }
    }
}

/// Resolver options for one lookup strategy. Caching is off so every probe
/// queries the name again.
fn lookup_opts(base: &ResolverOpts, strategy: LookupIpStrategy) -> ResolverOpts {
    let mut opts = base.clone();
    opts.ip_strategy = strategy;
    opts.cache_size = 0;
    opts
}

#[async_trait]
impl NameLookup for DnsLookup {
    async fn lookup(&self, host: &str, family: Option<IpVersion>) -> io::Result<Vec<IpAddr>> {
        let resolver = match family {
            Some(IpVersion::V4) => &self.v4,
            Some(IpVersion::V6) => &self.v6,
            None => &self.any,
        };
        let lookup = resolver.lookup_ip(host).await.map_err(io::Error::other)?;
        Ok(lookup.iter().collect())
    }
}

/// Turns a probe target into a concrete address.
#[derive(Clone)]
pub struct TargetResolver {
    lookup: Arc<dyn NameLookup>,
}

impl TargetResolver {
    pub fn new(lookup: Arc<dyn NameLookup>) -> Self {
        TargetResolver { lookup }
    }

    /// Resolves `target`, preferring addresses of the `preferred` family.
    ///
    /// A literal address is returned as is without any lookup. Otherwise a
    /// lookup restricted to `preferred` is tried first; when it fails and
    /// `fallback` is set, an unrestricted lookup follows and its first address
    /// of the preferred family wins, else its first address of the other
    /// family. The whole resolution is bounded by `timeout`.
    pub async fn resolve(
        &self,
        target: &str,
        preferred: IpVersion,
        fallback: bool,
        timeout: Duration,
    ) -> Result<ResolvedTarget, ResolutionError> {
        if let Some(address) = parse_literal(target) {
            return Ok(ResolvedTarget::new(address, false));
        }

        let deadline = Instant::now() + timeout;

        let restricted_err = match self.lookup_until(deadline, target, Some(preferred)).await {
            Ok(addrs) => match addrs.into_iter().find(|a| preferred.matches(a)) {
                Some(address) => return Ok(ResolvedTarget::new(address, false)),
                None => format!("no {} address", preferred),
            },
            Err(e) => e.to_string(),
        };

        if !fallback {
            return Err(ResolutionError::failed(target, restricted_err));
        }

        log::debug!(
            "{} lookup of [{}] failed ({}), trying any address family",
            preferred,
            target,
            restricted_err
        );

        let addrs = self
            .lookup_until(deadline, target, None)
            .await
            .map_err(|e| ResolutionError::failed(target, e))?;

        select_address(&addrs, preferred)
            .ok_or_else(|| ResolutionError::failed(target, "no addresses returned"))
    }

    async fn lookup_until(
        &self,
        deadline: Instant,
        host: &str,
        family: Option<IpVersion>,
    ) -> io::Result<Vec<IpAddr>> {
        match timeout_at(deadline, self.lookup.lookup(host, family)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "lookup timed out")),
        }
    }
}

fn parse_literal(target: &str) -> Option<IpAddr> {
    let bare = target
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or(target);
    bare.parse().ok()
}

/// First address of `preferred` family, else the first address at all.
fn select_address(addrs: &[IpAddr], preferred: IpVersion) -> Option<ResolvedTarget> {
    if let Some(address) = addrs.iter().find(|a| preferred.matches(a)) {
        return Some(ResolvedTarget::new(*address, false));
    }
    addrs
        .first()
        .map(|address| ResolvedTarget::new(*address, true))
}
