//! Probe orchestration.
//!
//! A probe walks `resolve -> connect -> create session -> create test ->
//! sample -> finalize` and stops at the first failing stage. Whatever was
//! acquired up to that point is released before returning: a created session is
//! stopped and an opened connection is closed, exactly once each.

use std::{net::SocketAddr, sync::Arc};

use crate::{
    configuration::ProbeConfiguration,
    resolver::{ResolutionError, ResolvedTarget, TargetResolver},
    session::{Connection, Session, SessionConfig, SessionError, Transport},
    stats::{LatencyAggregator, LatencyStats, Sample},
};

#[derive(Debug, thiserror::Error)]
enum ProbeError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Runs single probes against targets. Cheap to clone, safe to share.
#[derive(Clone)]
pub struct Prober {
    resolver: TargetResolver,
    transport: Arc<dyn Transport>,
}

impl Prober {
    pub fn new(resolver: TargetResolver, transport: Arc<dyn Transport>) -> Self {
        Prober {
            resolver,
            transport,
        }
    }

    /// Probes `target` with the given profile.
    ///
    /// Never fails: any error is logged and yields [`LatencyStats::failed`].
    pub async fn run(&self, config: &ProbeConfiguration, target: &str) -> LatencyStats {
        match self.try_run(config, target).await {
            Ok(stats) => {
                if stats.packets_received == 0 {
                    log::warn!(
                        "probe of [{}] received no replies ({} sent)",
                        target,
                        stats.packets_sent
                    );
                }
                stats
            }
            Err(e) => {
                log::warn!("probe of [{}] failed: {}", target, e);
                LatencyStats::failed()
            }
        }
    }

    async fn try_run(
        &self,
        config: &ProbeConfiguration,
        target: &str,
    ) -> Result<LatencyStats, ProbeError> {
        let resolved = self
            .resolver
            .resolve(
                target,
                config.ip_version(),
                config.ip.fallback,
                config.timeout(),
            )
            .await?;
        if resolved.used_fallback {
            log::info!(
                "[{}] has no {} address, using {}",
                target,
                config.ip_version(),
                resolved.address
            );
        }

        let addr = SocketAddr::new(resolved.address, config.control_port());
        log::debug!("connecting to {}", addr);
        let mut connection = self.transport.connect(addr, config.timeout()).await?;

        let result = measure(connection.as_mut(), config, &resolved).await;
        connection.close().await;
        result
    }
}

async fn measure(
    connection: &mut dyn Connection,
    config: &ProbeConfiguration,
    resolved: &ResolvedTarget,
) -> Result<LatencyStats, ProbeError> {
    let session_config = SessionConfig {
        sender_port: config.sender_port_range.select(),
        receiver_port: config.receiver_port_range.select(),
        timeout: config.timeout(),
        padding: config.sample_count(),
        tos: 0,
        ip_version: resolved.ip_version,
    };
    log::debug!("requesting session {:?}", session_config);
    let mut session = connection.create_session(session_config).await?;

    let result = sample(session.as_mut(), config.sample_count()).await;
    session.stop().await;
    result
}

async fn sample(session: &mut dyn Session, count: u32) -> Result<LatencyStats, ProbeError> {
    let mut test = session.create_test().await?;

    let mut aggregator = LatencyAggregator::new(count);
    let round_trip = test
        .run(count, &mut |sample: Sample| aggregator.observe(&sample))
        .await;
    log::debug!(
        "test finished, {}/{} replies",
        round_trip.packets_received,
        round_trip.packets_sent
    );
    Ok(aggregator.finish(&round_trip))
}
