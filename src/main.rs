use std::{process, sync::Arc};

use clap::Parser;
use tokio::net::TcpListener;

use twamp_exporter::{
    configuration::{load_modules, Configuration},
    metrics,
    prober::Prober,
    resolver::{DnsLookup, TargetResolver},
    server::{router, AppState},
    twamp::TwampClient,
};

#[tokio::main]
async fn main() {
    env_logger::init();

    let conf = Configuration::parse();

    let modules = match load_modules(&conf.config_file) {
        Ok(modules) => modules,
        Err(e) => {
            log::error!("failed to load configuration: {}", e);
            process::exit(1);
        }
    };
    if modules.is_empty() {
        log::warn!(
            "{} defines no modules, every probe will be rejected",
            conf.config_file.display()
        );
    }

    let handle = match metrics::init() {
        Ok(handle) => Some(handle),
        Err(e) => {
            log::warn!("process metrics disabled: {}", e);
            None
        }
    };

    let lookup = match DnsLookup::from_system_conf() {
        Ok(lookup) => lookup,
        Err(e) => {
            log::error!("cannot read system resolver configuration: {}", e);
            process::exit(1);
        }
    };

    let state = AppState {
        modules: Arc::new(modules),
        prober: Prober::new(
            TargetResolver::new(Arc::new(lookup)),
            Arc::new(TwampClient::new()),
        ),
        metrics: handle,
    };

    let listener = match TcpListener::bind(&conf.listen_address).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("cannot listen on {}: {}", conf.listen_address, e);
            process::exit(1);
        }
    };
    log::info!("Listening on {}", conf.listen_address);

    if let Err(e) = axum::serve(listener, router(state)).await {
        log::error!("server error: {}", e);
        process::exit(1);
    }
}
