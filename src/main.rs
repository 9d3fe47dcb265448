use configuration::RuntimeConfig;
use error::Error;
use forwarder::Forwarder;
use health::Prober;
use listeners::Http;
use load_balancing::{path_hash::PathHash, Router};
use log::{info, warn};
use registry::AvailabilityRegistry;
use server::SharedData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod configuration;
mod error;
mod error_response;
mod forwarder;
mod health;
mod http_client;
mod listeners;
mod load_balancing;
mod logging;
mod registry;
mod server;
#[cfg(test)]
mod test_utils;

#[tokio::main]
pub async fn main() -> Result<(), Error> {
  let _handle = logging::initialize()?;

  let config = match RuntimeConfig::from_args(std::env::args_os()) {
    Ok(config) => config,
    Err(Error::Cli(e)) => e.exit(),
    Err(e) => return Err(e),
  };
  config.log_summary();

  let client = http_client::build(config.timeout);
  let registry = Arc::new(AvailabilityRegistry::new(config.backends.clone()));
  let shutdown = CancellationToken::new();

  let prober = Prober::new(client.clone(), config.scheme, config.timeout, config.health.clone());
  let health_checks = health::spawn_health_checks(prober, registry.clone(), shutdown.clone());

  let shared_data = Arc::new(SharedData {
    router: Router::new(registry, Box::new(PathHash::new())),
    forwarder: Forwarder::new(client, config.scheme, config.timeout, config.trace),
  });

  let listener = Http::bind(config.port).await?;
  info!("Starting load balancer on port {}...", config.port);
  tokio::spawn(cancel_on_termination_signal(shutdown.clone()));
  let served = server::create(Http::produce_acceptor(listener), shared_data, shutdown.clone()).await;

  shutdown.cancel();
  for health_check in health_checks {
    if let Err(e) = health_check.await {
      warn!("Health check task ended abnormally: {}", e);
    }
  }
  info!("Load balancer stopped");
  served.map_err(Error::from)
}

async fn cancel_on_termination_signal(shutdown: CancellationToken) {
  wait_for_termination_signal().await;
  info!("Received termination signal");
  shutdown.cancel();
}

#[cfg(unix)]
async fn wait_for_termination_signal() {
  use tokio::signal::unix::{signal, SignalKind};

  let mut terminate = match signal(SignalKind::terminate()) {
    Ok(terminate) => terminate,
    Err(e) => {
      warn!("Cannot listen for SIGTERM, only Ctrl-C will stop the load balancer: {}", e);
      wait_for_ctrl_c().await;
      return;
    }
  };

  tokio::select! {
    _ = wait_for_ctrl_c() => {}
    _ = terminate.recv() => {}
  }
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() {
  wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!("Cannot listen for Ctrl-C: {}", e);
    std::future::pending::<()>().await;
  }
}
