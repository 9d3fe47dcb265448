use crate::{
  configuration::{HealthConfig, Scheme},
  error::Error,
  http_client::BackendClient,
  registry::AvailabilityRegistry,
};
use hyper::{StatusCode, Uri};
use log::{debug, info};
use std::{sync::Arc, time::Duration};
use tokio::{
  task::JoinHandle,
  time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Prober {
  client: BackendClient,
  scheme: Scheme,
  timeout: Duration,
  config: HealthConfig,
}

impl Prober {
  pub fn new(client: BackendClient, scheme: Scheme, timeout: Duration, config: HealthConfig) -> Prober {
    Prober {
      client,
      scheme,
      timeout,
      config,
    }
  }

  /// A backend is healthy iff its health endpoint answers with exactly 200 within the timeout.
  pub async fn probe(&self, backend: &str) -> Result<(), Error> {
    let uri = Uri::builder()
      .scheme(self.scheme.as_str())
      .authority(backend)
      .path_and_query(self.config.path.as_str())
      .build()?;

    match time::timeout(self.timeout, self.client.get(uri)).await {
      Ok(Ok(response)) if response.status() == StatusCode::OK => Ok(()),
      Ok(Ok(response)) => Err(Error::ProbeBadStatus {
        backend: backend.to_string(),
        status: response.status(),
      }),
      Ok(Err(source)) => Err(Error::ProbeTransport {
        backend: backend.to_string(),
        source,
      }),
      Err(_) => Err(Error::ProbeTimeout {
        backend: backend.to_string(),
        timeout: self.timeout,
      }),
    }
  }
}

/// Starts one probe loop per configured backend. The loops run until `shutdown` fires.
pub fn spawn_health_checks(
  prober: Prober,
  registry: Arc<AvailabilityRegistry>,
  shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
  registry
    .configured()
    .iter()
    .map(|backend| {
      tokio::spawn(watch_health(
        prober.clone(),
        backend.clone(),
        registry.clone(),
        shutdown.clone(),
      ))
    })
    .collect()
}

/// Probes `backend` right away and then once per interval, keeping its registry membership in
/// line with the latest outcome.
pub async fn watch_health(
  prober: Prober,
  backend: String,
  registry: Arc<AvailabilityRegistry>,
  shutdown: CancellationToken,
) {
  let mut interval_timer = time::interval(prober.config.interval);
  interval_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      _ = shutdown.cancelled() => break,
      _ = interval_timer.tick() => {}
    }

    let result = tokio::select! {
      _ = shutdown.cancelled() => break,
      result = prober.probe(&backend) => result,
    };
    apply_probe_result(&registry, &backend, result);
  }
  debug!("stopped health checks for {}", backend);
}

fn apply_probe_result(registry: &AvailabilityRegistry, backend: &str, result: Result<(), Error>) {
  match result {
    Ok(()) => {
      if registry.mark_healthy(backend) {
        info!("new healthiness for {}: healthy", backend);
      }
    }
    Err(error) => {
      debug!("{}", error);
      if registry.mark_unhealthy(backend) {
        info!("new healthiness for {}: unhealthy ({})", backend, error);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    http_client,
    test_utils::{eventually, spawn_backend, unused_address},
  };
  use hyper::{header::LOCATION, Body, Response};
  use std::sync::atomic::{AtomicU16, Ordering};
  use tokio_test::{assert_err, assert_ok};

  fn prober(timeout: Duration, interval: Duration) -> Prober {
    Prober::new(
      http_client::build(timeout),
      Scheme::HTTP,
      timeout,
      HealthConfig {
        interval,
        path: "/health".into(),
      },
    )
  }

  fn status_backend(status: Arc<AtomicU16>) -> String {
    spawn_backend(move |request| {
      let status = status.clone();
      async move {
        let status = if request.uri().path() == "/health" {
          StatusCode::from_u16(status.load(Ordering::SeqCst)).unwrap()
        } else {
          StatusCode::NOT_FOUND
        };
        Response::builder().status(status).body(Body::empty()).unwrap()
      }
    })
    .to_string()
  }

  #[tokio::test]
  async fn probe_healthy_backend() {
    let backend = status_backend(Arc::new(AtomicU16::new(200)));

    assert_ok!(prober(Duration::from_secs(1), Duration::from_secs(10)).probe(&backend).await);
  }

  #[tokio::test]
  async fn probe_non_200_is_unhealthy() {
    let backend = status_backend(Arc::new(AtomicU16::new(204)));

    let error = assert_err!(prober(Duration::from_secs(1), Duration::from_secs(10)).probe(&backend).await);
    assert!(matches!(error, Error::ProbeBadStatus { status, .. } if status == StatusCode::NO_CONTENT));
  }

  #[tokio::test]
  async fn probe_redirect_is_unhealthy() {
    let backend = spawn_backend(|_request| async {
      Response::builder()
        .status(StatusCode::MOVED_PERMANENTLY)
        .header(LOCATION, "/elsewhere")
        .body(Body::empty())
        .unwrap()
    })
    .to_string();

    let error = assert_err!(prober(Duration::from_secs(1), Duration::from_secs(10)).probe(&backend).await);
    assert!(matches!(error, Error::ProbeBadStatus { .. }));
  }

  #[tokio::test]
  async fn probe_unreachable_backend() {
    let backend = unused_address().to_string();

    let error = assert_err!(prober(Duration::from_secs(1), Duration::from_secs(10)).probe(&backend).await);
    assert!(matches!(error, Error::ProbeTransport { .. }));
  }

  #[tokio::test]
  async fn probe_slow_backend_times_out() {
    let backend = spawn_backend(|_request| async {
      tokio::time::sleep(Duration::from_secs(2)).await;
      Response::new(Body::empty())
    })
    .to_string();

    let error = assert_err!(prober(Duration::from_millis(100), Duration::from_secs(10)).probe(&backend).await);
    assert!(matches!(error, Error::ProbeTimeout { .. }));
  }

  #[tokio::test]
  async fn probe_uses_configured_path() {
    let backend = spawn_backend(|request| async move {
      let status = if request.uri().path() == "/ready" {
        StatusCode::OK
      } else {
        StatusCode::NOT_FOUND
      };
      Response::builder().status(status).body(Body::empty()).unwrap()
    })
    .to_string();
    let timeout = Duration::from_secs(1);
    let prober = Prober::new(
      http_client::build(timeout),
      Scheme::HTTP,
      timeout,
      HealthConfig {
        interval: Duration::from_secs(10),
        path: "/ready".into(),
      },
    );

    assert_ok!(prober.probe(&backend).await);
  }

  #[test]
  fn repeated_outcomes_are_idempotent() {
    let registry = AvailabilityRegistry::new(vec!["server1:8080".into(), "server2:8080".into()]);
    let failure = || {
      Err(Error::ProbeBadStatus {
        backend: "server1:8080".into(),
        status: StatusCode::INTERNAL_SERVER_ERROR,
      })
    };

    apply_probe_result(&registry, "server1:8080", failure());
    apply_probe_result(&registry, "server1:8080", failure());
    assert_eq!(registry.snapshot().as_slice(), &["server2:8080".to_string()]);

    apply_probe_result(&registry, "server1:8080", Ok(()));
    apply_probe_result(&registry, "server1:8080", Ok(()));
    assert_eq!(
      registry.snapshot().as_slice(),
      &["server2:8080".to_string(), "server1:8080".to_string()]
    );
  }

  #[tokio::test]
  async fn flapping_backend_is_removed_and_readmitted() {
    let status = Arc::new(AtomicU16::new(200));
    let backend = status_backend(status.clone());
    let registry = Arc::new(AvailabilityRegistry::new(vec![backend.clone()]));
    let shutdown = CancellationToken::new();

    let handles = spawn_health_checks(
      prober(Duration::from_secs(1), Duration::from_millis(20)),
      registry.clone(),
      shutdown.clone(),
    );

    status.store(500, Ordering::SeqCst);
    eventually(|| !registry.snapshot().contains(&backend)).await;

    status.store(200, Ordering::SeqCst);
    eventually(|| registry.snapshot().contains(&backend)).await;
    assert_eq!(registry.snapshot().len(), 1);

    shutdown.cancel();
    for handle in handles {
      handle.await.unwrap();
    }
  }

  #[tokio::test]
  async fn first_probe_runs_immediately() {
    let backend = unused_address().to_string();
    let registry = Arc::new(AvailabilityRegistry::new(vec![backend.clone()]));
    let shutdown = CancellationToken::new();

    let handles = spawn_health_checks(
      prober(Duration::from_secs(1), Duration::from_secs(3600)),
      registry.clone(),
      shutdown.clone(),
    );

    eventually(|| registry.snapshot().is_empty()).await;
    shutdown.cancel();
    for handle in handles {
      handle.await.unwrap();
    }
  }

  #[tokio::test]
  async fn cancellation_stops_a_pending_probe() {
    let backend = spawn_backend(|_request| async {
      tokio::time::sleep(Duration::from_secs(30)).await;
      Response::new(Body::empty())
    })
    .to_string();
    let registry = Arc::new(AvailabilityRegistry::new(vec![backend]));
    let shutdown = CancellationToken::new();

    let handles = spawn_health_checks(
      prober(Duration::from_secs(30), Duration::from_secs(3600)),
      registry.clone(),
      shutdown.clone(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.cancel();

    for handle in handles {
      assert_ok!(time::timeout(Duration::from_secs(1), handle).await).unwrap();
    }
    assert_eq!(registry.snapshot().len(), 1);
  }
}
