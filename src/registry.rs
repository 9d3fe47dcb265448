use arc_swap::ArcSwap;
use log::warn;
use std::sync::Arc;

/// The set of backends currently eligible for traffic.
///
/// Membership is fixed at construction, availability is not. Each mutation publishes a new
/// immutable `Vec`, so a snapshot taken by a router is never torn by a concurrent probe.
#[derive(Debug)]
pub struct AvailabilityRegistry {
  configured: Vec<String>,
  available: ArcSwap<Vec<String>>,
}

impl AvailabilityRegistry {
  /// Every configured backend starts out available, in configuration order.
  pub fn new(configured: Vec<String>) -> AvailabilityRegistry {
    let available = ArcSwap::from_pointee(configured.clone());
    AvailabilityRegistry { configured, available }
  }

  pub fn configured(&self) -> &[String] {
    &self.configured
  }

  pub fn snapshot(&self) -> Arc<Vec<String>> {
    self.available.load_full()
  }

  /// Re-admits `address` at the end of the available set. Returns `true` if it was absent.
  pub fn mark_healthy(&self, address: &str) -> bool {
    if !self.configured.iter().any(|a| a == address) {
      warn!("ignoring health update for unknown backend {}", address);
      return false;
    }

    let previous = self.available.rcu(|current: &Arc<Vec<String>>| {
      if current.iter().any(|a| a == address) {
        Arc::clone(current)
      } else {
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(address.to_string());
        Arc::new(next)
      }
    });
    !previous.iter().any(|a| a == address)
  }

  /// Evicts `address` from the available set. Returns `true` if it was present.
  pub fn mark_unhealthy(&self, address: &str) -> bool {
    let previous = self.available.rcu(|current: &Arc<Vec<String>>| {
      if current.iter().any(|a| a == address) {
        Arc::new(current.iter().filter(|a| *a != address).cloned().collect::<Vec<_>>())
      } else {
        Arc::clone(current)
      }
    });
    previous.iter().any(|a| a == address)
  }
}
