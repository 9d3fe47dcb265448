use crate::{error::Error, registry::AvailabilityRegistry};
use hyper::{Body, Request};
use std::sync::Arc;

pub mod path_hash;

pub struct LoadBalancingContext<'a> {
  pub backend_addresses: &'a [String],
  pub client_request: &'a Request<Body>,
}

pub trait LoadBalancingStrategy: std::fmt::Debug + Send + Sync {
  /// Picks an index into `context.backend_addresses`, which is never empty when called.
  fn resolve_address_index(&self, context: &LoadBalancingContext) -> usize;
}

/// Maps inbound requests onto the backends that are currently available.
#[derive(Debug)]
pub struct Router {
  registry: Arc<AvailabilityRegistry>,
  strategy: Box<dyn LoadBalancingStrategy>,
}

impl Router {
  pub fn new(registry: Arc<AvailabilityRegistry>, strategy: Box<dyn LoadBalancingStrategy>) -> Router {
    Router { registry, strategy }
  }

  pub fn route(&self, request: &Request<Body>) -> Result<String, Error> {
    let snapshot = self.registry.snapshot();
    if snapshot.is_empty() {
      return Err(Error::NoBackendsAvailable);
    }

    let context = LoadBalancingContext {
      backend_addresses: &snapshot,
      client_request: request,
    };
    let index = self.strategy.resolve_address_index(&context);
    snapshot.get(index).cloned().ok_or(Error::NoBackendsAvailable)
  }
}
