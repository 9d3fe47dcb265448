use super::{LoadBalancingContext, LoadBalancingStrategy};
use std::{
  collections::hash_map::RandomState,
  hash::{BuildHasher, Hash, Hasher},
};

/// Hashes the request path with a seed that is drawn once and then kept for the lifetime of
/// the strategy, so a path keeps landing on the same position of an unchanged backend set.
#[derive(Debug)]
pub struct PathHash {
  seed: RandomState,
}

impl PathHash {
  pub fn new() -> PathHash {
    PathHash {
      seed: RandomState::new(),
    }
  }

  pub fn hash_path(&self, path: &str) -> u64 {
    // finish() does not reset state, so we'll need a new hasher for each request
    let mut hasher = self.seed.build_hasher();
    path.hash(&mut hasher);
    hasher.finish()
  }
}

impl Default for PathHash {
  fn default() -> Self {
    PathHash::new()
  }
}

impl LoadBalancingStrategy for PathHash {
  fn resolve_address_index(&self, context: &LoadBalancingContext) -> usize {
    let path = context.client_request.uri().path();
    (self.hash_path(path) % (context.backend_addresses.len() as u64)) as usize
  }
}
