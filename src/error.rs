use hyper::{header::InvalidHeaderValue, StatusCode};
use log::Level;
use std::{io, time::Duration};
use thiserror::Error;

/// Everything that can go wrong inside the balancer.
///
/// Probe errors only ever drive registry membership, forward errors become a 503 for the
/// affected request, and configuration errors abort startup.
#[derive(Debug, Error)]
pub enum Error {
  #[error("health probe to {backend} failed: {source}")]
  ProbeTransport {
    backend: String,
    #[source]
    source: hyper::Error,
  },

  #[error("health probe to {backend} timed out after {timeout:?}")]
  ProbeTimeout { backend: String, timeout: Duration },

  #[error("health probe to {backend} returned {status}")]
  ProbeBadStatus { backend: String, status: StatusCode },

  #[error("no backends available")]
  NoBackendsAvailable,

  #[error("failed to get response from {backend}: {source}")]
  ForwardTransport {
    backend: String,
    #[source]
    source: hyper::Error,
  },

  #[error("request to {backend} timed out after {timeout:?}")]
  ForwardTimeout { backend: String, timeout: Duration },

  #[error("failed to write response from {backend}: {source}")]
  ResponseBodyCopy {
    backend: String,
    #[source]
    source: hyper::Error,
  },

  #[error("response body from {backend} exceeded the request deadline")]
  ResponseBodyTimeout { backend: String },

  #[error("could not build backend request: {0}")]
  InvalidRequest(#[from] hyper::http::Error),

  #[error("invalid header value: {0}")]
  InvalidHeader(#[from] InvalidHeaderValue),

  #[error(transparent)]
  Cli(#[from] clap::Error),

  #[error("invalid value {value:?} for {name}: {reason}")]
  InvalidArgument {
    name: &'static str,
    value: String,
    reason: String,
  },

  #[error("invalid backend address {0:?}, expected host:port")]
  InvalidBackend(String),

  #[error("backend {0} is configured more than once")]
  DuplicateBackend(String),

  #[error("at least one backend has to be configured")]
  NoBackendsConfigured,

  #[error("error reading configuration file {path}: {source}")]
  ConfigFileRead {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("error parsing configuration file {path}: {source}")]
  ConfigFileParse {
    path: String,
    #[source]
    source: toml::de::Error,
  },

  #[error("failed to initialize logging: {0}")]
  Logging(String),

  #[error(transparent)]
  Io(#[from] io::Error),
}

impl Error {
  /// Level at which the error is reported. Failed probes are routine and only show up in debug
  /// output; their effect is logged as a health transition instead.
  pub fn log_level(&self) -> Level {
    match self {
      Error::ProbeTransport { .. } | Error::ProbeTimeout { .. } | Error::ProbeBadStatus { .. } => Level::Debug,
      _ => Level::Error,
    }
  }
}
