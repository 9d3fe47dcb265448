use crate::error::Error;
use clap::{Arg, ArgMatches, Command};
use hyper::http::uri::Authority;
use log::info;
use serde::Deserialize;
use std::{collections::HashSet, ffi::OsString, fmt::Display, fs, str::FromStr, time::Duration};

const DEFAULT_PORT: u16 = 8090;
const DEFAULT_TIMEOUT_SEC: u64 = 3;
const DEFAULT_HEALTH_INTERVAL_SEC: u64 = 10;
const MAX_DURATION_SEC: u64 = 86_400;
const DEFAULT_HEALTH_PATH: &str = "/health";
const DEFAULT_BACKENDS: [&str; 3] = ["server1:8080", "server2:8080", "server3:8080"];

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Scheme {
  HTTP,
  HTTPS,
}

impl Scheme {
  pub fn as_str(&self) -> &'static str {
    match self {
      Scheme::HTTP => "http",
      Scheme::HTTPS => "https",
    }
  }
}

impl Display for Scheme {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
  pub interval: Duration,
  pub path: String,
}

/// Configuration as seen by the running balancer. Built once, after all sources have been
/// read, and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
  pub port: u16,
  pub timeout: Duration,
  pub scheme: Scheme,
  pub trace: bool,
  pub backends: Vec<String>,
  pub health: HealthConfig,
}

/// Optional TOML file. Every key may be omitted; flags given on the command line win.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct FileConfig {
  port: Option<u16>,
  timeout_sec: Option<u64>,
  https: Option<bool>,
  trace: Option<bool>,
  backends: Option<Vec<String>>,
  health_interval_sec: Option<u64>,
  health_path: Option<String>,
}

impl FileConfig {
  fn load(path: &str) -> Result<FileConfig, Error> {
    let toml_str = fs::read_to_string(path).map_err(|source| Error::ConfigFileRead {
      path: path.to_string(),
      source,
    })?;
    let config = FileConfig::parse(path, &toml_str)?;
    info!("Successfully parsed configuration file {}", path);
    Ok(config)
  }

  fn parse(path: &str, toml_str: &str) -> Result<FileConfig, Error> {
    toml::from_str(toml_str).map_err(|source| Error::ConfigFileParse {
      path: path.to_string(),
      source,
    })
  }
}

fn command() -> Command<'static> {
  Command::new("path-hash-lb")
    .about("HTTP load balancer routing requests to healthy backends by path")
    .arg(
      Arg::new("config")
        .long("config")
        .takes_value(true)
        .value_name("FILE")
        .help("TOML file with any of the options below"),
    )
    .arg(
      Arg::new("port")
        .long("port")
        .takes_value(true)
        .help("load balancer port [default: 8090]"),
    )
    .arg(
      Arg::new("timeout-sec")
        .long("timeout-sec")
        .takes_value(true)
        .help("request timeout time in seconds [default: 3]"),
    )
    .arg(
      Arg::new("https")
        .long("https")
        .help("whether backends support HTTPs"),
    )
    .arg(
      Arg::new("trace")
        .long("trace")
        .help("whether to include tracing information into responses"),
    )
    .arg(
      Arg::new("backends")
        .long("backends")
        .takes_value(true)
        .value_name("HOST:PORT,...")
        .help("comma separated backend addresses [default: server1:8080,server2:8080,server3:8080]"),
    )
    .arg(
      Arg::new("health-interval-sec")
        .long("health-interval-sec")
        .takes_value(true)
        .help("seconds between two health checks of a backend [default: 10]"),
    )
    .arg(
      Arg::new("health-path")
        .long("health-path")
        .takes_value(true)
        .help("path of the backend health endpoint [default: /health]"),
    )
}

impl RuntimeConfig {
  /// Reads the command line (and the configuration file it may point to).
  pub fn from_args<I, T>(args: I) -> Result<RuntimeConfig, Error>
  where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
  {
    let matches = command().try_get_matches_from(args)?;

    let file = match matches.value_of("config") {
      Some(path) => FileConfig::load(path)?,
      None => FileConfig::default(),
    };

    RuntimeConfig::merge(&matches, file)
  }

  fn merge(matches: &ArgMatches, file: FileConfig) -> Result<RuntimeConfig, Error> {
    let port = parse_arg(matches, "port")?.or(file.port).unwrap_or(DEFAULT_PORT);
    let timeout_sec = parse_arg(matches, "timeout-sec")?
      .or(file.timeout_sec)
      .unwrap_or(DEFAULT_TIMEOUT_SEC);
    let interval_sec = parse_arg(matches, "health-interval-sec")?
      .or(file.health_interval_sec)
      .unwrap_or(DEFAULT_HEALTH_INTERVAL_SEC);
    let https = matches.is_present("https") || file.https.unwrap_or(false);
    let trace = matches.is_present("trace") || file.trace.unwrap_or(false);
    let health_path = matches
      .value_of("health-path")
      .map(String::from)
      .or(file.health_path)
      .unwrap_or_else(|| DEFAULT_HEALTH_PATH.to_string());
    let backends = matches
      .value_of("backends")
      .map(split_backends)
      .or(file.backends)
      .unwrap_or_else(|| DEFAULT_BACKENDS.iter().map(|b| b.to_string()).collect());

    let config = RuntimeConfig {
      port,
      timeout: Duration::from_secs(timeout_sec),
      scheme: if https { Scheme::HTTPS } else { Scheme::HTTP },
      trace,
      backends,
      health: HealthConfig {
        interval: Duration::from_secs(interval_sec),
        path: health_path,
      },
    };
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), Error> {
    validate_duration("timeout-sec", self.timeout)?;
    validate_duration("health-interval-sec", self.health.interval)?;
    if !self.health.path.starts_with('/') {
      return Err(invalid("health-path", &self.health.path, "must start with '/'"));
    }
    if self.backends.is_empty() {
      return Err(Error::NoBackendsConfigured);
    }

    let mut seen = HashSet::new();
    for backend in &self.backends {
      let authority = Authority::from_str(backend).map_err(|_| Error::InvalidBackend(backend.clone()))?;
      if authority.port_u16().is_none() || authority.as_str() != backend {
        return Err(Error::InvalidBackend(backend.clone()));
      }
      if !seen.insert(backend.as_str()) {
        return Err(Error::DuplicateBackend(backend.clone()));
      }
    }
    Ok(())
  }

  pub fn log_summary(&self) {
    info!("Load balancer port: {}", self.port);
    info!("Backends: {}", self.backends.join(", "));
    info!("Backend scheme: {}, timeout: {:?}", self.scheme, self.timeout);
    info!(
      "Health checks: {} every {:?}",
      self.health.path, self.health.interval
    );
    info!("Tracing support enabled: {}", self.trace);
  }
}

fn parse_arg<T>(matches: &ArgMatches, name: &'static str) -> Result<Option<T>, Error>
where
  T: FromStr,
  T::Err: Display,
{
  matches
    .value_of(name)
    .map(|value| value.parse::<T>().map_err(|e| invalid(name, value, &e.to_string())))
    .transpose()
}

fn validate_duration(name: &'static str, duration: Duration) -> Result<(), Error> {
  let seconds = duration.as_secs();
  if seconds == 0 {
    return Err(invalid(name, "0", "must be greater than zero"));
  }
  if seconds > MAX_DURATION_SEC {
    let reason = format!("must be at most {} seconds", MAX_DURATION_SEC);
    return Err(invalid(name, &seconds.to_string(), &reason));
  }
  Ok(())
}

fn split_backends(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(str::trim)
    .filter(|backend| !backend.is_empty())
    .map(String::from)
    .collect()
}

fn invalid(name: &'static str, value: &str, reason: &str) -> Error {
  Error::InvalidArgument {
    name,
    value: value.to_string(),
    reason: reason.to_string(),
  }
}
