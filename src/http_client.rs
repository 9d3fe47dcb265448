use hyper::{client::HttpConnector, Body, Client};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_timeout::TimeoutConnector;
use std::time::Duration;

/// Client shared by health probes and request forwarding.
///
/// Speaks plain http and https alike, the scheme of each request decides. Only connecting is
/// bounded here, idle pooled connections must not hit a read timeout. Callers put their own
/// deadline around the whole exchange.
pub type BackendClient = Client<TimeoutConnector<HttpsConnector<HttpConnector>>, Body>;

pub fn build(timeout: Duration) -> BackendClient {
  let https_connector = HttpsConnectorBuilder::new()
    .with_native_roots()
    .https_or_http()
    .enable_http1()
    .build();

  let mut connector = TimeoutConnector::new(https_connector);
  connector.set_connect_timeout(Some(timeout));

  Client::builder().build::<_, Body>(connector)
}
