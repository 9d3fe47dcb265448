use crate::{configuration::Scheme, error::Error, error_response::log_error, http_client::BackendClient};
use async_stream::stream;
use futures::Stream;
use hyper::{
  body::{Bytes, HttpBody},
  header::{HeaderValue, HOST},
  Body, Request, Response, Uri,
};
use std::{net::SocketAddr, time::Duration};
use tokio::time::{self, Instant};

/// Response header naming the backend that served the request, set when tracing is enabled.
pub const LB_FROM: &str = "lb-from";
const X_FORWARDED_FOR: &str = "x-forwarded-for";
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Executes one proxied request/response cycle against a chosen backend.
///
/// The whole exchange, including streaming the response body, has to finish within `timeout`.
/// A client that disconnects drops the future returned by [`Forwarder::forward`], which aborts
/// the outbound request as well.
#[derive(Debug, Clone)]
pub struct Forwarder {
  client: BackendClient,
  scheme: Scheme,
  timeout: Duration,
  trace: bool,
}

impl Forwarder {
  pub fn new(client: BackendClient, scheme: Scheme, timeout: Duration, trace: bool) -> Forwarder {
    Forwarder {
      client,
      scheme,
      timeout,
      trace,
    }
  }

  /// Sends `request` to `backend` and returns the response to relay to the client.
  ///
  /// On `Err` nothing of the upstream response has been used; the caller answers on its own.
  /// Once `Ok` is returned, status and headers are fixed. A failure while streaming the body is
  /// only logged and ends the body early.
  pub async fn forward(
    &self,
    backend: &str,
    request: Request<Body>,
    client_address: &SocketAddr,
  ) -> Result<Response<Body>, Error> {
    let deadline = deadline_after(self.timeout);
    let backend_request = backend_request(request, self.scheme, backend, client_address)?;

    let upstream = match time::timeout_at(deadline, self.client.request(backend_request)).await {
      Ok(Ok(response)) => response,
      Ok(Err(source)) => {
        return Err(Error::ForwardTransport {
          backend: backend.to_string(),
          source,
        })
      }
      Err(_) => {
        return Err(Error::ForwardTimeout {
          backend: backend.to_string(),
          timeout: self.timeout,
        })
      }
    };

    self.client_response(backend, upstream, deadline)
  }

  fn client_response(&self, backend: &str, upstream: Response<Body>, deadline: Instant) -> Result<Response<Body>, Error> {
    let (parts, body) = upstream.into_parts();
    let body = Body::wrap_stream(relay_body(backend.to_string(), body, deadline));

    let builder = Response::builder().status(parts.status);
    let mut response = parts
      .headers
      .iter()
      .fold(builder, |builder, (key, value)| builder.header(key, value))
      .body(body)?;

    if self.trace {
      response.headers_mut().insert(LB_FROM, HeaderValue::from_str(backend)?);
    }
    Ok(response)
  }
}

/// Timeouts too large to add to the clock mean "no deadline".
fn deadline_after(timeout: Duration) -> Instant {
  let now = Instant::now();
  now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

fn backend_request(
  request: Request<Body>,
  scheme: Scheme,
  backend: &str,
  client_address: &SocketAddr,
) -> Result<Request<Body>, Error> {
  let (parts, body) = request.into_parts();
  let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
  let backend_uri = Uri::builder()
    .scheme(scheme.as_str())
    .authority(backend)
    .path_and_query(path_and_query)
    .build()?;

  // the client derives Host from the backend uri
  let builder = Request::builder().method(parts.method).uri(backend_uri);
  let request = parts
    .headers
    .iter()
    .filter(|(key, _)| *key != HOST)
    .fold(builder, |builder, (key, value)| builder.header(key, value))
    .header(X_FORWARDED_FOR, client_address.ip().to_string())
    .body(body)?;
  Ok(request)
}

fn relay_body(backend: String, mut body: Body, deadline: Instant) -> impl Stream<Item = Result<Bytes, Error>> + Send {
  stream! {
    loop {
      let chunk = match time::timeout_at(deadline, body.data()).await {
        Ok(Some(Ok(chunk))) => chunk,
        Ok(None) => break,
        Ok(Some(Err(source))) => {
          let error = Error::ResponseBodyCopy { backend: backend.clone(), source };
          log_error(&error);
          yield Err(error);
          break;
        }
        Err(_) => {
          let error = Error::ResponseBodyTimeout { backend: backend.clone() };
          log_error(&error);
          yield Err(error);
          break;
        }
      };
      yield Ok(chunk);
    }
  }
}
