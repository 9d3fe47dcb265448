use crate::{
  error_response::handle_service_unavailable, forwarder::Forwarder, listeners::RemoteAddress,
  load_balancing::Router,
};
use futures::Future;
use futures::TryFutureExt;
use hyper::{
  server::accept::Accept,
  service::{make_service_fn, Service},
  Body, Request, Response, Server,
};
use log::{debug, info};
use std::{
  error::Error,
  io,
  net::SocketAddr,
  pin::Pin,
  sync::Arc,
  task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

pub struct SharedData {
  pub router: Router,
  pub forwarder: Forwarder,
}

/// Serves connections from `acceptor` until `shutdown` fires, then lets in-flight requests
/// finish.
pub async fn create<I, IE, IO>(acceptor: I, shared_data: Arc<SharedData>, shutdown: CancellationToken) -> Result<(), io::Error>
where
  I: Accept<Conn = IO, Error = IE>,
  IE: Into<Box<dyn Error + Send + Sync>>,
  IO: AsyncRead + AsyncWrite + Unpin + Send + RemoteAddress + 'static,
{
  let service = make_service_fn(move |stream: &IO| {
    let client_address = stream.remote_addr();
    let shared_data = shared_data.clone();

    async move {
      Ok::<_, io::Error>(MainService {
        client_address: client_address?,
        shared_data,
      })
    }
  });
  Server::builder(acceptor)
    .serve(service)
    .with_graceful_shutdown(async move {
      shutdown.cancelled().await;
      info!("Shutting down, waiting for open requests to finish");
    })
    .map_err(|e| {
      let msg = format!("Failed to listen server: {}", e);
      io::Error::new(io::ErrorKind::Other, msg)
    })
    .await
}

pub struct MainService {
  client_address: SocketAddr,
  shared_data: Arc<SharedData>,
}

impl Service<Request<Body>> for MainService {
  type Response = Response<Body>;
  type Error = hyper::Error;

  // let's allow this complex type. A refactor would make it more complicated due to the used trait types
  #[allow(clippy::type_complexity)]
  type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

  fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
    Poll::Ready(Ok(()))
  }

  fn call(&mut self, request: Request<Body>) -> Self::Future {
    debug!("{:#?} {} {}", request.version(), request.method(), request.uri());

    let shared_data = self.shared_data.clone();
    let client_address = self.client_address;

    Box::pin(async move {
      let backend = match shared_data.router.route(&request) {
        Ok(backend) => backend,
        Err(error) => return Ok(handle_service_unavailable(error)),
      };

      match shared_data.forwarder.forward(&backend, request, &client_address).await {
        Ok(response) => Ok(response),
        Err(error) => Ok(handle_service_unavailable(error)),
      }
    })
  }
}
