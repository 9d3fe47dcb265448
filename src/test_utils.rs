//! In-process backends for tests: real hyper servers on ephemeral ports.

use hyper::{
  service::{make_service_fn, service_fn},
  Body, Request, Response, Server,
};
use std::{
  convert::Infallible,
  future::Future,
  net::{SocketAddr, TcpListener},
  time::Duration,
};

pub fn spawn_backend<F, Fut>(handler: F) -> SocketAddr
where
  F: Fn(Request<Body>) -> Fut + Clone + Send + Sync + 'static,
  Fut: Future<Output = Response<Body>> + Send + 'static,
{
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let address = listener.local_addr().unwrap();

  let make_service = make_service_fn(move |_| {
    let handler = handler.clone();
    async move {
      Ok::<_, Infallible>(service_fn(move |request| {
        let response = handler(request);
        async move { Ok::<_, Infallible>(response.await) }
      }))
    }
  });
  tokio::spawn(Server::from_tcp(listener).unwrap().serve(make_service));
  address
}

/// A backend answering every request, `/health` included, with 200 and `body`.
pub fn spawn_named_backend(body: &'static str) -> SocketAddr {
  spawn_backend(move |_request| async move { Response::new(Body::from(body)) })
}

/// An address nobody listens on.
pub fn unused_address() -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  listener.local_addr().unwrap()
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn eventually<C: Fn() -> bool>(condition: C) {
  for _ in 0..200 {
    if condition() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("condition not met within two seconds");
}
