use async_stream::stream;
use futures::Stream;
use log::warn;
use std::{
  io,
  net::SocketAddr,
  pin::Pin,
  task::{Context, Poll},
  time::Duration,
};
use tokio::net::{TcpListener, TcpStream};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub struct HyperAcceptor<'a, T> {
  acceptor: Pin<Box<dyn Stream<Item = Result<T, io::Error>> + Send + 'a>>,
}

impl hyper::server::accept::Accept for HyperAcceptor<'_, TcpStream> {
  type Conn = TcpStream;
  type Error = io::Error;

  fn poll_accept(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Result<Self::Conn, Self::Error>>> {
    Pin::new(&mut self.acceptor).poll_next(cx)
  }
}

pub struct Http;

impl Http {
  pub async fn bind(port: u16) -> Result<TcpListener, io::Error> {
    TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
  }

  /// Turns a bound listener into a connection source for hyper. Failing to accept a single
  /// connection is logged and does not stop the listener.
  pub fn produce_acceptor(listener: TcpListener) -> HyperAcceptor<'static, TcpStream> {
    let incoming_stream = stream! {
      loop {
        match listener.accept().await {
          Ok((socket, _)) => yield Ok::<_, io::Error>(socket),
          Err(e) => {
            warn!("Failed to accept connection: {}", e);
            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
          }
        }
      }
    };

    HyperAcceptor {
      acceptor: Box::pin(incoming_stream),
    }
  }
}

pub trait RemoteAddress {
  fn remote_addr(&self) -> io::Result<SocketAddr>;
}

impl RemoteAddress for TcpStream {
  fn remote_addr(&self) -> io::Result<SocketAddr> {
    self.peer_addr()
  }
}
