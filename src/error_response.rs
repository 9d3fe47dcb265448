use crate::error::Error;
use hyper::{Body, Response, StatusCode};
use log::log;

pub fn handle_service_unavailable(error: Error) -> Response<Body> {
  log_error(&error);
  service_unavailable()
}

pub fn service_unavailable() -> Response<Body> {
  let mut response = Response::new(Body::empty());
  *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
  response
}

pub fn log_error(error: &Error) {
  log!(error.log_level(), "{}", error);
}
