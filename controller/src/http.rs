use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use owo_colors::OwoColorize;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::colors::FG1;
use crate::error::Error;
use crate::metrics::ControllerMetrics;
use crate::state;

#[derive(Serialize)]
struct VersionInfo {
    version: &'static str,
    git_commit: &'static str,
    build_time: &'static str,
}

impl VersionInfo {
    fn current() -> Self {
        Self {
            version: option_env!("CARGO_PKG_VERSION").unwrap_or("unknown"),
            git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown"),
            build_time: option_env!("BUILD_TIME").unwrap_or("unknown"),
        }
    }
}

fn text(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body.into())))
        .expect("build text response")
}

fn json<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let payload = serde_json::to_vec(body).expect("serialize response body");
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(payload)))
        .expect("build json response")
}

async fn handle(
    req: Request<Incoming>,
    metrics: &'static ControllerMetrics,
    state: state::Registry,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") => text(StatusCode::OK, "ok"),
        (&Method::GET, "/readyz") => text(StatusCode::OK, "ok"),
        (&Method::GET, "/metrics") => text(StatusCode::OK, metrics.encode()),
        (&Method::GET, "/version") => json(StatusCode::OK, &VersionInfo::current()),
        (&Method::GET, "/node-states") => json(StatusCode::OK, &state.snapshot()),
        _ => text(StatusCode::NOT_FOUND, "not found"),
    };
    Ok(response)
}

/// Serves `/metrics`, `/healthz`, `/readyz`, `/version`, and `/node-states`
/// until `cancel` fires. Each accepted connection is handled on its own
/// task, same as every other standalone hyper server in this workspace.
pub async fn run(
    addr: SocketAddr,
    metrics: &'static ControllerMetrics,
    state: state::Registry,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Bootstrap(format!("bind http server to {addr}: {e}")))?;

    println!("{} on {addr}", "observability server listening".color(FG1));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, _peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        eprintln!("http server failed to accept connection: {e}");
                        continue;
                    }
                };
                let io = TokioIo::new(stream);
                let state = state.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(req, metrics, state.clone()));
                    if let Err(e) = Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        eprintln!("http connection error: {e}");
                    }
                });
            }
        }
    }

    Ok(())
}
