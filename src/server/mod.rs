//! HTTP front end.
//!
//! `tiny_http` accepts connections on a blocking thread; each request becomes
//! a tokio task that reads the body, routes it through the service and writes
//! the reply back on the blocking pool.

use std::{io::Read, sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use tiny_http::{Header, Request, Response, Server};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::error::NegaBotError;
use crate::service::PredictionService;

mod dashboard;
pub mod routes;

pub use routes::{handle, Reply};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const ACCEPT_POLL: Duration = Duration::from_millis(250);
const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Serves until `shutdown` is cancelled. In-flight requests finish on their
/// own tasks.
pub async fn serve(
    service: PredictionService,
    address: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let server = Server::http(address).map_err(|err| anyhow!("failed to bind {address}: {err}"))?;
    let server = Arc::new(server);
    log_info!("Listening on http://{address}");

    let unblock = {
        let server = Arc::clone(&server);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            server.unblock();
        })
    };

    let runtime = Handle::current();
    let accept = tokio::task::spawn_blocking(move || accept_loop(server, service, runtime, shutdown));
    let result = accept.await.context("accept loop panicked")?;

    unblock.abort();
    log_info!("Server stopped");
    result
}

fn accept_loop(
    server: Arc<Server>,
    service: PredictionService,
    runtime: Handle,
    shutdown: CancellationToken,
) -> Result<()> {
    while !shutdown.is_cancelled() {
        let request = match server.recv_timeout(ACCEPT_POLL) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(err) => {
                if shutdown.is_cancelled() {
                    break;
                }
                return Err(anyhow!("accept failed: {err}"));
            }
        };

        let service = service.clone();
        runtime.spawn(async move {
            if let Err(err) = respond(service, request).await {
                log_error!("Failed to answer request: {err:#}");
            }
        });
    }
    Ok(())
}

async fn respond(service: PredictionService, request: Request) -> Result<()> {
    let (request, body) = tokio::task::spawn_blocking(move || {
        let mut request = request;
        let body = read_body(request.as_reader());
        (request, body)
    })
    .await
    .context("body reader panicked")?;

    let method = request.method().clone();
    let url = request.url().to_string();
    let reply = match body {
        Ok(body) => handle(&service, &method, &url, &body).await,
        Err(err) => {
            log_warn!("Rejected body for {method} {url}: {err}");
            Reply::error(&err)
        }
    };
    log_info!("{method} {url} -> {}", reply.status);

    tokio::task::spawn_blocking(move || {
        let response = into_response(reply);
        request.respond(response)
    })
    .await
    .context("response writer panicked")?
    .context("failed to write response")?;

    Ok(())
}

/// Reads at most `MAX_BODY_BYTES`. One byte more means the body is too large.
fn read_body(reader: &mut dyn Read) -> Result<Vec<u8>, NegaBotError> {
    let mut body = Vec::new();
    reader
        .take(MAX_BODY_BYTES + 1)
        .read_to_end(&mut body)
        .map_err(|err| NegaBotError::BadRequest(err.to_string()))?;

    if body.len() as u64 > MAX_BODY_BYTES {
        return Err(NegaBotError::PayloadTooLarge(MAX_BODY_BYTES));
    }
    Ok(body)
}

fn into_response(reply: Reply) -> Response<std::io::Cursor<Vec<u8>>> {
    let mut response = Response::from_data(reply.body).with_status_code(reply.status);
    if let Ok(header) = Header::from_bytes("Content-Type", reply.content_type) {
        response.add_header(header);
    }
    for (name, value) in reply.headers {
        if let Ok(header) = Header::from_bytes(name, value.as_bytes()) {
            response.add_header(header);
        }
    }
    response
}
