//! HTTP front end
//!
//! Accepts client GET and HEAD requests with hyper, turns them into
//! [`ObjectRequest`]s for the [`BlockProxy`] and writes the assembled
//! response back.

use crate::error::BlockError;
use crate::models::RangeSpec;
use crate::proxy::{BlockProxy, ObjectRequest, RequestOverrides};
use crate::response_assembler::{AssembledResponse, ResponseAssembler};
use http::header::{HeaderValue, ALLOW, CONTENT_TYPE, RANGE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// HTTP server in front of a [`BlockProxy`]
pub struct BlockServer {
    proxy: Arc<BlockProxy>,
    addr: SocketAddr,
}

impl BlockServer {
    pub fn new(proxy: Arc<BlockProxy>, addr: SocketAddr) -> Self {
        BlockServer { proxy, addr }
    }

    /// Accept connections until the process exits
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Block slice server listening on http://{}", self.addr);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            let io = TokioIo::new(stream);
            let proxy = Arc::clone(&self.proxy);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let proxy = Arc::clone(&proxy);
                    async move { Ok::<_, Infallible>(handle_request(req, &proxy).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }
}

/// Handle one client request
///
/// Only GET and HEAD without a request body are served. The object identity
/// is the origin base URL joined with the request path and query.
pub async fn handle_request<B: Body>(req: Request<B>, proxy: &BlockProxy) -> Response<Full<Bytes>> {
    let head_only = match *req.method() {
        Method::GET => false,
        Method::HEAD => true,
        _ => {
            debug!("Rejecting method {}", req.method());
            let mut response = plain_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
            return response;
        }
    };

    if has_body(&req) {
        debug!("Rejecting {} request with a body", req.method());
        return plain_response(StatusCode::FORBIDDEN, "request body not allowed");
    }

    let range = match parse_range(&req) {
        Ok(range) => range,
        Err(e) => {
            proxy.metrics().record_failed_request();
            warn!("Rejecting range for {}: {}", req.uri(), e);
            return into_http(ResponseAssembler::new().error_response(&e));
        }
    };

    let mut request = ObjectRequest::new(identity_for(proxy, &req)).with_overrides(
        req.headers()
            .get(RequestOverrides::HEADER)
            .and_then(|v| v.to_str().ok())
            .map(RequestOverrides::from_header)
            .unwrap_or_default(),
    );
    request.range = range;
    request.head_only = head_only;

    into_http(proxy.handle(&request).await)
}

fn has_body<B: Body>(req: &Request<B>) -> bool {
    let body = req.body();
    !body.is_end_stream() && body.size_hint().exact() != Some(0)
}

fn parse_range<B>(req: &Request<B>) -> Result<Option<RangeSpec>, BlockError> {
    let values = req
        .headers()
        .get_all(RANGE)
        .iter()
        .map(|v| {
            v.to_str()
                .map_err(|_| BlockError::unsatisfiable("range header is not ASCII", None))
        })
        .collect::<Result<Vec<_>, _>>()?;
    RangeSpec::from_header_values(&values)
}

fn identity_for<B>(proxy: &BlockProxy, req: &Request<B>) -> String {
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{}{}", proxy.config().origin.base_url.trim_end_matches('/'), path)
}

fn plain_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(format!("{}\n", message))));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// Convert an assembled response into a hyper response
pub fn into_http(assembled: AssembledResponse) -> Response<Full<Bytes>> {
    let body = assembled.body_bytes();
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = assembled.status;
    *response.headers_mut() = assembled.headers;
    response
}
