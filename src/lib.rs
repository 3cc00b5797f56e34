pub mod blocking;
pub mod cache;
pub mod config;
pub mod config_reload;
pub mod constants;
pub mod dns;
pub mod error;
pub mod graceful_shutdown;
pub mod http_server;
pub mod metrics;
pub mod pool;
pub mod rate_limiter;
pub mod refresh;
pub mod resolver;
pub mod server;
pub mod sweeper;
pub mod telemetry;
pub mod transport;
pub mod validation;
pub mod zone;

pub use dns::DNSPacket;
