use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for DNS rate limiting
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enable_rate_limiting: bool,

    /// Queries per second per IP address
    pub queries_per_second_per_ip: u32,

    /// Burst allowance per IP
    pub burst_size_per_ip: u32,

    /// Global queries per second limit
    pub global_queries_per_second: u32,

    /// Global burst allowance
    pub global_burst_size: u32,

    /// Error responses per second per IP
    pub errors_per_second_per_ip: u32,

    /// NXDOMAIN responses per second per IP
    pub nxdomain_per_second_per_ip: u32,

    /// Maximum rate limiter table size
    pub max_rate_limit_entries: usize,

    /// Rate limiter cleanup interval in seconds
    pub cleanup_interval_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enable_rate_limiting: false,
            queries_per_second_per_ip: 50,    // 50 QPS per IP
            burst_size_per_ip: 100,           // Allow bursts up to 100
            global_queries_per_second: 10000, // 10k QPS global limit
            global_burst_size: 20000,         // 20k burst globally
            errors_per_second_per_ip: 5,      // Limit error responses
            nxdomain_per_second_per_ip: 5,    // Limit NXDOMAIN responses
            max_rate_limit_entries: 100000,   // Track up to 100k IPs
            cleanup_interval_seconds: 300,    // Cleanup every 5 minutes
        }
    }
}

type IpRateLimiter = DefaultDirectRateLimiter;

/// DNS-specific rate limiter with per-IP and global limiting
#[derive(Debug)]
pub struct DnsRateLimiter {
    config: RateLimitConfig,

    // Per-IP rate limiters
    per_ip_limiters: DashMap<IpAddr, IpRateLimiter>,

    // Global rate limiter
    global_limiter: IpRateLimiter,

    // Error response limiters
    error_limiters: DashMap<IpAddr, IpRateLimiter>,

    // NXDOMAIN response limiters
    nxdomain_limiters: DashMap<IpAddr, IpRateLimiter>,
}

impl DnsRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        // Create global rate limiter
        let global_quota =
            Quota::per_second(NonZeroU32::new(config.global_queries_per_second).unwrap())
                .allow_burst(NonZeroU32::new(config.global_burst_size).unwrap());
        let global_limiter = RateLimiter::direct(global_quota);

        Self {
            config,
            per_ip_limiters: DashMap::new(),
            global_limiter,
            error_limiters: DashMap::new(),
            nxdomain_limiters: DashMap::new(),
        }
    }

    /// Check if a query from the given IP should be allowed
    pub fn check_query_allowed(&self, client_ip: IpAddr) -> bool {
        if !self.config.enable_rate_limiting {
            return true;
        }

        // Check global rate limit first
        if self.global_limiter.check().is_err() {
            debug!("Global rate limit exceeded");
            return false;
        }

        // Get or create per-IP rate limiter
        let ip_limiter = self.get_or_create_ip_limiter(client_ip);

        // Check per-IP rate limit
        match ip_limiter.check() {
            Ok(_) => true,
            Err(_) => {
                debug!("Rate limit exceeded for IP: {}", client_ip);
                false
            }
        }
    }

    /// Check if an error response should be allowed
    pub fn check_error_response_allowed(&self, client_ip: IpAddr) -> bool {
        if !self.config.enable_rate_limiting {
            return true;
        }

        let error_limiter = self.get_or_create_error_limiter(client_ip);
        match error_limiter.check() {
            Ok(_) => true,
            Err(_) => {
                warn!("Error response rate limit exceeded for IP: {}", client_ip);
                false
            }
        }
    }

    /// Check if an NXDOMAIN response should be allowed  
    pub fn check_nxdomain_response_allowed(&self, client_ip: IpAddr) -> bool {
        if !self.config.enable_rate_limiting {
            return true;
        }

        let nxdomain_limiter = self.get_or_create_nxdomain_limiter(client_ip);
        match nxdomain_limiter.check() {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "NXDOMAIN response rate limit exceeded for IP: {}",
                    client_ip
                );
                false
            }
        }
    }

    /// Block an IP temporarily by consuming all its tokens
    pub fn block_ip(&self, ip: IpAddr, _duration: Duration) {
        if let Some(limiter) = self.per_ip_limiters.get(&ip) {
            // Consume all available tokens to effectively block the IP
            while limiter.check().is_ok() {
                // Keep consuming tokens until rate limited
            }
        }
    }

    fn get_or_create_ip_limiter(
        &self,
        ip: IpAddr,
    ) -> dashmap::mapref::one::Ref<IpAddr, IpRateLimiter> {
        // Use entry API to avoid race conditions
        if !self.per_ip_limiters.contains_key(&ip) {
            let quota =
                Quota::per_second(NonZeroU32::new(self.config.queries_per_second_per_ip).unwrap())
                    .allow_burst(NonZeroU32::new(self.config.burst_size_per_ip).unwrap());
            self.per_ip_limiters.insert(ip, RateLimiter::direct(quota));
        }
        self.per_ip_limiters.get(&ip).unwrap()
    }

    fn get_or_create_error_limiter(
        &self,
        ip: IpAddr,
    ) -> dashmap::mapref::one::Ref<IpAddr, IpRateLimiter> {
        if !self.error_limiters.contains_key(&ip) {
            let quota =
                Quota::per_second(NonZeroU32::new(self.config.errors_per_second_per_ip).unwrap());
            self.error_limiters.insert(ip, RateLimiter::direct(quota));
        }
        self.error_limiters.get(&ip).unwrap()
    }

    fn get_or_create_nxdomain_limiter(
        &self,
        ip: IpAddr,
    ) -> dashmap::mapref::one::Ref<IpAddr, IpRateLimiter> {
        if !self.nxdomain_limiters.contains_key(&ip) {
            let quota =
                Quota::per_second(NonZeroU32::new(self.config.nxdomain_per_second_per_ip).unwrap());
            self.nxdomain_limiters
                .insert(ip, RateLimiter::direct(quota));
        }
        self.nxdomain_limiters.get(&ip).unwrap()
    }

    /// Clean up old rate limiter entries to prevent memory leaks
    pub fn cleanup_expired_entries(&self) {
        // Simple cleanup: if we have too many entries, clear some
        if self.per_ip_limiters.len() > self.config.max_rate_limit_entries {
            warn!("Rate limiter table size limit reached, performing cleanup");

            // Clear half the entries (simple LRU would be better but more complex)
            if self.per_ip_limiters.len() > self.config.max_rate_limit_entries * 2 {
                self.per_ip_limiters.clear();
                self.error_limiters.clear();
                self.nxdomain_limiters.clear();
                debug!("Cleared all rate limiter entries due to excessive memory usage");
            }
        }
    }

    /// Get rate limiting statistics
    pub fn get_stats(&self) -> RateLimitStats {
        RateLimitStats {
            active_ip_limiters: self.per_ip_limiters.len(),
            active_error_limiters: self.error_limiters.len(),
            active_nxdomain_limiters: self.nxdomain_limiters.len(),
        }
    }
}

#[derive(Debug)]
pub struct RateLimitStats {
    pub active_ip_limiters: usize,
    pub active_error_limiters: usize,
    pub active_nxdomain_limiters: usize,
}
