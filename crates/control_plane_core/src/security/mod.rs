//! Security guardrails for the HTTP front adapter (`SPEC_FULL.md` §4.8): a sliding-window
//! token bucket keyed by client address, a request size limit, and a static IP ban list.
//! This layer holds no state beyond the rate-limit buckets themselves -- no per-IP
//! connection counter is tracked here.

use std::net::IpAddr;
use std::time::Duration;
use serde::{Deserialize, Serialize};

pub mod rate_limiter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_rate_limiting: bool,
    pub max_requests_per_minute: u32,
    pub max_message_size: usize,
    #[serde(default)]
    pub banned_ips: Vec<IpAddr>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_rate_limiting: true,
            max_requests_per_minute: 120,
            max_message_size: 64 * 1024,
            banned_ips: Vec::new(),
        }
    }
}

/// Central security manager in front of the matchmaker/heartbeat/broadcast endpoints.
#[derive(Debug)]
pub struct SecurityManager {
    config: SecurityConfig,
    rate_limiter: rate_limiter::RateLimiter,
}

impl SecurityManager {
    pub fn new(config: SecurityConfig) -> Self {
        let rate_limiter = rate_limiter::RateLimiter::new(
            config.max_requests_per_minute,
            Duration::from_secs(60),
        );

        Self { config, rate_limiter }
    }

    /// Checks the static ban list. Stateless -- `banned_ips` is fixed configuration, never
    /// grown at runtime.
    pub fn validate_ip(&self, ip: IpAddr) -> Result<(), SecurityError> {
        if self.config.banned_ips.contains(&ip) {
            return Err(SecurityError::BannedIp(ip));
        }
        Ok(())
    }

    /// Validates an incoming request body: size limit plus the sliding-window token bucket.
    pub async fn validate_request(&self, ip: IpAddr, body_len: usize) -> Result<(), SecurityError> {
        if body_len > self.config.max_message_size {
            return Err(SecurityError::MessageTooLarge(body_len));
        }

        if self.config.enable_rate_limiting && !self.rate_limiter.check_rate_limit(ip).await {
            return Err(SecurityError::RateLimitExceeded(ip));
        }

        Ok(())
    }

    /// Expires rate-limit buckets untouched for an hour, the only state this layer keeps.
    pub async fn cleanup_stale_entries(&self) {
        self.rate_limiter.cleanup_old_entries().await;
    }

    pub async fn get_stats(&self) -> SecurityStats {
        SecurityStats {
            rate_limited_requests: self.rate_limiter.get_blocked_count().await,
            banned_ips: self.config.banned_ips.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityStats {
    pub rate_limited_requests: u64,
    pub banned_ips: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("IP address {0} is banned")]
    BannedIp(IpAddr),

    #[error("request body too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("rate limit exceeded for IP {0}")]
    RateLimitExceeded(IpAddr),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn banned_ip_is_rejected() {
        let mut config = SecurityConfig::default();
        config.banned_ips.push(ip());
        let manager = SecurityManager::new(config);
        assert!(matches!(manager.validate_ip(ip()), Err(SecurityError::BannedIp(_))));
    }

    #[test]
    fn non_banned_ip_passes() {
        let manager = SecurityManager::new(SecurityConfig::default());
        assert!(manager.validate_ip(ip()).is_ok());
    }

    #[tokio::test]
    async fn oversized_request_is_rejected() {
        let mut config = SecurityConfig::default();
        config.max_message_size = 10;
        let manager = SecurityManager::new(config);
        assert!(matches!(
            manager.validate_request(ip(), 100).await,
            Err(SecurityError::MessageTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn rate_limit_trips_after_the_configured_budget() {
        let mut config = SecurityConfig::default();
        config.max_requests_per_minute = 1;
        let manager = SecurityManager::new(config);
        manager.validate_request(ip(), 0).await.unwrap();
        assert!(matches!(
            manager.validate_request(ip(), 0).await,
            Err(SecurityError::RateLimitExceeded(_))
        ));
    }
}
