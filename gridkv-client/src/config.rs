//! Client configuration types and builder.

use std::path::PathBuf;
use std::time::Duration;

use gridkv_core::{GridError, Result};

/// Default handshake timeout.
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default initial reconnect backoff per endpoint.
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Default maximum reconnect backoff per endpoint.
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Default backoff multiplier.
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
/// Default backoff jitter fraction.
const DEFAULT_BACKOFF_JITTER: f64 = 0.2;

/// TLS settings for encrypted connections.
///
/// The paths are loaded when the first TLS socket is opened; the `tls` cargo
/// feature must be enabled for them to take effect.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    ca_cert_path: Option<PathBuf>,
    server_name: Option<String>,
}

impl TlsConfig {
    /// Creates an empty TLS configuration (system roots, endpoint hostname).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the CA certificate bundle used to verify the server.
    pub fn ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Overrides the server name presented for SNI and verification.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Returns the CA certificate path, if set.
    pub fn ca_cert(&self) -> Option<&PathBuf> {
        self.ca_cert_path.as_ref()
    }

    /// Returns the SNI override, if set.
    pub fn sni_override(&self) -> Option<&str> {
        self.server_name.as_deref()
    }
}

/// Per-endpoint reconnect backoff settings used by the background connector.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
}

impl BackoffConfig {
    /// Returns the backoff before the first retry of an endpoint.
    pub fn initial(&self) -> Duration {
        self.initial
    }

    /// Returns the backoff ceiling.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Returns the multiplier applied per failed attempt.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the jitter fraction applied to each delay.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Returns the delay before attempt number `attempt` (1-based), with
    /// jitter applied and capped at the ceiling.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(24);
        let base = self.initial.as_secs_f64() * self.multiplier.powi(exp as i32);

        let jittered = if self.jitter > 0.0 {
            use rand::Rng;
            let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            base * factor
        } else {
            base
        };

        Duration::from_secs_f64(jittered.max(0.0)).min(self.max)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_BACKOFF,
            max: DEFAULT_MAX_BACKOFF,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: DEFAULT_BACKOFF_JITTER,
        }
    }
}

/// Configuration of a GridKV client.
///
/// Built with [`ClientConfig::builder`]; validation happens in
/// [`ClientConfigBuilder::build`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    endpoints: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: bool,
    tls: TlsConfig,
    partition_awareness: bool,
    handshake_timeout: Duration,
    backoff: BackoffConfig,
}

impl ClientConfig {
    /// Returns a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Returns the configured `host:port` endpoints.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Returns the user name, if credentials are configured.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Returns the password, if credentials are configured.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns `true` if sockets are opened over TLS.
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Returns the TLS settings.
    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    /// Returns `true` if partition awareness was requested.
    pub fn partition_awareness(&self) -> bool {
        self.partition_awareness
    }

    /// Returns the handshake timeout.
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Returns the per-endpoint reconnect backoff settings.
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    endpoints: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    use_tls: bool,
    tls: TlsConfig,
    partition_awareness: bool,
    handshake_timeout: Option<Duration>,
    backoff: Option<BackoffConfig>,
}

impl ClientConfigBuilder {
    /// Creates a new builder with no endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a cluster endpoint as a `host:port` string.
    pub fn add_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoints.push(endpoint.into());
        self
    }

    /// Sets the endpoint list, replacing any previously added.
    pub fn endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints = endpoints.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the credentials transmitted in the handshake.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Enables TLS with the given settings.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.use_tls = true;
        self.tls = tls;
        self
    }

    /// Requests partition awareness: one session per node and affinity-based
    /// routing. Off by default.
    pub fn partition_awareness(mut self, enabled: bool) -> Self {
        self.partition_awareness = enabled;
        self
    }

    /// Sets the handshake timeout (default 30 s).
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Customizes the per-endpoint reconnect backoff.
    pub fn backoff(mut self, f: impl FnOnce(BackoffConfig) -> BackoffConfig) -> Self {
        self.backoff = Some(f(self.backoff.unwrap_or_default()));
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<ClientConfig> {
        if self.endpoints.is_empty() {
            return Err(GridError::IllegalArgument(
                "at least one endpoint is required".to_string(),
            ));
        }
        for endpoint in &self.endpoints {
            validate_endpoint(endpoint)?;
        }

        Ok(ClientConfig {
            endpoints: self.endpoints,
            username: self.username,
            password: self.password,
            use_tls: self.use_tls,
            tls: self.tls,
            partition_awareness: self.partition_awareness,
            handshake_timeout: self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
            backoff: self.backoff.unwrap_or_default(),
        })
    }
}

/// Allows adjusting backoff parameters through the builder closure.
impl BackoffConfig {
    /// Sets the initial backoff.
    pub fn initial_backoff(mut self, value: Duration) -> Self {
        self.initial = value;
        self
    }

    /// Sets the backoff ceiling.
    pub fn max_backoff(mut self, value: Duration) -> Self {
        self.max = value;
        self
    }

    /// Sets the per-attempt multiplier.
    pub fn backoff_multiplier(mut self, value: f64) -> Self {
        self.multiplier = value;
        self
    }

    /// Sets the jitter fraction in `[0, 1]`.
    pub fn backoff_jitter(mut self, value: f64) -> Self {
        self.jitter = value.clamp(0.0, 1.0);
        self
    }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let bad = || {
        GridError::IllegalArgument(format!(
            "endpoint '{}' is not a host:port pair",
            endpoint
        ))
    };

    let (host, port) = endpoint.rsplit_once(':').ok_or_else(bad)?;
    if host.is_empty() {
        return Err(bad());
    }
    port.parse::<u16>().map_err(|_| bad())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_endpoints_rejected() {
        let err = ClientConfig::builder().build().unwrap_err();
        assert!(matches!(err, GridError::IllegalArgument(_)));
        assert!(err.to_string().contains("at least one endpoint"));
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        for bad in ["localhost", ":10800", "host:", "host:port", "host:99999"] {
            let result = ClientConfig::builder().add_endpoint(bad).build();
            assert!(result.is_err(), "expected '{}' to be rejected", bad);
        }
    }

    #[test]
    fn test_valid_endpoints_accepted() {
        let config = ClientConfig::builder()
            .add_endpoint("127.0.0.1:10800")
            .add_endpoint("cache-node.internal:10801")
            .build()
            .unwrap();
        assert_eq!(config.endpoints().len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::builder()
            .add_endpoint("127.0.0.1:10800")
            .build()
            .unwrap();

        assert!(!config.partition_awareness());
        assert!(!config.use_tls());
        assert!(config.username().is_none());
        assert_eq!(config.handshake_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_credentials() {
        let config = ClientConfig::builder()
            .add_endpoint("127.0.0.1:10800")
            .credentials("admin", "secret")
            .build()
            .unwrap();

        assert_eq!(config.username(), Some("admin"));
        assert_eq!(config.password(), Some("secret"));
    }

    #[test]
    fn test_endpoints_replaces_previous() {
        let config = ClientConfig::builder()
            .add_endpoint("a:1")
            .endpoints(["b:2", "c:3"])
            .build()
            .unwrap();
        assert_eq!(config.endpoints(), &["b:2".to_string(), "c:3".to_string()]);
    }

    #[test]
    fn test_backoff_delay_growth_and_cap() {
        let backoff = BackoffConfig::default()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(500))
            .backoff_multiplier(2.0)
            .backoff_jitter(0.0);

        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_millis(400));
        // capped
        assert_eq!(backoff.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_attempt(30), Duration::from_millis(500));
    }

    #[test]
    fn test_backoff_jitter_varies_delay() {
        let backoff = BackoffConfig::default()
            .initial_backoff(Duration::from_millis(100))
            .backoff_jitter(0.5);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            seen.insert(backoff.delay_for_attempt(1).as_micros());
        }
        assert!(seen.len() > 1, "jitter should produce varied delays");
    }

    #[test]
    fn test_tls_builder() {
        let config = ClientConfig::builder()
            .add_endpoint("127.0.0.1:10800")
            .tls(TlsConfig::new().ca_cert_path("/etc/gridkv/ca.pem").server_name("grid"))
            .build()
            .unwrap();

        assert!(config.use_tls());
        assert_eq!(
            config.tls().ca_cert().map(|p| p.display().to_string()),
            Some("/etc/gridkv/ca.pem".to_string())
        );
        assert_eq!(config.tls().sni_override(), Some("grid"));
    }
}
