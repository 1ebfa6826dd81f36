// ── Runtime client configuration ──
//
// Describes how to reach the house service and the pads. Carries
// credential data and timeouts but never touches disk; the config crate
// builds one and hands it in.

use std::time::Duration;

use lightpad_api::{Credentials, DEFAULT_CLOUD_URL, TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

/// Everything needed to authenticate and talk to Lightpads.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// House service base URL. Production service when unset.
    pub cloud_url: Option<Url>,
    pub credentials: Credentials,
    /// House to take the access token from. First house on the account if unset.
    pub house_id: Option<String>,
    /// Certificate policy for the pads' control channel.
    pub tls: TlsMode,
    /// House service request timeout.
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub command_timeout: Duration,
    /// Lifetime stamped on issued sessions. `None` = until a pad rejects it.
    pub session_ttl: Option<Duration>,
}

impl ClientConfig {
    pub fn new(credentials: Credentials) -> Self {
        let transport = TransportConfig::default();
        Self {
            cloud_url: None,
            credentials,
            house_id: None,
            tls: transport.tls,
            http_timeout: Duration::from_secs(30),
            connect_timeout: transport.connect_timeout,
            handshake_timeout: transport.handshake_timeout,
            command_timeout: transport.command_timeout,
            session_ttl: None,
        }
    }

    pub fn cloud_url(&self) -> Result<Url, url::ParseError> {
        match &self.cloud_url {
            Some(url) => Ok(url.clone()),
            None => Url::parse(DEFAULT_CLOUD_URL),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self.tls.clone(),
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
            command_timeout: self.command_timeout,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Credentials::new("", SecretString::from(String::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_transport_defaults() {
        let config = ClientConfig::default();
        assert_eq!(
            config.cloud_url().unwrap().as_str(),
            "https://production.plum.technology/"
        );
        assert_eq!(config.command_timeout, Duration::from_secs(5));
        assert_eq!(config.tls, TlsMode::DangerAcceptInvalid);
        assert!(config.house_id.is_none());
    }

    #[test]
    fn transport_carries_timeouts() {
        let mut config = ClientConfig::default();
        config.command_timeout = Duration::from_millis(750);
        config.tls = TlsMode::System;

        let transport = config.transport();
        assert_eq!(transport.command_timeout, Duration::from_millis(750));
        assert_eq!(transport.tls, TlsMode::System);
    }
}
