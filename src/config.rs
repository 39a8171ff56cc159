//! Configuration management for the Redfire B2BUA

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;

use crate::services::route::B2bRoute;
use crate::services::translation::TranslationRule;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct B2buaConfig {
    pub general: GeneralConfig,
    pub sip: SipConfig,
    pub auth: AuthConfig,
    pub accounting: AccountingConfig,
    pub routing: RoutingConfig,
    pub keepalive: KeepaliveConfig,
    pub media_relay: MediaRelayConfig,
    pub admin: AdminConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub node_id: String,
    /// Value used for the User-Agent/Server headers of both legs
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SipConfig {
    pub listen_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Challenge requests that carry no credentials
    #[serde(default)]
    pub digest_auth: bool,
    /// Challenge immediately instead of trying source address authorization first
    #[serde(default)]
    pub digest_auth_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingConfig {
    pub enabled: bool,
    /// Emit start records in addition to stop records
    #[serde(default)]
    pub send_start: bool,
    #[serde(default)]
    pub cdr_directory: Option<String>,
    pub rotation_size_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Route used for every call instead of authorization supplied routing
    #[serde(default)]
    pub static_route: Option<String>,
    #[serde(default)]
    pub max_credit_time: Option<u32>,
    #[serde(default)]
    pub hide_call_id: bool,
    /// `s/pattern/replacement/[g]` rule applied to inbound called numbers
    #[serde(default)]
    pub translate_in: Option<String>,
    /// `s/pattern/replacement/[g]` rule applied to outbound called numbers
    #[serde(default)]
    pub translate_out: Option<String>,
    #[serde(default)]
    pub pass_headers: Vec<String>,
    #[serde(default)]
    pub allowed_payload_types: Option<Vec<u8>>,
    #[serde(default)]
    pub accept_ips: Option<Vec<IpAddr>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Keepalive interval for the answering leg, seconds (0 disables)
    pub answer: u32,
    /// Keepalive interval for the originating leg, seconds (0 disables)
    pub originate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRelayConfig {
    pub enabled: bool,
    #[serde(default)]
    pub clients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub socket_path: String,
    /// Housekeeping period, seconds
    pub housekeeping_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "compact")]
    Compact,
    #[serde(rename = "full")]
    Full,
}

impl RoutingConfig {
    pub fn inbound_translation(&self) -> Result<Option<TranslationRule>> {
        self.translate_in.as_deref().map(TranslationRule::parse).transpose()
    }

    pub fn outbound_translation(&self) -> Result<Option<TranslationRule>> {
        self.translate_out.as_deref().map(TranslationRule::parse).transpose()
    }
}

impl B2buaConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: B2buaConfig = toml::from_str(&contents)
            .map_err(|e| Error::parse(format!("Invalid TOML: {}", e)))?;
        Ok(config)
    }

    pub fn load_from_env() -> Result<Self> {
        let mut settings = config::Config::builder();

        // Load from environment variables with B2BUA_ prefix
        settings = settings.add_source(
            config::Environment::with_prefix("B2BUA")
                .separator("_")
        );

        let config = settings.build()?;
        let b2bua_config = config.try_deserialize()?;
        Ok(b2bua_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sip.listen_port == 0 {
            return Err(Error::parse("SIP listen port must be non-zero"));
        }

        if self.auth.digest_auth_only && !self.auth.digest_auth {
            return Err(Error::parse("digest_auth_only requires digest_auth"));
        }

        if let Some(route) = &self.routing.static_route {
            B2bRoute::parse(route, self.sip.listen_port)?;
        }

        self.routing.inbound_translation()?;
        self.routing.outbound_translation()?;

        if let Some(pts) = &self.routing.allowed_payload_types {
            if pts.is_empty() {
                return Err(Error::parse("allowed_payload_types must not be empty"));
            }
        }

        if self.media_relay.enabled && self.media_relay.clients.is_empty() {
            return Err(Error::parse("Media relay enabled but no relay clients configured"));
        }

        if self.admin.housekeeping_interval == 0 {
            return Err(Error::parse("Housekeeping interval must be non-zero"));
        }

        Ok(())
    }

    pub fn default_config() -> Self {
        Self {
            general: GeneralConfig {
                node_id: "redfire-b2bua-1".to_string(),
                user_agent: format!("Redfire-B2BUA/{}", crate::VERSION),
            },
            sip: SipConfig {
                listen_port: 5060,
            },
            auth: AuthConfig {
                enabled: true,
                digest_auth: false,
                digest_auth_only: false,
            },
            accounting: AccountingConfig {
                enabled: true,
                send_start: false,
                cdr_directory: Some("/var/lib/redfire-b2bua/cdr".to_string()),
                rotation_size_mb: 64,
            },
            routing: RoutingConfig {
                static_route: None,
                max_credit_time: None,
                hide_call_id: false,
                translate_in: None,
                translate_out: None,
                pass_headers: vec![],
                allowed_payload_types: None,
                accept_ips: None,
            },
            keepalive: KeepaliveConfig {
                answer: 0,
                originate: 0,
            },
            media_relay: MediaRelayConfig {
                enabled: false,
                clients: vec![],
            },
            admin: AdminConfig {
                socket_path: "/var/run/redfire-b2bua.sock".to_string(),
                housekeeping_interval: 60,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("/var/log/redfire-b2bua.log".to_string()),
                format: LogFormat::Json,
            },
        }
    }
}
