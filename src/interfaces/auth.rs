//! Authorization backend

use async_trait::async_trait;
use std::net::IpAddr;

use crate::protocols::sip::DigestCredentials;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Digest user name, or the caller's address when no credentials were sent
    pub identity: String,
    pub remote_ip: IpAddr,
    pub cli: Option<String>,
    pub cld: Option<String>,
    pub call_id: String,
    pub correlation_id: String,
    pub digest: Option<DigestCredentials>,
}

/// Attribute returned with an authorization answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthAttribute {
    /// `Routing:<route>`, one outbound destination
    Routing(String),
    /// `CLI:<caller id>` override
    CallerId(String),
    /// `CNAM:<caller name>` override
    CallerName(String),
    /// `h323-credit-time`, seconds
    CreditTime(u32),
    Other { name: String, value: String },
}

impl AuthAttribute {
    /// Classify a raw `name = value` pair as returned by the backend.
    /// Prefixed values arrive in `h323-ivr-in` style attributes.
    pub fn from_pair(name: &str, value: &str) -> Self {
        if name == "h323-credit-time" {
            if let Ok(seconds) = value.trim().parse::<u32>() {
                return Self::CreditTime(seconds);
            }
        }
        if let Some(route) = value.strip_prefix("Routing:") {
            return Self::Routing(route.to_string());
        }
        if let Some(cli) = value.strip_prefix("CLI:") {
            return Self::CallerId(cli.to_string());
        }
        if let Some(cnam) = value.strip_prefix("CNAM:") {
            return Self::CallerName(cnam.to_string());
        }
        Self::Other {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub accepted: bool,
    pub attributes: Vec<AuthAttribute>,
}

impl AuthResult {
    pub fn accepted(attributes: Vec<AuthAttribute>) -> Self {
        Self {
            accepted: true,
            attributes,
        }
    }

    pub fn rejected() -> Self {
        Self {
            accepted: false,
            attributes: Vec::new(),
        }
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().filter_map(|a| match a {
            AuthAttribute::Routing(route) => Some(route.as_str()),
            _ => None,
        })
    }

    /// Last caller id override, if any
    pub fn caller_id(&self) -> Option<&str> {
        self.attributes.iter().rev().find_map(|a| match a {
            AuthAttribute::CallerId(cli) => Some(cli.as_str()),
            _ => None,
        })
    }

    pub fn caller_name(&self) -> Option<&str> {
        self.attributes.iter().rev().find_map(|a| match a {
            AuthAttribute::CallerName(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn credit_time(&self) -> Option<u32> {
        self.attributes.iter().rev().find_map(|a| match a {
            AuthAttribute::CreditTime(seconds) => Some(*seconds),
            _ => None,
        })
    }
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn authorize(&self, request: AuthRequest) -> Result<AuthResult>;
}
