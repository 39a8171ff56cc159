//! Outbound route descriptors
//!
//! A route is written as `[cld@]host[:port][;name=value]*`, for example
//! `15551234@gw1.example.net:5070;credit-time=300;hs_scodes=486,603`.
//! Authorization backends return one such string per `Routing:` attribute;
//! a configured static route uses the same syntax.

use std::fmt;
use std::net::SocketAddr;

use crate::interfaces::resolver::Resolver;
use crate::protocols::sip::Header;
use crate::{Error, Result};

/// Host value that makes the route point back at the calling party
pub const CALLER_HOST: &str = "sip-ua";

const DEFAULT_PROXY_PORT: u16 = 5060;

/// A single recognized `name=value` route parameter
#[derive(Debug, Clone, PartialEq)]
pub enum RouteParam {
    CreditTime(Option<u32>),
    Expires(Option<u32>),
    NoProgressExpires(Option<u32>),
    HuntstopCodes(Vec<u16>),
    ForwardOnFail,
    Auth { user: String, password: String },
    CallerId(Option<String>),
    CallerName(Option<String>),
    ExtraHeaders(Vec<Header>),
    Rtpp(bool),
    OutboundProxy { host: String, port: u16 },
    GroupTimeout { timeout: u64, skip: u32 },
    BillTo(String),
    BillCli(String),
    BillCld(String),
    Other { name: String, value: String },
}

impl RouteParam {
    pub fn parse(name: &str, value: &str) -> Result<Self> {
        let param = match name {
            "credit-time" => Self::CreditTime(parse_seconds(name, value)?),
            "expires" => Self::Expires(parse_seconds(name, value)?),
            "np_expires" => Self::NoProgressExpires(parse_seconds(name, value)?),
            "hs_scodes" => {
                let codes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(|c| {
                        c.parse::<u16>()
                            .map_err(|_| Error::route(format!("Invalid hs_scodes entry: {}", c)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Self::HuntstopCodes(codes)
            }
            "forward_on_fail" => Self::ForwardOnFail,
            "auth" => {
                let (user, password) = value
                    .split_once(':')
                    .ok_or_else(|| Error::route(format!("auth parameter must be user:password, got {}", value)))?;
                Self::Auth {
                    user: user.to_string(),
                    password: password.to_string(),
                }
            }
            "cli" => Self::CallerId(non_empty(value.to_string())),
            "cnam" => Self::CallerName(non_empty(url_decode(value)?)),
            "ash" => {
                let decoded = url_decode(value)?;
                let headers = decoded
                    .split('\n')
                    .map(|l| l.trim_end_matches('\r'))
                    .filter(|l| !l.is_empty())
                    .map(Header::parse)
                    .collect::<Result<Vec<_>>>()?;
                Self::ExtraHeaders(headers)
            }
            "rtpp" => {
                let flag = value
                    .parse::<i64>()
                    .map_err(|_| Error::route(format!("Invalid rtpp value: {}", value)))?;
                Self::Rtpp(flag != 0)
            }
            "op" => {
                let (host, port) = split_host_port(value)?;
                if host.is_empty() {
                    return Err(Error::route("op parameter requires a host"));
                }
                Self::OutboundProxy {
                    host,
                    port: port.unwrap_or(DEFAULT_PROXY_PORT),
                }
            }
            "gt" => {
                let (timeout, skip) = value
                    .split_once(',')
                    .ok_or_else(|| Error::route(format!("gt parameter must be timeout,skip, got {}", value)))?;
                let timeout = timeout
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::route(format!("Invalid group timeout: {}", timeout)))?;
                let skip = skip
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| Error::route(format!("Invalid group skip count: {}", skip)))?;
                Self::GroupTimeout { timeout, skip }
            }
            "bill-to" => Self::BillTo(value.to_string()),
            "bill-cli" => Self::BillCli(value.to_string()),
            "bill-cld" => Self::BillCld(value.to_string()),
            _ => Self::Other {
                name: name.to_string(),
                value: value.to_string(),
            },
        };
        Ok(param)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct B2bRoute {
    /// Position in the call's route list, assigned by `customize`
    pub rnum: u32,
    pub cld: Option<String>,
    /// The route named a destination user explicitly, even an empty one
    pub cld_set: bool,
    pub hostport: String,
    pub hostonly: String,
    pub port: u16,
    pub ipv6_only: bool,
    pub addresses: Vec<SocketAddr>,
    pub credit_time: Option<u32>,
    pub credit_time_set: bool,
    pub expires: Option<u32>,
    pub no_progress_expires: Option<u32>,
    pub forward_on_fail: bool,
    pub auth: Option<(String, String)>,
    pub cli: Option<String>,
    pub cli_set: bool,
    pub caller_name: Option<String>,
    pub extra_headers: Vec<Header>,
    pub rtpp: bool,
    pub outbound_proxy: Option<(String, u16)>,
    pub huntstop_scodes: Vec<u16>,
    /// Raw `gt=timeout,skip` value
    pub gt: Option<(u64, u32)>,
    /// `(timeout, skip_to_rnum)` once customized
    pub group_timeout: Option<(u64, u32)>,
    pub bill_to: Option<String>,
    pub bill_cli: Option<String>,
    pub bill_cld: Option<String>,
    pub extra_params: Vec<(String, String)>,
}

impl B2bRoute {
    /// Parse a route string. Addresses stay empty until [`B2bRoute::resolve`].
    pub fn parse(spec: &str, default_port: u16) -> Result<Self> {
        let mut segments = spec.trim().split(';');
        let target = segments.next().unwrap_or("").trim();

        let (cld, cld_set, hostport) = match target.split_once('@') {
            Some((cld, hostport)) => (non_empty(cld.to_string()), true, hostport),
            None => (None, false, target),
        };
        if hostport.is_empty() {
            return Err(Error::route(format!("Route has no host: {}", spec)));
        }

        let ipv6_only = hostport.starts_with('[');
        let (host, port) = split_host_port(hostport)?;
        if host.is_empty() {
            return Err(Error::route(format!("Route has no host: {}", spec)));
        }
        let hostonly = if ipv6_only { format!("[{}]", host) } else { host };

        let mut route = Self {
            rnum: 0,
            cld,
            cld_set,
            hostport: hostport.to_string(),
            hostonly,
            port: port.unwrap_or(default_port),
            ipv6_only,
            addresses: Vec::new(),
            credit_time: None,
            credit_time_set: false,
            expires: None,
            no_progress_expires: None,
            forward_on_fail: false,
            auth: None,
            cli: None,
            cli_set: false,
            caller_name: None,
            extra_headers: Vec::new(),
            rtpp: true,
            outbound_proxy: None,
            huntstop_scodes: Vec::new(),
            gt: None,
            group_timeout: None,
            bill_to: None,
            bill_cli: None,
            bill_cld: None,
            extra_params: Vec::new(),
        };

        for segment in segments {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
            route.apply(RouteParam::parse(name.trim(), value.trim())?);
        }

        Ok(route)
    }

    fn apply(&mut self, param: RouteParam) {
        match param {
            RouteParam::CreditTime(value) => {
                self.credit_time = value;
                self.credit_time_set = true;
            }
            RouteParam::Expires(value) => self.expires = value,
            RouteParam::NoProgressExpires(value) => self.no_progress_expires = value,
            RouteParam::HuntstopCodes(codes) => self.huntstop_scodes = codes,
            RouteParam::ForwardOnFail => self.forward_on_fail = true,
            RouteParam::Auth { user, password } => self.auth = Some((user, password)),
            RouteParam::CallerId(cli) => {
                self.cli = cli;
                self.cli_set = true;
            }
            RouteParam::CallerName(name) => self.caller_name = name,
            RouteParam::ExtraHeaders(headers) => self.extra_headers.extend(headers),
            RouteParam::Rtpp(flag) => self.rtpp = flag,
            RouteParam::OutboundProxy { host, port } => self.outbound_proxy = Some((host, port)),
            RouteParam::GroupTimeout { timeout, skip } => self.gt = Some((timeout, skip)),
            RouteParam::BillTo(value) => self.bill_to = Some(value),
            RouteParam::BillCli(value) => self.bill_cli = Some(value),
            RouteParam::BillCld(value) => self.bill_cld = Some(value),
            RouteParam::Other { name, value } => self.extra_params.push((name, value)),
        }
    }

    /// Route pointing back at whoever sent the call
    pub fn is_caller_host(&self) -> bool {
        self.hostonly == CALLER_HOST
    }

    /// Host without IPv6 brackets, as handed to the resolver
    pub fn host(&self) -> &str {
        self.hostonly.trim_start_matches('[').trim_end_matches(']')
    }

    pub async fn resolve(&mut self, resolver: &dyn Resolver) -> Result<()> {
        if self.is_caller_host() {
            return Ok(());
        }
        let mut addresses = resolver.resolve(self.host(), self.port).await?;
        if self.ipv6_only {
            addresses.retain(|a| a.is_ipv6());
        }
        if addresses.is_empty() {
            return Err(Error::resolve(format!("{}: no usable addresses", self.hostonly)));
        }
        self.addresses = addresses;
        Ok(())
    }

    /// Fill in per-call defaults. Applied once, after the route has been
    /// given its position in the call's route list.
    pub fn customize(
        &mut self,
        rnum: u32,
        default_cld: Option<&str>,
        default_cli: Option<&str>,
        default_credit_time: Option<u32>,
        pass_headers: &[Header],
        max_credit_time: Option<u32>,
    ) {
        self.rnum = rnum;
        if !self.cld_set {
            self.cld = default_cld.map(str::to_string);
        }
        if !self.cli_set {
            self.cli = default_cli.map(str::to_string);
        }
        if !self.credit_time_set {
            self.credit_time = default_credit_time;
        }
        if let Some((timeout, skip)) = self.gt {
            // An oversized skip means "past every route"
            self.group_timeout = Some((timeout, rnum.saturating_add(skip)));
        }
        self.extra_headers.extend(pass_headers.iter().cloned());
        if let Some(max) = max_credit_time {
            match self.credit_time {
                Some(credit) if credit <= max => {}
                _ => self.credit_time = Some(max),
            }
        }
    }

    /// A zero credit time or zero expiry makes the route unusable
    pub fn is_usable(&self) -> bool {
        self.credit_time != Some(0) && self.expires != Some(0)
    }

    /// First resolved address in the caller's address family, else the
    /// first resolved address
    pub fn next_hop(&self, source: &SocketAddr) -> Option<SocketAddr> {
        self.addresses
            .iter()
            .find(|a| a.is_ipv6() == source.is_ipv6())
            .or_else(|| self.addresses.first())
            .copied()
    }
}

impl fmt::Display for B2bRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cld_set {
            write!(f, "{}@", self.cld.as_deref().unwrap_or(""))?;
        }
        write!(f, "{}:{}", self.hostonly, self.port)
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_seconds(name: &str, value: &str) -> Result<Option<u32>> {
    let seconds = value
        .parse::<i64>()
        .map_err(|_| Error::route(format!("Invalid {} value: {}", name, value)))?;
    if seconds < 0 {
        return Ok(None);
    }
    u32::try_from(seconds)
        .map(Some)
        .map_err(|_| Error::route(format!("{} value out of range: {}", name, value)))
}

/// Split `host[:port]` or `[v6addr][:port]`
fn split_host_port(value: &str) -> Result<(String, Option<u16>)> {
    let (host, port) = if let Some(rest) = value.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::route(format!("Unterminated IPv6 address: {}", value)))?;
        let port = match after {
            "" => None,
            p => Some(
                p.strip_prefix(':')
                    .ok_or_else(|| Error::route(format!("Invalid host:port: {}", value)))?,
            ),
        };
        (host, port)
    } else {
        match value.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (value, None),
        }
    };

    let port = match port {
        None | Some("") => None,
        Some(p) => Some(
            p.parse::<u16>()
                .map_err(|_| Error::route(format!("Invalid port in {}", value)))?,
        ),
    };
    Ok((host.to_string(), port))
}

fn url_decode(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = value
                .get(i + 1..i + 3)
                .ok_or_else(|| Error::route(format!("Truncated escape in {}", value)))?;
            let decoded = hex::decode(escape)
                .map_err(|_| Error::route(format!("Invalid escape %{} in {}", escape, value)))?;
            out.extend_from_slice(&decoded);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| Error::route(format!("Escaped value is not UTF-8: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StaticResolver;

    #[test]
    fn test_parse_full_route() {
        let route = B2bRoute::parse(
            "15551234@gw1.example.net:5070;credit-time=300;expires=60;np_expires=10;\
             hs_scodes=486, 603;auth=alice:s3cr;cli=1000;cnam=Alice%20Smith;rtpp=0;\
             op=proxy.example.net;gt=5,2;bill-to=acct;bill-cli=111;bill-cld=222;x-custom=abc",
            5060,
        )
        .unwrap();

        assert_eq!(route.cld.as_deref(), Some("15551234"));
        assert!(route.cld_set);
        assert_eq!(route.hostonly, "gw1.example.net");
        assert_eq!(route.port, 5070);
        assert_eq!(route.credit_time, Some(300));
        assert!(route.credit_time_set);
        assert_eq!(route.expires, Some(60));
        assert_eq!(route.no_progress_expires, Some(10));
        assert_eq!(route.huntstop_scodes, vec![486, 603]);
        assert_eq!(route.auth, Some(("alice".to_string(), "s3cr".to_string())));
        assert_eq!(route.cli.as_deref(), Some("1000"));
        assert_eq!(route.caller_name.as_deref(), Some("Alice Smith"));
        assert!(!route.rtpp);
        assert_eq!(route.outbound_proxy, Some(("proxy.example.net".to_string(), 5060)));
        assert_eq!(route.gt, Some((5, 2)));
        assert_eq!(route.bill_to.as_deref(), Some("acct"));
        assert_eq!(route.bill_cli.as_deref(), Some("111"));
        assert_eq!(route.bill_cld.as_deref(), Some("222"));
        assert_eq!(route.extra_params, vec![("x-custom".to_string(), "abc".to_string())]);
    }

    #[test]
    fn test_defaults_and_empty_values() {
        let route = B2bRoute::parse("gw.example.net", 5080).unwrap();
        assert_eq!(route.port, 5080);
        assert!(!route.cld_set);
        assert!(route.rtpp);
        assert!(!route.forward_on_fail);

        let route = B2bRoute::parse("@gw.example.net;cli=;forward_on_fail", 5060).unwrap();
        assert!(route.cld_set);
        assert_eq!(route.cld, None);
        assert!(route.cli_set);
        assert_eq!(route.cli, None);
        assert!(route.forward_on_fail);
    }

    #[test]
    fn test_negative_times_are_unset() {
        let route = B2bRoute::parse("gw.example.net;credit-time=-1;expires=-5", 5060).unwrap();
        assert_eq!(route.credit_time, None);
        assert!(route.credit_time_set);
        assert_eq!(route.expires, None);
        assert!(route.is_usable());
    }

    #[test]
    fn test_extra_headers_are_decoded() {
        let route = B2bRoute::parse("gw.example.net;ash=X-Foo%3A%20bar;ash=X-Baz%3Aqux", 5060).unwrap();
        assert_eq!(
            route.extra_headers,
            vec![Header::new("X-Foo", "bar"), Header::new("X-Baz", "qux")]
        );
    }

    #[test]
    fn test_ipv6_host() {
        let route = B2bRoute::parse("[2001:db8::1]:5070", 5060).unwrap();
        assert!(route.ipv6_only);
        assert_eq!(route.hostonly, "[2001:db8::1]");
        assert_eq!(route.host(), "2001:db8::1");
        assert_eq!(route.port, 5070);

        let route = B2bRoute::parse("[2001:db8::1]", 5060).unwrap();
        assert_eq!(route.port, 5060);
    }

    #[test]
    fn test_parse_errors() {
        assert!(B2bRoute::parse("gw.example.net;auth=nocolon", 5060).is_err());
        assert!(B2bRoute::parse("gw.example.net;credit-time=abc", 5060).is_err());
        assert!(B2bRoute::parse("gw.example.net:99999", 5060).is_err());
        assert!(B2bRoute::parse("gw.example.net;hs_scodes=48x", 5060).is_err());
        assert!(B2bRoute::parse("gw.example.net;cnam=%zz", 5060).is_err());
        assert!(B2bRoute::parse("gw.example.net;gt=5", 5060).is_err());
        assert!(B2bRoute::parse("[2001:db8::1", 5060).is_err());
        assert!(B2bRoute::parse("1000@", 5060).is_err());
    }

    #[test]
    fn test_customize_defaults() {
        let mut route = B2bRoute::parse("gw.example.net;gt=10,2", 5060).unwrap();
        route.customize(3, Some("2000"), Some("1000"), Some(120), &[Header::new("P-Foo", "1")], None);
        assert_eq!(route.rnum, 3);
        assert_eq!(route.cld.as_deref(), Some("2000"));
        assert_eq!(route.cli.as_deref(), Some("1000"));
        assert_eq!(route.credit_time, Some(120));
        assert_eq!(route.group_timeout, Some((10, 5)));
        assert_eq!(route.extra_headers, vec![Header::new("P-Foo", "1")]);
    }

    #[test]
    fn test_customize_saturates_group_skip() {
        let mut route = B2bRoute::parse("gw.example.net;gt=5,4294967295", 5060).unwrap();
        route.customize(3, None, None, None, &[], None);
        assert_eq!(route.group_timeout, Some((5, u32::MAX)));
    }

    #[test]
    fn test_customize_keeps_explicit_values() {
        let mut route = B2bRoute::parse("@gw.example.net;cli=5;credit-time=30", 5060).unwrap();
        route.customize(1, Some("2000"), Some("1000"), Some(120), &[], None);
        assert_eq!(route.cld, None);
        assert_eq!(route.cli.as_deref(), Some("5"));
        assert_eq!(route.credit_time, Some(30));
    }

    #[test]
    fn test_customize_clamps_credit_time() {
        let mut unlimited = B2bRoute::parse("gw.example.net", 5060).unwrap();
        unlimited.customize(1, None, None, None, &[], Some(600));
        assert_eq!(unlimited.credit_time, Some(600));

        let mut large = B2bRoute::parse("gw.example.net;credit-time=900", 5060).unwrap();
        large.customize(1, None, None, None, &[], Some(600));
        assert_eq!(large.credit_time, Some(600));

        let mut small = B2bRoute::parse("gw.example.net;credit-time=60", 5060).unwrap();
        small.customize(1, None, None, None, &[], Some(600));
        assert_eq!(small.credit_time, Some(60));
    }

    #[test]
    fn test_zero_credit_or_expiry_is_unusable() {
        assert!(!B2bRoute::parse("gw;credit-time=0", 5060).unwrap().is_usable());
        assert!(!B2bRoute::parse("gw;expires=0", 5060).unwrap().is_usable());
    }

    #[tokio::test]
    async fn test_resolve_and_next_hop() {
        let resolver = StaticResolver::new()
            .with_host("gw.example.net", &["192.0.2.20", "2001:db8::20"]);

        let mut route = B2bRoute::parse("gw.example.net:5070", 5060).unwrap();
        route.resolve(&resolver).await.unwrap();
        assert_eq!(route.addresses.len(), 2);

        let v4_caller: SocketAddr = "198.51.100.1:5060".parse().unwrap();
        let v6_caller: SocketAddr = "[2001:db8::99]:5060".parse().unwrap();
        assert_eq!(route.next_hop(&v4_caller), Some("192.0.2.20:5070".parse().unwrap()));
        assert_eq!(route.next_hop(&v6_caller), Some("[2001:db8::20]:5070".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_bracketed_host_resolves_ipv6_only() {
        let resolver = StaticResolver::new().with_host("2001:db8::1", &["2001:db8::1"]);
        let mut route = B2bRoute::parse("[2001:db8::1]", 5060).unwrap();
        route.resolve(&resolver).await.unwrap();
        assert_eq!(route.addresses, vec!["[2001:db8::1]:5060".parse().unwrap()]);

        let v4_only = StaticResolver::new().with_host("gw.example.net", &["192.0.2.1"]);
        let mut route = B2bRoute::parse("[gw.example.net]", 5060).unwrap();
        assert!(route.resolve(&v4_only).await.is_err());
    }

    #[tokio::test]
    async fn test_caller_host_skips_resolution() {
        let resolver = StaticResolver::new();
        let mut route = B2bRoute::parse("sip-ua:5060", 5060).unwrap();
        assert!(route.is_caller_host());
        route.resolve(&resolver).await.unwrap();
        assert!(route.addresses.is_empty());
    }
}
