//! Outbound target validation (SSRF protection).
//!
//! # Responsibilities
//! - Parse and normalize the target URL
//! - Enforce the scheme allow-list
//! - Reject blocklisted and cloud-metadata hostnames
//! - Resolve the host and reject any address in a blocked range
//!
//! # Design Decisions
//! - Decisions are made on resolved addresses, never on the literal hostname
//! - Every resolved address must pass; one bad record rejects the target
//! - The same [`AddressPolicy`] is re-applied at connect time by the transport
//!   so a second DNS answer cannot smuggle in a blocked address

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use url::{Host, Url};

use crate::config::SsrfConfig;
use crate::error::ValidationError;

const METADATA_HOSTS: [&str; 4] = [
    "metadata",
    "metadata.google.internal",
    "metadata.azure.com",
    "instance-data.ec2.internal",
];

const METADATA_V4: [Ipv4Addr; 2] = [
    Ipv4Addr::new(169, 254, 169, 254),
    Ipv4Addr::new(100, 100, 100, 200),
];

// fd00:ec2::254
const METADATA_V6: Ipv6Addr = Ipv6Addr::new(0xfd00, 0x0ec2, 0, 0, 0, 0, 0, 0x0254);

/// Effective `(scheme, host, port)` of a request target.
///
/// Rate limiting, circuit breaking and pooling are all keyed on this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn from_url(url: &Url) -> Result<Self, ValidationError> {
        let host = url.host_str().ok_or(ValidationError::MissingHost)?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ValidationError::MalformedUrl(format!("no port for {url}")))?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Host name resolution used by validation and by the guarded transport.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system resolver via `tokio::net::lookup_host`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Which address ranges are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPolicy {
    pub enabled: bool,
    pub block_private: bool,
    pub block_localhost: bool,
}

impl AddressPolicy {
    pub fn from_config(config: &SsrfConfig) -> Self {
        Self {
            enabled: config.enabled,
            block_private: config.block_private,
            block_localhost: config.block_localhost,
        }
    }

    /// Returns the name of the blocked range `ip` falls in, if any.
    pub fn check(&self, ip: IpAddr) -> Result<(), &'static str> {
        if !self.enabled {
            return Ok(());
        }
        match classify(ip) {
            Some(AddressClass::Metadata) => Err("cloud metadata"),
            Some(AddressClass::Loopback) if self.block_localhost => Err("loopback"),
            Some(AddressClass::Unspecified) if self.block_localhost => Err("unspecified"),
            Some(AddressClass::Private) if self.block_private => Err("private"),
            Some(AddressClass::LinkLocal) if self.block_private => Err("link-local"),
            Some(AddressClass::UniqueLocal) if self.block_private => Err("unique-local"),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddressClass {
    Metadata,
    Loopback,
    Unspecified,
    Private,
    LinkLocal,
    UniqueLocal,
}

fn classify(ip: IpAddr) -> Option<AddressClass> {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => match embedded_v4(v6) {
            Some(v4) => classify_v4(v4),
            None => classify_v6(v6),
        },
    }
}

/// IPv4 address carried by an IPv4-mapped (`::ffff:a.b.c.d`), IPv4-compatible
/// (`::a.b.c.d`) or NAT64 (`64:ff9b::a.b.c.d`) IPv6 address.
fn embedded_v4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return Some(v4);
    }
    let seg = ip.segments();
    let tail = Ipv4Addr::new(
        (seg[6] >> 8) as u8,
        seg[6] as u8,
        (seg[7] >> 8) as u8,
        seg[7] as u8,
    );
    match seg {
        // `::` and `::1` are native IPv6 addresses
        [0, 0, 0, 0, 0, 0, 0, 0 | 1] => None,
        [0, 0, 0, 0, 0, 0, _, _] => Some(tail),
        [0x64, 0xff9b, 0, 0, 0, 0, _, _] => Some(tail),
        _ => None,
    }
}

fn classify_v4(ip: Ipv4Addr) -> Option<AddressClass> {
    if METADATA_V4.contains(&ip) {
        Some(AddressClass::Metadata)
    } else if ip.is_loopback() {
        Some(AddressClass::Loopback)
    } else if ip.is_unspecified() {
        Some(AddressClass::Unspecified)
    } else if ip.is_private() || is_shared_v4(ip) {
        Some(AddressClass::Private)
    } else if ip.is_link_local() {
        Some(AddressClass::LinkLocal)
    } else {
        None
    }
}

// 100.64.0.0/10, carrier-grade NAT
fn is_shared_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 100 && octets[1] & 0xc0 == 64
}

fn classify_v6(ip: Ipv6Addr) -> Option<AddressClass> {
    let first = ip.segments()[0];
    if ip == METADATA_V6 {
        Some(AddressClass::Metadata)
    } else if ip.is_loopback() {
        Some(AddressClass::Loopback)
    } else if ip.is_unspecified() {
        Some(AddressClass::Unspecified)
    } else if first & 0xffc0 == 0xfe80 {
        Some(AddressClass::LinkLocal)
    } else if first & 0xfe00 == 0xfc00 {
        Some(AddressClass::UniqueLocal)
    } else {
        None
    }
}

/// A target that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedTarget {
    /// Normalized URL (lower-cased host, default port elided, no fragment).
    pub url: Url,
    pub destination: Destination,
    /// Addresses checked during validation. Empty when checks are disabled.
    pub addrs: Vec<IpAddr>,
}

/// Validates outbound request targets.
pub struct TargetValidator {
    allowed_schemes: Vec<String>,
    blocked_hosts: Vec<String>,
    policy: AddressPolicy,
    resolver: Arc<dyn Resolve>,
}

impl TargetValidator {
    pub fn new(config: &SsrfConfig) -> Self {
        let mut blocked_hosts: Vec<String> = Vec::new();
        if config.block_localhost {
            blocked_hosts.extend(["localhost".to_string(), ".localhost".to_string()]);
        }
        if config.block_private {
            blocked_hosts.extend([".local".to_string(), ".internal".to_string()]);
        }
        blocked_hosts.extend(config.blocked_hosts.iter().map(|h| h.trim().to_ascii_lowercase()));

        Self {
            allowed_schemes: config.allowed_schemes.clone(),
            blocked_hosts,
            policy: AddressPolicy::from_config(config),
            resolver: Arc::new(SystemResolver),
        }
    }

    /// Replace the resolver (tests use a static one).
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn policy(&self) -> AddressPolicy {
        self.policy
    }

    pub fn resolver(&self) -> Arc<dyn Resolve> {
        self.resolver.clone()
    }

    /// Syntactic checks only: parse, normalize, scheme, host presence.
    pub fn parse(&self, raw: &str) -> Result<(Url, Destination), ValidationError> {
        let mut url = Url::parse(raw.trim()).map_err(|e| ValidationError::MalformedUrl(e.to_string()))?;
        if !self.allowed_schemes.iter().any(|s| s == url.scheme()) {
            return Err(ValidationError::SchemeNotAllowed(url.scheme().to_string()));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(ValidationError::MissingHost);
        }
        url.set_fragment(None);
        let destination = Destination::from_url(&url)?;
        Ok((url, destination))
    }

    /// Full validation including DNS resolution.
    pub async fn validate(&self, raw: &str) -> Result<ValidatedTarget, ValidationError> {
        let (url, destination) = self.parse(raw)?;
        if !self.policy.enabled {
            return Ok(ValidatedTarget {
                url,
                destination,
                addrs: Vec::new(),
            });
        }

        let addrs = match url.host() {
            Some(Host::Ipv4(v4)) => vec![IpAddr::V4(v4)],
            Some(Host::Ipv6(v6)) => vec![IpAddr::V6(v6)],
            Some(Host::Domain(name)) => {
                self.check_hostname(name)?;
                let resolved = self
                    .resolver
                    .resolve(name, destination.port)
                    .await
                    .map_err(|e| ValidationError::Unresolvable {
                        host: name.to_string(),
                        reason: e.to_string(),
                    })?;
                if resolved.is_empty() {
                    return Err(ValidationError::Unresolvable {
                        host: name.to_string(),
                        reason: "no addresses".to_string(),
                    });
                }
                resolved
            }
            None => return Err(ValidationError::MissingHost),
        };

        for addr in &addrs {
            if let Err(range) = self.policy.check(*addr) {
                tracing::warn!(host = %destination.host, %addr, range, "Blocked outbound target");
                return Err(ValidationError::BlockedAddress {
                    host: destination.host.clone(),
                    addr: *addr,
                    range,
                });
            }
        }

        Ok(ValidatedTarget {
            url,
            destination,
            addrs,
        })
    }

    fn check_hostname(&self, name: &str) -> Result<(), ValidationError> {
        let name = name.trim_end_matches('.');
        let metadata = METADATA_HOSTS.contains(&name);
        let listed = self.blocked_hosts.iter().any(|entry| host_matches(name, entry));
        if metadata || listed {
            tracing::warn!(host = %name, "Blocked outbound hostname");
            return Err(ValidationError::BlockedHost(name.to_string()));
        }
        Ok(())
    }
}

/// `entry` matches exactly or as a parent domain; a leading `.` means
/// subdomains only.
fn host_matches(name: &str, entry: &str) -> bool {
    if entry.is_empty() {
        return false;
    }
    match entry.strip_prefix('.') {
        Some(suffix) => name.len() > suffix.len() && name.ends_with(entry),
        None => name == entry || name.ends_with(&format!(".{entry}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticResolver(Vec<IpAddr>);

    #[async_trait]
    impl Resolve for StaticResolver {
        async fn resolve(&self, _host: &str, _port: u16) -> std::io::Result<Vec<IpAddr>> {
            Ok(self.0.clone())
        }
    }

    fn validator_resolving_to(addrs: &[&str]) -> TargetValidator {
        let addrs = addrs.iter().map(|a| a.parse().unwrap()).collect();
        TargetValidator::new(&SsrfConfig::default()).with_resolver(Arc::new(StaticResolver(addrs)))
    }

    #[tokio::test]
    async fn rejects_loopback_literal() {
        let v = validator_resolving_to(&[]);
        let err = v.validate("http://127.0.0.1/admin").await.unwrap_err();
        assert!(matches!(err, ValidationError::BlockedAddress { range: "loopback", .. }));
    }

    #[tokio::test]
    async fn rejects_metadata_address_and_hosts() {
        let v = validator_resolving_to(&["93.184.216.34"]);
        assert!(v.validate("http://169.254.169.254/latest/meta-data").await.is_err());
        assert!(v.validate("http://[fd00:ec2::254]/").await.is_err());
        assert!(matches!(
            v.validate("http://metadata.google.internal/").await,
            Err(ValidationError::BlockedHost(_))
        ));
    }

    #[tokio::test]
    async fn rejects_private_resolution() {
        let v = validator_resolving_to(&["93.184.216.34", "10.1.2.3"]);
        let err = v.validate("https://example.com/").await.unwrap_err();
        assert!(matches!(err, ValidationError::BlockedAddress { range: "private", .. }));
    }

    #[tokio::test]
    async fn rejects_mapped_and_v6_ranges() {
        let v = validator_resolving_to(&[]);
        assert!(v.validate("http://[::ffff:127.0.0.1]/").await.is_err());
        assert!(v.validate("http://[::1]/").await.is_err());
        assert!(v.validate("http://[fe80::1]/").await.is_err());
        assert!(v.validate("http://[fc00::1]/").await.is_err());
        assert!(v.validate("http://0.0.0.0/").await.is_err());
    }

    #[tokio::test]
    async fn rejects_scheme_and_blocklist() {
        let v = validator_resolving_to(&["93.184.216.34"]);
        assert!(matches!(
            v.validate("ftp://example.com/").await,
            Err(ValidationError::SchemeNotAllowed(_))
        ));
        assert!(matches!(
            v.validate("http://printer.local/").await,
            Err(ValidationError::BlockedHost(_))
        ));
        assert!(matches!(
            v.validate("not a url").await,
            Err(ValidationError::MalformedUrl(_))
        ));
    }

    #[tokio::test]
    async fn accepts_public_target_and_normalizes() {
        let v = validator_resolving_to(&["93.184.216.34"]);
        let target = v.validate("HTTP://Example.COM:80#frag").await.unwrap();
        assert_eq!(target.url.as_str(), "http://example.com/");
        assert_eq!(target.destination.to_string(), "http://example.com:80");
        assert_eq!(target.addrs.len(), 1);
    }

    #[tokio::test]
    async fn custom_blocklist_matches_subdomains() {
        let config = SsrfConfig {
            blocked_hosts: vec!["corp.example".to_string()],
            ..SsrfConfig::default()
        };
        let v = TargetValidator::new(&config)
            .with_resolver(Arc::new(StaticResolver(vec!["93.184.216.34".parse().unwrap()])));
        assert!(v.validate("http://corp.example/").await.is_err());
        assert!(v.validate("http://api.corp.example/").await.is_err());
        assert!(v.validate("http://notcorp.example/").await.is_ok());
    }

    #[tokio::test]
    async fn disabled_protection_still_checks_scheme() {
        let config = SsrfConfig {
            enabled: false,
            ..SsrfConfig::default()
        };
        let v = TargetValidator::new(&config);
        assert!(v.validate("http://127.0.0.1:8080/").await.is_ok());
        assert!(v.validate("file:///etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn rejects_embedded_v4_forms() {
        let v = validator_resolving_to(&[]);
        let err = v.validate("http://[::7f00:1]/").await.unwrap_err();
        assert!(matches!(err, ValidationError::BlockedAddress { range: "loopback", .. }));
        let err = v.validate("http://[64:ff9b::a9fe:a9fe]/").await.unwrap_err();
        assert!(matches!(err, ValidationError::BlockedAddress { range: "cloud metadata", .. }));
        let err = v.validate("http://[64:ff9b::10.0.0.1]/").await.unwrap_err();
        assert!(matches!(err, ValidationError::BlockedAddress { range: "private", .. }));
    }

    #[test]
    fn embedded_v4_leaves_native_v6_alone() {
        assert_eq!(embedded_v4("::".parse().unwrap()), None);
        assert_eq!(embedded_v4("::1".parse().unwrap()), None);
        assert_eq!(embedded_v4("2001:db8::1".parse().unwrap()), None);
        assert_eq!(
            embedded_v4("::7f00:1".parse().unwrap()),
            Some(Ipv4Addr::new(127, 0, 0, 1))
        );
        let policy = AddressPolicy::from_config(&SsrfConfig::default());
        assert!(policy.check("64:ff9b::5db8:d822".parse().unwrap()).is_ok());
        assert!(policy.check("2606:4700::1111".parse().unwrap()).is_ok());
    }

    #[test]
    fn shared_address_space_is_private() {
        let policy = AddressPolicy::from_config(&SsrfConfig::default());
        assert_eq!(policy.check("100.64.0.1".parse().unwrap()), Err("private"));
        assert_eq!(policy.check("100.127.255.254".parse().unwrap()), Err("private"));
        assert!(policy.check("100.128.0.1".parse().unwrap()).is_ok());
        assert!(policy.check("100.63.255.255".parse().unwrap()).is_ok());
    }

    #[test]
    fn policy_flags_gate_ranges() {
        let policy = AddressPolicy {
            enabled: true,
            block_private: false,
            block_localhost: true,
        };
        assert!(policy.check("192.168.1.1".parse().unwrap()).is_ok());
        assert!(policy.check("127.0.0.1".parse().unwrap()).is_err());
        assert!(policy.check("169.254.169.254".parse().unwrap()).is_err());
    }
}
