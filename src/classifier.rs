//! Destination classification.
//!
//! A [`Classifier`] resolves a destination, picks the rule list for the
//! resolved address family and returns the [`Decision`] of the first rule
//! whose index contains the address.
//!
//! # Priority Order
//!
//! Rules are evaluated in the order they were added, first match wins. Add
//! force-proxy rules before direct rules so a narrow override is never
//! shadowed by a broad direct range.
//!
//! # Example
//!
//! ```
//! use shortcut::{Classifier, Context, Decision, StaticResolver};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let classifier = Classifier::builder()
//!     .force_proxy(["10.10.0.0/16"], Vec::<&str>::new())
//!     .direct(["10.0.0.0/8"], ["fe80::/10"])
//!     .resolver(StaticResolver::new().with_host("intranet", "10.11.1.1".parse().unwrap()))
//!     .build();
//!
//! let ctx = Context::background();
//! let result = classifier.classify(&ctx, "intranet:443").await.unwrap();
//! assert_eq!(result.decision, Decision::Direct);
//!
//! let result = classifier.classify(&ctx, "10.10.1.1:443").await.unwrap();
//! assert_eq!(result.decision, Decision::Proxy);
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::index::RangeIndex;
use crate::resolver::{Resolver, SystemResolver};
use crate::subnet::Family;

/// Routing decision for one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Dial without the proxy.
    Direct,
    /// Dial through the proxy.
    Proxy,
    /// No rule matched, or the destination could not be resolved.
    Unknown,
}

impl Decision {
    /// Only `Direct` takes the direct path; `Proxy` and `Unknown` both go
    /// through the proxy.
    pub fn is_direct(self) -> bool {
        self == Decision::Direct
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Direct => f.write_str("direct"),
            Decision::Proxy => f.write_str("proxy"),
            Decision::Unknown => f.write_str("unknown"),
        }
    }
}

/// A named index and the decision it yields on a match.
#[derive(Debug, Clone)]
pub struct Rule {
    name: Arc<str>,
    index: Arc<RangeIndex>,
    decision: Decision,
}

impl Rule {
    pub fn new(name: &str, index: impl Into<Arc<RangeIndex>>, decision: Decision) -> Self {
        Self {
            name: Arc::from(name),
            index: index.into(),
            decision,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &RangeIndex {
        &self.index
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn family(&self) -> Family {
        self.index.family()
    }
}

/// Outcome of a successful classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub decision: Decision,
    /// The resolved address, IPv4-mapped IPv6 unmapped to IPv4.
    pub ip: IpAddr,
    /// Name of the matching rule, `None` when nothing matched.
    pub rule: Option<Arc<str>>,
}

/// Split `host:port` or `[v6]:port`. A bare host, including a bare IPv6
/// literal, is returned unchanged with no port. So is anything malformed,
/// such as text after `]` or an empty port, so that resolving it fails.
///
/// # Examples
/// ```
/// use shortcut::classifier::split_host_port;
/// assert_eq!(split_host_port("example.com:443"), ("example.com", Some("443")));
/// assert_eq!(split_host_port("[::1]:80"), ("::1", Some("80")));
/// assert_eq!(split_host_port("::1"), ("::1", None));
/// assert_eq!(split_host_port("localhost"), ("localhost", None));
/// ```
pub fn split_host_port(address: &str) -> (&str, Option<&str>) {
    let address = address.trim();
    if let Some(rest) = address.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, "")) => (host, None),
            Some((host, tail)) => match tail.strip_prefix(':') {
                Some(port) if !port.is_empty() => (host, Some(port)),
                // Leave malformed input whole so resolution fails on it
                _ => (address, None),
            },
            None => (address, None),
        };
    }
    match address.split_once(':') {
        Some((host, port)) if !port.is_empty() && !port.contains(':') => (host, Some(port)),
        _ => (address, None),
    }
}

/// Classifies destinations against prioritized per-family rule lists.
///
/// Rule lists are read-only after construction, so a `Classifier` can be
/// shared across tasks behind an `Arc` and queried concurrently.
pub struct Classifier {
    v4_rules: Vec<Rule>,
    v6_rules: Vec<Rule>,
    resolver: Arc<dyn Resolver>,
}

impl Classifier {
    pub fn builder() -> ClassifierBuilder {
        ClassifierBuilder::new()
    }

    /// One direct rule per family and the system resolver.
    pub fn new<I4, S4, I6, S6>(ipv4_subnets: I4, ipv6_subnets: I6) -> Self
    where
        I4: IntoIterator<Item = S4>,
        S4: AsRef<str>,
        I6: IntoIterator<Item = S6>,
        S6: AsRef<str>,
    {
        ClassifierBuilder::new()
            .direct(ipv4_subnets, ipv6_subnets)
            .build()
    }

    /// Replace the resolver. Indexes and rules are kept.
    pub fn set_resolver<R: Resolver + 'static>(&mut self, resolver: R) {
        self.resolver = Arc::new(resolver);
    }

    /// Rules consulted for addresses of `family`, in priority order.
    pub fn rules(&self, family: Family) -> &[Rule] {
        match family {
            Family::V4 => &self.v4_rules,
            Family::V6 => &self.v6_rules,
        }
    }

    /// Resolve `address` and classify the result.
    ///
    /// An error (resolution failure, cancellation, deadline) means the
    /// decision is [`Decision::Unknown`]; the caller picks the fallback.
    pub async fn classify(&self, ctx: &Context, address: &str) -> Result<Classification> {
        let (host, _) = split_host_port(address);
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let ip = match ctx.run(self.resolver.resolve(ctx, host)).await {
            Ok(Ok(ip)) => ip,
            Ok(Err(e)) | Err(e) => {
                tracing::debug!(host = %host, "Unable to resolve: {}", e);
                return Err(e);
            }
        };
        let classification = self.classify_ip(ip);
        tracing::trace!(
            host = %host,
            ip = %classification.ip,
            decision = %classification.decision,
            rule = ?classification.rule,
            "Classified"
        );
        Ok(classification)
    }

    /// Classify an address that is already resolved.
    pub fn classify_ip(&self, ip: IpAddr) -> Classification {
        let ip = ip.to_canonical();
        let matched = self
            .rules(Family::of(ip))
            .iter()
            .find(|rule| rule.index.contains(ip));

        match matched {
            Some(rule) => Classification {
                decision: rule.decision,
                ip,
                rule: Some(rule.name.clone()),
            },
            None => Classification {
                decision: Decision::Unknown,
                ip,
                rule: None,
            },
        }
    }

    /// Like [`Classifier::classify`], folding errors into
    /// [`Decision::Unknown`].
    pub async fn decide(&self, ctx: &Context, address: &str) -> Decision {
        self.classify(ctx, address)
            .await
            .map(|c| c.decision)
            .unwrap_or(Decision::Unknown)
    }

    /// Whether `address` may take the direct path, with the resolved address
    /// when it may.
    pub async fn allow(&self, ctx: &Context, address: &str) -> (bool, Option<IpAddr>) {
        match self.classify(ctx, address).await {
            Ok(c) if c.decision.is_direct() => (true, Some(c.ip)),
            _ => (false, None),
        }
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("v4_rules", &self.v4_rules.len())
            .field("v6_rules", &self.v6_rules.len())
            .finish()
    }
}

/// Builder for [`Classifier`].
#[derive(Default)]
pub struct ClassifierBuilder {
    v4_rules: Vec<Rule>,
    v6_rules: Vec<Rule>,
    resolver: Option<Arc<dyn Resolver>>,
}

impl ClassifierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule to the list of the index's family.
    pub fn rule(mut self, rule: Rule) -> Self {
        match rule.family() {
            Family::V4 => self.v4_rules.push(rule),
            Family::V6 => self.v6_rules.push(rule),
        }
        self
    }

    /// Append `force-proxy` rules built from CIDR text.
    pub fn force_proxy<I4, S4, I6, S6>(self, ipv4_subnets: I4, ipv6_subnets: I6) -> Self
    where
        I4: IntoIterator<Item = S4>,
        S4: AsRef<str>,
        I6: IntoIterator<Item = S6>,
        S6: AsRef<str>,
    {
        self.lists("force-proxy", ipv4_subnets, ipv6_subnets, Decision::Proxy)
    }

    /// Append `direct` rules built from CIDR text.
    pub fn direct<I4, S4, I6, S6>(self, ipv4_subnets: I4, ipv6_subnets: I6) -> Self
    where
        I4: IntoIterator<Item = S4>,
        S4: AsRef<str>,
        I6: IntoIterator<Item = S6>,
        S6: AsRef<str>,
    {
        self.lists("direct", ipv4_subnets, ipv6_subnets, Decision::Direct)
    }

    fn lists<I4, S4, I6, S6>(
        self,
        name: &str,
        ipv4_subnets: I4,
        ipv6_subnets: I6,
        decision: Decision,
    ) -> Self
    where
        I4: IntoIterator<Item = S4>,
        S4: AsRef<str>,
        I6: IntoIterator<Item = S6>,
        S6: AsRef<str>,
    {
        let v4 = RangeIndex::build(Family::V4, ipv4_subnets);
        let v6 = RangeIndex::build(Family::V6, ipv6_subnets);
        tracing::debug!(
            "Creating {} rules with {} ipv4 subnets and {} ipv6 subnets",
            name,
            v4.len(),
            v6.len()
        );
        self.rule(Rule::new(name, v4, decision))
            .rule(Rule::new(name, v6, decision))
    }

    pub fn resolver<R: Resolver + 'static>(mut self, resolver: R) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Use a resolver already shared elsewhere.
    pub fn shared_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Classifier {
        Classifier {
            v4_rules: self.v4_rules,
            v6_rules: self.v6_rules,
            resolver: self
                .resolver
                .unwrap_or_else(|| Arc::new(SystemResolver::new())),
        }
    }
}
