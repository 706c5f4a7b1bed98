//! Host name resolution.
//!
//! The classifier resolves destinations through the [`Resolver`] trait. The
//! default [`SystemResolver`] uses the system resolver on the blocking pool;
//! [`StaticResolver`] and [`resolver_fn`] let callers substitute their own
//! policy (fixed tables, custom DNS, tests) without touching the indexes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;

use crate::context::Context;
use crate::error::{Result, ShortcutError};

#[cfg(test)]
use mockall::automock;

/// Maps a host name to a single IP address.
///
/// Implementations must give up promptly once `ctx` is done.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, ctx: &Context, host: &str) -> Result<IpAddr>;
}

/// Pick the address to classify from a lookup answer: the first IPv4
/// address, else the first IPv6 address.
pub fn pick_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .map(|ip| ip.to_canonical())
        .find(IpAddr::is_ipv4)
        .or_else(|| addrs.first().copied())
}

/// System resolution via `getaddrinfo`.
///
/// IP literals are returned as-is without a lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl SystemResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, ctx: &Context, host: &str) -> Result<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }

        let name = host.to_string();
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_host(&name));

        // The blocking lookup cannot be interrupted; dropping the handle
        // detaches it and the answer is discarded.
        let addrs = match ctx.run(lookup).await? {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => return Err(ShortcutError::resolution(host, e)),
            Err(e) => return Err(ShortcutError::resolution(host, e)),
        };

        let ip = pick_address(&addrs)
            .ok_or_else(|| ShortcutError::resolution(host, "no addresses found"))?;
        tracing::trace!(host = %host, ip = %ip, "Resolved");
        Ok(ip)
    }
}

/// Fixed host table. IP literals pass through; unknown names fail.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, IpAddr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry. Names are matched case-insensitively.
    pub fn with_host(mut self, host: &str, ip: IpAddr) -> Self {
        self.insert(host, ip);
        self
    }

    pub fn insert(&mut self, host: &str, ip: IpAddr) {
        self.hosts.insert(host.to_ascii_lowercase(), ip);
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, ctx: &Context, host: &str) -> Result<IpAddr> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        self.hosts
            .get(&host.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| ShortcutError::resolution(host, "no such host"))
    }
}

/// Resolver backed by an async closure. Built with [`resolver_fn`].
pub struct FnResolver<F> {
    f: F,
}

/// Wrap an async closure as a [`Resolver`].
///
/// The closure receives the host name; the returned future is raced against
/// the caller's context.
///
/// # Examples
/// ```
/// use shortcut::resolver::resolver_fn;
/// use std::net::{IpAddr, Ipv4Addr};
///
/// let resolver = resolver_fn(|_host: String| async {
///     Ok(IpAddr::V4(Ipv4Addr::LOCALHOST))
/// });
/// ```
pub fn resolver_fn<F, Fut>(f: F) -> FnResolver<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<IpAddr>> + Send,
{
    FnResolver { f }
}

#[async_trait]
impl<F, Fut> Resolver for FnResolver<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<IpAddr>> + Send,
{
    async fn resolve(&self, ctx: &Context, host: &str) -> Result<IpAddr> {
        ctx.run((self.f)(host.to_string())).await?
    }
}

impl<F> std::fmt::Debug for FnResolver<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FnResolver")
    }
}
