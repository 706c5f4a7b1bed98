//! Decision-driven dialing.
//!
//! [`ShortcutDialer`] classifies the destination and hands the connection
//! attempt to one of two downstream dialers: `Direct` goes to the direct
//! dialer, `Proxy` and `Unknown` go to the proxy dialer.

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpStream;

use crate::classifier::{split_host_port, Classifier};
use crate::context::Context;
use crate::error::{Result, ShortcutError};
use crate::subnet::Family;

/// Opens connections to `address` over `network` (`tcp`, `tcp4`, `tcp6`).
#[async_trait]
pub trait Dialer: Send + Sync {
    type Conn: Send;

    async fn dial(&self, ctx: &Context, network: &str, address: &str) -> Result<Self::Conn>;
}

/// Plain TCP connect, bounded by the context. `tcp4` and `tcp6` only dial
/// addresses of that family.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDialer;

impl DirectDialer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    type Conn = TcpStream;

    async fn dial(&self, ctx: &Context, network: &str, address: &str) -> Result<TcpStream> {
        let family = match network {
            "tcp" => None,
            "tcp4" => Some(Family::V4),
            "tcp6" => Some(Family::V6),
            _ => {
                return Err(ShortcutError::Dial(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported network: {}", network),
                )))
            }
        };

        let stream = match family {
            None => ctx.run(TcpStream::connect(address)).await??,
            Some(family) => {
                let target = ctx
                    .run(tokio::net::lookup_host(address))
                    .await??
                    .map(|addr| SocketAddr::new(addr.ip().to_canonical(), addr.port()))
                    .find(|addr| Family::of(addr.ip()) == family)
                    .ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::AddrNotAvailable,
                            format!("no {} address for {}", family, address),
                        )
                    })?;
                ctx.run(TcpStream::connect(target)).await??
            }
        };
        Ok(stream)
    }
}

/// Join a resolved address with the port of the original destination.
fn join_host_port(ip: IpAddr, port: Option<&str>) -> String {
    match port {
        Some(port) => match port.parse::<u16>() {
            Ok(port) => SocketAddr::new(ip, port).to_string(),
            Err(_) if ip.is_ipv6() => format!("[{}]:{}", ip, port),
            Err(_) => format!("{}:{}", ip, port),
        },
        None => ip.to_string(),
    }
}

/// Routes each dial to the direct or the proxy dialer by classification.
pub struct ShortcutDialer<D, P> {
    classifier: Arc<Classifier>,
    direct: D,
    proxy: P,
}

impl<D, P> ShortcutDialer<D, P>
where
    D: Dialer,
    P: Dialer<Conn = D::Conn>,
{
    pub fn new(classifier: Arc<Classifier>, direct: D, proxy: P) -> Self {
        Self {
            classifier,
            direct,
            proxy,
        }
    }
}

#[async_trait]
impl<D, P> Dialer for ShortcutDialer<D, P>
where
    D: Dialer,
    P: Dialer<Conn = D::Conn>,
{
    type Conn = D::Conn;

    async fn dial(&self, ctx: &Context, network: &str, address: &str) -> Result<Self::Conn> {
        match self.classifier.classify(ctx, address).await {
            Ok(c) if c.decision.is_direct() => {
                // Reuse the resolved address so the direct path does not
                // resolve a second time.
                let target = join_host_port(c.ip, split_host_port(address).1);
                tracing::debug!(address = %address, target = %target, "Dialing directly");
                self.direct.dial(ctx, network, &target).await
            }
            Err(e) if e.is_context_error() => Err(e),
            _ => {
                tracing::debug!(address = %address, "Dialing through proxy");
                self.proxy.dial(ctx, network, address).await
            }
        }
    }
}
