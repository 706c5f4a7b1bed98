//! # shortcut - Direct or proxy, decided by subnet
//!
//! Decides whether a network destination should be dialed directly or sent
//! through a proxy, by matching its address against per-family subnet lists.
//!
//! ## Features
//!
//! - **Fast Lookups** - Sorted range indexes answer containment in O(log n + nesting depth)
//! - **Overlap Tolerant** - Nested and overlapping CIDRs match correctly
//! - **Family Isolation** - IPv4 and IPv6 rules never match each other's traffic
//! - **Cancellable** - Every resolution honours a deadline and cancellation token
//! - **Pluggable Resolution** - System, static or closure-backed resolvers
//! - **Hot Reload** - Swap rule sets without blocking in-flight classifications
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        shortcut                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_saphyr)                                      │
//! │    └── Lists: inline subnets or files, per family           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Classifier                                                 │
//! │    ├── Rules: force-proxy, direct (first match wins)        │
//! │    └── Resolver trait: system, static, closure              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RangeIndex (ipnet)                                         │
//! │    └── Sorted subnets linked to their enclosing range       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Context (tokio)                                            │
//! │    └── Deadline + cancellation for every lookup             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ShortcutDialer (Dialer trait)                              │
//! │    └── Direct dialer or proxy dialer by decision            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```
//! use shortcut::{Classifier, Context, Decision, StaticResolver};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let classifier = Classifier::builder()
//!     .force_proxy(["10.10.0.0/16"], Vec::<&str>::new())
//!     .direct(["10.0.0.0/8", "192.168.0.0/16"], ["fc00::/7"])
//!     .resolver(StaticResolver::new().with_host("nas.lan", "192.168.1.20".parse().unwrap()))
//!     .build();
//!
//! let ctx = Context::with_timeout(Duration::from_secs(5));
//! assert_eq!(classifier.decide(&ctx, "nas.lan:445").await, Decision::Direct);
//! assert_eq!(classifier.decide(&ctx, "10.10.1.1:80").await, Decision::Proxy);
//! assert_eq!(classifier.decide(&ctx, "8.8.8.8:53").await, Decision::Unknown);
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`classifier`] - Rule evaluation and address classification
//! - [`config`] - Configuration parsing and validation
//! - [`context`] - Deadlines and cancellation
//! - [`dialer`] - Decision-driven dialing
//! - [`error`] - Error type
//! - [`index`] - Range index over subnet lists
//! - [`lists`] - Subnet list parsing
//! - [`reload`] - Hot-swappable classifier
//! - [`resolver`] - Host name resolution
//! - [`subnet`] - Subnet and address family types

pub mod classifier;
pub mod config;
pub mod context;
pub mod dialer;
pub mod error;
pub mod index;
pub mod lists;
pub mod reload;
pub mod resolver;
pub mod subnet;

pub use classifier::{Classification, Classifier, ClassifierBuilder, Decision, Rule};
pub use config::Config;
pub use context::{CancelToken, Context};
pub use dialer::{Dialer, DirectDialer, ShortcutDialer};
pub use error::{Result, ShortcutError};
pub use index::RangeIndex;
pub use reload::ReloadableClassifier;
pub use resolver::{resolver_fn, Resolver, StaticResolver, SystemResolver};
pub use subnet::{Family, Subnet};
