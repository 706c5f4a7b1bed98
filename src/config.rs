//! Configuration management for shortcut.
//!
//! The configuration names the subnet lists for each rule, inline or from
//! files, and the resolution timeout callers should apply per lookup.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classifier::{Classifier, ClassifierBuilder, Decision, Rule};
use crate::index::RangeIndex;
use crate::lists;
use crate::subnet::Family;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-lookup resolution timeout (e.g. "500ms", "5s", "1m")
    pub resolve_timeout: String,

    /// Reject lists containing overlapping ranges instead of tolerating them
    pub strict: bool,

    /// Ranges that must always go through the proxy (checked first)
    pub force_proxy: FamilyLists,

    /// Ranges that may be dialed directly
    pub direct: FamilyLists,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resolve_timeout: "5s".to_string(),
            strict: false,
            force_proxy: FamilyLists::default(),
            direct: FamilyLists {
                v4: ListSource::inline(default_direct_v4()),
                v6: ListSource::inline(default_direct_v6()),
            },
        }
    }
}

/// One list source per address family.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyLists {
    pub v4: ListSource,
    pub v6: ListSource,
}

/// Subnets given inline, read from a file, or both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSource {
    pub subnets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl ListSource {
    pub fn inline(subnets: Vec<String>) -> Self {
        Self {
            subnets,
            file: None,
        }
    }

    pub fn from_file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            subnets: Vec::new(),
            file: Some(path.into()),
        }
    }

    /// Inline entries followed by the file's entries.
    pub fn entries(&self) -> Result<Vec<String>> {
        let mut entries = self.subnets.clone();
        if let Some(ref path) = self.file {
            entries.extend(lists::load_file(path)?);
        }
        Ok(entries)
    }

    fn index(&self, family: Family, strict: bool) -> Result<RangeIndex> {
        let entries = self.entries()?;
        if strict {
            Ok(RangeIndex::build_strict(family, &entries)?)
        } else {
            Ok(RangeIndex::build(family, &entries))
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_saphyr::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match parse_interval(&self.resolve_timeout) {
            Some(timeout) if !timeout.is_zero() => {}
            _ => anyhow::bail!(
                "Invalid resolve_timeout '{}'. Use format like '500ms', '5s', '1m'",
                self.resolve_timeout
            ),
        }

        for (name, lists) in [("force_proxy", &self.force_proxy), ("direct", &self.direct)] {
            for (family, source) in [("v4", &lists.v4), ("v6", &lists.v6)] {
                if let Some(ref file) = source.file {
                    if file.as_os_str().is_empty() {
                        anyhow::bail!("{}.{}.file must not be empty", name, family);
                    }
                }
            }
        }

        Ok(())
    }

    /// Resolution timeout as a `Duration`.
    pub fn resolve_timeout(&self) -> Duration {
        parse_interval(&self.resolve_timeout).unwrap_or(Duration::from_secs(5))
    }

    /// Rule builder with force-proxy rules ahead of direct rules. The caller
    /// may still set a resolver before building.
    pub fn builder(&self) -> Result<ClassifierBuilder> {
        let mut builder = Classifier::builder();
        for (name, lists, decision) in [
            ("force-proxy", &self.force_proxy, Decision::Proxy),
            ("direct", &self.direct, Decision::Direct),
        ] {
            let v4 = lists
                .v4
                .index(Family::V4, self.strict)
                .with_context(|| format!("Failed to build {} ipv4 list", name))?;
            let v6 = lists
                .v6
                .index(Family::V6, self.strict)
                .with_context(|| format!("Failed to build {} ipv6 list", name))?;
            tracing::info!(
                rule = name,
                ipv4 = v4.len(),
                ipv6 = v6.len(),
                skipped = v4.skipped() + v6.skipped(),
                "Loaded subnet lists"
            );
            builder = builder
                .rule(Rule::new(name, v4, decision))
                .rule(Rule::new(name, v6, decision));
        }
        Ok(builder)
    }

    /// Build a classifier with the system resolver.
    pub fn build_classifier(&self) -> Result<Classifier> {
        Ok(self.builder()?.build())
    }

    /// Default config with comments
    pub fn generate_default_yaml() -> String {
        include_str!("../templates/config.yaml").to_string()
    }
}

/// Parse a duration like "250ms", "5s", "2m" or "1h".
/// Requires ASCII-only input to prevent Unicode-related edge cases.
pub fn parse_interval(interval: &str) -> Option<Duration> {
    if !interval.is_ascii() || interval.len() < 2 {
        return None;
    }

    if let Some(ms) = interval.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }

    let (num_part, suffix) = interval.split_at(interval.len() - 1);
    let value = num_part.parse::<u64>().ok()?;
    let secs = match suffix {
        "s" => value,
        "m" => value.checked_mul(60)?,
        "h" => value.checked_mul(3600)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

fn default_direct_v4() -> Vec<String> {
    vec![
        "10.0.0.0/8".to_string(),     // RFC1918
        "172.16.0.0/12".to_string(),  // RFC1918
        "192.168.0.0/16".to_string(), // RFC1918
        "127.0.0.0/8".to_string(),    // Loopback
    ]
}

fn default_direct_v6() -> Vec<String> {
    vec![
        "::1/128".to_string(),   // Loopback
        "fc00::/7".to_string(),  // Unique local
        "fe80::/10".to_string(), // Link-local
    ]
}
