//! Organization resolution for contacted domains.
//!
//! The IP-organization map produced by the enrichment step is authoritative.
//! Domains it cannot name fall back to a live WHOIS query on the domain
//! itself, bounded by a per-domain timeout. Any lookup failure resolves to
//! `"Unknown"` and never aborts a run.

use crate::artifact::IpOrganizationMap;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use whois_rust::{WhoIs, WhoIsLookupOptions};

/// Placeholder for an organization or query type that could not be resolved.
pub const UNKNOWN: &str = "Unknown";

/// Line markers recognised in WHOIS output. Matched case-sensitively.
pub const ORGANIZATION_MARKERS: [&str; 2] = ["Organization", "OrgName"];

/// Servers used when no whois-rust server list is configured.
const DEFAULT_WHOIS_SERVERS: &str = r#"{
    "com": "whois.verisign-grs.com",
    "net": "whois.verisign-grs.com",
    "org": "whois.pir.org",
    "io": "whois.nic.io",
    "": "whois.iana.org"
}"#;

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("WHOIS lookup for {domain} timed out after {secs}s")]
    Timeout { domain: String, secs: u64 },

    #[error("WHOIS lookup for {domain} failed: {message}")]
    Failure { domain: String, message: String },
}

impl LookupError {
    fn failure(domain: &str, message: impl Into<String>) -> Self {
        LookupError::Failure {
            domain: domain.to_string(),
            message: message.into(),
        }
    }
}

/// A live organization lookup returning the raw free-text record for a domain.
pub trait OrganizationLookup: Send + Sync {
    fn lookup(&self, domain: &str) -> impl Future<Output = Result<String, LookupError>> + Send;
}

/// Extract the organization from a WHOIS record.
///
/// Grammar: the first line containing `Organization` or `OrgName` is the only
/// candidate; its value is the text after the first colon, trimmed. A
/// candidate without a colon or with an empty value yields `None`.
pub fn extract_organization(whois_data: &str) -> Option<String> {
    let line = whois_data
        .lines()
        .find(|line| ORGANIZATION_MARKERS.iter().any(|marker| line.contains(marker)))?;

    let (_, value) = line.split_once(':')?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// WHOIS client backed by whois-rust, with the system `whois` binary as an
/// optional second transport.
///
/// Both transports are bounded by `timeout`: whois-rust applies it to each
/// socket, and the system binary is killed when its future is dropped.
pub struct WhoisClient {
    whois: Arc<WhoIs>,
    system_fallback: bool,
    timeout: Duration,
}

impl WhoisClient {
    pub fn new(servers_file: Option<&Path>, system_fallback: bool, timeout: Duration) -> anyhow::Result<Self> {
        let whois = match servers_file {
            Some(path) => WhoIs::from_path(path)
                .map_err(|e| anyhow::anyhow!("Failed to load WHOIS servers from {}: {}", path.display(), e))?,
            None => WhoIs::from_string(DEFAULT_WHOIS_SERVERS)
                .map_err(|e| anyhow::anyhow!("Failed to create WHOIS client: {}", e))?,
        };

        Ok(Self {
            whois: Arc::new(whois),
            system_fallback,
            timeout,
        })
    }

    async fn try_native_whois(&self, domain: &str) -> Result<String, LookupError> {
        debug!("Trying whois-rust lookup for domain: {}", domain);

        let mut options = WhoIsLookupOptions::from_string(domain)
            .map_err(|e| LookupError::failure(domain, format!("invalid domain: {}", e)))?;
        options.timeout = Some(self.timeout);
        let whois = Arc::clone(&self.whois);

        match tokio::task::spawn_blocking(move || whois.lookup(options)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(LookupError::failure(domain, e.to_string())),
            Err(_) => Err(LookupError::failure(domain, "whois-rust lookup task panicked")),
        }
    }

    async fn try_system_whois(&self, domain: &str) -> Result<String, LookupError> {
        let whois_commands: &[&str] = if cfg!(windows) {
            &["whois.exe", "whois"]
        } else {
            &["whois", "/usr/bin/whois", "/usr/local/bin/whois"]
        };

        let run = async {
            for program in whois_commands {
                let mut cmd = tokio::process::Command::new(program);
                cmd.arg(domain);
                if let Ok(text) = command_output(cmd).await {
                    return Ok(text);
                }
            }
            Err(LookupError::failure(domain, "No working whois command found"))
        };

        match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout {
                domain: domain.to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

impl OrganizationLookup for WhoisClient {
    async fn lookup(&self, domain: &str) -> Result<String, LookupError> {
        match self.try_native_whois(domain).await {
            Ok(text) => Ok(text),
            Err(e) if self.system_fallback => {
                debug!("{}; trying system whois", e);
                self.try_system_whois(domain).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Run a WHOIS command and return its stdout. The child is killed if the
/// returned future is dropped before it exits.
async fn command_output(mut cmd: tokio::process::Command) -> Result<String, String> {
    let output = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| e.to_string())?;

    // Registries often exit non-zero on partial answers; keep any text.
    if output.stdout.is_empty() {
        Err(format!("empty output (status {})", output.status))
    } else {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Stand-in used when live lookups are switched off.
pub struct DisabledLookup;

impl OrganizationLookup for DisabledLookup {
    async fn lookup(&self, domain: &str) -> Result<String, LookupError> {
        Err(LookupError::failure(domain, "live lookups disabled"))
    }
}

/// Where a resolved organization came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizationSource {
    IpMap,
    Whois,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub organization: String,
    pub query_type: String,
    pub source: OrganizationSource,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct LookupStats {
    pub attempted: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cache_hits: usize,
}

/// Resolves organizations using the IP map first and a live lookup second.
///
/// Live results are memoised for the lifetime of the resolver, so a domain
/// seen in several periods is queried once per run.
pub struct OrganizationResolver<L> {
    lookup: L,
    enabled: bool,
    timeout: Duration,
    concurrency: usize,
    cache: Mutex<HashMap<String, String>>,
    attempted: AtomicUsize,
    failed: AtomicUsize,
    timed_out: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl<L: OrganizationLookup> OrganizationResolver<L> {
    pub fn new(lookup: L, timeout: Duration) -> Self {
        Self {
            lookup,
            enabled: true,
            timeout,
            concurrency: 1,
            cache: Mutex::new(HashMap::new()),
            attempted: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            timed_out: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
        }
    }

    /// Disable the live fallback entirely; unmapped domains resolve to `Unknown`.
    pub fn with_live_lookup(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Maximum number of live lookups in flight within one batch.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn stats(&self) -> LookupStats {
        LookupStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Resolve one domain.
    pub async fn resolve(&self, domain: &str, ip_map: &IpOrganizationMap) -> Resolution {
        let entry = ip_map.get(domain);

        let query_type = entry
            .and_then(|e| e.query_type.as_deref())
            .filter(|q| !q.trim().is_empty())
            .unwrap_or(UNKNOWN)
            .to_string();

        let mapped = entry
            .and_then(|e| e.organization.as_deref())
            .filter(|org| !org.trim().is_empty() && *org != UNKNOWN);

        if let Some(org) = mapped {
            return Resolution {
                organization: org.to_string(),
                query_type,
                source: OrganizationSource::IpMap,
            };
        }

        match self.live_organization(domain).await {
            Some(organization) => Resolution {
                organization,
                query_type,
                source: OrganizationSource::Whois,
            },
            None => Resolution {
                organization: UNKNOWN.to_string(),
                query_type,
                source: OrganizationSource::Unresolved,
            },
        }
    }

    /// Resolve a batch of domains with bounded concurrency. Results are
    /// returned in the order of `domains` regardless of completion order.
    pub async fn resolve_all(&self, domains: &[String], ip_map: &IpOrganizationMap) -> Vec<Resolution> {
        stream::iter(domains.iter())
            .map(|domain| self.resolve(domain, ip_map))
            .buffered(self.concurrency)
            .collect()
            .await
    }

    async fn live_organization(&self, domain: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        if let Some(cached) = self.cache.lock().await.get(domain) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return if cached == UNKNOWN { None } else { Some(cached.clone()) };
        }

        self.attempted.fetch_add(1, Ordering::Relaxed);
        let organization = match tokio::time::timeout(self.timeout, self.lookup.lookup(domain)).await {
            Ok(Ok(text)) => {
                let org = extract_organization(&text);
                debug!(
                    "WHOIS lookup for {} returned {}",
                    domain,
                    org.as_deref().unwrap_or("no organization line")
                );
                org
            }
            Ok(Err(e)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                debug!("{}", e);
                None
            }
            Err(_) => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                let e = LookupError::Timeout {
                    domain: domain.to_string(),
                    secs: self.timeout.as_secs(),
                };
                debug!("{}", e);
                None
            }
        };

        self.cache.lock().await.insert(
            domain.to_string(),
            organization.clone().unwrap_or_else(|| UNKNOWN.to_string()),
        );

        organization
    }
}
