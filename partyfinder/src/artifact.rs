//! Loading and normalization of the per-period artifacts produced by the
//! capture pipeline.
//!
//! The artifacts have drifted in shape across pipeline versions:
//! - contacted domains: a flat list, or a map of buckets to lists
//! - unique domains: a flat list, a map whose keys are domains, or a map with
//!   the wildcard key `".."` holding a list
//! - IP-organization map: a pickled dict of domain -> record
//!
//! Normalization is pure over already-decoded values. The wildcard shape of
//! the unique-domain artifact is ambiguous, so callers pass a [`SchemaPolicy`]
//! instead of letting the normalizer guess.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Key used by older pipeline versions to wrap a domain list in an object.
pub const WILDCARD_KEY: &str = "..";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("{artifact} artifact has an unsupported shape (found {found})")]
    Malformed { artifact: &'static str, found: &'static str },

    #[error("artifact not found: {}", path.display())]
    Missing { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
}

/// How to read a unique-domain artifact shaped `{"..": [...]}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SchemaPolicy {
    /// The wrapped list is the curated first-party list.
    #[serde(rename = "curated")]
    WildcardIsCuratedFirstParty,
    /// The wrapped list is every domain seen; it carries no first-party
    /// signal and is ignored.
    #[default]
    #[serde(rename = "undifferentiated")]
    WildcardIsUndifferentiated,
}

impl SchemaPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "curated" => Some(SchemaPolicy::WildcardIsCuratedFirstParty),
            "undifferentiated" => Some(SchemaPolicy::WildcardIsUndifferentiated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaPolicy::WildcardIsCuratedFirstParty => "curated",
            SchemaPolicy::WildcardIsUndifferentiated => "undifferentiated",
        }
    }
}

/// One entry of the IP-organization map. Extra fields written by the
/// enrichment step are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpMapEntry {
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub query_type: Option<String>,
}

impl IpMapEntry {
    pub fn new(organization: &str, query_type: &str) -> Self {
        Self {
            organization: Some(organization.to_string()),
            query_type: Some(query_type.to_string()),
        }
    }
}

pub type IpOrganizationMap = HashMap<String, IpMapEntry>;

/// The three inputs of one period, normalized.
#[derive(Debug, Clone, Default)]
pub struct PeriodArtifacts {
    /// Contacted domains in first-seen order, without duplicates.
    pub contacted: Vec<String>,
    pub unique: HashSet<String>,
    pub ip_map: IpOrganizationMap,
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Append the string elements of `items` to `out`, skipping duplicates.
fn extend_unique(out: &mut Vec<String>, seen: &mut HashSet<String>, items: &[Value]) {
    for item in items {
        if let Value::String(domain) = item {
            if seen.insert(domain.clone()) {
                out.push(domain.clone());
            }
        }
    }
}

/// Normalize a contacted-domains artifact.
///
/// A list is taken as-is. An object is treated as buckets of domains and every
/// list-valued entry is unioned. Order of first appearance is kept.
pub fn normalize_contacted(raw: &Value) -> Result<Vec<String>, ArtifactError> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    match raw {
        Value::Array(items) => extend_unique(&mut out, &mut seen, items),
        Value::Object(buckets) => {
            for value in buckets.values() {
                if let Value::Array(items) = value {
                    extend_unique(&mut out, &mut seen, items);
                }
            }
        }
        other => {
            return Err(ArtifactError::Malformed {
                artifact: "contacted-domains",
                found: shape_name(other),
            })
        }
    }

    Ok(out)
}

/// Normalize a unique-domains artifact under the given wildcard policy.
pub fn normalize_unique(raw: &Value, policy: SchemaPolicy) -> Result<HashSet<String>, ArtifactError> {
    match raw {
        Value::Array(items) => Ok(string_elements(items)),
        Value::Object(map) => match map.get(WILDCARD_KEY) {
            Some(Value::Array(items)) => match policy {
                SchemaPolicy::WildcardIsCuratedFirstParty => Ok(string_elements(items)),
                SchemaPolicy::WildcardIsUndifferentiated => {
                    debug!(
                        "Ignoring {} wrapped unique domains (wildcard policy: {})",
                        items.len(),
                        policy.as_str()
                    );
                    Ok(HashSet::new())
                }
            },
            _ => Ok(map
                .keys()
                .filter(|k| k.as_str() != WILDCARD_KEY)
                .cloned()
                .collect()),
        },
        other => Err(ArtifactError::Malformed {
            artifact: "unique-domains",
            found: shape_name(other),
        }),
    }
}

fn string_elements(items: &[Value]) -> HashSet<String> {
    items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Read and decode a JSON artifact.
pub fn load_json_artifact(path: &Path) -> Result<Value, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::Missing {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|e| ArtifactError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Read the IP-organization map. Pickle files are decoded with
/// `serde-pickle`; a `.json` path is read as JSON with the same layout.
pub fn load_ip_map(path: &Path) -> Result<IpOrganizationMap, ArtifactError> {
    if !path.exists() {
        return Err(ArtifactError::Missing {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let decoded: Result<IpOrganizationMap, String> = if is_json {
        serde_json::from_slice(&bytes).map_err(|e| e.to_string())
    } else {
        serde_pickle::from_slice(&bytes, serde_pickle::DeOptions::new()).map_err(|e| e.to_string())
    };

    decoded.map_err(|message| ArtifactError::Decode {
        path: path.to_path_buf(),
        message,
    })
}

/// Locations of the three artifacts inside one period's domain-list directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub contacted: PathBuf,
    pub unique: PathBuf,
    pub ip_map: PathBuf,
}

impl ArtifactPaths {
    /// First artifact that is not present on disk, if any.
    pub fn first_missing(&self) -> Option<&Path> {
        [&self.contacted, &self.unique, &self.ip_map]
            .into_iter()
            .find(|p| !p.exists())
            .map(PathBuf::as_path)
    }

    /// Load and normalize all three artifacts.
    pub fn load(&self, policy: SchemaPolicy) -> Result<PeriodArtifacts, ArtifactError> {
        let contacted = normalize_contacted(&load_json_artifact(&self.contacted)?)?;
        let unique = normalize_unique(&load_json_artifact(&self.unique)?, policy)?;
        let ip_map = load_ip_map(&self.ip_map)?;

        debug!(
            "Loaded {} contacted, {} unique, {} mapped domains from {}",
            contacted.len(),
            unique.len(),
            ip_map.len(),
            self.contacted.parent().map(|p| p.display().to_string()).unwrap_or_default()
        );

        Ok(PeriodArtifacts {
            contacted,
            unique,
            ip_map,
        })
    }
}
