#![allow(dead_code)]

use partyfinder::artifact::{IpMapEntry, IpOrganizationMap};
use partyfinder::config::AppConfig;
use partyfinder::whois::{LookupError, OrganizationLookup};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const DEVICE: &str = "8:e9:f6:2a:2e:a2";

/// An on-disk artifact tree for one device inside a temp dir.
pub struct DeviceTree {
    pub root: TempDir,
}

impl DeviceTree {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.root.path().join("analysis_longitudinal")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.path().join("categorized_domains")
    }

    pub fn device_dir(&self) -> PathBuf {
        self.base_dir().join(DEVICE)
    }

    pub fn list_dir(&self, year: &str, month: &str) -> PathBuf {
        self.device_dir()
            .join(year)
            .join(format!("{}_{}", month, year))
            .join("domain_list")
    }

    pub fn output_csv(&self, year: &str, month: &str) -> PathBuf {
        self.output_dir()
            .join(DEVICE)
            .join(format!("categorized_domains_{}_{}.csv", month, year))
    }

    /// Write the two JSON artifacts of a period.
    pub fn write_domains(&self, year: &str, month: &str, contacted: &str, unique: &str) -> PathBuf {
        let dir = self.list_dir(year, month);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("contacted_domains.json"), contacted).unwrap();
        fs::write(dir.join("unique_domains.json"), unique).unwrap();
        dir
    }

    /// Write a pickled IP map of (domain, organization, query type) rows.
    pub fn write_ip_map(&self, year: &str, month: &str, rows: &[(&str, &str, &str)]) {
        let map: IpOrganizationMap = rows
            .iter()
            .map(|(domain, org, qtype)| (domain.to_string(), IpMapEntry::new(org, qtype)))
            .collect();
        let bytes = serde_pickle::to_vec(&map, serde_pickle::SerOptions::new()).unwrap();
        let dir = self.list_dir(year, month);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("ip_domain_map.pkl"), bytes).unwrap();
    }

    pub fn write_suffixes(&self, lines: &str) {
        fs::create_dir_all(self.device_dir()).unwrap();
        fs::write(self.device_dir().join("first_party_domains.txt"), lines).unwrap();
    }

    pub fn config_toml(&self, years: &[&str]) -> String {
        let years = years
            .iter()
            .map(|y| format!("\"{}\"", y))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            r#"[device]
id = "{}"
base_dir = "{}"
output_dir = "{}"
years = [{}]

[whois]
enabled = false
"#,
            DEVICE,
            self.base_dir().display(),
            self.output_dir().display(),
            years
        )
    }

    pub fn config(&self, years: &[&str]) -> AppConfig {
        let config: AppConfig = toml::from_str(&self.config_toml(years)).unwrap();
        config.validate().unwrap();
        config
    }

    pub fn write_config_file(&self, years: &[&str]) -> PathBuf {
        let path = self.root.path().join("config").join("partyfinder.toml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, self.config_toml(years)).unwrap();
        path
    }
}

pub fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

/// Canned WHOIS responses keyed by domain; counts every call.
#[derive(Clone, Default)]
pub struct CannedLookup {
    responses: Arc<HashMap<String, String>>,
    calls: Arc<AtomicUsize>,
}

impl CannedLookup {
    pub fn new(responses: &[(&str, &str)]) -> Self {
        Self {
            responses: Arc::new(
                responses
                    .iter()
                    .map(|(d, text)| (d.to_string(), text.to_string()))
                    .collect(),
            ),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OrganizationLookup for CannedLookup {
    async fn lookup(&self, domain: &str) -> Result<String, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .get(domain)
            .cloned()
            .ok_or_else(|| LookupError::Failure {
                domain: domain.to_string(),
                message: "no canned response".to_string(),
            })
    }
}
