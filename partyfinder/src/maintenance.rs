//! Maintenance commands for a device's artifact tree.

use crate::artifact::{IpOrganizationMap, WILDCARD_KEY};
use crate::config::AppConfig;
use crate::suffixes::write_suffix_file;
use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Serialize `value` as JSON indented with four spaces.
fn to_pretty_json(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// Rewrite one artifact if it is wrapped as `{"..": [...]}`. Returns whether
/// the file changed.
pub fn unwrap_wildcard_artifact(path: &Path) -> Result<bool> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let data: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    let inner = match &data {
        Value::Object(map) => match map.get(WILDCARD_KEY) {
            Some(list @ Value::Array(_)) => list,
            _ => return Ok(false),
        },
        _ => return Ok(false),
    };

    fs::write(path, to_pretty_json(inner)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

/// Walk the device directory and unwrap every wildcard-shaped contacted or
/// unique domain artifact. Returns the rewritten files in path order.
pub fn repair_artifacts(config: &AppConfig) -> Result<Vec<PathBuf>> {
    let device_dir = config.device_dir();
    if !device_dir.is_dir() {
        bail!("Device directory {} not found", device_dir.display());
    }

    let names = [
        config.artifacts.contacted_domains.as_str(),
        config.artifacts.unique_domains.as_str(),
    ];

    let mut candidates: Vec<PathBuf> = walkdir::WalkDir::new(&device_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| names.contains(&name))
                    .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();
    candidates.sort();

    let mut rewritten = Vec::new();
    for path in candidates {
        match unwrap_wildcard_artifact(&path) {
            Ok(true) => {
                info!("Normalized {}", path.display());
                rewritten.push(path);
            }
            Ok(false) => debug!("{} already a list", path.display()),
            Err(e) => warn!("Skipping {}: {:#}", path.display(), e),
        }
    }

    Ok(rewritten)
}

/// Write an empty pickled IP map into every month folder of the configured
/// years that has a domain-list directory but no map. Returns the created
/// files.
pub fn init_empty_ip_maps(config: &AppConfig) -> Result<Vec<PathBuf>> {
    let empty = serde_pickle::to_vec(&IpOrganizationMap::new(), serde_pickle::SerOptions::new())
        .context("Failed to encode empty IP map")?;

    let mut created = Vec::new();
    for year in &config.device.years {
        let year_dir = config.device_dir().join(year);
        if !year_dir.is_dir() {
            continue;
        }

        let mut month_dirs: Vec<PathBuf> = fs::read_dir(&year_dir)
            .with_context(|| format!("Failed to list {}", year_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        month_dirs.sort();

        for month_dir in month_dirs {
            let list_dir = month_dir.join(&config.artifacts.domain_list_dir);
            if !list_dir.is_dir() {
                continue;
            }

            let map_path = list_dir.join(&config.artifacts.ip_domain_map);
            if map_path.exists() {
                continue;
            }

            fs::write(&map_path, &empty)
                .with_context(|| format!("Failed to write {}", map_path.display()))?;
            info!("Created empty {}", map_path.display());
            created.push(map_path);
        }
    }

    Ok(created)
}

/// Write the device's first-party suffix file. Falls back to the selected
/// manufacturer table when no domains are given.
pub fn write_first_party(config: &AppConfig, domains: &[String]) -> Result<(PathBuf, usize)> {
    let domains = if domains.is_empty() {
        config.manufacturer_domains()
    } else {
        domains
    };
    if domains.is_empty() {
        bail!("No first-party domains given and no manufacturer table selected");
    }

    let path = config.first_party_file();
    let written = write_suffix_file(&path, domains)?;
    Ok((path, written))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::load_ip_map;
    use tempfile::tempdir;

    fn config_for(root: &Path) -> AppConfig {
        let content = format!(
            "[device]\nid = \"dev\"\nbase_dir = \"{}\"\noutput_dir = \"{}\"\nyears = [\"2024\"]\n",
            root.display(),
            root.join("out").display()
        );
        toml::from_str(&content).unwrap()
    }

    #[test]
    fn test_repair_unwraps_only_wildcard_files() {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path());
        let list_dir = dir.path().join("dev/2024/Jan_2024/domain_list");
        fs::create_dir_all(&list_dir).unwrap();

        let wrapped = list_dir.join("unique_domains.json");
        let flat = list_dir.join("contacted_domains.json");
        let other = list_dir.join("notes.json");
        fs::write(&wrapped, r#"{"..": ["a.com", "b.com"]}"#).unwrap();
        fs::write(&flat, r#"["a.com"]"#).unwrap();
        fs::write(&other, r#"{"..": ["z.com"]}"#).unwrap();

        let rewritten = repair_artifacts(&config).unwrap();

        assert_eq!(rewritten, vec![wrapped.clone()]);
        assert_eq!(fs::read_to_string(&wrapped).unwrap(), "[\n    \"a.com\",\n    \"b.com\"\n]");
        assert_eq!(fs::read_to_string(&flat).unwrap(), r#"["a.com"]"#);
        assert_eq!(fs::read_to_string(&other).unwrap(), r#"{"..": ["z.com"]}"#);
    }

    #[test]
    fn test_repair_keeps_keyed_objects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contacted_domains.json");
        fs::write(&path, r#"{"dns": ["a.com"]}"#).unwrap();
        assert!(!unwrap_wildcard_artifact(&path).unwrap());
    }

    #[test]
    fn test_repair_requires_device_dir() {
        let dir = tempdir().unwrap();
        let config = config_for(&dir.path().join("missing"));
        assert!(repair_artifacts(&config).is_err());
    }

    #[test]
    fn test_init_empty_ip_maps() {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path());
        let needs_map = dir.path().join("dev/2024/Feb_2024/domain_list");
        let has_map = dir.path().join("dev/2024/Mar_2024/domain_list");
        let no_list = dir.path().join("dev/2024/Apr_2024");
        fs::create_dir_all(&needs_map).unwrap();
        fs::create_dir_all(&has_map).unwrap();
        fs::create_dir_all(&no_list).unwrap();
        fs::write(has_map.join("ip_domain_map.pkl"), b"keep").unwrap();

        let created = init_empty_ip_maps(&config).unwrap();

        assert_eq!(created, vec![needs_map.join("ip_domain_map.pkl")]);
        assert!(load_ip_map(&created[0]).unwrap().is_empty());
        assert_eq!(fs::read(has_map.join("ip_domain_map.pkl")).unwrap(), b"keep");
        assert!(!no_list.join("domain_list").exists());
    }

    #[test]
    fn test_write_first_party_from_manufacturer() {
        let dir = tempdir().unwrap();
        let mut config = config_for(dir.path());
        fs::create_dir_all(dir.path().join("dev")).unwrap();

        assert!(write_first_party(&config, &[]).is_err());

        config.manufacturers.insert(
            "vesync".to_string(),
            crate::config::ManufacturerTable {
                version: "1".to_string(),
                domains: vec!["vesync.com".to_string(), "ntp.vesync.com".to_string()],
            },
        );
        config.device.manufacturer = Some("vesync".to_string());

        let (path, written) = write_first_party(&config, &[]).unwrap();
        assert_eq!(written, 2);
        assert_eq!(path, dir.path().join("dev/first_party_domains.txt"));
        assert_eq!(fs::read_to_string(path).unwrap(), "vesync.com\nntp.vesync.com\n");
    }
}
