//! First-party suffix hints for a device.
//!
//! The suffix file is optional: one domain suffix per line, e.g. `vesync.com`.
//! A missing file yields an empty list.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// Load the suffix list at `path`, lowercased, trimmed, blank lines dropped,
/// file order preserved.
pub fn load_suffixes(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        info!("No first-party suffix file at {}, continuing without suffix hints", path.display());
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read first-party suffix file: {}", path.display()))?;

    Ok(parse_suffixes(&content))
}

pub fn parse_suffixes(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Append `extra` entries that are not already present.
pub fn merge_suffixes(mut suffixes: Vec<String>, extra: &[String]) -> Vec<String> {
    for entry in extra {
        let entry = entry.trim().to_lowercase();
        if !entry.is_empty() && !suffixes.contains(&entry) {
            suffixes.push(entry);
        }
    }
    suffixes
}

/// True when the lowercased `domain` ends with any configured suffix.
pub fn matches_suffix(domain: &str, suffixes: &[String]) -> bool {
    if suffixes.is_empty() {
        return false;
    }
    let lowered = domain.to_lowercase();
    suffixes.iter().any(|s| lowered.ends_with(s.as_str()))
}

/// Write the suffix file for a device. The parent directory must already
/// exist; it is the device's artifact directory.
pub fn write_suffix_file(path: &Path, domains: &[String]) -> Result<usize> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        bail!("Device directory {} not found", parent.display());
    }

    let entries = merge_suffixes(Vec::new(), domains);
    let mut content = entries.join("\n");
    content.push('\n');

    fs::write(path, content)
        .with_context(|| format!("Failed to write first-party suffix file: {}", path.display()))?;

    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let suffixes = load_suffixes(&dir.path().join("first_party_domains.txt")).unwrap();
        assert!(suffixes.is_empty());
    }

    #[test]
    fn test_parse_trims_lowercases_and_keeps_order() {
        let parsed = parse_suffixes("  Vesync.com \n\n ntp.vesync.com\n\t\nSONOS.com");
        assert_eq!(parsed, vec!["vesync.com", "ntp.vesync.com", "sonos.com"]);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("first_party_domains.txt");
        fs::write(&path, "vesync.com\nvdmpmqtt.vesync.com\n").unwrap();

        assert_eq!(load_suffixes(&path).unwrap(), vec!["vesync.com", "vdmpmqtt.vesync.com"]);
    }

    #[test]
    fn test_matches_suffix() {
        let suffixes = vec!["vesync.com".to_string()];
        assert!(matches_suffix("vdmpmqtt.vesync.com", &suffixes));
        assert!(matches_suffix("VDMPMQTT.VESYNC.COM", &suffixes));
        assert!(!matches_suffix("tracker.ads.net", &suffixes));
        assert!(!matches_suffix("vdmpmqtt.vesync.com", &[]));
    }

    #[test]
    fn test_merge_skips_duplicates() {
        let merged = merge_suffixes(vec!["a.com".to_string()], &["A.com".to_string(), "b.com".to_string()]);
        assert_eq!(merged, vec!["a.com", "b.com"]);
    }

    #[test]
    fn test_write_suffix_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("first_party_domains.txt");
        let written = write_suffix_file(
            &path,
            &["Vesync.com".to_string(), "ntp.vesync.com".to_string()],
        )
        .unwrap();

        assert_eq!(written, 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "vesync.com\nntp.vesync.com\n");
    }

    #[test]
    fn test_write_requires_device_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("first_party_domains.txt");
        assert!(write_suffix_file(&path, &["a.com".to_string()]).is_err());
    }
}
