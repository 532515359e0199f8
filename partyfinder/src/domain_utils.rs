use psl::Type;
use std::net::IpAddr;

/// Normalize a host name for matching: trimmed, trailing dot removed,
/// lowercased.
pub fn normalize_host(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_lowercase()
}

/// Longest ICANN public suffix of `host`, if the TLD is known.
///
/// Private registry entries (e.g. `s3.amazonaws.com`) are skipped so that
/// platform hostnames decompose to the platform's own registrable name.
fn icann_suffix(host: &str) -> Option<&str> {
    let mut tail = host;
    loop {
        if let Some(suffix) = psl::suffix(tail.as_bytes()) {
            if suffix.is_known() && suffix.typ() == Some(Type::Icann) && suffix.as_bytes() == tail.as_bytes() {
                return Some(tail);
            }
        }
        match tail.find('.') {
            Some(idx) => tail = &tail[idx + 1..],
            None => return None,
        }
    }
}

/// Split a domain into its second-level label and public suffix.
///
/// `vdmpmqtt.vesync.com` -> (`vesync`, `com`), `api.example.co.uk` ->
/// (`example`, `co.uk`). Hosts without a known public suffix (IP literals,
/// `localhost`, `printer.local`) yield their last label and an empty suffix.
/// A bare suffix yields an empty label.
pub fn split_sld_tld(domain: &str) -> (String, String) {
    let host = normalize_host(domain);

    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        return (host, String::new());
    }

    let Some(suffix) = icann_suffix(&host) else {
        let label = host.rsplit('.').next().unwrap_or(&host).to_string();
        return (label, String::new());
    };

    if suffix == host {
        return (String::new(), suffix.to_string());
    }

    let rest = host
        .strip_suffix(suffix)
        .and_then(|r| r.strip_suffix('.'))
        .unwrap_or("");
    let sld = rest.rsplit('.').next().unwrap_or(rest).to_string();

    (sld, suffix.to_string())
}
