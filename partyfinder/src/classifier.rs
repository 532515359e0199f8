//! Domain provenance classification.
//!
//! Precedence for one domain:
//! 1. first-party signal: exact membership in the unique-domain set, or a
//!    configured suffix match on the lowercased domain
//! 2. initial category: First-party if signalled, else Third-party
//! 3. organization resolved from the IP map, then live WHOIS
//! 4. any support-party keyword in the lowercased organization forces
//!    Support-party, overriding First-party

use crate::artifact::{IpOrganizationMap, PeriodArtifacts};
use crate::domain_utils::split_sld_tld;
use crate::period::Period;
use crate::suffixes::matches_suffix;
use crate::whois::{OrganizationLookup, OrganizationResolver, Resolution};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Organization-name substrings marking infrastructure providers, checked in
/// this order.
pub const SUPPORT_PARTY_KEYWORDS: [&str; 7] = ["aws", "cloudflare", "akamai", "fastly", "cdn", "dns", "digicert"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "First-party")]
    FirstParty,
    #[serde(rename = "Third-party")]
    ThirdParty,
    #[serde(rename = "Support-party")]
    SupportParty,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::FirstParty => "First-party",
            Category::ThirdParty => "Third-party",
            Category::SupportParty => "Support-party",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one contacted domain, before it is stamped with a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainClassification {
    pub domain: String,
    pub sld: String,
    pub tld: String,
    pub category: Category,
    pub organization: String,
    pub query_type: String,
}

/// One output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub period: String,
    #[serde(flatten)]
    pub classification: DomainClassification,
}

impl ClassifiedRecord {
    pub fn new(period: &Period, classification: DomainClassification) -> Self {
        Self {
            period: period.label(),
            classification,
        }
    }
}

/// First keyword contained in the lowercased organization, if any.
pub fn support_keyword(organization: &str) -> Option<&'static str> {
    let lowered = organization.to_lowercase();
    SUPPORT_PARTY_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| lowered.contains(keyword))
}

/// True when the domain carries first-party evidence.
pub fn first_party_signal(domain: &str, unique: &HashSet<String>, suffixes: &[String]) -> bool {
    unique.contains(domain) || matches_suffix(domain, suffixes)
}

/// Combine the first-party signal and the resolved organization into a
/// category.
pub fn categorize(first_party: bool, organization: &str) -> Category {
    if support_keyword(organization).is_some() {
        Category::SupportParty
    } else if first_party {
        Category::FirstParty
    } else {
        Category::ThirdParty
    }
}

fn assemble(domain: &str, first_party: bool, resolution: Resolution) -> DomainClassification {
    let (sld, tld) = split_sld_tld(domain);
    let category = categorize(first_party, &resolution.organization);

    DomainClassification {
        domain: domain.to_string(),
        sld,
        tld,
        category,
        organization: resolution.organization,
        query_type: resolution.query_type,
    }
}

/// Classifies domains for one device. The suffix list is fixed for the
/// lifetime of the classifier.
pub struct Classifier<L> {
    suffixes: Vec<String>,
    resolver: OrganizationResolver<L>,
}

impl<L: OrganizationLookup> Classifier<L> {
    pub fn new(suffixes: Vec<String>, resolver: OrganizationResolver<L>) -> Self {
        Self { suffixes, resolver }
    }

    pub fn suffixes(&self) -> &[String] {
        &self.suffixes
    }

    pub fn resolver(&self) -> &OrganizationResolver<L> {
        &self.resolver
    }

    /// Classify one domain.
    pub async fn classify(
        &self,
        domain: &str,
        unique: &HashSet<String>,
        ip_map: &IpOrganizationMap,
    ) -> DomainClassification {
        let first_party = first_party_signal(domain, unique, &self.suffixes);
        let resolution = self.resolver.resolve(domain, ip_map).await;
        assemble(domain, first_party, resolution)
    }

    /// Classify every contacted domain of a period, in contacted order.
    pub async fn classify_period(&self, artifacts: &PeriodArtifacts) -> Vec<DomainClassification> {
        let resolutions = self
            .resolver
            .resolve_all(&artifacts.contacted, &artifacts.ip_map)
            .await;

        artifacts
            .contacted
            .iter()
            .zip(resolutions)
            .map(|(domain, resolution)| {
                let first_party = first_party_signal(domain, &artifacts.unique, &self.suffixes);
                assemble(domain, first_party, resolution)
            })
            .collect()
    }
}
