use crate::classifier::{Category, ClassifiedRecord};
use crate::period::Period;
use crate::whois::LookupStats;
use anyhow::{Context, Result};
use chrono::Utc;
use csv::Writer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Column order of every per-period table.
pub const CSV_HEADERS: [&str; 7] = [
    "Month-Year",
    "Domain",
    "SLD",
    "TLD",
    "Category",
    "Organization",
    "Query Type",
];

pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Destination for the classified records of one period.
pub trait RecordSink {
    /// Persist one period's records. Returns a description of where they went.
    fn write_period(&mut self, period: &Period, records: &[ClassifiedRecord]) -> Result<String>;
}

pub fn export_csv<W: Write>(records: &[ClassifiedRecord], writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);

    wtr.write_record(CSV_HEADERS)?;

    for record in records {
        let c = &record.classification;
        wtr.write_record([
            record.period.as_str(),
            c.domain.as_str(),
            c.sld.as_str(),
            c.tld.as_str(),
            c.category.as_str(),
            c.organization.as_str(),
            c.query_type.as_str(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes one `categorized_domains_<Mon>_<year>.csv` per period into a
/// device output directory.
pub struct CsvSink {
    output_dir: PathBuf,
}

impl CsvSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path_for(&self, period: &Period) -> PathBuf {
        self.output_dir
            .join(format!("categorized_domains_{}.csv", period.folder_name()))
    }
}

impl RecordSink for CsvSink {
    fn write_period(&mut self, period: &Period, records: &[ClassifiedRecord]) -> Result<String> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create output directory: {}", self.output_dir.display()))?;

        let path = self.path_for(period);
        debug!("Exporting {} records to CSV: {}", records.len(), path.display());

        let file = File::create(&path)
            .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
        export_csv(records, file)
            .with_context(|| format!("Failed to write CSV file: {}", path.display()))?;

        info!("Saved {} records to {}", records.len(), path.display());
        Ok(path.display().to_string())
    }
}

/// Keeps every emitted period in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub periods: Vec<(Period, Vec<ClassifiedRecord>)>,
}

impl RecordSink for MemorySink {
    fn write_period(&mut self, period: &Period, records: &[ClassifiedRecord]) -> Result<String> {
        self.periods.push((period.clone(), records.to_vec()));
        Ok(format!("memory:{}", period.label()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodStatus {
    Processed,
    SkippedMissingPeriod,
    SkippedMissingArtifact,
    FailedMalformed,
}

impl PeriodStatus {
    pub fn is_skipped(&self) -> bool {
        matches!(self, PeriodStatus::SkippedMissingPeriod | PeriodStatus::SkippedMissingArtifact)
    }
}

/// Outcome of one (year, month) in the grid.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodReport {
    pub period: String,
    pub status: PeriodStatus,
    pub records: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<Category, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl PeriodReport {
    pub fn new(period: &Period, status: PeriodStatus) -> Self {
        Self {
            period: period.label(),
            status,
            records: 0,
            categories: BTreeMap::new(),
            detail: None,
            output: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn processed(period: &Period, records: &[ClassifiedRecord], output: String) -> Self {
        let mut report = Self::new(period, PeriodStatus::Processed);
        report.records = records.len();
        report.categories = category_counts(records);
        report.output = Some(output);
        report
    }
}

/// Summary of a device run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub device: String,
    pub periods_total: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_records: usize,
    pub categories: BTreeMap<Category, usize>,
    pub lookups: LookupStats,
    pub periods: Vec<PeriodReport>,
    pub started_at: String,
    pub completed_at: String,
}

impl RunSummary {
    pub fn new(device: &str) -> Self {
        Self {
            device: device.to_string(),
            periods_total: 0,
            processed: 0,
            skipped: 0,
            failed: 0,
            total_records: 0,
            categories: BTreeMap::new(),
            lookups: LookupStats::default(),
            periods: Vec::new(),
            started_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            completed_at: String::new(),
        }
    }

    /// Recompute totals from the period reports and stamp the finish time.
    pub fn finalize(&mut self, lookups: LookupStats) {
        self.completed_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
        self.lookups = lookups;
        self.periods_total = self.periods.len();
        self.processed = self
            .periods
            .iter()
            .filter(|p| p.status == PeriodStatus::Processed)
            .count();
        self.skipped = self.periods.iter().filter(|p| p.status.is_skipped()).count();
        self.failed = self
            .periods
            .iter()
            .filter(|p| p.status == PeriodStatus::FailedMalformed)
            .count();
        self.total_records = self.periods.iter().map(|p| p.records).sum();

        self.categories.clear();
        for report in &self.periods {
            for (category, count) in &report.categories {
                *self.categories.entry(*category).or_insert(0) += count;
            }
        }
    }

    pub fn processed_labels(&self) -> Vec<&str> {
        self.periods
            .iter()
            .filter(|p| p.status == PeriodStatus::Processed)
            .map(|p| p.period.as_str())
            .collect()
    }
}

pub fn category_counts(records: &[ClassifiedRecord]) -> BTreeMap<Category, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.classification.category).or_insert(0) += 1;
    }
    counts
}

/// Export run summary to JSON file
pub fn export_run_summary(summary: &RunSummary, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(summary).context("Failed to serialize run summary")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write run summary to: {}", output_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::DomainClassification;
    use crate::period::Month;
    use tempfile::tempdir;

    fn record(period: &Period, domain: &str, category: Category, org: &str) -> ClassifiedRecord {
        ClassifiedRecord::new(
            period,
            DomainClassification {
                domain: domain.to_string(),
                sld: domain.split('.').rev().nth(1).unwrap_or("").to_string(),
                tld: domain.rsplit('.').next().unwrap_or("").to_string(),
                category,
                organization: org.to_string(),
                query_type: "A".to_string(),
            },
        )
    }

    #[test]
    fn test_csv_columns_and_quoting() {
        let period = Period::new("2023", Month::Jan);
        let records = vec![
            record(&period, "vdmpmqtt.vesync.com", Category::FirstParty, "Unknown"),
            record(&period, "tracker.ads.net", Category::SupportParty, "Cloudflare, Inc."),
        ];

        let mut buf = Vec::new();
        export_csv(&records, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Month-Year,Domain,SLD,TLD,Category,Organization,Query Type");
        assert_eq!(lines[1], "Jan-2023,vdmpmqtt.vesync.com,vesync,com,First-party,Unknown,A");
        assert_eq!(lines[2], "Jan-2023,tracker.ads.net,ads,net,Support-party,\"Cloudflare, Inc.\",A");
    }

    #[test]
    fn test_csv_sink_writes_period_file() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("device-1");
        let mut sink = CsvSink::new(&out);
        let period = Period::new("2024", Month::Oct);

        let written = sink
            .write_period(&period, &[record(&period, "a.example.com", Category::ThirdParty, "Acme")])
            .unwrap();

        let path = out.join("categorized_domains_Oct_2024.csv");
        assert_eq!(written, path.display().to_string());
        let content = fs::read_to_string(path).unwrap();
        assert!(content.starts_with("Month-Year,"));
        assert!(content.contains("Oct-2024,a.example.com,example,com,Third-party,Acme,A"));
    }

    #[test]
    fn test_empty_period_still_has_header() {
        let mut buf = Vec::new();
        export_csv(&[], &mut buf).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap().lines().count(), 1);
    }

    #[test]
    fn test_summary_finalize_counts() {
        let jan = Period::new("2023", Month::Jan);
        let feb = Period::new("2023", Month::Feb);
        let mar = Period::new("2023", Month::Mar);
        let apr = Period::new("2023", Month::Apr);

        let records = vec![
            record(&jan, "a.com", Category::FirstParty, "Unknown"),
            record(&jan, "b.com", Category::ThirdParty, "Acme"),
            record(&jan, "c.com", Category::ThirdParty, "Other"),
        ];

        let mut summary = RunSummary::new("dev");
        summary.periods.push(PeriodReport::processed(&jan, &records, "jan.csv".into()));
        summary.periods.push(PeriodReport::new(&feb, PeriodStatus::SkippedMissingPeriod));
        summary.periods.push(
            PeriodReport::new(&mar, PeriodStatus::SkippedMissingArtifact).with_detail("ip_domain_map.pkl"),
        );
        summary.periods.push(PeriodReport::new(&apr, PeriodStatus::FailedMalformed));
        summary.finalize(LookupStats::default());

        assert_eq!(summary.periods_total, 4);
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.categories.get(&Category::ThirdParty), Some(&2));
        assert_eq!(summary.processed_labels(), vec!["Jan-2023"]);
        assert!(!summary.completed_at.is_empty());
    }

    #[test]
    fn test_export_run_summary_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join(RUN_SUMMARY_FILE);
        let period = Period::new("2025", Month::Dec);

        let mut summary = RunSummary::new("dev");
        summary.periods.push(PeriodReport::new(&period, PeriodStatus::SkippedMissingArtifact));
        summary.finalize(LookupStats::default());
        export_run_summary(&summary, &path).unwrap();

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["device"], "dev");
        assert_eq!(json["periods"][0]["status"], "skipped_missing_artifact");
        assert_eq!(json["periods"][0]["period"], "Dec-2025");
        assert_eq!(json["skipped"], 1);
    }
}
