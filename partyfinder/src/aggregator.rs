//! Longitudinal aggregation: walk the (year, month) grid for one device,
//! classify every period with complete data and hand the records to a sink.

use crate::artifact::ArtifactError;
use crate::classifier::{ClassifiedRecord, Classifier};
use crate::config::AppConfig;
use crate::export::{PeriodReport, PeriodStatus, RecordSink, RunSummary};
use crate::logger::RunLogger;
use crate::period::Period;
use crate::suffixes::{load_suffixes, merge_suffixes};
use crate::whois::{OrganizationLookup, OrganizationResolver};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Build the classifier for a device: the suffix file is read once and the
/// selected manufacturer table is appended to it.
pub fn build_classifier<L: OrganizationLookup>(config: &AppConfig, lookup: L) -> Result<Classifier<L>> {
    let suffix_path = config.first_party_file();
    let suffixes = load_suffixes(&suffix_path)?;
    let suffixes = merge_suffixes(suffixes, config.manufacturer_domains());
    debug!("Using {} first-party suffixes for device {}", suffixes.len(), config.device.id);

    let resolver = OrganizationResolver::new(lookup, Duration::from_secs(config.whois.timeout_secs))
        .with_live_lookup(config.whois.enabled)
        .with_concurrency(config.whois.concurrency);

    Ok(Classifier::new(suffixes, resolver))
}

/// Process one period and report its outcome. Only sink failures are
/// returned as errors; artifact problems become a skipped or failed report.
pub async fn process_period<L, S>(
    config: &AppConfig,
    classifier: &Classifier<L>,
    sink: &mut S,
    period: &Period,
) -> Result<PeriodReport>
where
    L: OrganizationLookup,
    S: RecordSink,
{
    let period_dir = config.period_dir(period);
    if !period_dir.is_dir() {
        return Ok(PeriodReport::new(period, PeriodStatus::SkippedMissingPeriod));
    }

    let paths = config.artifact_paths(period);
    if let Some(missing) = paths.first_missing() {
        let name = missing
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| missing.display().to_string());
        info!("{}: {} not found, skipping period", period, missing.display());
        return Ok(PeriodReport::new(period, PeriodStatus::SkippedMissingArtifact).with_detail(name));
    }

    let artifacts = match paths.load(config.schema.unique_wildcard) {
        Ok(artifacts) => artifacts,
        Err(ArtifactError::Missing { path }) => {
            info!("{}: {} disappeared, skipping period", period, path.display());
            return Ok(PeriodReport::new(period, PeriodStatus::SkippedMissingArtifact)
                .with_detail(path.display().to_string()));
        }
        Err(e) => {
            warn!("{}: {}", period, e);
            return Ok(PeriodReport::new(period, PeriodStatus::FailedMalformed).with_detail(e.to_string()));
        }
    };

    let records: Vec<ClassifiedRecord> = classifier
        .classify_period(&artifacts)
        .await
        .into_iter()
        .map(|classification| ClassifiedRecord::new(period, classification))
        .collect();

    let output = sink
        .write_period(period, &records)
        .with_context(|| format!("Failed to write records for {}", period))?;

    Ok(PeriodReport::processed(period, &records, output))
}

/// Run the whole grid for the configured device.
pub async fn run<L, S>(
    config: &AppConfig,
    classifier: &Classifier<L>,
    sink: &mut S,
    logger: &RunLogger,
) -> Result<RunSummary>
where
    L: OrganizationLookup,
    S: RecordSink,
{
    let grid = Period::grid(&config.device.years);
    let mut summary = RunSummary::new(&config.device.id);

    if !config.device_dir().is_dir() {
        logger.warn(&format!(
            "Device directory {} does not exist; every period will be skipped",
            config.device_dir().display()
        ));
    }

    logger.start_progress(grid.len() as u64);

    for period in &grid {
        logger.update_progress(&period.label());
        let report = process_period(config, classifier, sink, period).await?;
        logger.log_period(&report);
        summary.periods.push(report);
        logger.advance_progress();
    }

    logger.finish_progress();
    summary.finalize(classifier.resolver().stats());

    info!(
        "Device {}: {} periods processed, {} skipped, {} failed",
        summary.device, summary.processed, summary.skipped, summary.failed
    );

    Ok(summary)
}
