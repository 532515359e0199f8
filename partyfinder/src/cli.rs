use crate::artifact::SchemaPolicy;
use crate::config::ConfigOverrides;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "partyfinder")]
#[command(about = "Classify a device's contacted domains into first, third and support parties, month by month")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Create default configuration file at ./config/partyfinder.toml
    #[arg(long, global = true)]
    pub init: bool,

    /// Path to the configuration file (defaults to ./config/partyfinder.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Device identifier, the directory name under the base directory (overrides config)
    #[arg(short, long, global = true)]
    pub device: Option<String>,

    /// Root of the longitudinal artifact tree (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Directory for the per-period CSV files (overrides config)
    #[arg(long, global = true, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Years to process, comma separated (overrides config)
    #[arg(long, global = true, value_delimiter = ',', value_name = "YEAR")]
    pub years: Option<Vec<String>>,

    /// Meaning of a unique-domain file wrapped as {"..": [...]}: 'curated' or 'undifferentiated'
    #[arg(long, value_parser = parse_policy, value_name = "POLICY")]
    pub wildcard_policy: Option<SchemaPolicy>,

    /// Never query WHOIS; unmapped domains resolve to Unknown
    #[arg(long)]
    pub no_whois: bool,

    /// Timeout for each WHOIS lookup in seconds (overrides config)
    #[arg(long, value_name = "SECS")]
    pub whois_timeout: Option<u64>,

    /// Maximum concurrent WHOIS lookups within a period (overrides config)
    #[arg(long, value_name = "CONCURRENCY")]
    pub whois_concurrency: Option<usize>,

    /// Verbose logging (use -v for INFO, -vv for DEBUG)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify every period of the device (default when no subcommand is given)
    Run,

    /// Unwrap {"..": [...]} contacted/unique domain files into plain lists
    Repair,

    /// Write an empty IP map into month folders that lack one
    InitIpMaps,

    /// Write the device's first-party suffix file
    FirstParty {
        /// Domains to write; defaults to the configured manufacturer table
        domains: Vec<String>,
    },
}

fn parse_policy(s: &str) -> Result<SchemaPolicy, String> {
    SchemaPolicy::parse(s).ok_or_else(|| format!("unknown wildcard policy '{}' (expected 'curated' or 'undifferentiated')", s))
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            device: self.device.clone(),
            base_dir: self.base_dir.clone(),
            output_dir: self.output_dir.clone(),
            years: self.years.clone(),
            wildcard_policy: self.wildcard_policy,
            disable_whois: self.no_whois,
            whois_timeout_secs: self.whois_timeout,
            whois_concurrency: self.whois_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "partyfinder",
            "--device",
            "plug-01",
            "--years",
            "2023,2024",
            "--wildcard-policy",
            "curated",
            "--no-whois",
            "-vv",
        ])
        .unwrap();

        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 2);
        let overrides = cli.overrides();
        assert_eq!(overrides.device.as_deref(), Some("plug-01"));
        assert_eq!(overrides.years, Some(vec!["2023".to_string(), "2024".to_string()]));
        assert_eq!(overrides.wildcard_policy, Some(SchemaPolicy::WildcardIsCuratedFirstParty));
        assert!(overrides.disable_whois);
    }

    #[test]
    fn test_bad_policy_rejected() {
        assert!(Cli::try_parse_from(["partyfinder", "--wildcard-policy", "maybe"]).is_err());
    }

    #[test]
    fn test_first_party_subcommand() {
        let cli = Cli::try_parse_from(["partyfinder", "first-party", "vesync.com", "ntp.vesync.com", "--device", "d"]).unwrap();
        match cli.command {
            Some(Commands::FirstParty { domains }) => assert_eq!(domains.len(), 2),
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.device.as_deref(), Some("d"));
    }
}
