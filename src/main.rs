use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mockpt_core::addon::{run_addon, AddonRequest};
use mockpt_core::config::{load_id_ranges, reference_policy_from_value};
use mockpt_core::constants::{DEFAULT_PATIENT_NUMBER, DEFAULT_PRACTICE_ID};
use mockpt_core::validation::{
    default_encounter_date, validate_encounter_date, validate_virtual_dates,
};
use mockpt_core::validator::{self, load_bundle, render_markdown, ValidationReport};
use mockpt_core::{convert, ConvertRequest, CoreConfig, Generator};

const DEFAULT_SYNTHEA_HOME: &str = "./synthea";

#[derive(Parser)]
#[command(name = "mockpt")]
#[command(about = "Turn generated synthetic patients into upload-ready vendor test data")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a generated FHIR bundle (and its CCDA twin) to synthetic identifiers
    Convert {
        /// Generated patient bundle
        input: PathBuf,
        /// Where to write a copy of the converted bundle
        output: PathBuf,
        /// Patient number, the subject becomes `t<number>`
        #[arg(long, default_value_t = DEFAULT_PATIENT_NUMBER)]
        patient_id: u64,
        /// Practice id, with or without the `a-` prefix (default: MOCKPT_PRACTICE_ID)
        #[arg(long)]
        practice_id: Option<String>,
        /// Encounter start dates to mark as virtual (YYYY-MM-DD, comma-separated)
        #[arg(long, value_delimiter = ',')]
        virtual_dates: Vec<String>,
        /// YAML file overriding identifier ranges (default: MOCKPT_ID_RANGES)
        #[arg(long)]
        id_ranges: Option<PathBuf>,
        /// Type written into rewritten typed references: `stated` or `mapped`
        #[arg(long)]
        reference_type: Option<String>,
    },
    /// Generate an add-on CCDA encounter for a patient already on the server
    Addon {
        /// Patient identifier on the server
        #[arg(long)]
        patient_id: String,
        /// Server base URL, `host:port` or host (default: MOCKPT_FHIR_SERVER)
        #[arg(long)]
        server: Option<String>,
        /// Practice id, with or without the `a-` prefix (default: MOCKPT_PRACTICE_ID)
        #[arg(long)]
        practice_id: Option<String>,
        /// Encounter date (YYYY-MM-DD, default 30 days ago)
        #[arg(long)]
        encounter_date: Option<String>,
        /// Directory for the add-on document
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
        /// Generator installation (default: MOCKPT_SYNTHEA_HOME, then ./synthea)
        #[arg(long)]
        synthea_home: Option<PathBuf>,
        /// Module installed for the generator run
        #[arg(long)]
        addon_module: Option<PathBuf>,
    },
    /// Check a converted bundle before upload
    Validate {
        /// Converted patient bundle
        bundle: PathBuf,
        /// Write a markdown report here
        #[arg(long)]
        output: Option<PathBuf>,
        /// Include per-check details
        #[arg(long)]
        verbose: bool,
    },
}

fn env_or(value: Option<String>, key: &str) -> Option<String> {
    value.or_else(|| std::env::var(key).ok().filter(|v| !v.trim().is_empty()))
}

fn core_config(
    practice_id: Option<String>,
    id_ranges: Option<PathBuf>,
    reference_type: Option<String>,
) -> anyhow::Result<CoreConfig> {
    let practice_id =
        env_or(practice_id, "MOCKPT_PRACTICE_ID").unwrap_or_else(|| DEFAULT_PRACTICE_ID.into());
    let id_ranges = id_ranges.or_else(|| env_or(None, "MOCKPT_ID_RANGES").map(PathBuf::from));
    let ranges = load_id_ranges(id_ranges.as_deref())?;
    let policy = reference_policy_from_value(reference_type.as_deref())?;
    Ok(CoreConfig::new(&practice_id, ranges, policy)?)
}

fn print_report(report: &ValidationReport, bundle: &Path) {
    println!("Validating {}", bundle.display().to_string().bold());
    for result in &report.results {
        let mark = match (result.passed, result.critical) {
            (true, _) => "PASS".green(),
            (false, true) => "FAIL".red().bold(),
            (false, false) => "WARN".yellow(),
        };
        println!("  [{mark}] {} ({}/{})", result.name, result.valid, result.checked);
        for issue in &result.issues {
            println!("        {}", issue.red());
        }
        for warning in &result.warnings {
            println!("        {}", warning.yellow());
        }
    }

    let status = if report.passed() {
        "PASSED".green().bold()
    } else {
        "FAILED".red().bold()
    };
    println!(
        "{status}: {} passed, {} failed, {} issues, {} warnings across {} resources",
        report.passed_count(),
        report.failed_count(),
        report.issue_count(),
        report.warning_count(),
        report.total_resources
    );
}

fn run_validate(bundle: &Path, output: Option<&Path>, verbose: bool) -> anyhow::Result<i32> {
    let value = match load_bundle(bundle) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            return Ok(validator::EXIT_UNREADABLE);
        }
    };

    let report = validator::validate(&value);
    print_report(&report, bundle);

    if let Some(output) = output {
        let name = bundle
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        std::fs::write(output, render_markdown(&report, &name, verbose))
            .with_context(|| format!("failed to write report to {}", output.display()))?;
        println!("Report written to {}", output.display());
    }
    Ok(report.exit_code())
}

/// Main entry point for the mockpt CLI
///
/// # Environment Variables
/// - `MOCKPT_PRACTICE_ID`: practice id (default: "a-16349")
/// - `MOCKPT_SYNTHEA_HOME`: generator installation (default: "./synthea")
/// - `MOCKPT_FHIR_SERVER`: remote server for `addon`
/// - `MOCKPT_ID_RANGES`: YAML identifier range overrides
/// - `RUST_LOG`: log filter (default: info for the mockpt crates)
fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mockpt=info".parse()?)
                .add_directive("fhir=info".parse()?)
                .add_directive("ccda=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            input,
            output,
            patient_id,
            practice_id,
            virtual_dates,
            id_ranges,
            reference_type,
        } => {
            validate_virtual_dates(&virtual_dates)?;
            let config = core_config(practice_id, id_ranges, reference_type)?;
            let request = ConvertRequest {
                input,
                output,
                patient_number: patient_id,
                virtual_dates,
            };
            let summary = convert(&config, &request)?;

            println!("{} {}", "Converted patient".green().bold(), summary.patient_id);
            println!("  bundle:      {}", summary.bundle_path.display());
            println!("  mapped ids:  {}", summary.mapped);
            println!("  references:  {} updated", summary.references_updated);
            if let Some(document) = &summary.document {
                println!("  ccda:        {}", document.path.display());
            }
            for path in &summary.shared_bundles {
                println!("  shared:      {}", path.display());
            }
            for (resource_type, id) in &summary.unconfigured {
                println!(
                    "  {} {resource_type}/{id} kept its original id (no range configured)",
                    "warning:".yellow()
                );
            }
        }
        Commands::Addon {
            patient_id,
            server,
            practice_id,
            encounter_date,
            output_dir,
            synthea_home,
            addon_module,
        } => {
            let today = chrono::Local::now().date_naive();
            let encounter_date = match encounter_date {
                Some(date) => validate_encounter_date(&date, today)?,
                None => default_encounter_date(today),
            };
            let server = env_or(server, "MOCKPT_FHIR_SERVER")
                .context("no server given, pass --server or set MOCKPT_FHIR_SERVER")?;
            let home = synthea_home
                .or_else(|| env_or(None, "MOCKPT_SYNTHEA_HOME").map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SYNTHEA_HOME));

            let config = core_config(practice_id, None, None)?;
            let request = AddonRequest {
                patient_id,
                server,
                encounter_date,
                output_dir,
                generator: Generator::new(home).with_addon_module(addon_module),
            };
            let summary = run_addon(&config, &request)?;

            println!("{} {}", "Wrote add-on document".green().bold(), summary.output.display());
            println!("  encounter:   {}", summary.encounter_id);
            println!("  practice:    {}", summary.practice_name);
            println!("  vendor ids:  {}", summary.vendor_ids);
        }
        Commands::Validate {
            bundle,
            output,
            verbose,
        } => {
            let code = run_validate(&bundle, output.as_deref(), verbose)?;
            std::process::exit(code);
        }
    }

    Ok(())
}
