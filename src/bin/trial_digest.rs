use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use trial_digest::app::{App, LookupStatus, RunResult};
use trial_digest::config::{ConfigLoader, ResolvedConfig};
use trial_digest::ctgov::CtgovHttpClient;
use trial_digest::error::TrialError;
use trial_digest::listing::load_listing;
use trial_digest::normalize::Normalizer;
use trial_digest::output::{JsonOutput, JsonReportWriter, TracingSink};

#[derive(Parser)]
#[command(name = "trial-digest")]
#[command(about = "Resolve open trials from a protocol listing and build a per-disease report")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve every open trial in a listing and write the report")]
    Run(RunArgs),
    #[command(about = "Look up a single trial identifier")]
    Lookup(LookupArgs),
    #[command(about = "Show the canonical form of trial identifiers")]
    Normalize(NormalizeArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    listing: PathBuf,

    #[arg(long)]
    out: Option<Utf8PathBuf>,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct LookupArgs {
    id: String,
}

#[derive(Args)]
struct NormalizeArgs {
    #[arg(required = true)]
    ids: Vec<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<TrialError>() {
            return ExitCode::from(err.exit_code());
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run_batch(args, config),
        Commands::Lookup(args) => run_lookup(args, config),
        Commands::Normalize(args) => {
            run_normalize(args, &config);
            Ok(())
        }
    }
}

fn run_batch(args: RunArgs, config: ResolvedConfig) -> miette::Result<()> {
    let rows = load_listing(&args.listing)?;
    let client = CtgovHttpClient::new(&config.lookup)?;
    let app = App::new(&config, client);
    let output_dir = args.out.unwrap_or_else(|| config.output_dir.clone());
    let mut writer = JsonReportWriter::dated_today(&output_dir);

    if args.json {
        let result = app.run(&rows, &mut writer, &JsonOutput)?;
        JsonOutput::print_run(&result).into_diagnostic()?;
    } else {
        let result = app.run(&rows, &mut writer, &TracingSink)?;
        print_run_summary(&result);
    }
    Ok(())
}

fn run_lookup(args: LookupArgs, config: ResolvedConfig) -> miette::Result<()> {
    let client = CtgovHttpClient::new(&config.lookup)?;
    let app = App::new(&config, client);
    let result = app.lookup(&args.id)?;
    JsonOutput::print_lookup(&result).into_diagnostic()?;
    match result.status {
        LookupStatus::Found => Ok(()),
        LookupStatus::NotFound => Err(miette::Report::msg(format!(
            "no study available for {}",
            result.normalized_id
        ))),
        LookupStatus::Failed => Err(miette::Report::msg(format!(
            "lookup failed for {}: {}",
            result.normalized_id,
            result.reason.unwrap_or_default()
        ))),
    }
}

fn run_normalize(args: NormalizeArgs, config: &ResolvedConfig) {
    let normalizer = Normalizer::new(config.aliases.clone());
    for raw in &args.ids {
        let id = normalizer.normalize(raw);
        println!("{raw}\t{id}\t{}", id.query_value());
    }
}

fn print_run_summary(result: &RunResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}Trial digest summary{reset}");
    println!(
        "{green}Resolved {} of {} open trials ({} listed, {} lookups){reset}",
        result.merged, result.open_rows, result.listed, result.lookups
    );
    for category in &result.categories {
        println!("{green}   {}: {}{reset}", category.label, category.records);
    }

    if !result.unresolved.is_empty() {
        println!(
            "{yellow}The following trials were not available for download. Please check online.{reset}"
        );
        for entry in &result.unresolved {
            println!("{yellow}   {} ({}){reset}", entry.study_id, entry.reason);
        }
    }

    for path in &result.written {
        println!("{cyan}   wrote {path}{reset}");
    }
}
