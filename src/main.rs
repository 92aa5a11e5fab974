use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use leap_tools::branches::{DefaultKinds, FailureMode, KindOverrides};
use leap_tools::config::ReconcileConfig;
use leap_tools::model::BranchPath;
use leap_tools::workflow::{self, BranchRunSettings};
use leap_tools::{Result, ToolError};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = init_tracing().and_then(|()| run(cli)) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| ToolError::Logging(error.to_string()))
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Branches(args) => execute_branches(args),
        Command::Reconcile(args) => execute_reconcile(args),
    }
}

fn execute_branches(args: BranchArgs) -> Result<()> {
    if !args.input.exists() {
        return Err(ToolError::MissingInput(args.input));
    }

    let overrides = match &args.overrides {
        Some(path) => KindOverrides::from_json_str(&fs::read_to_string(path)?)?,
        None => KindOverrides::new(),
    }
    .with_root(args.root.as_deref().map(BranchPath::parse));

    let settings = BranchRunSettings {
        sheet: args.sheet,
        scenario: args.scenario,
        region: args.region,
        defaults: args.defaults.into(),
        overrides,
        mode: if args.lenient {
            FailureMode::Lenient
        } else {
            FailureMode::Strict
        },
    };
    let output = args.output.as_ref().unwrap_or(&args.hierarchy);
    let report =
        workflow::create_branches_from_workbook(&args.input, &args.hierarchy, output, &settings)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn execute_reconcile(args: ReconcileArgs) -> Result<()> {
    if !args.input.exists() {
        return Err(ToolError::MissingInput(args.input));
    }
    let config = ReconcileConfig::load(&args.config)?;
    let config_dir = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let result = workflow::reconcile_workbook(&args.input, &config, &config_dir, &args.output)?;
    println!("{}", serde_json::to_string_pretty(&result.summary)?);
    Ok(())
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Create missing LEAP branches and reconcile exported inputs against reference totals."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the branches listed in an export sheet that are missing from a hierarchy snapshot.
    Branches(BranchArgs),
    /// Scale exported inputs so modelled totals match reference totals.
    Reconcile(ReconcileArgs),
}

#[derive(clap::Args)]
struct BranchArgs {
    /// Workbook listing the target branch paths.
    #[arg(long)]
    input: PathBuf,

    /// Sheet holding the branch path column.
    #[arg(long, default_value = "LEAP")]
    sheet: String,

    /// JSON hierarchy snapshot to create branches in.
    #[arg(long)]
    hierarchy: PathBuf,

    /// Where to write the updated snapshot. Defaults to overwriting the input snapshot.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Root prefix stripped before looking paths up in the override table.
    #[arg(long)]
    root: Option<String>,

    /// JSON object mapping branch paths to explicit kinds.
    #[arg(long)]
    overrides: Option<PathBuf>,

    /// Kinds assigned by position when no override applies.
    #[arg(long, value_enum, default_value_t = KindPreset::KeyAssumptions)]
    defaults: KindPreset,

    /// Only consider rows of this scenario.
    #[arg(long)]
    scenario: Option<String>,

    /// Only consider rows of this region.
    #[arg(long)]
    region: Option<String>,

    /// Record failed branches and continue instead of stopping at the first one.
    #[arg(long)]
    lenient: bool,
}

#[derive(clap::Args)]
struct ReconcileArgs {
    /// Export workbook holding the model inputs.
    #[arg(long)]
    input: PathBuf,

    /// TOML run configuration.
    #[arg(long)]
    config: PathBuf,

    /// Output workbook path.
    #[arg(long)]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KindPreset {
    KeyAssumptions,
    Demand,
}

impl From<KindPreset> for DefaultKinds {
    fn from(preset: KindPreset) -> Self {
        match preset {
            KindPreset::KeyAssumptions => DefaultKinds::KEY_ASSUMPTIONS,
            KindPreset::Demand => DefaultKinds::DEMAND,
        }
    }
}
