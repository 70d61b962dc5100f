use clap::{Parser, Subcommand};
use panelvar::cli;
use panelvar::error::PanelResult;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "panelvar")]
#[command(about = "Derived variables for panel (entity x time) datasets")]
#[command(long_about = "panelvar - Derived variables for panel datasets

Computes named formulas over an entity x time table, in declaration order.
Later formulas may use earlier results by name.

FORMULA KINDS:
  mean        - Grouped mean, broadcast to every row of the group
  stdev       - Grouped (or whole-column) sample standard deviation
  expression  - Arithmetic/boolean expression over columns
                Col(x-1), Col(x+2): neighbouring rows of the same entity

COMMANDS:
  compute     - Run a job file and write or preview the result
  validate    - Check job files without computing
  functions   - List supported functions and operators

EXAMPLES:
  panelvar compute job.yaml                  # Preview results
  panelvar compute job.yaml -o result.json   # Write JSON
  panelvar compute job.yaml --threads 4 -v   # 4 workers, debug logging
  panelvar validate a.yaml b.yaml")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Compute all formulas of a job file.

JOB FILE:
  entity_column: Firm
  time_column: Year
  engine: { parallel: true, max_threads: 4 }
  columns:
    Firm: [A, A, B, B]
    Year: [2020, 2021, 2020, 2021]
    Revenue: [100, 110, 50, 55]
  formulas:
    - { name: Rev_mean, kind: mean, target: Revenue, groups: [Firm] }
    - { name: Rev_lag, expression: \"Revenue(x-1)\" }

Without --output a preview of the result table is printed.
Log detail follows RUST_LOG (default: warnings only).")]
    /// Compute all formulas in a job file
    Compute {
        /// Path to the job YAML file
        file: PathBuf,

        /// Write the result table (.yaml, .yml or .json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Worker threads (overrides engine.max_threads)
        #[arg(short, long, env = "PANELVAR_THREADS")]
        threads: Option<usize>,

        /// Evaluate on the calling thread only
        #[arg(long)]
        sequential: bool,

        /// Show formulas and debug logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate job files without computing
    Validate {
        /// Job files to validate
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List supported functions and operators
    Functions,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "panelvar=debug" } else { "panelvar=warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .init();
}

fn main() -> PanelResult<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Compute { verbose: true, .. });
    init_tracing(verbose);

    match cli.command {
        Commands::Compute {
            file,
            output,
            threads,
            sequential,
            verbose,
        } => cli::compute(file, output, threads, sequential, verbose),

        Commands::Validate { files } => cli::validate(files),

        Commands::Functions => cli::functions(),
    }
}
