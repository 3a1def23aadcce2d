use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "dmk")]
#[command(about = "Danmokou state machine script tools")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    /// Constructs scripts without running them.
    Check(CheckArgs),
    /// Prints the macro-expanded token stream of a script.
    Expand(ExpandArgs),
    /// Runs a script headlessly and prints the report.
    Run(RunArgs),
    /// Lists the phase headers of a pattern script.
    Phases(PhasesArgs),
}

#[derive(Debug, Args)]
pub(crate) struct CheckArgs {
    pub(crate) file: Option<String>,
    #[arg(long = "scripts-dir", conflicts_with = "file")]
    pub(crate) scripts_dir: Option<String>,
}

#[derive(Debug, Args)]
pub(crate) struct ExpandArgs {
    pub(crate) file: String,
    /// Print the flattened units with positions instead of joined text.
    #[arg(long = "json")]
    pub(crate) json: bool,
}

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    pub(crate) file: String,
    #[arg(long = "seed", default_value_t = 0)]
    pub(crate) seed: u32,
    #[arg(long = "max-frames")]
    pub(crate) max_frames: Option<u64>,
    #[arg(long = "dps", default_value_t = 0.0)]
    pub(crate) dps: f64,
    #[arg(long = "no-phase-buffer")]
    pub(crate) no_phase_buffer: bool,
    /// Extra targets that `@` may address.
    #[arg(long = "target")]
    pub(crate) targets: Vec<String>,
    #[arg(long = "cancel-at")]
    pub(crate) cancel_at: Option<u64>,
}

#[derive(Debug, Args)]
pub(crate) struct PhasesArgs {
    pub(crate) file: String,
}
