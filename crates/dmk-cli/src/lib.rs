use std::ffi::OsString;

use clap::Parser;
use dmk_api::{
    create_from_dump, expand_script, expand_script_units, run_script, summarize_phases,
    RunOptions, RunOutcome,
};
use dmk_core::SmError;
use serde::Serialize;

mod cli_args;
mod error_map;
mod source_loader;

pub(crate) use cli_args::{CheckArgs, Cli, ExpandArgs, Mode, PhasesArgs, RunArgs};
pub(crate) use error_map::{
    emit_error, map_cli_output, map_cli_source_path, map_cli_source_read, map_cli_source_scan,
};
pub(crate) use source_loader::{read_script_file, read_scripts_from_dir};
#[cfg(test)]
pub(crate) use source_loader::resolve_path;

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => return error.exit_code(),
    };
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, SmError> {
    match cli.command {
        Mode::Check(args) => run_check(args),
        Mode::Expand(args) => run_expand(args),
        Mode::Run(args) => run_run(args),
        Mode::Phases(args) => run_phases(args),
    }
}

fn to_json(value: &impl Serialize) -> Result<String, SmError> {
    serde_json::to_string(value).map_err(map_cli_output)
}

fn check_one(name: &str, text: &str) -> Result<String, SmError> {
    let root = create_from_dump(text).map_err(|error| error.wrap(format!("{}: ", name)))?;
    Ok(root.kind().name().to_string())
}

fn run_check(args: CheckArgs) -> Result<i32, SmError> {
    let scripts = match (args.file, args.scripts_dir) {
        (Some(file), _) => {
            let text = read_script_file(&file)?;
            vec![(file, text)]
        }
        (None, Some(dir)) => read_scripts_from_dir(&dir)?.into_iter().collect(),
        (None, None) => {
            return Err(SmError::new(
                "CLI_ARGS",
                "check needs a script file or --scripts-dir.",
            ))
        }
    };

    let mut checked = Vec::with_capacity(scripts.len());
    for (name, text) in &scripts {
        checked.push((name, check_one(name, text)?));
    }
    println!("RESULT:OK");
    for (name, kind) in checked {
        println!("SCRIPT_JSON:{}", to_json(name)?);
        println!("ROOT:{}", kind);
    }
    Ok(0)
}

fn run_expand(args: ExpandArgs) -> Result<i32, SmError> {
    let text = read_script_file(&args.file)?;
    let output = if args.json {
        format!("UNITS_JSON:{}", to_json(&expand_script_units(&text)?)?)
    } else {
        format!("EXPANDED_JSON:{}", to_json(&expand_script(&text)?)?)
    };
    println!("RESULT:OK");
    println!("{}", output);
    Ok(0)
}

fn run_options(args: &RunArgs) -> RunOptions {
    let defaults = RunOptions::default();
    RunOptions {
        seed: args.seed,
        max_frames: args.max_frames.unwrap_or(defaults.max_frames),
        phase_buffer: !args.no_phase_buffer,
        player_dps: args.dps,
        extra_targets: args.targets.clone(),
        cancel_at: args.cancel_at,
        ..defaults
    }
}

fn run_run(args: RunArgs) -> Result<i32, SmError> {
    let text = read_script_file(&args.file)?;
    let report = run_script(&text, &run_options(&args))?;
    let outcome = to_json(&report.outcome)?;
    println!("RESULT:OK");
    println!("OUTCOME:{}", outcome.trim_matches('"'));
    println!("FRAMES:{}", report.frames);
    println!("REPORT_JSON:{}", to_json(&report)?);
    Ok(if report.outcome == RunOutcome::Faulted { 2 } else { 0 })
}

fn run_phases(args: PhasesArgs) -> Result<i32, SmError> {
    let text = read_script_file(&args.file)?;
    let phases = summarize_phases(&text)?;
    println!("RESULT:OK");
    for phase in &phases {
        println!("PHASE_JSON:{}", to_json(phase)?);
    }
    Ok(0)
}
