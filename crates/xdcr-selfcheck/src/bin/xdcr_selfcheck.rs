use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use xdcr_selfcheck::SelfCheckConfig;
use xdcr_selfcheck::runner::{LoopbackRun, run_loopback};

#[derive(Debug, Clone, Default)]
struct Args {
    config: Option<PathBuf>,
    seed: Option<u64>,
    rounds: Option<u32>,
    lag_ms: Option<u64>,
    oracle_out: Option<PathBuf>,
    output_json: Option<PathBuf>,
    skip_verify: bool,
}

impl Args {
    fn parse() -> Result<Option<Self>, String> {
        let mut parsed = Self::default();
        let args: Vec<String> = env::args().skip(1).collect();
        let mut index = 0_usize;
        while index < args.len() {
            let flag = args[index].as_str();
            let mut value = || {
                index += 1;
                args.get(index)
                    .cloned()
                    .ok_or_else(|| format!("missing value for {flag}"))
            };
            match flag {
                "--config" => parsed.config = Some(PathBuf::from(value()?)),
                "--seed" => parsed.seed = Some(parse_number(flag, &value()?)?),
                "--rounds" => parsed.rounds = Some(parse_number(flag, &value()?)?),
                "--lag-ms" => parsed.lag_ms = Some(parse_number(flag, &value()?)?),
                "--oracle-out" => parsed.oracle_out = Some(PathBuf::from(value()?)),
                "--output-json" => parsed.output_json = Some(PathBuf::from(value()?)),
                "--skip-verify" => parsed.skip_verify = true,
                "--help" | "-h" => {
                    print_help();
                    return Ok(None);
                }
                other => return Err(format!("unknown argument: {other}")),
            }
            index += 1;
        }
        Ok(Some(parsed))
    }
}

fn parse_number<T>(flag: &str, value: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|error| format!("invalid {flag} value={value}: {error}"))
}

fn print_help() {
    println!(
        "\
xdcr_selfcheck: provoke and verify replication conflicts on a loopback cluster pair

USAGE:
  xdcr_selfcheck [OPTIONS]

OPTIONS:
  --config <PATH>        JSON configuration (defaults apply to missing fields)
  --seed <N>             Override the payload seed
  --rounds <N>           Override the number of rounds
  --lag-ms <N>           Replication lag between the clusters (default 20)
  --oracle-out <PATH>    Write the derived oracle rows as JSON
  --output-json <PATH>   Write the run report as JSON
  --skip-verify          Run scenarios only
  -h, --help             Show help

Log level follows RUST_LOG (default info)."
    );
}

fn run(args: Args) -> Result<bool, String> {
    let mut config = match &args.config {
        Some(path) => SelfCheckConfig::from_json_file(path).map_err(|e| e.to_string())?,
        None => SelfCheckConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(rounds) = args.rounds {
        config.rounds = rounds;
    }
    config.validate().map_err(|e| e.to_string())?;

    let mut options = args
        .lag_ms
        .map_or_else(LoopbackRun::default, |ms| LoopbackRun::with_lag(Duration::from_millis(ms)));
    options.skip_verify = args.skip_verify;
    options.oracle_out = args.oracle_out;

    let report = run_loopback(&config, &options).map_err(|e| e.to_string())?;
    if let Some(path) = &args.output_json {
        report.write_json(path).map_err(|e| e.to_string())?;
    }
    let summary = &report.summary;
    println!(
        "scenarios={} provoked={} no_conflict={} failed={} reset_failures={} verified_records={}",
        summary.scenarios,
        summary.conflicts_provoked,
        summary.no_conflict,
        summary.failed,
        summary.reset_failures,
        summary.records_verified
    );
    for scenario in &report.scenarios {
        let errors = [("FAIL", &scenario.error), ("RESET FAIL", &scenario.reset_error)];
        for (label, error) in errors {
            if let Some(error) = error {
                eprintln!(
                    "{label} round={} {} {} rid={}: {}",
                    scenario.round, scenario.category, scenario.table, scenario.rid, error.message
                );
            }
        }
    }
    if let Some(error) = &report.verification_error {
        eprintln!("FAIL verification: {}", error.message);
    }
    Ok(report.passed())
}

fn main() -> ExitCode {
    xdcr_selfcheck::init_tracing("info");
    let args = match Args::parse() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ERROR xdcr_selfcheck: {error}");
            return ExitCode::from(2);
        }
    };
    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("ERROR xdcr_selfcheck overall_pass=false");
            ExitCode::from(1)
        }
        Err(error) => {
            eprintln!("ERROR xdcr_selfcheck failed: {error}");
            ExitCode::from(2)
        }
    }
}
