//! basin-sim entry point: CLI wiring and scenario construction.

use std::path::{Path, PathBuf};
use std::process;

use log::{LevelFilter, error, info};

use basin_sim::config::ScenarioConfig;
use basin_sim::error::SimResult;
use basin_sim::io::export::export_results;
use basin_sim::io::tables::load_inputs;
use basin_sim::scenario::{self, Scenario};
use basin_sim::sim::engine::Engine;

/// Parsed CLI arguments.
struct CliArgs {
    scenario_path: Option<String>,
    preset: Option<String>,
    input_dir: Option<String>,
    results_dir: Option<String>,
    until: Option<f64>,
    #[cfg(feature = "api")]
    serve: bool,
    #[cfg(feature = "api")]
    port: u16,
}

fn print_help() {
    eprintln!("basin-sim: lumped-basin water balance simulator");
    eprintln!();
    eprintln!("Usage: basin-sim [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>        Load run configuration from a TOML file");
    eprintln!(
        "  --preset <name>          Use a built-in scenario ({})",
        scenario::PRESETS.join(", ")
    );
    eprintln!("  --input-dir <path>       Override the directory holding the input tables");
    eprintln!("  --results-dir <path>     Override the directory receiving result CSVs");
    eprintln!("  --until <seconds>        Stop at this time instead of the end time");
    #[cfg(feature = "api")]
    {
        eprintln!("  --serve                  Start REST API server after simulation");
        eprintln!("  --port <u16>             API server port (default: 3000)");
    }
    eprintln!("  --help                   Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the single_basin preset is used.");
    eprintln!("Set RUST_LOG=debug for per-update logging.");
}

fn next_value(args: &[String], i: &mut usize, flag: &str, what: &str) -> String {
    *i += 1;
    if *i >= args.len() {
        eprintln!("error: {flag} requires a {what} argument");
        process::exit(1);
    }
    args[*i].clone()
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        scenario_path: None,
        preset: None,
        input_dir: None,
        results_dir: None,
        until: None,
        #[cfg(feature = "api")]
        serve: false,
        #[cfg(feature = "api")]
        port: 3000,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            "--scenario" => {
                cli.scenario_path = Some(next_value(&args, &mut i, "--scenario", "path"));
            }
            "--preset" => cli.preset = Some(next_value(&args, &mut i, "--preset", "name")),
            "--input-dir" => {
                cli.input_dir = Some(next_value(&args, &mut i, "--input-dir", "path"));
            }
            "--results-dir" => {
                cli.results_dir = Some(next_value(&args, &mut i, "--results-dir", "path"));
            }
            "--until" => {
                let raw = next_value(&args, &mut i, "--until", "seconds");
                if let Ok(t) = raw.parse::<f64>() {
                    cli.until = Some(t);
                } else {
                    eprintln!("error: --until value \"{raw}\" is not a number of seconds");
                    process::exit(1);
                }
            }
            #[cfg(feature = "api")]
            "--serve" => {
                cli.serve = true;
            }
            #[cfg(feature = "api")]
            "--port" => {
                let raw = next_value(&args, &mut i, "--port", "u16");
                if let Ok(p) = raw.parse::<u16>() {
                    cli.port = p;
                } else {
                    eprintln!("error: --port value \"{raw}\" is not a valid u16");
                    process::exit(1);
                }
            }
            other => {
                eprintln!("error: unknown argument \"{other}\"");
                print_help();
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// Builds the scenario: `--scenario` takes priority, then `--preset`, then
/// the single_basin preset.
fn load_scenario(cli: &CliArgs) -> SimResult<Scenario> {
    let mut scenario = if let Some(ref path) = cli.scenario_path {
        let mut config = ScenarioConfig::from_toml_file(Path::new(path))?;
        if let Some(ref dir) = cli.input_dir {
            config.input_dir = PathBuf::from(dir);
        }
        let inputs = load_inputs(&config.input_dir)?;
        Scenario { config, inputs }
    } else {
        let name = cli.preset.as_deref().unwrap_or("single_basin");
        let mut scenario = scenario::preset(name)?;
        if let Some(ref dir) = cli.input_dir {
            scenario.config.input_dir = PathBuf::from(dir);
            scenario.inputs = load_inputs(&scenario.config.input_dir)?;
        }
        scenario
    };

    if let Some(ref dir) = cli.results_dir {
        scenario.config.results_dir = PathBuf::from(dir);
    }
    Ok(scenario)
}

fn run(cli: &CliArgs) -> SimResult<Engine> {
    let scenario = load_scenario(cli)?;
    let results_dir = scenario.config.results_dir.clone();

    let mut engine = Engine::new();
    engine.initialize(scenario.config, scenario.inputs)?;
    match cli.until {
        Some(t) => engine.update_until(t)?,
        None => engine.run_to_completion()?,
    }

    for record in engine.records()? {
        println!("{record}");
    }
    println!("\n{}", engine.report()?);

    let written = export_results(&engine, &results_dir)?;
    for path in &written {
        info!("wrote {}", path.display());
    }
    Ok(engine)
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = parse_args();

    #[cfg_attr(not(feature = "api"), expect(unused_variables))]
    let engine = match run(&cli) {
        Ok(engine) => engine,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    // Start API server if requested
    #[cfg(feature = "api")]
    if cli.serve {
        use std::net::SocketAddr;
        use std::sync::Arc;

        let state = match basin_sim::api::AppState::from_engine(&engine) {
            Ok(state) => Arc::new(state),
            Err(e) => {
                error!("{e}");
                process::exit(1);
            }
        };
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
        let rt = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
            error!("failed to create tokio runtime: {e}");
            process::exit(1);
        });
        rt.block_on(basin_sim::api::serve(state, addr));
    }
}
