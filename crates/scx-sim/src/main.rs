use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, Command};
use scx_core::{WorkbenchConfig, DEFAULT_SAFETY_TIMEOUT_SECS};
use scx_sim::{run_simulator, SimulatorConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,scx_core=warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Command::new("scx-sim")
        .version(scx_core::VERSION)
        .about("Scenario-scoped execution cache simulator")
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs and reports as JSON"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a seeded session and check invariants")
                .arg(
                    Arg::new("operations")
                        .long("ops")
                        .default_value("10000")
                        .value_parser(value_parser!(u64))
                        .help("Number of operations to simulate"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("scenarios")
                        .long("scenarios")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of scenarios to switch between"),
                )
                .arg(
                    Arg::new("stop-on-violation")
                        .long("stop-on-violation")
                        .action(ArgAction::SetTrue)
                        .help("Stop simulation on first violation"),
                ),
        )
        .subcommand(
            Command::new("report")
                .about("Print the default configuration")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .help("TOML configuration to load instead of the defaults"),
                ),
        );

    let matches = cli.get_matches();
    let json = matches.get_flag("json");
    init_tracing(json);

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let config = SimulatorConfig {
                seed: *args.get_one::<u64>("seed").context("missing --seed")?,
                total_operations: *args.get_one::<u64>("operations").context("missing --ops")?,
                scenarios: *args
                    .get_one::<usize>("scenarios")
                    .context("missing --scenarios")?,
                stop_on_first_violation: args.get_flag("stop-on-violation"),
                ..SimulatorConfig::default()
            };
            tracing::info!(
                seed = config.seed,
                operations = config.total_operations,
                scenarios = config.scenarios,
                "running simulator"
            );

            let report = run_simulator(config).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.generate_text());
            }

            std::process::exit(if report.passed() { 0 } else { 1 });
        }
        Some(("report", args)) => {
            let config = match args.get_one::<String>("config") {
                Some(path) => WorkbenchConfig::load(path)
                    .with_context(|| format!("loading {path}"))?,
                None => WorkbenchConfig::default(),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("SCX Configuration");
                println!("=================");
                println!();
                println!("Version: {}", scx_core::VERSION);
                println!(
                    "Safety timeout: {}s (default {}s)",
                    config.execution.safety_timeout_secs, DEFAULT_SAFETY_TIMEOUT_SECS
                );
                match config.file_cache.max_scenarios {
                    Some(max) => println!("File cache: up to {max} scenarios"),
                    None => println!("File cache: unbounded"),
                }
                match &config.selection.store_path {
                    Some(path) => println!("Selection store: {}", path.display()),
                    None => println!("Selection store: in-memory"),
                }
            }
        }
        _ => {
            tracing::warn!("no subcommand given; try `scx-sim simulate`");
        }
    }

    Ok(())
}
