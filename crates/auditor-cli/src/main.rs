use anyhow::Context;
use auditor_cli::simulator::{run_simulator, SimulatorConfig};
use auditor_cli::tracker::{run_tracking, TrackConfig};
use auditor_core::{AuditConfig, PoolConfig};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("auditor")
        .version(auditor_core::VERSION)
        .about("Site audit scan engine harness")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("simulate")
                .about("Run a seeded scan with synthetic tasks")
                .arg(
                    Arg::new("tasks")
                        .long("tasks")
                        .default_value("5")
                        .value_parser(value_parser!(usize))
                        .help("Number of synthetic tasks"),
                )
                .arg(
                    Arg::new("failure-rate")
                        .long("failure-rate")
                        .default_value("0.3")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a task attempt fails"),
                )
                .arg(
                    Arg::new("hang-rate")
                        .long("hang-rate")
                        .default_value("0.0")
                        .value_parser(value_parser!(f64))
                        .help("Probability that a task attempt never resolves"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("retry-rounds")
                        .long("retry-rounds")
                        .default_value("2")
                        .value_parser(value_parser!(u32))
                        .help("Retry rounds after the initial run"),
                )
                .arg(
                    Arg::new("timeout-ms")
                        .long("timeout-ms")
                        .default_value("200")
                        .value_parser(value_parser!(u64))
                        .help("Deadline for every synthetic task"),
                )
                .arg(
                    Arg::new("target")
                        .long("target")
                        .default_value("https://example.com")
                        .help("Target recorded on the scan"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("track")
                .about("Run seeded position tracking passes")
                .arg(
                    Arg::new("items")
                        .long("items")
                        .default_value("10")
                        .value_parser(value_parser!(usize))
                        .help("Number of tracked items"),
                )
                .arg(
                    Arg::new("passes")
                        .long("passes")
                        .default_value("2")
                        .value_parser(value_parser!(u32))
                        .help("Tracking passes to run"),
                )
                .arg(
                    Arg::new("concurrency")
                        .long("concurrency")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Requested worker count"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("base-delay-ms")
                        .long("base-delay-ms")
                        .value_parser(value_parser!(u64))
                        .help("Pause between items; defaults to the configured pool"),
                )
                .arg(
                    Arg::new("jitter-ms")
                        .long("jitter-ms")
                        .value_parser(value_parser!(u64))
                        .help("Random extra pause; defaults to the configured pool"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                ),
        )
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<AuditConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => AuditConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(AuditConfig::default()),
    }
}

async fn simulate(args: &ArgMatches, audit: &AuditConfig) -> anyhow::Result<bool> {
    let config = SimulatorConfig {
        seed: *args.get_one::<u64>("seed").context("missing --seed")?,
        target: args
            .get_one::<String>("target")
            .cloned()
            .context("missing --target")?,
        tasks: *args.get_one::<usize>("tasks").context("missing --tasks")?,
        failure_rate: *args.get_one::<f64>("failure-rate").context("missing --failure-rate")?,
        hang_rate: *args.get_one::<f64>("hang-rate").context("missing --hang-rate")?,
        retry_rounds: *args.get_one::<u32>("retry-rounds").context("missing --retry-rounds")?,
        timeout_ms: *args.get_one::<u64>("timeout-ms").context("missing --timeout-ms")?,
        ..SimulatorConfig::default()
    };

    let report = run_simulator(config, audit).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

async fn track(args: &ArgMatches, audit: &AuditConfig) -> anyhow::Result<()> {
    let base_delay = args.get_one::<u64>("base-delay-ms").copied();
    let jitter = args.get_one::<u64>("jitter-ms").copied();
    let pool = (base_delay.is_some() || jitter.is_some()).then(|| PoolConfig {
        base_delay_ms: base_delay.unwrap_or(audit.pool.base_delay_ms),
        jitter_ms: jitter.unwrap_or(audit.pool.jitter_ms),
        ..audit.pool
    });

    let config = TrackConfig {
        seed: *args.get_one::<u64>("seed").context("missing --seed")?,
        items: *args.get_one::<usize>("items").context("missing --items")?,
        passes: *args.get_one::<u32>("passes").context("missing --passes")?,
        concurrency: *args.get_one::<usize>("concurrency").context("missing --concurrency")?,
        pool,
    };

    let report = run_tracking(&config, audit).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    // Global flags land in the deepest matched subcommand
    let scoped = matches.subcommand().map_or(&matches, |(_, args)| args);
    init_logging(scoped.get_flag("json-logs"));
    let audit = load_config(scoped)?;

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let passed = simulate(args, &audit).await?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Some(("track", args)) => track(args, &audit).await,
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn track_pool_overrides_are_optional() {
        let matches = cli()
            .try_get_matches_from(["auditor", "track", "--items", "3"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert!(args.get_one::<u64>("base-delay-ms").is_none());
        assert_eq!(*args.get_one::<usize>("items").unwrap(), 3);
    }

    #[test]
    fn global_config_flag_after_subcommand() {
        let matches = cli()
            .try_get_matches_from(["auditor", "simulate", "--config", "audit.toml"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(
            args.get_one::<PathBuf>("config"),
            Some(&PathBuf::from("audit.toml"))
        );
        assert!(!args.get_flag("json-logs"));
    }
}
