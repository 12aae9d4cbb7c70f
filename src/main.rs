//! cgmon CLI Entry Point
//!
//! Provides the command-line interface for monitoring and analysis.
//!
//! # Usage
//!
//! ```bash
//! # Sample 13 open5gs processes every 100ms for 6 minutes
//! sudo cgmon monitor open5gs- --count 13 --interval 100 --duration 360
//!
//! # Summarise recorded series
//! cgmon series server_metrics/usage.csv
//!
//! # Summarise TLS timing logs as JSON
//! cgmon logs install/var/log/open5gs --json
//! ```

use std::env;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info, warn};

use cgmon::analysis::{LogReport, MetricExtractor, SeriesReport};
use cgmon::monitoring::interrupt::try_install_interrupt_handler;
use cgmon::monitoring::ownership::is_privileged;
use cgmon::monitoring::{read_series, MonitorReport, MonitorSession, StopFlag, StopReason};
use cgmon::{load_config, AnalysisError, AppConfig, MonitorError, APP_NAME, VERSION};

/// Default directory scanned by the `logs` command.
const DEFAULT_LOG_DIR: &str = "install/var/log/open5gs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Monitor,
    Series,
    Logs,
}

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    command: Option<Command>,
    config_path: Option<PathBuf>,
    verbose: bool,
    json: bool,
    // monitor
    selector: Option<String>,
    expected_count: Option<usize>,
    interval_ms: Option<u64>,
    duration_secs: Option<u64>,
    start_timeout_secs: Option<u64>,
    output: Option<PathBuf>,
    group_name: Option<String>,
    cgroup_root: Option<PathBuf>,
    wait_for_nonzero: bool,
    no_progress: bool,
    no_summary: bool,
    keep_owner: bool,
    // analysis
    bootstrap_resamples: Option<usize>,
    bootstrap_seed: Option<u64>,
    files: Vec<PathBuf>,
    log_dir: Option<PathBuf>,
}

impl Config {
    /// Applies command-line values on top of the file configuration.
    fn apply_to(&self, app: &mut AppConfig) {
        let monitor = &mut app.monitor;
        if let Some(selector) = &self.selector {
            monitor.selector = selector.clone();
        }
        if let Some(count) = self.expected_count {
            monitor.expected_count = count;
        }
        if let Some(ms) = self.interval_ms {
            monitor.interval_ms = ms;
        }
        if let Some(secs) = self.duration_secs {
            monitor.duration_secs = secs;
        }
        if let Some(secs) = self.start_timeout_secs {
            monitor.start_timeout_secs = secs;
        }
        if let Some(output) = &self.output {
            monitor.output = output.clone();
        }
        if let Some(name) = &self.group_name {
            monitor.group_name = name.clone();
        }
        if let Some(root) = &self.cgroup_root {
            monitor.cgroup_root = root.clone();
        }
        if self.wait_for_nonzero {
            monitor.wait_for_nonzero = true;
        }
        if self.no_progress {
            monitor.progress = false;
        }
        if self.no_summary {
            monitor.summarize = false;
        }
        if self.keep_owner {
            monitor.restore_ownership = false;
        }

        if let Some(n) = self.bootstrap_resamples {
            app.analysis.bootstrap_resamples = n;
        }
        if let Some(seed) = self.bootstrap_seed {
            app.analysis.bootstrap_seed = seed;
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Cgroup Resource Telemetry");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: cgmon [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("Commands:");
    println!("  monitor <SELECTOR>  Sample CPU and memory of matching processes (root)");
    println!("  series <FILE>...    Summarise recorded series files");
    println!("  logs [LOG_DIR]      Summarise timing logs (default: {})", DEFAULT_LOG_DIR);
    println!();
    println!("Options:");
    println!("  --config PATH       Load settings from a YAML file");
    println!("  --verbose           Enable debug logging");
    println!("  --json              Print reports as JSON (series, logs)");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Monitor options:");
    println!("  --count N           Expected number of processes (default: 1)");
    println!("  --interval MS       Sampling interval in milliseconds (default: 1000)");
    println!("  --duration SECS     Run length, 0 until interrupted (default: 0)");
    println!("  --timeout SECS      Wait for the workload to start (default: 20)");
    println!("  --output PATH       Series file (default: server_metrics/usage.csv)");
    println!("  --group NAME        Accounting group name (default: cgmon_monitor)");
    println!("  --cgroup-root PATH  cgroup v2 mount point (default: /sys/fs/cgroup)");
    println!("  --wait-nonzero      Start sampling once the counters are non-zero");
    println!("  --no-progress       Do not print the live progress line");
    println!("  --no-summary        Do not summarise the series after the run");
    println!("  --keep-owner        Leave output files owned by root");
    println!();
    println!("Analysis options:");
    println!("  --boot N            Bootstrap resamples (default: 5000)");
    println!("  --seed N            Bootstrap seed (default: 123)");
    println!();
    println!("Examples:");
    println!("  sudo cgmon monitor open5gs- --count 13 --interval 100 --duration 360");
    println!("  cgmon series server_metrics/usage.csv");
    println!("  cgmon logs install/var/log/open5gs --json");
}

/// Returns the value following option `args[*i]`, advancing `i`.
fn option_value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", name))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", name, value))
}

fn parse_command(name: &str) -> Result<Command, String> {
    match name {
        "monitor" => Ok(Command::Monitor),
        "series" => Ok(Command::Series),
        "logs" => Ok(Command::Logs),
        other => Err(format!("Unknown command: {}", other)),
    }
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = args[i].as_str();

        match arg {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => config.verbose = true,
            "--json" => config.json = true,
            "--config" => {
                config.config_path = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--count" => {
                config.expected_count = Some(parse_number(option_value(args, &mut i, arg)?, arg)?);
            }
            "--interval" => {
                config.interval_ms = Some(parse_number(option_value(args, &mut i, arg)?, arg)?);
            }
            "--duration" => {
                config.duration_secs = Some(parse_number(option_value(args, &mut i, arg)?, arg)?);
            }
            "--timeout" => {
                config.start_timeout_secs =
                    Some(parse_number(option_value(args, &mut i, arg)?, arg)?);
            }
            "--output" => {
                config.output = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--group" => {
                config.group_name = Some(option_value(args, &mut i, arg)?.to_string());
            }
            "--cgroup-root" => {
                config.cgroup_root = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--wait-nonzero" => config.wait_for_nonzero = true,
            "--no-progress" => config.no_progress = true,
            "--no-summary" => config.no_summary = true,
            "--keep-owner" => config.keep_owner = true,
            "--boot" => {
                config.bootstrap_resamples =
                    Some(parse_number(option_value(args, &mut i, arg)?, arg)?);
            }
            "--seed" => {
                config.bootstrap_seed = Some(parse_number(option_value(args, &mut i, arg)?, arg)?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => match config.command {
                None => config.command = Some(parse_command(arg)?),
                Some(Command::Monitor) if config.selector.is_none() => {
                    config.selector = Some(arg.to_string());
                }
                Some(Command::Series) => config.files.push(PathBuf::from(arg)),
                Some(Command::Logs) if config.log_dir.is_none() => {
                    config.log_dir = Some(PathBuf::from(arg));
                }
                Some(_) => return Err(format!("Unexpected argument: {}", arg)),
            },
        }
        i += 1;
    }

    match config.command {
        None => Err("No command given".to_string()),
        Some(Command::Series) if config.files.is_empty() => {
            Err("series requires at least one file".to_string())
        }
        _ => Ok(config),
    }
}

/// Loads the file configuration, if any, and applies overrides.
fn resolve_app_config(config: &Config) -> Result<AppConfig, Box<dyn Error>> {
    let mut app = match &config.config_path {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    config.apply_to(&mut app);
    Ok(app)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Runs one monitoring session.
fn run_monitor(app: AppConfig) -> Result<(), Box<dyn Error>> {
    app.validate()?;

    if !is_privileged() {
        return Err("monitor must run as root to create accounting groups (try sudo)".into());
    }

    let stop = StopFlag::new();
    try_install_interrupt_handler(stop.clone());

    let summarize = app.monitor.summarize;
    let mut session = MonitorSession::from_config(app.monitor);
    let Some(report) = session_outcome(session.run(&stop))? else {
        return Ok(());
    };

    if report.is_degraded() {
        warn!(
            "Run covered {} of {} expected processes",
            report.processes_admitted, report.processes_expected
        );
    }
    if report.run.reason == StopReason::Interrupted {
        info!("Run interrupted; {} samples kept", report.run.samples);
    }

    if summarize {
        let samples = read_series(&report.output)?;
        let label = file_label(&report.output);
        match SeriesReport::from_samples(&label, &samples, num_cpus::get(), &app.analysis) {
            Some(series) => {
                for line in series.render().lines().filter(|l| !l.is_empty()) {
                    info!("{}", line);
                }
            }
            None => info!("{}: no samples recorded", label),
        }
    }

    Ok(())
}

/// An interrupt before sampling started is a clean exit without a report.
fn session_outcome(
    result: Result<MonitorReport, MonitorError>,
) -> Result<Option<MonitorReport>, MonitorError> {
    match result {
        Ok(report) => Ok(Some(report)),
        Err(MonitorError::Interrupted { stage }) => {
            info!("Interrupted while {}; nothing recorded", stage);
            Ok(None)
        }
        Err(e) => {
            error!("Monitoring failed: {}", e);
            Err(e)
        }
    }
}

/// Summarises every readable series file; bad files are skipped.
fn run_series(app: &AppConfig, files: &[PathBuf], json: bool) -> Result<(), Box<dyn Error>> {
    let cpus = num_cpus::get();
    let mut reports = Vec::with_capacity(files.len());

    for path in files {
        let label = file_label(path);
        if !path.exists() {
            warn!("File not found: {}", path.display());
            continue;
        }
        let samples = match read_series(path) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Skipping {}: {}", label, e);
                continue;
            }
        };
        match SeriesReport::from_samples(&label, &samples, cpus, &app.analysis) {
            Some(report) => reports.push(report),
            None => warn!("{}: empty or no data file", label),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", report.render());
        }
    }
    Ok(())
}

/// Summarises the timing logs in `dir`.
fn run_logs(app: &AppConfig, dir: &Path, json: bool) -> Result<(), Box<dyn Error>> {
    let extractor = MetricExtractor::tls_timings()?;
    let extraction = extractor.extract_dir(dir)?;
    let report = LogReport::build(&extraction, &app.analysis);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render());
    }
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("{} {}", "Error:".red().bold(), e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    if !config.json {
        print_banner();
    }

    let app = resolve_app_config(&config)?;
    app.analysis.validate()?;

    match config.command {
        Some(Command::Monitor) => run_monitor(app),
        Some(Command::Series) => run_series(&app, &config.files, config.json),
        Some(Command::Logs) => {
            let dir = config
                .log_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR));
            run_logs(&app, &dir, config.json)
        }
        None => Err("No command given".into()),
    }
}

/// Maps a failure to the process exit status.
fn exit_code(err: &(dyn Error + 'static)) -> u8 {
    match err.downcast_ref::<AnalysisError>() {
        Some(AnalysisError::NotADirectory(_)) => 2,
        Some(AnalysisError::NoLogFiles(_)) => 3,
        _ => 1,
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::from(exit_code(e.as_ref()))
        }
    }
}
