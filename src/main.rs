//! tlsaudit command line entry point

use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};

use tlsaudit::config::{ConfigError, RunConfig};
use tlsaudit::report::{self, ScenarioReport};
use tlsaudit::scenario::{self, run_scenario, Scenario};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Audit how TLS clients treat untrusted servers",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Address to listen on
    #[arg(short = 'l', long, default_value = "127.0.0.1")]
    listen_address: IpAddr,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = 8443, allow_negative_numbers = true)]
    listen_port: i64,

    /// Common name for synthesized certificates
    #[arg(long)]
    user_cn: Option<String>,

    /// Server (host[:port]) whose certificate chain supplies the common name
    #[arg(long)]
    server: Option<String>,

    /// PEM certificate chain to present
    #[arg(long)]
    user_cert: Option<PathBuf>,

    /// Private key for --user-cert
    #[arg(long)]
    user_key: Option<PathBuf>,

    /// PEM CA certificate used to sign test certificates
    #[arg(long)]
    user_ca_cert: Option<PathBuf>,

    /// Private key for --user-ca-cert
    #[arg(long)]
    user_ca_key: Option<PathBuf>,

    /// Relay intercepted traffic to this address (host:port)
    #[arg(short = 'f', long)]
    forward: Option<String>,

    /// Plaintext protocol to speak before TLS (smtp, ftp)
    #[arg(long)]
    starttls: Option<String>,

    /// How long to wait for application data, in milliseconds
    #[arg(short = 'w', long, default_value_t = 5000, allow_negative_numbers = true)]
    wait_data_timeout: i64,

    /// Comma-separated scenario ids to run (default: all)
    #[arg(short = 's', long, value_delimiter = ',')]
    selected_tests: Vec<u32>,

    /// Repeat the selected scenarios until interrupted
    #[arg(long)]
    loop_tests: bool,

    /// Write a JSON report to this file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// List scenarios and exit
    #[arg(long)]
    list: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if cli.list {
        for scenario in scenario::catalog() {
            println!("{:>3}  {:<45} {}", scenario.id(), scenario.name(), scenario.description());
        }
        return ExitCode::SUCCESS;
    }

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid settings: {}", e);
            return ExitCode::from(2);
        }
    };

    let scenarios = selected_scenarios(&config);
    if scenarios.is_empty() {
        error!("No scenario matches {:?}", config.selected_tests());
        return ExitCode::from(2);
    }

    let mut found = false;
    loop {
        let reports = run_pass(&scenarios, &config);
        found |= reports.iter().any(|r| r.code.is_finding());

        if !config.loop_tests() {
            break;
        }
    }

    if found {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn build_config(cli: &Cli) -> Result<RunConfig, ConfigError> {
    let mut config = RunConfig::new();

    config.set_listen_address(cli.listen_address);
    config.set_listen_port(cli.listen_port)?;
    config.set_wait_data_timeout(cli.wait_data_timeout)?;

    if let Some(cn) = &cli.user_cn {
        config.set_user_cn(cn.as_str());
    }
    if let Some(server) = &cli.server {
        config.set_server_addr(server)?;
    }
    if let Some(path) = &cli.user_cert {
        config.set_user_cert_path(path)?;
    }
    if let Some(path) = &cli.user_key {
        config.set_user_key_path(path)?;
    }
    if let Some(path) = &cli.user_ca_cert {
        config.set_user_ca_cert_path(path)?;
    }
    if let Some(path) = &cli.user_ca_key {
        config.set_user_ca_key_path(path)?;
    }
    if let Some(forward) = &cli.forward {
        config.set_forward_addr(forward)?;
    }
    if let Some(proto) = &cli.starttls {
        config.set_starttls(proto)?;
    }
    if let Some(path) = &cli.output {
        config.set_output_report(path)?;
    }

    config.set_selected_tests(cli.selected_tests.clone());
    config.set_loop_tests(cli.loop_tests);

    Ok(config)
}

fn selected_scenarios(config: &RunConfig) -> Vec<Box<dyn Scenario>> {
    let selected = config.selected_tests();
    let scenarios: Vec<Box<dyn Scenario>> = scenario::catalog()
        .into_iter()
        .filter(|s| selected.is_empty() || selected.contains(&s.id()))
        .collect();

    for id in selected {
        if !scenarios.iter().any(|s| s.id() == *id) {
            warn!("Unknown test id {} ignored", id);
        }
    }
    scenarios
}

/// Run every scenario once and write this pass's reports, replacing the
/// previous pass's file
fn run_pass(scenarios: &[Box<dyn Scenario>], config: &RunConfig) -> Vec<ScenarioReport> {
    let mut reports = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        info!(
            "Running test #{} ({}), listening on {}",
            scenario.id(),
            scenario.name(),
            config.endpoint().listen_socket_addr()
        );
        let report = run_scenario(scenario.as_ref(), config);
        print_report(&report);
        reports.push(report);
    }

    if let Some(path) = config.output_report() {
        if let Err(e) = report::write_json(path, &reports) {
            error!("{}", e);
        }
    }
    reports
}

fn print_report(report: &ScenarioReport) {
    if report.code.is_finding() {
        error!(
            "Test #{} failed: {} ({})",
            report.id, report.code, report.summary
        );
    } else {
        info!(
            "Test #{} result: {} ({})",
            report.id, report.code, report.summary
        );
    }
}
