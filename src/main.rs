use clap::{Arg, Command};
use log::LevelFilter;
use mailgauge::config::{Config, TargetMode};
use mailgauge::report::{self, GlobalSummary, RunReport};
use mailgauge::webhook::WebhookServer;
use mailgauge::{dispatch, emails};
use std::collections::BTreeMap;
use std::process;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    let matches = Command::new("mailgauge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Accuracy and latency benchmarks for email-validation APIs")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("mailgauge.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Write a sample configuration file and exit")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("valid-emails")
                .long("valid-emails")
                .value_name("FILE")
                .help("File with known-valid emails, one per line")
                .default_value("valid_emails.txt"),
        )
        .arg(
            Arg::new("invalid-emails")
                .long("invalid-emails")
                .value_name("FILE")
                .help("File with known-invalid emails, one per line")
                .default_value("invalid_emails.txt"),
        )
        .arg(
            Arg::new("rps")
                .long("rps")
                .value_name("N")
                .help("Override requests per second from the config")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Results file path")
                .default_value("results.json"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if let Some(path) = matches.get_one::<String>("generate-config") {
        generate_default_config(path);
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        test_config(&config);
        return;
    }

    let rps = matches
        .get_one::<u32>("rps")
        .copied()
        .unwrap_or(config.requests_per_second);

    let valid_path = matches.get_one::<String>("valid-emails").unwrap();
    let invalid_path = matches.get_one::<String>("invalid-emails").unwrap();
    let items = emails::load_email_set(valid_path, invalid_path);
    if items.is_empty() {
        eprintln!("No emails to process. Aborting.");
        process::exit(1);
    }
    let total_valid = items.iter().filter(|item| item.known_valid).count();
    let total_invalid = items.len() - total_valid;
    log::info!(
        "processing {} emails ({total_valid} known valid, {total_invalid} known invalid)",
        items.len()
    );

    // One shared callback listener for the whole run, started only when a
    // target actually needs it.
    let needs_webhook = config
        .targets
        .iter()
        .any(|target| target.mode == TargetMode::Webhook);
    let mut webhook_server = if needs_webhook {
        match WebhookServer::start(
            &config.listener.host,
            config.listener.port,
            config.listener.base_url.clone(),
        )
        .await
        {
            Ok(server) => Some(server),
            Err(e) => {
                eprintln!("Error starting webhook server: {e:#}");
                process::exit(1);
            }
        }
    } else {
        None
    };

    let client = match reqwest::Client::builder()
        .user_agent(concat!("mailgauge/", env!("CARGO_PKG_VERSION")))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error building HTTP client: {e}");
            process::exit(1);
        }
    };

    let mut individual_api_results = BTreeMap::new();
    for target in &config.targets {
        if let Err(e) = target.validate() {
            log::error!("skipping target '{}': {e:#}", target.name);
            continue;
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<dispatch::ProgressEvent>();
        let target_name = target.name.clone();
        let progress_task = tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                log::info!(
                    "[{target_name}] progress: {}/{}",
                    event.completed,
                    event.total
                );
            }
        });

        match dispatch::run_target(
            &client,
            target,
            &items,
            rps,
            webhook_server.as_ref(),
            Some(progress_tx),
        )
        .await
        {
            Ok(results) => {
                let stats = report::calculate_statistics(
                    results,
                    total_valid,
                    total_invalid,
                    rps,
                    &target.endpoint,
                );
                log::info!(
                    "{}: FP={:.1}%, FN={:.1}%, avg={:.3}s",
                    target.name,
                    stats.accuracy.false_positive_rate_percent,
                    stats.accuracy.false_negative_rate_percent,
                    stats.performance.average_response_time
                );
                individual_api_results.insert(target.name.clone(), stats);
            }
            Err(e) => log::error!("target '{}' aborted: {e:#}", target.name),
        }
        let _ = progress_task.await;
    }

    if let Some(server) = webhook_server.as_mut() {
        server.stop().await;
    }

    let run_report = RunReport {
        global_summary: GlobalSummary {
            total_apis_tested: config.targets.len(),
            total_emails_per_api: items.len(),
        },
        individual_api_results,
    };
    let output_path = matches.get_one::<String>("output").unwrap();
    if let Err(e) = report::save_report(&run_report, output_path) {
        eprintln!("Error saving results: {e:#}");
        process::exit(1);
    }
}

fn generate_default_config(path: &str) {
    let config = Config::default();
    match config.to_file(path) {
        Ok(()) => println!("Sample configuration written to {path}"),
        Err(e) => {
            eprintln!("Error writing configuration: {e:#}");
            process::exit(1);
        }
    }
}

fn test_config(config: &Config) {
    println!("Testing configuration...");
    let mut failures = 0usize;
    for target in &config.targets {
        match target.validate() {
            Ok(()) => println!(
                "  ok: '{}' ({} mode, {} rules)",
                target.name,
                target.mode,
                target.validation_rules.len()
            ),
            Err(e) => {
                failures += 1;
                println!("  error: '{}': {e:#}", target.name);
            }
        }
    }
    if failures > 0 {
        println!("{failures} target(s) failed validation");
        process::exit(1);
    }
    println!("Configuration valid: {} target(s)", config.targets.len());
}
