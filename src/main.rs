use clap::{Arg, Command};
use log::LevelFilter;
use mail_courier::config::Config;
use mail_courier::message::OutboundMessage;
use mail_courier::suppression::{MemorySuppressionStore, TransportCallback};
use mail_courier::transport::Transport;
use mail_courier::webhook;
use std::process;

#[tokio::main]
async fn main() {
    let matches = Command::new("mail-courier")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Outbound email delivery via provider APIs with bounce/unsubscribe callback handling")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("/etc/mail-courier.yaml"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Test configuration validity")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("send")
                .long("send")
                .value_name("FILE")
                .help("Send a message (JSON file) via the configured provider")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("webhook")
                .long("webhook")
                .value_name("FILE")
                .help("Classify a captured webhook payload and print suppression records")
                .action(clap::ArgAction::Set),
        )
        .arg(
            Arg::new("webhook-format")
                .long("webhook-format")
                .value_name("FORMAT")
                .help("Webhook payload format: sparkpost or mandrill")
                .default_value("sparkpost"),
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

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        match Config::default().to_file(generate_path) {
            Ok(()) => {
                println!("Generated configuration file: {generate_path}");
                println!("Edit it to set your provider and API key.");
            }
            Err(e) => {
                eprintln!("Failed to generate configuration: {e}");
                process::exit(1);
            }
        }
        return;
    }

    // Webhook classification is offline and needs no provider credentials
    if let Some(webhook_path) = matches.get_one::<String>("webhook") {
        let format = matches.get_one::<String>("webhook-format").unwrap();
        if let Err(e) = process_webhook(webhook_path, format) {
            eprintln!("Failed to process webhook payload: {e}");
            process::exit(1);
        }
        return;
    }

    let config_path = matches.get_one::<String>("config").unwrap();
    let config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {config_path}: {e}");
            eprintln!("Use --generate-config to create a default configuration file.");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        match config.validate() {
            Ok(()) => {
                println!("Configuration is valid");
                println!("  Provider: {}", config.provider);
                println!("  Max attempts: {}", config.max_attempts);
            }
            Err(e) => {
                eprintln!("Configuration is invalid: {e}");
                process::exit(1);
            }
        }
        return;
    }

    if let Some(message_path) = matches.get_one::<String>("send") {
        if let Err(e) = config.validate() {
            eprintln!("Configuration is invalid: {e}");
            process::exit(1);
        }
        if let Err(e) = send_message(config, message_path).await {
            eprintln!("Send failed: {e}");
            process::exit(1);
        }
        return;
    }

    eprintln!("Nothing to do. Use --send, --webhook, --test-config or --generate-config.");
    process::exit(2);
}

fn process_webhook(path: &str, format: &str) -> anyhow::Result<()> {
    let body = std::fs::read_to_string(path)?;

    let items = match format {
        "mandrill" => webhook::parse_mandrill(&body),
        "sparkpost" => webhook::parse_sparkpost(&body),
        other => anyhow::bail!("unknown webhook format: {other}"),
    };
    log::info!("classified {} actionable event(s)", items.len());

    let mut callback = TransportCallback::new(MemorySuppressionStore::new());
    for event in &items {
        callback.apply(event);
    }

    let records = callback.into_store().into_records();
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn send_message(config: Config, path: &str) -> anyhow::Result<()> {
    let message = OutboundMessage::from_file(path)?;
    log::info!(
        "sending \"{}\" to {} recipient(s) via {}",
        message.subject,
        message.recipient_count(),
        config.provider
    );

    let transport = Transport::new(config);
    let mut callback = TransportCallback::new(MemorySuppressionStore::new());
    let accepted = transport.send(&message, &mut callback).await?;

    println!("Accepted recipients: {accepted}");

    let records = callback.into_store().into_records();
    if !records.is_empty() {
        println!("Suppression feedback:");
        println!("{}", serde_json::to_string_pretty(&records)?);
    }

    Ok(())
}
