use std::sync::Arc;

use binkpd::config::{BinkConfig, DEFAULT_CONFIG_FILE};
use binkpd::contact::ContactLedger;
use binkpd::protocol::handshake::DEFAULT_NETWORK;
use binkpd::server;
use binkpd::session::SessionReport;
use binkpd::storage::LocalSpool;
use chrono::{Local, TimeZone};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "binkpd")]
#[command(about = "BinkP mail transport")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long, help = "Config file path")]
    config: Option<String>,

    #[arg(long, help = "Listen address (overrides config)")]
    listen: Option<String>,

    #[arg(long, help = "Output as JSON")]
    json: bool,

    #[arg(short, long, help = "Debug logging")]
    verbose: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Accept incoming sessions (the default)
    Answer,
    /// Dial a node and exchange mail
    Call {
        node: u16,
        #[arg(long, default_value = DEFAULT_NETWORK)]
        network: String,
    },
    /// Show which nodes are due for a callout
    Pending {
        #[arg(long, help = "Dial every node that is due")]
        dial: bool,
    },
    /// Show the contact ledger
    Contacts {
        #[arg(long, default_value = DEFAULT_NETWORK)]
        network: String,
    },
    GenerateConfig {
        #[arg(long, default_value = DEFAULT_CONFIG_FILE, help = "Config file path")]
        output: String,
    },
}

fn format_time(t: i64) -> String {
    if t == 0 {
        return "never".to_string();
    }
    match Local.timestamp_opt(t, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => t.to_string(),
    }
}

fn print_report(report: &SessionReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let status = if report.success { "✅" } else { "❌" };
    println!(
        "{} Node {} on {}: sent {} bytes, received {} bytes in {}s",
        status,
        report.remote_node.map(|n| n.to_string()).unwrap_or_else(|| "?".into()),
        report.network.as_deref().unwrap_or("?"),
        report.bytes_sent,
        report.bytes_received,
        report.elapsed_secs
    );
    for name in &report.files_received {
        println!("   received {}", name);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "binkpd=debug" } else { "binkpd=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Some(Commands::GenerateConfig { output }) = &cli.command {
        let config = BinkConfig::default();
        match config.save(output) {
            Ok(_) => {
                if cli.json {
                    println!("{}", serde_json::json!({
                        "success": true,
                        "config_file": output,
                    }));
                } else {
                    println!("⚙️  Generate Configuration");
                    println!("========================");
                    println!("✅ Default configuration saved to: {}", output);
                    println!("   Add callout entries for the nodes you exchange mail with");
                }
            }
            Err(e) => {
                if cli.json {
                    println!("{}", serde_json::json!({"error": e.to_string()}));
                } else {
                    println!("❌ Failed to create config file: {}", e);
                }
                return Err(e);
            }
        }
        return Ok(());
    }

    let mut config = BinkConfig::load_or_create(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen_address = listen;
    }
    if let Err(e) = config.ensure_directories() {
        if cli.json {
            println!("{}", serde_json::json!({"error": format!("Failed to create directories: {}", e)}));
        } else {
            eprintln!("❌ Failed to create directories: {}", e);
        }
        return Err(e);
    }

    let config = Arc::new(config);
    let storage = Arc::new(LocalSpool::from_config(&config));

    match cli.command {
        Some(Commands::Call { node, network }) => {
            let report = server::call_node(config, storage, &network, node).await?;
            print_report(&report, cli.json)?;
            if !report.success {
                anyhow::bail!("session with node {} failed", node);
            }
            Ok(())
        }
        Some(Commands::Pending { dial }) => {
            let pending = server::pending_callouts(&config, storage.as_ref(), &Local::now()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
            } else {
                println!("📞 Pending Callouts");
                println!("==================");
                for p in &pending {
                    println!(
                        "   {}@{}: {} ({} bytes waiting, last contact {})",
                        p.node,
                        p.network,
                        if p.should_call { "due" } else { "not due" },
                        p.contact.bytes_waiting,
                        format_time(p.contact.last_contact)
                    );
                }
            }
            if dial {
                for p in pending.iter().filter(|p| p.should_call) {
                    match server::call_node(config.clone(), storage.clone(), &p.network, p.node).await {
                        Ok(report) => print_report(&report, cli.json)?,
                        Err(e) => eprintln!("❌ Call to {}@{} failed: {}", p.node, p.network, e),
                    }
                }
            }
            Ok(())
        }
        Some(Commands::Contacts { network }) => {
            let net = config
                .network(&network)
                .ok_or_else(|| anyhow::anyhow!("network '{}' is not configured", network))?;
            let ledger = ContactLedger::load(net.contact_path())?;
            if cli.json {
                let records: std::collections::BTreeMap<_, _> = ledger.records().collect();
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                println!("📒 Contacts for {}", net.name);
                println!("=================");
                for (node, r) in ledger.records() {
                    println!(
                        "   @{}: {} contacts, {} failures, last {} (S:{} R:{} waiting:{})",
                        node,
                        r.num_contacts,
                        r.num_failures,
                        format_time(r.last_contact),
                        r.bytes_sent,
                        r.bytes_received,
                        r.bytes_waiting
                    );
                }
            }
            Ok(())
        }
        Some(Commands::GenerateConfig { .. }) => Ok(()),
        Some(Commands::Answer) | None => {
            info!("Starting binkpd on {}", config.listen_address);
            server::run_answering(config, storage).await
        }
    }
}
