//! # Checkout Probe
//!
//! Opens a checkout session against a live backend and prints what the
//! checkout screen would show. Read-only: nothing is submitted or started.
//!
//! ## Usage
//! ```bash
//! # Inspect a sale by id
//! cargo run -p vitrina-checkout --bin checkout-probe -- --sale 1042
//!
//! # Latest pending sale of a customer
//! cargo run -p vitrina-checkout --bin checkout-probe -- --dni 30.123.456
//!
//! # Custom config file, and list the card terminals too
//! cargo run -p vitrina-checkout --bin checkout-probe -- --config ./checkout.toml --sale 1042 --devices
//! ```
//!
//! Logging follows `RUST_LOG` (default `info,vitrina=debug`).

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use vitrina_checkout::{CheckoutConfig, CheckoutSession, HttpBackend, NoOpEmitter, SaleRef};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vitrina=debug,reqwest=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::TRACE)
        .init();
}

fn print_help() {
    println!("Vitrina POS Checkout Probe");
    println!();
    println!("Usage: checkout-probe [OPTIONS] (--sale <ID> | --dni <DNI>)");
    println!();
    println!("Options:");
    println!("  -s, --sale <ID>      Sale id to open");
    println!("  -d, --dni <DNI>      Customer DNI; opens their latest pending sale");
    println!("  -c, --config <PATH>  Config file (default: platform config dir)");
    println!("      --devices        Also list the gateway card terminals");
    println!("  -h, --help           Show this help message");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut sale_ref: Option<SaleRef> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut list_devices = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--sale" | "-s" => {
                if i + 1 < args.len() {
                    sale_ref = Some(SaleRef::Id(args[i + 1].clone()));
                    i += 1;
                }
            }
            "--dni" | "-d" => {
                if i + 1 < args.len() {
                    sale_ref = Some(SaleRef::CustomerDni(args[i + 1].clone()));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--devices" => list_devices = true,
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => eprintln!("Ignoring unknown argument: {other}"),
        }
        i += 1;
    }

    let Some(sale_ref) = sale_ref else {
        print_help();
        return Err("either --sale or --dni is required".into());
    };

    init_tracing();

    let config = CheckoutConfig::load_or_default(config_path);
    config.validate()?;
    info!(base_url = %config.backend.base_url, "Probing checkout backend");

    let store_label = config.store_label().to_string();
    let backend = Arc::new(HttpBackend::from_config(&config)?);
    let session = CheckoutSession::open(backend, Arc::new(NoOpEmitter), config, sale_ref).await?;

    println!("{}", store_label);
    println!("Sale {}", session.sale_id());
    println!("================================");
    if let Some(sale) = session.sale().await {
        for line in &sale.lines {
            println!(
                "  {:>3} x {:<32} {:>12}",
                line.quantity,
                line.description,
                line.subtotal.to_string()
            );
        }
    }

    let entries = session.entries().await;
    println!();
    println!("Payments ({}):", entries.len());
    for (index, entry) in entries.iter().enumerate() {
        println!(
            "  #{index:<2} {:<14} {:>12}  {:?}",
            entry.method.to_string(),
            entry.amount.to_string(),
            entry.state
        );
    }

    let totals = session.totals().await;
    println!();
    println!("Total:      {:>12}", totals.total.to_string());
    println!("Paid:       {:>12}", totals.paid.to_string());
    println!("Pending:    {:>12}", totals.pending.to_string());
    println!("Remaining:  {:>12}", totals.remaining.to_string());
    if totals.overpaid.is_positive() {
        println!("Overpaid:   {:>12}", totals.overpaid.to_string());
    }

    if list_devices {
        let devices = session.devices().await?;
        println!();
        if devices.is_empty() {
            println!("No card terminals registered; terminal payments are unavailable.");
        } else {
            println!("Terminals:");
            for device in &devices {
                println!("  {:<24} {}", device.display_name(), device.id);
            }
        }
    }

    session.close().await;
    Ok(())
}
