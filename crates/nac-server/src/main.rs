use clap::Parser;
use nac_directory::EndpointRole;
use nac_server::{Config, NacServer};
use std::process;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// NAC backend - RADIUS REST decisions over a replicated directory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "nac-server")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "config.json")]
    config_path: String,

    /// Validate configuration and exit (doesn't start server)
    #[arg(short, long)]
    validate: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load or create configuration (without logging first)
    let config = match Config::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing_subscriber::registry()
                .with(EnvFilter::new("info"))
                .with(tracing_subscriber::fmt::layer())
                .init();

            if cli.validate {
                eprintln!("Configuration validation failed!");
                eprintln!("   Error: {}", e);
                process::exit(1);
            }

            warn!("Could not load config file from {}: {}", cli.config_path, e);
            info!("Creating example configuration at: {}", cli.config_path);

            if let Err(e) = Config::example().to_file(&cli.config_path) {
                error!("Error creating example config: {}", e);
                process::exit(1);
            }

            info!("Please edit {} and restart the server", cli.config_path);
            process::exit(0);
        }
    };

    if cli.validate {
        print_summary(&config);
        process::exit(0);
    }

    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("NAC backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", cli.config_path);
    for endpoint in &config.directory.endpoints {
        info!(address = %endpoint.address, role = ?endpoint.role, "Directory endpoint");
    }
    if config.directory.writable_endpoints() == 0 {
        warn!("No read-write directory endpoint: device registration will fail");
    }
    if config.task_queue.is_none() {
        warn!("No task queue configured: VLAN changes will not be applied");
    }

    let server = match NacServer::new(&config).await {
        Ok(srv) => srv,
        Err(e) => {
            error!("Failed to create server: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {}", e);
        process::exit(1);
    }
}

fn print_summary(config: &Config) {
    println!("Configuration validated successfully!");
    println!();
    println!("Configuration summary:");
    println!("  Listen: {}:{}", config.listen_address, config.listen_port);
    println!("  Log level: {}", config.log_level.as_deref().unwrap_or("info"));
    println!("  Request timeout: {}s", config.request_timeout);
    println!("  Endpoint cooldown: {}s", config.directory.cooldown);
    println!("  Quarantine VLAN: {}", config.vlans.quarantine_vlan);
    match config.vlans.nas_policy {
        Some(ref policy) => println!(
            "  NAS VLAN policy: {} (wireless VLAN {})",
            policy.switch_network, policy.wireless_vlan
        ),
        None => println!("  NAS VLAN policy: none (VLAN from owner's room)"),
    }
    if let Some(ref path) = config.audit_log_path {
        println!("  Audit log: {}", path);
    }
    if let Some(ref path) = config.accounting_log_path {
        println!("  Accounting log: {}", path);
    }
    match config.task_queue {
        Some(ref queue) => println!("  Task queue: Redis list {}", queue.key),
        None => println!("  Task queue: none"),
    }
    println!();

    println!("Directory endpoints:");
    for endpoint in &config.directory.endpoints {
        let role = match endpoint.role {
            EndpointRole::ReadWrite => "rw",
            EndpointRole::ReadOnly => "ro",
        };
        println!("  [{}] {}", role, endpoint.address);
    }
}
