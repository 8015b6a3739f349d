use clap::Parser;
use hydra::cli::{Cli, Commands};
use hydra::constants::DOTENV_FILE;
use hydra::{Configuration, ProcessSupervisor, dotenv};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();
    let config = Arc::new(Configuration::load(&cli.topology)?);
    for (service, mode) in &cli.modes {
        config.set_service_config(service, mode)?;
    }

    let env = dotenv::base_environment(Some(Path::new(DOTENV_FILE)))?;
    let supervisor = ProcessSupervisor::new(Arc::clone(&config)).with_environment(env);

    match cli.command {
        Commands::Run => run(&supervisor).await?,
        Commands::List => list(&config),
        Commands::Resolve => resolve(&supervisor),
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Start everything, stream logs, stop everything on Ctrl-C
async fn run(supervisor: &ProcessSupervisor) -> Result<(), Box<dyn std::error::Error>> {
    let width = supervisor
        .configuration()
        .topology()
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0);

    supervisor.register_log_handler(move |service, line| {
        let time = chrono::Local::now().format("%H:%M:%S");
        println!("{} [{:<width$}] {}", time, service, line, width = width);
    });

    for (service, outcome) in supervisor.start_all().await {
        if let Err(e) = outcome {
            eprintln!("❌ Failed to start \"{}\": {}", service, e);
        }
    }

    let running = supervisor.running_services().await;
    if running.is_empty() {
        println!("No service is running.");
        return Ok(());
    }
    for (service, pid) in &running {
        println!("🚀 \"{}\" started with PID {}", service, pid);
    }

    tokio::signal::ctrl_c().await?;
    println!();
    println!("🛑 Stopping {} services...", running.len());

    for (service, outcome) in supervisor.stop_all().await {
        if let Err(e) = outcome {
            eprintln!("❌ Failed to stop \"{}\": {}", service, e);
        }
    }
    println!("✅ All services stopped");
    Ok(())
}

/// Print every service with its modes, the selected one in brackets
fn list(config: &Configuration) {
    if config.topology().is_empty() {
        println!("No services configured.");
        return;
    }

    println!("{:<20} {}", "SERVICE", "MODES");
    println!("{}", "-".repeat(60));

    for service in config.topology() {
        let selected = config.service_config(&service.name).unwrap_or_default();
        let modes: Vec<String> = service
            .modes
            .iter()
            .map(|m| {
                if m.name == selected {
                    format!("[{}]", m.name)
                } else {
                    m.name.clone()
                }
            })
            .collect();
        println!("{:<20} {}", service.name, modes.join(" "));
    }
}

/// Show the resolved launch of every service without starting anything
fn resolve(supervisor: &ProcessSupervisor) {
    for name in supervisor.configuration().service_names() {
        println!("{}", name);
        match supervisor.plan(&name) {
            Ok(None) => println!("   off"),
            Ok(Some(plan)) => {
                println!("   Mode: {}", plan.mode);
                println!("   Shell: {}", plan.request.shell);
                println!("   Command: {}", plan.request.command);
                println!("   Location: {}", plan.request.location.display());
                for (key, value) in &plan.injected {
                    println!("   env {}={}", key, value);
                }
                if let Some(entries) = &plan.dotenv {
                    for line in dotenv::render(entries).lines() {
                        println!("   .env {}", line);
                    }
                }
            }
            Err(e) => println!("   ❌ {}", e),
        }
    }
}
