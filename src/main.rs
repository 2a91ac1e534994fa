use std::sync::Arc;

use clap::Parser;
use serial_bridge::{
    buffer,
    cli::{Cli, Commands, Mode},
    config::{Config, ConfigLine, LineSettings},
    device::serial::{available_lines, SerialDeviceFactory},
    echo,
    error::Error,
    line::LineName,
    logging,
    policy::AccessPolicy,
    registry::Registry,
    server, tcp, udp,
};
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();

    if let Some(command) = &cli.command {
        match command {
            Commands::List => {
                match available_lines() {
                    Ok(lines) => {
                        for line in lines {
                            println!("{line}");
                        }
                    }
                    Err(e) => {
                        eprintln!("{e}");
                        std::process::exit(1);
                    }
                }
                return;
            }
            Commands::ConfigExample => {
                println!("{}", Config::example().serialize_pretty());
                return;
            }
        }
    }

    let config = match &cli.config {
        Some(config_path) => {
            debug!(?config_path, "Config from path");
            match Config::new_from_path(config_path) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            debug!("Default config");
            Config::default()
        }
    };

    let policy = effective_policy(&cli, &config);

    let registry = Arc::new(
        Registry::new(Arc::new(SerialDeviceFactory)).with_rx_capacity(
            config.rx_capacity.unwrap_or(buffer::DEFAULT_CAPACITY),
        ),
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        result = serve(&cli, &config, policy, registry) => {
            match result {
                Ok(()) => error!("Server returned"),
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// The config file's policy with the command line's restrictions applied
/// on top. Flags can only take permissions away, never grant them.
fn effective_policy(cli: &Cli, config: &Config) -> AccessPolicy {
    let mut policy = config.policy.clone();

    if cli.no_list {
        policy.list = false;
    }
    if cli.no_read {
        policy.read = false;
    }
    if cli.no_write {
        policy.write = false;
    }
    if cli.no_ws {
        policy.subscribe = false;
    }
    if !cli.allow_ports.is_empty() {
        policy.allowed_lines = Some(cli.allow_ports.clone());
    }

    policy
}

/// The port bridged in tcp/udp/echo modes, from `--line` or the config file.
fn bridged_line(cli: &Cli, config: &Config) -> Result<(LineName, LineSettings), Error> {
    let line = match (&cli.line, &config.line) {
        (Some(spec), _) => ConfigLine::from_spec(spec)?,
        (None, Some(line)) => line.clone(),
        (None, None) => {
            return Err(Error::BadConfig(
                "tcp, udp and echo modes need a serial port, \
                 pass --line or set one in the config file"
                    .into(),
            ))
        }
    };

    Ok((LineName::canonicalize(&line.name)?, line.settings))
}

async fn serve(
    cli: &Cli,
    config: &Config,
    policy: AccessPolicy,
    registry: Arc<Registry>,
) -> Result<(), Error> {
    match cli.mode {
        Mode::Http => {
            server::run_on_port(registry, policy, &cli.prefix, cli.port).await;
            Ok(())
        }
        Mode::Tcp => {
            let (line, settings) = bridged_line(cli, config)?;
            tcp::run(registry, &policy, &line, settings, cli.port, None).await
        }
        Mode::Udp => {
            let (line, settings) = bridged_line(cli, config)?;
            udp::run(registry, &policy, &line, settings, cli.port, None).await
        }
        Mode::Echo => {
            let (line, settings) = bridged_line(cli, config)?;
            echo::run(registry, &policy, &line, settings, None).await
        }
    }
}
