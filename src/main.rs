use anyhow::Result;
use log::info;

use rtulink::cli::{build_cli, handle_subcommands};
use rtulink::modbus::ModbusClient;
use rtulink::Config;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let matches = build_cli().get_matches();
    let config = Config::from_matches(&matches)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    info!(
        "🖥️  rtulink {} - {} @ {} baud",
        rtulink::VERSION,
        config.serial_port,
        config.baud_rate
    );

    let mut client = ModbusClient::open(&config.serial_port, config.baud_rate, &config.parity)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", config.serial_port, e))?;
    client.set_request_options(config.request_options());
    client.set_ping_options(config.ping_attempts, config.ping_timeout());

    let handled = handle_subcommands(&matches, &mut client)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    if !handled {
        build_cli().print_help()?;
        println!();
    }

    Ok(())
}
