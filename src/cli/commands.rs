use clap::{Arg, ArgAction, ArgMatches, Command};
use log::info;

use crate::modbus::{ModbusClient, RegisterAccess};

pub fn build_cli() -> Command {
    Command::new("rtulink")
        .about("Modbus RTU client for half-duplex serial field buses")
        .version(crate::VERSION)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .help("Serial device path (e.g. /dev/ttyUSB0)"),
        )
        .arg(Arg::new("baud").long("baud").short('b').help("Baud rate"))
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .help("Response timeout in milliseconds"),
        )
        .arg(
            Arg::new("attempts")
                .long("attempts")
                .help("Retry attempts for both retry scopes"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print results as JSON"),
        )
        .subcommand(
            Command::new("read")
                .about("Read holding registers (function 3)")
                .arg(Arg::new("device").required(true))
                .arg(Arg::new("register").required(true))
                .arg(Arg::new("count").default_value("1")),
        )
        .subcommand(
            Command::new("read-input")
                .about("Read input registers (function 4)")
                .arg(Arg::new("device").required(true))
                .arg(Arg::new("register").required(true))
                .arg(Arg::new("count").default_value("1")),
        )
        .subcommand(
            Command::new("write")
                .about("Write a single holding register (function 6)")
                .arg(Arg::new("device").required(true))
                .arg(Arg::new("register").required(true))
                .arg(Arg::new("value").required(true)),
        )
        .subcommand(
            Command::new("coil")
                .about("Write a single coil (function 5)")
                .arg(Arg::new("device").required(true))
                .arg(Arg::new("coil").required(true))
                .arg(
                    Arg::new("state")
                        .required(true)
                        .value_parser(["on", "off"]),
                ),
        )
        .subcommand(
            Command::new("echo")
                .about("Diagnostics echo (function 8, sub-function 0)")
                .arg(Arg::new("device").required(true))
                .arg(Arg::new("data").required(true).help("Hex bytes, e.g. dead beef")),
        )
        .subcommand(
            Command::new("ping")
                .about("Probe a device for reachability")
                .arg(Arg::new("device").required(true)),
        )
        .subcommand(
            Command::new("scan")
                .about("Ping a range of addresses")
                .arg(Arg::new("from").default_value("1"))
                .arg(Arg::new("to").default_value("16")),
        )
        .subcommand(
            Command::new("auto-baud")
                .about("Detect the line speed a device answers at")
                .arg(Arg::new("device").required(true)),
        )
}

/// Dispatch one subcommand against an open client. Returns false when no
/// subcommand was given.
pub async fn handle_subcommands(
    matches: &ArgMatches,
    client: &mut ModbusClient,
) -> Result<bool, Box<dyn std::error::Error>> {
    let json = matches.get_flag("json");

    if let Some(matches) = matches.subcommand_matches("read") {
        let device: u8 = matches.get_one::<String>("device").unwrap().parse()?;
        let register: u16 = matches.get_one::<String>("register").unwrap().parse()?;
        let count: u16 = matches.get_one::<String>("count").unwrap().parse()?;

        info!("📊 Reading {} holding register(s) at {} from device {}", count, register, device);
        let values = client.read_holding_registers(device, register, count).await?;
        print_registers(device, register, &values, json);
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("read-input") {
        let device: u8 = matches.get_one::<String>("device").unwrap().parse()?;
        let register: u16 = matches.get_one::<String>("register").unwrap().parse()?;
        let count: u16 = matches.get_one::<String>("count").unwrap().parse()?;

        info!("📊 Reading {} input register(s) at {} from device {}", count, register, device);
        let values = client.read_input_registers(device, register, count).await?;
        print_registers(device, register, &values, json);
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("write") {
        let device: u8 = matches.get_one::<String>("device").unwrap().parse()?;
        let register: u16 = matches.get_one::<String>("register").unwrap().parse()?;
        let value: u16 = matches.get_one::<String>("value").unwrap().parse()?;

        client.write_register(device, register, value).await?;
        println!("✅ Wrote 0x{:04X} to register {} on device {}", value, register, device);
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("coil") {
        let device: u8 = matches.get_one::<String>("device").unwrap().parse()?;
        let coil: u16 = matches.get_one::<String>("coil").unwrap().parse()?;
        let on = matches.get_one::<String>("state").unwrap() == "on";

        client.write_coil(device, coil, on).await?;
        println!("✅ Coil {} on device {} switched {}", coil, device, if on { "on" } else { "off" });
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("echo") {
        let device: u8 = matches.get_one::<String>("device").unwrap().parse()?;
        let data = hex::decode(matches.get_one::<String>("data").unwrap().replace(' ', ""))?;

        let echoed = client.echo_query_data(device, &data).await?;
        if echoed == data {
            println!("✅ Device {} echoed {} byte(s) intact", device, data.len());
        } else {
            println!("❌ Echo mismatch: sent {}, got {}", hex::encode(&data), hex::encode(&echoed));
        }
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("ping") {
        let device: u8 = matches.get_one::<String>("device").unwrap().parse()?;

        if client.ping(device).await? {
            println!("✅ Device {} is reachable", device);
        } else {
            println!("📵 Device {} did not respond", device);
        }
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("scan") {
        let from: u8 = matches.get_one::<String>("from").unwrap().parse()?;
        let to: u8 = matches.get_one::<String>("to").unwrap().parse()?;

        info!("🔍 Scanning addresses {}..={}", from, to);
        let responsive = client.scan(from..=to).await?;
        if json {
            println!("{}", serde_json::json!({ "responsive": responsive }));
        } else if responsive.is_empty() {
            println!("📵 No devices responded in {}..={}", from, to);
        } else {
            println!(
                "✅ Responsive devices: [{}]",
                responsive.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
            );
        }
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("auto-baud") {
        let device: u8 = matches.get_one::<String>("device").unwrap().parse()?;

        if client.auto_baud(device).await? {
            println!("✅ Device {} found", device);
        } else {
            println!("📵 Device {} did not answer at any tried rate", device);
        }
        return Ok(true);
    }

    Ok(false)
}

fn print_registers(device: u8, register: u16, values: &[u16], json: bool) {
    if json {
        println!(
            "{}",
            serde_json::json!({
                "device": device,
                "register": register,
                "values": values,
            })
        );
    } else {
        for (offset, value) in values.iter().enumerate() {
            println!("📈 [{}] = {} (0x{:04X})", register + offset as u16, value, value);
        }
    }
}
