use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use gust_control_lib::control_interface::{Command, CommandKind, ControlInterface, Switch};
use gust_control_lib::state::listener::{Poke, StateListener, StateUpdate};
use gust_control_lib::util::discovery::{
    discover_ip_by_mac, pretty_print_beacons, BeaconListener, BeaconRecord,
};
use gust_control_lib::util::mac::MacAddress;
use gust_control_lib::util::socket::{ListenConfig, DEFAULT_COMMAND_PORT};

/// No beacons or state updates were received.
const EXIT_NOTHING_RECEIVED: u8 = 2;
/// Beacons were received, but not from the requested MAC.
const EXIT_TARGET_NOT_SEEN: u8 = 3;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::init();

    let cli = Cli::parse();

    handle_cli(cli).await
}

/// This struct defines the command line interface of the application
#[derive(Parser)]
#[clap(
    name = "gust_control",
    about = "Discovers and controls UDP smart ceiling fans",
    version
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

/// Supported output formats for the `discover` command.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Plain text format.
    Plaintext,
    /// JSON format.
    Json,
    /// YAML format.
    Yaml,
}

/// Subcommands available for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Listens for fan beacons on UDP 5625 and summarizes them
    #[clap(name = "discover")]
    Discover {
        /// Only report beacons from this MAC address
        #[clap(long, value_parser = MacAddress::parse)]
        mac: Option<MacAddress>,

        /// Output format (plaintext, json, yaml)
        #[clap(short, long, value_enum, default_value_t = OutputFormat::Plaintext)]
        output: OutputFormat,

        /// Listen time in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 6000)]
        timeout: u64,
    },
    /// Resolves a fan's IP address from its beacons
    #[clap(name = "resolve")]
    Resolve {
        /// MAC address of the fan (12 hex chars, separators allowed)
        #[clap(long, value_parser = MacAddress::parse)]
        mac: MacAddress,

        /// Listen time in milliseconds
        #[clap(short = 't', long = "timeout", default_value_t = 4000)]
        timeout: u64,
    },
    /// Listens for state updates, optionally poking a fan to provoke one
    #[clap(name = "listen-state")]
    ListenState(ListenStateArgs),
    /// Sends a single command to a fan
    #[clap(name = "send")]
    Send(SendArgs),
}

#[derive(Args)]
pub struct ListenStateArgs {
    /// Listen time in milliseconds
    #[clap(short = 't', long = "timeout", default_value_t = 6000)]
    timeout: u64,

    /// Only report updates from this device_id
    #[clap(long, conflicts_with = "mac")]
    device_id: Option<String>,

    /// Only report updates from this MAC (matched against device_id)
    #[clap(long, value_parser = MacAddress::parse)]
    mac: Option<MacAddress>,

    /// Send the poke command to this fan IP while listening
    #[clap(long, conflicts_with = "poke_mac")]
    poke_ip: Option<IpAddr>,

    /// Send the poke command to this fan, resolving its IP from beacons
    #[clap(long, value_parser = MacAddress::parse)]
    poke_mac: Option<MacAddress>,

    /// UDP port for the poke command
    #[clap(long, default_value_t = DEFAULT_COMMAND_PORT)]
    poke_port: u16,

    /// When using --poke-mac, how long to listen for beacons, in milliseconds
    #[clap(long, default_value_t = 4000)]
    discover_timeout: u64,

    /// Milliseconds after start to send the poke command
    #[clap(long, default_value_t = 1000)]
    poke_after: u64,

    #[clap(flatten)]
    poke: PokeCommandArgs,
}

#[derive(Args)]
#[group(multiple = false)]
pub struct PokeCommandArgs {
    /// Poke by (re)setting absolute speed (1..6)
    #[clap(long, allow_hyphen_values = true)]
    poke_speed: Option<i64>,

    /// Poke by setting power
    #[clap(long, value_enum)]
    poke_power: Option<Switch>,

    /// Poke by setting the light
    #[clap(long, value_enum)]
    poke_led: Option<Switch>,
}

impl PokeCommandArgs {
    fn to_command(&self) -> Result<Option<Command>> {
        let command = match (self.poke_speed, self.poke_power, self.poke_led) {
            (Some(speed), _, _) => Some(Command::speed(speed)?),
            (_, Some(power), _) => Some(Command::power(power.is_on())),
            (_, _, Some(led)) => Some(Command::led(led.is_on())),
            _ => None,
        };
        Ok(command)
    }
}

#[derive(Args)]
pub struct SendArgs {
    #[clap(flatten)]
    target: TargetArgs,

    /// When using --mac, how long to listen for beacons, in milliseconds
    #[clap(long, default_value_t = 4000)]
    discover_timeout: u64,

    /// Target UDP port
    #[clap(long, default_value_t = DEFAULT_COMMAND_PORT)]
    port: u16,

    /// Print the command but do not send it
    #[clap(long)]
    dry_run: bool,

    #[clap(flatten)]
    command: CommandArgs,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Fan IP address (e.g. 192.168.0.13)
    #[clap(long)]
    ip: Option<IpAddr>,

    /// Fan MAC address; the IP is discovered from beacons
    #[clap(long, value_parser = MacAddress::parse)]
    mac: Option<MacAddress>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct CommandArgs {
    /// Raw command JSON, e.g. '{"power":true}'
    #[clap(long = "json")]
    json: Option<String>,

    /// Turn fan power on/off
    #[clap(long, value_enum)]
    power: Option<Switch>,

    /// Set absolute speed (1..6)
    #[clap(long, allow_hyphen_values = true)]
    speed: Option<i64>,

    /// Change speed relative (-5..5 excluding 0)
    #[clap(long, allow_hyphen_values = true)]
    speed_delta: Option<i64>,

    /// Turn the fan light on/off
    #[clap(long, value_enum)]
    led: Option<Switch>,

    /// Set timer hours (0..4), 0 turns the timer off
    #[clap(long, allow_hyphen_values = true)]
    timer: Option<i64>,
}

impl CommandArgs {
    fn to_command(&self) -> Result<Command> {
        let command = if let Some(json) = &self.json {
            Command::build(CommandKind::Json, json)?
        } else if let Some(power) = self.power {
            Command::power(power.is_on())
        } else if let Some(speed) = self.speed {
            Command::speed(speed)?
        } else if let Some(delta) = self.speed_delta {
            Command::speed_delta(delta)?
        } else if let Some(led) = self.led {
            Command::led(led.is_on())
        } else if let Some(timer) = self.timer {
            Command::timer(timer)?
        } else {
            bail!("No command specified");
        };
        Ok(command)
    }
}

async fn handle_cli(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Discover {
            mac,
            output,
            timeout,
        } => discover(mac, output, Duration::from_millis(timeout)).await,
        Commands::Resolve { mac, timeout } => {
            let ip = discover_ip_by_mac(&mac, Duration::from_millis(timeout)).await?;
            println!("{}", ip);
            Ok(ExitCode::SUCCESS)
        }
        Commands::ListenState(args) => listen_state(args).await,
        Commands::Send(args) => send(args).await,
    }
}

async fn discover(
    mac: Option<MacAddress>,
    output: OutputFormat,
    duration: Duration,
) -> Result<ExitCode> {
    let listener = BeaconListener::bind(&ListenConfig::default())
        .await
        .context("Failed to bind the discovery port")?;

    let plaintext = output == OutputFormat::Plaintext;
    if plaintext {
        println!("Listening for fan beacons on UDP 5625 ...");
        if let Some(mac) = &mac {
            println!("Filtering for MAC: {}", mac);
        }
    }

    let seen = listener
        .listen_with(duration, mac.as_ref(), |beacon| {
            if plaintext {
                println!("Beacon: {}", beacon);
            }
        })
        .await?;

    if seen.is_empty() {
        eprintln!("No beacons received. If you're on the same Wi-Fi, check firewall/UDP/broadcast.");
        return Ok(ExitCode::from(EXIT_NOTHING_RECEIVED));
    }

    match output {
        OutputFormat::Plaintext => {
            println!("\nSummary (last seen):");
            pretty_print_beacons(&seen);
        }
        OutputFormat::Json => {
            let beacons: Vec<&BeaconRecord> = seen.values().collect();
            println!("{}", serde_json::to_string(&beacons)?);
        }
        OutputFormat::Yaml => {
            let beacons: Vec<&BeaconRecord> = seen.values().collect();
            println!("{}", serde_yaml::to_string(&beacons)?);
        }
    }

    if let Some(mac) = mac {
        if !seen.contains_key(&mac) {
            eprintln!("Did not see target MAC {}.", mac);
            return Ok(ExitCode::from(EXIT_TARGET_NOT_SEEN));
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn listen_state(args: ListenStateArgs) -> Result<ExitCode> {
    // State payloads identify the fan by its lowercase MAC.
    let device_filter = match (&args.device_id, &args.mac) {
        (_, Some(mac)) => Some(mac.device_id()),
        (Some(device_id), None) => Some(device_id.clone()),
        (None, None) => None,
    };

    let poke_command = args.poke.to_command()?;
    let poke_ip = match (args.poke_ip, &args.poke_mac) {
        (Some(ip), _) => Some(ip),
        (None, Some(mac)) => {
            let ip = discover_ip_by_mac(mac, Duration::from_millis(args.discover_timeout)).await?;
            println!("Discovered poke IP for {}: {}", mac, ip);
            Some(ip)
        }
        (None, None) => None,
    };

    let poke = match (poke_ip, poke_command) {
        (Some(ip), Some(command)) => Some(
            Poke::new(command, SocketAddr::new(ip, args.poke_port))
                .with_delay(Duration::from_millis(args.poke_after)),
        ),
        (Some(_), None) => {
            bail!("When using --poke-ip/--poke-mac, you must specify one of --poke-speed/--poke-power/--poke-led")
        }
        (None, Some(_)) => bail!("--poke-speed/--poke-power/--poke-led require --poke-ip or --poke-mac"),
        (None, None) => None,
    };

    let listener = StateListener::bind(&ListenConfig::default())
        .await
        .context("Failed to bind the state port")?;

    println!("Listening for fan state updates on UDP 5625 ...");
    if let Some(device_id) = &device_filter {
        println!("Filtering for device_id: {}", device_id);
    }
    match &poke {
        Some(poke) => println!(
            "Poke enabled: will send {} to {} after {:?}",
            poke.command, poke.target, poke.delay
        ),
        None => println!(
            "Tip: state updates are broadcast after the fan receives a command and changes state."
        ),
    }

    let latest = listener
        .listen_with(
            Duration::from_millis(args.timeout),
            device_filter.as_deref(),
            poke,
            print_state_update,
        )
        .await?;

    if latest.is_none() {
        eprintln!("\nNo state updates received.");
        return Ok(ExitCode::from(EXIT_NOTHING_RECEIVED));
    }

    Ok(ExitCode::SUCCESS)
}

fn print_state_update(update: &StateUpdate) {
    let status = &update.payload.status;
    println!(
        "\nFrom {} device_id={}",
        update.source, update.payload.device_id
    );
    println!(
        "state_value={} power={} speed={} led={} sleep={}",
        status.value, status.power, status.speed, status.led, status.sleep
    );
    println!(
        "timer_hours={} timer_elapsed_mins={}",
        status.timer_hours, status.timer_elapsed_minutes
    );
    if let Some(color) = status.color {
        println!("color={}", color);
    }
    if let Some(brightness) = status.brightness {
        println!("brightness={}", brightness);
    }
    println!("raw_state_string={}", update.payload.state_string);
}

async fn send(args: SendArgs) -> Result<ExitCode> {
    // Validate before any network I/O.
    let command = args.command.to_command()?;

    let control = match (args.target.ip, &args.target.mac) {
        (Some(ip), _) => ControlInterface::new(ip, args.port),
        (None, Some(mac)) => {
            let control = ControlInterface::from_mac(
                mac,
                Duration::from_millis(args.discover_timeout),
                args.port,
            )
            .await?;
            println!("Discovered IP for {}: {}", mac, control.target().ip());
            control
        }
        (None, None) => bail!("Either --ip or --mac is required"),
    };

    println!("Target: {}", control.target());
    println!("Command: {}", command.to_json()?);

    if args.dry_run {
        println!("Dry run: not sending.");
        return Ok(ExitCode::SUCCESS);
    }

    control.send(&command).await?;
    println!("Sent.");
    Ok(ExitCode::SUCCESS)
}
