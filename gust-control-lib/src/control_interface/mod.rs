use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use clap::ValueEnum;
use log::{debug, info};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::util::discovery::discover_ip_by_mac;
use crate::util::error::{FanError, Result};
use crate::util::mac::MacAddress;
use crate::util::socket::bind_sender;

pub const SPEED_RANGE: std::ops::RangeInclusive<i64> = 1..=6;
pub const SPEED_DELTA_RANGE: std::ops::RangeInclusive<i64> = -5..=5;
pub const TIMER_RANGE: std::ops::RangeInclusive<i64> = 0..=4;

/// A single command understood by the fan.
///
/// Serializes to the compact wire object, e.g. `{"speed":3}` or `{"speedDelta":-1}`.
/// Build validated commands through the constructors rather than the variants.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Command {
    Power(bool),
    /// Absolute speed, 1..=6.
    Speed(u8),
    /// Relative speed change, -5..=5 excluding 0.
    SpeedDelta(i8),
    Led(bool),
    /// Timer in hours, 0..=4. 0 turns the timer off.
    Timer(u8),
    /// Caller-supplied object sent as-is.
    #[serde(untagged)]
    Raw(Map<String, Value>),
}

/// The recognized command keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Power,
    Speed,
    SpeedDelta,
    Led,
    Timer,
    Json,
}

/// An on/off argument as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
    True,
    False,
}

impl Switch {
    pub fn is_on(self) -> bool {
        matches!(self, Switch::On | Switch::True)
    }
}

impl FromStr for Switch {
    type Err = FanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "on" => Ok(Switch::On),
            "off" => Ok(Switch::Off),
            "true" => Ok(Switch::True),
            "false" => Ok(Switch::False),
            _ => Err(FanError::invalid_argument(format!(
                "expected one of on, off, true, false, got {:?}",
                s
            ))),
        }
    }
}

impl From<Switch> for bool {
    fn from(switch: Switch) -> Self {
        switch.is_on()
    }
}

impl Command {
    pub fn power(on: bool) -> Self {
        Command::Power(on)
    }

    pub fn led(on: bool) -> Self {
        Command::Led(on)
    }

    pub fn speed(speed: i64) -> Result<Self> {
        if !SPEED_RANGE.contains(&speed) {
            return Err(FanError::invalid_argument(format!(
                "speed must be between {} and {}, got {}",
                SPEED_RANGE.start(),
                SPEED_RANGE.end(),
                speed
            )));
        }
        Ok(Command::Speed(speed as u8))
    }

    pub fn speed_delta(delta: i64) -> Result<Self> {
        if delta == 0 || !SPEED_DELTA_RANGE.contains(&delta) {
            return Err(FanError::invalid_argument(format!(
                "speedDelta must be between {} and {} and not 0, got {}",
                SPEED_DELTA_RANGE.start(),
                SPEED_DELTA_RANGE.end(),
                delta
            )));
        }
        Ok(Command::SpeedDelta(delta as i8))
    }

    pub fn timer(hours: i64) -> Result<Self> {
        if !TIMER_RANGE.contains(&hours) {
            return Err(FanError::invalid_argument(format!(
                "timer must be between {} and {}, got {}",
                TIMER_RANGE.start(),
                TIMER_RANGE.end(),
                hours
            )));
        }
        Ok(Command::Timer(hours as u8))
    }

    /// Wraps an arbitrary JSON object. No key or value checks are made.
    pub fn raw(value: Value) -> Result<Self> {
        match value {
            Value::Object(object) => Ok(Command::Raw(object)),
            other => Err(FanError::invalid_argument(format!(
                "raw command must be a JSON object (e.g. {{\"power\":true}}), got {}",
                other
            ))),
        }
    }

    /// Builds a command from its kind and a textual argument.
    pub fn build(kind: CommandKind, arg: &str) -> Result<Self> {
        match kind {
            CommandKind::Power => Ok(Command::power(arg.parse::<Switch>()?.into())),
            CommandKind::Led => Ok(Command::led(arg.parse::<Switch>()?.into())),
            CommandKind::Speed => Command::speed(parse_int(arg)?),
            CommandKind::SpeedDelta => Command::speed_delta(parse_int(arg)?),
            CommandKind::Timer => Command::timer(parse_int(arg)?),
            CommandKind::Json => {
                let value = serde_json::from_str::<Value>(arg).map_err(|e| {
                    FanError::invalid_argument(format!("invalid JSON command: {}", e))
                })?;
                Command::raw(value)
            }
        }
    }

    /// Compact JSON, exactly as sent on the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn parse_int(arg: &str) -> Result<i64> {
    arg.trim()
        .parse::<i64>()
        .map_err(|_| FanError::invalid_argument(format!("expected an integer, got {:?}", arg)))
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => write!(f, "{}", json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// Sends commands to one fan. There is no reply channel: a successful send only
/// means the datagram was handed to the network stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInterface {
    target: SocketAddr,
}

impl ControlInterface {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        ControlInterface {
            target: SocketAddr::new(ip, port),
        }
    }

    /// Resolves the fan's IP from its beacons, then targets `port` on it.
    pub async fn from_mac(mac: &MacAddress, discover_duration: Duration, port: u16) -> Result<Self> {
        let ip = discover_ip_by_mac(mac, discover_duration).await?;
        info!("Discovered IP for {}: {}", mac, ip);
        Ok(ControlInterface::new(ip, port))
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub async fn send(&self, command: &Command) -> Result<()> {
        send_command(self.target, command).await
    }
}

/// Serializes `command` and sends it as a single datagram to `target`. Never retries.
pub async fn send_command(target: SocketAddr, command: &Command) -> Result<()> {
    let message = command.to_json()?;
    let socket = bind_sender(&target).await?;
    let sent = socket.send_to(message.as_bytes(), target).await?;
    debug!("Sent {} bytes to {}: {}", sent, target, message);
    Ok(())
}
