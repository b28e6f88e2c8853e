//! # Gust Control Library for UDP Smart Ceiling Fans
//!
//! `gust-control-lib` is a Rust library for talking to smart ceiling fans over their
//! local UDP protocol. Fans broadcast beacons and state updates on UDP port 5625
//! and accept compact JSON commands on UDP port 5600. There is no acknowledgment
//! channel, so every operation here is a bounded listen window or a fire-and-forget send.
//!
//! ## Features
//!
//! - Beacon-based device discovery and MAC to IP resolution
//! - Decoding of the packed status word carried in state broadcasts
//! - Listening for state, optionally "poking" the fan mid-listen to provoke a broadcast
//! - Validated command construction and sending
//!
//! ## Example
//!
//! Resolve a fan by MAC and switch it to speed 3:
//!
//! ```no_run
//! use gust_control_lib::control_interface::{Command, ControlInterface};
//! use gust_control_lib::util::mac::MacAddress;
//! use gust_control_lib::util::socket::DEFAULT_COMMAND_PORT;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mac = MacAddress::parse("10:b4:1d:18:1e:58")?;
//!     let fan = ControlInterface::from_mac(&mac, Duration::from_secs(4), DEFAULT_COMMAND_PORT).await?;
//!     fan.send(&Command::speed(3)?).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Disclaimer
//!
//! This project is not affiliated with, authorized by, endorsed by, or in any way officially
//! connected with any fan manufacturer.
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License, Version 2.0.
//! You may choose to use either license, depending on your project needs.

// The `control_interface` module builds and validates fan commands and sends them
// as single UDP datagrams.
//
// Example usage:
//
// ```
// use gust_control_lib::control_interface::{Command, ControlInterface};
//
// #[tokio::main]
// async fn main() {
//     let fan = ControlInterface::new("192.168.1.100".parse().unwrap(), 5600);
//     fan.send(&Command::power(true)).await.unwrap();
// }
// ```
pub mod control_interface;

// The `state` module decodes state broadcasts: the JSON envelope, the packed
// status word, and the listener that collects them.
//
// Example usage:
//
// ```
// use gust_control_lib::state::status_word::DecodedStatus;
//
// let status = DecodedStatus::decode(0x16);
// assert!(status.power);
// ```
pub mod state;

// The `util` module holds MAC handling, errors, socket helpers, and beacon discovery.
//
// Example usage:
//
// ```
// use gust_control_lib::util::discovery::BeaconListener;
// use gust_control_lib::util::socket::ListenConfig;
// use std::time::Duration;
//
// #[tokio::main]
// async fn main() {
//     let listener = BeaconListener::bind(&ListenConfig::default()).await.unwrap();
//     for (mac, beacon) in listener.listen(Duration::from_secs(6), None).await.unwrap() {
//         println!("{} -> {}", mac, beacon.source_ip);
//     }
// }
// ```
pub mod util;
