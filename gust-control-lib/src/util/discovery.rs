use std::cmp::max;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Local};
use derivative::Derivative;
use log::{debug, info, trace};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::util::error::{FanError, Result};
use crate::util::mac::{MacAddress, MAC_LENGTH};
use crate::util::socket::{bind_reusable, poll_recv, ListenConfig, Received};

pub const DEFAULT_DISCOVER_DURATION: Duration = Duration::from_secs(4);

/// A parsed beacon datagram: `<12-hex-char MAC><series text>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beacon {
    pub mac: MacAddress,
    /// Human-readable model series, `None` when the fan sent nothing after the MAC.
    pub series: Option<String>,
}

impl Beacon {
    /// Returns `None` for datagrams that are too short or do not start with a MAC.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let content = String::from_utf8_lossy(data);
        let content = content.trim();

        let mac_part: String = content.chars().take(MAC_LENGTH).collect();
        if mac_part.chars().count() < MAC_LENGTH {
            return None;
        }
        let mac = MacAddress::parse(&mac_part).ok()?;

        let series = content[mac_part.len()..].trim();
        let series = if series.is_empty() {
            None
        } else {
            Some(series.to_string())
        };

        Some(Beacon { mac, series })
    }
}

/// The last beacon seen from one MAC during a listen window.
///
/// Equality ignores `last_seen`: two records describe the same fan at the same
/// address regardless of when the beacon arrived.
#[derive(Derivative)]
#[derivative(Hash, PartialEq, Eq)]
#[derive(Debug, Clone, Serialize)]
pub struct BeaconRecord {
    pub mac: MacAddress,
    pub source_ip: IpAddr,
    pub source_port: u16,
    pub series: Option<String>,
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub last_seen: DateTime<Local>,
}

impl BeaconRecord {
    fn new(beacon: Beacon, source: SocketAddr) -> Self {
        BeaconRecord {
            mac: beacon.mac,
            source_ip: source.ip(),
            source_port: source.port(),
            series: beacon.series,
            last_seen: Local::now(),
        }
    }

    pub fn series_or_unknown(&self) -> &str {
        self.series.as_deref().unwrap_or("(unknown series)")
    }
}

impl Display for BeaconRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mac={} ip={} src_port={} series={}",
            self.mac,
            self.source_ip,
            self.source_port,
            self.series_or_unknown()
        )
    }
}

/// Accumulated beacons of one listen window, keyed by MAC.
pub type BeaconTable = BTreeMap<MacAddress, BeaconRecord>;

/// Listens for fan beacons on the discovery port.
///
/// Each listener owns its socket and its beacon table; both are discarded when
/// the listen call returns.
pub struct BeaconListener {
    socket: UdpSocket,
    poll_interval: Duration,
    recv_buffer_size: usize,
}

impl BeaconListener {
    pub async fn bind(config: &ListenConfig) -> Result<Self> {
        let socket = bind_reusable(config.bind_addr)?;
        Ok(BeaconListener {
            socket,
            poll_interval: config.poll_interval,
            recv_buffer_size: config.recv_buffer_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Collects beacons for `duration`. An empty table means no beacons were seen.
    pub async fn listen(
        self,
        duration: Duration,
        filter_mac: Option<&MacAddress>,
    ) -> Result<BeaconTable> {
        self.listen_with(duration, filter_mac, |_| {}).await
    }

    /// Like [`Self::listen`], calling `on_beacon` for every beacon matching `filter_mac`
    /// (or every beacon, without a filter) as it arrives.
    ///
    /// The returned table holds every MAC observed, filtered or not.
    pub async fn listen_with<F>(
        self,
        duration: Duration,
        filter_mac: Option<&MacAddress>,
        mut on_beacon: F,
    ) -> Result<BeaconTable>
    where
        F: FnMut(&BeaconRecord),
    {
        let mut seen = BeaconTable::new();
        let mut buffer = vec![0u8; self.recv_buffer_size];
        let deadline = Instant::now() + duration;

        while Instant::now() < deadline {
            let (len, source) =
                match poll_recv(&self.socket, &mut buffer, deadline, self.poll_interval).await {
                    Received::Datagram { len, source } => (len, source),
                    Received::Idle => continue,
                };

            let Some(beacon) = Beacon::decode(&buffer[..len]) else {
                trace!("Ignoring {} byte datagram from {}", len, source);
                continue;
            };

            let record = BeaconRecord::new(beacon, source);
            if filter_mac.map_or(true, |mac| *mac == record.mac) {
                info!("Beacon: {}", record);
                on_beacon(&record);
            } else {
                debug!("Beacon from unfiltered MAC {}", record.mac);
            }
            seen.insert(record.mac.clone(), record);
        }

        Ok(seen)
    }

    /// Waits for a beacon from `mac` and returns its source IP as soon as one arrives.
    pub async fn resolve_ip(self, mac: &MacAddress, duration: Duration) -> Result<IpAddr> {
        let mut buffer = vec![0u8; self.recv_buffer_size];
        let deadline = Instant::now() + duration;

        while Instant::now() < deadline {
            let (len, source) =
                match poll_recv(&self.socket, &mut buffer, deadline, self.poll_interval).await {
                    Received::Datagram { len, source } => (len, source),
                    Received::Idle => continue,
                };

            if let Some(beacon) = Beacon::decode(&buffer[..len]) {
                if beacon.mac == *mac {
                    info!("Resolved {} to {}", mac, source.ip());
                    return Ok(source.ip());
                }
            }
        }

        Err(FanError::NotFound {
            mac: mac.clone(),
            duration,
        })
    }
}

/// Binds the default discovery port and resolves `mac` to an IP address.
pub async fn discover_ip_by_mac(mac: &MacAddress, duration: Duration) -> Result<IpAddr> {
    BeaconListener::bind(&ListenConfig::default())
        .await?
        .resolve_ip(mac, duration)
        .await
}

/// Prints a table of beacons with the age of the last one per MAC.
pub fn pretty_print_beacons(beacons: &BeaconTable) {
    let now = Local::now();
    let max_mac_width = max("MAC Address".len(), MAC_LENGTH);
    let max_ip_width = beacons
        .values()
        .map(|b| b.source_ip.to_string().len())
        .chain(std::iter::once("IP Address".len()))
        .max()
        .unwrap_or(0);
    let max_series_width = beacons
        .values()
        .map(|b| max(b.series_or_unknown().len(), "Series".len()))
        .max()
        .unwrap_or("Series".len());

    println!(
        "{:<mac_width$} {:<ip_width$} {:<series_width$} Last Seen",
        "MAC Address",
        "IP Address",
        "Series",
        mac_width = max_mac_width + 2,
        ip_width = max_ip_width + 2,
        series_width = max_series_width + 2,
    );
    println!(
        "{:<mac_width$} {:<ip_width$} {:<series_width$} ---------",
        "-".repeat(max_mac_width),
        "-".repeat(max_ip_width),
        "-".repeat(max_series_width),
        mac_width = max_mac_width + 2,
        ip_width = max_ip_width + 2,
        series_width = max_series_width + 2,
    );

    for beacon in beacons.values() {
        let age = (now - beacon.last_seen).num_milliseconds() as f64 / 1000.0;
        println!(
            "{:<mac_width$} {:<ip_width$} {:<series_width$} {:.1}s ago",
            beacon.mac,
            beacon.source_ip,
            beacon.series_or_unknown(),
            age,
            mac_width = max_mac_width + 2,
            ip_width = max_ip_width + 2,
            series_width = max_series_width + 2,
        );
    }
}
