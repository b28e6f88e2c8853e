use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, trace};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::control_interface::{send_command, Command};
use crate::state::payload::StatePayload;
use crate::util::error::Result;
use crate::util::socket::{bind_reusable, poll_recv, ListenConfig, Received};

pub const DEFAULT_LISTEN_DURATION: Duration = Duration::from_secs(6);
pub const DEFAULT_POKE_DELAY: Duration = Duration::from_secs(1);

/// A command sent once, `delay` into a listen window, to make the fan broadcast
/// its state. Fans emit a state update after processing any command.
#[derive(Debug, Clone, PartialEq)]
pub struct Poke {
    pub command: Command,
    pub target: SocketAddr,
    pub delay: Duration,
}

impl Poke {
    pub fn new(command: Command, target: SocketAddr) -> Self {
        Poke {
            command,
            target,
            delay: DEFAULT_POKE_DELAY,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A decoded state broadcast and where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateUpdate {
    pub source: SocketAddr,
    pub payload: StatePayload,
}

/// Listens for state broadcasts on the discovery port.
pub struct StateListener {
    socket: UdpSocket,
    poll_interval: Duration,
    recv_buffer_size: usize,
}

impl StateListener {
    pub async fn bind(config: &ListenConfig) -> Result<Self> {
        let socket = bind_reusable(config.bind_addr)?;
        Ok(StateListener {
            socket,
            poll_interval: config.poll_interval,
            recv_buffer_size: config.recv_buffer_size,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Returns the most recent state update matching `device_filter`, or `None`
    /// if none arrived within `duration`.
    pub async fn listen(
        self,
        duration: Duration,
        device_filter: Option<&str>,
        poke: Option<Poke>,
    ) -> Result<Option<StateUpdate>> {
        self.listen_with(duration, device_filter, poke, |_| {}).await
    }

    /// Like [`Self::listen`], calling `on_update` for each matching update as it arrives.
    ///
    /// With a poke, the first matching update received after the poke was sent
    /// ends the listen early.
    pub async fn listen_with<F>(
        self,
        duration: Duration,
        device_filter: Option<&str>,
        poke: Option<Poke>,
        mut on_update: F,
    ) -> Result<Option<StateUpdate>>
    where
        F: FnMut(&StateUpdate),
    {
        let mut buffer = vec![0u8; self.recv_buffer_size];
        let start = Instant::now();
        let deadline = start + duration;
        let mut pending_poke = poke;
        let mut poked = false;
        let mut latest: Option<StateUpdate> = None;

        while Instant::now() < deadline {
            if let Some(poke) = pending_poke.as_ref() {
                if Instant::now() >= start + poke.delay {
                    send_command(poke.target, &poke.command).await?;
                    info!("Sent poke command {} to {}", poke.command, poke.target);
                    pending_poke = None;
                    poked = true;
                }
            }

            // Wake up for the poke even when the fan is silent.
            let wait_until = match pending_poke.as_ref() {
                Some(poke) => deadline.min(start + poke.delay),
                None => deadline,
            };

            let (len, source) =
                match poll_recv(&self.socket, &mut buffer, wait_until, self.poll_interval).await {
                    Received::Datagram { len, source } => (len, source),
                    Received::Idle => continue,
                };

            let Some(payload) = StatePayload::from_datagram(&buffer[..len]) else {
                trace!("Ignoring non-state datagram from {}", source);
                continue;
            };

            if let Some(device_id) = device_filter {
                if !payload.matches_device(device_id) {
                    debug!("Skipping state update from device {}", payload.device_id);
                    continue;
                }
            }

            let update = StateUpdate { source, payload };
            info!(
                "State from {} device_id={}: {}",
                update.source, update.payload.device_id, update.payload.status
            );
            on_update(&update);
            latest = Some(update);

            if poked {
                break;
            }
        }

        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL: Duration = Duration::from_millis(50);

    fn test_config() -> ListenConfig {
        let _ = env_logger::builder().is_test(true).try_init();
        ListenConfig {
            poll_interval: POLL,
            ..ListenConfig::default()
        }
        .with_bind_addr("127.0.0.1:0".parse().unwrap())
    }

    fn state_datagram(device_id: &str, state_string: &str) -> Vec<u8> {
        let json = serde_json::json!({
            "device_id": device_id,
            "message_id": "7",
            "state_string": state_string,
        });
        hex::encode(json.to_string()).into_bytes()
    }

    #[tokio::test]
    async fn test_last_matching_update_wins() {
        let listener = StateListener::bind(&test_config()).await.unwrap();
        let target = listener.local_addr().unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for datagram in [
            state_datagram("10b41d181e58", "17,END"),
            b"garbage".to_vec(),
            state_datagram("aabbccddeeff", "20,END"),
            state_datagram("10B41D181E58", "0x33,END"),
            b"10B41D181E58Renesa".to_vec(),
        ] {
            sender.send_to(&datagram, target).await.unwrap();
        }

        let mut count = 0;
        let latest = listener
            .listen_with(Duration::from_millis(300), Some("10b41d181e58"), None, |_| {
                count += 1
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(latest.payload.status.value, 0x33);
        assert!(latest.payload.status.power);
        assert!(latest.payload.status.led);
        assert_eq!(latest.payload.status.speed, 3);
        assert_eq!(latest.source, sender.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_no_updates_returns_none() {
        let listener = StateListener::bind(&test_config()).await.unwrap();
        let latest = listener
            .listen(Duration::from_millis(150), None, None)
            .await
            .unwrap();
        assert!(latest.is_none());
    }

    #[tokio::test]
    async fn test_unresponsive_poke_waits_out_deadline() {
        let listener = StateListener::bind(&test_config()).await.unwrap();
        let silent_fan = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let poke = Poke::new(Command::speed(2).unwrap(), silent_fan.local_addr().unwrap())
            .with_delay(Duration::from_millis(50));

        let duration = Duration::from_millis(400);
        let start = Instant::now();
        let latest = listener.listen(duration, None, Some(poke)).await.unwrap();
        assert!(latest.is_none());
        assert!(start.elapsed() >= duration);

        let mut buffer = [0u8; 64];
        let (len, _) = silent_fan.recv_from(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..len], br#"{"speed":2}"#);
    }

    #[tokio::test]
    async fn test_pre_poke_update_does_not_end_listen() {
        let listener = StateListener::bind(&test_config()).await.unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(
                &state_datagram("10b41d181e58", "17,END"),
                listener.local_addr().unwrap(),
            )
            .await
            .unwrap();

        let silent_fan = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let poke = Poke::new(Command::led(true), silent_fan.local_addr().unwrap())
            .with_delay(Duration::from_millis(200));

        let duration = Duration::from_millis(500);
        let start = Instant::now();
        let latest = listener.listen(duration, None, Some(poke)).await.unwrap();

        assert!(start.elapsed() >= duration);
        assert_eq!(latest.unwrap().payload.status.value, 17);
        let mut buffer = [0u8; 64];
        let (len, _) = silent_fan.recv_from(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..len], br#"{"led":true}"#);
    }

    #[tokio::test]
    async fn test_poke_after_window_is_never_sent() {
        let listener = StateListener::bind(&test_config()).await.unwrap();
        let silent_fan = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let poke = Poke::new(Command::power(false), silent_fan.local_addr().unwrap())
            .with_delay(Duration::from_millis(900));

        let latest = listener
            .listen(Duration::from_millis(300), None, Some(poke))
            .await
            .unwrap();
        assert!(latest.is_none());

        let mut buffer = [0u8; 64];
        let received =
            tokio::time::timeout(Duration::from_millis(800), silent_fan.recv_from(&mut buffer))
                .await;
        assert!(received.is_err(), "poke was sent after the window closed");
    }

    #[tokio::test]
    async fn test_poke_response_ends_listen_early() {
        let listener = StateListener::bind(&test_config()).await.unwrap();
        let listener_addr = listener.local_addr().unwrap();
        let fan = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let fan_addr = fan.local_addr().unwrap();

        // A fake fan that broadcasts its state after receiving a command.
        let fan_task = tokio::spawn(async move {
            let mut buffer = [0u8; 128];
            let (len, _) = fan.recv_from(&mut buffer).await.unwrap();
            let command = String::from_utf8(buffer[..len].to_vec()).unwrap();
            fan.send_to(&state_datagram("10b41d181e58", "0x35,1,B,END"), listener_addr)
                .await
                .unwrap();
            command
        });

        let poke = Poke::new(Command::power(true), fan_addr).with_delay(Duration::from_millis(20));
        let duration = Duration::from_secs(5);
        let start = Instant::now();
        let latest = listener
            .listen(duration, Some("10B41D181E58"), Some(poke))
            .await
            .unwrap()
            .unwrap();

        assert!(start.elapsed() < duration);
        assert_eq!(latest.payload.status.speed, 5);
        assert_eq!(latest.payload.state_string, "0x35,1,B,END");
        assert_eq!(fan_task.await.unwrap(), r#"{"power":true}"#);
    }
}
