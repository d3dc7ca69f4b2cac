// mqtt.rs

use std::{
    mem,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    sync::Arc,
};

use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::time::{sleep, Duration};
use tracing::*;

use crate::MqttConfig;

/// Broker handshake / keep-alive window.
pub const MQTT_KEEPALIVE_SECS: u64 = 60;

/// How long connect() waits for the CONNACK before reporting failure.
const CONNACK_SETTLE_MS: u64 = 500;

const EVENT_CAPACITY: usize = 16;

/// One received message, as appended by the background receive loop.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received: DateTime<Local>,
}

/// Thin reconnect-on-demand wrapper around the MQTT client. Publish never
/// propagates transport errors as panics; callers get a Result and keep
/// their loop running. Subscriptions do not survive a reconnect, so callers
/// that subscribe must re-subscribe after any reconnect they trigger.
pub struct MqttBridge {
    host: String,
    port: u16,
    client_id: String,
    client: Mutex<Option<AsyncClient>>,
    connected: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    queue: Arc<Mutex<Vec<InboundMessage>>>,
}

impl MqttBridge {
    pub fn new(cfg: &MqttConfig) -> Self {
        MqttBridge {
            host: cfg.server_url.clone(),
            port: cfg.server_port,
            client_id: format!("hydromon-{}", std::process::id()),
            client: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            queue: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Monotonic connection counter, bumped by every connect() attempt.
    /// Subscriptions ride on one connection only, so callers compare this
    /// against the generation they last subscribed under to know when a
    /// re-subscribe is needed, including reconnects that publish() made
    /// on their behalf.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Build a fresh client and start its background receive loop. The
    /// generation counter keeps a superseded receive loop from clearing
    /// the connected flag out from under a newer connection.
    pub async fn connect(&self) -> Result<()> {
        info!("MQTT connecting to {}:{}...", self.host, self.port);
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.connected.store(false, Ordering::SeqCst);

        let mut opts = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        opts.set_keep_alive(Duration::from_secs(MQTT_KEEPALIVE_SECS));
        let (client, mut eventloop) = AsyncClient::new(opts, EVENT_CAPACITY);
        *self.client.lock() = Some(client);

        let connected = self.connected.clone();
        let generation = self.generation.clone();
        let queue = self.queue.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // a late CONNACK for a superseded connection must
                        // not mark the newer one connected
                        if generation.load(Ordering::SeqCst) != gen {
                            debug!("MQTT receive loop superseded, exiting.");
                            break;
                        }
                        info!("MQTT connected.");
                        connected.store(true, Ordering::SeqCst);
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        if generation.load(Ordering::SeqCst) != gen {
                            debug!("MQTT receive loop superseded, exiting.");
                            break;
                        }
                        debug!("MQTT received: {}", p.topic);
                        queue.lock().push(InboundMessage {
                            topic: p.topic.clone(),
                            payload: p.payload.to_vec(),
                            received: Local::now(),
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection closed: {e}");
                        if generation.load(Ordering::SeqCst) == gen {
                            connected.store(false, Ordering::SeqCst);
                        }
                        break;
                    }
                }
            }
        });

        sleep(Duration::from_millis(CONNACK_SETTLE_MS)).await;
        if !self.is_connected() {
            bail!("failed to connect to MQTT broker {}:{}", self.host, self.port);
        }
        Ok(())
    }

    /// Publish with qos 2 / retained, reconnecting first if the connection
    /// has dropped.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            self.connect().await?;
        }
        let client = self.client.lock().clone();
        let Some(client) = client else {
            bail!("MQTT client not initialized");
        };
        client
            .publish(topic, QoS::ExactlyOnce, true, payload)
            .await?;
        debug!("MQTT published to {topic}");
        Ok(())
    }

    /// Register interest in a topic on the current connection only; the
    /// receive loop queues matching messages for drain().
    pub async fn subscribe(&self, topic: &str) -> Result<()> {
        let client = self.client.lock().clone();
        let Some(client) = client else {
            bail!("subscribe before connect");
        };
        client.subscribe(topic, QoS::AtLeastOnce).await?;
        info!("MQTT subscribed to {topic}");
        Ok(())
    }

    /// Atomically take everything received since the previous drain, in
    /// receipt order.
    pub fn drain(&self) -> Vec<InboundMessage> {
        mem::take(&mut *self.queue.lock())
    }
}

/// Join topic parts with single slashes, stripping each part's own
/// leading/trailing slashes first.
pub fn topic_join<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(|p| p.as_ref().trim_matches('/'))
        .collect::<Vec<_>>()
        .join("/")
}

/// Topic for outbound telemetry: base / hostname-or-configured-name / sensor.
pub fn sensor_topic(cfg: &MqttConfig) -> String {
    let node = if cfg.use_host_name_in_mqtt_topic {
        hostname()
    } else {
        cfg.not_host_name.clone()
    };
    topic_join(&[cfg.base_topic.as_str(), node.as_str(), cfg.sensor_topic.as_str()])
}

pub fn hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| "localhost".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MonitorConfig, MonitorKind};

    #[test]
    fn topic_join_strips_stray_slashes() {
        let joined = topic_join(&["lettuce_box/", "/seedling_box", "fan_1/rpm/"]);
        assert_eq!(joined, "lettuce_box/seedling_box/fan_1/rpm");
    }

    #[test]
    fn sensor_topic_uses_configured_name() {
        let cfg = MonitorConfig::default_for(MonitorKind::Tank).mqtt;
        assert_eq!(
            sensor_topic(&cfg),
            "hydro_tank_monitor/hydrofarm_tank1/last_sensor_data"
        );
    }

    #[test]
    fn drain_empties_the_queue_in_order() {
        let cfg = MonitorConfig::default_for(MonitorKind::Tank).mqtt;
        let bridge = MqttBridge::new(&cfg);
        for i in 0..3 {
            bridge.queue.lock().push(InboundMessage {
                topic: format!("t/{i}"),
                payload: vec![i],
                received: Local::now(),
            });
        }
        let drained = bridge.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].topic, "t/0");
        assert_eq!(drained[2].payload, vec![2]);
        assert!(bridge.drain().is_empty());
    }
}

// EOF
