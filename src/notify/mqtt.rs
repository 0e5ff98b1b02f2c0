//! MQTT event publishing.
//!
//! Each committed event is published as its JSON record to
//! `{topic}/{camera}/{type}` at QoS 1. `mqtts://` broker addresses use TLS.

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::MqttSettings;
use crate::store::{sanitize_camera_name, EventRecord};

use super::Notifier;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

struct MqttRuntime {
    client: Client,
    shutdown: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttRuntime {
    fn new(client: Client, mut connection: Connection) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        std::thread::sleep(RECONNECT_DELAY);
                    }
                }
            }
        });

        Self {
            client,
            shutdown,
            connection_handle: Some(handle),
        }
    }
}

impl Drop for MqttRuntime {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect failed: {}", e);
        }
        // The connection thread exits on its next event; do not wait for it.
        self.connection_handle.take();
    }
}

pub struct MqttNotifier {
    runtime: MqttRuntime,
    topic: String,
}

impl MqttNotifier {
    /// Start a client for the broker in `settings`. Connection happens in the
    /// background and is retried, so an unreachable broker is not an error
    /// here.
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_broker_addr(&settings.broker_addr)?;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 10);
        log::info!(
            "MQTT notifier publishing to {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some()
        );
        Ok(Self {
            runtime: MqttRuntime::new(client, connection),
            topic: settings.topic.trim_end_matches('/').to_string(),
        })
    }
}

impl Notifier for MqttNotifier {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn notify(&self, record: &EventRecord) -> Result<()> {
        let payload = serde_json::to_vec(record).context("serialize event record")?;
        let topic = event_topic(&self.topic, record);
        self.runtime
            .client
            .publish(topic.clone(), QoS::AtLeastOnce, false, payload)
            .with_context(|| format!("publish to {}", topic))?;
        Ok(())
    }
}

fn event_topic(prefix: &str, record: &EventRecord) -> String {
    format!(
        "{}/{}/{}",
        prefix,
        sanitize_camera_name(&record.camera),
        record.detection_type
    )
}

#[derive(Debug, PartialEq, Eq)]
struct BrokerEndpoint {
    host: String,
    port: u16,
    use_tls: bool,
}

fn parse_broker_addr(addr: &str) -> Result<BrokerEndpoint> {
    let (rest, use_tls, default_port) = if let Some(rest) = addr.strip_prefix("mqtts://") {
        (rest, true, 8883)
    } else if let Some(rest) = addr.strip_prefix("mqtt://") {
        (rest, false, 1883)
    } else {
        (addr, false, 1883)
    };
    if rest.is_empty() {
        return Err(anyhow!("empty MQTT broker address"));
    }
    let (host, port) = split_host_port(rest, default_port)?;
    Ok(BrokerEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str, default_port: u16) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port.parse().context("invalid MQTT port")?,
            None => default_port,
        };
        return Ok((host.to_string(), port));
    }

    match addr.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port.parse().context("invalid MQTT port")?;
            Ok((host.to_string(), port))
        }
        None => Ok((addr.to_string(), default_port)),
    }
}
