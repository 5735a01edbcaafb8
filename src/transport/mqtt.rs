//! rumqttc-backed broker link.
//!
//! The synchronous v5 client is split in two: [`MqttLink`] (cloneable handle
//! used by the session loop to publish and subscribe) and the `Connection`,
//! which must be polled continuously by [`spawn_pump`]. The pump forwards
//! connection events to the session loop; rumqttc reconnects on the next poll
//! after an error, and each new CONNACK is reported as `LinkEvent::Connected`
//! so the caller can rebuild its subscriptions (clean start drops them).

use anyhow::Result;
use rand::RngCore;
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, Incoming, MqttOptions};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{BrokerEndpoint, BrokerLink, LinkEvent, TlsMaterials};

const REQUEST_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub endpoint: BrokerEndpoint,
    pub tls: TlsMaterials,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl MqttSettings {
    /// Client ids must be unique per broker; two consoles with the same id
    /// would keep kicking each other off.
    pub fn unique_client_id(prefix: &str) -> String {
        let mut bytes = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("{}-{:08x}", prefix, u32::from_le_bytes(bytes))
    }
}

#[derive(Clone)]
pub struct MqttLink {
    client: Client,
}

impl MqttLink {
    pub fn connect(settings: &MqttSettings) -> Result<(Self, Connection)> {
        let mut options = MqttOptions::new(
            settings.client_id.as_str(),
            settings.endpoint.host.as_str(),
            settings.endpoint.port,
        );
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(settings.endpoint.transport(&settings.tls)?);

        let (client, connection) = Client::new(options, REQUEST_CHANNEL_CAPACITY);
        log::info!(
            "MQTT client {} configured for {}:{} (TLS: {}, auth: {})",
            settings.client_id,
            settings.endpoint.host,
            settings.endpoint.port,
            settings.endpoint.use_tls,
            settings.username.is_some()
        );
        Ok((Self { client }, connection))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.client.disconnect()?;
        Ok(())
    }
}

impl BrokerLink for MqttLink {
    fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)?;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.client.subscribe(topic, QoS::AtLeastOnce)?;
        Ok(())
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<()> {
        self.client.unsubscribe(topic)?;
        Ok(())
    }
}

/// Poll `connection` on a dedicated thread. `forward` returns `false` once
/// the receiving side has gone away, which stops the pump.
pub fn spawn_pump<F>(mut connection: Connection, backoff: Duration, mut forward: F) -> JoinHandle<()>
where
    F: FnMut(LinkEvent) -> bool + Send + 'static,
{
    std::thread::spawn(move || {
        for event in connection.iter() {
            let keep_going = match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    log::info!("MQTT session established");
                    forward(LinkEvent::Connected)
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    match std::str::from_utf8(&publish.topic) {
                        Ok(topic) => forward(LinkEvent::Message {
                            topic: topic.to_string(),
                            payload: publish.payload.to_vec(),
                        }),
                        Err(e) => {
                            log::warn!("skipping publish with non-UTF-8 topic: {}", e);
                            true
                        }
                    }
                }
                Ok(_) => true,
                Err(e) => {
                    log::error!(
                        "MQTT connection error: {}. Reconnecting in {}s...",
                        e,
                        backoff.as_secs()
                    );
                    let keep_going = forward(LinkEvent::Disconnected(e.to_string()));
                    if keep_going {
                        std::thread::sleep(backoff);
                    }
                    keep_going
                }
            };
            if !keep_going {
                break;
            }
        }
        log::debug!("MQTT pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_client_ids_differ() {
        let a = MqttSettings::unique_client_id("vision_console");
        let b = MqttSettings::unique_client_id("vision_console");
        assert!(a.starts_with("vision_console-"));
        assert_eq!(a.len(), "vision_console-".len() + 8);
        assert_ne!(a, b);
    }
}
