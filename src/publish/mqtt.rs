//! MQTT transport for output messages.
//!
//! Messages go out as JSON with QoS 1. Consumers announce themselves with a
//! retained `online` payload on `<topic>/presence/<consumer-id>` and set
//! `offline` as their last will; the connection thread keeps a live set of
//! consumers per watched topic from those announcements.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Event, Incoming, MqttOptions};

use super::{OutputMessage, Publisher};
use crate::config::MqttSettings;

pub const PRESENCE_ONLINE: &str = "online";
pub const PRESENCE_OFFLINE: &str = "offline";
const PRESENCE_SEGMENT: &str = "/presence/";

type PresenceMap = Arc<Mutex<HashMap<String, HashSet<String>>>>;

pub struct MqttPublisher {
    client: Client,
    status_topic: String,
    presence: PresenceMap,
    stopping: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// Connect to the broker and start tracking consumers of `watched_topics`.
    pub fn connect(settings: &MqttSettings, watched_topics: &[&str]) -> Result<Self> {
        let (host, port) = split_host_port(&settings.broker_addr)?;
        let mut options = MqttOptions::new(settings.client_id.as_str(), host.as_str(), port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(5)));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            settings.status_topic.as_str(),
            PRESENCE_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));

        let (client, mut connection) = Client::new(options, 32);

        for topic in watched_topics {
            client
                .subscribe(presence_filter(topic), QoS::AtLeastOnce)
                .with_context(|| format!("failed to subscribe to presence of {}", topic))?;
        }

        let presence: PresenceMap = Arc::new(Mutex::new(HashMap::new()));
        let stopping = Arc::new(AtomicBool::new(false));
        let thread_presence = presence.clone();
        let thread_stopping = stopping.clone();
        std::thread::Builder::new()
            .name("mqtt-connection".to_string())
            .spawn(move || {
                for event in connection.iter() {
                    match event {
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let topic = match std::str::from_utf8(&publish.topic) {
                                Ok(topic) => topic,
                                Err(e) => {
                                    log::warn!("skipping publish with invalid topic: {}", e);
                                    continue;
                                }
                            };
                            record_presence(&thread_presence, topic, &publish.payload);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            if thread_stopping.load(Ordering::SeqCst) {
                                break;
                            }
                            log::warn!("MQTT connection error: {}. Retrying...", e);
                            std::thread::sleep(Duration::from_secs(1));
                        }
                    }
                }
            })
            .context("failed to spawn MQTT connection thread")?;

        log::info!(
            "connected to MQTT broker {} as {}",
            settings.broker_addr,
            settings.client_id
        );

        let publisher = Self {
            client,
            status_topic: settings.status_topic.clone(),
            presence,
            stopping,
        };
        publisher.publish_raw(&publisher.status_topic, PRESENCE_ONLINE.as_bytes(), true)?;
        Ok(publisher)
    }

    fn publish_raw(&self, topic: &str, payload: &[u8], retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .with_context(|| format!("MQTT publish to {} failed", topic))?;
        Ok(())
    }

    /// Mark the node offline and stop the connection thread.
    pub fn disconnect(mut self) -> Result<()> {
        self.close()
    }

    fn close(&mut self) -> Result<()> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.publish_raw(&self.status_topic, PRESENCE_OFFLINE.as_bytes(), true)?;
        self.client
            .disconnect()
            .context("failed to disconnect from MQTT broker")?;
        log::info!("disconnected from MQTT broker");
        Ok(())
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("MQTT shutdown failed: {:#}", e);
        }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&mut self, topic: &str, message: &OutputMessage) -> Result<()> {
        let payload = message.to_json()?;
        self.publish_raw(topic, &payload, false)
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        match self.presence.lock() {
            Ok(presence) => presence.get(topic).map_or(0, HashSet::len),
            Err(poisoned) => poisoned.into_inner().get(topic).map_or(0, HashSet::len),
        }
    }
}

fn presence_filter(topic: &str) -> String {
    format!("{}{}+", topic, PRESENCE_SEGMENT)
}

/// Split `<topic>/presence/<consumer>` into its parts.
fn parse_presence_topic(topic: &str) -> Option<(&str, &str)> {
    let (watched, consumer) = topic.rsplit_once(PRESENCE_SEGMENT)?;
    if watched.is_empty() || consumer.is_empty() || consumer.contains('/') {
        return None;
    }
    Some((watched, consumer))
}

fn record_presence(presence: &PresenceMap, topic: &str, payload: &[u8]) {
    let Some((watched, consumer)) = parse_presence_topic(topic) else {
        log::debug!("ignoring non-presence publish on {}", topic);
        return;
    };
    let online = payload == PRESENCE_ONLINE.as_bytes();
    let mut presence = match presence.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let consumers = presence.entry(watched.to_string()).or_default();
    if online {
        if consumers.insert(consumer.to_string()) {
            log::info!("consumer {} is listening on {}", consumer, watched);
        }
    } else if consumers.remove(consumer) {
        log::info!("consumer {} left {}", consumer, watched);
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let trimmed = addr
        .trim()
        .trim_start_matches("mqtt://")
        .trim_start_matches("tcp://");
    let (host, port) = trimmed
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("MQTT broker address '{}' must be host:port", addr))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(anyhow!("MQTT broker address '{}' has an empty host", addr));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("MQTT broker address '{}' has an invalid port", addr))?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_topics_parse() {
        assert_eq!(
            parse_presence_topic("human/marker/presence/rviz-1"),
            Some(("human/marker", "rviz-1"))
        );
        assert_eq!(parse_presence_topic("human/marker"), None);
        assert_eq!(parse_presence_topic("/presence/x"), None);
        assert_eq!(parse_presence_topic("a/presence/b/c"), None);
        assert_eq!(presence_filter("human/marker"), "human/marker/presence/+");
    }

    #[test]
    fn presence_tracks_online_and_offline() {
        let presence: PresenceMap = Arc::new(Mutex::new(HashMap::new()));
        record_presence(&presence, "human/marker/presence/a", b"online");
        record_presence(&presence, "human/marker/presence/b", b"online");
        record_presence(&presence, "human/marker/presence/a", b"online");
        assert_eq!(presence.lock().unwrap()["human/marker"].len(), 2);

        record_presence(&presence, "human/marker/presence/a", b"offline");
        record_presence(&presence, "human/marker/presence/b", b"");
        assert!(presence.lock().unwrap()["human/marker"].is_empty());
    }

    #[test]
    fn broker_address_parsing() {
        assert_eq!(
            split_host_port("127.0.0.1:1883").unwrap(),
            ("127.0.0.1".to_string(), 1883)
        );
        assert_eq!(
            split_host_port("mqtt://broker.local:8883").unwrap(),
            ("broker.local".to_string(), 8883)
        );
        assert_eq!(split_host_port("[::1]:1883").unwrap(), ("::1".to_string(), 1883));
        assert!(split_host_port("broker").is_err());
        assert!(split_host_port(":1883").is_err());
        assert!(split_host_port("broker:http").is_err());
    }
}
