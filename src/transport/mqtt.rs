//! JSON-over-MQTT telemetry sink.
//!
//! Publishes one `TelemetrySnapshot` per frame to `{prefix}/{camera}/telemetry`
//! and keeps a retained availability flag on `{prefix}/{camera}/status`, with
//! a last will that flips it to `offline` if the daemon drops off the broker.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, MqttOptions};
use rumqttc::Transport;

use crate::camera::CameraId;
use crate::publish::{FrameReport, ResultSink};

pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Broker address split into parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MqttSinkConfig {
    /// `host:port`, optionally prefixed with `mqtt://` or `mqtts://`.
    pub broker: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub use_tls: bool,
    /// Publish cap; `None` publishes every frame.
    pub max_rate_hz: Option<f64>,
}

/// Parse `host:port`, `[v6]:port` or a `mqtt://`/`mqtts://` URL.
pub fn parse_mqtt_endpoint(addr: &str, tls_override: bool) -> Result<MqttEndpoint> {
    let mut use_tls = tls_override;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid MQTT port in {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid MQTT port in {}", addr))?;
    Ok((host.to_string(), port))
}

pub fn telemetry_topic(prefix: &str, camera: &CameraId) -> String {
    format!("{}/{}/telemetry", prefix.trim_end_matches('/'), camera)
}

pub fn status_topic(prefix: &str, camera: &CameraId) -> String {
    format!("{}/{}/status", prefix.trim_end_matches('/'), camera)
}

pub struct MqttTelemetrySink {
    client: Client,
    connection_handle: Option<std::thread::JoinHandle<()>>,
    telemetry_topic: String,
    status_topic: String,
    max_rate_hz: Option<f64>,
}

impl MqttTelemetrySink {
    pub fn connect(config: &MqttSinkConfig, camera: &CameraId) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&config.broker, config.use_tls)?;
        let status_topic = status_topic(&config.topic_prefix, camera);
        let client_id = format!("{}-{}", config.client_id, camera);

        let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);
        if let Some(user) = config.username.as_deref() {
            options.set_credentials(user, config.password.clone().unwrap_or_default());
        }
        options.set_last_will(LastWill::new(
            status_topic.as_str(),
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
            None,
        ));
        options.set_transport(if endpoint.use_tls {
            Transport::tls_with_default_config()
        } else {
            Transport::tcp()
        });

        let (client, connection) = Client::new(options, 16);
        let connection_handle = std::thread::Builder::new()
            .name(format!("aimpoint-mqtt-{}", camera))
            .spawn(move || drive_connection(connection))
            .context("spawn MQTT connection thread")?;
        client.publish(
            status_topic.as_str(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_ONLINE.as_bytes().to_vec(),
        )?;
        log::info!(
            "camera {}: MQTT telemetry to {}:{} (TLS: {}, auth: {})",
            camera,
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            config.username.is_some()
        );

        Ok(Self {
            client,
            connection_handle: Some(connection_handle),
            telemetry_topic: telemetry_topic(&config.topic_prefix, camera),
            status_topic,
            max_rate_hz: config.max_rate_hz,
        })
    }
}

fn drive_connection(mut connection: Connection) {
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                log::warn!("MQTT connection error: {}", e);
                break;
            }
        }
    }
}

impl ResultSink for MqttTelemetrySink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn max_rate_hz(&self) -> Option<f64> {
        self.max_rate_hz
    }

    fn publish(&mut self, report: &FrameReport) -> Result<()> {
        let payload = serde_json::to_vec(&report.telemetry())?;
        // Never block the sink thread on a full request queue; a stale frame
        // is worthless anyway.
        self.client
            .try_publish(self.telemetry_topic.as_str(), QoS::AtMostOnce, false, payload)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.client.try_publish(
            self.status_topic.as_str(),
            QoS::AtLeastOnce,
            true,
            PAYLOAD_OFFLINE.as_bytes().to_vec(),
        );
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_url_endpoints() -> Result<()> {
        let plain = parse_mqtt_endpoint("10.0.0.2:1883", false)?;
        assert_eq!(plain.host, "10.0.0.2");
        assert_eq!(plain.port, 1883);
        assert!(!plain.use_tls);

        let tls = parse_mqtt_endpoint("mqtts://broker.local:8883", false)?;
        assert!(tls.use_tls);
        assert_eq!(tls.host, "broker.local");

        let v6 = parse_mqtt_endpoint("[::1]:1883", true)?;
        assert_eq!(v6.host, "::1");
        assert!(v6.use_tls);
        Ok(())
    }

    #[test]
    fn rejects_bad_endpoints() {
        assert!(parse_mqtt_endpoint("broker.local", false).is_err());
        assert!(parse_mqtt_endpoint("ws://broker:80", false).is_err());
        assert!(parse_mqtt_endpoint("broker:notaport", false).is_err());
        assert!(parse_mqtt_endpoint(":1883", false).is_err());
    }

    #[test]
    fn topics_are_per_camera() {
        let camera = CameraId::new("Front Cam");
        assert_eq!(telemetry_topic("aimpoint/", &camera), "aimpoint/front_cam/telemetry");
        assert_eq!(status_topic("aimpoint", &camera), "aimpoint/front_cam/status");
    }
}
