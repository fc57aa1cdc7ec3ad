//! Network transports for published results.

pub mod mqtt;

pub use mqtt::{parse_mqtt_endpoint, MqttEndpoint, MqttSinkConfig, MqttTelemetrySink};
