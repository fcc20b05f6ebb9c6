//! Service configuration
//!
//! One YAML file describes the whole process: the stations it controls
//! (one, or a pair sharing an exit), the broker, and the timing, transport
//! and routing tunables. Every tunable has a deployment default; a minimal
//! config is just the station hosts.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StationError};
use crate::identity::StationIdentity;

/// Station service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Service name used in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// MQTT broker for telemetry, commands and routing
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Stations driven by this process, at most two
    pub stations: Vec<StationConfig>,

    /// Wire the two stations' interlocks crosswise. Ignored for a single
    /// station, which always runs standalone.
    #[serde(default = "default_true")]
    pub paired: bool,

    /// Cycle timing tunables
    #[serde(default)]
    pub timing: TimingConfig,

    /// Register transport tunables
    #[serde(default)]
    pub transport: TransportConfig,

    /// Depth of the routing channel between stations and the publisher
    #[serde(default = "default_routing_queue")]
    pub routing_queue: usize,
}

/// MQTT broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default = "default_service_name")]
    pub client_id: String,
}

/// One station's PLC node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Modbus TCP host, an IPv4 address in the deployed cell
    pub host: String,

    #[serde(default = "default_modbus_port")]
    pub port: u16,

    /// Explicit station tag; when unset the tag derives from `host`
    #[serde(default)]
    pub identity: Option<String>,

    /// Base address of the sensor word
    #[serde(default = "default_input_base")]
    pub input_base: u16,

    /// Base address of the actuator word
    #[serde(default = "default_output_base")]
    pub output_base: u16,
}

/// Cycle timing, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Idle poll while waiting for a workpiece
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Poll while waiting for a physical confirmation
    #[serde(default = "default_fast_poll_ms")]
    pub fast_poll_ms: u64,

    /// Turntable index pulse width
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u64,

    /// Cooperative delay on cycles that skip drilling
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Fixed per-drill time booked into the drill-seconds counter
    #[serde(default = "default_drill_measure_ms")]
    pub drill_measure_ms: u64,

    /// Deadline for any single physical confirmation
    #[serde(default = "default_sensor_wait_ms")]
    pub sensor_wait_ms: u64,
}

/// Register transport tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Deadline per connect and per request
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,

    /// Modbus unit identifier
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,

    /// Total tries for one read-modify-write
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,

    /// Pause between tries
    #[serde(default = "default_write_backoff_ms")]
    pub write_backoff_ms: u64,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            StationError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stations.is_empty() {
            return Err(StationError::config("no stations configured"));
        }
        if self.stations.len() > 2 {
            return Err(StationError::config(format!(
                "{} stations configured, a process drives at most a pair",
                self.stations.len()
            )));
        }
        if self.transport.write_attempts == 0 {
            return Err(StationError::config("transport.write_attempts must be at least 1"));
        }
        if self.routing_queue == 0 {
            return Err(StationError::config("routing_queue must be at least 1"));
        }

        let mut tags = Vec::new();
        for station in &self.stations {
            station.socket_addr()?;
            let identity = station.resolve_identity()?;
            if tags.contains(&identity) {
                return Err(StationError::config(format!(
                    "duplicate station identity '{}'",
                    identity
                )));
            }
            tags.push(identity);
        }
        Ok(())
    }

    /// Paired operation needs exactly two stations; anything else runs
    /// standalone regardless of the flag.
    pub fn effective_paired(&self) -> bool {
        self.paired && self.stations.len() == 2
    }
}

impl StationConfig {
    pub fn resolve_identity(&self) -> Result<StationIdentity> {
        if let Some(tag) = &self.identity {
            return Ok(StationIdentity::new(tag.clone()));
        }
        StationIdentity::from_bus_host(&self.host).ok_or_else(|| {
            StationError::config(format!(
                "cannot derive a station identity from host '{}'; set identity explicitly",
                self.host
            ))
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.host.parse().map_err(|e| {
            StationError::config(format!(
                "station host '{}' is not an IP literal: {}",
                self.host, e
            ))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl TimingConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn fast_poll(&self) -> Duration {
        Duration::from_millis(self.fast_poll_ms)
    }

    pub fn pulse(&self) -> Duration {
        Duration::from_millis(self.pulse_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn drill_measure(&self) -> Duration {
        Duration::from_millis(self.drill_measure_ms)
    }

    pub fn sensor_wait(&self) -> Duration {
        Duration::from_millis(self.sensor_wait_ms)
    }
}

impl TransportConfig {
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    pub fn write_backoff(&self) -> Duration {
        Duration::from_millis(self.write_backoff_ms)
    }
}

fn default_service_name() -> String {
    "stationsrv".to_string()
}

fn default_true() -> bool {
    true
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_modbus_port() -> u16 {
    502
}

fn default_input_base() -> u16 {
    8001
}

fn default_output_base() -> u16 {
    8003
}

fn default_idle_poll_ms() -> u64 {
    500
}

fn default_fast_poll_ms() -> u64 {
    100
}

fn default_pulse_ms() -> u64 {
    100
}

fn default_settle_ms() -> u64 {
    350
}

fn default_drill_measure_ms() -> u64 {
    1405
}

fn default_sensor_wait_ms() -> u64 {
    30_000
}

fn default_exchange_timeout_ms() -> u64 {
    2000
}

fn default_slave_id() -> u8 {
    1
}

fn default_write_attempts() -> u32 {
    3
}

fn default_write_backoff_ms() -> u64 {
    100
}

fn default_routing_queue() -> usize {
    32
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_service_name(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: default_idle_poll_ms(),
            fast_poll_ms: default_fast_poll_ms(),
            pulse_ms: default_pulse_ms(),
            settle_ms: default_settle_ms(),
            drill_measure_ms: default_drill_measure_ms(),
            sensor_wait_ms: default_sensor_wait_ms(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            exchange_timeout_ms: default_exchange_timeout_ms(),
            slave_id: default_slave_id(),
            write_attempts: default_write_attempts(),
            write_backoff_ms: default_write_backoff_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let yaml = r#"
stations:
  - host: 192.168.200.231
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.service_name, "stationsrv");
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.stations[0].port, 502);
        assert_eq!(config.stations[0].input_base, 8001);
        assert_eq!(config.stations[0].output_base, 8003);
        assert_eq!(config.timing.idle_poll_ms, 500);
        assert_eq!(config.timing.drill_measure_ms, 1405);
        assert_eq!(config.transport.write_attempts, 3);
        assert!(!config.effective_paired());
    }

    #[test]
    fn test_paired_cell_config() {
        let yaml = r#"
stations:
  - host: 192.168.200.231
  - host: 192.168.200.234
paired: true
timing:
  sensor_wait_ms: 10000
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert!(config.effective_paired());
        assert_eq!(config.timing.sensor_wait_ms, 10_000);
        // Untouched timing fields keep their defaults
        assert_eq!(config.timing.settle_ms, 350);
        assert_eq!(
            config.stations[1].resolve_identity().unwrap().as_str(),
            "B234"
        );
    }

    #[test]
    fn test_identity_override_wins() {
        let yaml = r#"
stations:
  - host: 192.168.200.231
    identity: north
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.stations[0].resolve_identity().unwrap().as_str(),
            "north"
        );
    }

    #[test]
    fn test_rejects_empty_and_oversized_cells() {
        let config: Config = serde_yaml::from_str("stations: []").unwrap();
        assert!(config.validate().is_err());

        let yaml = r#"
stations:
  - host: 192.168.200.231
  - host: 192.168.200.232
  - host: 192.168.200.233
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_identities() {
        let yaml = r#"
stations:
  - host: 192.168.200.231
    identity: B1
  - host: 192.168.200.234
    identity: B1
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hostname_hosts_rejected() {
        // The transport connects by socket address; names do not parse
        let yaml = r#"
stations:
  - host: plc-north.cell
    identity: north
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stations:\n  - host: 192.168.200.234").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(
            config.stations[0].resolve_identity().unwrap().as_str(),
            "B234"
        );

        assert!(Config::from_file(Path::new("/nonexistent/stationsrv.yaml")).is_err());
    }
}
