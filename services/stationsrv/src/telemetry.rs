//! MQTT telemetry, remote checker commands and routing notices
//!
//! One async client per process carries everything the cell sees of this
//! service: retained per-station status, counter snapshots after every
//! cycle, routing notices for ejected pieces, and the inbound checker
//! override commands. Controllers never touch the broker directly; they
//! hand events to the pump through channels and keep cycling whether the
//! broker is reachable or not.

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::identity::StationIdentity;
use crate::io::StationIo;
use crate::routing::RoutingMessage;

/// Routing notices from every station share one topic
pub const ROUTING_TOPIC: &str = "cell/routing";

/// Bound on any single enqueue toward the broker. With the broker down the
/// client's request queue fills; waiting longer than this only delays
/// shutdown, the payloads are reproducible next cycle anyway.
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

pub fn counters_topic(station: &StationIdentity) -> String {
    format!("stations/{}/counters", station)
}

pub fn status_topic(station: &StationIdentity) -> String {
    format!("stations/{}/status", station)
}

pub fn command_topic(station: &StationIdentity) -> String {
    format!("stations/{}/checker/set", station)
}

/// Counter values as published after each cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub total_blocks: u64,
    pub drilled_blocks: u64,
    pub damaged_blocks: u64,
    pub drill_seconds: f64,
}

/// Station lifecycle as seen by the cell; published retained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationStatus {
    Running,
    Halted,
    Stopped,
}

impl StationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StationStatus::Running => "running",
            StationStatus::Halted => "halted",
            StationStatus::Stopped => "stopped",
        }
    }
}

/// Outbound telemetry from a controller to the pump
#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    Counters {
        station: StationIdentity,
        snapshot: CounterSnapshot,
    },
    Status {
        station: StationIdentity,
        status: StationStatus,
    },
}

/// The process-wide broker connection
pub struct TelemetryService {
    client: AsyncClient,
}

impl TelemetryService {
    /// Build the client and start its event loop. Checker commands arriving
    /// on each station's command topic are applied straight to that
    /// station's actuator word; the connection retries in the background
    /// until cancellation.
    pub fn connect(
        config: &MqttConfig,
        command_targets: Vec<(StationIdentity, Arc<StationIo>)>,
        cancel: CancellationToken,
    ) -> Self {
        let options = MqttOptions::new(&config.client_id, &config.host, config.port);
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        info!(
            "MQTT telemetry client '{}' targeting {}:{}",
            config.client_id, config.host, config.port
        );

        let targets: Vec<(String, StationIdentity, Arc<StationIo>)> = command_targets
            .into_iter()
            .map(|(station, io)| (command_topic(&station), station, io))
            .collect();
        let subscriber = client.clone();

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Subscriptions do not survive a reconnect
                        info!("MQTT connected, subscribing {} command topics", targets.len());
                        for (topic, _, _) in &targets {
                            if let Err(e) = subscriber.try_subscribe(topic, QoS::AtLeastOnce) {
                                warn!("MQTT subscribe to '{}' failed: {}", topic, e);
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        for (topic, station, io) in &targets {
                            if *topic == publish.topic {
                                handle_checker_command(station, io, publish.payload.as_ref())
                                    .await;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        warn!("MQTT event loop error: {}, retrying in 1s", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            debug!("MQTT event loop finished");
        });

        Self { client }
    }

    /// Forward controller events and routing notices to the broker until
    /// both channels close, then flush what is left and disconnect.
    pub async fn pump(
        self,
        mut events: mpsc::Receiver<TelemetryEvent>,
        mut routing: mpsc::Receiver<RoutingMessage>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.publish_event(event).await,
                    None => break,
                },
                message = routing.recv() => match message {
                    Some(message) => self.publish_routing(message).await,
                    None => break,
                },
            }
        }
        while let Ok(event) = events.try_recv() {
            self.publish_event(event).await;
        }
        while let Ok(message) = routing.try_recv() {
            self.publish_routing(message).await;
        }
        let _ = tokio::time::timeout(PUBLISH_TIMEOUT, self.client.disconnect()).await;
    }

    async fn publish_event(&self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Counters { station, snapshot } => match serde_json::to_vec(&snapshot)
            {
                Ok(payload) => self.publish(counters_topic(&station), false, payload).await,
                Err(e) => warn!("[{}] counter snapshot not serializable: {}", station, e),
            },
            TelemetryEvent::Status { station, status } => {
                // Retained so late subscribers see the station's last state
                self.publish(status_topic(&station), true, status.as_str().into())
                    .await;
            }
        }
    }

    async fn publish_routing(&self, message: RoutingMessage) {
        self.publish(ROUTING_TOPIC.to_string(), false, routing_payload(&message))
            .await;
    }

    async fn publish(&self, topic: String, retain: bool, payload: Vec<u8>) {
        let send = self.client.publish(&topic, QoS::AtLeastOnce, retain, payload);
        match tokio::time::timeout(PUBLISH_TIMEOUT, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("MQTT publish to '{}' failed: {}", topic, e),
            Err(_) => warn!("MQTT publish to '{}' timed out, broker backlogged", topic),
        }
    }
}

fn routing_payload(message: &RoutingMessage) -> Vec<u8> {
    serde_json::json!({
        "station": message.station,
        "destination": message.destination.tag(),
    })
    .to_string()
    .into_bytes()
}

/// Apply one remote checker override. Anything but the two known verbs is
/// logged and dropped without touching the hardware.
async fn handle_checker_command(station: &StationIdentity, io: &StationIo, payload: &[u8]) {
    match std::str::from_utf8(payload) {
        Ok("up") => {
            info!("[{}] remote checker command: up", station);
            if let Err(e) = io.checker_up().await {
                warn!("[{}] checker command failed: {}", station, e);
            }
        }
        Ok("down") => {
            info!("[{}] remote checker command: down", station);
            if let Err(e) = io.checker_down().await {
                warn!("[{}] checker command failed: {}", station, e);
            }
        }
        other => {
            warn!("[{}] ignoring malformed checker command: {:?}", station, other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ActuatorBit;
    use crate::routing::Destination;
    use fieldbus::MemoryBus;

    #[test]
    fn test_topics_embed_the_station_tag() {
        let station = StationIdentity::new("B231");
        assert_eq!(counters_topic(&station), "stations/B231/counters");
        assert_eq!(status_topic(&station), "stations/B231/status");
        assert_eq!(command_topic(&station), "stations/B231/checker/set");
    }

    #[test]
    fn test_counter_snapshot_serializes_flat() {
        let snapshot = CounterSnapshot {
            total_blocks: 7,
            drilled_blocks: 5,
            damaged_blocks: 2,
            drill_seconds: 7.025,
        };
        let value = serde_json::to_value(snapshot).unwrap();
        assert_eq!(value["total_blocks"], 7);
        assert_eq!(value["drilled_blocks"], 5);
        assert_eq!(value["damaged_blocks"], 2);
        assert!((value["drill_seconds"].as_f64().unwrap() - 7.025).abs() < 1e-9);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(StationStatus::Running.as_str(), "running");
        assert_eq!(StationStatus::Halted.as_str(), "halted");
        assert_eq!(StationStatus::Stopped.as_str(), "stopped");
    }

    #[test]
    fn test_routing_payload_names_station_and_lane() {
        let message = RoutingMessage {
            station: StationIdentity::new("B232"),
            destination: Destination::RejectLane,
        };
        let value: serde_json::Value =
            serde_json::from_slice(&routing_payload(&message)).unwrap();
        assert_eq!(value["station"], "B232");
        assert_eq!(value["destination"], "DZA");
    }

    #[tokio::test]
    async fn test_checker_commands_drive_the_actuator_bit() {
        let bus = MemoryBus::new();
        let io = StationIo::new(
            Arc::new(bus.clone()),
            8003,
            8001,
            3,
            Duration::from_millis(100),
        );
        let station = StationIdentity::new("B231");

        handle_checker_command(&station, &io, b"down").await;
        assert!(bus.peek_bit(8003, ActuatorBit::CheckerDown.bit()).await);

        // Repeating the command is a no-op; the bit stays set, nothing else.
        handle_checker_command(&station, &io, b"down").await;
        assert_eq!(bus.peek(8003).await, 1 << ActuatorBit::CheckerDown.bit());

        handle_checker_command(&station, &io, b"up").await;
        assert!(!bus.peek_bit(8003, ActuatorBit::CheckerDown.bit()).await);
    }

    #[tokio::test]
    async fn test_unknown_checker_command_is_ignored() {
        let bus = MemoryBus::new();
        let io = StationIo::new(
            Arc::new(bus.clone()),
            8003,
            8001,
            3,
            Duration::from_millis(100),
        );
        let station = StationIdentity::new("B231");

        handle_checker_command(&station, &io, b"sideways").await;
        handle_checker_command(&station, &io, &[0xff, 0xfe]).await;
        assert_eq!(bus.peek(8003).await, 0);
    }
}
