//! Downstream routing
//!
//! One message per ejection tells the transport system which lane a piece
//! takes off the shared exit. Stations push into a bounded channel; the
//! telemetry pump drains it. A full or closed channel never wedges a
//! control loop, the send is bounded and the pipeline logs and moves on.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{Result, StationError};
use crate::identity::StationIdentity;

/// How long a station waits on a full routing channel before giving up
const SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Where an ejected piece travels next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    NormalLane,
    RejectLane,
}

impl Destination {
    /// Wire tag the downstream transport system expects
    pub const fn tag(self) -> &'static str {
        match self {
            Destination::NormalLane => "WA",
            Destination::RejectLane => "DZA",
        }
    }
}

/// One ejection's routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingMessage {
    pub station: StationIdentity,
    pub destination: Destination,
}

/// Producer half handed to each station controller
#[derive(Clone)]
pub struct RoutingSink {
    tx: mpsc::Sender<RoutingMessage>,
}

impl RoutingSink {
    /// Build the bounded routing channel; the receiver goes to the
    /// telemetry pump.
    pub fn channel(depth: usize) -> (RoutingSink, mpsc::Receiver<RoutingMessage>) {
        let (tx, rx) = mpsc::channel(depth);
        (RoutingSink { tx }, rx)
    }

    /// Hand one message to the sink, waiting at most the bounded send
    /// timeout for channel capacity.
    pub async fn dispatch(&self, message: RoutingMessage) -> Result<()> {
        self.tx
            .send_timeout(message, SEND_TIMEOUT)
            .await
            .map_err(|e| StationError::routing(format!("routing sink unavailable: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(destination: Destination) -> RoutingMessage {
        RoutingMessage {
            station: StationIdentity::new("B231"),
            destination,
        }
    }

    #[test]
    fn test_wire_tags() {
        assert_eq!(Destination::NormalLane.tag(), "WA");
        assert_eq!(Destination::RejectLane.tag(), "DZA");
    }

    #[tokio::test]
    async fn test_dispatch_reaches_receiver() {
        let (sink, mut rx) = RoutingSink::channel(4);
        sink.dispatch(message(Destination::RejectLane)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.destination, Destination::RejectLane);
        assert_eq!(received.station.as_str(), "B231");
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_channel_bounds_the_send() {
        let (sink, mut rx) = RoutingSink::channel(1);
        sink.dispatch(message(Destination::NormalLane)).await.unwrap();

        // Second dispatch finds the channel full and times out
        let result = sink.dispatch(message(Destination::NormalLane)).await;
        assert!(matches!(result, Err(StationError::Routing(_))));

        // Draining restores capacity
        rx.recv().await.unwrap();
        sink.dispatch(message(Destination::NormalLane)).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_sink_reports_routing_error() {
        let (sink, rx) = RoutingSink::channel(1);
        drop(rx);
        let result = sink.dispatch(message(Destination::NormalLane)).await;
        assert!(matches!(result, Err(StationError::Routing(_))));
    }
}
