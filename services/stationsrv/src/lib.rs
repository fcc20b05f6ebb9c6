//! Drilling station service library
//!
//! Controllers for rotary-indexing drilling stations: the cyclic control
//! pipeline, the actuator/sensor register map, cross-station interlocks,
//! piece routing and the MQTT telemetry surface.

pub mod config;
pub mod error;
pub mod identity;
pub mod interlock;
pub mod io;
pub mod pipeline;
pub mod routing;
pub mod shutdown;
pub mod telemetry;

pub use config::Config;
pub use error::{Result, StationError};
pub use identity::StationIdentity;
pub use interlock::LockSet;
pub use io::{ActuatorBit, SensorBit, StationIo};
pub use pipeline::StationController;
pub use routing::{Destination, RoutingMessage, RoutingSink};
pub use telemetry::{StationStatus, TelemetryEvent, TelemetryService};
