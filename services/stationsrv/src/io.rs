//! Station I/O map
//!
//! Named bit-level view over one station's PLC words. The node exposes one
//! actuator word and one sensor word; every operation here is a fresh bus
//! exchange, never a cached value, because the words are shared with the
//! physical machine. Output edits are read-modify-write under a per-station
//! gate so a remote checker command can never interleave with a pipeline
//! write to the same word.

use std::sync::Arc;
use std::time::Duration;

use fieldbus::{clear_bit_u16, set_bit_u16, test_bit_u16, RegisterBus};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Result;

/// Actuator commands, one output-word bit each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorBit {
    DrillMotor,
    TurntableMotor,
    DrillDownCmd,
    DrillUpCmd,
    PieceLock,
    CheckerDown,
    EjectorExitExtend,
    EjectorEntryExtend,
}

impl ActuatorBit {
    pub const fn bit(self) -> u8 {
        match self {
            ActuatorBit::DrillMotor => 0,
            ActuatorBit::TurntableMotor => 1,
            ActuatorBit::DrillDownCmd => 2,
            ActuatorBit::DrillUpCmd => 3,
            ActuatorBit::PieceLock => 4,
            ActuatorBit::CheckerDown => 5,
            ActuatorBit::EjectorExitExtend => 6,
            ActuatorBit::EjectorEntryExtend => 7,
        }
    }
}

/// Sensor inputs, one sensor-word bit each.
///
/// Plant-floor numbering walks the positions entrance, checker, drill; the
/// cabinet wires entrance, drill, checker. This table is the single
/// authority for that mapping. A differently laid-out table gets a
/// different table here, never arithmetic on position numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorBit {
    Entrance,
    DrillPosition,
    CheckerPosition,
    DrillUpConfirmed,
    DrillDownConfirmed,
    TurntableAligned,
    CheckerNormal,
}

impl SensorBit {
    pub const fn bit(self) -> u8 {
        match self {
            SensorBit::Entrance => 0,
            SensorBit::DrillPosition => 1,
            SensorBit::CheckerPosition => 2,
            SensorBit::DrillUpConfirmed => 3,
            SensorBit::DrillDownConfirmed => 4,
            SensorBit::TurntableAligned => 5,
            SensorBit::CheckerNormal => 6,
        }
    }
}

/// Bit-level I/O for one station.
///
/// Shared between the pipeline and the remote command handler; the gate
/// serializes every output mutation across both.
pub struct StationIo {
    bus: Arc<dyn RegisterBus>,
    output_base: u16,
    input_base: u16,
    write_attempts: u32,
    write_backoff: Duration,
    gate: Mutex<()>,
}

impl StationIo {
    pub fn new(
        bus: Arc<dyn RegisterBus>,
        output_base: u16,
        input_base: u16,
        write_attempts: u32,
        write_backoff: Duration,
    ) -> Self {
        Self {
            bus,
            output_base,
            input_base,
            write_attempts: write_attempts.max(1),
            write_backoff,
            gate: Mutex::new(()),
        }
    }

    /// One read-modify-write of the output word, retried whole on
    /// retryable transport failures up to the configured bound.
    /// Callers must hold the gate.
    async fn modify_output_gated(&self, edit: impl Fn(u16) -> u16) -> Result<()> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                let words = self.bus.read_registers(self.output_base, 1).await?;
                self.bus
                    .write_registers(self.output_base, &[edit(words[0])])
                    .await
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.write_attempts => {
                    warn!(
                        "output write attempt {}/{} failed, retrying: {}",
                        attempt, self.write_attempts, e
                    );
                    tokio::time::sleep(self.write_backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn modify_output(&self, edit: impl Fn(u16) -> u16) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.modify_output_gated(edit).await
    }

    /// Set a single actuator bit
    pub async fn set(&self, actuator: ActuatorBit) -> Result<()> {
        self.modify_output(move |w| set_bit_u16(w, actuator.bit())).await
    }

    /// Clear a single actuator bit
    pub async fn clear(&self, actuator: ActuatorBit) -> Result<()> {
        self.modify_output(move |w| clear_bit_u16(w, actuator.bit())).await
    }

    /// Read one sensor, fresh from the bus. Transient transport failures
    /// are retried under the same bound as writes.
    pub async fn sense(&self, sensor: SensorBit) -> Result<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.bus.read_registers(self.input_base, 1).await {
                Ok(words) => return Ok(test_bit_u16(words[0], sensor.bit())),
                Err(e) if e.is_retryable() && attempt < self.write_attempts => {
                    warn!(
                        "sensor read attempt {}/{} failed, retrying: {}",
                        attempt, self.write_attempts, e
                    );
                    tokio::time::sleep(self.write_backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn drill_motor_on(&self) -> Result<()> {
        self.set(ActuatorBit::DrillMotor).await
    }

    pub async fn drill_motor_off(&self) -> Result<()> {
        self.clear(ActuatorBit::DrillMotor).await
    }

    /// Command the down-stroke; the opposite stroke command is cleared in
    /// the same word write.
    pub async fn drill_down(&self) -> Result<()> {
        self.modify_output(|w| {
            set_bit_u16(
                clear_bit_u16(w, ActuatorBit::DrillUpCmd.bit()),
                ActuatorBit::DrillDownCmd.bit(),
            )
        })
        .await
    }

    /// Command the up-stroke; the opposite stroke command is cleared in
    /// the same word write.
    pub async fn drill_up(&self) -> Result<()> {
        self.modify_output(|w| {
            set_bit_u16(
                clear_bit_u16(w, ActuatorBit::DrillDownCmd.bit()),
                ActuatorBit::DrillUpCmd.bit(),
            )
        })
        .await
    }

    /// Clear both stroke commands, freezing the drill vertically
    pub async fn drill_stop(&self) -> Result<()> {
        self.modify_output(|w| {
            clear_bit_u16(
                clear_bit_u16(w, ActuatorBit::DrillDownCmd.bit()),
                ActuatorBit::DrillUpCmd.bit(),
            )
        })
        .await
    }

    pub async fn lock_piece(&self) -> Result<()> {
        self.set(ActuatorBit::PieceLock).await
    }

    pub async fn unlock_piece(&self) -> Result<()> {
        self.clear(ActuatorBit::PieceLock).await
    }

    /// Index the turntable one position: raise the motor bit, hold for the
    /// pulse width, drop it. The gate is held across the whole pulse so no
    /// other writer can stretch or cut it.
    pub async fn pulse_turntable(&self, width: Duration) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.modify_output_gated(|w| set_bit_u16(w, ActuatorBit::TurntableMotor.bit()))
            .await?;
        tokio::time::sleep(width).await;
        self.modify_output_gated(|w| clear_bit_u16(w, ActuatorBit::TurntableMotor.bit()))
            .await
    }

    pub async fn checker_down(&self) -> Result<()> {
        self.set(ActuatorBit::CheckerDown).await
    }

    pub async fn checker_up(&self) -> Result<()> {
        self.clear(ActuatorBit::CheckerDown).await
    }

    pub async fn extend_exit_ejector(&self) -> Result<()> {
        self.set(ActuatorBit::EjectorExitExtend).await
    }

    pub async fn retract_exit_ejector(&self) -> Result<()> {
        self.clear(ActuatorBit::EjectorExitExtend).await
    }

    pub async fn extend_entry_ejector(&self) -> Result<()> {
        self.set(ActuatorBit::EjectorEntryExtend).await
    }

    /// Retract the entry ejector. The cabinet routes both retract paths
    /// through bit 6, not bit 7; verified against the deployed plant, keep
    /// as wired.
    pub async fn retract_entry_ejector(&self) -> Result<()> {
        self.clear(ActuatorBit::EjectorExitExtend).await
    }

    /// Clear every motion command in one word write: drill motor, turntable,
    /// both drill strokes, both ejector outputs. The piece clamp and the
    /// checker position are holding states and stay as they are.
    pub async fn park_outputs(&self) -> Result<()> {
        const MOTION_BITS: [ActuatorBit; 6] = [
            ActuatorBit::DrillMotor,
            ActuatorBit::TurntableMotor,
            ActuatorBit::DrillDownCmd,
            ActuatorBit::DrillUpCmd,
            ActuatorBit::EjectorExitExtend,
            ActuatorBit::EjectorEntryExtend,
        ];
        self.modify_output(|w| {
            MOTION_BITS
                .iter()
                .fold(w, |word, bit| clear_bit_u16(word, bit.bit()))
        })
        .await
    }
}
