//! Station control pipeline
//!
//! One controller instance per physical station drives the cyclic state
//! machine: wait for work, rotate, inspect, eject, drill, reclassify. One
//! traversal is one table rotation, and the rotation advances every piece
//! on this station's segment by one slot, so the carried state is a small
//! shift register walked alongside the hardware.
//!
//! The controller is the only writer of its station's actuator word (remote
//! checker commands go through the same `StationIo` and its gate) and the
//! only owner of its counters and carried state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TimingConfig;
use crate::error::{Result, StationError};
use crate::identity::StationIdentity;
use crate::interlock::{LockSet, LockToken};
use crate::io::{SensorBit, StationIo};
use crate::routing::{Destination, RoutingMessage, RoutingSink};
use crate::telemetry::{CounterSnapshot, StationStatus, TelemetryEvent};

/// Condition of the workpieces occupying this station's table slots,
/// carried across cycles.
///
/// Sensors alone cannot distinguish "piece present and correctly oriented"
/// from "piece present but previously classified abnormal" once a piece has
/// moved past the checker; abnormal pieces are invisible to the workpiece
/// sensors entirely. These flags are that memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineState {
    /// Piece at the checker classified normal; drill it next cycle
    pub ok: bool,
    /// Abnormal piece at the checker; needs an extra rotation
    pub nok_at_checker: bool,
    /// Abnormal piece at the drill slot; re-turn and eject without drilling
    pub nok_at_drill: bool,
    /// A piece sits at the exit and must be ejected this cycle
    pub eject_pending: bool,
    /// The piece at the exit was abnormal; route it to the reject lane
    pub nok_at_exit: bool,
}

impl PipelineState {
    /// Shift the carried slots for the rotation this cycle is about to
    /// make. `piece_at_drill` is the drill-position sensor sampled before
    /// the rotation: that piece moves to the exit.
    fn advance(&mut self, piece_at_drill: bool) {
        if piece_at_drill || self.nok_at_drill {
            if self.nok_at_drill {
                self.nok_at_exit = true;
            }
            self.eject_pending = true;
            self.nok_at_drill = false;
        }
        if self.nok_at_checker {
            self.nok_at_checker = false;
            self.nok_at_drill = true;
        }
    }
}

/// Lifetime counters, monotonically non-decreasing
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Counters {
    /// Checker classifications, both outcomes
    pub total_blocks: u64,
    /// Completed drill cycles
    pub drilled_blocks: u64,
    /// Abnormal classifications
    pub damaged_blocks: u64,
    /// Accumulated drill time, fixed measure per drill
    pub drill_seconds: f64,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_blocks: self.total_blocks,
            drilled_blocks: self.drilled_blocks,
            damaged_blocks: self.damaged_blocks,
            drill_seconds: self.drill_seconds,
        }
    }
}

/// Interlock tokens held from ejection until the post-eject finalization
struct EjectTokens {
    exit: LockToken,
    opposing: LockToken,
}

/// Controller for one physical station
pub struct StationController {
    identity: StationIdentity,
    io: Arc<StationIo>,
    locks: LockSet,
    routing: RoutingSink,
    telemetry: mpsc::Sender<TelemetryEvent>,
    timing: TimingConfig,
    cancel: CancellationToken,
    state: PipelineState,
    counters: Counters,
}

impl StationController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: StationIdentity,
        io: Arc<StationIo>,
        locks: LockSet,
        routing: RoutingSink,
        telemetry: mpsc::Sender<TelemetryEvent>,
        timing: TimingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            identity,
            io,
            locks,
            routing,
            telemetry,
            timing,
            cancel,
            state: PipelineState::default(),
            counters: Counters::default(),
        }
    }

    /// Drive the station until cancellation or a fault.
    ///
    /// Cooperative shutdown parks the outputs and returns Ok. A fault parks
    /// the outputs, surfaces the halted status and returns the fault; held
    /// interlock tokens are released by scope on the way out either way.
    pub async fn run(mut self) -> Result<()> {
        info!("[{}] station controller starting", self.identity);
        self.publish_status(StationStatus::Running);

        let outcome = self.run_cycles().await;
        if let Err(e) = self.io.park_outputs().await {
            warn!("[{}] parking outputs failed: {}", self.identity, e);
        }

        match outcome {
            Err(StationError::Cancelled) | Ok(()) => {
                self.publish_status(StationStatus::Stopped);
                info!("[{}] station controller stopped", self.identity);
                Ok(())
            }
            Err(fault) => {
                error!("[{}] station halted: {}", self.identity, fault);
                self.publish_status(StationStatus::Halted);
                Err(fault)
            }
        }
    }

    async fn run_cycles(&mut self) -> Result<()> {
        loop {
            self.await_workpiece().await?;
            self.run_cycle().await?;
        }
    }

    /// Idle until the table is aligned and something needs a cycle: a piece
    /// at a workpiece sensor, or abnormal state carried from earlier
    /// rotations that must keep advancing. Waiting here forever is
    /// legitimate, an empty station is not a fault.
    async fn await_workpiece(&self) -> Result<()> {
        let mut poll = tokio::time::interval(self.timing.idle_poll());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(StationError::Cancelled),
                _ = poll.tick() => {}
            }

            if !self.io.sense(SensorBit::TurntableAligned).await? {
                continue;
            }
            if self.state.nok_at_checker || self.state.nok_at_drill {
                return Ok(());
            }
            if self.io.sense(SensorBit::Entrance).await?
                || self.io.sense(SensorBit::CheckerPosition).await?
                || self.io.sense(SensorBit::DrillPosition).await?
            {
                return Ok(());
            }
        }
    }

    /// One full cycle: bookkeeping, rotation, inspection, optional
    /// ejection, optional drilling, reclassification, finalization.
    async fn run_cycle(&mut self) -> Result<()> {
        debug!("[{}] cycle start: {:?}", self.identity, self.state);

        let piece_at_drill = self.io.sense(SensorBit::DrillPosition).await?;
        self.state.advance(piece_at_drill);

        self.rotate().await?;

        // The checker drops every cycle. Abnormal pieces are invisible to
        // the workpiece sensors, so the orientation signal is the only
        // authority on what occupies the checker slot.
        self.io.checker_down().await?;
        if self.state.eject_pending {
            // The exit holds the previous cycle's piece; its ejection does
            // not wait for this cycle's classification.
            self.io.extend_exit_ejector().await?;
        }

        let eject_tokens = if self.state.eject_pending {
            Some(self.eject().await?)
        } else {
            None
        };

        self.drill_or_settle().await?;
        self.reclassify().await?;
        self.finalize_ejection(eject_tokens).await?;

        self.push_counters();
        debug!(
            "[{}] cycle complete: {:?} {:?}",
            self.identity, self.state, self.counters
        );
        Ok(())
    }

    /// Index the table one position under the self-turning interlock.
    async fn rotate(&mut self) -> Result<()> {
        let turning = self.locks.self_turning.acquire(&self.cancel).await?;
        self.io.pulse_turntable(self.timing.pulse()).await?;
        self.poll_confirmation(SensorBit::TurntableAligned, "turntable alignment")
            .await?;
        drop(turning);
        Ok(())
    }

    /// Push the exit piece onto its lane. The exit stays claimed, and the
    /// partner's table pinned, until finalization.
    async fn eject(&mut self) -> Result<EjectTokens> {
        let exit = self.locks.exit_free.acquire(&self.cancel).await?;
        let opposing = self.locks.opposing_turning.acquire(&self.cancel).await?;

        let destination = if self.state.nok_at_exit {
            self.state.nok_at_exit = false;
            Destination::RejectLane
        } else {
            Destination::NormalLane
        };
        info!("[{}] ejecting to {}", self.identity, destination.tag());

        let message = RoutingMessage {
            station: self.identity.clone(),
            destination,
        };
        if let Err(e) = self.routing.dispatch(message).await {
            // The piece is physically on its way regardless; losing the
            // notification must not stall the cell.
            warn!("[{}] routing message dropped: {}", self.identity, e);
        }

        self.io.retract_exit_ejector().await?;
        Ok(EjectTokens { exit, opposing })
    }

    /// Drill when the previous cycle classified the piece normal and the
    /// drill slot reports it; otherwise give the checker and ejector
    /// strokes time to complete.
    async fn drill_or_settle(&mut self) -> Result<()> {
        // Sampled once; a sensor flicker mid-phase must not split the
        // down-stroke from the up-stroke.
        let drill_now = self.state.ok && self.io.sense(SensorBit::DrillPosition).await?;
        if !drill_now {
            return self.sleep_cancellable(self.timing.settle()).await;
        }

        info!("[{}] drilling", self.identity);
        self.io.lock_piece().await?;
        self.io.drill_motor_on().await?;
        self.io.drill_down().await?;
        self.poll_confirmation(SensorBit::DrillDownConfirmed, "drill down-stroke")
            .await?;

        self.counters.drill_seconds += self.timing.drill_measure().as_secs_f64();

        self.io.drill_up().await?;
        self.poll_confirmation(SensorBit::DrillUpConfirmed, "drill up-stroke")
            .await?;
        self.io.unlock_piece().await?;
        self.io.drill_motor_off().await?;
        self.counters.drilled_blocks += 1;
        Ok(())
    }

    /// Classify whatever occupies the checker slot and raise the checker.
    /// One classification per cycle, either outcome; an empty slot reads
    /// abnormal, exactly as the plant behaves.
    async fn reclassify(&mut self) -> Result<()> {
        self.state.ok = false;
        if self.io.sense(SensorBit::CheckerNormal).await? {
            self.state.ok = true;
        } else {
            self.state.nok_at_checker = true;
            self.counters.damaged_blocks += 1;
        }
        self.counters.total_blocks += 1;
        self.io.checker_up().await
    }

    /// Release the exit claim taken for this cycle's ejection and retract
    /// the entry-side ejector.
    async fn finalize_ejection(&mut self, tokens: Option<EjectTokens>) -> Result<()> {
        if let Some(EjectTokens { exit, opposing }) = tokens {
            drop(opposing);
            drop(exit);
            self.io.retract_entry_ejector().await?;
            self.state.eject_pending = false;
        }
        Ok(())
    }

    /// Poll one confirmation sensor at the fast interval, bounded by the
    /// sensor-wait deadline. A missed confirmation is a fault, not a
    /// longer wait.
    async fn poll_confirmation(&self, sensor: SensorBit, what: &str) -> Result<()> {
        let mut poll = tokio::time::interval(self.timing.fast_poll());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let deadline = tokio::time::Instant::now() + self.timing.sensor_wait();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(StationError::Cancelled),
                _ = poll.tick() => {}
            }
            if self.io.sense(sensor).await? {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StationError::sensor_timeout(format!(
                    "{} not confirmed within {} ms",
                    what,
                    self.timing.sensor_wait().as_millis()
                )));
            }
        }
    }

    async fn sleep_cancellable(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StationError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn push_counters(&self) {
        let event = TelemetryEvent::Counters {
            station: self.identity.clone(),
            snapshot: self.counters.snapshot(),
        };
        // The control loop never waits on telemetry capacity
        if self.telemetry.try_send(event).is_err() {
            debug!("[{}] telemetry channel unavailable", self.identity);
        }
    }

    fn publish_status(&self, status: StationStatus) {
        let event = TelemetryEvent::Status {
            station: self.identity.clone(),
            status,
        };
        if self.telemetry.try_send(event).is_err() {
            debug!("[{}] telemetry channel unavailable", self.identity);
        }
    }
}
