//! The three-stage polling and addressing engine
//!
//! A single task owns the entire bus session: it discovers nodes by
//! ascending-address probing, polls each discovered node's status in
//! order, reconciles reported state against the cell registry, and then
//! loops back to polling, forever. All stage handlers, timer callbacks and
//! inbound-frame dispatch run strictly serialized on this task.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::frame::{Frame, FrameType};
use super::reconcile::{reconcile, Correction};
use crate::bus::scheduler::{Retransmit, Timeout};
use crate::core::{BusConfig, Error, NodeAddress, NodeStatus, Result};
use crate::registry::CellRegistry;

/// One phase of the repeating protocol cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the transport to come up
    Idle,
    /// Enumerating nodes by ascending-address probing
    Addressing,
    /// Polling each discovered node's status in ascending order
    Statusing,
    /// Reconciling reported state and pushing corrections
    Updating,
}

/// Events produced for external observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// A node claimed an address during the addressing stage
    NodeDiscovered(NodeAddress),
    /// The addressing stage finished with this many nodes on the bus
    AddressingComplete {
        /// Number of discovered nodes
        nodes: usize,
    },
}

/// Which engine timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Addressing stage timeout
    Addressing,
    /// Status poll retry timer
    StatusRetry,
}

/// Internal engine events, processed strictly after the work that queued them
#[derive(Debug)]
enum EngineEvent {
    /// Deferred "run the active stage handler" step
    Step { generation: u64 },
    /// A one-shot timer fired; the token identifies the arming
    Timer { kind: TimerKind, token: u64 },
}

/// Mutable session state, exclusively owned by the engine task
#[derive(Debug)]
pub struct SessionState {
    /// Active stage
    pub stage: Stage,
    /// Discovered node addresses, strictly ascending in discovery order
    pub nodes: Vec<NodeAddress>,
    /// Last reported status per node, overwritten wholesale on each poll
    pub statuses: HashMap<NodeAddress, NodeStatus>,
    /// Highest address claimed so far; the floor carried by probes
    pub last_node_addr: NodeAddress,
    /// Highest address polled so far in the current status pass
    pub last_status_addr: NodeAddress,
    /// Polls sent for the address currently being tried
    pub status_tries: u8,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            stage: Stage::Idle,
            nodes: Vec::new(),
            statuses: HashMap::new(),
            last_node_addr: NodeAddress::MASTER,
            last_status_addr: NodeAddress::MASTER,
            status_tries: 0,
        }
    }
}

/// The bus protocol engine
///
/// Inbound frames arrive on one channel, internal timer/step events on
/// another; outbound frames go to the transport writer. The engine never
/// blocks inside a handler; every wait is a timer or a deferred step.
pub struct BusEngine<R: CellRegistry> {
    config: BusConfig,
    registry: R,
    session: SessionState,
    frames: mpsc::Receiver<Frame>,
    frame_out: mpsc::Sender<Frame>,
    events: mpsc::Sender<BusEvent>,
    internal_tx: mpsc::Sender<EngineEvent>,
    internal_rx: mpsc::Receiver<EngineEvent>,
    /// Outstanding repeating addressing probe
    probe: Option<Retransmit>,
    addressing_timer: Timeout,
    status_timer: Timeout,
    /// Bumped on every stage transition; steps from older generations are
    /// stale. Timer events carry per-arming tokens checked by their handles
    /// instead.
    generation: u64,
}

impl<R: CellRegistry> BusEngine<R> {
    /// Creates an engine reading frames from `frames`, writing frames to
    /// `frame_out` and reporting discoveries on `events`
    pub fn new(
        config: BusConfig,
        registry: R,
        frames: mpsc::Receiver<Frame>,
        frame_out: mpsc::Sender<Frame>,
        events: mpsc::Sender<BusEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(config.channel_capacity);

        BusEngine {
            config,
            registry,
            session: SessionState::new(),
            frames,
            frame_out,
            events,
            internal_tx,
            internal_rx,
            probe: None,
            addressing_timer: Timeout::new(),
            status_timer: Timeout::new(),
            generation: 0,
        }
    }

    /// Runs the engine until the transport goes away
    pub async fn run(mut self) -> Result<()> {
        self.enter_stage(Stage::Addressing).await?;

        loop {
            tokio::select! {
                // Deferred steps and timers run before any queued frame, so
                // a stage entered by the previous event observes its own
                // entry before stale bus traffic.
                biased;

                Some(event) = self.internal_rx.recv() => {
                    self.on_internal(event).await?;
                }

                frame = self.frames.recv() => {
                    match frame {
                        Some(frame) => self.on_frame(frame).await?,
                        None => {
                            return Err(Error::transport("inbound frame stream closed"));
                        }
                    }
                }
            }
        }
    }

    /// Read access to the session, mainly for diagnostics
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    async fn on_internal(&mut self, event: EngineEvent) -> Result<()> {
        match event {
            EngineEvent::Step { generation } => {
                if generation != self.generation {
                    debug!(generation, "dropping stale step");
                    return Ok(());
                }
                self.run_stage_step().await
            }
            EngineEvent::Timer { kind, token } => {
                // Acknowledging disarms the handle; a token from a
                // cancelled or superseded arming is rejected, which is what
                // keeps a fire that raced a cancel+rearm from being taken
                // for the fresh window.
                let timer = match kind {
                    TimerKind::Addressing => &mut self.addressing_timer,
                    TimerKind::StatusRetry => &mut self.status_timer,
                };
                if !timer.acknowledge(token) {
                    debug!(?kind, token, "dropping stale timer");
                    return Ok(());
                }
                match kind {
                    TimerKind::Addressing => self.on_addressing_timeout().await,
                    TimerKind::StatusRetry => self.run_stage_step().await,
                }
            }
        }
    }

    async fn on_frame(&mut self, frame: Frame) -> Result<()> {
        // Half-duplex bus: we hear our own transmissions
        if frame.is_from_master() {
            return Ok(());
        }

        match self.session.stage {
            Stage::Addressing => self.on_addr_frame(frame).await,
            Stage::Statusing => self.on_status_frame(frame).await,
            Stage::Idle | Stage::Updating => {
                debug!(stage = ?self.session.stage, ?frame, "no handler for stage, frame dropped");
                Ok(())
            }
        }
    }

    /// Cancels the previous stage's transmission and timers, then schedules
    /// the new stage's first handler run for the next scheduling step.
    /// Transitions are never re-entrant: the new handler only ever runs from
    /// the event loop.
    async fn enter_stage(&mut self, stage: Stage) -> Result<()> {
        if let Some(mut probe) = self.probe.take() {
            probe.stop();
        }
        self.addressing_timer.cancel();
        self.status_timer.cancel();
        self.generation += 1;

        debug!(from = ?self.session.stage, to = ?stage, "stage transition");
        self.session.stage = stage;

        if stage == Stage::Statusing {
            self.session.last_status_addr = NodeAddress::MASTER;
            self.session.status_tries = 0;
        }

        self.defer_step().await
    }

    async fn defer_step(&mut self) -> Result<()> {
        self.internal_tx
            .send(EngineEvent::Step {
                generation: self.generation,
            })
            .await
            .map_err(|_| Error::invalid_state("engine event queue closed"))
    }

    async fn run_stage_step(&mut self) -> Result<()> {
        match self.session.stage {
            Stage::Addressing => self.on_addressing_step().await,
            Stage::Statusing => self.on_statusing_step().await,
            Stage::Updating => self.run_update_pass().await,
            Stage::Idle => Ok(()),
        }
    }

    // ---- Addressing stage -------------------------------------------------

    /// Starts (or restarts) the repeating addressing probe
    async fn on_addressing_step(&mut self) -> Result<()> {
        if self.probe.is_some() {
            return Ok(());
        }

        let probe = Frame::addr_probe(self.session.last_node_addr);
        self.probe = Some(Retransmit::spawn(
            probe,
            self.config.ack_timeout,
            self.frame_out.clone(),
        ));

        self.arm_addressing_timer()
    }

    async fn on_addr_frame(&mut self, frame: Frame) -> Result<()> {
        if frame.frame_type != FrameType::Addr {
            debug!(?frame, "unexpected frame during addressing, dropped");
            return Ok(());
        }

        let Some(&claimed) = frame.body.first() else {
            debug!("empty addressing reply, dropped");
            return Ok(());
        };
        let claimed = NodeAddress(claimed);

        // New addresses must strictly ascend; anything else is a stale or
        // duplicate announcement.
        if claimed <= self.session.last_node_addr || !claimed.is_node() {
            debug!(%claimed, floor = %self.session.last_node_addr, "invalid address claim, dropped");
            return Ok(());
        }

        if let Some(mut probe) = self.probe.take() {
            probe.stop();
        }

        self.session.nodes.push(claimed);
        self.session.last_node_addr = claimed;
        self.registry.register_node(claimed);
        info!(%claimed, "node discovered");
        let _ = self.events.send(BusEvent::NodeDiscovered(claimed)).await;

        // ACK is best effort: there is no retry for a lost ACK, the node
        // simply re-announces on the next probe. The writer channel keeps
        // the ACK ahead of the fresh probe.
        self.send_frame(Frame::ack(claimed)).await?;
        self.probe = Some(Retransmit::spawn(
            Frame::addr_probe(claimed),
            self.config.ack_timeout,
            self.frame_out.clone(),
        ));

        self.addressing_timer.cancel();
        self.arm_addressing_timer()
    }

    async fn on_addressing_timeout(&mut self) -> Result<()> {
        if let Some(mut probe) = self.probe.take() {
            probe.stop();
        }

        if self.session.nodes.is_empty() {
            debug!("addressing timed out with no nodes, probing again");
            return self.defer_step().await;
        }

        let nodes = self.session.nodes.len();
        info!(nodes, "addressing complete");
        let _ = self.events.send(BusEvent::AddressingComplete { nodes }).await;
        self.enter_stage(Stage::Statusing).await
    }

    fn arm_addressing_timer(&mut self) -> Result<()> {
        self.addressing_timer.arm(
            self.config.addressing_timeout,
            self.internal_tx.clone(),
            |token| EngineEvent::Timer {
                kind: TimerKind::Addressing,
                token,
            },
        )
    }

    // ---- Status stage -----------------------------------------------------

    /// Issues the next status poll, skipping an address once its retry
    /// budget is spent
    async fn on_statusing_step(&mut self) -> Result<()> {
        if self.session.last_status_addr == self.session.last_node_addr {
            return self.enter_stage(Stage::Updating).await;
        }

        // A poll is outstanding; wait for its reply or retry timer
        if self.status_timer.is_armed() {
            return Ok(());
        }

        if self.session.status_tries >= self.config.status_retry_limit {
            let skipped = self.session.last_status_addr.next();
            debug!(%skipped, "no status reply, skipping node for this pass");
            self.session.last_status_addr = skipped;
            self.session.status_tries = 0;

            if self.session.last_status_addr == self.session.last_node_addr {
                return self.enter_stage(Stage::Updating).await;
            }
        }

        let target = self.session.last_status_addr.next();
        self.send_frame(Frame::status_request(target)).await?;
        self.session.status_tries += 1;

        self.status_timer.arm(
            self.config.status_timeout,
            self.internal_tx.clone(),
            |token| EngineEvent::Timer {
                kind: TimerKind::StatusRetry,
                token,
            },
        )
    }

    async fn on_status_frame(&mut self, frame: Frame) -> Result<()> {
        if frame.frame_type != FrameType::Status {
            debug!(?frame, "unexpected frame during statusing, dropped");
            return Ok(());
        }

        // Unsolicited replies, and replies at or below the pass cursor,
        // are stale or duplicates.
        if !self.status_timer.is_armed() {
            debug!(src = %frame.src, "unsolicited status reply, dropped");
            return Ok(());
        }
        if frame.src <= self.session.last_status_addr {
            debug!(src = %frame.src, cursor = %self.session.last_status_addr, "stale status reply, dropped");
            return Ok(());
        }
        if !self.session.nodes.contains(&frame.src) {
            debug!(src = %frame.src, "status reply from unknown node, dropped");
            return Ok(());
        }

        let status = match NodeStatus::from_body(&frame.body) {
            Ok(status) => status,
            Err(e) => {
                warn!(src = %frame.src, error = %e, "malformed status body, dropped");
                return Ok(());
            }
        };

        self.status_timer.cancel();
        self.session.statuses.insert(frame.src, status);
        self.session.last_status_addr = frame.src;
        self.session.status_tries = 0;

        // The next poll goes out on the next scheduling step, never two
        // outstanding at once.
        self.defer_step().await
    }

    // ---- Update stage -----------------------------------------------------

    /// Reconciles every discovered node once, then returns to statusing
    async fn run_update_pass(&mut self) -> Result<()> {
        for i in 0..self.session.nodes.len() {
            let addr = self.session.nodes[i];

            let Some(status) = self.session.statuses.get(&addr) else {
                debug!(%addr, "no status for node, skipping");
                continue;
            };
            let Some(cell) = self.registry.cell_mut(addr) else {
                debug!(%addr, "no registry cell for node, skipping");
                continue;
            };

            if let Some(correction) = reconcile(status, cell) {
                let frame = match correction {
                    Correction::Color(color) => Frame::color(addr, color),
                    Correction::Fade { target, duration } => Frame::fade(addr, target, duration),
                };
                debug!(%addr, ?correction, "node out of sync, correcting");
                self.send_frame(frame).await?;
            }
        }

        self.enter_stage(Stage::Statusing).await
    }

    async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.frame_out
            .send(frame)
            .await
            .map_err(|_| Error::transport("outbound frame stream closed"))
    }
}
