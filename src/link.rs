use crate::dpi::{DpiDirection, DpiEngine, DpiFlags, DpiPolicy};
use crate::errors::{Error, Result};
use crate::frame::Frame;
use crate::nic::{NetworkInterface, NicWrapper};
use fastrand::Rng;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Configuration for a single [`Link`]. Absent fields mean no impairment.
///
/// The link's left side is the client side for DPI purposes: left-to-right
/// traffic is classified as client-to-server.
#[derive(Default)]
pub struct LinkConfig {
    /// Fixed one-way delay applied to frames travelling left to right.
    pub left_to_right_delay: Duration,
    /// Fixed one-way delay applied to frames travelling right to left.
    pub right_to_left_delay: Duration,
    /// Probability in [0, 1] that any given left-to-right frame is lost.
    pub left_to_right_plr: f64,
    /// Probability in [0, 1] that any given right-to-left frame is lost.
    pub right_to_left_plr: f64,
    pub left_nic_wrapper: Option<Arc<dyn NicWrapper>>,
    pub right_nic_wrapper: Option<Arc<dyn NicWrapper>>,
    pub dpi_engine: Option<Arc<DpiEngine>>,
    /// Seed for the per-direction loss RNGs; fixing it makes loss patterns
    /// reproducible across runs.
    pub rng_seed: Option<u64>,
}

impl LinkConfig {
    fn validate(&self) -> Result<()> {
        for (name, plr) in [
            ("left_to_right_plr", self.left_to_right_plr),
            ("right_to_left_plr", self.right_to_left_plr),
        ] {
            if !(0.0..=1.0).contains(&plr) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {plr}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkState {
    Created,
    Running,
    Closed,
}

/// A bidirectional pipe between two NICs modelling one-way delay, random
/// loss, DPI interference, and packet capture.
///
/// State transitions are monotonic: CREATED → RUNNING ([`Link::start`]) →
/// CLOSED ([`Link::close`]). While running, one worker per direction reads
/// frames from its source NIC, passes them through the wrappers and the DPI
/// engine, applies the loss draw, and delivers survivors in order of
/// scheduled delivery time.
pub struct Link {
    left: Arc<dyn NetworkInterface>,
    right: Arc<dyn NetworkInterface>,
    left_wrapper: Option<Arc<dyn NicWrapper>>,
    right_wrapper: Option<Arc<dyn NicWrapper>>,
    dpi_engine: Option<Arc<DpiEngine>>,
    left_to_right_delay: Duration,
    right_to_left_delay: Duration,
    left_to_right_plr: f64,
    right_to_left_plr: f64,
    rng_seed: u64,
    state: Mutex<LinkState>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Link {
    /// Validates `config` and wires the link between `left` and `right`.
    /// Frames do not flow until [`Link::start`].
    pub fn new(
        left: Arc<dyn NetworkInterface>,
        right: Arc<dyn NetworkInterface>,
        config: LinkConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            left,
            right,
            left_wrapper: config.left_nic_wrapper,
            right_wrapper: config.right_nic_wrapper,
            dpi_engine: config.dpi_engine,
            left_to_right_delay: config.left_to_right_delay,
            right_to_left_delay: config.right_to_left_delay,
            left_to_right_plr: config.left_to_right_plr,
            right_to_left_plr: config.right_to_left_plr,
            rng_seed: config.rng_seed.unwrap_or_else(|| fastrand::u64(..)),
            state: Mutex::new(LinkState::Created),
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the two direction workers. Idempotent while running; fails on a
    /// closed link.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                LinkState::Running => return Ok(()),
                LinkState::Closed => return Err(Error::ClosedLink),
                LinkState::Created => *state = LinkState::Running,
            }
        }

        let left_to_right = Direction {
            source: self.left.clone(),
            target: self.right.clone(),
            source_wrapper: self.left_wrapper.clone(),
            target_wrapper: self.right_wrapper.clone(),
            dpi_engine: self.dpi_engine.clone(),
            direction: DpiDirection::ClientToServer,
            delay: self.left_to_right_delay,
            plr: self.left_to_right_plr,
            rng: Rng::with_seed(self.rng_seed),
            cancel: self.cancel.clone(),
        };
        let right_to_left = Direction {
            source: self.right.clone(),
            target: self.left.clone(),
            source_wrapper: self.right_wrapper.clone(),
            target_wrapper: self.left_wrapper.clone(),
            dpi_engine: self.dpi_engine.clone(),
            direction: DpiDirection::ServerToClient,
            delay: self.right_to_left_delay,
            plr: self.right_to_left_plr,
            rng: Rng::with_seed(self.rng_seed.wrapping_add(1)),
            cancel: self.cancel.clone(),
        };

        let mut workers = self.workers.lock();
        workers.push(tokio::spawn(direction_worker(left_to_right)));
        workers.push(tokio::spawn(direction_worker(right_to_left)));
        Ok(())
    }

    /// Signals both workers, waits for them to finish, then closes the NIC
    /// wrappers. Idempotent. Frames still in flight are discarded.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock();
            if *state == LinkState::Closed {
                return;
            }
            *state = LinkState::Closed;
        }
        self.cancel.cancel();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if let Err(error) = worker.await {
                warn!(%error, "link: worker task failed");
            }
        }
        if let Some(wrapper) = &self.left_wrapper {
            wrapper.close().await;
        }
        if let Some(wrapper) = &self.right_wrapper {
            wrapper.close().await;
        }
    }
}

struct Direction {
    source: Arc<dyn NetworkInterface>,
    target: Arc<dyn NetworkInterface>,
    source_wrapper: Option<Arc<dyn NicWrapper>>,
    target_wrapper: Option<Arc<dyn NicWrapper>>,
    dpi_engine: Option<Arc<DpiEngine>>,
    direction: DpiDirection,
    delay: Duration,
    plr: f64,
    rng: Rng,
    cancel: CancellationToken,
}

/// A frame waiting for its delivery deadline. The heap yields the earliest
/// deadline first, breaking ties by emission order.
struct ScheduledFrame {
    deadline: Instant,
    sequence: u64,
    frame: Frame,
}

impl Eq for ScheduledFrame {}

impl PartialEq for ScheduledFrame {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl PartialOrd for ScheduledFrame {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledFrame {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the max-heap yields the next frame to deliver
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.sequence.cmp(&self.sequence))
    }
}

async fn direction_worker(worker: Direction) {
    let Direction {
        source,
        target,
        source_wrapper,
        target_wrapper,
        dpi_engine,
        direction,
        delay,
        plr,
        mut rng,
        cancel,
    } = worker;

    let mut queue: BinaryHeap<ScheduledFrame> = BinaryHeap::new();
    let mut next_sequence: u64 = 0;

    loop {
        let next_deadline = queue.peek().map(|scheduled| scheduled.deadline);
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            _ = sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                if next_deadline.is_some() =>
            {
                let scheduled = queue.pop().expect("scheduled frame present");
                if let Some(wrapper) = &target_wrapper {
                    wrapper.observe_frame(&scheduled.frame);
                }
                if let Err(error) = target.write_frame(scheduled.frame) {
                    debug!(%error, ?direction, "link: target NIC gone, stopping worker");
                    break;
                }
            }

            read = source.read_frame() => {
                let frame = match read {
                    Ok(frame) => frame,
                    Err(error) => {
                        debug!(%error, ?direction, "link: source NIC gone, stopping worker");
                        break;
                    }
                };

                if let Some(wrapper) = &source_wrapper {
                    wrapper.observe_frame(&frame);
                }

                let mut policy = DpiPolicy::default();
                if let Some(engine) = &dpi_engine {
                    let verdict = engine.inspect(direction, &frame);
                    inject_frames(verdict.injections, direction, &source, &target,
                        &source_wrapper, &target_wrapper);
                    match verdict.policy {
                        Some(verdict_policy) => match verdict_policy.flags {
                            DpiFlags::Drop | DpiFlags::SpoofRst => continue,
                            DpiFlags::Hijack => {
                                warn!(?direction, "link: hijack policy not supported, dropping frame");
                                continue;
                            }
                            DpiFlags::None => policy = verdict_policy,
                        },
                        None => {}
                    }
                }

                let loss_probability = plr + policy.plr;
                if loss_probability > 0.0 && rng.f64() < loss_probability {
                    debug!(?direction, "link: frame lost");
                    continue;
                }

                queue.push(ScheduledFrame {
                    deadline: Instant::now() + delay + policy.delay,
                    sequence: next_sequence,
                    frame,
                });
                next_sequence += 1;
            }
        }
    }
}

/// Writes DPI-synthesised frames straight to the NIC they are aimed at,
/// bypassing delay and loss.
fn inject_frames(
    injections: Vec<(DpiDirection, Frame)>,
    direction: DpiDirection,
    source: &Arc<dyn NetworkInterface>,
    target: &Arc<dyn NetworkInterface>,
    source_wrapper: &Option<Arc<dyn NicWrapper>>,
    target_wrapper: &Option<Arc<dyn NicWrapper>>,
) {
    for (injected_direction, frame) in injections {
        let (nic, wrapper) = if injected_direction == direction {
            (target, target_wrapper)
        } else {
            (source, source_wrapper)
        };
        if let Some(wrapper) = wrapper {
            wrapper.observe_frame(&frame);
        }
        if let Err(error) = nic.write_frame(frame) {
            debug!(%error, ?injected_direction, "link: failed to inject frame");
        }
    }
}
