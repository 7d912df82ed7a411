#![allow(clippy::cast_precision_loss)]

use crate::net::eventlog;
use crate::net::message::Message;
use crate::net::path::ObjectPath;
use crate::net::runtime::{ChannelUnbusyNotif, EventSink, NetEvents};
use crate::runtime::{global_seed, SimError};
use crate::time::{Duration, SimTime};
use rand::{prelude::StdRng, Rng, SeedableRng};
use std::cell::{Cell, RefCell};
use std::fmt::Display;
use std::sync::Arc;

///
/// A reference to a channel.
///
pub type ChannelRef = Arc<Channel>;

///
/// Metrics that define a channels capabilities.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelMetrics {
    /// The maximum throughput of the channel in bit/s. Zero means the
    /// channel transmits instantaneously and never becomes busy.
    pub bitrate: usize,
    /// The propagation delay a message endures while traversing the channel.
    pub latency: Duration,
    /// The probability that a whole packet is corrupted in transit.
    pub packet_error_prob: f64,
    /// The probability that a single bit is corrupted in transit.
    pub bit_error_prob: f64,
    /// Whether the channel drops all messages.
    pub disabled: bool,
}

impl ChannelMetrics {
    ///
    /// Creates a new loss-free instance of channel metrics.
    ///
    #[must_use]
    pub const fn new(bitrate: usize, latency: Duration) -> Self {
        Self {
            bitrate,
            latency,
            packet_error_prob: 0.0,
            bit_error_prob: 0.0,
            disabled: false,
        }
    }

    ///
    /// Calculates the duration the channel is busy transmitting the
    /// message onto the medium.
    ///
    #[must_use]
    pub fn calculate_busy(&self, msg: &Message) -> Duration {
        if self.bitrate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(msg.header().bit_len as f64 / self.bitrate as f64)
        }
    }

    ///
    /// The probability that a message of the given length is corrupted,
    /// combining the per-packet and the per-bit error model.
    ///
    #[must_use]
    pub fn error_probability(&self, bits: u64) -> f64 {
        let p_bits = 1.0 - (1.0 - self.bit_error_prob).powi(bits.min(i32::MAX as u64) as i32);
        1.0 - (1.0 - self.packet_error_prob) * (1.0 - p_bits)
    }
}

impl Display for ChannelMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bit/s (+{:?})", self.bitrate, self.latency)
    }
}

impl Eq for ChannelMetrics {}

///
/// The timing contribution of one channel crossing, accumulated over a
/// gate chain to compute the final arrival of a message.
///
pub(crate) struct ChannelCrossing {
    /// The propagation delay of this channel.
    pub(crate) latency: Duration,
    /// The transmission duration on this channel, zero without a rate.
    pub(crate) tx_duration: Duration,
    /// The channel tracking this transmission for update staleness.
    pub(crate) tracker: Option<ChannelRef>,
}

///
/// A representation of a one-directional delayed link between two gates.
///
/// While a rate-limited channel is transmitting, it is *busy*; further plain
/// sends fail with [`SimError::ChannelBusy`] until the transmission finish
/// time. A sender may instead emit an *update* referencing the in-flight
/// message, which replaces the pending delivery (the last update wins).
///
#[derive(Debug)]
pub struct Channel {
    path: ObjectPath,
    metrics: RefCell<ChannelMetrics>,

    busy: Cell<bool>,
    transmission_finish_time: Cell<SimTime>,

    /// The id of the last message put onto the medium, the only valid
    /// target for transmission updates.
    current: Cell<Option<u64>>,

    /// Ids of in-flight messages replaced by an update; their pending
    /// deliveries are dropped on arrival.
    superseded: RefCell<Vec<u64>>,

    /// A dedicated random stream for the error model, derived from the
    /// global seed and the channel path so repeat runs reproduce draws.
    rng: RefCell<Option<StdRng>>,
}

impl Channel {
    ///
    /// Creates a new channel using the given metrics,
    /// with an initially unbusy state.
    ///
    #[must_use]
    pub fn new(path: ObjectPath, metrics: ChannelMetrics) -> ChannelRef {
        Arc::new(Self {
            path,
            metrics: RefCell::new(metrics),
            busy: Cell::new(false),
            transmission_finish_time: Cell::new(SimTime::ZERO),
            current: Cell::new(None),
            superseded: RefCell::new(Vec::new()),
            rng: RefCell::new(None),
        })
    }

    ///
    /// The object path of the channel.
    ///
    #[must_use]
    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    ///
    /// A description of the channels capabilities,
    /// independent of its current state.
    ///
    #[must_use]
    pub fn metrics(&self) -> ChannelMetrics {
        *self.metrics.borrow()
    }

    ///
    /// Enables or disables the channel. Disabled channels drop
    /// all messages.
    ///
    pub fn set_disabled(&self, disabled: bool) {
        self.metrics.borrow_mut().disabled = disabled;
    }

    ///
    /// An indicator whether the channel is currently busy transmitting
    /// a message onto the medium.
    ///
    /// Note that being non-busy does not mean that no message is currently
    /// on the medium, just that all bits have been put onto it.
    ///
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    ///
    /// The time the message currently being transmitted has been fully
    /// put onto the medium, or [`SimTime::ZERO`] if the channel is idle.
    ///
    #[must_use]
    pub fn transmission_finish_time(&self) -> SimTime {
        self.transmission_finish_time.get()
    }

    /// The number of initialization stages of this channel.
    #[must_use]
    pub fn num_init_stages(&self) -> usize {
        1
    }

    /// Runs one initialization stage. Channels complete each stage before
    /// any module runs the same stage, so modules may transmit in stage 0.
    pub fn init_stage(&self, stage: usize) {
        if stage == 0 {
            self.seed_rng();
        }
    }

    fn seed_rng(&self) {
        let seed = global_seed() ^ fxhash::hash64(self.path.as_str());
        *self.rng.borrow_mut() = Some(StdRng::seed_from_u64(seed));
    }

    fn draw_corruption(&self, bits: u64) -> bool {
        let p = self.metrics.borrow().error_probability(bits);
        if p <= 0.0 {
            return false;
        }
        let mut rng = self.rng.borrow_mut();
        let rng = rng.get_or_insert_with(|| {
            StdRng::seed_from_u64(global_seed() ^ fxhash::hash64(self.path.as_str()))
        });
        rng.gen::<f64>() < p
    }

    ///
    /// Lets a message cross this channel: consults the busy window, applies
    /// the error model, marks the busy period and schedules the unbusy
    /// notification. The caller accumulates the returned timing over the
    /// whole gate chain and schedules the final delivery.
    ///
    /// Returns `None` if the channel discarded the message.
    ///
    /// # Errors
    ///
    /// Fails with [`SimError::ChannelBusy`] when a plain send hits a busy
    /// transmission window.
    ///
    pub(crate) fn process_message(
        self: ChannelRef,
        msg: &mut Message,
        sink: &mut impl EventSink,
    ) -> Result<Option<ChannelCrossing>, SimError> {
        let metrics = *self.metrics.borrow();
        let now = SimTime::now();

        if metrics.disabled {
            tracing::warn!(
                "channel '{}' dropped message [{}]: channel is disabled",
                self.path,
                msg.str()
            );
            return Ok(None);
        }

        let is_matching_update = msg
            .header()
            .update_of
            .is_some_and(|orig| self.busy.get() && self.current.get() == Some(orig));

        if self.busy.get() && !is_matching_update {
            return Err(SimError::ChannelBusy {
                channel: self.path.as_str().to_string(),
                until: self.transmission_finish_time.get(),
            });
        }
        if !is_matching_update && msg.header().update_of.is_some() {
            // a dangling update reference degrades to a plain send
            msg.header_mut().update_of = None;
        }

        if self.draw_corruption(msg.header().bit_len) {
            msg.header_mut().bit_errors = true;
        }

        if is_matching_update {
            if let Some(orig) = msg.header().update_of {
                self.superseded.borrow_mut().push(orig);
            }
        }

        let busy_dur = metrics.calculate_busy(msg);
        let tracker = if busy_dur > Duration::ZERO {
            let finish = now + busy_dur;
            self.busy.set(true);
            self.transmission_finish_time.set(finish);
            self.current.set(Some(msg.id()));
            eventlog::log_record('B', msg.header().sender_module_id, msg.id());

            sink.add(
                NetEvents::ChannelUnbusyNotif(ChannelUnbusyNotif {
                    channel: Arc::clone(&self),
                }),
                finish,
                0,
            );
            Some(self)
        } else if is_matching_update {
            // a zero-length update leaves the busy window untouched,
            // but still supersedes the pending delivery
            self.current.set(Some(msg.id()));
            Some(self)
        } else {
            None
        };

        Ok(Some(ChannelCrossing {
            latency: metrics.latency,
            tx_duration: busy_dur,
            tracker,
        }))
    }

    /// Whether the delivery of the given message was superseded by a
    /// transmission update. Consumes the marker.
    pub(crate) fn take_superseded(&self, message_id: u64) -> bool {
        let mut superseded = self.superseded.borrow_mut();
        if let Some(idx) = superseded.iter().position(|id| *id == message_id) {
            superseded.swap_remove(idx);
            true
        } else {
            false
        }
    }

    ///
    /// Resets the busy state of the channel. Notifications of superseded
    /// transmission windows are ignored.
    ///
    pub(crate) fn unbusy(&self) {
        if SimTime::now() != self.transmission_finish_time.get() {
            return;
        }
        self.busy.set(false);
        self.transmission_finish_time.set(SimTime::ZERO);
    }

}

impl Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Channel {{ {} {} }}", self.path, self.metrics.borrow())
    }
}

unsafe impl Send for Channel {}
unsafe impl Sync for Channel {}
