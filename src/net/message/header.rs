use crate::net::gate::{GateId, GateRef};
use crate::net::module::ModuleId;
use crate::time::{Duration, SimTime};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

///
/// A process-wide unique identifier of a message. Clones created with
/// `dup` receive fresh ids but share the originals tree id.
///
pub type MessageId = u64;

///
/// The user-assigned meaning of a message. Negative kinds are
/// reserved for the kernel.
///
pub type MessageKind = i16;

pub(crate) const KIND_WAKEUP: MessageKind = -1;

static MESSAGE_ID: AtomicU64 = AtomicU64::new(1);
static MESSAGES_CREATED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_LIVE: AtomicU64 = AtomicU64::new(0);

pub(crate) fn next_message_id() -> MessageId {
    MESSAGE_ID.fetch_add(1, Ordering::SeqCst)
}

pub(crate) fn register_message_created() {
    MESSAGES_CREATED.fetch_add(1, Ordering::SeqCst);
    MESSAGES_LIVE.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn register_message_dropped() {
    MESSAGES_LIVE.fetch_sub(1, Ordering::SeqCst);
}

///
/// The process-wide message statistics: `(total created, currently live)`.
///
#[must_use]
pub fn message_count() -> (u64, u64) {
    (
        MESSAGES_CREATED.load(Ordering::SeqCst),
        MESSAGES_LIVE.load(Ordering::SeqCst),
    )
}

///
/// Resets the process-wide message statistics.
///
pub fn reset_message_count() {
    MESSAGES_CREATED.store(0, Ordering::SeqCst);
    MESSAGES_LIVE.store(0, Ordering::SeqCst);
}

///
/// The metadata attached to a message, independent of its contents.
///
#[derive(Debug, Clone)]
pub struct MessageHeader {
    pub(crate) id: MessageId,
    pub(crate) tree_id: MessageId,

    /// The user-assigned meaning of the message.
    pub kind: MessageKind,
    /// The scheduling priority: lower values are delivered first
    /// among events with equal arrival time.
    pub priority: i16,

    /// The time the message object was created.
    pub creation_time: SimTime,
    /// The time the message was last sent or scheduled.
    pub send_time: SimTime,
    /// The time the message arrives (or arrived) at its target.
    pub arrival_time: SimTime,
    /// A freely usable user timestamp.
    pub timestamp: SimTime,

    /// The module that sent or scheduled the message.
    pub sender_module_id: ModuleId,
    /// The module the message was delivered to.
    pub receiver_module_id: ModuleId,
    /// The gate the message was sent onto, `None` for self-messages.
    pub sender_gate_id: Option<GateId>,
    /// The gate the message arrived at, `None` for self-messages.
    pub arrival_gate_id: Option<GateId>,
    /// The last gate the message passed, by reference.
    pub last_gate: Option<GateRef>,

    /// The partition this message belongs to in multi-partition runs.
    pub partition_id: u16,

    /// The payload length in bits, used for transmission timing.
    pub bit_len: u64,
    /// The transmission duration attached by a rate-limited channel.
    pub duration: Duration,
    /// Whether the message was delivered at reception start
    /// rather than at reception end.
    pub reception_start: bool,
    /// The in-flight transmission this message updates, if any.
    pub update_of: Option<MessageId>,
    /// Whether the channel error model corrupted this message.
    pub bit_errors: bool,

    pub(crate) self_message: bool,
}

impl MessageHeader {
    /// The unique id of the message.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// The id shared by all duplicates in this messages clone tree.
    #[must_use]
    pub fn tree_id(&self) -> MessageId {
        self.tree_id
    }

    /// Whether this message was scheduled by its receiver for itself.
    #[must_use]
    pub fn is_self_message(&self) -> bool {
        self.self_message
    }

    /// Whether this message updates an in-flight transmission.
    #[must_use]
    pub fn is_update(&self) -> bool {
        self.update_of.is_some()
    }

    /// A semantic copy with a fresh id, an inherited tree id and a
    /// preserved creation time. Send metadata is reset.
    pub(super) fn dup(&self) -> Self {
        Self {
            id: next_message_id(),
            tree_id: self.tree_id,

            kind: self.kind,
            priority: self.priority,

            creation_time: self.creation_time,
            send_time: SimTime::MAX,
            arrival_time: SimTime::MAX,
            timestamp: self.timestamp,

            sender_module_id: ModuleId::NULL,
            receiver_module_id: ModuleId::NULL,
            sender_gate_id: None,
            arrival_gate_id: None,
            last_gate: self.last_gate.as_ref().map(Arc::clone),

            partition_id: self.partition_id,

            bit_len: self.bit_len,
            duration: self.duration,
            reception_start: false,
            update_of: None,
            bit_errors: self.bit_errors,

            self_message: false,
        }
    }
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self {
            id: 0,
            tree_id: 0,

            kind: 0,
            priority: 0,

            creation_time: SimTime::now(),
            send_time: SimTime::MAX,
            arrival_time: SimTime::MAX,
            timestamp: SimTime::ZERO,

            sender_module_id: ModuleId::NULL,
            receiver_module_id: ModuleId::NULL,
            sender_gate_id: None,
            arrival_gate_id: None,
            last_gate: None,

            partition_id: 0,

            bit_len: 0,
            duration: Duration::ZERO,
            reception_start: false,
            update_of: None,
            bit_errors: false,

            self_message: false,
        }
    }
}
