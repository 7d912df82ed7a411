//! Module-specific message insertion and extraction points.

use crate::net::channel::ChannelRef;
use crate::net::module::{ModuleContext, ModuleRef, ModuleRefWeak};
use crate::runtime::SimError;
use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::sync::{Arc, Weak};

///
/// A reference to a gate.
///
pub type GateRef = Arc<Gate>;

///
/// A weak reference to a gate.
///
pub(crate) type GateRefWeak = Weak<Gate>;

///
/// The direction of a single gate half.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateHalf {
    /// Messages are extracted here and delivered to the owner.
    Input,
    /// Messages are inserted here by the owner.
    Output,
}

///
/// The declared type of a gate descriptor.
///
/// An `InOut` gate is modeled as a pair of input and output halves
/// sharing one name, addressed with the `$i` / `$o` suffix.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateType {
    /// A gate that accepts incoming connections.
    Input,
    /// A gate that points to another gate.
    Output,
    /// A paired input/output gate.
    InOut,
}

impl GateType {
    pub(crate) fn has_half(self, half: GateHalf) -> bool {
        match self {
            Self::Input => half == GateHalf::Input,
            Self::Output => half == GateHalf::Output,
            Self::InOut => true,
        }
    }
}

const HALF_BIT: u32 = 1 << 15;
const LOW_MASK: u32 = HALF_BIT - 1;

/// The largest admissible vector index / descriptor index.
pub const MAX_GATE_VECTOR_SIZE: usize = LOW_MASK as usize;

///
/// A stable numeric identifier of a gate within its owning module.
///
/// The encoding packs `{descriptor index, half, vector index}` into 32 bits:
/// the high 16-bit block holds `descriptor index + 1` for vector gates and
/// zero for scalar gates; the low block holds the half bit and either the
/// vector index (vector) or the descriptor index (scalar). Both directions
/// of the mapping are constant-time.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct GateId(u32);

impl GateId {
    pub(crate) fn new(desc_index: usize, half: GateHalf, pos: usize, vector: bool) -> Self {
        let half_bit = match half {
            GateHalf::Input => 0,
            GateHalf::Output => HALF_BIT,
        };
        if vector {
            assert!(desc_index + 1 <= u16::MAX as usize && pos <= LOW_MASK as usize);
            Self((((desc_index + 1) as u32) << 16) | half_bit | pos as u32)
        } else {
            assert!(desc_index <= LOW_MASK as usize);
            Self(half_bit | desc_index as u32)
        }
    }

    /// Whether the addressed gate belongs to a vector descriptor.
    #[must_use]
    pub fn is_vector(&self) -> bool {
        (self.0 >> 16) != 0
    }

    /// The index of the descriptor within the owning modules gate table.
    #[must_use]
    pub fn desc_index(&self) -> usize {
        if self.is_vector() {
            (self.0 >> 16) as usize - 1
        } else {
            (self.0 & LOW_MASK) as usize
        }
    }

    /// The addressed half.
    #[must_use]
    pub fn half(&self) -> GateHalf {
        if self.0 & HALF_BIT == 0 {
            GateHalf::Input
        } else {
            GateHalf::Output
        }
    }

    /// The vector index of the addressed gate, 0 for scalar gates.
    #[must_use]
    pub fn pos(&self) -> usize {
        if self.is_vector() {
            (self.0 & LOW_MASK) as usize
        } else {
            0
        }
    }

    /// The raw 32 bit representation.
    #[must_use]
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Reconstructs a gate id from its raw representation.
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

///
/// An entry of a modules gate table, describing one named (scalar or
/// vector) gate and owning its instantiated halves.
///
#[derive(Debug)]
pub(crate) struct GateDesc {
    pub(crate) name: String,
    pub(crate) typ: GateType,
    pub(crate) vector: bool,
    pub(crate) input: Vec<GateRef>,
    pub(crate) output: Vec<GateRef>,
}

impl GateDesc {
    pub(crate) fn half(&self, half: GateHalf) -> &Vec<GateRef> {
        match half {
            GateHalf::Input => &self.input,
            GateHalf::Output => &self.output,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.input.len().max(self.output.len())
    }
}

///
/// A gate, a message insertion or extraction point used for
/// connecting modules through channels.
///
pub struct Gate {
    owner: ModuleRefWeak,
    name: String,
    desc_index: usize,
    half: GateHalf,
    pos: usize,
    vector: bool,

    channel: RefCell<Option<ChannelRef>>,
    next_gate: RefCell<Option<GateRef>>,
    previous_gate: RefCell<Option<GateRefWeak>>,

    deliver_on_reception_start: Cell<bool>,
}

impl Gate {
    pub(crate) fn new(
        owner: &ModuleRef,
        name: impl AsRef<str>,
        desc_index: usize,
        half: GateHalf,
        pos: usize,
        vector: bool,
    ) -> GateRef {
        GateRef::new(Self {
            owner: ModuleRefWeak::new(owner),
            name: name.as_ref().to_string(),
            desc_index,
            half,
            pos,
            vector,
            channel: RefCell::new(None),
            next_gate: RefCell::new(None),
            previous_gate: RefCell::new(None),
            deliver_on_reception_start: Cell::new(false),
        })
    }

    ///
    /// The human-readable name of the gate descriptor this gate belongs to.
    ///
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    ///
    /// The position index of the gate within its descriptor.
    ///
    #[must_use]
    pub fn pos(&self) -> usize {
        self.pos
    }

    ///
    /// Whether this gate belongs to a vector descriptor.
    ///
    #[must_use]
    pub fn is_vector(&self) -> bool {
        self.vector
    }

    ///
    /// The half (input or output) this gate represents.
    ///
    #[must_use]
    pub fn half(&self) -> GateHalf {
        self.half
    }

    ///
    /// The stable id of this gate within its owning module.
    ///
    #[must_use]
    pub fn id(&self) -> GateId {
        GateId::new(self.desc_index, self.half, self.pos, self.vector)
    }

    fn name_with_pos(&self) -> String {
        if self.vector {
            format!("{}[{}]", self.name, self.pos)
        } else {
            self.name.clone()
        }
    }

    ///
    /// A short identifier that holds all necessary information.
    ///
    #[must_use]
    pub fn str(&self) -> String {
        match self.half {
            GateHalf::Input => format!("{} (input)", self.name_with_pos()),
            GateHalf::Output => format!("{} (output)", self.name_with_pos()),
        }
    }

    ///
    /// The full tree path of the gate.
    ///
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}:{}", self.owner().path(), self.name_with_pos())
    }

    ///
    /// The owner module of this gate, by reference.
    ///
    /// # Panics
    ///
    /// May panic when called during drop, since the owner may already
    /// be dropped.
    ///
    #[must_use]
    pub fn owner(&self) -> ModuleRef {
        self.owner.upgrade().expect("gate owner was dropped")
    }

    ///
    /// The previous gate in the gate chain, by reference.
    ///
    #[must_use]
    pub fn previous_gate(&self) -> Option<GateRef> {
        self.previous_gate.borrow().clone()?.upgrade()
    }

    ///
    /// The next gate in the gate chain, by reference.
    ///
    #[must_use]
    pub fn next_gate(&self) -> Option<GateRef> {
        self.next_gate.borrow().clone()
    }

    ///
    /// Whether this gate is linked to a predecessor or successor.
    ///
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.next_gate.borrow().is_some() || self.previous_gate().is_some()
    }

    pub(crate) fn link(this: &GateRef, next_gate: GateRef) {
        *next_gate.previous_gate.borrow_mut() = Some(Arc::downgrade(this));
        *this.next_gate.borrow_mut() = Some(next_gate);
    }

    pub(crate) fn unlink(&self) {
        if let Some(next) = self.next_gate.borrow_mut().take() {
            *next.previous_gate.borrow_mut() = None;
        }
        if let Some(prev) = self.previous_gate() {
            *prev.next_gate.borrow_mut() = None;
        }
        *self.previous_gate.borrow_mut() = None;
        *self.channel.borrow_mut() = None;
    }

    ///
    /// Connects this gate to a successor, optionally mediated by a channel.
    ///
    /// Valid links lead from an output half towards an input half: either
    /// directly, from a child output up to a parent output, or from a parent
    /// input down to a child input.
    ///
    /// # Errors
    ///
    /// Fails with [`SimError::GateMismatch`] if either endpoint is already
    /// linked in the relevant direction, or the halves cannot be chained.
    ///
    pub fn connect(
        self: GateRef,
        next_gate: GateRef,
        channel: Option<ChannelRef>,
    ) -> Result<(), SimError> {
        if self.next_gate.borrow().is_some() {
            return Err(SimError::GateMismatch {
                reason: format!("gate '{}' already has a successor", self.path()),
            });
        }
        if next_gate.previous_gate().is_some() {
            return Err(SimError::GateMismatch {
                reason: format!("gate '{}' already has a predecessor", next_gate.path()),
            });
        }
        if self.half == GateHalf::Input && next_gate.half == GateHalf::Output {
            return Err(SimError::GateMismatch {
                reason: format!(
                    "cannot connect input gate '{}' to output gate '{}'",
                    self.path(),
                    next_gate.path()
                ),
            });
        }

        if let Some(channel) = channel {
            *self.channel.borrow_mut() = Some(channel);
        }
        Gate::link(&self, next_gate);
        Ok(())
    }

    ///
    /// The channel attached to this gate, if any exists.
    ///
    #[must_use]
    pub fn channel(&self) -> Option<ChannelRef> {
        Some(Arc::clone(self.channel.borrow().as_ref()?))
    }

    ///
    /// Attaches a channel to this gate.
    ///
    pub fn set_channel(&self, channel: ChannelRef) {
        *self.channel.borrow_mut() = Some(channel);
    }

    ///
    /// Whether messages terminating here are delivered when their
    /// reception starts, instead of when it completes.
    ///
    #[must_use]
    pub fn deliver_on_reception_start(&self) -> bool {
        self.deliver_on_reception_start.get()
    }

    ///
    /// Switches this (input) gate between delivery at reception
    /// start and delivery at reception end.
    ///
    pub fn set_deliver_on_reception_start(&self, value: bool) {
        self.deliver_on_reception_start.set(value);
    }

    ///
    /// Follows the previous-gate references until a gate without
    /// a predecessor is found.
    ///
    #[must_use]
    pub fn path_start(&self) -> Option<GateRef> {
        let mut current = self.previous_gate()?;
        while let Some(previous_gate) = current.previous_gate() {
            current = previous_gate;
        }
        Some(current)
    }

    ///
    /// Follows the next-gate references until a gate without
    /// a successor is found.
    ///
    #[must_use]
    pub fn path_end(&self) -> Option<GateRef> {
        let mut current = self.next_gate()?;
        while let Some(next_gate) = current.next_gate() {
            current = next_gate;
        }
        Some(current)
    }
}

impl Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("path", &self.path())
            .field("half", &self.half)
            .finish()
    }
}

// Comparing next/previous pointers would recurse through the chain,
// so equality is structural over the endpoint only.
impl PartialEq for Gate {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.pos == other.pos
            && self.half == other.half
            && self.owner().id() == other.owner().id()
    }
}
impl Eq for Gate {}

mod private {
    pub trait Sealed {}
}

///
/// A trait for types that can identify a gate of a module.
///
pub trait IntoModuleGate: private::Sealed {
    ///
    /// Extracts a gate reference from a module, using the given
    /// value as an implicit reference.
    ///
    fn as_gate(&self, _module: &ModuleContext) -> Option<GateRef> {
        None
    }
}

impl IntoModuleGate for GateRef {
    fn as_gate(&self, _module: &ModuleContext) -> Option<GateRef> {
        Some(self.clone())
    }
}
impl private::Sealed for GateRef {}

impl IntoModuleGate for &GateRef {
    fn as_gate(&self, _module: &ModuleContext) -> Option<GateRef> {
        Some(GateRef::clone(self))
    }
}
impl private::Sealed for &GateRef {}

impl IntoModuleGate for GateId {
    fn as_gate(&self, module: &ModuleContext) -> Option<GateRef> {
        module.gate_by_id(*self)
    }
}
impl private::Sealed for GateId {}

impl IntoModuleGate for (&str, usize) {
    fn as_gate(&self, module: &ModuleContext) -> Option<GateRef> {
        module.gate(self.0, self.1)
    }
}
impl private::Sealed for (&str, usize) {}

impl IntoModuleGate for &str {
    fn as_gate(&self, module: &ModuleContext) -> Option<GateRef> {
        module.gate(self, 0)
    }
}
impl private::Sealed for &str {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_id_round_trip() {
        for (desc, half, pos, vector) in [
            (0, GateHalf::Input, 0, false),
            (7, GateHalf::Output, 0, false),
            (0, GateHalf::Input, 0, true),
            (3, GateHalf::Output, 511, true),
            (1023, GateHalf::Input, 32000, true),
        ] {
            let id = GateId::new(desc, half, pos, vector);
            assert_eq!(id.desc_index(), desc);
            assert_eq!(id.half(), half);
            assert_eq!(id.pos(), pos);
            assert_eq!(id.is_vector(), vector);
            assert_eq!(GateId::from_raw(id.raw()), id);
        }
    }

    #[test]
    fn scalar_ids_have_zero_high_block() {
        let id = GateId::new(42, GateHalf::Input, 0, false);
        assert_eq!(id.raw() >> 16, 0);
        let id = GateId::new(0, GateHalf::Output, 0, true);
        assert_ne!(id.raw() >> 16, 0);
    }
}
