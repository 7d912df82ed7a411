use super::{ModuleId, ModuleRef, ModuleRefWeak};
use crate::net::gate::{GateDesc, GateHalf, GateId, GateRef, GateType};
use crate::net::path::ObjectPath;
use crate::net::signal::ListenerEntry;
use spin::RwLock;
use std::fmt::Debug;
use std::sync::{
    atomic::{AtomicBool, Ordering::SeqCst},
    Arc,
};

pub(crate) static MOD_CTX: RwLock<Option<Arc<ModuleContext>>> = RwLock::new(None);

///
/// The topological state of a module: its place in the module tree, its
/// gate table and its attached listeners, independent of the user software
/// driving it.
///
/// The context of the module a delivery currently addresses is placed into
/// a global scope slot, so module code can reach it through
/// [`current`](super::current) and the free send/schedule functions.
///
pub struct ModuleContext {
    pub(crate) active: AtomicBool,
    pub(crate) initialized: AtomicBool,
    pub(crate) id: ModuleId,
    pub(crate) path: ObjectPath,

    pub(crate) gates: RwLock<Vec<GateDesc>>,
    pub(crate) display: RwLock<String>,
    pub(crate) listeners: RwLock<Vec<ListenerEntry>>,

    pub(crate) parent: Option<ModuleRefWeak>,
    pub(crate) children: RwLock<Vec<ModuleRef>>,
}

impl ModuleContext {
    pub(crate) fn new(path: ObjectPath, parent: Option<ModuleRefWeak>) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
            initialized: AtomicBool::new(false),
            id: ModuleId::gen(),
            path,
            gates: RwLock::new(Vec::new()),
            display: RwLock::new(String::new()),
            listeners: RwLock::new(Vec::new()),
            parent,
            children: RwLock::new(Vec::new()),
        })
    }

    /// A runtime-unique identifier for this module, stable from creation
    /// until deletion.
    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// The full tree path of this module.
    #[must_use]
    pub fn path(&self) -> ObjectPath {
        self.path.clone()
    }

    /// The name of this module, the last component of its path.
    #[must_use]
    pub fn name(&self) -> String {
        self.path.name().to_string()
    }

    /// Whether this module processes events. Shut-down or deleted
    /// modules silently drop incoming messages.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(SeqCst)
    }

    /// Whether this module completed its initialization stages.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(SeqCst)
    }

    /// The display string of this module, opaque to the kernel.
    #[must_use]
    pub fn display_string(&self) -> String {
        self.display.read().clone()
    }

    /// Replaces the display string of this module.
    pub fn set_display_string(&self, display: impl Into<String>) {
        *self.display.write() = display.into();
    }

    /// An unstructured list of all instantiated gate halves of this module.
    #[must_use]
    pub fn gates(&self) -> Vec<GateRef> {
        let lock = self.gates.read();
        lock.iter()
            .flat_map(|desc| desc.input.iter().chain(desc.output.iter()).cloned())
            .collect()
    }

    ///
    /// A gate of this module, addressed by name and vector position.
    ///
    /// Inout gates must be addressed with the `$i` / `$o` suffix
    /// discriminating the half; plain names resolve the natural half of
    /// input and output gates.
    ///
    #[must_use]
    pub fn gate(&self, name: &str, pos: usize) -> Option<GateRef> {
        let (base, half) = split_half_suffix(name);
        let lock = self.gates.read();
        let desc = lock.iter().find(|d| d.name == base)?;
        let half = match half {
            Some(half) => half,
            None => match desc.typ {
                GateType::Input => GateHalf::Input,
                GateType::Output => GateHalf::Output,
                // ambiguous without a half suffix
                GateType::InOut => return None,
            },
        };
        desc.half(half).get(pos).cloned()
    }

    /// A gate of this module, addressed by name, half and vector position.
    #[must_use]
    pub fn gate_half(&self, name: &str, half: GateHalf, pos: usize) -> Option<GateRef> {
        let lock = self.gates.read();
        let desc = lock.iter().find(|d| d.name == name)?;
        desc.half(half).get(pos).cloned()
    }

    /// Constant-time lookup of a gate by its packed id.
    #[must_use]
    pub fn gate_by_id(&self, id: GateId) -> Option<GateRef> {
        let lock = self.gates.read();
        let desc = lock.get(id.desc_index())?;
        if desc.vector != id.is_vector() {
            return None;
        }
        desc.half(id.half()).get(id.pos()).cloned()
    }

    /// Whether a gate descriptor with the given name exists.
    #[must_use]
    pub fn has_gate(&self, name: &str) -> bool {
        self.gates.read().iter().any(|d| d.name == name)
    }

    /// The current size of the named gate vector, or 0 if no such
    /// descriptor exists. Scalar gates report size 1.
    #[must_use]
    pub fn gate_size(&self, name: &str) -> usize {
        let lock = self.gates.read();
        lock.iter()
            .find(|d| d.name == name)
            .map_or(0, GateDesc::size)
    }

    /// The parent module, if any.
    #[must_use]
    pub fn parent(&self) -> Option<ModuleRef> {
        self.parent.as_ref()?.upgrade()
    }

    /// The first child module with the given name, if any.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<ModuleRef> {
        self.children
            .read()
            .iter()
            .find(|child| child.ctx.path.name() == name)
            .cloned()
    }

    /// All child modules, in creation order.
    #[must_use]
    pub fn children(&self) -> Vec<ModuleRef> {
        self.children.read().clone()
    }

    ///
    /// Disconnects all gates and deactivates this module and its children,
    /// bottom-up. The subtree is dropped once the last reference goes away.
    ///
    pub(crate) fn tear_down(&self) {
        let children = self.children();
        for child in &children {
            child.ctx.tear_down();
        }
        self.children.write().clear();

        for gate in self.gates() {
            gate.unlink();
        }
        self.gates.write().clear();
        self.listeners.write().clear();
        self.active.store(false, SeqCst);
    }

    pub(crate) fn place(self: Arc<Self>) -> Option<Arc<ModuleContext>> {
        std::mem::replace(&mut *MOD_CTX.write(), Some(self))
    }

    pub(crate) fn take() -> Option<Arc<ModuleContext>> {
        MOD_CTX.write().take()
    }
}

pub(crate) fn split_half_suffix(name: &str) -> (&str, Option<GateHalf>) {
    if let Some(base) = name.strip_suffix("$i") {
        (base, Some(GateHalf::Input))
    } else if let Some(base) = name.strip_suffix("$o") {
        (base, Some(GateHalf::Output))
    } else {
        (name, None)
    }
}

pub(crate) fn with_ctx<R>(f: impl FnOnce(&Arc<ModuleContext>) -> R) -> R {
    let lock = MOD_CTX.read();
    let ctx = lock
        .as_ref()
        .expect("failed operation: no module currently in scope");
    f(ctx)
}

pub(crate) fn try_with_ctx<R>(f: impl FnOnce(&Arc<ModuleContext>) -> R) -> Option<R> {
    let lock = MOD_CTX.read();
    lock.as_ref().map(f)
}

impl Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("path", &self.path)
            .field("id", &self.id)
            .finish()
    }
}

unsafe impl Send for ModuleContext {}
unsafe impl Sync for ModuleContext {}
