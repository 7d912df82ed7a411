use super::{Module, ModuleContext};
use crate::net::gate::{Gate, GateDesc, GateHalf, GateRef, GateType, MAX_GATE_VECTOR_SIZE};
use crate::net::path::ObjectPath;
use crate::runtime::SimError;
use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt::Debug;
use std::ops::Deref;
use std::sync::{Arc, Weak};

#[derive(Clone)]
pub(crate) struct ModuleRefWeak {
    ctx: Weak<ModuleContext>,
    handler: Weak<RefCell<Box<dyn Module>>>,
}

impl ModuleRefWeak {
    pub(crate) fn new(strong: &ModuleRef) -> Self {
        Self {
            ctx: Arc::downgrade(&strong.ctx),
            handler: Arc::downgrade(&strong.handler),
        }
    }

    pub(crate) fn upgrade(&self) -> Option<ModuleRef> {
        Some(ModuleRef {
            ctx: self.ctx.upgrade()?,
            handler: self.handler.upgrade()?,
        })
    }
}

impl Debug for ModuleRefWeak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRefWeak").finish()
    }
}

///
/// A reference to a module: its topological context plus the attached
/// user software.
///
#[derive(Clone)]
pub struct ModuleRef {
    pub(crate) ctx: Arc<ModuleContext>,
    pub(crate) handler: Arc<RefCell<Box<dyn Module>>>,
}

impl Deref for ModuleRef {
    type Target = ModuleContext;
    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

impl ModuleRef {
    pub(crate) fn new(ctx: Arc<ModuleContext>, module: impl Module) -> Self {
        let boxed: Box<dyn Module> = Box::new(module);
        Self {
            ctx,
            handler: Arc::new(RefCell::new(boxed)),
        }
    }

    /// Creates a root module outside any parent.
    pub(crate) fn standalone(path: ObjectPath, module: impl Module) -> Self {
        Self::new(ModuleContext::new(path, None), module)
    }

    /// Creates a module within the tree, registered with its parent.
    pub(crate) fn child_of(name: &str, parent: &ModuleRef, module: impl Module) -> Self {
        let path = parent.ctx.path.appended(name);
        let this = Self::new(
            ModuleContext::new(path, Some(ModuleRefWeak::new(parent))),
            module,
        );
        parent.ctx.children.write().push(this.clone());
        this
    }

    ///
    /// Borrows the referenced modules software as a readonly reference
    /// to the provided type T.
    ///
    /// # Panics
    ///
    /// Panics if the module is not of type T, or is already borrowed
    /// mutably (e.g. the reference points to the currently executing
    /// module).
    ///
    #[must_use]
    pub fn as_ref<T: Any>(&self) -> Ref<'_, T> {
        self.try_as_ref::<T>()
            .expect("failed to cast module reference to type T")
    }

    ///
    /// Tries to borrow the referenced modules software as a readonly
    /// reference to the provided type T. Returns `None` if the software
    /// is not of type T.
    ///
    #[must_use]
    pub fn try_as_ref<T: Any>(&self) -> Option<Ref<'_, T>> {
        let brw = self.handler.borrow();
        let rf = &**brw;
        if rf.type_id() == TypeId::of::<T>() {
            // SAFETY: The type id was checked above, and the pointee is kept
            // alive by the Arc while the Ref upholds the borrow invariants.
            Some(Ref::map(brw, |brw| unsafe {
                let hpt: *const dyn Module = &**brw;
                &*(hpt.cast::<T>())
            }))
        } else {
            None
        }
    }

    ///
    /// Borrows the referenced modules software as a mutable reference
    /// to the provided type T.
    ///
    /// # Panics
    ///
    /// Panics if the module is not of type T, or is already borrowed.
    ///
    #[must_use]
    pub fn as_mut<T: Any>(&self) -> RefMut<'_, T> {
        self.try_as_mut()
            .expect("failed to cast module reference to type T")
    }

    ///
    /// Tries to borrow the referenced modules software as a mutable
    /// reference to the provided type T. Returns `None` if the software
    /// is not of type T.
    ///
    #[must_use]
    pub fn try_as_mut<T: Any>(&self) -> Option<RefMut<'_, T>> {
        let brw = self.handler.borrow_mut();
        let rf = &**brw;
        if rf.type_id() == TypeId::of::<T>() {
            // SAFETY: see `try_as_ref`
            Some(RefMut::map(brw, |brw| unsafe {
                let hpt: *mut dyn Module = &mut **brw;
                &mut *(hpt.cast::<T>())
            }))
        } else {
            None
        }
    }

    /// Places this modules context into the global scope slot.
    pub(crate) fn activate(&self) {
        ModuleContext::place(Arc::clone(&self.ctx));
    }

    /// Removes this modules context from the global scope slot.
    pub(crate) fn deactivate(&self) {
        let _ = ModuleContext::take();
    }
}

// # Gate table operations

impl ModuleRef {
    fn desc_index(&self, name: &str) -> Option<usize> {
        self.ctx.gates.read().iter().position(|d| d.name == name)
    }

    ///
    /// Appends a gate descriptor to this modules gate table and
    /// instantiates its halves.
    ///
    /// Scalar descriptors pre-allocate their halves; vector descriptors
    /// start empty and grow through [`set_gate_size`](Self::set_gate_size).
    ///
    /// # Panics
    ///
    /// Panics if a descriptor with this name already exists.
    ///
    pub fn add_gate(&self, name: &str, typ: GateType, vector: bool) {
        assert!(
            self.desc_index(name).is_none(),
            "cannot create gate '{}' on '{}': name already in use",
            name,
            self.ctx.path
        );

        let desc_index = self.ctx.gates.read().len();
        let mut desc = GateDesc {
            name: name.to_string(),
            typ,
            vector,
            input: Vec::new(),
            output: Vec::new(),
        };
        if !vector {
            if typ.has_half(GateHalf::Input) {
                desc.input
                    .push(Gate::new(self, name, desc_index, GateHalf::Input, 0, false));
            }
            if typ.has_half(GateHalf::Output) {
                desc.output
                    .push(Gate::new(self, name, desc_index, GateHalf::Output, 0, false));
            }
        }
        self.ctx.gates.write().push(desc);
    }

    ///
    /// Creates a scalar input or output gate, returning it.
    ///
    /// # Panics
    ///
    /// Panics for `GateType::InOut`; use [`create_gate_pair`](Self::create_gate_pair).
    ///
    #[must_use]
    pub fn create_gate(&self, name: &str, typ: GateType) -> GateRef {
        assert!(
            typ != GateType::InOut,
            "inout gates are created with 'create_gate_pair'"
        );
        self.add_gate(name, typ, false);
        self.ctx
            .gate(name, 0)
            .expect("gate was appended to the table")
    }

    ///
    /// Creates a scalar inout gate, returning `(input half, output half)`.
    ///
    #[must_use]
    pub fn create_gate_pair(&self, name: &str) -> (GateRef, GateRef) {
        self.add_gate(name, GateType::InOut, false);
        (
            self.ctx
                .gate_half(name, GateHalf::Input, 0)
                .expect("gate was appended to the table"),
            self.ctx
                .gate_half(name, GateHalf::Output, 0)
                .expect("gate was appended to the table"),
        )
    }

    ///
    /// Creates a vector gate of the given initial size, returning the
    /// created gates of its natural half.
    ///
    /// # Panics
    ///
    /// Panics for `GateType::InOut`.
    ///
    pub fn create_gate_cluster(&self, name: &str, typ: GateType, size: usize) -> Vec<GateRef> {
        assert!(
            typ != GateType::InOut,
            "inout gate clusters are resized with 'set_gate_size' after 'add_gate'"
        );
        self.add_gate(name, typ, true);
        self.set_gate_size(name, size)
            .expect("fresh gate vector cannot have connected slots");
        let half = match typ {
            GateType::Input => GateHalf::Input,
            GateType::Output | GateType::InOut => GateHalf::Output,
        };
        let lock = self.ctx.gates.read();
        lock.iter()
            .find(|d| d.name == name)
            .map(|d| d.half(half).clone())
            .unwrap_or_default()
    }

    ///
    /// Grows or shrinks a vector gate to the given size.
    ///
    /// # Errors
    ///
    /// Shrinking fails with [`SimError::GateStillConnected`] if any removed
    /// slot is still connected; the vector is left untouched in that case.
    ///
    /// # Panics
    ///
    /// Panics if no vector descriptor with this name exists, or the new
    /// size exceeds the vector cap.
    ///
    pub fn set_gate_size(&self, name: &str, size: usize) -> Result<(), SimError> {
        assert!(
            size <= MAX_GATE_VECTOR_SIZE,
            "gate vector size {size} exceeds the fixed cap"
        );
        let idx = self
            .desc_index(name)
            .unwrap_or_else(|| panic!("no gate descriptor '{name}' on '{}'", self.ctx.path));

        {
            let lock = self.ctx.gates.read();
            let desc = &lock[idx];
            assert!(desc.vector, "gate '{name}' is not a vector gate");

            for gate in desc.input.iter().chain(desc.output.iter()) {
                if gate.pos() >= size && gate.is_connected() {
                    return Err(SimError::GateStillConnected { gate: gate.path() });
                }
            }
        }

        let (typ, old_size) = {
            let lock = self.ctx.gates.read();
            (lock[idx].typ, lock[idx].size())
        };

        let mut new_inputs = Vec::new();
        let mut new_outputs = Vec::new();
        for pos in old_size..size {
            if typ.has_half(GateHalf::Input) {
                new_inputs.push(Gate::new(self, name, idx, GateHalf::Input, pos, true));
            }
            if typ.has_half(GateHalf::Output) {
                new_outputs.push(Gate::new(self, name, idx, GateHalf::Output, pos, true));
            }
        }

        let mut lock = self.ctx.gates.write();
        let desc = &mut lock[idx];
        desc.input.truncate(size.min(desc.input.len()));
        desc.output.truncate(size.min(desc.output.len()));
        desc.input.append(&mut new_inputs);
        desc.output.append(&mut new_outputs);
        Ok(())
    }

    ///
    /// Scans a gate vector in index order for the first unconnected slot.
    ///
    /// Uses a binary-search heuristic assuming the vector fills densely
    /// from index 0, falling back to a linear scan when that assumption
    /// does not hold.
    ///
    #[must_use]
    pub fn first_unconnected_gate(&self, name: &str, half: GateHalf) -> Option<GateRef> {
        let gates = {
            let lock = self.ctx.gates.read();
            lock.iter().find(|d| d.name == name)?.half(half).clone()
        };
        if gates.is_empty() {
            return None;
        }

        // probe for the dense-prefix boundary
        let (mut lo, mut hi) = (0, gates.len());
        while lo < hi {
            let mid = (lo + hi) / 2;
            if gates[mid].is_connected() {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo < gates.len() && (lo == 0 || gates[lo - 1].is_connected()) {
            return Some(gates[lo].clone());
        }

        gates.iter().find(|g| !g.is_connected()).cloned()
    }

    ///
    /// Returns the first unconnected slot of a gate vector, growing the
    /// vector by one if every slot is connected.
    ///
    /// # Errors
    ///
    /// Forwards errors of [`set_gate_size`](Self::set_gate_size).
    ///
    pub fn get_or_create_first_unconnected_gate(
        &self,
        name: &str,
        half: GateHalf,
    ) -> Result<GateRef, SimError> {
        if let Some(gate) = self.first_unconnected_gate(name, half) {
            return Ok(gate);
        }
        let size = self.ctx.gate_size(name);
        self.set_gate_size(name, size + 1)?;
        Ok(self
            .ctx
            .gate_half(name, half, size)
            .expect("vector was grown to cover this slot"))
    }

    ///
    /// Returns the first vector slot whose halves are both unconnected,
    /// growing the vector by one if none exists.
    ///
    /// # Errors
    ///
    /// Forwards errors of [`set_gate_size`](Self::set_gate_size).
    ///
    pub fn get_or_create_first_unconnected_gate_pair(
        &self,
        name: &str,
    ) -> Result<(GateRef, GateRef), SimError> {
        let size = self.ctx.gate_size(name);
        for pos in 0..size {
            let input = self.ctx.gate_half(name, GateHalf::Input, pos);
            let output = self.ctx.gate_half(name, GateHalf::Output, pos);
            if let (Some(input), Some(output)) = (input, output) {
                if !input.is_connected() && !output.is_connected() {
                    return Ok((input, output));
                }
            }
        }
        self.set_gate_size(name, size + 1)?;
        Ok((
            self.ctx
                .gate_half(name, GateHalf::Input, size)
                .expect("vector was grown to cover this slot"),
            self.ctx
                .gate_half(name, GateHalf::Output, size)
                .expect("vector was grown to cover this slot"),
        ))
    }
}

// # Handler invocation (raw, unwind handling is applied by the scheduler)

impl ModuleRef {
    pub(crate) fn module_handle_message(&self, msg: crate::net::message::Message) {
        self.handler.borrow_mut().handle_message(msg);
    }

    pub(crate) fn module_at_sim_start(&self, stage: usize) {
        self.handler.borrow_mut().at_sim_start(stage);
    }

    pub(crate) fn module_num_sim_start_stages(&self) -> usize {
        self.handler.borrow().num_sim_start_stages()
    }

    pub(crate) fn module_at_sim_end(&self) {
        self.handler.borrow_mut().at_sim_end();
    }
}

impl PartialEq for ModuleRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ctx, &other.ctx)
    }
}

impl Debug for ModuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRef")
            .field("path", &self.ctx.path)
            .field("id", &self.ctx.id)
            .finish()
    }
}

unsafe impl Send for ModuleRef {}
unsafe impl Send for ModuleRefWeak {}
unsafe impl Sync for ModuleRef {}
unsafe impl Sync for ModuleRefWeak {}
