use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};
use std::{fs, io, ops, path::Path};

use crate::net::channel::ChannelRef;
use crate::net::message::Message;
use crate::net::module::{Module, ModuleRef, MOD_CTX};
use crate::net::par::Par;
use crate::net::path::ObjectPath;
use crate::runtime::{Application, EventLifecycle, Runtime, TerminationReason};
use crate::time::SimTime;

mod events;
pub use self::events::NetEvents;
pub(crate) use self::events::*;

mod ctx;
pub use self::ctx::{globals, Globals};
pub(crate) use self::ctx::*;

static GUARD: Mutex<()> = Mutex::new(());

///
/// A networking simulation.
///
/// This type acts as both a builder for the module tree and as the
/// application object used in the [`Runtime`].
///
/// A networking simulation can contain an inner application `A`
/// implementing [`EventLifecycle`], which attaches custom global behaviour
/// at simulation launch and shutdown.
///
/// # Examples
///
/// ```
/// # use simkern::prelude::*;
/// let mut sim = Sim::new(());
/// let alice = sim.node("alice", HandlerFn::new(|msg| {
///     tracing::info!("received {}", msg.str());
/// }));
/// let rt = Runtime::new_with(sim, RuntimeOptions::seeded(123));
/// let result = rt.run();
/// ```
///
#[derive(Debug)]
pub struct Sim<A> {
    modules: ModuleTree,
    globals: Arc<Globals>,
    /// An inner field that can be used to attach custom lifetime
    /// handlers to the simulation.
    pub inner: A,

    #[allow(unused)]
    guard: SimStaticsGuard,
}

#[derive(Debug)]
struct SimStaticsGuard {
    #[allow(unused)]
    guard: MutexGuard<'static, ()>,
}

impl SimStaticsGuard {
    fn new(globals: Weak<Globals>) -> Self {
        let guard = match GUARD.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => GUARD.lock().unwrap_or_else(|e| {
                eprintln!("net-sim lock poisoned: rebuilding lock");
                e.into_inner()
            }),
            Err(TryLockError::Poisoned(poisoned)) => {
                eprintln!("net-sim lock poisoned: rebuilding lock");
                poisoned.into_inner()
            }
        };

        buf_init(globals);
        Self { guard }
    }
}

impl Drop for SimStaticsGuard {
    fn drop(&mut self) {
        buf_drop();
        crate::net::eventlog::reset();
    }
}

impl<A> Sim<A> {
    ///
    /// Creates a new network simulation with an inner application `A`.
    ///
    /// This binds the simulation globals to this instance; only one
    /// simulation may exist per process at any time.
    ///
    pub fn new(inner: A) -> Self {
        let globals = Arc::new(Globals::default());
        let guard = SimStaticsGuard::new(Arc::downgrade(&globals));
        Self {
            guard,
            modules: ModuleTree::default(),
            globals,
            inner,
        }
    }

    #[inline]
    pub(crate) fn modules(&self) -> &ModuleTree {
        &self.modules
    }

    #[inline]
    pub(crate) fn modules_mut(&mut self) -> &mut ModuleTree {
        &mut self.modules
    }

    /// Returns a handle to the simulation globals.
    #[must_use]
    pub fn globals(&self) -> Arc<Globals> {
        self.globals.clone()
    }

    ///
    /// Includes raw parameter definitions in the simulation.
    ///
    /// # Examples
    ///
    /// ```
    /// # use simkern::prelude::*;
    /// let mut sim = Sim::new(());
    /// sim.include_par("alice.addr: 10.0.0.1\nalice.delay: 2ms");
    /// ```
    ///
    pub fn include_par(&mut self, raw: &str) {
        self.globals.parameters.build(raw);
    }

    ///
    /// Reads and includes parameters from a file.
    ///
    /// # Errors
    ///
    /// Forwards file read errors.
    ///
    pub fn include_par_file(&mut self, path: impl AsRef<Path>) -> io::Result<()> {
        self.include_par(&fs::read_to_string(path)?);
        Ok(())
    }

    ///
    /// Imports the object-path entries of an activated configuration into
    /// the parameter tree. Plain option keys (without dots) stay at the
    /// configuration level; `**` patterns are not representable in the
    /// parameter tree and are skipped.
    ///
    pub fn include_config(&mut self, config: &crate::config::ActiveConfig) {
        // reversed, so higher-precedence entries are inserted last and win
        for (key, value) in config.object_entries().into_iter().rev() {
            if key.split('.').any(|comp| comp == "**") {
                tracing::debug!("skipping config entry '{key}': '**' has no par equivalent");
                continue;
            }
            self.globals.parameters.insert(&key, value);
        }
    }

    ///
    /// Creates a module at the given path, attaching the provided
    /// software, and returns a reference to it.
    ///
    /// Parent modules must be created before their children.
    ///
    /// # Panics
    ///
    /// Panics if the parent of `path` does not exist.
    ///
    pub fn node(&mut self, path: impl Into<ObjectPath>, module: impl Module) -> ModuleRef {
        let path = path.into();

        let this = if let Some(parent) = path.parent() {
            let Some(parent) = self.get(&parent) else {
                panic!("cannot create node '{path}': parent node '{parent}' does not exist");
            };
            ModuleRef::child_of(path.name(), &parent, module)
        } else {
            ModuleRef::standalone(path, module)
        };

        self.modules.add(this.clone());
        this
    }

    /// Retrieves a module by reference from the simulation.
    #[must_use]
    pub fn get(&self, path: &ObjectPath) -> Option<ModuleRef> {
        self.modules.get(path)
    }

    ///
    /// Connects two modules with a duplex link over their `port` gate
    /// vectors, creating the gates (and, if metrics are provided, one
    /// channel per direction).
    ///
    /// # Panics
    ///
    /// Panics if either path does not name a module, or gate creation
    /// fails.
    ///
    pub fn connect(
        &mut self,
        lhs: impl Into<ObjectPath>,
        rhs: impl Into<ObjectPath>,
        metrics: Option<crate::net::channel::ChannelMetrics>,
    ) {
        let lhs = lhs.into();
        let rhs = rhs.into();
        let lhs_module = self.get(&lhs).expect("no module under lhs path");
        let rhs_module = self.get(&rhs).expect("no module under rhs path");

        for module in [&lhs_module, &rhs_module] {
            if !module.ctx.has_gate("port") {
                module.add_gate("port", crate::net::gate::GateType::InOut, true);
            }
        }

        let (lhs_in, lhs_out) = lhs_module
            .get_or_create_first_unconnected_gate_pair("port")
            .expect("fresh slots cannot be connected");
        let (rhs_in, rhs_out) = rhs_module
            .get_or_create_first_unconnected_gate_pair("port")
            .expect("fresh slots cannot be connected");

        let forward = metrics.map(|m| {
            crate::net::channel::Channel::new(lhs.appended(format!("{}->{}", lhs.name(), rhs.name())), m)
        });
        let backward = metrics.map(|m| {
            crate::net::channel::Channel::new(rhs.appended(format!("{}->{}", rhs.name(), lhs.name())), m)
        });

        lhs_out
            .connect(rhs_in, forward)
            .expect("fresh gate slots cannot be mismatched");
        rhs_out
            .connect(lhs_in, backward)
            .expect("fresh gate slots cannot be mismatched");
    }

    /// All channels attached to gates of this simulation, deduplicated.
    pub(crate) fn channels(&self) -> Vec<ChannelRef> {
        let mut channels: Vec<ChannelRef> = Vec::new();
        for module in self.modules.iter() {
            for gate in module.ctx.gates() {
                if let Some(channel) = gate.channel() {
                    if !channels.iter().any(|c| Arc::ptr_eq(c, &channel)) {
                        channels.push(channel);
                    }
                }
            }
        }
        channels
    }

    /// A handle to a parameter of the module at the given path.
    #[must_use]
    pub fn par_for(&self, module: impl AsRef<str>, key: &str) -> Par {
        Par::new(self.globals.parameters.clone(), key, module.as_ref())
    }
}

impl<A> Drop for Sim<A> {
    fn drop(&mut self) {
        for module in self.modules.iter() {
            module.ctx.tear_down();
        }
        // the next Sim may live on a different thread
        *MOD_CTX.write() = None;
    }
}

impl<A> Application for Sim<A>
where
    A: EventLifecycle<Sim<A>>,
{
    type EventSet = NetEvents;
    type Lifecycle = SimLifecycle;
}

#[doc(hidden)]
#[derive(Debug)]
pub struct SimLifecycle;

impl<A> EventLifecycle<Sim<A>> for SimLifecycle
where
    A: EventLifecycle<Sim<A>>,
{
    ///
    /// Multi-stage initialization: stage k runs on all channels, then on
    /// all modules, before stage k+1 begins. A module may therefore
    /// transmit in its stage 0.
    ///
    fn at_sim_start(rt: &mut Runtime<Sim<A>>) {
        let channels = rt.app.channels();
        let modules: Vec<_> = rt.app.modules.iter().cloned().collect();

        let max_stage = modules
            .iter()
            .map(ModuleRef::module_num_sim_start_stages)
            .chain(channels.iter().map(|c| c.num_init_stages()))
            .max()
            .unwrap_or(1);

        for stage in 0..max_stage {
            for channel in &channels {
                if stage < channel.num_init_stages() {
                    channel.init_stage(stage);
                }
            }

            for module in &modules {
                if stage < module.module_num_sim_start_stages() {
                    tracing::trace!("module '{}': at_sim_start({stage})", module.ctx.path());

                    module.activate();
                    let unwind = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        module.module_at_sim_start(stage);
                    }));
                    module.deactivate();

                    match unwind {
                        Ok(()) => buf_process(module, rt),
                        Err(payload) => {
                            buf_discard();
                            rt.shutdown(TerminationReason::Error(classify_unwind(payload)));
                            return;
                        }
                    }
                }
            }
        }

        for module in &modules {
            module
                .ctx
                .initialized
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }

        A::at_sim_start(rt);
    }

    ///
    /// The finish pass: depth-first post-order across the surviving tree.
    /// Finish handlers may emit signals and query state, but no further
    /// events are delivered.
    ///
    fn at_sim_end(rt: &mut Runtime<Sim<A>>) {
        A::at_sim_end(rt);

        let roots: Vec<_> = rt
            .app
            .modules
            .iter()
            .filter(|m| m.ctx.parent.is_none())
            .cloned()
            .collect();
        for root in roots {
            finish_subtree(&root);
        }
        buf_discard();
    }
}

fn finish_subtree(module: &ModuleRef) {
    for child in module.ctx.children() {
        finish_subtree(&child);
    }

    if !module.is_active() {
        return;
    }
    tracing::trace!("module '{}': at_sim_end", module.ctx.path());

    module.activate();
    let unwind = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        module.module_at_sim_end();
    }));
    module.deactivate();
    // finish may not schedule events
    buf_discard();

    if let Err(payload) = unwind {
        tracing::error!(
            "module '{}' panicked in at_sim_end: {}",
            module.ctx.path(),
            classify_unwind(payload)
        );
    }
}

///
/// The flat module store of a simulation, ordered such that parents
/// precede their children and subtrees stay contiguous.
///
#[derive(Debug, Default)]
pub(crate) struct ModuleTree {
    modules: Vec<ModuleRef>,
}

impl ModuleTree {
    pub(crate) fn get(&self, path: &ObjectPath) -> Option<ModuleRef> {
        self.modules
            .iter()
            .find(|module| module.ctx.path == *path)
            .cloned()
    }

    pub(crate) fn add(&mut self, module: ModuleRef) {
        let Some(parent) = module.ctx.path.parent() else {
            self.modules.push(module);
            return;
        };

        let parent_depth = parent.len();
        let Some(mut pos) = self.modules.iter().rposition(|m| m.ctx.path == parent) else {
            panic!(
                "cannot create node '{}': parent node '{parent}' does not exist",
                module.ctx.path
            )
        };
        pos += 1;

        // skip to the end of the parents subtree
        while pos < self.modules.len() && self.modules[pos].ctx.path.len() > parent_depth {
            pos += 1;
        }
        self.modules.insert(pos, module);
    }

    /// Removes the module at `path` and its descendants, returning the
    /// subtree root.
    pub(crate) fn remove(&mut self, path: &ObjectPath) -> Option<ModuleRef> {
        let pos = self.modules.iter().position(|m| m.ctx.path == *path)?;
        let root = self.modules.remove(pos);

        let prefix = format!("{}.", path.as_str());
        while pos < self.modules.len() && self.modules[pos].ctx.path.as_str().starts_with(&prefix) {
            self.modules.remove(pos);
        }

        // detach from the parent's child list
        if let Some(parent) = root.ctx.parent() {
            parent
                .ctx
                .children
                .write()
                .retain(|child| child.ctx.path != *path);
        }
        Some(root)
    }
}

impl ops::Deref for ModuleTree {
    type Target = [ModuleRef];
    fn deref(&self) -> &Self::Target {
        &self.modules
    }
}

impl<A> Runtime<Sim<A>>
where
    A: EventLifecycle<Sim<A>>,
{
    ///
    /// Injects a message event onto a gate of the simulation, e.g. to
    /// seed initial traffic from outside any module.
    ///
    pub fn add_message_onto(
        &mut self,
        gate: crate::net::gate::GateRef,
        message: impl Into<Message>,
        time: SimTime,
    ) {
        let message = message.into();
        let priority = message.header().priority;
        let _ = self.add_event_with_priority(
            NetEvents::MessageExitingConnection(MessageExitingConnection { gate, message }),
            time,
            priority,
        );
    }

    ///
    /// Injects a message to be handled by a module at the given time.
    ///
    pub fn handle_message_on(
        &mut self,
        module: impl Into<ModuleRef>,
        message: impl Into<Message>,
        time: SimTime,
    ) {
        let message = message.into();
        let priority = message.header().priority;
        let _ = self.add_event_with_priority(
            NetEvents::HandleMessageEvent(HandleMessageEvent {
                module: module.into(),
                message,
                via: None,
            }),
            time,
            priority,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::module::HandlerFn;

    #[test]
    fn module_tree_ordering() {
        let mut sim = Sim::new(());
        sim.node("alice", HandlerFn::new(|_| {}));
        sim.node("alice.alicent", HandlerFn::new(|_| {}));
        sim.node("alice.john", HandlerFn::new(|_| {}));
        sim.node("alice.john.junior", HandlerFn::new(|_| {}));
        sim.node("bob", HandlerFn::new(|_| {}));
        sim.node("eve", HandlerFn::new(|_| {}));
        sim.node("eve.trevor", HandlerFn::new(|_| {}));
        sim.node("eve.mark", HandlerFn::new(|_| {}));

        assert_eq!(
            sim.modules()
                .iter()
                .map(|v| v.ctx.path.as_str().to_string())
                .collect::<Vec<_>>(),
            [
                "alice",
                "alice.alicent",
                "alice.john",
                "alice.john.junior",
                "bob",
                "eve",
                "eve.trevor",
                "eve.mark"
            ]
        );
    }

    #[test]
    fn module_tree_removal() {
        let mut sim = Sim::new(());
        sim.node("alice", HandlerFn::new(|_| {}));
        sim.node("alice.john", HandlerFn::new(|_| {}));
        sim.node("alice.john.junior", HandlerFn::new(|_| {}));
        sim.node("bob", HandlerFn::new(|_| {}));

        let removed = sim.modules_mut().remove(&ObjectPath::new("alice.john"));
        assert!(removed.is_some());
        assert_eq!(
            sim.modules()
                .iter()
                .map(|v| v.ctx.path.as_str().to_string())
                .collect::<Vec<_>>(),
            ["alice", "bob"]
        );
        assert!(sim
            .get(&ObjectPath::new("alice"))
            .unwrap()
            .child("john")
            .is_none());
    }
}
