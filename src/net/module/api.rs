use std::sync::Arc;

use super::{try_with_ctx, ModuleContext};

/// Returns a handle to the context of the current module. This handle can
/// be used to inspect and change the modules simulation properties,
/// independent of the attached software.
///
/// > *This function requires a node-context within the simulation*
///
/// **The handle is only fully valid during the execution of the current
/// event, it should never be stored.**
///
/// # Example
///
/// ```
/// # use simkern::prelude::*;
/// struct MyModule;
/// impl Module for MyModule {
///     fn handle_message(&mut self, msg: Message) {
///         let id = current().id();
///         assert_eq!(id, msg.header().receiver_module_id);
///     }
/// }
/// ```
///
/// # Panics
///
/// This function panics if not called within a modules context.
#[must_use]
pub fn current() -> Arc<ModuleContext> {
    try_with_ctx(Arc::clone)
        .expect("cannot retrieve current module context, no module currently in scope")
}

/// Returns a handle to the context of the current module, if one exists.
///
/// See [`current`].
#[must_use]
pub fn try_current() -> Option<Arc<ModuleContext>> {
    try_with_ctx(Arc::clone)
}
