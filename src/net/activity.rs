//! Coroutine-style module execution.
//!
//! An activity module runs one long procedure that alternates computation
//! with blocking calls: [`receive`](ActivityCtx::receive),
//! [`receive_timeout`](ActivityCtx::receive_timeout) and
//! [`wait`](ActivityCtx::wait). The procedure is a future that the kernel
//! polls exactly when an event for the module is delivered; there is no
//! external executor and no preemption, so an activity runs to its next
//! suspension point atomically.
//!
//! Cancelling the module (shutdown, deletion, reset) drops the future,
//! which unwinds the activity through normal scoped cleanup.
//!
//! # Examples
//!
//! ```
//! use simkern::net::activity::Activity;
//! use simkern::prelude::*;
//!
//! let activity = Activity::new(|ctx| async move {
//!     ctx.wait(Duration::from_secs(2)).await;
//!     let msg = ctx.receive().await;
//!     tracing::info!("received {} at {}", msg.str(), SimTime::now());
//! });
//! ```

use crate::net::message::{schedule_in, Message, MessageId, KIND_WAKEUP};
use crate::net::module::Module;
use crate::time::Duration;
use crate::util::noop_waker;
use fxhash::FxHashSet;
use pin_project_lite::pin_project;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

#[derive(Default)]
struct Mailbox {
    queue: VecDeque<Message>,
    stale_wakeups: FxHashSet<MessageId>,
}

impl Mailbox {
    fn push(&mut self, msg: Message) {
        if msg.header().kind == KIND_WAKEUP && self.stale_wakeups.remove(&msg.id()) {
            return;
        }
        self.queue.push_back(msg);
    }

    /// The oldest queued user message; armed wakeups stay queued.
    fn pop_user(&mut self) -> Option<Message> {
        let idx = self
            .queue
            .iter()
            .position(|m| m.header().kind != KIND_WAKEUP)?;
        self.queue.remove(idx)
    }

    fn take_wakeup(&mut self, token: MessageId) -> bool {
        if let Some(idx) = self.queue.iter().position(|m| m.id() == token) {
            self.queue.remove(idx);
            true
        } else {
            false
        }
    }
}

///
/// The suspension surface handed to an activity procedure.
///
/// The handle is cheap to clone; all clones share the modules mailbox.
///
#[derive(Clone)]
pub struct ActivityCtx {
    shared: Rc<RefCell<Mailbox>>,
}

impl ActivityCtx {
    ///
    /// Suspends until the next message addressed to this module and
    /// resolves to it.
    ///
    pub fn receive(&self) -> Receive {
        Receive {
            shared: Rc::clone(&self.shared),
        }
    }

    ///
    /// Suspends until the next message, or until `timeout` elapsed.
    /// Resolves to `None` on timeout.
    ///
    pub fn receive_timeout(&self, timeout: Duration) -> ReceiveTimeout {
        ReceiveTimeout {
            shared: Rc::clone(&self.shared),
            timeout,
            token: None,
            done: false,
        }
    }

    ///
    /// Suspends for the given span of simulation time.
    ///
    /// Internally this schedules a self-message at `now + duration`,
    /// receives it and discards it; user messages arriving in between
    /// stay queued for later `receive` calls.
    ///
    pub fn wait(&self, duration: Duration) -> Wait {
        Wait {
            shared: Rc::clone(&self.shared),
            duration,
            token: None,
            done: false,
        }
    }
}

pin_project! {
    /// Future returned by [`ActivityCtx::receive`].
    #[must_use = "futures do nothing unless awaited"]
    pub struct Receive {
        shared: Rc<RefCell<Mailbox>>,
    }
}

impl Future for Receive {
    type Output = Message;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.shared.borrow_mut().pop_user() {
            Some(msg) => Poll::Ready(msg),
            None => Poll::Pending,
        }
    }
}

pin_project! {
    /// Future returned by [`ActivityCtx::wait`].
    #[must_use = "futures do nothing unless awaited"]
    pub struct Wait {
        shared: Rc<RefCell<Mailbox>>,
        duration: Duration,
        token: Option<MessageId>,
        done: bool,
    }

    impl PinnedDrop for Wait {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let (Some(token), false) = (*this.token, *this.done) {
                this.shared.borrow_mut().stale_wakeups.insert(token);
            }
        }
    }
}

impl Future for Wait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let token = *this.token.get_or_insert_with(|| {
            let wakeup = Message::new().kind(KIND_WAKEUP);
            let token = wakeup.id();
            schedule_in(wakeup, *this.duration);
            token
        });

        if this.shared.borrow_mut().take_wakeup(token) {
            *this.done = true;
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

pin_project! {
    /// Future returned by [`ActivityCtx::receive_timeout`].
    #[must_use = "futures do nothing unless awaited"]
    pub struct ReceiveTimeout {
        shared: Rc<RefCell<Mailbox>>,
        timeout: Duration,
        token: Option<MessageId>,
        done: bool,
    }

    impl PinnedDrop for ReceiveTimeout {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let (Some(token), false) = (*this.token, *this.done) {
                this.shared.borrow_mut().stale_wakeups.insert(token);
            }
        }
    }
}

impl Future for ReceiveTimeout {
    type Output = Option<Message>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let token = *this.token.get_or_insert_with(|| {
            let wakeup = Message::new().kind(KIND_WAKEUP);
            let token = wakeup.id();
            schedule_in(wakeup, *this.timeout);
            token
        });

        let mut mailbox = this.shared.borrow_mut();
        if let Some(msg) = mailbox.pop_user() {
            mailbox.stale_wakeups.insert(token);
            *this.done = true;
            return Poll::Ready(Some(msg));
        }
        if mailbox.take_wakeup(token) {
            *this.done = true;
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

///
/// An activity-style module: a procedure with its own logical execution
/// context, driven by the kernel.
///
/// The procedure is created from a factory closure so the module can be
/// restarted with fresh state after a reset.
///
pub struct Activity {
    factory: Box<dyn FnMut(ActivityCtx) -> LocalFuture>,
    fut: Option<LocalFuture>,
    shared: Rc<RefCell<Mailbox>>,
}

impl Activity {
    ///
    /// Creates an activity module from the given procedure factory.
    ///
    pub fn new<F, Fut>(mut f: F) -> Self
    where
        F: FnMut(ActivityCtx) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        Self {
            factory: Box::new(move |ctx| Box::pin(f(ctx))),
            fut: None,
            shared: Rc::default(),
        }
    }

    /// Whether the activity procedure has run to completion.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.fut.is_none()
    }

    fn poll(&mut self) {
        let Some(fut) = self.fut.as_mut() else {
            return;
        };
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        if fut.as_mut().poll(&mut cx).is_ready() {
            self.fut = None;
        }
    }

    fn spawn(&mut self) {
        self.shared = Rc::default();
        let ctx = ActivityCtx {
            shared: Rc::clone(&self.shared),
        };
        self.fut = Some((self.factory)(ctx));
        self.poll();
    }
}

impl Module for Activity {
    fn at_sim_start(&mut self, stage: usize) {
        if stage == 0 {
            self.spawn();
        }
    }

    fn handle_message(&mut self, msg: Message) {
        self.shared.borrow_mut().push(msg);
        self.poll();
    }

    fn at_sim_end(&mut self) {
        if self.fut.is_some() {
            tracing::debug!("activity did not run to completion");
        }
    }

    fn reset(&mut self) {
        // dropping the future unwinds the activity through scoped cleanup
        self.fut = None;
        self.shared.borrow_mut().queue.clear();
        self.shared.borrow_mut().stale_wakeups.clear();
    }
}

impl std::fmt::Debug for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activity")
            .field("done", &self.is_done())
            .finish()
    }
}
