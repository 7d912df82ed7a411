use std::task::{RawWaker, RawWakerVTable, Waker};

// Activity futures are polled by the kernel at event delivery, never by an
// external executor, so wakers carry no state.
static NOOP_VTABLE: RawWakerVTable =
    RawWakerVTable::new(|_| noop_raw_waker(), |_| {}, |_| {}, |_| {});

fn noop_raw_waker() -> RawWaker {
    RawWaker::new(std::ptr::null(), &NOOP_VTABLE)
}

pub(crate) fn noop_waker() -> Waker {
    // SAFETY: The vtable functions neither read the data pointer nor have
    // side effects, so any pointer value upholds the RawWaker contract.
    unsafe { Waker::from_raw(noop_raw_waker()) }
}
