//! Observers that turn host-level notifications into telemetry events.

mod network;
mod page;
mod panic;
mod task;
mod timing;

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use log::debug;

pub use network::{InstrumentedClient, NetworkInterceptor, ResponseStatus, DEFAULT_METHOD};
pub use page::{observe_largest_contentful_paint, observe_page_load, NavigationTiming};
pub use panic::install_panic_observer;
pub use task::{report_rejection, spawn_observed, UNHANDLED_REJECTION};
pub use timing::measure;

thread_local! {
    static OBSERVING: Cell<bool> = const { Cell::new(false) };
}

/// True while the current thread is inside an observer callback.
pub fn is_observing() -> bool {
    OBSERVING.with(Cell::get)
}

/// Runs an observer callback. A panic inside it is logged and discarded;
/// it never reaches the code being observed.
pub(crate) fn observe<R>(name: &str, callback: impl FnOnce() -> R) -> Option<R> {
    let previous = OBSERVING.with(|flag| flag.replace(true));
    let outcome = catch_unwind(AssertUnwindSafe(callback));
    OBSERVING.with(|flag| flag.set(previous));

    match outcome {
        Ok(value) => Some(value),
        Err(_) => {
            debug!("{} observer panicked while recording an event", name);
            None
        }
    }
}
