use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic;

use super::{is_observing, observe};
use crate::events::{EventContext, Fault};
use crate::service::TelemetryService;
use crate::types::{ErrorClassification, Severity};

/// Records every panic as a runtime error, then hands the panic on to the
/// hook that was installed before.
pub fn install_panic_observer(service: TelemetryService) {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if !is_observing() {
            observe("panic", || {
                let mut fault = Fault::from_panic_payload(info.payload());
                let backtrace = Backtrace::capture();
                if backtrace.status() == BacktraceStatus::Captured {
                    fault = fault.with_stack(backtrace.to_string());
                }
                let context = info
                    .location()
                    .map(|location| EventContext::SourceLocation {
                        file: location.file().to_string(),
                        line: location.line(),
                        column: location.column(),
                    })
                    .unwrap_or_default();

                service.record_error(
                    fault,
                    Severity::High,
                    ErrorClassification::Runtime,
                    context,
                );
            });
        }
        previous(info);
    }));
}
