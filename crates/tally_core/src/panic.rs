//! Panic capture for test bodies.
//!
//! A process-wide hook is installed on first use. While a thread is inside
//! [`catch`], panics raised on it are recorded instead of printed; other
//! panics go to the previously installed hook.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::TestError;

static INSTALL: Once = Once::new();

thread_local! {
    static CAPTURING: Cell<usize> = const { Cell::new(0) };
    static LAST_STACK: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn install_hook() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let mut stack = info
                .location()
                .map(|location| format!("at {location}"))
                .unwrap_or_default();
            let backtrace = Backtrace::capture();
            if backtrace.status() == BacktraceStatus::Captured {
                stack.push('\n');
                stack.push_str(&backtrace.to_string());
            }
            LAST_STACK.with(|last| *last.borrow_mut() = Some(stack));
        }));
    });
}

/// Run `f`, turning a panic into a [`TestError`].
pub fn catch<R>(f: impl FnOnce() -> R) -> Result<R, TestError> {
    install_hook();
    CAPTURING.with(|depth| depth.set(depth.get() + 1));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|depth| depth.set(depth.get() - 1));

    result.map_err(|payload| {
        let stack = LAST_STACK
            .with(|last| last.borrow_mut().take())
            .filter(|stack| !stack.is_empty());
        TestError {
            message: payload_message(payload.as_ref()),
            stack,
        }
    })
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test panicked".to_owned()
    }
}
