//! Fault isolation.
//!
//! Runs the rest of the pipeline inside a per-request panic boundary. A panic
//! becomes an opaque [`ApiError`], is logged once with its location and
//! backtrace, and the connection still gets a normal response. Other
//! in-flight requests never observe it.

use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::{poll_fn, Future};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;

use crate::http::error::{ApiError, PanicError};
use crate::http::request::RequestContextExt;

/// What the panic hook saw, kept for the boundary that catches the unwind.
#[derive(Debug)]
struct PanicReport {
    location: Option<String>,
    backtrace: Backtrace,
}

thread_local! {
    static INSIDE_BOUNDARY: Cell<bool> = const { Cell::new(false) };
    static LAST_PANIC: RefCell<Option<PanicReport>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install the process-wide panic hook. Idempotent.
///
/// Panics raised while a boundary is being polled are captured for the
/// boundary to log. Anything else goes to the previously installed hook.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if INSIDE_BOUNDARY.with(Cell::get) {
                let report = PanicReport {
                    location: info.location().map(ToString::to_string),
                    backtrace: Backtrace::force_capture(),
                };
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(report));
            } else {
                previous(info);
            }
        }));
    });
}

/// Marks the current thread as polling inside a boundary. Reset on drop,
/// which also runs while unwinding.
struct BoundaryScope {
    outer: bool,
}

impl BoundaryScope {
    fn enter() -> Self {
        Self {
            outer: INSIDE_BOUNDARY.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for BoundaryScope {
    fn drop(&mut self) {
        INSIDE_BOUNDARY.with(|flag| flag.set(self.outer));
    }
}

/// A panic caught by [`isolate`].
#[derive(Debug)]
pub struct Fault {
    pub error: PanicError,
    /// `file:line:col` of the panic, when the hook saw it.
    pub location: Option<String>,
    pub backtrace: Option<String>,
}

/// Drive `fut` to completion, turning a panic into a [`Fault`].
///
/// The report is taken on the same thread that panicked: the hook runs
/// before unwinding reaches `catch_unwind`, inside the same poll.
pub async fn isolate<F>(fut: F) -> Result<F::Output, Fault>
where
    F: Future + Send,
{
    let mut fut = Box::pin(fut);
    let scoped = poll_fn(move |cx| {
        let _scope = BoundaryScope::enter();
        fut.as_mut().poll(cx)
    });

    match AssertUnwindSafe(scoped).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(payload) => {
            let message = if let Some(s) = payload.downcast_ref::<&str>() {
                (*s).to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            let report = LAST_PANIC.with(|slot| slot.borrow_mut().take());
            let (location, backtrace) = match report {
                Some(r) => (r.location, Some(r.backtrace.to_string())),
                None => (None, None),
            };
            Err(Fault {
                error: PanicError { message },
                location,
                backtrace,
            })
        }
    }
}

/// Fault isolator middleware.
pub async fn isolate_faults(req: Request<Body>, next: Next) -> Response {
    let ctx = req.request_context().cloned();

    match isolate(next.run(req)).await {
        Ok(response) => response,
        Err(fault) => {
            let (request_id, method, path) = match &ctx {
                Some(ctx) => (
                    ctx.id().to_string(),
                    ctx.method().to_string(),
                    ctx.path().to_string(),
                ),
                None => Default::default(),
            };
            tracing::error!(
                request_id = %request_id,
                method = %method,
                path = %path,
                error = %fault.error,
                location = fault.location.as_deref().unwrap_or("unknown"),
                backtrace = fault.backtrace.as_deref().unwrap_or("unavailable"),
                "Panic recovered"
            );
            ApiError::opaque(fault.error).into_response()
        }
    }
}
