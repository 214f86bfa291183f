//! Active-span tracking.
//!
//! # Responsibilities
//! - Keep a stack of active spans per execution context
//! - Resolve the implicit parent for newly started spans
//! - Re-establish a span as active every time its future is polled
//!
//! # Design Decisions
//! - The stack is thread-local. Sync code enters it through `ScopeHandle`, which
//!   is `!Send` so it cannot be held across an `.await` on a work-stealing runtime
//! - Async code enters it through `Scoped`, which pushes on every poll and pops
//!   before returning, so concurrent tasks sharing a worker thread stay isolated

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::span::{Span, SpanId};

thread_local! {
    static ACTIVE: RefCell<Vec<Span>> = const { RefCell::new(Vec::new()) };
}

/// The innermost active span of the calling execution context.
pub fn active_span() -> Option<Span> {
    ACTIVE
        .try_with(|stack| stack.borrow().last().cloned())
        .ok()
        .flatten()
}

/// Number of spans currently entered on this thread.
pub fn depth() -> usize {
    ACTIVE.try_with(|stack| stack.borrow().len()).unwrap_or(0)
}

fn push(span: Span) {
    let _ = ACTIVE.try_with(|stack| stack.borrow_mut().push(span));
}

fn pop(span_id: SpanId) {
    let _ = ACTIVE.try_with(|stack| {
        let mut stack = stack.borrow_mut();
        if let Some(pos) = stack.iter().rposition(|s| s.span_id() == span_id) {
            stack.remove(pos);
        }
    });
}

/// Marks a span active until dropped.
struct Entered {
    span_id: SpanId,
    _not_send: PhantomData<*const ()>,
}

impl Entered {
    fn new(span: Span) -> Self {
        let span_id = span.span_id();
        push(span);
        Self {
            span_id,
            _not_send: PhantomData,
        }
    }
}

impl Drop for Entered {
    fn drop(&mut self) {
        pop(self.span_id);
    }
}

/// Scoped acquisition of an active span.
///
/// Dropping the handle deactivates the span and, when it owns the span,
/// closes it. A drop during unwinding tags the span as an error first.
pub struct ScopeHandle {
    span: Span,
    finish_on_close: bool,
    _entered: Entered,
}

impl ScopeHandle {
    pub(crate) fn enter(span: Span, finish_on_close: bool) -> Self {
        let entered = Entered::new(span.clone());
        Self {
            span,
            finish_on_close,
            _entered: entered,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Close the scope now.
    pub fn close(self) {}
}

impl Drop for ScopeHandle {
    fn drop(&mut self) {
        if self.finish_on_close && !self.span.is_finished() {
            if std::thread::panicking() {
                self.span.set_error("operation panicked");
            }
            self.span.finish();
        }
    }
}

/// Closes a span when dropped, without activating it.
///
/// Unlike `ScopeHandle` this guard is `Send` and may live across `.await`.
pub struct SpanGuard {
    span: Span,
}

impl SpanGuard {
    pub fn new(span: Span) -> Self {
        Self { span }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if !self.span.is_finished() {
            if std::thread::panicking() {
                self.span.set_error("operation panicked");
            }
            self.span.finish();
        }
    }
}

/// A future that runs with `span` as the active span.
pub struct Scoped<F> {
    future: Pin<Box<F>>,
    span: Span,
    finish_on_complete: bool,
}

impl<F: Future> Scoped<F> {
    /// Activate `span` while polling, leaving its lifecycle to the caller.
    pub fn new(span: Span, future: F) -> Self {
        Self {
            future: Box::pin(future),
            span,
            finish_on_complete: false,
        }
    }

    /// Activate `span` while polling and close it when the future completes
    /// or is dropped.
    pub fn owned(span: Span, future: F) -> Self {
        Self {
            future: Box::pin(future),
            span,
            finish_on_complete: true,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let poll = {
            let _entered = Entered::new(this.span.clone());
            this.future.as_mut().poll(cx)
        };
        if poll.is_ready() && this.finish_on_complete {
            this.span.finish();
        }
        poll
    }
}

impl<F> Drop for Scoped<F> {
    fn drop(&mut self) {
        if self.finish_on_complete && !self.span.is_finished() {
            if std::thread::panicking() {
                self.span.set_error("operation panicked");
            }
            self.span.finish();
        }
    }
}
