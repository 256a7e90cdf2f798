//! Single-shot future values.
//!
//! A [`Promise`] stands for a value some code will produce later, possibly
//! asynchronously. It is read-only: the one way to consume the value is to
//! attach a handler with [`Promise::then`] and friends, and the handler
//! always runs in its own call stack, posted through the executor, even when
//! the value is already there. That one rule keeps call graphs identical
//! whether a promise resolves before or after the handler is attached.
//!
//! The write end is the [`PromiseResolver`], split off at creation and
//! consumed by resolution, so a promise resolves at most once by
//! construction. Chaining `then` produces a child promise whose resolver is
//! owned by the registered handler alone; chains therefore cannot form
//! retain cycles.
//!
//! Compared to callbacks, promises decouple producing a future value from
//! handling it, and the handle can travel away from the producer:
//!
//! ```ignore
//! let echo = pin.once_spikes(&scheduler, poll);  // non-blocking
//! echo.then(to_reading).then_void(report);
//! ```

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use crate::error::{fatal, Fault};
use crate::executor::Executor;

struct Shared<T> {
    state: RefCell<State<T>>,
    executor: Executor,
}

struct State<T> {
    /// Set on resolution, taken when the handler ships.
    value: Option<T>,
    resolved: bool,
    attached: bool,
    handler: Option<Box<dyn FnOnce(T) + 'static>>,
}

/// A handle to a single future value. Cheap to clone; all clones share one
/// underlying state.
pub struct Promise<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            shared: self.shared.clone(),
        }
    }
}

impl<T: 'static> Promise<T> {
    /// Creates an unresolved promise together with its resolver.
    pub fn pending(executor: Executor) -> (Promise<T>, PromiseResolver<T>) {
        let shared = Rc::new(Shared {
            state: RefCell::new(State {
                value: None,
                resolved: false,
                attached: false,
                handler: None,
            }),
            executor,
        });
        (
            Promise {
                shared: shared.clone(),
            },
            PromiseResolver { shared },
        )
    }

    /// A promise that is already resolved with `value`. Handlers attached to
    /// it still run through the executor, never inline.
    pub fn resolved(executor: Executor, value: T) -> Promise<T> {
        let (promise, resolver) = Promise::pending(executor);
        resolver.resolve(value);
        promise
    }

    /// Registers the value handler. Returns a child promise resolved with the
    /// handler's return value once this promise has resolved and the handler
    /// has run.
    ///
    /// At most one handler per promise; a second registration is fatal.
    pub fn then<U: 'static>(&self, handler: impl FnOnce(T) -> U + 'static) -> Promise<U> {
        let (child, resolver) = Promise::pending(self.shared.executor.clone());
        self.attach(move |value| resolver.resolve(handler(value)));
        child
    }

    /// [`then`] for handlers that themselves return a promise: the child
    /// resolves when the nested promise resolves, with the nested value.
    ///
    /// [`then`]: Promise::then
    pub fn and_then<U: 'static>(
        &self,
        handler: impl FnOnce(T) -> Promise<U> + 'static,
    ) -> Promise<U> {
        let (child, resolver) = Promise::pending(self.shared.executor.clone());
        self.attach(move |value| resolver.resolve_with(handler(value)));
        child
    }

    /// Registers a handler without producing a child promise, ending the
    /// chain.
    pub fn then_void(&self, handler: impl FnOnce(T) + 'static) {
        self.attach(handler);
    }

    /// Whether the value is available. Debug and test use only; consume the
    /// value through a handler.
    pub fn is_resolved(&self) -> bool {
        self.shared.state.borrow().resolved
    }

    fn attach(&self, handler: impl FnOnce(T) + 'static) {
        let mut state = self.shared.state.borrow_mut();
        if state.attached {
            fatal(Fault::DoubleAttach);
        }
        state.attached = true;
        if state.resolved {
            if let Some(value) = state.value.take() {
                drop(state);
                self.shared.executor.post(Box::new(move || handler(value)));
            }
        } else {
            state.handler = Some(Box::new(handler));
        }
    }
}

/// The write end of a promise. Consumed by resolution: a promise resolves
/// exactly once.
pub struct PromiseResolver<T> {
    shared: Rc<Shared<T>>,
}

impl<T: 'static> PromiseResolver<T> {
    /// Resolves the promise with `value`. A registered handler is posted to
    /// the executor, never run inline.
    pub fn resolve(self, value: T) {
        Self::resolve_shared(self.shared, value);
    }

    /// Resolves this promise with the eventual value of `promise`.
    pub fn resolve_with(self, promise: Promise<T>) {
        let shared = self.shared;
        promise.then_void(move |value| Self::resolve_shared(shared, value));
    }

    fn resolve_shared(shared: Rc<Shared<T>>, value: T) {
        let mut state = shared.state.borrow_mut();
        if state.resolved {
            fatal(Fault::DoubleResolve);
        }
        state.resolved = true;
        if let Some(handler) = state.handler.take() {
            drop(state);
            shared.executor.post(Box::new(move || handler(value)));
        } else {
            state.value = Some(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SequentialExecutor;
    use core::cell::Cell;

    #[test]
    fn handler_runs_with_the_resolved_value() {
        let executor = SequentialExecutor::new();
        let (promise, resolver) = Promise::pending(executor.handle());

        let out = Rc::new(Cell::new(1));
        let sink = out.clone();
        promise.then_void(move |i: i32| sink.set(sink.get() + i));

        resolver.resolve(2);
        executor.run_until_idle();
        assert_eq!(out.get(), 3);
    }

    #[test]
    fn unit_promises_behave_like_value_promises() {
        let executor = SequentialExecutor::new();
        let (promise, resolver) = Promise::pending(executor.handle());

        let resolved = Rc::new(Cell::new(false));
        let sink = resolved.clone();
        promise.then_void(move |()| sink.set(true));

        resolver.resolve(());
        executor.run_until_idle();
        assert!(resolved.get());
    }

    #[test]
    fn chained_handlers_run_in_order() {
        let executor = SequentialExecutor::new();
        let (promise, resolver) = Promise::pending(executor.handle());

        let out = Rc::new(Cell::new(0));
        let sink = out.clone();
        promise
            .then(|i: i32| i + 1)
            .then_void(move |i| sink.set(i));

        executor.run_until_idle();
        assert_eq!(out.get(), 0);

        resolver.resolve(1);
        executor.run_until_idle();
        assert_eq!(out.get(), 2);
    }

    #[test]
    fn nested_resolved_promise_is_flattened() {
        let executor = SequentialExecutor::new();
        let (promise, resolver) = Promise::pending(executor.handle());

        let out = Rc::new(Cell::new(1));
        let sink = out.clone();
        let inner_executor = executor.handle();
        promise
            .and_then(move |i: i32| Promise::resolved(inner_executor, i))
            .then_void(move |i| sink.set(sink.get() + i));

        executor.run_until_idle();
        assert_eq!(out.get(), 1);

        resolver.resolve(2);
        executor.run_until_idle();
        assert_eq!(out.get(), 3);
    }

    #[test]
    fn nested_pending_promise_resolves_the_chain_later() {
        let executor = SequentialExecutor::new();
        let (first, resolve_first) = Promise::pending(executor.handle());
        let (second, resolve_second) = Promise::<i32>::pending(executor.handle());

        let out = Rc::new(Cell::new(1));
        let sink = out.clone();
        first
            .and_then(move |_: i32| second)
            .then_void(move |i| sink.set(sink.get() + i));

        resolve_first.resolve(-1);
        executor.run_until_idle();
        assert_eq!(out.get(), 1);

        resolve_second.resolve(2);
        executor.run_until_idle();
        assert_eq!(out.get(), 3);
    }

    #[test]
    fn already_resolved_promise_defers_its_handler() {
        let executor = SequentialExecutor::new();

        let out = Rc::new(Cell::new(0));
        let sink = out.clone();
        Promise::resolved(executor.handle(), 1).then_void(move |i| sink.set(i));

        // Never inline: nothing has run until the executor turns.
        assert_eq!(out.get(), 0);
        executor.run_until_idle();
        assert_eq!(out.get(), 1);
    }

    #[test]
    fn dropping_the_read_handle_does_not_break_the_chain() {
        let executor = SequentialExecutor::new();
        let (promise, resolver) = Promise::pending(executor.handle());

        let out = Rc::new(Cell::new(1));
        let sink = out.clone();
        promise.then(|()| ()).then_void(move |()| sink.set(2));
        drop(promise);

        resolver.resolve(());
        executor.run_until_idle();
        assert_eq!(out.get(), 2);
    }

    #[test]
    fn discarding_the_child_still_runs_the_handler() {
        let executor = SequentialExecutor::new();

        let out = Rc::new(Cell::new(0));
        let sink = out.clone();
        let _ = Promise::resolved(executor.handle(), 1).then(move |i| sink.set(i));

        executor.run_until_idle();
        assert_eq!(out.get(), 1);
    }

    #[test]
    #[should_panic(expected = "handler attached twice")]
    fn second_attachment_is_fatal() {
        let executor = SequentialExecutor::new();
        let (promise, _resolver) = Promise::<i32>::pending(executor.handle());

        promise.then_void(|_| {});
        promise.then_void(|_| {});
    }
}
