//! Unbuffered many-value async sequences.
//!
//! A [`Stream`] is the read end of a sequence of asynchronously produced
//! values: like a promise, but many-shot. The handler registered with
//! [`Stream::on_each`] runs once per value, in a call stack separate from
//! the writer's, dispatched through the executor in FIFO order.
//!
//! Values are not buffered. A value put before a handler is attached — or
//! while the attached handler had not yet been captured by the posting —
//! is dropped. The writer never blocks; there is no backpressure.

use alloc::boxed::Box;
use alloc::rc::Rc;
use core::cell::RefCell;

use crate::error::{fatal, Fault};
use crate::executor::Executor;

type Handler<T> = Rc<RefCell<dyn FnMut(T) + 'static>>;

struct Shared<T> {
    handler: RefCell<Option<Handler<T>>>,
    executor: Executor,
}

/// Creates a connected write/read pair sharing one delivery state.
pub fn channel<T: 'static>(executor: Executor) -> (StreamWriter<T>, Stream<T>) {
    let shared = Rc::new(Shared {
        handler: RefCell::new(None),
        executor,
    });
    (
        StreamWriter {
            shared: shared.clone(),
        },
        Stream { shared },
    )
}

/// The read end of a stream. Cheap to clone.
pub struct Stream<T> {
    shared: Rc<Shared<T>>,
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Stream {
            shared: self.shared.clone(),
        }
    }
}

impl<T: 'static> Stream<T> {
    /// Registers the handler called for each subsequent value. At most one
    /// handler per stream; a second registration is fatal.
    pub fn on_each(&self, handler: impl FnMut(T) + 'static) {
        let mut slot = self.shared.handler.borrow_mut();
        if slot.is_some() {
            fatal(Fault::DoubleAttach);
        }
        *slot = Some(Rc::new(RefCell::new(handler)));
    }
}

/// The write end of a stream.
pub struct StreamWriter<T> {
    shared: Rc<Shared<T>>,
}

impl<T: 'static> StreamWriter<T> {
    /// Posts `value` to the handler attached at the time of this call. With
    /// no handler attached yet the value is dropped.
    pub fn put(&self, value: T) {
        let handler = self.shared.handler.borrow().clone();
        let Some(handler) = handler else { return };
        self.shared.executor.post(Box::new(move || {
            let mut handler = handler.borrow_mut();
            (&mut *handler)(value)
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SequentialExecutor;

    #[test]
    fn values_put_before_a_handler_exists_are_dropped() {
        let executor = SequentialExecutor::new();
        let (writer, stream) = channel(executor.handle());

        writer.put(1);
        writer.put(2);

        let log = Rc::new(RefCell::new(alloc::vec::Vec::new()));
        let sink = log.clone();
        stream.on_each(move |i: i32| sink.borrow_mut().push(i));
        writer.put(3);

        executor.run_until_idle();
        assert_eq!(*log.borrow(), [3]);
    }

    #[test]
    fn each_value_is_delivered_in_its_own_turn() {
        let executor = SequentialExecutor::new();
        let (writer, stream) = channel(executor.handle());

        let sum = Rc::new(core::cell::Cell::new(1));
        let sink = sum.clone();
        stream.on_each(move |i: i32| sink.set(sink.get() + i));

        writer.put(2);
        assert_eq!(sum.get(), 1);
        executor.run_until_idle();
        assert_eq!(sum.get(), 3);

        writer.put(3);
        executor.run_until_idle();
        assert_eq!(sum.get(), 6);
    }

    #[test]
    fn deliveries_preserve_put_order() {
        let executor = SequentialExecutor::new();
        let (writer, stream) = channel(executor.handle());

        let log = Rc::new(RefCell::new(alloc::vec::Vec::new()));
        let sink = log.clone();
        stream.on_each(move |i: i32| sink.borrow_mut().push(i));

        for i in 0..5 {
            writer.put(i);
        }
        executor.run_until_idle();
        assert_eq!(*log.borrow(), [0, 1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "handler attached twice")]
    fn second_handler_is_fatal() {
        let executor = SequentialExecutor::new();
        let (_writer, stream) = channel::<i32>(executor.handle());

        stream.on_each(|_| {});
        stream.on_each(|_| {});
    }
}
