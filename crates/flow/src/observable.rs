//! Last-value-wins output streams.

use tokio::sync::watch;

/// A value observers can read or subscribe to
///
/// Subscribers only ever see the latest value; setting an equal value does
/// not notify them.
#[derive(Debug)]
pub(crate) struct Observable<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq> Observable<T> {
    pub(crate) fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub(crate) fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value; returns true if it changed
    pub(crate) fn set(&self, value: T) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        })
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}
