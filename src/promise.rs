use crate::error::Error;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Fulfilled,
    Errored,
}

struct Inner<T> {
    state: State,
    value: Option<T>,
    error: Option<Error>,
}

/// Single-shot rendezvous between a producer (the I/O worker) and a
/// consumer (an application thread calling `send`/`ping`).
///
/// States `{pending, fulfilled, errored}`, monotonic and mutually
/// exclusive transitions out of `pending`, a blocking `get` with optional
/// timeout, and `cancel` as a canned `set_error(Cancelled)`.
///
/// A design sharing this same contract across a reentrant lock would let
/// the worker fulfill a promise while already holding the enclosing
/// structure's lock. `std::sync::Mutex` is not reentrant, so this type is
/// self-contained instead: the endpoint fulfills promises by holding its
/// own lock and operating on the promise's inner state directly through
/// `set_result`/`set_error`, which never try to acquire a second lock.
#[derive(Clone)]
pub struct Promise<T> {
    inner: Arc<(Mutex<Inner<T>>, Condvar)>,
}

impl<T> Promise<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Inner {
                    state: State::Pending,
                    value: None,
                    error: None,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Resolve with a value. Calling this more than once, or after
    /// `set_error`/`cancel`, is a programming error.
    pub fn set_result(&self, value: T) {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock().unwrap();
        assert_eq!(inner.state, State::Pending, "promise already resolved");
        inner.value = Some(value);
        inner.state = State::Fulfilled;
        cvar.notify_all();
    }

    /// Resolve with an error. See `set_result` for the pending precondition.
    pub fn set_error(&self, error: Error) {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock().unwrap();
        assert_eq!(inner.state, State::Pending, "promise already resolved");
        inner.error = Some(error);
        inner.state = State::Errored;
        cvar.notify_all();
    }

    /// Cancel: a canned `set_error(Error::Cancelled)`. Idempotent only in
    /// the sense that the first call wins; a second call would violate the
    /// same pending precondition as `set_result`.
    pub fn cancel(&self) {
        self.set_error(Error::Cancelled);
    }

    /// Block until resolved or `timeout` elapses. A `None` timeout blocks
    /// indefinitely. On timeout, the promise is left untouched (still
    /// pending) and `Error::Timeout` is returned.
    pub fn get(&self, timeout: Option<Duration>) -> Result<T, Error>
    where
        T: Clone,
    {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock().unwrap();

        if inner.state == State::Pending {
            inner = match timeout {
                None => cvar
                    .wait_while(inner, |inner| inner.state == State::Pending)
                    .unwrap(),
                Some(timeout) => {
                    let (guard, result) = cvar
                        .wait_timeout_while(inner, timeout, |inner| inner.state == State::Pending)
                        .unwrap();
                    if result.timed_out() && guard.state == State::Pending {
                        return Err(Error::Timeout);
                    }
                    guard
                }
            };
        }

        match inner.state {
            State::Pending => unreachable!("woke from wait while still pending"),
            State::Fulfilled => Ok(inner.value.clone().expect("fulfilled promise has a value")),
            State::Errored => Err(clone_error(inner.error.as_ref().unwrap())),
        }
    }

    /// True once the state has left `pending`.
    pub fn done(&self) -> bool {
        let (lock, _) = &*self.inner;
        lock.lock().unwrap().state != State::Pending
    }

    /// True iff resolved with `Error::Cancelled`.
    pub fn cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        let inner = lock.lock().unwrap();
        inner.state == State::Errored && matches!(inner.error, Some(Error::Cancelled))
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `Error` isn't `Clone` (it wraps `io::Error`), so the few variants the
/// worker actually stores on a promise are reconstructed by tag instead.
fn clone_error(error: &Error) -> Error {
    match error {
        Error::Closed => Error::Closed,
        Error::Cancelled => Error::Cancelled,
        Error::Timeout => Error::Timeout,
        Error::Protocol(m) => Error::Protocol(m),
        Error::UnsupportedOpcode => Error::UnsupportedOpcode,
        Error::Usage(m) => Error::Usage(m),
        Error::Handshake(h) => Error::Handshake(*h),
        Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
        Error::Utf8(e) => Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn resolves_across_threads() {
        let promise: Promise<u32> = Promise::new();
        let producer = promise.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.set_result(42);
        });
        assert_eq!(promise.get(Some(Duration::from_secs(1))).unwrap(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn timeout_leaves_promise_pending() {
        let promise: Promise<u32> = Promise::new();
        let err = promise.get(Some(Duration::from_millis(10))).unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert!(!promise.done());
    }

    #[test]
    fn cancel_is_reported_as_cancelled() {
        let promise: Promise<u32> = Promise::new();
        promise.cancel();
        assert!(promise.done());
        assert!(promise.cancelled());
        assert!(matches!(
            promise.get(Some(Duration::from_millis(10))),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    #[should_panic]
    fn double_resolve_panics() {
        let promise: Promise<u32> = Promise::new();
        promise.set_result(1);
        promise.set_result(2);
    }
}
