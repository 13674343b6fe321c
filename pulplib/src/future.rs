//! Proxy futures: handles to values that may not exist yet.
//!
//! A [`ProxyFuture`] is resolved at most once, either immediately
//! ([`ready`](ProxyFuture::ready), [`failed`](ProxyFuture::failed)) or later
//! through the [`Resolver`] returned by [`pending`](ProxyFuture::pending).
//! Callers may block on it from any thread, `.await` it from async code,
//! chain transformations on it, or cancel it.
//!
//! A resolver only holds a weak reference. Once every handle to a pending
//! future has been dropped, [`Resolver::is_abandoned`] reports it, hooks
//! registered with [`Resolver::on_abandon`] run, and the producer can stop
//! working on it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::PulpError;

type Outcome<T> = Result<T, PulpError>;
type Callback<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

struct State<T> {
    outcome: Option<Outcome<T>>,
    callbacks: Vec<Callback<T>>,
    wakers: Vec<Waker>,
    cancel_hook: Option<CancelHook>,
    cancel_requested: bool,
    abandon_hooks: Vec<CancelHook>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn new(outcome: Option<Outcome<T>>) -> Self {
        Self {
            state: Mutex::new(State {
                outcome,
                callbacks: Vec::new(),
                wakers: Vec::new(),
                cancel_hook: None,
                cancel_requested: false,
                abandon_hooks: Vec::new(),
            }),
            resolved: Condvar::new(),
        }
    }

    /// Stores the outcome and fires continuations, outside the lock.
    fn complete(&self, outcome: Outcome<T>) -> bool {
        let (callbacks, wakers, hook) = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            state.abandon_hooks.clear();
            (
                std::mem::take(&mut state.callbacks),
                std::mem::take(&mut state.wakers),
                state.cancel_hook.take(),
            )
        };
        self.resolved.notify_all();
        drop(hook);
        for callback in callbacks {
            callback(&outcome);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.outcome.is_none() {
            for hook in std::mem::take(&mut state.abandon_hooks) {
                hook();
            }
        }
    }
}

/// Handle to a value that is, or will be, the result of an operation.
///
/// Cloning yields another handle to the same value.
pub struct ProxyFuture<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ProxyFuture<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for ProxyFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ProxyFuture")
            .field("done", &state.outcome.is_some())
            .field("cancel_requested", &state.cancel_requested)
            .finish_non_exhaustive()
    }
}

/// Producer side of a pending [`ProxyFuture`].
pub struct Resolver<T> {
    shared: Weak<Shared<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("abandoned", &(self.shared.strong_count() == 0))
            .finish()
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Resolves the future.
    ///
    /// Returns `false` if it was already resolved or nobody holds it.
    pub fn resolve(&self, outcome: Outcome<T>) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.complete(outcome))
    }

    /// True once every handle to the future has been dropped.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.shared.strong_count() == 0
    }

    /// Installs the action run when the future is cancelled, replacing any
    /// previous one.
    ///
    /// If cancellation was already requested, `hook` runs immediately. The
    /// hook is dropped unrun once the future resolves.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        {
            let mut state = shared.state.lock();
            if state.outcome.is_some() {
                return;
            }
            if !state.cancel_requested {
                state.cancel_hook = Some(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// Registers an action run when the last handle to the still pending
    /// future is dropped.
    ///
    /// Runs immediately if that already happened; never runs once the
    /// future has resolved.
    pub fn on_abandon(&self, hook: impl FnOnce() + Send + 'static) {
        let Some(shared) = self.shared.upgrade() else {
            hook();
            return;
        };
        let mut state = shared.state.lock();
        if state.outcome.is_none() {
            state.abandon_hooks.push(Box::new(hook));
        }
    }

    #[must_use]
    pub fn cancel_requested(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.state.lock().cancel_requested)
    }
}

impl<T: Clone + Send + 'static> ProxyFuture<T> {
    /// A future already resolved with `value`.
    pub fn ready(value: T) -> Self {
        Self {
            shared: Arc::new(Shared::new(Some(Ok(value)))),
        }
    }

    /// A future already failed with `error`.
    pub fn failed(error: PulpError) -> Self {
        Self {
            shared: Arc::new(Shared::new(Some(Err(error)))),
        }
    }

    pub fn from_result(outcome: Outcome<T>) -> Self {
        Self {
            shared: Arc::new(Shared::new(Some(outcome))),
        }
    }

    /// An unresolved future and the resolver that completes it.
    #[must_use]
    pub fn pending() -> (Self, Resolver<T>) {
        let shared = Arc::new(Shared::new(None));
        let resolver = Resolver {
            shared: Arc::downgrade(&shared),
        };
        (Self { shared }, resolver)
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.state.lock().outcome.is_some()
    }

    /// The outcome, if resolved, without blocking.
    #[must_use]
    pub fn try_result(&self) -> Option<Outcome<T>> {
        self.shared.state.lock().outcome.clone()
    }

    /// Blocks until the future resolves and returns its outcome.
    ///
    /// Every call returns the same outcome.
    ///
    /// # Errors
    ///
    /// Returns the error the future failed with.
    pub fn result(&self) -> Outcome<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.shared.resolved.wait(&mut state);
        }
    }

    /// Like [`result`](Self::result) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`PulpError::Timeout`] if the future is still pending when
    /// the deadline passes; the future stays valid and may be waited on
    /// again. Otherwise returns the error the future failed with.
    pub fn result_timeout(&self, timeout: Duration) -> Outcome<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            if self
                .shared
                .resolved
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state
                    .outcome
                    .clone()
                    .unwrap_or(Err(PulpError::Timeout(timeout)));
            }
        }
    }

    /// Registers a continuation.
    ///
    /// Continuations run in registration order on the thread that resolves
    /// the future, or immediately on this thread if it already resolved.
    pub fn on_done(&self, callback: impl FnOnce(&Outcome<T>) + Send + 'static) {
        let outcome = {
            let mut state = self.shared.state.lock();
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&outcome);
    }

    /// A future of `f` applied to this future's value.
    ///
    /// Errors pass through unchanged. Cancelling the returned future
    /// cancels this one.
    pub fn map<U, F>(&self, f: F) -> ProxyFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.and_then(move |value| Ok(f(value)))
    }

    /// Like [`map`](Self::map) for a fallible transformation.
    pub fn and_then<U, F>(&self, f: F) -> ProxyFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Outcome<U> + Send + 'static,
    {
        let (future, resolver) = ProxyFuture::pending();
        let upstream = self.clone();
        resolver.on_cancel(move || upstream.cancel());
        self.on_done(move |outcome| {
            resolver.resolve(outcome.clone().and_then(f));
        });
        future
    }

    /// Chains an asynchronous step: `f` returns another future, and the
    /// result resolves with that future's outcome.
    ///
    /// Cancelling the result cancels whichever stage is currently running.
    pub fn flat_map<U, F>(&self, f: F) -> ProxyFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> ProxyFuture<U> + Send + 'static,
    {
        self.then(move |outcome| match outcome {
            Ok(value) => f(value),
            Err(e) => ProxyFuture::failed(e),
        })
    }

    /// Like [`flat_map`](Self::flat_map), but `f` also sees failures.
    pub fn then<U, F>(&self, f: F) -> ProxyFuture<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Outcome<T>) -> ProxyFuture<U> + Send + 'static,
    {
        let (future, resolver) = ProxyFuture::pending();
        let upstream = self.clone();
        resolver.on_cancel(move || upstream.cancel());
        self.on_done(move |outcome| {
            let inner = f(outcome.clone());
            let held = inner.clone();
            resolver.on_cancel(move || held.cancel());
            inner.on_done(move |inner_outcome| {
                resolver.resolve(inner_outcome.clone());
            });
        });
        future
    }

    /// Requests cancellation.
    ///
    /// Idempotent, and a no-op once resolved. If the producer installed a
    /// cancel hook it runs once and the producer decides when to resolve;
    /// otherwise the future resolves as cancelled right away.
    pub fn cancel(&self) {
        let hook = {
            let mut state = self.shared.state.lock();
            if state.outcome.is_some() || state.cancel_requested {
                return;
            }
            state.cancel_requested = true;
            state.cancel_hook.take()
        };
        match hook {
            Some(hook) => hook(),
            None => {
                self.shared
                    .complete(Err(PulpError::Cancelled { task_ids: Vec::new() }));
            }
        }
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.state.lock().cancel_requested
    }

    /// Fan-in: resolves once every input has resolved.
    ///
    /// Succeeds with the values in input order, or fails with the error of
    /// the first failed input (by position). Cancelling the result cancels
    /// every input.
    pub fn join_all<I>(futures: I) -> ProxyFuture<Vec<T>>
    where
        I: IntoIterator<Item = Self>,
    {
        let futures: Vec<Self> = futures.into_iter().collect();
        if futures.is_empty() {
            return ProxyFuture::ready(Vec::new());
        }

        let (joined, resolver) = ProxyFuture::pending();
        let parts = futures.clone();
        resolver.on_cancel(move || {
            for part in &parts {
                part.cancel();
            }
        });

        let slots: Arc<Mutex<(Vec<Option<Outcome<T>>>, usize)>> =
            Arc::new(Mutex::new((vec![None; futures.len()], futures.len())));
        for (index, part) in futures.iter().enumerate() {
            let slots = Arc::clone(&slots);
            let resolver = resolver.clone();
            part.on_done(move |outcome| {
                let finished = {
                    let mut guard = slots.lock();
                    let (outcomes, remaining) = &mut *guard;
                    if let Some(slot) = outcomes.get_mut(index) {
                        *slot = Some(outcome.clone());
                    }
                    *remaining -= 1;
                    (*remaining == 0).then(|| std::mem::take(outcomes))
                };
                if let Some(outcomes) = finished {
                    resolver.resolve(outcomes.into_iter().flatten().collect());
                }
            });
        }
        joined
    }
}

impl<T: Clone + Send + 'static> Future for ProxyFuture<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
