//! The bounded set of threads a client does its request work on.
//!
//! A [`RequestPool`] owns a small tokio runtime. Blocking transport calls run
//! on its blocking threads, capped at the configured request thread count;
//! retry loops run as async tasks on a single worker and hold no thread
//! while they wait for tasks or back off.

use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::PulpError;
use crate::future::{ProxyFuture, Resolver};

/// Default number of threads performing requests concurrently.
pub const DEFAULT_REQUEST_THREADS: usize = 4;

/// Resolves the wrapped resolver as detached if it is dropped unresolved,
/// which happens to async tasks still pending when the pool shuts down.
pub(crate) struct DetachOnDrop<T: Clone + Send + 'static>(pub(crate) Resolver<T>);

impl<T: Clone + Send + 'static> Drop for DetachOnDrop<T> {
    fn drop(&mut self) {
        self.0.resolve(Err(PulpError::Detached));
    }
}

/// Worker threads shared by every operation of one client.
pub struct RequestPool {
    runtime: Option<Runtime>,
    threads: usize,
}

impl std::fmt::Debug for RequestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPool")
            .field("threads", &self.threads)
            .field("running", &self.runtime.is_some())
            .finish()
    }
}

impl RequestPool {
    /// Starts a pool running at most `threads` requests at once.
    ///
    /// If the runtime cannot be started the pool still exists, and every
    /// operation run on it fails with [`PulpError::Thread`].
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(threads)
            .thread_name("pulplib-request")
            .enable_time()
            .build();
        match runtime {
            Ok(runtime) => Self {
                runtime: Some(runtime),
                threads,
            },
            Err(e) => {
                tracing::error!(error = %e, "cannot start request threads");
                Self {
                    runtime: None,
                    threads,
                }
            }
        }
    }

    /// Maximum number of requests in flight at once.
    #[must_use]
    pub const fn threads(&self) -> usize {
        self.threads
    }

    pub(crate) fn handle(&self) -> Result<&Handle, PulpError> {
        self.runtime
            .as_ref()
            .map(Runtime::handle)
            .ok_or_else(|| PulpError::Thread("request pool is not running".into()))
    }

    /// Runs blocking `work` on one of the pool's threads.
    ///
    /// Work whose future is dropped before a thread picks it up is skipped.
    pub fn run<T, F>(&self, work: F) -> ProxyFuture<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> Result<T, PulpError> + Send + 'static,
    {
        let (future, resolver) = ProxyFuture::pending();
        let handle = match self.handle() {
            Ok(handle) => handle,
            Err(e) => {
                resolver.resolve(Err(e));
                return future;
            }
        };
        let guard = DetachOnDrop(resolver);
        handle.spawn_blocking(move || {
            if guard.0.is_abandoned() {
                return;
            }
            guard.0.resolve(work());
        });
        future
    }
}

impl Drop for RequestPool {
    fn drop(&mut self) {
        // The last owner may be one of the pool's own threads, where a
        // blocking shutdown would panic.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
