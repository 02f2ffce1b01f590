//! Cancellation and deadlines for blocking network and chain calls.
//!
//! A [Context] is cheap to clone. Cancelling a context cancels all clones and
//! all children derived from it, children additionally inherit the earlier of
//! their own and their parent's deadline.

use std::{future::Future, sync::Arc, time::Duration};

use futures::future::{select_all, BoxFuture, FutureExt};
use thiserror::Error;
use tokio::{sync::watch, time::Instant};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    Timeout,
}

#[derive(Debug)]
struct Inner {
    cancel: watch::Sender<bool>,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    fn new(parent: Option<Context>, deadline: Option<Instant>) -> Self {
        let deadline = match (parent.as_ref().and_then(|p| p.deadline()), deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let (cancel, _) = watch::channel(false);
        Context {
            inner: Arc::new(Inner {
                cancel,
                deadline,
                parent,
            }),
        }
    }

    /// A context that only ends when explicitly cancelled.
    pub fn background() -> Self {
        Self::new(None, None)
    }

    /// Child context that can be cancelled on its own.
    pub fn with_cancel(&self) -> Self {
        Self::new(Some(self.clone()), None)
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self::new(Some(self.clone()), Some(deadline))
    }

    /// Cancel this context and all of its children. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel.send_replace(true);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns why the context ended, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            if *c.inner.cancel.borrow() {
                return Some(ContextError::Cancelled);
            }
            ctx = c.inner.parent.as_ref();
        }
        match self.inner.deadline {
            Some(d) if Instant::now() >= d => Some(ContextError::Timeout),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the context is cancelled or its deadline passed.
    pub async fn done(&self) -> ContextError {
        if let Some(e) = self.err() {
            return e;
        }

        let mut waiters: Vec<BoxFuture<'static, ContextError>> = Vec::new();
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            let mut rx = c.inner.cancel.subscribe();
            waiters.push(
                async move {
                    // The sender lives as long as the context, so an error
                    // here means nobody can cancel anymore.
                    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
                    if closed {
                        futures::future::pending::<()>().await;
                    }
                    ContextError::Cancelled
                }
                .boxed(),
            );
            ctx = c.inner.parent.as_ref();
        }
        if let Some(deadline) = self.inner.deadline {
            waiters.push(
                async move {
                    tokio::time::sleep_until(deadline).await;
                    ContextError::Timeout
                }
                .boxed(),
            );
        }

        select_all(waiters).await.0
    }

    /// Drive `fut` until it completes or the context ends, whichever comes
    /// first. A context that already ended never polls `fut`.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ContextError> {
        if let Some(e) = self.err() {
            return Err(e);
        }
        tokio::select! {
            biased;
            e = self.done() => Err(e),
            out = fut => Ok(out),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
