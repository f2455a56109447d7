use crate::errors::Error;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal plus optional deadline, carried by every public
/// operation that may block.
///
/// Derived contexts inherit cancellation from their parent: cancelling a
/// parent fires every child's [`Context::done`].
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derives a child context that can be cancelled through the returned
    /// handle.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let token = self.token.child_token();
        let child = Self {
            token: token.clone(),
            deadline: self.deadline,
        };
        (child, CancelHandle { token })
    }

    /// Derives a child context whose deadline is `timeout` from now, clamped
    /// to the parent's own deadline.
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        let token = self.token.child_token();
        let deadline = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        };
        let child = Self {
            token: token.clone(),
            deadline: Some(deadline),
        };
        (child, CancelHandle { token })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context has been cancelled or its deadline has passed.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the context is cancelled or its deadline passes; a
    /// background context stays pending forever.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {}
            },
            None => self.token.cancelled().await,
        }
    }

    /// The error describing why the context is done: [`Error::DeadlineExceeded`]
    /// past the deadline, [`Error::Canceled`] otherwise.
    pub fn error(&self) -> Error {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Error::DeadlineExceeded
        } else {
            Error::Canceled
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

/// Cancels the associated [`Context`] and its children.
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }
}
