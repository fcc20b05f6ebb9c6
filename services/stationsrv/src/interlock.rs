//! Cross-station interlocks
//!
//! Two stations on opposite sides of the table share one physical exit, so
//! their controllers coordinate through three binary interlocks: exit-free
//! (the shared exit hardware), self-turning (this station's table segment is
//! mid-rotation) and opposing-turning (the partner's view of the same).
//! Acquisition hands back an ownership token; dropping the token is the only
//! way to release, which keeps release tied to scope even on fault paths.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StationError};

/// Token proving ownership of an acquired interlock. Dropping it releases.
#[must_use = "dropping the token releases the interlock"]
pub struct LockToken {
    _guard: Option<OwnedMutexGuard<()>>,
}

/// One binary interlock, shared with the partner station or unwired.
#[derive(Clone, Default)]
pub struct Interlock {
    inner: Option<Arc<Mutex<()>>>,
}

impl Interlock {
    /// An interlock both stations of a pair contend on.
    pub fn shared() -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(()))),
        }
    }

    /// A standalone station's interlock: acquisition always succeeds
    /// immediately and the token holds nothing.
    pub fn unwired() -> Self {
        Self { inner: None }
    }

    /// Suspend until the interlock is ours or the controller is cancelled.
    /// Cancellation wins even when the interlock is free.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<LockToken> {
        if cancel.is_cancelled() {
            return Err(StationError::Cancelled);
        }
        match &self.inner {
            None => Ok(LockToken { _guard: None }),
            Some(lock) => {
                tokio::select! {
                    guard = lock.clone().lock_owned() => Ok(LockToken {
                        _guard: Some(guard),
                    }),
                    _ = cancel.cancelled() => Err(StationError::Cancelled),
                }
            }
        }
    }
}

/// The three interlocks one station coordinates through
#[derive(Clone)]
pub struct LockSet {
    pub exit_free: Interlock,
    pub self_turning: Interlock,
    pub opposing_turning: Interlock,
}

impl LockSet {
    /// Interlocks for a station running without a partner; every
    /// acquisition is a no-op.
    pub fn standalone() -> Self {
        Self {
            exit_free: Interlock::unwired(),
            self_turning: Interlock::unwired(),
            opposing_turning: Interlock::unwired(),
        }
    }

    /// Wire a station pair crosswise: each side's self-turning is the
    /// partner's opposing-turning, and exit-free is one lock both share.
    pub fn pair() -> (LockSet, LockSet) {
        let exit = Interlock::shared();
        let first_turning = Interlock::shared();
        let second_turning = Interlock::shared();

        (
            LockSet {
                exit_free: exit.clone(),
                self_turning: first_turning.clone(),
                opposing_turning: second_turning.clone(),
            },
            LockSet {
                exit_free: exit,
                self_turning: second_turning,
                opposing_turning: first_turning,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_standalone_acquisition_is_immediate() {
        let locks = LockSet::standalone();
        let cancel = CancellationToken::new();

        let first = locks.exit_free.acquire(&cancel).await.unwrap();
        // A second acquisition succeeds while the first token is alive
        let second = locks.exit_free.acquire(&cancel).await.unwrap();
        drop(first);
        drop(second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_interlock_blocks_until_token_drop() {
        let lock = Interlock::shared();
        let cancel = CancellationToken::new();

        let token = lock.acquire(&cancel).await.unwrap();
        assert!(timeout(Duration::from_secs(1), lock.acquire(&cancel))
            .await
            .is_err());

        drop(token);
        let _token = timeout(Duration::from_secs(1), lock.acquire(&cancel))
            .await
            .expect("released interlock acquires promptly")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pair_is_wired_crosswise() {
        let (north, south) = LockSet::pair();
        let cancel = CancellationToken::new();

        // North mid-rotation blocks south's opposing-turning wait
        let turning = north.self_turning.acquire(&cancel).await.unwrap();
        assert!(
            timeout(Duration::from_secs(1), south.opposing_turning.acquire(&cancel))
                .await
                .is_err()
        );
        drop(turning);
        let _token = south.opposing_turning.acquire(&cancel).await.unwrap();

        // Exit-free is one lock for both sides
        let exit = south.exit_free.acquire(&cancel).await.unwrap();
        assert!(timeout(Duration::from_secs(1), north.exit_free.acquire(&cancel))
            .await
            .is_err());
        drop(exit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_the_wait() {
        let lock = Interlock::shared();
        let cancel = CancellationToken::new();
        let _held = lock.acquire(&cancel).await.unwrap();

        let contender = lock.clone();
        let contender_cancel = cancel.clone();
        let wait = tokio::spawn(async move { contender.acquire(&contender_cancel).await });

        cancel.cancel();
        let result = wait.await.unwrap();
        assert!(matches!(result, Err(StationError::Cancelled)));
    }
}
