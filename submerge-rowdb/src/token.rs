//! FIFO superblock acquisition tokens, grounded on `btree_store.cc`'s
//! `new_read_token`/`new_write_token` and the fifo_enforcer pattern that
//! orders superblock acquisition behind them.
//!
//! A token is a ticket into a single FIFO queue per store: whichever of
//! read/write/backfill asked first gets its superblock first, regardless of
//! which kind of operation it is. `TokenSource` hands out strictly
//! increasing tickets; `wait_turn` blocks a caller until every
//! earlier-ticketed operation has released its turn.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A ticket drawn from a store's token source. Dropping it (via `release`,
/// called automatically when the RAII guard from `wait_turn` is dropped)
/// advances the FIFO so the next ticket can proceed.
#[derive(Debug)]
pub struct Token {
    ticket: u64,
}

impl Token {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

#[derive(Debug)]
struct Inner {
    next_ticket: AtomicU64,
    now_serving: Mutex<u64>,
    notify: Notify,
}

/// One per `Store`. Cheap to clone (it's an `Arc` underneath); every
/// acquisition path (`acquire_superblock_for_read/write/backfill`) draws a
/// token from the same source so read, write and backfill operations are
/// interleaved fairly rather than one kind starving another.
#[derive(Clone, Debug)]
pub struct TokenSource {
    inner: Arc<Inner>,
}

impl Default for TokenSource {
    fn default() -> Self {
        TokenSource {
            inner: Arc::new(Inner {
                next_ticket: AtomicU64::new(0),
                now_serving: Mutex::new(0),
                notify: Notify::new(),
            }),
        }
    }
}

impl TokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draws a new ticket. Must be called on the thread/task that owns the
    /// logical "home thread" of the calling operation, mirroring
    /// `new_read_token`/`new_write_token`'s same-thread requirement.
    pub fn new_token(&self) -> Token {
        let ticket = self.inner.next_ticket.fetch_add(1, AtomicOrdering::SeqCst);
        Token { ticket }
    }

    /// Blocks until `token`'s turn has come up, then returns a guard that
    /// releases the turn (advancing the FIFO and waking the next waiter)
    /// when dropped.
    pub async fn wait_turn(&self, token: Token) -> TurnGuard {
        loop {
            {
                let serving = self.inner.now_serving.lock();
                if *serving == token.ticket {
                    break;
                }
            }
            self.inner.notify.notified().await;
        }
        TurnGuard { source: self.clone(), ticket: token.ticket, released: false }
    }
}

/// RAII guard for a token's turn. Releasing advances `now_serving` and
/// wakes every other waiter so the next in line can re-check.
pub struct TurnGuard {
    source: TokenSource,
    ticket: u64,
    released: bool,
}

impl TurnGuard {
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        {
            let mut serving = self.source.inner.now_serving.lock();
            *serving = self.ticket + 1;
        }
        self.source.inner.notify.notify_waiters();
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn tokens_are_served_in_order() {
        let source = TokenSource::new();
        let t0 = source.new_token();
        let t1 = source.new_token();

        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = order.clone();
        let source2 = source.clone();
        let second = tokio::spawn(async move {
            let guard = source2.wait_turn(t1).await;
            order2.lock().push(1);
            guard.release();
        });

        // give the second task a chance to start waiting
        tokio::task::yield_now().await;
        let guard0 = source.wait_turn(t0).await;
        order.lock().push(0);
        guard0.release();

        second.await.unwrap();
        assert_eq!(*order.lock(), vec![0, 1]);
    }
}
