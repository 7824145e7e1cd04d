//! Chase-Lev work-stealing deque.
//!
//! The owner pushes and takes at the bottom without locks; any number of
//! thieves steal from the top. `top` is the only contested word: the owner
//! only competes for it when a single element remains.
//!
//! Superseded buffers are retired through `crossbeam::epoch`, so a thief
//! that loaded the old buffer just before a grow can still read from it.

use std::marker::PhantomData;
use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::epoch::{self, Atomic, Owned};
use crossbeam::utils::CachePadded;

use super::buffer::RingBuffer;

/// Owned pointer types that can travel through the deque.
///
/// # Safety
/// `from_raw(into_raw(p))` must give back `p`, and a pointer produced by
/// `into_raw` must stay valid until it is turned back with `from_raw`.
pub unsafe trait TaskPointer: Sized {
    fn into_raw(self) -> *mut ();

    /// # Safety
    /// `raw` must come from `into_raw` and be converted back only once.
    unsafe fn from_raw(raw: *mut ()) -> Self;
}

unsafe impl<T> TaskPointer for Box<T> {
    #[inline]
    fn into_raw(self) -> *mut () {
        Box::into_raw(self) as *mut ()
    }

    #[inline]
    unsafe fn from_raw(raw: *mut ()) -> Self {
        Box::from_raw(raw as *mut T)
    }
}

unsafe impl<T> TaskPointer for Arc<T> {
    #[inline]
    fn into_raw(self) -> *mut () {
        Arc::into_raw(self) as *mut ()
    }

    #[inline]
    unsafe fn from_raw(raw: *mut ()) -> Self {
        Arc::from_raw(raw as *const T)
    }
}

/// Outcome of a steal attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Steal<P> {
    /// The deque looked empty.
    Empty,
    /// Lost the race on `top`; the deque may still hold work.
    Retry,
    /// Got a task.
    Success(P),
}

impl<P> Steal<P> {
    pub fn success(self) -> Option<P> {
        match self {
            Steal::Success(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Steal::Retry)
    }
}

struct Inner<P: TaskPointer> {
    top: CachePadded<AtomicUsize>,
    bottom: CachePadded<AtomicUsize>,
    buffer: CachePadded<Atomic<RingBuffer>>,
    _marker: PhantomData<P>,
}

// SAFETY: tasks only cross threads through the steal protocol, which hands
// each pointer to exactly one thread.
unsafe impl<P: TaskPointer + Send> Send for Inner<P> {}
unsafe impl<P: TaskPointer + Send> Sync for Inner<P> {}

impl<P: TaskPointer> Drop for Inner<P> {
    fn drop(&mut self) {
        // SAFETY: last reference, no concurrent access remains.
        unsafe {
            let guard = epoch::unprotected();
            let buffer = self.buffer.load(Ordering::Relaxed, guard);
            let buf = buffer.deref();
            let top = self.top.load(Ordering::Relaxed);
            let bottom = self.bottom.load(Ordering::Relaxed);
            for index in top..bottom {
                drop(P::from_raw(buf.get(index)));
            }
            drop(buffer.into_owned());
        }
    }
}

/// Create a deque with `1 << log_size` initial slots, returning the owner
/// end and one stealer.
pub fn deque<P: TaskPointer>(log_size: u32) -> (Worker<P>, Stealer<P>) {
    let inner = Arc::new(Inner {
        top: CachePadded::new(AtomicUsize::new(0)),
        bottom: CachePadded::new(AtomicUsize::new(0)),
        buffer: CachePadded::new(Atomic::new(RingBuffer::alloc(log_size))),
        _marker: PhantomData,
    });
    let stealer = Stealer {
        inner: inner.clone(),
    };
    let worker = Worker {
        inner,
        _not_sync: PhantomData,
    };
    (worker, stealer)
}

/// Owner end of the deque. `Send` but not `Sync`: only one thread may push
/// and take.
pub struct Worker<P: TaskPointer> {
    inner: Arc<Inner<P>>,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

impl<P: TaskPointer> Worker<P> {
    /// Another stealer for this deque.
    pub fn stealer(&self) -> Stealer<P> {
        Stealer {
            inner: self.inner.clone(),
        }
    }

    /// Push at the bottom, doubling the buffer if it is full. Never blocks.
    pub fn push_bottom(
        &self,
        task: P,
    ) {
        let inner = &*self.inner;
        let bottom = inner.bottom.load(Ordering::Relaxed);
        let top = inner.top.load(Ordering::Acquire);

        // SAFETY: only the owner replaces the buffer, so it cannot be
        // retired under our feet.
        let mut buffer = unsafe {
            inner
                .buffer
                .load(Ordering::Relaxed, epoch::unprotected())
                .deref()
        };

        if bottom.wrapping_sub(top) >= buffer.capacity() {
            let guard = &epoch::pin();
            let grown = Owned::new(buffer.grow(bottom, top)).into_shared(guard);
            let old = inner.buffer.swap(grown, Ordering::Release, guard);
            // SAFETY: `old` is unreachable for new loads; thieves that still
            // hold it are protected by their epoch guard.
            unsafe {
                guard.defer_destroy(old);
                buffer = inner
                    .buffer
                    .load(Ordering::Relaxed, epoch::unprotected())
                    .deref();
            }
            tracing::trace!("deque grown to {} slots", buffer.capacity());
        }

        buffer.set(bottom, task.into_raw());
        fence(Ordering::Release);
        inner.bottom.store(bottom.wrapping_add(1), Ordering::Relaxed);
    }

    /// Take from the bottom. Returns `None` when the deque is empty or the
    /// last element was lost to a thief.
    pub fn take_bottom(&self) -> Option<P> {
        let inner = &*self.inner;
        let bottom = inner.bottom.load(Ordering::Relaxed);
        if bottom == 0 {
            return None;
        }
        let bottom = bottom - 1;
        inner.bottom.store(bottom, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let top = inner.top.load(Ordering::Relaxed);

        if bottom < top {
            inner.bottom.store(bottom + 1, Ordering::Relaxed);
            return None;
        }

        // SAFETY: owner-only access to the current buffer.
        let raw = unsafe {
            inner
                .buffer
                .load(Ordering::Relaxed, epoch::unprotected())
                .deref()
                .get(bottom)
        };

        if bottom > top {
            // SAFETY: the slot is past every thief's reach.
            return Some(unsafe { P::from_raw(raw) });
        }

        let won = inner
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        inner.bottom.store(bottom + 1, Ordering::Relaxed);
        if won {
            // SAFETY: the CAS on `top` made us the single consumer.
            Some(unsafe { P::from_raw(raw) })
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        let bottom = self.inner.bottom.load(Ordering::Relaxed);
        let top = self.inner.top.load(Ordering::Relaxed);
        bottom.saturating_sub(top)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current buffer capacity.
    pub fn capacity(&self) -> usize {
        // SAFETY: owner-only access to the current buffer.
        unsafe {
            self.inner
                .buffer
                .load(Ordering::Relaxed, epoch::unprotected())
                .deref()
                .capacity()
        }
    }
}

impl<P: TaskPointer> std::fmt::Debug for Worker<P> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Worker").field("len", &self.len()).finish()
    }
}

/// Thief end of the deque.
pub struct Stealer<P: TaskPointer> {
    inner: Arc<Inner<P>>,
}

impl<P: TaskPointer> Clone for Stealer<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: TaskPointer> Stealer<P> {
    /// Try to take the element at the top.
    pub fn steal(&self) -> Steal<P> {
        let inner = &*self.inner;
        let top = inner.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let bottom = inner.bottom.load(Ordering::Acquire);
        if top >= bottom {
            return Steal::Empty;
        }

        let guard = &epoch::pin();
        let buffer = inner.buffer.load(Ordering::Acquire, guard);
        // SAFETY: the guard keeps the buffer alive even if it is retired.
        let raw = unsafe { buffer.deref().get(top) };

        if inner
            .top
            .compare_exchange(top, top + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            // The value read may already belong to someone else.
            return Steal::Retry;
        }
        // SAFETY: the successful CAS transferred ownership of slot `top`.
        Steal::Success(unsafe { P::from_raw(raw) })
    }

    pub fn is_empty(&self) -> bool {
        let top = self.inner.top.load(Ordering::Acquire);
        let bottom = self.inner.bottom.load(Ordering::Acquire);
        top >= bottom
    }
}

impl<P: TaskPointer> std::fmt::Debug for Stealer<P> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Stealer")
            .field("empty", &self.is_empty())
            .finish()
    }
}
