//! Streams: FIFO channels connecting producer and consumer views.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::element::Element;
use super::view::{ViewHandle, ViewKind};
use crate::violation;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(0);

/// Unmatched views and shape of a stream.
///
/// At most one of `producers` and `consumers` is non-empty.
#[derive(Default)]
pub(crate) struct StreamState {
    pub producers: VecDeque<ViewHandle>,
    pub consumers: VecDeque<ViewHandle>,
    /// Peeks registered since the last consuming access.
    pub peek_chain: Vec<ViewHandle>,
    /// Burst shared by every producer.
    pub burst: Option<usize>,
    /// Horizon shared by every consumer and peek.
    pub horizon: Option<usize>,
}

impl StreamState {
    /// Record the shape of a view, enforcing uniform bursts and horizons
    /// with the horizon a multiple of the burst.
    pub fn admit(
        &mut self,
        stream: u64,
        kind: ViewKind,
        burst: usize,
        horizon: usize,
    ) {
        match kind {
            ViewKind::Output => {
                if burst == 0 {
                    violation!("stream {}: producer with zero burst", stream);
                }
                match self.burst {
                    Some(b) if b != burst => violation!(
                        "stream {}: producer burst {} differs from {}",
                        stream,
                        burst,
                        b
                    ),
                    _ => self.burst = Some(burst),
                }
            },
            ViewKind::Input | ViewKind::Peek => {
                if horizon == 0 {
                    violation!("stream {}: consumer with zero horizon", stream);
                }
                match self.horizon {
                    Some(h) if h != horizon => violation!(
                        "stream {}: consumer horizon {} differs from {}",
                        stream,
                        horizon,
                        h
                    ),
                    _ => self.horizon = Some(horizon),
                }
            },
        }
        if let (Some(b), Some(h)) = (self.burst, self.horizon) {
            if h % b != 0 {
                violation!(
                    "stream {}: horizon {} is not a multiple of burst {}",
                    stream,
                    h,
                    b
                );
            }
        }
    }

    #[inline]
    pub fn check_exclusive(&self) {
        debug_assert!(
            self.producers.is_empty() || self.consumers.is_empty(),
            "both stream queues hold unmatched views"
        );
    }
}

/// A typed many-producer, many-consumer FIFO channel.
///
/// Created with one reference; the last
/// [`stream_release`](super::DataflowExt::stream_release) drains it.
pub struct Stream {
    id: u64,
    elem_size: usize,
    refs: AtomicUsize,
    state: Mutex<StreamState>,
}

impl Stream {
    /// Stream of `elem_size`-byte elements.
    pub fn new(elem_size: usize) -> Arc<Self> {
        if elem_size == 0 {
            violation!("stream element size must be positive");
        }
        Arc::new(Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            elem_size,
            refs: AtomicUsize::new(1),
            state: Mutex::new(StreamState::default()),
        })
    }

    /// Stream of `T` elements.
    pub fn of<T: Element>() -> Arc<Self> {
        Self::new(std::mem::size_of::<T>())
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn elem_size(&self) -> usize {
        self.elem_size
    }

    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn add_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one reference; true when it was the last.
    pub(crate) fn drop_ref(&self) -> bool {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            violation!("stream {} released more often than referenced", self.id);
        }
        previous == 1
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock()
    }

    /// Unmatched producers currently queued.
    pub fn pending_producers(&self) -> usize {
        self.state.lock().producers.len()
    }

    /// Unmatched consumers currently queued.
    pub fn pending_consumers(&self) -> usize {
        self.state.lock().consumers.len()
    }

    /// Length of the active peek chain.
    pub fn peek_chain_len(&self) -> usize {
        self.state.lock().peek_chain.len()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("elem_size", &self.elem_size)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// A fixed array of streams sharing one element size.
#[derive(Debug, Clone)]
pub struct StreamArray {
    streams: Vec<Arc<Stream>>,
}

impl StreamArray {
    pub fn new(
        len: usize,
        elem_size: usize,
    ) -> Self {
        Self {
            streams: (0..len).map(|_| Stream::new(elem_size)).collect(),
        }
    }

    pub fn of<T: Element>(len: usize) -> Self {
        Self::new(len, std::mem::size_of::<T>())
    }

    /// Stream `index`; out of bounds is a contract violation.
    pub fn get(
        &self,
        index: usize,
    ) -> &Arc<Stream> {
        match self.streams.get(index) {
            Some(stream) => stream,
            None => violation!(
                "stream array index {} out of bounds (len {})",
                index,
                self.streams.len()
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Stream>> {
        self.streams.iter()
    }
}
