//! Access windows of frames on streams.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::buffer::StreamBuffer;
use super::frame::Frame;
use super::stream::Stream;
use crate::violation;

/// Direction of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    /// Consumes `horizon` elements.
    Input,
    /// Observes `horizon` elements without consuming them.
    Peek,
    /// Produces `burst` elements.
    Output,
}

/// Static shape of a view, fixed at frame creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSpec {
    pub kind: ViewKind,
    pub elem_size: usize,
    /// Elements the access advances the stream by (0 for peeks).
    pub burst: usize,
    /// Elements visible to the access.
    pub horizon: usize,
    /// For outputs: index of the input view whose buffer is reused.
    pub reuse_of: Option<usize>,
}

impl ViewSpec {
    pub fn input(
        elem_size: usize,
        horizon: usize,
    ) -> Self {
        Self {
            kind: ViewKind::Input,
            elem_size,
            burst: horizon,
            horizon,
            reuse_of: None,
        }
    }

    pub fn peek(
        elem_size: usize,
        horizon: usize,
    ) -> Self {
        Self {
            kind: ViewKind::Peek,
            elem_size,
            burst: 0,
            horizon,
            reuse_of: None,
        }
    }

    pub fn output(
        elem_size: usize,
        burst: usize,
    ) -> Self {
        Self {
            kind: ViewKind::Output,
            elem_size,
            burst,
            horizon: burst,
            reuse_of: None,
        }
    }

    /// Output that takes over the buffer of input view `input`.
    pub fn reusing(
        mut self,
        input: usize,
    ) -> Self {
        self.reuse_of = Some(input);
        self
    }

    #[inline]
    pub fn is_consumer(&self) -> bool {
        self.kind != ViewKind::Output
    }

    /// Bytes this view contributes to its frame's synchronization counter.
    pub fn sync_contribution(&self) -> isize {
        match self.kind {
            ViewKind::Input | ViewKind::Peek => self
                .horizon
                .checked_mul(self.elem_size)
                .and_then(|bytes| isize::try_from(bytes).ok())
                .unwrap_or_else(|| {
                    violation!(
                        "window of {} elements of {} bytes overflows the frame counter",
                        self.horizon,
                        self.elem_size
                    )
                }),
            ViewKind::Output => 1,
        }
    }
}

/// Where a matched producer writes.
#[derive(Clone)]
pub struct Target {
    pub consumer: ViewHandle,
    /// Element offset inside the consumer's window.
    pub offset: usize,
}

/// Mutable part of a view, guarded by the view's lock.
#[derive(Default)]
pub struct ViewState {
    pub stream: Option<Arc<Stream>>,
    /// Consumers: the window data. Allocated lazily when deferred.
    pub buffer: Option<StreamBuffer>,
    /// Producers: consumer window and offset, set when matched.
    pub target: Option<Target>,
    /// Peeking views fed by broadcast alongside this view.
    pub siblings: Vec<ViewHandle>,
    /// Consumers: elements already matched to producers.
    pub reached: usize,
    /// Effective burst; differs from `ViewSpec::burst` only for a ticked peek.
    pub burst: usize,
    pub produced: bool,
}

/// One view of a frame.
pub struct View {
    spec: ViewSpec,
    state: Mutex<ViewState>,
}

impl View {
    pub(crate) fn new(spec: ViewSpec) -> Self {
        Self {
            spec,
            state: Mutex::new(ViewState {
                burst: spec.burst,
                ..ViewState::default()
            }),
        }
    }

    #[inline]
    pub fn spec(&self) -> &ViewSpec {
        &self.spec
    }

    #[inline]
    pub(crate) fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock()
    }

    /// Drop every reference the view holds.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.stream = None;
        state.buffer = None;
        state.target = None;
        state.siblings.clear();
    }
}

/// Stable handle to view `index` of a frame.
#[derive(Clone)]
pub struct ViewHandle {
    frame: Arc<Frame>,
    index: usize,
}

impl ViewHandle {
    pub(crate) fn new(
        frame: Arc<Frame>,
        index: usize,
    ) -> Self {
        Self { frame, index }
    }

    #[inline]
    pub fn frame(&self) -> &Arc<Frame> {
        &self.frame
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn view(&self) -> &View {
        self.frame.view(self.index)
    }

    #[inline]
    pub fn spec(&self) -> &ViewSpec {
        self.view().spec()
    }

    pub fn ptr_eq(
        &self,
        other: &ViewHandle,
    ) -> bool {
        Arc::ptr_eq(&self.frame, &other.frame) && self.index == other.index
    }
}

impl std::fmt::Debug for ViewHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "View({:?}#{})", self.frame.id(), self.index)
    }
}
