//! Duplex transport: ordered frame delivery with explicit half-close.
//!
//! A [`Duplex`] has two directions. The *source* carries frames this side
//! pushes towards the peer; the *sink* receives frames the peer pushed. Each
//! direction moves through [`DirectionState`]:
//!
//! ```text
//! Normal ──end──▶ Ending ──drained──▶ Finished
//!    │               │
//!    └────abort──────┴──▶ Aborting ──▶ Finished
//! ```
//!
//! Abort always wins over a pending end. Unless the duplex is half-open,
//! closing one direction closes the other with the same kind of termination.
//! A half-open duplex still closes a direction it does not use once the
//! direction it does use has finished. The handler's `on_finished` fires
//! once, when both directions are finished.
//!
//! [`DuplexCore`] is the pure state machine. [`Duplex`] wraps it for sharing
//! between a session and the pump tasks spawned by [`link`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::Result;

/// Why a direction finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Graceful end: every buffered frame was delivered first.
    End,
    /// Immediate stop: buffered frames were discarded.
    Abort,
    /// Immediate stop caused by a failure.
    Error(String),
}

impl Termination {
    pub fn is_graceful(&self) -> bool {
        matches!(self, Termination::End)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::End => f.write_str("end"),
            Termination::Abort => f.write_str("abort"),
            Termination::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// State of one direction of a duplex.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DirectionState {
    #[default]
    Normal,
    Ending(Termination),
    Aborting(Termination),
    Finished(Termination),
}

impl DirectionState {
    pub fn is_normal(&self) -> bool {
        matches!(self, DirectionState::Normal)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, DirectionState::Finished(_))
    }

    /// Pending termination request, if any.
    pub fn request(&self) -> Option<&Termination> {
        match self {
            DirectionState::Ending(t) | DirectionState::Aborting(t) => Some(t),
            _ => None,
        }
    }

    fn ask_end(&mut self, t: Termination) -> bool {
        if !self.is_normal() {
            return false;
        }
        *self = DirectionState::Ending(t);
        true
    }

    fn ask_abort(&mut self, t: Termination) -> bool {
        match self {
            DirectionState::Normal | DirectionState::Ending(_) => {
                *self = DirectionState::Aborting(t);
                true
            }
            _ => false,
        }
    }

    fn finish(&mut self, t: Termination) -> bool {
        if self.is_finished() {
            return false;
        }
        *self = DirectionState::Finished(t);
        true
    }
}

/// Options for a duplex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplexOptions {
    /// Keep one direction open after the other closes.
    pub half_open: bool,
    /// This side pushes frames to the peer.
    pub readable: bool,
    /// This side takes frames from the peer.
    pub writable: bool,
}

impl Default for DuplexOptions {
    fn default() -> Self {
        Self {
            half_open: false,
            readable: true,
            writable: true,
        }
    }
}

impl DuplexOptions {
    pub fn half_open() -> Self {
        Self {
            half_open: true,
            ..Self::default()
        }
    }
}

/// Result of pulling from the outbound direction.
#[derive(Debug, PartialEq)]
pub enum Pull<T> {
    /// Next frame, in push order.
    Frame(T),
    /// Nothing buffered yet.
    Pending,
    /// The source finished; delivered once.
    End(Termination),
    /// The terminal signal was already delivered.
    Done,
}

/// Transport state machine for one side of a link.
#[derive(Debug)]
pub struct DuplexCore<T> {
    buffer: VecDeque<T>,
    source: DirectionState,
    sink: DirectionState,
    half_open: bool,
    readable: bool,
    writable: bool,
    linked: bool,
    terminal_sent: bool,
    finish_reported: bool,
}

impl<T> DuplexCore<T> {
    pub fn new(options: DuplexOptions) -> Self {
        Self {
            buffer: VecDeque::new(),
            source: DirectionState::Normal,
            sink: DirectionState::Normal,
            half_open: options.half_open,
            readable: options.readable,
            writable: options.writable,
            linked: false,
            terminal_sent: false,
            finish_reported: false,
        }
    }

    pub fn source(&self) -> &DirectionState {
        &self.source
    }

    pub fn sink(&self) -> &DirectionState {
        &self.sink
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Attach a downstream reader.
    pub fn mark_linked(&mut self) {
        self.linked = true;
    }

    /// Queue a frame for the peer. Ignored once the source is closing.
    pub fn push(&mut self, frame: T) -> bool {
        if !self.source.is_normal() {
            return false;
        }
        self.buffer.push_back(frame);
        true
    }

    /// Queue a frame ahead of everything already buffered.
    pub fn push_front(&mut self, frame: T) -> bool {
        if !self.source.is_normal() {
            return false;
        }
        self.buffer.push_front(frame);
        true
    }

    /// Graceful end of the outbound direction.
    pub fn end(&mut self, t: Termination) {
        if !self.source.ask_end(t.clone()) {
            return;
        }
        if !self.linked {
            // No reader will ever drain the buffer.
            self.buffer.clear();
            self.finish_source(t.clone());
        }
        if self.source_cascades() {
            self.end_sink(t);
        }
    }

    /// Immediate stop of the outbound direction.
    pub fn abort(&mut self, t: Termination) {
        if !self.source.ask_abort(t.clone()) {
            return;
        }
        self.buffer.clear();
        if !self.linked {
            self.finish_source(t.clone());
        }
        if self.source_cascades() {
            self.abort_sink(t);
        }
    }

    /// Closing the source also closes the sink.
    fn source_cascades(&self) -> bool {
        !self.half_open || !self.readable
    }

    /// Closing the sink also closes the source.
    fn sink_cascades(&self) -> bool {
        !self.half_open || !self.readable
    }

    fn finish_source(&mut self, t: Termination) {
        if !self.source.finish(t.clone()) {
            return;
        }
        // Nothing left to send and nothing wanted from the peer.
        if self.half_open && !self.writable {
            match t {
                Termination::End => self.end_sink(t),
                other => self.abort_sink(other),
            }
        }
    }

    /// Next outbound frame or terminal signal.
    pub fn pull(&mut self) -> Pull<T> {
        match &self.source {
            DirectionState::Normal => match self.buffer.pop_front() {
                Some(frame) => Pull::Frame(frame),
                None => Pull::Pending,
            },
            DirectionState::Ending(t) => match self.buffer.pop_front() {
                Some(frame) => Pull::Frame(frame),
                None => {
                    let t = t.clone();
                    self.finish_source(t.clone());
                    self.terminal_sent = true;
                    Pull::End(t)
                }
            },
            DirectionState::Aborting(t) => {
                let t = t.clone();
                self.finish_source(t.clone());
                self.terminal_sent = true;
                Pull::End(t)
            }
            DirectionState::Finished(t) => {
                if self.terminal_sent {
                    Pull::Done
                } else {
                    self.terminal_sent = true;
                    Pull::End(t.clone())
                }
            }
        }
    }

    /// Ask the peer to stop sending, letting in-flight frames arrive.
    pub fn end_sink(&mut self, t: Termination) {
        if !self.sink.ask_end(t.clone()) {
            return;
        }
        if !self.linked {
            self.close_sink(t);
        }
    }

    /// Ask the peer to stop sending, dropping in-flight frames.
    pub fn abort_sink(&mut self, t: Termination) {
        if !self.sink.ask_abort(t.clone()) {
            return;
        }
        if !self.linked {
            self.close_sink(t);
        }
    }

    /// The inbound direction finished upstream.
    ///
    /// Returns false if it was already finished.
    pub fn close_sink(&mut self, t: Termination) -> bool {
        if !self.sink.finish(t.clone()) {
            return false;
        }
        if self.sink_cascades() {
            match t {
                Termination::End => self.end(t),
                other => self.abort(other),
            }
        }
        true
    }

    /// Whether inbound frames should still reach the handler.
    pub fn accepts_frames(&self) -> bool {
        matches!(self.sink, DirectionState::Normal | DirectionState::Ending(_))
    }

    pub fn is_finished(&self) -> bool {
        self.source.is_finished() && self.sink.is_finished()
    }

    fn fingerprint(&self) -> (DirectionState, DirectionState, usize, bool) {
        (
            self.source.clone(),
            self.sink.clone(),
            self.buffer.len(),
            self.linked,
        )
    }

    /// The overall termination, reported once both directions finished.
    pub fn take_finished(&mut self) -> Option<Termination> {
        if self.finish_reported || !self.is_finished() {
            return None;
        }
        self.finish_reported = true;
        match (&self.source, &self.sink) {
            (DirectionState::Finished(Termination::End), DirectionState::Finished(t)) => {
                Some(t.clone())
            }
            (DirectionState::Finished(t), _) => Some(t.clone()),
            _ => None,
        }
    }
}

/// Receives frames arriving on a duplex.
#[async_trait]
pub trait FrameHandler<T>: Send + Sync {
    /// Handle one inbound frame. The next frame is not delivered until this
    /// returns.
    async fn on_frame(&self, frame: T);

    /// Both directions finished.
    fn on_finished(&self, termination: Termination);
}

struct Shared<T> {
    name: String,
    core: Mutex<DuplexCore<T>>,
    version: watch::Sender<u64>,
    handler: Mutex<Option<Weak<dyn FrameHandler<T>>>>,
}

/// Shared handle to one side of a link.
pub struct Duplex<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Duplex<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Duplex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core();
        f.debug_struct("Duplex")
            .field("name", &self.shared.name)
            .field("source", &core.source)
            .field("sink", &core.sink)
            .field("buffered", &core.buffer.len())
            .finish()
    }
}

impl<T> Duplex<T> {
    fn core(&self) -> MutexGuard<'_, DuplexCore<T>> {
        self.shared.core.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> AsRef<Duplex<T>> for Duplex<T> {
    fn as_ref(&self) -> &Duplex<T> {
        self
    }
}

impl<T: Send + 'static> Duplex<T> {
    pub fn new(name: impl Into<String>, options: DuplexOptions) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                core: Mutex::new(DuplexCore::new(options)),
                version,
                handler: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Install the receiver of inbound frames.
    pub fn set_handler(&self, handler: Weak<dyn FrameHandler<T>>) {
        *self
            .shared
            .handler
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    pub(crate) fn handler(&self) -> Option<Arc<dyn FrameHandler<T>>> {
        self.shared
            .handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Apply a transition, wake the pumps if anything moved and report
    /// completion.
    fn update<R>(&self, f: impl FnOnce(&mut DuplexCore<T>) -> R) -> R {
        let (result, changed, finished) = {
            let mut core = self.core();
            let before = core.fingerprint();
            let result = f(&mut core);
            let changed = core.fingerprint() != before;
            (result, changed, core.take_finished())
        };
        if changed {
            self.shared.version.send_modify(|v| *v = v.wrapping_add(1));
        }
        if let Some(t) = finished {
            tracing::trace!(duplex = %self.shared.name, termination = %t, "duplex finished");
            if let Some(handler) = self.handler() {
                handler.on_finished(t);
            }
        }
        result
    }

    pub fn push(&self, frame: T) -> bool {
        self.update(|core| core.push(frame))
    }

    pub fn push_front(&self, frame: T) -> bool {
        self.update(|core| core.push_front(frame))
    }

    pub fn end(&self) {
        self.update(|core| core.end(Termination::End))
    }

    pub fn abort(&self) {
        self.abort_with(Termination::Abort)
    }

    pub fn abort_with(&self, t: Termination) {
        self.update(|core| core.abort(t))
    }

    pub fn end_sink(&self) {
        self.update(|core| core.end_sink(Termination::End))
    }

    pub fn abort_sink(&self) {
        self.update(|core| core.abort_sink(Termination::Abort))
    }

    pub fn source_state(&self) -> DirectionState {
        self.core().source.clone()
    }

    pub fn sink_state(&self) -> DirectionState {
        self.core().sink.clone()
    }

    pub fn buffered(&self) -> usize {
        self.core().buffered()
    }

    pub fn is_finished(&self) -> bool {
        self.core().is_finished()
    }

    pub(crate) fn pull(&self) -> Pull<T> {
        self.update(|core| core.pull())
    }

    pub(crate) fn sink_request(&self) -> Option<Termination> {
        self.core().sink.request().cloned()
    }

    pub(crate) fn accepts_frames(&self) -> bool {
        self.core().accepts_frames()
    }

    pub(crate) fn close_sink(&self, t: Termination) {
        self.update(|core| {
            core.close_sink(t);
        })
    }

    /// Honour a stop request made by the reader of this source.
    pub(crate) fn stop_from_downstream(&self, t: Termination) {
        self.update(|core| match t {
            Termination::End => core.end(t),
            other => core.abort(other),
        })
    }

    pub(crate) fn mark_linked(&self) {
        self.update(|core| core.mark_linked())
    }

    pub(crate) fn watch(&self) -> watch::Receiver<u64> {
        self.shared.version.subscribe()
    }

    /// Whether this side takes frames from the peer.
    pub(crate) fn uses_sink(&self) -> bool {
        self.core().writable
    }
}

/// Handle to the two pump tasks of a link.
#[derive(Debug)]
pub struct Link {
    forward: JoinHandle<()>,
    backward: JoinHandle<()>,
}

impl Link {
    pub(crate) fn new(forward: JoinHandle<()>, backward: JoinHandle<()>) -> Self {
        Self { forward, backward }
    }

    /// Wait until both directions have stopped pumping.
    pub async fn closed(self) -> Result<()> {
        self.forward.await?;
        self.backward.await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.forward.is_finished() && self.backward.is_finished()
    }
}

/// Connect two duplexes: `a`'s source feeds `b`'s sink and vice versa.
///
/// Must be called within a Tokio runtime.
pub fn link<T, A, B>(a: &A, b: &B) -> Link
where
    T: Send + 'static,
    A: AsRef<Duplex<T>>,
    B: AsRef<Duplex<T>>,
{
    let a = a.as_ref().clone();
    let b = b.as_ref().clone();
    a.mark_linked();
    b.mark_linked();
    tracing::debug!(a = %a.name(), b = %b.name(), "linking duplexes");
    Link::new(tokio::spawn(pump(a.clone(), b.clone())), tokio::spawn(pump(b, a)))
}

/// Move frames from `from`'s source into `to`'s sink until `from` finishes.
async fn pump<T: Send + 'static>(from: Duplex<T>, to: Duplex<T>) {
    let mut from_rx = from.watch();
    let mut to_rx = to.watch();
    loop {
        from_rx.borrow_and_update();
        to_rx.borrow_and_update();

        if let Some(t) = to.sink_request() {
            from.stop_from_downstream(t);
        }

        match from.pull() {
            Pull::Frame(frame) => {
                if !to.accepts_frames() {
                    continue;
                }
                if let Some(handler) = to.handler() {
                    handler.on_frame(frame).await;
                }
            }
            Pull::Pending => {
                let alive = tokio::select! {
                    r = from_rx.changed() => r.is_ok(),
                    r = to_rx.changed() => r.is_ok(),
                };
                if !alive {
                    break;
                }
            }
            Pull::End(t) => {
                to.close_sink(t);
                break;
            }
            Pull::Done => break,
        }
    }
}
