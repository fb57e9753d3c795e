// Binding between an editing surface and a collaboration session.

use std::sync::{Arc, Mutex};

use tandem_common::types::{EditOp, TextChange};

use crate::session::{lock, Inner, SessionError};

/// The editing surface a session keeps in step with the shared document.
///
/// An accessor starts empty. When attached it receives the current text as a
/// single insert, then every remote change in merge order.
pub trait DocumentContentAccessor: Send + Sync {
    /// Called once on attach with the sink local edits must be pushed into.
    fn on_local_change(&self, sink: LocalChangeSink);

    /// Render changes merged from other peers. Runs on the session's
    /// delivery path, so it must not push edits synchronously.
    fn apply_merged(&self, changes: &[TextChange]);
}

/// Where an accessor pushes the edits its user makes.
#[derive(Clone)]
pub struct LocalChangeSink {
    inner: Arc<Inner>,
}

impl LocalChangeSink {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub fn push(&self, edit: &EditOp) -> Result<(), SessionError> {
        self.inner.apply_local(edit, || ())
    }

    /// Push `edit`, then run `render` before any remote change can be
    /// delivered, so the accessor's own view never interleaves with a merge.
    pub fn push_with<R>(&self, edit: &EditOp, render: impl FnOnce() -> R) -> Result<R, SessionError> {
        self.inner.apply_local(edit, render)
    }
}

/// Plain string accessor, used by the terminal client and in tests.
#[derive(Default)]
pub struct BufferAccessor {
    text: Mutex<String>,
    sink: Mutex<Option<LocalChangeSink>>,
}

impl BufferAccessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn text(&self) -> String {
        lock(&self.text).clone()
    }

    /// Apply a local edit to the buffer and share it.
    pub fn edit(&self, edit: &EditOp) -> Result<(), SessionError> {
        let sink = lock(&self.sink).clone().ok_or(SessionError::Detached)?;
        sink.push_with(edit, || {
            let mut text = lock(&self.text);
            for change in edit_as_changes(edit) {
                change.apply_to(&mut text);
            }
        })
    }
}

impl DocumentContentAccessor for BufferAccessor {
    fn on_local_change(&self, sink: LocalChangeSink) {
        *lock(&self.sink) = Some(sink);
    }

    fn apply_merged(&self, changes: &[TextChange]) {
        let mut text = lock(&self.text);
        for change in changes {
            change.apply_to(&mut text);
        }
    }
}

fn edit_as_changes(edit: &EditOp) -> Vec<TextChange> {
    match edit {
        EditOp::Insert { index, text } => vec![TextChange::Insert { index: *index, text: text.clone() }],
        EditOp::Delete { index, len } => vec![TextChange::Delete { index: *index, len: *len }],
        EditOp::Replace { index, len, text } => vec![
            TextChange::Delete { index: *index, len: *len },
            TextChange::Insert { index: *index, text: text.clone() },
        ],
    }
}
