// ── Sample buffer ──
//
// Latest value per key plus the "flush armed" flag, both behind one
// mutex. Producers only ever touch this struct; the relay loop drains
// it. Keeping the flag under the same lock as the map means a put and
// the decision to arm a timer are one atomic step.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    samples: HashMap<String, String>,
    flush_armed: bool,
}

#[derive(Debug, Default)]
pub struct SampleBuffer {
    inner: Mutex<Inner>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the value for `key`.
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().samples.insert(key.into(), value.into());
    }

    /// Insert the sample and claim the flush timer.
    ///
    /// Returns `true` when the caller must schedule a flush: nothing was
    /// armed before this put.
    pub fn put_and_arm(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let mut inner = self.lock();
        inner.samples.insert(key.into(), value.into());
        !std::mem::replace(&mut inner.flush_armed, true)
    }

    /// Claim the flush timer if samples are pending and no timer is armed.
    pub fn try_arm(&self) -> bool {
        let mut inner = self.lock();
        if inner.samples.is_empty() || inner.flush_armed {
            return false;
        }
        inner.flush_armed = true;
        true
    }

    /// Release the flush timer claim. Called when a timer fires.
    pub fn disarm(&self) {
        self.lock().flush_armed = false;
    }

    pub fn is_armed(&self) -> bool {
        self.lock().flush_armed
    }

    /// Take every buffered sample, leaving the buffer empty.
    pub fn drain(&self) -> HashMap<String, String> {
        std::mem::take(&mut self.lock().samples)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    /// Drop all pending samples. The armed flag is left alone so an
    /// already scheduled timer still releases it.
    pub fn clear(&self) {
        self.lock().samples.clear();
    }
}
