use std::time::Duration;

/// Target paint interval the host drives `on_frame` at.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Identity of the inputs an apply pass ran against: the rendered content and the
/// annotation list. A change to either makes a fresh pass due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ApplyKey {
    pub content_revision: u64,
    pub annotations_revision: u64,
}

/// Defers apply passes to the next paint frame and coalesces requests made in
/// between into one pass over the newest inputs.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    pending: Option<ApplyKey>,
    forced: bool,
    last_applied: Option<ApplyKey>,
    passes: u64,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `key` should be applied. Returns false when `key` was already
    /// applied and nothing else is pending.
    pub fn request(&mut self, key: ApplyKey) -> bool {
        if self.pending.is_none() && self.last_applied == Some(key) {
            return false;
        }
        self.pending = Some(key);
        true
    }

    /// Schedules a pass even if the key has not changed.
    pub fn force(&mut self, key: ApplyKey) {
        self.pending = Some(key);
        self.forced = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    /// Called once per frame; yields the key to apply, if any.
    pub fn on_frame(&mut self) -> Option<ApplyKey> {
        let key = self.pending.take()?;
        self.forced = false;
        self.last_applied = Some(key);
        self.passes += 1;
        Some(key)
    }

    pub fn last_applied(&self) -> Option<ApplyKey> {
        self.last_applied
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }
}

/// Yields until the next paint frame.
pub async fn next_frame() {
    tokio::time::sleep(FRAME_INTERVAL).await;
}
