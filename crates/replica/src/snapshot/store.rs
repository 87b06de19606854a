use std::collections::VecDeque;

use super::{FrameIndex, Snapshot};

/// Frames retained for a client that has never acked; beyond this the oldest
/// frames are dropped and that client falls back to full sends.
const DEFAULT_MAX_FRAMES: usize = 1024;

/// Ordered history of server frames, the source of per-client baselines.
///
/// Frames arrive in counter order, so the deque stays sorted by modular
/// frame ordering. A `find` miss means the baseline was garbage-collected
/// and the caller must fall back to full (no-baseline) encoding.
#[derive(Debug)]
pub struct SnapshotStore {
    frames: VecDeque<Snapshot>,
    max_frames: usize,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::with_max_frames(DEFAULT_MAX_FRAMES)
    }

    pub fn with_max_frames(max_frames: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            max_frames: max_frames.max(1),
        }
    }

    pub fn append(&mut self, snapshot: Snapshot) {
        debug_assert!(
            self.frames
                .back()
                .is_none_or(|last| snapshot.frame.newer_than(last.frame)),
            "snapshots must be appended in frame order"
        );
        self.frames.push_back(snapshot);
        while self.frames.len() > self.max_frames {
            self.frames.pop_front();
        }
    }

    pub fn find(&self, frame: FrameIndex) -> Option<&Snapshot> {
        let front = self.frames.front()?;
        let offset = frame.delta(front.frame);
        if offset < 0 {
            return None;
        }
        self.frames
            .get(offset as usize)
            .filter(|s| s.frame == frame)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.frames.back()
    }

    /// Drops every snapshot older than `min_acked`. The acked frame itself
    /// is kept: it is still some client's baseline.
    pub fn gc(&mut self, min_acked: FrameIndex) {
        while let Some(front) = self.frames.front() {
            if min_acked.newer_than(front.frame) {
                self.frames.pop_front();
            } else {
                break;
            }
        }
    }

    /// Iterates frames in `(after, up_to]` for deletion aggregation. Frames
    /// already collected are absent when older than the GC horizon.
    pub fn range_after(
        &self,
        after: Option<FrameIndex>,
        up_to: FrameIndex,
    ) -> impl Iterator<Item = &Snapshot> {
        self.frames.iter().filter(move |s| {
            let newer_than_after = after.is_none_or(|a| s.frame.newer_than(a));
            let within = !s.frame.newer_than(up_to);
            newer_than_after && within
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
