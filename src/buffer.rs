//! Framebuffer pool and role rotation.
//!
//! The pool owns one, two or three [`PixelGrid`]s. Which grid the writer
//! draws into and which one the scan-out reads is kept in a single
//! `AtomicU8` role word:
//!
//! ```text
//!   bit   7      6      5..4   3..2   1..0
//!       busy   fresh   scan   idle   write
//! ```
//!
//! `busy` is set while a scan pass holds its frame, `fresh` marks an idle
//! slot holding a completed frame not yet shown (triple buffering only).
//! Every role change is one compare-and-swap on this word, so the reader
//! never sees a half-applied rotation and neither side ever waits.

use crate::addressing::Addressing;
use crate::grid::PixelGrid;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

// ── Buffering mode ───────────────────────────────────────────────────

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum BufferingMode {
    /// One buffer, drawn and scanned at once. Tearing is visible.
    Single,
    /// Draw into one buffer while the other is scanned, swap on rotate.
    #[default]
    Double,
    /// A third "ready" buffer decouples drawing pace from scan pace.
    Triple,
}

impl BufferingMode {
    pub const fn buffer_count(self) -> usize {
        match self {
            BufferingMode::Single => 1,
            BufferingMode::Double => 2,
            BufferingMode::Triple => 3,
        }
    }
}

/// The role a slot currently plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SlotRole {
    Writing,
    ScanActive,
    Idle,
    /// Single buffering: the only slot is written and scanned at once.
    Shared,
}

/// What a call to rotate did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rotation {
    /// Single buffering, nothing to rotate.
    Unchanged,
    /// Double buffering, Writing and ScanActive traded places.
    Swapped,
    /// Triple buffering, the frame went straight to ScanActive because no
    /// scan pass was in progress.
    Promoted { dropped: bool },
    /// Triple buffering, the frame is parked in Idle until the next scan
    /// pass picks it up.
    Queued { dropped: bool },
}

impl Rotation {
    /// A completed frame was discarded without ever being scanned.
    pub fn dropped_frame(self) -> bool {
        matches!(
            self,
            Rotation::Promoted { dropped: true } | Rotation::Queued { dropped: true }
        )
    }
}

// ── Role word ────────────────────────────────────────────────────────

const INDEX_MASK: u8 = 0b11;
const WRITE_SHIFT: u8 = 0;
const IDLE_SHIFT: u8 = 2;
const SCAN_SHIFT: u8 = 4;
const FRESH: u8 = 1 << 6;
const BUSY: u8 = 1 << 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RoleWord(u8);

impl RoleWord {
    const fn new(write: usize, idle: usize, scan: usize) -> Self {
        Self(
            ((write as u8 & INDEX_MASK) << WRITE_SHIFT)
                | ((idle as u8 & INDEX_MASK) << IDLE_SHIFT)
                | ((scan as u8 & INDEX_MASK) << SCAN_SHIFT),
        )
    }

    fn initial(mode: BufferingMode) -> Self {
        match mode {
            BufferingMode::Single => Self::new(0, 0, 0),
            BufferingMode::Double => Self::new(0, 0, 1),
            BufferingMode::Triple => Self::new(0, 1, 2),
        }
    }

    fn write(self) -> usize {
        ((self.0 >> WRITE_SHIFT) & INDEX_MASK) as usize
    }

    fn idle(self) -> usize {
        ((self.0 >> IDLE_SHIFT) & INDEX_MASK) as usize
    }

    fn scan(self) -> usize {
        ((self.0 >> SCAN_SHIFT) & INDEX_MASK) as usize
    }

    fn fresh(self) -> bool {
        self.0 & FRESH != 0
    }

    fn busy(self) -> bool {
        self.0 & BUSY != 0
    }

    fn with_fresh(self, fresh: bool) -> Self {
        if fresh { Self(self.0 | FRESH) } else { Self(self.0 & !FRESH) }
    }

    fn with_busy(self, busy: bool) -> Self {
        if busy { Self(self.0 | BUSY) } else { Self(self.0 & !BUSY) }
    }

    /// Writer side of a double-buffer rotation.
    fn swapped(self) -> Self {
        Self::new(self.scan(), self.idle(), self.write()).with_busy(self.busy())
    }

    /// Writer side of a triple-buffer rotation.
    fn published(self) -> Self {
        if self.busy() {
            // The scan pass owns `scan`; park the frame in idle and keep
            // drawing into what was idle.
            Self::new(self.idle(), self.write(), self.scan())
                .with_fresh(true)
                .with_busy(true)
        } else {
            Self::new(self.idle(), self.scan(), self.write())
        }
    }

    /// Reader side at the start of a scan pass.
    fn acquired(self, mode: BufferingMode) -> Self {
        let next = if mode == BufferingMode::Triple && self.fresh() {
            Self::new(self.write(), self.scan(), self.idle())
        } else {
            self
        };
        next.with_busy(true)
    }
}

// ── Role snapshot ────────────────────────────────────────────────────

/// A consistent view of every slot's role, taken from one atomic load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoleSnapshot {
    mode: BufferingMode,
    word: RoleWord,
}

impl RoleSnapshot {
    pub fn write_index(&self) -> usize {
        self.word.write()
    }

    pub fn scan_index(&self) -> usize {
        self.word.scan()
    }

    /// The idle slot, present only in triple buffering.
    pub fn idle_index(&self) -> Option<usize> {
        (self.mode == BufferingMode::Triple).then(|| self.word.idle())
    }

    /// The idle slot holds a completed frame waiting to be scanned.
    pub fn frame_pending(&self) -> bool {
        self.word.fresh()
    }

    /// A scan pass currently holds the scan slot.
    pub fn scanning(&self) -> bool {
        self.word.busy()
    }

    pub fn role_of(&self, slot: usize) -> Option<SlotRole> {
        if slot >= self.mode.buffer_count() {
            return None;
        }
        let role = match self.mode {
            BufferingMode::Single => SlotRole::Shared,
            _ if slot == self.word.write() => SlotRole::Writing,
            _ if slot == self.word.scan() => SlotRole::ScanActive,
            _ => SlotRole::Idle,
        };
        Some(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = SlotRole> + '_ {
        (0..self.mode.buffer_count()).filter_map(|slot| self.role_of(slot))
    }
}

// ── Pool ─────────────────────────────────────────────────────────────

/// Rotation counters, readable from any thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct PoolStats {
    /// Rotations that changed roles (always 0 in single buffering)
    pub rotations: u64,
    /// Completed frames replaced before any scan pass showed them
    pub frames_dropped: u64,
    /// Scan passes started
    pub scan_passes: u64,
}

pub struct FrameBufferPool {
    mode: BufferingMode,
    slots: Box<[PixelGrid]>,
    roles: AtomicU8,
    rotations: AtomicU64,
    frames_dropped: AtomicU64,
    scan_passes: AtomicU64,
}

impl FrameBufferPool {
    /// Allocate `mode.buffer_count()` black grids.
    pub fn new(addressing: Addressing, mode: BufferingMode) -> Self {
        let slots = (0..mode.buffer_count())
            .map(|_| PixelGrid::new(addressing))
            .collect();
        Self {
            mode,
            slots,
            roles: AtomicU8::new(RoleWord::initial(mode).0),
            rotations: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            scan_passes: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> BufferingMode {
        self.mode
    }

    pub fn addressing(&self) -> Addressing {
        self.slots[0].addressing()
    }

    pub fn roles(&self) -> RoleSnapshot {
        RoleSnapshot {
            mode: self.mode,
            word: RoleWord(self.roles.load(Ordering::Acquire)),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            rotations: self.rotations.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            scan_passes: self.scan_passes.load(Ordering::Relaxed),
        }
    }

    /// The grid new pixels go to. Only the single writer may draw into it.
    pub(crate) fn write_grid(&self) -> &PixelGrid {
        &self.slots[RoleWord(self.roles.load(Ordering::Acquire)).write()]
    }

    #[cfg(test)]
    pub(crate) fn slot(&self, index: usize) -> Option<&PixelGrid> {
        self.slots.get(index)
    }

    /// The grid behind an index returned by [`FrameBufferPool::begin_scan`].
    pub(crate) fn scan_grid(&self, index: usize) -> &PixelGrid {
        &self.slots[index]
    }

    /// Publish the write grid. Never blocks and never fails.
    pub(crate) fn rotate(&self) -> Rotation {
        let rotation = match self.mode {
            BufferingMode::Single => return Rotation::Unchanged,
            BufferingMode::Double => {
                self.update_roles(RoleWord::swapped);
                Rotation::Swapped
            }
            BufferingMode::Triple => {
                let previous = self.update_roles(RoleWord::published);
                let dropped = previous.fresh();
                if previous.busy() {
                    Rotation::Queued { dropped }
                } else {
                    Rotation::Promoted { dropped }
                }
            }
        };

        self.rotations.fetch_add(1, Ordering::Relaxed);
        if rotation.dropped_frame() {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        rotation
    }

    /// Start a scan pass: pick up a pending frame, mark the scan slot busy
    /// and return its index. The slot keeps its content until
    /// [`FrameBufferPool::end_scan`].
    pub(crate) fn begin_scan(&self) -> usize {
        let mode = self.mode;
        let previous = self.update_roles(|word| word.acquired(mode));
        self.scan_passes.fetch_add(1, Ordering::Relaxed);
        previous.acquired(mode).scan()
    }

    pub(crate) fn end_scan(&self) {
        self.roles.fetch_and(!BUSY, Ordering::Release);
    }

    fn update_roles(&self, step: impl Fn(RoleWord) -> RoleWord) -> RoleWord {
        let previous = self
            .roles
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(step(RoleWord(bits)).0)
            })
            .unwrap_or_else(|bits| bits);
        RoleWord(previous)
    }
}

impl std::fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBufferPool")
            .field("mode", &self.mode)
            .field("roles", &self.roles())
            .field("stats", &self.stats())
            .finish()
    }
}
