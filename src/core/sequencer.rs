//! Per-room delivery ordering
//!
//! Writers commit concurrently, then race to emit. Each commit carries the
//! room's version after the transaction, which numbers every post, edit and
//! delete of the room without gaps. Deliveries are released strictly in that
//! order; a delivery that arrives ahead of its predecessor waits until the
//! predecessor shows up or the room's buffer grows past the reorder window.

use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// How long a settled room keeps its cursor
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

struct RoomCursor<T> {
    next: u64,
    /// Highest number handed to `anchor`
    anchored: u64,
    pending: BTreeMap<u64, T>,
    touched: Instant,
}

impl<T> RoomCursor<T> {
    fn starting_at(seq: u64) -> Self {
        Self {
            next: seq,
            anchored: 0,
            pending: BTreeMap::new(),
            touched: Instant::now(),
        }
    }

    /// Nothing buffered and nothing anchored is still on its way
    fn is_settled(&self) -> bool {
        self.pending.is_empty() && self.next > self.anchored
    }
}

struct Cursors<T> {
    rooms: HashMap<Uuid, RoomCursor<T>>,
    swept_at: Instant,
}

pub struct RoomSequencer<T> {
    window: usize,
    idle_timeout: Duration,
    cursors: Mutex<Cursors<T>>,
}

impl<T> RoomSequencer<T> {
    pub fn new(window: usize) -> Self {
        Self::with_idle_timeout(window, DEFAULT_IDLE_TIMEOUT)
    }

    /// Settled cursors untouched for `idle_timeout` are forgotten; the next
    /// anchor of that room starts a fresh one.
    pub fn with_idle_timeout(window: usize, idle_timeout: Duration) -> Self {
        Self {
            window: window.max(1),
            idle_timeout,
            cursors: Mutex::new(Cursors {
                rooms: HashMap::new(),
                swept_at: Instant::now(),
            }),
        }
    }

    fn cursors(&self) -> MutexGuard<'_, Cursors<T>> {
        self.cursors.lock().unwrap_or_else(|poisoned| {
            warn!("Sequencer lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Start the room's cursor at `seq` unless it already has one.
    ///
    /// Called while the write that produced `seq` still holds the room, so
    /// the first anchor of a room is always its lowest pending number.
    pub fn anchor(&self, room_id: Uuid, seq: u64) {
        let mut cursors = self.cursors();
        let cursor = cursors
            .rooms
            .entry(room_id)
            .or_insert_with(|| RoomCursor::starting_at(seq));
        cursor.anchored = cursor.anchored.max(seq);
        cursor.touched = Instant::now();
    }

    /// Hand `item` (committed as number `seq` in `room_id`) to `sink` once
    /// every earlier number of the room has been handed over.
    ///
    /// `sink` runs under the sequencer lock and must not block.
    pub fn deliver<F>(&self, room_id: Uuid, seq: u64, item: T, mut sink: F)
    where
        F: FnMut(T),
    {
        let mut cursors = self.cursors();
        let cursor = cursors
            .rooms
            .entry(room_id)
            .or_insert_with(|| RoomCursor::starting_at(seq));
        cursor.touched = Instant::now();

        if seq < cursor.next {
            warn!(
                "Delivery {} for room {} arrived after {} was released",
                seq, room_id, cursor.next
            );
            sink(item);
        } else {
            cursor.pending.insert(seq, item);
            while let Some(item) = cursor.pending.remove(&cursor.next) {
                sink(item);
                cursor.next += 1;
            }

            if cursor.pending.len() > self.window {
                warn!(
                    "Room {} waited on delivery {} past the reorder window, skipping ahead",
                    room_id, cursor.next
                );
                for (seq, item) in std::mem::take(&mut cursor.pending) {
                    sink(item);
                    cursor.next = seq + 1;
                }
            }
        }

        self.sweep(&mut cursors);
    }

    fn sweep(&self, cursors: &mut Cursors<T>) {
        if cursors.swept_at.elapsed() < self.idle_timeout {
            return;
        }
        cursors.swept_at = Instant::now();

        let before = cursors.rooms.len();
        let idle_timeout = self.idle_timeout;
        cursors
            .rooms
            .retain(|_, cursor| !(cursor.is_settled() && cursor.touched.elapsed() >= idle_timeout));
        let evicted = before - cursors.rooms.len();
        if evicted > 0 {
            debug!("Forgot {} idle room cursors", evicted);
        }
    }

    /// Deliveries currently held back for a room
    pub fn pending(&self, room_id: Uuid) -> usize {
        self.cursors()
            .rooms
            .get(&room_id)
            .map_or(0, |cursor| cursor.pending.len())
    }

    /// Rooms that currently have a cursor
    pub fn tracked_rooms(&self) -> usize {
        self.cursors().rooms.len()
    }
}
