//! A flag-word triple buffering implementation
//!
//! In this crate, we implement a triple buffering mechanism where the whole
//! role assignment of the three buffers (who writes where, what was last
//! published, what the reader sees) is packed into a single byte, which is
//! only ever modified through compare-and-swap loops. This is suitable for
//! emulating a shared memory cell in a thread-safe and non-blocking fashion
//! between one single writer and one single reader.
//!
//! ```
//! let (mut writer, mut reader) = snapflip::triple_buffer(0);
//!
//! // The writer fills its dirty slot, then publishes it
//! writer.write(3);
//! writer.flip_writer();
//!
//! // The reader claims the latest published value, then looks at it
//! assert!(reader.new_snap());
//! assert_eq!(*reader.snap(), 3);
//!
//! // Intermediate values are lost, only the latest one is delivered
//! writer.update(4);
//! writer.update(5);
//! assert_eq!(*reader.read_last(), 5);
//! ```

#![deny(missing_docs)]

mod flags;

use crate::flags::{AtomicFlags, FlagWord, SlotIndex};
use crossbeam_utils::CachePadded;
use std::{
    cell::{Cell, UnsafeCell},
    fmt,
    marker::PhantomData,
    sync::{atomic::Ordering, Arc},
};

/// Create a triple buffer and split it into its writer and reader halves
///
/// This is a shorthand for `TripleBuffer::new(initial).split()`.
///
pub fn triple_buffer<T: Clone + Send>(initial: T) -> (Writer<T>, Reader<T>) {
    TripleBuffer::new(initial).split()
}

/// A triple buffer, useful for nonblocking and thread-safe data sharing
///
/// A triple buffer is a single-producer single-consumer nonblocking
/// communication channel which behaves like a shared variable: the writer
/// submits regular updates, the reader accesses the latest available value at
/// any time.
///
/// The writer and reader halves are what producers and consumers actually use
/// in practice. They are obtained with `split()`, can be moved to different
/// threads, and are further documented below. Since neither half can be
/// cloned, there can never be more than one writer and one reader.
///
/// Before splitting, the buffer can be cloned and compared. This snapshots the
/// flag word and the three slots at one point in time, and is only meant for
/// single-threaded setup and testing. Once split, the halves cannot be copied.
///
#[derive(Debug)]
pub struct TripleBuffer<T: Send> {
    /// Writer half
    writer: Writer<T>,

    /// Reader half
    reader: Reader<T>,
}
//
impl<T: Clone + Send> TripleBuffer<T> {
    /// Construct a triple buffer where every slot holds a copy of `initial`
    pub fn new(initial: T) -> Self {
        Self::from_slots([initial.clone(), initial.clone(), initial])
    }
}
//
impl<T: Send> TripleBuffer<T> {
    /// Construct a triple buffer from its initial slot contents
    fn from_slots(slots: [T; 3]) -> Self {
        // Start with the shared state...
        let shared = Arc::new(SharedState::new(slots, FlagWord::INITIAL));

        // ...then construct the writer and reader halves
        TripleBuffer {
            writer: Writer {
                shared: shared.clone(),
            },
            reader: Reader {
                shared,
                _not_sync: PhantomData,
            },
        }
    }

    /// Extract the writer and reader halves of the triple buffer
    pub fn split(self) -> (Writer<T>, Reader<T>) {
        (self.writer, self.reader)
    }
}
//
impl<T: Default + Send> Default for TripleBuffer<T> {
    /// Construct a triple buffer where every slot holds `T::default()`
    fn default() -> Self {
        Self::from_slots([T::default(), T::default(), T::default()])
    }
}
//
// The Clone and PartialEq traits are meant for setup and testing, see above.
//
impl<T: Clone + Send> Clone for TripleBuffer<T> {
    fn clone(&self) -> Self {
        // Clone the shared state. This is safe because at this layer of the
        // interface, one needs a Writer/Reader &mut to mutate the shared state.
        let shared = Arc::new(unsafe { self.writer.shared.clone_unsynchronized() });

        // ...then the writer and reader halves
        TripleBuffer {
            writer: Writer {
                shared: shared.clone(),
            },
            reader: Reader {
                shared,
                _not_sync: PhantomData,
            },
        }
    }
}
//
impl<T: PartialEq + Send> PartialEq for TripleBuffer<T> {
    fn eq(&self, other: &Self) -> bool {
        // Compare the shared states. This is safe because at this layer of the
        // interface, one needs a Writer/Reader &mut to mutate the shared state.
        unsafe {
            self.writer
                .shared
                .eq_unsynchronized(&other.writer.shared)
        }
    }
}

/// Producer interface to the triple buffer
///
/// The producer of data can use this struct to submit updates to the triple
/// buffer whenever it likes. Writing into the dirty slot is wait-free, and
/// publishing it is lock-free: a collision with the reader only results in a
/// compare-and-swap retry, deadlocks and scheduling-induced slowdowns cannot
/// happen.
///
/// There is only ever one writer, it cannot be cloned:
///
/// ```compile_fail
/// let (writer, _reader) = snapflip::triple_buffer(0);
/// let _second: snapflip::Writer<i32> = writer.clone();
/// ```
///
pub struct Writer<T: Send> {
    /// Reference-counted shared state
    shared: Arc<SharedState<T>>,
}
//
impl<T: Send> Writer<T> {
    /// Write a new value into the dirty slot, without publishing it
    ///
    /// The value only becomes visible to the reader once `flip_writer()` is
    /// called. Writing several times before flipping simply overwrites the
    /// dirty slot.
    ///
    pub fn write(&mut self, value: T) {
        *self.dirty_slot_mut() = value;
    }

    /// Publish the dirty slot, making it the latest value seen by the reader
    ///
    /// The writer receives the previous clean slot as its new dirty slot. If
    /// the reader did not claim that previous value, it is overwritten by the
    /// next write.
    ///
    pub fn flip_writer(&mut self) {
        self.shared.transition(FlagWord::publish);
    }

    /// Write a new value and publish it right away
    pub fn update(&mut self, value: T) {
        self.write(value);
        self.flip_writer();
    }

    /// Access the dirty slot for in-place modification
    ///
    /// Modifying the value in place avoids moving a whole new value into the
    /// triple buffer, which can be worthwhile for large data. Beware that the
    /// slot contains whatever value it held last (an older update or the
    /// initial value), not the latest published value. Use `flip_writer()` to
    /// publish the result.
    ///
    pub fn dirty_slot_mut(&mut self) -> &mut T {
        // Only the writer ever changes the dirty index, and the reader's
        // transitions carry it over unchanged, so a relaxed load suffices
        let dirty_idx = self.shared.load_flags(Ordering::Relaxed).dirty_index();

        // The dirty slot is never accessed by the reader, and we hold &mut self
        unsafe { &mut *self.shared.slot(dirty_idx) }
    }

    /// Check if the reader has claimed the latest published value
    ///
    /// This is also true if nothing was published yet.
    ///
    pub fn consumed(&self) -> bool {
        !self.shared.load_flags(Ordering::Acquire).is_new_write()
    }
}
//
impl<T: Send> fmt::Debug for Writer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writer")
            .field("flags", &self.shared.load_flags(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Consumer interface to the triple buffer
///
/// The consumer of data can use this struct to access the latest published
/// update from the producer whenever it likes. Reading the snapshot is
/// wait-free, and claiming a new snapshot is lock-free: a collision with the
/// writer only results in a compare-and-swap retry.
///
/// The reader can be sent to another thread whenever `T` can. Sharing it
/// between threads hands out `&T` to all of them, so that additionally
/// requires `T: Sync`:
///
/// ```compile_fail
/// fn assert_sync<S: Sync>(_: &S) {}
/// let (_writer, reader) = snapflip::triple_buffer(std::cell::Cell::new(0u8));
/// assert_sync(&reader);
/// ```
///
pub struct Reader<T: Send> {
    /// Reference-counted shared state
    shared: Arc<SharedState<T>>,

    /// Opts out of the automatic Sync impl, see below
    _not_sync: PhantomData<Cell<()>>,
}
//
// snap() exposes &T through &self, so &Reader may only cross threads if &T can
unsafe impl<T: Send + Sync> Sync for Reader<T> {}
//
impl<T: Send> Reader<T> {
    /// Claim the latest published value as the new snapshot, if any
    ///
    /// Returns false, leaving the snapshot unchanged, if the writer has not
    /// published anything since the last successful claim.
    ///
    pub fn new_snap(&mut self) -> bool {
        self.shared.try_transition(|flags| {
            if flags.is_new_write() {
                Some(flags.claim())
            } else {
                None
            }
        })
    }

    /// Access the current snapshot
    ///
    /// Calling this several times without `new_snap()` in between yields the
    /// same value every time. The reference cannot be held across a call to
    /// `new_snap()`, clone the value if you need to keep it around longer.
    ///
    pub fn snap(&self) -> &T {
        // Only the reader ever changes the snap index, and the writer's
        // transitions carry it over unchanged, so a relaxed load suffices
        let snap_idx = self.shared.load_flags(Ordering::Relaxed).snap_index();

        // The snap slot is never accessed by the writer, and new_snap()
        // requires &mut self, so the slot cannot be recycled under our feet
        unsafe { &*self.shared.slot(snap_idx) }
    }

    /// Claim the latest value if there is a new one, then access it
    pub fn read_last(&mut self) -> &T {
        self.new_snap();
        self.snap()
    }

    /// Access the current snapshot for in-place modification
    ///
    /// Modifications are only visible to the reader, and are lost as soon as
    /// `new_snap()` hands this slot back to the writer.
    ///
    pub fn snap_mut(&mut self) -> &mut T {
        let snap_idx = self.shared.load_flags(Ordering::Relaxed).snap_index();

        // Same as snap(), with &mut self guaranteeing exclusive access
        unsafe { &mut *self.shared.slot(snap_idx) }
    }

    /// Check if the writer published a value that was not claimed yet
    ///
    /// This does not claim anything, use `new_snap()` or `read_last()` for
    /// that.
    ///
    pub fn updated(&self) -> bool {
        self.shared.load_flags(Ordering::Acquire).is_new_write()
    }
}
//
impl<T: Send> fmt::Debug for Reader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("flags", &self.shared.load_flags(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Triple buffer shared state
///
/// In this triple buffering protocol, the reader and writer share the
/// following storage:
///
/// - Three memory slots suitable for storing the data at hand
/// - One flag word telling which slot is dirty (owned by the writer), which
///   one is clean (last published) and which one is the reader's snapshot,
///   along with whether a new value was published since the last claim
///
struct SharedState<T: Send> {
    /// Role assignment, kept in its own cache line since both sides hammer it
    flags: CachePadded<AtomicFlags>,

    /// Data storage slots
    slots: [UnsafeCell<T>; 3],
}
//
impl<T: Send> SharedState<T> {
    /// Build the shared state from initial slot contents and role assignment
    fn new(slots: [T; 3], flags: FlagWord) -> Self {
        debug_assert!(flags.is_partition());
        Self {
            flags: CachePadded::new(AtomicFlags::new(flags.into_raw())),
            slots: slots.map(UnsafeCell::new),
        }
    }

    /// Load the flag word
    #[inline]
    fn load_flags(&self, order: Ordering) -> FlagWord {
        FlagWord::from_raw(self.flags.load(order))
    }

    /// Raw access to one of the slots
    ///
    /// Dereferencing the pointer is only sound for the side of the protocol
    /// which currently owns the slot's role.
    ///
    #[inline]
    fn slot(&self, idx: SlotIndex) -> *mut T {
        self.slots[idx].get()
    }

    /// Unconditionally apply a transition to the flag word
    #[inline]
    fn transition(&self, next: impl Fn(FlagWord) -> FlagWord) {
        let applied = self.try_transition(|flags| Some(next(flags)));
        debug_assert!(applied);
    }

    /// Apply a transition to the flag word, unless it declines
    ///
    /// The peer may modify the flag word between our load and our store, so
    /// we recompute the transition from the freshly observed value until the
    /// compare-and-swap goes through. Only one peer can interfere, which keeps
    /// the number of retries bounded in practice.
    ///
    /// Returns false if the transition declined (returned None).
    ///
    fn try_transition(&self, next: impl Fn(FlagWord) -> Option<FlagWord>) -> bool {
        let mut current = self.flags.load(Ordering::Acquire);
        loop {
            let Some(new) = next(FlagWord::from_raw(current)) else {
                return false;
            };
            debug_assert!(new.is_partition());
            match self.flags.compare_exchange_weak(
                current,
                new.into_raw(),
                // Release publishes slot contents, Acquire synchronizes with
                // the peer's latest transition, which may be newer than what
                // our initial load observed
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Cloning the shared state is unsafe because you must ensure that no one
    /// is concurrently accessing it, since &self is enough for writing.
    unsafe fn clone_unsynchronized(&self) -> Self
    where
        T: Clone,
    {
        let clone_slot = |i: SlotIndex| -> T { (*self.slot(i)).clone() };
        Self::new(
            [clone_slot(0), clone_slot(1), clone_slot(2)],
            self.load_flags(Ordering::Relaxed),
        )
    }

    /// Equality is unsafe for the same reason as cloning: you must ensure that
    /// no one is concurrently accessing the triple buffer to avoid data races.
    unsafe fn eq_unsynchronized(&self, other: &Self) -> bool
    where
        T: PartialEq,
    {
        let slot_eq = |i: SlotIndex| -> bool { *self.slot(i) == *other.slot(i) };
        slot_eq(0)
            && slot_eq(1)
            && slot_eq(2)
            && (self.load_flags(Ordering::Relaxed) == other.load_flags(Ordering::Relaxed))
    }
}
//
unsafe impl<T: Send> Sync for SharedState<T> {}
