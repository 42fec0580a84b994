//! Segmented generational garbage collection for host language runtimes.
//!
//! A single-threaded, stop-the-world mark/sweep collector built on a
//! segmented set abstraction: every live object lives in a *segment*
//! (either *small*, sharing a data block with up to `N_OFF` objects of one
//! *kind*, or *big*, holding exactly one variable-sized object), and every
//! segment carries a small bitmap per *chain* recording its membership in
//! up to five sets. The allocator hands out compact `(segment, offset)`
//! handles from those sets; the collector is three generations
//! (`free_or_new`/`old_gen1`/`old_gen2`) plus an old-to-new remembered set
//! and a write barrier, with no compaction — objects never move.
//!
//! See `DESIGN.md` in the crate root for the grounding of each module and
//! the resolutions of the design's open questions.

mod allocator;
mod client;
mod collector;
mod config;
mod error;
mod handle;
mod segment;
mod set;
mod stats;

pub use client::GcClient;
pub use config::{Config, ConfigBuilder, KindSpec};
pub use error::{ConfigError, InitError};
pub use handle::{Handle, Kind, Length, Nchunks, SegmentIndex, Type};
pub use stats::SggcInfo;

use allocator::Allocator;
use segment::SegmentTable;
use set::{Chain, SegmentSet};
use std::marker::PhantomData;

/// Owns all collector state for one heap: the segment table, the five
/// chains' sets, the allocator's cursors, and diagnostic counters.
///
/// `Heap<C>` is an explicit value rather than process-wide global state —
/// there is no singleton, so a program may run more than one heap (handy
/// for tests). It is deliberately not `Sync`/`Send`: every operation
/// assumes single-threaded, cooperative use; a host wanting cross-thread
/// access wraps a `Heap` in its own `Mutex` rather than relying on internal
/// thread safety.
///
/// `C` never appears in a field — it names the [`GcClient`] a particular
/// heap is used with, so that `client.find_root_ptrs(&mut Heap<C>)` type
/// checks without the heap owning its client (the client is always passed
/// in by the caller of `alloc`/`collect`, not stored).
pub struct Heap<C: GcClient> {
    pub(crate) config: Config,
    pub(crate) table: SegmentTable,

    /// Chain 0: big segments whose data has been freed, awaiting reuse by
    /// any big kind.
    pub(crate) unused: SegmentSet,
    /// Chain 0, one set per kind: available or newly-allocated slots.
    pub(crate) free_or_new: Vec<SegmentSet>,
    /// Chain 0: client-registered immortal objects, never swept or traced.
    pub(crate) constants: SegmentSet,
    /// Chain 2 (shares `OLD_GEN2`'s chain, one set per kind): objects of an
    /// `uncollected` kind, permanently exempt from sweeping.
    pub(crate) uncollected: Vec<SegmentSet>,

    pub(crate) old_gen1: SegmentSet,
    pub(crate) old_gen2: SegmentSet,
    pub(crate) old_to_new: SegmentSet,
    pub(crate) to_look_at: SegmentSet,

    pub(crate) allocator: Allocator,
    pub(crate) info: SggcInfo,

    /// `true` while [`Heap::collect`] is scanning `OLD_TO_NEW`; gates
    /// whether [`Heap::look_at`] updates `has_gen0`/`has_gen1` and is
    /// allowed to return the "may short circuit" signal. `false` during
    /// root scan and the mark loop, where `look_at` must always request
    /// full traversal.
    pub(crate) in_remset_scan: bool,
    /// Set by [`Heap::look_at`] while `in_remset_scan`: whether a referent
    /// in (respectively) the youngest generation or `OLD_GEN1` has been
    /// observed while scanning the current remembered-set entry's outgoing
    /// references.
    pub(crate) has_gen0: bool,
    pub(crate) has_gen1: bool,

    /// Per-kind "about to be freed" callback, invoked as a kind's objects
    /// are reclaimed.
    pub(crate) free_callback: Vec<Option<Box<dyn FnMut(Handle) -> bool>>>,

    /// Cached per-kind read-only aux pointers, queried once at construction.
    pub(crate) aux1_ro: Vec<Option<&'static [u8]>>,
    pub(crate) aux2_ro: Vec<Option<&'static [u8]>>,

    _client: PhantomData<fn() -> C>,
}

impl<C: GcClient> Heap<C> {
    /// Builds a new heap from a validated [`Config`], querying `client`
    /// once for each kind's read-only aux pointers. [`InitError`] is only
    /// ever [`InitError::Config`] here, since a `Vec`-backed table cannot
    /// fail to allocate the way a fixed-size arena could.
    pub fn new(config: Config, client: &C) -> Result<Self, InitError> {
        let n_kinds = config.n_kinds();
        let table = SegmentTable::new(config.max_segments());

        let free_or_new = (0..n_kinds).map(|_| SegmentSet::new(Chain::UnusedFreeNew)).collect();
        let uncollected = (0..n_kinds).map(|_| SegmentSet::new(Chain::OldGen2)).collect();

        let aux1_ro = (0..n_kinds).map(|k| client.aux1_read_only(k as Kind)).collect();
        let aux2_ro = (0..n_kinds).map(|k| client.aux2_read_only(k as Kind)).collect();

        let allocator = Allocator::new(&config);

        log::debug!(
            "sggc: init, off_bits={} n_off={} chunk_size={} n_kinds={} max_segments={}",
            config.off_bits(),
            config.n_off(),
            config.chunk_size(),
            n_kinds,
            config.max_segments(),
        );

        Ok(Heap {
            config,
            table,
            unused: SegmentSet::new(Chain::UnusedFreeNew),
            free_or_new,
            constants: SegmentSet::new(Chain::UnusedFreeNew),
            uncollected,
            old_gen1: SegmentSet::new(Chain::OldGen1),
            old_gen2: SegmentSet::new(Chain::OldGen2),
            old_to_new: SegmentSet::new(Chain::OldToNew),
            to_look_at: SegmentSet::new(Chain::ToLookAt),
            allocator,
            info: SggcInfo::default(),
            in_remset_scan: false,
            has_gen0: true,
            has_gen1: true,
            free_callback: (0..n_kinds).map(|_| None).collect(),
            aux1_ro,
            aux2_ro,
            _client: PhantomData,
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current diagnostic counters.
    #[inline]
    pub fn info(&self) -> &SggcInfo {
        &self.info
    }

    #[inline]
    pub(crate) fn off_bits(&self) -> u32 {
        self.config.off_bits()
    }

    /// The client-visible type tag of the object at `h`.
    #[inline]
    pub fn type_of(&self, h: Handle) -> Type {
        self.table.get_type(h.segment(self.off_bits()))
    }

    /// The GC-internal layout kind of the object at `h`.
    #[inline]
    pub fn kind_of(&self, h: Handle) -> Kind {
        self.table.kind(h.segment(self.off_bits()))
    }

    /// Read-only access to an object's data chunk(s).
    pub fn data(&self, h: Handle) -> &[u8] {
        let off_bits = self.off_bits();
        let seg = h.segment(off_bits);
        let chunk_size = self.config.chunk_size();
        if self.table.is_big(seg) {
            self.table.data(seg)
        } else {
            let off = h.offset(off_bits) as usize;
            let chunks = self.config.kind(self.table.kind(seg)).chunks as usize;
            let start = off * chunk_size;
            &self.table.data(seg)[start..start + chunks * chunk_size]
        }
    }

    /// Mutable access to an object's data chunk(s).
    pub fn data_mut(&mut self, h: Handle) -> &mut [u8] {
        let off_bits = self.off_bits();
        let seg = h.segment(off_bits);
        let chunk_size = self.config.chunk_size();
        if self.table.is_big(seg) {
            self.table.data_mut(seg)
        } else {
            let off = h.offset(off_bits) as usize;
            let chunks = self.config.kind(self.table.kind(seg)).chunks as usize;
            let start = off * chunk_size;
            &mut self.table.data_mut(seg)[start..start + chunks * chunk_size]
        }
    }

    /// The first auxiliary slot for `h`, falling back to the kind's shared
    /// read-only buffer if the segment never allocated an owned one.
    pub fn aux1(&self, h: Handle) -> Option<&[u8]> {
        self.aux_slot(h, true)
    }

    /// As [`Heap::aux1`], for the second auxiliary slot.
    pub fn aux2(&self, h: Handle) -> Option<&[u8]> {
        self.aux_slot(h, false)
    }

    fn aux_slot(&self, h: Handle, first: bool) -> Option<&[u8]> {
        let off_bits = self.off_bits();
        let seg = h.segment(off_bits);
        let owned = if first { self.table.aux1(seg) } else { self.table.aux2(seg) };
        if let Some(buf) = owned {
            let kind = self.table.kind(seg);
            let size = if first { self.config.aux1_size(kind) } else { self.config.aux2_size(kind) };
            if self.table.is_big(seg) {
                return Some(buf);
            }
            let off = h.offset(off_bits) as usize;
            return Some(&buf[off * size..(off + 1) * size]);
        }
        let kind = self.table.kind(seg);
        let ro = if first { &self.aux1_ro } else { &self.aux2_ro };
        ro.get(kind as usize).copied().flatten()
    }

    /// Mutable access to an object's owned aux1 slot. Returns `None` if the
    /// kind uses a shared read-only aux pointer (which cannot be mutated)
    /// or carries no aux1 data at all.
    pub fn aux1_mut(&mut self, h: Handle) -> Option<&mut [u8]> {
        self.aux_slot_mut(h, true)
    }

    /// As [`Heap::aux1_mut`], for the second auxiliary slot.
    pub fn aux2_mut(&mut self, h: Handle) -> Option<&mut [u8]> {
        self.aux_slot_mut(h, false)
    }

    fn aux_slot_mut(&mut self, h: Handle, first: bool) -> Option<&mut [u8]> {
        let off_bits = self.off_bits();
        let seg = h.segment(off_bits);
        let kind = self.table.kind(seg);
        let size = if first { self.config.aux1_size(kind) } else { self.config.aux2_size(kind) };
        let is_big = self.table.is_big(seg);
        let off = h.offset(off_bits) as usize;
        let buf = if first { self.table.aux1_mut(seg) } else { self.table.aux2_mut(seg) }?;
        if is_big {
            Some(buf)
        } else {
            Some(&mut buf[off * size..(off + 1) * size])
        }
    }

    /// Registers a per-kind "about to be freed" callback, invoked for every
    /// object of that kind reclaimed by a collection. Returning `false`
    /// from the callback is logged and the slot is reused anyway — this
    /// crate performs no deferred-reuse machinery to honour a veto.
    pub fn set_free_callback<F>(&mut self, kind: Kind, callback: F)
    where
        F: FnMut(Handle) -> bool + 'static,
    {
        self.free_callback[kind as usize] = Some(Box::new(callback));
    }

    pub(crate) fn invoke_free_callback(&mut self, kind: Kind, h: Handle) {
        if let Some(cb) = self.free_callback[kind as usize].as_mut() {
            if !cb(h) {
                log::warn!(
                    "sggc: free callback for kind {} vetoed reuse of {:?}; reusing anyway",
                    kind,
                    h
                );
            }
        }
    }

    /// Enables or disables the `no_reuse` debug mode: while enabled,
    /// `collect` forces every subsequent small-kind allocation onto a fresh
    /// segment rather than recycling reclaimed slots, to stress-test
    /// missing write barriers.
    pub fn set_no_reuse(&mut self, enable: bool) {
        self.allocator.no_reuse = enable;
    }

    /// Debug helper validating that `h`'s segment is in range and its
    /// offset is aligned to its kind's chunk size.
    pub fn check_valid(&self, h: Handle) -> bool {
        let off_bits = self.off_bits();
        let no_object = Handle::no_object(off_bits);
        if h == no_object {
            return true;
        }
        let seg = h.segment(off_bits);
        if seg as usize >= self.table.len() {
            return false;
        }
        let off = h.offset(off_bits);
        if off >= self.config.n_off() {
            return false;
        }
        if self.table.is_big(seg) {
            return off == 0;
        }
        let chunks = self.config.kind(self.table.kind(seg)).chunks;
        chunks != 0 && off % chunks == 0
    }
}

impl<C: GcClient> std::fmt::Debug for Heap<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("segments", &self.table.len())
            .field("info", &self.info)
            .finish()
    }
}
