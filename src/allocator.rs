//! Cursor state for the generational allocator.
//!
//! The segment-set and segment-table modules are reused verbatim by the
//! collector to move segments between generations; what is unique to
//! allocation is the per-kind bitmask cursor that lets `alloc` hand out
//! slots from an already-known-free bitmap without re-deriving it on every
//! call, plus the quick per-kind fast path's own one-slot cache.

use crate::client::GcClient;
use crate::config::Config;
use crate::handle::{Handle, Kind, Length, Nchunks, Type};
use crate::set::{chain_segment_bits, Chain, SegmentSet};
use crate::Heap;

/// Per-kind cursor state owned by [`crate::Heap`]; manipulated by the
/// `alloc*` methods there (which also need the segment table and sets).
pub(crate) struct Allocator {
    /// The next candidate handle to hand out for each kind, valid only
    /// while the matching entry of `next_free_bits` is nonzero.
    pub(crate) next_free: Vec<Handle>,
    /// Remaining free-slot bitmask for `next_free[k]`'s segment, shifted so
    /// bit 0 corresponds to `next_free[k]` itself. Zero means the cursor
    /// must be refreshed before the next allocation of that kind.
    pub(crate) next_free_bits: Vec<u64>,

    /// Precomputed "all slots free" bit pattern per kind, derived from
    /// `chunks[k]` and `n_off`.
    pub(crate) kind_full: Vec<u64>,

    /// One-slot cache for [`crate::Heap::alloc_small_kind_quickly`]: the
    /// next candidate handle and the remaining free-bit mask for its
    /// segment, shifted so bit 0 corresponds to that handle.
    pub(crate) quick_next_free_val: Vec<Handle>,
    pub(crate) quick_next_free_bits: Vec<u64>,

    /// Debug toggle: when set, the allocator never resumes a
    /// partially-filled segment, forcing
    /// every refill onto a fresh one (stress-tests missing write
    /// barriers, since reused slots would otherwise mask them).
    pub(crate) no_reuse: bool,
}

impl Allocator {
    pub(crate) fn new(config: &Config) -> Self {
        let n_kinds = config.n_kinds();
        let off_bits = config.off_bits();
        let no_object = Handle::no_object(off_bits);

        let kind_full = (0..n_kinds)
            .map(|k| kind_full_bits(config, k as Kind))
            .collect();

        Allocator {
            next_free: vec![no_object; n_kinds],
            next_free_bits: vec![0u64; n_kinds],
            kind_full,
            quick_next_free_val: vec![no_object; n_kinds],
            quick_next_free_bits: vec![0u64; n_kinds],
            no_reuse: false,
        }
    }
}

impl<C: GcClient> Heap<C> {
    /// Allocates one object of type `ty` and length `length`, classifying
    /// it via `client.kind`/`client.nchunks`. Never
    /// triggers a collection itself — returns [`Handle::no_object`] on
    /// exhaustion, leaving the decision to retry after a [`Heap::collect`]
    /// to the caller. See [`Heap::alloc_or_collect`] for the opt-in
    /// auto-retrying wrapper.
    pub fn alloc(&mut self, client: &C, ty: Type, length: Length) -> Handle {
        let kind = client.kind(ty, length);
        self.alloc_kind(client, kind, ty, length)
    }

    /// As [`Heap::alloc`], but already knowing the GC kind (skips the
    /// `client.kind` call). Useful when a caller classifies many objects of
    /// the same kind in a loop.
    pub fn alloc_kind(&mut self, client: &C, kind: Kind, ty: Type, length: Length) -> Handle {
        let h = if self.config.is_big_kind(kind) {
            let nchunks = client.nchunks(ty, length);
            self.alloc_big(kind, nchunks)
        } else {
            self.alloc_small(kind)
        };

        if h != Handle::no_object(self.off_bits()) {
            self.table.set_type(h.segment(self.off_bits()), ty);
            log::trace!(
                "sggc: alloc kind={} type={} length={} -> {:?}",
                kind,
                ty,
                length,
                h
            );
        } else {
            log::debug!(
                "sggc: alloc kind={} type={} length={} exhausted",
                kind,
                ty,
                length
            );
        }
        h
    }

    /// The chain an allocated object of `kind` is tracked on: ordinary
    /// kinds use chain 0 alongside every other `free_or_new` kind (subject
    /// to collection); an uncollected kind instead shares `OLD_GEN2`'s
    /// chain with its own dedicated `uncollected[kind]` set, which is
    /// never touched by `collect`'s restore/sweep steps.
    #[inline]
    fn alloc_chain(&self, kind: Kind) -> Chain {
        if self.config.is_uncollected_kind(kind) {
            Chain::OldGen2
        } else {
            Chain::UnusedFreeNew
        }
    }

    fn add_to_alloc_set(&mut self, kind: Kind, off_bits: u32, h: Handle) {
        if self.config.is_uncollected_kind(kind) {
            self.uncollected[kind as usize].add(&mut self.table, off_bits, h);
        } else {
            self.free_or_new[kind as usize].add(&mut self.table, off_bits, h);
        }
    }

    fn probe_alloc_set(&mut self, kind: Kind, off_bits: u32, remove: bool) -> Handle {
        if self.config.is_uncollected_kind(kind) {
            self.uncollected[kind as usize].first(&mut self.table, off_bits, remove)
        } else {
            self.free_or_new[kind as usize].first(&mut self.table, off_bits, remove)
        }
    }

    /// Overwrites the allocation set's membership bits for the segment
    /// containing `h`. Used only to seed a freshly grown small segment with
    /// its "every slot free" pattern — `h`'s own bit must already be a
    /// member (via [`Heap::add_to_alloc_set`]) so the segment is linked
    /// into the set's traversal list before this overwrites its bitmap.
    fn assign_alloc_set_bits(&mut self, kind: Kind, off_bits: u32, h: Handle, bits: u64) {
        if self.config.is_uncollected_kind(kind) {
            self.uncollected[kind as usize].assign_segment_bits(&mut self.table, off_bits, h, bits);
        } else {
            self.free_or_new[kind as usize].assign_segment_bits(&mut self.table, off_bits, h, bits);
        }
    }

    /// Allocates from (and if needed, refills) the kind's allocation set
    /// (`free_or_new[kind]`, or `uncollected[kind]` for an uncollected
    /// kind). Small kinds only.
    fn alloc_small(&mut self, kind: Kind) -> Handle {
        let off_bits = self.off_bits();
        let no_object = Handle::no_object(off_bits);

        if self.allocator.next_free_bits[kind as usize] == 0 && !self.refresh_quick_cache(kind) {
            return no_object;
        }

        let h = self.allocator.next_free[kind as usize];
        let bits = self.allocator.next_free_bits[kind as usize];
        let chunks = self.config.kind(kind).chunks as u64;

        let shifted = bits >> chunks;
        if shifted & 1 != 0 {
            let next_off = h.offset(off_bits) + chunks as u32;
            self.allocator.next_free[kind as usize] = Handle::pack(off_bits, h.segment(off_bits), next_off);
            self.allocator.next_free_bits[kind as usize] = shifted;
        } else {
            self.allocator.next_free_bits[kind as usize] = 0;
        }

        self.add_to_alloc_set(kind, off_bits, h);
        self.bump_gen0_count(kind);
        h
    }

    /// Refreshes `next_free`/`next_free_bits` for `kind`: resumes the
    /// segment currently at the front of the allocation set's chain if it
    /// still has free slots, otherwise grows a fresh one. Returns `false`
    /// if the segment table is at capacity.
    ///
    /// A segment's allocation-set bits are exactly its free slots: a fresh
    /// segment is seeded with every valid offset as a member, and the only
    /// way a bit is ever cleared again is a survivor being marked and
    /// promoted out by [`Heap::look_at`] (a sweep leaves a dead member's
    /// bit set, ready for reuse). Resuming therefore just reads the
    /// segment's own bits instead of deriving them from `kind_full` — a
    /// bit cleared by promotion must stay cleared, never be treated as
    /// free again.
    ///
    /// Because segments only ever reach the front of the allocation set's
    /// chain by being newly linked (the first allocation into them), and
    /// stay there for as long as they are being bump-filled, peeking the
    /// chain's front segment always finds the in-progress one, if any.
    fn refresh_quick_cache(&mut self, kind: Kind) -> bool {
        let off_bits = self.off_bits();
        let no_object = Handle::no_object(off_bits);
        let n_off = self.config.n_off();
        let full = self.allocator.kind_full[kind as usize];
        let chain = self.alloc_chain(kind);

        if !self.allocator.no_reuse {
            let probe = self.probe_alloc_set(kind, off_bits, false);
            if probe != no_object {
                let free_mask = chain_segment_bits(&self.table, chain, off_bits, probe);
                let off = probe.offset(off_bits);
                let shifted = free_mask >> off;
                if shifted != 0 {
                    self.allocator.next_free[kind as usize] = probe;
                    self.allocator.next_free_bits[kind as usize] = shifted;
                    return true;
                }
            }
        }

        let seg = match self.table.grow() {
            Some(seg) => seg,
            None => return false,
        };
        let chunk_size = self.config.chunk_size();
        let data = vec![0u8; n_off as usize * chunk_size].into_boxed_slice();
        self.table.init_small(seg, kind, data);
        if self.config.aux1_size(kind) != 0 && self.aux1_ro[kind as usize].is_none() {
            self.table.set_aux1(
                seg,
                vec![0u8; n_off as usize * self.config.aux1_size(kind)].into_boxed_slice(),
            );
        }
        if self.config.aux2_size(kind) != 0 && self.aux2_ro[kind as usize].is_none() {
            self.table.set_aux2(
                seg,
                vec![0u8; n_off as usize * self.config.aux2_size(kind)].into_boxed_slice(),
            );
        }

        // Seed the segment's allocation-set membership with every valid
        // offset before handing any of it out: `add_to_alloc_set` links the
        // segment into the chain via offset 0, then the overwrite installs
        // the rest of the free pattern onto that now-linked segment.
        let h0 = Handle::pack(off_bits, seg, 0);
        self.add_to_alloc_set(kind, off_bits, h0);
        self.assign_alloc_set_bits(kind, off_bits, h0, full);

        self.allocator.next_free[kind as usize] = h0;
        self.allocator.next_free_bits[kind as usize] = full;
        true
    }

    /// Allocates a big segment sized for `nchunks`. Reuses a segment off
    /// `unused` if one is available;
    /// otherwise grows the table.
    ///
    /// An ordinary kind's reuse shares `unused`'s chain (`UnusedFreeNew`),
    /// so the segment is handed to `free_or_new[kind]` via
    /// [`crate::set::SegmentSet::move_first`] rather than a `first`/`add`
    /// pair — the two sets share one per-segment link, and only the
    /// dedicated move operation keeps the segment reachable from its new
    /// owner's own traversal. An uncollected kind's target
    /// set lives on a different chain (`OldGen2`), so there is nothing to
    /// relink: clearing the old bit and letting [`Heap::add_to_alloc_set`]
    /// set the new one is correct as-is.
    fn alloc_big(&mut self, kind: Kind, nchunks: Nchunks) -> Handle {
        let off_bits = self.off_bits();
        let no_object = Handle::no_object(off_bits);
        let chunk_size = self.config.chunk_size();

        let (seg, already_in_alloc_set) = if !self.allocator.no_reuse && !self.unused.is_empty_shallow() {
            let h = self.unused.first(&mut self.table, off_bits, false);
            let seg = h.segment(off_bits);
            if self.config.is_uncollected_kind(kind) {
                self.unused.remove(&mut self.table, off_bits, h);
                (seg, false)
            } else {
                SegmentSet::move_first(&mut self.unused, &mut self.free_or_new[kind as usize], &mut self.table);
                (seg, true)
            }
        } else {
            match self.table.grow() {
                Some(seg) => (seg, false),
                None => return no_object,
            }
        };

        self.table.init_big(seg, kind);
        let data = vec![0u8; nchunks as usize * chunk_size].into_boxed_slice();
        self.table.set_big_data(seg, data, nchunks);
        if self.config.aux1_size(kind) != 0 && self.aux1_ro[kind as usize].is_none() {
            self.table.set_aux1(seg, vec![0u8; self.config.aux1_size(kind)].into_boxed_slice());
        }
        if self.config.aux2_size(kind) != 0 && self.aux2_ro[kind as usize].is_none() {
            self.table.set_aux2(seg, vec![0u8; self.config.aux2_size(kind)].into_boxed_slice());
        }

        let h = Handle::pack(off_bits, seg, 0);
        if !already_in_alloc_set {
            self.add_to_alloc_set(kind, off_bits, h);
        }
        self.bump_gen0_count(kind);
        self.info.big_chunks += nchunks as u64;
        h
    }

    fn bump_gen0_count(&mut self, kind: Kind) {
        if self.config.is_uncollected_kind(kind) {
            self.info.uncol_count += 1;
        } else {
            self.info.gen0_count += 1;
        }
    }

    /// Allocates an object of a small kind directly, using the kind itself
    /// as the type tag (no separate `client.kind` lookup) — the same
    /// "kind equals type" convention a big kind already follows by
    /// construction. Small kinds only — callers must already know `kind`
    /// is small.
    pub fn alloc_small_kind(&mut self, client: &C, kind: Kind, length: Length) -> Handle {
        debug_assert!(!self.config.is_big_kind(kind));
        self.alloc_kind(client, kind, kind, length)
    }

    /// The per-kind fast allocation path: hands out a
    /// slot from a one-entry cache without touching `free_or_new[kind]`'s
    /// set machinery on a hit, falling back to [`Heap::alloc_kind`] on a
    /// cache miss. Small kinds only — callers must already know `kind` is
    /// small.
    pub fn alloc_small_kind_quickly(&mut self, client: &C, kind: Kind, ty: Type, length: Length) -> Handle {
        debug_assert!(!self.config.is_big_kind(kind));
        let off_bits = self.off_bits();
        let no_object = Handle::no_object(off_bits);

        let bits = self.allocator.quick_next_free_bits[kind as usize];

        if bits & 1 == 0 {
            let h = self.alloc_kind(client, kind, ty, length);
            if h == no_object {
                return no_object;
            }
            let chunks = self.config.kind(kind).chunks as u64;
            let seg = h.segment(off_bits);
            let chain = self.alloc_chain(kind);
            let free_mask = chain_segment_bits(&self.table, chain, off_bits, h);
            let shifted = free_mask >> h.offset(off_bits) >> chunks;
            if shifted & 1 != 0 {
                let next_off = h.offset(off_bits) + chunks as u32;
                self.allocator.quick_next_free_val[kind as usize] = Handle::pack(off_bits, seg, next_off);
                self.allocator.quick_next_free_bits[kind as usize] = shifted;
            } else {
                self.allocator.quick_next_free_bits[kind as usize] = 0;
            }
            return h;
        }

        let h = self.allocator.quick_next_free_val[kind as usize];
        self.add_to_alloc_set(kind, off_bits, h);
        self.bump_gen0_count(kind);
        self.table.set_type(h.segment(off_bits), ty);

        let chunks = self.config.kind(kind).chunks as u64;
        let shifted = bits >> chunks;
        if shifted & 1 != 0 {
            let next_off = h.offset(off_bits) + chunks as u32;
            self.allocator.quick_next_free_val[kind as usize] = Handle::pack(off_bits, h.segment(off_bits), next_off);
            self.allocator.quick_next_free_bits[kind as usize] = shifted;
        } else {
            self.allocator.quick_next_free_bits[kind as usize] = 0;
        }

        log::trace!("sggc: alloc_small_kind_quickly kind={} -> {:?}", kind, h);
        h
    }

    /// Registers `h` as a permanent constant: immortal, never swept or
    /// traced, exempt from write-barrier bookkeeping. The object must have just been
    /// returned by [`Heap::alloc`]/[`Heap::alloc_kind`] and not yet shared
    /// with any other handle in its segment — `register_constant` moves
    /// `h` alone out of `free_or_new` and into `constants`, and marks its
    /// whole segment constant so the allocator never hands out its
    /// remaining slots for ordinary (collectible) use.
    pub fn register_constant(&mut self, client: &C, ty: Type, length: Length) -> Handle {
        let h = self.alloc(client, ty, length);
        let off_bits = self.off_bits();
        if h == Handle::no_object(off_bits) {
            return h;
        }
        let seg = h.segment(off_bits);
        let kind = self.table.kind(seg);

        if self.config.is_uncollected_kind(kind) {
            self.uncollected[kind as usize].remove(&mut self.table, off_bits, h);
        } else {
            self.free_or_new[kind as usize].remove(&mut self.table, off_bits, h);
        }
        if self.config.is_uncollected_kind(kind) {
            self.info.uncol_count -= 1;
        } else {
            self.info.gen0_count -= 1;
        }

        self.constants.add(&mut self.table, off_bits, h);
        self.table.mark_constant(seg);
        self.info.uncol_count += 1;
        log::debug!("sggc: registered constant {:?}", h);
        h
    }
}

/// The bit pattern marking every valid object-start offset within a
/// small segment of `kind` as free: bits `0, chunks[k], 2*chunks[k], ...`
/// up to `n_off`.
fn kind_full_bits(config: &Config, kind: Kind) -> u64 {
    let spec = config.kind(kind);
    if spec.is_big() {
        return 1;
    }
    let chunks = spec.chunks as u64;
    debug_assert!(chunks > 0 && chunks <= config.n_off() as u64);
    let mut bits = 0u64;
    let mut off = 0u64;
    while off < config.n_off() as u64 {
        bits |= 1u64 << off;
        off += chunks;
    }
    bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KindSpec;

    #[test]
    fn kind_full_bits_single_chunk_sets_every_bit() {
        let mut b = Config::builder().off_bits(3).n_types(1).max_segments(1);
        let k = b.push_kind(KindSpec::small(1));
        let cfg = b.build().unwrap();
        assert_eq!(kind_full_bits(&cfg, k), 0xFF);
    }

    #[test]
    fn kind_full_bits_two_chunks_sets_every_other_bit() {
        let mut b = Config::builder().off_bits(3).n_types(1).max_segments(1);
        let k = b.push_kind(KindSpec::small(2));
        let cfg = b.build().unwrap();
        assert_eq!(kind_full_bits(&cfg, k), 0b01010101);
    }

    #[test]
    fn kind_full_bits_big_kind_is_one() {
        let mut b = Config::builder().off_bits(3).n_types(1).max_segments(1);
        let k = b.push_kind(KindSpec::big());
        let cfg = b.build().unwrap();
        assert_eq!(kind_full_bits(&cfg, k), 1);
    }
}
