//! The collector: three-generation mark/sweep, the old-to-new remembered
//! set, the write barrier, and promotion.
//!
//! A collection restores the generations being collected as tentative
//! garbage, rescans the remembered set, marks from roots, then sweeps:
//! anything still sitting in `free_or_new` at the end was never reached
//! and is dropped from its generation and the remembered set.

use crate::client::GcClient;
use crate::handle::{Handle, Kind, Length, Type};
use crate::set::{chain_contains, Chain, SegmentSet};
use crate::Heap;

impl<C: GcClient> Heap<C> {
    /// Runs one collection at `level`:
    ///
    /// - 0 ("minor"): only objects allocated since the last collection are
    ///   candidates for reclamation.
    /// - 1: minor + everything in `OLD_GEN1`.
    /// - 2 ("full"): minor + `OLD_GEN1` + `OLD_GEN2`.
    ///
    /// Panics if `TO_LOOK_AT` is non-empty on entry.
    pub fn collect(&mut self, client: &mut C, level: u8) {
        assert!(level <= 2, "collect: level must be 0, 1, or 2, got {}", level);
        assert!(
            self.to_look_at.is_empty_shallow(),
            "collect: TO_LOOK_AT must be empty on entry"
        );

        log::debug!("sggc: collect(level={}) begin", level);

        self.restore_candidates(level);
        self.scan_remembered_set(client, level);

        self.has_gen0 = true;
        self.has_gen1 = true;
        client.find_root_ptrs(self);

        let mut rep = 0u32;
        loop {
            self.drain_mark_worklist(client, level);
            client.after_marking(self, level, rep);
            rep += 1;
            if self.to_look_at.is_empty_shallow() {
                break;
            }
        }

        self.sweep_adjustments(level);
        self.reclaim_big_segments();
        self.reset_alloc_cursors();

        log::debug!(
            "sggc: collect(level={}) done gen0={} gen1={} gen2={} uncol={}",
            level,
            self.info.gen0_count,
            self.info.gen1_count,
            self.info.gen2_count,
            self.info.uncol_count
        );
    }

    /// As [`Heap::collect`], but only if `alloc` first fails: an opt-in
    /// auto-retry wrapper. Calls `collect(2)` once and retries the
    /// allocation; still returns `NoObject` if the retry also fails.
    pub fn alloc_or_collect(&mut self, client: &mut C, ty: Type, length: Length) -> Handle {
        let h = self.alloc(client, ty, length);
        if h != Handle::no_object(self.off_bits()) {
            return h;
        }
        log::info!("sggc: alloc_or_collect: alloc failed, running collect(2) and retrying");
        self.collect(client, 2);
        self.alloc(client, ty, length)
    }

    /// Adds every member of `OLD_GEN2` (if `level == 2`) and then
    /// `OLD_GEN1` (if `level >= 1`) into `free_or_new[kind]` —
    /// "tentatively dead". This does *not* remove them from their
    /// generation's chain: that membership stays until the mark loop
    /// promotes a survivor out of it, or [`Heap::sweep_adjustments`] drops
    /// it from a non-survivor at the end of the collection.
    fn restore_candidates(&mut self, level: u8) {
        if level == 2 {
            self.restore_generation_into_free(true);
        }
        if level >= 1 {
            self.restore_generation_into_free(false);
        }
    }

    fn restore_generation_into_free(&mut self, gen2: bool) {
        let off_bits = self.off_bits();
        let mut v = if gen2 {
            self.old_gen2.first(&mut self.table, off_bits, false)
        } else {
            self.old_gen1.first(&mut self.table, off_bits, false)
        };
        while v != Handle::no_object(off_bits) {
            let next = if gen2 {
                self.old_gen2.next(&mut self.table, off_bits, v, false)
            } else {
                self.old_gen1.next(&mut self.table, off_bits, v, false)
            };
            let kind = self.kind_of(v);
            if self.free_or_new[kind as usize].add(&mut self.table, off_bits, v) {
                self.info.gen0_count += 1;
            }
            v = next;
        }
    }

    /// Scans `OLD_TO_NEW`. For each entry `v`, sets `has_gen0`/`has_gen1`
    /// per which generation `v` itself belongs to, calls
    /// `client.find_object_ptrs(v)` (whose `look_at` calls both mark
    /// reachable targets and update the flags — see [`Heap::look_at`]),
    /// then removes `v` from `OLD_TO_NEW` per the flags observed.
    fn scan_remembered_set(&mut self, client: &mut C, level: u8) {
        let off_bits = self.off_bits();
        self.in_remset_scan = true;

        let mut v = self.old_to_new.first(&mut self.table, off_bits, false);
        while v != Handle::no_object(off_bits) {
            let remove = if self.old_gen1.contains(&self.table, off_bits, v) {
                self.has_gen0 = true;
                self.has_gen1 = true;
                client.find_object_ptrs(self, v);
                true
            } else if level == 0 {
                self.has_gen0 = false;
                self.has_gen1 = false;
                client.find_object_ptrs(self, v);
                self.has_gen0 || self.has_gen1
            } else {
                self.has_gen0 = false;
                self.has_gen1 = true;
                client.find_object_ptrs(self, v);
                self.has_gen0
            };
            v = self.old_to_new.next(&mut self.table, off_bits, v, remove);
        }

        self.in_remset_scan = false;
    }

    /// Drains `TO_LOOK_AT` to a fixed point, promoting and re-scanning each
    /// object as it comes off the worklist. One call covers everything
    /// reachable at the point it starts; [`Heap::collect`] calls it again
    /// after [`GcClient::after_marking`] in case that callback queued more
    /// work, which lets a host implement weak-reference promotion.
    fn drain_mark_worklist(&mut self, client: &mut C, level: u8) {
        loop {
            let v = self.to_look_at.first(&mut self.table, self.off_bits(), true);
            if v == Handle::no_object(self.off_bits()) {
                break;
            }
            self.promote(v, level);
            client.find_object_ptrs(self, v);
        }
    }

    /// Promotes `v` one generation: `OLD_GEN1` -> `OLD_GEN2` if `level >= 1`
    /// and `v` was in `OLD_GEN1`; otherwise into `OLD_GEN1` unless it's
    /// already settled in `OLD_GEN2` at a full collection.
    fn promote(&mut self, v: Handle, level: u8) {
        let off_bits = self.off_bits();
        if level >= 1 && self.old_gen1.remove(&mut self.table, off_bits, v) {
            self.info.gen1_count -= 1;
            if !self.old_gen2.add(&mut self.table, off_bits, v) {
                self.info.gen2_count += 1;
            }
            return;
        }
        if level < 2 || !self.old_gen2.contains(&self.table, off_bits, v) {
            if !self.old_gen1.add(&mut self.table, off_bits, v) {
                self.info.gen1_count += 1;
            }
        }
    }

    /// For each generation collected this round, removes any member that's
    /// also still in `free_or_new[kind]` — i.e. never reached by the mark
    /// loop, so its stale generation/remembered-set bit would otherwise
    /// misclassify a later object allocated into the same, now-reused slot
    /// — from that generation and from `OLD_TO_NEW`, and invokes the
    /// per-kind free callback.
    fn sweep_adjustments(&mut self, level: u8) {
        if level == 2 {
            self.sweep_generation(true);
        }
        if level >= 1 {
            self.sweep_generation(false);
        }
    }

    fn sweep_generation(&mut self, gen2: bool) {
        let off_bits = self.off_bits();
        let mut v = if gen2 {
            self.old_gen2.first(&mut self.table, off_bits, false)
        } else {
            self.old_gen1.first(&mut self.table, off_bits, false)
        };
        while v != Handle::no_object(off_bits) {
            let kind = self.kind_of(v);
            let dead = self.free_or_new[kind as usize].contains(&self.table, off_bits, v);
            let remove = if dead {
                if gen2 {
                    self.info.gen2_count -= 1;
                } else {
                    self.info.gen1_count -= 1;
                }
                self.old_to_new.remove(&mut self.table, off_bits, v);
                self.invoke_free_callback(kind, v);
                true
            } else {
                false
            };
            v = if gen2 {
                self.old_gen2.next(&mut self.table, off_bits, v, remove)
            } else {
                self.old_gen1.next(&mut self.table, off_bits, v, remove)
            };
        }
    }

    /// For each (collected) big kind, every surviving-as-dead member of
    /// `free_or_new[k]` has its data block freed and its descriptor handed
    /// back to `unused` for reuse by any big kind. Moved with
    /// [`SegmentSet::move_first`] rather than a `first`/`add` pair since
    /// `free_or_new[k]` and `unused` share a chain — a bit flip alone would
    /// leave the segment unreachable from `unused`'s own traversal list;
    /// only the dedicated move operation relinks it correctly.
    fn reclaim_big_segments(&mut self) {
        let off_bits = self.off_bits();
        let n_kinds = self.config.n_kinds();
        for kind in 0..n_kinds as Kind {
            if !self.config.is_big_kind(kind) || self.config.is_uncollected_kind(kind) {
                continue;
            }
            loop {
                let h = self.free_or_new[kind as usize].first(&mut self.table, off_bits, false);
                if h == Handle::no_object(off_bits) {
                    break;
                }
                let seg = h.segment(off_bits);
                self.info.gen0_count -= 1;
                self.info.big_chunks -= self.table.max_chunks(seg) as u64;
                self.table.free_big_data(seg);
                self.table.free_aux(seg);
                SegmentSet::move_first(&mut self.free_or_new[kind as usize], &mut self.unused, &mut self.table);
            }
        }
    }

    /// For each small kind, resets the bump-allocation cursor so the next
    /// allocation re-derives it from the post-sweep free set instead of
    /// resuming stale state.
    fn reset_alloc_cursors(&mut self) {
        let off_bits = self.off_bits();
        let n_kinds = self.config.n_kinds();
        for kind in 0..n_kinds as Kind {
            if self.config.is_big_kind(kind) {
                continue;
            }
            self.allocator.next_free[kind as usize] = Handle::no_object(off_bits);
            self.allocator.next_free_bits[kind as usize] = 0;
            self.allocator.quick_next_free_val[kind as usize] = Handle::no_object(off_bits);
            self.allocator.quick_next_free_bits[kind as usize] = 0;
        }
    }

    /// Called by the client from within `find_root_ptrs`/`find_object_ptrs`
    /// for every outgoing reference. Always performs the mark action — if
    /// `h` is still in `free_or_new[kind(h)]` it is removed from there and
    /// added to `TO_LOOK_AT` — exactly as during a plain root/object scan.
    ///
    /// While [`Heap::scan_remembered_set`] is in progress
    /// (`in_remset_scan`), this additionally updates `has_gen0`/`has_gen1`
    /// toward "a referent of that generation was observed", and the return
    /// value becomes `0` ("you may stop scanning early") once both flags
    /// are set — neither flag can be un-set again this entry, so nothing
    /// learned from a later reference would change the outcome. Outside
    /// remembered-set scanning this always returns `1`: a plain mark pass
    /// must see every reference to stay correct.
    pub fn look_at(&mut self, h: Handle) -> i32 {
        let off_bits = self.off_bits();
        if h == Handle::no_object(off_bits) {
            return 1;
        }

        if self.in_remset_scan && !(self.has_gen0 && self.has_gen1) {
            if self.old_gen1.contains(&self.table, off_bits, h) {
                self.has_gen1 = true;
            } else if !self.has_gen0 && !self.old_gen2.contains(&self.table, off_bits, h) {
                self.has_gen0 = true;
            }
        }

        let kind = self.kind_of(h);
        if self.free_or_new[kind as usize].remove(&mut self.table, off_bits, h) {
            self.info.gen0_count -= 1;
            self.to_look_at.add(&mut self.table, off_bits, h);
        }

        if self.in_remset_scan && self.has_gen0 && self.has_gen1 {
            0
        } else {
            1
        }
    }

    /// The write barrier: must be called (or `from` must be known-youngest
    /// via [`Heap::youngest_generation`]) around every store of `to` into
    /// `from`. Adds `from` to `OLD_TO_NEW` exactly when the edge could
    /// otherwise let a later collection leave a dangling reference. A
    /// constant or uncollected `to` exempts an `OLD_GEN2` `from`, since
    /// neither is ever reclaimed.
    pub fn old_to_new_check(&mut self, from: Handle, to: Handle) {
        let off_bits = self.off_bits();

        if self.old_to_new.contains(&self.table, off_bits, from) {
            return;
        }

        if self.old_gen2.contains(&self.table, off_bits, from) {
            let to_exempt = self.is_constant(to) || self.is_uncollected(to);
            let to_in_gen2 = self.old_gen2.contains(&self.table, off_bits, to);
            if to_in_gen2 || to_exempt {
                return;
            }
        } else if self.old_gen1.contains(&self.table, off_bits, from) {
            if !chain_contains_chain0(self, to) {
                return;
            }
        } else {
            return;
        }

        self.old_to_new.add(&mut self.table, off_bits, from);
    }

    /// `true` if `h` is currently in the youngest generation: `unused`,
    /// some `free_or_new[k]`, or `constants` (chain 0). A host that knows
    /// `from` is youngest by construction may skip
    /// [`Heap::old_to_new_check`] entirely.
    pub fn youngest_generation(&self, h: Handle) -> bool {
        chain_contains_chain0(self, h)
    }

    /// `true` if `h` is not currently marked — i.e. still sitting in chain
    /// 0 (`free_or_new`/`unused`/`constants`). Callable by the client from
    /// within `after_marking` to decide which objects to keep alive.
    pub fn not_marked(&self, h: Handle) -> bool {
        chain_contains_chain0(self, h)
    }

    /// `true` if `h` was registered via [`Heap::register_constant`].
    pub fn is_constant(&self, h: Handle) -> bool {
        let off_bits = self.off_bits();
        self.table.is_constant(h.segment(off_bits))
    }

    /// `true` if `h`'s kind was configured [`crate::KindSpec::uncollected`].
    pub fn is_uncollected(&self, h: Handle) -> bool {
        self.config.is_uncollected_kind(self.kind_of(h))
    }
}

#[inline]
fn chain_contains_chain0<C: GcClient>(heap: &Heap<C>, h: Handle) -> bool {
    let off_bits = heap.off_bits();
    chain_contains(&heap.table, Chain::UnusedFreeNew, off_bits, h)
}

#[cfg(test)]
mod tests {
    use crate::config::KindSpec;
    use crate::handle::Handle;
    use crate::{Config, GcClient, Heap};

    struct NoRefsClient;
    impl GcClient for NoRefsClient {
        fn kind(&self, ty: crate::Type, _length: crate::Length) -> crate::Kind {
            ty
        }
        fn nchunks(&self, _ty: crate::Type, length: crate::Length) -> crate::Nchunks {
            length.max(1)
        }
        fn find_root_ptrs(&mut self, _heap: &mut Heap<Self>) {}
        fn find_object_ptrs(&mut self, _heap: &mut Heap<Self>, _h: Handle) {}
    }

    fn test_heap() -> Heap<NoRefsClient> {
        let mut b = Config::builder().off_bits(6).chunk_size(16).n_types(1).max_segments(8);
        b.push_kind(KindSpec::big());
        let cfg = b.build().unwrap();
        Heap::new(cfg, &NoRefsClient).unwrap()
    }

    #[test]
    fn unrooted_allocation_is_reclaimed_on_collect() {
        let mut heap = test_heap();
        let mut client = NoRefsClient;
        let h = heap.alloc(&client, 0, 4);
        assert_ne!(h, Handle::no_object(heap.off_bits()));
        heap.collect(&mut client, 2);
        assert!(heap.not_marked(h));
    }

    #[test]
    #[should_panic]
    fn collect_panics_if_to_look_at_nonempty_on_entry() {
        let mut heap = test_heap();
        let mut client = NoRefsClient;
        let h = heap.alloc(&client, 0, 4);
        let off_bits = heap.off_bits();
        heap.to_look_at.add(&mut heap.table, off_bits, h);
        heap.collect(&mut client, 0);
    }

    #[test]
    fn constant_survives_collection() {
        let mut heap = test_heap();
        let client = NoRefsClient;
        let h = heap.register_constant(&client, 0, 4);
        assert!(heap.is_constant(h));
        let mut client = NoRefsClient;
        for _ in 0..3 {
            heap.collect(&mut client, 2);
        }
        assert!(heap.is_constant(h));
        assert_eq!(heap.data(h).len(), 4 * heap.config().chunk_size());
    }
}
