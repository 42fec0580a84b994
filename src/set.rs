//! Segment sets: bitmap-per-segment membership, linked into per-chain lists
//! of non-empty segments.
//!
//! A [`Chain`] is one of up to five independent bitmap lanes stored in every
//! segment descriptor. A [`SegmentSet`] is a membership predicate realised
//! as one chain plus a pointer to the first non-empty segment using that
//! chain. Several sets may share a chain as long as they are pairwise
//! disjoint (chain 0 is shared by `unused`, every `free_or_new[k]`, and
//! `constants`).

use crate::handle::{Handle, SegmentIndex};
use crate::segment::SegmentTable;

/// Number of independent bitmap lanes carried by every segment.
pub(crate) const NUM_CHAINS: usize = 5;

/// Which bitmap lane a [`SegmentSet`] is defined over.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Chain {
    /// `unused`, `free_or_new[k]` for every kind, and `constants`.
    UnusedFreeNew = 0,
    /// Survived one collection.
    OldGen1 = 1,
    /// Survived two or more collections.
    OldGen2 = 2,
    /// Remembered set: old objects that may reference younger ones.
    OldToNew = 3,
    /// Marking worklist.
    ToLookAt = 4,
}

impl Chain {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// The next-segment link for one chain within one segment: either the
/// segment is not presently linked into any list on this chain, the list
/// ends here, or it continues at another segment.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Link {
    NotInChain,
    EndOfChain,
    Next(SegmentIndex),
}

/// Per-segment state for all five chains: bitmap plus list link.
#[derive(Clone, Debug)]
pub(crate) struct ChainLinks {
    bits: [u64; NUM_CHAINS],
    next: [Link; NUM_CHAINS],
}

impl ChainLinks {
    pub(crate) fn new() -> Self {
        ChainLinks {
            bits: [0; NUM_CHAINS],
            next: [Link::NotInChain; NUM_CHAINS],
        }
    }

    fn check(&self, chain: Chain) {
        let c = chain.index();
        match self.next[c] {
            Link::NotInChain => assert!(
                self.bits[c] == 0,
                "segment linked out of {:?} but bits are non-zero",
                chain
            ),
            _ => {}
        }
    }
}

/// A membership set over one chain: a bitmap predicate plus a linked list
/// of its non-empty segments, in no particular order.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SegmentSet {
    chain: Chain,
    first: Link,
}

impl SegmentSet {
    /// Creates an empty set using `chain`. No other set may use `chain`
    /// unless it is pairwise disjoint from this one.
    pub(crate) fn new(chain: Chain) -> Self {
        SegmentSet {
            chain,
            first: Link::EndOfChain,
        }
    }

    pub(crate) fn chain(&self) -> Chain {
        self.chain
    }

    pub(crate) fn is_empty_shallow(&self) -> bool {
        matches!(self.first, Link::EndOfChain)
    }

    /// O(1) membership test.
    pub(crate) fn contains(&self, table: &SegmentTable, off_bits: u32, val: Handle) -> bool {
        chain_contains(table, self.chain, off_bits, val)
    }

    /// Adds `val`. Returns whether it was already a member.
    pub(crate) fn add(&mut self, table: &mut SegmentTable, off_bits: u32, val: Handle) -> bool {
        let seg = val.segment(off_bits);
        let off = val.offset(off_bits);
        let c = self.chain.index();
        let links = table.links_mut(seg);
        links.check(self.chain);

        let t = 1u64 << off;
        if links.bits[c] & t != 0 {
            return true;
        }
        if let Link::NotInChain = links.next[c] {
            links.next[c] = self.first;
            self.first = Link::Next(seg);
        }
        links.bits[c] |= t;
        false
    }

    /// Removes `val`. Returns whether it was previously a member.
    ///
    /// List linkage may be left stale unless the segment is both emptied
    /// and at the head of the list, in which case the head advances
    /// (lazy unlinking).
    pub(crate) fn remove(&mut self, table: &mut SegmentTable, off_bits: u32, val: Handle) -> bool {
        let seg = val.segment(off_bits);
        let off = val.offset(off_bits);
        let c = self.chain.index();
        let links = table.links_mut(seg);
        links.check(self.chain);

        let t = 1u64 << off;
        if links.bits[c] & t == 0 {
            return false;
        }
        links.bits[c] &= !t;
        if links.bits[c] == 0 {
            if let Link::Next(first_seg) = self.first {
                if first_seg == seg {
                    self.first = links.next[c];
                    links.next[c] = Link::NotInChain;
                }
            }
        }
        true
    }

    /// Drops any empty segments at the front of the list.
    fn remove_empty(&mut self, table: &mut SegmentTable) {
        let c = self.chain.index();
        while let Link::Next(seg) = self.first {
            let links = table.links_mut(seg);
            links.check(self.chain);
            if links.bits[c] != 0 {
                break;
            }
            self.first = links.next[c];
            links.next[c] = Link::NotInChain;
        }
    }

    /// Returns some member — the first bit of the first non-empty segment
    /// in the list — optionally clearing it. Returns [`Handle::no_object`]
    /// if the set is empty.
    pub(crate) fn first(
        &mut self,
        table: &mut SegmentTable,
        off_bits: u32,
        remove: bool,
    ) -> Handle {
        self.remove_empty(table);
        let seg = match self.first {
            Link::Next(seg) => seg,
            _ => return Handle::no_object(off_bits),
        };
        let c = self.chain.index();
        let links = table.links_mut(seg);
        let b = links.bits[c];
        let o = first_bit_pos(b);
        if remove {
            links.bits[c] &= !(1u64 << o);
        }
        Handle::pack(off_bits, seg, o)
    }

    /// Returns the member after `val`, which must currently be a member.
    /// Optionally clears `val`'s own bit (not the bit of the value
    /// returned). Returns [`Handle::no_object`] if there is none.
    pub(crate) fn next(
        &mut self,
        table: &mut SegmentTable,
        off_bits: u32,
        val: Handle,
        remove: bool,
    ) -> Handle {
        let seg = val.segment(off_bits);
        let offset = val.offset(off_bits);
        let c = self.chain.index();

        let mut b = {
            let links = table.links_mut(seg);
            links.check(self.chain);
            let b = links.bits[c] >> offset;
            assert!(b & 1 != 0, "set_next: value is not a member of the set");
            if remove {
                links.bits[c] &= !(1u64 << offset);
            }
            b >> 1
        };

        let mut index = seg;
        let mut out_offset = offset + 1;

        if b == 0 {
            loop {
                let nindex = match table.links(index).next[c] {
                    Link::EndOfChain => return Handle::no_object(off_bits),
                    Link::Next(n) => n,
                    Link::NotInChain => {
                        panic!("set_next: corrupt chain linkage (NotInChain mid-list)")
                    }
                };
                let nb = table.links(nindex).bits[c];
                if nb != 0 {
                    b = nb;
                    index = nindex;
                    out_offset = 0;
                    break;
                }
                let skip_next = table.links(nindex).next[c];
                table.links_mut(index).next[c] = skip_next;
            }
        }

        out_offset += first_bit_pos(b);
        Handle::pack(off_bits, index, out_offset)
    }

    /// Raw membership bits of the first segment in the list, after
    /// trimming empty segments off the front. Zero iff the set is empty.
    pub(crate) fn first_bits(&mut self, table: &mut SegmentTable) -> u64 {
        self.remove_empty(table);
        match self.first {
            Link::Next(seg) => table.links(seg).bits[self.chain.index()],
            _ => 0,
        }
    }

    /// Raw membership bits of the segment containing `val`.
    pub(crate) fn segment_bits(&self, table: &SegmentTable, off_bits: u32, val: Handle) -> u64 {
        let seg = val.segment(off_bits);
        table.links(seg).bits[self.chain.index()]
    }

    /// Overwrites the membership bits of the segment containing `val`.
    pub(crate) fn assign_segment_bits(
        &mut self,
        table: &mut SegmentTable,
        off_bits: u32,
        val: Handle,
        bits: u64,
    ) {
        let seg = val.segment(off_bits);
        table.links_mut(seg).bits[self.chain.index()] = bits;
    }

    /// Unlinks `src`'s first segment and prepends it to `dst`. Both must
    /// use the same chain; `src` and its first segment must be non-empty.
    pub(crate) fn move_first(
        src: &mut SegmentSet,
        dst: &mut SegmentSet,
        table: &mut SegmentTable,
    ) {
        assert_eq!(src.chain, dst.chain, "move_first: chain mismatch");
        let c = src.chain.index();
        let seg = match src.first {
            Link::Next(seg) => seg,
            _ => panic!("move_first: source set is empty"),
        };
        let links = table.links_mut(seg);
        assert!(links.bits[c] != 0, "move_first: first segment is empty");

        src.first = links.next[c];
        links.next[c] = dst.first;
        dst.first = Link::Next(seg);
    }

    /// Unlinks the segment *after* `val`'s segment from `src` and prepends
    /// it to `dst`. Both must use the same chain.
    pub(crate) fn move_next(
        src: &mut SegmentSet,
        dst: &mut SegmentSet,
        table: &mut SegmentTable,
        off_bits: u32,
        val: Handle,
    ) {
        assert_eq!(src.chain, dst.chain, "move_next: chain mismatch");
        let seg = val.segment(off_bits);
        let c = src.chain.index();

        let nseg = match table.links(seg).next[c] {
            Link::Next(n) => n,
            _ => panic!("move_next: no next segment"),
        };
        assert!(
            table.links(nseg).bits[c] != 0,
            "move_next: next segment is empty"
        );

        let after = table.links(nseg).next[c];
        table.links_mut(seg).next[c] = after;
        table.links_mut(nseg).next[c] = dst.first;
        dst.first = Link::Next(nseg);
    }
}

/// Checks membership in `chain` directly, without reference to a specific
/// [`SegmentSet`] value — valid whenever the sets sharing `chain` are known
/// to be pairwise disjoint (e.g. testing "is this the youngest generation"
/// against chain 0).
pub(crate) fn chain_contains(
    table: &SegmentTable,
    chain: Chain,
    off_bits: u32,
    val: Handle,
) -> bool {
    let seg = val.segment(off_bits);
    let off = val.offset(off_bits);
    (table.links(seg).bits[chain.index()] >> off) & 1 != 0
}

/// Raw membership bits for the segment containing `val`, on `chain`.
pub(crate) fn chain_segment_bits(table: &SegmentTable, chain: Chain, off_bits: u32, val: Handle) -> u64 {
    let seg = val.segment(off_bits);
    table.links(seg).bits[chain.index()]
}

/// The first handle of the segment following `val`'s segment in `chain`,
/// skipping (and unlinking) empty segments along the way. Used by the
/// quick per-kind allocation fast path, which otherwise avoids a full
/// `SegmentSet` traversal.
pub(crate) fn chain_next_segment(
    table: &mut SegmentTable,
    chain: Chain,
    off_bits: u32,
    val: Handle,
) -> Handle {
    let c = chain.index();
    let mut index = val.segment(off_bits);
    loop {
        let nindex = match table.links(index).next[c] {
            Link::EndOfChain => return Handle::no_object(off_bits),
            Link::Next(n) => n,
            Link::NotInChain => panic!("chain_next_segment: corrupt chain linkage"),
        };
        if table.links(nindex).bits[c] != 0 {
            return Handle::pack(off_bits, nindex, first_bit_pos(table.links(nindex).bits[c]));
        }
        let skip = table.links(nindex).next[c];
        table.links_mut(index).next[c] = skip;
        index = nindex;
    }
}

#[inline]
pub(crate) fn first_bit_pos(b: u64) -> u32 {
    debug_assert!(b != 0);
    b.trailing_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentTable;

    const OFF_BITS: u32 = 6;

    fn fresh_table(n: usize) -> SegmentTable {
        let mut t = SegmentTable::new(n);
        for _ in 0..n {
            t.push_bare_segment();
        }
        t
    }

    #[test]
    fn add_contains_remove_roundtrip() {
        let mut table = fresh_table(2);
        let mut set = SegmentSet::new(Chain::OldGen1);
        let h = Handle::pack(OFF_BITS, 0, 5);

        assert!(!set.contains(&table, OFF_BITS, h));
        assert!(!set.add(&mut table, OFF_BITS, h));
        assert!(set.contains(&table, OFF_BITS, h));
        assert!(set.remove(&mut table, OFF_BITS, h));
        assert!(!set.contains(&table, OFF_BITS, h));
    }

    #[test]
    fn add_twice_reports_already_present() {
        let mut table = fresh_table(1);
        let mut set = SegmentSet::new(Chain::OldGen1);
        let h = Handle::pack(OFF_BITS, 0, 1);

        assert!(!set.add(&mut table, OFF_BITS, h));
        assert!(set.add(&mut table, OFF_BITS, h));
    }

    #[test]
    fn first_on_empty_set_is_no_object() {
        let mut table = fresh_table(1);
        let mut set = SegmentSet::new(Chain::OldGen1);
        assert_eq!(set.first(&mut table, OFF_BITS, false), Handle::no_object(OFF_BITS));
    }

    #[test]
    fn next_past_last_is_no_object() {
        let mut table = fresh_table(1);
        let mut set = SegmentSet::new(Chain::OldGen1);
        let h = Handle::pack(OFF_BITS, 0, 3);
        set.add(&mut table, OFF_BITS, h);
        assert_eq!(set.next(&mut table, OFF_BITS, h, false), Handle::no_object(OFF_BITS));
    }

    #[test]
    fn iterates_in_segment_then_chain_order() {
        let mut table = fresh_table(2);
        let mut set = SegmentSet::new(Chain::OldGen1);
        let a = Handle::pack(OFF_BITS, 0, 0);
        let b = Handle::pack(OFF_BITS, 0, 1);
        let c = Handle::pack(OFF_BITS, 1, 0);
        set.add(&mut table, OFF_BITS, c);
        set.add(&mut table, OFF_BITS, a);
        set.add(&mut table, OFF_BITS, b);

        let first = set.first(&mut table, OFF_BITS, false);
        assert_eq!(first, a);
        let second = set.next(&mut table, OFF_BITS, first, false);
        assert_eq!(second, b);
        let third = set.next(&mut table, OFF_BITS, second, false);
        assert_eq!(third, c);
        assert_eq!(set.next(&mut table, OFF_BITS, third, false), Handle::no_object(OFF_BITS));
    }

    #[test]
    fn move_first_transfers_segment_between_sets() {
        let mut table = fresh_table(1);
        let mut src = SegmentSet::new(Chain::UnusedFreeNew);
        let mut dst = SegmentSet::new(Chain::UnusedFreeNew);
        let h = Handle::pack(OFF_BITS, 0, 0);
        src.add(&mut table, OFF_BITS, h);

        SegmentSet::move_first(&mut src, &mut dst, &mut table);

        assert!(src.is_empty_shallow());
        assert!(dst.contains(&table, OFF_BITS, h));
    }

    #[test]
    #[should_panic]
    fn move_first_mismatched_chains_panics() {
        let mut table = fresh_table(1);
        let mut src = SegmentSet::new(Chain::UnusedFreeNew);
        let mut dst = SegmentSet::new(Chain::OldGen1);
        SegmentSet::move_first(&mut src, &mut dst, &mut table);
    }

    #[test]
    fn chain_contains_matches_set_contains() {
        let mut table = fresh_table(1);
        let mut set = SegmentSet::new(Chain::UnusedFreeNew);
        let h = Handle::pack(OFF_BITS, 0, 4);
        set.add(&mut table, OFF_BITS, h);
        assert!(chain_contains(&table, Chain::UnusedFreeNew, OFF_BITS, h));
    }
}
