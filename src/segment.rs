//! The segment table: a capacity-bounded, append-only array of segment
//! descriptors plus their data and auxiliary storage blocks.
//!
//! Every live object lives in exactly one segment. A segment
//! is either *small* (up to `N_OFF` objects of one kind, sharing one data
//! block) or *big* (exactly one object, sized at allocation time). Segments
//! are never returned to the OS during a run; a big segment's data block is
//! freed and its descriptor recycled through the `unused` set, but the
//! descriptor slot itself is permanent.

use crate::handle::{Kind, Nchunks, SegmentIndex, Type};
use crate::set::ChainLinks;

pub(crate) struct SegmentDescriptor {
    pub(crate) links: ChainLinks,
    pub(crate) is_big: bool,
    pub(crate) constant: bool,
    pub(crate) kind: Kind,
    /// Only meaningful for big segments: the chunk count of the one
    /// object it holds.
    pub(crate) max_chunks: Nchunks,
}

impl SegmentDescriptor {
    fn new() -> Self {
        SegmentDescriptor {
            links: ChainLinks::new(),
            is_big: false,
            constant: false,
            kind: 0,
            max_chunks: 0,
        }
    }
}

/// Owns every segment's descriptor, data block, and (optional) auxiliary
/// blocks, indexed by [`SegmentIndex`]. Capacity is fixed at construction;
/// the table only ever grows by appending up to that cap.
pub(crate) struct SegmentTable {
    descriptors: Vec<SegmentDescriptor>,
    data: Vec<Option<Box<[u8]>>>,
    aux1: Vec<Option<Box<[u8]>>>,
    aux2: Vec<Option<Box<[u8]>>>,
    types: Vec<Type>,
    max_segments: usize,
}

impl SegmentTable {
    pub(crate) fn new(max_segments: usize) -> Self {
        SegmentTable {
            descriptors: Vec::with_capacity(max_segments),
            data: Vec::with_capacity(max_segments),
            aux1: Vec::with_capacity(max_segments),
            aux2: Vec::with_capacity(max_segments),
            types: Vec::with_capacity(max_segments),
            max_segments,
        }
    }

    pub(crate) fn max_segments(&self) -> usize {
        self.max_segments
    }

    pub(crate) fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub(crate) fn at_capacity(&self) -> bool {
        self.descriptors.len() >= self.max_segments
    }

    /// Appends a fresh, empty segment descriptor. Returns `None` if the
    /// table is already at `max_segments`.
    pub(crate) fn grow(&mut self) -> Option<SegmentIndex> {
        if self.at_capacity() {
            return None;
        }
        self.descriptors.push(SegmentDescriptor::new());
        self.data.push(None);
        self.aux1.push(None);
        self.aux2.push(None);
        self.types.push(0);
        Some((self.descriptors.len() - 1) as SegmentIndex)
    }

    #[cfg(test)]
    pub(crate) fn push_bare_segment(&mut self) -> SegmentIndex {
        self.grow().expect("test table exceeded its capacity")
    }

    #[inline]
    pub(crate) fn links(&self, seg: SegmentIndex) -> &ChainLinks {
        &self.descriptors[seg as usize].links
    }

    #[inline]
    pub(crate) fn links_mut(&mut self, seg: SegmentIndex) -> &mut ChainLinks {
        &mut self.descriptors[seg as usize].links
    }

    pub(crate) fn descriptor(&self, seg: SegmentIndex) -> &SegmentDescriptor {
        &self.descriptors[seg as usize]
    }

    pub(crate) fn descriptor_mut(&mut self, seg: SegmentIndex) -> &mut SegmentDescriptor {
        &mut self.descriptors[seg as usize]
    }

    pub(crate) fn kind(&self, seg: SegmentIndex) -> Kind {
        self.descriptors[seg as usize].kind
    }

    pub(crate) fn is_big(&self, seg: SegmentIndex) -> bool {
        self.descriptors[seg as usize].is_big
    }

    pub(crate) fn is_constant(&self, seg: SegmentIndex) -> bool {
        self.descriptors[seg as usize].constant
    }

    pub(crate) fn mark_constant(&mut self, seg: SegmentIndex) {
        self.descriptors[seg as usize].constant = true;
    }

    pub(crate) fn set_type(&mut self, seg: SegmentIndex, ty: Type) {
        self.types[seg as usize] = ty;
    }

    pub(crate) fn get_type(&self, seg: SegmentIndex) -> Type {
        self.types[seg as usize]
    }

    pub(crate) fn init_small(&mut self, seg: SegmentIndex, kind: Kind, data: Box<[u8]>) {
        let d = &mut self.descriptors[seg as usize];
        d.is_big = false;
        d.kind = kind;
        self.data[seg as usize] = Some(data);
    }

    pub(crate) fn init_big(&mut self, seg: SegmentIndex, kind: Kind) {
        let d = &mut self.descriptors[seg as usize];
        d.is_big = true;
        d.kind = kind;
        d.max_chunks = 0;
    }

    pub(crate) fn set_big_data(&mut self, seg: SegmentIndex, data: Box<[u8]>, max_chunks: Nchunks) {
        self.descriptors[seg as usize].max_chunks = max_chunks;
        self.data[seg as usize] = Some(data);
    }

    pub(crate) fn free_big_data(&mut self, seg: SegmentIndex) {
        self.data[seg as usize] = None;
        self.descriptors[seg as usize].max_chunks = 0;
    }

    pub(crate) fn max_chunks(&self, seg: SegmentIndex) -> Nchunks {
        self.descriptors[seg as usize].max_chunks
    }

    pub(crate) fn data(&self, seg: SegmentIndex) -> &[u8] {
        self.data[seg as usize]
            .as_deref()
            .expect("segment has no data block allocated")
    }

    pub(crate) fn data_mut(&mut self, seg: SegmentIndex) -> &mut [u8] {
        self.data[seg as usize]
            .as_deref_mut()
            .expect("segment has no data block allocated")
    }

    pub(crate) fn aux1(&self, seg: SegmentIndex) -> Option<&[u8]> {
        self.aux1[seg as usize].as_deref()
    }

    pub(crate) fn aux1_mut(&mut self, seg: SegmentIndex) -> Option<&mut [u8]> {
        self.aux1[seg as usize].as_deref_mut()
    }

    pub(crate) fn set_aux1(&mut self, seg: SegmentIndex, buf: Box<[u8]>) {
        self.aux1[seg as usize] = Some(buf);
    }

    pub(crate) fn aux2(&self, seg: SegmentIndex) -> Option<&[u8]> {
        self.aux2[seg as usize].as_deref()
    }

    pub(crate) fn aux2_mut(&mut self, seg: SegmentIndex) -> Option<&mut [u8]> {
        self.aux2[seg as usize].as_deref_mut()
    }

    pub(crate) fn set_aux2(&mut self, seg: SegmentIndex, buf: Box<[u8]>) {
        self.aux2[seg as usize] = Some(buf);
    }

    /// Drops this segment's owned aux1/aux2 blocks, if any (a shared
    /// read-only aux pointer is never stored here, so there is nothing to
    /// clear for it).
    pub(crate) fn free_aux(&mut self, seg: SegmentIndex) {
        self.aux1[seg as usize] = None;
        self.aux2[seg as usize] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_respects_capacity() {
        let mut t = SegmentTable::new(2);
        assert!(t.grow().is_some());
        assert!(t.grow().is_some());
        assert!(t.grow().is_none());
        assert!(t.at_capacity());
    }

    #[test]
    fn small_segment_data_roundtrip() {
        let mut t = SegmentTable::new(1);
        let seg = t.grow().unwrap();
        t.init_small(seg, 2, vec![0u8; 64].into_boxed_slice());
        t.data_mut(seg)[3] = 42;
        assert_eq!(t.data(seg)[3], 42);
        assert!(!t.is_big(seg));
        assert_eq!(t.kind(seg), 2);
    }

    #[test]
    fn big_segment_free_and_reuse() {
        let mut t = SegmentTable::new(1);
        let seg = t.grow().unwrap();
        t.init_big(seg, 5);
        t.set_big_data(seg, vec![0u8; 32].into_boxed_slice(), 2);
        assert_eq!(t.max_chunks(seg), 2);
        t.free_big_data(seg);
        assert_eq!(t.max_chunks(seg), 0);
    }
}
