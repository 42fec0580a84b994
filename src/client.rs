//! The host-supplied callback surface.
//!
//! A host language implementation supplies these once, as a single trait
//! implementation threaded through [`crate::Heap`] as its type parameter,
//! rather than a scattering of free functions.

use crate::handle::{Handle, Kind, Length, Nchunks, Type};
use crate::Heap;

/// Callbacks a host language implementation supplies to drive allocation
/// and collection. `kind`/`nchunks` classify objects; `find_root_ptrs` and
/// `find_object_ptrs` enumerate references by calling back into
/// [`Heap::look_at`]; the rest are optional and default to no-ops.
pub trait GcClient: Sized {
    /// Classifies `(type, length)` into a GC layout kind. May be called on
    /// every allocation — keep it cheap (a `match` on `type`, typically).
    fn kind(&self, ty: Type, length: Length) -> Kind;

    /// Chunk count for a big-kind object. Only called when `kind(ty, length)`
    /// names a big kind (`chunks == 0` in its [`crate::KindSpec`]).
    fn nchunks(&self, ty: Type, length: Length) -> Nchunks;

    /// Enumerates every GC root by calling `heap.look_at(root)` for each.
    /// Called exactly once per [`Heap::collect`].
    fn find_root_ptrs(&mut self, heap: &mut Heap<Self>);

    /// Enumerates every outgoing reference of the object at `h` by calling
    /// `heap.look_at(target)` for each. Called once per reachable object
    /// during marking, and again during remembered-set scanning (in which
    /// case `look_at` may return `0` to request an early exit — see
    /// [`Heap::look_at`]).
    fn find_object_ptrs(&mut self, heap: &mut Heap<Self>, h: Handle);

    /// Read-only auxiliary data shared by every segment of `kind`, if any.
    /// When present, this crate never allocates a per-segment aux1 block
    /// for that kind.
    fn aux1_read_only(&self, _kind: Kind) -> Option<&'static [u8]> {
        None
    }

    /// As [`GcClient::aux1_read_only`], for the second auxiliary slot.
    fn aux2_read_only(&self, _kind: Kind) -> Option<&'static [u8]> {
        None
    }

    /// Invoked once after each drain of the marking worklist during
    /// `collect`, letting the host implement weak references by promoting
    /// objects it wants kept alive based on the marks made so far
    /// `rep` counts drains within this collection, starting at 0.
    fn after_marking(&mut self, _heap: &mut Heap<Self>, _level: u8, _rep: u32) {}
}
