//! Diagnostic counters, updated at each point the heap's generation
//! membership changes.

/// Snapshot of heap occupancy. `gen0_count` covers everything currently in
/// `free_or_new` across all kinds (allocated-but-not-yet-collected objects,
/// i.e. the youngest generation); `uncol_count` covers objects of an
/// uncollected kind plus registered constants.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SggcInfo {
    pub gen0_count: u64,
    pub gen1_count: u64,
    pub gen2_count: u64,
    pub uncol_count: u64,
    pub big_chunks: u64,
}
