//! Runtime configuration.
//!
//! `OFF_BITS`, `CHUNK_SIZE`, the kind tables, and the aux sizes are the
//! knobs a host would otherwise bake in at compile time; here they are
//! fields of [`Config`], validated once by [`Config::build`] before a
//! [`crate::Heap`] is ever constructed.

use crate::error::ConfigError;
use crate::handle::{Kind, Nchunks};

/// A segment layout class: either big (`chunks == 0`, one object of
/// variable size) or small (`chunks` per object, `chunks <= n_off`).
#[derive(Clone, Copy, Debug)]
pub struct KindSpec {
    /// Chunks per object. Zero means "big kind".
    pub chunks: Nchunks,
    /// Objects of this kind are never swept or promoted once allocated.
    pub uncollected: bool,
}

impl KindSpec {
    pub fn small(chunks: Nchunks) -> Self {
        KindSpec {
            chunks,
            uncollected: false,
        }
    }

    pub fn big() -> Self {
        KindSpec {
            chunks: 0,
            uncollected: false,
        }
    }

    pub fn uncollected(mut self) -> Self {
        self.uncollected = true;
        self
    }

    #[inline]
    pub fn is_big(&self) -> bool {
        self.chunks == 0
    }
}

/// Validated runtime configuration for a [`crate::Heap`].
///
/// Constructed via [`ConfigBuilder`] and [`Config::build`]; every field is
/// read-only after construction — a running `Heap` never sees its layout
/// change underneath it.
#[derive(Clone, Debug)]
pub struct Config {
    pub(crate) off_bits: u32,
    pub(crate) n_off: u32,
    pub(crate) chunk_size: usize,
    pub(crate) n_types: usize,
    pub(crate) kinds: Vec<KindSpec>,
    pub(crate) aux1_size: Vec<usize>,
    pub(crate) aux2_size: Vec<usize>,
    pub(crate) aux1_block_size: usize,
    pub(crate) max_segments: usize,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    #[inline]
    pub fn off_bits(&self) -> u32 {
        self.off_bits
    }

    #[inline]
    pub fn n_off(&self) -> u32 {
        self.n_off
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub fn n_types(&self) -> usize {
        self.n_types
    }

    #[inline]
    pub fn n_kinds(&self) -> usize {
        self.kinds.len()
    }

    #[inline]
    pub fn max_segments(&self) -> usize {
        self.max_segments
    }

    pub(crate) fn kind(&self, kind: Kind) -> &KindSpec {
        &self.kinds[kind as usize]
    }

    pub(crate) fn is_big_kind(&self, kind: Kind) -> bool {
        self.kinds[kind as usize].is_big()
    }

    pub(crate) fn is_uncollected_kind(&self, kind: Kind) -> bool {
        self.kinds[kind as usize].uncollected
    }

    pub(crate) fn aux1_size(&self, kind: Kind) -> usize {
        self.aux1_size.get(kind as usize).copied().unwrap_or(0)
    }

    pub(crate) fn aux2_size(&self, kind: Kind) -> usize {
        self.aux2_size.get(kind as usize).copied().unwrap_or(0)
    }
}

/// Builder for [`Config`]: kind chunk counts, aux sizes, and the segment cap
/// are all supplied here rather than baked in at compile time.
pub struct ConfigBuilder {
    off_bits: u32,
    chunk_size: usize,
    n_types: usize,
    kinds: Vec<KindSpec>,
    aux1_size: Vec<usize>,
    aux2_size: Vec<usize>,
    aux1_block_size: usize,
    max_segments: usize,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        ConfigBuilder {
            off_bits: 6,
            chunk_size: 16,
            n_types: 0,
            kinds: Vec::new(),
            aux1_size: Vec::new(),
            aux2_size: Vec::new(),
            aux1_block_size: 1024,
            max_segments: 0,
        }
    }
}

impl ConfigBuilder {
    /// `OFF_BITS`, in `3..=6`. Determines `N_OFF = 1 << off_bits`.
    pub fn off_bits(mut self, off_bits: u32) -> Self {
        self.off_bits = off_bits;
        self
    }

    /// `CHUNK_SIZE`, must be a power of two.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn n_types(mut self, n_types: usize) -> Self {
        self.n_types = n_types;
        self
    }

    /// Appends one kind, returning its assigned `Kind` index.
    pub fn push_kind(&mut self, spec: KindSpec) -> Kind {
        self.kinds.push(spec);
        self.aux1_size.push(0);
        self.aux2_size.push(0);
        (self.kinds.len() - 1) as Kind
    }

    pub fn set_aux1_size(&mut self, kind: Kind, size: usize) {
        self.aux1_size[kind as usize] = size;
    }

    pub fn set_aux2_size(&mut self, kind: Kind, size: usize) {
        self.aux2_size[kind as usize] = size;
    }

    pub fn aux1_block_size(mut self, size: usize) -> Self {
        self.aux1_block_size = size;
        self
    }

    pub fn max_segments(mut self, max_segments: usize) -> Self {
        self.max_segments = max_segments;
        self
    }

    /// Validates and freezes the configuration, returning a `ConfigError`
    /// for whichever constraint the builder's fields violate.
    pub fn build(self) -> Result<Config, ConfigError> {
        if !(3..=6).contains(&self.off_bits) {
            return Err(ConfigError::InvalidOffBits(self.off_bits));
        }
        if self.chunk_size == 0 || !self.chunk_size.is_power_of_two() {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }
        if self.n_types == 0 {
            return Err(ConfigError::ZeroNTypes);
        }
        if self.kinds.is_empty() {
            return Err(ConfigError::ZeroNKinds);
        }
        if self.kinds.len() > u8::MAX as usize + 1 {
            return Err(ConfigError::TooManyKinds(self.kinds.len()));
        }
        if self.max_segments == 0 {
            return Err(ConfigError::ZeroMaxSegments);
        }

        let n_off = 1u32 << self.off_bits;
        for (k, spec) in self.kinds.iter().enumerate() {
            if !spec.is_big() && spec.chunks > n_off {
                return Err(ConfigError::KindChunksTooLarge {
                    kind: k as Kind,
                    chunks: spec.chunks,
                    n_off,
                });
            }
        }

        Ok(Config {
            off_bits: self.off_bits,
            n_off,
            chunk_size: self.chunk_size,
            n_types: self.n_types,
            kinds: self.kinds,
            aux1_size: self.aux1_size,
            aux2_size: self.aux2_size,
            aux1_block_size: self.aux1_block_size,
            max_segments: self.max_segments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_off_bits() {
        let mut b = Config::builder().off_bits(7).n_types(1).max_segments(4);
        b.push_kind(KindSpec::big());
        assert!(matches!(b.build(), Err(ConfigError::InvalidOffBits(7))));
    }

    #[test]
    fn rejects_non_power_of_two_chunk_size() {
        let mut b = Config::builder()
            .chunk_size(10)
            .n_types(1)
            .max_segments(4);
        b.push_kind(KindSpec::big());
        assert!(matches!(b.build(), Err(ConfigError::InvalidChunkSize(10))));
    }

    #[test]
    fn rejects_kind_chunks_exceeding_n_off() {
        let mut b = Config::builder()
            .off_bits(3)
            .n_types(1)
            .max_segments(4);
        b.push_kind(KindSpec::small(9));
        assert!(matches!(
            b.build(),
            Err(ConfigError::KindChunksTooLarge { .. })
        ));
    }

    #[test]
    fn accepts_well_formed_config() {
        let mut b = Config::builder()
            .off_bits(6)
            .chunk_size(16)
            .n_types(2)
            .max_segments(11);
        b.push_kind(KindSpec::big());
        b.push_kind(KindSpec::big());
        let cfg = b.build().unwrap();
        assert_eq!(cfg.n_off(), 64);
        assert_eq!(cfg.n_kinds(), 2);
    }
}
