//! The acquisition-system header and its lazily parsed carrier.
//!
//! Raw datasets travel together with a serialized header that describes the
//! encoded and reconstructed spaces, the trajectory and the encoding limits.
//! Containers keep the header as an opaque byte blob ([`AcquisitionsInfo`]) so
//! that copying a container never forces a parse; the structured view is
//! decoded on first use and cached.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::error::HeaderError;

// =====================================
// Structured header
// =====================================

/// Closed range of an encoding counter, with the k-space centre position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub minimum: u16,
    pub maximum: u16,
    pub center: u16,
}

impl Limit {
    pub fn new(minimum: u16, maximum: u16, center: u16) -> Self {
        Self { minimum, maximum, center }
    }

    /// Number of distinct counter values the limit spans. A malformed range
    /// with `maximum < minimum` counts a single state.
    pub fn num_states(&self) -> usize {
        self.maximum.saturating_sub(self.minimum) as usize + 1
    }
}

/// Extent of an absent limit: a single state.
pub(crate) fn num_states(limit: &Option<Limit>) -> usize {
    limit.as_ref().map_or(1, Limit::num_states)
}

/// Identifies one encoding dimension when getting or setting limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingDim {
    KspaceEncodingStep1,
    KspaceEncodingStep2,
    Average,
    Slice,
    Contrast,
    Phase,
    Repetition,
    Set,
    Segment,
}

impl EncodingDim {
    pub fn name(self) -> &'static str {
        match self {
            Self::KspaceEncodingStep1 => "kspace_encoding_step_1",
            Self::KspaceEncodingStep2 => "kspace_encoding_step_2",
            Self::Average => "average",
            Self::Slice => "slice",
            Self::Contrast => "contrast",
            Self::Phase => "phase",
            Self::Repetition => "repetition",
            Self::Set => "set",
            Self::Segment => "segment",
        }
    }
}

/// Declared ranges of the encoding counters. Absent limits count one state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingLimits {
    pub kspace_encoding_step_1: Option<Limit>,
    pub kspace_encoding_step_2: Option<Limit>,
    pub average: Option<Limit>,
    pub slice: Option<Limit>,
    pub contrast: Option<Limit>,
    pub phase: Option<Limit>,
    pub repetition: Option<Limit>,
    pub set: Option<Limit>,
    pub segment: Option<Limit>,
}

impl EncodingLimits {
    pub fn get(&self, dim: EncodingDim) -> Option<Limit> {
        match dim {
            EncodingDim::KspaceEncodingStep1 => self.kspace_encoding_step_1,
            EncodingDim::KspaceEncodingStep2 => self.kspace_encoding_step_2,
            EncodingDim::Average => self.average,
            EncodingDim::Slice => self.slice,
            EncodingDim::Contrast => self.contrast,
            EncodingDim::Phase => self.phase,
            EncodingDim::Repetition => self.repetition,
            EncodingDim::Set => self.set,
            EncodingDim::Segment => self.segment,
        }
    }

    pub fn set(&mut self, dim: EncodingDim, limit: Limit) {
        let slot = match dim {
            EncodingDim::KspaceEncodingStep1 => &mut self.kspace_encoding_step_1,
            EncodingDim::KspaceEncodingStep2 => &mut self.kspace_encoding_step_2,
            EncodingDim::Average => &mut self.average,
            EncodingDim::Slice => &mut self.slice,
            EncodingDim::Contrast => &mut self.contrast,
            EncodingDim::Phase => &mut self.phase,
            EncodingDim::Repetition => &mut self.repetition,
            EncodingDim::Set => &mut self.set,
            EncodingDim::Segment => &mut self.segment,
        };
        *slot = Some(limit);
    }

    /// As [`get`](Self::get), but absence is an error.
    pub fn require(&self, dim: EncodingDim) -> Result<Limit, HeaderError> {
        self.get(dim)
            .ok_or(HeaderError::MissingEncodingLimit(dim.name()))
    }
}

/// Matrix size (in voxels) and field of view (in mm) of one space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EncodingSpace {
    pub matrix_size: [u16; 3],
    pub field_of_view_mm: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trajectory {
    Cartesian,
    Epi,
    GoldenAngle,
    Radial,
    Spiral,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParallelImaging {
    pub acceleration_step_1: u16,
    pub acceleration_step_2: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub trajectory: Trajectory,
    pub encoded_space: EncodingSpace,
    pub recon_space: EncodingSpace,
    pub limits: EncodingLimits,
    pub parallel_imaging: Option<ParallelImaging>,
}

/// Top-level acquisition-system header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MrdHeader {
    pub encoding: Vec<Encoding>,
    pub receiver_channels: Option<u16>,
}

impl MrdHeader {
    /// The one encoding this crate supports per dataset.
    pub fn single_encoding(&self) -> Result<&Encoding, HeaderError> {
        match self.encoding.len() {
            0 => Err(HeaderError::NoEncoding),
            1 => Ok(&self.encoding[0]),
            n => Err(HeaderError::MultipleEncodings(n)),
        }
    }

    /// Whether the first encoding declares in-plane undersampling.
    pub fn undersampled(&self) -> bool {
        self.encoding
            .first()
            .and_then(|e| e.parallel_imaging)
            .is_some_and(|p| p.acceleration_step_1 > 1)
    }
}

// =====================================
// Opaque carrier
// =====================================

/// Serialized header blob with a cached structured view.
///
/// Two states: empty (no metadata attached yet) or carrying the serialized
/// header bytes. Parsing happens on the first [`header`](Self::header) call
/// and the result is cached for the lifetime of the value; cloning copies the
/// blob and drops the cache.
#[derive(Debug, Default)]
pub struct AcquisitionsInfo {
    raw: Vec<u8>,
    parsed: OnceCell<MrdHeader>,
}

impl Clone for AcquisitionsInfo {
    fn clone(&self) -> Self {
        Self {
            raw: self.raw.clone(),
            parsed: OnceCell::new(),
        }
    }
}

impl PartialEq for AcquisitionsInfo {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl AcquisitionsInfo {
    pub fn from_raw(raw: Vec<u8>) -> Self {
        Self {
            raw,
            parsed: OnceCell::new(),
        }
    }

    /// Serializes `header` and caches the given value so the first read is free.
    pub fn from_header(header: &MrdHeader) -> Result<Self, HeaderError> {
        let raw = rmp_serde::to_vec(header).map_err(HeaderError::Encode)?;
        let parsed = OnceCell::new();
        let _ = parsed.set(header.clone());
        Ok(Self { raw, parsed })
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Structured view of the blob, decoded once and cached.
    pub fn header(&self) -> Result<&MrdHeader, HeaderError> {
        if self.raw.is_empty() {
            return Err(HeaderError::Empty);
        }
        self.parsed
            .get_or_try_init(|| rmp_serde::from_slice(&self.raw).map_err(HeaderError::Decode))
    }

    pub fn single_encoding(&self) -> Result<&Encoding, HeaderError> {
        self.header()?.single_encoding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::make_header;

    #[test]
    fn limit_spans_inclusive_range() {
        assert_eq!(Limit::new(0, 7, 4).num_states(), 8);
        assert_eq!(Limit::new(3, 3, 3).num_states(), 1);
        // malformed ranges collapse instead of wrapping around
        assert_eq!(Limit::new(5, 3, 4).num_states(), 1);
        assert_eq!(num_states(&None), 1);
    }

    #[test]
    fn limits_get_set_round_trip() {
        let mut limits = EncodingLimits::default();
        assert!(limits.get(EncodingDim::Phase).is_none());
        assert!(matches!(
            limits.require(EncodingDim::Phase),
            Err(HeaderError::MissingEncodingLimit("phase"))
        ));

        limits.set(EncodingDim::Phase, Limit::new(0, 5, 3));
        assert_eq!(limits.get(EncodingDim::Phase), Some(Limit::new(0, 5, 3)));
        assert_eq!(limits.require(EncodingDim::Phase).unwrap(), Limit::new(0, 5, 3));
    }

    #[test]
    fn info_decodes_and_caches_the_header() {
        let header = make_header(2, 8, 8, 1, 2);
        let info = AcquisitionsInfo::from_raw(rmp_serde::to_vec(&header).unwrap());
        assert!(!info.is_empty());

        let decoded = info.header().unwrap();
        assert_eq!(*decoded, header);
        // second call hits the cache, same reference
        assert!(std::ptr::eq(decoded, info.header().unwrap()));
    }

    #[test]
    fn empty_info_has_no_header() {
        let info = AcquisitionsInfo::default();
        assert!(info.is_empty());
        assert!(matches!(info.header(), Err(HeaderError::Empty)));
    }

    #[test]
    fn multiple_encodings_are_rejected() {
        let mut header = make_header(1, 4, 4, 1, 1);
        let extra = header.encoding[0].clone();
        header.encoding.push(extra);
        assert!(matches!(
            header.single_encoding(),
            Err(HeaderError::MultipleEncodings(2))
        ));
    }

    #[test]
    fn undersampling_comes_from_parallel_imaging() {
        let mut header = make_header(1, 4, 4, 1, 1);
        assert!(!header.undersampled());
        header.encoding[0].parallel_imaging = Some(ParallelImaging {
            acceleration_step_1: 2,
            acceleration_step_2: 1,
        });
        assert!(header.undersampled());
    }
}
