//! Partitioning of k-space into reconstructible subsets.
//!
//! Acquisitions that share every encoding counter except the two k-space
//! steps belong to the same subset and reconstruct into one image. The tag
//! identifying a subset deliberately zeroes the segment and the user counters
//! so that segmented scans and user-tagged readouts still land in one bucket.

use crate::acquisition::Acquisition;
use crate::image::ImageHeader;

pub const USER_INTS: usize = 8;

/// Counters that make up a subset tag: average, slice, contrast, phase,
/// repetition, set, segment plus the user counters.
pub const NUM_KSPACE_DIMS: usize = 7 + USER_INTS;

pub type Tag = [u16; NUM_KSPACE_DIMS];

/// One bucket of k-space: its tag and the container positions of the
/// acquisitions that fell into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KSpaceSubset {
    tag: Tag,
    idx_set: Vec<usize>,
}

impl KSpaceSubset {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            idx_set: Vec::new(),
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn indices(&self) -> &[usize] {
        &self.idx_set
    }

    pub fn add_index(&mut self, idx: usize) {
        self.idx_set.push(idx);
    }

    pub fn is_empty(&self) -> bool {
        self.idx_set.is_empty()
    }

    /// True for the bucket with every counter at zero except the slice.
    pub fn is_first_set(&self) -> bool {
        self.tag[0] == 0 && self.tag[2..].iter().all(|&t| t == 0)
    }

    /// Tag of the bucket `acq` belongs to. Segment and user counters are
    /// forced to zero.
    pub fn tag_from_acquisition(acq: &Acquisition) -> Tag {
        let idx = &acq.head.idx;
        let mut tag = [0u16; NUM_KSPACE_DIMS];
        tag[0] = idx.average;
        tag[1] = idx.slice;
        tag[2] = idx.contrast;
        tag[3] = idx.phase;
        tag[4] = idx.repetition;
        tag[5] = idx.set;
        tag
    }

    /// Tag of the bucket an image was reconstructed from.
    pub fn tag_from_image(head: &ImageHeader) -> Tag {
        let mut tag = [0u16; NUM_KSPACE_DIMS];
        tag[0] = head.average;
        tag[1] = head.slice;
        tag[2] = head.contrast;
        tag[3] = head.phase;
        tag[4] = head.repetition;
        tag[5] = head.set;
        tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Acquisition;

    #[test]
    fn tag_zeroes_segment_and_user_counters() {
        let mut acq = Acquisition::new(1, 4);
        acq.head.idx.average = 1;
        acq.head.idx.slice = 2;
        acq.head.idx.contrast = 3;
        acq.head.idx.phase = 4;
        acq.head.idx.repetition = 5;
        acq.head.idx.set = 6;
        acq.head.idx.segment = 7;
        acq.head.idx.user = [9; USER_INTS];

        let tag = KSpaceSubset::tag_from_acquisition(&acq);
        assert_eq!(&tag[..7], &[1, 2, 3, 4, 5, 6, 0]);
        assert_eq!(&tag[7..], &[0; USER_INTS]);
    }

    #[test]
    fn first_set_ignores_the_slice_counter() {
        let mut tag = [0u16; NUM_KSPACE_DIMS];
        tag[1] = 5;
        assert!(KSpaceSubset::new(tag).is_first_set());
        tag[2] = 1;
        assert!(!KSpaceSubset::new(tag).is_first_set());
    }
}
