//! Shared builders for container tests.

use num_complex::Complex32;

use crate::acquisition::Acquisition;
use crate::acquisitions::{AcquisitionData, AcquisitionsVector};
use crate::header::{
    AcquisitionsInfo, Encoding, EncodingLimits, EncodingSpace, Limit, MrdHeader, Trajectory,
};
use crate::image::{Image, ImageWrap};

pub(crate) fn make_header(n_slices: u16, nx: u16, ny: u16, nz: u16, channels: u16) -> MrdHeader {
    let space = EncodingSpace {
        matrix_size: [nx, ny, nz],
        field_of_view_mm: [nx as f32, ny as f32, nz as f32],
    };
    let limits = EncodingLimits {
        kspace_encoding_step_1: Some(Limit::new(0, ny - 1, ny / 2)),
        slice: Some(Limit::new(0, n_slices - 1, 0)),
        ..Default::default()
    };
    MrdHeader {
        encoding: vec![Encoding {
            trajectory: Trajectory::Cartesian,
            encoded_space: space,
            recon_space: space,
            limits,
            parallel_imaging: None,
        }],
        receiver_channels: Some(channels),
    }
}

pub(crate) fn make_info(n_slices: u16, nx: u16, ny: u16, nz: u16, channels: u16) -> AcquisitionsInfo {
    AcquisitionsInfo::from_header(&make_header(n_slices, nx, ny, nz, channels)).unwrap()
}

/// Readout at `(slice, ky)` with every sample set to `ky + 1`.
pub(crate) fn make_acquisition(
    slice: u16,
    ky: u16,
    time: u32,
    channels: usize,
    samples: usize,
) -> Acquisition {
    let mut acq = Acquisition::new(channels, samples);
    acq.head.acquisition_time_stamp = time;
    acq.head.idx.slice = slice;
    acq.head.idx.kspace_encode_step_1 = ky;
    acq.head.read_dir = [1.0, 0.0, 0.0];
    acq.head.phase_dir = [0.0, 1.0, 0.0];
    acq.head.slice_dir = [0.0, 0.0, 1.0];
    acq.head.position = [0.0, 0.0, -2.0 * slice as f32];
    acq.data.fill(Complex32::new(ky as f32 + 1.0, 0.0));
    acq
}

/// A fully sampled container of `n_slices * ny` readouts with 2 channels and
/// 8 samples each, appended slice-reversed so that only sorting by time
/// (stamps of `slice * 100 + ky`) brings them into scan order.
pub(crate) fn sample_acquisitions(n_slices: u16, ny: u16) -> AcquisitionsVector {
    let mut av = AcquisitionsVector::new(make_info(n_slices, 8, ny, 1, 2));
    for slice in (0..n_slices).rev() {
        for ky in 0..ny {
            av.append_acquisition(make_acquisition(
                slice,
                ky,
                (slice as u32) * 100 + ky as u32,
                2,
                8,
            ));
        }
    }
    av
}

/// One 8x8 single-channel slice of a 2D stack, 2 mm apart along z.
pub(crate) fn stack_image(slice: u16, contrast: u16, value: f32) -> ImageWrap {
    let mut im = Image::<Complex32>::new(8, 8, 1, 1);
    im.head.field_of_view = [8.0, 8.0, 2.0];
    im.head.read_dir = [1.0, 0.0, 0.0];
    im.head.phase_dir = [0.0, 1.0, 0.0];
    im.head.slice_dir = [0.0, 0.0, 1.0];
    im.head.slice = slice;
    im.head.contrast = contrast;
    im.head.position = [0.0, 0.0, -2.0 * slice as f32];
    im.data.fill(Complex32::new(value, 0.0));
    ImageWrap::Complex(im)
}
