//! Fourier encoding between k-space acquisitions and image space.
//!
//! The centred convention is used throughout: k-space grids and images both
//! keep their centre in the middle of the array, so every 1D transform is an
//! index shift, an FFT and a shift back. The inverse transform carries the
//! `1/n` normalisation, which makes `backward` the exact inverse of
//! `forward` for matching grids.

use ndarray::{Array4, Axis};
use num_complex::Complex32;
use rustfft::FftPlanner;

use crate::acquisitions::{AcquisitionData, AcquisitionsVector};
use crate::error::ContainerError;
use crate::image::Image;

/// Transform strategy between a k-space container and one image.
pub trait FourierEncoding {
    /// Reconstructs one image from the acquisitions of a k-space subset.
    fn backward(&self, ad: &AcquisitionsVector) -> Result<Image<Complex32>, ContainerError>;

    /// Projects an image onto the acquisitions of `ad`, overwriting their
    /// sample data in place.
    fn forward(&self, img: &Image<Complex32>, ad: &mut AcquisitionsVector)
        -> Result<(), ContainerError>;
}

/// Encoding for Cartesian trajectories: acquisitions are gridded by their
/// k-space step counters and transformed with FFTs.
pub struct CartesianFourierEncoding;

fn transform_axis(data: &mut Array4<Complex32>, axis: Axis, inverse: bool) {
    let len = data.len_of(axis);
    if len < 2 {
        return;
    }
    let mut planner = FftPlanner::<f32>::new();
    let fft = if inverse {
        planner.plan_fft_inverse(len)
    } else {
        planner.plan_fft_forward(len)
    };
    let half = len / 2;
    for mut lane in data.lanes_mut(axis) {
        let mut buf: Vec<Complex32> = lane.iter().copied().collect();
        buf.rotate_left(half);
        fft.process(&mut buf);
        buf.rotate_left(len - half);
        if inverse {
            let scale = 1.0 / len as f32;
            for v in &mut buf {
                *v *= scale;
            }
        }
        for (dst, src) in lane.iter_mut().zip(buf) {
            *dst = src;
        }
    }
}

/// Centred 3D (i)FFT over the x, y and z axes of a `[c, z, y, x]` block.
fn transform_volume(data: &mut Array4<Complex32>, inverse: bool) {
    transform_axis(data, Axis(3), inverse);
    transform_axis(data, Axis(2), inverse);
    transform_axis(data, Axis(1), inverse);
}

impl FourierEncoding for CartesianFourierEncoding {
    fn backward(&self, ad: &AcquisitionsVector) -> Result<Image<Complex32>, ContainerError> {
        if ad.is_empty() {
            return Err(ContainerError::EmptyContainer);
        }
        let enc = ad.info().single_encoding()?.clone();
        let (samples, channels, _) = ad.acquisition_dimensions()?;
        let ny = enc.encoded_space.matrix_size[1] as usize;
        let nz = enc.encoded_space.matrix_size[2] as usize;

        let mut grid =
            Array4::from_elem((channels, nz, ny, samples), Complex32::new(0.0, 0.0));
        for i in 0..ad.number() {
            let acq = ad.acquisition(i)?;
            if acq.to_be_ignored() {
                continue;
            }
            let ky = acq.head.idx.kspace_encode_step_1 as usize;
            let kz = acq.head.idx.kspace_encode_step_2 as usize;
            if ky >= ny || kz >= nz {
                return Err(ContainerError::CountersOutsideLimits);
            }
            for c in 0..channels {
                for s in 0..samples {
                    grid[[c, kz, ky, s]] = acq.data[[c, s]];
                }
            }
        }
        transform_volume(&mut grid, true);

        // oversampled readouts are cropped to the reconstruction matrix
        let nx = enc.recon_space.matrix_size[0] as usize;
        if nx > samples {
            return Err(ContainerError::InconsistentDimensions("readout"));
        }
        let x0 = (samples - nx) / 2;
        let mut img = Image::<Complex32>::new(nx, ny, nz, channels);
        img.head.field_of_view = enc.recon_space.field_of_view_mm;
        img.data
            .assign(&grid.slice(ndarray::s![.., .., .., x0..x0 + nx]));
        if let Ok(acq) = ad.acquisition(0) {
            img.head.match_to_acquisition(acq);
        }
        Ok(img)
    }

    fn forward(
        &self,
        img: &Image<Complex32>,
        ad: &mut AcquisitionsVector,
    ) -> Result<(), ContainerError> {
        if ad.is_empty() {
            return Err(ContainerError::EmptyContainer);
        }
        let (samples, channels, _) = ad.acquisition_dimensions()?;
        let (nx, ny, nz, nc) = img.dims();
        if nc != channels || nx > samples {
            return Err(ContainerError::InconsistentDimensions("image"));
        }

        let mut grid = img.data.clone();
        transform_volume(&mut grid, false);
        // embed the readout centred in the (possibly oversampled) sample axis
        let x0 = (samples - nx) / 2;

        for i in 0..ad.number() {
            let slot = ad.logical_index(i)?;
            if ad.acquisition_at(slot)?.to_be_ignored() {
                continue;
            }
            let idx = ad.acquisition_at(slot)?.head.idx;
            let ky = idx.kspace_encode_step_1 as usize;
            let kz = idx.kspace_encode_step_2 as usize;
            if ky >= ny || kz >= nz {
                return Err(ContainerError::CountersOutsideLimits);
            }
            let acq = ad.acquisition_at_mut(slot)?;
            acq.data.fill(Complex32::new(0.0, 0.0));
            for c in 0..channels {
                for x in 0..nx {
                    acq.data[[c, x0 + x]] = grid[[c, kz, ky, x]];
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::sample_acquisitions;

    #[test]
    fn forward_then_backward_restores_the_image() {
        let mut ad = sample_acquisitions(1, 4);
        ad.sort_by_time().unwrap();

        let mut img = Image::<Complex32>::new(8, 4, 1, 2);
        for (i, v) in img.data.iter_mut().enumerate() {
            *v = Complex32::new(i as f32 * 0.25, (i % 3) as f32);
        }
        let reference = img.clone();

        let enc = CartesianFourierEncoding;
        enc.forward(&img, &mut ad).unwrap();
        let back = enc.backward(&ad).unwrap();

        assert_eq!(back.dims(), (8, 4, 1, 2));
        for (a, b) in back.data.iter().zip(reference.data.iter()) {
            assert!((a - b).norm() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn backward_of_a_uniform_kspace_line_is_an_impulse() {
        // a single non-zero sample at the k-space centre gives a flat image
        let mut ad = sample_acquisitions(1, 4);
        ad.sort_by_time().unwrap();
        let n = ad.number();
        for i in 0..n {
            let ky = ad.acquisition(i).unwrap().head.idx.kspace_encode_step_1;
            let slot = ad.logical_index(i).unwrap();
            let acq = ad.acquisition_at_mut(slot).unwrap();
            acq.data.fill(Complex32::new(0.0, 0.0));
            if ky == 2 {
                // ky = ny/2 is the centre row
                acq.data[[0, 4]] = Complex32::new(32.0, 0.0);
            }
        }

        let img = CartesianFourierEncoding.backward(&ad).unwrap();
        let (nx, ny, _, _) = img.dims();
        let flat = 32.0 / (nx * ny) as f32;
        for y in 0..ny {
            for x in 0..nx {
                let v = img.data[[0, 0, y, x]];
                assert!((v.re - flat).abs() < 1e-4);
                assert!(v.im.abs() < 1e-4);
            }
        }
    }

    #[test]
    fn empty_containers_cannot_be_transformed() {
        let ad = AcquisitionsVector::default();
        assert!(matches!(
            CartesianFourierEncoding.backward(&ad),
            Err(ContainerError::EmptyContainer)
        ));
    }
}
