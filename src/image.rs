//! Reconstructed images: a typed voxel block plus its header, and a wrapper
//! that erases the voxel type.

use ndarray::Array4;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

use crate::acquisition::Acquisition;
use crate::error::ContainerError;

/// Per-image metadata: grid, placement and the encoding counters of the
/// k-space subset the image was reconstructed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageHeader {
    pub matrix_size: [u16; 3],
    pub field_of_view: [f32; 3],
    pub channels: u16,
    pub position: [f32; 3],
    pub read_dir: [f32; 3],
    pub phase_dir: [f32; 3],
    pub slice_dir: [f32; 3],
    pub patient_table_position: [f32; 3],
    pub average: u16,
    pub slice: u16,
    pub contrast: u16,
    pub phase: u16,
    pub repetition: u16,
    pub set: u16,
    pub acquisition_time_stamp: u32,
    pub user_int: [i32; 8],
    pub user_float: [f32; 8],
}

impl ImageHeader {
    /// Copies placement and counters over from an acquisition of the subset
    /// this image reconstructs.
    pub fn match_to_acquisition(&mut self, acq: &Acquisition) {
        let head = &acq.head;
        self.position = head.position;
        self.read_dir = head.read_dir;
        self.phase_dir = head.phase_dir;
        self.slice_dir = head.slice_dir;
        self.patient_table_position = head.patient_table_position;
        self.average = head.idx.average;
        self.slice = head.idx.slice;
        self.contrast = head.idx.contrast;
        self.phase = head.idx.phase;
        self.repetition = head.idx.repetition;
        self.set = head.idx.set;
        self.acquisition_time_stamp = head.acquisition_time_stamp;
    }

    /// Projection of the image position onto its slice direction.
    pub fn slice_projection(&self) -> f32 {
        self.position[0] * self.slice_dir[0]
            + self.position[1] * self.slice_dir[1]
            + self.position[2] * self.slice_dir[2]
    }
}

/// A voxel block with its header. Data is laid out `[channels, z, y, x]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image<T> {
    pub head: ImageHeader,
    pub data: Array4<T>,
}

impl<T: Clone + Default> Image<T> {
    pub fn new(nx: usize, ny: usize, nz: usize, nc: usize) -> Self {
        let mut head = ImageHeader::default();
        head.matrix_size = [nx as u16, ny as u16, nz as u16];
        head.channels = nc as u16;
        Self {
            head,
            data: Array4::from_elem((nc, nz, ny, nx), T::default()),
        }
    }
}

impl<T> Image<T> {
    /// `(nx, ny, nz, channels)`.
    pub fn dims(&self) -> (usize, usize, usize, usize) {
        let (c, z, y, x) = self.data.dim();
        (x, y, z, c)
    }
}

// =====================================
// Type-erased image
// =====================================

/// An image of either voxel type. Algebra reads both variants as complex
/// values; writing into the real variant keeps the real part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImageWrap {
    Float(Image<f32>),
    Complex(Image<Complex32>),
}

impl ImageWrap {
    pub fn head(&self) -> &ImageHeader {
        match self {
            Self::Float(im) => &im.head,
            Self::Complex(im) => &im.head,
        }
    }

    pub fn head_mut(&mut self) -> &mut ImageHeader {
        match self {
            Self::Float(im) => &mut im.head,
            Self::Complex(im) => &mut im.head,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, Self::Complex(_))
    }

    /// `(nx, ny, nz, channels)`.
    pub fn dims(&self) -> (usize, usize, usize, usize) {
        match self {
            Self::Float(im) => im.dims(),
            Self::Complex(im) => im.dims(),
        }
    }

    pub fn num_elements(&self) -> usize {
        match self {
            Self::Float(im) => im.data.len(),
            Self::Complex(im) => im.data.len(),
        }
    }

    /// All voxel values as complex numbers, in storage order.
    pub fn values(&self) -> Vec<Complex32> {
        match self {
            Self::Float(im) => im.data.iter().map(|&v| Complex32::new(v, 0.0)).collect(),
            Self::Complex(im) => im.data.iter().copied().collect(),
        }
    }

    /// Overwrites all voxels in storage order; the real variant keeps the
    /// real part of each value.
    pub fn set_values(&mut self, vals: &[Complex32]) -> Result<(), ContainerError> {
        if vals.len() != self.num_elements() {
            return Err(ContainerError::SizeMismatch {
                expected: self.num_elements(),
                found: vals.len(),
            });
        }
        match self {
            Self::Float(im) => {
                for (dst, v) in im.data.iter_mut().zip(vals) {
                    *dst = v.re;
                }
            }
            Self::Complex(im) => {
                for (dst, v) in im.data.iter_mut().zip(vals) {
                    *dst = *v;
                }
            }
        }
        Ok(())
    }

    pub fn real_values(&self) -> Vec<f32> {
        match self {
            Self::Float(im) => im.data.iter().copied().collect(),
            Self::Complex(im) => im.data.iter().map(|v| v.re).collect(),
        }
    }

    pub fn fill(&mut self, value: f32) {
        match self {
            Self::Float(im) => im.data.fill(value),
            Self::Complex(im) => im.data.fill(Complex32::new(value, 0.0)),
        }
    }

    pub fn scale(&mut self, factor: f32) {
        match self {
            Self::Float(im) => im.data.mapv_inplace(|v| v * factor),
            Self::Complex(im) => im.data.mapv_inplace(|v| v * factor),
        }
    }

    pub fn conjugate(&mut self) {
        if let Self::Complex(im) = self {
            im.data.mapv_inplace(|v| v.conj());
        }
    }

    /// Magnitude image, always real-valued.
    pub fn to_abs(&self) -> ImageWrap {
        let mut out = Image::<f32>::new(0, 0, 0, 0);
        out.head = self.head().clone();
        match self {
            Self::Float(im) => out.data = im.data.mapv(f32::abs),
            Self::Complex(im) => out.data = im.data.mapv(|v| v.norm()),
        }
        Self::Float(out)
    }

    /// Real part, always real-valued.
    pub fn to_real(&self) -> ImageWrap {
        let mut out = Image::<f32>::new(0, 0, 0, 0);
        out.head = self.head().clone();
        match self {
            Self::Float(im) => out.data = im.data.clone(),
            Self::Complex(im) => out.data = im.data.mapv(|v| v.re),
        }
        Self::Float(out)
    }

    fn check_size(&self, other: &ImageWrap) -> Result<(), ContainerError> {
        if self.num_elements() != other.num_elements() {
            return Err(ContainerError::SizeMismatch {
                expected: self.num_elements(),
                found: other.num_elements(),
            });
        }
        Ok(())
    }

    // ---- elementwise kernels, `self` receives the result ----

    pub fn binary_op(
        &mut self,
        x: &ImageWrap,
        y: &ImageWrap,
        f: fn(Complex32, Complex32) -> Complex32,
    ) -> Result<(), ContainerError> {
        self.check_size(x)?;
        self.check_size(y)?;
        let vx = x.values();
        let vy = y.values();
        let out: Vec<Complex32> = vx.iter().zip(&vy).map(|(&a, &b)| f(a, b)).collect();
        self.set_values(&out)
    }

    pub fn semibinary_op(
        &mut self,
        x: &ImageWrap,
        s: Complex32,
        f: fn(Complex32, Complex32) -> Complex32,
    ) -> Result<(), ContainerError> {
        self.check_size(x)?;
        let out: Vec<Complex32> = x.values().into_iter().map(|a| f(a, s)).collect();
        self.set_values(&out)
    }

    pub fn unary_op(
        &mut self,
        x: &ImageWrap,
        f: fn(Complex32) -> Complex32,
    ) -> Result<(), ContainerError> {
        self.check_size(x)?;
        let out: Vec<Complex32> = x.values().into_iter().map(f).collect();
        self.set_values(&out)
    }

    /// `self = a*x + b*y`; with `b == 0` the values of `y` are never read.
    pub fn axpby(
        &mut self,
        a: Complex32,
        x: &ImageWrap,
        b: Complex32,
        y: &ImageWrap,
    ) -> Result<(), ContainerError> {
        self.check_size(x)?;
        let zero = Complex32::new(0.0, 0.0);
        let out: Vec<Complex32> = if b == zero {
            x.values().into_iter().map(|v| a * v).collect()
        } else {
            self.check_size(y)?;
            let vx = x.values();
            let vy = y.values();
            vx.iter().zip(&vy).map(|(&u, &v)| a * u + b * v).collect()
        };
        self.set_values(&out)
    }

    /// `self = a.*x + b.*y` with image-valued coefficients.
    pub fn xapyb_wrap(
        &mut self,
        x: &ImageWrap,
        a: &ImageWrap,
        y: &ImageWrap,
        b: &ImageWrap,
    ) -> Result<(), ContainerError> {
        self.check_size(x)?;
        self.check_size(a)?;
        self.check_size(y)?;
        self.check_size(b)?;
        let (vx, va, vy, vb) = (x.values(), a.values(), y.values(), b.values());
        let out: Vec<Complex32> = (0..vx.len())
            .map(|i| va[i] * vx[i] + vb[i] * vy[i])
            .collect();
        self.set_values(&out)
    }

    /// `self = a*x + b.*y` with a scalar `a` and an image-valued `b`.
    pub fn xapyb_mixed(
        &mut self,
        x: &ImageWrap,
        a: Complex32,
        y: &ImageWrap,
        b: &ImageWrap,
    ) -> Result<(), ContainerError> {
        self.check_size(x)?;
        self.check_size(y)?;
        self.check_size(b)?;
        let (vx, vy, vb) = (x.values(), y.values(), b.values());
        let out: Vec<Complex32> = (0..vx.len())
            .map(|i| a * vx[i] + vb[i] * vy[i])
            .collect();
        self.set_values(&out)
    }

    // ---- reductions ----

    /// Inner product, conjugate-linear in `other`.
    pub fn dot(&self, other: &ImageWrap) -> Result<Complex32, ContainerError> {
        self.check_size(other)?;
        let mut z = Complex32::new(0.0, 0.0);
        for (a, b) in self.values().into_iter().zip(other.values()) {
            z += b.conj() * a;
        }
        Ok(z)
    }

    pub fn total(&self) -> Complex32 {
        let mut z = Complex32::new(0.0, 0.0);
        for v in self.values() {
            z += v;
        }
        z
    }

    /// Value with the largest real part.
    pub fn max_value(&self) -> Complex32 {
        let mut best = Complex32::new(0.0, 0.0);
        for v in self.values() {
            if v.re > best.re {
                best = v;
            }
        }
        best
    }

    pub fn norm_squared(&self) -> f32 {
        match self {
            Self::Float(im) => im.data.iter().map(|v| v * v).sum(),
            Self::Complex(im) => im.data.iter().map(|v| v.norm_sqr()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complex_wrap(values: &[f32]) -> ImageWrap {
        let mut im = Image::<Complex32>::new(values.len(), 1, 1, 1);
        for (dst, &v) in im.data.iter_mut().zip(values) {
            *dst = Complex32::new(v, 0.0);
        }
        ImageWrap::Complex(im)
    }

    #[test]
    fn dims_follow_storage_order() {
        let im = Image::<Complex32>::new(8, 4, 2, 3);
        assert_eq!(im.dims(), (8, 4, 2, 3));
        assert_eq!(im.data.dim(), (3, 2, 4, 8));
        assert_eq!(im.head.matrix_size, [8, 4, 2]);
        assert_eq!(im.head.channels, 3);
    }

    #[test]
    fn mixed_variant_algebra_goes_through_complex_values() {
        let x = complex_wrap(&[1.0, 2.0, 3.0]);
        let mut y = Image::<f32>::new(3, 1, 1, 1);
        y.data.fill(10.0);
        let mut dest = ImageWrap::Float(y);
        let y = dest.clone();

        dest.binary_op(&x, &y, |a, b| a + b).unwrap();
        assert_eq!(dest.real_values(), vec![11.0, 12.0, 13.0]);
    }

    #[test]
    fn axpby_with_zero_b_ignores_stale_values() {
        let x = complex_wrap(&[1.0, 2.0]);
        let y = complex_wrap(&[f32::NAN, f32::NAN]);
        let mut dest = complex_wrap(&[0.0, 0.0]);
        dest.axpby(Complex32::new(2.0, 0.0), &x, Complex32::new(0.0, 0.0), &y)
            .unwrap();
        assert_eq!(dest.values(), vec![Complex32::new(2.0, 0.0), Complex32::new(4.0, 0.0)]);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let x = complex_wrap(&[1.0, 2.0]);
        let y = complex_wrap(&[1.0, 2.0, 3.0]);
        let mut dest = x.clone();
        assert!(matches!(
            dest.binary_op(&x, &y, |a, _| a),
            Err(ContainerError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn magnitude_and_real_part() {
        let mut im = Image::<Complex32>::new(1, 1, 1, 1);
        im.data[[0, 0, 0, 0]] = Complex32::new(3.0, 4.0);
        let wrap = ImageWrap::Complex(im);
        assert_eq!(wrap.to_abs().real_values(), vec![5.0]);
        assert_eq!(wrap.to_real().real_values(), vec![3.0]);
        assert!((wrap.norm_squared() - 25.0).abs() < 1e-5);
    }
}
