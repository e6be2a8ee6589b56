//! A single readout: its header, complex sample matrix and optional trajectory.

use ndarray::Array2;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

// =====================================
// Flags and counters
// =====================================

/// Acquisition flags, numbered from 1 as in the raw-data standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AcquisitionFlag {
    FirstInEncodeStep1 = 1,
    LastInEncodeStep1 = 2,
    FirstInEncodeStep2 = 3,
    LastInEncodeStep2 = 4,
    FirstInAverage = 5,
    LastInAverage = 6,
    FirstInSlice = 7,
    LastInSlice = 8,
    FirstInContrast = 9,
    LastInContrast = 10,
    FirstInPhase = 11,
    LastInPhase = 12,
    FirstInRepetition = 13,
    LastInRepetition = 14,
    FirstInSet = 15,
    LastInSet = 16,
    FirstInSegment = 17,
    LastInSegment = 18,
    IsNoiseMeasurement = 19,
    IsParallelCalibration = 20,
    IsParallelCalibrationAndImaging = 21,
    IsReverse = 22,
    IsNavigationData = 23,
    IsPhasecorrData = 24,
    LastInMeasurement = 25,
}

impl AcquisitionFlag {
    /// Bit mask of the flag within the 64-bit flag word.
    pub fn bit(self) -> u64 {
        1u64 << (self as u8 - 1)
    }
}

/// Position of a readout within the encoded space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingCounters {
    pub kspace_encode_step_1: u16,
    pub kspace_encode_step_2: u16,
    pub average: u16,
    pub slice: u16,
    pub contrast: u16,
    pub phase: u16,
    pub repetition: u16,
    pub set: u16,
    pub segment: u16,
    pub user: [u16; 8],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionHeader {
    pub version: u16,
    pub flags: u64,
    pub measurement_uid: u32,
    pub scan_counter: u32,
    pub acquisition_time_stamp: u32,
    pub physiology_time_stamp: [u32; 3],
    pub center_sample: u16,
    pub sample_time_us: f32,
    pub position: [f32; 3],
    pub read_dir: [f32; 3],
    pub phase_dir: [f32; 3],
    pub slice_dir: [f32; 3],
    pub patient_table_position: [f32; 3],
    pub idx: EncodingCounters,
    pub user_int: [i32; 8],
    pub user_float: [f32; 8],
}

// =====================================
// Acquisition
// =====================================

/// One readout. `data` is laid out `[channels, samples]`; the optional
/// trajectory is `[samples, trajectory dimensions]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    pub head: AcquisitionHeader,
    pub data: Array2<Complex32>,
    pub traj: Option<Array2<f32>>,
}

impl Acquisition {
    /// Zero-filled acquisition with a default header.
    pub fn new(channels: usize, samples: usize) -> Self {
        Self {
            head: AcquisitionHeader::default(),
            data: Array2::from_elem((channels, samples), Complex32::new(0.0, 0.0)),
            traj: None,
        }
    }

    pub fn active_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn number_of_samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn flag_set(&self, flag: AcquisitionFlag) -> bool {
        self.head.flags & flag.bit() != 0
    }

    pub fn set_flag(&mut self, flag: AcquisitionFlag) {
        self.head.flags |= flag.bit();
    }

    pub fn clear_flag(&mut self, flag: AcquisitionFlag) {
        self.head.flags &= !flag.bit();
    }

    /// Whether this readout carries no image content and is skipped by
    /// sorting, algebra and reconstruction.
    ///
    /// Calibration, calibration-and-imaging, reversed and last-in-measurement
    /// readouts are always kept; anything else flagged at or above the noise
    /// bit is ignored.
    pub fn to_be_ignored(&self) -> bool {
        !self.flag_set(AcquisitionFlag::IsParallelCalibration)
            && !self.flag_set(AcquisitionFlag::IsParallelCalibrationAndImaging)
            && !self.flag_set(AcquisitionFlag::LastInMeasurement)
            && !self.flag_set(AcquisitionFlag::IsReverse)
            && self.head.flags >= AcquisitionFlag::IsNoiseMeasurement.bit()
    }

    pub fn trajectory_dimensions(&self) -> usize {
        self.traj.as_ref().map_or(0, Array2::ncols)
    }

    pub fn set_trajectory(&mut self, traj: Array2<f32>) {
        self.traj = Some(traj);
    }

    // ---- elementwise kernels, `y` receives the result ----

    pub fn binary_op(x: &Acquisition, y: &mut Acquisition, f: fn(Complex32, Complex32) -> Complex32) {
        for (px, py) in x.data.iter().zip(y.data.iter_mut()) {
            *py = f(*px, *py);
        }
    }

    pub fn semibinary_op(
        x: &Acquisition,
        y: &mut Acquisition,
        s: Complex32,
        f: fn(Complex32, Complex32) -> Complex32,
    ) {
        for (px, py) in x.data.iter().zip(y.data.iter_mut()) {
            *py = f(*px, s);
        }
    }

    pub fn unary_op(x: &Acquisition, y: &mut Acquisition, f: fn(Complex32) -> Complex32) {
        for (px, py) in x.data.iter().zip(y.data.iter_mut()) {
            *py = f(*px);
        }
    }

    /// `y = a*x + b*y`; with `b == 0` stale `y` values are never read.
    pub fn axpby(a: Complex32, x: &Acquisition, b: Complex32, y: &mut Acquisition) {
        let zero = Complex32::new(0.0, 0.0);
        for (px, py) in x.data.iter().zip(y.data.iter_mut()) {
            *py = if b == zero { a * px } else { a * px + b * *py };
        }
    }

    /// `y = a.*x + b.*y` with acquisition-valued coefficients.
    pub fn xapyb(x: &Acquisition, a: &Acquisition, y: &mut Acquisition, b: &Acquisition) {
        for (((px, pa), pb), py) in x
            .data
            .iter()
            .zip(a.data.iter())
            .zip(b.data.iter())
            .zip(y.data.iter_mut())
        {
            *py = *pa * px + *pb * *py;
        }
    }

    /// `y = a*x + b.*y` with a scalar `a` and an acquisition-valued `b`.
    pub fn xapyb_mixed(x: &Acquisition, a: Complex32, y: &mut Acquisition, b: &Acquisition) {
        for ((px, pb), py) in x.data.iter().zip(b.data.iter()).zip(y.data.iter_mut()) {
            *py = a * px + *pb * *py;
        }
    }

    pub fn conjugate(&mut self) {
        for v in self.data.iter_mut() {
            *v = v.conj();
        }
    }

    /// Inner product, conjugate-linear in `other`.
    pub fn dot(&self, other: &Acquisition) -> Complex32 {
        let mut z = Complex32::new(0.0, 0.0);
        for (pa, pb) in self.data.iter().zip(other.data.iter()) {
            z += pb.conj() * pa;
        }
        z
    }

    pub fn total(&self) -> Complex32 {
        let mut z = Complex32::new(0.0, 0.0);
        for v in self.data.iter() {
            z += v;
        }
        z
    }

    /// Value with the largest real part.
    pub fn max_value(&self) -> Complex32 {
        let mut best = Complex32::new(0.0, 0.0);
        for v in self.data.iter() {
            if v.re > best.re {
                best = *v;
            }
        }
        best
    }

    pub fn norm_squared(&self) -> f32 {
        self.data.iter().map(|v| v.norm_sqr()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flagged(flags: &[AcquisitionFlag]) -> Acquisition {
        let mut acq = Acquisition::new(1, 4);
        for &f in flags {
            acq.set_flag(f);
        }
        acq
    }

    #[test]
    fn flag_bits_match_the_standard_numbering() {
        assert_eq!(AcquisitionFlag::FirstInEncodeStep1.bit(), 1);
        assert_eq!(AcquisitionFlag::IsNoiseMeasurement.bit(), 1 << 18);
        assert_eq!(AcquisitionFlag::LastInMeasurement.bit(), 1 << 24);
    }

    #[test]
    fn ignore_filter_keeps_image_content() {
        use AcquisitionFlag::*;
        assert!(flagged(&[IsNoiseMeasurement]).to_be_ignored());
        assert!(flagged(&[IsNavigationData]).to_be_ignored());
        assert!(flagged(&[IsPhasecorrData]).to_be_ignored());
        // low flags alone never trip the filter
        assert!(!flagged(&[FirstInSlice, LastInEncodeStep1]).to_be_ignored());
        assert!(!flagged(&[]).to_be_ignored());
        // exempt flags win even combined with high bits
        assert!(!flagged(&[IsParallelCalibration]).to_be_ignored());
        assert!(!flagged(&[IsParallelCalibrationAndImaging, IsNoiseMeasurement]).to_be_ignored());
        assert!(!flagged(&[IsReverse]).to_be_ignored());
        assert!(!flagged(&[LastInMeasurement]).to_be_ignored());
    }

    #[test]
    fn axpby_skips_stale_destination_when_b_is_zero() {
        let mut x = Acquisition::new(1, 2);
        x.data[[0, 0]] = Complex32::new(1.0, 0.0);
        x.data[[0, 1]] = Complex32::new(2.0, 0.0);
        let mut y = Acquisition::new(1, 2);
        y.data[[0, 0]] = Complex32::new(f32::NAN, f32::NAN);

        Acquisition::axpby(Complex32::new(3.0, 0.0), &x, Complex32::new(0.0, 0.0), &mut y);
        assert_eq!(y.data[[0, 0]], Complex32::new(3.0, 0.0));
        assert_eq!(y.data[[0, 1]], Complex32::new(6.0, 0.0));
    }

    #[test]
    fn dot_is_conjugate_linear_in_the_second_argument() {
        let mut a = Acquisition::new(1, 1);
        a.data[[0, 0]] = Complex32::new(0.0, 1.0);
        let mut b = Acquisition::new(1, 1);
        b.data[[0, 0]] = Complex32::new(0.0, 1.0);
        // <i, i> = i * conj(i) = 1
        assert_eq!(a.dot(&b), Complex32::new(1.0, 0.0));
    }
}
