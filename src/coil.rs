//! Coil images and coil sensitivity maps.
//!
//! Coil images are per-channel reconstructions of the calibration part of a
//! k-space dataset; sensitivity maps are derived from them by smoothing,
//! noise masking and normalisation. Maps multiply single-channel images up to
//! channel-resolved ones (`forward`) and combine channel-resolved images back
//! down (`backward`); `backward(forward(x))` reproduces `x` wherever the
//! noise mask is set.

use log::warn;
use ndarray::{Array3, Array4};
use num_complex::Complex32;

use crate::acquisition::AcquisitionFlag;
use crate::acquisitions::{AcquisitionData, AcquisitionsVector};
use crate::encoding::{CartesianFourierEncoding, FourierEncoding};
use crate::error::ContainerError;
use crate::header::Trajectory;
use crate::image::{Image, ImageWrap};
use crate::images::ImagesVector;
use crate::kspace::{KSpaceSubset, Tag};

// =====================================
// Coil images
// =====================================

/// Channel-resolved images of the calibration data, one per k-space subset.
#[derive(Debug, Clone, Default)]
pub struct CoilImagesVector {
    images: ImagesVector,
}

impl CoilImagesVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number(&self) -> usize {
        self.images.number()
    }

    pub fn images(&self) -> &ImagesVector {
        &self.images
    }

    pub fn image(&self, i: usize) -> Result<&ImageWrap, ContainerError> {
        self.images.image(i)
    }

    pub fn append(&mut self, image: ImageWrap) {
        self.images.append(image);
    }

    /// Reconstructs one channel-resolved image per subset of the calibration
    /// part of `ad`. Only Cartesian trajectories are supported; non-Cartesian
    /// data additionally requires a stored trajectory to be rejected cleanly.
    pub fn calculate<A: AcquisitionData>(&mut self, ad: &A) -> Result<(), ContainerError> {
        let traj = ad.trajectory_type()?;
        match traj {
            Trajectory::Cartesian => {}
            Trajectory::Other
            | Trajectory::Radial
            | Trajectory::GoldenAngle
            | Trajectory::Spiral => {
                if ad.trajectory_dimensions()? == 0 {
                    return Err(ContainerError::TrajectoryDimensionsMissing);
                }
                return Err(ContainerError::UnsupportedTrajectory(traj));
            }
            Trajectory::Epi => return Err(ContainerError::UnsupportedTrajectory(traj)),
        }

        let encoder = CartesianFourierEncoding;
        let calib = extract_calibration_data(ad)?;
        self.images.clear();
        self.images.set_meta_data(calib.info().clone())?;
        for idx_set in calib.kspace_order()? {
            let mut subset = AcquisitionsVector::default();
            calib.get_subset(&mut subset, &idx_set)?;
            let img = encoder.backward(&subset)?;
            self.images.append(ImageWrap::Complex(img));
        }
        Ok(())
    }
}

/// The calibration part of `ad`: for Cartesian data the acquisitions flagged
/// as calibration (sorted by time), or a copy of the whole dataset when no
/// such flags are present.
pub fn extract_calibration_data<A: AcquisitionData>(
    ad: &A,
) -> Result<AcquisitionsVector, ContainerError> {
    if ad.trajectory_type()? == Trajectory::Cartesian {
        let idx = ad.flagged_index(&[
            AcquisitionFlag::IsParallelCalibration,
            AcquisitionFlag::IsParallelCalibrationAndImaging,
        ])?;
        if !idx.is_empty() {
            let mut subset = AcquisitionsVector::default();
            ad.get_subset(&mut subset, &idx)?;
            subset.sort_by_time()?;
            return Ok(subset);
        }
        warn!("no calibration acquisitions found, using the whole dataset");
    }
    let mut calib = AcquisitionsVector::new(ad.info().clone());
    for i in 0..ad.number() {
        calib.append_acquisition(ad.acquisition(i)?.clone());
    }
    calib.set_sorted(ad.sorted());
    if calib.sorted() {
        calib.organise_kspace()?;
    }
    Ok(calib)
}

// =====================================
// Sensitivity maps
// =====================================

/// Coil sensitivity maps, one complex multi-channel map per coil image.
#[derive(Debug, Clone, Default)]
pub struct CoilSensitivitiesVector {
    images: ImagesVector,
    smoothness: u32,
}

impl CoilSensitivitiesVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn number(&self) -> usize {
        self.images.number()
    }

    pub fn images(&self) -> &ImagesVector {
        &self.images
    }

    pub fn smoothness(&self) -> u32 {
        self.smoothness
    }

    /// Number of masked smoothing rounds applied to the coil images before
    /// normalisation.
    pub fn set_smoothness(&mut self, smoothness: u32) {
        self.smoothness = smoothness;
    }

    /// Derives one sensitivity map per coil image.
    pub fn calculate(&mut self, ci: &CoilImagesVector) -> Result<(), ContainerError> {
        self.images.clear();
        for i in 0..ci.number() {
            let wrap = ci.image(i)?;
            let (nx, ny, nz, nc) = wrap.dims();
            let cm = Array4::from_shape_vec((nc, nz, ny, nx), wrap.values())
                .map_err(|_| ContainerError::InconsistentDimensions("coil image"))?;
            let csm = self.calculate_csm(&cm);
            let mut img = Image::<Complex32>::new(nx, ny, nz, nc);
            img.head = wrap.head().clone();
            img.data = csm;
            self.images.append(ImageWrap::Complex(img));
        }
        Ok(())
    }

    /// Coil images followed by map derivation in one step.
    pub fn calculate_from<A: AcquisitionData>(&mut self, ad: &A) -> Result<(), ContainerError> {
        let mut ci = CoilImagesVector::new();
        ci.calculate(ad)?;
        self.calculate(&ci)
    }

    /// Map derivation for one coil image block.
    ///
    /// The noise level is estimated as the largest deviation between the coil
    /// image and a thrice-smoothed copy over voxels where the smoothed image
    /// is locally flat; voxels whose combined magnitude stays below that
    /// level are masked out of the maps.
    fn calculate_csm(&self, cm: &Array4<Complex32>) -> Array4<Complex32> {
        let (nc, nz, ny, nx) = cm.dim();
        let mut cm0 = cm.clone();
        let img = combined_magnitude(&cm0);
        let max_im = img.iter().fold(0.0f32, |r, &t| r.max(t.abs()));
        let small_grad = max_im * 2.0 / (nx + ny) as f32;

        let mut smooth = cm0.clone();
        for _ in 0..3 {
            smoothen(&mut smooth, None, 1);
        }
        let noise = max_diff(&smooth, &cm0, small_grad);
        let mask = img.mapv(|t| t.abs() > noise);

        for _ in 0..self.smoothness {
            smoothen(&mut cm0, Some(&mask), 1);
        }
        let img = combined_magnitude(&cm0);

        let mut csm = Array4::from_elem((nc, nz, ny, nx), Complex32::new(0.0, 0.0));
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let r = img[[z, y, x]];
                    let s = if mask[[z, y, x]] && r != 0.0 { 1.0 / r } else { 0.0 };
                    for c in 0..nc {
                        csm[[c, z, y, x]] = cm0[[c, z, y, x]] * s;
                    }
                }
            }
        }
        csm
    }

    pub fn csm_image(&self, i: usize) -> Result<&Image<Complex32>, ContainerError> {
        match self.images.image(i)? {
            ImageWrap::Complex(im) => Ok(im),
            ImageWrap::Float(_) => Err(ContainerError::InconsistentDimensions("sensitivity map")),
        }
    }

    /// Map whose slice matches `tag` at contrast zero, searched cyclically
    /// from `offset`.
    pub fn csm_by_tag(&self, tag: &Tag, offset: usize) -> Result<&Image<Complex32>, ContainerError> {
        let n = self.images.number();
        if n == 0 {
            return Err(ContainerError::NoMatchingMap);
        }
        for k in 0..n {
            let i = (offset + k) % n;
            let im = self.csm_image(i)?;
            let tag_csm = KSpaceSubset::tag_from_image(&im.head);
            if tag_csm[1] == tag[1] && tag_csm[2] == 0 {
                return Ok(im);
            }
        }
        Err(ContainerError::NoMatchingMap)
    }

    /// Multiplies each single-channel image of `combined` by its matching
    /// map, producing channel-resolved images in `dst`.
    pub fn forward(
        &self,
        dst: &mut ImagesVector,
        combined: &ImagesVector,
    ) -> Result<(), ContainerError> {
        if combined.number() != self.images.number() {
            return Err(ContainerError::SizeMismatch {
                expected: self.images.number(),
                found: combined.number(),
            });
        }
        if !combined.check_dimension_consistency() || !self.images.check_dimension_consistency() {
            return Err(ContainerError::InconsistentDimensions("image"));
        }
        dst.clear();
        dst.set_meta_data(combined.info().clone())?;
        for i in 0..combined.number() {
            let src = combined.image(i)?;
            let (sx, sy, sz, sc) = src.dims();
            if sc != 1 {
                return Err(ContainerError::SourceNotSingleChannel);
            }
            let tag = KSpaceSubset::tag_from_image(src.head());
            let csm = self.csm_by_tag(&tag, i)?;
            let (cx, cy, cz, cc) = csm.dims();
            if (sx, sy, sz) != (cx, cy, cz) {
                return Err(ContainerError::InconsistentDimensions("image"));
            }
            let sv = src.values();
            let mut out = Image::<Complex32>::new(cx, cy, cz, cc);
            out.head = src.head().clone();
            out.head.channels = cc as u16;
            for c in 0..cc {
                for z in 0..cz {
                    for y in 0..cy {
                        for x in 0..cx {
                            let v = sv[(z * cy + y) * cx + x];
                            out.data[[c, z, y, x]] = v * csm.data[[c, z, y, x]];
                        }
                    }
                }
            }
            dst.append(ImageWrap::Complex(out));
        }
        Ok(())
    }

    /// Combines each channel-resolved image of `imgs` with the conjugated
    /// matching map, producing single-channel images in `dst`.
    pub fn backward(
        &self,
        dst: &mut ImagesVector,
        imgs: &ImagesVector,
    ) -> Result<(), ContainerError> {
        if imgs.number() != self.images.number() {
            return Err(ContainerError::SizeMismatch {
                expected: self.images.number(),
                found: imgs.number(),
            });
        }
        if !imgs.check_dimension_consistency() {
            return Err(ContainerError::InconsistentDimensions("image"));
        }
        dst.clear();
        dst.set_meta_data(imgs.info().clone())?;
        for i in 0..imgs.number() {
            let src = imgs.image(i)?;
            let tag = KSpaceSubset::tag_from_image(src.head());
            let csm = self.csm_by_tag(&tag, i)?;
            let (cx, cy, cz, cc) = csm.dims();
            if src.dims() != (cx, cy, cz, cc) {
                return Err(ContainerError::SizeMismatch {
                    expected: cx * cy * cz * cc,
                    found: src.num_elements(),
                });
            }
            let sv = src.values();
            let mut out = Image::<Complex32>::new(cx, cy, cz, 1);
            out.head = src.head().clone();
            out.head.channels = 1;
            for z in 0..cz {
                for y in 0..cy {
                    for x in 0..cx {
                        let mut acc = Complex32::new(0.0, 0.0);
                        for c in 0..cc {
                            acc += csm.data[[c, z, y, x]].conj()
                                * sv[((c * cz + z) * cy + y) * cx + x];
                        }
                        out.data[[0, z, y, x]] = acc;
                    }
                }
            }
            dst.append(ImageWrap::Complex(out));
        }
        Ok(())
    }
}

// =====================================
// Smoothing kernels
// =====================================

fn combined_magnitude(cm: &Array4<Complex32>) -> Array3<f32> {
    let (nc, nz, ny, nx) = cm.dim();
    let mut img = Array3::<f32>::zeros((nz, ny, nx));
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let mut s = 0.0f32;
                for c in 0..nc {
                    s += cm[[c, z, y, x]].norm_sqr();
                }
                img[[z, y, x]] = s.sqrt();
            }
        }
    }
    img
}

/// One in-plane smoothing pass: each voxel moves halfway towards the mean of
/// its `(2w+1)^2 - 1` neighbours. Out-of-bounds neighbours are skipped; with
/// a mask, masked-out voxels neither contribute nor change.
fn smoothen(u: &mut Array4<Complex32>, mask: Option<&Array3<bool>>, w: i64) {
    let (nc, nz, ny, nx) = u.dim();
    let mut v = u.clone();
    for c in 0..nc {
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    if let Some(m) = mask {
                        if !m[[z, y, x]] {
                            continue;
                        }
                    }
                    let mut n = 0u32;
                    let mut s = Complex32::new(0.0, 0.0);
                    for jy in -w..=w {
                        for jx in -w..=w {
                            if jx == 0 && jy == 0 {
                                continue;
                            }
                            let yy = y as i64 + jy;
                            let xx = x as i64 + jx;
                            if yy < 0 || yy >= ny as i64 || xx < 0 || xx >= nx as i64 {
                                continue;
                            }
                            let (yy, xx) = (yy as usize, xx as usize);
                            if let Some(m) = mask {
                                if !m[[z, yy, xx]] {
                                    continue;
                                }
                            }
                            n += 1;
                            s += u[[c, z, yy, xx]];
                        }
                    }
                    if n > 0 {
                        v[[c, z, y, x]] = (u[[c, z, y, x]] + s / n as f32) / 2.0;
                    }
                }
            }
        }
    }
    *u = v;
}

/// Largest deviation between `u` and `v` over interior voxels where the
/// in-plane central-difference gradient magnitude of `u` stays below
/// `small_grad`.
fn max_diff(u: &Array4<Complex32>, v: &Array4<Complex32>, small_grad: f32) -> f32 {
    let (nc, nz, ny, nx) = u.dim();
    let mut noise = 0.0f32;
    if ny < 3 || nx < 3 {
        return noise;
    }
    for c in 0..nc {
        for z in 0..nz {
            for y in 1..ny - 1 {
                for x in 1..nx - 1 {
                    let gx = (u[[c, z, y, x + 1]] - u[[c, z, y, x - 1]]).norm() / 2.0;
                    let gy = (u[[c, z, y + 1, x]] - u[[c, z, y - 1, x]]).norm() / 2.0;
                    if (gx * gx + gy * gy).sqrt() <= small_grad {
                        let d = (u[[c, z, y, x]] - v[[c, z, y, x]]).norm();
                        noise = noise.max(d);
                    }
                }
            }
        }
    }
    noise
}
