//! The image container: reconstruction-ordered images, their algebra and the
//! derived voxel-grid geometry.

use log::warn;
use num_complex::Complex32;

use crate::acquisitions::{AcquisitionData, AcquisitionsVector};
use crate::algebra;
use crate::error::{ContainerError, GeometryError, HeaderError};
use crate::geometry::{can_reorient, VoxelGridGeometry};
use crate::header::AcquisitionsInfo;
use crate::image::{Image, ImageWrap};

/// Container of reconstructed images.
///
/// Sorting physically reorders the images by descending slice projection,
/// then contrast, then repetition; the geometry of the resulting stack is
/// derived from the image headers and kept alongside.
#[derive(Debug, Clone, Default)]
pub struct ImagesVector {
    images: Vec<ImageWrap>,
    info: AcquisitionsInfo,
    sorted: bool,
    geom: Option<VoxelGridGeometry>,
}

impl ImagesVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// One complex image per k-space subset of `ad`, zero-filled, with the
    /// recon-space grid of the header and placement matched to the subset's
    /// first acquisition. With `coil_resolved` the images carry one channel
    /// per receiver channel, otherwise a single channel.
    pub fn from_acquisitions<A: AcquisitionData>(
        ad: &A,
        coil_resolved: bool,
    ) -> Result<Self, ContainerError> {
        let header = ad.info().header()?;
        let enc = header.single_encoding()?;
        let nc = if coil_resolved {
            header
                .receiver_channels
                .ok_or(HeaderError::MissingReceiverChannels)? as usize
        } else {
            1
        };
        let matrix = enc.recon_space.matrix_size;
        let fov = enc.recon_space.field_of_view_mm;
        let (nx, ny, nz) = (matrix[0] as usize, matrix[1] as usize, matrix[2] as usize);

        let mut iv = Self::default();
        for idx_set in ad.kspace_order()? {
            let mut img = Image::<Complex32>::new(nx, ny, nz, nc);
            img.head.field_of_view = fov;
            let mut subset = AcquisitionsVector::default();
            ad.get_subset(&mut subset, &idx_set)?;
            if let Ok(acq) = subset.acquisition(0) {
                img.head.match_to_acquisition(acq);
            }
            iv.append(ImageWrap::Complex(img));
        }
        iv.set_meta_data(ad.info().clone())?;
        Ok(iv)
    }

    pub fn number(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn sorted(&self) -> bool {
        self.sorted
    }

    pub fn image(&self, i: usize) -> Result<&ImageWrap, ContainerError> {
        let len = self.images.len();
        self.images
            .get(i)
            .ok_or(ContainerError::IndexOutOfRange { index: i, len })
    }

    pub fn image_mut(&mut self, i: usize) -> Result<&mut ImageWrap, ContainerError> {
        let len = self.images.len();
        self.images
            .get_mut(i)
            .ok_or(ContainerError::IndexOutOfRange { index: i, len })
    }

    pub fn append(&mut self, image: ImageWrap) {
        self.images.push(image);
        self.sorted = false;
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.sorted = false;
        self.geom = None;
    }

    pub fn info(&self) -> &AcquisitionsInfo {
        &self.info
    }

    /// Attaches acquisition metadata and rederives the geometry.
    pub fn set_meta_data(&mut self, info: AcquisitionsInfo) -> Result<(), GeometryError> {
        self.info = info;
        self.set_up_geom_info()
    }

    pub fn geom_info(&self) -> Option<&VoxelGridGeometry> {
        self.geom.as_ref()
    }

    /// `(nx, ny, nz, channels)` of image `i`.
    pub fn image_dimensions(&self, i: usize) -> Result<(usize, usize, usize, usize), ContainerError> {
        Ok(self.image(i)?.dims())
    }

    /// Whether every image shares the dimensions of the first one.
    pub fn check_dimension_consistency(&self) -> bool {
        match self.images.first() {
            None => true,
            Some(first) => {
                let dims = first.dims();
                self.images.iter().all(|w| w.dims() == dims)
            }
        }
    }

    /// `(nx, ny, nz, channels)` common to every image.
    pub fn dimensions(&self) -> Result<(usize, usize, usize, usize), ContainerError> {
        if !self.check_dimension_consistency() {
            return Err(ContainerError::InconsistentDimensions("image"));
        }
        self.image_dimensions(0)
    }

    /// True when the container holds complex pixels. Empty containers count
    /// as complex, matching what `from_acquisitions` produces.
    pub fn is_complex(&self) -> bool {
        self.images.first().is_none_or(ImageWrap::is_complex)
    }

    // =====================================
    // Sorting and geometry
    // =====================================

    /// Stable physical reorder by descending slice projection, then
    /// contrast, then repetition.
    pub fn sort(&mut self) {
        let keys: Vec<(f32, u16, u16)> = self
            .images
            .iter()
            .map(|w| {
                let h = w.head();
                (-h.slice_projection(), h.contrast, h.repetition)
            })
            .collect();
        let mut order: Vec<usize> = (0..self.images.len()).collect();
        order.sort_by(|&i, &j| {
            keys[i]
                .0
                .total_cmp(&keys[j].0)
                .then(keys[i].1.cmp(&keys[j].1))
                .then(keys[i].2.cmp(&keys[j].2))
        });
        let images: Vec<ImageWrap> = order.iter().map(|&i| self.images[i].clone()).collect();
        self.images = images;
        self.sorted = true;
    }

    /// Derives the voxel-grid geometry from the image headers.
    ///
    /// Irregular inputs (non-unit or varying directions, uneven slice
    /// spacing) log a warning and leave the geometry unset; 3D volumes
    /// combined with multiple slices are a hard error.
    pub fn set_up_geom_info(&mut self) -> Result<(), GeometryError> {
        self.geom = None;
        if self.images.is_empty() {
            return Ok(());
        }
        if !self.sorted {
            self.sort();
        }
        let ih1 = self.images[0].head().clone();

        for dir in [ih1.read_dir, ih1.phase_dir, ih1.slice_dir] {
            let norm = (dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2]).sqrt();
            if (norm - 1.0).abs() > 1e-4 {
                warn!("image directions are not unit vectors, no geometry derived");
                return Ok(());
            }
        }

        let mut max_slice = ih1.slice;
        for wrap in &self.images[1..] {
            let h = wrap.head();
            max_slice = max_slice.max(h.slice);
            for (a, b) in [
                (ih1.read_dir, h.read_dir),
                (ih1.phase_dir, h.phase_dir),
                (ih1.slice_dir, h.slice_dir),
            ] {
                for k in 0..3 {
                    if (a[k] - b[k]).abs() > 1e-4 {
                        warn!("image directions vary across the container, no geometry derived");
                        return Ok(());
                    }
                }
            }
        }
        let number_slices = max_slice as usize + 1;

        let mut size = [
            ih1.matrix_size[0] as u32,
            ih1.matrix_size[1] as u32,
            ih1.matrix_size[2] as u32,
        ];
        let mut spacing = [
            ih1.field_of_view[0] / size[0] as f32,
            ih1.field_of_view[1] / size[1] as f32,
            ih1.field_of_view[2] / size[2] as f32,
        ];

        if number_slices > 1 && size[2] > 1 {
            return Err(GeometryError::SlicesWithin3d);
        }
        if number_slices > 1 && size[2] == 1 {
            size[2] = number_slices as u32;
            // distinct slice positions, in sort order of descending projection
            let mut projections: Vec<f32> = Vec::new();
            for wrap in &self.images {
                let p = wrap.head().slice_projection();
                if projections.last().is_none_or(|&q| (q - p).abs() > 1e-4) {
                    projections.push(p);
                }
            }
            if projections.len() > 1 {
                let spacing_z = (projections[0] - projections[1]).abs();
                if (spacing_z - spacing[2]).abs() > 0.01 {
                    warn!(
                        "slice spacing of {spacing_z} mm differs from the declared slice \
                         thickness of {} mm, assuming gaps or overlap",
                        spacing[2]
                    );
                }
                for pair in projections.windows(2) {
                    let d = (pair[0] - pair[1]).abs();
                    if (d - spacing_z).abs() > 1e-4 {
                        warn!(
                            "slice spacing varies across the stack ({d} mm vs {spacing_z} mm), \
                             no geometry derived"
                        );
                        return Ok(());
                    }
                }
                spacing[2] = spacing_z;
            }
        }

        let mut direction = [[0.0f32; 3]; 3];
        for axis in 0..3 {
            direction[axis][0] = -ih1.read_dir[axis];
            direction[axis][1] = -ih1.phase_dir[axis];
            direction[axis][2] = -ih1.slice_dir[axis];
        }

        // per-image field of view along z, the whole stack divided by the slices
        let fov = [
            spacing[0] * size[0] as f32,
            spacing[1] * size[1] as f32,
            spacing[2] * size[2] as f32 / number_slices as f32,
        ];
        let mut offset = [0.0f32; 3];
        for i in 0..3 {
            offset[i] = ih1.position[i];
            for j in 0..3 {
                offset[i] -= direction[i][j] * fov[j] / 2.0;
            }
        }

        self.geom = Some(VoxelGridGeometry {
            offset,
            spacing,
            size,
            direction,
        });
        Ok(())
    }

    /// Rewrites directions, field of view and positions of every image so
    /// that the derived geometry equals `target`, which must share grid size
    /// and spacing with the current one.
    pub fn reorient(&mut self, target: &VoxelGridGeometry) -> Result<(), GeometryError> {
        let current = self.geom.as_ref().ok_or(GeometryError::Missing)?;
        if current.matches(target, 1e-4) {
            return Ok(());
        }
        can_reorient(current, target)?;
        if self.images.is_empty() {
            self.geom = Some(*target);
            return Ok(());
        }
        if !self.sorted {
            self.sort();
        }

        let number_slices = self
            .images
            .iter()
            .map(|w| w.head().slice)
            .max()
            .map_or(1, |m| m as usize + 1);
        let spacing = target.spacing;
        let fov = [
            spacing[0] * target.size[0] as f32,
            spacing[1] * target.size[1] as f32,
            spacing[2] * target.size[2] as f32 / number_slices as f32,
        ];

        for (im, wrap) in self.images.iter_mut().enumerate() {
            let head = wrap.head_mut();
            for axis in 0..3 {
                head.read_dir[axis] = -target.direction[axis][0];
                head.phase_dir[axis] = -target.direction[axis][1];
                head.slice_dir[axis] = -target.direction[axis][2];
            }
            head.field_of_view = fov;
            let slice_idx = (im % number_slices) as f32;
            for i in 0..3 {
                let mut p = target.offset[i];
                for j in 0..3 {
                    p += target.direction[i][j] * fov[j] / 2.0;
                }
                p += target.direction[i][2] * slice_idx * spacing[2];
                head.position[i] = p;
            }
        }

        self.set_up_geom_info()?;
        match &self.geom {
            Some(g) if g.matches(target, 1e-3) => Ok(()),
            _ => Err(GeometryError::ReorientFailed),
        }
    }

    // =====================================
    // Algebra
    // =====================================

    fn binary_all(
        &mut self,
        x: &ImagesVector,
        y: &ImagesVector,
        f: fn(Complex32, Complex32) -> Complex32,
    ) -> Result<(), ContainerError> {
        if x.number() != y.number() {
            return Err(ContainerError::SizeMismatch {
                expected: x.number(),
                found: y.number(),
            });
        }
        if self.is_empty() {
            for i in 0..x.number() {
                let mut w = x.images[i].clone();
                w.binary_op(&x.images[i], &y.images[i], f)?;
                self.images.push(w);
            }
        } else {
            if self.number() != x.number() {
                return Err(ContainerError::SizeMismatch {
                    expected: x.number(),
                    found: self.number(),
                });
            }
            for i in 0..x.number() {
                self.images[i].binary_op(&x.images[i], &y.images[i], f)?;
            }
        }
        Ok(())
    }

    fn transform_all(
        &mut self,
        x: &ImagesVector,
        f: impl Fn(&mut ImageWrap, &ImageWrap) -> Result<(), ContainerError>,
    ) -> Result<(), ContainerError> {
        if self.is_empty() {
            for i in 0..x.number() {
                let mut w = x.images[i].clone();
                f(&mut w, &x.images[i])?;
                self.images.push(w);
            }
        } else {
            if self.number() != x.number() {
                return Err(ContainerError::SizeMismatch {
                    expected: x.number(),
                    found: self.number(),
                });
            }
            for i in 0..x.number() {
                // the receiving wrap starts from the operand's values anyway
                let mut w = x.images[i].clone();
                f(&mut w, &x.images[i])?;
                self.images[i] = w;
            }
        }
        Ok(())
    }

    pub fn axpby(
        &mut self,
        a: Complex32,
        x: &ImagesVector,
        b: Complex32,
        y: &ImagesVector,
    ) -> Result<(), ContainerError> {
        if x.number() != y.number() {
            return Err(ContainerError::SizeMismatch {
                expected: x.number(),
                found: y.number(),
            });
        }
        if self.is_empty() {
            for i in 0..x.number() {
                let mut w = x.images[i].clone();
                w.axpby(a, &x.images[i], b, &y.images[i])?;
                self.images.push(w);
            }
        } else {
            if self.number() != x.number() {
                return Err(ContainerError::SizeMismatch {
                    expected: x.number(),
                    found: self.number(),
                });
            }
            for i in 0..x.number() {
                self.images[i].axpby(a, &x.images[i], b, &y.images[i])?;
            }
        }
        Ok(())
    }

    /// `self = a.*x + b.*y` with container-valued coefficients.
    pub fn xapyb(
        &mut self,
        x: &ImagesVector,
        a: &ImagesVector,
        y: &ImagesVector,
        b: &ImagesVector,
    ) -> Result<(), ContainerError> {
        for n in [a.number(), y.number(), b.number()] {
            if n != x.number() {
                return Err(ContainerError::SizeMismatch {
                    expected: x.number(),
                    found: n,
                });
            }
        }
        if self.is_empty() {
            for i in 0..x.number() {
                let mut w = x.images[i].clone();
                w.xapyb_wrap(&x.images[i], &a.images[i], &y.images[i], &b.images[i])?;
                self.images.push(w);
            }
        } else {
            if self.number() != x.number() {
                return Err(ContainerError::SizeMismatch {
                    expected: x.number(),
                    found: self.number(),
                });
            }
            for i in 0..x.number() {
                self.images[i].xapyb_wrap(&x.images[i], &a.images[i], &y.images[i], &b.images[i])?;
            }
        }
        Ok(())
    }

    /// `self = a*x + b.*y` with a scalar `a` and an image-valued `b`.
    pub fn xapyb_mixed(
        &mut self,
        x: &ImagesVector,
        a: Complex32,
        y: &ImagesVector,
        b: &ImagesVector,
    ) -> Result<(), ContainerError> {
        for n in [y.number(), b.number()] {
            if n != x.number() {
                return Err(ContainerError::SizeMismatch {
                    expected: x.number(),
                    found: n,
                });
            }
        }
        if self.is_empty() {
            for i in 0..x.number() {
                let mut w = x.images[i].clone();
                w.xapyb_mixed(&x.images[i], a, &y.images[i], &b.images[i])?;
                self.images.push(w);
            }
        } else {
            if self.number() != x.number() {
                return Err(ContainerError::SizeMismatch {
                    expected: x.number(),
                    found: self.number(),
                });
            }
            for i in 0..x.number() {
                self.images[i].xapyb_mixed(&x.images[i], a, &y.images[i], &b.images[i])?;
            }
        }
        Ok(())
    }

    pub fn multiply(&mut self, x: &ImagesVector, y: &ImagesVector) -> Result<(), ContainerError> {
        self.binary_all(x, y, algebra::product)
    }

    pub fn divide(&mut self, x: &ImagesVector, y: &ImagesVector) -> Result<(), ContainerError> {
        self.binary_all(x, y, algebra::ratio)
    }

    pub fn maximum(&mut self, x: &ImagesVector, y: &ImagesVector) -> Result<(), ContainerError> {
        self.binary_all(x, y, algebra::maxreal)
    }

    pub fn minimum(&mut self, x: &ImagesVector, y: &ImagesVector) -> Result<(), ContainerError> {
        self.binary_all(x, y, algebra::minreal)
    }

    pub fn power(&mut self, x: &ImagesVector, y: &ImagesVector) -> Result<(), ContainerError> {
        self.binary_all(x, y, algebra::power)
    }

    pub fn multiply_scalar(&mut self, x: &ImagesVector, s: Complex32) -> Result<(), ContainerError> {
        self.transform_all(x, |w, xi| w.semibinary_op(xi, s, algebra::product))
    }

    pub fn add_scalar(&mut self, x: &ImagesVector, s: Complex32) -> Result<(), ContainerError> {
        self.transform_all(x, |w, xi| w.semibinary_op(xi, s, algebra::add))
    }

    pub fn maximum_scalar(&mut self, x: &ImagesVector, s: Complex32) -> Result<(), ContainerError> {
        self.transform_all(x, |w, xi| w.semibinary_op(xi, s, algebra::maxreal))
    }

    pub fn minimum_scalar(&mut self, x: &ImagesVector, s: Complex32) -> Result<(), ContainerError> {
        self.transform_all(x, |w, xi| w.semibinary_op(xi, s, algebra::minreal))
    }

    pub fn power_scalar(&mut self, x: &ImagesVector, s: Complex32) -> Result<(), ContainerError> {
        self.transform_all(x, |w, xi| w.semibinary_op(xi, s, algebra::power))
    }

    pub fn exp(&mut self, x: &ImagesVector) -> Result<(), ContainerError> {
        self.transform_all(x, |w, xi| w.unary_op(xi, algebra::exp))
    }

    pub fn log(&mut self, x: &ImagesVector) -> Result<(), ContainerError> {
        self.transform_all(x, |w, xi| w.unary_op(xi, algebra::log))
    }

    pub fn sqrt(&mut self, x: &ImagesVector) -> Result<(), ContainerError> {
        self.transform_all(x, |w, xi| w.unary_op(xi, algebra::sqrt))
    }

    pub fn sign(&mut self, x: &ImagesVector) -> Result<(), ContainerError> {
        self.transform_all(x, |w, xi| w.unary_op(xi, algebra::sign))
    }

    pub fn abs(&mut self, x: &ImagesVector) -> Result<(), ContainerError> {
        self.transform_all(x, |w, xi| w.unary_op(xi, algebra::abs))
    }

    pub fn conjugate(&mut self) {
        for w in &mut self.images {
            w.conjugate();
        }
    }

    pub fn fill(&mut self, value: f32) {
        for w in &mut self.images {
            w.fill(value);
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for w in &mut self.images {
            w.scale(factor);
        }
    }

    /// Magnitude copy of the whole container, real-valued.
    pub fn to_abs(&self) -> ImagesVector {
        let mut out = self.clone();
        out.images = self.images.iter().map(ImageWrap::to_abs).collect();
        out
    }

    /// Real-part copy of the whole container, real-valued.
    pub fn to_real(&self) -> ImagesVector {
        let mut out = self.clone();
        out.images = self.images.iter().map(ImageWrap::to_real).collect();
        out
    }

    /// Inner product over all images, conjugate-linear in `other`.
    pub fn dot(&self, other: &ImagesVector) -> Result<Complex32, ContainerError> {
        if self.number() != other.number() {
            return Err(ContainerError::SizeMismatch {
                expected: self.number(),
                found: other.number(),
            });
        }
        let mut z = Complex32::new(0.0, 0.0);
        for (a, b) in self.images.iter().zip(&other.images) {
            z += a.dot(b)?;
        }
        Ok(z)
    }

    pub fn sum(&self) -> Complex32 {
        let mut z = Complex32::new(0.0, 0.0);
        for w in &self.images {
            z += w.total();
        }
        z
    }

    /// Value with the largest real part over all images.
    pub fn max(&self) -> Complex32 {
        let mut best = Complex32::new(0.0, 0.0);
        for w in &self.images {
            let v = w.max_value();
            if v.re > best.re {
                best = v;
            }
        }
        best
    }

    pub fn norm(&self) -> f32 {
        self.images
            .iter()
            .map(ImageWrap::norm_squared)
            .sum::<f32>()
            .sqrt()
    }

    // =====================================
    // Bulk data access
    // =====================================

    pub fn get_complex_data(&self) -> Vec<Complex32> {
        let mut out = Vec::new();
        for w in &self.images {
            out.extend(w.values());
        }
        out
    }

    pub fn set_complex_data(&mut self, data: &[Complex32]) -> Result<(), ContainerError> {
        let total: usize = self.images.iter().map(ImageWrap::num_elements).sum();
        if data.len() != total {
            return Err(ContainerError::SizeMismatch {
                expected: total,
                found: data.len(),
            });
        }
        let mut offset = 0usize;
        for w in &mut self.images {
            let n = w.num_elements();
            w.set_values(&data[offset..offset + n])?;
            offset += n;
        }
        Ok(())
    }

    pub fn get_real_data(&self) -> Vec<f32> {
        let mut out = Vec::new();
        for w in &self.images {
            out.extend(w.real_values());
        }
        out
    }

    pub fn set_real_data(&mut self, data: &[f32]) -> Result<(), ContainerError> {
        let complex: Vec<Complex32> = data.iter().map(|&v| Complex32::new(v, 0.0)).collect();
        self.set_complex_data(&complex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{sample_acquisitions, stack_image};

    #[test]
    fn sort_orders_by_projection_then_contrast() {
        let mut iv = ImagesVector::new();
        iv.append(stack_image(1, 1, 1.0));
        iv.append(stack_image(0, 1, 2.0));
        iv.append(stack_image(1, 0, 3.0));
        iv.append(stack_image(0, 0, 4.0));
        iv.sort();
        assert!(iv.sorted());

        let key = |i: usize| {
            let h = iv.image(i).unwrap().head();
            (h.slice, h.contrast)
        };
        // slice 0 sits at the larger projection, so it comes first
        assert_eq!(key(0), (0, 0));
        assert_eq!(key(1), (0, 1));
        assert_eq!(key(2), (1, 0));
        assert_eq!(key(3), (1, 1));
    }

    #[test]
    fn geometry_of_a_2d_stack() {
        let mut iv = ImagesVector::new();
        iv.append(stack_image(1, 0, 0.0));
        iv.append(stack_image(0, 0, 0.0));
        iv.set_up_geom_info().unwrap();

        let geom = iv.geom_info().unwrap();
        assert_eq!(geom.size, [8, 8, 2]);
        assert_eq!(geom.spacing, [1.0, 1.0, 2.0]);
        assert_eq!(
            geom.direction,
            [[-1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]]
        );
        assert_eq!(geom.offset, [4.0, 4.0, 1.0]);
    }

    #[test]
    fn geometry_survives_repeated_slice_positions() {
        // two contrasts share each slice position; the repeats collapse into
        // one projection per slice instead of a zero spacing
        let mut iv = ImagesVector::new();
        for slice in 0..2u16 {
            for contrast in 0..2u16 {
                iv.append(stack_image(slice, contrast, 1.0));
            }
        }
        iv.set_up_geom_info().unwrap();

        let geom = iv.geom_info().unwrap();
        assert_eq!(geom.size, [8, 8, 2]);
        assert_eq!(geom.spacing, [1.0, 1.0, 2.0]);
        assert_eq!(geom.offset, [4.0, 4.0, 1.0]);
    }

    #[test]
    fn geometry_rejects_slices_within_3d_volumes() {
        let mut iv = ImagesVector::new();
        for slice in 0..2u16 {
            let mut w = stack_image(slice, 0, 0.0);
            w.head_mut().matrix_size = [8, 8, 2];
            iv.append(w);
        }
        assert!(matches!(
            iv.set_up_geom_info(),
            Err(GeometryError::SlicesWithin3d)
        ));
    }

    #[test]
    fn irregular_directions_leave_geometry_unset() {
        let mut iv = ImagesVector::new();
        let mut w = stack_image(0, 0, 0.0);
        w.head_mut().read_dir = [0.5, 0.0, 0.0];
        iv.append(w);
        iv.set_up_geom_info().unwrap();
        assert!(iv.geom_info().is_none());
    }

    #[test]
    fn reorient_to_the_current_geometry_is_a_noop() {
        let mut iv = ImagesVector::new();
        iv.append(stack_image(1, 0, 0.0));
        iv.append(stack_image(0, 0, 0.0));
        iv.set_up_geom_info().unwrap();
        let geom = *iv.geom_info().unwrap();
        let positions: Vec<[f32; 3]> = (0..2).map(|i| iv.image(i).unwrap().head().position).collect();

        iv.reorient(&geom).unwrap();
        for (i, p) in positions.iter().enumerate() {
            assert_eq!(iv.image(i).unwrap().head().position, *p);
        }
    }

    #[test]
    fn reorient_shifts_image_positions() {
        let mut iv = ImagesVector::new();
        iv.append(stack_image(1, 0, 0.0));
        iv.append(stack_image(0, 0, 0.0));
        iv.set_up_geom_info().unwrap();

        let mut target = *iv.geom_info().unwrap();
        target.offset = [
            target.offset[0] + 1.0,
            target.offset[1] + 2.0,
            target.offset[2] + 3.0,
        ];
        iv.reorient(&target).unwrap();
        assert!(iv.geom_info().unwrap().matches(&target, 1e-3));
        // sorted order puts slice 0 first at the larger projection
        let p0 = iv.image(0).unwrap().head().position;
        assert!((p0[0] - 1.0).abs() < 1e-4);
        assert!((p0[1] - 2.0).abs() < 1e-4);
        assert!((p0[2] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn reorient_requires_a_compatible_grid() {
        let mut iv = ImagesVector::new();
        iv.append(stack_image(1, 0, 0.0));
        iv.append(stack_image(0, 0, 0.0));
        iv.set_up_geom_info().unwrap();

        let mut target = *iv.geom_info().unwrap();
        target.size = [4, 4, 2];
        assert!(matches!(
            iv.reorient(&target),
            Err(GeometryError::NotReorientable(_))
        ));

        let mut no_geom = ImagesVector::new();
        no_geom.append(stack_image(0, 0, 0.0));
        assert!(matches!(
            no_geom.reorient(&target),
            Err(GeometryError::Missing)
        ));
    }

    #[test]
    fn images_from_acquisitions_cover_every_subset() {
        let mut ad = sample_acquisitions(2, 4);
        ad.sort_by_time().unwrap();
        let iv = ImagesVector::from_acquisitions(&ad, true).unwrap();

        assert_eq!(iv.number(), 2);
        for i in 0..2 {
            let w = iv.image(i).unwrap();
            assert_eq!(w.dims(), (8, 4, 1, 2));
            assert!(w.is_complex());
            // zero-filled
            assert_eq!(w.total(), Complex32::new(0.0, 0.0));
        }
        assert!(!iv.info().is_empty());
        let slices: Vec<u16> = (0..2).map(|i| iv.image(i).unwrap().head().slice).collect();
        assert!(slices.contains(&0) && slices.contains(&1));
    }

    #[test]
    fn container_algebra_matches_elementwise_semantics() {
        let mut x = ImagesVector::new();
        x.append(stack_image(0, 0, 3.0));
        let mut y = ImagesVector::new();
        y.append(stack_image(0, 0, 2.0));

        let mut prod = ImagesVector::new();
        prod.multiply(&x, &y).unwrap();
        assert_eq!(prod.number(), 1);
        assert!(prod.get_real_data().iter().all(|&v| (v - 6.0).abs() < 1e-5));

        let mut lincomb = ImagesVector::new();
        lincomb
            .axpby(Complex32::new(2.0, 0.0), &x, Complex32::new(-1.0, 0.0), &y)
            .unwrap();
        assert!(lincomb.get_real_data().iter().all(|&v| (v - 4.0).abs() < 1e-5));

        let n = 64.0f32; // voxels per image
        assert!((x.dot(&y).unwrap().re - 6.0 * n).abs() < 1e-3);
        assert!((x.norm() - (9.0 * n).sqrt()).abs() < 1e-4);
        assert_eq!(x.max(), Complex32::new(3.0, 0.0));
    }

    #[test]
    fn bulk_data_round_trip() {
        let mut iv = ImagesVector::new();
        iv.append(stack_image(0, 0, 1.0));
        let mut data = iv.get_complex_data();
        assert_eq!(data.len(), 64);
        for v in &mut data {
            *v *= Complex32::new(0.0, 1.0);
        }
        iv.set_complex_data(&data).unwrap();
        assert_eq!(iv.image(0).unwrap().values()[0], Complex32::new(0.0, 1.0));
        assert!(matches!(
            iv.set_complex_data(&data[..5]),
            Err(ContainerError::SizeMismatch { .. })
        ));
    }
}
