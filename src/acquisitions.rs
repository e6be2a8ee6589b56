//! Containers of raw k-space acquisitions.
//!
//! [`AcquisitionData`] is the container contract: storage accessors are
//! required methods, everything built on top of them (sorting, k-space
//! bucketing, the algebra protocol, persistence) ships as default methods so
//! that alternative backends inherit the full behaviour.
//!
//! The algebra protocol is strict about ordering: binary and ternary
//! operations refuse unsorted operands, skip ignorable acquisitions on every
//! operand and re-organise the destination's k-space after writing.

use std::path::Path;

use log::{debug, warn};
use ndarray::Array2;
use num_complex::Complex32;

use crate::acquisition::{Acquisition, AcquisitionFlag};
use crate::algebra;
use crate::dataset::{self, DatasetLock};
use crate::error::{ContainerError, HeaderError};
use crate::header::{num_states, AcquisitionsInfo, EncodingDim, Limit, Trajectory};
use crate::kspace::{KSpaceSubset, Tag, NUM_KSPACE_DIMS};

// =====================================
// Container contract
// =====================================

pub trait AcquisitionData {
    // ---- storage, provided by the backend ----

    fn number(&self) -> usize;
    /// Acquisition at a physical storage slot, bypassing the sort order.
    fn acquisition_at(&self, slot: usize) -> Result<&Acquisition, ContainerError>;
    fn acquisition_at_mut(&mut self, slot: usize) -> Result<&mut Acquisition, ContainerError>;
    fn set_acquisition_at(&mut self, slot: usize, acq: Acquisition) -> Result<(), ContainerError>;
    fn append_acquisition(&mut self, acq: Acquisition);
    fn clear(&mut self);
    fn info(&self) -> &AcquisitionsInfo;
    fn set_info(&mut self, info: AcquisitionsInfo);
    fn sorted(&self) -> bool;
    fn set_sorted(&mut self, sorted: bool);
    /// Logical-to-physical permutation; empty means identity.
    fn permutation(&self) -> &[usize];
    fn set_permutation(&mut self, index: Vec<usize>);
    fn subsets(&self) -> &[KSpaceSubset];
    fn set_subsets(&mut self, subsets: Vec<KSpaceSubset>);
    /// Empty container sharing this one's metadata.
    fn empty_clone(&self) -> Self
    where
        Self: Sized;

    // ---- indexing ----

    fn is_empty(&self) -> bool {
        self.number() == 0
    }

    fn logical_index(&self, i: usize) -> Result<usize, ContainerError> {
        let n = self.number();
        let perm = self.permutation();
        if i >= n || (!perm.is_empty() && i >= perm.len()) {
            return Err(ContainerError::IndexOutOfRange { index: i, len: n });
        }
        Ok(if perm.is_empty() { i } else { perm[i] })
    }

    /// Acquisition at a logical position, honouring the sort order.
    fn acquisition(&self, i: usize) -> Result<&Acquisition, ContainerError> {
        let slot = self.logical_index(i)?;
        self.acquisition_at(slot)
    }

    fn set_acquisition(&mut self, i: usize, acq: Acquisition) -> Result<(), ContainerError> {
        let slot = self.logical_index(i)?;
        self.set_acquisition_at(slot, acq)
    }

    // ---- sorting and k-space organisation ----

    fn sort(&mut self) -> Result<(), ContainerError> {
        self.sort_by_time()
    }

    /// Stable sort of the logical order by the acquisition time stamp,
    /// followed by k-space organisation. The stored acquisitions are never
    /// physically moved.
    fn sort_by_time(&mut self) -> Result<(), ContainerError> {
        let n = self.number();
        if n == 0 {
            warn!("cannot sort an empty container of acquisition data");
            self.set_permutation(Vec::new());
            self.set_subsets(Vec::new());
            self.set_sorted(true);
            return Ok(());
        }
        let mut stamps = Vec::with_capacity(n);
        for slot in 0..n {
            stamps.push(self.acquisition_at(slot)?.head.acquisition_time_stamp);
        }
        let mut perm: Vec<usize> = (0..n).collect();
        perm.sort_by(|&i, &j| stamps[i].cmp(&stamps[j]));
        self.set_permutation(perm);
        self.set_sorted(true);
        self.organise_kspace()
    }

    /// Buckets every acquisition into the k-space subset its tag selects.
    ///
    /// Buckets cover the cartesian product of the declared encoding-limit
    /// extents (one segment state); empty buckets are pruned afterwards, so
    /// the surviving subsets partition the container.
    fn organise_kspace(&mut self) -> Result<(), ContainerError> {
        let limits = self.info().single_encoding()?.limits.clone();
        let n_avg = num_states(&limits.average);
        let n_slc = num_states(&limits.slice);
        let n_con = num_states(&limits.contrast);
        let n_pha = num_states(&limits.phase);
        let n_rep = num_states(&limits.repetition);
        let n_set = num_states(&limits.set);

        let mut subsets = Vec::with_capacity(n_avg * n_slc * n_con * n_pha * n_rep * n_set);
        for ia in 0..n_avg {
            for isl in 0..n_slc {
                for ic in 0..n_con {
                    for ip in 0..n_pha {
                        for ir in 0..n_rep {
                            for ist in 0..n_set {
                                let mut tag = [0u16; NUM_KSPACE_DIMS];
                                tag[0] = ia as u16;
                                tag[1] = isl as u16;
                                tag[2] = ic as u16;
                                tag[3] = ip as u16;
                                tag[4] = ir as u16;
                                tag[5] = ist as u16;
                                subsets.push(KSpaceSubset::new(tag));
                            }
                        }
                    }
                }
            }
        }

        for i in 0..self.number() {
            let tag = KSpaceSubset::tag_from_acquisition(self.acquisition(i)?);
            let access = ((((tag[0] as usize * n_slc + tag[1] as usize) * n_con
                + tag[2] as usize)
                * n_pha
                + tag[3] as usize)
                * n_rep
                + tag[4] as usize)
                * n_set
                + tag[5] as usize;
            match subsets.get_mut(access) {
                Some(subset) if *subset.tag() == tag => subset.add_index(i),
                _ => return Err(ContainerError::CountersOutsideLimits),
            }
        }

        subsets.retain(|s| !s.is_empty());
        self.set_subsets(subsets);
        Ok(())
    }

    /// Logical index sets of the non-empty subsets, in ascending tag order.
    fn kspace_order(&self) -> Result<Vec<Vec<usize>>, ContainerError> {
        if self.is_empty() {
            return Err(ContainerError::EmptyContainer);
        }
        let subsets = self.subsets();
        if subsets.is_empty() {
            return Err(ContainerError::NotOrganised);
        }
        Ok(subsets.iter().map(|s| s.indices().to_vec()).collect())
    }

    /// Copies the acquisitions at the given logical positions into `dest`,
    /// which must be empty. `dest` inherits this container's metadata.
    fn get_subset<D: AcquisitionData>(
        &self,
        dest: &mut D,
        idx: &[usize],
    ) -> Result<(), ContainerError> {
        if !dest.is_empty() {
            return Err(ContainerError::DestinationNotEmpty);
        }
        dest.set_info(self.info().clone());
        for &i in idx {
            dest.append_acquisition(self.acquisition(i)?.clone());
        }
        Ok(())
    }

    /// Writes the acquisitions of `src` back to the given logical positions.
    fn set_subset<S: AcquisitionData>(
        &mut self,
        src: &S,
        idx: &[usize],
    ) -> Result<(), ContainerError> {
        if src.number() != idx.len() {
            return Err(ContainerError::SizeMismatch {
                expected: idx.len(),
                found: src.number(),
            });
        }
        for (j, &i) in idx.iter().enumerate() {
            let acq = src.acquisition(j)?.clone();
            self.set_acquisition(i, acq)?;
        }
        Ok(())
    }

    // ---- algebra protocol ----

    /// Applies `f` pairwise over two sorted operand containers, writing the
    /// results here: appended when this container is empty, overwritten in
    /// place otherwise. Ignorable acquisitions are skipped on every operand.
    fn binary_op<X: AcquisitionData, Y: AcquisitionData>(
        &mut self,
        x: &X,
        y: &Y,
        f: impl Fn(&Acquisition, &mut Acquisition),
    ) -> Result<(), ContainerError> {
        if !x.sorted() || !y.sorted() {
            return Err(ContainerError::Unsorted);
        }
        let nx = x.number();
        let ny = y.number();
        let was_empty = self.is_empty();
        let (mut ix, mut iy, mut k) = (0usize, 0usize, 0usize);
        while ix < nx && iy < ny {
            if x.acquisition(ix)?.to_be_ignored() {
                debug!("acquisition {ix} of the first operand ignored");
                ix += 1;
                continue;
            }
            if y.acquisition(iy)?.to_be_ignored() {
                debug!("acquisition {iy} of the second operand ignored");
                iy += 1;
                continue;
            }
            if !was_empty && self.acquisition(k)?.to_be_ignored() {
                debug!("acquisition {k} of the destination ignored");
                k += 1;
                continue;
            }
            let mut result = y.acquisition(iy)?.clone();
            f(x.acquisition(ix)?, &mut result);
            if was_empty {
                self.append_acquisition(result);
            } else {
                self.set_acquisition(k, result)?;
            }
            ix += 1;
            iy += 1;
            k += 1;
        }
        self.set_sorted(true);
        self.organise_kspace()
    }

    /// One-operand variant of [`binary_op`](Self::binary_op): the result for
    /// each acquisition of `x` is produced by `f` from a copy of it.
    fn transform_from<X: AcquisitionData>(
        &mut self,
        x: &X,
        f: impl Fn(&Acquisition, &mut Acquisition),
    ) -> Result<(), ContainerError> {
        if !x.sorted() {
            return Err(ContainerError::Unsorted);
        }
        let nx = x.number();
        let was_empty = self.is_empty();
        let (mut ix, mut k) = (0usize, 0usize);
        while ix < nx {
            if x.acquisition(ix)?.to_be_ignored() {
                debug!("acquisition {ix} of the operand ignored");
                ix += 1;
                continue;
            }
            if !was_empty && self.acquisition(k)?.to_be_ignored() {
                debug!("acquisition {k} of the destination ignored");
                k += 1;
                continue;
            }
            let mut result = x.acquisition(ix)?.clone();
            f(x.acquisition(ix)?, &mut result);
            if was_empty {
                self.append_acquisition(result);
            } else {
                self.set_acquisition(k, result)?;
            }
            ix += 1;
            k += 1;
        }
        self.set_sorted(true);
        self.organise_kspace()
    }

    /// `self = a*x + b*y` with scalar coefficients.
    fn axpby<X: AcquisitionData, Y: AcquisitionData>(
        &mut self,
        a: Complex32,
        x: &X,
        b: Complex32,
        y: &Y,
    ) -> Result<(), ContainerError> {
        self.binary_op(x, y, |ax, ay| Acquisition::axpby(a, ax, b, ay))
    }

    /// `self = a.*x + b.*y` with container-valued coefficients.
    fn xapyb<X, A, Y, B>(&mut self, x: &X, a: &A, y: &Y, b: &B) -> Result<(), ContainerError>
    where
        X: AcquisitionData,
        A: AcquisitionData,
        Y: AcquisitionData,
        B: AcquisitionData,
    {
        if !x.sorted() || !a.sorted() || !y.sorted() || !b.sorted() {
            return Err(ContainerError::Unsorted);
        }
        let (nx, na, ny, nb) = (x.number(), a.number(), y.number(), b.number());
        let was_empty = self.is_empty();
        let (mut ix, mut ia, mut iy, mut ib, mut k) = (0usize, 0usize, 0usize, 0usize, 0usize);
        while ix < nx && ia < na && iy < ny && ib < nb {
            if x.acquisition(ix)?.to_be_ignored() {
                ix += 1;
                continue;
            }
            if a.acquisition(ia)?.to_be_ignored() {
                ia += 1;
                continue;
            }
            if y.acquisition(iy)?.to_be_ignored() {
                iy += 1;
                continue;
            }
            if b.acquisition(ib)?.to_be_ignored() {
                ib += 1;
                continue;
            }
            if !was_empty && self.acquisition(k)?.to_be_ignored() {
                k += 1;
                continue;
            }
            let mut result = y.acquisition(iy)?.clone();
            Acquisition::xapyb(
                x.acquisition(ix)?,
                a.acquisition(ia)?,
                &mut result,
                b.acquisition(ib)?,
            );
            if was_empty {
                self.append_acquisition(result);
            } else {
                self.set_acquisition(k, result)?;
            }
            ix += 1;
            ia += 1;
            iy += 1;
            ib += 1;
            k += 1;
        }
        self.set_sorted(true);
        self.organise_kspace()
    }

    /// `self = a*x + b.*y` with a scalar `a` and a container-valued `b`.
    fn xapyb_mixed<X, Y, B>(
        &mut self,
        x: &X,
        a: Complex32,
        y: &Y,
        b: &B,
    ) -> Result<(), ContainerError>
    where
        X: AcquisitionData,
        Y: AcquisitionData,
        B: AcquisitionData,
    {
        if !x.sorted() || !y.sorted() || !b.sorted() {
            return Err(ContainerError::Unsorted);
        }
        let (nx, ny, nb) = (x.number(), y.number(), b.number());
        let was_empty = self.is_empty();
        let (mut ix, mut iy, mut ib, mut k) = (0usize, 0usize, 0usize, 0usize);
        while ix < nx && iy < ny && ib < nb {
            if x.acquisition(ix)?.to_be_ignored() {
                ix += 1;
                continue;
            }
            if y.acquisition(iy)?.to_be_ignored() {
                iy += 1;
                continue;
            }
            if b.acquisition(ib)?.to_be_ignored() {
                ib += 1;
                continue;
            }
            if !was_empty && self.acquisition(k)?.to_be_ignored() {
                k += 1;
                continue;
            }
            let mut result = y.acquisition(iy)?.clone();
            Acquisition::xapyb_mixed(x.acquisition(ix)?, a, &mut result, b.acquisition(ib)?);
            if was_empty {
                self.append_acquisition(result);
            } else {
                self.set_acquisition(k, result)?;
            }
            ix += 1;
            iy += 1;
            ib += 1;
            k += 1;
        }
        self.set_sorted(true);
        self.organise_kspace()
    }

    fn multiply<X: AcquisitionData, Y: AcquisitionData>(
        &mut self,
        x: &X,
        y: &Y,
    ) -> Result<(), ContainerError> {
        self.binary_op(x, y, |ax, ay| Acquisition::binary_op(ax, ay, algebra::product))
    }

    fn divide<X: AcquisitionData, Y: AcquisitionData>(
        &mut self,
        x: &X,
        y: &Y,
    ) -> Result<(), ContainerError> {
        self.binary_op(x, y, |ax, ay| Acquisition::binary_op(ax, ay, algebra::ratio))
    }

    fn maximum<X: AcquisitionData, Y: AcquisitionData>(
        &mut self,
        x: &X,
        y: &Y,
    ) -> Result<(), ContainerError> {
        self.binary_op(x, y, |ax, ay| Acquisition::binary_op(ax, ay, algebra::maxreal))
    }

    fn minimum<X: AcquisitionData, Y: AcquisitionData>(
        &mut self,
        x: &X,
        y: &Y,
    ) -> Result<(), ContainerError> {
        self.binary_op(x, y, |ax, ay| Acquisition::binary_op(ax, ay, algebra::minreal))
    }

    fn power<X: AcquisitionData, Y: AcquisitionData>(
        &mut self,
        x: &X,
        y: &Y,
    ) -> Result<(), ContainerError> {
        self.binary_op(x, y, |ax, ay| Acquisition::binary_op(ax, ay, algebra::power))
    }

    fn multiply_scalar<X: AcquisitionData>(
        &mut self,
        x: &X,
        s: Complex32,
    ) -> Result<(), ContainerError> {
        self.transform_from(x, |ax, ay| Acquisition::semibinary_op(ax, ay, s, algebra::product))
    }

    fn add_scalar<X: AcquisitionData>(&mut self, x: &X, s: Complex32) -> Result<(), ContainerError> {
        self.transform_from(x, |ax, ay| Acquisition::semibinary_op(ax, ay, s, algebra::add))
    }

    fn maximum_scalar<X: AcquisitionData>(
        &mut self,
        x: &X,
        s: Complex32,
    ) -> Result<(), ContainerError> {
        self.transform_from(x, |ax, ay| Acquisition::semibinary_op(ax, ay, s, algebra::maxreal))
    }

    fn minimum_scalar<X: AcquisitionData>(
        &mut self,
        x: &X,
        s: Complex32,
    ) -> Result<(), ContainerError> {
        self.transform_from(x, |ax, ay| Acquisition::semibinary_op(ax, ay, s, algebra::minreal))
    }

    fn power_scalar<X: AcquisitionData>(
        &mut self,
        x: &X,
        s: Complex32,
    ) -> Result<(), ContainerError> {
        self.transform_from(x, |ax, ay| Acquisition::semibinary_op(ax, ay, s, algebra::power))
    }

    fn exp<X: AcquisitionData>(&mut self, x: &X) -> Result<(), ContainerError> {
        self.transform_from(x, |ax, ay| Acquisition::unary_op(ax, ay, algebra::exp))
    }

    fn log<X: AcquisitionData>(&mut self, x: &X) -> Result<(), ContainerError> {
        self.transform_from(x, |ax, ay| Acquisition::unary_op(ax, ay, algebra::log))
    }

    fn sqrt<X: AcquisitionData>(&mut self, x: &X) -> Result<(), ContainerError> {
        self.transform_from(x, |ax, ay| Acquisition::unary_op(ax, ay, algebra::sqrt))
    }

    fn sign<X: AcquisitionData>(&mut self, x: &X) -> Result<(), ContainerError> {
        self.transform_from(x, |ax, ay| Acquisition::unary_op(ax, ay, algebra::sign))
    }

    fn abs<X: AcquisitionData>(&mut self, x: &X) -> Result<(), ContainerError> {
        self.transform_from(x, |ax, ay| Acquisition::unary_op(ax, ay, algebra::abs))
    }

    fn conjugate(&mut self) -> Result<(), ContainerError> {
        for slot in 0..self.number() {
            self.acquisition_at_mut(slot)?.conjugate();
        }
        Ok(())
    }

    // ---- reductions ----

    /// Inner product over the kept acquisitions, conjugate-linear in `y`.
    fn dot<Y: AcquisitionData>(&self, y: &Y) -> Result<Complex32, ContainerError> {
        let (n, m) = (self.number(), y.number());
        let mut z = Complex32::new(0.0, 0.0);
        let (mut i, mut j) = (0usize, 0usize);
        while i < n && j < m {
            let a = self.acquisition(i)?;
            if a.to_be_ignored() {
                i += 1;
                continue;
            }
            let b = y.acquisition(j)?;
            if b.to_be_ignored() {
                j += 1;
                continue;
            }
            z += a.dot(b);
            i += 1;
            j += 1;
        }
        Ok(z)
    }

    fn sum(&self) -> Result<Complex32, ContainerError> {
        let mut z = Complex32::new(0.0, 0.0);
        for i in 0..self.number() {
            let acq = self.acquisition(i)?;
            if !acq.to_be_ignored() {
                z += acq.total();
            }
        }
        Ok(z)
    }

    /// Value with the largest real part over the kept acquisitions.
    fn max(&self) -> Result<Complex32, ContainerError> {
        let mut best = Complex32::new(0.0, 0.0);
        for i in 0..self.number() {
            let acq = self.acquisition(i)?;
            if acq.to_be_ignored() {
                continue;
            }
            let v = acq.max_value();
            if v.re > best.re {
                best = v;
            }
        }
        Ok(best)
    }

    fn norm(&self) -> Result<f32, ContainerError> {
        let mut s = 0.0f32;
        for i in 0..self.number() {
            let acq = self.acquisition(i)?;
            if !acq.to_be_ignored() {
                s += acq.norm_squared();
            }
        }
        Ok(s.sqrt())
    }

    // ---- header-derived properties ----

    fn trajectory_type(&self) -> Result<Trajectory, ContainerError> {
        let header = self.info().header()?;
        if header.encoding.len() > 1 {
            warn!(
                "the header declares {} encodings, using the first",
                header.encoding.len()
            );
        }
        let enc = header.encoding.first().ok_or(HeaderError::NoEncoding)?;
        Ok(enc.trajectory)
    }

    fn set_trajectory_type(&mut self, traj: Trajectory) -> Result<(), ContainerError> {
        let mut header = self.info().header()?.clone();
        let enc = header.encoding.first_mut().ok_or(HeaderError::NoEncoding)?;
        enc.trajectory = traj;
        self.set_info(AcquisitionsInfo::from_header(&header)?);
        Ok(())
    }

    fn get_encoding_limit(&self, dim: EncodingDim) -> Result<Limit, ContainerError> {
        Ok(self.info().single_encoding()?.limits.require(dim)?)
    }

    fn set_encoding_limit(&mut self, dim: EncodingDim, limit: Limit) -> Result<(), ContainerError> {
        let mut header = self.info().header()?.clone();
        let enc = header.encoding.first_mut().ok_or(HeaderError::NoEncoding)?;
        enc.limits.set(dim, limit);
        self.set_info(AcquisitionsInfo::from_header(&header)?);
        Ok(())
    }

    // ---- trajectories ----

    /// Trajectory dimensionality, required to agree across kept acquisitions.
    fn trajectory_dimensions(&self) -> Result<usize, ContainerError> {
        let mut dims: Option<usize> = None;
        for i in 0..self.number() {
            let acq = self.acquisition(i)?;
            if acq.to_be_ignored() {
                continue;
            }
            let d = acq.trajectory_dimensions();
            match dims {
                None => dims = Some(d),
                Some(prev) if prev != d => {
                    return Err(ContainerError::InconsistentDimensions("trajectory dimensions"))
                }
                _ => {}
            }
        }
        dims.ok_or(ContainerError::EmptyContainer)
    }

    /// Distributes a densely packed trajectory over the acquisitions in
    /// logical order, `samples * traj_dims` values each.
    fn fill_trajectory(&mut self, traj_dims: usize, traj: &[f32]) -> Result<(), ContainerError> {
        let mut offset = 0usize;
        for i in 0..self.number() {
            let slot = self.logical_index(i)?;
            let samples = self.acquisition_at(slot)?.number_of_samples();
            let len = samples * traj_dims;
            let chunk = traj
                .get(offset..offset + len)
                .ok_or(ContainerError::SizeMismatch {
                    expected: offset + len,
                    found: traj.len(),
                })?;
            let arr = Array2::from_shape_vec((samples, traj_dims), chunk.to_vec())
                .map_err(|_| ContainerError::InconsistentDimensions("trajectory"))?;
            self.acquisition_at_mut(slot)?.set_trajectory(arr);
            offset += len;
        }
        Ok(())
    }

    // ---- dimensions ----

    /// `(samples, channels, kept acquisitions)`, required to be consistent
    /// across the kept acquisitions.
    fn acquisition_dimensions(&self) -> Result<(usize, usize, usize), ContainerError> {
        let mut dims: Option<(usize, usize)> = None;
        let mut kept = 0usize;
        for i in 0..self.number() {
            let acq = self.acquisition(i)?;
            if acq.to_be_ignored() {
                continue;
            }
            let d = (acq.number_of_samples(), acq.active_channels());
            match dims {
                None => dims = Some(d),
                Some(prev) if prev != d => {
                    return Err(ContainerError::InconsistentDimensions("acquisition dimensions"))
                }
                _ => {}
            }
            kept += 1;
        }
        let (samples, channels) = dims.ok_or(ContainerError::EmptyContainer)?;
        Ok((samples, channels, kept))
    }

    /// `[samples, phase steps, slice-encoding steps, channels]` of the fully
    /// sampled k-space this container encodes.
    fn kspace_dimensions(&self) -> Result<[usize; 4], ContainerError> {
        let (samples, channels, _) = self.acquisition_dimensions()?;
        let matrix = self.info().single_encoding()?.encoded_space.matrix_size;
        Ok([samples, matrix[1] as usize, matrix[2] as usize, channels])
    }

    // ---- selection ----

    /// Logical positions of the acquisitions carrying any of the given flags.
    fn flagged_index(&self, flags: &[AcquisitionFlag]) -> Result<Vec<usize>, ContainerError> {
        let mut idx = Vec::new();
        for i in 0..self.number() {
            let acq = self.acquisition(i)?;
            if flags.iter().any(|&f| acq.flag_set(f)) {
                idx.push(i);
            }
        }
        Ok(idx)
    }

    /// Logical positions of the acquisitions at the given slice-encoding step.
    fn slice_encoding_index(&self, kz: u16) -> Result<Vec<usize>, ContainerError> {
        let mut idx = Vec::new();
        for i in 0..self.number() {
            if self.acquisition(i)?.head.idx.kspace_encode_step_2 == kz {
                idx.push(i);
            }
        }
        Ok(idx)
    }

    fn tags(&self) -> Result<Vec<Tag>, ContainerError> {
        let mut tags = Vec::with_capacity(self.number());
        for i in 0..self.number() {
            tags.push(KSpaceSubset::tag_from_acquisition(self.acquisition(i)?));
        }
        Ok(tags)
    }

    // ---- bulk data access ----

    /// Samples of all (or only the kept) acquisitions, flattened in logical
    /// order, channels outer and samples inner.
    fn get_data(&self, all: bool) -> Result<Vec<Complex32>, ContainerError> {
        let mut out = Vec::new();
        for i in 0..self.number() {
            let acq = self.acquisition(i)?;
            if !all && acq.to_be_ignored() {
                debug!("acquisition {i} ignored");
                continue;
            }
            out.extend(acq.data.iter().copied());
        }
        Ok(out)
    }

    fn set_data(&mut self, data: &[Complex32], all: bool) -> Result<(), ContainerError> {
        let mut offset = 0usize;
        for i in 0..self.number() {
            let slot = self.logical_index(i)?;
            if !all && self.acquisition_at(slot)?.to_be_ignored() {
                debug!("acquisition {i} ignored");
                continue;
            }
            let acq = self.acquisition_at_mut(slot)?;
            let n = acq.data.len();
            let chunk = data
                .get(offset..offset + n)
                .ok_or(ContainerError::SizeMismatch {
                    expected: offset + n,
                    found: data.len(),
                })?;
            for (dst, &src) in acq.data.iter_mut().zip(chunk) {
                *dst = src;
            }
            offset += n;
        }
        Ok(())
    }

    /// Stores one value per acquisition in the chosen user-float slot.
    fn set_user_floats(&mut self, values: &[f32], slot: usize) -> Result<(), ContainerError> {
        if slot >= 8 {
            return Err(ContainerError::IndexOutOfRange { index: slot, len: 8 });
        }
        if values.len() < self.number() {
            return Err(ContainerError::SizeMismatch {
                expected: self.number(),
                found: values.len(),
            });
        }
        for i in 0..self.number() {
            let phys = self.logical_index(i)?;
            self.acquisition_at_mut(phys)?.head.user_float[slot] = values[i];
        }
        Ok(())
    }

    // ---- copies and persistence ----

    fn clone_container(&self) -> Result<Self, ContainerError>
    where
        Self: Sized,
    {
        let mut copy = self.empty_clone();
        for i in 0..self.number() {
            copy.append_acquisition(self.acquisition(i)?.clone());
        }
        copy.set_sorted(self.sorted());
        if copy.sorted() {
            copy.organise_kspace()?;
        }
        Ok(copy)
    }

    fn write_file(&self, path: &Path, lock: &DatasetLock) -> Result<(), ContainerError> {
        let mut acqs = Vec::with_capacity(self.number());
        for i in 0..self.number() {
            acqs.push(self.acquisition(i)?);
        }
        dataset::write(path, lock, self.info(), &acqs)?;
        Ok(())
    }

    /// Replaces this container's contents with the dataset at `path`.
    /// With `all == false` ignorable acquisitions are dropped on the way in.
    /// The result is sorted by time stamp.
    fn read_file(&mut self, path: &Path, lock: &DatasetLock, all: bool) -> Result<(), ContainerError> {
        let (info, acqs) = dataset::read(path, lock)?;
        self.clear();
        self.set_info(info);
        for acq in acqs {
            if !all && acq.to_be_ignored() {
                continue;
            }
            self.append_acquisition(acq);
        }
        self.sort_by_time()
    }
}

// =====================================
// In-memory backend
// =====================================

/// The `Vec`-backed acquisition container.
#[derive(Debug, Clone, Default)]
pub struct AcquisitionsVector {
    acqs: Vec<Acquisition>,
    info: AcquisitionsInfo,
    sorted: bool,
    index: Vec<usize>,
    sorting: Vec<KSpaceSubset>,
}

impl AcquisitionsVector {
    pub fn new(info: AcquisitionsInfo) -> Self {
        Self {
            info,
            ..Default::default()
        }
    }

    pub fn from_file(path: &Path, lock: &DatasetLock, all: bool) -> Result<Self, ContainerError> {
        let mut av = Self::default();
        av.read_file(path, lock, all)?;
        Ok(av)
    }
}

impl AcquisitionData for AcquisitionsVector {
    fn number(&self) -> usize {
        self.acqs.len()
    }

    fn acquisition_at(&self, slot: usize) -> Result<&Acquisition, ContainerError> {
        let len = self.acqs.len();
        self.acqs
            .get(slot)
            .ok_or(ContainerError::IndexOutOfRange { index: slot, len })
    }

    fn acquisition_at_mut(&mut self, slot: usize) -> Result<&mut Acquisition, ContainerError> {
        let len = self.acqs.len();
        self.acqs
            .get_mut(slot)
            .ok_or(ContainerError::IndexOutOfRange { index: slot, len })
    }

    fn set_acquisition_at(&mut self, slot: usize, acq: Acquisition) -> Result<(), ContainerError> {
        *self.acquisition_at_mut(slot)? = acq;
        Ok(())
    }

    fn append_acquisition(&mut self, acq: Acquisition) {
        self.acqs.push(acq);
    }

    fn clear(&mut self) {
        self.acqs.clear();
        self.index.clear();
        self.sorting.clear();
        self.sorted = false;
    }

    fn info(&self) -> &AcquisitionsInfo {
        &self.info
    }

    fn set_info(&mut self, info: AcquisitionsInfo) {
        self.info = info;
    }

    fn sorted(&self) -> bool {
        self.sorted
    }

    fn set_sorted(&mut self, sorted: bool) {
        self.sorted = sorted;
    }

    fn permutation(&self) -> &[usize] {
        &self.index
    }

    fn set_permutation(&mut self, index: Vec<usize>) {
        self.index = index;
    }

    fn subsets(&self) -> &[KSpaceSubset] {
        &self.sorting
    }

    fn set_subsets(&mut self, subsets: Vec<KSpaceSubset>) {
        self.sorting = subsets;
    }

    fn empty_clone(&self) -> Self {
        Self::new(self.info.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{make_acquisition, make_info, sample_acquisitions};
    use num_complex::Complex32;

    fn c(re: f32) -> Complex32 {
        Complex32::new(re, 0.0)
    }

    #[test]
    fn sort_partitions_kspace_by_slice() {
        let mut av = sample_acquisitions(2, 4);
        av.sort_by_time().unwrap();
        assert!(av.sorted());

        let order = av.kspace_order().unwrap();
        assert_eq!(order.len(), 2);
        let mut seen = vec![false; av.number()];
        for (s, idx_set) in order.iter().enumerate() {
            assert_eq!(idx_set.len(), 4);
            for &i in idx_set {
                assert!(!seen[i]);
                seen[i] = true;
                assert_eq!(av.acquisition(i).unwrap().head.idx.slice, s as u16);
            }
        }
        assert!(seen.iter().all(|&s| s));

        // ascending tag order
        assert_eq!(av.subsets()[0].tag()[1], 0);
        assert_eq!(av.subsets()[1].tag()[1], 1);
    }

    #[test]
    fn tags_follow_the_logical_order() {
        let mut av = sample_acquisitions(2, 4);
        av.sort_by_time().unwrap();

        let tags = av.tags().unwrap();
        assert_eq!(tags.len(), av.number());
        for (i, tag) in tags.iter().enumerate() {
            assert_eq!(tag[1], av.acquisition(i).unwrap().head.idx.slice);
        }
        // after sorting the slices come out contiguously
        assert_eq!(tags[0][1], 0);
        assert_eq!(tags[7][1], 1);
    }

    #[test]
    fn sort_makes_time_stamps_ascending() {
        let mut av = sample_acquisitions(2, 4);
        av.sort_by_time().unwrap();
        let mut last = 0u32;
        for i in 0..av.number() {
            let t = av.acquisition(i).unwrap().head.acquisition_time_stamp;
            assert!(t >= last);
            last = t;
        }
    }

    #[test]
    fn sort_is_idempotent() {
        let mut av = sample_acquisitions(2, 4);
        av.sort_by_time().unwrap();
        let perm = av.permutation().to_vec();
        let subsets = av.subsets().to_vec();
        av.sort_by_time().unwrap();
        assert_eq!(av.permutation(), &perm[..]);
        assert_eq!(av.subsets(), &subsets[..]);
    }

    #[test]
    fn sorting_an_empty_container_is_not_an_error() {
        let mut av = AcquisitionsVector::new(make_info(1, 8, 4, 1, 2));
        av.sort_by_time().unwrap();
        assert!(matches!(av.kspace_order(), Err(ContainerError::EmptyContainer)));
    }

    #[test]
    fn algebra_rejects_unsorted_operands() {
        let x = sample_acquisitions(1, 4);
        let y = sample_acquisitions(1, 4);
        let mut dest = x.empty_clone();
        assert!(matches!(
            dest.multiply(&x, &y),
            Err(ContainerError::Unsorted)
        ));
    }

    #[test]
    fn algebra_appends_into_an_empty_destination() {
        let mut x = sample_acquisitions(1, 4);
        x.sort_by_time().unwrap();
        let mut dest = x.empty_clone();
        dest.multiply(&x, &x).unwrap();

        assert_eq!(dest.number(), x.number());
        assert!(dest.sorted());
        assert!(!dest.subsets().is_empty());
        // sample data holds ky+1 in every sample, so the product is (ky+1)^2
        for i in 0..dest.number() {
            let ky = dest.acquisition(i).unwrap().head.idx.kspace_encode_step_1 as f32;
            let expected = (ky + 1.0) * (ky + 1.0);
            for v in dest.acquisition(i).unwrap().data.iter() {
                assert!((v.re - expected).abs() < 1e-5);
                assert_eq!(v.im, 0.0);
            }
        }
    }

    #[test]
    fn algebra_overwrites_a_nonempty_destination() {
        let mut x = sample_acquisitions(1, 4);
        x.sort_by_time().unwrap();
        let mut dest = x.clone_container().unwrap();
        dest.axpby(c(1.0), &x, c(1.0), &x).unwrap();

        assert_eq!(dest.number(), x.number());
        for i in 0..dest.number() {
            let ky = dest.acquisition(i).unwrap().head.idx.kspace_encode_step_1 as f32;
            for v in dest.acquisition(i).unwrap().data.iter() {
                assert!((v.re - 2.0 * (ky + 1.0)).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn xapyb_applies_elementwise_coefficients() {
        let mut x = sample_acquisitions(1, 4);
        x.sort_by_time().unwrap();
        let mut dest = x.empty_clone();
        dest.xapyb(&x, &x, &x, &x).unwrap();

        // every operand holds ky+1, so x.*a + y.*b is 2(ky+1)^2
        assert_eq!(dest.number(), x.number());
        for i in 0..dest.number() {
            let ky = dest.acquisition(i).unwrap().head.idx.kspace_encode_step_1 as f32;
            let expected = 2.0 * (ky + 1.0) * (ky + 1.0);
            for v in dest.acquisition(i).unwrap().data.iter() {
                assert!((v.re - expected).abs() < 1e-5);
            }
        }

        let mut dest = x.empty_clone();
        dest.xapyb_mixed(&x, c(2.0), &x, &x).unwrap();
        for i in 0..dest.number() {
            let ky = dest.acquisition(i).unwrap().head.idx.kspace_encode_step_1 as f32;
            let expected = 2.0 * (ky + 1.0) + (ky + 1.0) * (ky + 1.0);
            for v in dest.acquisition(i).unwrap().data.iter() {
                assert!((v.re - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn xapyb_requires_sorted_coefficients() {
        let mut x = sample_acquisitions(1, 4);
        x.sort_by_time().unwrap();
        let unsorted = sample_acquisitions(1, 4);

        let mut dest = x.empty_clone();
        assert!(matches!(
            dest.xapyb(&x, &unsorted, &x, &x),
            Err(ContainerError::Unsorted)
        ));
        assert!(matches!(
            dest.xapyb(&x, &x, &x, &unsorted),
            Err(ContainerError::Unsorted)
        ));
        assert!(matches!(
            dest.xapyb_mixed(&x, c(1.0), &x, &unsorted),
            Err(ContainerError::Unsorted)
        ));
        assert!(dest.is_empty());
    }

    #[test]
    fn ignorable_acquisitions_are_skipped_by_algebra() {
        let mut x = sample_acquisitions(1, 4);
        let mut noise = make_acquisition(0, 0, 5000, 2, 8);
        noise.set_flag(AcquisitionFlag::IsNoiseMeasurement);
        x.append_acquisition(noise);
        x.sort_by_time().unwrap();
        assert_eq!(x.number(), 5);

        let mut dest = x.empty_clone();
        dest.multiply(&x, &x).unwrap();
        assert_eq!(dest.number(), 4);
    }

    #[test]
    fn counters_outside_the_declared_limits_fail_organisation() {
        let mut av = sample_acquisitions(2, 4);
        av.append_acquisition(make_acquisition(7, 0, 9999, 2, 8));
        assert!(matches!(
            av.sort_by_time(),
            Err(ContainerError::CountersOutsideLimits)
        ));
    }

    #[test]
    fn subset_round_trip() {
        let mut av = sample_acquisitions(2, 4);
        av.sort_by_time().unwrap();
        let idx = av.kspace_order().unwrap()[1].clone();

        let mut subset = AcquisitionsVector::default();
        av.get_subset(&mut subset, &idx).unwrap();
        assert_eq!(subset.number(), idx.len());
        assert_eq!(subset.info(), av.info());
        // a second extraction into the now non-empty container must fail
        assert!(matches!(
            av.get_subset(&mut subset, &idx),
            Err(ContainerError::DestinationNotEmpty)
        ));

        for slot in 0..subset.number() {
            subset.acquisition_at_mut(slot).unwrap().data.fill(c(9.0));
        }
        av.set_subset(&subset, &idx).unwrap();
        for &i in &idx {
            assert_eq!(av.acquisition(i).unwrap().data[[0, 0]], c(9.0));
        }

        let short = AcquisitionsVector::default();
        assert!(matches!(
            av.set_subset(&short, &idx),
            Err(ContainerError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn flagged_and_slice_encoding_selection() {
        let mut av = sample_acquisitions(1, 4);
        av.acquisition_at_mut(1)
            .unwrap()
            .set_flag(AcquisitionFlag::IsParallelCalibration);
        av.acquisition_at_mut(3)
            .unwrap()
            .set_flag(AcquisitionFlag::IsParallelCalibrationAndImaging);

        let idx = av
            .flagged_index(&[
                AcquisitionFlag::IsParallelCalibration,
                AcquisitionFlag::IsParallelCalibrationAndImaging,
            ])
            .unwrap();
        assert_eq!(idx, vec![1, 3]);
        assert_eq!(av.slice_encoding_index(0).unwrap().len(), 4);
        assert!(av.slice_encoding_index(1).unwrap().is_empty());
    }

    #[test]
    fn bulk_data_round_trip() {
        let mut av = sample_acquisitions(1, 2);
        av.sort_by_time().unwrap();
        let mut data = av.get_data(false).unwrap();
        assert_eq!(data.len(), 2 * 2 * 8);
        for v in &mut data {
            *v *= 2.0;
        }
        av.set_data(&data, false).unwrap();
        assert_eq!(av.acquisition(0).unwrap().data[[0, 0]], c(2.0));
        assert!(matches!(
            av.set_data(&data[..3], false),
            Err(ContainerError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn trajectory_fill_and_dimensions() {
        let mut av = sample_acquisitions(1, 2);
        assert_eq!(av.trajectory_dimensions().unwrap(), 0);

        let traj: Vec<f32> = (0..2 * 8 * 2).map(|v| v as f32).collect();
        av.fill_trajectory(2, &traj).unwrap();
        assert_eq!(av.trajectory_dimensions().unwrap(), 2);
        let t = av.acquisition(0).unwrap().traj.as_ref().unwrap().clone();
        assert_eq!(t.dim(), (8, 2));
        assert_eq!(t[[0, 1]], 1.0);

        assert!(matches!(
            av.fill_trajectory(3, &traj),
            Err(ContainerError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn reductions_skip_ignorable_acquisitions() {
        let mut av = sample_acquisitions(1, 1);
        let mut noise = make_acquisition(0, 0, 5000, 2, 8);
        noise.data.fill(c(100.0));
        noise.set_flag(AcquisitionFlag::IsNoiseMeasurement);
        av.append_acquisition(noise);
        av.sort_by_time().unwrap();

        // kept data is sixteen samples of 1.0
        assert_eq!(av.sum().unwrap(), c(16.0));
        assert_eq!(av.max().unwrap(), c(1.0));
        assert!((av.norm().unwrap() - 4.0).abs() < 1e-5);
        assert_eq!(av.dot(&av).unwrap(), c(16.0));
    }

    #[test]
    fn header_edits_round_trip_through_the_info_blob() {
        let mut av = sample_acquisitions(1, 4);
        assert_eq!(av.trajectory_type().unwrap(), Trajectory::Cartesian);
        av.set_trajectory_type(Trajectory::Radial).unwrap();
        assert_eq!(av.trajectory_type().unwrap(), Trajectory::Radial);

        av.set_encoding_limit(EncodingDim::Phase, Limit::new(0, 3, 2))
            .unwrap();
        assert_eq!(
            av.get_encoding_limit(EncodingDim::Phase).unwrap(),
            Limit::new(0, 3, 2)
        );
    }

    #[test]
    fn user_floats_are_written_in_logical_order() {
        let mut av = sample_acquisitions(1, 3);
        av.sort_by_time().unwrap();
        av.set_user_floats(&[0.5, 1.5, 2.5], 2).unwrap();
        assert_eq!(av.acquisition(1).unwrap().head.user_float[2], 1.5);
        assert!(matches!(
            av.set_user_floats(&[0.0; 3], 8),
            Err(ContainerError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn kspace_dimensions_follow_the_encoded_space() {
        let av = sample_acquisitions(1, 4);
        assert_eq!(av.kspace_dimensions().unwrap(), [8, 4, 1, 2]);
        let (samples, channels, kept) = av.acquisition_dimensions().unwrap();
        assert_eq!((samples, channels, kept), (8, 2, 4));
    }
}
