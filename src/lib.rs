//! Containers for raw MR data and the images reconstructed from it.
//!
//! The crate models a measurement as a set of readouts
//! ([`Acquisition`](acquisition::Acquisition)) kept in an
//! [`AcquisitionsVector`]: sorting orders them by time, k-space organisation
//! buckets them into reconstructible subsets, and the container algebra
//! (`axpby`, `multiply`, `dot`, ...) treats the whole set as one vector.
//! Reconstructed images live in an [`ImagesVector`] with the same algebra,
//! plus a derived voxel-grid geometry. On top of both sit coil images and
//! coil sensitivity maps ([`CoilSensitivitiesVector`]), the bridge between
//! channel-resolved and combined images.
//!
//! Datasets persist as MessagePack streams through the [`dataset`] module.

mod algebra;

// =====================================
// Public API of mrdata
// =====================================

pub mod acquisition;
pub mod acquisitions;
pub mod coil;
pub mod dataset;
pub mod encoding;
pub mod error;
pub mod geometry;
pub mod header;
pub mod image;
pub mod images;
pub mod kspace;

pub use acquisition::{Acquisition, AcquisitionFlag, AcquisitionHeader, EncodingCounters};
pub use acquisitions::{AcquisitionData, AcquisitionsVector};
pub use coil::{CoilImagesVector, CoilSensitivitiesVector};
pub use dataset::DatasetLock;
pub use encoding::{CartesianFourierEncoding, FourierEncoding};
pub use error::{ContainerError, DatasetError, GeometryError, HeaderError};
pub use geometry::VoxelGridGeometry;
pub use header::{
    AcquisitionsInfo, Encoding, EncodingDim, EncodingLimits, EncodingSpace, Limit, MrdHeader,
    Trajectory,
};
pub use image::{Image, ImageHeader, ImageWrap};
pub use images::ImagesVector;
pub use kspace::KSpaceSubset;

#[cfg(test)]
mod test_util;
