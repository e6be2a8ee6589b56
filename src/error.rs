use thiserror::Error;

use crate::header::Trajectory;

/// Failures while decoding or interrogating the serialized acquisition-system header.
#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("acquisitions info is empty, no header available")]
    Empty,
    #[error("the header declares no encoding")]
    NoEncoding,
    #[error("only one encoding is supported, the header declares {0}")]
    MultipleEncodings(usize),
    #[error("encoding limit `{0}` is not declared in the header")]
    MissingEncodingLimit(&'static str),
    #[error("the header does not declare the number of receiver channels")]
    MissingReceiverChannels,
    #[error("decoding the serialized header failed: {0}")]
    Decode(rmp_serde::decode::Error),
    #[error("encoding the header failed: {0}")]
    Encode(rmp_serde::encode::Error),
}

/// Failures while deriving or rewriting the voxel-grid description of an image set.
#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("3D data containing multiple slices is not supported")]
    SlicesWithin3d,
    #[error("no geometrical info available, call set_up_geom_info() first")]
    Missing,
    #[error("geometries are not reorientable: {0}")]
    NotReorientable(&'static str),
    #[error("reorientation did not reproduce the target geometry")]
    ReorientFailed,
}

/// Failures of the raw-dataset persistence layer.
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("dataset I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("serializing to the dataset failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("deserializing from the dataset failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Errors raised by the acquisition and image containers.
///
/// Everything here is a hard precondition violation or an unsupported
/// configuration; recoverable data irregularities are logged instead.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("algebraic operations cannot be applied to unsorted data")]
    Unsorted,
    #[error("the k-space is not organised yet, call sort(), sort_by_time() or organise_kspace() first")]
    NotOrganised,
    #[error("index {index} is out of range for a container of {len} elements")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("operand sizes mismatch (expected {expected}, found {found})")]
    SizeMismatch { expected: usize, found: usize },
    #[error("the destination container must be empty")]
    DestinationNotEmpty,
    #[error("the container holds no data")]
    EmptyContainer,
    #[error("inconsistent {0} across the container")]
    InconsistentDimensions(&'static str),
    #[error("acquisition counters lie outside the declared encoding limits")]
    CountersOutsideLimits,
    #[error("trajectory type {0:?} is not supported by this build")]
    UnsupportedTrajectory(Trajectory),
    #[error("a non-Cartesian trajectory must be stored with trajectory dimensions > 0")]
    TrajectoryDimensionsMissing,
    #[error("no sensitivity map with a matching tag is stored")]
    NoMatchingMap,
    #[error("the source image has more than one channel")]
    SourceNotSingleChannel,
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}
