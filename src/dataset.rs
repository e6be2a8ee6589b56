//! Persistence of acquisition datasets.
//!
//! A dataset file is a MessagePack stream: a file header carrying the raw
//! metadata blob and the acquisition count, followed by the acquisitions one
//! by one. All file access goes through a shared [`DatasetLock`] so that
//! containers backed by the same file never interleave their I/O.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write as _};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::warn;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::acquisition::Acquisition;
use crate::error::DatasetError;
use crate::header::AcquisitionsInfo;

/// Cloneable handle on the mutex serialising access to one dataset file.
#[derive(Debug, Clone, Default)]
pub struct DatasetLock(Arc<Mutex<()>>);

impl DatasetLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn hold(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Serialize, Deserialize)]
struct FileHeader {
    info: ByteBuf,
    count: u64,
}

/// Writes a dataset, replacing any file already at `path`.
pub fn write(
    path: &Path,
    lock: &DatasetLock,
    info: &AcquisitionsInfo,
    acqs: &[&Acquisition],
) -> Result<(), DatasetError> {
    let _guard = lock.hold();
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("removing {} failed ({e}), overwriting in place", path.display());
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    let header = FileHeader {
        info: ByteBuf::from(info.raw().to_vec()),
        count: acqs.len() as u64,
    };
    rmp_serde::encode::write(&mut writer, &header)?;
    for acq in acqs {
        rmp_serde::encode::write(&mut writer, acq)?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a dataset back as its metadata and acquisitions.
pub fn read(
    path: &Path,
    lock: &DatasetLock,
) -> Result<(AcquisitionsInfo, Vec<Acquisition>), DatasetError> {
    let _guard = lock.hold();
    let mut de = rmp_serde::Deserializer::new(BufReader::new(File::open(path)?));
    let header = FileHeader::deserialize(&mut de)?;
    let mut acqs = Vec::new();
    for _ in 0..header.count {
        acqs.push(Acquisition::deserialize(&mut de)?);
    }
    Ok((AcquisitionsInfo::from_raw(header.info.into_vec()), acqs))
}
