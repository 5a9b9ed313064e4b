//! Binary restart files.
//!
//! Layout: the magic `PQCK`, a little-endian `u32` format version, a `u32`
//! flag word, then bincode sections in fixed order:
//!
//! 1. [`TimeStepState`]
//! 2. nodal values
//! 3. profile identity of the global matrix
//! 4. contact interface states
//!
//! A checkpoint can only be restored into a driver built from the same
//! model; the profile identity is compared after the contact state is
//! loaded. The identity recorded is the one implied by the committed
//! contact pairings, not necessarily that of the last assembled matrix.

use crate::contact::InterfaceState;
use crate::driver::{EquilibriumDriver, TimeStepState};
use crate::error::{Error, Result};
use crate::sparse::ProfileIdentity;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

pub const MAGIC: [u8; 4] = *b"PQCK";
pub const VERSION: u32 = 1;

/// Flag bit: the model has contact interfaces.
pub const FLAG_CONTACT: u32 = 1;

/// Everything needed to continue an analysis from an accepted increment.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub state: TimeStepState,
    pub values: Vec<f64>,
    pub profile: Option<ProfileIdentity>,
    pub contact: Vec<InterfaceState>,
}

fn encode<W: Write, T: Serialize>(w: &mut W, section: &str, value: &T) -> Result<()> {
    bincode::serialize_into(w, value).map_err(|e| Error::Checkpoint(format!("writing {}: {}", section, e)))
}

fn decode<R: Read, T: DeserializeOwned>(r: &mut R, section: &str) -> Result<T> {
    bincode::deserialize_from(r).map_err(|e| Error::Checkpoint(format!("reading {}: {}", section, e)))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

impl Checkpoint {
    /// Capture the committed state of `driver`.
    pub fn capture(driver: &EquilibriumDriver) -> Self {
        Self {
            state: driver.state().clone(),
            values: driver.nodal_values().to_vec(),
            profile: Some(driver.profile_identity()),
            contact: driver.contact().save_state(),
        }
    }

    pub fn flags(&self) -> u32 {
        if self.contact.is_empty() {
            0
        } else {
            FLAG_CONTACT
        }
    }

    pub fn write<W: Write>(&self, mut w: W) -> Result<()> {
        w.write_all(&MAGIC)?;
        w.write_all(&VERSION.to_le_bytes())?;
        w.write_all(&self.flags().to_le_bytes())?;
        encode(&mut w, "time state", &self.state)?;
        encode(&mut w, "nodal values", &self.values)?;
        encode(&mut w, "profile identity", &self.profile)?;
        encode(&mut w, "contact state", &self.contact)?;
        w.flush()?;
        Ok(())
    }

    pub fn read<R: Read>(mut r: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::Checkpoint(format!("bad magic {:?}", magic)));
        }
        let version = read_u32(&mut r)?;
        if version != VERSION {
            return Err(Error::Checkpoint(format!(
                "unsupported checkpoint version {} (expected {})",
                version, VERSION
            )));
        }
        let flags = read_u32(&mut r)?;
        let checkpoint = Self {
            state: decode(&mut r, "time state")?,
            values: decode(&mut r, "nodal values")?,
            profile: decode(&mut r, "profile identity")?,
            contact: decode(&mut r, "contact state")?,
        };
        if checkpoint.flags() != flags {
            return Err(Error::Checkpoint(format!(
                "flag word {:#x} does not match contents {:#x}",
                flags,
                checkpoint.flags()
            )));
        }
        Ok(checkpoint)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write(&mut buf)?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read(bytes)
    }

    /// Load into `driver`. On an identity mismatch the driver is reset to
    /// its reference state and the error returned.
    pub fn restore(&self, driver: &mut EquilibriumDriver) -> Result<()> {
        driver.restore(self.state.clone(), self.values.clone(), &self.contact)?;
        let identity = Some(driver.profile_identity());
        if identity != self.profile {
            driver.init()?;
            return Err(Error::Checkpoint(format!(
                "matrix profile {:?} does not match checkpoint {:?}",
                identity, self.profile
            )));
        }
        Ok(())
    }
}

/// Write the committed state of `driver` to `path`.
pub fn save(driver: &EquilibriumDriver, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let checkpoint = Checkpoint::capture(driver);
    checkpoint.write(BufWriter::new(File::create(path)?))?;
    info!(path = %path.display(), time = checkpoint.state.time, "checkpoint written");
    Ok(())
}

/// Restore `driver` from the file at `path`.
pub fn load(driver: &mut EquilibriumDriver, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let checkpoint = Checkpoint::read(BufReader::new(File::open(path)?))?;
    checkpoint.restore(driver)?;
    info!(path = %path.display(), time = checkpoint.state.time, "checkpoint restored");
    Ok(())
}
