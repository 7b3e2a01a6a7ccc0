//! Checkpoint persistence for network parameters
//!
//! A checkpoint is the safetensors serialization of one network's
//! [`VarMap`], written to `{dir}/{kind}_checkpoint`. Restoring checks the
//! saved tensor names and shapes against the target network before any
//! value is copied, so a topology mismatch never leaves a network half
//! overwritten.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{Error, Result};
use crate::utils::io::{is_file_readable, normalize_dir, require_dir};

/// Which network a checkpoint file belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// DCGAN generator
    Generator,
    /// DCGAN discriminator
    Discriminator,
    /// Variational autoencoder (encoder and decoder together)
    VariationalAutoencoder,
    /// Convolutional autoencoder (encoder and decoder together)
    ConvolutionalAutoencoder,
}

impl CheckpointKind {
    /// File name of this checkpoint inside a checkpoint directory
    pub fn file_name(&self) -> &'static str {
        match self {
            CheckpointKind::Generator => "generator_checkpoint",
            CheckpointKind::Discriminator => "discriminator_checkpoint",
            CheckpointKind::VariationalAutoencoder => "variational_autoencoder_checkpoint",
            CheckpointKind::ConvolutionalAutoencoder => "convolutional_autoencoder_checkpoint",
        }
    }
}

/// Full path of a checkpoint inside `dir`, normalizing the trailing separator
pub fn checkpoint_path<P: AsRef<Path>>(dir: P, kind: CheckpointKind) -> Result<PathBuf> {
    Ok(normalize_dir(dir)?.join(kind.file_name()))
}

/// Fail fast when a checkpoint destination cannot be written to
pub fn ensure_checkpoint_dir<P: AsRef<Path>>(dir: P) -> Result<()> {
    let dir = dir.as_ref();
    normalize_dir(dir)?;
    require_dir(dir)
}

/// Save a network's parameters into `dir`
#[instrument(skip(var_map))]
pub fn save_checkpoint<P: AsRef<Path> + std::fmt::Debug>(
    var_map: &VarMap,
    dir: P,
    kind: CheckpointKind,
) -> Result<PathBuf> {
    ensure_checkpoint_dir(dir.as_ref())?;
    let path = checkpoint_path(dir, kind)?;
    var_map.save(&path)?;
    info!("Saved {:?} checkpoint to {}", kind, path.display());
    Ok(path)
}

/// Read the tensor names and shapes stored in a checkpoint file
pub fn inspect_checkpoint<P: AsRef<Path>>(path: P) -> Result<BTreeMap<String, Vec<usize>>> {
    let path = path.as_ref();
    if !is_file_readable(path) {
        return Err(Error::not_found(format!(
            "Checkpoint does not exist: {}",
            path.display()
        )));
    }
    let bytes = std::fs::read(path)?;
    let tensors = safetensors::SafeTensors::deserialize(&bytes).map_err(|err| {
        Error::shape(format!("{} is not a valid checkpoint: {}", path.display(), err))
    })?;
    Ok(tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| (name, view.shape().to_vec()))
        .collect())
}

/// Tensor names and shapes of the variables in a network
pub fn network_topology(var_map: &VarMap) -> Result<BTreeMap<String, Vec<usize>>> {
    let vars = var_map
        .data()
        .lock()
        .map_err(|_| Error::precondition("Variable map lock is poisoned"))?;
    Ok(vars
        .iter()
        .map(|(name, var)| (name.clone(), var.dims().to_vec()))
        .collect())
}

/// Restore a network's parameters from a checkpoint file
///
/// Every variable of the network must be present in the file with the same
/// shape, and the file must not contain tensors the network does not have.
#[instrument(skip(var_map))]
pub fn restore_checkpoint<P: AsRef<Path> + std::fmt::Debug>(
    var_map: &mut VarMap,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    let saved = inspect_checkpoint(path)?;
    let expected = network_topology(var_map)?;

    for (name, dims) in &expected {
        match saved.get(name) {
            None => {
                return Err(Error::shape(format!(
                    "Checkpoint {} has no tensor named {}",
                    path.display(),
                    name
                )))
            }
            Some(saved_dims) if saved_dims != dims => {
                return Err(Error::shape(format!(
                    "Checkpoint tensor {} has shape {:?}, network expects {:?}",
                    name, saved_dims, dims
                )))
            }
            Some(_) => {}
        }
    }
    if let Some(extra) = saved.keys().find(|name| !expected.contains_key(*name)) {
        return Err(Error::shape(format!(
            "Checkpoint {} contains tensor {} that the network does not have",
            path.display(),
            extra
        )));
    }

    var_map.load(path)?;
    debug!("Restored {} tensors from {}", expected.len(), path.display());
    Ok(())
}
