//! Utility functions shared by the model builders and the training plumbing

/// Mathematical utilities
pub mod math {
    /// Calculate Xavier/Glorot uniform initialization bound
    pub fn xavier_bound(fan_in: usize, fan_out: usize) -> f64 {
        (6.0 / (fan_in + fan_out) as f64).sqrt()
    }

    /// Calculate Xavier/Glorot normal initialization standard deviation
    pub fn xavier_std(fan_in: usize, fan_out: usize) -> f64 {
        (2.0 / (fan_in + fan_out) as f64).sqrt()
    }

    /// Calculate He uniform initialization bound
    pub fn he_bound(fan_in: usize) -> f64 {
        (6.0 / fan_in as f64).sqrt()
    }

    /// Calculate He initialization standard deviation
    pub fn he_std(fan_in: usize) -> f64 {
        (2.0 / fan_in as f64).sqrt()
    }

    /// Padding that keeps `out = ceil(in / stride)` for an odd kernel
    pub fn same_padding(kernel_size: usize) -> usize {
        kernel_size.saturating_sub(1) / 2
    }

    /// Spatial size after a "same"-padded convolution with the given stride
    pub fn same_conv_output(size: usize, stride: usize) -> usize {
        size.div_ceil(stride)
    }
}

/// File I/O utilities
pub mod io {
    use std::path::{Path, PathBuf};

    use crate::error::{Error, Result};

    /// Append a trailing separator to a directory path if it lacks one
    pub fn normalize_dir<P: AsRef<Path>>(dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref().as_os_str();
        let blank = dir.to_str().map_or(dir.is_empty(), |s| s.trim().is_empty());
        if blank {
            return Err(Error::config("Not a valid directory: empty path"));
        }
        let bytes = dir.as_encoded_bytes();
        if bytes.ends_with(b"/") || bytes.ends_with(std::path::MAIN_SEPARATOR_STR.as_bytes()) {
            return Ok(PathBuf::from(dir));
        }
        let mut normalized = dir.to_os_string();
        normalized.push(std::path::MAIN_SEPARATOR_STR);
        Ok(PathBuf::from(normalized))
    }

    /// Require that `path` exists and is a directory
    pub fn require_dir<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if path.is_dir() {
            Ok(())
        } else {
            Err(Error::not_found(format!(
                "Directory does not exist: {}",
                path.display()
            )))
        }
    }

    /// Check if file exists and is readable
    pub fn is_file_readable<P: AsRef<Path>>(path: P) -> bool {
        let path = path.as_ref();
        path.exists() && path.is_file() && std::fs::metadata(path).is_ok()
    }
}
