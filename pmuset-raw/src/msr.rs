//! MSR (Model-Specific Register) read/write primitives
//!
//! This module provides low-level MSR access through `/dev/cpu/*/msr`.
//! Each register is addressed by using its MSR number as the file offset;
//! every transfer is exactly 8 bytes.
//! For pooled, topology-checked access, use the higher-level layer in pmuset-agent.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

/// Directory holding one `<cpu>/msr` device node per logical CPU
pub const DEFAULT_MSR_ROOT: &str = "/dev/cpu";

pub type Result<T> = std::result::Result<T, MsrError>;

/// Errors that can occur during MSR operations
#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error("Failed to open MSR device {} for CPU {cpu}: {source}", path.display())]
    OpenFailed {
        cpu: u32,
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed { cpu: u32, msr: u64, source: io::Error },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed { cpu: u32, msr: u64, source: io::Error },

    #[error("Failed to seek to MSR 0x{msr:X} on CPU {cpu}: {source}")]
    SeekFailed { cpu: u32, msr: u64, source: io::Error },
}

impl MsrError {
    /// CPU the failed operation targeted
    pub fn cpu(&self) -> u32 {
        match self {
            MsrError::OpenFailed { cpu, .. }
            | MsrError::ReadFailed { cpu, .. }
            | MsrError::WriteFailed { cpu, .. }
            | MsrError::SeekFailed { cpu, .. } => *cpu,
        }
    }

    /// Register address, if the failure happened after the device was opened
    pub fn msr(&self) -> Option<u64> {
        match self {
            MsrError::OpenFailed { .. } => None,
            MsrError::ReadFailed { msr, .. }
            | MsrError::WriteFailed { msr, .. }
            | MsrError::SeekFailed { msr, .. } => Some(*msr),
        }
    }

    /// Underlying OS error
    pub fn io_error(&self) -> &io::Error {
        match self {
            MsrError::OpenFailed { source, .. }
            | MsrError::ReadFailed { source, .. }
            | MsrError::WriteFailed { source, .. }
            | MsrError::SeekFailed { source, .. } => source,
        }
    }

    pub fn into_io_error(self) -> io::Error {
        match self {
            MsrError::OpenFailed { source, .. }
            | MsrError::ReadFailed { source, .. }
            | MsrError::WriteFailed { source, .. }
            | MsrError::SeekFailed { source, .. } => source,
        }
    }
}

/// Path of the MSR device node for `cpu` below `root`
pub fn device_path(root: &Path, cpu: u32) -> PathBuf {
    root.join(cpu.to_string()).join("msr")
}

/// An open MSR device node for one CPU
#[derive(Debug)]
pub struct MsrFile {
    file: File,
    cpu: u32,
}

impl MsrFile {
    /// Open the device for reading and writing
    ///
    /// Writes are synchronous (`O_SYNC`).
    ///
    /// # Errors
    ///
    /// Returns [`MsrError::OpenFailed`] if the node does not exist (msr
    /// driver not loaded, CPU offline) or the caller lacks root/CAP_SYS_RAWIO.
    pub fn open(root: &Path, cpu: u32) -> Result<Self> {
        let path = device_path(root, cpu);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&path)
            .map_err(|source| MsrError::OpenFailed { cpu, path, source })?;

        Ok(Self { file, cpu })
    }

    /// Open the device for reading only
    pub fn open_read_only(root: &Path, cpu: u32) -> Result<Self> {
        let path = device_path(root, cpu);
        let file = File::open(&path).map_err(|source| MsrError::OpenFailed { cpu, path, source })?;

        Ok(Self { file, cpu })
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    /// Read a 64-bit value from an MSR
    pub fn read(&mut self, msr: u64) -> Result<u64> {
        let cpu = self.cpu;
        self.file
            .seek(SeekFrom::Start(msr))
            .map_err(|source| MsrError::SeekFailed { cpu, msr, source })?;

        let mut buffer = [0u8; 8];
        self.file
            .read_exact(&mut buffer)
            .map_err(|source| MsrError::ReadFailed { cpu, msr, source })?;

        Ok(u64::from_le_bytes(buffer))
    }

    /// Write a 64-bit value to an MSR
    ///
    /// # Safety
    ///
    /// Writing incorrect values to MSRs can cause system instability or crashes.
    /// Callers that only intend to change part of a register must read it first
    /// and preserve the bits they do not own.
    pub fn write(&mut self, msr: u64, value: u64) -> Result<()> {
        let cpu = self.cpu;
        self.file
            .seek(SeekFrom::Start(msr))
            .map_err(|source| MsrError::SeekFailed { cpu, msr, source })?;

        self.file
            .write_all(&value.to_le_bytes())
            .map_err(|source| MsrError::WriteFailed { cpu, msr, source })?;

        Ok(())
    }
}

impl AsRawFd for MsrFile {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Read a 64-bit value from an MSR with a one-shot read-only open
///
/// # Arguments
///
/// * `root` - Device directory, normally [`DEFAULT_MSR_ROOT`]
/// * `cpu` - CPU core number (0-indexed)
/// * `msr` - MSR address (e.g., 0x38F for IA32_PERF_GLOBAL_CTRL)
///
/// # Example
///
/// ```ignore
/// use std::path::Path;
/// use pmuset_raw::{read_msr, DEFAULT_MSR_ROOT};
///
/// let value = read_msr(Path::new(DEFAULT_MSR_ROOT), 0, 0x38F)?;
/// println!("IA32_PERF_GLOBAL_CTRL = 0x{:016X}", value);
/// ```
pub fn read_msr(root: &Path, cpu: u32, msr: u64) -> Result<u64> {
    MsrFile::open_read_only(root, cpu)?.read(msr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("0")).unwrap();
        let file = File::create(device_path(dir.path(), 0)).unwrap();
        file.set_len(0x1000).unwrap();
        dir
    }

    #[test]
    fn test_msr_error_display() {
        let err = MsrError::OpenFailed {
            cpu: 0,
            path: PathBuf::from("/dev/cpu/0/msr"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("Failed to open MSR device"));
        assert_eq!(err.cpu(), 0);
        assert_eq!(err.msr(), None);
    }

    #[test]
    fn test_device_path() {
        assert_eq!(
            device_path(Path::new(DEFAULT_MSR_ROOT), 12),
            PathBuf::from("/dev/cpu/12/msr")
        );
    }

    #[test]
    fn test_write_then_read_at_offset() {
        let root = fake_root();
        let mut msr = MsrFile::open(root.path(), 0).unwrap();
        msr.write(0x38F, 0x0000_0007_0000_00FF).unwrap();

        assert_eq!(msr.read(0x38F).unwrap(), 0x0000_0007_0000_00FF);
        assert_eq!(read_msr(root.path(), 0, 0x38F).unwrap(), 0x0000_0007_0000_00FF);
        // neighbouring register untouched
        assert_eq!(msr.read(0x38D).unwrap(), 0);
    }

    #[test]
    fn test_open_missing_cpu() {
        let root = fake_root();
        let err = MsrFile::open(root.path(), 7).unwrap_err();
        assert!(matches!(err, MsrError::OpenFailed { cpu: 7, .. }));
        assert_eq!(err.io_error().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_short_read_fails() {
        let root = fake_root();
        let mut msr = MsrFile::open(root.path(), 0).unwrap();
        let err = msr.read(0x2000).unwrap_err();
        assert!(matches!(err, MsrError::ReadFailed { msr: 0x2000, .. }));
    }
}
