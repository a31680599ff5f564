//! Anonymous and named (FIFO) pipes.
//!
//! A pipe is one-directional. Two of them, crossed, make the duplex
//! [`IpcStream`] the framing layer expects; [`duplex`] and
//! [`NamedPipe::open_duplex`] do the crossing.

use std::ffi::CString;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::IpcStream;

/// Read end of a pipe.
#[derive(Debug)]
pub struct PipeReader(File);

/// Write end of a pipe.
#[derive(Debug)]
pub struct PipeWriter(File);

impl PipeReader {
    pub(crate) fn into_file(self) -> File {
        self.0
    }
}

impl PipeWriter {
    pub(crate) fn into_file(self) -> File {
        self.0
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl From<PipeReader> for std::process::Stdio {
    fn from(reader: PipeReader) -> Self {
        reader.0.into()
    }
}

impl From<PipeWriter> for std::process::Stdio {
    fn from(writer: PipeWriter) -> Self {
        writer.0.into()
    }
}

/// Create an anonymous pipe.
///
/// Both ends are close-on-exec; hand one to a child explicitly through
/// `std::process::Stdio` if it should be inherited.
pub fn anonymous() -> Result<(PipeReader, PipeWriter)> {
    let mut fds: [libc::c_int; 2] = [0; 2];

    // SAFETY: `fds` is a valid writable array of two c_ints as `pipe` requires.
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }

    // SAFETY: `pipe` succeeded, so both descriptors are open and owned by nobody else.
    let (read_fd, write_fd) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_cloexec(read_fd.as_raw_fd())?;
    set_cloexec(write_fd.as_raw_fd())?;

    debug!(read_fd = fds[0], write_fd = fds[1], "created anonymous pipe");
    Ok((PipeReader(File::from(read_fd)), PipeWriter(File::from(write_fd))))
}

/// Create two anonymous pipes wired into a pair of connected duplex streams.
///
/// Bytes written to one stream are read from the other, in both directions.
pub fn duplex() -> Result<(IpcStream, IpcStream)> {
    let (left_read, right_write) = anonymous()?;
    let (right_read, left_write) = anonymous()?;
    Ok((
        IpcStream::from_pipes(left_read, left_write),
        IpcStream::from_pipes(right_read, right_write),
    ))
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    // SAFETY: `fd` is an open descriptor owned by the caller for the duration of the call.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc == -1 {
        return Err(TransportError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Which end of a named duplex pair to open first.
///
/// Opening a FIFO blocks until the other side opens the opposite end, so the
/// two peers must use opposite orders or both will wait forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOrder {
    ReadFirst,
    WriteFirst,
}

/// A named pipe (FIFO) on the filesystem.
///
/// The FIFO is created on construction and removed on drop, as long as the
/// path still refers to the FIFO this value created.
pub struct NamedPipe {
    path: PathBuf,
    created_inode: (u64, u64),
}

impl NamedPipe {
    /// Default permission mode for created FIFOs.
    pub const DEFAULT_MODE: u32 = 0o600;

    /// Create a FIFO at `path` with the default mode.
    ///
    /// A stale FIFO at `path` is replaced. Any other kind of file is left
    /// alone and reported as an error.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_mode(path, Self::DEFAULT_MODE)
    }

    /// Create a FIFO at `path` with an explicit mode.
    pub fn create_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let pipe_err = |source: std::io::Error| TransportError::Pipe {
            path: path.clone(),
            source,
        };

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if metadata.file_type().is_fifo() {
                debug!(?path, "removing stale fifo");
                std::fs::remove_file(&path).map_err(pipe_err)?;
            } else {
                return Err(pipe_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a fifo",
                )));
            }
        }

        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            pipe_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path contains an interior NUL byte",
            ))
        })?;

        // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
        if rc != 0 {
            return Err(pipe_err(std::io::Error::last_os_error()));
        }

        // mkfifo honours the umask; apply the requested mode exactly.
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(pipe_err)?;
        let metadata = std::fs::symlink_metadata(&path).map_err(pipe_err)?;

        info!(?path, "created named pipe");

        Ok(Self {
            created_inode: (metadata.dev(), metadata.ino()),
            path,
        })
    }

    /// Open the read end of the FIFO at `path`.
    ///
    /// Blocks until some process opens the write end.
    pub fn open_reader(path: impl AsRef<Path>) -> Result<PipeReader> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TransportError::Pipe {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, "opened fifo for reading");
        Ok(PipeReader(file))
    }

    /// Open the write end of the FIFO at `path`.
    ///
    /// Blocks until some process opens the read end.
    pub fn open_writer(path: impl AsRef<Path>) -> Result<PipeWriter> {
        let path = path.as_ref();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| TransportError::Pipe {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(?path, "opened fifo for writing");
        Ok(PipeWriter(file))
    }

    /// Open two FIFOs as one duplex stream.
    pub fn open_duplex(
        read_path: impl AsRef<Path>,
        write_path: impl AsRef<Path>,
        order: OpenOrder,
    ) -> Result<IpcStream> {
        let (reader, writer) = match order {
            OpenOrder::ReadFirst => {
                let reader = Self::open_reader(read_path)?;
                (reader, Self::open_writer(write_path)?)
            }
            OpenOrder::WriteFirst => {
                let writer = Self::open_writer(write_path)?;
                (Self::open_reader(read_path)?, writer)
            }
        };
        Ok(IpcStream::from_pipes(reader, writer))
    }

    /// The filesystem path of this FIFO.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "named-pipe"
    }
}

impl Drop for NamedPipe {
    fn drop(&mut self) {
        let (expected_dev, expected_ino) = self.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_fifo()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "removing fifo");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "fifo path identity changed; skipping cleanup");
            }
        }
    }
}

impl std::fmt::Debug for NamedPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedPipe").field("path", &self.path).finish()
    }
}
