// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

//! Unified file handle over a per-platform backend.
//!
//! On Linux the io_uring backend is used whenever a ring is available; the
//! stream backend is the portable synchronous fallback. Both keep persistent
//! read and write cursors: positional calls reposition the matching cursor
//! to `offset + n`, cursor calls continue where the previous one stopped.

use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::{BitAnd, BitOr};

use crate::error::{Error, Result};

/// Bitset of open flags. Creation is implicit for writable modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenMode(u32);

impl OpenMode {
    pub const READ: OpenMode = OpenMode(1 << 0);
    pub const WRITE: OpenMode = OpenMode(1 << 1);
    pub const READ_WRITE: OpenMode = OpenMode(Self::READ.0 | Self::WRITE.0);
    pub const TRUNCATE: OpenMode = OpenMode(1 << 2);

    pub const fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for OpenMode {
    type Output = OpenMode;

    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

impl BitAnd for OpenMode {
    type Output = OpenMode;

    fn bitand(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 & rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileBackendType {
    None,
    Stream,
    IoUring,
}

enum Backend {
    #[cfg(target_os = "linux")]
    Uring(UringFile),
    Stream(StreamFile),
}

/// A file whose reads and writes settle through the runtime.
#[derive(Default)]
pub struct File {
    backend: Option<Backend>,
}

impl File {
    pub fn new() -> Self {
        Self { backend: None }
    }

    /// Opens `path`, selecting the io_uring backend when this thread can
    /// obtain a ring and the stream backend otherwise.
    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<()> {
        self.close();

        #[cfg(target_os = "linux")]
        if crate::uring::is_available() {
            self.backend = Some(Backend::Uring(UringFile::open(path, mode)?));
            return Ok(());
        }

        self.backend = Some(Backend::Stream(StreamFile::open(path, mode)?));
        Ok(())
    }

    pub fn backend_type(&self) -> FileBackendType {
        match self.backend {
            None => FileBackendType::None,
            #[cfg(target_os = "linux")]
            Some(Backend::Uring(_)) => FileBackendType::IoUring,
            Some(Backend::Stream(_)) => FileBackendType::Stream,
        }
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    pub fn close(&mut self) {
        self.backend = None;
    }

    /// Reads into `buf` from the read cursor, advancing it by the returned
    /// byte count. Short reads are reported as-is.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.read_impl(buf, -1).await
    }

    /// Reads into `buf` from `offset`; the read cursor moves to
    /// `offset + n`.
    pub async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.read_impl(buf, offset as i64).await
    }

    /// Writes `buf` at the write cursor, advancing it by the returned byte
    /// count.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.write_impl(buf, -1).await
    }

    /// Writes `buf` at `offset`; the write cursor moves to `offset + n`.
    pub async fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.write_impl(buf, offset as i64).await
    }

    async fn read_impl(&mut self, buf: &mut [u8], offset: i64) -> Result<usize> {
        match self.backend.as_mut() {
            None => Err(Error::NotOpen),
            #[cfg(target_os = "linux")]
            Some(Backend::Uring(file)) => file.read(buf, offset).await,
            Some(Backend::Stream(file)) => file.read(buf, offset),
        }
    }

    async fn write_impl(&mut self, buf: &[u8], offset: i64) -> Result<usize> {
        match self.backend.as_mut() {
            None => Err(Error::NotOpen),
            #[cfg(target_os = "linux")]
            Some(Backend::Uring(file)) => file.write(buf, offset).await,
            Some(Backend::Stream(file)) => file.write(buf, offset),
        }
    }
}

//-----------------------------------------------------------------------------

#[cfg(target_os = "linux")]
pub use uring_file::UringFile;

#[cfg(target_os = "linux")]
mod uring_file {
    use io_uring::{opcode, types};
    use nix::errno::Errno;
    use nix::fcntl::OFlag;
    use nix::sys::stat::Mode;
    use std::os::fd::RawFd;

    use super::OpenMode;
    use crate::error::{Error, Result};
    use crate::uring;

    /// io_uring file backend. The offset argument of read/write uses `-1`
    /// for "continue from the cursor".
    pub struct UringFile {
        fd: RawFd,
        read_pos: i64,
        write_pos: i64,
    }

    impl UringFile {
        pub fn open(path: &str, mode: OpenMode) -> Result<Self> {
            let mut flags = if mode.contains(OpenMode::READ_WRITE) {
                OFlag::O_RDWR
            } else if mode.contains(OpenMode::READ) {
                OFlag::O_RDONLY
            } else if mode.contains(OpenMode::WRITE) {
                OFlag::O_WRONLY
            } else {
                OFlag::O_RDONLY
            };

            if mode.contains(OpenMode::TRUNCATE) {
                flags |= OFlag::O_TRUNC;
            }
            flags |= OFlag::O_CREAT;

            let fd = nix::fcntl::open(path, flags, Mode::from_bits_truncate(0o644))
                .map_err(|errno| Error::Io { op: "open", errno })?;

            Ok(Self { fd, read_pos: 0, write_pos: 0 })
        }

        pub async fn read(&mut self, buf: &mut [u8], offset: i64) -> Result<usize> {
            let offset = if offset == -1 { self.read_pos } else { offset };

            let entry = opcode::Read::new(
                types::Fd(self.fd),
                buf.as_mut_ptr(),
                buf.len() as u32,
            )
            .offset(offset as u64)
            .build();

            let res = uring::run_res(entry).await?;
            if res < 0 {
                return Err(Error::Io { op: "read", errno: Errno::from_raw(-res) });
            }

            self.read_pos = offset + i64::from(res);
            Ok(res as usize)
        }

        pub async fn write(&mut self, buf: &[u8], offset: i64) -> Result<usize> {
            let offset = if offset == -1 { self.write_pos } else { offset };

            let entry = opcode::Write::new(
                types::Fd(self.fd),
                buf.as_ptr(),
                buf.len() as u32,
            )
            .offset(offset as u64)
            .build();

            let res = uring::run_res(entry).await?;
            if res < 0 {
                return Err(Error::Io { op: "write", errno: Errno::from_raw(-res) });
            }

            self.write_pos = offset + i64::from(res);
            Ok(res as usize)
        }
    }

    impl Drop for UringFile {
        fn drop(&mut self) {
            let _ = nix::unistd::close(self.fd);
        }
    }
}

//-----------------------------------------------------------------------------

/// Portable synchronous backend. Calls complete immediately.
pub struct StreamFile {
    file: std::fs::File,
    read_pos: i64,
    write_pos: i64,
}

impl StreamFile {
    pub fn open(path: &str, mode: OpenMode) -> Result<Self> {
        let writable = mode.contains(OpenMode::WRITE);
        let file = std::fs::OpenOptions::new()
            .read(mode.contains(OpenMode::READ))
            .write(writable)
            .truncate(mode.contains(OpenMode::TRUNCATE) && writable)
            .create(writable)
            .open(path)
            .map_err(|e| Error::Io {
                op: "open",
                errno: nix::errno::Errno::from_raw(e.raw_os_error().unwrap_or(0)),
            })?;

        Ok(Self { file, read_pos: 0, write_pos: 0 })
    }

    pub fn read(&mut self, buf: &mut [u8], offset: i64) -> Result<usize> {
        let offset = if offset == -1 { self.read_pos } else { offset };

        let n = self
            .file
            .seek(SeekFrom::Start(offset as u64))
            .and_then(|_| self.file.read(buf))
            .map_err(|e| Error::Io {
                op: "read",
                errno: nix::errno::Errno::from_raw(e.raw_os_error().unwrap_or(0)),
            })?;

        self.read_pos = offset + n as i64;
        Ok(n)
    }

    pub fn write(&mut self, buf: &[u8], offset: i64) -> Result<usize> {
        let offset = if offset == -1 { self.write_pos } else { offset };

        let n = self
            .file
            .seek(SeekFrom::Start(offset as u64))
            .and_then(|_| self.file.write(buf))
            .map_err(|e| Error::Io {
                op: "write",
                errno: nix::errno::Errno::from_raw(e.raw_os_error().unwrap_or(0)),
            })?;

        self.write_pos = offset + n as i64;
        Ok(n)
    }
}

//-----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_mode_combines_like_a_bitset() {
        let mode = OpenMode::READ | OpenMode::WRITE;
        assert_eq!(mode, OpenMode::READ_WRITE);
        assert!(mode.contains(OpenMode::READ));
        assert!(mode.contains(OpenMode::WRITE));
        assert!(!mode.contains(OpenMode::TRUNCATE));
        assert!((OpenMode::READ & OpenMode::WRITE).is_empty());
    }

    #[test]
    fn unopened_file_reports_none_and_rejects_io() {
        let file = File::new();
        assert_eq!(file.backend_type(), FileBackendType::None);
        assert!(!file.is_open());
    }

    #[test]
    fn stream_backend_round_trips_with_cursors() {
        let path = std::env::temp_dir().join("vega_stream_file_test.txt");
        let path = path.to_str().expect("temp path is utf-8");

        let mut file = StreamFile::open(path, OpenMode::READ_WRITE | OpenMode::TRUNCATE)
            .expect("open stream file");

        assert_eq!(file.write(b"AAAAAAAAAA", -1).expect("write"), 10);
        assert_eq!(file.write(b"BBB", 3).expect("write at offset"), 3);

        let mut buf = [0u8; 10];
        assert_eq!(file.read(&mut buf, 0).expect("read"), 10);
        assert_eq!(&buf, b"AAABBBAAAA");

        // The write cursor sits after the positional write.
        assert_eq!(file.write(b"C", -1).expect("write"), 1);
        assert_eq!(file.read(&mut buf[..7], 0).expect("read"), 7);
        assert_eq!(&buf[..7], b"AAABBBC");

        let _ = std::fs::remove_file(path);
    }
}
