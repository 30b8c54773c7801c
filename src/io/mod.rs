// Copyright 2026 the vega authors
// Distributed under the Boost Software License, Version 1.0. (See accompanying
// file LICENSE.txt or copy at http://www.boost.org/LICENSE_1_0.txt)

//! File and socket surfaces over the runtime.

pub mod file;
#[cfg(target_os = "linux")]
pub mod net;

pub use file::{File, FileBackendType, OpenMode, StreamFile};
#[cfg(target_os = "linux")]
pub use file::UringFile;
#[cfg(target_os = "linux")]
pub use net::{Inet4Address, Inet4StreamSocket};
