// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The four repository tools offered to the API backend.

mod list_dir;
mod read_file;
mod run_command;
mod write_file;

pub use list_dir::ListDirHandler;
pub use read_file::ReadFileHandler;
pub use run_command::RunCommandHandler;
pub use write_file::WriteFileHandler;
