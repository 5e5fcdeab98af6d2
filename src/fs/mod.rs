mod buffer;
mod dirent;
mod file_type;
mod types;

pub use buffer::AlignedBuffer;
pub use dirent::{DirStream, RawEntry, open_dir, statx_size};
pub use file_type::FileType;
pub use types::{BUFFER_SIZE, FileDes, SyscallBuffer};
