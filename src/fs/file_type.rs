use libc::{
    DT_BLK, DT_CHR, DT_DIR, DT_FIFO, DT_LNK, DT_REG, DT_SOCK, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO,
    S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK, mode_t,
};

/// Represents the type of a file in the filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    BlockDevice,
    CharDevice,
    Directory,
    Fifo,
    Symlink,
    RegularFile,
    Socket,
    Unknown,
}

impl FileType {
    /// Converts a `dirent64` `d_type` to a `FileType`. Some filesystems
    /// report `DT_UNKNOWN` for everything, so `Unknown` here means
    /// "go ask `statx`", not "give up".
    #[must_use]
    #[inline]
    pub const fn from_dtype(d_type: u8) -> Self {
        match d_type {
            DT_DIR => Self::Directory,
            DT_REG => Self::RegularFile,
            DT_BLK => Self::BlockDevice,
            DT_CHR => Self::CharDevice,
            DT_FIFO => Self::Fifo,
            DT_LNK => Self::Symlink,
            DT_SOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }

    /// Classifies from a stat-family `st_mode`/`stx_mode`.
    #[must_use]
    #[inline]
    pub const fn from_mode(mode: mode_t) -> Self {
        match mode & S_IFMT {
            S_IFREG => Self::RegularFile,
            S_IFDIR => Self::Directory,
            S_IFBLK => Self::BlockDevice,
            S_IFCHR => Self::CharDevice,
            S_IFIFO => Self::Fifo,
            S_IFLNK => Self::Symlink,
            S_IFSOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FileType;

    #[test]
    fn dtype_mapping() {
        assert_eq!(FileType::from_dtype(libc::DT_DIR), FileType::Directory);
        assert_eq!(FileType::from_dtype(libc::DT_REG), FileType::RegularFile);
        assert_eq!(FileType::from_dtype(libc::DT_LNK), FileType::Symlink);
        assert_eq!(FileType::from_dtype(0), FileType::Unknown);
    }

    #[test]
    fn mode_mapping() {
        assert_eq!(FileType::from_mode(libc::S_IFDIR), FileType::Directory);
        assert_eq!(
            FileType::from_mode(libc::S_IFREG | 0o644),
            FileType::RegularFile
        );
    }
}
