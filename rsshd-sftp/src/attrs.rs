//! File attributes, as exchanged in the version 3 of the protocol.

use std::{
    fs::Metadata,
    os::unix::fs::{MetadataExt, PermissionsExt},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bitflags::bitflags;
use chrono::{DateTime, Local};
use ssh_encoding::{CheckedSum, Decode, Encode, Reader, Writer};

use crate::{Error, Result};

bitflags! {
    /// The fields present in a [`FileAttributes`] structure.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttrFlags: u32 {
        /// `SSH_FILEXFER_ATTR_SIZE`
        const SIZE = 0x00000001;
        /// `SSH_FILEXFER_ATTR_UIDGID`
        const UIDGID = 0x00000002;
        /// `SSH_FILEXFER_ATTR_PERMISSIONS`
        const PERMISSIONS = 0x00000004;
        /// `SSH_FILEXFER_ATTR_ACMODTIME`
        const ACMODTIME = 0x00000008;
        /// `SSH_FILEXFER_ATTR_EXTENDED`
        const EXTENDED = 0x80000000;
    }
}

/// The mask of the file type bits in `st_mode`.
const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// The attributes of a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes.
    pub size: Option<u64>,

    /// Owner user and group identifiers.
    pub uid_gid: Option<(u32, u32)>,

    /// The `st_mode` of the file: type and permission bits.
    pub permissions: Option<u32>,

    /// Access and modification times, in seconds since the epoch.
    pub atime_mtime: Option<(u32, u32)>,

    /// Extended attributes, ignored by this server.
    pub extended: Vec<(String, Vec<u8>)>,
}

impl Encode for FileAttributes {
    fn encoded_len(&self) -> ssh_encoding::Result<usize> {
        let extended = self
            .extended
            .iter()
            .map(|(name, data)| [name.encoded_len()?, data.encoded_len()?].checked_sum())
            .collect::<ssh_encoding::Result<Vec<_>>>()?;

        [
            4,
            self.size.map_or(0, |_| 8),
            self.uid_gid.map_or(0, |_| 8),
            self.permissions.map_or(0, |_| 4),
            self.atime_mtime.map_or(0, |_| 8),
            if self.extended.is_empty() { 0 } else { 4 },
        ]
        .into_iter()
        .chain(extended)
        .checked_sum()
    }

    fn encode(&self, writer: &mut impl Writer) -> ssh_encoding::Result<()> {
        self.flags().bits().encode(writer)?;

        if let Some(size) = self.size {
            size.encode(writer)?;
        }
        if let Some((uid, gid)) = self.uid_gid {
            uid.encode(writer)?;
            gid.encode(writer)?;
        }
        if let Some(permissions) = self.permissions {
            permissions.encode(writer)?;
        }
        if let Some((atime, mtime)) = self.atime_mtime {
            atime.encode(writer)?;
            mtime.encode(writer)?;
        }
        if !self.extended.is_empty() {
            self.extended.len().encode(writer)?;

            for (name, data) in &self.extended {
                name.encode(writer)?;
                data.encode(writer)?;
            }
        }

        Ok(())
    }
}

impl Decode for FileAttributes {
    type Error = Error;

    fn decode(reader: &mut impl Reader) -> Result<Self> {
        let flags = AttrFlags::from_bits_retain(u32::decode(reader)?);

        let size = if flags.contains(AttrFlags::SIZE) {
            Some(u64::decode(reader)?)
        } else {
            None
        };
        let uid_gid = if flags.contains(AttrFlags::UIDGID) {
            Some((u32::decode(reader)?, u32::decode(reader)?))
        } else {
            None
        };
        let permissions = if flags.contains(AttrFlags::PERMISSIONS) {
            Some(u32::decode(reader)?)
        } else {
            None
        };
        let atime_mtime = if flags.contains(AttrFlags::ACMODTIME) {
            Some((u32::decode(reader)?, u32::decode(reader)?))
        } else {
            None
        };
        let extended = if flags.contains(AttrFlags::EXTENDED) {
            (0..u32::decode(reader)?)
                .map(|_| -> Result<_> { Ok((String::decode(reader)?, Vec::<u8>::decode(reader)?)) })
                .collect::<Result<_>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            size,
            uid_gid,
            permissions,
            atime_mtime,
            extended,
        })
    }
}

impl FileAttributes {
    fn flags(&self) -> AttrFlags {
        let mut flags = AttrFlags::empty();

        flags.set(AttrFlags::SIZE, self.size.is_some());
        flags.set(AttrFlags::UIDGID, self.uid_gid.is_some());
        flags.set(AttrFlags::PERMISSIONS, self.permissions.is_some());
        flags.set(AttrFlags::ACMODTIME, self.atime_mtime.is_some());
        flags.set(AttrFlags::EXTENDED, !self.extended.is_empty());

        flags
    }

    /// Whether the attributes describe a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self.permissions, Some(mode) if mode & S_IFMT == S_IFDIR)
    }

    /// The access and modification times, as [`SystemTime`]s.
    pub fn times(&self) -> Option<(SystemTime, SystemTime)> {
        self.atime_mtime.map(|(atime, mtime)| {
            (
                UNIX_EPOCH + Duration::from_secs(atime.into()),
                UNIX_EPOCH + Duration::from_secs(mtime.into()),
            )
        })
    }

    /// A line describing the file `name` in the fashion of `ls -l`.
    pub fn longname(&self, name: &str, nlink: u64) -> String {
        let mode = self.permissions.unwrap_or_default();
        let (uid, gid) = self.uid_gid.unwrap_or_default();
        let mtime = self
            .atime_mtime
            .map(|(_, mtime)| mtime)
            .unwrap_or_default();

        let mtime: DateTime<Local> = (UNIX_EPOCH + Duration::from_secs(mtime.into())).into();
        let recent = Local::now().signed_duration_since(mtime).num_days().abs() < 180;
        let date = if recent {
            mtime.format("%b %e %H:%M")
        } else {
            mtime.format("%b %e  %Y")
        };

        format!(
            "{} {nlink:>3} {uid:<8} {gid:<8} {:>8} {date} {name}",
            mode_string(mode),
            self.size.unwrap_or_default(),
        )
    }
}

impl From<&Metadata> for FileAttributes {
    fn from(metadata: &Metadata) -> Self {
        Self {
            size: Some(metadata.size()),
            uid_gid: Some((metadata.uid(), metadata.gid())),
            permissions: Some(metadata.permissions().mode()),
            atime_mtime: Some((
                metadata.atime().clamp(0, u32::MAX.into()) as u32,
                metadata.mtime().clamp(0, u32::MAX.into()) as u32,
            )),
            extended: Vec::new(),
        }
    }
}

/// The `drwxr-xr-x` representation of a `st_mode`.
fn mode_string(mode: u32) -> String {
    let kind = match mode & S_IFMT {
        S_IFDIR => 'd',
        S_IFLNK => 'l',
        0o100000 => '-',
        0o020000 => 'c',
        0o060000 => 'b',
        0o010000 => 'p',
        0o140000 => 's',
        _ => '?',
    };

    let bit = |mask: u32, c: char| if mode & mask != 0 { c } else { '-' };
    let exec = |mask: u32, special: u32, set: char, unset: char| match (mode & mask != 0, mode & special != 0) {
        (true, true) => set,
        (false, true) => unset,
        (true, false) => 'x',
        (false, false) => '-',
    };

    [
        kind,
        bit(0o400, 'r'),
        bit(0o200, 'w'),
        exec(0o100, 0o4000, 's', 'S'),
        bit(0o040, 'r'),
        bit(0o020, 'w'),
        exec(0o010, 0o2000, 's', 'S'),
        bit(0o004, 'r'),
        bit(0o002, 'w'),
        exec(0o001, 0o1000, 't', 'T'),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_are_skipped() {
        let attrs = FileAttributes {
            permissions: Some(0o100644),
            atime_mtime: Some((1, 2)),
            ..Default::default()
        };

        let mut buf = Vec::new();
        attrs.encode(&mut buf).unwrap();
        assert_eq!(
            buf,
            [0, 0, 0, 12, 0, 0, 0x81, 0xa4, 0, 0, 0, 1, 0, 0, 0, 2]
        );
        assert_eq!(attrs.encoded_len().unwrap(), buf.len());

        let decoded = FileAttributes::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, attrs);
    }

    #[test]
    fn modes_render_like_ls() {
        assert_eq!(mode_string(0o040755), "drwxr-xr-x");
        assert_eq!(mode_string(0o100644), "-rw-r--r--");
        assert_eq!(mode_string(0o120777), "lrwxrwxrwx");
        assert_eq!(mode_string(0o104755), "-rwsr-xr-x");
        assert_eq!(mode_string(0o041777), "drwxrwxrwt");
    }

    #[test]
    fn longname_carries_size_and_name() {
        let attrs = FileAttributes {
            size: Some(1234),
            uid_gid: Some((1000, 100)),
            permissions: Some(0o100600),
            atime_mtime: Some((0, 0)),
            ..Default::default()
        };

        let line = attrs.longname("notes.txt", 1);
        assert!(line.starts_with("-rw-------   1 1000     100          1234 "));
        assert!(line.ends_with(" 1970 notes.txt") || line.ends_with(" 1969 notes.txt"));
    }
}
