//! Library for unpacking and rebuilding the `IMG` archives used throughout the Driver series of games.

use std::io::{Read, Seek};

use error::ReadError;
use read::{Archive, ArchiveReader};

/// Contains types for errors.
pub mod error;

/// Contains the filename hash used by hash-indexed archives.
pub mod hash;

/// Contains the additive ciphers protecting entry tables.
pub mod crypt;

/// Contains the decoding and encoding of entry tables for each version.
pub mod table;

/// Contains types and the accompanying logic for reading archives of different versions.
pub mod read;

/// Contains the lookup of filenames from their hashes.
pub mod resolve;

/// Contains the inference of file extensions from payload contents.
pub mod sniff;

/// Contains the rebuild manifest and blacklist formats.
pub mod manifest;

/// Contains the extraction of archives to a directory tree.
pub mod unpack;

/// Contains types and the accompanying logic for writing archives.
pub mod write;

/// Represents the number of bytes of a sector.
pub const SECTOR_SIZE: u64 = 2048;

/// Represents the null terminator for the names of entries.
pub const NULL_TERMINATOR: u8 = b'\0';

/// Represents the magic of a generic header, in the low three bytes of the first word (`IMG`).
pub const IMG_MAGIC: u32 = 0x474D49;

/// Attempts to read the archive contained in `img`, determining its version from the header.
pub fn read<I>(img: &mut I) -> Result<Archive, ReadError>
where
	I: Read + Seek,
{
	ArchiveReader::new(img).read()
}

/// Rounds `value` up to the next multiple of the sector size.
pub fn align(value: u64) -> u64 {
	value.div_ceil(SECTOR_SIZE) * SECTOR_SIZE
}
