use std::{
	fmt,
	io::{self, Read, Seek},
};

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use crate::{crypt::Schedule, error::ReadError, hash, table, IMG_MAGIC, SECTOR_SIZE};

/// Represents the size of the whole `img` file below which a V4-styled archive is assumed to belong to the Xbox.
pub const XBOX_SIZE_THRESHOLD: u64 = 0x8000;

/// Represents the number of times the entry count is repeated in the header of a PSP-styled archive.
pub const PSP_COUNT_REPEATS: usize = 4;

/// Represents the version of an archive.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum Version {
	/// Entries with inline names, protected by the legacy schedule.
	V2,

	/// Entries pointing at names stored after the table, protected by the modern schedule.
	V3,

	/// Entries identified by hashes, protected by the modern schedule.
	V4Pc,

	/// Entries identified by hashes with data held in lump files, protected by the modern schedule.
	V4Xbox,

	/// Unprotected entries identified by hashes, with absolute offsets and uncompressed lengths.
	Psp,
}

/// Represents how an entry is identified.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum EntryName {
	/// The entry carries its own filename.
	Named(String),

	/// The entry carries only the hash of its filename.
	Hashed(u32),
}

/// Represents the version-specific properties of an entry.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum EntryKind {
	/// An entry of a V2, V3 or V4 PC archive.
	Plain,

	/// An entry of an Xbox archive whose data lives in the lump file of the specified index.
	Xbox { lump: u8 },

	/// An entry of a PSP archive.
	Psp { uncompressed_len: u32 },
}

/// Represents an entry.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct Entry {
	/// The name, or hash of the name, of the entry.
	pub name: EntryName,

	/// The offset of the entry, in the unit of its version.
	pub off: u32,

	/// The length, in bytes, of the entry.
	pub len: u32,

	/// The version-specific properties of the entry.
	pub kind: EntryKind,
}

/// Represents an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
	version: Version,
	reserved: u32,

	entries: Vec<Entry>,
}

/// Represents an entry opened for reading.
#[derive(Debug)]
pub struct OpenEntry<'a, R>
where
	R: Read + Seek,
{
	inner: &'a mut R,

	off: u64,
	len: u64,
	pos: u64,
}

/// Represents a reader of archives of any version, from a single `img` file.
#[derive(Debug)]
pub struct ArchiveReader<'a, I>
where
	I: Read + Seek,
{
	img: &'a mut I,
}

impl Version {
	/// Returns the archive type recorded for this version in rebuild manifests.
	pub fn manifest_type(self) -> u32 {
		match self {
			Self::V2 => 2,
			Self::V3 => 3,
			Self::V4Pc | Self::V4Xbox => 4,
			Self::Psp => 5,
		}
	}

	/// Returns the version for an archive type recorded in a rebuild manifest, if it is known.
	pub fn from_manifest_type(value: u32) -> Option<Self> {
		match value {
			2 => Some(Self::V2),
			3 => Some(Self::V3),
			4 => Some(Self::V4Pc),
			5 => Some(Self::Psp),
			_ => None,
		}
	}

	/// Returns the size, in bytes, of a single record of the entry table.
	pub fn record_size(self) -> usize {
		match self {
			Self::V2 => 0x38,
			Self::V3 | Self::V4Pc | Self::V4Xbox => 0xC,
			Self::Psp => 0x10,
		}
	}

	/// Returns the schedule protecting the entry table, if any.
	pub fn schedule(self) -> Option<Schedule> {
		match self {
			Self::V2 => Some(Schedule::Legacy),
			Self::V3 | Self::V4Pc | Self::V4Xbox => Some(Schedule::Modern),
			Self::Psp => None,
		}
	}
}

impl fmt::Display for Version {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::V2 => write!(f, "IMG2"),
			Self::V3 => write!(f, "IMG3"),
			Self::V4Pc => write!(f, "IMG4 (PC/PS2)"),
			Self::V4Xbox => write!(f, "IMG4 (Xbox)"),
			Self::Psp => write!(f, "PSP"),
		}
	}
}

impl fmt::Display for EntryName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Named(name) => write!(f, "{}", name),
			Self::Hashed(hash) => write!(f, "{}", hash),
		}
	}
}

impl Entry {
	/// Returns the absolute offset, in bytes, of the data of the entry within its source.
	pub fn byte_offset(&self) -> u64 {
		match self.kind {
			EntryKind::Psp {
				..
			} => self.off as u64,
			EntryKind::Plain
			| EntryKind::Xbox {
				..
			} => self.off as u64 * SECTOR_SIZE,
		}
	}

	/// Returns the hash of the name of the entry.
	pub fn hash(&self) -> u32 {
		match &self.name {
			EntryName::Named(name) => hash::hash(name.as_bytes()),
			EntryName::Hashed(hash) => *hash,
		}
	}

	/// Returns the index of the lump file holding the data of the entry, if it is stored in one.
	pub fn lump(&self) -> Option<u8> {
		match self.kind {
			EntryKind::Xbox {
				lump,
			} => Some(lump),
			_ => None,
		}
	}

	/// Returns if the stored data is smaller than the original data.
	pub fn is_compressed(&self) -> bool {
		match self.kind {
			EntryKind::Psp {
				uncompressed_len,
			} => self.len != uncompressed_len,
			_ => false,
		}
	}

	/// Opens the data of the entry for reading from `inner`, which must be the archive or lump file holding it.
	pub fn open<'a, R>(&self, inner: &'a mut R) -> OpenEntry<'a, R>
	where
		R: Read + Seek,
	{
		OpenEntry {
			inner,
			off: self.byte_offset(),
			len: self.len as u64,
			pos: 0,
		}
	}
}

impl Archive {
	/// Creates a new archive from its parts.
	pub fn new(version: Version, reserved: u32, entries: Vec<Entry>) -> Self {
		Self {
			version,
			reserved,
			entries,
		}
	}

	/// Returns the version of the archive.
	pub fn version(&self) -> Version {
		self.version
	}

	/// Returns the reserved header value of the archive.
	pub fn reserved(&self) -> u32 {
		self.reserved
	}

	/// Returns the number of entries in the archive.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Returns if the archive is void of any entries.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Returns the entry at the specified index, if it exists.
	pub fn get(&self, index: usize) -> Option<&Entry> {
		self.entries.get(index)
	}

	/// Returns an iterator over each of the entries in the archive, in table order.
	pub fn iter(&self) -> impl Iterator<Item = &Entry> {
		self.entries.iter()
	}

	/// Returns the entries of the archive, in table order.
	pub fn entries(&self) -> &[Entry] {
		&self.entries
	}
}

impl<'a, I> ArchiveReader<'a, I>
where
	I: Read + Seek,
{
	/// Creates a new reader with the specified `img` source.
	pub fn new(img: &'a mut I) -> Self {
		Self {
			img,
		}
	}

	/// Attempts to fully read the header and entry table of the archive, consuming `self` in the process.
	pub fn read(self) -> Result<Archive, ReadError> {
		// The size of the whole file distinguishes the two flavours of V4-styled archives.

		let size = self.img.seek(io::SeekFrom::End(0))?;

		self.img.seek(io::SeekFrom::Start(0))?;

		let kind = match self.img.read_u32::<LittleEndian>() {
			Ok(kind) => kind,
			Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Err(ReadError::NotAnArchive),
			Err(err) => return Err(err.into()),
		};

		if kind & 0xFFFFFF != IMG_MAGIC {
			return self.read_psp(kind);
		}

		let version = match (kind >> 24) & 0xF {
			2 => Version::V2,
			3 => Version::V3,
			4 if size < XBOX_SIZE_THRESHOLD => Version::V4Xbox,
			4 => Version::V4Pc,
			other => return Err(ReadError::UnsupportedVersion(other)),
		};

		let count = self.img.read_u32::<LittleEndian>().map_err(truncated)? as usize;
		let reserved = self.img.read_u32::<LittleEndian>().map_err(truncated)?;

		// Only V2-styled archives omit the length of the table, as they lack trailing names.

		let len = match version {
			Version::V2 => count
				.checked_mul(version.record_size())
				.ok_or_else(|| ReadError::CorruptArchive(format!("entry count {} overflows", count)))?,
			_ => self.img.read_u32::<LittleEndian>().map_err(truncated)? as usize,
		};

		if len as u64 > size {
			return Err(ReadError::CorruptArchive(format!("table length {} exceeds file size {}", len, size)));
		}

		let mut blob = vec![0; len];

		self.img.read_exact(&mut blob).map_err(truncated)?;

		debug!(%version, count, len, "read entry table");

		let entries = table::decode(version, &mut blob, count)?;

		Ok(Archive::new(version, reserved, entries))
	}

	fn read_psp(self, count: u32) -> Result<Archive, ReadError> {
		// The count is repeated in place of a magic, so every copy must agree.

		for _ in 1..PSP_COUNT_REPEATS {
			match self.img.read_u32::<LittleEndian>() {
				Ok(repeat) if repeat == count => continue,
				Ok(_) => return Err(ReadError::NotAnArchive),
				Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Err(ReadError::NotAnArchive),
				Err(err) => return Err(err.into()),
			}
		}

		let count = count as usize;
		let len = count
			.checked_mul(Version::Psp.record_size())
			.ok_or_else(|| ReadError::CorruptArchive(format!("entry count {} overflows", count)))?;

		let mut blob = Vec::new();

		self.img.by_ref().take(len as u64).read_to_end(&mut blob)?;

		debug!(count, len, "read psp entry table");

		let entries = table::decode(Version::Psp, &mut blob, count)?;

		Ok(Archive::new(Version::Psp, 0, entries))
	}
}

impl<'a, R> Read for OpenEntry<'a, R>
where
	R: Read + Seek,
{
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		// Check if we have already reached the end of the entry.

		if self.pos >= self.len {
			return Ok(0);
		}

		// Seek to the start of the entry including any currently read bytes.

		self.inner.seek(io::SeekFrom::Start(self.off + self.pos))?;

		// Limit the read to the remainder of the entry or the length of the buffer, whichever is smallest.

		let len = (self.len - self.pos).min(buf.len() as u64) as usize;
		let num = self.inner.read(&mut buf[0..len])?;

		self.pos += num as u64;

		Ok(num)
	}
}

fn truncated(err: io::Error) -> ReadError {
	match err.kind() {
		io::ErrorKind::UnexpectedEof => ReadError::CorruptArchive("unexpected end of file".to_owned()),
		_ => ReadError::IoError(err),
	}
}

#[cfg(test)]
mod tests {
	use std::io::{Cursor, Read};

	use byteorder::{LittleEndian, WriteBytesExt};

	use crate::{
		crypt::{encrypt, Schedule},
		error::ReadError,
		hash::hash_name,
		IMG_MAGIC,
	};

	use super::{ArchiveReader, Entry, EntryKind, EntryName, Version, XBOX_SIZE_THRESHOLD};

	fn header(version: u32, count: u32) -> Vec<u8> {
		let mut buf = Vec::new();

		buf.write_u32::<LittleEndian>(IMG_MAGIC | ((0x30 + version) << 24)).unwrap();
		buf.write_u32::<LittleEndian>(count).unwrap();
		buf.write_u32::<LittleEndian>(0xCAFE).unwrap(); // Reserved

		buf
	}

	fn v4_img(entries: &[(u32, u32, u32)], size: usize) -> Vec<u8> {
		let mut table = Vec::new();

		for &(hash, off, len) in entries {
			table.write_u32::<LittleEndian>(hash).unwrap();
			table.write_u32::<LittleEndian>(off).unwrap();
			table.write_u32::<LittleEndian>(len).unwrap();
		}

		encrypt(&mut table, Schedule::Modern);

		let mut buf = header(4, entries.len() as u32);

		buf.write_u32::<LittleEndian>(table.len() as u32).unwrap();
		buf.extend_from_slice(&table);
		buf.resize(size.max(buf.len()), 0);

		buf
	}

	#[test]
	fn test_read_v2() {
		let mut table = Vec::new();

		for (name, off, len) in [("GAMECONFIG.TXT", 1u32, 100u32), ("SYSTEM.CNF", 2, 2048)] {
			let mut record = vec![0u8; 0x30];

			record[..name.len()].copy_from_slice(name.as_bytes());
			record.write_u32::<LittleEndian>(off).unwrap();
			record.write_u32::<LittleEndian>(len).unwrap();

			table.extend_from_slice(&record);
		}

		encrypt(&mut table, Schedule::Legacy);

		let mut buf = header(2, 2);

		buf.extend_from_slice(&table);

		let archive = ArchiveReader::new(&mut Cursor::new(buf)).read().expect("failed to read archive");

		assert_eq!(archive.version(), Version::V2);
		assert_eq!(archive.reserved(), 0xCAFE);
		assert_eq!(archive.len(), 2);

		let config = archive.get(0).expect("expected first entry");
		let system = archive.get(1).expect("expected second entry");

		assert_eq!(config.name, EntryName::Named("GAMECONFIG.TXT".to_owned()));
		assert_eq!(config.byte_offset(), 2048);
		assert_eq!(config.len, 100);

		assert_eq!(system.name, EntryName::Named("SYSTEM.CNF".to_owned()));
		assert_eq!(system.byte_offset(), 4096);
		assert_eq!(system.hash(), hash_name("SYSTEM.CNF"));
	}

	#[test]
	fn test_read_v3() {
		let names = b"FONTS\\FONT.BNK\0SFX\\SFX.PMU\0";

		let mut table = Vec::new();

		for (ptr, off, len) in [(24u32, 3u32, 10u32), (39, 4, 20)] {
			table.write_u32::<LittleEndian>(ptr).unwrap();
			table.write_u32::<LittleEndian>(off).unwrap();
			table.write_u32::<LittleEndian>(len).unwrap();
		}

		table.extend_from_slice(names);

		encrypt(&mut table, Schedule::Modern);

		let mut buf = header(3, 2);

		buf.write_u32::<LittleEndian>(table.len() as u32).unwrap();
		buf.extend_from_slice(&table);

		let archive = ArchiveReader::new(&mut Cursor::new(buf)).read().expect("failed to read archive");

		assert_eq!(archive.version(), Version::V3);
		assert_eq!(archive.get(0).unwrap().name, EntryName::Named("FONTS\\FONT.BNK".to_owned()));
		assert_eq!(archive.get(1).unwrap().name, EntryName::Named("SFX\\SFX.PMU".to_owned()));
		assert_eq!(archive.get(1).unwrap().off, 4);
		assert_eq!(archive.get(1).unwrap().len, 20);
	}

	#[test]
	fn test_read_v4_pc() {
		let buf = v4_img(&[(0x1234, 5, 77)], XBOX_SIZE_THRESHOLD as usize);

		let archive = ArchiveReader::new(&mut Cursor::new(buf)).read().expect("failed to read archive");

		assert_eq!(archive.version(), Version::V4Pc);

		let entry = archive.get(0).expect("expected first entry");

		assert_eq!(entry.name, EntryName::Hashed(0x1234));
		assert_eq!(entry.kind, EntryKind::Plain);
		assert_eq!(entry.byte_offset(), 5 * 2048);
	}

	#[test]
	fn test_read_v4_xbox() {
		let buf = v4_img(&[(0x1234, (7 << 8) | 3, 77)], 0);

		let archive = ArchiveReader::new(&mut Cursor::new(buf)).read().expect("failed to read archive");

		assert_eq!(archive.version(), Version::V4Xbox);

		let entry = archive.get(0).expect("expected first entry");

		assert_eq!(entry.kind, EntryKind::Xbox {
			lump: 3
		});
		assert_eq!(entry.lump(), Some(3));
		assert_eq!(entry.off, 7);
		assert_eq!(entry.byte_offset(), 7 * 2048);
	}

	#[test]
	fn test_read_psp() {
		let mut buf = Vec::new();

		for _ in 0..4 {
			buf.write_u32::<LittleEndian>(1).unwrap();
		}

		for value in [0xDEADBEEFu32, 0x800, 4, 8] {
			buf.write_u32::<LittleEndian>(value).unwrap();
		}

		buf.resize(0x800, 0);
		buf.extend_from_slice(b"DATA");

		let mut cursor = Cursor::new(buf);
		let archive = ArchiveReader::new(&mut cursor).read().expect("failed to read archive");

		assert_eq!(archive.version(), Version::Psp);

		let entry = archive.get(0).expect("expected first entry").clone();

		assert_eq!(entry.byte_offset(), 0x800);
		assert!(entry.is_compressed());

		let mut data = Vec::new();

		entry.open(&mut cursor).read_to_end(&mut data).expect("failed to read entry");

		assert_eq!(data, b"DATA");
	}

	#[test]
	fn test_read_psp_sentinel_mismatch() {
		let mut buf = Vec::new();

		for count in [2u32, 2, 3, 2] {
			buf.write_u32::<LittleEndian>(count).unwrap();
		}

		let result = ArchiveReader::new(&mut Cursor::new(buf)).read();

		assert!(matches!(result, Err(ReadError::NotAnArchive)));
	}

	#[test]
	fn test_read_unsupported_version() {
		let buf = header(5, 0);

		let result = ArchiveReader::new(&mut Cursor::new(buf)).read();

		assert!(matches!(result, Err(ReadError::UnsupportedVersion(5))));
	}

	#[test]
	fn test_read_truncated_table() {
		let mut buf = header(2, 4);

		buf.extend_from_slice(&[0; 0x38]);

		let result = ArchiveReader::new(&mut Cursor::new(buf)).read();

		assert!(matches!(result, Err(ReadError::CorruptArchive(_))));
	}

	#[test]
	fn test_read_entry_partial() {
		let entry = Entry {
			name: EntryName::Hashed(0),
			off: 1,
			len: 2048,
			kind: EntryKind::Plain,
		};

		let mut cursor = Cursor::new(vec![1u8; 4096]);
		let mut open = entry.open(&mut cursor);

		let mut buf = [0; 1024];

		assert_eq!(open.read(&mut buf).expect("failed to read entry first time"), 1024);
		assert_eq!(open.read(&mut buf).expect("failed to read entry second time"), 1024);
		assert!(matches!(open.read(&mut buf), Ok(0)));
	}
}
