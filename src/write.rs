use std::{
	fs::{self, File},
	io::{self, BufReader, Read, Write},
	path::PathBuf,
};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, info, warn};

use crate::{
	align,
	error::WriteError,
	manifest::{to_path, Blacklist, FileDescriptor, Manifest},
	read::{Archive, Entry, EntryKind, EntryName, Version, PSP_COUNT_REPEATS},
	table,
};

/// Represents the largest offset an archive may address.
pub const MAX_ARCHIVE_SIZE: u64 = i32::MAX as u64;

/// Represents a provider of the files named by a manifest.
pub trait FileProvider {
	/// The type of stream provided.
	type Reader: Read;

	/// Returns the size of the file with the specified relative filename, or `None` if it does not exist.
	fn size(&self, name: &str) -> io::Result<Option<u64>>;

	/// Opens the file with the specified relative filename for reading.
	fn open(&self, name: &str) -> io::Result<Self::Reader>;
}

/// Represents the files below a directory on disk.
#[derive(Debug, Clone)]
pub struct DirProvider {
	root: PathBuf,
}

/// Represents the outcome of a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
	/// The number of entries written.
	pub written: usize,

	/// The filenames dropped because they did not exist.
	pub missing: Vec<String>,

	/// The number of entries dropped by the blacklist.
	pub blacklisted: usize,

	/// The total size, in bytes, of the archive.
	pub size: u64,
}

/// Represents a writer of PSP-styled archives.
#[derive(Debug)]
pub struct PspWriter<'a, W> {
	out: &'a mut W,
}

impl DirProvider {
	/// Creates a new provider over the specified directory.
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
		}
	}
}

impl FileProvider for DirProvider {
	type Reader = BufReader<File>;

	fn size(&self, name: &str) -> io::Result<Option<u64>> {
		match fs::metadata(to_path(&self.root, name)) {
			Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
			Ok(_) => Ok(None),
			Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
			Err(err) => Err(err),
		}
	}

	fn open(&self, name: &str) -> io::Result<Self::Reader> {
		Ok(BufReader::new(File::open(to_path(&self.root, name))?))
	}
}

impl<'a, W> PspWriter<'a, W>
where
	W: Write,
{
	/// Creates a new writer with the specified destination.
	pub fn new(out: &'a mut W) -> Self {
		Self {
			out,
		}
	}

	/// Attempts to build the archive described by `manifest` from the files of `provider`, consuming `self` in the process.
	///
	/// Files named by `blacklist` or absent from `provider` are left out.
	pub fn build<P>(self, manifest: &Manifest, provider: &P, blacklist: &Blacklist) -> Result<BuildReport, WriteError>
	where
		P: FileProvider,
	{
		check_rebuildable(manifest)?;

		let mut report = BuildReport::default();

		// Determine which files make it into the archive, and how large they are.

		let mut kept: Vec<(&FileDescriptor, u64)> = Vec::with_capacity(manifest.files.len());

		for file in &manifest.files {
			if blacklist.contains(&file.name) {
				debug!(name = %file.name, "skipping blacklisted file");

				report.blacklisted += 1;

				continue;
			}

			match provider.size(&file.name)? {
				Some(size) => kept.push((file, size)),
				None => {
					warn!(name = %file.name, "missing source file, skipping");

					report.missing.push(file.name.clone());
				}
			}
		}

		// Lay out the data in data order, while the table stays in table order.

		let mut order: Vec<usize> = (0..kept.len()).collect();

		order.sort_by_key(|&index| kept[index].0.data_index);

		let header_len = (PSP_COUNT_REPEATS * 4 + kept.len() * Version::Psp.record_size()) as u64;
		let lens: Vec<u64> = order.iter().map(|&index| kept[index].1).collect();

		let (offsets, total) = layout(header_len, &lens)?;

		let mut entry_offsets = vec![0; kept.len()];

		for (&index, &off) in order.iter().zip(&offsets) {
			entry_offsets[index] = off;
		}

		let entries = kept
			.iter()
			.zip(&entry_offsets)
			.map(|(&(file, size), &off)| Entry {
				name: EntryName::Hashed(file.hash),
				off: off as u32,
				len: size as u32,
				kind: EntryKind::Psp {
					uncompressed_len: size as u32,
				},
			})
			.collect();

		let archive = Archive::new(Version::Psp, 0, entries);
		let table = table::encode(archive.version(), archive.entries())?;

		// Write the header, which repeats the count in place of a magic.

		for _ in 0..PSP_COUNT_REPEATS {
			self.out.write_u32::<LittleEndian>(archive.len() as u32)?;
		}

		self.out.write_all(&table)?;

		// Write the data of each file, padded to its offset.

		let mut pos = header_len;

		for (&index, &off) in order.iter().zip(&offsets) {
			let (file, expected) = kept[index];

			pad(self.out, off - pos)?;

			let actual = io::copy(&mut provider.open(&file.name)?, self.out)?;

			if actual != expected {
				return Err(WriteError::SourceFileChanged {
					name: file.name.clone(),
					expected,
					actual,
				});
			}

			debug!(name = %file.name, off, len = actual, "wrote file");

			pos = off + actual;
		}

		pad(self.out, total - pos)?;

		self.out.flush()?;

		report.written = archive.len();
		report.size = total;

		info!(written = report.written, missing = report.missing.len(), blacklisted = report.blacklisted, size = total, "built archive");

		Ok(report)
	}
}

/// Checks that the archive described by `manifest` is of a version that can be written.
pub fn check_rebuildable(manifest: &Manifest) -> Result<(), WriteError> {
	match Version::from_manifest_type(manifest.kind) {
		Some(Version::Psp) => Ok(()),
		_ => Err(WriteError::UnsupportedRebuildVariant(manifest.kind)),
	}
}

/// Returns the offset of each of the payloads of the specified lengths, placed one after another following a header of `header_len` bytes, and the total size.
///
/// Every offset, and the total size, is aligned to the sector size.
pub fn layout(header_len: u64, lens: &[u64]) -> Result<(Vec<u64>, u64), WriteError> {
	let mut pos = align(header_len);
	let mut offsets = Vec::with_capacity(lens.len());

	for &len in lens {
		if pos > MAX_ARCHIVE_SIZE {
			return Err(WriteError::ArchiveTooLarge(pos));
		}

		offsets.push(pos);

		pos = align(pos + len);
	}

	if pos > MAX_ARCHIVE_SIZE {
		return Err(WriteError::ArchiveTooLarge(pos));
	}

	Ok((offsets, pos))
}

fn pad<W>(out: &mut W, len: u64) -> io::Result<()>
where
	W: Write,
{
	io::copy(&mut io::repeat(0).take(len), out)?;

	Ok(())
}
