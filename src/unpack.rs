use std::{
	fs::{self, File},
	io::{self, BufReader, BufWriter, Read, Seek, Write},
	path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{
	error::UnpackError,
	manifest::{to_path, FileDescriptor, Manifest, UNKNOWN_DIR},
	read::{Archive, Entry, EntryKind, EntryName},
	resolve::HashResolver,
	sniff::{sniff_stream, MagicTable},
};

/// Represents the length from which payloads are copied in chunks instead of being read whole.
pub const CHUNK_THRESHOLD: u64 = 0x2C000000;

/// Represents the size of a single chunk of a large payload.
pub const CHUNK_SIZE: usize = 0x100000;

/// Represents the directory, within the destination, receiving payloads.
pub const FILES_DIR: &str = "Files";

/// Represents the filename of the manifest within the destination.
pub const MANIFEST_NAME: &str = "archive.cfg";

/// Represents the filename of the listing within the destination.
pub const LISTING_NAME: &str = "files.txt";

/// Represents a provider of the streams holding the data of entries.
pub trait Sources {
	/// The type of stream provided.
	type Reader: Read + Seek;

	/// Opens the stream for entries stored in the specified lump file, or in the archive itself for `None`.
	fn open(&mut self, lump: Option<u8>) -> io::Result<Self::Reader>;

	/// Returns the displayed name of the specified lump file.
	fn lump_name(&self, lump: u8) -> String {
		format!("L{:02}", lump)
	}
}

/// Represents the streams of an archive on disk, with its lump files alongside it.
#[derive(Debug, Clone)]
pub struct FileSources {
	img: PathBuf,
}

/// Represents the options of an unpack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackOptions {
	/// Replace files already present in the destination.
	pub overwrite: bool,

	/// Leave out the payloads of videos, while still recording them in the manifest.
	pub skip_fmv: bool,
}

/// Represents the outcome of an unpack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackReport {
	/// The manifest needed to rebuild the archive.
	pub manifest: Manifest,

	/// A line per entry describing its location and name.
	pub listing: Vec<String>,

	/// The number of payloads written.
	pub written: usize,

	/// The number of payloads left out.
	pub skipped: usize,
}

/// Represents an extractor of archives to a directory tree.
#[derive(Debug)]
pub struct Unpacker<'a> {
	resolver: &'a HashResolver,
	magic: &'a MagicTable,

	options: UnpackOptions,
}

impl FileSources {
	/// Creates new sources for the archive at the specified path.
	pub fn new(img: impl Into<PathBuf>) -> Self {
		Self {
			img: img.into(),
		}
	}

	/// Returns the path of the specified lump file.
	pub fn lump_path(&self, lump: u8) -> PathBuf {
		self.img.with_file_name(self.lump_name(lump))
	}
}

impl Sources for FileSources {
	type Reader = BufReader<File>;

	fn open(&mut self, lump: Option<u8>) -> io::Result<Self::Reader> {
		let path = match lump {
			Some(lump) => self.lump_path(lump),
			None => self.img.clone(),
		};

		debug!(path = %path.display(), "opening source");

		Ok(BufReader::new(File::open(path)?))
	}

	fn lump_name(&self, lump: u8) -> String {
		let stem = self.img.file_stem().map(|stem| stem.to_string_lossy()).unwrap_or_default();

		format!("{}.L{:02}", stem, lump).to_uppercase()
	}
}

impl<'a> Unpacker<'a> {
	/// Creates a new unpacker resolving names with `resolver` and extensions with `magic`.
	pub fn new(resolver: &'a HashResolver, magic: &'a MagicTable, options: UnpackOptions) -> Self {
		Self {
			resolver,
			magic,
			options,
		}
	}

	/// Extracts every entry of `archive` below `dest`, writing the manifest and listing alongside.
	pub fn unpack<S>(&self, archive: &Archive, archive_name: &str, sources: &mut S, dest: &Path) -> Result<UnpackReport, UnpackError>
	where
		S: Sources,
	{
		let files_dir = dest.join(FILES_DIR);

		fs::create_dir_all(&files_dir)?;

		let mut files: Vec<FileDescriptor> = Vec::with_capacity(archive.len());
		let mut listing: Vec<String> = Vec::with_capacity(archive.len());

		let mut written = 0;
		let mut skipped = 0;

		self.walk(archive, sources, |index, entry, name, ext, reader, sources| {
			listing.push(listing_line(entry, name, sources));

			files.push(FileDescriptor {
				index,
				data_index: index,
				hash: entry.hash(),
				name: name.to_owned(),
			});

			if self.options.skip_fmv && (ext == "xmv" || ext == "xav") {
				debug!(index, name, "skipping video");

				skipped += 1;

				return Ok(());
			}

			let path = to_path(&files_dir, name);

			if let Some(parent) = path.parent() {
				fs::create_dir_all(parent)?;
			}

			if !self.options.overwrite && path.exists() {
				debug!(index, name, "keeping existing file");

				return Ok(());
			}

			debug!(index, name, "extracting");

			let mut file = BufWriter::new(File::create(&path)?);

			copy_payload(entry, reader, &mut file, CHUNK_THRESHOLD)?;

			file.flush()?;

			written += 1;

			Ok(())
		})?;

		// The table order and the data order are independent, so both are recorded.

		let mut order: Vec<usize> = (0..files.len()).collect();

		order.sort_by_key(|&index| archive.entries()[index].byte_offset());

		for (data_index, index) in order.into_iter().enumerate() {
			files[index].data_index = data_index;
		}

		let manifest = Manifest {
			archive: archive_name.to_owned(),
			kind: archive.version().manifest_type(),
			files,
		};

		fs::write(dest.join(MANIFEST_NAME), manifest.to_string())?;

		if !listing.is_empty() {
			fs::write(dest.join(LISTING_NAME), listing.join("\n") + "\n")?;
		}

		info!(written, skipped, total = archive.len(), "unpacked archive");

		Ok(UnpackReport {
			manifest,
			listing,
			written,
			skipped,
		})
	}

	/// Describes every entry of `archive` without extracting anything.
	pub fn list<S>(&self, archive: &Archive, sources: &mut S) -> Result<Vec<String>, UnpackError>
	where
		S: Sources,
	{
		let mut listing = Vec::with_capacity(archive.len());

		self.walk(archive, sources, |_, entry, name, _, _, sources| {
			listing.push(listing_line(entry, name, sources));

			Ok(())
		})?;

		Ok(listing)
	}

	fn walk<S, F>(&self, archive: &Archive, sources: &mut S, mut visit: F) -> Result<(), UnpackError>
	where
		S: Sources,
		F: FnMut(usize, &Entry, &str, &str, &mut S::Reader, &S) -> Result<(), UnpackError>,
	{
		let mut current: Option<(Option<u8>, S::Reader)> = None;

		for (index, entry) in archive.iter().enumerate() {
			let lump = entry.lump();

			// Streams are read sequentially, so one is only reopened when the lump changes.

			let reader = match current.take() {
				Some((open, reader)) if open == lump => reader,
				_ => sources.open(lump)?,
			};

			let reader = &mut current.insert((lump, reader)).1;

			let (name, ext) = match &entry.name {
				EntryName::Named(name) => (name.clone(), extension(name)),
				EntryName::Hashed(hash) => match self.resolver.lookup(archive.version(), *hash) {
					Some(name) => (name.to_owned(), extension(name)),
					None => {
						reader.seek(io::SeekFrom::Start(entry.byte_offset()))?;

						let ext = sniff_stream(reader, entry.len as u64, self.magic)?;

						(unknown_name(entry, *hash, &ext), ext)
					}
				},
			};

			visit(index, entry, &name, &ext, reader, &*sources)?;
		}

		Ok(())
	}
}

/// Returns the lowercase extension of a filename, or an empty string if it has none.
fn extension(name: &str) -> String {
	let base = name.rsplit(['\\', '/']).next().unwrap_or(name);

	match base.rsplit_once('.') {
		Some((_, ext)) => ext.to_ascii_lowercase(),
		None => String::new(),
	}
}

fn unknown_name(entry: &Entry, hash: u32, ext: &str) -> String {
	match entry.kind {
		EntryKind::Plain => format!("{}\\{}.{}", UNKNOWN_DIR, hash, ext),
		EntryKind::Xbox {
			lump,
		} => format!("{}\\L{:02}\\{}.{}", UNKNOWN_DIR, lump, hash, ext),
		EntryKind::Psp {
			..
		} => format!("{}\\{:04}_{:04}_{}.{}", UNKNOWN_DIR, (hash >> 24) & 0xFF, (hash >> 16) & 0xFF, hash & 0xFFFF, ext),
	}
}

fn listing_line<S>(entry: &Entry, name: &str, sources: &S) -> String
where
	S: Sources,
{
	match entry.kind {
		EntryKind::Plain => format!("0x{:08X}, 0x{:08X}, {}", entry.byte_offset(), entry.len, name),
		EntryKind::Xbox {
			lump,
		} => format!("0x{:08X}, 0x{:08X}, {} -> {}", entry.byte_offset(), entry.len, sources.lump_name(lump), name),
		EntryKind::Psp {
			uncompressed_len,
		} => format!("0x{:08X}, 0x{:08X}, 0x{:08X}, 0x{:08X} -> {}", entry.byte_offset(), entry.len, uncompressed_len, entry.hash(), name),
	}
}

/// Copies the data of `entry` from `reader` to `dst`, in chunks of [`CHUNK_SIZE`] once its length reaches `threshold`.
///
/// Returns the number of bytes copied, which falls short of the length of the entry if the source ends early.
fn copy_payload<R, W>(entry: &Entry, reader: &mut R, dst: &mut W, threshold: u64) -> io::Result<u64>
where
	R: Read + Seek,
	W: Write,
{
	let len = entry.len as u64;
	let mut src = entry.open(reader);

	let copied = if len < threshold {
		// The buffer grows with the bytes actually read, not the length claimed by the table.

		let mut buf = Vec::new();

		src.read_to_end(&mut buf)?;
		dst.write_all(&buf)?;

		buf.len() as u64
	} else {
		let mut buf = vec![0; CHUNK_SIZE];
		let mut copied = 0;

		loop {
			let num = src.read(&mut buf)?;

			if num == 0 {
				break;
			}

			dst.write_all(&buf[..num])?;

			copied += num as u64;
		}

		copied
	};

	if copied < len {
		warn!(expected = len, copied, "payload truncated by end of source");
	}

	Ok(copied)
}
