use std::{
	collections::HashMap,
	io::{self, BufRead, Read, Seek},
};

use byteorder::{ByteOrder, LittleEndian};
use tracing::{trace, warn};

use crate::error::LookupError;

/// Represents the extension given to payloads that could not be identified.
pub const DEFAULT_EXTENSION: &str = "bin";

/// Represents the number of leading bytes inspected.
pub const HEAD_SIZE: usize = 0x10;

/// Represents the number of trailing bytes inspected.
pub const TAIL_SIZE: usize = 0x12;

/// Represents the first line of a magic number lookup file.
const LOOKUP_BANNER: &str = "# Magic number lookup file";

/// Represents the word at offset `0xC` of an Xbox video (`xobX`).
const XMV_MARKER: u32 = 0x58626F78;

/// Represents the trailing word of a replay recording (`JNR!`).
const PAD_MARKER: u32 = 0x21524E4A;

/// Represents the trailing word of a TGA footer (`LE.\0`).
const TGA_MARKER: u32 = 0x002E454C;

/// Represents the signature within a TGA footer.
const TGA_SIGNATURE: &[u8; 16] = b"TRUEVISION-XFILE";

/// Represents a mapping of little-endian magic numbers to file extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MagicTable {
	inner: HashMap<u32, String>,
}

impl MagicTable {
	/// Creates a new, empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds the extension for the specified magic number, returning `false` if the magic number was already present.
	pub fn insert(&mut self, magic: u32, ext: impl Into<String>) -> bool {
		match self.inner.entry(magic) {
			std::collections::hash_map::Entry::Occupied(_) => false,
			std::collections::hash_map::Entry::Vacant(entry) => {
				entry.insert(ext.into());

				true
			}
		}
	}

	/// Returns the extension for the specified magic number, if it exists.
	pub fn get(&self, magic: u32) -> Option<&str> {
		self.inner.get(&magic).map(String::as_str)
	}

	/// Returns the number of magic numbers in the table.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	/// Returns if the table is void of any magic numbers.
	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	/// Attempts to parse a lookup file.
	///
	/// Rows are either `0x<hex>="ext"` or `[ABCD]="ext"`, where the latter reads four characters as a little-endian word.
	/// Lines beginning with `#` are comments, and `#!` opens a comment block closed by a line beginning with `!#`.
	pub fn parse<R>(reader: R) -> Result<Self, LookupError>
	where
		R: BufRead,
	{
		let mut lines = reader.lines().enumerate().map(|(index, line)| (index + 1, line));

		let banner = match lines.next() {
			Some((_, line)) => line?,
			None => return Err(LookupError::InvalidHeader),
		};

		if banner.trim_end() != LOOKUP_BANNER {
			return Err(LookupError::InvalidHeader);
		}

		let mut table = Self::new();
		let mut in_block = false;

		for (number, line) in lines {
			let line = line?;

			if in_block {
				in_block = !line.starts_with("!#");

				continue;
			}

			if line.starts_with("#!") {
				in_block = true;

				continue;
			}

			if line.trim().is_empty() || line.starts_with('#') {
				continue;
			}

			let (magic, ext) = parse_row(&line).ok_or_else(|| LookupError::Malformed {
				line: number,
				text: line.clone(),
			})?;

			if table.insert(magic, ext) {
				trace!(magic = format_args!("{:#010X}", magic), ext, "added lookup entry");
			} else {
				warn!(number, %line, "duplicate entry in lookup table, skipping");
			}
		}

		Ok(table)
	}
}

impl FromIterator<(u32, String)> for MagicTable {
	fn from_iter<T: IntoIterator<Item = (u32, String)>>(iter: T) -> Self {
		let mut table = Self::new();

		for (magic, ext) in iter {
			table.insert(magic, ext);
		}

		table
	}
}

fn parse_row(line: &str) -> Option<(u32, &str)> {
	let (key, value) = line.split_once('=')?;

	let key = key.trim();
	let ext = value.trim().trim_matches('"').trim();

	if ext.is_empty() {
		return None;
	}

	let magic = if let Some(hex) = key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
		u32::from_str_radix(hex, 16).ok()?
	} else {
		let chars = key.strip_prefix('[')?.strip_suffix(']')?.as_bytes();

		if chars.len() != 4 {
			return None;
		}

		LittleEndian::read_u32(chars)
	};

	Some((magic, ext))
}

/// Guesses the extension of a payload from its first bytes (`head`, up to [`HEAD_SIZE`]) and last bytes (`tail`, up to [`TAIL_SIZE`]).
pub fn sniff(head: &[u8], tail: &[u8], table: &MagicTable) -> String {
	let word = |buf: &[u8], index: usize| buf.get(index..index + 4).map(LittleEndian::read_u32);

	if let Some(magic) = word(head, 0) {
		if let Some(ext) = table.get(magic) {
			return ext.to_owned();
		}

		// Byte order mark of UTF-16 text.

		if magic & 0xFFFF == 0xFEFF {
			return "txt".to_owned();
		}

		// An embedded PSP-styled archive repeats its entry count, which is assumed to fit 16 bits.

		if magic >> 16 == 0 && (1..4).all(|index| word(head, index * 4) == Some(magic)) {
			return "psp".to_owned();
		}

		if word(head, 0xC) == Some(XMV_MARKER) {
			return "xmv".to_owned();
		}
	}

	if tail.len() >= 4 {
		let last = &tail[tail.len() - 4..];

		if LittleEndian::read_u32(last) == PAD_MARKER {
			return "pad".to_owned();
		}

		// Text ending with a line break, in either byte order, at any alignment.
		// Deliberately wider than the positions the game's own tools check.

		if last.windows(2).any(|pair| pair == b"\r\n" || pair == b"\n\r") {
			return "txt".to_owned();
		}

		if tail.len() >= TAIL_SIZE && LittleEndian::read_u32(last) == TGA_MARKER && &tail[tail.len() - TAIL_SIZE..tail.len() - 2] == TGA_SIGNATURE {
			return "tga".to_owned();
		}
	}

	DEFAULT_EXTENSION.to_owned()
}

/// Guesses the extension of the payload of `len` bytes starting at the current position of `src`.
///
/// The position of `src` is restored before returning.
pub fn sniff_stream<R>(src: &mut R, len: u64, table: &MagicTable) -> io::Result<String>
where
	R: Read + Seek,
{
	let start = src.stream_position()?;
	let result = read_edges(src, start, len);

	src.seek(io::SeekFrom::Start(start))?;

	let (head, tail) = result?;

	Ok(sniff(&head, &tail, table))
}

fn read_edges<R>(src: &mut R, start: u64, len: u64) -> io::Result<(Vec<u8>, Vec<u8>)>
where
	R: Read + Seek,
{
	let mut head = Vec::with_capacity(HEAD_SIZE);

	src.by_ref().take(len.min(HEAD_SIZE as u64)).read_to_end(&mut head)?;

	let tail_len = len.min(TAIL_SIZE as u64);
	let mut tail = Vec::with_capacity(TAIL_SIZE);

	src.seek(io::SeekFrom::Start(start + len - tail_len))?;
	src.by_ref().take(tail_len).read_to_end(&mut tail)?;

	Ok((head, tail))
}
