use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::{
	crypt,
	error::{ReadError, WriteError},
	read::{Entry, EntryKind, EntryName, Version},
	NULL_TERMINATOR,
};

/// Represents the length of the inline name field of a V2-styled record.
const V2_NAME_SIZE: usize = 0x30;

/// Decrypts and decodes the `count` records of an entry table of the specified version from `blob`.
///
/// The blob is decrypted in place, as V3-styled records point at names stored after the records.
pub fn decode(version: Version, blob: &mut [u8], count: usize) -> Result<Vec<Entry>, ReadError> {
	let stride = version.record_size();
	let needed = count.checked_mul(stride).ok_or_else(|| ReadError::CorruptArchive(format!("entry count {} overflows", count)))?;

	if blob.len() < needed {
		return Err(ReadError::CorruptArchive(format!("table holds {} bytes, {} entries of {} bytes expected", blob.len(), count, stride)));
	}

	if let Some(schedule) = version.schedule() {
		crypt::decrypt(blob, schedule);
	}

	let blob = &*blob;

	blob[..needed].chunks_exact(stride).map(|record| decode_record(version, blob, record)).collect()
}

/// Encodes the entry table of the specified version.
///
/// Only the unprotected PSP-styled table can be written.
pub fn encode(version: Version, entries: &[Entry]) -> Result<Vec<u8>, WriteError> {
	if version != Version::Psp {
		return Err(WriteError::UnsupportedRebuildVariant(version.manifest_type()));
	}

	let mut buf = Vec::with_capacity(entries.len() * version.record_size());

	for entry in entries {
		let uncompressed_len = match entry.kind {
			EntryKind::Psp {
				uncompressed_len,
			} => uncompressed_len,
			_ => entry.len,
		};

		buf.write_u32::<LittleEndian>(entry.hash())?;
		buf.write_u32::<LittleEndian>(entry.off)?;
		buf.write_u32::<LittleEndian>(entry.len)?;
		buf.write_u32::<LittleEndian>(uncompressed_len)?;
	}

	Ok(buf)
}

fn decode_record(version: Version, blob: &[u8], record: &[u8]) -> Result<Entry, ReadError> {
	let word = |index: usize| LittleEndian::read_u32(&record[index * 4..index * 4 + 4]);

	let entry = match version {
		Version::V2 => Entry {
			name: EntryName::Named(read_null_terminated(&record[..V2_NAME_SIZE])),
			off: LittleEndian::read_u32(&record[V2_NAME_SIZE..]),
			len: LittleEndian::read_u32(&record[V2_NAME_SIZE + 4..]),
			kind: EntryKind::Plain,
		},
		Version::V3 => {
			let ptr = word(0) as usize;

			// The name must lie within the table and be terminated before its end.

			let tail = blob.get(ptr..).ok_or_else(|| ReadError::CorruptArchive(format!("name pointer {:#x} exceeds table length {:#x}", ptr, blob.len())))?;

			if !tail.contains(&NULL_TERMINATOR) {
				return Err(ReadError::CorruptArchive(format!("unterminated name at {:#x}", ptr)));
			}

			Entry {
				name: EntryName::Named(read_null_terminated(tail)),
				off: word(1),
				len: word(2),
				kind: EntryKind::Plain,
			}
		}
		Version::V4Pc => Entry {
			name: EntryName::Hashed(word(0)),
			off: word(1),
			len: word(2),
			kind: EntryKind::Plain,
		},
		Version::V4Xbox => {
			let packed = word(1);

			Entry {
				name: EntryName::Hashed(word(0)),
				off: (packed >> 8) & 0xFFFFFF,
				len: word(2),
				kind: EntryKind::Xbox {
					lump: (packed & 0xFF) as u8,
				},
			}
		}
		Version::Psp => Entry {
			name: EntryName::Hashed(word(0)),
			off: word(1),
			len: word(2),
			kind: EntryKind::Psp {
				uncompressed_len: word(3),
			},
		},
	};

	Ok(entry)
}

fn read_null_terminated(buf: &[u8]) -> String {
	// Determine the position of the null terminator and build a string from it.

	let pos = buf.iter().position(|&b| b == NULL_TERMINATOR).unwrap_or(buf.len());

	buf[..pos].iter().map(|&b| char::from(b)).collect()
}
