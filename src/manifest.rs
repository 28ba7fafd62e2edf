use std::{
	collections::HashSet,
	fmt,
	io::BufRead,
	path::{Component, Path, PathBuf},
};

use tracing::debug;

use crate::error::ManifestError;

/// Represents the only supported format version of a manifest.
pub const FORMAT_VERSION: u32 = 1;

/// Represents the line terminating a manifest.
pub const END_MARKER: &str = "#EOF";

/// Represents the directory prefix given to entries whose name could not be determined.
pub const UNKNOWN_DIR: &str = "_UNKNOWN";

/// Represents a single file of an archive, as recorded in a manifest.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct FileDescriptor {
	/// The position of the entry in the table.
	pub index: usize,

	/// The position of the data of the entry, among the data of all entries.
	pub data_index: usize,

	/// The hash of the name of the entry.
	pub hash: u32,

	/// The relative filename of the entry, using `\` as the separator.
	pub name: String,
}

/// Represents the description of an archive used to rebuild it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
	/// The filename of the archive.
	pub archive: String,

	/// The type of the archive, see [`crate::read::Version::manifest_type`].
	pub kind: u32,

	/// The files of the archive, in table order.
	pub files: Vec<FileDescriptor>,
}

/// Represents a set of relative filenames excluded from a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blacklist {
	names: HashSet<String>,
}

impl Manifest {
	/// Attempts to parse a manifest.
	///
	/// Rows are `0xHASH,name`, or `dataIndex,0xHASH,name` when the data order differs from the table order.
	pub fn parse<R>(reader: R) -> Result<Self, ManifestError>
	where
		R: BufRead,
	{
		let mut archive: Option<String> = None;
		let mut kind: Option<u32> = None;
		let mut version: Option<u32> = None;

		let mut step = 0;
		let mut files: Vec<FileDescriptor> = Vec::new();
		let mut seen: HashSet<usize> = HashSet::new();

		for (number, line) in reader.lines().enumerate() {
			let line = line?;
			let number = number + 1;

			if line.eq_ignore_ascii_case(END_MARKER) {
				break;
			}

			if line.is_empty() || line.starts_with('#') {
				continue;
			}

			// The first three lines make up the header.

			if step < 3 {
				let Some((key, value)) = line.split_once(' ') else {
					debug!(number, %line, "skipping unknown input");

					continue;
				};

				match key.to_ascii_lowercase().as_str() {
					"archive" => archive = Some(value.to_owned()),
					"type" => kind = Some(parse_header_value("type", value)?),
					"version" => version = Some(parse_header_value("version", value)?),
					_ => return Err(ManifestError::UnknownKey(line)),
				}

				step += 1;

				if step == 3 {
					validate_header(archive.as_deref(), kind, version)?;
				}

				continue;
			}

			let file = parse_row(number, files.len(), &line)?;

			if !seen.insert(file.data_index) {
				return Err(ManifestError::DuplicateDataIndex {
					line: number,
					data_index: file.data_index,
				});
			}

			files.push(file);
		}

		validate_header(archive.as_deref(), kind, version)?;

		Ok(Self {
			archive: archive.unwrap_or_default(),
			kind: kind.unwrap_or_default(),
			files,
		})
	}

	/// Returns if the data order of any file differs from its table order.
	pub fn is_reordered(&self) -> bool {
		self.files.iter().any(|file| file.index != file.data_index)
	}
}

impl fmt::Display for Manifest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "archive {}", self.archive)?;
		writeln!(f, "type {}", self.kind)?;
		writeln!(f, "version {}", FORMAT_VERSION)?;
		writeln!(f)?;

		let reordered = self.is_reordered();

		for file in &self.files {
			if reordered {
				write!(f, "{:04},", file.data_index)?;
			}

			writeln!(f, "0x{:08X},{}", file.hash, file.name)?;
		}

		write!(f, "{}", END_MARKER)
	}
}

impl Blacklist {
	/// Creates a new blacklist of the specified filenames.
	pub fn new<I, S>(names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			names: names.into_iter().map(Into::into).collect(),
		}
	}

	/// Attempts to parse a blacklist listing one relative filename per line.
	pub fn parse<R>(reader: R) -> Result<Self, ManifestError>
	where
		R: BufRead,
	{
		let mut names = HashSet::new();

		for line in reader.lines() {
			let line = line?;
			let line = line.trim();

			if !line.is_empty() {
				names.insert(line.to_owned());
			}
		}

		Ok(Self {
			names,
		})
	}

	/// Returns if the specified filename is excluded.
	pub fn contains(&self, name: &str) -> bool {
		self.names.contains(name)
	}

	/// Returns the number of excluded filenames.
	pub fn len(&self) -> usize {
		self.names.len()
	}

	/// Returns if nothing is excluded.
	pub fn is_empty(&self) -> bool {
		self.names.is_empty()
	}
}

/// Converts a relative filename using `\` or `/` separators to a path below `root`.
///
/// Empty, current-directory and parent-directory components are dropped so the result never escapes `root`.
pub fn to_path(root: &Path, name: &str) -> PathBuf {
	let mut path = root.to_path_buf();

	for part in name.split(['\\', '/']) {
		let mut components = Path::new(part).components();

		if let (Some(Component::Normal(part)), None) = (components.next(), components.next()) {
			path.push(part);
		}
	}

	path
}

fn parse_header_value(key: &'static str, value: &str) -> Result<u32, ManifestError> {
	value.trim().parse().map_err(|_| ManifestError::InvalidValue {
		key,
		value: value.to_owned(),
	})
}

fn validate_header(archive: Option<&str>, kind: Option<u32>, version: Option<u32>) -> Result<(), ManifestError> {
	match archive {
		Some(archive) if !archive.is_empty() => {}
		_ => return Err(ManifestError::MissingField("archive")),
	}

	if kind.is_none() {
		return Err(ManifestError::MissingField("type"));
	}

	match version {
		None => Err(ManifestError::MissingField("version")),
		Some(FORMAT_VERSION) => Ok(()),
		Some(other) => Err(ManifestError::UnsupportedFormatVersion(other)),
	}
}

fn parse_row(line: usize, index: usize, text: &str) -> Result<FileDescriptor, ManifestError> {
	let malformed = |reason: &str| ManifestError::MalformedRow {
		line,
		reason: reason.to_owned(),
	};

	// A leading hash marks the short form, where the data follows the table order.

	let (data_index, rest) = if text.starts_with("0x") || text.starts_with("0X") {
		(index, text)
	} else {
		let (data_index, rest) = text.split_once(',').ok_or_else(|| malformed("expected 'dataIndex,hash,filename'"))?;
		let data_index = data_index.trim().parse().map_err(|_| malformed("invalid data index"))?;

		(data_index, rest)
	};

	let (hash, name) = rest.split_once(',').ok_or_else(|| malformed("expected 'hash,filename'"))?;

	let hash = hash.trim();
	let hash = hash.strip_prefix("0x").or_else(|| hash.strip_prefix("0X")).unwrap_or(hash);
	let hash = u32::from_str_radix(hash, 16).map_err(|_| malformed("invalid hash"))?;

	if name.is_empty() {
		return Err(malformed("empty filename"));
	}

	Ok(FileDescriptor {
		index,
		data_index,
		hash,
		name: name.to_owned(),
	})
}
