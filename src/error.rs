use std::io;

use thiserror::Error;

/// Represents a read-related error.
#[derive(Debug, Error)]
pub enum ReadError {
	/// Indicates that a generic I/O error occurred.
	#[error("input/output error [{0}]")]
	IoError(#[from] io::Error),

	/// Indicates that the header matched none of the known versions.
	#[error("not an archive")]
	NotAnArchive,

	/// Indicates that the header was recognised but carried an unknown version.
	#[error("unsupported version [{0}]")]
	UnsupportedVersion(u32),

	/// Indicates that the entry table is inconsistent with the header.
	#[error("corrupt archive [{0}]")]
	CorruptArchive(String),
}

/// Represents an error in a rebuild manifest or blacklist.
#[derive(Debug, Error)]
pub enum ManifestError {
	/// Indicates that a generic I/O error occurred.
	#[error("input/output error [{0}]")]
	IoError(#[from] io::Error),

	/// Indicates that a header field was never given.
	#[error("missing header field '{0}'")]
	MissingField(&'static str),

	/// Indicates an unrecognised header line.
	#[error("unknown header data '{0}'")]
	UnknownKey(String),

	/// Indicates that a header field could not be parsed.
	#[error("invalid value '{value}' for '{key}'")]
	InvalidValue { key: &'static str, value: String },

	/// Indicates a manifest format other than the supported one.
	#[error("unsupported manifest version [{0}]")]
	UnsupportedFormatVersion(u32),

	/// Indicates a row that could not be parsed.
	#[error("malformed entry at line {line}: {reason}")]
	MalformedRow { line: usize, reason: String },

	/// Indicates two rows claiming the same position in the data.
	#[error("duplicate data index {data_index} at line {line}")]
	DuplicateDataIndex { line: usize, data_index: usize },
}

/// Represents an error in a magic number lookup file.
#[derive(Debug, Error)]
pub enum LookupError {
	/// Indicates that a generic I/O error occurred.
	#[error("input/output error [{0}]")]
	IoError(#[from] io::Error),

	/// Indicates that the first line is not the expected banner.
	#[error("invalid lookup table header")]
	InvalidHeader,

	/// Indicates a row that could not be parsed.
	#[error("malformed lookup entry at line {line}: {text}")]
	Malformed { line: usize, text: String },
}

/// Represents an unpack-related error.
#[derive(Debug, Error)]
pub enum UnpackError {
	/// Indicates that a generic I/O error occurred.
	#[error("input/output error [{0}]")]
	IoError(#[from] io::Error),

	/// Indicates that the archive itself could not be read.
	#[error(transparent)]
	Read(#[from] ReadError),
}

/// Represents a write-related error.
#[derive(Debug, Error)]
pub enum WriteError {
	/// Indicates that a generic I/O error occurred.
	#[error("input/output error [{0}]")]
	IoError(#[from] io::Error),

	/// Indicates that the manifest driving the build is invalid.
	#[error(transparent)]
	Manifest(#[from] ManifestError),

	/// Indicates a request to write a version that can only be read.
	#[error("rebuilding archives of type {0} is unsupported")]
	UnsupportedRebuildVariant(u32),

	/// Indicates that a source file changed size between layout and copy.
	#[error("size of '{name}' changed from {expected} to {actual} before the archive could be built")]
	SourceFileChanged { name: String, expected: u64, actual: u64 },

	/// Indicates that the laid out archive exceeds the addressable size.
	#[error("archive size limit exceeded [{0} bytes]")]
	ArchiveTooLarge(u64),
}
