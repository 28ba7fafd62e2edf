use std::{
	cell::{Cell, OnceCell},
	collections::HashMap,
	io::BufRead,
};

use tracing::{debug, trace, warn};

use crate::{hash::hash, read::Version};

/// Represents a lookup of filenames from their hashes, compiled from a corpus of known filenames.
///
/// The lookup is compiled on first use and kept for the lifetime of the resolver.
#[derive(Debug, Default)]
pub struct HashResolver {
	corpus: Vec<String>,

	table: OnceCell<Table>,
	psp_warned: Cell<bool>,
}

#[derive(Debug, Default)]
struct Table {
	names: HashMap<u32, String>,
	collisions: usize,
}

impl HashResolver {
	/// Creates a new resolver over the specified corpus of known filenames, in order of precedence.
	pub fn new<I, S>(corpus: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			corpus: corpus.into_iter().map(Into::into).collect(),
			..Default::default()
		}
	}

	/// Creates a new resolver from a corpus file listing one filename per line.
	///
	/// Blank lines and lines beginning with `#` are ignored.
	pub fn from_reader<R>(reader: R) -> std::io::Result<Self>
	where
		R: BufRead,
	{
		let mut corpus = Vec::new();

		for line in reader.lines() {
			let line = line?;
			let line = line.trim();

			if line.is_empty() || line.starts_with('#') {
				continue;
			}

			corpus.push(line.to_owned());
		}

		Ok(Self::new(corpus))
	}

	/// Returns the filename with the specified hash, if it is known.
	pub fn resolve(&self, hash: u32) -> Option<&str> {
		self.table().names.get(&hash).map(String::as_str)
	}

	/// Returns the filename with the specified hash for an archive of the specified version, if it is known.
	///
	/// PSP-styled archives hash their names differently, so nothing can be resolved for them.
	pub fn lookup(&self, version: Version, hash: u32) -> Option<&str> {
		if version == Version::Psp {
			if !self.psp_warned.replace(true) {
				warn!("PSP archive uses an unknown hashing method, filenames cannot be determined");
			}

			return None;
		}

		let name = self.resolve(hash);

		if name.is_none() {
			debug!(hash, "unresolved filename hash");
		}

		name
	}

	/// Returns the number of colliding filenames that were dropped from the lookup.
	pub fn collisions(&self) -> usize {
		self.table().collisions
	}

	/// Returns the number of distinct filenames in the lookup.
	pub fn len(&self) -> usize {
		self.table().names.len()
	}

	/// Returns if the lookup holds no filenames.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn table(&self) -> &Table {
		self.table.get_or_init(|| compile(&self.corpus))
	}
}

fn compile(corpus: &[String]) -> Table {
	let mut table = Table::default();

	for name in corpus {
		let name = name.to_ascii_uppercase();
		let key = hash(name.as_bytes());

		match table.names.get(&key) {
			Some(existing) if *existing == name => {
				trace!(%name, "skipping duplicate filename");
			}
			Some(existing) => {
				warn!(%name, %existing, "hash conflict, keeping the first filename");

				table.collisions += 1;
			}
			None => {
				table.names.insert(key, name);
			}
		}
	}

	debug!(count = table.names.len(), "compiled filename lookup");

	table
}
