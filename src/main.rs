//! Command-line application for inspecting, unpacking and rebuilding Driver `IMG` archives.

use std::{
	ffi::OsString,
	fs::{self, File},
	io::{self, BufReader, BufWriter, Write},
	path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{command, Parser, Subcommand};
use driver_img::{
	manifest::{to_path, Blacklist, Manifest},
	read::Archive,
	resolve::HashResolver,
	sniff::MagicTable,
	unpack::{FileSources, UnpackOptions, Unpacker, FILES_DIR},
	write::{check_rebuildable, DirProvider, PspWriter},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Represents the filename of the blacklist read alongside a manifest.
const BLACKLIST_NAME: &str = "blacklist.txt";

/// Represents the directory, within the target, receiving built archives.
const BUILD_DIR: &str = "Build";

/// Performs operations on Driver IMG archives
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
	/// Increases the verbosity of logging (repeatable)
	#[arg(short, long, action = clap::ArgAction::Count, global = true)]
	verbose: u8,

	/// Indicates the operation to perform
	#[command(subcommand)]
	operation: Operation,
}

/// Represents the operation to perform
#[derive(Debug, Subcommand)]
enum Operation {
	/// Inspect the header and entries of an archive
	Inspect {
		/// Specifies the img file
		img: PathBuf,
	},

	/// List the contents of an archive, resolving names where possible
	List {
		/// Specifies the img file
		img: PathBuf,

		#[command(flatten)]
		lookups: Lookups,
	},

	/// Extract the contents of an archive to an output directory
	Unpack {
		/// Specifies the img file
		img: PathBuf,

		/// Specifies the output directory
		#[arg(short, long)]
		target: PathBuf,

		#[command(flatten)]
		lookups: Lookups,

		/// Replaces files already present in the output directory
		#[arg(long)]
		overwrite: bool,

		/// Leaves out the payloads of videos
		#[arg(long)]
		skip_fmv: bool,
	},

	/// Rebuild an archive from an unpacked directory
	Build {
		/// Specifies the manifest, next to which the unpacked files are expected
		manifest: PathBuf,

		/// Specifies the output directory
		#[arg(short, long)]
		target: PathBuf,
	},
}

/// Represents the lookup files used to name entries
#[derive(Debug, clap::Args)]
struct Lookups {
	/// Specifies a file listing known filenames, one per line
	#[arg(long)]
	names: Option<PathBuf>,

	/// Specifies a magic number lookup file
	#[arg(long)]
	magic: Option<PathBuf>,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	// Set up logging, letting the environment take precedence over the flags.

	let level = match cli.verbose {
		0 => "warn",
		1 => "info",
		_ => "debug",
	};

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
		.with_writer(io::stderr)
		.init();

	match cli.operation {
		Operation::Inspect {
			img,
		} => inspect(&img),
		Operation::List {
			img,
			lookups,
		} => list(&img, &lookups),
		Operation::Unpack {
			img,
			target,
			lookups,
			overwrite,
			skip_fmv,
		} => unpack(&img, &target, &lookups, UnpackOptions {
			overwrite,
			skip_fmv,
		}),
		Operation::Build {
			manifest,
			target,
		} => build(&manifest, &target),
	}
}

fn inspect(img: &Path) -> Result<()> {
	let archive = open(img)?;

	println!("Version: {}", archive.version());
	println!("Reserved: {:#010X}", archive.reserved());

	for entry in archive.iter() {
		println!("[{:<24}] offset: {}, length: {}", entry.name, entry.byte_offset(), entry.len);
	}

	println!("Inspected {} entries.", archive.len());

	Ok(())
}

fn list(img: &Path, lookups: &Lookups) -> Result<()> {
	let archive = open(img)?;
	let (resolver, magic) = lookups.load()?;

	let listing = Unpacker::new(&resolver, &magic, UnpackOptions::default())
		.list(&archive, &mut FileSources::new(img))
		.context("failed to list archive")?;

	for line in listing {
		println!("{}", line);
	}

	Ok(())
}

fn unpack(img: &Path, target: &Path, lookups: &Lookups, options: UnpackOptions) -> Result<()> {
	let archive = open(img)?;
	let (resolver, magic) = lookups.load()?;

	let archive_name = img.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();

	info!(archive = %archive_name, version = %archive.version(), count = archive.len(), "unpacking archive");

	let report = Unpacker::new(&resolver, &magic, options)
		.unpack(&archive, &archive_name, &mut FileSources::new(img), target)
		.with_context(|| format!("failed to unpack archive to {}", target.display()))?;

	println!("Extracted {} entries, skipped {}.", report.written, report.skipped);

	Ok(())
}

fn build(manifest_path: &Path, target: &Path) -> Result<()> {
	let manifest = Manifest::parse(BufReader::new(File::open(manifest_path).with_context(|| format!("failed to open manifest {}", manifest_path.display()))?))
		.with_context(|| format!("failed to parse manifest {}", manifest_path.display()))?;

	// Reject unsupported versions before anything is created on disk.

	check_rebuildable(&manifest)?;

	let base = manifest_path.parent().unwrap_or(Path::new("."));
	let blacklist_path = base.join(BLACKLIST_NAME);

	let blacklist = if blacklist_path.is_file() {
		Blacklist::parse(BufReader::new(File::open(&blacklist_path)?)).context("failed to parse blacklist")?
	} else {
		Blacklist::default()
	};

	let build_dir = target.join(BUILD_DIR);

	fs::create_dir_all(&build_dir)?;

	// Write to a temporary file, renamed once the build succeeds.

	let out = to_path(&build_dir, &manifest.archive);
	let part: PathBuf = {
		let mut part = OsString::from(out.as_os_str());

		part.push(".part");
		part.into()
	};

	let result = write_archive(&part, &manifest, &DirProvider::new(base.join(FILES_DIR)), &blacklist);

	let report = match result {
		Ok(report) => report,
		Err(err) => {
			if let Err(err) = fs::remove_file(&part) {
				warn!(path = %part.display(), %err, "failed to remove partial archive");
			}

			return Err(err);
		}
	};

	fs::rename(&part, &out).with_context(|| format!("failed to move archive to {}", out.display()))?;

	for name in &report.missing {
		println!("Missing file: {}", name);
	}

	println!("Built {} entries ({} bytes) to {}.", report.written, report.size, out.display());

	Ok(())
}

fn write_archive(path: &Path, manifest: &Manifest, provider: &DirProvider, blacklist: &Blacklist) -> Result<driver_img::write::BuildReport> {
	let mut out = BufWriter::new(File::create(path).with_context(|| format!("failed to create {}", path.display()))?);

	let report = PspWriter::new(&mut out).build(manifest, provider, blacklist).context("failed to build archive")?;

	out.flush()?;

	Ok(report)
}

fn open(img: &Path) -> Result<Archive> {
	let mut file = BufReader::new(File::open(img).with_context(|| format!("failed to open img file {}", img.display()))?);

	driver_img::read(&mut file).with_context(|| format!("failed to read archive {}", img.display()))
}

impl Lookups {
	fn load(&self) -> Result<(HashResolver, MagicTable)> {
		let resolver = match &self.names {
			Some(path) => HashResolver::from_reader(BufReader::new(File::open(path).with_context(|| format!("failed to open names file {}", path.display()))?))?,
			None => HashResolver::default(),
		};

		let magic = match &self.magic {
			Some(path) => MagicTable::parse(BufReader::new(File::open(path).with_context(|| format!("failed to open magic file {}", path.display()))?))
				.with_context(|| format!("failed to parse magic file {}", path.display()))?,
			None => MagicTable::new(),
		};

		Ok((resolver, magic))
	}
}
