use std::{
	fs::{self, File},
	io::{BufReader, Cursor},
	path::Path,
};

use byteorder::{LittleEndian, WriteBytesExt};
use driver_img::{
	crypt::{encrypt, Schedule},
	hash::hash,
	manifest::{Blacklist, Manifest},
	read::Version,
	resolve::HashResolver,
	sniff::MagicTable,
	unpack::{FileSources, UnpackOptions, Unpacker, FILES_DIR, LISTING_NAME, MANIFEST_NAME},
	write::{DirProvider, PspWriter},
	IMG_MAGIC,
};

/// Builds a PSP-styled archive whose data order differs from its table order.
fn psp_img() -> Vec<u8> {
	let table = [(0x0A0B0001u32, 0x2000u32, 100u32), (0x0A0B0002, 0x800, 5000), (0x0A0B0003, 0x2800, 1)];

	let mut buf = Vec::new();

	for _ in 0..4 {
		buf.write_u32::<LittleEndian>(table.len() as u32).unwrap();
	}

	for &(hash, off, len) in &table {
		buf.write_u32::<LittleEndian>(hash).unwrap();
		buf.write_u32::<LittleEndian>(off).unwrap();
		buf.write_u32::<LittleEndian>(len).unwrap();
		buf.write_u32::<LittleEndian>(len).unwrap();
	}

	buf.resize(0x3000, 0);

	buf[0x800..0x800 + 5000].fill(0x5A);
	buf[0x2000..0x2000 + 100].fill(0x11);
	buf[0x2800] = 0x77;

	buf
}

fn unpack(img: &Path, dest: &Path, resolver: &HashResolver) -> driver_img::unpack::UnpackReport {
	let archive = driver_img::read(&mut BufReader::new(File::open(img).expect("failed to open archive"))).expect("failed to read archive");

	Unpacker::new(resolver, &MagicTable::new(), UnpackOptions::default())
		.unpack(&archive, "GAME.IMG", &mut FileSources::new(img), dest)
		.expect("failed to unpack archive")
}

fn rebuild(dest: &Path) -> (driver_img::write::BuildReport, Vec<u8>) {
	let manifest = Manifest::parse(BufReader::new(File::open(dest.join(MANIFEST_NAME)).expect("failed to open manifest"))).expect("failed to parse manifest");

	let mut out = Vec::new();
	let report = PspWriter::new(&mut out)
		.build(&manifest, &DirProvider::new(dest.join(FILES_DIR)), &Blacklist::default())
		.expect("failed to build archive");

	(report, out)
}

#[test]
fn test_psp_roundtrip() {
	let dir = tempfile::tempdir().expect("failed to create temporary directory");
	let img = dir.path().join("GAME.IMG");
	let dest = dir.path().join("out");

	let original = psp_img();

	fs::write(&img, &original).expect("failed to write archive");

	let report = unpack(&img, &dest, &HashResolver::default());

	assert_eq!(report.written, 3);
	assert_eq!(report.manifest.kind, 5);
	assert!(report.manifest.is_reordered());
	assert_eq!(report.manifest.files[0].name, "_UNKNOWN\\0010_0011_1.bin");
	assert!(dest.join(FILES_DIR).join("_UNKNOWN").join("0010_0011_1.bin").is_file());

	let listing = fs::read_to_string(dest.join(LISTING_NAME)).expect("failed to read listing");

	assert!(listing.starts_with("0x00002000, 0x00000064, 0x00000064, 0x0A0B0001 -> _UNKNOWN\\0010_0011_1.bin\n"));

	let (build, rebuilt) = rebuild(&dest);

	assert_eq!(build.written, 3);
	assert!(build.missing.is_empty());
	assert_eq!(rebuilt, original);
}

#[test]
fn test_psp_rebuild_missing_file() {
	let dir = tempfile::tempdir().expect("failed to create temporary directory");
	let img = dir.path().join("GAME.IMG");
	let dest = dir.path().join("out");

	fs::write(&img, psp_img()).expect("failed to write archive");

	unpack(&img, &dest, &HashResolver::default());

	fs::remove_file(dest.join(FILES_DIR).join("_UNKNOWN").join("0010_0011_2.bin")).expect("failed to remove file");

	let (build, rebuilt) = rebuild(&dest);

	assert_eq!(build.written, 2);
	assert_eq!(build.missing, vec!["_UNKNOWN\\0010_0011_2.bin".to_owned()]);

	let archive = driver_img::read(&mut Cursor::new(rebuilt)).expect("failed to read rebuilt archive");

	assert_eq!(archive.version(), Version::Psp);
	assert_eq!(archive.len(), 2);
	assert_eq!(archive.get(0).expect("expected first entry").byte_offset(), 0x800);
	assert_eq!(archive.get(1).expect("expected second entry").byte_offset(), 0x1000);
}

#[test]
fn test_xbox_unpack_from_lumps() {
	let dir = tempfile::tempdir().expect("failed to create temporary directory");
	let img = dir.path().join("game.img");
	let dest = dir.path().join("out");

	let mut table = Vec::new();

	for (hash, packed, len) in [(hash(b"GAMECONFIG.TXT"), 0u32, 5u32), (0x1234, (1 << 8) | 1, 4)] {
		table.write_u32::<LittleEndian>(hash).unwrap();
		table.write_u32::<LittleEndian>(packed).unwrap();
		table.write_u32::<LittleEndian>(len).unwrap();
	}

	encrypt(&mut table, Schedule::Modern);

	let mut buf = Vec::new();

	buf.write_u32::<LittleEndian>(IMG_MAGIC | (0x34 << 24)).unwrap();
	buf.write_u32::<LittleEndian>(2).unwrap();
	buf.write_u32::<LittleEndian>(0).unwrap();
	buf.write_u32::<LittleEndian>(table.len() as u32).unwrap();
	buf.extend_from_slice(&table);

	fs::write(&img, buf).expect("failed to write archive");
	fs::write(dir.path().join("GAME.L00"), b"HELLO").expect("failed to write first lump");

	let mut lump = vec![0u8; 2048];

	lump.extend_from_slice(b"ab\r\n");

	fs::write(dir.path().join("GAME.L01"), lump).expect("failed to write second lump");

	let report = unpack(&img, &dest, &HashResolver::new(["GameConfig.txt"]));

	assert_eq!(report.manifest.kind, 4);
	assert_eq!(report.manifest.files[0].name, "GAMECONFIG.TXT");
	assert_eq!(report.manifest.files[1].name, "_UNKNOWN\\L01\\4660.txt");
	assert_eq!(report.listing[1], "0x00000800, 0x00000004, GAME.L01 -> _UNKNOWN\\L01\\4660.txt");

	assert_eq!(fs::read(dest.join(FILES_DIR).join("GAMECONFIG.TXT")).expect("failed to read file"), b"HELLO");
	assert_eq!(fs::read(dest.join(FILES_DIR).join("_UNKNOWN").join("L01").join("4660.txt")).expect("failed to read file"), b"ab\r\n");
}
