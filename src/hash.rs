use crate::NULL_TERMINATOR;

/// Computes the hash of a filename, stopping at the end of `name` or at the first null terminator.
///
/// The hash is case-sensitive; archives store the hashes of uppercase names, see [`hash_name`].
pub fn hash(name: &[u8]) -> u32 {
	let mut h: u32 = 0;

	for &c in name.iter().take_while(|&&c| c != NULL_TERMINATOR) {
		h = h.wrapping_add(c as u32).wrapping_mul(1025);
		h ^= h >> 6;
	}

	h = h.wrapping_add(h << 3);

	((h >> 11) ^ h).wrapping_mul(32769)
}

/// Computes the hash of a filename after converting it to uppercase, as stored by archives.
pub fn hash_name(name: &str) -> u32 {
	hash(name.to_ascii_uppercase().as_bytes())
}
