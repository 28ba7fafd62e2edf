/// Represents the initial value of the key subtracted from each byte.
const INITIAL_KEY: u8 = 27;

/// Represents the step applied to the key by the legacy schedule, and the long window of the modern schedule.
const SLOW_STEP: u8 = 11;

/// Represents the step applied to the key during the short window of the modern schedule.
const FAST_STEP: u8 = 21;

/// Represents the counter value beyond which the short window ends.
const FAST_WINDOW: u32 = 6;

/// Represents the counter value beyond which the long window ends.
const SLOW_WINDOW: u32 = 24;

/// Represents the key schedule used to protect an entry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
	/// The schedule of V2-styled archives, where the key advances by a constant step.
	Legacy,

	/// The schedule of V3-styled and V4-styled archives, where the step alternates between two windows.
	Modern,
}

/// Represents the stream of keys produced by a schedule.
#[derive(Debug, Clone)]
struct Keys {
	schedule: Schedule,

	key: u8,
	step: u8,
	counter: u32,
}

impl Keys {
	fn new(schedule: Schedule) -> Self {
		Self {
			schedule,
			key: INITIAL_KEY,
			step: FAST_STEP,
			counter: 1,
		}
	}
}

impl Iterator for Keys {
	type Item = u8;

	fn next(&mut self) -> Option<u8> {
		let key = self.key;

		match self.schedule {
			Schedule::Legacy => {
				self.key = self.key.wrapping_add(SLOW_STEP);
			}
			Schedule::Modern => {
				self.key = self.key.wrapping_add(self.step);

				// The counter is compared after the step is applied, so each window runs one byte longer than its bound.

				if self.counter > FAST_WINDOW && self.step == FAST_STEP {
					self.counter = 0;
					self.step = SLOW_STEP;
				}

				if self.counter > SLOW_WINDOW && self.step == SLOW_STEP {
					self.counter = 0;
					self.step = FAST_STEP;
				}

				self.counter += 1;
			}
		}

		Some(key)
	}
}

/// Decrypts `buf` in place with the specified schedule.
pub fn decrypt(buf: &mut [u8], schedule: Schedule) {
	for (b, key) in buf.iter_mut().zip(Keys::new(schedule)) {
		*b = b.wrapping_sub(key);
	}
}

/// Encrypts `buf` in place with the specified schedule, reversing [`decrypt`].
pub fn encrypt(buf: &mut [u8], schedule: Schedule) {
	for (b, key) in buf.iter_mut().zip(Keys::new(schedule)) {
		*b = b.wrapping_add(key);
	}
}

#[cfg(test)]
mod tests {
	use super::{decrypt, encrypt, Keys, Schedule};

	#[test]
	fn test_legacy_keys() {
		let keys: Vec<u8> = Keys::new(Schedule::Legacy).take(4).collect();

		assert_eq!(keys, vec![27, 38, 49, 60]);
	}

	#[test]
	fn test_modern_keys() {
		let keys: Vec<u8> = Keys::new(Schedule::Modern).take(34).collect();

		// Seven steps of 21, then twenty-five steps of 11, then 21 again.

		let mut expected = vec![27u8];

		for i in 0..33 {
			let step = if i < 7 || i >= 32 { 21 } else { 11 };

			expected.push(expected[i].wrapping_add(step));
		}

		assert_eq!(keys, expected);
	}

	#[test]
	fn test_decrypt_zeroes() {
		let mut buf = [0u8; 3];

		decrypt(&mut buf, Schedule::Legacy);

		assert_eq!(buf, [0u8.wrapping_sub(27), 0u8.wrapping_sub(38), 0u8.wrapping_sub(49)]);
	}

	#[test]
	fn test_encrypt_reverses_decrypt() {
		let plain: Vec<u8> = (0..=255).collect();

		for schedule in [Schedule::Legacy, Schedule::Modern] {
			let mut buf = plain.clone();

			encrypt(&mut buf, schedule);
			assert_ne!(buf, plain);

			decrypt(&mut buf, schedule);
			assert_eq!(buf, plain);
		}
	}
}
