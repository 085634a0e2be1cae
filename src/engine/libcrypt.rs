//! The system libcrypt, for crypt(3) schemes `pwhash` does not implement.
//!
//! Current Debian, Ubuntu and Fedora write yescrypt (`$y$`) into shadow(5).
//! Those hashes go through libxcrypt's `crypt_rn`, which is reentrant given a
//! caller-owned `struct crypt_data`. Each search thread keeps one scratch area
//! for its lifetime.

#![allow(unsafe_code)]

use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::io;

use super::VerifyError;

/// Setting prefixes handed to libcrypt instead of `pwhash`.
pub const PREFIXES: [&str; 3] = ["$y$", "$gy$", "$7$"];

/// `sizeof(struct crypt_data)` in libxcrypt.
const CRYPT_DATA_SIZE: usize = 32768;

#[link(name = "crypt")]
extern "C" {
    fn crypt_rn(
        phrase: *const c_char,
        setting: *const c_char,
        data: *mut c_void,
        size: c_int,
    ) -> *mut c_char;
}

thread_local! {
    static SCRATCH: RefCell<Box<[u8]>> = RefCell::new(vec![0; CRYPT_DATA_SIZE].into_boxed_slice());
}

pub fn handles(setting: &str) -> bool {
    PREFIXES.iter().any(|prefix| setting.starts_with(prefix))
}

/// Hashes `phrase` with `setting`, which may be a full reference hash.
pub fn crypt(phrase: &str, setting: &str) -> Result<String, VerifyError> {
    let phrase = CString::new(phrase)
        .map_err(|_| VerifyError::Transient("candidate contains a NUL byte".into()))?;
    let c_setting = CString::new(setting)
        .map_err(|_| VerifyError::Unrecoverable(format!("NUL byte in {setting:?}")))?;

    SCRATCH.with(|scratch| {
        let mut scratch = scratch.borrow_mut();

        // SAFETY: both strings are NUL-terminated and outlive the call, and
        // scratch is CRYPT_DATA_SIZE writable bytes owned by this thread.
        let hashed = unsafe {
            crypt_rn(
                phrase.as_ptr(),
                c_setting.as_ptr(),
                scratch.as_mut_ptr().cast(),
                CRYPT_DATA_SIZE as c_int,
            )
        };

        if hashed.is_null() {
            let err = io::Error::last_os_error();
            return Err(match err.kind() {
                io::ErrorKind::OutOfMemory => VerifyError::Transient(err.to_string()),
                _ => VerifyError::Unrecoverable(format!("libcrypt: {err} in {setting:?}")),
            });
        }

        // SAFETY: on success the result is a NUL-terminated string inside scratch
        let hashed = unsafe { CStr::from_ptr(hashed) };
        hashed
            .to_str()
            .map(str::to_owned)
            .map_err(|e| VerifyError::Unrecoverable(format!("libcrypt returned {e}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTING: &str = "$y$j9T$PaFi5RIRFJvMEF3DX6mbt.";
    const HASH_OF_A: &str = "$y$j9T$PaFi5RIRFJvMEF3DX6mbt.$VOdVkfZT/EVfOXM3BcAE0G.0QJJ0xTDlxXDm5LsKZF2";

    #[test]
    fn yescrypt_reproduces_a_known_hash() {
        assert_eq!(crypt("A", SETTING).unwrap(), HASH_OF_A);
        assert_eq!(crypt("A", HASH_OF_A).unwrap(), HASH_OF_A);
        assert_ne!(crypt("Ab", SETTING).unwrap(), HASH_OF_A);
    }

    #[test]
    fn bad_parameters_are_unrecoverable() {
        let err = crypt("A", "$y$jXX$bad").unwrap_err();
        assert!(!err.is_recoverable(), "{err}");
    }

    #[test]
    fn routes_only_libcrypt_schemes() {
        assert!(handles(SETTING));
        assert!(handles("$gy$j9T$salt"));
        assert!(!handles("$6$rounds=1000$abcd"));
        assert!(!handles("$2b$10$abcdefghijklmnopqrstuu"));
    }

    #[test]
    fn threads_hash_independently() {
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| assert_eq!(crypt("A", SETTING).unwrap(), HASH_OF_A));
            }
        });
    }
}
