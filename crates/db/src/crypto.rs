//! Password-to-key derivation and the key-tag sidecar binding a page file to
//! the key that first opened it.

use std::fs;
use std::path::Path;

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::{DbError, DbResult};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const KEY_LEN: usize = 32;
const PBKDF2_ITERATIONS: u32 = 10_000;
const DERIVATION_SALT: &[u8] = b"AshPileSalt";
// Fixed input MACed under the derived key to produce the key-tag.
const KEY_TAG_SALT: &[u8] = b"blazedb-key-tag";

pub type DerivedKey = [u8; KEY_LEN];

/// Derives a 256-bit key from a password with PBKDF2-HMAC-SHA256.
pub fn derive_key(password: &str) -> DbResult<DerivedKey> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DbError::PasswordTooWeak {
            min: MIN_PASSWORD_LEN,
        });
    }
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        DERIVATION_SALT,
        PBKDF2_ITERATIONS,
        &mut key,
    );
    Ok(key)
}

fn key_tag(key: &DerivedKey) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(KEY_TAG_SALT);
    hex::encode(mac.finalize().into_bytes())
}

/// Creates the key-tag sidecar on first open, or verifies it on later opens.
/// A mismatch means the file is bound to a different key.
pub fn verify_or_create_key_tag(path: &Path, key: &DerivedKey) -> DbResult<()> {
    let expected = key_tag(key);
    if path.exists() {
        let stored = fs::read_to_string(path)?;
        if stored.trim() != expected {
            return Err(DbError::KeyMismatch);
        }
        return Ok(());
    }
    fs::write(path, &expected)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct TestContext {
        path: PathBuf,
    }

    impl TestContext {
        fn new(test_name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "blazedb_keytag_{}_{}",
                test_name,
                std::process::id()
            ));
            let _ = fs::remove_file(&path);
            Self { path }
        }
    }

    impl Drop for TestContext {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(matches!(
            derive_key("123"),
            Err(DbError::PasswordTooWeak { .. })
        ));
        assert!(matches!(
            derive_key("1234567"),
            Err(DbError::PasswordTooWeak { .. })
        ));
        assert!(derive_key("12345678").is_ok());
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_key("correct horse").unwrap();
        let b = derive_key("correct horse").unwrap();
        let c = derive_key("correct horsf").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn key_tag_created_then_verified() {
        let ctx = TestContext::new("verify");
        let key = derive_key("password1").unwrap();
        verify_or_create_key_tag(&ctx.path, &key).unwrap();
        assert!(ctx.path.exists());
        verify_or_create_key_tag(&ctx.path, &key).unwrap();

        let other = derive_key("password2").unwrap();
        assert!(matches!(
            verify_or_create_key_tag(&ctx.path, &other),
            Err(DbError::KeyMismatch)
        ));
    }
}
