//! Key derivation: PBKDF2 passphrase → KEK

use custodia_core::types::{KdfParams, MIN_KDF_ITERATIONS};
use custodia_core::{CustodiaError, CustodiaResult};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Sha256, Sha512};
use zeroize::Zeroize;

use crate::keys::{Kek, KeyBytes};
use crate::KEY_SIZE;

/// PRF hashes accepted in stored `KdfParams`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prf {
    Sha256,
    Sha512,
}

fn parse_params(params: &KdfParams) -> CustodiaResult<Prf> {
    if !params.algorithm.eq_ignore_ascii_case("PBKDF2") {
        return Err(CustodiaError::UnsupportedAlgorithm(format!(
            "unknown KDF algorithm '{}'",
            params.algorithm
        )));
    }

    let prf = match params.hash.to_ascii_uppercase().as_str() {
        "SHA-256" | "SHA256" => Prf::Sha256,
        "SHA-512" | "SHA512" => Prf::Sha512,
        other => {
            return Err(CustodiaError::UnsupportedAlgorithm(format!(
                "unknown PBKDF2 hash '{other}'"
            )))
        }
    };

    if params.iterations < MIN_KDF_ITERATIONS {
        return Err(CustodiaError::UnsupportedAlgorithm(format!(
            "PBKDF2 iterations {} below minimum {MIN_KDF_ITERATIONS}",
            params.iterations
        )));
    }

    Ok(prf)
}

/// Check that `params` names a KDF this crate can run.
pub fn validate_params(params: &KdfParams) -> CustodiaResult<()> {
    parse_params(params).map(|_| ())
}

/// Generate a random salt of `len` bytes.
pub fn generate_salt(len: usize) -> Vec<u8> {
    let mut salt = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit KEK from a passphrase and salt.
///
/// The salt is stored alongside the wrapped master key (it does not need to
/// be secret). The KEK is never persisted.
pub fn derive_kek(
    passphrase: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> CustodiaResult<Kek> {
    let prf = parse_params(params)?;
    if salt.is_empty() {
        return Err(CustodiaError::UnsupportedAlgorithm("empty KDF salt".into()));
    }

    let password = passphrase.expose_secret().as_bytes();
    let mut key = [0u8; KEY_SIZE];
    match prf {
        Prf::Sha256 => pbkdf2_hmac::<Sha256>(password, salt, params.iterations, &mut key),
        Prf::Sha512 => pbkdf2_hmac::<Sha512>(password, salt, params.iterations, &mut key),
    }

    let kek = Kek::from_bytes(key);
    key.zeroize();

    tracing::trace!(prf = ?prf, iterations = params.iterations, "derived KEK");
    Ok(kek)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            iterations: MIN_KDF_ITERATIONS,
            ..KdfParams::default()
        }
    }

    #[test]
    fn test_kdf_deterministic() {
        let passphrase = SecretString::from("test-passphrase-123");
        let salt = [1u8; 16];
        let params = fast_params();

        let key1 = derive_kek(&passphrase, &salt, &params).unwrap();
        let key2 = derive_kek(&passphrase, &salt, &params).unwrap();

        assert_eq!(key1.as_bytes(), key2.as_bytes(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_passphrases() {
        let salt = [1u8; 16];
        let params = fast_params();

        let key1 = derive_kek(&SecretString::from("passphrase-a"), &salt, &params).unwrap();
        let key2 = derive_kek(&SecretString::from("passphrase-b"), &salt, &params).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different passphrases must produce different keys"
        );
    }

    #[test]
    fn test_kdf_different_salts() {
        let passphrase = SecretString::from("same-passphrase");
        let params = fast_params();

        let key1 = derive_kek(&passphrase, &[1u8; 16], &params).unwrap();
        let key2 = derive_kek(&passphrase, &[2u8; 16], &params).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_hash_changes_output() {
        let passphrase = SecretString::from("same-passphrase");
        let sha512 = KdfParams {
            hash: "SHA-512".into(),
            ..fast_params()
        };

        let key1 = derive_kek(&passphrase, &[1u8; 16], &fast_params()).unwrap();
        let key2 = derive_kek(&passphrase, &[1u8; 16], &sha512).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_matches_reference_primitive() {
        let passphrase = SecretString::from("password");
        let salt = b"saltsaltsaltsalt";
        let params = fast_params();

        let mut expected = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha256>(b"password", salt, MIN_KDF_ITERATIONS, &mut expected);

        let kek = derive_kek(&passphrase, salt, &params).unwrap();
        assert_eq!(kek.as_bytes(), &expected);
    }

    #[test]
    fn test_name_spellings_accepted() {
        let params = KdfParams {
            algorithm: "pbkdf2".into(),
            hash: "sha512".into(),
            ..fast_params()
        };
        assert!(validate_params(&params).is_ok());
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let params = KdfParams {
            algorithm: "scrypt".into(),
            ..fast_params()
        };
        let err = derive_kek(&SecretString::from("x"), &[1u8; 16], &params).unwrap_err();
        assert!(matches!(err, CustodiaError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn test_unknown_hash_rejected() {
        let params = KdfParams {
            hash: "MD5".into(),
            ..fast_params()
        };
        assert!(matches!(
            validate_params(&params),
            Err(CustodiaError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_low_iterations_rejected() {
        let params = KdfParams {
            iterations: 1000,
            ..fast_params()
        };
        assert!(matches!(
            validate_params(&params),
            Err(CustodiaError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_salt_generation() {
        let s1 = generate_salt(16);
        let s2 = generate_salt(16);
        assert_eq!(s1.len(), 16);
        assert_ne!(s1, s2);
    }
}
