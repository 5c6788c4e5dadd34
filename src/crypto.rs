//! RSA sign/verify/encrypt/decrypt façade.
//!
//! The pinned private key is loaded once at startup (a missing or malformed
//! key file is the one documented fatal bring-up error) and cached here;
//! every other component reaches the key material only through this module.
//! Errors are categorical — they never leak key bytes into a log line or an
//! error message.

use base64::Engine as _;
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePublicKey;
use sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use rsa::pss::{Signature, SigningKey, VerifyingKey};

use crate::error::CryptoError;

const B64: base64::engine::general_purpose::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Holds the device's pinned private key and performs every cryptographic
/// operation the provisioning protocol needs.
pub struct Signer {
    private_key: RsaPrivateKey,
}

impl Signer {
    /// Load the PEM-encoded PKCS#1 private key from disk. This is the one
    /// fatal bring-up condition documented for this crate: callers should
    /// treat a missing or malformed key file as reason to abort startup.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self, CryptoError> {
        let pem = std::fs::read_to_string(path).map_err(|_| CryptoError::KeyFileMissing)?;
        let private_key =
            RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|_| CryptoError::MalformedKey)?;
        Ok(Self { private_key })
    }

    /// Sign `plaintext` with SHA-256/PSS, returning the base64-encoded
    /// signature.
    pub fn sign(&self, plaintext: &str) -> Result<String, CryptoError> {
        let signing_key: SigningKey<Sha256> = SigningKey::new(self.private_key.clone());
        let signature = signing_key
            .try_sign_with_rng(&mut OsRng, plaintext.as_bytes())
            .map_err(|_| CryptoError::VerificationFailed)?;
        Ok(B64.encode(signature.to_bytes()))
    }

    /// Decrypt a base64-OAEP-SHA256 ciphertext with the pinned private key.
    pub fn decrypt(&self, base64_ciphertext: &str) -> Result<String, CryptoError> {
        let ciphertext = B64
            .decode(base64_ciphertext)
            .map_err(|_| CryptoError::InvalidBase64)?;
        let padding = Oaep::new::<Sha256>();
        let plaintext = self
            .private_key
            .decrypt(padding, &ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
    }
}

/// Verify `plaintext` against a base64 signature using a peer's PEM public
/// key. Stateless — doesn't require a `Signer`.
pub fn verify(plaintext: &str, base64_signature: &str, public_key_pem: &str) -> Result<bool, CryptoError> {
    let signature_bytes = B64
        .decode(base64_signature)
        .map_err(|_| CryptoError::InvalidBase64)?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| CryptoError::VerificationFailed)?;
    let public_key =
        RsaPublicKey::from_public_key_pem(public_key_pem).map_err(|_| CryptoError::MalformedKey)?;
    let verifying_key: VerifyingKey<Sha256> = VerifyingKey::new(public_key);
    Ok(verifying_key.verify(plaintext.as_bytes(), &signature).is_ok())
}

/// Encrypt `plaintext` with a peer's PEM public key using OAEP-SHA256,
/// returning base64 ciphertext.
pub fn encrypt(plaintext: &str, public_key_pem: &str) -> Result<String, CryptoError> {
    let public_key =
        RsaPublicKey::from_public_key_pem(public_key_pem).map_err(|_| CryptoError::MalformedKey)?;
    let padding = Oaep::new::<Sha256>();
    let ciphertext = public_key
        .encrypt(&mut OsRng, padding, plaintext.as_bytes())
        .map_err(|_| CryptoError::DecryptFailed)?;
    Ok(B64.encode(ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPrivateKey;
    use rsa::pkcs8::EncodePublicKey;

    fn make_test_signer() -> (Signer, String) {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("keygen");
        let public_key = RsaPublicKey::from(&private_key);
        let public_pem = public_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap();
        let private_pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .unwrap()
            .to_string();
        let path = std::env::temp_dir().join(format!("crypto_test_key_{}.pem", std::process::id()));
        std::fs::write(&path, private_pem).unwrap();
        let signer = Signer::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        (signer, public_pem)
    }

    #[test]
    fn sign_verify_roundtrip_holds_for_nonempty_strings() {
        let (signer, public_pem) = make_test_signer();
        for payload in ["SUCCESS", "EDGE-00AB-CD12", "a", "line one\nline two"] {
            let sig = signer.sign(payload).unwrap();
            assert!(verify(payload, &sig, &public_pem).unwrap());
        }
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let (signer, public_pem) = make_test_signer();
        let sig = signer.sign("original").unwrap();
        assert!(!verify("tampered", &sig, &public_pem).unwrap());
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (signer, public_pem) = make_test_signer();
        let ciphertext = encrypt("{\"SSID\":\"HomeNet\"}", &public_pem).unwrap();
        let plaintext = signer.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, "{\"SSID\":\"HomeNet\"}");
    }

    #[test]
    fn decrypt_rejects_malformed_base64() {
        let (signer, _) = make_test_signer();
        assert_eq!(signer.decrypt("not-valid-base64!!"), Err(CryptoError::InvalidBase64));
    }

    #[test]
    fn missing_key_file_is_categorical() {
        let result = Signer::load_from_file("/nonexistent/path/key.pem");
        assert_eq!(result.unwrap_err(), CryptoError::KeyFileMissing);
    }
}
