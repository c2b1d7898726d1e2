use anyhow::Context as _;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead as _, KeyInit as _, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use dashproxy_model::SecretSpec;
use rand_core::{OsRng, TryRngCore as _};
use sha2::Digest as _;
use zeroize::{Zeroize as _, Zeroizing};

const PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 24;

/// Encryption of the secret-bearing fields of a [`SecretSpec`], in place.
pub trait Crypto: Send + Sync {
    fn encrypt(&self, spec: &mut SecretSpec) -> anyhow::Result<()>;
    fn decrypt(&self, spec: &mut SecretSpec) -> anyhow::Result<()>;
}

/// XChaCha20-Poly1305 over `password`, `credentials` and the TLS `key`.
///
/// Each field becomes `enc:v1:<base64(nonce || ciphertext)>`, with the field name bound as
/// associated data so ciphertexts cannot be swapped between fields.
pub struct SecretsCipher {
    cipher: XChaCha20Poly1305,
}

impl SecretsCipher {
    /// Derive the key as SHA-256 of arbitrary key material.
    pub fn new(material: &[u8]) -> Self {
        let mut key = sha2::Sha256::digest(material);
        let cipher = XChaCha20Poly1305::new(&key);
        key.as_mut_slice().zeroize();
        Self { cipher }
    }

    /// A random key that only lives as long as the process.
    pub fn ephemeral() -> anyhow::Result<Self> {
        let mut material = Zeroizing::new([0u8; 32]);
        let mut rng = OsRng;
        rng.try_fill_bytes(&mut *material)
            .map_err(|e| anyhow::anyhow!("generate secret key: {e:?}"))?;
        Ok(Self::new(&*material))
    }

    fn seal(&self, field: &'static str, plaintext: &str) -> anyhow::Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = OsRng;
        rng.try_fill_bytes(&mut nonce)
            .map_err(|e| anyhow::anyhow!("generate secret nonce: {e:?}"))?;
        let ciphertext = self
            .cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: field.as_bytes(),
                },
            )
            .map_err(|_| anyhow::anyhow!("encrypt {field}"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(format!("{PREFIX}{}", STANDARD.encode(blob)))
    }

    fn open(&self, field: &'static str, sealed: &str) -> anyhow::Result<String> {
        let encoded = sealed
            .strip_prefix(PREFIX)
            .with_context(|| format!("{field} is not encrypted"))?;
        let blob = STANDARD
            .decode(encoded)
            .with_context(|| format!("decode {field}"))?;
        if blob.len() < NONCE_LEN {
            anyhow::bail!("{field} ciphertext is truncated");
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = Zeroizing::new(
            self.cipher
                .decrypt(
                    XNonce::from_slice(nonce),
                    Payload {
                        msg: ciphertext,
                        aad: field.as_bytes(),
                    },
                )
                .map_err(|_| anyhow::anyhow!("decrypt {field}"))?,
        );
        String::from_utf8(plaintext.to_vec()).with_context(|| format!("{field} is not UTF-8"))
    }
}

fn apply(
    spec: &mut SecretSpec,
    mut f: impl FnMut(&'static str, &str) -> anyhow::Result<String>,
) -> anyhow::Result<()> {
    let mut replace = |field: &'static str, slot: &mut String| -> anyhow::Result<()> {
        let next = f(field, slot.as_str())?;
        slot.zeroize();
        *slot = next;
        Ok(())
    };
    if let Some(password) = spec.basic_auth.as_mut().and_then(|b| b.password.as_mut()) {
        replace("password", password)?;
    }
    if let Some(credentials) = spec
        .authorization
        .as_mut()
        .and_then(|a| a.credentials.as_mut())
    {
        replace("credentials", credentials)?;
    }
    if let Some(key) = spec.tls_config.as_mut().and_then(|t| t.key.as_mut()) {
        replace("key", key)?;
    }
    Ok(())
}

impl Crypto for SecretsCipher {
    fn encrypt(&self, spec: &mut SecretSpec) -> anyhow::Result<()> {
        apply(spec, |field, value| self.seal(field, value))
    }

    fn decrypt(&self, spec: &mut SecretSpec) -> anyhow::Result<()> {
        apply(spec, |field, value| self.open(field, value))
    }
}

#[cfg(test)]
mod tests {
    use super::{Crypto as _, SecretsCipher};
    use dashproxy_model::{Authorization, BasicAuth, SecretSpec, TlsConfig};

    fn spec() -> SecretSpec {
        SecretSpec {
            basic_auth: Some(BasicAuth {
                username: "admin".to_string(),
                password: Some("hunter2".to_string()),
                password_file: None,
            }),
            authorization: Some(Authorization {
                credentials: Some("token".to_string()),
                ..Authorization::default()
            }),
            tls_config: Some(TlsConfig {
                key: Some("KEY".to_string()),
                ..TlsConfig::default()
            }),
        }
    }

    #[test]
    fn encrypt_then_decrypt_restores_fields() -> anyhow::Result<()> {
        let cipher = SecretsCipher::new(b"material");
        let mut s = spec();
        cipher.encrypt(&mut s)?;

        let password = s
            .basic_auth
            .as_ref()
            .and_then(|b| b.password.clone())
            .unwrap_or_default();
        assert!(password.starts_with("enc:v1:"));
        assert_eq!(s.basic_auth.as_ref().map(|b| b.username.as_str()), Some("admin"));

        cipher.decrypt(&mut s)?;
        assert_eq!(s, spec());
        Ok(())
    }

    #[test]
    fn wrong_key_fails() -> anyhow::Result<()> {
        let mut s = spec();
        SecretsCipher::new(b"one").encrypt(&mut s)?;
        assert!(SecretsCipher::new(b"two").decrypt(&mut s).is_err());
        Ok(())
    }

    #[test]
    fn plaintext_field_is_rejected_on_decrypt() {
        let mut s = spec();
        let err = SecretsCipher::new(b"k")
            .decrypt(&mut s)
            .expect_err("plaintext must not decrypt");
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn nonces_differ_between_encryptions() -> anyhow::Result<()> {
        let cipher = SecretsCipher::ephemeral()?;
        let mut a = spec();
        let mut b = spec();
        cipher.encrypt(&mut a)?;
        cipher.encrypt(&mut b)?;
        assert_ne!(a, b);
        Ok(())
    }
}
