//! Host RSA keys for device authentication.
//!
//! adbd challenges the host with a 20-byte token. The host answers with a
//! PKCS#1 v1.5 signature whose DigestInfo names SHA-1 but whose "digest" is
//! the raw token (adbd never hashes the token itself). Unknown hosts offer
//! their public key in Android's legacy mincrypt layout so the device can
//! prompt the user.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

/// Length of the challenge adbd sends in `AUTH(TOKEN)`.
pub const TOKEN_LEN: usize = 20;

/// A private host key plus the label advertised alongside its public half.
///
/// The engine never persists keys; they come from whatever key provider the
/// application uses (`~/.android/adbkey` loaded with
/// [`AdbKey::from_pkcs8_pem`], a hardware token, a freshly generated key, ...).
#[derive(Clone)]
pub struct AdbKey {
    private: RsaPrivateKey,
}

impl core::fmt::Debug for AdbKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "AdbKey({} bits)", self.private.n().bits())
    }
}

impl AdbKey {
    pub fn new(private: RsaPrivateKey) -> Self {
        Self { private }
    }

    /// Load a PKCS#8 PEM private key, the format adb's own host keys use.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, rsa::pkcs8::Error> {
        RsaPrivateKey::from_pkcs8_pem(pem).map(Self::new)
    }

    /// The public half, mainly useful for pre-authorizing this key on a peer.
    pub fn public_key(&self) -> RsaPublicKey {
        self.private.to_public_key()
    }

    /// Sign an auth token.
    ///
    /// Deterministic: PKCS#1 v1.5 with the SHA-1 DigestInfo prefix over the
    /// raw token. The padding layer enforces that `token` is exactly
    /// [`TOKEN_LEN`] bytes.
    pub fn sign_token(&self, token: &[u8]) -> rsa::Result<Vec<u8>> {
        self.private.sign(Pkcs1v15Sign::new::<Sha1>(), token)
    }

    /// The `AUTH(RSAPUBLICKEY)` payload: the mincrypt-encoded public key,
    /// base64, a space, `label` (conventionally `user@host`), and a NUL.
    pub fn public_key_payload(&self, label: &str) -> Bytes {
        let mut text = BASE64.encode(self.mincrypt_blob());
        text.push(' ');
        text.push_str(label);
        text.push('\0');
        Bytes::from(text.into_bytes())
    }

    /// Android's legacy mincrypt `RSAPublicKey` layout, all little-endian
    /// u32 words: word count, `-n^-1 mod 2^32`, modulus, `R^2 mod n` with
    /// `R = 2^(32*words)`, public exponent.
    fn mincrypt_blob(&self) -> Vec<u8> {
        let n = self.private.n();
        let words = n.bits().div_ceil(32);

        let n0 = low_word(n);
        // Inverse of the low modulus word mod 2^32 by Newton iteration. The
        // modulus is odd, so n0*n0 = 1 (mod 8) seeds three correct bits and
        // each step doubles them.
        let mut inv = n0;
        for _ in 0..5 {
            inv = inv.wrapping_mul(2u32.wrapping_sub(n0.wrapping_mul(inv)));
        }
        let n0inv = inv.wrapping_neg();

        let rr = (BigUint::from(1u8) << (words * 64)) % n;

        let mut blob = Vec::with_capacity(8 + words * 8 + 4);
        blob.extend_from_slice(&(words as u32).to_le_bytes());
        blob.extend_from_slice(&n0inv.to_le_bytes());
        blob.extend_from_slice(&le_words(n, words));
        blob.extend_from_slice(&le_words(&rr, words));
        blob.extend_from_slice(&low_word(self.private.e()).to_le_bytes());
        blob
    }
}

fn low_word(x: &BigUint) -> u32 {
    let bytes = x.to_bytes_le();
    let take = bytes.len().min(4);
    let mut word = [0u8; 4];
    word[..take].copy_from_slice(&bytes[..take]);
    u32::from_le_bytes(word)
}

fn le_words(x: &BigUint, words: usize) -> Vec<u8> {
    let mut bytes = x.to_bytes_le();
    bytes.resize(words * 4, 0);
    bytes
}
