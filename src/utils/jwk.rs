//! JSON Web Key serialization for the provider's signing key.
//!
//! Only the public half of the signing key is ever exposed; the JWKS
//! document is what relying parties fetch to validate ID Token signatures.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};

/// JWK (JSON Web Key) representation of a public signing key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKey {
    /// Key type (always "RSA" here)
    pub kty: String,
    /// Public key use (always "sig" for signature)
    #[serde(rename = "use")]
    pub key_use: String,
    /// Key ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Intended algorithm
    pub alg: String,
    /// RSA modulus (base64url encoded)
    pub n: String,
    /// RSA exponent (base64url encoded)
    pub e: String,
}

/// JWKS (JSON Web Key Set) container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    /// Array of public keys
    pub keys: Vec<JsonWebKey>,
}

/// Derive the public JWK from an RSA private key in PEM format.
///
/// Accepts both PKCS#8 (`BEGIN PRIVATE KEY`) and PKCS#1
/// (`BEGIN RSA PRIVATE KEY`) encodings.
pub fn rsa_public_jwk(
    private_key_pem: &str,
    alg: &str,
    kid: Option<&str>,
) -> anyhow::Result<JsonWebKey> {
    let private_key = if private_key_pem.contains("BEGIN RSA PRIVATE KEY") {
        RsaPrivateKey::from_pkcs1_pem(private_key_pem)?
    } else {
        RsaPrivateKey::from_pkcs8_pem(private_key_pem)?
    };
    let public_key = RsaPublicKey::from(&private_key);

    Ok(JsonWebKey {
        kty: "RSA".to_owned(),
        key_use: "sig".to_owned(),
        kid: kid.map(str::to_owned),
        alg: alg.to_owned(),
        n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
    })
}
