use rand::Rng;
use subtle::ConstantTimeEq;

/// Character set for opaque token generation (URL-safe base64 characters)
const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Default length for generated tokens (256 bits of entropy)
pub const DEFAULT_TOKEN_LENGTH: usize = 43;

/// Generate an opaque random value usable as an authorization code, access
/// token or refresh token.
pub fn generate_token() -> String {
    generate_token_with_length(DEFAULT_TOKEN_LENGTH)
}

/// Generate an opaque random value of the given length.
pub fn generate_token_with_length(length: usize) -> String {
    let mut rng = rand::thread_rng();

    (0..length)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_CHARSET.len());
            TOKEN_CHARSET[idx] as char
        })
        .collect()
}

/// Compare a supplied secret against the registered one in constant time.
pub fn secrets_match(supplied: &str, registered: &str) -> bool {
    supplied.as_bytes().ct_eq(registered.as_bytes()).into()
}
