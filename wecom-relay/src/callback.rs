//! Callback URL handshake.
//!
//! When a callback URL is registered the vendor sends a `GET` carrying an
//! encrypted `echostr`. The relay proves it holds the callback token and AES
//! key by checking the signature and answering with the decrypted string.
//!
//! Ciphertext layout, after base64 decoding and AES-256-CBC decryption with
//! the IV taken from the first 16 key bytes:
//!
//! ```text
//! random(16) | msg_len (u32, big endian) | msg | receive_id | pkcs7 padding (block 32)
//! ```

use aes::Aes256;
use base64::Engine;
use base64::alphabet;
use base64::engine::{GeneralPurpose, GeneralPurposeConfig};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use secrecy::{ExposeSecret, SecretString};
use sha1::{Digest, Sha1};
use url::form_urlencoded;

type Aes256CbcDec = cbc::Decryptor<Aes256>;

const AES_KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const RANDOM_PREFIX_LEN: usize = 16;
const PAD_BLOCK_SIZE: usize = 32;

// Vendor keys are 43 random base64 characters; their last character may
// carry non-zero trailing bits.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CallbackError {
    #[error("signature not equal")]
    ValidateSignature,
    #[error("illegal aes key")]
    IllegalAesKey,
    #[error("base64 decode failed")]
    DecodeBase64,
    #[error("aes decrypt failed")]
    DecryptAes,
    #[error("illegal buffer")]
    IllegalBuffer,
    #[error("receive id does not match the corp id")]
    ValidateCorpId,
}

/// Query of the handshake request.
#[derive(Debug, Default, PartialEq)]
pub struct VerifyParams {
    pub msg_signature: String,
    pub timestamp: String,
    pub nonce: String,
    pub echostr: String,
}

impl VerifyParams {
    /// Missing keys stay empty. A repeated key keeps its first value.
    pub fn from_query(query: &str) -> VerifyParams {
        let mut params = VerifyParams::default();
        let mut seen = [false; 4];
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let (index, slot) = match key.as_ref() {
                "msg_signature" => (0, &mut params.msg_signature),
                "timestamp" => (1, &mut params.timestamp),
                "nonce" => (2, &mut params.nonce),
                "echostr" => (3, &mut params.echostr),
                _ => continue,
            };
            if !seen[index] {
                seen[index] = true;
                *slot = value.into_owned();
            }
        }
        params
    }
}

#[derive(Clone)]
pub struct CallbackVerifier {
    token: SecretString,
    aes_key: SecretString,
    corp_id: String,
}

impl CallbackVerifier {
    pub fn new(token: SecretString, aes_key: SecretString, corp_id: String) -> Self {
        CallbackVerifier {
            token,
            aes_key,
            corp_id,
        }
    }

    /// Returns the decrypted echo string.
    pub fn verify_url(&self, params: &VerifyParams) -> Result<Vec<u8>, CallbackError> {
        let expected = signature(
            self.token.expose_secret(),
            &params.timestamp,
            &params.nonce,
            &params.echostr,
        );
        if !constant_time_eq(&expected, &params.msg_signature) {
            return Err(CallbackError::ValidateSignature);
        }

        let key = self.key()?;
        let ciphertext = LENIENT_BASE64
            .decode(params.echostr.as_bytes())
            .map_err(|_| CallbackError::DecodeBase64)?;
        let plaintext = decrypt(&key, ciphertext)?;
        let (message, receive_id) = split_plaintext(&plaintext)?;

        if receive_id != self.corp_id.as_bytes() {
            return Err(CallbackError::ValidateCorpId);
        }
        Ok(message.to_vec())
    }

    fn key(&self) -> Result<Vec<u8>, CallbackError> {
        let encoded = format!("{}=", self.aes_key.expose_secret());
        let key = LENIENT_BASE64
            .decode(encoded.as_bytes())
            .map_err(|_| CallbackError::IllegalAesKey)?;
        if key.len() != AES_KEY_LEN {
            return Err(CallbackError::IllegalAesKey);
        }
        Ok(key)
    }
}

/// Lowercase hex SHA-1 over the lexicographically sorted parts.
pub fn signature(token: &str, timestamp: &str, nonce: &str, data: &str) -> String {
    let mut parts = [token, timestamp, nonce, data];
    parts.sort_unstable();

    let digest = Sha1::digest(parts.concat().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn decrypt(key: &[u8], mut ciphertext: Vec<u8>) -> Result<Vec<u8>, CallbackError> {
    let decryptor = Aes256CbcDec::new_from_slices(key, &key[..IV_LEN])
        .map_err(|_| CallbackError::IllegalAesKey)?;
    let plaintext = decryptor
        .decrypt_padded_mut::<NoPadding>(&mut ciphertext)
        .map_err(|_| CallbackError::DecryptAes)?;

    // PKCS#7 with the vendor's 32-byte block size
    let pad = match plaintext.last() {
        Some(&pad) if (1..=PAD_BLOCK_SIZE).contains(&(pad as usize)) => pad as usize,
        _ => return Err(CallbackError::DecryptAes),
    };
    if pad > plaintext.len() {
        return Err(CallbackError::DecryptAes);
    }
    Ok(plaintext[..plaintext.len() - pad].to_vec())
}

fn split_plaintext(plaintext: &[u8]) -> Result<(&[u8], &[u8]), CallbackError> {
    let body = plaintext
        .get(RANDOM_PREFIX_LEN..)
        .ok_or(CallbackError::IllegalBuffer)?;
    let (len, rest) = body.split_at_checked(4).ok_or(CallbackError::IllegalBuffer)?;
    let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
    rest.split_at_checked(len).ok_or(CallbackError::IllegalBuffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;

    // 43 characters, as issued by the vendor console
    const AES_KEY: &str = "jWmYm7qr5nMoAUwZRjGtBxmz3KA1tkAj3ykkR6q2B2C";
    const TOKEN: &str = "QDG6eK";
    const CORP_ID: &str = "wx5823bf96d3bd56c7";

    fn verifier() -> CallbackVerifier {
        CallbackVerifier::new(
            SecretString::new(TOKEN.into()),
            SecretString::new(AES_KEY.into()),
            CORP_ID.into(),
        )
    }

    fn encrypt(message: &str, receive_id: &str) -> String {
        let key = LENIENT_BASE64.decode(format!("{AES_KEY}=")).unwrap();

        let mut plain = vec![b'r'; RANDOM_PREFIX_LEN];
        plain.extend_from_slice(&(message.len() as u32).to_be_bytes());
        plain.extend_from_slice(message.as_bytes());
        plain.extend_from_slice(receive_id.as_bytes());
        let pad = PAD_BLOCK_SIZE - plain.len() % PAD_BLOCK_SIZE;
        plain.extend(std::iter::repeat_n(pad as u8, pad));

        let len = plain.len();
        let encryptor = cbc::Encryptor::<Aes256>::new_from_slices(&key, &key[..IV_LEN]).unwrap();
        let ciphertext = encryptor
            .encrypt_padded_mut::<NoPadding>(&mut plain, len)
            .unwrap();
        LENIENT_BASE64.encode(ciphertext)
    }

    fn params(echostr: String) -> VerifyParams {
        VerifyParams {
            msg_signature: signature(TOKEN, "1409659589", "263014780", &echostr),
            timestamp: "1409659589".into(),
            nonce: "263014780".into(),
            echostr,
        }
    }

    #[test]
    fn test_signature_sorts_parts() {
        let a = signature("b", "a", "d", "c");
        let b = signature("a", "b", "c", "d");
        assert_eq!(a, b);
        // sha1("abcd")
        assert_eq!(a, "81fe8bfe87576c3ecb22426f8e57847382917acf");
    }

    #[test]
    fn test_verify_round_trip() {
        let echostr = encrypt("1616140317555161061", CORP_ID);
        let echo = verifier().verify_url(&params(echostr)).unwrap();
        assert_eq!(echo, b"1616140317555161061");
    }

    #[test]
    fn test_bad_signature() {
        let mut params = params(encrypt("hello", CORP_ID));
        params.msg_signature = "0000".into();
        assert_eq!(
            verifier().verify_url(&params).unwrap_err(),
            CallbackError::ValidateSignature
        );
    }

    #[test]
    fn test_wrong_receive_id() {
        let params = params(encrypt("hello", "ww-someone-else"));
        assert_eq!(
            verifier().verify_url(&params).unwrap_err(),
            CallbackError::ValidateCorpId
        );
    }

    #[test]
    fn test_malformed_inputs() {
        let params_bad_b64 = params("***".into());
        assert_eq!(
            verifier().verify_url(&params_bad_b64).unwrap_err(),
            CallbackError::DecodeBase64
        );

        // Not a whole number of AES blocks
        let short = params(LENIENT_BASE64.encode([1u8; 20]));
        assert_eq!(
            verifier().verify_url(&short).unwrap_err(),
            CallbackError::DecryptAes
        );

        let bad_key = CallbackVerifier::new(
            SecretString::new(TOKEN.into()),
            SecretString::new("short".into()),
            CORP_ID.into(),
        );
        let params = params(encrypt("hello", CORP_ID));
        assert_eq!(
            bad_key.verify_url(&params).unwrap_err(),
            CallbackError::IllegalAesKey
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("", "a"));
    }

    #[test]
    fn test_params_from_query() {
        let params = VerifyParams::from_query(
            "msg_signature=s1&timestamp=1&nonce=n&echostr=a%2Bb%3D&msg_signature=s2&extra=x",
        );
        assert_eq!(
            params,
            VerifyParams {
                msg_signature: "s1".into(),
                timestamp: "1".into(),
                nonce: "n".into(),
                echostr: "a+b=".into(),
            }
        );
        assert_eq!(VerifyParams::from_query(""), VerifyParams::default());
    }
}
