//! Request authentication for the bundle service.
//!
//! The service authenticates the uploader by an Ethereum-style signature: the
//! canonical request text is keccak256-hashed, wrapped in the EIP-191 signed
//! message envelope, and signed with the operator's secp256k1 key. The
//! 65-byte `r || s || v` signature travels hex-encoded in the
//! `Authorization` header.

use crate::Error;
use alloy_primitives::{keccak256, Address};
use libsecp256k1::{sign, Message, PublicKey, SecretKey};

const EIP191_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

pub struct RequestSigner {
    secret_key: SecretKey,
    address: Address,
}

impl RequestSigner {
    /// `private_key` is the raw 32-byte secp256k1 scalar.
    pub fn new(private_key: &[u8]) -> Result<Self, Error> {
        let bytes: [u8; 32] = private_key
            .try_into()
            .map_err(|_| Error::Signing(format!("key length {} != 32", private_key.len())))?;
        let secret_key =
            SecretKey::parse(&bytes).map_err(|e| Error::Signing(e.to_string()))?;
        let public_key = PublicKey::from_secret_key(&secret_key);
        // Uncompressed SEC1 encoding; the leading 0x04 tag is not hashed.
        let encoded = public_key.serialize();
        let hash = keccak256(&encoded[1..]);
        let address = Address::from_slice(&hash[12..]);
        Ok(Self {
            secret_key,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Signs the canonical request text, returning the hex `Authorization`
    /// header value.
    pub fn sign_request(&self, canonical_request: &str) -> Result<String, Error> {
        let request_hash = keccak256(canonical_request.as_bytes());
        let mut preimage = Vec::with_capacity(EIP191_PREFIX.len() + 32);
        preimage.extend_from_slice(EIP191_PREFIX);
        preimage.extend_from_slice(request_hash.as_slice());
        let digest = keccak256(&preimage);

        let message = Message::parse_slice(digest.as_slice())
            .map_err(|e| Error::Signing(e.to_string()))?;
        let (signature, recovery_id) = sign(&message, &self.secret_key);

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.serialize());
        out[64] = recovery_id.serialize();
        Ok(hex::encode(out))
    }
}

/// Canonical request text: method, path, then the `X-Bundle-*` headers in
/// lexical order as `name:value` lines, newline-joined. The header subset is
/// fixed so that multipart boundaries never enter the signed text.
pub fn canonical_request(method: &str, path: &str, headers: &[(String, String)]) -> String {
    let mut signed: Vec<&(String, String)> = headers
        .iter()
        .filter(|(name, _)| name.starts_with("X-Bundle-"))
        .collect();
    signed.sort_by(|a, b| a.0.cmp(&b.0));
    let mut lines = vec![method.to_string(), path.to_string()];
    lines.extend(signed.iter().map(|(name, value)| format!("{name}:{value}")));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: [u8; 32] = [
        0x4c, 0x08, 0x83, 0xa6, 0x91, 0x02, 0xdb, 0xbd, 0x1e, 0x35, 0x1a, 0x83, 0x2c, 0x92, 0xf2,
        0x5f, 0x5e, 0x8d, 0x3e, 0x6e, 0x29, 0x70, 0xb4, 0x11, 0x7c, 0x5c, 0x09, 0x53, 0x6b, 0x17,
        0xc6, 0x5a,
    ];

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            RequestSigner::new(&[0u8; 31]),
            Err(Error::Signing(_))
        ));
    }

    #[test]
    fn signature_is_deterministic_65_bytes() {
        let signer = RequestSigner::new(&TEST_KEY).unwrap();
        let canonical = canonical_request(
            "POST",
            "/v1/createBundle",
            &[
                ("X-Bundle-Name".to_string(), "blobs_s1_e2".to_string()),
                ("X-Bundle-Bucket-Name".to_string(), "bucket".to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
        );
        let sig1 = signer.sign_request(&canonical).unwrap();
        let sig2 = signer.sign_request(&canonical).unwrap();
        assert_eq!(sig1, sig2);
        assert_eq!(hex::decode(&sig1).unwrap().len(), 65);
    }

    #[test]
    fn canonical_request_sorts_and_filters_headers() {
        let canonical = canonical_request(
            "POST",
            "/v1/uploadBundle",
            &[
                ("X-Bundle-Name".to_string(), "b".to_string()),
                ("Content-Type".to_string(), "multipart/form-data".to_string()),
                ("X-Bundle-Bucket-Name".to_string(), "a".to_string()),
            ],
        );
        assert_eq!(
            canonical,
            "POST\n/v1/uploadBundle\nX-Bundle-Bucket-Name:a\nX-Bundle-Name:b"
        );
    }

    #[test]
    fn derives_a_checksummed_address() {
        let signer = RequestSigner::new(&TEST_KEY).unwrap();
        assert_ne!(signer.address(), Address::ZERO);
    }
}
