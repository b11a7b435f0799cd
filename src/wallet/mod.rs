use rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, ecdsa::Signature};

use crate::error::SignatureError;

/// Generate a new secp256k1 keypair and return (secret key, address).
/// The address is the hex of the compressed public key.
pub fn generate_keypair() -> (SecretKey, String) {
    let secp = Secp256k1::new();
    let (sk, pk) = secp.generate_keypair(&mut OsRng);
    (sk, hex::encode(pk.serialize()))
}

/// Address owned by `sk`.
pub fn address_of(sk: &SecretKey) -> String {
    let secp = Secp256k1::signing_only();
    hex::encode(PublicKey::from_secret_key(&secp, sk).serialize())
}

pub fn secret_key_from_hex(sk_hex: &str) -> Result<SecretKey, SignatureError> {
    let bytes = hex::decode(sk_hex.trim()).map_err(|_| SignatureError::InvalidSecretKey)?;
    SecretKey::from_slice(&bytes).map_err(|_| SignatureError::InvalidSecretKey)
}

/// Normalize an address (hex compressed pubkey). Fails if it is not a valid point.
pub fn pubkey_to_address_hex(pubkey_hex: &str) -> Result<String, SignatureError> {
    Ok(hex::encode(parse_address(pubkey_hex)?.serialize()))
}

/// Sign a 32-byte message hash and return the hex DER signature.
pub fn sign(msg32: [u8; 32], sk: &SecretKey) -> String {
    let secp = Secp256k1::signing_only();
    let sig = secp.sign_ecdsa(&Message::from_digest(msg32), sk);
    hex::encode(&*sig.serialize_der())
}

/// Verify a signature (hex DER) against an address (hex compressed pubkey)
/// and message hash.
pub fn verify_signature_hex(
    address: &str,
    sig_hex: &str,
    msg32: [u8; 32],
) -> Result<bool, SignatureError> {
    let secp = Secp256k1::verification_only();
    let pk = parse_address(address)?;

    let sig_bytes =
        hex::decode(sig_hex).map_err(|_| SignatureError::MalformedSignature("invalid hex"))?;
    let sig = Signature::from_der(&sig_bytes)
        .map_err(|_| SignatureError::MalformedSignature("invalid DER"))?;

    let msg = Message::from_digest(msg32);
    Ok(secp.verify_ecdsa(&msg, &sig, &pk).is_ok())
}

fn parse_address(address: &str) -> Result<PublicKey, SignatureError> {
    let bytes = hex::decode(address).map_err(|_| SignatureError::InvalidPublicKey("invalid hex"))?;
    PublicKey::from_slice(&bytes).map_err(|_| SignatureError::InvalidPublicKey("not a curve point"))
}
