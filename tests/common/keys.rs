//! Ed25519 keypair generation for identity/rotation integration tests.

use ed25519_dalek::pkcs8::{EncodePublicKey, LineEnding};
use ed25519_dalek::{Signer, SigningKey};

pub struct TestKeypair {
    pub signing_key:    SigningKey,
    pub public_key_pem: String,
}

pub fn generate_keypair() -> TestKeypair {
    let seed: [u8; 32] = ethers::core::rand::random();
    let signing_key = SigningKey::from_bytes(&seed);
    let public_key_pem = signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("encode public key as PEM");

    TestKeypair {
        signing_key,
        public_key_pem,
    }
}

impl TestKeypair {
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}
