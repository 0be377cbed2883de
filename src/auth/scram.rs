//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677) as spoken by PostgreSQL 10+.
//!
//! PostgreSQL takes the user name from the startup packet, so the SCRAM
//! `n=` attribute is sent empty, exactly like libpq does. Channel binding is
//! not offered (`n,,` GS2 header).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// GS2 header without channel binding
const GS2_HEADER: &str = "n,,";

/// SCRAM exchange failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScramError {
    /// Server signature did not verify
    #[error("invalid server proof: {0}")]
    InvalidServerProof(String),
    /// Malformed server message
    #[error("invalid server message: {0}")]
    InvalidServerMessage(String),
    /// Base64 decoding error
    #[error("Base64 error: {0}")]
    Base64Error(String),
}

/// Values kept between the client-final and server-final steps
#[derive(Clone, Debug)]
pub struct ScramState {
    auth_message: Vec<u8>,
    server_key: [u8; 32],
}

/// SCRAM-SHA-256 client
pub struct ScramClient {
    password: String,
    nonce: String,
}

impl ScramClient {
    /// Create a client with a fresh random nonce
    pub fn new(password: impl Into<String>) -> Self {
        let mut rng = rand::thread_rng();
        let nonce_bytes: [u8; 18] = rng.gen();
        Self::with_nonce(password, BASE64.encode(nonce_bytes))
    }

    fn with_nonce(password: impl Into<String>, nonce: String) -> Self {
        Self {
            password: password.into(),
            nonce,
        }
    }

    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    /// Client first message
    pub fn client_first(&self) -> String {
        format!("{}{}", GS2_HEADER, self.client_first_bare())
    }

    /// Consume the server first message and produce the client final message.
    pub fn client_final(&self, server_first: &str) -> Result<(String, ScramState), ScramError> {
        let first = ServerFirst::parse(server_first)?;

        if !first.nonce.starts_with(&self.nonce) || first.nonce.len() == self.nonce.len() {
            return Err(ScramError::InvalidServerMessage(
                "server nonce does not extend the client nonce".to_string(),
            ));
        }

        let salt = BASE64
            .decode(&first.salt)
            .map_err(|_| ScramError::Base64Error("invalid salt encoding".to_string()))?;
        let iterations = first
            .iterations
            .parse::<u32>()
            .ok()
            .filter(|i| *i > 0)
            .ok_or_else(|| ScramError::InvalidServerMessage("invalid iteration count".to_string()))?;

        let without_proof = format!("c={},r={}", BASE64.encode(GS2_HEADER), first.nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare(),
            server_first,
            without_proof
        );

        let keys = Keys::derive(&self.password, &salt, iterations);
        let stored_key = Sha256::digest(keys.client_key);
        let signature = hmac(&stored_key, auth_message.as_bytes());

        let mut proof = keys.client_key;
        for (p, s) in proof.iter_mut().zip(signature.iter()) {
            *p ^= s;
        }

        let client_final = format!("{},p={}", without_proof, BASE64.encode(proof));
        Ok((
            client_final,
            ScramState {
                auth_message: auth_message.into_bytes(),
                server_key: keys.server_key,
            },
        ))
    }

    /// Check the server signature carried by the server final message.
    pub fn verify_server_final(
        &self,
        server_final: &str,
        state: &ScramState,
    ) -> Result<(), ScramError> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ScramError::InvalidServerProof(err.to_string()));
        }
        let encoded = server_final
            .split(',')
            .find_map(|part| part.strip_prefix("v="))
            .ok_or_else(|| ScramError::InvalidServerMessage("missing 'v=' attribute".to_string()))?;
        let received = BASE64.decode(encoded).map_err(|_| {
            ScramError::Base64Error("invalid server signature encoding".to_string())
        })?;

        let expected = hmac(&state.server_key, &state.auth_message);
        if constant_time_eq(&received, &expected) {
            Ok(())
        } else {
            Err(ScramError::InvalidServerProof(
                "server signature verification failed".to_string(),
            ))
        }
    }
}

struct ServerFirst {
    nonce: String,
    salt: String,
    iterations: String,
}

impl ServerFirst {
    fn parse(msg: &str) -> Result<Self, ScramError> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in msg.split(',') {
            match part.split_once('=') {
                Some(("r", v)) if !v.is_empty() => nonce = Some(v.to_string()),
                Some(("s", v)) if !v.is_empty() => salt = Some(v.to_string()),
                Some(("i", v)) if !v.is_empty() => iterations = Some(v.to_string()),
                _ => {}
            }
        }
        match (nonce, salt, iterations) {
            (Some(nonce), Some(salt), Some(iterations)) => Ok(Self {
                nonce,
                salt,
                iterations,
            }),
            _ => Err(ScramError::InvalidServerMessage(
                "missing required fields in server first message".to_string(),
            )),
        }
    }
}

struct Keys {
    client_key: [u8; 32],
    server_key: [u8; 32],
}

impl Keys {
    fn derive(password: &str, salt: &[u8], iterations: u32) -> Self {
        let mut salted = [0u8; 32];
        // only fails for invalid output lengths, 32 bytes is valid for HMAC-SHA256
        let _ = pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut salted);
        Self {
            client_key: hmac(&salted, b"Client Key"),
            server_key: hmac(&salted, b"Server Key"),
        }
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
