//! Tamper-evident station snapshot tokens
//!
//! The token is `hex(HMAC-SHA256(secret, message))` over the pipe-joined
//! public fields of a [`StationSnapshot`], with numbers formatted to fixed
//! precision so that the message is reproducible from the serialized values.

use crate::core_types::station::StationSnapshot;
use crate::error::EngineError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Canonical message for a snapshot.
pub fn canonical_message(snapshot: &StationSnapshot) -> String {
    format!(
        "{}|{}|{:.2}|{:.3}|{:.3}|{}",
        snapshot.name,
        snapshot.city,
        snapshot.concentration,
        snapshot.ndvi,
        snapshot.albedo,
        snapshot.lulc
    )
}

/// Signs and verifies snapshots with a server-held secret
#[derive(Clone)]
pub struct IntegritySigner {
    keyed: HmacSha256,
}

impl std::fmt::Debug for IntegritySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegritySigner").finish_non_exhaustive()
    }
}

impl IntegritySigner {
    /// Key a signer. An empty secret is a configuration error.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, EngineError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(EngineError::Config("token secret is empty".into()));
        }
        let keyed = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|e| EngineError::Config(format!("token secret rejected: {e}")))?;
        Ok(Self { keyed })
    }

    fn mac(&self, snapshot: &StationSnapshot) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(canonical_message(snapshot).as_bytes());
        mac
    }

    /// Lower-case hex token for a snapshot.
    pub fn sign(&self, snapshot: &StationSnapshot) -> String {
        hex::encode(self.mac(snapshot).finalize().into_bytes())
    }

    /// Constant-time check of `token` against `snapshot`.
    pub fn verify(&self, snapshot: &StationSnapshot, token: &str) -> bool {
        let Ok(expected) = hex::decode(token.trim()) else {
            return false;
        };
        self.mac(snapshot).verify_slice(&expected).is_ok()
    }
}
