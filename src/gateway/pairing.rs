use crate::error::{WardenError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

pub const CODE_LENGTH: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A pending or redeemed pairing request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePairing {
    pub pairing_id: String,
    pub code: String,
    pub device_name: String,
    pub device_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

/// Reply to a pairing request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingCreated {
    pub pairing_id: String,
    pub pairing_code: String,
    /// Seconds until the code expires
    pub expires_in: u64,
}

/// Single-use pairing codes keyed by code
#[derive(Debug)]
pub struct PairingBook {
    ttl: Duration,
    pairings: HashMap<String, DevicePairing>,
}

impl PairingBook {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pairings: HashMap::new(),
        }
    }

    pub fn request(&mut self, device_name: &str, device_type: Option<String>) -> PairingCreated {
        self.request_at(device_name, device_type, Utc::now())
    }

    pub fn request_at(
        &mut self,
        device_name: &str,
        device_type: Option<String>,
        now: DateTime<Utc>,
    ) -> PairingCreated {
        self.purge_expired(now);

        let mut code = generate_code();
        while self.pairings.contains_key(&code) {
            code = generate_code();
        }

        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::minutes(5));
        let pairing = DevicePairing {
            pairing_id: uuid::Uuid::new_v4().to_string(),
            code: code.clone(),
            device_name: device_name.to_string(),
            device_type,
            created_at: now,
            expires_at: now + ttl,
            used: false,
        };

        let created = PairingCreated {
            pairing_id: pairing.pairing_id.clone(),
            pairing_code: code.clone(),
            expires_in: self.ttl.as_secs(),
        };
        self.pairings.insert(code, pairing);
        created
    }

    /// Redeem a code. Unknown, expired and already used codes all fail.
    pub fn redeem(&mut self, code: &str) -> Result<DevicePairing> {
        self.redeem_at(code, Utc::now())
    }

    pub fn redeem_at(&mut self, code: &str, now: DateTime<Utc>) -> Result<DevicePairing> {
        let code = code.trim().to_ascii_uppercase();
        let pairing = self
            .pairings
            .get_mut(&code)
            .ok_or_else(|| WardenError::AuthFailed("Invalid pairing code".to_string()))?;

        if pairing.used {
            return Err(WardenError::AuthFailed(
                "Pairing code has already been used".to_string(),
            ));
        }
        if now >= pairing.expires_at {
            return Err(WardenError::AuthFailed("Pairing code has expired".to_string()));
        }

        pairing.used = true;
        Ok(pairing.clone())
    }

    /// Drop pairings past their expiry, used or not
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.pairings.len();
        self.pairings.retain(|_, p| p.expires_at > now);
        before - self.pairings.len()
    }

    pub fn len(&self) -> usize {
        self.pairings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairings.is_empty()
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
