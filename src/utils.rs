//! Utility functions for identifiers

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32m
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// True when `raw` decodes as bech32 with the given prefix and a 16 byte uuid payload.
pub fn is_entity_id(raw: &str, hrp: &str) -> bool {
    match bech32::decode(raw) {
        Ok((decoded_hrp, payload)) => decoded_hrp.as_str() == hrp && payload.len() == 16,
        Err(_) => false,
    }
}
