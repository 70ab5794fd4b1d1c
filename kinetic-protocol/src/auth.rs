//! HMAC command authentication.
//!
//! Every outbound command is authenticated with HMAC-SHA1 keyed by the
//! secret shared with the drive. The MAC input is the 4-byte big-endian
//! length of the serialized command followed by the command bytes. The hash
//! lives outside the command (in [`Message::hmac`]) so it never covers
//! itself. An empty command contributes nothing to the MAC input.
//!
//! [`Message::hmac`]: crate::message::Message::hmac

use crate::error::ProtocolError;
use crate::message::Command;
use hmac::{Hmac, Mac};
use prost::Message as _;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// HMAC-SHA1 output length in bytes.
pub const HMAC_LENGTH: usize = 20;

fn keyed_mac(secret: &[u8], command_bytes: &[u8]) -> Result<HmacSha1, ProtocolError> {
    let mut mac = HmacSha1::new_from_slice(secret).map_err(|_| ProtocolError::InvalidSecret)?;
    if !command_bytes.is_empty() {
        let len = u32::try_from(command_bytes.len()).map_err(|_| {
            ProtocolError::CommandTooLarge {
                size: u32::MAX,
                max: crate::MAX_COMMAND_SIZE,
            }
        })?;
        mac.update(&len.to_be_bytes());
        mac.update(command_bytes);
    }
    Ok(mac)
}

/// Computes the HMAC over already-serialized command bytes.
pub fn sign_bytes(secret: &[u8], command_bytes: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    Ok(keyed_mac(secret, command_bytes)?
        .finalize()
        .into_bytes()
        .to_vec())
}

/// Computes the HMAC for a command.
pub fn calculate_hmac(secret: &[u8], command: &Command) -> Result<Vec<u8>, ProtocolError> {
    sign_bytes(secret, &command.encode_to_vec())
}

/// Verifies an HMAC in constant time.
pub fn verify_hmac(secret: &[u8], command_bytes: &[u8], expected: &[u8]) -> bool {
    match keyed_mac(secret, command_bytes) {
        Ok(mac) => mac.verify_slice(expected).is_ok(),
        Err(_) => false,
    }
}
