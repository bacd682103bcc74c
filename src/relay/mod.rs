//! Outbound mail relays.
//!
//! A relay takes finished message bytes and an envelope recipient list. The
//! envelope sender is always the configured relay sender, since that is the
//! only identity the relay is authorized to send as.

pub mod pickup;
pub mod smtp;

use lettre::address::{Address, Envelope};

use crate::config::{Config, RelayBackend};
use crate::error::{ConfigError, RelayError};

/// Sends raw RFC 5322 bytes.
pub trait MailRelay {
    fn send_raw(&self, recipients: &[String], raw: &[u8]) -> Result<(), RelayError>;
}

/// Open the configured relay.
pub fn from_config(config: &Config) -> Result<Box<dyn MailRelay>, ConfigError> {
    let sender = parse_address("forward.sender", &config.sender_address().address)?;
    match config.relay.backend {
        RelayBackend::Smtp => Ok(Box::new(smtp::SmtpRelay::new(&config.relay, sender)?)),
        RelayBackend::Pickup => {
            let dir = config
                .relay
                .pickup_dir
                .clone()
                .ok_or(ConfigError::Missing("relay.pickup_dir"))?;
            Ok(Box::new(pickup::PickupRelay::new(dir, sender)))
        }
    }
}

fn parse_address(field: &'static str, raw: &str) -> Result<Address, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Invalid {
        field,
        reason: format!("'{raw}': {e}"),
    })
}

/// SMTP envelope for `recipients` from `sender`.
pub(crate) fn envelope(sender: &Address, recipients: &[String]) -> Result<Envelope, RelayError> {
    let to = recipients
        .iter()
        .map(|r| {
            r.parse::<Address>()
                .map_err(|e| RelayError(format!("invalid recipient '{r}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Envelope::new(Some(sender.clone()), to).map_err(|e| RelayError(e.to_string()))
}
