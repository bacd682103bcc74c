//! SMTP submission relay (e.g. Amazon SES SMTP endpoints).

use std::time::Duration;

use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, SmtpTransport, Transport};
use tracing::debug;

use super::{envelope, MailRelay};
use crate::config::RelayConfig;
use crate::error::{ConfigError, RelayError};

/// Implicit TLS port; any other port uses STARTTLS.
const SMTPS_PORT: u16 = 465;

const SMTP_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SmtpRelay {
    transport: SmtpTransport,
    sender: Address,
}

impl SmtpRelay {
    pub fn new(config: &RelayConfig, sender: Address) -> Result<Self, ConfigError> {
        let builder = if config.port == SMTPS_PORT {
            SmtpTransport::relay(&config.host)
        } else {
            SmtpTransport::starttls_relay(&config.host)
        }
        .map_err(|e| ConfigError::Invalid {
            field: "relay.host",
            reason: format!("SMTP relay error: {e}"),
        })?;

        let mut builder = builder.port(config.port).timeout(Some(SMTP_TIMEOUT));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            sender,
        })
    }
}

impl MailRelay for SmtpRelay {
    fn send_raw(&self, recipients: &[String], raw: &[u8]) -> Result<(), RelayError> {
        let envelope = envelope(&self.sender, recipients)?;
        let response = self
            .transport
            .send_raw(&envelope, raw)
            .map_err(|e| RelayError(format!("SMTP send failed: {e}")))?;
        debug!(code = %response.code(), "SMTP relay accepted message");
        Ok(())
    }
}
