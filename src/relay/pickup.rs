//! Pickup-directory relay: every message is written as an `.eml` file
//! instead of being sent. Used for dry runs and local testing.

use std::path::PathBuf;

use lettre::{Address, FileTransport, Transport};
use tracing::info;

use super::{envelope, MailRelay};
use crate::error::RelayError;

pub struct PickupRelay {
    transport: FileTransport,
    dir: PathBuf,
    sender: Address,
}

impl PickupRelay {
    pub fn new(dir: PathBuf, sender: Address) -> Self {
        Self {
            transport: FileTransport::new(&dir),
            dir,
            sender,
        }
    }
}

impl MailRelay for PickupRelay {
    fn send_raw(&self, recipients: &[String], raw: &[u8]) -> Result<(), RelayError> {
        let envelope = envelope(&self.sender, recipients)?;
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| RelayError(format!("cannot create {}: {e}", self.dir.display())))?;
        let id = self
            .transport
            .send_raw(&envelope, raw)
            .map_err(|e| RelayError(format!("pickup write failed: {e}")))?;
        info!(id = %id, dir = %self.dir.display(), "Wrote message to pickup directory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_eml_file() {
        let dir = tempfile::tempdir().unwrap();
        let relay = PickupRelay::new(dir.path().join("out"), "forwarder@relay.example".parse().unwrap());
        let raw = b"Subject: hi\r\n\r\nbody\r\n";
        relay.send_raw(&["me@example.com".to_string()], raw).unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|x| x == "eml"))
            .collect();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(&files[0]).unwrap(), raw);
    }
}
