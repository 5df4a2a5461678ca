//! Credential notification.

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use encryptall_common::{Error, OneTimePassword, Result, UserId};

/// Delivers a one-time password to its user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `password` to `user` at `address`. Best effort; may fail.
    async fn send_credentials(
        &self,
        user: &UserId,
        address: &str,
        password: &OneTimePassword,
    ) -> Result<()>;
}

/// Writes one RFC 5322 message per user into a spool directory, from
/// which the local mail system picks them up.
pub struct SpoolNotifier {
    dir: PathBuf,
    sender: String,
}

impl SpoolNotifier {
    pub fn new(dir: impl Into<PathBuf>, sender: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            sender: sender.into(),
        }
    }

    fn compose(&self, user: &UserId, address: &str, password: &OneTimePassword) -> String {
        format!(
            "From: {sender}\r\n\
             To: {address}\r\n\
             Subject: Encryption enabled for your account\r\n\
             Date: {date}\r\n\
             Message-ID: <{id}@encryptall>\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             Hello {user},\r\n\
             \r\n\
             the administrator enabled server-side encryption. Your files were\r\n\
             encrypted using the password '{password}'.\r\n\
             \r\n\
             Please log in, open your personal settings and update your\r\n\
             encryption password by entering this password into the\r\n\
             'old log-in password' field and your current login password.\r\n",
            sender = self.sender,
            address = address,
            date = Utc::now().to_rfc2822(),
            id = Uuid::new_v4(),
            user = user,
            password = password.expose(),
        )
    }
}

fn is_plausible_address(address: &str) -> bool {
    match address.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !address.contains(char::is_whitespace)
                && !address.contains(['\r', '\n'])
        }
        None => false,
    }
}

#[async_trait]
impl Notifier for SpoolNotifier {
    async fn send_credentials(
        &self,
        user: &UserId,
        address: &str,
        password: &OneTimePassword,
    ) -> Result<()> {
        if !is_plausible_address(address) {
            return Err(Error::Notification(format!(
                "Invalid e-mail address for {}: {:?}",
                user, address
            )));
        }

        fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Notification(format!("Cannot create spool {}: {}", self.dir.display(), e))
        })?;

        let file = self.dir.join(format!("{}-{}.eml", user, Uuid::new_v4()));
        fs::write(&file, self.compose(user, address, password))
            .await
            .map_err(|e| Error::Notification(format!("Cannot spool mail for {}: {}", user, e)))?;

        info!(user = %user, file = %file.display(), "Spooled credential mail");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_spooled_message_carries_password() {
        let temp = TempDir::new().unwrap();
        let spool = temp.path().join("outgoing");
        let notifier = SpoolNotifier::new(&spool, "admin@example.com");
        let user = UserId::new("user1").unwrap();

        notifier
            .send_credentials(&user, "user1@example.com", &OneTimePassword::new("12345678"))
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(&spool).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let message = std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap();
        assert!(message.starts_with("From: admin@example.com\r\nTo: user1@example.com\r\n"));
        assert!(message.contains("'12345678'"));
        assert!(message.contains("\r\n\r\nHello user1,"));
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let temp = TempDir::new().unwrap();
        let notifier = SpoolNotifier::new(temp.path(), "admin@example.com");
        let user = UserId::new("user1").unwrap();

        for address in ["", "nobody", "a@b\r\nBcc: x@y", "@example.com"] {
            let result = notifier
                .send_credentials(&user, address, &OneTimePassword::new("pw"))
                .await;
            assert!(matches!(result, Err(Error::Notification(_))), "{:?}", address);
        }
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }
}
