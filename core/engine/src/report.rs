//! Hand-off of newly generated one-time passwords.

use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::console::Console;
use crate::notify::Notifier;
use crate::provision::PasswordRegistry;
use crate::summary::CredentialRecord;
use crate::users::UserManager;
use encryptall_common::{OneTimePassword, UserId};

const DISPLAY_QUESTION: &str =
    "Do you want to display the one-time passwords here instead of sending them by mail? (y/n)";

/// How one password reached its user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CredentialOutcome {
    /// Shown to the operator.
    Displayed,
    /// Sent by mail.
    Mailed { address: String },
    /// Mail failed; shown to the operator instead.
    MailFailed { reason: String },
}

/// Presents generated passwords to the operator or mails them to users.
///
/// Never touches files or keys.
pub struct CredentialReporter {
    console: Arc<dyn Console>,
    notifier: Option<Arc<dyn Notifier>>,
    users: Arc<UserManager>,
    display: Option<bool>,
}

impl CredentialReporter {
    /// `display` pre-answers the display-or-mail question.
    pub fn new(
        console: Arc<dyn Console>,
        notifier: Option<Arc<dyn Notifier>>,
        users: Arc<UserManager>,
        display: Option<bool>,
    ) -> Self {
        Self {
            console,
            notifier,
            users,
            display,
        }
    }

    /// Report every generated password in `registry`.
    pub async fn report(&self, registry: &PasswordRegistry) -> Vec<CredentialRecord> {
        let generated: Vec<(&UserId, &OneTimePassword)> = registry.generated().collect();
        if generated.is_empty() {
            return Vec::new();
        }

        let notifier = match (&self.notifier, self.wants_display()) {
            (Some(notifier), false) => notifier,
            _ => {
                self.display(&generated);
                return generated
                    .into_iter()
                    .map(|(user, _)| CredentialRecord {
                        user: user.clone(),
                        outcome: CredentialOutcome::Displayed,
                    })
                    .collect();
            }
        };

        let mut records = Vec::with_capacity(generated.len());
        let mut undelivered = Vec::new();

        for (user, password) in generated {
            let outcome = match self.users.email(user).await {
                Some(address) => match notifier.send_credentials(user, &address, password).await {
                    Ok(()) => CredentialOutcome::Mailed { address },
                    Err(e) => {
                        warn!(user = %user, error = %e, "Failed to mail one-time password");
                        CredentialOutcome::MailFailed {
                            reason: e.to_string(),
                        }
                    }
                },
                None => CredentialOutcome::Displayed,
            };

            if !matches!(outcome, CredentialOutcome::Mailed { .. }) {
                undelivered.push((user, password));
            }
            records.push(CredentialRecord {
                user: user.clone(),
                outcome,
            });
        }

        if undelivered.is_empty() {
            info!("All one-time passwords were mailed");
            self.console.line("Passwords were successfully sent to all users.");
        } else {
            self.console.line(
                "Some users could not be reached by mail. Please hand them these passwords:",
            );
            self.display(&undelivered);
        }

        records
    }

    fn wants_display(&self) -> bool {
        match self.display {
            Some(display) => display,
            None if self.notifier.is_none() => true,
            None => self.console.confirm(DISPLAY_QUESTION),
        }
    }

    fn display(&self, entries: &[(&UserId, &OneTimePassword)]) {
        let rows: Vec<Vec<String>> = entries
            .iter()
            .map(|(user, password)| vec![user.to_string(), password.expose().to_string()])
            .collect();
        self.console.table(&["Username", "Private key password"], &rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{RecordingConsole, RecordingNotifier};
    use crate::provision::Provisioned;
    use crate::users::StaticUserBackend;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn registry() -> PasswordRegistry {
        let mut registry = PasswordRegistry::new();
        registry.insert(
            user("user1"),
            Provisioned::Generated(OneTimePassword::new("pwd1")),
        );
        registry.insert(
            user("user2"),
            Provisioned::Generated(OneTimePassword::new("pwd2")),
        );
        registry.insert(user("user3"), Provisioned::Existing);
        registry
    }

    fn users() -> Arc<UserManager> {
        Arc::new(
            UserManager::new().with_backend(Arc::new(
                StaticUserBackend::new("db", vec![user("user1"), user("user2"), user("user3")])
                    .with_email(user("user1"), "user1@example.com")
                    .with_email(user("user3"), "user3@example.com"),
            )),
        )
    }

    #[tokio::test]
    async fn test_display_when_operator_confirms() {
        let console = Arc::new(RecordingConsole::answering(true));
        let notifier = Arc::new(RecordingNotifier::new());
        let reporter = CredentialReporter::new(console.clone(), Some(notifier.clone()), users(), None);

        let records = reporter.report(&registry()).await;

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.outcome == CredentialOutcome::Displayed));
        assert!(notifier.sent().is_empty());
        assert_eq!(
            console.tables(),
            vec![vec![
                vec!["user1".to_string(), "pwd1".to_string()],
                vec!["user2".to_string(), "pwd2".to_string()],
            ]]
        );
    }

    #[tokio::test]
    async fn test_mail_with_display_fallback() {
        let console = Arc::new(RecordingConsole::answering(false));
        let notifier = Arc::new(RecordingNotifier::new());
        let reporter = CredentialReporter::new(console.clone(), Some(notifier.clone()), users(), None);

        let records = reporter.report(&registry()).await;

        assert_eq!(
            records[0].outcome,
            CredentialOutcome::Mailed {
                address: "user1@example.com".into()
            }
        );
        // user2 has no address.
        assert_eq!(records[1].outcome, CredentialOutcome::Displayed);
        assert_eq!(
            notifier.sent(),
            vec![(user("user1"), "user1@example.com".to_string(), "pwd1".to_string())]
        );
        assert_eq!(
            console.tables(),
            vec![vec![vec!["user2".to_string(), "pwd2".to_string()]]]
        );
    }

    #[tokio::test]
    async fn test_failed_mail_is_displayed() {
        let console = Arc::new(RecordingConsole::answering(false));
        let notifier = Arc::new(RecordingNotifier::failing());
        let reporter = CredentialReporter::new(console.clone(), Some(notifier), users(), None);

        let records = reporter.report(&registry()).await;

        assert!(matches!(
            records[0].outcome,
            CredentialOutcome::MailFailed { .. }
        ));
        assert_eq!(console.tables()[0].len(), 2);
    }

    #[tokio::test]
    async fn test_without_notifier_passwords_are_displayed_without_asking() {
        let console = Arc::new(RecordingConsole::answering(false));
        let reporter = CredentialReporter::new(console.clone(), None, users(), None);

        let records = reporter.report(&registry()).await;

        assert_eq!(records.len(), 2);
        assert!(console.questions().is_empty());
        assert_eq!(console.tables().len(), 1);
    }

    #[tokio::test]
    async fn test_nothing_to_report() {
        let console = Arc::new(RecordingConsole::answering(true));
        let reporter = CredentialReporter::new(console.clone(), None, users(), Some(true));
        let mut registry = PasswordRegistry::new();
        registry.insert(user("user3"), Provisioned::Existing);

        assert!(reporter.report(&registry).await.is_empty());
        assert!(console.tables().is_empty());
    }
}
