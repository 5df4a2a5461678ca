//! Top-level encrypt-all driver.
//!
//! A run moves through `ProvisionKeys -> EncryptAllUsers ->
//! ReportCredentials -> Done`; master-key runs go straight from
//! `EncryptAllUsers` to `Done`. Only a master key failure aborts a run.
//! Everything else is logged, recorded in the [`RunSummary`] and skipped,
//! so an interrupted or partially failed run is repaired by running again.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::console::Console;
use crate::gate::FileEncryptionGate;
use crate::notify::Notifier;
use crate::password::{PasswordGenerator, RandomSource, SystemRandom};
use crate::provision::{KeyProvisioner, PasswordRegistry, Provisioned};
use crate::report::CredentialReporter;
use crate::summary::RunSummary;
use crate::users::UserManager;
use crate::walker::TreeWalker;
use encryptall_common::{FsPath, Result, UserId};
use encryptall_keys::{FileEncryptor, KeyManager, KeyMode, TreeKeyStore, UserSetup};
use encryptall_storage::FileTree;

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    ProvisionKeys,
    EncryptAllUsers,
    ReportCredentials,
    Done,
}

/// Everything a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub tree: Arc<dyn FileTree>,
    pub users: Arc<UserManager>,
    pub keys: Arc<dyn KeyManager>,
    pub setup: Arc<dyn UserSetup>,
    pub encryptor: Arc<dyn FileEncryptor>,
    pub random: Arc<dyn RandomSource>,
    pub console: Arc<dyn Console>,
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl Collaborators {
    /// Collaborators backed by a single key store, with system randomness
    /// and no notifier.
    pub fn from_key_store(
        tree: Arc<dyn FileTree>,
        users: Arc<UserManager>,
        store: Arc<TreeKeyStore>,
        console: Arc<dyn Console>,
    ) -> Self {
        Self {
            tree,
            users,
            keys: store.clone(),
            setup: store.clone(),
            encryptor: store,
            random: Arc::new(SystemRandom::new()),
            console,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }
}

/// One encrypt-all run. Consumed by [`EncryptAll::run`].
pub struct EncryptAll {
    config: RunConfig,
    with: Collaborators,
    gate: FileEncryptionGate,
    state: RunState,
    registry: PasswordRegistry,
    provisioned_users: Vec<UserId>,
    summary: RunSummary,
    progress_total: u64,
}

impl EncryptAll {
    pub fn new(config: RunConfig, with: Collaborators) -> Self {
        let gate = FileEncryptionGate::new(
            with.keys.clone(),
            with.setup.clone(),
            with.encryptor.clone(),
        );
        Self {
            summary: RunSummary::new(config.mode),
            config,
            with,
            gate,
            state: RunState::ProvisionKeys,
            registry: PasswordRegistry::new(),
            provisioned_users: Vec::new(),
            progress_total: 0,
        }
    }

    /// Current state; `ProvisionKeys` until the run starts.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Drive the run to completion.
    ///
    /// # Errors
    /// - `Error::MasterKey` if the master key cannot be made usable
    /// - Invalid configuration
    pub async fn run(mut self) -> Result<RunSummary> {
        self.config.validate()?;
        info!(mode = %self.config.mode, "Starting encrypt-all run");

        loop {
            let next = match self.state {
                RunState::ProvisionKeys => {
                    self.provision_keys().await?;
                    RunState::EncryptAllUsers
                }
                RunState::EncryptAllUsers => {
                    self.encrypt_all_users().await?;
                    match self.config.mode {
                        KeyMode::MasterKey => RunState::Done,
                        KeyMode::PerUser => RunState::ReportCredentials,
                    }
                }
                RunState::ReportCredentials => {
                    self.report_credentials().await;
                    RunState::Done
                }
                RunState::Done => break,
            };
            debug!(from = ?self.state, to = ?next, "State transition");
            self.state = next;
        }

        info!(
            encrypted = self.summary.files_encrypted,
            skipped = self.summary.files_skipped,
            failed = self.summary.failed_files.len(),
            "Encrypt-all run finished"
        );
        Ok(self.summary)
    }

    async fn provision_keys(&mut self) -> Result<()> {
        let console = self.with.console.clone();
        console.line("Start key generation...");

        let provisioner = KeyProvisioner::new(
            self.config.mode,
            self.with.keys.clone(),
            self.with.setup.clone(),
            PasswordGenerator::with_length(self.with.random.clone(), self.config.password_length),
        );

        match self.config.mode {
            KeyMode::MasterKey => {
                provisioner.provision(&[], &mut self.registry).await?;
                console.line("Master key is ready.");
            }
            KeyMode::PerUser => {
                let users = self.with.users.users().await;
                provisioner.provision(&users, &mut self.registry).await?;

                for (user, reason) in self.registry.failed() {
                    self.summary
                        .fail_user(user, format!("key provisioning failed: {}", reason));
                }
                let generated = self.registry.generated().count();
                let failed = self.registry.failed().count();
                console.line(&format!(
                    "Key pairs ready: {} new, {} existing, {} failed.",
                    generated,
                    users.len().saturating_sub(generated + failed),
                    failed
                ));
                self.provisioned_users = users;
            }
        }
        Ok(())
    }

    async fn users_to_encrypt(&self) -> Vec<UserId> {
        if self.config.reread_users || self.config.mode.is_master_key() {
            self.with.users.users().await
        } else {
            self.provisioned_users.clone()
        }
    }

    /// Whether `user` has keys to encrypt for in per-user mode.
    async fn is_ready(&mut self, user: &UserId) -> bool {
        if self.config.mode.is_master_key() {
            return true;
        }

        match self.registry.get(user) {
            Some(Provisioned::Failed(_)) => false,
            Some(_) => true,
            // Appeared after provisioning.
            None => match self.with.keys.user_has_keys(user).await {
                Ok(true) => true,
                Ok(false) => {
                    warn!(user = %user, "User appeared after key provisioning, skipping");
                    false
                }
                Err(e) => {
                    warn!(user = %user, error = %e, "Cannot check user keys, skipping");
                    self.summary.fail_user(user, e.to_string());
                    false
                }
            },
        }
    }

    async fn encrypt_all_users(&mut self) -> Result<()> {
        let console = self.with.console.clone();
        console.line("Start to encrypt users files...");

        let users = self.users_to_encrypt().await;
        console.progress_start(0);

        for (index, user) in users.iter().enumerate() {
            if !self.is_ready(user).await {
                self.summary.users_skipped += 1;
                continue;
            }

            debug!(user = %user, number = index + 1, of = users.len(), "Encrypting user files");
            match self.encrypt_user_files(user).await {
                Ok(()) => self.summary.users_processed += 1,
                Err(e) if e.is_fatal() => {
                    console.progress_finish();
                    return Err(e);
                }
                Err(e) => {
                    warn!(user = %user, error = %e, "Failed to walk user files");
                    self.summary.fail_user(user, e.to_string());
                }
            }
        }

        console.progress_finish();
        Ok(())
    }

    async fn encrypt_user_files(&mut self, user: &UserId) -> Result<()> {
        let console = self.with.console.clone();
        let base_total = self.progress_total;
        let mut walker = TreeWalker::new(self.with.tree.clone(), FsPath::user_files_root(user));

        while let Some(path) = walker.next_file().await? {
            let total = base_total + walker.discovered();
            if total > self.progress_total {
                self.progress_total = total;
                console.progress_set_total(total);
            }

            match self.gate.encrypt_if_needed(&path).await {
                Ok(true) => self.summary.files_encrypted += 1,
                Ok(false) => self.summary.files_skipped += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to encrypt file, leaving it plain");
                    self.summary.fail_file(&path, e.to_string());
                }
            }
            console.progress_advance(1);
        }

        Ok(())
    }

    async fn report_credentials(&mut self) {
        let reporter = CredentialReporter::new(
            self.with.console.clone(),
            self.with.notifier.clone(),
            self.with.users.clone(),
            self.config.display_passwords,
        );
        self.summary.credentials = reporter.report(&self.registry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeKeys, FixedRandom, RecordingConsole, RecordingNotifier};
    use crate::report::CredentialOutcome;
    use crate::users::StaticUserBackend;
    use encryptall_common::OneTimePassword;
    use encryptall_crypto::{KdfParams, FORMAT_VERSION};
    use encryptall_keys::KeyStoreConfig;
    use encryptall_storage::MemoryTree;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn p(path: &str) -> FsPath {
        FsPath::parse(path).unwrap()
    }

    async fn seed(tree: &MemoryTree, files: &[&str]) {
        for file in files {
            let path = p(file);
            tree.create_dir_all(&path.parent().unwrap()).await.unwrap();
            tree.write(&path, file.as_bytes().to_vec()).await.unwrap();
        }
    }

    fn static_users(names: &[&str]) -> Arc<UserManager> {
        Arc::new(UserManager::new().with_backend(Arc::new(StaticUserBackend::new(
            "static",
            names.iter().map(|n| user(n)).collect(),
        ))))
    }

    fn fake_collaborators(
        tree: Arc<dyn FileTree>,
        users: Arc<UserManager>,
        keys: &Arc<FakeKeys>,
        console: &Arc<RecordingConsole>,
    ) -> Collaborators {
        Collaborators {
            tree,
            users,
            keys: keys.clone(),
            setup: keys.clone(),
            encryptor: keys.clone(),
            random: Arc::new(FixedRandom::new("12345678")),
            console: console.clone(),
            notifier: None,
        }
    }

    #[tokio::test]
    async fn test_per_user_run_encrypts_and_reports() {
        let tree = Arc::new(MemoryTree::new());
        seed(&tree, &["/user1/files/bar", "/user1/files/foo/subfile", "/user2/files/x"]).await;
        let keys = Arc::new(FakeKeys::new());
        keys.give_keys(&user("user2"));
        let console = Arc::new(RecordingConsole::answering(true));

        let summary = EncryptAll::new(
            RunConfig::default(),
            fake_collaborators(tree, static_users(&["user1", "user2"]), &keys, &console),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.files_encrypted, 3);
        assert_eq!(summary.users_processed, 2);
        assert!(summary.is_clean());
        assert_eq!(
            summary.credentials,
            vec![crate::summary::CredentialRecord {
                user: user("user1"),
                outcome: CredentialOutcome::Displayed,
            }]
        );
        assert_eq!(
            console.tables(),
            vec![vec![vec!["user1".to_string(), "12345678".to_string()]]]
        );
        assert_eq!(keys.calls().setup_user.len(), 1);

        let lines = console.lines();
        assert_eq!(lines[0], "Start key generation...");
        assert!(lines.contains(&"Key pairs ready: 1 new, 1 existing, 0 failed.".to_string()));
        assert!(lines.contains(&"Start to encrypt users files...".to_string()));
    }

    #[tokio::test]
    async fn test_second_run_encrypts_nothing() {
        let tree = Arc::new(MemoryTree::new());
        seed(&tree, &["/user1/files/bar", "/user1/files/foo/subfile"]).await;
        let keys = Arc::new(FakeKeys::new());
        let console = Arc::new(RecordingConsole::answering(true));
        let users = static_users(&["user1"]);

        let first = EncryptAll::new(
            RunConfig::default(),
            fake_collaborators(tree.clone(), users.clone(), &keys, &console),
        )
        .run()
        .await
        .unwrap();
        let calls_after_first = keys.calls().encrypt.len();

        let second = EncryptAll::new(
            RunConfig::default(),
            fake_collaborators(tree, users, &keys, &console),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(first.files_encrypted, 2);
        assert_eq!(second.files_encrypted, 0);
        assert_eq!(second.files_skipped, 2);
        assert_eq!(keys.calls().encrypt.len(), calls_after_first);
        assert_eq!(keys.calls().setup_user.len(), 1);
        assert!(second.credentials.is_empty());
    }

    #[tokio::test]
    async fn test_master_key_run_skips_credentials() {
        let tree = Arc::new(MemoryTree::new());
        seed(&tree, &["/user1/files/bar", "/user2/files/baz"]).await;
        let keys = Arc::new(FakeKeys::new());
        let console = Arc::new(RecordingConsole::answering(true));

        let summary = EncryptAll::new(
            RunConfig::for_mode(KeyMode::MasterKey),
            fake_collaborators(tree, static_users(&["user1", "user2"]), &keys, &console),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.files_encrypted, 2);
        assert!(summary.credentials.is_empty());
        assert!(console.questions().is_empty());
        assert!(console.tables().is_empty());
        assert!(keys.calls().setup_user.is_empty());
    }

    #[tokio::test]
    async fn test_master_key_failure_aborts_before_encryption() {
        let tree = Arc::new(MemoryTree::new());
        seed(&tree, &["/user1/files/bar"]).await;
        let keys = Arc::new(FakeKeys::new());
        keys.set_system_keys(false, false, false);
        let console = Arc::new(RecordingConsole::answering(true));

        let result = EncryptAll::new(
            RunConfig::for_mode(KeyMode::MasterKey),
            fake_collaborators(tree, static_users(&["user1"]), &keys, &console),
        )
        .run()
        .await;

        assert!(result.unwrap_err().is_fatal());
        assert!(keys.calls().encrypt.is_empty());
    }

    #[tokio::test]
    async fn test_failed_file_does_not_stop_the_walk() {
        let tree = Arc::new(MemoryTree::new());
        seed(&tree, &["/user1/files/a", "/user1/files/b", "/user2/files/c"]).await;
        let keys = Arc::new(FakeKeys::new());
        keys.fail_encrypt_for(&p("/user1/files/a"));
        let console = Arc::new(RecordingConsole::answering(true));

        let summary = EncryptAll::new(
            RunConfig::default(),
            fake_collaborators(tree, static_users(&["user1", "user2"]), &keys, &console),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.files_encrypted, 2);
        assert_eq!(summary.failed_files.len(), 1);
        assert_eq!(summary.failed_files[0].path, p("/user1/files/a"));
        assert_eq!(keys.version_of(&p("/user1/files/a")), 0);
        assert_eq!(summary.users_processed, 2);
    }

    #[tokio::test]
    async fn test_user_with_failed_provisioning_is_skipped() {
        let tree = Arc::new(MemoryTree::new());
        seed(&tree, &["/user1/files/a", "/user2/files/b"]).await;
        let keys = Arc::new(FakeKeys::new());
        keys.fail_setup_for(&user("user1"));
        let console = Arc::new(RecordingConsole::answering(true));

        let summary = EncryptAll::new(
            RunConfig::default(),
            fake_collaborators(tree, static_users(&["user1", "user2"]), &keys, &console),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.users_skipped, 1);
        assert_eq!(summary.failed_users.len(), 1);
        assert_eq!(summary.failed_users[0].user, user("user1"));
        assert_eq!(keys.calls().encrypt, vec![p("/user2/files/b")]);
    }

    #[tokio::test]
    async fn test_foreign_share_is_untouched() {
        let tree = Arc::new(MemoryTree::new());
        seed(&tree, &["/user1/files/mine", "/user2/files/theirs"]).await;
        tree.mount_share(&p("/user1/files/from-user2"), Some(user("user2")))
            .unwrap();
        seed(&tree, &["/user1/files/from-user2/theirs"]).await;
        let keys = Arc::new(FakeKeys::new());
        let console = Arc::new(RecordingConsole::answering(true));

        EncryptAll::new(
            RunConfig::default(),
            fake_collaborators(tree, static_users(&["user1"]), &keys, &console),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(keys.calls().encrypt, vec![p("/user1/files/mine")]);
    }

    #[tokio::test]
    async fn test_progress_total_grows() {
        let tree = Arc::new(MemoryTree::new());
        seed(
            &tree,
            &["/user1/files/a", "/user1/files/d/b", "/user2/files/c"],
        )
        .await;
        let keys = Arc::new(FakeKeys::new());
        let console = Arc::new(RecordingConsole::answering(true));

        EncryptAll::new(
            RunConfig::default(),
            fake_collaborators(tree, static_users(&["user1", "user2"]), &keys, &console),
        )
        .run()
        .await
        .unwrap();

        let totals = console.totals();
        assert_eq!(totals.first(), Some(&0));
        assert_eq!(totals.last(), Some(&3));
        assert!(totals.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(console.advanced(), 3);
        assert!(console.finished());
    }

    #[tokio::test]
    async fn test_user_list_is_reread_for_encryption() {
        let tree = Arc::new(MemoryTree::new());
        seed(&tree, &["/user1/files/a", "/late/files/b"]).await;
        let keys = Arc::new(FakeKeys::new());
        let console = Arc::new(RecordingConsole::answering(true));

        // "late" is known to the backend only on the second enumeration.
        struct Growing(std::sync::atomic::AtomicUsize);

        #[async_trait::async_trait]
        impl crate::users::UserBackend for Growing {
            fn name(&self) -> &str {
                "growing"
            }

            async fn users(&self) -> Result<Vec<UserId>> {
                let call = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let mut users = vec![UserId::new("user1")?];
                if call > 0 {
                    users.push(UserId::new("late")?);
                }
                Ok(users)
            }

            async fn email(&self, _user: &UserId) -> Result<Option<String>> {
                Ok(None)
            }
        }

        let users = Arc::new(
            UserManager::new().with_backend(Arc::new(Growing(Default::default()))),
        );
        let summary = EncryptAll::new(
            RunConfig::default(),
            fake_collaborators(tree, users, &keys, &console),
        )
        .run()
        .await
        .unwrap();

        // "late" has no keys, so it is skipped rather than encrypted without keys.
        assert_eq!(summary.users_processed, 1);
        assert_eq!(summary.users_skipped, 1);
        assert_eq!(keys.calls().encrypt, vec![p("/user1/files/a")]);
    }

    #[tokio::test]
    async fn test_mailed_credentials_are_recorded() {
        let tree = Arc::new(MemoryTree::new());
        seed(&tree, &["/user1/files/a"]).await;
        let keys = Arc::new(FakeKeys::new());
        let console = Arc::new(RecordingConsole::answering(false));
        let notifier = Arc::new(RecordingNotifier::new());
        let users = Arc::new(UserManager::new().with_backend(Arc::new(
            StaticUserBackend::new("static", vec![user("user1")])
                .with_email(user("user1"), "user1@example.com"),
        )));

        let summary = EncryptAll::new(
            RunConfig::default(),
            fake_collaborators(tree, users, &keys, &console).with_notifier(notifier.clone()),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(notifier.sent().len(), 1);
        assert!(matches!(
            summary.credentials[0].outcome,
            CredentialOutcome::Mailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_with_tree_key_store() {
        let tree = Arc::new(MemoryTree::new());
        seed(&tree, &["/user1/files/bar", "/user1/files/foo/subfile"]).await;
        let store = Arc::new(TreeKeyStore::new(
            tree.clone(),
            KeyStoreConfig::new(KeyMode::PerUser, "secret").with_kdf(KdfParams::minimal()),
        ));
        let console = Arc::new(RecordingConsole::answering(true));
        let users = static_users(&["user1"]);

        let collaborators =
            Collaborators::from_key_store(tree.clone(), users, store.clone(), console.clone())
                .with_random(Arc::new(FixedRandom::new("12345678")));

        let first = EncryptAll::new(RunConfig::default(), collaborators.clone())
            .run()
            .await
            .unwrap();
        let second = EncryptAll::new(RunConfig::default(), collaborators)
            .run()
            .await
            .unwrap();

        assert_eq!(first.files_encrypted, 2);
        assert_eq!(second.files_encrypted, 0);
        assert_eq!(second.files_skipped, 2);
        for path in ["/user1/files/bar", "/user1/files/foo/subfile"] {
            assert_eq!(store.version(&p(path)).await.unwrap(), FORMAT_VERSION);
        }
        assert!(store.user_has_keys(&user("user1")).await.unwrap());
        assert_eq!(store.active_user().await, None);

        // The generated password unlocks the new private key.
        let private: encryptall_keys::StoredPrivateKey = serde_json::from_slice(
            &tree
                .read(&p("/user1/files_encryption/private.key"))
                .await
                .unwrap(),
        )
        .unwrap();
        let password = OneTimePassword::new("12345678");
        assert!(
            encryptall_crypto::unlock_private_key(&private.protected, password.expose().as_bytes())
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_plain_file_starting_with_magic_is_encrypted() {
        let tree = Arc::new(MemoryTree::new());
        let notes = p("/user1/files/notes.txt");
        let text = b"EALLOCATION table, plain text".to_vec();
        tree.create_dir_all(&notes.parent().unwrap()).await.unwrap();
        tree.write(&notes, text.clone()).await.unwrap();
        let store = Arc::new(TreeKeyStore::new(
            tree.clone(),
            KeyStoreConfig::new(KeyMode::PerUser, "secret").with_kdf(KdfParams::minimal()),
        ));
        let console = Arc::new(RecordingConsole::answering(true));
        let collaborators =
            Collaborators::from_key_store(tree.clone(), static_users(&["user1"]), store.clone(), console)
                .with_random(Arc::new(FixedRandom::new("12345678")));

        let summary = EncryptAll::new(RunConfig::default(), collaborators)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.files_encrypted, 1);
        assert_eq!(summary.files_skipped, 0);
        assert_eq!(store.version(&notes).await.unwrap(), FORMAT_VERSION);
        assert_ne!(tree.read(&notes).await.unwrap(), text);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unsupported_file_name_does_not_fail_the_user() {
        let temp = tempfile::TempDir::new().unwrap();
        let tree = Arc::new(encryptall_storage::LocalTree::new(temp.path()).unwrap());
        tree.create_dir_all(&p("/user1/files")).await.unwrap();
        tree.write(&p("/user1/files/good.txt"), b"good".to_vec())
            .await
            .unwrap();
        std::fs::write(temp.path().join("user1/files/odd\\name.txt"), b"odd").unwrap();
        let keys = Arc::new(FakeKeys::new());
        let console = Arc::new(RecordingConsole::answering(true));

        let summary = EncryptAll::new(
            RunConfig::default(),
            fake_collaborators(tree, static_users(&["user1"]), &keys, &console),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(summary.files_encrypted, 1);
        assert!(summary.failed_users.is_empty());
        assert_eq!(keys.version_of(&p("/user1/files/good.txt")), 1);
    }
}
