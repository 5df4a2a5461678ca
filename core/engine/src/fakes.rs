//! Recording fakes for the collaborator roles.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::console::Console;
use crate::notify::Notifier;
use crate::password::{RandomGenerator, RandomSource};
use encryptall_common::{Error, FsPath, OneTimePassword, Result, UserId};
use encryptall_keys::{FileEncryptor, KeyManager, UserSetup};

/// Calls observed by [`FakeKeys`].
#[derive(Debug, Clone, Default)]
pub struct Calls {
    pub setup_user: Vec<(UserId, String)>,
    pub setup_fs: Vec<UserId>,
    pub release_fs: Vec<UserId>,
    pub encrypt: Vec<FsPath>,
    pub key_ops: Vec<&'static str>,
}

#[derive(Default)]
struct KeyState {
    users_with_keys: HashSet<UserId>,
    versions: HashMap<FsPath, u32>,
    failing_setup: HashSet<UserId>,
    failing_encrypt: HashSet<FsPath>,
    share_present: bool,
    master_present: bool,
    can_create: bool,
    master_validation_errors: bool,
    calls: Calls,
}

/// Key manager, user setup and encryptor in one, keeping state in memory.
pub struct FakeKeys {
    state: Mutex<KeyState>,
}

impl FakeKeys {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(KeyState {
                can_create: true,
                master_validation_errors: true,
                ..KeyState::default()
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut KeyState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Calls {
        self.with(|s| s.calls.clone())
    }

    pub fn give_keys(&self, user: &UserId) {
        self.with(|s| s.users_with_keys.insert(user.clone()));
    }

    pub fn set_version(&self, path: &FsPath, version: u32) {
        self.with(|s| s.versions.insert(path.clone(), version));
    }

    pub fn version_of(&self, path: &FsPath) -> u32 {
        self.with(|s| s.versions.get(path).copied().unwrap_or(0))
    }

    pub fn fail_setup_for(&self, user: &UserId) {
        self.with(|s| s.failing_setup.insert(user.clone()));
    }

    pub fn fail_encrypt_for(&self, path: &FsPath) {
        self.with(|s| s.failing_encrypt.insert(path.clone()));
    }

    /// Initial system key presence and whether validation creates missing keys.
    pub fn set_system_keys(&self, share: bool, master: bool, can_create: bool) {
        self.with(|s| {
            s.share_present = share;
            s.master_present = master;
            s.can_create = can_create;
        });
    }

    /// Let master validation succeed even when the master key is absent.
    pub fn disable_master_validation_error(&self) {
        self.with(|s| s.master_validation_errors = false);
    }
}

#[async_trait]
impl KeyManager for FakeKeys {
    async fn user_has_keys(&self, user: &UserId) -> Result<bool> {
        Ok(self.with(|s| s.users_with_keys.contains(user)))
    }

    async fn version(&self, path: &FsPath) -> Result<u32> {
        Ok(self.version_of(path))
    }

    async fn has_public_master_key(&self) -> Result<bool> {
        Ok(self.with(|s| s.master_present))
    }

    async fn has_public_share_key(&self) -> Result<bool> {
        Ok(self.with(|s| s.share_present))
    }

    async fn validate_master_key(&self) -> Result<()> {
        self.with(|s| {
            s.calls.key_ops.push("validate_master_key");
            if s.can_create {
                s.master_present = true;
            }
            if !s.master_present && s.master_validation_errors {
                return Err(Error::MasterKey("no master key".into()));
            }
            Ok(())
        })
    }

    async fn validate_share_key(&self) -> Result<()> {
        self.with(|s| {
            s.calls.key_ops.push("validate_share_key");
            if s.can_create {
                s.share_present = true;
            }
        });
        Ok(())
    }

    async fn set_public_share_key_id_and_master_key_id(&self) -> Result<()> {
        self.with(|s| s.calls.key_ops.push("set_ids"));
        Ok(())
    }
}

#[async_trait]
impl UserSetup for FakeKeys {
    async fn setup_user(&self, user: &UserId, password: &OneTimePassword) -> Result<()> {
        self.with(|s| {
            s.calls
                .setup_user
                .push((user.clone(), password.expose().to_string()));
            if s.failing_setup.contains(user) {
                return Err(Error::UserSetup(format!("cannot create keys for {}", user)));
            }
            s.users_with_keys.insert(user.clone());
            Ok(())
        })
    }

    async fn setup_user_filesystem(&self, user: &UserId) -> Result<()> {
        self.with(|s| s.calls.setup_fs.push(user.clone()));
        Ok(())
    }

    async fn release_user_filesystem(&self, user: &UserId) -> Result<()> {
        self.with(|s| s.calls.release_fs.push(user.clone()));
        Ok(())
    }
}

#[async_trait]
impl FileEncryptor for FakeKeys {
    async fn encrypt_file(&self, path: &FsPath) -> Result<()> {
        self.with(|s| {
            s.calls.encrypt.push(path.clone());
            if s.failing_encrypt.contains(path) {
                return Err(Error::Crypto(format!("cannot encrypt {}", path)));
            }
            s.versions.insert(path.clone(), 1);
            Ok(())
        })
    }
}

/// Random source always producing the same string.
pub struct FixedRandom(String);

impl FixedRandom {
    pub fn new(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl RandomGenerator for FixedRandom {
    fn generate(&self, length: usize) -> String {
        self.0.chars().cycle().take(length).collect()
    }
}

impl RandomSource for FixedRandom {
    fn medium_strength(&self) -> Option<&dyn RandomGenerator> {
        Some(self)
    }

    fn low_strength(&self) -> &dyn RandomGenerator {
        self
    }
}

#[derive(Default)]
struct ConsoleLog {
    lines: Vec<String>,
    tables: Vec<Vec<Vec<String>>>,
    questions: Vec<String>,
    totals: Vec<u64>,
    advanced: u64,
    finished: bool,
}

/// Console recording everything and answering questions with a fixed answer.
pub struct RecordingConsole {
    answer: bool,
    log: Mutex<ConsoleLog>,
}

impl RecordingConsole {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            log: Mutex::new(ConsoleLog::default()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.log.lock().unwrap().lines.clone()
    }

    pub fn tables(&self) -> Vec<Vec<Vec<String>>> {
        self.log.lock().unwrap().tables.clone()
    }

    pub fn questions(&self) -> Vec<String> {
        self.log.lock().unwrap().questions.clone()
    }

    /// Every total the progress indicator was given, in order.
    pub fn totals(&self) -> Vec<u64> {
        self.log.lock().unwrap().totals.clone()
    }

    pub fn advanced(&self) -> u64 {
        self.log.lock().unwrap().advanced
    }

    pub fn finished(&self) -> bool {
        self.log.lock().unwrap().finished
    }
}

impl Console for RecordingConsole {
    fn line(&self, text: &str) {
        self.log.lock().unwrap().lines.push(text.to_string());
    }

    fn table(&self, _headers: &[&str], rows: &[Vec<String>]) {
        self.log.lock().unwrap().tables.push(rows.to_vec());
    }

    fn confirm(&self, question: &str) -> bool {
        self.log.lock().unwrap().questions.push(question.to_string());
        self.answer
    }

    fn progress_start(&self, total: u64) {
        self.log.lock().unwrap().totals.push(total);
    }

    fn progress_set_total(&self, total: u64) {
        self.log.lock().unwrap().totals.push(total);
    }

    fn progress_advance(&self, step: u64) {
        self.log.lock().unwrap().advanced += step;
    }

    fn progress_finish(&self) {
        self.log.lock().unwrap().finished = true;
    }
}

/// Notifier recording sent messages, optionally failing every send.
pub struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<(UserId, String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self {
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(UserId, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_credentials(
        &self,
        user: &UserId,
        address: &str,
        password: &OneTimePassword,
    ) -> Result<()> {
        if self.fail {
            return Err(Error::Notification("smtp unreachable".into()));
        }
        self.sent.lock().unwrap().push((
            user.clone(),
            address.to_string(),
            password.expose().to_string(),
        ));
        Ok(())
    }
}
