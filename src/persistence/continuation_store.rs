//! Continuation token store.
//!
//! Maps each conversation key to the opaque continuation token returned by
//! the worker, so the next task in the same channel resumes the same worker
//! session. Also keeps the per-conversation flags that must survive restarts:
//! verbosity, pending fork sources, and working directories.
//!
//! Two snapshot files live in the state directory:
//!
//! | File                 | Content                                      |
//! |----------------------|----------------------------------------------|
//! | `sessions.json`      | `{ "<conversation>": "<token>", … }`         |
//! | `conversations.json` | `verbose`, `pending_forks`, `workdirs`       |
//!
//! Every mutation rewrites the affected snapshot before returning, so a
//! crash loses at most the token of the invocation in flight.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::persistence::snapshot::{read_snapshot, write_snapshot};
use crate::Result;

const TOKENS_FILE: &str = "sessions.json";
const FLAGS_FILE: &str = "conversations.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
struct ConversationFlags {
    #[serde(default)]
    verbose: BTreeSet<String>,
    #[serde(default)]
    pending_forks: BTreeMap<String, String>,
    #[serde(default)]
    workdirs: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Default)]
struct StoreState {
    tokens: BTreeMap<String, String>,
    flags: ConversationFlags,
}

/// Durable per-conversation continuation state.
#[derive(Debug)]
pub struct ContinuationStore {
    tokens_path: PathBuf,
    flags_path: PathBuf,
    state: Mutex<StoreState>,
}

impl ContinuationStore {
    /// Load the store from `dir`, creating an empty one if no snapshot exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if an existing snapshot cannot be parsed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let tokens_path = dir.join(TOKENS_FILE);
        let flags_path = dir.join(FLAGS_FILE);

        let tokens: BTreeMap<String, String> = read_snapshot(&tokens_path)?;
        let flags: ConversationFlags = read_snapshot(&flags_path)?;

        info!(
            conversations = tokens.len(),
            dir = %dir.display(),
            "continuation store loaded"
        );

        Ok(Self {
            tokens_path,
            flags_path,
            state: Mutex::new(StoreState { tokens, flags }),
        })
    }

    /// Current continuation token for `key`.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.state.lock().await.tokens.get(key).cloned()
    }

    /// Record the continuation token for `key`.
    ///
    /// Writing the token already stored is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the snapshot cannot be written.
    pub async fn set(&self, key: &str, token: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.tokens.get(key).map(String::as_str) == Some(token) {
            return Ok(());
        }
        state.tokens.insert(key.to_owned(), token.to_owned());
        write_snapshot(&self.tokens_path, &state.tokens)?;
        debug!(conversation = key, "continuation token stored");
        Ok(())
    }

    /// Drop the token for `key`; the next task starts a fresh conversation.
    ///
    /// Returns whether a token was present.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the snapshot cannot be written.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let removed = state.tokens.remove(key).is_some();
        let fork_removed = state.flags.pending_forks.remove(key).is_some();
        if removed {
            write_snapshot(&self.tokens_path, &state.tokens)?;
        }
        if fork_removed {
            write_snapshot(&self.flags_path, &state.flags)?;
        }
        info!(conversation = key, removed, "continuation reset");
        Ok(removed)
    }

    /// Read the token of `source` for starting a forked conversation.
    ///
    /// The source is left untouched; the caller hands the token to the new
    /// conversation via [`set_pending_fork`](Self::set_pending_fork).
    pub async fn fork(&self, source: &str) -> Option<String> {
        self.get(source).await
    }

    /// Make the first invocation of `key` fork from `source_token`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the snapshot cannot be written.
    pub async fn set_pending_fork(&self, key: &str, source_token: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .flags
            .pending_forks
            .insert(key.to_owned(), source_token.to_owned());
        write_snapshot(&self.flags_path, &state.flags)
    }

    /// Fork source for `key`, if its first invocation has not run yet.
    pub async fn pending_fork(&self, key: &str) -> Option<String> {
        self.state.lock().await.flags.pending_forks.get(key).cloned()
    }

    /// Consume the pending fork source for `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the snapshot cannot be written.
    pub async fn clear_pending_fork(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.flags.pending_forks.remove(key).is_some() {
            write_snapshot(&self.flags_path, &state.flags)?;
        }
        Ok(())
    }

    /// Whether `key` shows thinking and successful tool results.
    pub async fn is_verbose(&self, key: &str) -> bool {
        self.state.lock().await.flags.verbose.contains(key)
    }

    /// Flip the verbosity flag for `key`, returning the new value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the snapshot cannot be written.
    pub async fn toggle_verbose(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let enabled = if state.flags.verbose.remove(key) {
            false
        } else {
            state.flags.verbose.insert(key.to_owned());
            true
        };
        write_snapshot(&self.flags_path, &state.flags)?;
        Ok(enabled)
    }

    /// Working directory assigned to `key`, if any.
    pub async fn workdir(&self, key: &str) -> Option<PathBuf> {
        self.state.lock().await.flags.workdirs.get(key).cloned()
    }

    /// Assign a working directory to `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the snapshot cannot be written.
    pub async fn set_workdir(&self, key: &str, workdir: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .flags
            .workdirs
            .insert(key.to_owned(), workdir.to_path_buf());
        write_snapshot(&self.flags_path, &state.flags)
    }

    /// Remove everything known about `key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if a snapshot cannot be written.
    pub async fn forget(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.tokens.remove(key).is_some() {
            write_snapshot(&self.tokens_path, &state.tokens)?;
        }
        let flags = &mut state.flags;
        let had_flags = flags.verbose.remove(key)
            | flags.pending_forks.remove(key).is_some()
            | flags.workdirs.remove(key).is_some();
        if had_flags {
            write_snapshot(&self.flags_path, &state.flags)?;
        }
        info!(conversation = key, "conversation forgotten");
        Ok(())
    }
}
