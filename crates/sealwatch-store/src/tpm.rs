//! TPM-sealed key store.
//!
//! Durable custody: each share is sealed individually under a TPM-resident
//! primary wrapping key and written to stable storage, so the bundle
//! survives reboots but can only be recovered on the same physical module.
//! Shares are sealed one object per share to stay within TPM sealed-data
//! size limits.
//!
//! The store drives the `tpm2-tools` binaries as subprocesses. Share bytes
//! only ever cross process boundaries over stdin/stdout pipes — never argv,
//! never temporary files. On-disk layout under an owner-only (`0700`)
//! directory:
//!
//! ```text
//! primary.ctx    — primary wrapping key context (created once, reused)
//! share_N.pub    — sealed-object public part,  N in 1..=3
//! share_N.priv   — sealed-object private part, N in 1..=3
//! share_N.ctx    — loaded-object context handle, N in 1..=3
//! ```
//!
//! Replacement bundles are staged under `*.new` names and only renamed
//! into place once every new object exists, so the previous bundle stays
//! recoverable if sealing fails partway through.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use zeroize::Zeroizing;

use crate::{KeyBundle, SecretStore, StoreError, UNSEAL_THRESHOLD};

const TOOL_CREATEPRIMARY: &str = "tpm2_createprimary";
const TOOL_CREATE: &str = "tpm2_create";
const TOOL_LOAD: &str = "tpm2_load";
const TOOL_UNSEAL: &str = "tpm2_unseal";

const PRIMARY_CTX: &str = "primary.ctx";

/// Bound on every `tpm2-tools` invocation.
const TOOL_TIMEOUT: Duration = Duration::from_secs(20);

/// Durable [`SecretStore`] sealing shares under a TPM primary key.
#[derive(Debug, Clone)]
pub struct TpmStore {
    state_dir: PathBuf,
    tool_dir: Option<PathBuf>,
}

/// On-disk objects for one sealed share.
struct ShareObjects {
    public: PathBuf,
    private: PathBuf,
    context: PathBuf,
}

fn share_objects(dir: &Path, index: usize) -> ShareObjects {
    ShareObjects {
        public: dir.join(format!("share_{index}.pub")),
        private: dir.join(format!("share_{index}.priv")),
        context: dir.join(format!("share_{index}.ctx")),
    }
}

/// Staging names for a share's replacement objects.
fn staged_objects(dir: &Path, index: usize) -> ShareObjects {
    ShareObjects {
        public: dir.join(format!("share_{index}.pub.new")),
        private: dir.join(format!("share_{index}.priv.new")),
        context: dir.join(format!("share_{index}.ctx.new")),
    }
}

impl TpmStore {
    /// Default stable-storage directory for sealed objects.
    pub const DEFAULT_STATE_DIR: &'static str = "/var/lib/sealwatch/tpm";

    /// External binaries this backend requires on `PATH`.
    pub const REQUIRED_TOOLS: [&'static str; 4] =
        [TOOL_CREATEPRIMARY, TOOL_CREATE, TOOL_LOAD, TOOL_UNSEAL];

    /// Create a store writing sealed objects under `state_dir`, resolving
    /// the `tpm2-tools` binaries from `PATH`.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            tool_dir: None,
        }
    }

    /// Create a store resolving the `tpm2-tools` binaries from a fixed
    /// directory instead of `PATH`. Used by tests to make tool resolution
    /// deterministic.
    #[must_use]
    pub fn with_tool_dir(state_dir: impl Into<PathBuf>, tool_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            tool_dir: Some(tool_dir.into()),
        }
    }

    fn tool_path(&self, tool: &str) -> PathBuf {
        match &self.tool_dir {
            Some(dir) => dir.join(tool),
            None => PathBuf::from(tool),
        }
    }

    fn primary_ctx(&self) -> PathBuf {
        self.state_dir.join(PRIMARY_CTX)
    }

    /// Run one `tpm2-tools` binary, optionally feeding `input` on stdin,
    /// returning its stdout. Bounded by [`TOOL_TIMEOUT`].
    async fn run_tool(
        &self,
        tool: &str,
        args: &[&std::ffi::OsStr],
        input: Option<&[u8]>,
    ) -> Result<Vec<u8>, StoreError> {
        let mut cmd = Command::new(self.tool_path(tool));
        cmd.args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| StoreError::BackendUnavailable {
            reason: format!("cannot run {tool}: {e}"),
        })?;

        if let Some(payload) = input {
            let mut stdin = child.stdin.take().ok_or_else(|| StoreError::BackendUnavailable {
                reason: format!("{tool}: stdin pipe missing"),
            })?;
            stdin
                .write_all(payload)
                .await
                .map_err(|e| StoreError::BackendUnavailable {
                    reason: format!("{tool}: cannot write stdin: {e}"),
                })?;
            stdin
                .shutdown()
                .await
                .map_err(|e| StoreError::BackendUnavailable {
                    reason: format!("{tool}: cannot close stdin: {e}"),
                })?;
        }

        let output = tokio::time::timeout(TOOL_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| StoreError::BackendUnavailable {
                reason: format!("{tool} timed out after {TOOL_TIMEOUT:?}"),
            })?
            .map_err(|e| StoreError::BackendUnavailable {
                reason: format!("{tool}: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StoreError::BackendUnavailable {
                reason: format!(
                    "{tool} exited with {}: {}",
                    output.status,
                    stderr.trim()
                ),
            });
        }

        Ok(output.stdout)
    }

    /// Create the state directory with owner-only permissions.
    async fn ensure_state_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| StoreError::BackendUnavailable {
                reason: format!(
                    "cannot create state dir {}: {e}",
                    self.state_dir.display()
                ),
            })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&self.state_dir, std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(|e| StoreError::BackendUnavailable {
                    reason: format!(
                        "cannot restrict state dir {}: {e}",
                        self.state_dir.display()
                    ),
                })?;
        }
        Ok(())
    }

    /// Create the primary wrapping key context if it does not exist yet.
    async fn ensure_primary(&self) -> Result<(), StoreError> {
        let primary = self.primary_ctx();
        if Self::path_exists(&primary).await? {
            return Ok(());
        }
        tracing::debug!(path = %primary.display(), "creating TPM primary wrapping key");
        self.run_tool(
            TOOL_CREATEPRIMARY,
            &[
                "-C".as_ref(),
                "o".as_ref(),
                "-G".as_ref(),
                "ecc".as_ref(),
                "-c".as_ref(),
                primary.as_os_str(),
            ],
            None,
        )
        .await?;
        Ok(())
    }

    async fn path_exists(path: &Path) -> Result<bool, StoreError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|e| StoreError::BackendUnavailable {
                reason: format!("cannot probe {}: {e}", path.display()),
            })
    }

    async fn rename(from: &Path, to: &Path) -> Result<(), StoreError> {
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| StoreError::BackendUnavailable {
                reason: format!("cannot move {} into place: {e}", from.display()),
            })
    }

    /// Overwrite a file with zeros and delete it. Returns whether a file
    /// was actually removed.
    async fn wipe_file(path: &Path) -> Result<bool, StoreError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(StoreError::BackendUnavailable {
                    reason: format!("cannot stat {}: {e}", path.display()),
                });
            }
        };
        #[allow(clippy::cast_possible_truncation)]
        let len = meta.len() as usize;
        tokio::fs::write(path, vec![0u8; len])
            .await
            .map_err(|e| StoreError::BackendUnavailable {
                reason: format!("cannot overwrite {}: {e}", path.display()),
            })?;
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| StoreError::BackendUnavailable {
                reason: format!("cannot remove {}: {e}", path.display()),
            })?;
        Ok(true)
    }

    /// Every file this store may have written, primary first. Covers
    /// staged names too, so erasure catches leftovers of a failed store.
    fn managed_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.primary_ctx()];
        for index in 1..=UNSEAL_THRESHOLD {
            for objects in [
                share_objects(&self.state_dir, index),
                staged_objects(&self.state_dir, index),
            ] {
                files.push(objects.public);
                files.push(objects.private);
                files.push(objects.context);
            }
        }
        files
    }
}

#[async_trait::async_trait]
impl SecretStore for TpmStore {
    async fn store(&self, bundle: &KeyBundle) -> Result<(), StoreError> {
        self.ensure_state_dir().await?;
        self.ensure_primary().await?;
        let primary = self.primary_ctx();

        // Seal the replacement bundle under staged names first. The
        // previous bundle stays on disk untouched, so a failure here
        // leaves it fully recoverable.
        for (i, share) in bundle.iter().enumerate() {
            let index = i + 1;
            let staged = staged_objects(&self.state_dir, index);
            Self::wipe_file(&staged.public).await?;
            Self::wipe_file(&staged.private).await?;
            Self::wipe_file(&staged.context).await?;
            self.run_tool(
                TOOL_CREATE,
                &[
                    "-C".as_ref(),
                    primary.as_os_str(),
                    "-i".as_ref(),
                    "-".as_ref(),
                    "-u".as_ref(),
                    staged.public.as_os_str(),
                    "-r".as_ref(),
                    staged.private.as_os_str(),
                ],
                Some(share.as_bytes()),
            )
            .await?;
            self.run_tool(
                TOOL_LOAD,
                &[
                    "-C".as_ref(),
                    primary.as_os_str(),
                    "-u".as_ref(),
                    staged.public.as_os_str(),
                    "-r".as_ref(),
                    staged.private.as_os_str(),
                    "-c".as_ref(),
                    staged.context.as_os_str(),
                ],
                None,
            )
            .await?;
            tracing::debug!(share = index, "sealed share under TPM primary key");
        }

        // Every new object exists; retire the old bundle and move the
        // replacements into place. The primary is kept so
        // re-initialization reuses the same wrapping key.
        for index in 1..=UNSEAL_THRESHOLD {
            let staged = staged_objects(&self.state_dir, index);
            let objects = share_objects(&self.state_dir, index);
            Self::wipe_file(&objects.public).await?;
            Self::wipe_file(&objects.private).await?;
            Self::wipe_file(&objects.context).await?;
            Self::rename(&staged.public, &objects.public).await?;
            Self::rename(&staged.private, &objects.private).await?;
            Self::rename(&staged.context, &objects.context).await?;
        }

        Ok(())
    }

    async fn retrieve(&self) -> Result<KeyBundle, StoreError> {
        let present: Vec<ShareObjects> = (1..=UNSEAL_THRESHOLD)
            .map(|index| share_objects(&self.state_dir, index))
            .collect();
        let mut existing = 0;
        for objects in &present {
            if Self::path_exists(&objects.context).await? {
                existing += 1;
            }
        }
        if existing == 0 {
            return Err(StoreError::NotFound);
        }
        if existing < UNSEAL_THRESHOLD {
            return Err(StoreError::Corrupt {
                reason: format!(
                    "expected {UNSEAL_THRESHOLD} sealed shares, found {existing}"
                ),
            });
        }

        let mut shares: Vec<String> = Vec::with_capacity(UNSEAL_THRESHOLD);
        for (i, objects) in present.iter().enumerate() {
            let raw = Zeroizing::new(
                self.run_tool(TOOL_UNSEAL, &["-c".as_ref(), objects.context.as_os_str()], None)
                    .await?,
            );
            let share = String::from_utf8(raw.to_vec()).map_err(|_| StoreError::Corrupt {
                reason: format!("share {} is not valid UTF-8", i + 1),
            })?;
            if share.is_empty() {
                return Err(StoreError::Corrupt {
                    reason: format!("share {} unsealed to an empty value", i + 1),
                });
            }
            shares.push(share);
        }

        let shares: [String; UNSEAL_THRESHOLD] =
            shares.try_into().map_err(|_| StoreError::Corrupt {
                reason: "unexpected share count after unseal".to_owned(),
            })?;
        Ok(KeyBundle::new(shares))
    }

    async fn exists(&self) -> Result<bool, StoreError> {
        for index in 1..=UNSEAL_THRESHOLD {
            let objects = share_objects(&self.state_dir, index);
            if !Self::path_exists(&objects.context).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let mut removed = 0;
        for path in self.managed_files() {
            if Self::wipe_file(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
