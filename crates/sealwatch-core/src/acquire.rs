//! Key acquirer — obtains the raw unseal key material once, at startup.
//!
//! Two sources: the full historical log of the one-time initialization
//! container (labeled `Unseal Key N:` lines), or an interactive operator
//! prompt with input echo suppressed. Either way the bundle is validated
//! here, at the boundary where it is produced — consumers never re-check.

use sealwatch_store::{KeyBundle, UNSEAL_THRESHOLD};
use tokio::task;
use zeroize::Zeroizing;

use crate::error::AcquireError;
use crate::runtime::ContainerRuntime;

/// Label prefix of a key line in the initialization output.
const KEY_LABEL: &str = "Unseal Key";

/// Scrape the unseal keys from a container's initialization log.
///
/// # Errors
///
/// - [`AcquireError::SourceUnavailable`] if the container does not exist
///   or its log cannot be read.
/// - [`AcquireError::IncompleteKeySet`] if fewer than
///   [`UNSEAL_THRESHOLD`] labeled key lines are found.
pub async fn from_init_log(
    runtime: &ContainerRuntime,
    container: &str,
) -> Result<KeyBundle, AcquireError> {
    let exists = runtime
        .container_exists(container)
        .await
        .map_err(|e| AcquireError::SourceUnavailable {
            reason: e.to_string(),
        })?;
    if !exists {
        return Err(AcquireError::SourceUnavailable {
            reason: format!("container '{container}' does not exist"),
        });
    }

    let log = Zeroizing::new(runtime.logs(container).await.map_err(|e| {
        AcquireError::SourceUnavailable {
            reason: e.to_string(),
        }
    })?);

    parse_init_log(&log)
}

/// Prompt the operator for the unseal keys, echo suppressed.
///
/// Blocks on input indefinitely — acceptable because acquisition runs
/// exactly once at startup, never inside the monitor loop. Entered values
/// are never logged.
///
/// # Errors
///
/// - [`AcquireError::EmptyInput`] if any entry is blank.
/// - [`AcquireError::Prompt`] if the terminal prompt itself fails.
pub async fn from_prompt() -> Result<KeyBundle, AcquireError> {
    task::spawn_blocking(|| {
        let mut shares: Vec<String> = Vec::with_capacity(UNSEAL_THRESHOLD);
        for index in 1..=UNSEAL_THRESHOLD {
            let entry = Zeroizing::new(
                rpassword::prompt_password(format!("Unseal key {index}: ")).map_err(|e| {
                    AcquireError::Prompt {
                        reason: e.to_string(),
                    }
                })?,
            );
            let trimmed = entry.trim();
            if trimmed.is_empty() {
                return Err(AcquireError::EmptyInput { index });
            }
            shares.push(trimmed.to_owned());
        }
        let shares: [String; UNSEAL_THRESHOLD] =
            shares
                .try_into()
                .map_err(|_| AcquireError::Prompt {
                    reason: "unexpected share count".to_owned(),
                })?;
        Ok(KeyBundle::new(shares))
    })
    .await
    .map_err(|e| AcquireError::Prompt {
        reason: format!("prompt task failed: {e}"),
    })?
}

/// Extract the labeled key lines from initialization output.
///
/// Looks for `Unseal Key N: <value>` with N in `1..=3`, tolerating
/// arbitrary surrounding log noise. Keys must appear with their own index
/// label — ordering in the log is irrelevant.
fn parse_init_log(log: &str) -> Result<KeyBundle, AcquireError> {
    let mut found: [Option<String>; UNSEAL_THRESHOLD] = [const { None }; UNSEAL_THRESHOLD];

    for line in log.lines() {
        let Some(rest) = line.trim_start().strip_prefix(KEY_LABEL) else {
            continue;
        };
        let Some((label_index, value)) = rest.split_once(':') else {
            continue;
        };
        let Ok(index) = label_index.trim().parse::<usize>() else {
            continue;
        };
        if !(1..=UNSEAL_THRESHOLD).contains(&index) {
            continue;
        }
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        // First occurrence wins; init output prints each key once.
        if found[index - 1].is_none() {
            found[index - 1] = Some(value.to_owned());
        }
    }

    let count = found.iter().filter(|s| s.is_some()).count();
    if count < UNSEAL_THRESHOLD {
        return Err(AcquireError::IncompleteKeySet {
            found: count,
            need: UNSEAL_THRESHOLD,
        });
    }

    let shares: [String; UNSEAL_THRESHOLD] = found.map(|s| s.unwrap_or_default());
    Ok(KeyBundle::new(shares))
}
