use anyhow::{Context, anyhow};
use tracing::instrument;

use crate::rm;
use crate::rm::{Settings as RmSettings, Summary as RmSummary};

/// Error type for transfer operations that preserves the operation summary
/// accumulated before the failure.
///
/// The Display implementation shows the full error chain, so it can be logged
/// with any format specifier (`{}`, `{:#}`, `{:?}`).
#[derive(Debug, thiserror::Error)]
#[error("{source:#}")]
pub struct Error {
    #[source]
    pub source: anyhow::Error,
    pub summary: Summary,
}

impl Error {
    #[must_use]
    pub fn new(source: anyhow::Error, summary: Summary) -> Self {
        Error { source, summary }
    }
}

/// Whether source entries are relocated or duplicated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Relocate entries and remove the emptied source trees afterward
    Move,
    /// Duplicate entries, leaving the source trees untouched
    Copy,
}

#[derive(Debug, Copy, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub fail_early: bool,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Summary {
    pub bytes_transferred: u64,
    pub files_transferred: usize,
    pub directories_created: usize,
    pub sources_vanished: usize,
    pub rm_summary: RmSummary,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_transferred: self.bytes_transferred + other.bytes_transferred,
            files_transferred: self.files_transferred + other.files_transferred,
            directories_created: self.directories_created + other.directories_created,
            sources_vanished: self.sources_vanished + other.sources_vanished,
            rm_summary: self.rm_summary + other.rm_summary,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes transferred: {}\n\
            files transferred: {}\n\
            directories created: {}\n\
            sources vanished: {}\n\
            {}",
            bytesize::ByteSize(self.bytes_transferred),
            self.files_transferred,
            self.directories_created,
            self.sources_vanished,
            &self.rm_summary,
        )
    }
}

/// Transfer a single leaf (non-directory) entry.
///
/// A source that disappears before or during the transfer is not an error,
/// the entry may have been consumed by a concurrent move or removed
/// out-of-band; such transfers are counted in `sources_vanished`.
#[instrument]
pub async fn transfer_leaf(
    src: &std::path::Path,
    dst: &std::path::Path,
    settings: &Settings,
) -> Result<Summary, Error> {
    let src_metadata = match tokio::fs::symlink_metadata(src).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("source {:?} already gone, nothing to do", src);
            return Ok(Summary {
                sources_vanished: 1,
                ..Default::default()
            });
        }
        Err(error) => {
            return Err(Error::new(
                anyhow::Error::new(error)
                    .context(format!("failed reading metadata from {:?}", &src)),
                Summary::default(),
            ));
        }
    };
    let result = match settings.mode {
        Mode::Copy => tokio::fs::copy(src, dst).await.map(|_| ()),
        Mode::Move => match tokio::fs::rename(src, dst).await {
            // rename cannot cross filesystems, fall back to copy + unlink
            Err(error) if error.kind() == std::io::ErrorKind::CrossesDevices => {
                match tokio::fs::copy(src, dst).await {
                    Ok(_) => tokio::fs::remove_file(src).await,
                    Err(error) => Err(error),
                }
            }
            other => other,
        },
    };
    match result {
        Ok(()) => Ok(Summary {
            bytes_transferred: src_metadata.len(),
            files_transferred: 1,
            ..Default::default()
        }),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("source {:?} vanished mid-transfer", src);
            Ok(Summary {
                sources_vanished: 1,
                ..Default::default()
            })
        }
        Err(error) => Err(Error::new(
            anyhow::Error::new(error)
                .context(format!("failed transferring {:?} to {:?}", &src, &dst)),
            Summary::default(),
        )),
    }
}

/// Mirror one source root into `dest_root`, dispatching every leaf through
/// the limiter.
///
/// The walk is driven by an explicit stack of pending directories so that
/// pathologically deep trees cannot exhaust the call stack. Every mirrored
/// directory is created before any of its children is dispatched, and all
/// outstanding transfer workers are joined before this function returns.
#[instrument(skip(limiter))]
pub async fn transfer(
    src: &std::path::Path,
    dest_root: &std::path::Path,
    settings: &Settings,
    limiter: &limiter::Limiter,
) -> Result<Summary, Error> {
    let src_metadata = match tokio::fs::symlink_metadata(src).await {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("source root {:?} does not exist, nothing to do", src);
            return Ok(Summary {
                sources_vanished: 1,
                ..Default::default()
            });
        }
        Err(error) => {
            return Err(Error::new(
                anyhow::Error::new(error)
                    .context(format!("failed reading metadata from {:?}", &src)),
                Summary::default(),
            ));
        }
    };
    if !src_metadata.is_dir() {
        // a root that is itself a leaf lands directly under the destination
        let file_name = src.file_name().ok_or_else(|| {
            Error::new(
                anyhow!("cannot determine file name of {:?}", src),
                Summary::default(),
            )
        })?;
        let leaf_src = src.to_path_buf();
        let leaf_dst = dest_root.join(file_name);
        let settings = *settings;
        let handle = limiter
            .submit(async move { transfer_leaf(&leaf_src, &leaf_dst, &settings).await })
            .await;
        return match handle.join().await {
            Ok(result) => result,
            Err(error) => Err(Error::new(error.into(), Summary::default())),
        };
    }
    let mut summary = Summary::default();
    let mut failure: Option<anyhow::Error> = None;
    let mut handles: std::collections::VecDeque<limiter::Handle<Result<Summary, Error>>> =
        std::collections::VecDeque::new();
    let mut pending = vec![(src.to_path_buf(), dest_root.to_path_buf())];
    'dirs: while let Some((src_dir, dst_dir)) = pending.pop() {
        match tokio::fs::create_dir(&dst_dir).await {
            Ok(()) => summary.directories_created += 1,
            // mirrored directories are created idempotently
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(error) => {
                tracing::error!("cannot create directory {:?}: {}", &dst_dir, &error);
                if failure.is_none() {
                    failure = Some(
                        anyhow::Error::new(error)
                            .context(format!("cannot create directory {:?}", &dst_dir)),
                    );
                }
                if settings.fail_early {
                    break 'dirs;
                }
                continue;
            }
        }
        let mut entries = match tokio::fs::read_dir(&src_dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                // directory consumed by a concurrent move
                summary.sources_vanished += 1;
                continue;
            }
            Err(error) => {
                tracing::error!("cannot open directory {:?}: {}", &src_dir, &error);
                if failure.is_none() {
                    failure = Some(anyhow::Error::new(error).context(format!(
                        "cannot open directory {:?} for reading",
                        &src_dir
                    )));
                }
                if settings.fail_early {
                    break 'dirs;
                }
                continue;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                    summary.sources_vanished += 1;
                    break;
                }
                Err(error) => {
                    tracing::error!("failed traversing {:?}: {}", &src_dir, &error);
                    if failure.is_none() {
                        failure = Some(
                            anyhow::Error::new(error)
                                .context(format!("failed traversing directory {:?}", &src_dir)),
                        );
                    }
                    if settings.fail_early {
                        break 'dirs;
                    }
                    break;
                }
            };
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                    // entry disappeared between listing and classification
                    summary.sources_vanished += 1;
                    continue;
                }
                Err(error) => {
                    tracing::error!("failed classifying {:?}: {}", entry.path(), &error);
                    if failure.is_none() {
                        failure = Some(
                            anyhow::Error::new(error)
                                .context(format!("failed classifying {:?}", entry.path())),
                        );
                    }
                    if settings.fail_early {
                        break 'dirs;
                    }
                    continue;
                }
            };
            if file_type.is_dir() {
                pending.push((entry.path(), dst_dir.join(entry.file_name())));
            } else {
                let leaf_src = entry.path();
                let leaf_dst = dst_dir.join(entry.file_name());
                let settings = *settings;
                match limiter
                    .submit(async move { transfer_leaf(&leaf_src, &leaf_dst, &settings).await })
                    .await
                {
                    // an inline result is final, fold it right away
                    limiter::Handle::Done(result) => {
                        note_leaf_result(Ok(result), &mut summary, &mut failure);
                    }
                    handle => {
                        handles.push_back(handle);
                        // at most `max_workers` transfers are in flight, so the
                        // oldest handle is reaped once the window fills
                        while handles.len() > limiter.max_workers() {
                            let Some(oldest) = handles.pop_front() else {
                                break;
                            };
                            note_leaf_result(oldest.join().await, &mut summary, &mut failure);
                        }
                    }
                }
                if failure.is_some() && settings.fail_early {
                    break 'dirs;
                }
            }
        }
    }
    for handle in handles {
        note_leaf_result(handle.join().await, &mut summary, &mut failure);
    }
    match failure {
        Some(source) => Err(Error::new(source, summary)),
        None => Ok(summary),
    }
}

fn note_leaf_result(
    result: Result<Result<Summary, Error>, tokio::task::JoinError>,
    summary: &mut Summary,
    failure: &mut Option<anyhow::Error>,
) {
    match result {
        Ok(Ok(leaf_summary)) => *summary = *summary + leaf_summary,
        Ok(Err(error)) => {
            tracing::error!("leaf transfer failed with: {:#}", &error);
            *summary = *summary + error.summary;
            if failure.is_none() {
                *failure = Some(error.source);
            }
        }
        Err(error) => {
            if failure.is_none() {
                *failure = Some(error.into());
            }
        }
    }
}

/// Transfer every root into `dest` in order, cleaning up moved roots
/// afterward.
///
/// Roots are independent and best-effort: a failing root is recorded and
/// subsequent roots still run (unless `fail_early` is set), but the combined
/// result is an error if any root failed. Cleanup only runs for a root whose
/// walk fully succeeded.
#[instrument(skip(limiter))]
pub async fn run_roots(
    roots: &[std::path::PathBuf],
    dest: &std::path::Path,
    settings: &Settings,
    limiter: &limiter::Limiter,
) -> Result<Summary, Error> {
    tokio::fs::create_dir_all(dest)
        .await
        .with_context(|| format!("cannot create destination directory {:?}", &dest))
        .map_err(|err| Error::new(err, Summary::default()))?;
    let mut summary = Summary::default();
    let mut failure: Option<anyhow::Error> = None;
    for root in roots {
        match transfer(root, dest, settings, limiter).await {
            Ok(root_summary) => {
                summary = summary + root_summary;
                if settings.mode == Mode::Move {
                    let rm_settings = RmSettings {
                        fail_early: settings.fail_early,
                    };
                    match rm::rm(root, &rm_settings).await {
                        Ok(rm_summary) => {
                            summary.rm_summary = summary.rm_summary + rm_summary;
                        }
                        Err(error) => {
                            tracing::error!("cleanup of {:?} failed with: {:#}", root, &error);
                            summary.rm_summary = summary.rm_summary + error.summary;
                            if failure.is_none() {
                                failure = Some(error.source);
                            }
                            if settings.fail_early {
                                break;
                            }
                        }
                    }
                }
            }
            Err(error) => {
                tracing::error!("transfer of {:?} failed with: {:#}", root, &error);
                summary = summary + error.summary;
                if failure.is_none() {
                    failure = Some(error.source);
                }
                if settings.fail_early {
                    break;
                }
            }
        }
    }
    tracing::debug!(
        "peak concurrent transfer workers: {} (bound: {})",
        limiter.peak_workers(),
        limiter.max_workers()
    );
    match failure {
        Some(source) => Err(Error::new(source, summary)),
        None => Ok(summary),
    }
}
