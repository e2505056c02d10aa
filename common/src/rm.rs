use anyhow::Context;
use async_recursion::async_recursion;
use tracing::instrument;

/// Error type for cleanup operations that preserves the removal summary.
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

#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub fail_early: bool,
}

#[derive(Copy, Clone, Debug, Default)]
pub struct Summary {
    pub files_removed: usize,
    pub directories_removed: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_removed: self.files_removed + other.files_removed,
            directories_removed: self.directories_removed + other.directories_removed,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files removed: {}\n\
            directories removed: {}",
            self.files_removed, self.directories_removed,
        )
    }
}

/// Recursively remove everything remaining under `path`.
///
/// After a move the source tree is mostly empty directory shells, but any
/// leftover entries are deleted as well. A path that no longer exists is
/// success, not failure; each leaf may already have been consumed by the
/// transfer or removed out-of-band.
#[instrument]
#[async_recursion]
pub async fn rm(path: &std::path::Path, settings: &Settings) -> Result<Summary, Error> {
    tracing::debug!("remove: {:?}", path);
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        // already gone, nothing to do
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Summary::default());
        }
        Err(error) => {
            return Err(Error::new(
                anyhow::Error::new(error)
                    .context(format!("failed reading metadata from {:?}", &path)),
                Summary::default(),
            ));
        }
    };
    if !metadata.is_dir() {
        return match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(Summary {
                files_removed: 1,
                ..Default::default()
            }),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Summary::default()),
            Err(error) => Err(Error::new(
                anyhow::Error::new(error).context(format!("failed removing {:?}", &path)),
                Summary::default(),
            )),
        };
    }
    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Summary::default());
        }
        Err(error) => {
            return Err(Error::new(
                anyhow::Error::new(error)
                    .context(format!("cannot open directory {:?} for reading", &path)),
                Summary::default(),
            ));
        }
    };
    let mut summary = Summary::default();
    let mut failure: Option<anyhow::Error> = None;
    let mut join_set = tokio::task::JoinSet::new();
    loop {
        let entry = match entries
            .next_entry()
            .await
            .with_context(|| format!("failed traversing directory {:?}", &path))
        {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                failure = Some(error);
                break;
            }
        };
        let entry_path = entry.path();
        let settings = *settings;
        let do_rm = || async move { rm(&entry_path, &settings).await };
        join_set.spawn(do_rm());
    }
    while let Some(res) = join_set.join_next().await {
        match res {
            Ok(Ok(entry_summary)) => summary = summary + entry_summary,
            Ok(Err(error)) => {
                summary = summary + error.summary;
                if failure.is_none() {
                    failure = Some(error.source);
                }
                if settings.fail_early {
                    join_set.abort_all();
                }
            }
            Err(error) => {
                // aborted siblings are not failures of their own
                if !error.is_cancelled() && failure.is_none() {
                    failure = Some(error.into());
                }
            }
        }
    }
    if let Some(source) = failure {
        tracing::debug!("remove: {:?} failed with: {:#}", path, &source);
        return Err(Error::new(source, summary));
    }
    match tokio::fs::remove_dir(path).await {
        Ok(()) => {
            summary.directories_removed += 1;
            Ok(summary)
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(summary),
        Err(error) => Err(Error::new(
            anyhow::Error::new(error).context(format!("failed removing directory {:?}", &path)),
            summary,
        )),
    }
}

#[cfg(test)]
mod rm_tests {
    use crate::testutils;
    use tracing_test::traced_test;

    use super::*;

    const SETTINGS: Settings = Settings { fail_early: false };

    #[tokio::test]
    #[traced_test]
    async fn check_basic_rm() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let foo_path = tmp_dir.join("foo");
        let summary = rm(&foo_path, &SETTINGS).await?;
        assert_eq!(summary.files_removed, 6);
        assert_eq!(summary.directories_removed, 3);
        assert!(!foo_path.exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_path_is_success() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let summary = rm(&tmp_dir.join("no-such-path"), &SETTINGS).await?;
        assert_eq!(summary.files_removed, 0);
        assert_eq!(summary.directories_removed, 0);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn removes_a_plain_file() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let file_path = tmp_dir.join("leftover.txt");
        tokio::fs::write(&file_path, "leftover").await?;
        let summary = rm(&file_path, &SETTINGS).await?;
        assert_eq!(summary.files_removed, 1);
        assert!(!file_path.exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn fail_early_cleanup_removes_everything() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::setup_test_dir().await?;
        let foo_path = tmp_dir.join("foo");
        let settings = Settings { fail_early: true };
        let summary = rm(&foo_path, &settings).await?;
        assert_eq!(summary.files_removed, 6);
        assert_eq!(summary.directories_removed, 3);
        assert!(!foo_path.exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn removes_empty_directory_shells() -> Result<(), anyhow::Error> {
        let tmp_dir = testutils::create_temp_dir().await?;
        let root = tmp_dir.join("shells");
        tokio::fs::create_dir_all(root.join("a").join("b").join("c")).await?;
        let summary = rm(&root, &SETTINGS).await?;
        assert_eq!(summary.files_removed, 0);
        assert_eq!(summary.directories_removed, 4);
        assert!(!root.exists());
        Ok(())
    }
}
