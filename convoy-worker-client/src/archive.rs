//! Job artifact archives
//!
//! A remote job start ships a tar.gz of the job's artifacts (scripts, config
//! files) to the worker. The directory-based provider collects them from a
//! jobs directory laid out as one subdirectory per job, with optional
//! per-environment subdirectories:
//!
//! ```text
//! jobs/
//!   import/
//!     run.sh
//!     develop/
//!       dev.config
//!     live/
//!       live.config
//! ```
//!
//! A job name may carry an environment postfix after its last `_`. Archiving
//! `import_develop` from the tree above yields `run.sh` and `dev.config`;
//! archiving plain `import` yields only `run.sh`. All entries are flat and
//! executable.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use convoy_core::dto::RemoteJob;

const ARCHIVE_ENTRY_MODE: u32 = 0o755;

/// Supplies the artifact archive shipped with a remote job start
pub trait ArchiveProvider: Send + Sync {
    /// Builds the tar.gz archive for the given remote job.
    fn create_archive(&self, job: &RemoteJob) -> io::Result<Vec<u8>>;
}

/// Archive provider backed by a jobs directory on the local filesystem
pub struct DirectoryArchiveProvider {
    directory: PathBuf,
}

impl DirectoryArchiveProvider {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Job directory with any environment postfix stripped off the name.
    fn job_directory(&self, job_name: &str) -> PathBuf {
        self.directory.join(base_name(job_name))
    }

    /// Environment subdirectory selected by the postfix after the last `_`.
    fn environment_directory(&self, job_name: &str) -> Option<PathBuf> {
        environment(job_name).map(|env| self.job_directory(job_name).join(env))
    }
}

impl ArchiveProvider for DirectoryArchiveProvider {
    fn create_archive(&self, job: &RemoteJob) -> io::Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        append_directory_files(&mut builder, &self.job_directory(&job.name))?;
        if let Some(environment_dir) = self.environment_directory(&job.name) {
            append_directory_files(&mut builder, &environment_dir)?;
        }

        builder.into_inner()?.finish()
    }
}

/// Appends every regular file of `directory` as a flat, executable entry.
/// A missing directory is skipped so jobs without artifacts still start.
fn append_directory_files<W: io::Write>(
    builder: &mut tar::Builder<W>,
    directory: &Path,
) -> io::Result<()> {
    if !directory.is_dir() {
        info!("job artifact directory {} not found, skipping", directory.display());
        return Ok(());
    }

    let mut paths: Vec<PathBuf> = directory
        .read_dir()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort();

    for path in paths {
        let file_name = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };
        let mut file = File::open(&path)?;
        let metadata = file.metadata()?;

        let mut header = tar::Header::new_gnu();
        header.set_size(metadata.len());
        header.set_mode(ARCHIVE_ENTRY_MODE);
        header.set_cksum();
        builder.append_data(&mut header, file_name, &mut file)?;
    }

    Ok(())
}

fn base_name(job_name: &str) -> &str {
    match job_name.rsplit_once('_') {
        Some((base, _)) => base,
        None => job_name,
    }
}

fn environment(job_name: &str) -> Option<&str> {
    job_name.rsplit_once('_').map(|(_, env)| env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::collections::HashMap;
    use std::fs;
    use std::io::Read;
    use uuid::Uuid;

    fn entries(archive: &[u8]) -> Vec<(String, u32, String)> {
        let mut tar = tar::Archive::new(GzDecoder::new(archive));
        tar.entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = entry.path().unwrap().to_string_lossy().into_owned();
                let mode = entry.header().mode().unwrap();
                let mut content = String::new();
                entry.read_to_string(&mut content).unwrap();
                (name, mode, content)
            })
            .collect()
    }

    fn remote_job(name: &str) -> RemoteJob {
        RemoteJob::new(name, Uuid::new_v4(), HashMap::new())
    }

    #[test]
    fn test_archive_without_environment_postfix() {
        let jobs_dir = tempfile::tempdir().unwrap();
        let job_dir = jobs_dir.path().join("import");
        fs::create_dir_all(job_dir.join("live")).unwrap();
        fs::write(job_dir.join("run.sh"), "echo run").unwrap();
        fs::write(job_dir.join("live").join("live.config"), "env=live").unwrap();

        let provider = DirectoryArchiveProvider::new(jobs_dir.path());
        let archive = provider.create_archive(&remote_job("import")).unwrap();

        let entries = entries(&archive);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "run.sh");
        assert_eq!(entries[0].1, ARCHIVE_ENTRY_MODE);
        assert_eq!(entries[0].2, "echo run");
    }

    #[test]
    fn test_archive_merges_environment_files() {
        let jobs_dir = tempfile::tempdir().unwrap();
        let job_dir = jobs_dir.path().join("import");
        fs::create_dir_all(job_dir.join("develop")).unwrap();
        fs::create_dir_all(job_dir.join("live")).unwrap();
        fs::write(job_dir.join("run.sh"), "echo run").unwrap();
        fs::write(job_dir.join("develop").join("dev.config"), "env=dev").unwrap();
        fs::write(job_dir.join("live").join("live.config"), "env=live").unwrap();

        let provider = DirectoryArchiveProvider::new(jobs_dir.path());
        let archive = provider.create_archive(&remote_job("import_develop")).unwrap();

        let entries = entries(&archive);
        let names: Vec<&str> = entries.iter().map(|(name, _, _)| name.as_str()).collect();
        assert_eq!(names, vec!["run.sh", "dev.config"]);
    }

    #[test]
    fn test_archive_of_missing_directory_is_empty() {
        let jobs_dir = tempfile::tempdir().unwrap();
        let provider = DirectoryArchiveProvider::new(jobs_dir.path());

        let archive = provider.create_archive(&remote_job("unknown")).unwrap();
        assert!(entries(&archive).is_empty());
    }

    #[test]
    fn test_name_splitting() {
        assert_eq!(base_name("import_develop"), "import");
        assert_eq!(environment("import_develop"), Some("develop"));
        assert_eq!(base_name("daily_feed_live"), "daily_feed");
        assert_eq!(environment("daily_feed_live"), Some("live"));
        assert_eq!(base_name("import"), "import");
        assert_eq!(environment("import"), None);
    }
}
