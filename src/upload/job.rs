//! Upload jobs: one per source file

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, UlNzbError, UploadError};

type Result<T> = std::result::Result<T, UlNzbError>;

/// What the user asked to upload
#[derive(Debug, Clone)]
pub enum UploadMode {
    /// Every visible regular file directly inside one directory
    Directory(PathBuf),
    /// An explicit list of files
    Files(Vec<PathBuf>),
}

/// Position of a file inside a directory upload, rendered into its subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryContext {
    pub name: String,
    pub ordinal: usize,
    pub total: usize,
}

impl DirectoryContext {
    pub fn prefix(&self) -> String {
        format!("{} [{}/{}] - ", self.name, self.ordinal, self.total)
    }
}

/// One source file and everything derived from it before chunking
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub path: PathBuf,
    pub basename: String,
    pub size: u64,
    pub article_size: u32,
    pub chunk_count: u32,
    /// CRC32 of the whole unencoded file
    pub crc32: u32,
    pub directory: Option<DirectoryContext>,
}

impl UploadJob {
    /// Stat the file and compute its CRC32; runs on the blocking pool
    pub async fn new(
        path: PathBuf,
        article_size: u32,
        directory: Option<DirectoryContext>,
    ) -> Result<Self> {
        let (size, crc32) = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || file_crc32(&path))
                .await
                .map_err(|e| UploadError::WorkerPanicked(e.to_string()))??
        };

        Self::with_checksum(path, size, crc32, article_size, directory)
    }

    /// Build a job from a known size and checksum
    pub fn with_checksum(
        path: PathBuf,
        size: u64,
        crc32: u32,
        article_size: u32,
        directory: Option<DirectoryContext>,
    ) -> Result<Self> {
        if article_size == 0 {
            return Err(ConfigError::Invalid {
                field: "article_size".to_string(),
                reason: "Must be at least 1 byte".to_string(),
            }
            .into());
        }

        let chunk_count = u32::try_from(size.div_ceil(article_size as u64).max(1)).map_err(|_| {
            ConfigError::Invalid {
                field: "article_size".to_string(),
                reason: format!("{} needs more than {} articles", path.display(), u32::MAX),
            }
        })?;

        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            path,
            basename,
            size,
            article_size,
            chunk_count,
            crc32,
            directory,
        })
    }

    /// Byte offset of a 1-based chunk
    pub fn chunk_offset(&self, index: u32) -> u64 {
        (index.saturating_sub(1) as u64) * self.article_size as u64
    }

    /// Raw length of a 1-based chunk; only the last one may be short
    pub fn chunk_len(&self, index: u32) -> u32 {
        let remaining = self.size.saturating_sub(self.chunk_offset(index));
        remaining.min(self.article_size as u64) as u32
    }

    pub fn is_multipart(&self) -> bool {
        self.chunk_count > 1
    }

    /// `<prefix><dirPrefix>"<basename>" yEnc (<index>/<count>)`
    pub fn subject(&self, prefix: &str, index: u32) -> String {
        let dir_prefix = self
            .directory
            .as_ref()
            .map(DirectoryContext::prefix)
            .unwrap_or_default();
        format!(
            "{}{}\"{}\" yEnc ({}/{})",
            prefix, dir_prefix, self.basename, index, self.chunk_count
        )
    }
}

fn file_crc32(path: &Path) -> Result<(u64, u32)> {
    let read_error = |source| UploadError::ReadError {
        path: path.to_path_buf(),
        source,
    };

    let mut file = std::fs::File::open(path).map_err(read_error)?;
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; 1024 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(read_error)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hasher.finalize()))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Resolve the upload mode into the ordered list of regular, non-empty files
pub fn discover_files(mode: &UploadMode) -> Result<Vec<PathBuf>> {
    let candidates = match mode {
        UploadMode::Directory(dir) => {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if !is_hidden(&path) {
                    entries.push(path);
                }
            }
            entries.sort();
            entries
        }
        UploadMode::Files(files) => files.clone(),
    };

    let mut files = Vec::with_capacity(candidates.len());
    for path in candidates {
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        if !metadata.is_file() {
            // Subdirectories are expected in a directory upload, a named one is not
            if matches!(mode, UploadMode::Files(_)) {
                tracing::warn!("Skipping {}: not a regular file", path.display());
            } else {
                tracing::debug!("Skipping {}: not a regular file", path.display());
            }
            continue;
        }
        if metadata.len() == 0 {
            tracing::warn!("Skipping {}: file is empty", path.display());
            continue;
        }
        files.push(path);
    }

    if files.is_empty() {
        return Err(UploadError::EmptyUploadList.into());
    }

    // Each file gets `<basename>.nzb`, two files with one name would share it
    let mut names = std::collections::HashSet::new();
    for path in &files {
        if let Some(name) = path.file_name() {
            if !names.insert(name) {
                return Err(UploadError::DuplicateName {
                    name: name.to_string_lossy().into_owned(),
                }
                .into());
            }
        }
    }
    Ok(files)
}

/// Discover files and build one job per file, in discovery order
pub async fn plan_jobs(mode: &UploadMode, article_size: u32) -> Result<Vec<UploadJob>> {
    let files = discover_files(mode)?;
    let total = files.len();

    let dir_name = match mode {
        UploadMode::Directory(dir) => Some(directory_name(dir)),
        UploadMode::Files(_) => None,
    };

    let mut jobs = Vec::with_capacity(total);
    for (i, path) in files.into_iter().enumerate() {
        let directory = dir_name.as_ref().map(|name| DirectoryContext {
            name: name.clone(),
            ordinal: i + 1,
            total,
        });
        let job = UploadJob::new(path, article_size, directory).await?;
        tracing::debug!(
            file = %job.basename,
            size = job.size,
            chunks = job.chunk_count,
            crc32 = %crate::yenc::format_crc(job.crc32),
            "Planned upload"
        );
        jobs.push(job);
    }
    Ok(jobs)
}

/// Name used for a directory in subjects and the aggregate NZB
pub fn directory_name(dir: &Path) -> String {
    let resolved = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(size: u64, article_size: u32) -> UploadJob {
        UploadJob::with_checksum(PathBuf::from("/data/file.bin"), size, 0, article_size, None)
            .unwrap()
    }

    #[test]
    fn test_chunk_lengths() {
        let job = job(300, 128);
        assert_eq!(job.chunk_count, 3);
        assert_eq!(
            (1..=3).map(|i| job.chunk_len(i)).collect::<Vec<_>>(),
            vec![128, 128, 44]
        );
        assert_eq!(job.chunk_offset(3), 256);
    }

    #[test]
    fn test_exact_multiple_has_no_short_chunk() {
        let job = job(256, 128);
        assert_eq!(job.chunk_count, 2);
        assert_eq!(job.chunk_len(2), 128);
    }

    #[test]
    fn test_chunk_lengths_sum_to_size() {
        for (size, article_size) in [(1u64, 1u32), (1, 750), (999, 100), (10_000, 768)] {
            let job = job(size, article_size);
            let total: u64 = (1..=job.chunk_count).map(|i| job.chunk_len(i) as u64).sum();
            assert_eq!(total, size);
            assert_eq!(job.chunk_count as u64, size.div_ceil(article_size as u64));
        }
    }

    #[test]
    fn test_zero_article_size_rejected() {
        assert!(UploadJob::with_checksum(PathBuf::from("x"), 10, 0, 0, None).is_err());
    }

    #[test]
    fn test_subject_formats() {
        let single = job(300, 128);
        assert_eq!(single.subject("", 2), "\"file.bin\" yEnc (2/3)");
        assert_eq!(single.subject("[NEW] ", 1), "[NEW] \"file.bin\" yEnc (1/3)");

        let mut in_dir = job(300, 128);
        in_dir.directory = Some(DirectoryContext {
            name: "holiday".to_string(),
            ordinal: 2,
            total: 5,
        });
        assert_eq!(in_dir.subject("", 3), "holiday [2/5] - \"file.bin\" yEnc (3/3)");
    }

    #[test]
    fn test_discover_skips_hidden_empty_and_nested() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.bin"), b"bbb").unwrap();
        std::fs::write(dir.path().join("a.bin"), b"aaa").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"secret").unwrap();
        std::fs::write(dir.path().join("empty.bin"), b"").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.bin"), b"ccc").unwrap();

        let files = discover_files(&UploadMode::Directory(dir.path().to_path_buf())).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.bin", "b.bin"]);
    }

    #[test]
    fn test_empty_upload_list() {
        let dir = tempfile::tempdir().unwrap();
        let result = discover_files(&UploadMode::Directory(dir.path().to_path_buf()));
        assert!(matches!(
            result,
            Err(UlNzbError::Upload(UploadError::EmptyUploadList))
        ));

        let result = discover_files(&UploadMode::Files(vec![dir.path().join("missing")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_file_mode_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"aaa").unwrap();

        let files =
            discover_files(&UploadMode::Files(vec![dir.path().to_path_buf(), file.clone()]))
                .unwrap();
        assert_eq!(files, vec![file]);
    }

    #[test]
    fn test_file_mode_rejects_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let (left, right) = (dir.path().join("left"), dir.path().join("right"));
        std::fs::create_dir(&left).unwrap();
        std::fs::create_dir(&right).unwrap();
        std::fs::write(left.join("x.bin"), b"one").unwrap();
        std::fs::write(right.join("x.bin"), b"two").unwrap();

        let result = discover_files(&UploadMode::Files(vec![left.join("x.bin"), right.join("x.bin")]));
        assert!(matches!(
            result,
            Err(UlNzbError::Upload(UploadError::DuplicateName { ref name })) if name == "x.bin"
        ));
    }

    #[tokio::test]
    async fn test_plan_jobs_computes_crc_and_directory_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("set");
        std::fs::create_dir(&folder).unwrap();
        std::fs::write(folder.join("one.txt"), b"123456789").unwrap();
        std::fs::write(folder.join("two.txt"), b"123456").unwrap();

        let jobs = plan_jobs(&UploadMode::Directory(folder), 4).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].crc32, 0xcbf4_3926);
        assert_eq!(jobs[0].chunk_count, 3);
        assert_eq!(jobs[1].crc32, 0x0972_d361);
        assert_eq!(jobs[1].subject("", 1), "set [2/2] - \"two.txt\" yEnc (1/2)");
    }
}
