//! Where finished jobs end up
//!
//! In file mode every job gets its own NZB, written as soon as the job is
//! complete. In directory mode each completed job is written to a temporary
//! fragment; [`NzbOutput::finish`] stitches the fragments together in job
//! order into one aggregate NZB named after the directory.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::writer::{NzbSink, NzbWriter};
use crate::error::{NzbError, UlNzbError};
use crate::upload::SegmentEntry;

type Result<T> = std::result::Result<T, UlNzbError>;

/// The `<file>` block of one job
pub struct FileRecord<'a> {
    pub from: &'a str,
    pub subject: &'a str,
    pub groups: &'a [String],
    pub segments: &'a [SegmentEntry],
}

impl FileRecord<'_> {
    fn write_to<S: NzbSink>(&self, sink: &mut S) -> Result<()> {
        sink.write_file_header(self.from, self.subject, self.groups)?;
        for segment in self.segments {
            sink.save_segment(segment.bytes, segment.number, &segment.message_id)?;
        }
        sink.write_file_footer()
    }
}

pub enum NzbOutput {
    /// One NZB per job, `<dir>/<basename>.nzb`
    PerFile { dir: PathBuf, written: Vec<PathBuf> },
    /// One NZB for the whole directory, `<dir>/<name>.nzb`
    Aggregate {
        path: PathBuf,
        name: String,
        fragments: BTreeMap<usize, NamedTempFile>,
    },
}

impl NzbOutput {
    pub fn per_file(dir: impl Into<PathBuf>) -> Self {
        NzbOutput::PerFile {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    pub fn aggregate(dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        NzbOutput::Aggregate {
            path: dir.as_ref().join(format!("{}.nzb", name)),
            name,
            fragments: BTreeMap::new(),
        }
    }

    /// Record a completed job
    pub fn write_job(&mut self, job: usize, name: &str, record: &FileRecord<'_>) -> Result<()> {
        match self {
            NzbOutput::PerFile { dir, written } => {
                let path = dir.join(format!("{}.nzb", name));
                let file = File::create(&path).map_err(|source| NzbError::WriteError {
                    path: path.clone(),
                    source,
                })?;

                let mut writer = NzbWriter::new(BufWriter::new(file)).with_name(name);
                writer.write_header()?;
                record.write_to(&mut writer)?;
                writer.write_footer()?;

                tracing::info!("NZB written to {}", path.display());
                written.push(path);
            }
            NzbOutput::Aggregate { fragments, .. } => {
                let mut fragment = NamedTempFile::new()?;
                {
                    let mut writer = NzbWriter::new(BufWriter::new(fragment.as_file_mut()));
                    record.write_to(&mut writer)?;
                    writer.into_inner().flush()?;
                }
                tracing::debug!(job, "NZB fragment stored at {}", fragment.path().display());
                fragments.insert(job, fragment);
            }
        }
        Ok(())
    }

    /// Write the aggregate NZB, if any; returns every NZB produced by this run
    pub fn finish(self) -> Result<Vec<PathBuf>> {
        match self {
            NzbOutput::PerFile { written, .. } => Ok(written),
            NzbOutput::Aggregate {
                fragments, ..
            } if fragments.is_empty() => {
                tracing::warn!("No job completed, NZB not written");
                Ok(Vec::new())
            }
            NzbOutput::Aggregate {
                path,
                name,
                fragments,
            } => {
                let write_error = |source| NzbError::WriteError {
                    path: path.clone(),
                    source,
                };

                let file = File::create(&path).map_err(write_error)?;
                let mut writer = NzbWriter::new(BufWriter::new(file)).with_name(name);
                writer.write_header()?;
                {
                    let out = writer.get_mut();
                    for (_, fragment) in fragments {
                        let mut fragment = fragment.into_file();
                        fragment.seek(SeekFrom::Start(0)).map_err(write_error)?;
                        std::io::copy(&mut fragment, out).map_err(write_error)?;
                    }
                }
                writer.write_footer()?;

                tracing::info!("NZB written to {}", path.display());
                Ok(vec![path])
            }
        }
    }
}
