//! Archive extractions. Tar, gzipped tar and zip files are unpacked and
//! every regular member is ingested as a record of its own, with the path
//! `<archive>!/<member>`.

use crate::error::Error;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Separates the archive path from the member path in record paths.
pub const MEMBER_SEPARATOR: &str = "!/";

/// Archive family reported for a tracked extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionKind {
    Tar,
    Zip,
}

impl ExtractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionKind::Tar => "tar",
            ExtractionKind::Zip => "zip",
        }
    }
}

impl fmt::Display for ExtractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tar" => Ok(ExtractionKind::Tar),
            "zip" => Ok(ExtractionKind::Zip),
            other => Err(Error::Input(format!(
                "unknown extraction type '{}' (expected tar or zip)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Format by file extension: `.tar`, `.tar.gz` / `.tgz`, `.zip`.
    pub fn detect(path: &str) -> Option<Self> {
        let name = path.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if name.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else {
            None
        }
    }

    pub fn kind(self) -> ExtractionKind {
        match self {
            ArchiveFormat::Tar | ArchiveFormat::TarGz => ExtractionKind::Tar,
            ArchiveFormat::Zip => ExtractionKind::Zip,
        }
    }
}

/// An unpacked archive, as tracked by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: ExtractionKind,
    pub size_on_disk: u64,
    /// Regular file members ingested.
    pub files: u64,
    pub tracked_at: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnpackSummary {
    pub files: usize,
    pub oversized: usize,
}

pub fn member_path(archive: &str, member: &str) -> String {
    format!(
        "{}{}{}",
        archive,
        MEMBER_SEPARATOR,
        member.trim_start_matches("./").trim_start_matches('/')
    )
}

fn malformed(path: &Path, err: impl fmt::Display) -> Error {
    Error::Input(format!("cannot unpack {}: {}", path.display(), err))
}

type Visit<'a> = dyn FnMut(&str, Vec<u8>) -> Result<(), Error> + 'a;

/// Call `visit` with the name and content of every non-empty regular file
/// in the archive, in archive order.
///
/// Members larger than `max_member_bytes` are skipped. A malformed archive
/// fails with `Error::Input`; errors returned by `visit` pass through
/// unchanged and stop the walk.
pub fn unpack<F>(
    path: &Path,
    format: ArchiveFormat,
    max_member_bytes: u64,
    mut visit: F,
) -> Result<UnpackSummary, Error>
where
    F: FnMut(&str, Vec<u8>) -> Result<(), Error>,
{
    let file = File::open(path).map_err(|e| malformed(path, e))?;
    let reader = BufReader::new(file);
    let summary = match format {
        ArchiveFormat::Tar => unpack_tar(path, reader, max_member_bytes, &mut visit)?,
        ArchiveFormat::TarGz => {
            unpack_tar(path, GzDecoder::new(reader), max_member_bytes, &mut visit)?
        }
        ArchiveFormat::Zip => unpack_zip(path, reader, max_member_bytes, &mut visit)?,
    };
    debug!(
        "Unpacked {}: {} members, {} oversized",
        path.display(),
        summary.files,
        summary.oversized
    );
    Ok(summary)
}

/// Read at most `max + 1` bytes so an understated header cannot force an
/// unbounded read. `None` when the member is over the limit.
fn read_bounded(path: &Path, reader: impl Read, size_hint: u64, max: u64) -> Result<Option<Vec<u8>>, Error> {
    let mut data = Vec::with_capacity(size_hint.min(max) as usize);
    reader
        .take(max.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(|e| malformed(path, e))?;
    if data.len() as u64 > max {
        return Ok(None);
    }
    Ok(Some(data))
}

fn unpack_tar<R: Read>(
    path: &Path,
    reader: R,
    max_member_bytes: u64,
    visit: &mut Visit<'_>,
) -> Result<UnpackSummary, Error> {
    let mut archive = tar::Archive::new(reader);
    let mut summary = UnpackSummary::default();

    for entry in archive.entries().map_err(|e| malformed(path, e))? {
        let mut entry = entry.map_err(|e| malformed(path, e))?;
        if !entry.header().entry_type().is_file() || entry.size() == 0 {
            continue;
        }
        let name = entry
            .path()
            .map_err(|e| malformed(path, e))?
            .to_string_lossy()
            .into_owned();
        let size = entry.size();

        match read_bounded(path, &mut entry, size, max_member_bytes)? {
            Some(data) => {
                summary.files += 1;
                visit(&name, data)?;
            }
            None => {
                warn!(
                    "Skipping {} in {}: larger than {} bytes",
                    name,
                    path.display(),
                    max_member_bytes
                );
                summary.oversized += 1;
            }
        }
    }
    Ok(summary)
}

fn unpack_zip<R: Read + Seek>(
    path: &Path,
    reader: R,
    max_member_bytes: u64,
    visit: &mut Visit<'_>,
) -> Result<UnpackSummary, Error> {
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| malformed(path, e))?;
    let mut summary = UnpackSummary::default();

    for i in 0..archive.len() {
        let mut member = archive.by_index(i).map_err(|e| malformed(path, e))?;
        if member.is_dir() || member.size() == 0 {
            continue;
        }
        let name = member.name().to_string();
        let size = member.size();
        let data = read_bounded(path, &mut member, size, max_member_bytes)?;
        drop(member);

        match data {
            Some(data) => {
                summary.files += 1;
                visit(&name, data)?;
            }
            None => {
                warn!(
                    "Skipping {} in {}: larger than {} bytes",
                    name,
                    path.display(),
                    max_member_bytes
                );
                summary.oversized += 1;
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn append_file<W: Write>(builder: &mut tar::Builder<W>, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, data).unwrap();
    }

    fn append_dir<W: Write>(builder: &mut tar::Builder<W>, name: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        builder.append_data(&mut header, name, std::io::empty()).unwrap();
    }

    fn collect(path: &Path, max: u64) -> (UnpackSummary, Vec<(String, Vec<u8>)>) {
        let format = ArchiveFormat::detect(path.to_str().unwrap()).unwrap();
        let mut seen = Vec::new();
        let summary = unpack(path, format, max, |name, data| {
            seen.push((name.to_string(), data));
            Ok(())
        })
        .unwrap();
        (summary, seen)
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(ArchiveFormat::detect("/a/b.tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::detect("/a/b.TAR.GZ"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("/a/b.tgz"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::detect("/a/b.zip"), Some(ArchiveFormat::Zip));
        assert_eq!(ArchiveFormat::detect("/a/b.gz"), None);
        assert_eq!(ArchiveFormat::detect("/a/tar"), None);
        assert_eq!(ArchiveFormat::TarGz.kind(), ExtractionKind::Tar);
    }

    #[test]
    fn test_member_path() {
        assert_eq!(member_path("/in/x.tar", "./dir/a.bin"), "/in/x.tar!/dir/a.bin");
        assert_eq!(member_path("/in/x.zip", "/abs.txt"), "/in/x.zip!/abs.txt");
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("zip".parse::<ExtractionKind>().unwrap(), ExtractionKind::Zip);
        assert!(matches!("rar".parse::<ExtractionKind>(), Err(Error::Input(_))));
    }

    #[test]
    fn test_unpack_tar_gz_skips_dirs_and_empty_members() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bundle.tar.gz");
        let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_dir(&mut builder, "docs/");
        append_file(&mut builder, "docs/a.txt", b"alpha");
        append_file(&mut builder, "empty.txt", b"");
        append_file(&mut builder, "b.bin", b"bravo");
        builder.into_inner().unwrap().finish().unwrap();

        let (summary, seen) = collect(&path, 1024);
        assert_eq!(summary.files, 2);
        assert_eq!(
            seen,
            vec![
                ("docs/a.txt".to_string(), b"alpha".to_vec()),
                ("b.bin".to_string(), b"bravo".to_vec()),
            ]
        );
    }

    #[test]
    fn test_unpack_zip_and_oversized_members() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bundle.zip");
        let mut writer = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer.add_directory("nested/", options).unwrap();
        writer.start_file("nested/small.txt", options).unwrap();
        writer.write_all(b"small").unwrap();
        writer.start_file("large.bin", options).unwrap();
        writer.write_all(&[7u8; 4096]).unwrap();
        writer.finish().unwrap();

        let (summary, seen) = collect(&path, 100);
        assert_eq!(summary, UnpackSummary { files: 1, oversized: 1 });
        assert_eq!(seen, vec![("nested/small.txt".to_string(), b"small".to_vec())]);
    }

    #[test]
    fn test_corrupt_archive_is_input_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, b"not a zip at all").unwrap();

        let result = unpack(&path, ArchiveFormat::Zip, 1024, |_, _| Ok(()));
        assert!(matches!(result, Err(Error::Input(_))));
    }

    #[test]
    fn test_visit_errors_pass_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("one.tar");
        let mut builder = tar::Builder::new(File::create(&path).unwrap());
        append_file(&mut builder, "a.txt", b"alpha");
        builder.into_inner().unwrap();

        let result = unpack(&path, ArchiveFormat::Tar, 1024, |_, _| {
            Err(Error::TransientStore("database is locked".to_string()))
        });
        assert!(matches!(result, Err(Error::TransientStore(_))));
    }
}
