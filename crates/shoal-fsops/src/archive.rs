//! Archive probing, extraction, and single-file packing.
//!
//! Detection is a cheap extension check followed by an open probe, so a
//! mislabelled file is treated as plain data rather than failing the
//! sync. Extraction reports per-entry results; the caller decides whether
//! a partial extraction is acceptable (the sync engine does not: any
//! entry error falls back to uploading the archive itself).

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Outcome of extracting one archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackEntry {
    /// Extracted path on disk (under the destination directory).
    pub name: String,
    /// Extraction error for this entry, if any.
    pub error: Option<String>,
}

impl UnpackEntry {
    fn ok(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: None,
        }
    }

    fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: Some(error.into()),
        }
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

/// Whether the file looks like a supported archive: the extension must be
/// `.zip`, `.rar`, or `.7z` and the archive library must be able to open
/// it for reading.
#[must_use]
pub fn is_packed(path: &Path) -> bool {
    match extension_of(path).as_deref() {
        Some("zip") => File::open(path)
            .map(|file| ZipArchive::new(file).is_ok())
            .unwrap_or(false),
        Some("7z") => sevenz_rust::SevenZReader::open(path, sevenz_rust::Password::empty()).is_ok(),
        Some("rar") => unrar::Archive::new(path).open_for_listing().is_ok(),
        _ => false,
    }
}

/// Extract every entry of `src` into `dest`, preserving the archive's
/// internal paths under it.
///
/// # Errors
///
/// Returns an error when the archive cannot be opened at all or its
/// format is unsupported; entry-level failures are reported through the
/// returned entries instead.
pub fn unpack(src: &Path, dest: &Path) -> Result<Vec<UnpackEntry>> {
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create extraction directory {}", dest.display()))?;
    match extension_of(src).as_deref() {
        Some("zip") => unpack_zip(src, dest),
        Some("7z") => unpack_7z(src, dest),
        Some("rar") => unpack_rar(src, dest),
        other => bail!(
            "unsupported archive format '{}' for {}",
            other.unwrap_or(""),
            src.display()
        ),
    }
}

fn unpack_zip(src: &Path, dest: &Path) -> Result<Vec<UnpackEntry>> {
    let file = File::open(src)
        .with_context(|| format!("failed to open archive {} for extraction", src.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("failed to decode zip archive {}", src.display()))?;

    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(archive = %src.display(), index, error = %err, "unreadable zip entry");
                entries.push(UnpackEntry::failed(format!("#{index}"), err.to_string()));
                continue;
            }
        };
        let raw_name = entry.name().to_string();
        let entry_path = match sanitize_entry_path(&raw_name) {
            Ok(path) => path,
            Err(err) => {
                warn!(archive = %src.display(), entry = %raw_name, error = %err, "rejected zip entry path");
                entries.push(UnpackEntry::failed(raw_name, err.to_string()));
                continue;
            }
        };
        let destination = dest.join(&entry_path);

        if entry.is_dir() {
            if let Err(err) = fs::create_dir_all(&destination) {
                entries.push(UnpackEntry::failed(
                    destination.to_string_lossy(),
                    err.to_string(),
                ));
            }
            continue;
        }

        if let Err(err) = write_entry(&mut entry, &destination) {
            warn!(archive = %src.display(), entry = %raw_name, error = %err, "failed to extract zip entry");
            entries.push(UnpackEntry::failed(
                destination.to_string_lossy(),
                err.to_string(),
            ));
            continue;
        }
        entries.push(UnpackEntry::ok(destination.to_string_lossy()));
    }
    Ok(entries)
}

fn write_entry(entry: &mut impl io::Read, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to prepare extraction parent {}", parent.display()))?;
    }
    let mut output = File::create(destination)
        .with_context(|| format!("failed to create extracted file {}", destination.display()))?;
    io::copy(entry, &mut output)
        .with_context(|| format!("failed to extract file {}", destination.display()))?;
    Ok(())
}

fn unpack_7z(src: &Path, dest: &Path) -> Result<Vec<UnpackEntry>> {
    sevenz_rust::decompress_file(src, dest)
        .with_context(|| format!("failed to extract 7z archive {}", src.display()))?;
    let mut entries = Vec::new();
    for walked in walkdir::WalkDir::new(dest) {
        let walked = walked
            .with_context(|| format!("failed to enumerate extracted files in {}", dest.display()))?;
        if walked.file_type().is_file() {
            entries.push(UnpackEntry::ok(walked.path().to_string_lossy()));
        }
    }
    Ok(entries)
}

fn unpack_rar(src: &Path, dest: &Path) -> Result<Vec<UnpackEntry>> {
    let mut archive = unrar::Archive::new(src)
        .open_for_processing()
        .with_context(|| format!("failed to open rar archive {}", src.display()))?;
    let mut entries = Vec::new();
    loop {
        let Some(header) = archive
            .read_header()
            .with_context(|| format!("failed to read rar header in {}", src.display()))?
        else {
            break;
        };
        let name = header.entry().filename.clone();
        let destination = dest.join(&name);
        if header.entry().is_file() {
            match header.extract_with_base(dest) {
                Ok(next) => {
                    entries.push(UnpackEntry::ok(destination.to_string_lossy()));
                    archive = next;
                }
                Err(err) => {
                    warn!(archive = %src.display(), entry = %name.display(), error = %err, "failed to extract rar entry");
                    entries.push(UnpackEntry::failed(
                        destination.to_string_lossy(),
                        err.to_string(),
                    ));
                    break;
                }
            }
        } else {
            archive = header
                .skip()
                .with_context(|| format!("failed to skip rar entry in {}", src.display()))?;
        }
    }
    Ok(entries)
}

/// Reject absolute or parent-traversing entry paths before writing under
/// the extraction directory.
fn sanitize_entry_path(entry: &str) -> Result<PathBuf> {
    let path = Path::new(entry);
    if path.is_absolute() {
        bail!("archive entry '{entry}' may not be absolute");
    }
    let mut sanitized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            _ => bail!("archive entry '{entry}' contains invalid segments"),
        }
    }
    Ok(sanitized)
}

/// Produce a single-entry deflate ZIP at `dest_zip` containing `src`
/// under its basename.
///
/// # Errors
///
/// Returns an error if the source cannot be read or the archive cannot be
/// written.
pub fn zip_one(src: &Path, dest_zip: &Path) -> Result<()> {
    let basename = src
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if basename.is_empty() {
        bail!("cannot archive a path without a file name: {}", src.display());
    }

    let output = File::create(dest_zip)
        .with_context(|| format!("failed to create archive {}", dest_zip.display()))?;
    let mut writer = ZipWriter::new(output);
    writer
        .start_file(
            basename,
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        )
        .with_context(|| format!("failed to start archive entry for {}", src.display()))?;
    let mut input = File::open(src)
        .with_context(|| format!("failed to open {} for archiving", src.display()))?;
    io::copy(&mut input, &mut writer)
        .with_context(|| format!("failed to compress {}", src.display()))?;
    writer
        .finish()
        .with_context(|| format!("failed to finish archive {}", dest_zip.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).expect("create zip");
        let mut writer = ZipWriter::new(file);
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start entry");
            writer.write_all(data).expect("write entry");
        }
        writer.finish().expect("finish zip");
    }

    #[test]
    fn zip_detection_requires_extension_and_valid_content() {
        let dir = tempfile::tempdir().expect("tempdir");

        let good = dir.path().join("good.zip");
        write_zip(&good, &[("inner.bin", b"data")]);
        assert!(is_packed(&good));

        // right extension, wrong content
        let fake = dir.path().join("fake.zip");
        fs::write(&fake, b"definitely not a zip").expect("write");
        assert!(!is_packed(&fake));

        // right content, wrong extension
        let misnamed = dir.path().join("archive.bin");
        write_zip(&misnamed, &[("inner.bin", b"data")]);
        assert!(!is_packed(&misnamed));

        assert!(!is_packed(&dir.path().join("missing.zip")));
    }

    #[test]
    fn zip_unpacks_nested_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("1.zip");
        write_zip(
            &archive,
            &[("inner.bin", b"payload"), ("sub/deep.bin", b"deep")],
        );

        let dest = folder_for_unpacked_path(&archive);
        let entries = unpack(&archive, &dest).expect("unpack");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.error.is_none()));
        assert_eq!(fs::read(dest.join("inner.bin")).expect("read"), b"payload");
        assert_eq!(fs::read(dest.join("sub/deep.bin")).expect("read"), b"deep");
    }

    #[test]
    fn traversal_entries_are_reported_not_written() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("evil.zip");
        write_zip(&archive, &[("../escape.bin", b"nope"), ("ok.bin", b"ok")]);

        let dest = dir.path().join("evil_zip");
        let entries = unpack(&archive, &dest).expect("unpack");
        let escape = entries
            .iter()
            .find(|entry| entry.name.contains("escape"))
            .expect("escape entry reported");
        assert!(escape.error.is_some());
        assert!(!dir.path().join("escape.bin").exists());
        assert!(dest.join("ok.bin").exists());
    }

    #[test]
    fn unsupported_format_is_a_fatal_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.tar");
        fs::write(&path, b"tar-ish").expect("write");
        assert!(unpack(&path, &dir.path().join("out")).is_err());
    }

    #[test]
    fn zip_one_round_trips_through_the_reader() {
        let dir = tempfile::tempdir().expect("tempdir");
        let src = dir.path().join("report.txt");
        fs::write(&src, b"hello archive").expect("write");

        let packed = dir.path().join("report.txt.zip");
        zip_one(&src, &packed).expect("zip_one");

        let mut archive = ZipArchive::new(File::open(&packed).expect("open")).expect("decode");
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_index(0).expect("entry");
        assert_eq!(entry.name(), "report.txt");
        let mut contents = Vec::new();
        io::Read::read_to_end(&mut entry, &mut contents).expect("read");
        assert_eq!(contents, b"hello archive");
    }

    fn folder_for_unpacked_path(path: &Path) -> PathBuf {
        crate::paths::folder_for_unpacked(path)
    }
}
