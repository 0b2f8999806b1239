//! Gzip-compressed tar bundles.
//!
//! A bundle is a tar stream wrapped in a gzip stream. Creation names every
//! entry after the path the caller supplied, so callers control namespacing
//! by choosing paths. Merging copies a primary bundle verbatim (link targets
//! and PAX records included) and re-homes every entry of a secondary bundle
//! under `<label>/serial-logs/`, which lets two independently produced
//! bundles share one archive without collisions.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, Entry, Header};
use thiserror::Error;

/// Directory inserted between the namespace label and re-homed entries.
pub const SERIAL_LOGS_DIR: &str = "serial-logs";

type BundleWriter = Builder<GzEncoder<BufWriter<File>>>;
type BundleReader = MultiGzDecoder<BufReader<File>>;

/// Errors raised while creating, reading, or merging bundles.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Raised when an input file or bundle cannot be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Path that could not be opened.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Raised when the output bundle cannot be created.
    #[error("failed to create {path}: {source}")]
    Create {
        /// Bundle path that could not be created.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Raised when writing a header or entry body fails.
    #[error("failed to write {name} into {archive}: {source}")]
    Append {
        /// Entry name being written.
        name: String,
        /// Bundle being written.
        archive: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Raised when an input bundle cannot be decoded.
    #[error("failed to read entries of {path}: {source}")]
    Read {
        /// Bundle being read.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Raised when an entry name is absolute or climbs out of the archive
    /// root. Names are checked before the output bundle is created.
    #[error("entry name {name} must be relative and free of `..` components")]
    InvalidName {
        /// Offending entry name.
        name: Utf8PathBuf,
    },
    /// Raised when a secondary entry name cannot be re-homed because it has
    /// fewer than three path segments.
    #[error("entry {name} in {path} has fewer than three path segments")]
    MalformedEntry {
        /// Bundle containing the entry.
        path: Utf8PathBuf,
        /// Offending entry name.
        name: String,
    },
    /// Raised when closing the tar or gzip writer fails.
    #[error("failed to finish {path}: {source}")]
    Finish {
        /// Bundle being finalised.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Writes `files` into a new bundle at `archive`.
///
/// Each entry header is derived from the file's metadata and named after the
/// path exactly as given.
///
/// # Errors
///
/// Returns [`ArchiveError::InvalidName`] without touching `archive` when a
/// path is absolute or contains `..`. Otherwise returns the first
/// [`ArchiveError`] encountered; later files are not attempted.
pub fn create_archive(files: &[Utf8PathBuf], archive: &Utf8Path) -> Result<(), ArchiveError> {
    let entries: Vec<(Utf8PathBuf, Utf8PathBuf)> = files
        .iter()
        .map(|file| (file.clone(), file.clone()))
        .collect();
    create_archive_entries(&entries, archive)
}

/// Writes the files named by `names` (relative to `root`) into a new bundle.
///
/// Files are read from `root.join(name)` and stored under `name`, which keeps
/// entry names independent of the process working directory.
///
/// # Errors
///
/// Returns the first [`ArchiveError`] encountered.
pub fn create_archive_from(
    root: &Utf8Path,
    names: &[Utf8PathBuf],
    archive: &Utf8Path,
) -> Result<(), ArchiveError> {
    let entries: Vec<(Utf8PathBuf, Utf8PathBuf)> = names
        .iter()
        .map(|name| (root.join(name), name.clone()))
        .collect();
    create_archive_entries(&entries, archive)
}

/// Writes `(disk path, entry name)` pairs into a new bundle.
///
/// # Errors
///
/// Returns [`ArchiveError::InvalidName`] before creating `archive` when an
/// entry name is absolute or contains `..`, and the first other
/// [`ArchiveError`] encountered while writing.
pub fn create_archive_entries(
    entries: &[(Utf8PathBuf, Utf8PathBuf)],
    archive: &Utf8Path,
) -> Result<(), ArchiveError> {
    if let Some((_, name)) = entries.iter().find(|(_, name)| !is_archive_name(name)) {
        return Err(ArchiveError::InvalidName { name: name.clone() });
    }
    let mut builder = open_writer(archive)?;
    for (disk_path, name) in entries {
        append_file(&mut builder, disk_path, name, archive)?;
    }
    finish(builder, archive)
}

/// Merges `primary` and `secondary` into a new bundle at `output`.
///
/// Primary entries keep their names and bytes. Secondary entries are renamed
/// to `<label>/serial-logs/<rest>`, where `<rest>` is everything after the
/// first two `/`-separated segments of the original name. Either input may be
/// absent; when both are absent nothing is written and `Ok(None)` is returned.
///
/// # Errors
///
/// Returns [`ArchiveError::MalformedEntry`] when a secondary entry has fewer
/// than three path segments, and any other [`ArchiveError`] when reading or
/// writing fails. Any error aborts the whole merge.
pub fn merge_archives(
    primary: Option<&Utf8Path>,
    secondary: Option<&Utf8Path>,
    output: &Utf8Path,
    label: &str,
) -> Result<Option<Utf8PathBuf>, ArchiveError> {
    if primary.is_none() && secondary.is_none() {
        return Ok(None);
    }

    let mut builder = open_writer(output)?;
    if let Some(path) = primary {
        copy_entries(&mut builder, path, output, |entry| {
            entry
                .path()
                .map(|name| name.into_owned())
                .map_err(|source| read_error(path, source))
        })?;
    }
    if let Some(path) = secondary {
        copy_entries(&mut builder, path, output, |entry| {
            let name = entry.path_bytes();
            rehome(&name, label).ok_or_else(|| ArchiveError::MalformedEntry {
                path: path.to_path_buf(),
                name: String::from_utf8_lossy(&name).into_owned(),
            })
        })?;
    }
    finish(builder, output)?;

    Ok(Some(output.to_path_buf()))
}

/// Lists the entry names of a bundle in stream order.
///
/// # Errors
///
/// Returns [`ArchiveError`] when the bundle cannot be opened or decoded.
pub fn entry_names(path: &Utf8Path) -> Result<Vec<String>, ArchiveError> {
    let mut archive = open_reader(path)?;
    let entries = archive.entries().map_err(|source| read_error(path, source))?;
    let mut names = Vec::new();
    for entry in entries {
        let found = entry.map_err(|source| read_error(path, source))?;
        names.push(String::from_utf8_lossy(&found.path_bytes()).into_owned());
    }
    Ok(names)
}

fn is_archive_name(name: &Utf8Path) -> bool {
    !name.as_str().is_empty()
        && name
            .as_std_path()
            .components()
            .all(|part| matches!(part, Component::Normal(_) | Component::CurDir))
}

fn rehome(name: &[u8], label: &str) -> Option<PathBuf> {
    let rest = name.splitn(3, |byte| *byte == b'/').nth(2)?;
    Some(PathBuf::from(format!(
        "{label}/{SERIAL_LOGS_DIR}/{}",
        String::from_utf8_lossy(rest)
    )))
}

fn open_writer(path: &Utf8Path) -> Result<BundleWriter, ArchiveError> {
    let file = File::create(path).map_err(|source| ArchiveError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Builder::new(GzEncoder::new(
        BufWriter::new(file),
        Compression::default(),
    )))
}

fn open_reader(path: &Utf8Path) -> Result<Archive<BundleReader>, ArchiveError> {
    let file = File::open(path).map_err(|source| ArchiveError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Archive::new(MultiGzDecoder::new(BufReader::new(file))))
}

fn append_file(
    builder: &mut BundleWriter,
    disk_path: &Utf8Path,
    name: &Utf8Path,
    archive: &Utf8Path,
) -> Result<(), ArchiveError> {
    let open_error = |source| ArchiveError::Open {
        path: disk_path.to_path_buf(),
        source,
    };
    let file = File::open(disk_path).map_err(open_error)?;
    let metadata = file.metadata().map_err(open_error)?;

    let mut header = Header::new_gnu();
    header.set_metadata(&metadata);
    builder
        .append_data(&mut header, name.as_std_path(), file)
        .map_err(|source| ArchiveError::Append {
            name: name.to_string(),
            archive: archive.to_path_buf(),
            source,
        })
}

fn copy_entries<F>(
    builder: &mut BundleWriter,
    source_path: &Utf8Path,
    output: &Utf8Path,
    mut rename: F,
) -> Result<(), ArchiveError>
where
    F: FnMut(&Entry<'_, BundleReader>) -> Result<PathBuf, ArchiveError>,
{
    let mut archive = open_reader(source_path)?;
    let entries = archive
        .entries()
        .map_err(|source| read_error(source_path, source))?;
    for entry in entries {
        let mut found = entry.map_err(|source| read_error(source_path, source))?;
        let target = rename(&found)?;
        let append_error = |source| ArchiveError::Append {
            name: target.to_string_lossy().into_owned(),
            archive: output.to_path_buf(),
            source,
        };

        let extensions = carried_extensions(&mut found)
            .map_err(|source| read_error(source_path, source))?;
        if !extensions.is_empty() {
            builder
                .append_pax_extensions(
                    extensions
                        .iter()
                        .map(|(key, value)| (key.as_str(), value.as_slice())),
                )
                .map_err(append_error)?;
        }

        let mut header = found.header().clone();
        match found.link_name_bytes().map(|link| link.into_owned()) {
            Some(link) => builder
                .append_link(&mut header, &target, bytes_to_path(&link))
                .map_err(append_error)?,
            None => builder
                .append_data(&mut header, &target, &mut found)
                .map_err(append_error)?,
        }
    }
    Ok(())
}

/// PAX records of `entry` other than `path` and `linkpath`, which are
/// rewritten from the renamed entry itself.
fn carried_extensions(
    entry: &mut Entry<'_, BundleReader>,
) -> io::Result<Vec<(String, Vec<u8>)>> {
    let Some(extensions) = entry.pax_extensions()? else {
        return Ok(Vec::new());
    };
    let mut carried = Vec::new();
    for record in extensions {
        let extension = record?;
        let key = extension
            .key()
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        if key != "path" && key != "linkpath" {
            carried.push((key.to_owned(), extension.value_bytes().to_vec()));
        }
    }
    Ok(carried)
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

fn finish(builder: BundleWriter, path: &Utf8Path) -> Result<(), ArchiveError> {
    let finish_error = |source| ArchiveError::Finish {
        path: path.to_path_buf(),
        source,
    };
    let encoder = builder.into_inner().map_err(finish_error)?;
    let mut writer = encoder.finish().map_err(finish_error)?;
    writer.flush().map_err(finish_error)
}

fn read_error(path: &Utf8Path, source: io::Error) -> ArchiveError {
    ArchiveError::Read {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests;
