//! Zip archiving of shared folders.
//!
//! Entries are rooted at the folder's own name, so sharing `docs` yields
//! `docs/`, `docs/readme.txt`, `docs/drafts/`, ... Stored compressed
//! artifacts (`*.gz` starting with the gzip magic bytes) are expanded under
//! their logical name unless a sibling already uses that name.

use std::fmt::Display;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::bufread::GzDecoder;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::tree::COMPRESSED_SUFFIX;

/// Deflate level used for every file entry.
pub const ARCHIVE_COMPRESSION_LEVEL: i64 = 9;

/// Plain entries at least this large (on disk) get zip64 headers.
const LARGE_ENTRY_THRESHOLD: u64 = 1 << 30;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn archive_error(e: impl Display) -> String {
    format!("archive error: {e}")
}

/// Zip the folder at `folder` into `output`.
///
/// Returns the number of entries written (directories included).
pub fn zip_folder(folder: &Path, output: &Path) -> Result<usize, String> {
    match fs::metadata(folder) {
        Ok(meta) if meta.is_dir() => {}
        _ => return Err(format!("folder does not exist: {}", folder.display())),
    }
    let root_name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("folder has no name: {}", folder.display()))?;

    let sink = File::create(output).map_err(archive_error)?;
    let mut zip = ZipWriter::new(BufWriter::new(sink));
    let dir_options = SimpleFileOptions::default();
    let file_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(ARCHIVE_COMPRESSION_LEVEL));

    let mut entries = 0;
    for entry in WalkDir::new(folder).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(archive_error)?;
        let relative = entry.path().strip_prefix(folder).map_err(archive_error)?;
        let name = entry_name(&root_name, relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            zip.add_directory(format!("{name}/"), dir_options)
                .map_err(archive_error)?;
        } else if file_type.is_file() {
            let on_disk = entry.metadata().map_err(archive_error)?.len();
            let opened = open_entry(entry.path(), name).map_err(archive_error)?;
            let options = file_options.large_file(needs_zip64(opened.expanded, on_disk));
            let mut reader = opened.reader;
            zip.start_file(opened.name, options).map_err(archive_error)?;
            io::copy(&mut reader, &mut zip).map_err(archive_error)?;
        } else {
            // Symlinks and special files are not part of a share.
            continue;
        }
        entries += 1;
    }

    let mut writer = zip.finish().map_err(archive_error)?;
    writer.flush().map_err(archive_error)?;
    Ok(entries)
}

/// Archive entry name: root folder name plus `/`-joined relative components.
fn entry_name(root_name: &str, relative: &Path) -> String {
    let mut name = root_name.to_string();
    for component in relative.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}

/// A file opened for archiving.
struct OpenedEntry {
    name: String,
    reader: Box<dyn Read>,
    /// Content is decompressed on the fly, so its size is unknown up front.
    expanded: bool,
}

/// Whether an entry must be written with zip64 headers.
///
/// The expanded size of a gzip artifact is unbounded by its size on disk.
fn needs_zip64(expanded: bool, on_disk: u64) -> bool {
    expanded || on_disk >= LARGE_ENTRY_THRESHOLD
}

/// Open a file for archiving, expanding stored gzip artifacts.
fn open_entry(path: &Path, name: String) -> io::Result<OpenedEntry> {
    let mut reader = BufReader::new(File::open(path)?);

    if let Some(logical_path) = logical_sibling(path) {
        if !logical_path.exists() && reader.fill_buf()?.starts_with(&GZIP_MAGIC) {
            let logical_name = name
                .strip_suffix(COMPRESSED_SUFFIX)
                .unwrap_or(&name)
                .to_string();
            return Ok(OpenedEntry {
                name: logical_name,
                reader: Box::new(GzDecoder::new(reader)),
                expanded: true,
            });
        }
    }

    Ok(OpenedEntry {
        name,
        reader: Box::new(reader),
        expanded: false,
    })
}

/// `dir/readme.txt` for `dir/readme.txt.gz`; `None` for other names.
fn logical_sibling(path: &Path) -> Option<PathBuf> {
    let file_name = path.file_name()?.to_str()?;
    let logical = file_name.strip_suffix(COMPRESSED_SUFFIX)?;
    if logical.is_empty() {
        return None;
    }
    Some(path.with_file_name(logical))
}
