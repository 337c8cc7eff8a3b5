//! Profile-picture archive: container checks, resource limits and image
//! decoding.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use tracing::{debug, warn};

use super::error::{ArchiveError, InvalidEntry};

/// Upper bounds applied before any entry is decompressed in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_entries: usize,
    pub max_uncompressed_bytes: u64,
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self {
            max_entries: 2_000,
            max_uncompressed_bytes: 256 * 1024 * 1024,
        }
    }
}

/// File entries of an archive, by full entry name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileArchive {
    entries: BTreeMap<String, Vec<u8>>,
}

impl ProfileArchive {
    /// Read every file entry, enforcing the limits. Images are not decoded.
    pub fn read(bytes: &[u8], limits: &ArchiveLimits) -> Result<Self, ArchiveError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(format_error)?;

        let mut file_indices = Vec::new();
        let mut declared: u64 = 0;
        for i in 0..archive.len() {
            let file = archive.by_index(i).map_err(format_error)?;
            if file.is_dir() {
                continue;
            }
            declared = declared.saturating_add(file.size());
            file_indices.push(i);
        }

        if file_indices.is_empty() {
            return Err(ArchiveError::Empty);
        }
        if file_indices.len() > limits.max_entries || declared > limits.max_uncompressed_bytes {
            return Err(too_large(file_indices.len(), declared, limits));
        }

        let mut entries = BTreeMap::new();
        let mut total: u64 = 0;
        for i in file_indices {
            let mut file = archive.by_index(i).map_err(format_error)?;
            let name = file.name().to_string();

            // Declared sizes can lie; never read past the remaining budget.
            let budget = limits.max_uncompressed_bytes - total;
            let mut data = Vec::new();
            (&mut file)
                .take(budget.saturating_add(1))
                .read_to_end(&mut data)
                .map_err(format_error)?;
            total += data.len() as u64;
            if total > limits.max_uncompressed_bytes {
                return Err(too_large(entries.len() + 1, total, limits));
            }
            entries.insert(name, data);
        }

        debug!(entries = entries.len(), bytes = total, "Archive read");
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up the entry a CSV row refers to.
    ///
    /// Exact entry names win. Otherwise the last path segment is compared,
    /// and only a unique match counts.
    pub fn find(&self, name: &str) -> Option<&[u8]> {
        let name = name.trim();
        if let Some(data) = self.entries.get(name) {
            return Some(data);
        }
        let wanted = file_name(name);
        let mut matches = self
            .entries
            .iter()
            .filter(|(entry, _)| file_name(entry) == wanted);
        match (matches.next(), matches.next()) {
            (Some((_, data)), None) => Some(data),
            (Some(_), Some(_)) => {
                warn!(picture = name, "Picture name matches several archive entries");
                None
            }
            _ => None,
        }
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}

fn format_error(err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Format {
        message: err.to_string(),
    }
}

fn too_large(entries: usize, bytes: u64, limits: &ArchiveLimits) -> ArchiveError {
    ArchiveError::TooLarge {
        entries,
        bytes,
        max_entries: limits.max_entries,
        max_bytes: limits.max_uncompressed_bytes,
    }
}

/// Check an uploaded archive: readable, not empty, within limits and every
/// file entry a decodable image.
///
/// Entries are never matched to rows here.
pub fn validate_archive(bytes: &[u8], limits: &ArchiveLimits) -> Result<ProfileArchive, ArchiveError> {
    let archive = ProfileArchive::read(bytes, limits)?;

    let invalid: Vec<InvalidEntry> = archive
        .entries
        .iter()
        .filter_map(|(name, data)| match image::load_from_memory(data) {
            Ok(_) => None,
            Err(e) => {
                debug!(entry = %name, error = %e, "Archive entry is not an image");
                Some(InvalidEntry {
                    name: name.clone(),
                    message: "invalid image".to_string(),
                })
            }
        })
        .collect();

    if !invalid.is_empty() {
        return Err(ArchiveError::InvalidImages { entries: invalid });
    }
    Ok(archive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::import::test_support::{png_bytes, zip_bytes};

    #[test]
    fn test_valid_archive() {
        let zip = zip_bytes(&[("ada.png", png_bytes([10, 20, 30])), ("alan.png", png_bytes([1, 2, 3]))]);
        let archive = validate_archive(&zip, &ArchiveLimits::default()).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.find("ada.png").is_some());
        assert!(archive.find("alan.png").is_some());
    }

    #[test]
    fn test_corrupt_container() {
        let err = validate_archive(b"definitely not a zip", &ArchiveLimits::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::Format { .. }));
        assert!(err.to_string().starts_with("Error opening the ZIP file"));
    }

    #[test]
    fn test_archive_with_only_directories_is_empty() {
        let zip = crate::services::import::test_support::zip_with_dirs(&["photos/"], &[]);
        assert_eq!(
            validate_archive(&zip, &ArchiveLimits::default()).unwrap_err(),
            ArchiveError::Empty
        );
        let zip = zip_bytes(&[]);
        assert_eq!(
            validate_archive(&zip, &ArchiveLimits::default()).unwrap_err(),
            ArchiveError::Empty
        );
    }

    #[test]
    fn test_every_invalid_entry_is_listed() {
        let zip = zip_bytes(&[
            ("a.txt", b"hello".to_vec()),
            ("b.png", png_bytes([0, 0, 0])),
            ("c.doc", b"not an image".to_vec()),
        ]);
        match validate_archive(&zip, &ArchiveLimits::default()).unwrap_err() {
            ArchiveError::InvalidImages { entries } => {
                let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
                assert_eq!(names, vec!["a.txt", "c.doc"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_entry_limit() {
        let zip = zip_bytes(&[("a.png", png_bytes([1, 1, 1])), ("b.png", png_bytes([2, 2, 2]))]);
        let limits = ArchiveLimits {
            max_entries: 1,
            ..ArchiveLimits::default()
        };
        assert!(matches!(
            validate_archive(&zip, &limits),
            Err(ArchiveError::TooLarge { entries: 2, max_entries: 1, .. })
        ));
    }

    #[test]
    fn test_byte_limit() {
        let zip = zip_bytes(&[("a.png", png_bytes([1, 1, 1]))]);
        let limits = ArchiveLimits {
            max_uncompressed_bytes: 8,
            ..ArchiveLimits::default()
        };
        assert!(matches!(
            validate_archive(&zip, &limits),
            Err(ArchiveError::TooLarge { max_bytes: 8, .. })
        ));
    }

    #[test]
    fn test_unbounded_byte_limit() {
        let zip = zip_bytes(&[("a.png", png_bytes([1, 1, 1]))]);
        let limits = ArchiveLimits {
            max_uncompressed_bytes: u64::MAX,
            ..ArchiveLimits::default()
        };
        let archive = validate_archive(&zip, &limits).unwrap();
        assert_eq!(archive.find("a.png"), Some(png_bytes([1, 1, 1]).as_slice()));
    }

    #[test]
    fn test_find_by_exact_name_or_unique_file_name() {
        let zip = crate::services::import::test_support::zip_with_dirs(
            &["photos/", "old/"],
            &[
                ("photos/ada.png", png_bytes([1, 1, 1])),
                ("photos/alan.png", png_bytes([2, 2, 2])),
                ("old/alan.png", png_bytes([3, 3, 3])),
            ],
        );
        let archive = validate_archive(&zip, &ArchiveLimits::default()).unwrap();
        assert!(archive.find("photos/ada.png").is_some());
        assert!(archive.find("ada.png").is_some());
        assert!(archive.find(" ada.png ").is_some());
        // Ambiguous by file name, exact path still works
        assert!(archive.find("alan.png").is_none());
        assert!(archive.find("old/alan.png").is_some());
        assert!(archive.find("grace.png").is_none());
    }
}
