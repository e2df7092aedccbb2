//! ZIP member extraction for the Orange Book archive.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use obetl_core::{Dataset, DatasetSpec};

use crate::error::SourceError;

/// Extracts the catalog's member files from a downloaded ZIP archive.
///
/// Member names are matched case-insensitively and only by final path
/// component; entries with traversal components or absolute paths are
/// skipped with a warning rather than extracted (zip-slip guard, even
/// though members are only ever read into memory here).
///
/// # Errors
///
/// Returns [`SourceError::Archive`] if the bytes are not a readable ZIP and
/// [`SourceError::MissingMember`] if any requested member is absent.
pub(crate) fn extract_members(
    archive_bytes: &[u8],
    specs: &[&DatasetSpec],
) -> Result<HashMap<Dataset, Vec<u8>>, SourceError> {
    let mut zip =
        zip::ZipArchive::new(Cursor::new(archive_bytes)).map_err(|e| SourceError::Archive {
            reason: format!("not a valid ZIP archive: {e}"),
        })?;

    // Map of lowercased member file name -> archive index.
    let mut name_index: HashMap<String, usize> = HashMap::new();
    for i in 0..zip.len() {
        let entry = zip.by_index_raw(i).map_err(|e| SourceError::Archive {
            reason: format!("unreadable archive entry {i}: {e}"),
        })?;
        let raw_name = entry.name().to_string();
        if raw_name.contains("..") || raw_name.starts_with('/') || raw_name.starts_with('\\') {
            tracing::warn!(member = %raw_name, "skipping unsafe path in archive");
            continue;
        }
        let file_name = raw_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(raw_name.as_str())
            .to_ascii_lowercase();
        if !file_name.is_empty() {
            name_index.entry(file_name).or_insert(i);
        }
    }

    let mut members = HashMap::new();
    for spec in specs {
        let wanted = spec.member.to_ascii_lowercase();
        let index = name_index
            .get(&wanted)
            .copied()
            .ok_or_else(|| SourceError::MissingMember {
                member: spec.member.clone(),
            })?;

        let mut entry = zip.by_index(index).map_err(|e| SourceError::Archive {
            reason: format!("failed to open member '{}': {e}", spec.member),
        })?;
        let mut content = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry
            .read_to_end(&mut content)
            .map_err(|e| SourceError::Archive {
                reason: format!("failed to read member '{}': {e}", spec.member),
            })?;

        tracing::debug!(
            dataset = %spec.dataset,
            member = %spec.member,
            bytes = content.len(),
            "extracted archive member"
        );
        members.insert(spec.dataset, content);
    }

    Ok(members)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use obetl_core::SourceEncoding;

    use super::*;

    fn make_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            for (name, content) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    fn spec(dataset: Dataset, member: &str) -> DatasetSpec {
        DatasetSpec {
            dataset,
            member: member.to_string(),
            encoding: SourceEncoding::ZippedDelimited,
            delimiter: '~',
            required_columns: vec!["Appl_No".to_string()],
            min_expected_rows: 0,
            max_rejection_ratio: 0.02,
            max_deletion_ratio: 0.10,
        }
    }

    #[test]
    fn extracts_requested_members() {
        let bytes = make_zip(&[
            ("products.txt", "Appl_No~Product_No\n1~1\n"),
            ("patent.txt", "Appl_No~Patent_No\n1~5\n"),
        ]);
        let products = spec(Dataset::Products, "products.txt");
        let patents = spec(Dataset::Patents, "patent.txt");

        let members = extract_members(&bytes, &[&products, &patents]).unwrap();
        assert_eq!(members.len(), 2);
        assert!(members[&Dataset::Products].starts_with(b"Appl_No"));
    }

    #[test]
    fn member_match_is_case_insensitive() {
        let bytes = make_zip(&[("PRODUCTS.TXT", "Appl_No\n1\n")]);
        let products = spec(Dataset::Products, "products.txt");

        let members = extract_members(&bytes, &[&products]).unwrap();
        assert!(members.contains_key(&Dataset::Products));
    }

    #[test]
    fn member_inside_subdirectory_is_found_by_file_name() {
        let bytes = make_zip(&[("EOBZIP_2026/products.txt", "Appl_No\n1\n")]);
        let products = spec(Dataset::Products, "products.txt");

        let members = extract_members(&bytes, &[&products]).unwrap();
        assert!(members.contains_key(&Dataset::Products));
    }

    #[test]
    fn traversal_paths_are_not_matched() {
        let bytes = make_zip(&[("../products.txt", "Appl_No\n1\n")]);
        let products = spec(Dataset::Products, "products.txt");

        let result = extract_members(&bytes, &[&products]);
        assert!(matches!(result, Err(SourceError::MissingMember { .. })));
    }

    #[test]
    fn missing_member_is_an_error() {
        let bytes = make_zip(&[("products.txt", "Appl_No\n1\n")]);
        let exclusivity = spec(Dataset::Exclusivity, "exclusivity.txt");

        let result = extract_members(&bytes, &[&exclusivity]);
        assert!(
            matches!(result, Err(SourceError::MissingMember { ref member }) if member == "exclusivity.txt")
        );
    }

    #[test]
    fn garbage_bytes_are_an_archive_error() {
        let products = spec(Dataset::Products, "products.txt");
        let result = extract_members(b"this is not a zip file", &[&products]);
        assert!(matches!(result, Err(SourceError::Archive { .. })));
    }
}
