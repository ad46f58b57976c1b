//! Archiver — packages a day's CSV tree into a single archive with atomic
//! replacement of any prior archive for the same date (§4.7). The rename-
//! before-write, delete-backup-only-on-success discipline mirrors the
//! teacher's checkpoint generations, reduced to a single backup slot since
//! only one replacement happens per call.

use crate::error::EngineError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Produces `<root>/<data_type>/<date>.archive`, zipping every file under
/// `<root>/<data_type>/<date>/**` with paths preserved relative to
/// `<date>/`. On success the uncompressed tree is removed.
pub fn archive(root: &Path, data_type: &str, date: &str) -> Result<PathBuf, EngineError> {
    let tree = root.join(data_type).join(date);
    let target = root.join(data_type).join(format!("{date}.archive"));
    let backup = root.join(data_type).join(format!("{date}.archive.bak"));

    if target.exists() {
        fs::rename(&target, &backup)
            .map_err(|e| EngineError::Sink(format!("backing up prior archive: {e}")))?;
    }

    match write_zip(&tree, &target) {
        Ok(()) => {
            if backup.exists() {
                let _ = fs::remove_file(&backup);
            }
            fs::remove_dir_all(&tree)
                .map_err(|e| EngineError::Sink(format!("removing archived tree: {e}")))?;
            Ok(target)
        }
        Err(e) => {
            let _ = fs::remove_file(&target);
            Err(e)
        }
    }
}

fn write_zip(tree: &Path, target: &Path) -> Result<(), EngineError> {
    let file = fs::File::create(target).map_err(|e| EngineError::Sink(format!("creating archive: {e}")))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in walk(tree)? {
        let relative = entry
            .strip_prefix(tree)
            .map_err(|e| EngineError::Sink(format!("computing archive path: {e}")))?;
        let name = relative.to_string_lossy().replace('\\', "/");
        writer
            .start_file(name, options)
            .map_err(|e| EngineError::Sink(format!("starting archive entry: {e}")))?;
        let bytes = fs::read(&entry).map_err(|e| EngineError::Sink(format!("reading {}: {e}", entry.display())))?;
        writer.write_all(&bytes).map_err(|e| EngineError::Sink(format!("writing archive entry: {e}")))?;
    }

    writer.finish().map_err(|e| EngineError::Sink(format!("finalizing archive: {e}")))?;
    Ok(())
}

fn walk(dir: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = fs::read_dir(&current)
            .map_err(|e| EngineError::Sink(format!("reading {}: {e}", current.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Sink(format!("reading dir entry: {e}")))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn archive_contains_every_csv_under_the_date_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_file(&root.join("ec2/2026-07-26/Linux/us-east-1.csv"), "a,b\n1,2\n");
        write_file(&root.join("ec2/2026-07-26/Windows/us-west-2.csv"), "a,b\n3,4\n");

        let archive_path = archive(root, "ec2", "2026-07-26").unwrap();
        assert!(archive_path.exists());

        let file = fs::File::open(&archive_path).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let mut names: Vec<String> = (0..zip.len()).map(|i| zip.by_index(i).unwrap().name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["Linux/us-east-1.csv", "Windows/us-west-2.csv"]);
    }

    #[test]
    fn archiving_removes_the_uncompressed_tree_on_success() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_file(&root.join("ec2/2026-07-26/Linux/us-east-1.csv"), "a,b\n1,2\n");

        archive(root, "ec2", "2026-07-26").unwrap();
        assert!(!root.join("ec2/2026-07-26").exists());
    }

    #[test]
    fn re_archiving_replaces_the_prior_archive_without_a_leftover_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_file(&root.join("ec2/2026-07-26/Linux/us-east-1.csv"), "first\n");
        let first = archive(root, "ec2", "2026-07-26").unwrap();
        let first_len = fs::metadata(&first).unwrap().len();

        write_file(&root.join("ec2/2026-07-26/Linux/us-east-1.csv"), "second, with more content\n");
        write_file(&root.join("ec2/2026-07-26/Windows/us-west-2.csv"), "more\n");
        let second = archive(root, "ec2", "2026-07-26").unwrap();

        assert_eq!(first, second);
        assert!(!root.join("ec2/2026-07-26.archive.bak").exists());
        assert_ne!(fs::metadata(&second).unwrap().len(), first_len);
    }

    #[test]
    fn extracted_archive_round_trips_file_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        write_file(&root.join("ec2/2026-07-26/Linux/us-east-1.csv"), "date,cost\n2026-07-26,0.0052\n");

        let archive_path = archive(root, "ec2", "2026-07-26").unwrap();
        let file = fs::File::open(&archive_path).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let mut entry = zip.by_name("Linux/us-east-1.csv").unwrap();
        let mut contents = String::new();
        std::io::Read::read_to_string(&mut entry, &mut contents).unwrap();
        assert_eq!(contents, "date,cost\n2026-07-26,0.0052\n");
    }
}
