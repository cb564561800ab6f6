//! tar.gz packing of an output folder

use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::Result;

/// Pack `dir` into an in-memory tar.gz rooted at the folder's own name
pub fn tar_gz(dir: &Path) -> Result<Vec<u8>> {
    let name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "outputs".into());

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(&name, dir)?;
    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;

    #[test]
    fn test_archive_contains_the_tree() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("outputs_x");
        fs::create_dir_all(root.join("Goa(13)/2024/JAN")).unwrap();
        fs::write(root.join("Goa(13)/2024/JAN/a.xlsx"), b"PK").unwrap();

        let bytes = tar_gz(&root).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();

        assert!(names.iter().any(|n| n == "outputs_x/Goa(13)/2024/JAN/a.xlsx"));
    }
}
