use flate2::{write::GzEncoder, Compression};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;
use tracing::debug;

/// Packages the contents of `source_dir` into a gzip-compressed tar archive
/// at `output_path`. Every regular file reachable under `source_dir` is
/// included, with entry names relative to `source_dir` so the archive root
/// matches the source root exactly.
pub async fn archive(source_dir: &Path, output_path: &Path) -> std::io::Result<()> {
    let source_dir = source_dir.to_owned();
    let output_path = output_path.to_owned();
    spawn_blocking(move || archive_sync(&source_dir, &output_path)).await?
}

fn archive_sync(source_dir: &Path, output_path: &Path) -> std::io::Result<()> {
    let output = File::create(output_path)?;
    let encoder = GzEncoder::new(output, Compression::default());

    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut file_count: u64 = 0;

    for entry in walkdir(source_dir)? {
        let path = entry?;

        // symlink_metadata does not follow links; symlinks are skipped
        // entirely so every archived entry is a regular file that extracts
        // byte-identical to its source.
        if !std::fs::symlink_metadata(&path)?.is_file() {
            continue;
        }

        let relative_path = path
            .strip_prefix(source_dir)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        builder.append_path_with_name(&path, relative_path)?;
        file_count += 1;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    debug!(
        source_dir = %source_dir.display(),
        output_path = %output_path.display(),
        file_count,
        "archived directory"
    );

    Ok(())
}

fn walkdir(path: &Path) -> std::io::Result<impl Iterator<Item = std::io::Result<PathBuf>>> {
    let entries = std::fs::read_dir(path)?;
    let mut paths = Vec::new();

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        paths.push(Ok(path.clone()));

        // file_type() does not follow links, so a symlinked directory is not
        // recursed into.
        if entry.file_type()?.is_dir() {
            for subpath in walkdir(&path)? {
                paths.push(subpath);
            }
        }
    }

    Ok(paths.into_iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn entry_names(archive_path: &Path) -> BTreeSet<String> {
        let file = File::open(archive_path).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));

        archive
            .entries()
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[tokio::test]
    async fn archive_contains_exactly_the_source_files() {
        let src_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let archive_path = out_dir.path().join("source.tar.gz");

        std::fs::write(src_dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        std::fs::write(src_dir.path().join("main.py"), "print('hello')").unwrap();
        std::fs::create_dir(src_dir.path().join("pkg")).unwrap();
        std::fs::write(src_dir.path().join("pkg/lib.py"), "nested content").unwrap();

        archive(src_dir.path(), &archive_path).await.unwrap();

        let expected: BTreeSet<String> = ["Dockerfile", "main.py", "pkg/lib.py"]
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(entry_names(&archive_path), expected);
    }

    #[tokio::test]
    async fn extracted_archive_reproduces_files_byte_for_byte() {
        let src_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let unpack_dir = TempDir::new().unwrap();
        let archive_path = out_dir.path().join("source.tar.gz");

        std::fs::write(src_dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        std::fs::create_dir(src_dir.path().join("deep")).unwrap();
        std::fs::write(src_dir.path().join("deep/data.bin"), [0u8, 159, 146, 150]).unwrap();

        archive(src_dir.path(), &archive_path).await.unwrap();

        let file = File::open(&archive_path).unwrap();
        let mut unpacked = tar::Archive::new(GzDecoder::new(file));
        unpacked.unpack(unpack_dir.path()).unwrap();

        let content = std::fs::read(unpack_dir.path().join("Dockerfile")).unwrap();
        assert_eq!(content, b"FROM scratch");

        let content = std::fs::read(unpack_dir.path().join("deep/data.bin")).unwrap();
        assert_eq!(content, vec![0u8, 159, 146, 150]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn archive_skips_symlinks() {
        let src_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let archive_path = out_dir.path().join("source.tar.gz");

        std::fs::write(src_dir.path().join("Dockerfile"), "FROM scratch").unwrap();
        std::fs::create_dir(src_dir.path().join("pkg")).unwrap();
        std::fs::write(src_dir.path().join("pkg/lib.py"), "nested content").unwrap();

        // Neither a symlinked file nor anything reached through a symlinked
        // directory belongs in the archive.
        std::os::unix::fs::symlink(
            src_dir.path().join("Dockerfile"),
            src_dir.path().join("Dockerfile.link"),
        )
        .unwrap();
        std::os::unix::fs::symlink(src_dir.path().join("pkg"), src_dir.path().join("pkg_link"))
            .unwrap();

        archive(src_dir.path(), &archive_path).await.unwrap();

        let expected: BTreeSet<String> = ["Dockerfile", "pkg/lib.py"]
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(entry_names(&archive_path), expected);
    }

    #[tokio::test]
    async fn archive_of_empty_directory_is_valid_and_empty() {
        let src_dir = TempDir::new().unwrap();
        let out_dir = TempDir::new().unwrap();
        let archive_path = out_dir.path().join("source.tar.gz");

        archive(src_dir.path(), &archive_path).await.unwrap();

        assert!(entry_names(&archive_path).is_empty());
    }

    #[tokio::test]
    async fn archive_of_missing_directory_fails() {
        let out_dir = TempDir::new().unwrap();
        let archive_path = out_dir.path().join("source.tar.gz");

        let result = archive(Path::new("/nonexistent/source/tree"), &archive_path).await;

        assert!(result.is_err());
    }
}
