//! Source archive extraction.
//!
//! Formats are detected from magic bytes rather than URL suffixes, since
//! many release URLs carry no extension at all.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::Path;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarZst,
    Zip,
    /// Not an archive; copied as a single file.
    Plain,
}

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const TAR_MAGIC_OFFSET: usize = 257;

/// Inspect the first bytes of `path` to find its format.
///
/// # Errors
///
/// Returns an error if the file cannot be read or uses a compression this
/// runtime does not decode (bzip2, xz).
pub fn detect_format(path: &Path) -> io::Result<ArchiveFormat> {
    let mut head = Vec::with_capacity(512);
    File::open(path)?.take(512).read_to_end(&mut head)?;

    if head.starts_with(GZIP_MAGIC) {
        return Ok(ArchiveFormat::TarGz);
    }
    if head.starts_with(ZSTD_MAGIC) {
        return Ok(ArchiveFormat::TarZst);
    }
    if head.starts_with(ZIP_MAGIC) {
        return Ok(ArchiveFormat::Zip);
    }
    if head.starts_with(BZIP2_MAGIC) || head.starts_with(XZ_MAGIC) {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "bzip2 and xz archives are not supported",
        ));
    }
    if head
        .get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5)
        .is_some_and(|m| m == b"ustar")
    {
        return Ok(ArchiveFormat::Tar);
    }
    Ok(ArchiveFormat::Plain)
}

/// Unpack `archive` into `dest`, which must exist.
///
/// Plain files land at `dest/<file_name>` with the executable bit set.
/// A single top-level directory is stripped so the source root is `dest`.
///
/// # Errors
///
/// Returns any read, decode, or write failure.
pub fn extract(archive: &Path, dest: &Path, file_name: &str) -> io::Result<ArchiveFormat> {
    let format = detect_format(archive)?;
    debug!(archive = %archive.display(), ?format, "extracting");

    match format {
        ArchiveFormat::Tar => {
            tar::Archive::new(BufReader::new(File::open(archive)?)).unpack(dest)?;
        }
        ArchiveFormat::TarGz => {
            let decoder = flate2::read::GzDecoder::new(BufReader::new(File::open(archive)?));
            tar::Archive::new(decoder).unpack(dest)?;
        }
        ArchiveFormat::TarZst => {
            let decoder = zstd::stream::read::Decoder::new(File::open(archive)?)?;
            tar::Archive::new(decoder).unpack(dest)?;
        }
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipArchive::new(File::open(archive)?).map_err(io::Error::other)?;
            zip.extract(dest).map_err(io::Error::other)?;
        }
        ArchiveFormat::Plain => {
            let name = if file_name.is_empty() { "source" } else { file_name };
            let target = dest.join(name);
            fs::copy(archive, &target)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
            }
            return Ok(format);
        }
    }

    strip_components(dest)?;
    Ok(format)
}

/// If `dir` holds exactly one directory, hoist its contents into `dir`.
///
/// Returns whether anything was stripped.
///
/// # Errors
///
/// Returns any filesystem failure while moving entries.
pub fn strip_components(dir: &Path) -> io::Result<bool> {
    let entries: Vec<fs::DirEntry> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    let [only] = entries.as_slice() else {
        return Ok(false);
    };
    if !only.file_type()?.is_dir() {
        return Ok(false);
    }

    // Rename first: the top directory may contain an entry with its own name.
    let staging = dir.join(".cellar-strip");
    fs::rename(only.path(), &staging)?;
    for entry in fs::read_dir(&staging)? {
        let entry = entry?;
        fs::rename(entry.path(), dir.join(entry.file_name()))?;
    }
    fs::remove_dir(&staging)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_tar_gz_strips_top_level_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("pkg");
        tar_gz(
            &archive,
            &[
                ("pkg-1.0/configure", b"#!/bin/sh\n"),
                ("pkg-1.0/src/main.c", b"int main(){}"),
            ],
        );
        let dest = tmp.path().join("src");
        fs::create_dir(&dest).unwrap();

        assert_eq!(extract(&archive, &dest, "pkg").unwrap(), ArchiveFormat::TarGz);
        assert!(dest.join("configure").is_file());
        assert!(dest.join("src/main.c").is_file());
        assert!(!dest.join("pkg-1.0").exists());
    }

    #[test]
    fn test_tar_zst_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("pkg.tar.zst");
        {
            let file = File::create(&archive).unwrap();
            let encoder = zstd::stream::write::Encoder::new(file, 3).unwrap();
            let mut builder = tar::Builder::new(encoder.auto_finish());
            let mut header = tar::Header::new_gnu();
            header.set_size(2);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "a.txt", &b"hi"[..]).unwrap();
            builder.finish().unwrap();
        }
        let dest = tmp.path().join("out");
        fs::create_dir(&dest).unwrap();
        assert_eq!(extract(&archive, &dest, "").unwrap(), ArchiveFormat::TarZst);
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"hi");
    }

    #[test]
    fn test_plain_file_is_copied() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("blob");
        File::create(&src).unwrap().write_all(b"echo hi").unwrap();
        let dest = tmp.path().join("out");
        fs::create_dir(&dest).unwrap();

        assert_eq!(extract(&src, &dest, "tool.sh").unwrap(), ArchiveFormat::Plain);
        assert_eq!(fs::read(dest.join("tool.sh")).unwrap(), b"echo hi");
    }

    #[test]
    fn test_strip_handles_name_collision() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("foo/foo")).unwrap();
        fs::write(tmp.path().join("foo/foo/x"), b"x").unwrap();
        assert!(strip_components(tmp.path()).unwrap());
        assert!(tmp.path().join("foo/x").is_file());
    }

    #[test]
    fn test_xz_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.tar.xz");
        fs::write(&src, [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00, 0x00]).unwrap();
        assert_eq!(
            detect_format(&src).unwrap_err().kind(),
            io::ErrorKind::Unsupported
        );
    }
}
