use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use log::debug;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Name prefix for files still being extracted. A failed extraction
/// leaves these behind so the user can see what was incomplete.
pub const PARTIAL_PREFIX: &str = ".portal-partial-";

/// The staged payload: a compressed tar archive in an unnamed temp file,
/// with its size known before the transfer starts.
pub struct Payload {
    file: fs::File,
    size: u64,
}

impl Payload {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn into_file(self) -> fs::File {
        self.file
    }
}

/// Archives the given files and directories into a zstd-compressed tar
/// stream staged in a temp file. Entries keep their names, relative
/// structure and unix modes. Blocking; run it on a blocking thread.
pub fn pack(paths: &[PathBuf]) -> Result<Payload> {
    let staging = tempfile::tempfile()?;
    let encoder = zstd::Encoder::new(staging, 0)?;
    let mut builder = tar::Builder::new(encoder);

    for path in paths {
        let name = path.file_name().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot archive {}", path.display()),
            ))
        })?;
        let meta = fs::metadata(path)?;
        if meta.is_dir() {
            builder.append_dir_all(name, path)?;
        } else {
            builder.append_path_with_name(path, name)?;
        }
    }

    let encoder = builder.into_inner()?;
    let mut file = encoder.finish()?;
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    debug!("staged payload of {size} bytes");
    Ok(Payload { file, size })
}

/// Extracts a compressed tar stream into `dest`, streaming entry by
/// entry. Entry paths are validated before anything touches the disk;
/// absolute paths and parent components are refused. Regular files are
/// written under a partial name and renamed into place once complete.
/// Returns the top-level names that were extracted. Blocking.
pub fn unpack<R: Read>(reader: R, dest: &Path) -> Result<Vec<String>> {
    let decoder = zstd::Decoder::new(reader)?;
    let mut archive = tar::Archive::new(decoder);
    let mut names = BTreeSet::new();

    fs::create_dir_all(dest)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path().map_err(|_| Error::Malformed)?.into_owned();
        let rel = sanitize(&raw)?;
        if let Some(Component::Normal(first)) = rel.components().next() {
            names.insert(first.to_string_lossy().into_owned());
        }

        let target = dest.join(&rel);
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&target)?;
        } else if kind.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let file_name = rel
                .file_name()
                .ok_or_else(|| Error::UnsafePath(raw.clone()))?;
            let partial = target.with_file_name(format!(
                "{PARTIAL_PREFIX}{}",
                file_name.to_string_lossy()
            ));
            let mut out = fs::File::create(&partial)?;
            io::copy(&mut entry, &mut out)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(mode) = entry.header().mode() {
                    fs::set_permissions(&partial, fs::Permissions::from_mode(mode))?;
                }
            }
            fs::rename(&partial, &target)?;
        } else {
            // Links and special files are not carried.
            debug!("skipping {:?} entry {}", kind, raw.display());
        }
    }

    Ok(names.into_iter().collect())
}

/// Keeps only plain name components. Anything that could escape the
/// destination directory is an error, not something to normalize away.
fn sanitize(path: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::UnsafePath(path.to_path_buf()))
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(Error::UnsafePath(path.to_path_buf()));
    }
    Ok(clean)
}

/// Blocking `Read` over the chunk channel filled by the transfer task.
/// EOF when the sending side drops the channel.
pub struct ChunkReader {
    rx: mpsc::Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
}

impl ChunkReader {
    pub fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        ChunkReader {
            rx,
            buf: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.buf.len() {
            match self.rx.blocking_recv() {
                Some(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    use tempfile::TempDir;

    fn write_file(path: &Path, contents: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::File::create(path).unwrap().write_all(contents).unwrap();
    }

    #[test]
    fn pack_unpack_round_trips_files_and_dirs() {
        let src = TempDir::new().unwrap();
        write_file(&src.path().join("a.txt"), b"hi");
        write_file(&src.path().join("tree/b.bin"), &[0xAA; 4096]);
        write_file(&src.path().join("tree/nested/c.txt"), b"deep");

        let payload = pack(&[src.path().join("a.txt"), src.path().join("tree")]).unwrap();
        assert!(payload.size() > 0);

        let dest = TempDir::new().unwrap();
        let names = unpack(payload.into_file(), dest.path()).unwrap();
        assert_eq!(names, vec!["a.txt".to_string(), "tree".to_string()]);

        assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"hi");
        assert_eq!(
            fs::read(dest.path().join("tree/b.bin")).unwrap(),
            vec![0xAA; 4096]
        );
        assert_eq!(
            fs::read(dest.path().join("tree/nested/c.txt")).unwrap(),
            b"deep"
        );
    }

    #[cfg(unix)]
    #[test]
    fn pack_unpack_preserves_unix_modes() {
        use std::os::unix::fs::PermissionsExt;

        let src = TempDir::new().unwrap();
        let script = src.path().join("run.sh");
        write_file(&script, b"#!/bin/sh\n");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let payload = pack(&[script]).unwrap();
        let dest = TempDir::new().unwrap();
        unpack(payload.into_file(), dest.path()).unwrap();

        let mode = fs::metadata(dest.path().join("run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn zero_byte_file_round_trips() {
        let src = TempDir::new().unwrap();
        write_file(&src.path().join("empty"), b"");

        let payload = pack(&[src.path().join("empty")]).unwrap();
        let dest = TempDir::new().unwrap();
        let names = unpack(payload.into_file(), dest.path()).unwrap();
        assert_eq!(names, vec!["empty".to_string()]);
        assert_eq!(fs::read(dest.path().join("empty")).unwrap(), b"");
    }

    #[test]
    fn traversal_entry_is_refused_and_writes_nothing() {
        // Hand-craft an archive whose entry tries to climb out.
        let mut raw = Vec::new();
        {
            let encoder = zstd::Encoder::new(&mut raw, 0).unwrap();
            let mut builder = tar::Builder::new(encoder);
            let data = b"gotcha";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            // `append_data`/`set_path` refuse `..` components; write the
            // raw name bytes directly so the malicious entry actually
            // makes it into the archive for this test.
            let name = b"../../etc/x";
            header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = TempDir::new().unwrap();
        match unpack(&raw[..], dest.path()) {
            Err(Error::UnsafePath(path)) => {
                assert!(path.to_string_lossy().contains(".."));
            }
            other => panic!("expected UnsafePath, got {other:?}"),
        }
        assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);
    }

    #[test]
    fn sanitizer_rejects_escapes() {
        assert!(sanitize(Path::new("/etc/passwd")).is_err());
        assert!(sanitize(Path::new("../up")).is_err());
        assert!(sanitize(Path::new("a/../../b")).is_err());
        assert!(sanitize(Path::new("")).is_err());
        assert!(sanitize(Path::new("ok/fine.txt")).is_ok());
        assert_eq!(
            sanitize(Path::new("./ok/./fine.txt")).unwrap(),
            PathBuf::from("ok/fine.txt")
        );
    }

    #[test]
    fn chunk_reader_reassembles_stream() {
        let (tx, rx) = mpsc::channel(4);
        let handle = std::thread::spawn(move || {
            let mut reader = ChunkReader::new(rx);
            let mut all = Vec::new();
            reader.read_to_end(&mut all).unwrap();
            all
        });
        for chunk in [&b"ab"[..], &b""[..], &b"cdef"[..], &b"g"[..]] {
            tx.blocking_send(chunk.to_vec()).unwrap();
        }
        drop(tx);
        assert_eq!(handle.join().unwrap(), b"abcdefg");
    }
}
