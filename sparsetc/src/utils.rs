use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::errors::{Result, SparseTcError};

/// Source name used in format errors raised on in-memory values.
pub const MEMORY_SOURCE: &str = "<memory>";

pub fn open_file<P>(path: P) -> Result<File>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    File::open(path).map_err(|e| SparseTcError::file(path, e))
}

pub fn open_append<P>(path: P) -> Result<BufWriter<File>>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| SparseTcError::file(path, e))?;
    Ok(BufWriter::new(f))
}

/// Reads all lines of a UTF-8 text file.
pub fn read_lines<P>(path: P) -> Result<Vec<String>>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let rdr = BufReader::new(open_file(path)?);
    rdr.lines()
        .map(|line| line.map_err(|e| SparseTcError::file(path, e)))
        .collect()
}

pub fn remove_if_exists<P>(path: P) -> Result<()>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SparseTcError::file(path, e)),
    }
}

/// A file that becomes visible under its final name only after [`AtomicFile::commit()`].
///
/// Content goes to `<name>.tmp` next to the target. Dropping an uncommitted file removes the
/// temporary, so a failed writer never leaves a partial artifact behind.
pub struct AtomicFile {
    target: PathBuf,
    tmp: PathBuf,
    wtr: Option<BufWriter<File>>,
}

impl AtomicFile {
    pub fn create<P>(target: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let target = target.as_ref().to_path_buf();
        let mut tmp_name = target
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp = target.with_file_name(tmp_name);
        let f = File::create(&tmp).map_err(|e| SparseTcError::file(&tmp, e))?;
        Ok(Self {
            target,
            tmp,
            wtr: Some(BufWriter::new(f)),
        })
    }

    pub fn commit(mut self) -> Result<()> {
        if let Some(wtr) = self.wtr.as_mut() {
            wtr.flush().map_err(|e| SparseTcError::file(&self.tmp, e))?;
        }
        // Closes the handle before renaming.
        self.wtr.take();
        fs::rename(&self.tmp, &self.target).map_err(|e| {
            let _ = fs::remove_file(&self.tmp);
            SparseTcError::file(&self.target, e)
        })
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.wtr.as_mut() {
            Some(wtr) => wtr.write(buf),
            None => Err(std::io::ErrorKind::BrokenPipe.into()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.wtr.as_mut() {
            Some(wtr) => wtr.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if self.wtr.take().is_some() {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Writes a whole file through `f` and renames it into place on success.
pub fn write_atomically<P, F>(path: P, f: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut AtomicFile) -> Result<()>,
{
    let mut file = AtomicFile::create(path)?;
    f(&mut file)?;
    file.commit()
}

/// Renames written files into place in the given order.
///
/// Every file is flushed before the first rename, so a failed write leaves all targets
/// untouched.
pub fn commit_all<I>(files: I) -> Result<()>
where
    I: IntoIterator<Item = AtomicFile>,
{
    let mut files: Vec<AtomicFile> = files.into_iter().collect();
    for file in &mut files {
        file.flush().map_err(|e| SparseTcError::file(&file.tmp, e))?;
    }
    for file in files {
        file.commit()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_utils::TempDir;

    #[test]
    fn test_atomic_file_commit() {
        let dir = TempDir::new("atomic_commit");
        let path = dir.path().join("out.txt");
        write_atomically(&path, |f| {
            f.write_all(b"a\tb\n")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(vec!["a\tb".to_string()], read_lines(&path).unwrap());
        assert!(!dir.path().join("out.txt.tmp").exists());
    }

    #[test]
    fn test_atomic_file_failure_leaves_nothing() {
        let dir = TempDir::new("atomic_failure");
        let path = dir.path().join("out.txt");
        let result = write_atomically(&path, |f| {
            f.write_all(b"partial")?;
            Err(SparseTcError::invalid_config("stop"))
        });

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!dir.path().join("out.txt.tmp").exists());
    }

    #[test]
    fn test_commit_all() {
        let dir = TempDir::new("commit_all");
        let mut a = AtomicFile::create(dir.path().join("a.txt")).unwrap();
        let mut b = AtomicFile::create(dir.path().join("b.txt")).unwrap();
        a.write_all(b"a").unwrap();
        b.write_all(b"b").unwrap();

        assert!(!dir.path().join("a.txt").exists());
        commit_all([a, b]).unwrap();
        assert_eq!("a", fs::read_to_string(dir.path().join("a.txt")).unwrap());
        assert_eq!("b", fs::read_to_string(dir.path().join("b.txt")).unwrap());
    }

    #[test]
    fn test_open_file_reports_path() {
        let dir = TempDir::new("open_missing");
        let path = dir.path().join("missing.txt");
        let err = open_file(&path).unwrap_err();

        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = TempDir::new("remove_if_exists");
        let path = dir.path().join("x.txt");
        remove_if_exists(&path).unwrap();
        fs::write(&path, "x").unwrap();
        remove_if_exists(&path).unwrap();

        assert!(!path.exists());
    }
}
