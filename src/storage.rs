use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;

use crate::symbol::{new_table, FxMap};

/// Named byte files reached through the FILE interrupt.
pub trait Storage {
    /// `None` if no file has that name.
    fn read_file(&mut self, name: &str) -> io::Result<Option<Vec<u8>>>;

    /// Create or fully overwrite.
    fn save_file(&mut self, name: &str, bytes: &[u8]) -> io::Result<()>;

    /// Create if absent, else extend.
    fn append_file(&mut self, name: &str, bytes: &[u8]) -> io::Result<()>;

    /// No-op if absent.
    fn delete_file(&mut self, name: &str) -> io::Result<()>;
}

/// Files inside one host directory. Names may not leave it.
#[derive(Clone, Debug)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStorage { root: root.into() }
    }

    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let path = Path::new(name);
        let is_plain = !name.is_empty()
            && path
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("`{}` is not a relative file name", name),
            ));
        }
        Ok(self.root.join(path))
    }
}

impl Storage for DirStorage {
    fn read_file(&mut self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.resolve(name)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn save_file(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        fs::write(self.resolve(name)?, bytes)
    }

    fn append_file(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.resolve(name)?)?;
        file.write_all(bytes)
    }

    fn delete_file(&mut self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.resolve(name)?) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Files kept in memory. Clones share the same files.
#[derive(Clone, Debug)]
pub struct MemStorage {
    files: Rc<RefCell<FxMap<String, Vec<u8>>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        MemStorage {
            files: Rc::new(RefCell::new(new_table())),
        }
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(name).cloned()
    }

    pub fn insert(&self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.borrow_mut().insert(name.into(), bytes.into());
    }

    pub fn len(&self) -> usize {
        self.files.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemStorage {
    fn read_file(&mut self, name: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.get(name))
    }

    fn save_file(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        self.insert(name, bytes);
        Ok(())
    }

    fn append_file(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        self.files
            .borrow_mut()
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }

    fn delete_file(&mut self, name: &str) -> io::Result<()> {
        self.files.borrow_mut().shift_remove(name);
        Ok(())
    }
}
