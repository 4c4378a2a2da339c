//! Sorted run files.
//!
//! A run is a file of fixed-size pages (see `page.rs`) whose concatenated
//! tuples are sorted. Runs are written once by a [`RunWriter`] and read
//! sequentially by a [`RunScanner`]. A [`SortedRun`] owns its file: dropping it
//! removes the file unless [`SortedRun::keep`] was called, and dropping an
//! unfinished writer removes the partial file. Every exit path of the sort,
//! errors and cancellation included, therefore cleans up after itself.
//!
//! File names follow `{prefix}{operator_id} {run_index}`; the index counter
//! lives in a [`RunNamer`] owned by one sort instance.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, warn};

use super::page::{Page, PageBuilder, PageCodec};
use crate::{error::ExecError, tuple::Tuple};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunKey {
    pub operator_id: u32,
    pub run_index: u64,
}

/// Hands out run keys with a monotonically increasing index, starting at 1.
#[derive(Debug, Clone)]
pub struct RunNamer {
    prefix: String,
    operator_id: u32,
    next_index: u64,
}

impl RunNamer {
    pub fn new(prefix: impl Into<String>, operator_id: u32) -> Self {
        Self {
            prefix: prefix.into(),
            operator_id,
            next_index: 1,
        }
    }

    pub fn next_key(&mut self) -> RunKey {
        let key = RunKey {
            operator_id: self.operator_id,
            run_index: self.next_index,
        };
        self.next_index += 1;
        key
    }

    pub fn path(&self, key: RunKey) -> PathBuf {
        PathBuf::from(format!("{}{} {}", self.prefix, key.operator_id, key.run_index))
    }
}

/// Cooperative cancellation, checked between tuples.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<(), ExecError> {
        if self.is_cancelled() {
            Err(ExecError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn remove_run_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("removed run file {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("failed to remove run file {}: {}", path.display(), e),
    }
}

#[derive(Debug)]
pub struct SortedRun {
    key: RunKey,
    path: PathBuf,
    codec: PageCodec,
    len: usize,
    num_pages: usize,
    keep: bool,
}

impl SortedRun {
    /// Writes the tuples of `iter`, which must already be in sorted order,
    /// into a new run file.
    pub fn create(
        key: RunKey,
        path: PathBuf,
        codec: &PageCodec,
        iter: impl Iterator<Item = Result<Tuple, ExecError>>,
        cancel: &CancelFlag,
    ) -> Result<Self, ExecError> {
        let mut writer = RunWriter::create(key, path, codec.clone())?;
        for tuple in iter {
            cancel.check()?;
            writer.append(&tuple?)?;
        }
        writer.finish()
    }

    pub fn key(&self) -> RunKey {
        self.key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of tuples in the run.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn codec(&self) -> &PageCodec {
        &self.codec
    }

    pub fn scan(&self) -> Result<RunScanner<'_>, ExecError> {
        RunScanner::open(&self.path, self.codec.clone())
    }

    /// Scans the run, skipping tuples identical to their predecessor.
    pub fn scan_distinct(&self) -> Result<DistinctScanner<'_>, ExecError> {
        Ok(DistinctScanner {
            inner: self.scan()?,
            last: None,
        })
    }

    pub fn read_all(&self) -> Result<Vec<Tuple>, ExecError> {
        self.scan()?.collect()
    }

    /// Detaches the file from this handle so it outlives it.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for SortedRun {
    fn drop(&mut self) {
        if !self.keep {
            remove_run_file(&self.path);
        }
    }
}

/// Streams tuples into pages of a new run file.
pub struct RunWriter {
    key: RunKey,
    path: PathBuf,
    codec: PageCodec,
    writer: Option<BufWriter<File>>,
    builder: PageBuilder,
    len: usize,
    num_pages: usize,
}

impl RunWriter {
    pub fn create(key: RunKey, path: PathBuf, codec: PageCodec) -> Result<Self, ExecError> {
        let file = File::create(&path).map_err(|e| ExecError::io(&path, e))?;
        let builder = codec.builder();
        Ok(Self {
            key,
            path,
            codec,
            writer: Some(BufWriter::new(file)),
            builder,
            len: 0,
            num_pages: 0,
        })
    }

    pub fn append(&mut self, tuple: &Tuple) -> Result<(), ExecError> {
        if !self.builder.try_append(tuple)? {
            self.flush_page()?;
            if !self.builder.try_append(tuple)? {
                return Err(ExecError::OversizedTuple {
                    size: tuple.encoded_size()?,
                    capacity: self.codec.page_size(),
                });
            }
        }
        self.len += 1;
        Ok(())
    }

    fn flush_page(&mut self) -> Result<(), ExecError> {
        let builder = std::mem::replace(&mut self.builder, self.codec.builder());
        let page = builder.finish();
        self.write_page(&page)
    }

    fn write_page(&mut self, page: &Page) -> Result<(), ExecError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| ExecError::io(&self.path, io::Error::other("run writer already closed")))?;
        writer
            .write_all(page)
            .map_err(|e| ExecError::io(&self.path, e))?;
        self.num_pages += 1;
        Ok(())
    }

    /// Flushes the last page and closes the file.
    pub fn finish(mut self) -> Result<SortedRun, ExecError> {
        if !self.builder.is_empty() {
            self.flush_page()?;
        }
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| ExecError::io(&self.path, e.into_error()))?;
            file.sync_all().map_err(|e| ExecError::io(&self.path, e))?;
        }
        debug!(
            "closed run {}: {} tuples in {} pages",
            self.path.display(),
            self.len,
            self.num_pages
        );
        // Ownership of the file moves to the returned run.
        let path = std::mem::take(&mut self.path);
        Ok(SortedRun {
            key: self.key,
            path,
            codec: self.codec.clone(),
            len: self.len,
            num_pages: self.num_pages,
            keep: false,
        })
    }
}

impl Drop for RunWriter {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            return;
        }
        drop(self.writer.take());
        remove_run_file(&self.path);
    }
}

/// Sequential page reader over one run file.
pub struct RunScanner<'a> {
    path: PathBuf,
    codec: PageCodec,
    reader: BufReader<File>,
    page: Page,
    pending: std::vec::IntoIter<Tuple>,
    done: bool,
    _run: PhantomData<&'a SortedRun>,
}

impl<'a> RunScanner<'a> {
    fn open(path: &Path, codec: PageCodec) -> Result<Self, ExecError> {
        let file = File::open(path).map_err(|e| ExecError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            page: Page::new_empty(codec.page_size()),
            codec,
            reader: BufReader::new(file),
            pending: Vec::new().into_iter(),
            done: false,
            _run: PhantomData,
        })
    }

    /// Reads the next page into the scanner's page buffer. `Ok(false)` at a
    /// clean end of file.
    fn read_page(&mut self) -> Result<bool, ExecError> {
        let mut filled = 0;
        while filled < self.page.len() {
            match self.reader.read(&mut self.page[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(ExecError::io(&self.path, e)),
            }
        }
        if filled == 0 {
            return Ok(false);
        }
        if filled < self.page.len() {
            return Err(ExecError::MalformedPage(format!(
                "{} ends with a truncated page of {} bytes",
                self.path.display(),
                filled
            )));
        }
        Ok(true)
    }

    fn next_tuple(&mut self) -> Result<Option<Tuple>, ExecError> {
        loop {
            if let Some(t) = self.pending.next() {
                return Ok(Some(t));
            }
            if self.done {
                return Ok(None);
            }
            if self.read_page()? {
                self.pending = self.codec.decode(&self.page)?.into_iter();
            } else {
                self.done = true;
            }
        }
    }
}

impl<'a> Iterator for RunScanner<'a> {
    type Item = Result<Tuple, ExecError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_tuple() {
            Ok(t) => t.map(Ok),
            Err(e) => {
                self.done = true;
                self.pending = Vec::new().into_iter();
                Some(Err(e))
            }
        }
    }
}

/// Drops tuples identical to the one before; on a sorted run this leaves
/// each distinct tuple once.
pub struct DistinctScanner<'a> {
    inner: RunScanner<'a>,
    last: Option<Tuple>,
}

fn same_tuple(a: &Tuple, b: &Tuple) -> bool {
    a.len() == b.len()
        && a
            .fields()
            .iter()
            .zip(b.fields())
            .all(|(x, y)| matches!(x.compare(y), Ok(std::cmp::Ordering::Equal)))
}

impl<'a> Iterator for DistinctScanner<'a> {
    type Item = Result<Tuple, ExecError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let tuple = match self.inner.next()? {
                Ok(t) => t,
                Err(e) => return Some(Err(e)),
            };
            if self.last.as_ref().map_or(false, |l| same_tuple(l, &tuple)) {
                continue;
            }
            self.last = Some(tuple.clone());
            return Some(Ok(tuple));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::{ColumnDef, Schema},
        field::DataType,
    };
    use tempfile::TempDir;

    fn codec(page_size: usize) -> PageCodec {
        PageCodec::new(
            Arc::new(Schema::new(vec![ColumnDef::new("a", DataType::Int)])),
            page_size,
        )
    }

    fn ints(vals: &[i64]) -> Vec<Tuple> {
        vals.iter().map(|v| Tuple::from_fields(vec![(*v).into()])).collect()
    }

    fn prefix(dir: &TempDir) -> String {
        format!("{}/", dir.path().display())
    }

    #[test]
    fn test_run_names() {
        let mut namer = RunNamer::new("/tmp/sort/", 7);
        let k1 = namer.next_key();
        let k2 = namer.next_key();
        assert_eq!(k1.run_index, 1);
        assert_eq!(k2.run_index, 2);
        assert_eq!(namer.path(k2), PathBuf::from("/tmp/sort/7 2"));
        assert_eq!(namer.next_key().run_index, 3);
    }

    #[test]
    fn test_write_and_scan() {
        let dir = TempDir::new().unwrap();
        let mut namer = RunNamer::new(prefix(&dir), 1);
        let key = namer.next_key();
        let tuples = ints(&[1, 2, 3, 4, 5]);
        // Two ints per 20 byte page.
        let run = SortedRun::create(
            key,
            namer.path(key),
            &codec(20),
            tuples.clone().into_iter().map(Ok),
            &CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(run.len(), 5);
        assert_eq!(run.num_pages(), 3);
        assert_eq!(fs::metadata(run.path()).unwrap().len(), 60);
        assert_eq!(run.read_all().unwrap(), tuples);
    }

    #[test]
    fn test_drop_removes_file_unless_kept() {
        let dir = TempDir::new().unwrap();
        let mut namer = RunNamer::new(prefix(&dir), 1);

        let key = namer.next_key();
        let run = SortedRun::create(key, namer.path(key), &codec(20), ints(&[1]).into_iter().map(Ok), &CancelFlag::new())
            .unwrap();
        let path = run.path().to_path_buf();
        assert!(path.exists());
        drop(run);
        assert!(!path.exists());

        let key = namer.next_key();
        let run = SortedRun::create(key, namer.path(key), &codec(20), ints(&[1]).into_iter().map(Ok), &CancelFlag::new())
            .unwrap();
        let kept = run.keep();
        assert!(kept.exists());
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let mut namer = RunNamer::new(prefix(&dir), 1);
        let key = namer.next_key();
        let path = namer.path(key);
        let input = vec![
            Ok(Tuple::from_fields(vec![1.into()])),
            Err(ExecError::Evaluation("boom".to_string())),
        ];
        let err = SortedRun::create(key, path.clone(), &codec(20), input.into_iter(), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, ExecError::Evaluation(_)));
        assert!(!path.exists());

        let cancel = CancelFlag::new();
        cancel.cancel();
        let key = namer.next_key();
        let path = namer.path(key);
        let err = SortedRun::create(key, path.clone(), &codec(20), ints(&[1, 2]).into_iter().map(Ok), &cancel)
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled));
        assert!(!path.exists());
    }

    #[test]
    fn test_truncated_file_is_malformed() {
        let dir = TempDir::new().unwrap();
        let mut namer = RunNamer::new(prefix(&dir), 1);
        let key = namer.next_key();
        let run = SortedRun::create(key, namer.path(key), &codec(20), ints(&[1, 2, 3]).into_iter().map(Ok), &CancelFlag::new())
            .unwrap();
        let file = fs::OpenOptions::new().write(true).open(run.path()).unwrap();
        file.set_len(30).unwrap();
        let result: Result<Vec<Tuple>, ExecError> = run.read_all();
        assert!(matches!(result, Err(ExecError::MalformedPage(_))));
    }

    #[test]
    fn test_scan_distinct() {
        let dir = TempDir::new().unwrap();
        let mut namer = RunNamer::new(prefix(&dir), 1);
        let key = namer.next_key();
        let run = SortedRun::create(
            key,
            namer.path(key),
            &codec(20),
            ints(&[1, 1, 2, 3, 3, 3]).into_iter().map(Ok),
            &CancelFlag::new(),
        )
        .unwrap();
        let distinct: Vec<Tuple> = run.scan_distinct().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(distinct, ints(&[1, 2, 3]));
    }
}
