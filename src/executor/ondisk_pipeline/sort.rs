// External merge sort

// Pass 0 pulls tuples from the source into a sort buffer bounded by the
// buffer budget, sorts the buffer and writes it out as one run. Passes 1..N
// merge groups of at most `buffer_pages - 1` runs into one run each until a
// single run is left. A pass finishes (every output closed) before the next
// one opens any of its runs.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    time::Instant,
};

use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;

use super::{
    comparator::{SortKey, TupleComparator},
    page::PageCodec,
    run::{CancelFlag, RunKey, RunNamer, SortedRun},
};
use crate::{
    catalog::SchemaRef,
    config::{MergeStrategy, SortConfig, PAGE_HEADER_SIZE},
    error::ExecError,
    executor::TupleSource,
    expression::Evaluator,
    tuple::Tuple,
};

/// A tuple together with its normalized sort key and encoded page size.
pub struct KeyedTuple {
    key: Vec<u8>,
    tuple: Tuple,
    size: usize,
}

impl KeyedTuple {
    pub fn new(
        comparator: &TupleComparator,
        codec: &PageCodec,
        tuple: Tuple,
    ) -> Result<Self, ExecError> {
        let key = comparator.normalized_key(&tuple)?;
        let size = codec.checked_size(&tuple)?;
        Ok(Self { key, tuple, size })
    }

    pub fn tuple(&self) -> &Tuple {
        &self.tuple
    }
}

/// In-memory buffer of pass 0. Tracks how the buffered tuples would pack
/// into pages so a flushed buffer never needs more than `max_pages` pages.
pub struct SortBuffer {
    page_size: usize,
    max_pages: usize,
    entries: Vec<KeyedTuple>,
    pages_used: usize,
    page_bytes_used: usize,
}

impl SortBuffer {
    pub fn new(page_size: usize, max_pages: usize) -> Self {
        Self {
            page_size,
            max_pages,
            entries: Vec::new(),
            pages_used: 0,
            page_bytes_used: 0,
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.pages_used = 0;
        self.page_bytes_used = 0;
    }

    /// Buffers the tuple, or hands it back untouched when it would need a
    /// page beyond the budget.
    pub fn append(&mut self, entry: KeyedTuple) -> Result<(), KeyedTuple> {
        if self.pages_used == 0 || self.page_bytes_used + entry.size > self.page_size {
            if self.pages_used == self.max_pages {
                return Err(entry);
            }
            self.pages_used += 1;
            self.page_bytes_used = PAGE_HEADER_SIZE;
        }
        self.page_bytes_used += entry.size;
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pages_used(&self) -> usize {
        self.pages_used
    }

    pub fn sort(&mut self) {
        self.entries.sort_unstable_by(|a, b| a.key.cmp(&b.key));
    }

    /// Empties the buffer in its current order.
    pub fn drain(&mut self) -> SortBufferIter<'_> {
        self.pages_used = 0;
        self.page_bytes_used = 0;
        SortBufferIter {
            inner: self.entries.drain(..),
        }
    }
}

pub struct SortBufferIter<'a> {
    inner: std::vec::Drain<'a, KeyedTuple>,
}

impl<'a> Iterator for SortBufferIter<'a> {
    type Item = Result<Tuple, ExecError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|e| Ok(e.tuple))
    }
}

/// Pass 0: turns the source into sorted runs, one per call.
pub struct RunBuilder<'a, S: TupleSource + ?Sized> {
    source: &'a mut S,
    comparator: &'a TupleComparator,
    codec: &'a PageCodec,
    namer: &'a mut RunNamer,
    cancel: &'a CancelFlag,
    buffer: SortBuffer,
    // Tuple that overflowed the previous batch; it opens the next one.
    carry: Option<KeyedTuple>,
    tuples_seen: usize,
}

impl<'a, S: TupleSource + ?Sized> RunBuilder<'a, S> {
    pub fn new(
        source: &'a mut S,
        comparator: &'a TupleComparator,
        codec: &'a PageCodec,
        namer: &'a mut RunNamer,
        cancel: &'a CancelFlag,
        buffer_pages: usize,
    ) -> Self {
        Self {
            source,
            comparator,
            codec,
            namer,
            cancel,
            buffer: SortBuffer::new(codec.page_size(), buffer_pages),
            carry: None,
            tuples_seen: 0,
        }
    }

    pub fn tuples_seen(&self) -> usize {
        self.tuples_seen
    }

    /// Fills, sorts and writes the next batch. `Ok(None)` once the source
    /// is exhausted and nothing is left over.
    pub fn next_run(&mut self) -> Result<Option<SortedRun>, ExecError> {
        self.buffer.reset();
        if let Some(entry) = self.carry.take() {
            self.buffer.append(entry).map_err(|_| {
                ExecError::InvalidState("empty sort buffer rejected a tuple".to_string())
            })?;
        }
        while let Some(tuple) = self.source.next()? {
            self.cancel.check()?;
            self.tuples_seen += 1;
            let entry = KeyedTuple::new(self.comparator, self.codec, tuple)?;
            if let Err(entry) = self.buffer.append(entry) {
                self.carry = Some(entry);
                break;
            }
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }

        self.buffer.sort();
        let key = self.namer.next_key();
        let path = self.namer.path(key);
        let run = SortedRun::create(key, path, self.codec, self.buffer.drain(), self.cancel)?;
        debug!(
            "pass 0: run {} holds {} tuples in {} pages",
            key.run_index,
            run.len(),
            run.num_pages()
        );
        Ok(Some(run))
    }
}

/// K-way merge of sorted tuple streams. The heap is ordered by normalized
/// key and then by input index, so equal keys leave in input order.
pub struct MergeIter<'c, I: Iterator<Item = Result<Tuple, ExecError>>> {
    run_iters: Vec<I>,
    heap: BinaryHeap<Reverse<(Vec<u8>, usize)>>, // (key, run_idx)
    values: Vec<Option<Tuple>>,
    comparator: &'c TupleComparator,
    failed: bool,
}

impl<'c, I: Iterator<Item = Result<Tuple, ExecError>>> MergeIter<'c, I> {
    pub fn new(mut run_iters: Vec<I>, comparator: &'c TupleComparator) -> Result<Self, ExecError> {
        let mut heap = BinaryHeap::with_capacity(run_iters.len());
        let mut values = vec![None; run_iters.len()];

        for (i, iter) in run_iters.iter_mut().enumerate() {
            if let Some(t) = iter.next() {
                let t = t?;
                heap.push(Reverse((comparator.normalized_key(&t)?, i)));
                values[i] = Some(t);
            }
        }

        Ok(Self {
            run_iters,
            heap,
            values,
            comparator,
            failed: false,
        })
    }

    fn refill(&mut self, run_idx: usize) -> Result<(), ExecError> {
        match self.run_iters[run_idx].next() {
            Some(t) => {
                let t = t?;
                let key = self.comparator.normalized_key(&t)?;
                self.heap.push(Reverse((key, run_idx)));
                self.values[run_idx] = Some(t);
                Ok(())
            }
            // Exhausted input: it simply drops out of the heap.
            None => Ok(()),
        }
    }
}

impl<'c, I: Iterator<Item = Result<Tuple, ExecError>>> Iterator for MergeIter<'c, I> {
    type Item = Result<Tuple, ExecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let Reverse((_, run_idx)) = self.heap.pop()?;
        let tuple = self.values[run_idx].take()?;
        if let Err(e) = self.refill(run_idx) {
            self.failed = true;
            return Some(Err(e));
        }
        Some(Ok(tuple))
    }
}

/// Passes 1..N.
pub struct Merger<'a> {
    comparator: &'a TupleComparator,
    codec: &'a PageCodec,
    fan_in: usize,
    strategy: MergeStrategy,
    cancel: &'a CancelFlag,
}

impl<'a> Merger<'a> {
    pub fn new(
        comparator: &'a TupleComparator,
        codec: &'a PageCodec,
        fan_in: usize,
        strategy: MergeStrategy,
        cancel: &'a CancelFlag,
    ) -> Self {
        assert!(fan_in >= 2, "merge fan-in must be at least 2");
        Self {
            comparator,
            codec,
            fan_in,
            strategy,
            cancel,
        }
    }

    /// Merges one group into a new run. The inputs are deleted once the
    /// output is closed, or on failure.
    pub fn merge_group(
        &self,
        group: Vec<SortedRun>,
        key: RunKey,
        path: std::path::PathBuf,
    ) -> Result<SortedRun, ExecError> {
        let scanners = group
            .iter()
            .map(|run| run.scan())
            .collect::<Result<Vec<_>, _>>()?;
        let merge_iter = MergeIter::new(scanners, self.comparator)?;
        let merged = SortedRun::create(key, path, self.codec, merge_iter, self.cancel)?;

        let input_len: usize = group.iter().map(|r| r.len()).sum();
        if merged.len() != input_len {
            return Err(ExecError::MalformedPage(format!(
                "merge of {} runs produced {} tuples from {}",
                group.len(),
                merged.len(),
                input_len
            )));
        }
        debug!(
            "merged {} runs into run {} ({} tuples, {} pages)",
            group.len(),
            key.run_index,
            merged.len(),
            merged.num_pages()
        );
        drop(group);
        Ok(merged)
    }

    /// One pass: every group of up to `fan_in` runs becomes one run. A group
    /// holding a single run is carried over unchanged.
    pub fn merge_pass(
        &self,
        runs: Vec<SortedRun>,
        namer: &mut RunNamer,
    ) -> Result<Vec<SortedRun>, ExecError> {
        // Output names are handed out in group order before any group runs,
        // so they do not depend on scheduling.
        let mut groups = Vec::new();
        let mut runs = runs.into_iter().peekable();
        while runs.peek().is_some() {
            let group: Vec<SortedRun> = runs.by_ref().take(self.fan_in).collect();
            let target = if group.len() > 1 {
                let key = namer.next_key();
                Some((key, namer.path(key)))
            } else {
                None
            };
            groups.push((group, target));
        }

        let merge_one = |(mut group, target): (Vec<SortedRun>, Option<(RunKey, std::path::PathBuf)>)| {
            match target {
                Some((key, path)) => self.merge_group(group, key, path),
                None => group
                    .pop()
                    .ok_or_else(|| ExecError::InvalidState("empty merge group".to_string())),
            }
        };

        match self.strategy {
            MergeStrategy::Sequential => groups.into_iter().map(merge_one).collect(),
            MergeStrategy::Parallel => groups.into_par_iter().map(merge_one).collect(),
        }
    }

    /// Repeats passes until one run is left.
    pub fn merge_all(
        &self,
        mut runs: Vec<SortedRun>,
        namer: &mut RunNamer,
        stats: &mut SortStats,
    ) -> Result<Option<SortedRun>, ExecError> {
        while runs.len() > 1 {
            let inputs = runs.len();
            runs = self.merge_pass(runs, namer)?;
            stats.merge_passes += 1;
            stats.pass_inputs.push(inputs);
            info!(
                "merge pass {}: {} runs -> {} runs (fan-in {})",
                stats.merge_passes,
                inputs,
                runs.len(),
                self.fan_in
            );
        }
        Ok(runs.pop())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SortStats {
    pub tuples: usize,
    pub runs_generated: usize,
    pub merge_passes: usize,
    /// Number of input runs of each merge pass.
    pub pass_inputs: Vec<usize>,
    pub result_pages: usize,
    pub run_generation_secs: f64,
    pub merge_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortState {
    Pending,
    Done,
    Failed,
}

/// Sort operator over a pulled tuple source. The sorted output is a single
/// run file exposed through [`OnDiskSort::result`].
pub struct OnDiskSort<S: TupleSource> {
    source: S,
    comparator: TupleComparator,
    codec: PageCodec,
    config: SortConfig,
    namer: RunNamer,
    cancel: CancelFlag,
    result: Option<SortedRun>,
    stats: SortStats,
    state: SortState,
}

impl<S: TupleSource> OnDiskSort<S> {
    /// `operator_id` must differ between sorts sharing a temp prefix.
    pub fn new(
        source: S,
        sort_keys: Vec<SortKey>,
        config: SortConfig,
        operator_id: u32,
    ) -> Result<Self, ExecError> {
        let schema = source.schema().clone();
        let comparator = TupleComparator::new(schema, sort_keys)?;
        Self::build(source, comparator, config, operator_id)
    }

    pub fn with_evaluator(
        source: S,
        sort_keys: Vec<SortKey>,
        evaluator: std::sync::Arc<dyn Evaluator>,
        config: SortConfig,
        operator_id: u32,
    ) -> Result<Self, ExecError> {
        let schema = source.schema().clone();
        let comparator = TupleComparator::with_evaluator(schema, sort_keys, evaluator)?;
        Self::build(source, comparator, config, operator_id)
    }

    fn build(
        source: S,
        comparator: TupleComparator,
        config: SortConfig,
        operator_id: u32,
    ) -> Result<Self, ExecError> {
        config.validate()?;
        let schema = source.schema().clone();
        if schema.is_empty() {
            return Err(ExecError::SchemaMismatch(
                "cannot sort tuples without attributes".to_string(),
            ));
        }
        let codec = PageCodec::new(schema, config.page_size);
        let namer = RunNamer::new(config.temp_prefix.clone(), operator_id);
        Ok(Self {
            source,
            comparator,
            codec,
            config,
            namer,
            cancel: CancelFlag::new(),
            result: None,
            stats: SortStats::default(),
            state: SortState::Pending,
        })
    }

    pub fn schema(&self) -> &SchemaRef {
        self.codec.schema()
    }

    pub fn comparator(&self) -> &TupleComparator {
        &self.comparator
    }

    /// Handle that cancels a running `execute` from another thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn stats(&self) -> &SortStats {
        &self.stats
    }

    /// The sorted run, absent before `execute` or when the source was empty.
    pub fn result(&self) -> Option<&SortedRun> {
        self.result.as_ref()
    }

    /// Takes ownership of the sorted run; its file is removed when the
    /// returned value is dropped.
    pub fn take_result(&mut self) -> Option<SortedRun> {
        self.result.take()
    }

    pub fn print_inner(&self, indent: usize, out: &mut String) {
        out.push_str(&format!("{}->sort_disk(", " ".repeat(indent)));
        let mut split = "";
        out.push('[');
        for key in self.comparator.keys() {
            out.push_str(split);
            out.push_str(&key.to_string());
            split = ", ";
        }
        out.push_str("])\n");
    }

    /// Runs the whole sort. Calling it again returns the first outcome
    /// without pulling the source.
    pub fn execute(&mut self) -> Result<Option<&SortedRun>, ExecError> {
        match self.state {
            SortState::Done => return Ok(self.result.as_ref()),
            SortState::Failed => {
                return Err(ExecError::InvalidState(
                    "sort failed on an earlier call".to_string(),
                ))
            }
            SortState::Pending => {}
        }
        match self.execute_inner() {
            Ok(result) => {
                self.result = result;
                self.state = SortState::Done;
                Ok(self.result.as_ref())
            }
            Err(e) => {
                self.state = SortState::Failed;
                Err(e)
            }
        }
    }

    fn execute_inner(&mut self) -> Result<Option<SortedRun>, ExecError> {
        // -------------- Run Generation Phase --------------
        let start_generation = Instant::now();
        let mut runs = Vec::new();
        let mut builder = RunBuilder::new(
            &mut self.source,
            &self.comparator,
            &self.codec,
            &mut self.namer,
            &self.cancel,
            self.config.buffer_pages,
        );
        while let Some(run) = builder.next_run()? {
            runs.push(run);
        }
        self.stats.tuples = builder.tuples_seen();
        self.stats.runs_generated = runs.len();
        self.stats.run_generation_secs = start_generation.elapsed().as_secs_f64();
        info!(
            "run generation: {} tuples -> {} runs in {:.2}s",
            self.stats.tuples,
            runs.len(),
            self.stats.run_generation_secs
        );

        // -------------- Run Merge Phase --------------
        let start_merge = Instant::now();
        let merger = Merger::new(
            &self.comparator,
            &self.codec,
            self.config.fan_in(),
            self.config.merge_strategy,
            &self.cancel,
        );
        let result = merger.merge_all(runs, &mut self.namer, &mut self.stats)?;
        self.stats.merge_secs = start_merge.elapsed().as_secs_f64();
        self.stats.result_pages = result.as_ref().map_or(0, |r| r.num_pages());
        if let Some(run) = &result {
            info!(
                "sort done: {} tuples in {} pages at {} after {} merge passes",
                run.len(),
                run.num_pages(),
                run.path().display(),
                self.stats.merge_passes
            );
        }
        Ok(result)
    }
}

fn check_pair(
    comparator: &TupleComparator,
    row: usize,
    prev: &Tuple,
    curr: &Tuple,
) -> Result<(), String> {
    let ord = comparator.compare(prev, curr).map_err(|e| e.to_string())?;
    if ord == std::cmp::Ordering::Greater {
        return Err(format!(
            "Sort verification failed at row {}:\n\
            Previous tuple: {}\n\
            Current tuple: {}",
            row, prev, curr
        ));
    }
    Ok(())
}

/// Checks that every adjacent pair of `result` is in comparator order.
pub fn verify_sorted(comparator: &TupleComparator, result: &[Tuple]) -> Result<(), String> {
    for (i, pair) in result.windows(2).enumerate() {
        check_pair(comparator, i + 1, &pair[0], &pair[1])?;
    }
    Ok(())
}

/// Streaming form of [`verify_sorted`]: holds one tuple at a time, so a
/// whole run can be checked while it is scanned. Returns the row count.
pub fn verify_sorted_scan(
    comparator: &TupleComparator,
    rows: impl Iterator<Item = Result<Tuple, ExecError>>,
) -> Result<usize, String> {
    let mut prev: Option<Tuple> = None;
    let mut count = 0;
    for row in rows {
        let curr = row.map_err(|e| e.to_string())?;
        if let Some(prev) = &prev {
            check_pair(comparator, count, prev, &curr)?;
        }
        prev = Some(curr);
        count += 1;
    }
    Ok(count)
}
