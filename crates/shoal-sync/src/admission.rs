//! Size-bounded admission of files into the download pipeline.
//!
//! Admission is the sole source of backpressure: no file is requested
//! from the swarm until the in-flight byte total leaves room under the
//! scratch budget. Files are walked in torrent declaration order, which
//! keeps the disk layout predictable and guarantees forward progress.

use std::collections::BTreeSet;

use shoal_torrent::TorrentMeta;

/// The three disjoint sets tracking download admission for one sync run.
#[derive(Debug)]
pub struct AdmissionState {
    requested: BTreeSet<String>,
    in_flight: BTreeSet<String>,
    completed: BTreeSet<String>,
}

impl AdmissionState {
    /// Start a run targeting the given set of files.
    #[must_use]
    pub fn new(requested: BTreeSet<String>) -> Self {
        Self {
            requested,
            in_flight: BTreeSet::new(),
            completed: BTreeSet::new(),
        }
    }

    /// Select the next chunk of files to download and mark them in
    /// flight.
    ///
    /// Walks the torrent in file order, sums the sizes already in flight,
    /// and admits every not-yet-started requested file that fits the
    /// budget. If nothing fits, nothing is in flight, and at least one
    /// eligible file exists, the first eligible file is admitted
    /// unconditionally so an oversized file cannot starve the run.
    ///
    /// An empty return with no eligible files means the sync finishes
    /// once in-flight work drains.
    pub fn next_chunk(&mut self, meta: &TorrentMeta, budget: u64) -> Vec<String> {
        let mut total: u64 = meta
            .files()
            .iter()
            .filter(|file| self.in_flight.contains(&file.path))
            .map(|file| file.size)
            .sum();

        let mut chunk = Vec::new();
        let mut first_eligible: Option<&str> = None;
        for file in meta.files() {
            if !self.requested.contains(&file.path)
                || self.completed.contains(&file.path)
                || self.in_flight.contains(&file.path)
            {
                continue;
            }
            if first_eligible.is_none() {
                first_eligible = Some(&file.path);
            }
            let fits = total
                .checked_add(file.size)
                .map_or(false, |sum| sum <= budget);
            if !fits {
                continue;
            }
            chunk.push(file.path.clone());
            total += file.size;
        }

        // Deadlock break: with nothing in flight and nothing admitted,
        // the first eligible file is taken regardless of its size.
        if chunk.is_empty() && total == 0 {
            if let Some(path) = first_eligible {
                chunk.push(path.to_string());
            }
        }
        for path in &chunk {
            self.in_flight.insert(path.clone());
        }
        chunk
    }

    /// Mark a file's download-and-upload cycle as finished.
    pub fn complete(&mut self, path: &str) {
        self.in_flight.remove(path);
        self.completed.insert(path.to_string());
    }

    /// Whether every requested file has completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.requested.is_subset(&self.completed)
    }

    /// The target set for this run.
    #[must_use]
    pub fn requested(&self) -> &BTreeSet<String> {
        &self.requested
    }

    /// Bytes currently admitted but not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> &BTreeSet<String> {
        &self.in_flight
    }
}
