use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::QueryError;
use super::compiler::{QueryCompiler, TermPartition};

/// Lower-cased, sorted, case-insensitively unique search terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermSet(Vec<String>);

impl TermSet {
    /// Callers guarantee `terms` are lower-cased, sorted, and unique.
    pub(super) fn from_sorted(terms: Vec<String>) -> Self {
        Self(terms)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl Deref for TermSet {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.0
    }
}

impl<'a> IntoIterator for &'a TermSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Read a line-delimited term file. Lines are trimmed; blank lines are skipped.
pub fn load_terms(path: &Path) -> Result<Vec<String>, QueryError> {
    let content = fs::read_to_string(path).map_err(|source| QueryError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let terms: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();

    debug!(path = %path.display(), terms = terms.len(), "term file loaded");
    Ok(terms)
}

/// `<base>_subset<n>`, with `n` 1-indexed.
pub fn subset_path(base: &Path, n: usize) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(format!("_subset{n}"));
    PathBuf::from(name)
}

/// Write each bin to its own subset file, one term per line. Returns the paths written, in bin order.
pub fn write_partition(base: &Path, partition: &TermPartition) -> Result<Vec<PathBuf>, QueryError> {
    let mut written = Vec::with_capacity(partition.len());

    for (i, bin) in partition.bins().iter().enumerate() {
        let path = subset_path(base, i + 1);
        write_bin(&path, bin).map_err(|source| QueryError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), terms = bin.len(), "subset written");
        written.push(path);
    }

    Ok(written)
}

fn write_bin(path: &Path, bin: &TermSet) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for term in bin {
        writeln!(out, "{term}")?;
    }
    out.flush()
}

/// Load a term file, partition it, and persist the bins next to it as subset files.
pub fn split_term_file(
    path: &Path,
    compiler: &QueryCompiler,
) -> Result<TermPartition, QueryError> {
    let terms = load_terms(path)?;
    let partition = compiler.partition(&terms);
    let written = write_partition(path, &partition)?;

    info!(
        path = %path.display(),
        terms = terms.len(),
        subsets = written.len(),
        limit = compiler.limit(),
        "term file split"
    );
    Ok(partition)
}
