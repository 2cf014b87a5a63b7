// Aggregate store: registration groups and poll tallies, persisted as two
// pipe-delimited flat files that are rewritten in full after every mutation.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::ids::UserId;
use crate::names::{self, DELIMITER};

pub const REGISTRATIONS_FILE: &str = "registrations.csv";
pub const VOTES_FILE: &str = "votes.csv";

// ---------------------------------------------------------------------------
// Error and report types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create data directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("CSV error while writing {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

/// Outcome of replaying the flat files into memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    /// `group|voter` lines accepted.
    pub registrations: usize,
    /// `poll|option|voter` lines accepted.
    pub votes: usize,
    /// Lines dropped for a wrong field count, empty name, or bad id.
    pub skipped: usize,
}

/// Locations of the two snapshot files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub registrations: PathBuf,
    pub votes: PathBuf,
}

impl StorePaths {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        StorePaths {
            registrations: dir.join(REGISTRATIONS_FILE),
            votes: dir.join(VOTES_FILE),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Group {
    /// First spelling seen for this group.
    name: String,
    members: BTreeSet<UserId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Ballot {
    name: String,
    voters: BTreeSet<UserId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Poll {
    name: String,
    /// Keyed by folded option name.
    options: BTreeMap<String, Ballot>,
}

/// Everything the store owns, keyed by folded names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Aggregates {
    groups: BTreeMap<String, Group>,
    polls: BTreeMap<String, Poll>,
}

impl Aggregates {
    fn register(&mut self, group: &str, voter: UserId) -> bool {
        let entry = self
            .groups
            .entry(names::fold(group))
            .or_insert_with(|| Group {
                name: group.trim().to_string(),
                members: BTreeSet::new(),
            });
        entry.members.insert(voter)
    }

    fn unregister(&mut self, group: &str, voter: UserId) -> bool {
        let key = names::fold(group);
        let Some(entry) = self.groups.get_mut(&key) else {
            return false;
        };
        let removed = entry.members.remove(&voter);
        if entry.members.is_empty() {
            self.groups.remove(&key);
        }
        removed
    }

    /// Moves `voter` onto `option`, leaving them in no other option of the
    /// poll. Options left without voters are dropped.
    fn cast_vote(&mut self, poll: &str, option: &str, voter: UserId) -> bool {
        let poll_entry = self
            .polls
            .entry(names::fold(poll))
            .or_insert_with(|| Poll {
                name: poll.trim().to_string(),
                options: BTreeMap::new(),
            });

        let target = names::fold(option);
        let mut changed = false;
        for (key, ballot) in poll_entry.options.iter_mut() {
            if *key != target && ballot.voters.remove(&voter) {
                changed = true;
            }
        }
        poll_entry.options.retain(|_, b| !b.voters.is_empty());

        let ballot = poll_entry.options.entry(target).or_insert_with(|| Ballot {
            name: option.trim().to_string(),
            voters: BTreeSet::new(),
        });
        ballot.voters.insert(voter) || changed
    }
}

// ---------------------------------------------------------------------------
// AggregateStore
// ---------------------------------------------------------------------------

/// The single source of truth for registrations and poll tallies.
///
/// One mutex covers both the in-memory mutation and the snapshot write that
/// follows it, so two snapshots never interleave and whatever a reader sees
/// has been (or is about to be) written to disk.
pub struct AggregateStore {
    paths: StorePaths,
    state: Mutex<Aggregates>,
}

impl AggregateStore {
    /// Create an empty store bound to `paths`. Nothing is read or written.
    pub fn new(paths: StorePaths) -> Self {
        AggregateStore {
            paths,
            state: Mutex::new(Aggregates::default()),
        }
    }

    /// Create a store and replay whatever is already on disk.
    pub fn open(paths: StorePaths) -> Self {
        let store = Self::new(paths);
        let report = store.load_from_disk();
        info!(
            registrations = report.registrations,
            votes = report.votes,
            skipped = report.skipped,
            "aggregate store loaded"
        );
        store
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    fn lock(&self) -> MutexGuard<'_, Aggregates> {
        // A panic mid-mutation leaves at worst one half-applied set insert,
        // which every invariant here tolerates.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -- mutations ---------------------------------------------------------

    /// Add `voter` to `group`. Registering twice is the same as once.
    pub fn register(&self, group: &str, voter: UserId) {
        let mut state = self.lock();
        if state.register(group, voter) {
            info!(group, %voter, "registered");
        } else {
            debug!(group, %voter, "already registered");
        }
        self.persist(&state);
    }

    /// Remove `voter` from `group`. Returns whether anything changed.
    pub fn unregister(&self, group: &str, voter: UserId) -> bool {
        let mut state = self.lock();
        let removed = state.unregister(group, voter);
        if removed {
            info!(group, %voter, "unregistered");
            self.persist(&state);
        }
        removed
    }

    /// Record `voter`'s choice of `option` in `poll`, replacing any earlier
    /// choice in the same poll.
    pub fn cast_vote(&self, poll: &str, option: &str, voter: UserId) {
        let mut state = self.lock();
        if state.cast_vote(poll, option, voter) {
            info!(poll, option, %voter, "vote cast");
        } else {
            debug!(poll, option, %voter, "vote unchanged");
        }
        self.persist(&state);
    }

    // -- queries -----------------------------------------------------------

    /// Group names in case-insensitive order.
    pub fn list_groups(&self) -> Vec<String> {
        let state = self.lock();
        let mut groups: Vec<String> = state.groups.values().map(|g| g.name.clone()).collect();
        groups.sort_by(|a, b| names::cmp_ignore_case(a, b));
        groups
    }

    /// Members of `group`; empty for an unknown group.
    pub fn members(&self, group: &str) -> BTreeSet<UserId> {
        self.lock()
            .groups
            .get(&names::fold(group))
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    pub fn member_count(&self, group: &str) -> usize {
        self.lock()
            .groups
            .get(&names::fold(group))
            .map_or(0, |g| g.members.len())
    }

    /// Vote counts per option; empty for an unknown poll.
    pub fn tally(&self, poll: &str) -> BTreeMap<String, usize> {
        self.lock()
            .polls
            .get(&names::fold(poll))
            .map(|p| {
                p.options
                    .values()
                    .map(|b| (b.name.clone(), b.voters.len()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Voter sets per option, for listing who voted for what.
    pub fn ballots(&self, poll: &str) -> Vec<(String, BTreeSet<UserId>)> {
        self.lock()
            .polls
            .get(&names::fold(poll))
            .map(|p| {
                p.options
                    .values()
                    .map(|b| (b.name.clone(), b.voters.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // -- persistence -------------------------------------------------------

    /// Replace in-memory state with the contents of the two flat files.
    ///
    /// Missing files load as empty. Lines with the wrong number of fields,
    /// an empty name, or a non-numeric id are skipped. A file that exists
    /// but cannot be opened is logged and its aggregate is left untouched.
    pub fn load_from_disk(&self) -> LoadReport {
        let mut report = LoadReport::default();
        let mut state = self.lock();

        if let Some(file) = open_for_load(&self.paths.registrations) {
            let mut loaded = Aggregates::default();
            let (ok, skipped) = load_registrations_from_reader(file, &mut loaded);
            state.groups = loaded.groups;
            report.registrations = ok;
            report.skipped += skipped;
        } else if !self.paths.registrations.exists() {
            state.groups.clear();
        }

        if let Some(file) = open_for_load(&self.paths.votes) {
            let mut loaded = Aggregates::default();
            let (ok, skipped) = load_votes_from_reader(file, &mut loaded);
            state.polls = loaded.polls;
            report.votes = ok;
            report.skipped += skipped;
        } else if !self.paths.votes.exists() {
            state.polls.clear();
        }

        report
    }

    /// Rewrite both files from the current in-memory state.
    pub fn flush_to_disk(&self) -> Result<(), StoreError> {
        let state = self.lock();
        write_snapshot(&self.paths, &state)
    }

    /// Flush while the caller already holds the lock. Failures are logged;
    /// memory stays authoritative and the next flush rewrites the files.
    fn persist(&self, state: &Aggregates) {
        if let Err(e) = write_snapshot(&self.paths, state) {
            error!("failed to persist aggregate store: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Reader-based loaders
// ---------------------------------------------------------------------------

fn open_for_load(path: &Path) -> Option<File> {
    match File::open(path) {
        Ok(file) => Some(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            None
        }
    }
}

fn flat_reader<R: Read>(rdr: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .delimiter(DELIMITER as u8)
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(rdr)
}

/// Walk every record, handing well-formed ones to `accept`. Returns
/// `(accepted, skipped)`.
fn replay<R, F>(rdr: R, fields: usize, mut accept: F) -> (usize, usize)
where
    R: Read,
    F: FnMut(&csv::StringRecord) -> bool,
{
    let mut reader = flat_reader(rdr);
    let (mut ok, mut skipped) = (0, 0);
    for result in reader.records() {
        match result {
            Ok(record) if record.len() == fields && accept(&record) => ok += 1,
            Ok(record) => {
                debug!(line = ?record.position().map(|p| p.line()), "skipping malformed record");
                skipped += 1;
            }
            Err(e) => {
                if matches!(e.kind(), csv::ErrorKind::Io(_)) {
                    warn!("stopped reading snapshot: {e}");
                    break;
                }
                debug!("skipping unreadable record: {e}");
                skipped += 1;
            }
        }
    }
    (ok, skipped)
}

fn valid_name(field: &str) -> Option<&str> {
    names::validate(field).ok().map(|_| field)
}

fn load_registrations_from_reader<R: Read>(rdr: R, into: &mut Aggregates) -> (usize, usize) {
    replay(rdr, 2, |record| {
        let (Some(group), Some(id)) = (record.get(0).and_then(valid_name), record.get(1)) else {
            return false;
        };
        let Ok(voter) = id.parse::<UserId>() else {
            return false;
        };
        into.register(group, voter);
        true
    })
}

fn load_votes_from_reader<R: Read>(rdr: R, into: &mut Aggregates) -> (usize, usize) {
    replay(rdr, 3, |record| {
        let (Some(poll), Some(option), Some(id)) = (
            record.get(0).and_then(valid_name),
            record.get(1).and_then(valid_name),
            record.get(2),
        ) else {
            return false;
        };
        let Ok(voter) = id.parse::<UserId>() else {
            return false;
        };
        // Replay through the same single-choice rule as live casting, so a
        // hand-edited file with a voter under two options keeps the later one.
        into.cast_vote(poll, option, voter);
        true
    })
}

// ---------------------------------------------------------------------------
// Snapshot writer
// ---------------------------------------------------------------------------

fn write_snapshot(paths: &StorePaths, state: &Aggregates) -> Result<(), StoreError> {
    write_records(&paths.registrations, |w| {
        for group in state.groups.values() {
            for voter in &group.members {
                let id = voter.to_string();
                w.write_record([group.name.as_str(), id.as_str()])?;
            }
        }
        Ok(())
    })?;

    write_records(&paths.votes, |w| {
        for poll in state.polls.values() {
            for ballot in poll.options.values() {
                for voter in &ballot.voters {
                    let id = voter.to_string();
                    w.write_record([poll.name.as_str(), ballot.name.as_str(), id.as_str()])?;
                }
            }
        }
        Ok(())
    })
}

/// Write a complete file next to `path` and rename it into place, so the
/// visible file is always a whole snapshot.
fn write_records<F>(path: &Path, fill: F) -> Result<(), StoreError>
where
    F: FnOnce(&mut csv::Writer<File>) -> Result<(), csv::Error>,
{
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| StoreError::CreateDir {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }

    let tmp = path.with_extension("csv.tmp");
    let file = File::create(&tmp).map_err(|e| StoreError::Write {
        path: tmp.clone(),
        source: e,
    })?;

    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER as u8)
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Never)
        .from_writer(file);

    fill(&mut writer).map_err(|e| StoreError::Csv {
        path: tmp.clone(),
        source: e,
    })?;

    let file = writer.into_inner().map_err(|e| StoreError::Write {
        path: tmp.clone(),
        source: e.into_error(),
    })?;
    file.sync_all().map_err(|e| StoreError::Write {
        path: tmp.clone(),
        source: e,
    })?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| StoreError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
