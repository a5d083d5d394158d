// Access to the on-disk elections repository.
//
// Layout: `<root>/completed/<election>/` holds `ballot-<election>` (the
// candidate roster, one name per line, in declared order) and
// `master-<election>` (the master ballot transcript).

use log::debug;

use snafu::prelude::*;

use std::fs;
use std::path::{Path, PathBuf};

use master_ballot::{parse_master_ballot, MasterBallot};

use crate::crosscheck::{BallotParseSnafu, CheckResult, RepoIoSnafu};

pub struct ElectionRepo {
    root: PathBuf,
}

impl ElectionRepo {
    pub fn new<P: AsRef<Path>>(root: P) -> ElectionRepo {
        ElectionRepo {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn completed_dir(&self) -> PathBuf {
        self.root.join("completed")
    }

    fn election_dir(&self, election: &str) -> PathBuf {
        self.completed_dir().join(election)
    }

    pub fn roster_path(&self, election: &str) -> PathBuf {
        self.election_dir(election)
            .join(format!("ballot-{}", election))
    }

    pub fn master_path(&self, election: &str) -> PathBuf {
        self.election_dir(election)
            .join(format!("master-{}", election))
    }

    /// All completed elections, in sorted order.
    pub fn all_elections(&self) -> CheckResult<Vec<String>> {
        let dir = self.completed_dir();
        let entries = fs::read_dir(&dir).context(RepoIoSnafu {
            path: dir.display().to_string(),
        })?;
        let mut names: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.context(RepoIoSnafu {
                path: dir.display().to_string(),
            })?;
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        names.sort();
        debug!("all_elections: {:?}", names);
        Ok(names)
    }

    /// The candidate roster, in the order declared by the election.
    pub fn load_roster(&self, election: &str) -> CheckResult<Vec<String>> {
        let path = self.roster_path(election);
        let contents = fs::read_to_string(&path).context(RepoIoSnafu {
            path: path.display().to_string(),
        })?;
        let roster: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if roster.is_empty() {
            whatever!("election {} declares no candidates", election);
        }
        Ok(roster)
    }

    pub fn load_master_ballot(&self, election: &str) -> CheckResult<MasterBallot> {
        let path = self.master_path(election);
        let contents = fs::read_to_string(&path).context(RepoIoSnafu {
            path: path.display().to_string(),
        })?;
        parse_master_ballot(contents.lines()).context(BallotParseSnafu { election })
    }
}
