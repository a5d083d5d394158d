// Adapter for the single-shot counting backend.
//
// The backend expects a fake home directory holding the election data and
// prints the complete ranked outcome on stdout in one invocation.

use log::{debug, info};

use snafu::prelude::*;

use std::fs;
use std::path::Path;

use master_ballot::{ElectionTally, MasterBallot, RoundOutcome};

use crate::crosscheck::exec::{scratch_dir, BackendRunner};
use crate::crosscheck::{
    ensure_success, BackendAdapter, BackendLaunchSnafu, CheckResult, ScratchSnafu,
    UnparseableOutputSnafu,
};

/// The stdout line after which the ranked rows start.
pub const RESULTS_MARKER: &str = "Final ranked list:";

const BACKEND_NAME: &str = "fullcount";

pub struct FullCountAdapter {
    binary: String,
    runner: Box<dyn BackendRunner>,
}

impl FullCountAdapter {
    pub fn new(binary: &str, runner: Box<dyn BackendRunner>) -> FullCountAdapter {
        FullCountAdapter {
            binary: binary.to_string(),
            runner,
        }
    }

    /// Lays out the backend's expected home directory structure: the roster
    /// under `<election>/ballot-<election>` and the transcript under
    /// `results-<election>/master-<election>`.
    fn stage(
        &self,
        scratch: &Path,
        election: &str,
        ballot: &MasterBallot,
        roster: &[String],
    ) -> CheckResult<()> {
        let stage_io = |res: std::io::Result<()>| {
            res.context(ScratchSnafu {
                backend: BACKEND_NAME,
            })
        };

        let data_dir = scratch.join(election);
        stage_io(fs::create_dir(&data_dir))?;
        let mut roster_text = roster.join("\n");
        roster_text.push('\n');
        stage_io(fs::write(
            data_dir.join(format!("ballot-{}", election)),
            roster_text,
        ))?;

        let results_dir = scratch.join(format!("results-{}", election));
        stage_io(fs::create_dir(&results_dir))?;
        stage_io(fs::write(
            results_dir.join(format!("master-{}", election)),
            ballot.to_transcript(),
        ))?;
        Ok(())
    }

    /// Extracts the ranked rows that follow [`RESULTS_MARKER`]: one
    /// whitespace-tokenized winner group per line, up to the first blank line
    /// or the end of the stream.
    fn parse_stdout(&self, stdout: &str) -> CheckResult<ElectionTally> {
        let mut in_list = false;
        let mut rounds: Vec<RoundOutcome> = Vec::new();
        for line in stdout.lines() {
            if line == RESULTS_MARKER {
                in_list = true;
                continue;
            }
            if in_list {
                if line.trim().is_empty() {
                    break;
                }
                let group: Vec<String> = line.split_whitespace().map(str::to_string).collect();
                rounds.push(RoundOutcome::Winners(group));
            }
        }
        ensure!(
            in_list,
            UnparseableOutputSnafu {
                backend: BACKEND_NAME,
                detail: format!("marker line {:?} not found", RESULTS_MARKER),
            }
        );
        ensure!(
            !rounds.is_empty(),
            UnparseableOutputSnafu {
                backend: BACKEND_NAME,
                detail: "no ranked rows after the marker line",
            }
        );
        Ok(ElectionTally { rounds })
    }
}

impl BackendAdapter for FullCountAdapter {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn run_election(
        &self,
        election: &str,
        ballot: &MasterBallot,
        roster: &[String],
    ) -> CheckResult<ElectionTally> {
        let scratch = scratch_dir().context(ScratchSnafu {
            backend: BACKEND_NAME,
        })?;
        self.stage(scratch.path(), election, ballot, roster)?;

        let args = vec!["--rank".to_string(), election.to_string()];
        let env = vec![(
            "HOME".to_string(),
            scratch.path().display().to_string(),
        )];
        let outcome = self
            .runner
            .execute(scratch.path(), &self.binary, &args, &env)
            .context(BackendLaunchSnafu {
                backend: BACKEND_NAME,
                program: self.binary.clone(),
            })?;
        ensure_success(BACKEND_NAME, &outcome)?;
        debug!("fullcount stdout:\n{}", outcome.stdout);

        let tally = self.parse_stdout(&outcome.stdout)?;
        info!(
            "fullcount: election {}: {} rounds",
            election,
            tally.rounds.len()
        );
        Ok(tally)
    }
}
