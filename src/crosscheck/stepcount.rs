// Adapter for the iterative counting backend.
//
// The backend only reports the winners of one counting pass per invocation,
// so the adapter simulates multi-round elimination itself: it re-submits a
// tally restricted to the candidates not yet declared winners until the
// nominee pool is empty or the backend stalls.

use log::{debug, info, warn};

use lazy_static::lazy_static;
use regex::Regex;
use snafu::prelude::*;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use master_ballot::{ElectionTally, MasterBallot, RoundOutcome};

use crate::crosscheck::exec::{scratch_dir, BackendRunner};
use crate::crosscheck::{
    ensure_success, BackendAdapter, BackendLaunchSnafu, CheckResult, RankLimitExceededSnafu,
    ScratchSnafu, UnparseableOutputSnafu,
};

pub const CONF_FILE: &str = "stepcount.conf";
pub const QUORUM_FILE: &str = "quorum.txt";
pub const TALLY_FILE: &str = "tally.txt";
pub const RESULTS_FILE: &str = "results.txt";

/// The results-file line after which the winner lines start.
pub const WINNERS_MARKER: &str = "The winners are:";

/// The column for an unranked or eliminated candidate.
pub const NO_PREFERENCE: char = '-';

/// Preference ranks are encoded as one uppercase hex digit per column, which
/// caps the rank depth the tally format can express.
pub const MAX_RANK: usize = 15;

const BACKEND_NAME: &str = "stepcount";

lazy_static! {
    static ref OPTION_RE: Regex =
        Regex::new(r#"^\s*Option (?P<index>\w+) "(?P<name>\w+)"\s*$"#).unwrap();
}

pub struct StepCountAdapter {
    binary: String,
    runner: Box<dyn BackendRunner>,
}

impl StepCountAdapter {
    pub fn new(binary: &str, runner: Box<dyn BackendRunner>) -> StepCountAdapter {
        StepCountAdapter {
            binary: binary.to_string(),
            runner,
        }
    }

    /// Writes the per-election configuration: vote metadata plus one
    /// `Option_<hex> = <name>;` declaration per roster entry (1-based), and
    /// the quorum file.
    fn write_config(&self, scratch: &Path, election: &str, roster: &[String]) -> CheckResult<()> {
        let mut conf = String::new();
        conf.push_str(&format!("Top_Dir = {};\n", scratch.display()));
        conf.push_str(&format!("Vote_Name = {};\n", election));
        conf.push_str(&format!("Title = {};\n", election));
        conf.push_str("Secret = 0;\n");
        for (idx, name) in roster.iter().enumerate() {
            conf.push_str(&format!("Majority_{:X} = 0;\n", idx + 1));
            conf.push_str(&format!("Option_{:X} = {};\n", idx + 1, name));
        }
        fs::write(scratch.join(CONF_FILE), conf).context(ScratchSnafu {
            backend: BACKEND_NAME,
        })?;
        fs::write(scratch.join(QUORUM_FILE), "Quorum = 0\n").context(ScratchSnafu {
            backend: BACKEND_NAME,
        })?;
        Ok(())
    }

    /// Renders the per-round tally, restricted to the remaining nominees.
    ///
    /// One line per voter: `V: <votes> <voterID>`, where `<votes>` carries
    /// one character per roster column: the voter's 1-based preference rank
    /// in uppercase hex, or [`NO_PREFERENCE`] when the candidate is unranked
    /// or no longer in the pool.
    fn render_tally(
        &self,
        ballot: &MasterBallot,
        roster: &[String],
        nominees: &HashSet<String>,
    ) -> CheckResult<String> {
        let mut out = String::new();
        for (voter, record) in ballot.voters.iter() {
            ensure!(
                record.preferences.len() <= MAX_RANK,
                RankLimitExceededSnafu {
                    voter,
                    count: record.preferences.len(),
                    max: MAX_RANK,
                }
            );
            let mut columns: Vec<char> = vec![NO_PREFERENCE; roster.len()];
            for (rank, group) in record.preferences.iter().enumerate() {
                for candidate in group.iter() {
                    if !nominees.contains(candidate) {
                        continue;
                    }
                    match roster.iter().position(|c| c == candidate) {
                        Some(column) => {
                            let digit = char::from_digit((rank + 1) as u32, 16)
                                .map(|d| d.to_ascii_uppercase())
                                .unwrap_or(NO_PREFERENCE);
                            columns[column] = digit;
                        }
                        None => {
                            warn!(
                                "render_tally: voter {} ranks {:?} which is not on the ballot",
                                voter, candidate
                            );
                        }
                    }
                }
            }
            let votes: String = columns.into_iter().collect();
            out.push_str(&format!("V: {} {}\n", votes, voter));
        }
        Ok(out)
    }

    /// Parses one round's winners from the results file: the lines after
    /// [`WINNERS_MARKER`], each `Option <index> "<name>"`, up to the first
    /// blank line. An empty winner list is a legal result here; the caller
    /// decides whether it is a stall.
    fn parse_round(&self, results: &str) -> CheckResult<Vec<String>> {
        let mut in_list = false;
        let mut winners: Vec<String> = Vec::new();
        for line in results.lines() {
            if line.trim() == WINNERS_MARKER {
                in_list = true;
                continue;
            }
            if in_list {
                if line.trim().is_empty() {
                    break;
                }
                let caps = OPTION_RE.captures(line).with_context(|| {
                    UnparseableOutputSnafu {
                        backend: BACKEND_NAME,
                        detail: format!("winner line {:?} does not match the grammar", line),
                    }
                })?;
                winners.push(caps["name"].to_string());
            }
        }
        ensure!(
            in_list,
            UnparseableOutputSnafu {
                backend: BACKEND_NAME,
                detail: format!("marker line {:?} not found in the results file", WINNERS_MARKER),
            }
        );
        Ok(winners)
    }

    /// The elimination loop: one backend invocation per round over a
    /// shrinking nominee pool.
    fn run_rounds(
        &self,
        scratch: &Path,
        election: &str,
        ballot: &MasterBallot,
        roster: &[String],
    ) -> CheckResult<ElectionTally> {
        let mut nominees: HashSet<String> = roster.iter().cloned().collect();
        let mut tally = ElectionTally::default();

        while !nominees.is_empty() {
            let round_tally = self.render_tally(ballot, roster, &nominees)?;
            fs::write(scratch.join(TALLY_FILE), round_tally).context(ScratchSnafu {
                backend: BACKEND_NAME,
            })?;

            let args = vec![
                "--batch".to_string(),
                "--config".to_string(),
                scratch.join(CONF_FILE).display().to_string(),
            ];
            let outcome = self
                .runner
                .execute(scratch, &self.binary, &args, &[])
                .context(BackendLaunchSnafu {
                    backend: BACKEND_NAME,
                    program: self.binary.clone(),
                })?;
            ensure_success(BACKEND_NAME, &outcome)?;

            let results_path = scratch.join(RESULTS_FILE);
            let results = match fs::read_to_string(&results_path) {
                Ok(text) => text,
                Err(e) => {
                    return UnparseableOutputSnafu {
                        backend: BACKEND_NAME,
                        detail: format!("cannot read the results file: {}", e),
                    }
                    .fail()
                }
            };
            let winners = self.parse_round(&results)?;

            if winners.is_empty() {
                // The backend reported a round with no winner for a non-empty
                // pool. Record the stall and stop without invoking it again.
                warn!(
                    "stepcount: election {}: no winners with {} nominees left",
                    election,
                    nominees.len()
                );
                tally.rounds.push(RoundOutcome::Stalled);
                break;
            }

            info!("stepcount: election {}: next winners {:?}", election, winners);
            for winner in winners.iter() {
                ensure!(
                    nominees.remove(winner),
                    UnparseableOutputSnafu {
                        backend: BACKEND_NAME,
                        detail: format!("winner {:?} is not in the nominee pool", winner),
                    }
                );
            }
            tally.rounds.push(RoundOutcome::Winners(winners));
        }
        Ok(tally)
    }
}

impl BackendAdapter for StepCountAdapter {
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
        self.write_config(scratch.path(), election, roster)?;
        let tally = self.run_rounds(scratch.path(), election, ballot, roster)?;
        debug!("stepcount: election {}: {:?}", election, tally);
        Ok(tally)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crosscheck::test_support::{ScriptedRunner, ScriptedStep};
    use crate::crosscheck::CheckError;
    use master_ballot::{parse_master_ballot, VOTER_ID_OFFSET};

    fn ballot() -> MasterBallot {
        let text = format!(
            "{:-<w$}W001\nAlice Bob\nCarol\n{:-<w$}W002\nBob\nAlice\n",
            "",
            "",
            w = VOTER_ID_OFFSET
        );
        parse_master_ballot(text.lines()).unwrap()
    }

    fn roster() -> Vec<String> {
        vec!["Alice".to_string(), "Bob".to_string(), "Carol".to_string()]
    }

    fn round_results(winners: &[&str]) -> String {
        let mut text = String::from("Counting done.\nThe winners are:\n");
        for (i, w) in winners.iter().enumerate() {
            text.push_str(&format!("Option {} \"{}\"\n", i + 1, w));
        }
        text.push('\n');
        text
    }

    fn adapter(steps: Vec<ScriptedStep>) -> (StepCountAdapter, ScriptedRunner) {
        let runner = ScriptedRunner::new(steps);
        let adapter = StepCountAdapter::new("stepcount", Box::new(runner.clone()));
        (adapter, runner)
    }

    fn winners_step(winners: &[&str]) -> ScriptedStep {
        ScriptedStep::stdout("").writing(RESULTS_FILE, &round_results(winners))
    }

    #[test]
    fn converges_over_three_rounds() {
        let (adapter, runner) = adapter(vec![
            winners_step(&["Alice"]),
            winners_step(&["Bob"]),
            winners_step(&["Carol"]),
        ]);
        let tally = adapter.run_election("vote", &ballot(), &roster()).unwrap();
        assert_eq!(
            tally,
            ElectionTally {
                rounds: vec![
                    RoundOutcome::Winners(vec!["Alice".to_string()]),
                    RoundOutcome::Winners(vec!["Bob".to_string()]),
                    RoundOutcome::Winners(vec!["Carol".to_string()]),
                ]
            }
        );
        assert_eq!(runner.call_count(), 3);
    }

    #[test]
    fn tally_restricts_to_the_remaining_nominees() {
        let (adapter, runner) = adapter(vec![
            winners_step(&["Alice"]),
            winners_step(&["Bob"]),
            winners_step(&["Carol"]),
        ]);
        adapter.run_election("vote", &ballot(), &roster()).unwrap();

        let calls = runner.calls.borrow();
        // Round 1: full pool. W001 ties Alice and Bob at rank 1, Carol at 2;
        // W002 ranks Bob then Alice.
        assert_eq!(calls[0].files[TALLY_FILE], "V: 112 W001\nV: 21- W002\n");
        // Round 2: Alice is out, her column goes dark.
        assert_eq!(calls[1].files[TALLY_FILE], "V: -12 W001\nV: -1- W002\n");
        // Round 3: only Carol is left.
        assert_eq!(calls[2].files[TALLY_FILE], "V: --2 W001\nV: --- W002\n");
    }

    #[test]
    fn config_declares_all_options() {
        let (adapter, runner) = adapter(vec![
            winners_step(&["Alice"]),
            winners_step(&["Bob"]),
            winners_step(&["Carol"]),
        ]);
        adapter.run_election("vote", &ballot(), &roster()).unwrap();

        let calls = runner.calls.borrow();
        let conf = &calls[0].files[CONF_FILE];
        assert!(conf.contains("Vote_Name = vote;\n"));
        assert!(conf.contains("Option_1 = Alice;\n"));
        assert!(conf.contains("Option_2 = Bob;\n"));
        assert!(conf.contains("Option_3 = Carol;\n"));
        assert_eq!(calls[0].files[QUORUM_FILE], "Quorum = 0\n");
        assert_eq!(calls[0].args[0], "--batch");
    }

    #[test]
    fn ranks_encode_as_uppercase_hex() {
        let roster: Vec<String> = (1..=12).map(|i| format!("C{:02}", i)).collect();
        let prefs: String = roster
            .iter()
            .map(|c| format!("{}\n", c))
            .collect();
        let text = format!("{:-<w$}W001\n{}", "", prefs, w = VOTER_ID_OFFSET);
        let ballot = parse_master_ballot(text.lines()).unwrap();

        let mut steps: Vec<ScriptedStep> = Vec::new();
        for c in roster.iter() {
            steps.push(winners_step(&[c.as_str()]));
        }
        let (adapter, runner) = adapter(steps);
        adapter.run_election("vote", &ballot, &roster).unwrap();

        // One invocation per round, bounded by the roster size.
        assert_eq!(runner.call_count(), 12);
        let calls = runner.calls.borrow();
        assert_eq!(calls[0].files[TALLY_FILE], "V: 123456789ABC W001\n");
    }

    #[test]
    fn too_many_ranks_is_an_error() {
        let prefs: String = (1..=16).map(|i| format!("C{:02}\n", i)).collect();
        let text = format!("{:-<w$}W001\n{}", "", prefs, w = VOTER_ID_OFFSET);
        let ballot = parse_master_ballot(text.lines()).unwrap();
        let roster: Vec<String> = (1..=16).map(|i| format!("C{:02}", i)).collect();

        let (adapter, runner) = adapter(vec![]);
        let err = adapter.run_election("vote", &ballot, &roster).unwrap_err();
        assert!(matches!(err, CheckError::RankLimitExceeded { .. }));
        // The translation failed before any invocation.
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn stall_records_the_sentinel_and_stops() {
        let (adapter, runner) = adapter(vec![winners_step(&[])]);
        let tally = adapter.run_election("vote", &ballot(), &roster()).unwrap();
        assert_eq!(
            tally,
            ElectionTally {
                rounds: vec![RoundOutcome::Stalled]
            }
        );
        assert!(tally.is_stalled());
        // The backend is never invoked again after a stall.
        assert_eq!(runner.call_count(), 1);
    }

    #[test]
    fn stall_after_a_winning_round_keeps_the_earlier_rounds() {
        let (adapter, runner) = adapter(vec![winners_step(&["Alice"]), winners_step(&[])]);
        let tally = adapter.run_election("vote", &ballot(), &roster()).unwrap();
        assert_eq!(
            tally,
            ElectionTally {
                rounds: vec![
                    RoundOutcome::Winners(vec!["Alice".to_string()]),
                    RoundOutcome::Stalled,
                ]
            }
        );
        assert_eq!(runner.call_count(), 2);
    }

    #[test]
    fn tied_winners_shrink_the_pool_together() {
        let (adapter, runner) = adapter(vec![
            winners_step(&["Alice", "Bob"]),
            winners_step(&["Carol"]),
        ]);
        let tally = adapter.run_election("vote", &ballot(), &roster()).unwrap();
        assert_eq!(tally.rounds.len(), 2);
        assert_eq!(runner.call_count(), 2);
    }

    #[test]
    fn missing_marker_is_unparseable() {
        let step = ScriptedStep::stdout("").writing(RESULTS_FILE, "no results today\n");
        let (adapter, _runner) = adapter(vec![step]);
        let err = adapter
            .run_election("vote", &ballot(), &roster())
            .unwrap_err();
        assert!(matches!(err, CheckError::UnparseableOutput { .. }));
    }

    #[test]
    fn missing_results_file_is_unparseable() {
        let (adapter, _runner) = adapter(vec![ScriptedStep::stdout("")]);
        let err = adapter
            .run_election("vote", &ballot(), &roster())
            .unwrap_err();
        assert!(matches!(err, CheckError::UnparseableOutput { .. }));
    }

    #[test]
    fn malformed_winner_line_is_unparseable() {
        let step = ScriptedStep::stdout("").writing(
            RESULTS_FILE,
            "The winners are:\nAlice wins outright\n\n",
        );
        let (adapter, _runner) = adapter(vec![step]);
        let err = adapter
            .run_election("vote", &ballot(), &roster())
            .unwrap_err();
        assert!(matches!(err, CheckError::UnparseableOutput { .. }));
    }

    #[test]
    fn winner_outside_the_pool_is_unparseable() {
        let (adapter, _runner) = adapter(vec![winners_step(&["Mallory"])]);
        let err = adapter
            .run_election("vote", &ballot(), &roster())
            .unwrap_err();
        match err {
            CheckError::UnparseableOutput { detail, .. } => {
                assert!(detail.contains("Mallory"));
            }
            e => panic!("expected unparseable output, got {:?}", e),
        }
    }

    #[test]
    fn backend_failure_aborts_the_run() {
        let (adapter, _runner) = adapter(vec![ScriptedStep::exit(1, "argh\n")]);
        let err = adapter
            .run_election("vote", &ballot(), &roster())
            .unwrap_err();
        assert!(matches!(err, CheckError::BackendFailed { code: 1, .. }));
    }
}
