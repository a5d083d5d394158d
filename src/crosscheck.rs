use log::{debug, info, warn};

use snafu::{prelude::*, Snafu};

use std::io::Write;

use master_ballot::{ElectionTally, MasterBallot, RoundOutcome, STALL_SENTINEL};

use serde::Serialize;
use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::crosscheck::exec::{ExecOutcome, ExecStatus};
use crate::crosscheck::repo::ElectionRepo;

pub mod exec;
pub mod fullcount;
pub mod repo;
pub mod stepcount;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CheckError {
    #[snafu(display("Malformed master ballot for election {election}: {source}"))]
    BallotParse {
        source: master_ballot::BallotParseError,
        election: String,
    },
    #[snafu(display("Cannot read {path}"))]
    RepoIo {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Cannot stage the scratch workspace for the {backend} backend"))]
    Scratch {
        source: std::io::Error,
        backend: String,
    },
    #[snafu(display("Cannot launch the {backend} backend as {program:?}"))]
    BackendLaunch {
        source: std::io::Error,
        backend: String,
        program: String,
    },
    #[snafu(display("{backend} backend failed with exit status {code}:\n{stderr}"))]
    BackendFailed {
        backend: String,
        code: i32,
        stderr: String,
    },
    #[snafu(display("{backend} backend timed out after {seconds}s"))]
    BackendTimedOut { backend: String, seconds: u64 },
    #[snafu(display("Cannot parse the {backend} backend output: {detail}"))]
    UnparseableOutput { backend: String, detail: String },
    #[snafu(display(
        "Voter {voter} ranks {count} preference groups, the tally format supports at most {max}"
    ))]
    RankLimitExceeded {
        voter: String,
        count: usize,
        max: usize,
    },
    #[snafu(display(
        "Election {election}: results mismatch\n  {reference_name}: {reference}\n  {divergent_name}: {divergent}"
    ))]
    Mismatch {
        election: String,
        reference_name: String,
        reference: String,
        divergent_name: String,
        divergent: String,
    },
    #[snafu(display("JSON rendering failed"))]
    Json { source: serde_json::Error },
    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type CheckResult<T> = Result<T, CheckError>;

/// A counting backend, seen from the orchestrator.
///
/// One implementation per backend kind: the single-shot backend computes the
/// full ranked outcome in one invocation, the iterative backend reveals one
/// round per invocation and is driven by a tabulation loop. Both reduce to
/// the same canonical [`ElectionTally`] so that results are comparable.
pub trait BackendAdapter {
    fn name(&self) -> &str;

    /// Runs the backend over one election and returns the canonical tally.
    /// Inputs are never mutated; every invocation stages its own scratch
    /// workspace.
    fn run_election(
        &self,
        election: &str,
        ballot: &MasterBallot,
        roster: &[String],
    ) -> CheckResult<ElectionTally>;
}

/// Maps a finished backend process to the adapter error taxonomy.
pub(crate) fn ensure_success(backend: &str, outcome: &ExecOutcome) -> CheckResult<()> {
    match outcome.status {
        ExecStatus::Exited(0) => Ok(()),
        ExecStatus::Exited(code) => BackendFailedSnafu {
            backend,
            code,
            stderr: outcome.stderr.clone(),
        }
        .fail(),
        ExecStatus::TimedOut { after } => BackendTimedOutSnafu {
            backend,
            seconds: after.as_secs(),
        }
        .fail(),
    }
}

pub fn tally_to_json(tally: &ElectionTally) -> JSValue {
    let rounds: Vec<JSValue> = tally
        .rounds
        .iter()
        .map(|r| match r {
            RoundOutcome::Winners(ws) => json!(ws),
            RoundOutcome::Stalled => json!(STALL_SENTINEL),
        })
        .collect();
    json!(rounds)
}

pub fn ballot_to_json(ballot: &MasterBallot) -> JSValue {
    let mut m: JSMap<String, JSValue> = JSMap::new();
    for (voter, record) in ballot.voters.iter() {
        m.insert(voter.clone(), json!(record.preferences));
    }
    JSValue::Object(m)
}

#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct BackendReport {
    pub backend: String,
    pub rounds: JSValue,
}

#[derive(PartialEq, Debug, Clone, Serialize)]
pub struct ElectionReport {
    pub election: String,
    pub backends: Vec<BackendReport>,
}

/// Runs every backend over one election and checks that the canonical
/// results are structurally identical.
///
/// The first backend's tally is the reference. On the first divergence the
/// comparison stops, a diff of the two JSON renderings is printed and the
/// mismatch is returned with both results attached. A backend failure aborts
/// immediately without a partial comparison.
pub fn compare_election(
    election: &str,
    repo: &ElectionRepo,
    adapters: &[Box<dyn BackendAdapter>],
) -> CheckResult<ElectionReport> {
    if adapters.is_empty() {
        whatever!("no backends configured");
    }
    let roster = repo.load_roster(election)?;
    let ballot = repo.load_master_ballot(election)?;
    info!(
        "compare_election: {}: {} candidates, {} voters",
        election,
        roster.len(),
        ballot.len()
    );

    print!("{}:", election);
    let _ = std::io::stdout().flush();
    let mut results: Vec<(String, ElectionTally)> = Vec::new();
    for adapter in adapters.iter() {
        print!(" {}", adapter.name());
        let _ = std::io::stdout().flush();
        match adapter.run_election(election, &ballot, &roster) {
            Ok(tally) => {
                debug!("compare_election: {}: {:?}", adapter.name(), tally);
                results.push((adapter.name().to_string(), tally));
            }
            Err(e) => {
                println!();
                return Err(e);
            }
        }
    }

    let (reference_name, reference_tally) = &results[0];
    let reference =
        serde_json::to_string_pretty(&tally_to_json(reference_tally)).context(JsonSnafu {})?;
    for (divergent_name, tally) in results.iter().skip(1) {
        if !reference_tally.matches(tally) {
            println!();
            let divergent =
                serde_json::to_string_pretty(&tally_to_json(tally)).context(JsonSnafu {})?;
            warn!(
                "election {}: {} and {} disagree",
                election, reference_name, divergent_name
            );
            print_diff(reference.as_str(), divergent.as_str(), "\n");
            return MismatchSnafu {
                election,
                reference_name,
                reference,
                divergent_name,
                divergent,
            }
            .fail();
        }
    }
    println!(" OK");

    Ok(ElectionReport {
        election: election.to_string(),
        backends: results
            .iter()
            .map(|(name, tally)| BackendReport {
                backend: name.clone(),
                rounds: tally_to_json(tally),
            })
            .collect(),
    })
}

/// Sequentially compares a batch of elections, stopping at the first hard
/// error so a systemic failure is never masked by later successes.
pub fn compare_all(
    elections: &[String],
    repo: &ElectionRepo,
    adapters: &[Box<dyn BackendAdapter>],
) -> CheckResult<Vec<ElectionReport>> {
    let mut reports: Vec<ElectionReport> = Vec::new();
    for election in elections.iter() {
        reports.push(compare_election(election, repo, adapters)?);
    }
    Ok(reports)
}
