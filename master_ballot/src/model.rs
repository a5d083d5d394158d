// ********* Transcript data structures ***********

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;

/// Prefix that marks the start of a voter block in a master ballot transcript.
pub const HEADER_PREFIX: &str = "----";

/// Byte offset of the voter id within a header line.
///
/// The offset and length are fixed by the historical transcript layout. A
/// header line that cannot carry the full id slice is rejected as a format
/// error rather than read with a different geometry.
pub const VOTER_ID_OFFSET: usize = 23;

/// Length of the voter id field, in bytes.
pub const VOTER_ID_LEN: usize = 4;

/// The sentinel recorded in serialized results when a tabulation round
/// produced no winner.
pub const STALL_SENTINEL: &str = "__error__";

/// One voter's ranked choices.
///
/// The outer order is the preference order (index 0 is the most preferred
/// rank); each inner group holds the candidates tied at that rank.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct VoterRecord {
    pub preferences: Vec<Vec<String>>,
}

impl VoterRecord {
    /// Renders each preference group back to its space-delimited line form.
    pub fn preference_lines(&self) -> Vec<String> {
        self.preferences.iter().map(|g| g.join(" ")).collect()
    }
}

/// The aggregated transcript of all voters' ballots for one election.
///
/// Built once per election and read-only afterward. Keys are voter ids; the
/// map is ordered so that iteration (and everything derived from it, such as
/// re-serialization) is deterministic.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct MasterBallot {
    pub voters: BTreeMap<String, VoterRecord>,
}

impl MasterBallot {
    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    /// Re-serializes the ballot into transcript form.
    ///
    /// Each voter block starts with a header line padded with dashes so that
    /// the voter id sits at [`VOTER_ID_OFFSET`], followed by one
    /// space-delimited line per preference group. Parsing the output yields a
    /// structure equal to `self`.
    pub fn to_transcript(&self) -> String {
        let mut out = String::new();
        for (voter, record) in self.voters.iter() {
            out.push_str(&format!("{:-<width$}{}\n", "", voter, width = VOTER_ID_OFFSET));
            for line in record.preference_lines() {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }
}

// ********* Canonical results ***********

/// The outcome of one tabulation round.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum RoundOutcome {
    /// The candidates declared winners this round, possibly tied.
    Winners(Vec<String>),
    /// The backend reported no winner for a non-empty nominee pool. Recorded
    /// in place of a winner group so the run stays comparable.
    Stalled,
}

impl RoundOutcome {
    /// Round equality is order-independent: a round's winners form a set.
    pub fn matches(&self, other: &RoundOutcome) -> bool {
        match (self, other) {
            (RoundOutcome::Winners(a), RoundOutcome::Winners(b)) => {
                let mut a = a.clone();
                let mut b = b.clone();
                a.sort();
                b.sort();
                a == b
            }
            (RoundOutcome::Stalled, RoundOutcome::Stalled) => true,
            _ => false,
        }
    }
}

/// The canonical, backend-agnostic result of tabulating one election: the
/// ordered sequence of per-round winner groups.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ElectionTally {
    pub rounds: Vec<RoundOutcome>,
}

impl ElectionTally {
    /// Structural equality between two tallies: same number of rounds and
    /// matching winner sets round by round. Order matters across rounds but
    /// not within one.
    pub fn matches(&self, other: &ElectionTally) -> bool {
        self.rounds.len() == other.rounds.len()
            && self
                .rounds
                .iter()
                .zip(other.rounds.iter())
                .all(|(a, b)| a.matches(b))
    }

    pub fn is_stalled(&self) -> bool {
        self.rounds
            .iter()
            .any(|r| matches!(r, RoundOutcome::Stalled))
    }
}

// ********* Errors ***********

/// Violations of the master ballot transcript grammar.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum BallotParseError {
    /// A preference line appeared before any voter header.
    PreferenceBeforeHeader { lineno: usize },
    /// A header line is too short to carry the voter id field.
    TruncatedHeader { lineno: usize },
    /// The same voter id opened two blocks.
    DuplicateVoter { voter_id: String, lineno: usize },
}

impl Error for BallotParseError {}

impl Display for BallotParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BallotParseError::PreferenceBeforeHeader { lineno } => {
                write!(f, "line {}: preference line before any voter header", lineno)
            }
            BallotParseError::TruncatedHeader { lineno } => {
                write!(f, "line {}: header line too short to carry a voter id", lineno)
            }
            BallotParseError::DuplicateVoter { voter_id, lineno } => {
                write!(f, "line {}: duplicate voter id {:?}", lineno, voter_id)
            }
        }
    }
}
