mod model;
use log::debug;

use std::collections::BTreeMap;

pub use crate::model::*;

/// Parses a master ballot transcript into a [`MasterBallot`].
///
/// A line starting with [`HEADER_PREFIX`] opens a new voter block; the voter
/// id is the fixed-width field at [`VOTER_ID_OFFSET`]. Every following
/// non-header line is whitespace-tokenized into one preference group for the
/// current voter. Blank lines are skipped.
///
/// The function is a pure function of its input: identical input always
/// yields a structurally equal ballot.
pub fn parse_master_ballot<'a, I>(lines: I) -> Result<MasterBallot, BallotParseError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut voters: BTreeMap<String, VoterRecord> = BTreeMap::new();
    let mut current: Option<String> = None;

    for (idx, raw) in lines.into_iter().enumerate() {
        let lineno = idx + 1;
        if raw.starts_with(HEADER_PREFIX) {
            let end = VOTER_ID_OFFSET + VOTER_ID_LEN;
            let voter_id = raw
                .get(VOTER_ID_OFFSET..end)
                .ok_or(BallotParseError::TruncatedHeader { lineno })?;
            if voters.contains_key(voter_id) {
                return Err(BallotParseError::DuplicateVoter {
                    voter_id: voter_id.to_string(),
                    lineno,
                });
            }
            debug!("parse_master_ballot: line {}: voter {:?}", lineno, voter_id);
            voters.insert(voter_id.to_string(), VoterRecord::default());
            current = Some(voter_id.to_string());
        } else {
            if raw.trim().is_empty() {
                continue;
            }
            let voter_id = current
                .as_ref()
                .ok_or(BallotParseError::PreferenceBeforeHeader { lineno })?;
            let group: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
            if let Some(record) = voters.get_mut(voter_id) {
                record.preferences.push(group);
            }
        }
    }

    debug!("parse_master_ballot: {} voters", voters.len());
    Ok(MasterBallot { voters })
}
