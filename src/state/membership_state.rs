use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::state::StorageError;
use crate::LogIndex;
use crate::MemberId;

/// A member set together with the index of the log entry that carried it.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEntry {
    pub log_index: LogIndex,
    pub members: BTreeSet<MemberId>,
}

impl MembershipEntry {
    pub fn new(log_index: LogIndex, members: BTreeSet<MemberId>) -> Self {
        Self { log_index, members }
    }
}

/// The durable view of membership: the latest committed member set and, if any, the single
/// appended but not yet committed one.
///
/// `ordinal` increases on every change so that a persisted copy can be compared with the live
/// one.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftMembershipState {
    ordinal: u64,
    committed: Option<MembershipEntry>,
    appended: Option<MembershipEntry>,
}

impl RaftMembershipState {
    pub fn new(ordinal: u64, committed: Option<MembershipEntry>, appended: Option<MembershipEntry>) -> Self {
        Self {
            ordinal,
            committed,
            appended,
        }
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn committed(&self) -> Option<&MembershipEntry> {
        self.committed.as_ref()
    }

    pub fn appended(&self) -> Option<&MembershipEntry> {
        self.appended.as_ref()
    }

    /// Record a membership entry appended at `log_index`.
    ///
    /// Entries at or below an already known one are replays and ignored. Appending while another
    /// membership entry is still uncommitted is illegal.
    pub fn append(&mut self, log_index: LogIndex, members: BTreeSet<MemberId>) -> Result<bool, StorageError> {
        if self.appended.as_ref().map_or(false, |x| log_index <= x.log_index) {
            return Ok(false);
        }
        if self.committed.as_ref().map_or(false, |x| log_index <= x.log_index) {
            return Ok(false);
        }
        if let Some(appended) = &self.appended {
            return Err(StorageError::illegal_state(format!(
                "appending membership at {} with uncommitted membership at {}",
                log_index, appended.log_index
            )));
        }

        self.ordinal += 1;
        self.appended = Some(MembershipEntry::new(log_index, members));
        Ok(true)
    }

    /// Drop the appended entry if the log is truncated at or below it.
    pub fn truncate(&mut self, from_index: LogIndex) -> Result<bool, StorageError> {
        if let Some(committed) = &self.committed {
            if from_index <= committed.log_index {
                return Err(StorageError::illegal_state(format!(
                    "truncating committed membership at {} from {}",
                    committed.log_index, from_index
                )));
            }
        }

        if self.appended.as_ref().map_or(false, |x| from_index <= x.log_index) {
            self.ordinal += 1;
            self.appended = None;
            return Ok(true);
        }
        Ok(false)
    }

    /// Promote the appended entry to committed once `commit_index` covers it.
    pub fn commit(&mut self, commit_index: LogIndex) -> bool {
        match &self.appended {
            Some(appended) if commit_index >= appended.log_index => {
                self.ordinal += 1;
                self.committed = self.appended.take();
                true
            }
            _ => false,
        }
    }

    /// Replace everything with a committed entry installed from another member.
    pub fn install(&mut self, committed: MembershipEntry) {
        self.ordinal += 1;
        self.committed = Some(committed);
        self.appended = None;
    }

    pub fn uncommitted_member_change_in_log(&self) -> bool {
        self.appended.is_some()
    }

    /// The member set of the committed entry.
    pub fn committed_members(&self) -> BTreeSet<MemberId> {
        self.committed.as_ref().map(|x| x.members.clone()).unwrap_or_default()
    }

    /// The member set of the latest entry in the log, committed or not.
    pub fn latest(&self) -> BTreeSet<MemberId> {
        self.appended.as_ref().or(self.committed.as_ref()).map(|x| x.members.clone()).unwrap_or_default()
    }
}
