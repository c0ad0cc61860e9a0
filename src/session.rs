//! Session resolution
//!
//! Maps `(owner, optional session number)` onto a durable conversation,
//! allocating the next owner-scoped number when none is given.

use crate::store::{HistoryStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Owner id must not be empty")]
    InvalidOwner,
    #[error("Invalid session identifier: {0}")]
    InvalidSequence(i64),
    #[error("Session {sequence} not found for owner {owner}")]
    NotFound { owner: String, sequence: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct SessionResolver {
    store: Arc<dyn HistoryStore>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Resolve an owner + optional session number to `(durable key, session
    /// number)`.
    ///
    /// A caller-supplied number that matches nothing is an error rather than
    /// a silent re-create: the caller named a session it believes exists, and
    /// quietly handing back a fresh thread under that number would be
    /// surprising.
    pub fn resolve(
        &self,
        owner_id: &str,
        external_sequence: Option<i64>,
    ) -> Result<(String, i64), SessionError> {
        if owner_id.trim().is_empty() {
            return Err(SessionError::InvalidOwner);
        }

        match external_sequence {
            Some(sequence) if sequence < 1 => Err(SessionError::InvalidSequence(sequence)),
            Some(sequence) => match self.store.find_conversation(owner_id, sequence)? {
                Some(conversation) => Ok((conversation.id, sequence)),
                None => Err(SessionError::NotFound {
                    owner: owner_id.to_string(),
                    sequence,
                }),
            },
            None => {
                let conversation = self.store.create_conversation(owner_id)?;
                tracing::info!(
                    owner = %owner_id,
                    session = conversation.sequence_number,
                    conversation = %conversation.id,
                    "Started new session"
                );
                Ok((conversation.id, conversation.sequence_number))
            }
        }
    }
}
