//! Remote session clients

pub mod ssh;

use crate::credential::Credential;
use crate::error::ExecError;
use crate::models::{RemoteOutput, Target, MAX_OUTPUT_SIZE};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs one command on one host and returns its captured output
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Execute `command` on `target`
    ///
    /// Implementations must observe `cancel` at every point where they can
    /// block and return [`ExecError::Cancelled`] once it fires.
    async fn execute(
        &self,
        command: &str,
        target: &Target,
        credential: Arc<Credential>,
        cancel: &CancellationToken,
    ) -> Result<RemoteOutput, ExecError>;
}

/// Truncate byte output to MAX_OUTPUT_SIZE in place
///
/// Returns true if bytes were dropped.
pub(crate) fn truncate_output_bytes(data: &mut Vec<u8>) -> bool {
    if data.len() > MAX_OUTPUT_SIZE {
        data.truncate(MAX_OUTPUT_SIZE);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_output() {
        let mut small = b"hello".to_vec();
        assert!(!truncate_output_bytes(&mut small));
        assert_eq!(small, b"hello");

        let mut large = vec![b'x'; MAX_OUTPUT_SIZE + 1000];
        assert!(truncate_output_bytes(&mut large));
        assert_eq!(large.len(), MAX_OUTPUT_SIZE);
    }
}
