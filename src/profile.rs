use std::future::Future;

use crate::error::{Error, Result};

/// Result of a successful [`ProfileSink::write_biography`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The remote value changed
    Written,
    /// The remote already held this value; no write request was made
    Unchanged,
}

/// Shorten `text` to at most `max` characters, marking the cut with an ellipsis
pub fn fit_biography(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut fitted: String = text.chars().take(max.saturating_sub(1)).collect();
    fitted.truncate(fitted.trim_end().len());
    fitted.push('…');
    fitted
}

/// A profile whose biography can be read and replaced
pub trait ProfileSink {
    fn read_biography(&mut self) -> impl Future<Output = Result<String>>;

    /// Replace the biography unconditionally
    fn set_biography(&mut self, text: &str) -> impl Future<Output = Result<()>>;

    /// Longest biography the service accepts, in characters
    fn max_biography_len(&self) -> Option<usize> {
        None
    }

    /// Replace the biography if it differs from the remote value.
    ///
    /// Empty or oversized text is rejected before any request is made.
    fn write_biography(&mut self, text: &str) -> impl Future<Output = Result<WriteOutcome>> {
        async move {
            if text.trim().is_empty() {
                return Err(Error::Validation("biography cannot be empty".to_string()));
            }
            if let Some(max) = self.max_biography_len() {
                let len = text.chars().count();
                if len > max {
                    return Err(Error::Validation(format!(
                        "biography is {len} characters, the limit is {max}"
                    )));
                }
            }

            if self.read_biography().await? == text {
                log::debug!("Biography already up to date");
                return Ok(WriteOutcome::Unchanged);
            }

            self.set_biography(text).await?;
            log::info!("Biography updated successfully");
            Ok(WriteOutcome::Written)
        }
    }
}
