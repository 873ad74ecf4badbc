//! Local ceremony engine
//!
//! The cryptographic math of a ceremony is a black box for this crate. It's represented by a
//! [`Party`]: given the latest message from the counterparty, the party computes at most one message
//! to send back and possibly the ceremony output.

/// Result of a single [`Party::advance`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<O> {
    /// Message to deliver to the counterparty
    pub outgoing: Option<Vec<u8>>,
    /// Ceremony output. Once it's returned, the party is never advanced again
    pub output: Option<O>,
}

impl<O> Step<O> {
    /// Party sends a message and waits for the reply
    pub fn send(msg: Vec<u8>) -> Self {
        Self {
            outgoing: Some(msg),
            output: None,
        }
    }

    /// Party finished without anything else to say
    pub fn finish(output: O) -> Self {
        Self {
            outgoing: None,
            output: Some(output),
        }
    }

    /// Party finished, but the counterparty needs one more message to finish as well
    pub fn finish_with(msg: Vec<u8>, output: O) -> Self {
        Self {
            outgoing: Some(msg),
            output: Some(output),
        }
    }
}

/// Party of a two-party ceremony
///
/// `advance` may be computationally expensive: [RoundDriver](crate::driver::RoundDriver) calls it on
/// a thread where blocking is acceptable.
///
/// The first call receives `None`. Every next call receives the counterparty message which replies
/// to the message produced by the previous call.
pub trait Party: Send + 'static {
    type Output: Send + 'static;
    type Err: std::error::Error + Send + Sync + 'static;

    fn advance(&mut self, incoming: Option<Vec<u8>>) -> Result<Step<Self::Output>, Self::Err>;
}
