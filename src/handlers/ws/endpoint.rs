use std::fmt;

use crate::auth::Identity;

const SOURCE_IDENTITIES: &[Identity] = &[Identity::SourceToken];
const SINK_IDENTITIES: &[Identity] = &[Identity::SourceToken, Identity::SessionToken];

/// The three WebSocket roles a client can connect as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Streams audio upstream and receives transcripts
    SourceSink,
    /// Streams audio upstream only
    Source,
    /// Receives transcripts only
    Sink,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [Endpoint::SourceSink, Endpoint::Source, Endpoint::Sink];

    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::SourceSink => "/sourcesink",
            Endpoint::Source => "/source",
            Endpoint::Sink => "/sink",
        }
    }

    /// Identities this endpoint accepts.
    ///
    /// Anything that pushes audio needs the source token; viewers may also
    /// use a session token.
    pub fn allowed_identities(&self) -> &'static [Identity] {
        match self {
            Endpoint::SourceSink | Endpoint::Source => SOURCE_IDENTITIES,
            Endpoint::Sink => SINK_IDENTITIES,
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Endpoint::SourceSink | Endpoint::Source)
    }

    pub fn is_sink(&self) -> bool {
        matches!(self, Endpoint::SourceSink | Endpoint::Sink)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}
