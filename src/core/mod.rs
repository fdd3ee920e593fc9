pub mod relay;

pub use relay::{
    RelayConfig, RelayConnectionState, RelayEngine, RelayEvent, RelayEventKind, RelayFrame,
    TranscriptBlock, TranscriptKind,
};
