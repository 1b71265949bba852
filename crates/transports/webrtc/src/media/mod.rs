//! Media relay between publisher and subscriber connections

pub mod relay;

pub use relay::{spawn_relay_forwarder, PublishedTrack, RelaySubscription, RtpSink};
