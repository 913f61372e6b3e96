//! Stream identity: the network/station/location/channel code

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four-part code identifying a waveform source.
///
/// Field order gives the sort order: network, station, location, channel.
/// Empty strings are meaningful values (blank location codes are common).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamIdentity {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
}

impl StreamIdentity {
    /// Create an identity from raw codes, upper-casing every field
    pub fn new(
        network: impl AsRef<str>,
        station: impl AsRef<str>,
        location: impl AsRef<str>,
        channel: impl AsRef<str>,
    ) -> Self {
        Self {
            network: network.as_ref().to_uppercase(),
            station: station.as_ref().to_uppercase(),
            location: location.as_ref().to_uppercase(),
            channel: channel.as_ref().to_uppercase(),
        }
    }

    /// The (network, station) pair restrictions are keyed on
    pub fn network_station(&self) -> (&str, &str) {
        (&self.network, &self.station)
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}
