//! Protocol revisions and the optional wire fields they unlock.
//!
//! Every optional field in the handshake, the query body and data blocks is gated by one
//! row of [`REVISION_TABLE`]. Readers and writers ask [`Revision::supports`] instead of
//! comparing raw revision numbers, so changing a threshold means editing one row.
use std::fmt;

/// Revision this server speaks.
pub const SERVER_REVISION: u64 = 54468;

/// An optional piece of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// QUERY carries a client-info block.
    ClientInfo,
    /// Server HELLO carries the server timezone.
    ServerTimezone,
    /// Client info carries a quota key.
    QuotaKey,
    /// Server HELLO carries a display name.
    DisplayName,
    /// Server HELLO and client info carry a version patch.
    VersionPatch,
    /// Settings travel as `(name, flags, value)` strings.
    SettingsAsStrings,
    /// QUERY carries the inter-server secret.
    InterserverSecret,
    /// Client info carries an OpenTelemetry trace context.
    OpenTelemetry,
    /// Client info carries the distributed depth.
    DistributedDepth,
    /// Client info carries the initial query start time.
    InitialQueryStartTime,
    /// Client info carries parallel replica coordinates.
    ParallelReplicas,
    /// Each block column carries a custom serialization flag.
    CustomSerialization,
    /// QUERY carries a parameters bag.
    Parameters,
    /// Server HELLO carries password complexity rules.
    PasswordComplexityRules,
    /// Server HELLO carries the inter-server nonce.
    InterserverSecretV2,
}

/// Minimum revision for each feature, ordered by threshold.
pub const REVISION_TABLE: &[(u64, Feature)] = &[
    (54032, Feature::ClientInfo),
    (54058, Feature::ServerTimezone),
    (54060, Feature::QuotaKey),
    (54372, Feature::DisplayName),
    (54401, Feature::VersionPatch),
    (54429, Feature::SettingsAsStrings),
    (54441, Feature::InterserverSecret),
    (54442, Feature::OpenTelemetry),
    (54448, Feature::DistributedDepth),
    (54449, Feature::InitialQueryStartTime),
    (54453, Feature::ParallelReplicas),
    (54454, Feature::CustomSerialization),
    (54459, Feature::Parameters),
    (54461, Feature::PasswordComplexityRules),
    (54462, Feature::InterserverSecretV2),
];

impl Feature {
    pub fn threshold(self) -> u64 {
        REVISION_TABLE
            .iter()
            .find(|(_, feature)| *feature == self)
            .map(|(threshold, _)| *threshold)
            .unwrap_or(u64::MAX)
    }

    /// Whether the feature adds a field to the server HELLO.
    pub fn in_server_hello(self) -> bool {
        matches!(
            self,
            Feature::ServerTimezone
                | Feature::DisplayName
                | Feature::VersionPatch
                | Feature::PasswordComplexityRules
                | Feature::InterserverSecretV2
        )
    }
}

/// A protocol revision, usually the one negotiated for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Revision(pub u64);

impl Revision {
    /// The revision both sides understand.
    pub fn negotiate(client: u64, server: u64) -> Self {
        Revision(client.min(server))
    }

    pub fn supports(self, feature: Feature) -> bool {
        feature.threshold() <= self.0
    }

    /// Enabled features in table order.
    pub fn features(self) -> impl Iterator<Item = Feature> {
        REVISION_TABLE
            .iter()
            .filter(move |(threshold, _)| *threshold <= self.0)
            .map(|(_, feature)| *feature)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_ordered() {
        assert!(REVISION_TABLE.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn every_hello_feature_is_below_server_revision() {
        for (threshold, feature) in REVISION_TABLE {
            if feature.in_server_hello() {
                assert!(*threshold <= SERVER_REVISION, "{feature:?}");
            }
        }
    }

    #[test]
    fn negotiation_takes_the_minimum() {
        assert_eq!(Revision::negotiate(54400, SERVER_REVISION), Revision(54400));
        assert_eq!(
            Revision::negotiate(60000, SERVER_REVISION),
            Revision(SERVER_REVISION)
        );
    }

    #[test]
    fn thresholds_are_inclusive() {
        let revision = Revision(54372);
        assert!(revision.supports(Feature::DisplayName));
        assert!(!revision.supports(Feature::VersionPatch));
    }

    #[test]
    fn features_follow_table_order() {
        let features: Vec<_> = Revision(54060).features().collect();
        assert_eq!(
            features,
            vec![
                Feature::ClientInfo,
                Feature::ServerTimezone,
                Feature::QuotaKey
            ]
        );
        assert_eq!(Revision(0).features().count(), 0);
        assert_eq!(
            Revision(SERVER_REVISION).features().count(),
            REVISION_TABLE.len()
        );
    }
}
