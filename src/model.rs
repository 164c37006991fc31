// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Data structures for representing game servers in the control plane
//!
//! These are the typed forms of everything that gets persisted to the record
//! store or exposed over the HTTP API.  The persisted schema is a closed enum
//! plus typed identifiers; raw records with a missing or unrecognized state
//! tag decode to [`ServerState::Unknown`] rather than failing.

use chrono::DateTime;
use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::convert::TryFrom;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;
use std::str::FromStr;

use crate::error::Error;

/// Unique numeric id of a logical game server
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, JsonSchema, Ord, PartialEq,
    PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct ServerId(pub u64);

impl Display for ServerId {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerId {
    type Err = std::num::ParseIntError;
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(ServerId(value.parse()?))
    }
}

/// Identifier of a spot capacity request acknowledged by the provisioning
/// backend
#[derive(
    Clone, Debug, Deserialize, Eq, JsonSchema, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct SpotRequestId(pub String);

impl Display for SpotRequestId {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a running compute instance
#[derive(
    Clone, Debug, Deserialize, Eq, JsonSchema, Ord, PartialEq, PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl Display for InstanceId {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a game server
///
/// `Unknown` is a provisional state: it is written before an operation whose
/// outcome is not yet known, so that a crash or failure mid-flight forces the
/// next reader to re-verify against the provisioning backend instead of
/// trusting a stale `Offline` or `Online`.  Any unrecognized persisted tag
/// also decodes to `Unknown`.
#[derive(Clone, Copy, Debug, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    Offline,
    Online,
    Unknown,
}

impl Default for ServerState {
    fn default() -> ServerState {
        ServerState::Unknown
    }
}

impl ServerState {
    /// Decodes a persisted state tag.  An unrecognized tag means the record
    /// was written by something we don't understand or a transition never
    /// completed; either way it degrades to `Unknown` rather than failing.
    pub fn from_persisted(tag: &str) -> ServerState {
        match tag {
            "OFFLINE" => ServerState::Offline,
            "ONLINE" => ServerState::Online,
            _ => ServerState::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for ServerState {
    fn deserialize<D>(deserializer: D) -> Result<ServerState, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(ServerState::from_persisted(&tag))
    }
}

impl Display for ServerState {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        let label = match self {
            ServerState::Offline => "OFFLINE",
            ServerState::Online => "ONLINE",
            ServerState::Unknown => "UNKNOWN",
        };
        write!(f, "{}", label)
    }
}

impl ServerState {
    /// Returns true only for a server known to be online.  `Unknown` reports
    /// false here; callers that care must reconcile first.
    pub fn is_online(&self) -> bool {
        match self {
            ServerState::Online => true,
            ServerState::Offline | ServerState::Unknown => false,
        }
    }
}

/// Generation number used for conditional writes to the record store
///
/// Every runtime write replaces the record only if the stored generation
/// still matches the one observed at read time, which is what prevents two
/// concurrent transitions from both issuing provisioning requests.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, JsonSchema, Ord, PartialEq,
    PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct Generation(u64);

impl Generation {
    pub fn new() -> Generation {
        Generation(1)
    }

    pub fn next(&self) -> Generation {
        /*
         * It should technically be an operational error if this wraps or even
         * exceeds the value allowed by an i64 (the record store may only
         * support signed integers).  It seems unlikely enough to happen in
         * practice that we can feel safe with this.
         */
        let next_gen = self.0 + 1;
        assert!(next_gen <= u64::try_from(i64::MAX).unwrap());
        Generation(next_gen)
    }
}

impl Default for Generation {
    fn default() -> Generation {
        Generation::new()
    }
}

impl Display for Generation {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{}", self.0)
    }
}

/// Runtime state of a game server: the persisted source of truth that the
/// lifecycle manager reconciles against the provisioning backend
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct ServerRuntime {
    /// lifecycle state of the server
    #[serde(default)]
    pub state: ServerState,
    /// identifier of an in-flight capacity request, once issued
    pub spot_request_id: Option<SpotRequestId>,
    /// identifier of the running compute instance, once known
    pub instance_id: Option<InstanceId>,
    /// generation number for this state
    pub gen: Generation,
    /// timestamp for this information
    pub time_updated: DateTime<Utc>,
}

/// A logical game server, as persisted in the record store
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Server {
    /// unique numeric id for the server
    pub id: ServerId,
    /// runtime state owned by the lifecycle manager
    pub runtime: ServerRuntime,
}

impl Server {
    pub fn to_view(&self) -> ServerView {
        ServerView {
            id: self.id,
            state: self.runtime.state,
            spot_request_id: self.runtime.spot_request_id.clone(),
            instance_id: self.runtime.instance_id.clone(),
            time_updated: self.runtime.time_updated,
        }
    }
}

/// Client view of a [`Server`]
#[derive(Clone, Debug, Deserialize, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerView {
    pub id: ServerId,
    pub state: ServerState,
    pub spot_request_id: Option<SpotRequestId>,
    pub instance_id: Option<InstanceId>,
    pub time_updated: DateTime<Utc>,
}

/// A string that is safe to interpolate unquoted into a shell script
///
/// Strings not matching the allowed set may contain values that are not
/// interpreted literally by the shell, so a `ShellSafeString` can only be
/// constructed from a non-empty string consisting of ASCII alphanumerics and
/// `,._+:@%/-`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(try_from = "String")]
pub struct ShellSafeString(String);

/// `ShellSafeString::try_from(String)` is the primary method for
/// constructing a ShellSafeString from an input string.  This validates the
/// string according to the allowed character set.
impl TryFrom<String> for ShellSafeString {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            return Err(format!("value requires at least one character"));
        }

        for c in value.chars() {
            if !c.is_ascii_alphanumeric()
                && !matches!(
                    c,
                    ',' | '.' | '_' | '+' | ':' | '@' | '%' | '/' | '-'
                )
            {
                return Err(format!(
                    "value contains character not interpreted literally by \
                     the shell: \"{}\"",
                    c
                ));
            }
        }

        Ok(ShellSafeString(value))
    }
}

/// Convenience parse function for literal strings, primarily for the test
/// suite.
impl TryFrom<&str> for ShellSafeString {
    type Error = String;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ShellSafeString::try_from(String::from(value))
    }
}

impl From<ShellSafeString> for String {
    fn from(value: ShellSafeString) -> String {
        value.0
    }
}

impl Display for ShellSafeString {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{}", self.0)
    }
}

impl ShellSafeString {
    /// Parse a `ShellSafeString`.  This is a convenience wrapper around
    /// `ShellSafeString::try_from(String)` that marshals any error into an
    /// appropriate `Error`.
    pub fn from_param(
        value: String,
        label: &str,
    ) -> Result<ShellSafeString, Error> {
        ShellSafeString::try_from(value).map_err(|e| Error::InvalidValue {
            label: String::from(label),
            message: e,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::Generation;
    use super::ServerState;
    use super::ShellSafeString;
    use crate::error::Error;
    use std::convert::TryFrom;

    #[test]
    fn test_shell_safe_parse() {
        /*
         * Error cases
         */
        let error_cases: Vec<(&str, &str)> = vec![
            ("", "value requires at least one character"),
            (
                "my bucket;rm",
                "value contains character not interpreted literally by the \
                 shell: \" \"",
            ),
            (
                "bar;touch x",
                "value contains character not interpreted literally by the \
                 shell: \";\"",
            ),
            (
                "$(hostname)",
                "value contains character not interpreted literally by the \
                 shell: \"$\"",
            ),
            (
                "back`tick",
                "value contains character not interpreted literally by the \
                 shell: \"`\"",
            ),
        ];

        for (input, expected_message) in error_cases {
            eprintln!("check value \"{}\" (expecting error)", input);
            assert_eq!(
                ShellSafeString::try_from(input).unwrap_err(),
                expected_message
            );
        }

        /*
         * Success cases
         */
        let valid_values: Vec<&str> = vec![
            "my-bucket.01",
            "us-east-2",
            "arn:aws:iam::123456789012:instance-profile/game",
            "a,b_c+d@e%f/g",
        ];

        for value in valid_values {
            eprintln!("check value \"{}\" (should be valid)", value);
            assert_eq!(
                value,
                String::from(ShellSafeString::try_from(value).unwrap())
            );
        }
    }

    #[test]
    fn test_shell_safe_from_param() {
        let result =
            ShellSafeString::from_param(String::from("my-bucket.01"), "bucket");
        assert_eq!(
            result.unwrap(),
            ShellSafeString::try_from("my-bucket.01").unwrap()
        );

        let result =
            ShellSafeString::from_param(String::from("my bucket;rm"), "bucket");
        assert_eq!(
            result,
            Err(Error::InvalidValue {
                label: "bucket".to_string(),
                message: "value contains character not interpreted literally \
                          by the shell: \" \""
                    .to_string(),
            })
        );
    }

    /*
     * A record with a missing or garbage state tag must decode to `Unknown`,
     * never fail.
     */
    #[test]
    fn test_state_decodes_garbage_to_unknown() {
        let state: ServerState = serde_json::from_str("\"OFFLINE\"").unwrap();
        assert_eq!(state, ServerState::Offline);
        let state: ServerState = serde_json::from_str("\"ONLINE\"").unwrap();
        assert_eq!(state, ServerState::Online);
        assert!(state.is_online());

        let state: ServerState = serde_json::from_str("\"UNKNOWN\"").unwrap();
        assert_eq!(state, ServerState::Unknown);
        let state: ServerState = serde_json::from_str("\"BOOTING\"").unwrap();
        assert_eq!(state, ServerState::Unknown);
        assert!(!state.is_online());
        let state: ServerState = serde_json::from_str("\"\"").unwrap();
        assert_eq!(state, ServerState::Unknown);

        /* Missing state field altogether. */
        let runtime: super::ServerRuntime = serde_json::from_str(
            r#"{
                "spot_request_id": null,
                "instance_id": null,
                "gen": 4,
                "time_updated": "2024-03-01T00:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(runtime.state, ServerState::Unknown);
        assert!(!runtime.state.is_online());
    }

    #[test]
    fn test_generation() {
        let gen = Generation::new();
        assert_eq!("1", gen.to_string());
        let gen = gen.next().next();
        assert_eq!("3", gen.to_string());
        assert!(gen > Generation::new());
    }
}
