//! Naming codec for subvolume creation tokens.
//!
//! The backend preserves exactly one caller-chosen string per subvolume,
//! its creation token. Snapshots therefore carry their identity in that
//! token: `<prefix>-<snapshot><separator><volume suffix>`. The codec builds
//! and decomposes such names and validates the three name grammars.

use std::fmt;

use regex::Regex;
use thiserror::Error;

/// Separator between the logical snapshot name and the volume suffix.
pub const SNAPSHOT_NAME_SEPARATOR: &str = "--";

/// Separator the backend reserves inside subvolume names.
pub const SUBVOLUME_NAME_SEPARATOR: &str = "-file-";

/// Prefix marker recognised on orchestrator-generated volume names.
pub const PVC_PREFIX: &str = "pvc-";

const MAX_VOLUME_NAME_LEN: usize = 40;
const MAX_SNAPSHOT_NAME_LEN: usize = 45;
const MAX_CREATION_TOKEN_LEN: usize = 64;
const SUFFIX_LEN: usize = 5;
const SHORT_SUFFIX_LEN: usize = 4;

/// Which grammar a name was checked against.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NameKind {
    /// External volume name.
    Volume,
    /// Logical snapshot name.
    Snapshot,
    /// Subvolume creation token.
    CreationToken,
}

impl fmt::Display for NameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Volume => "subvolume name",
            Self::Snapshot => "snapshot name",
            Self::CreationToken => "subvolume internal name",
        })
    }
}

/// Errors raised by the naming codec.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NameError {
    /// Raised when a name violates its length or character grammar.
    #[error(
        "{kind} '{name}' is not allowed; it must be 1-{max} characters long, \
         begin with a letter, and contain only letters, digits, and hyphens"
    )]
    Grammar {
        /// Grammar the name was checked against.
        kind: NameKind,
        /// Offending name.
        name: String,
        /// Maximum permitted length.
        max: usize,
    },
    /// Raised when a name contains a reserved separator.
    #[error("{kind} '{name}' must not contain the '{pattern}' pattern")]
    ReservedPattern {
        /// Grammar the name was checked against.
        kind: NameKind,
        /// Offending name.
        name: String,
        /// Reserved pattern found in the name.
        pattern: String,
    },
    /// Raised when a creation token does not decompose as a snapshot name.
    #[error("'{0}' is not a snapshot internal name")]
    NotASnapshot(String),
    /// Raised when the configured storage prefix cannot be used in names.
    #[error("invalid storage prefix '{prefix}': {message}")]
    InvalidPrefix {
        /// Configured prefix.
        prefix: String,
        /// Reason the prefix was rejected.
        message: String,
    },
}

/// Logical snapshot name and volume suffix recovered from a creation token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SnapshotNameParts {
    /// Logical snapshot name as requested by the caller.
    pub snapshot_name: String,
    /// Suffix identifying the owning volume.
    pub suffix: String,
}

/// Encodes and decodes snapshot creation tokens for one storage prefix.
#[derive(Clone, Debug)]
pub struct NameCodec {
    storage_prefix: String,
    snapshot_pattern: Regex,
}

impl NameCodec {
    /// Builds a codec for the given storage prefix.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::InvalidPrefix`] when the prefix is empty or
    /// contains characters outside the creation token alphabet.
    pub fn new(storage_prefix: &str) -> Result<Self, NameError> {
        let invalid = |message: &str| NameError::InvalidPrefix {
            prefix: storage_prefix.to_owned(),
            message: message.to_owned(),
        };
        if !matches_grammar(storage_prefix, MAX_CREATION_TOKEN_LEN) {
            return Err(invalid(
                "must begin with a letter and contain only letters, digits, and hyphens",
            ));
        }
        let pattern = format!(
            "(?m)^{}-(.+?){}(.+)",
            regex::escape(storage_prefix),
            regex::escape(SNAPSHOT_NAME_SEPARATOR)
        );
        let snapshot_pattern = Regex::new(&pattern).map_err(|err| invalid(&err.to_string()))?;
        Ok(Self {
            storage_prefix: storage_prefix.to_owned(),
            snapshot_pattern,
        })
    }

    /// Returns the storage prefix this codec encodes with.
    #[must_use]
    pub fn storage_prefix(&self) -> &str {
        &self.storage_prefix
    }

    /// Returns the short, deterministic suffix derived from a volume's
    /// external name (the name is expected without the storage prefix).
    ///
    /// `pvc-abc1234-324abc34` yields `abc12`.
    #[must_use]
    pub fn snapshot_suffix(volume_name: &str) -> String {
        if let Some(uid) = volume_name.strip_prefix(PVC_PREFIX)
            && uid.chars().count() >= SUFFIX_LEN
        {
            return uid.chars().take(SUFFIX_LEN).collect();
        }
        if volume_name.chars().count() > SUFFIX_LEN {
            return volume_name.chars().take(SHORT_SUFFIX_LEN).collect();
        }
        volume_name.to_owned()
    }

    /// Builds the creation token of a snapshot of `volume_name`.
    ///
    /// Any reserved separator inside the logical name is flattened to a
    /// single hyphen so the token still decomposes unambiguously.
    #[must_use]
    pub fn snapshot_internal_name(&self, volume_name: &str, snapshot_name: &str) -> String {
        let sanitised = snapshot_name.replace(SNAPSHOT_NAME_SEPARATOR, "-");
        format!(
            "{}-{sanitised}{SNAPSHOT_NAME_SEPARATOR}{}",
            self.storage_prefix,
            Self::snapshot_suffix(volume_name)
        )
    }

    /// Splits a snapshot creation token into its logical name and suffix.
    ///
    /// # Errors
    ///
    /// Returns [`NameError::NotASnapshot`] when the token does not follow
    /// the snapshot grammar for this codec's prefix.
    pub fn decompose(&self, internal_name: &str) -> Result<SnapshotNameParts, NameError> {
        let captures = self
            .snapshot_pattern
            .captures(internal_name)
            .ok_or_else(|| NameError::NotASnapshot(internal_name.to_owned()))?;
        match (captures.get(1), captures.get(2)) {
            (Some(name), Some(suffix)) => Ok(SnapshotNameParts {
                snapshot_name: name.as_str().to_owned(),
                suffix: suffix.as_str().to_owned(),
            }),
            _ => Err(NameError::NotASnapshot(internal_name.to_owned())),
        }
    }

    /// Returns the logical snapshot name encoded in a creation token.
    #[must_use]
    pub fn snapshot_name(&self, internal_name: &str) -> Option<String> {
        self.decompose(internal_name)
            .ok()
            .map(|parts| parts.snapshot_name)
    }

    /// Returns the volume suffix encoded in a snapshot creation token.
    #[must_use]
    pub fn suffix(&self, internal_name: &str) -> Option<String> {
        self.decompose(internal_name).ok().map(|parts| parts.suffix)
    }

    /// Returns `true` when the creation token names a snapshot subvolume.
    #[must_use]
    pub fn is_snapshot(&self, internal_name: &str) -> bool {
        self.decompose(internal_name).is_ok()
    }
}

/// Validates an external volume name.
///
/// # Errors
///
/// Returns [`NameError`] when the name is not 1-40 letters, digits, and
/// hyphens starting with a letter, or contains the subvolume separator.
pub fn validate_volume_name(name: &str) -> Result<(), NameError> {
    check_grammar(name, NameKind::Volume, MAX_VOLUME_NAME_LEN)?;
    reject_pattern(name, NameKind::Volume, SUBVOLUME_NAME_SEPARATOR)
}

/// Validates a logical snapshot name.
///
/// # Errors
///
/// Returns [`NameError`] when the name is not 1-45 letters, digits, and
/// hyphens starting with a letter, or contains the snapshot separator.
pub fn validate_snapshot_name(name: &str) -> Result<(), NameError> {
    check_grammar(name, NameKind::Snapshot, MAX_SNAPSHOT_NAME_LEN)?;
    reject_pattern(name, NameKind::Snapshot, SNAPSHOT_NAME_SEPARATOR)
}

/// Validates a subvolume creation token.
///
/// # Errors
///
/// Returns [`NameError::Grammar`] when the token is not 1-64 letters,
/// digits, and hyphens starting with a letter.
pub fn validate_creation_token(name: &str) -> Result<(), NameError> {
    check_grammar(name, NameKind::CreationToken, MAX_CREATION_TOKEN_LEN)
}

fn check_grammar(name: &str, kind: NameKind, max: usize) -> Result<(), NameError> {
    if matches_grammar(name, max) {
        return Ok(());
    }
    Err(NameError::Grammar {
        kind,
        name: name.to_owned(),
        max,
    })
}

fn reject_pattern(name: &str, kind: NameKind, pattern: &str) -> Result<(), NameError> {
    if name.contains(pattern) {
        return Err(NameError::ReservedPattern {
            kind,
            name: name.to_owned(),
            pattern: pattern.to_owned(),
        });
    }
    Ok(())
}

fn matches_grammar(name: &str, max: usize) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphabetic()
        && name.len() <= max
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '-')
}
