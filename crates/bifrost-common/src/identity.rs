//! Workload identity
//!
//! A long-running process is identified by an immutable `(GUID, Version)`
//! pair. The control plane addresses it by the process GUID
//! (`GUID-Version`); the cluster addresses it by an object name and a label
//! selector, both derived only from the pair.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kube_utils::{deterministic_hash, is_valid_label_value, sanitize_name};
use crate::{Error, LABEL_GUID, LABEL_VERSION};

/// Readable prefix length kept in object names. Together with the dash and
/// the 16-char hash this stays within the 52 chars a StatefulSet name may
/// use before its pods' revision labels overflow.
const NAME_PREFIX_LENGTH: usize = 35;

/// Identity of a long-running process
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LrpIdentifier {
    /// Process GUID as assigned by the control plane
    pub guid: String,
    /// Process version
    pub version: String,
}

impl LrpIdentifier {
    /// Create an identifier from its parts
    pub fn new(guid: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            version: version.into(),
        }
    }

    /// External process identifier: `GUID-Version`
    pub fn process_guid(&self) -> String {
        format!("{}-{}", self.guid, self.version)
    }

    /// Reject identities that cannot be addressed in the cluster.
    ///
    /// Both parts must be non-empty and usable as label values, since label
    /// selectors over them are how workloads are found again.
    pub fn validate(&self) -> Result<(), Error> {
        for (field, value) in [("guid", &self.guid), ("version", &self.version)] {
            if value.is_empty() {
                return Err(Error::invalid_identity(format!("{} must not be empty", field)));
            }
            if !is_valid_label_value(value) {
                return Err(Error::invalid_identity(format!(
                    "{} '{}' is not a valid label value",
                    field, value
                )));
            }
        }
        Ok(())
    }

    /// Cluster object name for this identity.
    ///
    /// A sanitized GUID prefix keeps names readable; the hash suffix is
    /// computed over the length-prefixed pair, so identities that only
    /// differ in where the GUID ends and the version begins still get
    /// distinct names.
    pub fn object_name(&self) -> String {
        let hash = deterministic_hash(&format!(
            "{}:{}:{}",
            self.guid.len(),
            self.guid,
            self.version
        ));
        let prefix = sanitize_name(&self.guid, NAME_PREFIX_LENGTH);
        if prefix.is_empty() {
            hash
        } else {
            format!("{}-{}", prefix, hash)
        }
    }

    /// Labels that select every object belonging to this identity
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_GUID.to_string(), self.guid.clone()),
            (LABEL_VERSION.to_string(), self.version.clone()),
        ])
    }
}

impl fmt::Display for LrpIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.process_guid())
    }
}
