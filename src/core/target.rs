// Authors: Robert Lopez
// License: MIT (See `LICENSE.md`)

use crate::error::Error;
use std::{fmt, str::FromStr};

const SCHEME: &str = "s3://";

/// The `(bucket, key)` pair an upload writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    pub bucket: String,
    pub key: String,
}

impl ObjectTarget {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parses `s3://bucket/key`, splitting at the first `/` after the scheme.
    ///
    /// ---
    /// Example Usage:
    /// ```
    ///
    /// let target = ObjectTarget::parse("s3://sharks/2024/shark.jpg")?;
    ///
    /// assert_eq!(target.bucket, "sharks");
    /// assert_eq!(target.key, "2024/shark.jpg");
    /// ```
    pub fn parse(uri: &str) -> Result<Self, Error> {
        let invalid = |reason| Error::Target {
            uri: uri.to_string(),
            reason,
        };

        let rest = uri
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid("must start with s3://"))?;

        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));

        if bucket.is_empty() {
            return Err(invalid("missing bucket"));
        }

        if key.is_empty() {
            return Err(invalid("missing key"));
        }

        Ok(Self::new(bucket, key))
    }
}

impl FromStr for ObjectTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.key)
    }
}
