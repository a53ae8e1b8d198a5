//! URL type addressing resources behind pluggable backends.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ErrorKind, OpError};

/// A resource URL: `scheme://[user@]host[:port]/path`.
///
/// A bare path parses as a `file` URL. Paths are stored canonically: always
/// absolute, no duplicate or trailing slashes (except the root `/`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceUrl {
    scheme: String,
    user: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: String,
}

impl ResourceUrl {
    /// Parse a URL or a bare local path.
    pub fn parse(input: &str) -> Result<Self, OpError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(OpError::new(ErrorKind::MalformedUrl, "empty URL"));
        }

        let Some((scheme, rest)) = input.split_once("://") else {
            // Bare path, local file.
            return Ok(Self {
                scheme: "file".to_string(),
                user: None,
                host: None,
                port: None,
                path: canonical_path(input),
            });
        };

        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-') {
            return Err(OpError::new(ErrorKind::MalformedUrl, input));
        }

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (user, host_port) = match authority.split_once('@') {
            Some((u, hp)) => (Some(u.to_string()), hp),
            None => (None, authority),
        };

        let (host, port) = match host_port.split_once(':') {
            Some((h, p)) => {
                let port: u16 = p
                    .parse()
                    .map_err(|_| OpError::new(ErrorKind::MalformedUrl, input))?;
                (h, Some(port))
            }
            None => (host_port, None),
        };

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            user,
            host: if host.is_empty() {
                None
            } else {
                Some(host.to_ascii_lowercase())
            },
            port,
            path: canonical_path(path),
        })
    }

    /// The URL scheme (`file`, `sftp`, ...).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The canonical absolute path component.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// True for the `file` scheme.
    pub fn is_local(&self) -> bool {
        self.scheme == "file"
    }

    /// Local filesystem path, if this is a `file` URL.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.is_local().then(|| PathBuf::from(&self.path))
    }

    /// Last path component, if any.
    pub fn file_name(&self) -> Option<&str> {
        if self.path == "/" {
            return None;
        }
        self.path.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Parent URL, if this is not the root.
    pub fn parent(&self) -> Option<Self> {
        if self.path == "/" {
            return None;
        }
        let idx = self.path.rfind('/')?;
        let parent = if idx == 0 { "/" } else { &self.path[..idx] };
        Some(self.with_path(parent))
    }

    /// Append one or more path components.
    pub fn join(&self, name: &str) -> Self {
        let mut path = self.path.clone();
        if !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(name.trim_matches('/'));
        self.with_path(&canonical_path(&path))
    }

    /// Same backend location, replacement path.
    pub fn with_path(&self, path: &str) -> Self {
        Self {
            scheme: self.scheme.clone(),
            user: self.user.clone(),
            host: self.host.clone(),
            port: self.port,
            path: canonical_path(path),
        }
    }

    /// Same scheme, host, port and credentials: one backend worker can serve
    /// both URLs.
    pub fn same_backend(&self, other: &Self) -> bool {
        self.scheme == other.scheme
            && self.host == other.host
            && self.port == other.port
            && self.user == other.user
    }

    /// True when `other` sits strictly below `self` in the same backend.
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        if !self.same_backend(other) || self.path.len() >= other.path.len() {
            return false;
        }
        if self.path == "/" {
            return true;
        }
        other.path.starts_with(&self.path)
            && other.path.as_bytes().get(self.path.len()) == Some(&b'/')
    }

    /// Path of `self` relative to ancestor `base`, if it is one.
    pub fn relative_to(&self, base: &Self) -> Option<&str> {
        if base.is_ancestor_of(self) {
            let skip = if base.path == "/" { 1 } else { base.path.len() + 1 };
            Some(&self.path[skip..])
        } else {
            None
        }
    }
}

/// Collapse duplicate slashes, drop `.` components, strip the trailing slash.
fn canonical_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    out.push('/');
    for comp in path.split('/') {
        if comp.is_empty() || comp == "." {
            continue;
        }
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(comp);
    }
    out
}

impl fmt::Display for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if let Some(host) = &self.host {
            write!(f, "{host}")?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        write!(f, "{}", self.path)
    }
}

impl FromStr for ResourceUrl {
    type Err = OpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
