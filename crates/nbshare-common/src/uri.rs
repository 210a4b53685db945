//! URI components as they travel on the wire, and the mapping between a
//! process's local URIs and the shared coordinate space of a session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::MirrorError;

/// A URI split into its parts, matching the host application's
/// `UriComponents` wire shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct UriComponents {
    pub scheme: String,
    pub authority: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl UriComponents {
    pub fn file(path: &str) -> Self {
        Self {
            scheme: "file".into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_fragment(&self, fragment: &str) -> Self {
        Self {
            fragment: fragment.into(),
            ..self.clone()
        }
    }

    /// Extension of the last path segment including the dot, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.path.rsplit('/').next().unwrap_or(&self.path);
        let dot = name.rfind('.')?;
        if dot == 0 {
            return None;
        }
        Some(&name[dot..])
    }
}

impl fmt::Display for UriComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if !self.authority.is_empty() || self.scheme == "file" {
            write!(f, "//{}", self.authority)?;
        }
        write!(f, "{}", self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

impl FromStr for UriComponents {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("missing scheme in {s:?}"))?;
        if scheme.is_empty() {
            return Err(format!("empty scheme in {s:?}"));
        }

        let (rest, fragment) = match rest.split_once('#') {
            Some((r, f)) => (r, f),
            None => (rest, ""),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, q),
            None => (rest, ""),
        };
        let (authority, path) = match rest.strip_prefix("//") {
            Some(after) => match after.find('/') {
                Some(idx) => (&after[..idx], &after[idx..]),
                None => (after, ""),
            },
            None => ("", rest),
        };

        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            path: path.to_string(),
            query: query.to_string(),
            fragment: fragment.to_string(),
        })
    }
}

/// Translates URIs between the local and shared coordinate spaces.
///
/// Implementations must be bijective on the URIs they accept:
/// `to_local(to_shared(u)) == Ok(u)` for every local `u`, and distinct
/// local URIs never share an image. `to_local` rejects shared URIs that no
/// local URI maps to.
pub trait UriMapper: Send + Sync {
    fn to_shared(&self, local: &UriComponents) -> UriComponents;
    fn to_local(&self, shared: &UriComponents) -> crate::Result<UriComponents>;
}

/// Authority marker for local URIs that already use the shared scheme.
const ESCAPE: char = '~';

/// Maps `file://<root>/<rel>` to `<scheme>:/<rel>` and back.
///
/// URIs outside the shared root pass through unchanged in both directions.
/// A local URI that already uses the shared scheme gets a `~` prepended to
/// its authority so it cannot collide with a mapped file.
#[derive(Debug, Clone)]
pub struct PrefixUriMapper {
    root: String,
    shared_scheme: String,
}

impl PrefixUriMapper {
    pub fn new(root: impl Into<String>, shared_scheme: impl Into<String>) -> Self {
        let root = root.into().trim_end_matches('/').to_string();
        Self {
            root,
            shared_scheme: shared_scheme.into(),
        }
    }

    /// A mapper that leaves every URI untouched.
    pub fn identity() -> Self {
        Self::new("", "")
    }

    fn is_identity(&self) -> bool {
        self.shared_scheme.is_empty()
    }
}

impl UriMapper for PrefixUriMapper {
    fn to_shared(&self, local: &UriComponents) -> UriComponents {
        if self.is_identity() {
            return local.clone();
        }
        if local.scheme == self.shared_scheme {
            return UriComponents {
                authority: format!("{ESCAPE}{}", local.authority),
                ..local.clone()
            };
        }
        if local.scheme != "file" || !local.authority.is_empty() {
            return local.clone();
        }
        let Some(rel) = local.path.strip_prefix(&self.root) else {
            return local.clone();
        };
        if !rel.starts_with('/') {
            return local.clone();
        }
        UriComponents {
            scheme: self.shared_scheme.clone(),
            authority: String::new(),
            path: rel.to_string(),
            query: local.query.clone(),
            fragment: local.fragment.clone(),
        }
    }

    fn to_local(&self, shared: &UriComponents) -> crate::Result<UriComponents> {
        if self.is_identity() || shared.scheme != self.shared_scheme {
            return Ok(shared.clone());
        }
        if let Some(authority) = shared.authority.strip_prefix(ESCAPE) {
            return Ok(UriComponents {
                authority: authority.to_string(),
                ..shared.clone()
            });
        }
        if !shared.authority.is_empty() || !shared.path.starts_with('/') {
            return Err(MirrorError::Decode(format!(
                "{shared} is not a shared workspace URI"
            )));
        }
        Ok(UriComponents {
            scheme: "file".into(),
            authority: String::new(),
            path: format!("{}{}", self.root, shared.path),
            query: shared.query.clone(),
            fragment: shared.fragment.clone(),
        })
    }
}
