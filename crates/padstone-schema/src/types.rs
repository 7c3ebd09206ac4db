//! Identifier types shared by the configuration model and the state document.
//!
//! All newtypes serialize/deserialize as plain strings (or, for [`ModulePath`],
//! a plain list of strings) so the persisted state stays human-inspectable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Name of the root module scope. Every [`ModulePath`] starts with it.
pub const ROOT_MODULE: &str = "root";

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Composite resource key `<type>.<name>`, unique within its enclosing scope.
    ResourceKey
);

string_newtype!(
    /// Name of a lifecycle group (`default` for flat configurations, else the target name).
    GroupName
);

impl ResourceKey {
    /// Build the key for a resource of `resource_type` named `name`.
    pub fn from_parts(resource_type: &str, name: &str) -> Self {
        Self(format!("{resource_type}.{name}"))
    }

    /// The resource type, i.e. everything before the first `.`.
    pub fn resource_type(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(t, _)| t)
    }

    /// The local name, i.e. everything after the first `.`.
    pub fn name(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, n)| n)
    }
}

/// Path of a module scope: `["root"]` for the root scope, `["root", "child", ...]` below it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModulePath(Vec<String>);

impl ModulePath {
    pub fn root() -> Self {
        Self(vec![ROOT_MODULE.to_owned()])
    }

    /// Path of a child scope directly below `self`.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_owned());
        Self(segments)
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn is_root(&self) -> bool {
        self.0.len() == 1 && self.0[0] == ROOT_MODULE
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True when `self` equals `prefix` or lies below it.
    pub fn starts_with(&self, prefix: &ModulePath) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl Default for ModulePath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}
