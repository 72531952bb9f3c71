//! Tenant scope, caller identity and the storage names derived from them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Who can see a document inside its organization
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to the owning user only
    Private,
    /// Visible to every member of the organization
    Organization,
    /// Visible to everyone
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Organization => "organization",
            Self::Public => "public",
        }
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "private" => Ok(Self::Private),
            "organization" | "org" => Ok(Self::Organization),
            "public" => Ok(Self::Public),
            other => Err(Error::validation(format!("unknown visibility '{}'", other))),
        }
    }
}

/// Tenant/visibility descriptor.
///
/// Written as `org/visibility[/owner]`, e.g. `org-A/private/user-1`. Private
/// scopes require an owner; the other visibilities are shared and carry none.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Scope {
    pub organization_id: String,
    pub visibility: Visibility,
    pub owner_id: Option<String>,
}

impl Scope {
    /// Scope private to one user
    pub fn private(organization_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            visibility: Visibility::Private,
            owner_id: Some(owner_id.into()),
        }
    }

    /// Scope shared across an organization
    pub fn organization(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            visibility: Visibility::Organization,
            owner_id: None,
        }
    }

    /// Public scope of an organization
    pub fn public(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            visibility: Visibility::Public,
            owner_id: None,
        }
    }

    /// Vector index collection holding this scope's chunks
    pub fn collection_name(&self) -> String {
        let mut parts = vec![
            "docs".to_string(),
            sanitize_identifier(&self.organization_id),
            self.visibility.as_str().to_string(),
        ];
        if let Some(owner) = &self.owner_id {
            parts.push(sanitize_identifier(owner));
        }
        parts.join("_")
    }

    /// Object-store prefix for this scope
    pub fn storage_prefix(&self) -> String {
        match &self.owner_id {
            Some(owner) => format!(
                "{}/{}/{}",
                self.organization_id,
                self.visibility.as_str(),
                owner
            ),
            None => format!("{}/{}", self.organization_id, self.visibility.as_str()),
        }
    }

    /// Object path of the original file
    pub fn document_path(&self, document_id: &Uuid, extension: &str) -> String {
        format!("{}/{}/file.{}", self.storage_prefix(), document_id, extension)
    }

    /// Object path of one chunk
    pub fn chunk_path(&self, document_id: &Uuid, chunk_id: &str) -> String {
        format!("{}/{}/{}.json", self.storage_prefix(), document_id, chunk_id)
    }

    /// Object prefix holding everything written for a document
    pub fn document_prefix(&self, document_id: &Uuid) -> String {
        format!("{}/{}", self.storage_prefix(), document_id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_prefix())
    }
}

impl FromStr for Scope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.iter().any(|p| p.trim().is_empty() || *p == "." || *p == "..") {
            return Err(Error::validation(format!("invalid scope '{}'", s)));
        }

        match parts.as_slice() {
            [org, visibility] => {
                let visibility: Visibility = visibility.parse()?;
                if visibility == Visibility::Private {
                    return Err(Error::validation(format!(
                        "private scope '{}' needs an owner",
                        s
                    )));
                }
                Ok(Self {
                    organization_id: org.to_string(),
                    visibility,
                    owner_id: None,
                })
            }
            [org, visibility, owner] => {
                let visibility: Visibility = visibility.parse()?;
                if visibility != Visibility::Private {
                    return Err(Error::validation(format!(
                        "only private scopes carry an owner: '{}'",
                        s
                    )));
                }
                Ok(Self::private(*org, *owner))
            }
            _ => Err(Error::validation(format!("invalid scope '{}'", s))),
        }
    }
}

/// Lowercase, alphanumeric-and-underscore form of an id
fn sanitize_identifier(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Identity of the caller submitting a document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Caller {
    /// Caller (user or service account) id
    pub id: String,
    /// Remaining credits as known when the request was accepted
    pub remaining_credits: Option<f64>,
}

impl Caller {
    pub fn new(id: impl Into<String>, remaining_credits: Option<f64>) -> Self {
        Self {
            id: id.into(),
            remaining_credits,
        }
    }
}
