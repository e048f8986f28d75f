//! Reader identity as handed to us by the session collaborator.
//!
//! Every browser gets a persisted anonymous id; a verified identity is layered on
//! top once the reader signs in. Authorization (note visibility, delete, response
//! creation) dispatches on these variants rather than on optional fields.

use crate::config::get_config_dir;
use crate::error::Result;
use crate::models::Annotation;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Who wrote an annotation. Anonymous and verified ids live in separate namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum AuthorId {
    Anonymous(String),
    Verified(String),
}

impl AuthorId {
    /// Key used in `likedByUserIds`.
    pub fn like_key(&self) -> String {
        match self {
            AuthorId::Anonymous(id) => format!("anon:{}", id),
            AuthorId::Verified(uid) => format!("user:{}", uid),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AuthorId::Anonymous(_) => "anonymous",
            AuthorId::Verified(_) => "verified",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            AuthorId::Anonymous(id) | AuthorId::Verified(id) => id,
        }
    }

    pub fn from_parts(kind: &str, value: String) -> Option<Self> {
        match kind {
            "anonymous" => Some(AuthorId::Anonymous(value)),
            "verified" => Some(AuthorId::Verified(value)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous(String),
    Verified {
        anonymous_id: String,
        user: VerifiedUser,
    },
}

impl Identity {
    pub fn anonymous_id(&self) -> &str {
        match self {
            Identity::Anonymous(id) => id,
            Identity::Verified { anonymous_id, .. } => anonymous_id,
        }
    }

    pub fn verified(&self) -> Option<&VerifiedUser> {
        match self {
            Identity::Anonymous(_) => None,
            Identity::Verified { user, .. } => Some(user),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.verified().is_some()
    }

    /// The author id new annotations are recorded under.
    pub fn author_id(&self) -> AuthorId {
        match self {
            Identity::Anonymous(id) => AuthorId::Anonymous(id.clone()),
            Identity::Verified { user, .. } => AuthorId::Verified(user.uid.clone()),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Identity::Anonymous(_) => "Anonymous".to_string(),
            Identity::Verified { user, .. } => user
                .display_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .or_else(|| {
                    user.email
                        .as_deref()
                        .and_then(|email| email.split('@').next())
                        .filter(|local| !local.is_empty())
                        .map(str::to_string)
                })
                .unwrap_or_else(|| "Member".to_string()),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.verified().and_then(|user| user.email.as_deref())
    }

    pub fn photo_url(&self) -> Option<&str> {
        self.verified().and_then(|user| user.photo_url.as_deref())
    }
}

/// Admin identities are recognised by verified email.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    emails: Vec<String>,
}

impl AdminPolicy {
    pub fn new(emails: &[String]) -> Self {
        Self {
            emails: emails
                .iter()
                .map(|email| email.trim().to_lowercase())
                .filter(|email| !email.is_empty())
                .collect(),
        }
    }

    pub fn is_admin(&self, identity: &Identity) -> bool {
        identity
            .email()
            .map(|email| email.trim().to_lowercase())
            .map(|email| self.emails.iter().any(|admin| *admin == email))
            .unwrap_or(false)
    }

    pub fn caller(&self, identity: Identity) -> Caller {
        let is_admin = self.is_admin(&identity);
        Caller { identity, is_admin }
    }
}

/// An identity plus its resolved admin flag; the unit all permission checks take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub identity: Identity,
    pub is_admin: bool,
}

impl Caller {
    /// A verified reader still owns what they wrote before signing in on this browser.
    pub fn owns(&self, author: &AuthorId) -> bool {
        match (author, &self.identity) {
            (AuthorId::Anonymous(id), identity) => identity.anonymous_id() == id,
            (AuthorId::Verified(uid), Identity::Verified { user, .. }) => user.uid == *uid,
            (AuthorId::Verified(_), Identity::Anonymous(_)) => false,
        }
    }

    pub fn can_manage(&self, annotation: &Annotation) -> bool {
        self.is_admin || self.owns(&annotation.author_id)
    }

    pub fn can_view(&self, annotation: &Annotation) -> bool {
        annotation.is_public() || self.can_manage(annotation)
    }

    pub fn like_key(&self) -> String {
        self.identity.author_id().like_key()
    }
}

pub fn anonymous_id_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("anonymous_id"))
}

/// Reads the persisted anonymous id, minting and saving a new one on first use.
pub fn load_or_create_anonymous_id(path: &Path) -> Result<String> {
    if let Ok(existing) = fs::read_to_string(path) {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &id)?;
    info!("Created anonymous identity {}", id);
    Ok(id)
}
