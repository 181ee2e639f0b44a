// src/session/claims.rs
//! Session built from the identity provider's access token

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Candidate,
    Employer,
}

impl Role {
    /// Embedded claims must name a known role; anything else counts as no claim.
    pub fn from_claim(raw: &str) -> Option<Self> {
        match raw {
            "candidate" => Some(Role::Candidate),
            "employer" => Some(Role::Employer),
            _ => None,
        }
    }

    /// Remote lookups fail safe: only the literal "employer" yields an employer.
    pub fn from_lookup(raw: Option<&str>) -> Self {
        match raw {
            Some("employer") => Role::Employer,
            _ => Role::Candidate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Candidate => "candidate",
            Role::Employer => "employer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub user_id: String,
    pub email: Option<String>,
    pub role_claim: Option<Role>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("role_claim", &self.role_claim)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    email: Option<String>,
    exp: Option<i64>,
    #[serde(default)]
    user_metadata: Option<UserMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    role: Option<String>,
}

impl Session {
    pub fn new(access_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            user_id: user_id.into(),
            email: None,
            role_claim: None,
            expires_at: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_role_claim(mut self, role: Role) -> Self {
        self.role_claim = Some(role);
        self
    }

    /// Read identity claims from the provider's JWT.
    ///
    /// The signature is not checked here: the provider issued the token and the API
    /// verifies it on every call. This only extracts `sub`, `email`, `exp` and
    /// `user_metadata.role`.
    pub fn from_access_token(token: &str) -> Result<Self> {
        let header = jsonwebtoken::decode_header(token).context("Malformed access token")?;

        let mut validation = Validation::new(header.alg);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .context("Failed to read access token claims")?;
        let claims = data.claims;

        Ok(Self {
            access_token: token.to_string(),
            user_id: claims.sub,
            email: claims.email,
            role_claim: claims
                .user_metadata
                .and_then(|m| m.role)
                .as_deref()
                .and_then(Role::from_claim),
            expires_at: claims
                .exp
                .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0)),
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(false)
    }
}
