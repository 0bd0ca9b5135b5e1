//! Profile settings
//!
//! Input validation for the settings screen: picture uploads, password
//! changes, the profile update payload and the colour theme.

use crate::{ClientError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Mime types accepted for avatar and cover photo uploads
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg"];

/// Upload limit before base64 encoding
pub const MAX_IMAGE_BYTES: usize = 2 * 1024 * 1024;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Validate an uploaded picture and encode it as a `data:` URL
///
/// # Errors
///
/// [`ClientError::Validation`] with the message to show under the input.
pub fn validate_image(mime: &str, bytes: &[u8]) -> Result<String> {
    let mime = mime.trim().to_ascii_lowercase();
    if !ALLOWED_IMAGE_TYPES.contains(&mime.as_str()) {
        return Err(ClientError::validation(
            "Only PNG, JPG, and JPEG formats are allowed.",
        ));
    }

    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ClientError::validation(format!(
            "File size must be less than 2MB. Actual size: {:.2}MB",
            bytes.len() as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(format!("data:{};base64,{}", mime, STANDARD.encode(bytes)))
}

/// Password change form
#[derive(Debug, Clone, Default)]
pub struct PasswordChange {
    pub current: String,
    pub new: String,
    pub confirm: String,
}

/// Per-field errors of a [`PasswordChange`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PasswordErrors {
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
}

impl PasswordErrors {
    pub fn is_empty(&self) -> bool {
        self.new_password.is_none() && self.confirm_password.is_none()
    }
}

impl PasswordChange {
    pub fn new(current: impl Into<String>, new: impl Into<String>, confirm: impl Into<String>) -> Self {
        Self {
            current: current.into(),
            new: new.into(),
            confirm: confirm.into(),
        }
    }

    /// Errors for the fields filled in so far; empty fields are not flagged
    pub fn errors(&self) -> PasswordErrors {
        let mut errors = PasswordErrors::default();

        if !self.new.is_empty() && self.new.chars().count() < MIN_PASSWORD_LEN {
            errors.new_password = Some(format!(
                "Password must be at least {} characters long.",
                MIN_PASSWORD_LEN
            ));
        }
        if !self.confirm.is_empty() && self.new != self.confirm {
            errors.confirm_password = Some("Passwords do not match.".to_string());
        }

        errors
    }

    pub fn can_submit(&self) -> bool {
        !self.current.is_empty()
            && !self.new.is_empty()
            && !self.confirm.is_empty()
            && self.errors().is_empty()
    }
}

/// Payload of `PUT /users/profile`
///
/// Pictures are only sent when the user picked a new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: String,
    pub bio: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_photo: Option<String>,
}

impl ProfileUpdate {
    pub fn new(name: impl Into<String>, bio: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bio: bio.into(),
            avatar: None,
            cover_photo: None,
        }
    }

    /// Include a new avatar; empty previews are ignored
    pub fn with_avatar(mut self, data_url: impl Into<String>) -> Self {
        self.avatar = Some(data_url.into()).filter(|s| !s.is_empty());
        self
    }

    pub fn with_cover_photo(mut self, data_url: impl Into<String>) -> Self {
        self.cover_photo = Some(data_url.into()).filter(|s| !s.is_empty());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ClientError::validation("Name cannot be empty."));
        }
        Ok(())
    }
}

/// Colour theme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggle(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }

    pub fn is_dark(&self) -> bool {
        matches!(self, Theme::Dark)
    }
}
