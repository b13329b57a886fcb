//! Vault items: a tagged union over `contentType`.
//!
//! ```json
//! {"contentType": "login", "contentVersion": 1, "id": "...", "vaultId": "...",
//!  "deviceId": "...", "securityType": 1, "createdAt": 0, "updatedAt": 0,
//!  "tags": [], "content": {"name": "...", "password": "..."}}
//! ```

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

// ============================================================================
// SecurityTier
// ============================================================================

/// Sensitivity of an item's secret fields. Serialized as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SecurityTier {
    /// Never transmitted to or cached on this side.
    TopSecret = 0,
    /// Cached only after an explicit reveal, then forgotten.
    HighlySecret = 1,
    /// Persisted with the item, encrypted under the device storage key.
    Secret = 2,
}

impl From<SecurityTier> for u8 {
    fn from(tier: SecurityTier) -> Self {
        tier as u8
    }
}

impl TryFrom<u8> for SecurityTier {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(SecurityTier::TopSecret),
            1 => Ok(SecurityTier::HighlySecret),
            2 => Ok(SecurityTier::Secret),
            other => Err(format!("unknown security tier {other}")),
        }
    }
}

// ============================================================================
// Secrets
// ============================================================================

/// The secret fields of any item variant. Wiped when dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct ItemSecrets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_code: Option<String>,
}

impl ItemSecrets {
    pub fn password(password: impl Into<String>) -> Self {
        let mut secrets = Self::default();
        secrets.password = Some(password.into());
        secrets
    }

    pub fn is_empty(&self) -> bool {
        self.password.is_none()
            && self.text.is_none()
            && self.card_number.is_none()
            && self.security_code.is_none()
    }
}

// ============================================================================
// Item
// ============================================================================

fn default_content_version() -> u32 {
    1
}

/// Fields shared by every variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMeta {
    pub id: String,
    pub vault_id: String,
    pub device_id: String,
    #[serde(default = "default_content_version")]
    pub content_version: u32,
    pub security_type: SecurityTier,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Base64 secret fields sealed under the per-item cache key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginContent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureNoteContent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCardContent {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    /// `MM/YY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_issuer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Login {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub content: LoginContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecureNote {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub content: SecureNoteContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCard {
    #[serde(flatten)]
    pub meta: ItemMeta,
    pub content: PaymentCardContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "contentType")]
pub enum Item {
    #[serde(rename = "login")]
    Login(Login),
    #[serde(rename = "secureNote")]
    SecureNote(SecureNote),
    #[serde(rename = "paymentCard")]
    PaymentCard(PaymentCard),
}

impl Item {
    pub fn meta(&self) -> &ItemMeta {
        match self {
            Item::Login(item) => &item.meta,
            Item::SecureNote(item) => &item.meta,
            Item::PaymentCard(item) => &item.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ItemMeta {
        match self {
            Item::Login(item) => &mut item.meta,
            Item::SecureNote(item) => &mut item.meta,
            Item::PaymentCard(item) => &mut item.meta,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta().id
    }

    pub fn tier(&self) -> SecurityTier {
        self.meta().security_type
    }

    pub fn updated_at(&self) -> i64 {
        self.meta().updated_at
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Item::Login(_) => "login",
            Item::SecureNote(_) => "secureNote",
            Item::PaymentCard(_) => "paymentCard",
        }
    }

    pub fn content_version(&self) -> u32 {
        self.meta().content_version
    }

    /// Check the variant's required fields.
    pub fn validate(&self) -> Result<()> {
        let meta = self.meta();
        if meta.id.trim().is_empty() {
            return Err(Error::Validation("item id is empty".to_string()));
        }
        if meta.content_version == 0 {
            return Err(Error::Validation(format!(
                "{}: contentVersion must be at least 1",
                meta.id
            )));
        }

        let name = match self {
            Item::Login(item) => {
                if item.content.uris.iter().any(|uri| uri.trim().is_empty()) {
                    return Err(Error::Validation(format!("{}: empty URI", meta.id)));
                }
                &item.content.name
            }
            Item::SecureNote(item) => &item.content.name,
            Item::PaymentCard(item) => {
                let content = &item.content;
                if let Some(number) = &content.card_number {
                    let digits = number.chars().filter(|c| !c.is_whitespace());
                    if !digits.clone().all(|c| c.is_ascii_digit()) || digits.count() < 12 {
                        return Err(Error::Validation(format!(
                            "{}: malformed card number",
                            meta.id
                        )));
                    }
                }
                if let Some(expiration) = &content.expiration_date {
                    if !is_expiration_date(expiration) {
                        return Err(Error::Validation(format!(
                            "{}: expiration date must be MM/YY",
                            meta.id
                        )));
                    }
                }
                if let Some(code) = &content.security_code {
                    if !(3..=4).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_digit())
                    {
                        return Err(Error::Validation(format!(
                            "{}: malformed security code",
                            meta.id
                        )));
                    }
                }
                &content.name
            }
        };

        if name.trim().is_empty() {
            return Err(Error::Validation(format!("{}: name is required", meta.id)));
        }
        Ok(())
    }

    /// Copy of the plaintext secret fields.
    pub fn secrets(&self) -> ItemSecrets {
        let mut secrets = ItemSecrets::default();
        match self {
            Item::Login(item) => secrets.password = item.content.password.clone(),
            Item::SecureNote(item) => secrets.text = item.content.text.clone(),
            Item::PaymentCard(item) => {
                secrets.card_number = item.content.card_number.clone();
                secrets.security_code = item.content.security_code.clone();
            }
        }
        secrets
    }

    pub fn has_plaintext_secret(&self) -> bool {
        !self.secrets().is_empty()
    }

    /// Clear every plaintext secret field.
    pub fn strip_secrets(&mut self) {
        match self {
            Item::Login(item) => item.content.password.zeroize(),
            Item::SecureNote(item) => item.content.text.zeroize(),
            Item::PaymentCard(item) => {
                item.content.card_number.zeroize();
                item.content.security_code.zeroize();
            }
        }
    }

    /// Write the fields of `secrets` that apply to this variant.
    pub fn apply_secrets(&mut self, secrets: &ItemSecrets) {
        match self {
            Item::Login(item) => item.content.password = secrets.password.clone(),
            Item::SecureNote(item) => item.content.text = secrets.text.clone(),
            Item::PaymentCard(item) => {
                item.content.card_number = secrets.card_number.clone();
                item.content.security_code = secrets.security_code.clone();
            }
        }
    }
}

fn is_expiration_date(value: &str) -> bool {
    let Some((month, year)) = value.split_once('/') else {
        return false;
    };
    month.len() == 2
        && year.len() == 2
        && year.chars().all(|c| c.is_ascii_digit())
        && matches!(month.parse::<u8>(), Ok(1..=12))
}
