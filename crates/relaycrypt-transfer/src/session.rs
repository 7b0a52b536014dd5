//! Transfer sessions and the links that open them.

use relaycrypt_core::{TransferError, TransferResult};
use relaycrypt_crypto::{CredentialProvider, FragmentCredentials, SessionKey};
use relaycrypt_relay::HttpRelay;
use reqwest::Url;
use uuid::Uuid;

/// Which half of the relay protocol a link points at.
///
/// The relay names its endpoints from its own side: `/receive/...` is where
/// it receives uploads, `/send/...` is where it serves downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    Upload,
    Download,
}

impl LinkDirection {
    fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "receive" => Some(Self::Upload),
            "send" => Some(Self::Download),
            _ => None,
        }
    }
}

/// A parsed relay link: `https://host[/prefix]/{receive|send}/{token}#key=...`
#[derive(Clone)]
pub struct TransferLink {
    base: Url,
    direction: LinkDirection,
    token: String,
    fragment: Option<String>,
}

impl TransferLink {
    pub fn parse(raw: &str) -> TransferResult<Self> {
        let url = Url::parse(raw.trim()).map_err(|e| invalid_link(raw, &e.to_string()))?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        if segments.len() < 2 {
            return Err(invalid_link(raw, "expected /receive/<token> or /send/<token>"));
        }

        let (prefix, tail) = segments.split_at(segments.len() - 2);
        let direction = LinkDirection::from_segment(tail[0])
            .ok_or_else(|| invalid_link(raw, "expected /receive/<token> or /send/<token>"))?;
        let token = tail[1].to_string();

        let mut base = url.clone();
        base.set_fragment(None);
        base.set_query(None);
        let mut base_path = prefix.join("/");
        base_path.insert(0, '/');
        if !prefix.is_empty() {
            base_path.push('/');
        }
        base.set_path(&base_path);

        Ok(Self {
            base,
            direction,
            token,
            fragment: url.fragment().map(str::to_string),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Key material carried in the fragment, if any.
    pub fn credentials(&self) -> Option<FragmentCredentials> {
        self.fragment
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(FragmentCredentials::new)
    }

    /// Build a link for sharing with the other participant.
    pub fn to_shareable(&self, key: &SessionKey) -> String {
        let segment = match self.direction {
            LinkDirection::Upload => "receive",
            LinkDirection::Download => "send",
        };
        format!(
            "{}{}/{}#key={}",
            self.base,
            segment,
            self.token,
            key.to_base64url()
        )
    }
}

impl std::fmt::Debug for TransferLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferLink")
            .field("base", &self.base.as_str())
            .field("direction", &self.direction)
            .field("token", &self.token)
            .field("fragment", &self.fragment.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn invalid_link(raw: &str, reason: &str) -> TransferError {
    let shown = raw.split('#').next().unwrap_or(raw);
    TransferError::Config(format!("invalid relay link {shown}: {reason}"))
}

/// One participant's view of a transfer. The key and client id are fixed
/// for the session's lifetime and the key is never sent to the relay.
#[derive(Debug, Clone)]
pub struct TransferSession {
    token: String,
    client_id: String,
    key: SessionKey,
}

impl TransferSession {
    /// New session with a random client id.
    pub fn new(token: impl Into<String>, key: SessionKey) -> Self {
        Self {
            token: token.into(),
            client_id: Uuid::new_v4().to_string(),
            key,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Open a session from a link, taking the key from `credentials` or, if
    /// none is given, from the link's fragment.
    pub fn from_link(
        link: &TransferLink,
        credentials: Option<&dyn CredentialProvider>,
    ) -> TransferResult<Self> {
        let key = match credentials {
            Some(provider) => provider.session_key()?,
            None => link
                .credentials()
                .ok_or_else(|| {
                    TransferError::Config(
                        "link carries no key; pass one via RELAYCRYPT_KEY".to_string(),
                    )
                })?
                .session_key()?,
        };
        Ok(Self::new(link.token(), key))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// HTTP relay scoped to this session's token and client id.
    pub fn http_relay(&self, client: reqwest::Client, base: Url) -> HttpRelay {
        HttpRelay::new(client, base, self.token.clone(), self.client_id.clone())
    }
}
