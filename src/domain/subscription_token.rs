use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

const TOKEN_LENGTH: usize = 32;

/// Opaque bearer credential embedded in verification and unsubscribe links.
///
/// 32 alphanumeric characters drawn from `thread_rng` (a CSPRNG) carry ~190 bits of entropy and
/// need no escaping in URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionToken(String);

impl SubscriptionToken {
    pub fn generate() -> Self {
        let mut rng = thread_rng();
        let token = std::iter::repeat_with(|| rng.sample(Alphanumeric))
            .map(char::from)
            .take(TOKEN_LENGTH)
            .collect();
        Self(token)
    }

    /// Validate a token coming back from a link. Anything that could not have been generated by
    /// us is rejected before hitting the database.
    pub fn parse(s: String) -> Result<Self, String> {
        let is_valid = s.len() == TOKEN_LENGTH && s.chars().all(|c| c.is_ascii_alphanumeric());
        if is_valid {
            Ok(Self(s))
        } else {
            Err("The token is malformed.".into())
        }
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for SubscriptionToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
