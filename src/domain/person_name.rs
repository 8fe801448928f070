use unicode_segmentation::UnicodeSegmentation;

const MIN_GRAPHEMES: usize = 2;
const MAX_GRAPHEMES: usize = 50;
const FORBIDDEN_CHARACTERS: [char; 9] = ['/', '(', ')', '"', '<', '>', '\\', '{', '}'];

/// A first or last name as typed by a subscriber, a contact or a user.
///
/// Names end up interpolated into HTML emails, so on top of the length bounds we reject the
/// characters that could be used to smuggle markup in.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PersonName(String);

impl PersonName {
    /// Returns an instance of `PersonName` if the input satisfies all our validation constraints,
    /// an error message otherwise. Surrounding whitespace is dropped.
    pub fn parse(s: String) -> Result<PersonName, String> {
        let trimmed = s.trim();

        // Bounds count user-perceived characters, not bytes or chars.
        let length = trimmed.graphemes(true).count();
        let is_too_short = length < MIN_GRAPHEMES;
        let is_too_long = length > MAX_GRAPHEMES;
        let contains_forbidden_characters =
            trimmed.chars().any(|c| FORBIDDEN_CHARACTERS.contains(&c));

        if is_too_short || is_too_long || contains_forbidden_characters {
            Err(format!("{s} is not a valid name."))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }
}

/// The caller gets a shared reference to the inner string. This gives the caller **read-only**
/// access, they have no way to compromise our invariants!
impl AsRef<str> for PersonName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PersonName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
