use serde::{Deserialize, Serialize};

/// A topic a subscriber opts into. Newsletters are tagged with the same set of topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interest {
    Photos,
    Press,
    Videos,
    General,
}

/// The topic a newsletter is about.
pub type NewsletterType = Interest;

impl Interest {
    pub const ALL: [Interest; 4] = [
        Interest::Photos,
        Interest::Press,
        Interest::Videos,
        Interest::General,
    ];

    pub fn parse(s: &str) -> Result<Interest, String> {
        match s.trim().to_lowercase().as_str() {
            "photos" => Ok(Interest::Photos),
            "press" => Ok(Interest::Press),
            "videos" => Ok(Interest::Videos),
            "general" => Ok(Interest::General),
            other => Err(format!(
                "{other} is not a valid interest. Use one of photos, press, videos or general."
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interest::Photos => "photos",
            Interest::Press => "press",
            Interest::Videos => "videos",
            Interest::General => "general",
        }
    }

    /// The interests a subscriber must hold (at least one of) to receive a newsletter of this type.
    ///
    /// Everybody interested in `general` gets every newsletter, while a `general` newsletter only
    /// goes to those interested in `general`.
    pub fn audience(&self) -> Vec<Interest> {
        match self {
            Interest::General => vec![Interest::General],
            other => vec![*other, Interest::General],
        }
    }

    /// `Photos` -> `"Photos"`, as shown in email bodies.
    pub fn label(&self) -> &'static str {
        match self {
            Interest::Photos => "Photos",
            Interest::Press => "Press",
            Interest::Videos => "Videos",
            Interest::General => "General",
        }
    }
}

impl std::fmt::Display for Interest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse every entry of a stored `TEXT[]` column, failing on the first unknown tag.
pub fn parse_interests(raw: &[String]) -> Result<Vec<Interest>, String> {
    raw.iter().map(|s| Interest::parse(s)).collect()
}

pub fn interests_as_strings(interests: &[Interest]) -> Vec<String> {
    interests.iter().map(|i| i.as_str().to_string()).collect()
}
