use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const WORDS_PER_MINUTE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NewsletterStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl NewsletterStatus {
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "archived" => Ok(Self::Archived),
            other => Err(format!(
                "{other} is not a valid status. Use one of draft, published or archived."
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    /// Lifecycle table. Staying in the same status is always allowed.
    ///
    /// draft -> published | archived, published -> archived. An archived newsletter stays archived
    /// and a published one cannot go back to draft.
    pub fn can_transition_to(&self, next: NewsletterStatus) -> bool {
        use NewsletterStatus::*;

        matches!(
            (self, next),
            (Draft, Draft)
                | (Published, Published)
                | (Archived, Archived)
                | (Draft, Published)
                | (Draft, Archived)
                | (Published, Archived)
        )
    }

    pub fn transition_to(&self, next: NewsletterStatus) -> Result<NewsletterStatus, String> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(format!(
                "A {} newsletter cannot be moved to {}.",
                self.as_str(),
                next.as_str()
            ))
        }
    }
}

/// URL-friendly form of a title: lowercase ASCII alphanumerics separated by single dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if (c.is_whitespace() || c == '-' || c == '_') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Slug of a newly titled newsletter. The millisecond timestamp keeps two newsletters with the
/// same title apart.
pub fn generate_slug(title: &str, at: DateTime<Utc>) -> String {
    let base = slugify(title);
    if base.is_empty() {
        format!("newsletter-{}", at.timestamp_millis())
    } else {
        format!("{}-{}", base, at.timestamp_millis())
    }
}

/// Minutes needed to read `content`, rounded up.
pub fn reading_time(content: &str) -> usize {
    let words = content.split_whitespace().count();
    (words + WORDS_PER_MINUTE - 1) / WORDS_PER_MINUTE
}

/// The first `max_chars` characters of `content`, with an ellipsis when something was cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

/// Text of an HTML fragment: markup dropped, entities decoded, whitespace collapsed.
pub fn plain_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    let text = htmlescape::decode_html(&text).unwrap_or(text);
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
