//! Text rendering of a single contact.

use std::fmt::Write as _;

use time::macros::format_description;
use time::OffsetDateTime;

use crate::contact::Contact;

/// One labelled block of the detail view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailSection {
    pub title: &'static str,
    pub value: String,
    /// Dialable URI for phone sections.
    pub action: Option<String>,
}

impl DetailSection {
    fn plain(title: &'static str, value: impl Into<String>) -> Self {
        Self {
            title,
            value: value.into(),
            action: None,
        }
    }

    fn phone(title: &'static str, number: &str) -> Self {
        Self {
            title,
            value: number.to_string(),
            action: tel_uri(number),
        }
    }
}

pub fn sections(contact: &Contact) -> Vec<DetailSection> {
    let location = &contact.location;
    vec![
        DetailSection::plain("First name", contact.name.first.as_str()),
        DetailSection::plain("Last name", contact.name.last.as_str()),
        DetailSection::plain("Address", format_address(contact)),
        DetailSection::plain("Email", contact.email.as_str()),
        DetailSection::phone("Landline", &contact.phone),
        DetailSection::phone("Mobile", &contact.cell),
        DetailSection::plain(
            "Timezone",
            format!("UTC{} ({})", location.timezone.offset, location.timezone.description),
        ),
        DetailSection::plain(
            "Coordinates",
            format!("{}, {}", location.coordinates.latitude, location.coordinates.longitude),
        ),
        DetailSection::plain("Nationality", contact.nat.as_str()),
        DetailSection::plain("Picture", contact.picture.large.as_str()),
    ]
}

/// Three lines: street, postcode + city, state + country.
pub fn format_address(contact: &Contact) -> String {
    let location = &contact.location;
    format!(
        "{}\n{} {}\n{}, {}",
        location.street_line(),
        location.postcode.as_string(),
        location.city,
        location.state,
        location.country
    )
}

/// `tel:` URI keeping only digits and `+`; `None` when nothing dialable is left.
pub fn tel_uri(number: &str) -> Option<String> {
    let digits: String = number
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();
    if digits.chars().any(|c| c.is_ascii_digit()) {
        Some(format!("tel:{}", digits))
    } else {
        None
    }
}

pub fn render(contact: &Contact, last_updated: Option<i64>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", contact.full_name());
    let _ = writeln!(out, "{}", "=".repeat(contact.full_name().chars().count()));

    for section in sections(contact) {
        let _ = writeln!(out, "{}:", section.title);
        for line in section.value.lines() {
            let _ = writeln!(out, "  {}", line);
        }
        if let Some(action) = section.action {
            let _ = writeln!(out, "  ({})", action);
        }
    }

    if let Some(ts) = last_updated.and_then(format_timestamp) {
        let _ = writeln!(out, "Cached: {}", ts);
    }
    out
}

fn format_timestamp(unix: i64) -> Option<String> {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute] UTC");
    OffsetDateTime::from_unix_timestamp(unix)
        .ok()?
        .format(&format)
        .ok()
}
