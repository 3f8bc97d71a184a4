use crate::{columns, SheetRow};

/// Exact name values produced by header repeats, flag cells and month dividers.
const JUNK_NAMES: &[&str] = &[
    "true",
    "full_name",
    "id",
    "december_2025",
    "january_2026",
    "february_2026",
    "march_2026",
    "april_2026",
];

const MONTHS: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "jan", "feb", "mar", "apr", "jun", "jul", "aug", "sep",
    "oct", "nov", "dec",
];

const YEARS: &[&str] = &["2025", "2026"];

/// True for spreadsheet artifacts that sit in the name column.
pub fn is_junk_name(full_name: &str) -> bool {
    let name = full_name.trim().to_lowercase();
    if JUNK_NAMES.contains(&name.as_str()) {
        return true;
    }
    // month + year reads as a section heading, not a person
    let has_month = MONTHS.iter().any(|m| name.contains(m));
    let has_year = YEARS.iter().any(|y| name.contains(y));
    has_month && has_year
}

fn is_plausible_email(email: &str) -> bool {
    email.contains('@') && email.contains('.') && !email.contains(' ') && email.chars().count() > 5
}

fn is_plausible_phone(phone: &str) -> bool {
    phone.chars().filter(char::is_ascii_digit).count() >= 7
}

/// Email or phone shaped well enough to reach a person.
pub fn has_valid_contact(row: &SheetRow) -> bool {
    let email = row.get(columns::EMAIL).unwrap_or_default().trim();
    let phone = row
        .first_present(&[columns::PHONE_NUMBER, columns::MANUAL_CONTACT])
        .unwrap_or_default()
        .trim();
    is_plausible_email(email) || is_plausible_phone(phone)
}

/// Classifies a raw row as a lead. Junk names lose even with valid contact details.
pub fn is_valid_lead(row: &SheetRow) -> bool {
    let name = row.get(columns::FULL_NAME).unwrap_or_default();
    !is_junk_name(name) && has_valid_contact(row)
}
