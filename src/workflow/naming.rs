//! Filenames for signed attachments.

use chrono::{Datelike, NaiveDate};

/// French month names, January first.
pub const FRENCH_MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// Day of month from which attachments concern the current month.
const CURRENT_MONTH_FROM_DAY: u32 = 10;

/// `(month 1..=12, year)` the attachment is about: the current month, or
/// the previous one before the 10th.
pub fn target_period(today: NaiveDate) -> (u32, i32) {
    if today.day() >= CURRENT_MONTH_FROM_DAY {
        (today.month(), today.year())
    } else if today.month() == 1 {
        (12, today.year() - 1)
    } else {
        (today.month() - 1, today.year())
    }
}

/// `"DUPONT - janvier24.pdf"`, or `"janvier24.pdf"` without a last name.
pub fn attachment_filename(last_name: &str, today: NaiveDate) -> String {
    let (month, year) = target_period(today);
    let period = format!(
        "{}{:02}",
        FRENCH_MONTHS[(month - 1) as usize],
        year.rem_euclid(100)
    );
    let prefix = last_name.trim().to_uppercase();
    if prefix.is_empty() {
        format!("{period}.pdf")
    } else {
        format!("{prefix} - {period}.pdf")
    }
}
