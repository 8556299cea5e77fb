//! Input validation utilities.
//!
//! This module contains functions for validating user inputs before they reach the conversion
//! or add-on pipelines.

use crate::constants::{DEFAULT_ENCOUNTER_DAYS_AGO, MAX_ENCOUNTER_DAYS_AGO, PRACTICE_ID_PREFIX};
use crate::{CoreError, CoreResult};
use chrono::{Duration, NaiveDate};

/// Normalises a practice id to its qualified form (`a-16349`).
///
/// Accepts the number with or without the `a-` prefix.
///
/// # Arguments
///
/// * `practice_id` - Practice id as supplied by the user.
///
/// # Errors
///
/// Returns a `CoreError::InvalidInput` if the id is empty or the number is not all digits.
pub fn normalise_practice_id(practice_id: &str) -> CoreResult<String> {
    let trimmed = practice_id.trim();
    let number = trimmed.strip_prefix(PRACTICE_ID_PREFIX).unwrap_or(trimmed);

    if number.is_empty() {
        return Err(CoreError::InvalidInput("practice id cannot be empty".into()));
    }
    if !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::InvalidInput(format!(
            "practice id '{practice_id}' must be digits, optionally prefixed with '{PRACTICE_ID_PREFIX}'"
        )));
    }

    Ok(format!("{PRACTICE_ID_PREFIX}{number}"))
}

/// Default add-on encounter date relative to `today`.
pub fn default_encounter_date(today: NaiveDate) -> NaiveDate {
    today - Duration::days(DEFAULT_ENCOUNTER_DAYS_AGO)
}

/// Parses and checks an add-on encounter date.
///
/// The date must be `YYYY-MM-DD`, not after `today`, and no more than 180 days before it.
///
/// # Errors
///
/// Returns a `CoreError::InvalidInput` describing which rule the date breaks.
pub fn validate_encounter_date(value: &str, today: NaiveDate) -> CoreResult<NaiveDate> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        CoreError::InvalidInput(format!(
            "invalid encounter date '{value}', expected YYYY-MM-DD"
        ))
    })?;

    if date > today {
        return Err(CoreError::InvalidInput(format!(
            "encounter date {date} is in the future (today is {today})"
        )));
    }

    let earliest = today - Duration::days(MAX_ENCOUNTER_DAYS_AGO);
    if date < earliest {
        return Err(CoreError::InvalidInput(format!(
            "encounter date {date} is more than {MAX_ENCOUNTER_DAYS_AGO} days ago (earliest {earliest})"
        )));
    }

    Ok(date)
}

/// Checks a list of virtual encounter dates (`YYYY-MM-DD`).
///
/// # Errors
///
/// Returns a `CoreError::InvalidInput` naming the first malformed date.
pub fn validate_virtual_dates(dates: &[String]) -> CoreResult<()> {
    for date in dates {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
            CoreError::InvalidInput(format!(
                "invalid virtual encounter date '{date}', expected YYYY-MM-DD"
            ))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).expect("valid date")
    }

    #[test]
    fn practice_id_is_qualified() {
        assert_eq!(normalise_practice_id("16349").expect("bare"), "a-16349");
        assert_eq!(normalise_practice_id("a-11783").expect("qualified"), "a-11783");
        assert_eq!(normalise_practice_id(" 42 ").expect("trimmed"), "a-42");
    }

    #[test]
    fn practice_id_rejects_garbage() {
        assert!(matches!(
            normalise_practice_id(""),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            normalise_practice_id("a-"),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            normalise_practice_id("b-12"),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn encounter_date_window() {
        assert_eq!(
            validate_encounter_date("2025-05-02", today()).expect("in window"),
            NaiveDate::from_ymd_opt(2025, 5, 2).expect("valid date")
        );
        assert!(validate_encounter_date("2025-06-01", today()).is_ok());
        assert!(validate_encounter_date("2025-06-02", today()).is_err());
        assert!(validate_encounter_date("2024-12-02", today()).is_err());
        assert!(validate_encounter_date("06/01/2025", today()).is_err());
    }

    #[test]
    fn default_date_is_inside_window() {
        let date = default_encounter_date(today());
        assert_eq!(date, NaiveDate::from_ymd_opt(2025, 5, 2).expect("valid date"));
        let formatted = date.format("%Y-%m-%d").to_string();
        assert!(validate_encounter_date(&formatted, today()).is_ok());
    }

    #[test]
    fn virtual_dates_must_parse() {
        assert!(validate_virtual_dates(&["2024-01-15".into()]).is_ok());
        assert!(validate_virtual_dates(&["2024-13-01".into()]).is_err());
    }
}
