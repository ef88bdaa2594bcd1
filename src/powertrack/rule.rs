use chrono::NaiveDateTime;

use super::PowerTrackError;
use super::types::{Bucket, Rule};

const API_DATE_FORMAT: &str = "%Y%m%d%H%M";
const INPUT_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y%m%d%H%M"];

/// Convert `YYYY-mm-DD`, `YYYY-mm-DD HH:MM`, `YYYY-mm-DDTHH:MM`, or `YYYYmmDDHHMM` to `YYYYmmDDHHMM`.
pub fn convert_date(input: &str) -> Result<String, PowerTrackError> {
    let input = input.trim();

    for format in INPUT_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(dt.format(API_DATE_FORMAT).to_string());
        }
    }

    chrono::NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.format(API_DATE_FORMAT).to_string())
        .ok_or_else(|| PowerTrackError::InvalidDate(input.to_string()))
}

/// Build a request payload for a compiled query.
///
/// Rules with a count bucket target the counts endpoint, which takes no `maxResults`.
pub fn build_rule(
    query: &str,
    from_date: Option<&str>,
    to_date: Option<&str>,
    results_per_call: Option<u32>,
    count_bucket: Option<Bucket>,
) -> Result<Rule, PowerTrackError> {
    let from_date = from_date.map(convert_date).transpose()?;
    let to_date = to_date.map(convert_date).transpose()?;

    Ok(Rule {
        query: query.to_string(),
        from_date,
        to_date,
        max_results: if count_bucket.is_some() {
            None
        } else {
            results_per_call
        },
        bucket: count_bucket,
    })
}
