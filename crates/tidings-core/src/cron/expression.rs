//! Standard 5-field cron expressions evaluated in an IANA timezone

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

use super::types::{CronError, Result};

/// A validated `minute hour day-of-month month day-of-week` expression
#[derive(Clone)]
pub struct CronExpression {
    source: String,
    schedule: ::cron::Schedule,
}

impl CronExpression {
    /// Parse a 5-field expression
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronError::InvalidExpression {
                expression: expression.to_string(),
                reason: format!("expected 5 fields, got {}", fields.len()),
            });
        }

        let invalid = |reason: String| CronError::InvalidExpression {
            expression: expression.to_string(),
            reason,
        };

        // the cron crate wants a leading seconds field and numbers Sunday as 1
        let day_of_week = translate_day_of_week(fields[4]).map_err(invalid)?;
        let normalized = format!("0 {} {}", fields[..4].join(" "), day_of_week);
        let schedule =
            ::cron::Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            source: expression.trim().to_string(),
            schedule,
        })
    }

    /// The expression as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First firing strictly after `after`, evaluated in `tz`
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&tz))
            .next()
            .map(|at| at.with_timezone(&Utc))
    }
}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Map a standard day-of-week field (0-7, Sunday = 0 or 7) to the cron
/// crate's numbering (1-7, Sunday = 1). Names pass through unchanged.
fn translate_day_of_week(field: &str) -> std::result::Result<String, String> {
    let mut out = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        let with_step = |base: String| match step {
            Some(step) => format!("{base}/{step}"),
            None => base,
        };

        match base.split_once('-') {
            Some((start, end)) => {
                let (Some(start), Some(end)) = (day_number(start)?, day_number(end)?) else {
                    out.push(item.to_string());
                    continue;
                };
                if end == 7 && start == 0 {
                    out.push(with_step("1-7".to_string()));
                } else if end == 7 {
                    // a range ending on Sunday wraps around in the cron crate
                    out.push(with_step(format!("{}-7", start + 1)));
                    out.push("1".to_string());
                } else {
                    out.push(with_step(format!("{}-{}", start % 7 + 1, end % 7 + 1)));
                }
            }
            None => match day_number(base)? {
                Some(day) => out.push(with_step((day % 7 + 1).to_string())),
                None => out.push(item.to_string()),
            },
        }
    }
    Ok(out.join(","))
}

fn day_number(token: &str) -> std::result::Result<Option<u32>, String> {
    if !token.chars().all(|c| c.is_ascii_digit()) || token.is_empty() {
        return Ok(None);
    }
    match token.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(Some(day)),
        _ => Err(format!("day of week out of range: {token}")),
    }
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CronError::InvalidTimezone(name.to_string()))
}
