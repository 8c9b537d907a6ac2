//! Date helper functions

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::config::SiteConfig;

/// Default display pattern, e.g. "19 Abr 2021"
pub const DEFAULT_DATE_FORMAT: &str = "dd MMM yyyy";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DateError {
    #[error("invalid timestamp: {0:?}")]
    InvalidInput(String),

    #[error("unknown time zone: {0:?}")]
    UnknownTimeZone(String),
}

/// Month-name locale used for `MMM` / `MMMM` tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    PtBr,
    En,
}

const PT_BR_MONTHS: [&str; 12] = [
    "Janeiro", "Fevereiro", "Março", "Abril", "Maio", "Junho", "Julho", "Agosto", "Setembro",
    "Outubro", "Novembro", "Dezembro",
];
const PT_BR_SHORT_MONTHS: [&str; 12] = [
    "Jan", "Fev", "Mar", "Abr", "Mai", "Jun", "Jul", "Ago", "Set", "Out", "Nov", "Dez",
];
const EN_MONTHS: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];
const EN_SHORT_MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

impl Locale {
    /// Resolve a language tag such as `pt-BR` or `en_US`
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase().replace('_', "-");
        match tag.as_str() {
            "pt" | "pt-br" => Some(Locale::PtBr),
            "en" | "en-us" | "en-gb" => Some(Locale::En),
            _ => None,
        }
    }

    fn month_name(self, month0: usize) -> &'static str {
        match self {
            Locale::PtBr => PT_BR_MONTHS[month0],
            Locale::En => EN_MONTHS[month0],
        }
    }

    fn short_month_name(self, month0: usize) -> &'static str {
        match self {
            Locale::PtBr => PT_BR_SHORT_MONTHS[month0],
            Locale::En => EN_SHORT_MONTHS[month0],
        }
    }
}

/// Parse a CMS timestamp.
///
/// Accepts RFC 3339 as well as the `+0000` offset form the content API
/// emits, and bare `YYYY-MM-DD` dates (taken as midnight UTC).
pub fn parse_timestamp(input: &str) -> Result<DateTime<FixedOffset>, DateError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DateError::InvalidInput(input.to_string()));
    }

    DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%z"))
        .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .or_else(|_| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map(|date| {
                date.and_hms_opt(0, 0, 0)
                    .unwrap_or_default()
                    .and_utc()
                    .fixed_offset()
            })
        })
        .map_err(|_| DateError::InvalidInput(input.to_string()))
}

/// Formats timestamps with a date-fns style pattern and a fixed locale
#[derive(Debug, Clone)]
pub struct DateFormatter {
    pattern: String,
    locale: Locale,
    timezone: Option<Tz>,
}

impl Default for DateFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMAT, Locale::default())
    }
}

impl DateFormatter {
    pub fn new(pattern: &str, locale: Locale) -> Self {
        Self {
            pattern: pattern.to_string(),
            locale,
            timezone: None,
        }
    }

    /// Convert dates into `tz` before formatting
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.timezone = Some(tz);
        self
    }

    /// Build the formatter described by the site configuration
    pub fn from_config(config: &SiteConfig) -> Result<Self, DateError> {
        let locale = Locale::from_tag(&config.language).unwrap_or_else(|| {
            tracing::warn!(
                "Unsupported language {:?} for dates, falling back to pt-BR",
                config.language
            );
            Locale::PtBr
        });

        let pattern = if config.date_format.trim().is_empty() {
            DEFAULT_DATE_FORMAT
        } else {
            config.date_format.as_str()
        };
        let formatter = Self::new(pattern, locale);

        let tz_name = config.timezone.trim();
        if tz_name.is_empty() {
            return Ok(formatter);
        }
        let tz: Tz = tz_name
            .parse()
            .map_err(|_| DateError::UnknownTimeZone(tz_name.to_string()))?;
        Ok(formatter.with_timezone(tz))
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Parse and format a CMS timestamp
    pub fn format(&self, timestamp: &str) -> Result<String, DateError> {
        let date = parse_timestamp(timestamp)?;
        Ok(self.format_datetime(&date))
    }

    /// Format an already parsed date
    pub fn format_datetime<T: TimeZone>(&self, date: &DateTime<T>) -> String {
        let local = match self.timezone {
            Some(tz) => date.with_timezone(&tz).date_naive(),
            None => date.with_timezone(&Utc).date_naive(),
        };
        render_pattern(&self.pattern, local, self.locale)
    }
}

/// Format a timestamp as "dd MMM yyyy" with pt-BR month names
///
/// # Examples
/// ```ignore
/// format_date("2021-04-19T19:25:28+0000") // -> Ok("19 Abr 2021")
/// ```
pub fn format_date(timestamp: &str) -> Result<String, DateError> {
    DateFormatter::default().format(timestamp)
}

/// Expand date-fns tokens (`d`, `dd`, `M`, `MM`, `MMM`, `MMMM`, `yy`, `yyyy`).
/// Text in single quotes is copied literally; other characters pass through.
fn render_pattern(pattern: &str, date: NaiveDate, locale: Locale) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    let month0 = date.month0() as usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                out.push(chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }

        match (c, run) {
            ('d', 1) => out.push_str(&date.day().to_string()),
            ('d', _) => out.push_str(&format!("{:02}", date.day())),
            ('M', 1) => out.push_str(&date.month().to_string()),
            ('M', 2) => out.push_str(&format!("{:02}", date.month())),
            ('M', 3) => out.push_str(locale.short_month_name(month0)),
            ('M', _) => out.push_str(locale.month_name(month0)),
            ('y', 2) => out.push_str(&format!("{:02}", date.year().rem_euclid(100))),
            ('y', _) => out.push_str(&format!("{:04}", date.year())),
            _ => {
                for _ in 0..run {
                    out.push(c);
                }
            }
        }
        i += run;
    }

    out
}
