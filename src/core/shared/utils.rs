use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::{
    r2d2::{ConnectionManager, Pool},
    PgConnection,
};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn(database_url: &str, pool_size: u32) -> Result<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .with_context(|| "Failed to build database connection pool".to_string())
}

/// Run database migrations
pub fn run_migrations(pool: &DbPool) -> Result<()> {
    use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

    const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

    let mut conn = pool.get().context("Failed to get connection for migrations")?;
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {e}"))?;
    for version in applied {
        tracing::info!("Applied migration {version}");
    }
    Ok(())
}

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$")
        .expect("Invalid email regex")
});

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("Invalid file name regex"));

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254 && EMAIL_REGEX.is_match(email)
}

/// `%term%` for ILIKE, with the pattern metacharacters escaped.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

/// Strips directories and anything outside `[A-Za-z0-9._-]`.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned = UNSAFE_FILE_CHARS.replace_all(base, "_");
    let cleaned = cleaned.trim_matches(|c: char| c == '.' || c == '_');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.chars().take(120).collect()
    }
}

/// Collision-free storage name that keeps the original extension readable.
pub fn stored_file_name(original: &str) -> String {
    format!("{}_{}", Uuid::new_v4().simple(), sanitize_file_name(original))
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// End of day for date-only upper bounds, so `to=2026-01-31` includes that day.
pub fn parse_datetime_upper(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.len() == 10 {
        return NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_nano_opt(23, 59, 59, 999_999_999))
            .map(|naive| naive.and_utc());
    }
    parse_datetime(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("ops@acme.com"));
        assert!(is_valid_email("first.last+tag@sub.example.org"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("@acme.com"));
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("acme"), "%acme%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\docs\\policy 2026.pdf"), "policy_2026.pdf");
        assert_eq!(sanitize_file_name("..."), "file");
        let stored = stored_file_name("claim form.pdf");
        assert!(stored.ends_with("_claim_form.pdf"));
        assert_eq!(stored.len(), 32 + 1 + "claim_form.pdf".len());
    }

    #[test]
    fn test_parse_datetime_accepts_dates_and_timestamps() {
        let d = parse_datetime("2026-02-14").unwrap();
        assert_eq!((d.year(), d.month(), d.day(), d.hour()), (2026, 2, 14, 0));
        let t = parse_datetime("2026-02-14T10:30:00+02:00").unwrap();
        assert_eq!(t.hour(), 8);
        let upper = parse_datetime_upper("2026-02-14").unwrap();
        assert_eq!(upper.hour(), 23);
        let last_second = parse_datetime("2026-02-14T23:59:59.400Z").unwrap();
        assert!(last_second <= upper);
        assert!(parse_datetime("2026-02-15T00:00:00Z").unwrap() > upper);
        assert!(parse_datetime("yesterday").is_none());
    }
}
