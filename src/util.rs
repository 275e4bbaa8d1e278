//! Small utility helpers used across modules.

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// Literal replacement only: no escaping, no nested/conditional logic.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Emails are stored and looked up trimmed + lower-cased.
pub fn normalize_email(email: &str) -> String {
  email.trim().to_lowercase()
}

/// Current UTC time as an RFC 3339 string (what we persist in createdAt/updatedAt).
pub fn now_rfc3339() -> String {
  OffsetDateTime::now_utc()
    .format(&Rfc3339)
    .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with whole stories or model replies.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{}… ({} bytes total)", head, s.len())
  }
}
