//! Everything-style query mini-language: `ext:`, `size:>N[kb|mb|gb]`,
//! `dm:today`/`dm:<k>d`/`dm:<k>h`, `folder:`/`file:`, `path:`, and bare
//! substring tokens (ANDed together).

#[derive(Debug, Clone, PartialEq)]
pub enum SizeBound {
    GreaterThan(u64),
    LessThan(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeFilter {
    FolderOnly,
    FileOnly,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DateFilter {
    /// Since the start of the current calendar day (UTC midnight).
    Today,
    /// Within the last N seconds, a rolling window back from "now".
    WithinSecs(i64),
}

impl DateFilter {
    /// The epoch-seconds threshold below which a file's mtime fails this
    /// filter, given the current time in epoch seconds.
    pub fn threshold(&self, now_epoch_secs: i64) -> i64 {
        match self {
            DateFilter::Today => start_of_day(now_epoch_secs),
            DateFilter::WithinSecs(secs) => now_epoch_secs - secs,
        }
    }
}

/// Epoch seconds at UTC midnight of the day containing `epoch_secs`.
/// Chrono-free: days-since-epoch arithmetic only, no calendar conversion is
/// actually needed since a day boundary is just a multiple of 86400.
fn start_of_day(epoch_secs: i64) -> i64 {
    let days = epoch_secs.div_euclid(86_400);
    days * 86_400
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub keywords: Vec<String>,
    pub extension: Option<String>,
    pub size: Option<SizeBound>,
    pub modified_within: Option<DateFilter>,
    pub type_filter: Option<TypeFilter>,
    pub path_substrings: Vec<String>,
}

impl ParsedQuery {
    fn empty() -> Self {
        Self {
            keywords: Vec::new(),
            extension: None,
            size: None,
            modified_within: None,
            type_filter: None,
            path_substrings: Vec::new(),
        }
    }
}

pub fn escape_like(value: &str) -> String {
    value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn has_glob_chars(s: &str) -> bool {
    s.contains('*') || s.contains('?')
}

pub fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    for ch in pattern.chars() {
        match ch {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out
}

fn parse_size_spec(spec: &str) -> Option<u64> {
    let spec = spec.trim();
    let split = spec.find(|c: char| !c.is_ascii_digit());
    let (digits, unit) = match split {
        Some(pos) => spec.split_at(pos),
        None => (spec, ""),
    };
    let base: u64 = digits.parse().ok()?;
    let multiplier: u64 = match unit.to_lowercase().as_str() {
        "" | "b" => 1,
        "kb" => 1024,
        "mb" => 1024 * 1024,
        "gb" => 1024 * 1024 * 1024,
        _ => return None,
    };
    Some(base * multiplier)
}

fn parse_dm_spec(spec: &str) -> Option<DateFilter> {
    if spec == "today" {
        return Some(DateFilter::Today);
    }
    let split = spec.find(|c: char| !c.is_ascii_digit());
    let (digits, unit) = match split {
        Some(pos) => spec.split_at(pos),
        None => return None,
    };
    let count: i64 = digits.parse().ok()?;
    match unit {
        "d" => Some(DateFilter::WithinSecs(count * 86_400)),
        "h" => Some(DateFilter::WithinSecs(count * 3_600)),
        _ => None,
    }
}

/// Parse a free-form query string into its structured filters. A recognized
/// `prefix:` consumes the whole token as a filter; an unrecognized value
/// after a known prefix (e.g. `size:>huge`) falls through and the token is
/// treated as a bare keyword instead of silently dropped.
pub fn parse_query(query: &str) -> ParsedQuery {
    let mut result = ParsedQuery::empty();

    for token in query.split_whitespace() {
        if let Some(rest) = token.strip_prefix("ext:") {
            let rest = rest.trim_start_matches('.').to_lowercase();
            result.extension = Some(format!(".{rest}"));
            continue;
        }
        if let Some(rest) = token.strip_prefix("size:>") {
            if let Some(bytes) = parse_size_spec(rest) {
                result.size = Some(SizeBound::GreaterThan(bytes));
                continue;
            }
        }
        if let Some(rest) = token.strip_prefix("size:<") {
            if let Some(bytes) = parse_size_spec(rest) {
                result.size = Some(SizeBound::LessThan(bytes));
                continue;
            }
        }
        if let Some(rest) = token.strip_prefix("dm:") {
            if let Some(filter) = parse_dm_spec(rest) {
                result.modified_within = Some(filter);
                continue;
            }
        }
        if let Some(rest) = token.strip_prefix("folder:") {
            result.type_filter = Some(TypeFilter::FolderOnly);
            if !rest.is_empty() {
                result.keywords.push(rest.to_lowercase());
            }
            continue;
        }
        if let Some(rest) = token.strip_prefix("file:") {
            result.type_filter = Some(TypeFilter::FileOnly);
            if !rest.is_empty() {
                result.keywords.push(rest.to_lowercase());
            }
            continue;
        }
        if let Some(rest) = token.strip_prefix("path:") {
            result.path_substrings.push(rest.to_lowercase());
            continue;
        }

        result.keywords.push(token.to_lowercase());
    }

    result
}

/// Build the LIKE body (without surrounding `%`) for a bare keyword,
/// translating glob characters when present instead of escaping them.
pub fn keyword_like_pattern(keyword: &str) -> String {
    if has_glob_chars(keyword) {
        glob_to_like(keyword)
    } else {
        format!("%{}%", escape_like(keyword))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_keywords_are_anded() {
        let q = parse_query("foo bar");
        assert_eq!(q.keywords, vec!["foo", "bar"]);
    }

    #[test]
    fn ext_filter() {
        let q = parse_query("ext:txt");
        assert_eq!(q.extension, Some(".txt".to_string()));
        assert!(q.keywords.is_empty());
    }

    #[test]
    fn ext_filter_normalizes_leading_dot() {
        assert_eq!(parse_query("ext:.PNG").extension, Some(".png".to_string()));
    }

    #[test]
    fn size_greater_than_mb() {
        let q = parse_query("size:>10mb");
        assert_eq!(q.size, Some(SizeBound::GreaterThan(10 * 1024 * 1024)));
    }

    #[test]
    fn size_less_than_plain_bytes() {
        let q = parse_query("size:<500");
        assert_eq!(q.size, Some(SizeBound::LessThan(500)));
    }

    #[test]
    fn dm_today() {
        let q = parse_query("dm:today");
        assert_eq!(q.modified_within, Some(DateFilter::Today));
    }

    #[test]
    fn dm_days_and_hours() {
        assert_eq!(parse_query("dm:3d").modified_within, Some(DateFilter::WithinSecs(3 * 86_400)));
        assert_eq!(parse_query("dm:6h").modified_within, Some(DateFilter::WithinSecs(6 * 3_600)));
    }

    #[test]
    fn today_threshold_is_midnight_utc() {
        // 100000 seconds into day 1 (86400 <= t < 172800)
        let now = 86_400 + 100_000 % 86_400 + 50_000;
        let threshold = DateFilter::Today.threshold(now);
        assert_eq!(threshold % 86_400, 0);
        assert!(threshold <= now);
    }

    #[test]
    fn folder_and_file_filters() {
        assert_eq!(parse_query("folder:").type_filter, Some(TypeFilter::FolderOnly));
        let q = parse_query("file:report");
        assert_eq!(q.type_filter, Some(TypeFilter::FileOnly));
        assert_eq!(q.keywords, vec!["report"]);
    }

    #[test]
    fn path_substring() {
        let q = parse_query("path:users/bob");
        assert_eq!(q.path_substrings, vec!["users/bob"]);
    }

    #[test]
    fn combined_query() {
        let q = parse_query("invoice ext:pdf size:>1mb dm:7d");
        assert_eq!(q.keywords, vec!["invoice"]);
        assert_eq!(q.extension, Some(".pdf".to_string()));
        assert_eq!(q.size, Some(SizeBound::GreaterThan(1024 * 1024)));
        assert_eq!(q.modified_within, Some(DateFilter::WithinSecs(7 * 86_400)));
    }

    #[test]
    fn colon_tokens_never_become_bare_keywords() {
        let q = parse_query("ext:rs");
        assert!(!q.keywords.contains(&"ext:rs".to_string()));
    }

    #[test]
    fn keyword_like_pattern_escapes_and_wraps() {
        assert_eq!(keyword_like_pattern("a_b"), "%a\\_b%");
        assert_eq!(keyword_like_pattern("*.md"), "%.md");
    }

    #[test]
    fn glob_to_like_escapes() {
        assert_eq!(glob_to_like("100%_done"), "100\\%\\_done");
        assert_eq!(glob_to_like("a\\b"), "a\\\\b");
    }

    #[test]
    fn escape_like_works() {
        assert_eq!(escape_like("a%b_c\\d"), "a\\%b\\_c\\\\d");
    }
}
