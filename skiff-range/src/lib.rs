use semver::VersionReq;
use std::error::Error as StdError;
use std::fmt;

pub use semver::Version;

/// An npm-style version range: one or more `||`-separated alternatives,
/// each a whitespace-separated conjunction of comparators.
#[derive(Debug, Clone)]
pub struct RangeSet {
    original: String,
    alternatives: Vec<VersionReq>,
}

#[derive(Debug, Clone)]
pub struct Error {
    input: String,
    message: String,
}

impl Error {
    pub fn new(input: String, message: String) -> Self {
        Self { input, message }
    }

    pub fn input(&self) -> &str {
        &self.input
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.input)
    }
}

impl StdError for Error {}

impl RangeSet {
    pub fn parse(original: &str) -> Result<Self, Error> {
        let mut text = original.trim();

        if text.is_empty() || text == "latest" {
            text = "*";
        }

        let mut alternatives = Vec::new();

        for part in text.split("||") {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let normalized = normalize_conjunction(part);

            let req = VersionReq::parse(&normalized)
                .map_err(|err| Error::new(original.to_string(), err.to_string()))?;

            alternatives.push(req);
        }

        if alternatives.is_empty() {
            alternatives.push(VersionReq::STAR);
        }

        Ok(RangeSet {
            original: original.to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn matches_str(&self, version: &str) -> bool {
        match Version::parse(version) {
            Ok(parsed) => self.matches(&parsed),
            Err(_) => false,
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }
}

/// Whether `range` accepts `version`, treating an unparsable range as a
/// literal: it then only accepts the identical string.
pub fn satisfies(version: &str, range: &str) -> bool {
    match RangeSet::parse(range) {
        Ok(set) => set.matches_str(version),
        Err(_) => version == range,
    }
}

/// Format a resolved version as a dependency range for saving into a
/// manifest: exact pins, `~` keeps the minor, the default `^` keeps the
/// major.
pub fn save_range(version: &str, exact: bool, tilde: bool) -> String {
    if exact {
        version.to_string()
    } else if tilde {
        format!("~{}", version)
    } else {
        format!("^{}", version)
    }
}

/// Rewrite one `||` alternative into the comma-joined comparator list the
/// semver crate expects. Handles npm spellings: hyphen ranges, `v` and `=`
/// prefixes, bare `x` wildcards.
fn normalize_conjunction(part: &str) -> String {
    let tokens: Vec<&str> = part.split_whitespace().collect();

    // hyphen range: "1.2.3 - 2.0.0" becomes ">=1.2.3, <=2.0.0"
    if tokens.len() == 3 && tokens[1] == "-" {
        return format!(
            ">={}, <={}",
            normalize_comparator(tokens[0]),
            normalize_comparator(tokens[2])
        );
    }

    let mut comparators = Vec::with_capacity(tokens.len());

    for token in tokens {
        comparators.push(normalize_comparator(token));
    }

    if comparators.is_empty() {
        return "*".to_string();
    }

    comparators.join(", ")
}

fn normalize_comparator(token: &str) -> String {
    let mut text = token.trim();

    if let Some(stripped) = text.strip_prefix('=') {
        text = stripped;
    }

    let (operator, mut rest) = split_operator(text);

    if let Some(stripped) = rest.strip_prefix('v') {
        rest = stripped;
    }

    if rest.is_empty() || rest == "x" || rest == "X" {
        rest = "*";
    }

    format!("{}{}", operator, rest)
}

fn split_operator(text: &str) -> (&str, &str) {
    for prefix in [">=", "<=", ">", "<", "^", "~"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            return (prefix, rest.trim());
        }
    }
    ("", text)
}
