//!
//! The key/value configuration contract consumed by the simulation core.
//!
//! Configuration files are ini-style: a `[General]` section plus named
//! `[Config <name>]` sections that may inherit from each other through
//! `extends`. Keys are either plain option names or object-path patterns
//! with the wildcards `*` (one path component, or a glob within one) and
//! `**` (any number of components). Values may reference the documented
//! variables in `${...}` form and may carry measurement units; file-path
//! values resolve relative to the configuration files directory.
//!
//! ```text
//! [General]
//! sim-time-limit = 100s
//!
//! [Config Fast]
//! extends = General
//! **.queue.capacity = 16
//! net.host*.rate = 1Mbps
//! ```
//!

use std::env;
use std::error::Error;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

///
/// An error produced while parsing configuration input.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    /// The 1-based line the error was found on, 0 for structural errors.
    pub line: usize,
    /// A description of the problem.
    pub reason: String,
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "config error (line {}): {}", self.line, self.reason)
    }
}

impl Error for ConfigError {}

#[derive(Debug, Clone)]
struct Section {
    name: String,
    extends: Vec<String>,
    entries: Vec<(String, String)>,
}

///
/// A parsed configuration file.
///
#[derive(Debug, Clone)]
pub struct Config {
    sections: Vec<Section>,
    base_dir: Option<PathBuf>,
}

impl Config {
    ///
    /// Parses configuration text.
    ///
    /// # Errors
    ///
    /// Fails on malformed section headers or entries outside any section.
    ///
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut sections = vec![Section {
            name: "General".to_string(),
            extends: Vec::new(),
            entries: Vec::new(),
        }];
        let mut current = 0;

        for (idx, raw_line) in text.lines().enumerate() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let Some(header) = header.strip_suffix(']') else {
                    return Err(ConfigError {
                        line: idx + 1,
                        reason: format!("unterminated section header '{line}'"),
                    });
                };
                let name = if header.trim() == "General" {
                    "General".to_string()
                } else if let Some(name) = header.trim().strip_prefix("Config ") {
                    name.trim().to_string()
                } else {
                    return Err(ConfigError {
                        line: idx + 1,
                        reason: format!("invalid section header '{line}'"),
                    });
                };

                current = sections.iter().position(|s| s.name == name).unwrap_or_else(|| {
                    sections.push(Section {
                        name,
                        extends: Vec::new(),
                        entries: Vec::new(),
                    });
                    sections.len() - 1
                });
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError {
                    line: idx + 1,
                    reason: format!("expected 'key = value', found '{line}'"),
                });
            };
            // entries before any header land in [General]
            let (key, value) = (key.trim().to_string(), value.trim().to_string());

            if key == "extends" {
                sections[current].extends =
                    value.split(',').map(|v| v.trim().to_string()).collect();
            } else {
                sections[current].entries.push((key, value));
            }
        }

        Ok(Config {
            sections,
            base_dir: None,
        })
    }

    ///
    /// Parses a configuration file. File-path values of the resulting
    /// configuration resolve relative to the files directory.
    ///
    /// # Errors
    ///
    /// Forwards io errors and parse errors.
    ///
    pub fn parse_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError {
            line: 0,
            reason: format!("cannot read '{}': {e}", path.display()),
        })?;
        let mut config = Self::parse(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// The names of all sections, `General` first.
    #[must_use]
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    ///
    /// Activates a named configuration for the given run number.
    ///
    /// The entry list of the active configuration is the named section,
    /// followed by its `extends` ancestry (depth-first), followed by
    /// `[General]`; earlier entries shadow later ones.
    ///
    #[must_use]
    pub fn activate(&self, name: &str, run_number: usize) -> ActiveConfig {
        let mut entries = Vec::new();
        let mut visited = Vec::new();
        self.collect(name, &mut entries, &mut visited);
        if !visited.iter().any(|v| v == "General") {
            self.collect("General", &mut entries, &mut visited);
        }

        ActiveConfig {
            name: name.to_string(),
            run_number,
            entries,
            overrides: Vec::new(),
            base_dir: self.base_dir.clone(),
        }
    }

    fn collect(&self, name: &str, entries: &mut Vec<(String, String)>, visited: &mut Vec<String>) {
        if visited.iter().any(|v| v == name) {
            return;
        }
        visited.push(name.to_string());

        let Some(section) = self.sections.iter().find(|s| s.name == name) else {
            return;
        };
        entries.extend(section.entries.iter().cloned());
        for parent in &section.extends {
            self.collect(parent, entries, visited);
        }
    }
}

///
/// One activated configuration: the resolved entry list for a
/// `(config name, run number)` pair, plus command-line overrides.
///
#[derive(Debug, Clone)]
pub struct ActiveConfig {
    name: String,
    run_number: usize,
    entries: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
    base_dir: Option<PathBuf>,
}

impl ActiveConfig {
    /// The name of the active configuration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The active run number.
    #[must_use]
    pub fn run_number(&self) -> usize {
        self.run_number
    }

    /// Applies a command-line override, shadowing all file entries.
    pub fn set_override(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.overrides.push((key.into(), value.into()));
    }

    /// Applies all overrides from parsed command-line options.
    pub fn apply(&mut self, cli: &CliOptions) {
        for (key, value) in &cli.overrides {
            self.set_override(key.clone(), value.clone());
        }
    }

    ///
    /// The value stored under the given key, with `${...}` variables
    /// substituted. Overrides shadow file entries.
    ///
    #[must_use]
    pub fn value(&self, key: &str) -> Option<String> {
        let raw = self
            .overrides
            .iter()
            .rev()
            .chain(self.entries.iter())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())?;
        Some(self.substitute(&raw))
    }

    /// A boolean option, or `default` if absent or malformed.
    #[must_use]
    pub fn as_bool(&self, key: &str, default: bool) -> bool {
        self.value(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// An integer option, or `default` if absent or malformed.
    #[must_use]
    pub fn as_int(&self, key: &str, default: i64) -> i64 {
        self.value(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// A floating point option (units are stripped), or `default`.
    #[must_use]
    pub fn as_double(&self, key: &str, default: f64) -> f64 {
        self.value(key)
            .and_then(|v| {
                let digits: String = v
                    .chars()
                    .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                digits.parse().ok()
            })
            .unwrap_or(default)
    }

    /// A string option, or `default` if absent.
    #[must_use]
    pub fn as_str(&self, key: &str, default: &str) -> String {
        self.value(key).unwrap_or_else(|| default.to_string())
    }

    ///
    /// A file-path option, resolved relative to the configuration files
    /// directory, or `default` if absent.
    ///
    #[must_use]
    pub fn as_path(&self, key: &str, default: &Path) -> PathBuf {
        let value = self
            .value(key)
            .map_or_else(|| default.to_path_buf(), PathBuf::from);
        match (&self.base_dir, value.is_relative()) {
            (Some(base), true) => base.join(value),
            _ => value,
        }
    }

    ///
    /// All entries whose key is an object-path pattern (contains a dot),
    /// highest precedence first, with variables substituted.
    ///
    #[must_use]
    pub fn object_entries(&self) -> Vec<(String, String)> {
        self.overrides
            .iter()
            .rev()
            .chain(self.entries.iter())
            .filter(|(key, _)| key.contains('.'))
            .map(|(key, value)| (key.clone(), self.substitute(value)))
            .collect()
    }

    ///
    /// The value for a per-object key: among all entries whose key is an
    /// object-path pattern plus `.key`, the one with the most specific
    /// matching pattern applies.
    ///
    #[must_use]
    pub fn per_object(&self, object_path: &str, key: &str) -> Option<String> {
        let suffix = format!(".{key}");
        let mut best: Option<(usize, usize, &str)> = None;

        // overrides first: they outrank any file entry of equal specificity
        let candidates = self.overrides.iter().rev().chain(self.entries.iter());
        for (entry_key, value) in candidates {
            let Some(pattern) = entry_key.strip_suffix(&suffix) else {
                continue;
            };
            if !match_pattern(pattern, object_path) {
                continue;
            }
            let literal_components = pattern
                .split('.')
                .filter(|c| !c.contains('*'))
                .count();
            let literal_chars = pattern.chars().filter(|c| *c != '*').count();
            let rank = (literal_components, literal_chars);
            if best.map_or(true, |(bc, bl, _)| rank > (bc, bl)) {
                best = Some((rank.0, rank.1, value.as_str()));
            }
        }

        best.map(|(_, _, value)| self.substitute(value))
    }

    fn substitute(&self, value: &str) -> String {
        let mut out = value.to_string();
        if out.contains("${configname}") {
            out = out.replace("${configname}", &self.name);
        }
        if out.contains("${runnumber}") {
            out = out.replace("${runnumber}", &self.run_number.to_string());
        }
        if out.contains("${datetime}") {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            out = out.replace("${datetime}", &stamp.to_string());
        }
        if out.contains("${workingdir}") {
            let cwd = env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            out = out.replace("${workingdir}", &cwd);
        }
        out
    }
}

///
/// Matches an object-path pattern against a concrete dotted path.
///
/// `**` matches any number of components, `*` matches a single component,
/// and a `*` inside a component globs within it.
///
#[must_use]
pub fn match_pattern(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let path: Vec<&str> = path.split('.').collect();
    match_components(&pattern, &path)
}

fn match_components(pattern: &[&str], path: &[&str]) -> bool {
    match (pattern.first(), path.first()) {
        (None, None) => true,
        (Some(&"**"), _) => {
            // consume zero or more components
            match_components(&pattern[1..], path)
                || (!path.is_empty() && match_components(pattern, &path[1..]))
        }
        (Some(comp), Some(elem)) => {
            match_component(comp, elem) && match_components(&pattern[1..], &path[1..])
        }
        _ => false,
    }
}

fn match_component(comp: &str, elem: &str) -> bool {
    if comp == "*" {
        return true;
    }
    match comp.split_once('*') {
        Some((prefix, rest)) => {
            // single inner glob per component is sufficient in practice
            elem.starts_with(prefix) && elem.ends_with(rest) && elem.len() >= prefix.len() + rest.len()
        }
        None => comp == elem,
    }
}

///
/// The command-line surface of the simulation core.
///
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    /// The active config name (`-c`), defaults to `General`.
    pub config_name: Option<String>,
    /// The active run number (`-r`), defaults to 0.
    pub run_number: Option<usize>,
    /// The UI adapter selector (`-u`), recorded but unused by the core.
    pub ui: Option<String>,
    /// Auxiliary libraries to load (`-l`), recorded but unused by the core.
    pub libs: Vec<String>,
    /// Raw `--key=value` configuration overrides.
    pub overrides: Vec<(String, String)>,
}

impl CliOptions {
    ///
    /// Parses command-line arguments (without the program name).
    ///
    /// # Errors
    ///
    /// Fails on flags missing their argument and on malformed overrides.
    ///
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let mut this = Self::default();
        let mut args = args.into_iter();

        let missing = |flag: &str| ConfigError {
            line: 0,
            reason: format!("flag '{flag}' requires an argument"),
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" => this.config_name = Some(args.next().ok_or_else(|| missing("-c"))?),
                "-r" => {
                    let value = args.next().ok_or_else(|| missing("-r"))?;
                    this.run_number = Some(value.parse().map_err(|_| ConfigError {
                        line: 0,
                        reason: format!("invalid run number '{value}'"),
                    })?);
                }
                "-u" => this.ui = Some(args.next().ok_or_else(|| missing("-u"))?),
                "-l" => this.libs.push(args.next().ok_or_else(|| missing("-l"))?),
                other => {
                    let Some(stripped) = other.strip_prefix("--") else {
                        return Err(ConfigError {
                            line: 0,
                            reason: format!("unknown argument '{other}'"),
                        });
                    };
                    let Some((key, value)) = stripped.split_once('=') else {
                        return Err(ConfigError {
                            line: 0,
                            reason: format!("override '--{stripped}' is missing '=value'"),
                        });
                    };
                    this.overrides.push((key.to_string(), value.to_string()));
                }
            }
        }
        Ok(this)
    }

    /// The effective config name.
    #[must_use]
    pub fn config_name(&self) -> &str {
        self.config_name.as_deref().unwrap_or("General")
    }

    /// The effective run number.
    #[must_use]
    pub fn run_number(&self) -> usize {
        self.run_number.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = "\
sim-time-limit = 100s

[Config Base]
**.queue.capacity = 8
net.host*.rate = 1Mbps
result-dir = ${configname}-${runnumber}

[Config Fast]
extends = Base
net.gateway.rate = 10Mbps
**.queue.capacity = 16
";

    #[test]
    fn parse_and_inherit() {
        let config = Config::parse(INPUT).unwrap();
        assert_eq!(config.section_names(), ["General", "Base", "Fast"]);

        let active = config.activate("Fast", 3);
        // own entries shadow inherited ones
        assert_eq!(active.value("sim-time-limit").as_deref(), Some("100s"));
        assert_eq!(active.value("result-dir").as_deref(), Some("Fast-3"));
        assert_eq!(active.value("missing"), None);
    }

    #[test]
    fn typed_getters() {
        let config = Config::parse("threads = 4\nquiet = true\nlimit = 12.5s").unwrap();
        let active = config.activate("General", 0);
        assert_eq!(active.as_int("threads", 1), 4);
        assert!(active.as_bool("quiet", false));
        assert_eq!(active.as_double("limit", 0.0), 12.5);
        assert_eq!(active.as_int("missing", 7), 7);
    }

    #[test]
    fn per_object_resolution() {
        let config = Config::parse(INPUT).unwrap();
        let active = config.activate("Fast", 0);

        // the most specific matching pattern wins
        assert_eq!(
            active.per_object("net.gateway", "rate").as_deref(),
            Some("10Mbps")
        );
        assert_eq!(
            active.per_object("net.hostA", "rate").as_deref(),
            Some("1Mbps")
        );
        assert_eq!(
            active.per_object("net.hostA.queue", "capacity").as_deref(),
            Some("16")
        );
        assert_eq!(active.per_object("net.other", "rate"), None);
    }

    #[test]
    fn override_precedence() {
        let config = Config::parse(INPUT).unwrap();
        let mut active = config.activate("Fast", 0);
        active.set_override("sim-time-limit", "5s");
        assert_eq!(active.value("sim-time-limit").as_deref(), Some("5s"));
    }

    #[test]
    fn pattern_matching() {
        assert!(match_pattern("net.*.queue", "net.host.queue"));
        assert!(!match_pattern("net.*.queue", "net.host.sub.queue"));
        assert!(match_pattern("**.queue", "net.host.sub.queue"));
        assert!(match_pattern("**.queue", "queue"));
        assert!(match_pattern("net.host*", "net.host42"));
        assert!(!match_pattern("net.host*", "net.gateway"));
        assert!(match_pattern("net.**", "net"));
    }

    #[test]
    fn cli_parsing() {
        let cli = CliOptions::parse(
            ["-c", "Fast", "-r", "2", "-u", "cli", "--sim-time-limit=5s"]
                .into_iter()
                .map(String::from),
        )
        .unwrap();
        assert_eq!(cli.config_name(), "Fast");
        assert_eq!(cli.run_number(), 2);
        assert_eq!(cli.overrides, [("sim-time-limit".into(), "5s".into())]);

        assert!(CliOptions::parse(["-c".to_string()]).is_err());
        assert!(CliOptions::parse(["bogus".to_string()]).is_err());
    }
}
