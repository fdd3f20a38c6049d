//! Domain suffix rules.
//!
//! A domain matches a rule when it equals the rule or ends with `"." + rule`.
//! Rules live in a label-reversed trie: `com -> google -> www`.

use std::fs;
use std::path::Path;

use rustc_hash::FxHashMap;

use crate::dns::normalize_domain;
use crate::error::ConfigError;

#[derive(Debug, Default)]
struct Node {
    children: FxHashMap<String, Node>,
    end: bool,
}

/// Suffix matcher over one or more rule lists.
#[derive(Debug, Default)]
pub struct DomainMatcher {
    root: Node,
    rules: usize,
    // Linear rule list kept only when cross-checking is on.
    cross_check: Option<Vec<String>>,
}

impl DomainMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and union every rule file in `paths`.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut matcher = Self::new();
        for path in paths {
            matcher.add_file(path.as_ref())?;
        }
        Ok(matcher)
    }

    /// Keep a linear copy of the rules and log whenever it disagrees with the trie.
    pub fn with_cross_check(mut self) -> Self {
        self.cross_check = Some(Vec::new());
        self
    }

    pub fn add_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.add_rules(text.lines());
        tracing::info!(file = %path.display(), rules = self.rules, "loaded domain rules");
        Ok(())
    }

    pub fn add_rules<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.add_rule(line);
        }
    }

    pub fn add_rule(&mut self, rule: &str) {
        let rule = rule.trim();
        if rule.is_empty() {
            return;
        }
        let rule = normalize_domain(rule);
        self.rules += 1;
        if let Some(linear) = self.cross_check.as_mut() {
            linear.push(rule.clone());
        }

        if rule.is_empty() {
            self.root.end = true;
            self.root.children.clear();
            return;
        }

        let mut node = &mut self.root;
        for label in rule.rsplit('.') {
            // A broader rule already covers everything below.
            if node.end {
                return;
            }
            node = node.children.entry(label.to_string()).or_default();
        }
        node.end = true;
        node.children.clear();
    }

    pub fn is_match(&self, domain: &str) -> bool {
        let domain = normalize_domain(domain);
        let hit = self.trie_match(&domain);

        if let Some(linear) = &self.cross_check {
            let linear_hit = linear_match(linear, &domain);
            if linear_hit != hit {
                tracing::warn!(domain = %domain, trie = hit, linear = linear_hit, "domain matchers disagree");
            }
        }
        hit
    }

    fn trie_match(&self, domain: &str) -> bool {
        let mut node = &self.root;
        if node.end {
            return true;
        }
        if domain.is_empty() {
            return false;
        }
        for label in domain.rsplit('.') {
            match node.children.get(label) {
                Some(child) if child.end => return true,
                Some(child) => node = child,
                None => return false,
            }
        }
        false
    }

    /// Number of rules added, including shadowed ones.
    pub fn len(&self) -> usize {
        self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules == 0
    }
}

fn linear_match(rules: &[String], domain: &str) -> bool {
    rules.iter().any(|rule| {
        rule.is_empty()
            || domain == rule
            || (domain.len() > rule.len()
                && domain.ends_with(rule.as_str())
                && domain.as_bytes()[domain.len() - rule.len() - 1] == b'.')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn matcher(rules: &[&str]) -> DomainMatcher {
        let mut m = DomainMatcher::new();
        m.add_rules(rules.iter().copied());
        m
    }

    #[test]
    fn is_match_suffix_is_dot_anchored() {
        let m = matcher(&["google.com"]);

        assert!(m.is_match("www.google.com"));
        assert!(m.is_match("google.com"));
        assert!(!m.is_match("notgoogle.com"));
        assert!(!m.is_match("com"));
    }

    #[test]
    fn is_match_ignores_case_and_trailing_dot() {
        let m = matcher(&["Google.COM"]);

        assert!(m.is_match("WWW.google.com."));
    }

    #[test]
    fn broader_rule_shadows_later_specific_rule() {
        let m = matcher(&["google.com", "mail.google.com"]);

        assert!(m.is_match("a.google.com"));
        assert!(m.is_match("x.mail.google.com"));
    }

    #[test]
    fn broader_rule_added_later_covers_existing_branch() {
        let m = matcher(&["mail.google.com", "google.com"]);

        assert!(m.is_match("drive.google.com"));
        assert!(m.is_match("mail.google.com"));
    }

    #[test]
    fn specific_rule_does_not_match_parent() {
        let m = matcher(&["mail.google.com"]);

        assert!(!m.is_match("google.com"));
        assert!(!m.is_match("drive.google.com"));
    }

    #[test]
    fn empty_matcher_matches_nothing() {
        let m = DomainMatcher::new();

        assert!(!m.is_match("example.com"));
        assert!(!m.is_match(""));
        assert!(m.is_empty());
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let m = matcher(&["# header", "", "  example.org  "]);

        assert_eq!(m.len(), 1);
        assert!(m.is_match("a.example.org"));
    }

    #[test]
    fn files_combine_by_union() {
        let mut a = tempfile::NamedTempFile::new().unwrap();
        writeln!(a, "google.com").unwrap();
        let mut b = tempfile::NamedTempFile::new().unwrap();
        writeln!(b, "twitter.com").unwrap();

        let m = DomainMatcher::from_files(&[a.path(), b.path()]).unwrap();

        assert!(m.is_match("www.google.com"));
        assert!(m.is_match("api.twitter.com"));
        assert!(!m.is_match("baidu.com"));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = DomainMatcher::from_files(&["/nonexistent/rules.txt"]).unwrap_err();

        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn cross_check_agrees_with_trie() {
        let mut m = DomainMatcher::new().with_cross_check();
        m.add_rules(["google.com", "mail.qq.com"]);

        for (domain, want) in [
            ("www.google.com", true),
            ("notgoogle.com", false),
            ("mail.qq.com", true),
            ("qq.com", false),
        ] {
            assert_eq!(m.is_match(domain), want, "{domain}");
            assert_eq!(linear_match(m.cross_check.as_ref().unwrap(), domain), want);
        }
    }
}
