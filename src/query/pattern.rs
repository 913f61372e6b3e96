//! Wildcard selectors over stream identity codes.
//!
//! A selector list is comma separated. `*` matches any run of characters,
//! `?` exactly one, everything else itself. A leading `-` turns an entry
//! into an exclusion. The FDSN token `--` stands for the empty code, and an
//! empty entry matches only the empty code.

use crate::core::identity::StreamIdentity;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnyRun,
}

/// A compiled wildcard pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Compile `source`; it is upper-cased to match normalized codes
    pub fn compile(source: &str) -> Self {
        let source = source.to_uppercase();
        let mut tokens: Vec<Token> = Vec::with_capacity(source.len());
        for c in source.chars() {
            let token = match c {
                '*' => Token::AnyRun,
                '?' => Token::AnyChar,
                other => Token::Literal(other),
            };
            // consecutive runs are equivalent to one
            if token == Token::AnyRun && tokens.last() == Some(&Token::AnyRun) {
                continue;
            }
            tokens.push(token);
        }
        Self { source, tokens }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern contains no wildcards
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Literal(_)))
    }

    /// Match the whole of `value`.
    ///
    /// Single pass with backtracking to the most recent `*` only, which is
    /// linear in practice and `O(len(value) * len(pattern))` worst case.
    pub fn matches(&self, value: &str) -> bool {
        let text: Vec<char> = value.chars().collect();
        let (mut t, mut p) = (0usize, 0usize);
        let mut resume: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(Token::AnyRun) => {
                    resume = Some((p + 1, t));
                    p += 1;
                }
                Some(Token::AnyChar) => {
                    t += 1;
                    p += 1;
                }
                Some(Token::Literal(c)) if *c == text[t] => {
                    t += 1;
                    p += 1;
                }
                _ => match resume {
                    Some((after_star, consumed)) => {
                        p = after_star;
                        t = consumed + 1;
                        resume = Some((after_star, consumed + 1));
                    }
                    None => return false,
                },
            }
        }

        self.tokens[p..].iter().all(|t| *t == Token::AnyRun)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Inclusion and exclusion patterns for one identity field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl FieldSelector {
    /// Selector that accepts every code
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse a comma-separated pattern list
    pub fn parse(list: &str) -> Self {
        fn code(entry: &str) -> &str {
            if entry == "--" {
                ""
            } else {
                entry
            }
        }

        let mut selector = Self::default();
        for entry in list.split(',').map(str::trim) {
            if entry == "--" {
                selector.include.push(Pattern::compile(""));
            } else if let Some(excluded) = entry.strip_prefix('-') {
                selector.exclude.push(Pattern::compile(code(excluded)));
            } else {
                selector.include.push(Pattern::compile(code(entry)));
            }
        }
        selector
    }

    /// Parse an optional list; absence selects everything
    pub fn parse_opt(list: Option<&str>) -> Self {
        list.map(Self::parse).unwrap_or_default()
    }

    pub fn include(mut self, pattern: &str) -> Self {
        self.include.push(Pattern::compile(pattern));
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.exclude.push(Pattern::compile(pattern));
        self
    }

    /// An empty inclusion list accepts everything; exclusions always apply
    pub fn matches(&self, code: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(code));
        included && !self.exclude.iter().any(|p| p.matches(code))
    }

    pub fn is_unconstrained(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }
}

/// One selector per identity field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors {
    pub network: FieldSelector,
    pub station: FieldSelector,
    pub location: FieldSelector,
    pub channel: FieldSelector,
}

impl Selectors {
    /// Selectors that accept every identity
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse(
        network: Option<&str>,
        station: Option<&str>,
        location: Option<&str>,
        channel: Option<&str>,
    ) -> Self {
        Self {
            network: FieldSelector::parse_opt(network),
            station: FieldSelector::parse_opt(station),
            location: FieldSelector::parse_opt(location),
            channel: FieldSelector::parse_opt(channel),
        }
    }

    pub fn with_network(mut self, list: &str) -> Self {
        self.network = FieldSelector::parse(list);
        self
    }

    pub fn with_station(mut self, list: &str) -> Self {
        self.station = FieldSelector::parse(list);
        self
    }

    pub fn with_location(mut self, list: &str) -> Self {
        self.location = FieldSelector::parse(list);
        self
    }

    pub fn with_channel(mut self, list: &str) -> Self {
        self.channel = FieldSelector::parse(list);
        self
    }

    /// All four fields must match independently
    pub fn matches(&self, identity: &StreamIdentity) -> bool {
        self.network.matches(&identity.network)
            && self.station.matches(&identity.station)
            && self.location.matches(&identity.location)
            && self.channel.matches(&identity.channel)
    }
}
