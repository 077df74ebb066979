//! This module provides the search query language used to select files by tag.
//!
//! A query is a whitespace-separated sequence of expressions, each of which is either a tag test or a bracketed
//! group of expressions, e.g. `+animal [~dog ~cat] -name:fido ~name:"bree bree"`.  Tag tests come in three kinds,
//! distinguished by their prefix:
//!
//! * `+path` ([TagKind::Require]): every require test at a given level must match one of the file's tags
//!
//! * `~path` ([TagKind::Include]): at least one include test at a given level must match
//!
//! * `-path` ([TagKind::Exclude]): no exclude test at a given level may match
//!
//! A test with a value (`+name:fido`) matches a tag with exactly that path and value, while a test without one
//! (`+fur`) matches any tag whose path starts with the test's path, segment by segment (so `+fur` matches
//! `fur.black` but not `furry`).
//!
//! The top level of a query is a conjunction: every kind of test present must be satisfied, and so must every
//! group.  A group, on the other hand, is an alternation: it is satisfied if any one of its kinds of test (or any
//! of its own nested groups) is.

use {
    crate::CandidateTag,
    std::{
        fmt::{self, Display},
        ops::Range,
        str::FromStr,
    },
};

/// Represents the kind of a tag test, as indicated by its prefix character
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TagKind {
    /// `+`: the test must match
    Require,

    /// `~`: at least one of the sibling include tests must match
    Include,

    /// `-`: the test must not match
    Exclude,
}

impl TagKind {
    fn from_prefix(prefix: char) -> Option<Self> {
        match prefix {
            '+' => Some(Self::Require),
            '~' => Some(Self::Include),
            '-' => Some(Self::Exclude),
            _ => None,
        }
    }

    /// The character which introduces a test of this kind in a query
    pub fn prefix(self) -> char {
        match self {
            Self::Require => '+',
            Self::Include => '~',
            Self::Exclude => '-',
        }
    }
}

/// A single tag test, e.g. `+fur.black` or `-name:fido`
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Tag {
    /// How the result of this test contributes to the match
    pub kind: TagKind,

    /// Hierarchical path to test for; never empty
    pub path: Vec<String>,

    /// If present, the exact value the tag must have; otherwise `path` is treated as a prefix
    pub value: Option<String>,
}

impl Tag {
    /// Determine whether this test matches the specified `candidate` tag, ignoring `kind`.
    pub fn matches(&self, candidate: &CandidateTag) -> bool {
        if let Some(value) = &self.value {
            candidate.path == self.path && candidate.value.as_deref() == Some(value.as_str())
        } else {
            candidate.path.starts_with(&self.path)
        }
    }
}

impl Display for Tag {
    /// Convert a `Tag` to canonical query syntax, e.g. `+fur.black` or `~name:"bree bree"`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.path.join("."))?;

        match &self.value {
            Some(value) if !value.is_empty() && value.chars().all(is_word_char) => write!(f, ":{value}"),
            Some(value) => write!(f, ":\"{value}\""),
            None => Ok(()),
        }
    }
}

/// A node in a parsed query
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Expr {
    /// A tag test
    Tag(Tag),

    /// A bracketed group of expressions
    Group(Vec<Expr>),
}

impl Display for Expr {
    /// Convert an `Expr` to canonical query syntax.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => write!(f, "{tag}"),
            Self::Group(exprs) => write!(f, "[{}]", format_query(exprs)),
        }
    }
}

/// A parsed query, i.e. the top-level sequence of expressions
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct Query(pub Vec<Expr>);

impl Query {
    /// See [evaluate].
    pub fn evaluate(&self, candidates: &[CandidateTag]) -> MatchResult {
        evaluate(candidates, &self.0)
    }

    /// See [matches].
    pub fn matches(&self, candidates: &[CandidateTag]) -> bool {
        matches(candidates, &self.0)
    }
}

impl FromStr for Query {
    type Err = ParsingError;

    /// Parse a `Query` using [parse].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s).map(Self)
    }
}

impl Display for Query {
    /// Convert a `Query` to canonical query syntax using [format_query].
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_query(&self.0))
    }
}

/// Indicates that a query could not be parsed
///
/// `position` is a character (not byte) offset into the string being parsed.  When the problem lies inside a
/// group, `position` points at the group's opening bracket and `cause` holds the error found within the group,
/// whose own position is relative to the start of the group's contents.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("{} at {position}", describe(.cause))]
pub struct ParsingError {
    /// Character offset at which the problem was found
    pub position: usize,

    /// Error found while parsing the contents of a group, if any
    #[source]
    pub cause: Option<Box<ParsingError>>,
}

fn describe(cause: &Option<Box<ParsingError>>) -> &'static str {
    if cause.is_some() {
        "error while parsing in group"
    } else {
        "unexpected token"
    }
}

impl ParsingError {
    fn at(position: usize) -> Self {
        Self {
            position,
            cause: None,
        }
    }

    fn in_group(position: usize, cause: ParsingError) -> Self {
        Self {
            position,
            cause: Some(Box::new(cause)),
        }
    }
}

/// Convert a sequence of expressions to canonical query syntax, such that `parse(&format_query(exprs))` yields an
/// equal sequence.
pub fn format_query(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(Expr::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse the specified query string.
///
/// A string containing only whitespace yields an empty sequence.  Anything which is neither whitespace nor part
/// of an expression yields a [ParsingError] pointing at its first character.
///
/// Brackets and quotes are matched in a single pass up front, so parsing takes time linear in the length of the
/// input regardless of how brackets are nested or left unbalanced.
pub fn parse(input: &str) -> Result<Vec<Expr>, ParsingError> {
    let chars = input.chars().collect::<Vec<_>>();
    let quotes = next_quotes(&chars);
    let brackets = closing_brackets(&chars, &quotes);

    Scanner {
        chars: &chars,
        quotes: &quotes,
        brackets: &brackets,
        offset: 0,
    }
    .parse()
}

/// For each position, the position of the first `"` at or after it
fn next_quotes(chars: &[char]) -> Vec<Option<usize>> {
    let mut quotes = vec![None; chars.len()];
    let mut next = None;

    for (i, &c) in chars.iter().enumerate().rev() {
        if c == '"' {
            next = Some(i);
        }

        quotes[i] = next;
    }

    quotes
}

/// For each `[`, the position of the `]` closing it, skipping over quoted values
fn closing_brackets(chars: &[char], quotes: &[Option<usize>]) -> Vec<Option<usize>> {
    let mut brackets = vec![None; chars.len()];
    let mut open = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '[' => open.push(i),
            ']' => {
                if let Some(start) = open.pop() {
                    brackets[start] = Some(i);
                }
            }
            '"' if i > 0 && chars[i - 1] == ':' => {
                if let Some(close) = quotes.get(i + 2).copied().flatten() {
                    i = close;
                }
            }
            _ => (),
        }

        i += 1;
    }

    brackets
}

enum Token {
    Tag(Tag),
    Group(Range<usize>),
}

/// A view of part of the input (the whole query or the inside of a group) along with the precomputed quote and
/// bracket tables
///
/// Positions passed to and returned from methods are relative to the start of the view; table entries are
/// absolute, hence `offset`.
#[derive(Copy, Clone)]
struct Scanner<'a> {
    chars: &'a [char],
    quotes: &'a [Option<usize>],
    brackets: &'a [Option<usize>],
    offset: usize,
}

impl<'a> Scanner<'a> {
    fn view(&self, range: Range<usize>) -> Scanner<'a> {
        let Scanner {
            chars,
            quotes,
            brackets,
            offset,
        } = *self;

        Scanner {
            chars: &chars[range.clone()],
            quotes: &quotes[range.clone()],
            brackets: &brackets[range.clone()],
            offset: offset + range.start,
        }
    }

    fn parse(&self) -> Result<Vec<Expr>, ParsingError> {
        let mut exprs = Vec::new();
        let mut cursor = 0;

        while let Some((start, end, token)) = self.next_token(cursor) {
            self.expect_whitespace(cursor..start)?;

            exprs.push(match token {
                Token::Tag(tag) => Expr::Tag(tag),
                Token::Group(inner) => Expr::Group(
                    self.view(inner)
                        .parse()
                        .map_err(|e| ParsingError::in_group(start, e))?,
                ),
            });

            cursor = end;
        }

        self.expect_whitespace(cursor..self.chars.len())?;

        Ok(exprs)
    }

    fn expect_whitespace(&self, range: Range<usize>) -> Result<(), ParsingError> {
        let start = range.start;

        if let Some(offset) = self.chars[range].iter().position(|c| !c.is_whitespace()) {
            Err(ParsingError::at(start + offset))
        } else {
            Ok(())
        }
    }

    /// Find the first token starting at or after `from`, returning its start, its end, and the token itself.
    fn next_token(&self, from: usize) -> Option<(usize, usize, Token)> {
        (from..self.chars.len())
            .find_map(|start| self.token_at(start).map(|(end, token)| (start, end, token)))
    }

    fn token_at(&self, start: usize) -> Option<(usize, Token)> {
        let first = *self.chars.get(start)?;

        if first == '[' {
            let close = self.closing_bracket(start)?;

            return Some((close + 1, Token::Group(start + 1..close)));
        }

        let kind = TagKind::from_prefix(first)?;
        let (path, end) = self.path_at(start + 1)?;

        let (value, end) = match self.value_at(end) {
            Some((value, end)) => (Some(value), end),
            None => (None, end),
        };

        Some((end, Token::Tag(Tag { kind, path, value })))
    }

    /// Return the end of the (non-empty) word starting at `start`, if any.
    fn word_end(&self, start: usize) -> Option<usize> {
        let len = self
            .chars
            .get(start..)?
            .iter()
            .take_while(|&&c| is_word_char(c))
            .count();

        (len > 0).then(|| start + len)
    }

    fn path_at(&self, start: usize) -> Option<(Vec<String>, usize)> {
        let mut end = self.word_end(start)?;
        let mut path = vec![self.chars[start..end].iter().collect::<String>()];

        while self.chars.get(end) == Some(&'.') {
            if let Some(next) = self.word_end(end + 1) {
                path.push(self.chars[end + 1..next].iter().collect());
                end = next;
            } else {
                break;
            }
        }

        Some((path, end))
    }

    fn value_at(&self, colon: usize) -> Option<(String, usize)> {
        if self.chars.get(colon) != Some(&':') {
            return None;
        }

        if let Some(end) = self.word_end(colon + 1) {
            Some((self.chars[colon + 1..end].iter().collect(), end))
        } else if self.chars.get(colon + 1) == Some(&'"') {
            let close = self.closing_quote(colon + 1)?;

            Some((self.chars[colon + 2..close].iter().collect(), close + 1))
        } else {
            None
        }
    }

    /// Find the quote closing the (non-empty) quoted value opened at `open`, within this view.
    fn closing_quote(&self, open: usize) -> Option<usize> {
        self.quotes
            .get(open + 2)
            .copied()
            .flatten()
            .map(|close| close - self.offset)
            .filter(|&close| close < self.chars.len())
    }

    /// Find the bracket closing the group opened at `open`.
    fn closing_bracket(&self, open: usize) -> Option<usize> {
        self.brackets
            .get(open)
            .copied()
            .flatten()
            .map(|close| close - self.offset)
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// The result of evaluating one level of a query against a file's tags
///
/// Each of `require`, `include`, and `exclude` is `None` if the level contains no test of that kind, and otherwise
/// indicates whether that kind of test was satisfied.  `groups` holds the results for the level's nested groups, in
/// query order.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct MatchResult {
    /// Whether every require test matched
    pub require: Option<bool>,

    /// Whether any include test matched
    pub include: Option<bool>,

    /// Whether no exclude test matched
    pub exclude: Option<bool>,

    /// Results for nested groups
    pub groups: Vec<MatchResult>,
}

impl MatchResult {
    /// Decide whether this result represents a match, treating it as a top-level result if `nested` is false, or
    /// as the result of a group otherwise.
    ///
    /// At the top level, every kind of test present must be satisfied, as must every group.  In a group, a single
    /// satisfied kind of test (or nested group) is enough.
    pub fn decide(&self, nested: bool) -> bool {
        let fields = [self.require, self.include, self.exclude];

        if nested {
            fields.contains(&Some(true)) || self.groups.iter().any(|group| group.decide(true))
        } else {
            fields.iter().flatten().all(|&satisfied| satisfied)
                && self.groups.iter().all(|group| group.decide(true))
        }
    }

    /// Decide whether this top-level result represents a match.
    ///
    /// Note that the result of an empty query always matches.
    pub fn is_match(&self) -> bool {
        self.decide(false)
    }
}

/// Evaluate the specified query expressions against a file's `candidates` tags.
pub fn evaluate(candidates: &[CandidateTag], exprs: &[Expr]) -> MatchResult {
    let mut result = MatchResult::default();

    for expr in exprs {
        match expr {
            Expr::Tag(tag) => {
                let found = candidates.iter().any(|candidate| tag.matches(candidate));

                match tag.kind {
                    TagKind::Require => {
                        result.require = Some(result.require.unwrap_or(true) && found)
                    }
                    TagKind::Include => {
                        result.include = Some(result.include.unwrap_or(false) || found)
                    }
                    TagKind::Exclude => {
                        result.exclude = Some(result.exclude.unwrap_or(true) && !found)
                    }
                }
            }

            Expr::Group(exprs) => result.groups.push(evaluate(candidates, exprs)),
        }
    }

    result
}

/// Determine whether a file with the specified `candidates` tags matches the specified query expressions.
pub fn matches(candidates: &[CandidateTag], exprs: &[Expr]) -> bool {
    evaluate(candidates, exprs).is_match()
}
