//! Concrete packet-filter rules.
//!
//! A rule is the ordered argv that follows `<op> <chain>` on an
//! iptables/ip6tables command line. It is kept as a token list because
//! the reconciler compares rules position by position and the chain
//! selector switches on the first token.

use std::fmt;
use std::ops::Deref;

use crate::tables::direction;

/// Direction token that heads every compiled rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// `-i <ifname>`: packets arriving on the interface, outbound to the guest.
    ToGuest,
    /// `-o <ifname>`: packets leaving via the interface, inbound from the guest.
    FromGuest,
}

impl Direction {
    /// The iptables token for this direction.
    pub fn token(&self) -> &'static str {
        match self {
            Direction::ToGuest => direction::IN_IFACE,
            Direction::FromGuest => direction::OUT_IFACE,
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            direction::IN_IFACE => Some(Direction::ToGuest),
            direction::OUT_IFACE => Some(Direction::FromGuest),
            _ => None,
        }
    }
}

/// One rule: the tokens after `-A <chain>`.
///
/// Equality is strict, positional and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct IptablesRule(Vec<String>);

impl IptablesRule {
    /// An empty rule.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// A rule starting with a direction token bound to `ifname`.
    pub fn with_direction(dir: Direction, ifname: &str) -> Self {
        Self(vec![dir.token().to_string(), ifname.to_string()])
    }

    /// Appends a single token.
    pub fn push(&mut self, token: impl Into<String>) {
        self.0.push(token.into());
    }

    /// Appends a token sequence.
    pub fn extend<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(tokens.into_iter().map(Into::into));
    }

    /// Builder form of [`extend`](Self::extend).
    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extend(tokens);
        self
    }

    /// Direction of this rule, if its first token is `-i` or `-o`.
    pub fn direction(&self) -> Option<Direction> {
        self.0.first().and_then(|t| Direction::from_token(t))
    }

    /// Returns a copy with the leading direction token replaced.
    ///
    /// An empty rule is returned unchanged.
    pub fn with_leading_token(&self, token: &str) -> Self {
        let mut copy = self.clone();
        if let Some(first) = copy.0.first_mut() {
            *first = token.to_string();
        }
        copy
    }

    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn into_tokens(self) -> Vec<String> {
        self.0
    }
}

impl Deref for IptablesRule {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for IptablesRule {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for IptablesRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Ordered rules; order is first-match-wins in the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IptablesRuleList(Vec<IptablesRule>);

impl IptablesRuleList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, rule: IptablesRule) {
        self.0.push(rule);
    }

    pub fn append(&mut self, other: IptablesRuleList) {
        self.0.extend(other.0);
    }

    /// True if any rule is strictly equal to `member`.
    pub fn contains_rule(&self, member: &IptablesRule) -> bool {
        self.0.iter().any(|r| r == member)
    }

    /// Rules of `self` that do not appear in `other`, in order.
    ///
    /// Duplicates in `self` are kept, so this is a multiset difference
    /// against the membership of `other`.
    pub fn missing_from<'a>(
        &'a self,
        other: &'a IptablesRuleList,
    ) -> impl Iterator<Item = &'a IptablesRule> {
        self.0.iter().filter(move |r| !other.contains_rule(r))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IptablesRule> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[IptablesRule] {
        &self.0
    }
}

impl From<Vec<IptablesRule>> for IptablesRuleList {
    fn from(rules: Vec<IptablesRule>) -> Self {
        Self(rules)
    }
}

impl FromIterator<IptablesRule> for IptablesRuleList {
    fn from_iter<I: IntoIterator<Item = IptablesRule>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for IptablesRuleList {
    type Item = IptablesRule;
    type IntoIter = std::vec::IntoIter<IptablesRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a IptablesRuleList {
    type Item = &'a IptablesRule;
    type IntoIter = std::slice::Iter<'a, IptablesRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Builds an [`IptablesRule`] from string literals.
#[macro_export]
macro_rules! rule {
    ($($tok:expr),* $(,)?) => {
        $crate::rule::IptablesRule::from_iter([$($tok),*])
    };
}
