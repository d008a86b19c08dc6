// Last few device tokens pushed on a connection
//
// The gateway reports failures asynchronously and may close the socket a few
// notifications after the bad one, so failure logs carry this list for
// attribution. Nothing reads it for correctness.

use std::collections::VecDeque;
use std::fmt;

/// Tokens remembered per connection
pub const RECENT_TOKEN_CAPACITY: usize = 5;

/// Bounded FIFO of hex device tokens, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentTokenLog {
    tokens: VecDeque<String>,
}

impl RecentTokenLog {
    pub fn new() -> Self {
        Self {
            tokens: VecDeque::with_capacity(RECENT_TOKEN_CAPACITY),
        }
    }

    /// Record a token, evicting the oldest past capacity
    pub fn push(&mut self, token: impl Into<String>) {
        if self.tokens.len() == RECENT_TOKEN_CAPACITY {
            self.tokens.pop_front();
        }
        self.tokens.push_back(token.into());
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.tokens.iter().cloned().collect()
    }
}

impl fmt::Display for RecentTokenLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, token) in self.tokens.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", token)?;
        }
        write!(f, "]")
    }
}
