//! Clause tracking over literal SQL text.
//!
//! The compiler never parses SQL. It only follows top-level keywords well
//! enough to know where a typed element lands (select list, FROM, SET, ...),
//! and it rejects literal text that carries its own parameter markers.
//! Quoted literals and comments are skipped.

use crate::error::{QueryError, Result};

/// Clause a position in the statement text belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Clause {
    Start,
    Select,
    From,
    Join,
    On,
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
    Set,
    Values,
    Into,
    Update,
    Delete,
    Returning,
    Lock,
}

impl Clause {
    /// FROM list and its joins.
    pub(crate) fn is_from_region(self) -> bool {
        matches!(self, Clause::From | Clause::Join | Clause::On)
    }

    /// Positions where only a table name is valid.
    pub(crate) fn expects_table(self) -> bool {
        matches!(
            self,
            Clause::From | Clause::Join | Clause::Into | Clause::Update | Clause::Delete
        )
    }
}

/// Text span in which keywords and markers mean nothing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Opaque {
    Quote(char),
    /// `--` up to the end of the line.
    LineComment,
    /// `/* ... */`
    BlockComment,
}

/// A keyword switching the clause at a paren depth.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Transition {
    pub offset: usize,
    pub clause: Clause,
    pub depth: usize,
}

#[derive(Clone, Debug)]
pub(crate) struct ClauseTracker {
    stack: Vec<Clause>,
    opaque: Option<Opaque>,
    first: Option<Clause>,
}

impl ClauseTracker {
    pub(crate) fn new() -> Self {
        Self::starting(Clause::Start)
    }

    /// Tracker for an inline fragment embedded in `clause`.
    pub(crate) fn starting(clause: Clause) -> Self {
        Self {
            stack: vec![clause],
            opaque: None,
            first: None,
        }
    }

    pub(crate) fn clause(&self) -> Clause {
        self.stack.last().copied().unwrap_or(Clause::Start)
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Inside a quoted literal or a comment.
    pub(crate) fn in_quote(&self) -> bool {
        self.opaque.is_some()
    }

    /// First clause entered at depth zero.
    pub(crate) fn first(&self) -> Option<Clause> {
        self.first
    }

    /// Scans literal text; any parameter marker outside quotes is an error.
    pub(crate) fn feed(&mut self, text: &str) -> Result<Vec<Transition>> {
        let (transitions, markers) = self.scan(text)?;
        if !markers.is_empty() {
            return Err(QueryError::template(format!(
                "literal text contains a parameter marker: {text:?}; bind values as parameters"
            )));
        }
        Ok(transitions)
    }

    /// Scans raw SQL, returning the byte offsets of its `?` markers.
    pub(crate) fn feed_raw(&mut self, text: &str) -> Result<Vec<usize>> {
        let (_, markers) = self.scan(text)?;
        Ok(markers)
    }

    /// Fails when the text ended inside a quoted literal or block comment.
    pub(crate) fn finish(&self) -> Result<()> {
        match self.opaque {
            Some(Opaque::Quote(_)) => Err(QueryError::template("unterminated quoted literal")),
            Some(Opaque::BlockComment) => Err(QueryError::template("unterminated block comment")),
            Some(Opaque::LineComment) | None => Ok(()),
        }
    }

    fn scan(&mut self, text: &str) -> Result<(Vec<Transition>, Vec<usize>)> {
        let mut transitions = Vec::new();
        let mut markers = Vec::new();
        let mut word_start: Option<usize> = None;
        let mut chars = text.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match self.opaque {
                Some(Opaque::Quote(q)) => {
                    if c == q {
                        self.opaque = None;
                    }
                    continue;
                }
                Some(Opaque::LineComment) => {
                    if c == '\n' {
                        self.opaque = None;
                    }
                    continue;
                }
                Some(Opaque::BlockComment) => {
                    if c == '*' && chars.next_if(|&(_, next)| next == '/').is_some() {
                        self.opaque = None;
                    }
                    continue;
                }
                None => {}
            }
            if c.is_ascii_alphanumeric() || c == '_' {
                word_start.get_or_insert(i);
                continue;
            }
            if let Some(start) = word_start.take() {
                self.word(&text[start..i], start, &mut transitions);
            }
            match c {
                '\'' | '"' => self.opaque = Some(Opaque::Quote(c)),
                '-' => {
                    if chars.next_if(|&(_, next)| next == '-').is_some() {
                        self.opaque = Some(Opaque::LineComment);
                    }
                }
                '/' => {
                    if chars.next_if(|&(_, next)| next == '*').is_some() {
                        self.opaque = Some(Opaque::BlockComment);
                    }
                }
                '(' => {
                    let current = self.clause();
                    self.stack.push(current);
                }
                ')' => {
                    if self.stack.len() > 1 {
                        self.stack.pop();
                    }
                }
                '?' => markers.push(i),
                '$' => {
                    if chars.peek().is_some_and(|(_, next)| next.is_ascii_digit()) {
                        return Err(QueryError::template(format!(
                            "numbered parameter marker in literal text: {text:?}"
                        )));
                    }
                }
                _ => {}
            }
        }
        if let Some(start) = word_start {
            self.word(&text[start..], start, &mut transitions);
        }
        Ok((transitions, markers))
    }

    fn word(&mut self, word: &str, offset: usize, transitions: &mut Vec<Transition>) {
        let current = self.clause();
        let next = match word.to_ascii_uppercase().as_str() {
            "SELECT" => Clause::Select,
            "FROM" if current == Clause::Delete => return,
            "FROM" => Clause::From,
            "JOIN" => Clause::Join,
            "ON" if current.is_from_region() => Clause::On,
            "WHERE" => Clause::Where,
            "GROUP" => Clause::GroupBy,
            "HAVING" => Clause::Having,
            "ORDER" => Clause::OrderBy,
            "LIMIT" | "OFFSET" => Clause::Limit,
            "SET" if current == Clause::Update => Clause::Set,
            "VALUES" => Clause::Values,
            "INTO" => Clause::Into,
            "UPDATE" if current == Clause::Lock => return,
            "UPDATE" => Clause::Update,
            "DELETE" => Clause::Delete,
            "RETURNING" => Clause::Returning,
            "FOR" => Clause::Lock,
            "UNION" | "INTERSECT" | "EXCEPT" => Clause::Start,
            _ => return,
        };
        if let Some(top) = self.stack.last_mut() {
            *top = next;
        }
        let depth = self.depth();
        if depth == 0 && self.first.is_none() {
            self.first = Some(next);
        }
        transitions.push(Transition {
            offset,
            clause: next,
            depth,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_top_level_clauses() {
        let mut tracker = ClauseTracker::new();
        tracker.feed("SELECT ").expect("literal");
        assert_eq!(tracker.clause(), Clause::Select);
        tracker.feed(" FROM ").expect("literal");
        assert_eq!(tracker.clause(), Clause::From);
        let transitions = tracker.feed(" WHERE x IN (SELECT 1) AND ").expect("literal");
        assert_eq!(tracker.clause(), Clause::Where);
        assert_eq!(transitions[0].offset, 1);
        assert_eq!(transitions[1].depth, 1);
        assert_eq!(tracker.first(), Some(Clause::Select));
    }

    #[test]
    fn keywords_in_quotes_and_parens_are_scoped() {
        let mut tracker = ClauseTracker::new();
        tracker.feed("SELECT 'FROM ?' , EXTRACT(YEAR FROM ts) ").expect("literal");
        assert_eq!(tracker.clause(), Clause::Select);
        tracker.feed("FROM t FOR UPDATE").expect("literal");
        assert_eq!(tracker.clause(), Clause::Lock);
    }

    #[test]
    fn delete_from_stays_a_table_target() {
        let mut tracker = ClauseTracker::new();
        tracker.feed("DELETE FROM ").expect("literal");
        assert_eq!(tracker.clause(), Clause::Delete);
        assert!(tracker.clause().expects_table());
    }

    #[test]
    fn rejects_markers_in_literal_text() {
        let mut tracker = ClauseTracker::new();
        assert_eq!(
            tracker.feed("WHERE id = ?").unwrap_err().code(),
            "SqlTemplateException"
        );
        let mut tracker = ClauseTracker::new();
        assert_eq!(
            tracker.feed("WHERE id = $1").unwrap_err().code(),
            "SqlTemplateException"
        );
        let mut tracker = ClauseTracker::new();
        assert_eq!(tracker.feed_raw("a = ? OR b = '?'").expect("raw"), vec![4]);
    }

    #[test]
    fn comments_hide_markers_and_keywords() {
        let mut tracker = ClauseTracker::new();
        tracker
            .feed("SELECT a -- why? FROM here\n, b /* WHERE x = ? */ ")
            .expect("literal");
        assert_eq!(tracker.clause(), Clause::Select);
        assert!(!tracker.in_quote());
        let mut tracker = ClauseTracker::new();
        assert_eq!(
            tracker.feed_raw("a = ? /* b = ? */ -- c = ?\nAND d - 1 = ?").expect("raw"),
            vec![4, 39]
        );
        let mut tracker = ClauseTracker::new();
        tracker.feed("WHERE a = 1 /* open").expect("literal");
        assert_eq!(tracker.finish().unwrap_err().code(), "SqlTemplateException");
    }

    #[test]
    fn detects_unterminated_quotes() {
        let mut tracker = ClauseTracker::new();
        tracker.feed("WHERE name = 'abc").expect("literal");
        assert!(tracker.in_quote());
        assert_eq!(tracker.finish().unwrap_err().code(), "SqlTemplateException");
    }
}
