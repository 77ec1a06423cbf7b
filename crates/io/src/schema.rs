// Schema scripts: splitting, schema reset and data replay

use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;

use dbfixture_engine::{Connection, FixtureError, FixtureResult};

/// The object a script statement creates, when it creates one we can drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectLabel {
    Table(String),
    Sequence(String),
    /// 1-based position in the script.
    Ordinal(usize),
}

impl fmt::Display for ObjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectLabel::Table(name) => write!(f, "TABLE {name}"),
            ObjectLabel::Sequence(name) => write!(f, "SEQUENCE {name}"),
            ObjectLabel::Ordinal(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatement {
    pub label: ObjectLabel,
    pub sql: String,
}

struct Patterns {
    table: Regex,
    sequence: Regex,
    data_change: Regex,
}

impl Patterns {
    fn compile() -> FixtureResult<Self> {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|e| FixtureError::Dataset(format!("schema pattern: {e}")))
        };
        Ok(Self {
            table: build(
                r#"(?is)^CREATE\s+(?:(?:GLOBAL\s+)?TEMP(?:ORARY)?\s+)?TABLE\s+(?:IF\s+NOT\s+EXISTS\s+)?"?([\w$#.]+)"?"#,
            )?,
            sequence: build(r#"(?is)^CREATE\s+SEQUENCE\s+(?:IF\s+NOT\s+EXISTS\s+)?"?([\w$#.]+)"?"#)?,
            data_change: build(r"(?i)^(?:DELETE|INSERT)\b")?,
        })
    }

    fn label(&self, sql: &str, ordinal: usize) -> ObjectLabel {
        if let Some(caps) = self.table.captures(sql) {
            return ObjectLabel::Table(caps[1].to_string());
        }
        if let Some(caps) = self.sequence.captures(sql) {
            return ObjectLabel::Sequence(caps[1].to_string());
        }
        ObjectLabel::Ordinal(ordinal)
    }
}

/// Split a script into labeled statements.
///
/// Plain statements end at `;` outside quotes and comments. Procedural
/// blocks (`DECLARE`, `BEGIN`, `CREATE [OR REPLACE] PROCEDURE|FUNCTION|
/// TRIGGER|PACKAGE`) end at a line holding only `/`, or, except for
/// packages, at the `END;` matching their outermost `BEGIN`. Comments are
/// dropped; statement text keeps its original line breaks.
pub fn split_schema(sql: &str) -> FixtureResult<Vec<SchemaStatement>> {
    let patterns = Patterns::compile()?;
    let mut splitter = Splitter::default();
    for line in sql.lines() {
        splitter.line(line);
    }
    let statements = splitter.finish();

    Ok(statements
        .into_iter()
        .enumerate()
        .map(|(i, sql)| SchemaStatement {
            label: patterns.label(&sql, i + 1),
            sql,
        })
        .collect())
}

/// Drop every table and sequence the script creates, newest first, then
/// run the whole script.
pub fn reset_schema(conn: &mut dyn Connection, sql: &str) -> FixtureResult<()> {
    let statements = split_schema(sql)?;

    let mut dropped = 0usize;
    for stmt in statements.iter().rev() {
        match &stmt.label {
            ObjectLabel::Table(name) => {
                if conn.table_exists(name)? {
                    tracing::debug!(object = %stmt.label, "dropping");
                    conn.execute(&format!("DROP TABLE {name}"), &[])?;
                    dropped += 1;
                }
            }
            ObjectLabel::Sequence(name) => {
                if conn.sequence_exists(name)? {
                    tracing::debug!(object = %stmt.label, "dropping");
                    conn.drop_sequence(name)?;
                    dropped += 1;
                }
            }
            ObjectLabel::Ordinal(_) => {}
        }
    }

    for stmt in &statements {
        tracing::trace!(object = %stmt.label, "executing");
        conn.execute(&stmt.sql, &[])?;
    }
    tracing::info!(statements = statements.len(), dropped, "schema reset");
    Ok(())
}

/// Replay only the script's DELETE and INSERT statements, in order.
pub fn populate(conn: &mut dyn Connection, sql: &str) -> FixtureResult<()> {
    let patterns = Patterns::compile()?;
    let mut replayed = 0usize;
    for stmt in split_schema(sql)? {
        if patterns.data_change.is_match(&stmt.sql) {
            conn.execute(&stmt.sql, &[])?;
            replayed += 1;
        }
    }
    tracing::info!(statements = replayed, "script data replayed");
    Ok(())
}

pub fn read_script(path: &Path) -> FixtureResult<String> {
    fs::read_to_string(path).map_err(|e| FixtureError::io(path, e))
}

// ---------------------------------------------------------------------------
// Statement splitter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Plain,
    /// DECLARE / BEGIN
    Anonymous,
    /// PROCEDURE / FUNCTION / TRIGGER
    Routine,
    /// Ends only at `/`.
    Package,
}

#[derive(Default)]
struct Splitter {
    statements: Vec<String>,
    current: String,
    quote: Option<char>,
    block_comment: bool,
    kind: Option<BlockKind>,
    /// Leading keywords of the current statement, until it is classified.
    lead: Vec<String>,
    word: String,
    depth: usize,
    pending_end: bool,
    block_done: bool,
}

impl Splitter {
    fn line(&mut self, line: &str) {
        if self.quote.is_none() && !self.block_comment && line.trim() == "/" {
            self.flush();
            return;
        }

        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if self.block_comment {
                if c == '*' && next == Some('/') {
                    self.block_comment = false;
                    i += 1;
                }
                i += 1;
                continue;
            }
            if let Some(q) = self.quote {
                self.current.push(c);
                if c == q {
                    self.quote = None;
                }
                i += 1;
                continue;
            }

            match c {
                '-' if next == Some('-') => break,
                '/' if next == Some('*') => {
                    self.end_word();
                    self.block_comment = true;
                    i += 1;
                }
                '\'' | '"' => {
                    self.end_word();
                    self.resolve_end();
                    self.quote = Some(c);
                    self.current.push(c);
                }
                ';' => {
                    self.end_word();
                    self.semicolon();
                }
                c if c.is_alphanumeric() || matches!(c, '_' | '$' | '#') => {
                    self.word.push(c);
                    self.current.push(c);
                }
                c => {
                    self.end_word();
                    if !c.is_whitespace() {
                        self.resolve_end();
                    }
                    self.current.push(c);
                }
            }
            i += 1;
        }

        self.end_word();
        if self.current.trim().is_empty() {
            self.current.clear();
        } else {
            self.current.push('\n');
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.end_word();
        self.flush();
        self.statements
    }

    fn end_word(&mut self) {
        if self.word.is_empty() {
            return;
        }
        let word = std::mem::take(&mut self.word).to_ascii_uppercase();
        if self.kind.is_none() {
            self.lead.push(word.clone());
            self.classify();
        }
        if matches!(self.kind, Some(BlockKind::Anonymous | BlockKind::Routine)) {
            self.keyword(&word);
        }
    }

    /// Decide the block kind once the leading keywords settle it.
    fn classify(&mut self) {
        let lead: Vec<&str> = self
            .lead
            .iter()
            .map(String::as_str)
            .filter(|w| !matches!(*w, "TEMP" | "TEMPORARY"))
            .collect();
        self.kind = match lead.as_slice() {
            ["DECLARE" | "BEGIN", ..] => Some(BlockKind::Anonymous),
            ["CREATE"] | ["CREATE", "OR"] | ["CREATE", "OR", "REPLACE"] => None,
            ["CREATE", "OR", "REPLACE", object, ..] | ["CREATE", object, ..] => Some(match *object {
                "PROCEDURE" | "FUNCTION" | "TRIGGER" => BlockKind::Routine,
                "PACKAGE" => BlockKind::Package,
                _ => BlockKind::Plain,
            }),
            _ => Some(BlockKind::Plain),
        };
    }

    fn keyword(&mut self, word: &str) {
        if self.pending_end {
            self.pending_end = false;
            // END IF / END LOOP close no block
            if !matches!(word, "IF" | "LOOP" | "WHILE" | "REPEAT" | "FOR") {
                self.close_block();
            }
            return;
        }
        match word {
            "BEGIN" | "CASE" => self.depth += 1,
            "END" => self.pending_end = true,
            _ => {}
        }
    }

    fn resolve_end(&mut self) {
        if self.pending_end {
            self.pending_end = false;
            self.close_block();
        }
    }

    fn close_block(&mut self) {
        if self.depth > 0 {
            self.depth -= 1;
            if self.depth == 0 {
                self.block_done = true;
            }
        }
    }

    fn semicolon(&mut self) {
        self.resolve_end();
        match self.kind {
            None | Some(BlockKind::Plain) => self.flush(),
            Some(BlockKind::Package) => self.current.push(';'),
            Some(BlockKind::Anonymous | BlockKind::Routine) => {
                self.current.push(';');
                if self.block_done {
                    self.flush();
                }
            }
        }
    }

    fn flush(&mut self) {
        let sql = self.current.trim();
        if !sql.is_empty() {
            self.statements.push(sql.to_string());
        }
        self.current.clear();
        self.quote = None;
        self.kind = None;
        self.lead.clear();
        self.word.clear();
        self.depth = 0;
        self.pending_end = false;
        self.block_done = false;
    }
}
