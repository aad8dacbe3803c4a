/// Coarse statement classification derived from the leading keyword.
/// The real tokenizer lives outside this crate; this is only used for
/// policy decisions (tab naming, dangerous-DML confirmation, busy cues).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Dml,
    Ddl,
    Control,
    Unknown,
}

/// One parsed SQL unit: an immutable span of script text plus metadata.
/// Produced by the external splitter; never mutated by the execution core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    text: String,
    offset: usize,
    kind: StatementKind,
}

impl Statement {
    pub fn new(text: impl Into<String>, offset: usize) -> Self {
        let text = text.into();
        let kind = classify(&text);
        Self { text, offset, kind }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.text.len()
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// UPDATE or DELETE with no WHERE clause. The embedding UI may ask for
    /// confirmation before running one of these as a single statement.
    pub fn is_dangerous_dml(&self) -> bool {
        let keyword = match leading_keyword(&self.text) {
            Some(k) => k,
            None => return false,
        };
        if keyword != "UPDATE" && keyword != "DELETE" {
            return false;
        }
        !contains_bare_keyword(&self.text, "WHERE")
    }
}

pub fn strip_leading_comments(sql: &str) -> &str {
    let mut remaining = sql;
    loop {
        let trimmed = remaining.trim_start();
        if let Some(rest) = trimmed.strip_prefix("--") {
            match rest.find('\n') {
                Some(end) => {
                    remaining = &rest[end + 1..];
                    continue;
                }
                None => return "",
            }
        }
        if let Some(rest) = trimmed.strip_prefix("/*") {
            match rest.find("*/") {
                Some(end) => {
                    remaining = &rest[end + 2..];
                    continue;
                }
                None => return "",
            }
        }
        return trimmed;
    }
}

pub fn leading_keyword(sql: &str) -> Option<String> {
    strip_leading_comments(sql)
        .split_whitespace()
        .next()
        .map(|token| {
            token
                .trim_end_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .to_uppercase()
        })
        .filter(|token| !token.is_empty())
}

pub fn classify(sql: &str) -> StatementKind {
    let keyword = match leading_keyword(sql) {
        Some(k) => k,
        None => return StatementKind::Unknown,
    };
    match keyword.as_str() {
        "SELECT" | "WITH" | "EXPLAIN" | "SHOW" | "DESCRIBE" | "DESC" => StatementKind::Select,
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "UPSERT" | "CALL" | "EXEC" | "EXECUTE"
        | "BEGIN" | "DECLARE" | "LOCK" => StatementKind::Dml,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "GRANT" | "REVOKE" | "COMMENT" | "ANALYZE"
        | "RENAME" => StatementKind::Ddl,
        "COMMIT" | "ROLLBACK" | "SAVEPOINT" | "SET" | "USE" => StatementKind::Control,
        _ => StatementKind::Unknown,
    }
}

/// Scan for a keyword outside strings and comments. Case-insensitive, whole
/// word only. Enough for the WHERE check; not a SQL parser.
fn contains_bare_keyword(sql: &str, keyword: &str) -> bool {
    let upper = keyword.to_uppercase();
    let chars: Vec<char> = sql.chars().collect();
    let len = chars.len();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    let mut token = String::new();
    let mut i = 0usize;

    while i < len {
        let c = chars[i];
        let next = if i + 1 < len { Some(chars[i + 1]) } else { None };

        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            i += 1;
            continue;
        }
        if in_block_comment {
            if c == '*' && next == Some('/') {
                in_block_comment = false;
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }
        if in_single_quote {
            if c == '\'' {
                if next == Some('\'') {
                    i += 2;
                    continue;
                }
                in_single_quote = false;
            }
            i += 1;
            continue;
        }
        if in_double_quote {
            if c == '"' {
                in_double_quote = false;
            }
            i += 1;
            continue;
        }

        if c == '-' && next == Some('-') {
            in_line_comment = true;
            i += 2;
            continue;
        }
        if c == '/' && next == Some('*') {
            in_block_comment = true;
            i += 2;
            continue;
        }
        if c == '\'' {
            in_single_quote = true;
            i += 1;
            continue;
        }
        if c == '"' {
            in_double_quote = true;
            i += 1;
            continue;
        }

        if c.is_ascii_alphanumeric() || c == '_' {
            token.push(c.to_ascii_uppercase());
        } else {
            if token == upper {
                return true;
            }
            token.clear();
        }
        i += 1;
    }

    token == upper
}
