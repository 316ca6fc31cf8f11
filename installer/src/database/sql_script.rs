//! SQL dump handling for the schema import.
//!
//! The schema dump is executed statement by statement, so the split must reproduce the exact
//! statement boundaries: a delimiter inside a single-quoted literal does not end a statement.

/// Replace every full-line `#` comment with an empty line.
///
/// Line numbering is preserved so driver errors still point at the right line of the dump.
pub fn remove_remarks(sql: &str) -> String {
    let lines: Vec<&str> = sql.split('\n').collect();
    let last = lines.len().saturating_sub(1);
    let mut output = String::with_capacity(sql.len() + 1);

    for (i, line) in lines.iter().enumerate() {
        if i == last && line.is_empty() {
            continue;
        }
        if !line.starts_with('#') {
            output.push_str(line);
        }
        output.push('\n');
    }

    output
}

/// Number of single quotes in `token` that are not escaped by an odd run of backslashes.
fn count_unescaped_quotes(token: &str) -> usize {
    let mut count = 0;
    let mut backslashes = 0usize;

    for c in token.chars() {
        match c {
            '\\' => backslashes += 1,
            '\'' => {
                if backslashes % 2 == 0 {
                    count += 1;
                }
                backslashes = 0;
            }
            _ => backslashes = 0,
        }
    }

    count
}

/// Split a (comment-stripped) SQL script into single statements on `delimiter`.
///
/// Statements are returned verbatim, including surrounding whitespace. An empty token after the
/// final delimiter is dropped. If the script ends inside an unterminated literal, whatever was
/// accumulated is returned as the last statement so the database reports it.
pub fn split_sql_file(sql: &str, delimiter: &str) -> Vec<String> {
    if delimiter.is_empty() {
        return if sql.is_empty() {
            Vec::new()
        } else {
            vec![sql.to_string()]
        };
    }

    let tokens: Vec<&str> = sql.split(delimiter).collect();
    let last = tokens.len().saturating_sub(1);
    let mut output = Vec::new();
    // Statement whose literal is still open.
    let mut pending: Option<String> = None;

    for (i, token) in tokens.iter().enumerate() {
        let odd = count_unescaped_quotes(token) % 2 == 1;

        match pending.take() {
            None => {
                if i == last && token.is_empty() {
                    continue;
                }
                if odd {
                    pending = Some(format!("{}{}", token, delimiter));
                } else {
                    output.push(token.to_string());
                }
            }
            Some(mut statement) => {
                statement.push_str(token);
                if odd {
                    // two odd counts make an even one: the literal is closed
                    output.push(statement);
                } else {
                    statement.push_str(delimiter);
                    pending = Some(statement);
                }
            }
        }
    }

    if let Some(mut rest) = pending {
        if rest.ends_with(delimiter) {
            rest.truncate(rest.len() - delimiter.len());
        }
        if !rest.trim().is_empty() {
            output.push(rest);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_delimiter_inside_literal() {
        let statements = split_sql_file("SELECT 'a;b'; SELECT 2;", ";");
        assert_eq!(statements, vec!["SELECT 'a;b'", " SELECT 2"]);
    }

    #[test]
    fn split_then_join_reproduces_stripped_input() {
        let raw = "# header\nCREATE TABLE t (v varchar(10));\n# data\nINSERT INTO t VALUES ('x;y'), ('it''s; fine');\nINSERT INTO t VALUES ('a\\';b');\n";
        let stripped = remove_remarks(raw);
        let statements = split_sql_file(&stripped, ";");
        assert_eq!(statements.join(";"), stripped);
        assert_eq!(
            statements
                .iter()
                .filter(|s| !s.trim().is_empty())
                .count(),
            3
        );
    }

    #[test]
    fn split_drops_only_trailing_empty_token() {
        let statements = split_sql_file("SELECT 1;SELECT 2;", ";");
        assert_eq!(statements, vec!["SELECT 1", "SELECT 2"]);
        assert_eq!(
            statements.join(";") + ";",
            "SELECT 1;SELECT 2;".to_string()
        );

        let statements = split_sql_file("SELECT 1;SELECT 2", ";");
        assert_eq!(statements, vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn escaped_quotes_do_not_toggle_literal() {
        // \' is escaped, \\' is an escaped backslash followed by a real quote
        assert_eq!(count_unescaped_quotes(r"'it\'s'"), 2);
        assert_eq!(count_unescaped_quotes(r"'a\\'"), 2);
        assert_eq!(count_unescaped_quotes(r"'a\\\'"), 1);

        let statements = split_sql_file(r"INSERT INTO t VALUES ('it\'s;ok');SELECT 1;", ";");
        assert_eq!(statements, vec![r"INSERT INTO t VALUES ('it\'s;ok')", "SELECT 1"]);
    }

    #[test]
    fn literal_spanning_several_delimiters() {
        let statements = split_sql_file("INSERT INTO t VALUES ('a;b;c;d');X;", ";");
        assert_eq!(statements, vec!["INSERT INTO t VALUES ('a;b;c;d')", "X"]);
    }

    #[test]
    fn unterminated_literal_is_returned_not_lost() {
        let statements = split_sql_file("SELECT 1;INSERT INTO t VALUES ('oops;", ";");
        assert_eq!(statements, vec!["SELECT 1", "INSERT INTO t VALUES ('oops;"]);
    }

    #[test]
    fn remove_remarks_blanks_comment_lines() {
        let out = remove_remarks("# one\nSELECT 1;\n#two\nSELECT 2;\n");
        assert_eq!(out, "\nSELECT 1;\n\nSELECT 2;\n");
        assert_eq!(out.lines().count(), 4);
    }

    #[test]
    fn remove_remarks_terminates_last_line() {
        assert_eq!(remove_remarks("SELECT 1;"), "SELECT 1;\n");
        assert_eq!(remove_remarks(""), "");
    }
}
