use serde::Serialize;
use std::path::Path;

use sqlpush_migrate::{MigrationScript, Statement, SyntaxWarning};

#[derive(Serialize)]
struct SplitOutput<'a> {
    id: &'a str,
    checksum: &'a str,
    statements: &'a [Statement],
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<&'a [SyntaxWarning]>,
}

/// Print the statements of a document. With `validate`, statements the
/// grammar check rejects make the command fail.
pub fn run(file: &Path, validate: bool, json: bool) -> anyhow::Result<i32> {
    let script = MigrationScript::from_file(file)?;
    let warnings = if validate { script.validate() } else { Vec::new() };

    if json {
        let output = SplitOutput {
            id: script.id(),
            checksum: script.checksum(),
            statements: script.statements(),
            warnings: validate.then_some(warnings.as_slice()),
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for statement in script.statements() {
            println!("-- [{}] line {}", statement.ordinal, statement.line);
            println!("{};", statement.sql);
        }
        println!(
            "-- {} statement(s), sha256 {}",
            script.len(),
            script.checksum()
        );
        for warning in &warnings {
            println!(
                "-- warning: statement {} (line {}): {}",
                warning.ordinal, warning.line, warning.message
            );
        }
    }

    Ok(if warnings.is_empty() { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn document(sql: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(sql.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_split_valid_document() {
        let file = document("CREATE TABLE a (id int); -- comment\nCREATE TABLE a (id int);\n");
        assert_eq!(run(file.path(), true, false).unwrap(), 0);
        assert_eq!(run(file.path(), false, true).unwrap(), 0);
    }

    #[test]
    fn test_validate_flags_unparseable_statements() {
        let file = document("CREATE TABLE a (id int);\nCREATE TABEL b (id int);\n");
        assert_eq!(run(file.path(), true, false).unwrap(), 1);
        assert_eq!(run(file.path(), false, false).unwrap(), 0);
    }

    #[test]
    fn test_unterminated_document_fails() {
        let file = document("INSERT INTO a VALUES ('oops);");
        assert!(run(file.path(), false, false).is_err());
    }
}
