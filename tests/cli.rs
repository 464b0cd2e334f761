use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;

use tempfile::tempdir;

fn run_db(db: &Path, commands: &[String]) -> Output {
    let script: Vec<u8> = commands
        .iter()
        .flat_map(|cmd| [cmd.as_bytes(), b"\n"].concat())
        .collect();
    run_db_bytes(db, script)
}

fn run_db_bytes(db: &Path, script: Vec<u8>) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_pagedb"))
        .arg(db)
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn child process");

    // feed stdin from another thread so a long script cannot deadlock
    // against a full stdout pipe
    let mut stdin = child.stdin.take().expect("Failed to open stdin");
    let writer = thread::spawn(move || {
        // the process may exit before reading everything
        let _ = stdin.write_all(&script);
    });

    let output = child.wait_with_output().expect("Failed to read stdout");
    writer.join().expect("stdin writer panicked");
    output
}

fn run_script<S: AsRef<str>>(db: &Path, commands: &[S]) -> Vec<String> {
    let commands: Vec<String> = commands.iter().map(|c| c.as_ref().to_string()).collect();
    let output = run_db(db, &commands);
    String::from_utf8(output.stdout)
        .expect("stdout is utf-8")
        .split('\n')
        .map(|line| line.to_string())
        .collect()
}

fn insert(i: u32) -> String {
    format!("insert {} user{} person{}@example.com", i, i, i)
}

#[test]
fn database_inserts_and_retrieves_a_row() {
    let dir = tempdir().unwrap();
    let output = run_script(
        &dir.path().join("test.db"),
        &["insert 1 user1 person1@example.com", "select", ".exit"],
    );
    assert_eq!(
        output,
        vec![
            "db > Executed .",
            "db > (1, user1, person1@example.com)",
            "Executed .",
            "db > ",
        ]
    );
}

#[test]
fn keeps_data_after_closing_connection() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("test.db");

    let output = run_script(&db, &["insert 1 user1 person1@example.com", ".exit"]);
    assert_eq!(output, vec!["db > Executed .", "db > "]);

    let output = run_script(&db, &["select", ".exit"]);
    assert_eq!(
        output,
        vec![
            "db > (1, user1, person1@example.com)",
            "Executed .",
            "db > ",
        ]
    );
}

#[test]
fn end_of_input_is_an_implicit_exit() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("test.db");

    let output = run_db(&db, &["insert 5 a b".to_string()]);
    assert!(output.status.success());

    let output = run_script(&db, &["select"]);
    assert_eq!(output, vec!["db > (5, a, b)", "Executed .", "db > ", ""]);
}

#[test]
fn allows_inserting_strings_that_are_maximum_length() {
    let dir = tempdir().unwrap();
    let username = "a".repeat(32);
    let email = "a".repeat(255);
    let output = run_script(
        &dir.path().join("test.db"),
        &[
            format!("insert 1 {} {}", username, email),
            "select".to_string(),
            ".exit".to_string(),
        ],
    );
    assert_eq!(
        output,
        vec![
            "db > Executed .".to_string(),
            format!("db > (1, {}, {})", username, email),
            "Executed .".to_string(),
            "db > ".to_string(),
        ]
    );
}

#[test]
fn prints_error_message_if_strings_are_too_long() {
    let dir = tempdir().unwrap();
    let output = run_script(
        &dir.path().join("test.db"),
        &[
            format!("insert 1 {} {}", "a".repeat(33), "a".repeat(256)),
            "select".to_string(),
            ".exit".to_string(),
        ],
    );
    assert_eq!(
        output,
        vec!["db > String is too long.", "db > Executed .", "db > "]
    );
}

#[test]
fn prints_error_message_if_id_is_negative() {
    let dir = tempdir().unwrap();
    let output = run_script(
        &dir.path().join("test.db"),
        &["insert -1 cstack foo@bar.com", "select", ".exit"],
    );
    assert_eq!(
        output,
        vec!["db > ID must be positive.", "db > Executed .", "db > "]
    );
}

#[test]
fn prints_error_message_for_duplicate_id() {
    let dir = tempdir().unwrap();
    let output = run_script(
        &dir.path().join("test.db"),
        &[
            "insert 1 user1 person1@example.com",
            "insert 1 user1 person1@example.com",
            "select",
            ".exit",
        ],
    );
    assert_eq!(
        output,
        vec![
            "db > Executed .",
            "db > Error: Duplicate key.",
            "db > (1, user1, person1@example.com)",
            "Executed .",
            "db > ",
        ]
    );
}

#[test]
fn prints_constants() {
    let dir = tempdir().unwrap();
    let output = run_script(&dir.path().join("test.db"), &[".constants", ".exit"]);
    assert_eq!(
        output,
        vec![
            "db > Constants:",
            "ROW_SIZE: 293",
            "COMMON_NODE_HEADER_SIZE: 6",
            "LEAF_NODE_HEADER_SIZE: 14",
            "LEAF_NODE_CELL_SIZE: 297",
            "LEAF_NODE_SPACE_FOR_CELLS: 4082",
            "LEAF_NODE_MAX_CELLS: 13",
            "db > ",
        ]
    );
}

#[test]
fn prints_structure_of_a_one_node_btree() {
    let dir = tempdir().unwrap();
    let mut script: Vec<String> = [3, 1, 2].iter().map(|i| insert(*i)).collect();
    script.push(".btree".to_string());
    script.push(".exit".to_string());

    let output = run_script(&dir.path().join("test.db"), &script);
    assert_eq!(
        output,
        vec![
            "db > Executed .",
            "db > Executed .",
            "db > Executed .",
            "db > Tree:",
            "- leaf (size 3)",
            "  - 1",
            "  - 2",
            "  - 3",
            "db > ",
        ]
    );
}

#[test]
fn prints_structure_of_a_3_leaf_node_btree() {
    let dir = tempdir().unwrap();
    let mut script: Vec<String> = (1..=14).map(insert).collect();
    script.push(".btree".to_string());
    script.push(insert(15));
    script.push(".exit".to_string());

    let output = run_script(&dir.path().join("test.db"), &script);
    let mut expected = vec!["db > Tree:".to_string(), "- internal (size 1)".to_string()];
    expected.push("  - leaf (size 7)".to_string());
    expected.extend((1..=7).map(|i| format!("    - {}", i)));
    expected.push("  - key 7".to_string());
    expected.push("  - leaf (size 7)".to_string());
    expected.extend((8..=14).map(|i| format!("    - {}", i)));
    expected.push("db > Executed .".to_string());
    expected.push("db > ".to_string());

    assert_eq!(output[14..], expected[..]);
}

#[test]
fn prints_all_rows_in_a_multi_level_tree() {
    let dir = tempdir().unwrap();
    let mut script: Vec<String> = (1..=15).map(insert).collect();
    script.push("select".to_string());
    script.push(".exit".to_string());

    let output = run_script(&dir.path().join("test.db"), &script);
    let mut expected = vec!["db > (1, user1, person1@example.com)".to_string()];
    expected.extend((2..=15).map(|i| format!("({}, user{}, person{}@example.com)", i, i, i)));
    expected.push("Executed .".to_string());
    expected.push("db > ".to_string());

    assert_eq!(output[15..], expected[..]);
}

#[test]
fn prints_error_message_when_table_is_full() {
    let dir = tempdir().unwrap();
    let mut script: Vec<String> = (1..=1400).map(insert).collect();
    script.push(".exit".to_string());

    let output = run_script(&dir.path().join("test.db"), &script);
    assert!(output.contains(&"db > Error: Table full.".to_string()));
    assert_eq!(output.last().map(String::as_str), Some("db > "));
}

#[test]
fn unrecognized_input_is_reported() {
    let dir = tempdir().unwrap();
    let output = run_script(
        &dir.path().join("test.db"),
        &[".tables", "update 1", "insert 1 a", ".exit"],
    );
    assert_eq!(
        output,
        vec![
            "db > Unrecognized command '.tables'",
            "db > Unrecognized keyword at start of 'update 1' .",
            "db > Syntax error. Could not parse statement .",
            "db > ",
        ]
    );
}

#[test]
fn non_utf8_input_does_not_end_the_session() {
    let dir = tempdir().unwrap();
    let output = run_db_bytes(
        &dir.path().join("test.db"),
        b"insert 1 a b\ninsert 2 \xff b\nselect\n.exit\n".to_vec(),
    );
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8(output.stdout).expect("stdout is utf-8"),
        "db > Executed .\n\
         db > Syntax error. Could not parse statement .\n\
         db > (1, a, b)\n\
         Executed .\n\
         db > "
    );
}

#[test]
fn zero_page_capacity_is_rejected() {
    let dir = tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_pagedb"))
        .arg(dir.path().join("test.db"))
        .args(["--max-pages", "0"])
        .env_remove("PAGEDB_MAX_PAGES")
        .output()
        .expect("Failed to run binary");
    assert!(!output.status.success());
    assert!(!dir.path().join("test.db").exists());
}

#[test]
fn missing_filename_is_a_startup_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_pagedb"))
        .output()
        .expect("Failed to run binary");
    assert!(!output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "Must supply a database filename.\n"
    );
}

#[test]
fn partial_page_file_is_rejected_as_corrupt() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("test.db");
    std::fs::write(&db, vec![0u8; 100]).unwrap();

    let output = run_db(&db, &[".exit".to_string()]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout)
        .contains("Db file is not a whole number of pages. Corrupt file."));
}
