//! Minimal dump tool: list the tables of a database, or print every
//! record of one table.
//!
//! ```text
//! esedump <file.edb>            # list tables
//! esedump <file.edb> <table>    # dump records
//! ```

use std::env;
use std::process::ExitCode;

use esedb::Database;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let (path, table) = match args.as_slice() {
        [path] => (path, None),
        [path, table] => (path, Some(table)),
        _ => {
            eprintln!("usage: esedump <file.edb> [table]");
            return ExitCode::FAILURE;
        }
    };

    let db = match Database::open(path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("esedump: {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    match table {
        None => {
            for table in db.tables() {
                println!("{} (root page {})", table.name(), table.root_page());
            }
        }
        Some(name) => {
            let table = match db.table(name) {
                Ok(table) => table,
                Err(e) => {
                    eprintln!("esedump: {e}");
                    return ExitCode::FAILURE;
                }
            };
            for record in table.records() {
                match record {
                    Ok(record) => println!("{record:?}"),
                    Err(e) => {
                        eprintln!("esedump: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            }
        }
    }

    ExitCode::SUCCESS
}
