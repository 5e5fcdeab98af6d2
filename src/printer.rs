use duz::{HumanSize, NodeState, Walk};
use std::io::{BufWriter, Write, stdout};

const NEWLINE: &[u8] = b"\n";
const SLASH_NEWLINE: &[u8] = b"/\n";

/**
Writes one line per completed record, in creation order:
a right-aligned 10-wide IEC size, two spaces, the path (directories
with a trailing separator). Errored records are reported on stderr as
`"<path>: <error-name>"` and skipped on stdout.
*/
pub fn write_report(walk: &Walk) -> std::io::Result<()> {
    let std_out = stdout();
    let mut writer = BufWriter::new(std_out.lock());

    for record in walk.records().iter() {
        let path = record.path().as_bytes();
        match record.state() {
            NodeState::CompletedFile => {
                write!(writer, "{:>10}  ", HumanSize(record.size()))?;
                writer.write_all(path)?;
                writer.write_all(NEWLINE)?;
            }
            NodeState::CompletedDir => {
                write!(writer, "{:>10}  ", HumanSize(record.size()))?;
                writer.write_all(path)?;
                if path.ends_with(b"/") {
                    writer.write_all(NEWLINE)?;
                } else {
                    writer.write_all(SLASH_NEWLINE)?;
                }
            }
            NodeState::Errored(kind) => {
                eprintln!("{}: {kind}", String::from_utf8_lossy(path));
            }
            state @ (NodeState::IncompleteDir(_) | NodeState::IncompleteFile) => {
                debug_assert!(false, "record still pending after traversal: {state:?}");
            }
        }
    }
    writer.flush()
}
