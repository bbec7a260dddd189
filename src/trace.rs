use crate::Error;
use log::debug;
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

/// One retired conditional branch from a trace log.
///
/// Records are immutable once loaded; `inst_count` is the cumulative
/// instruction count at retirement and is non-decreasing in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub pc: u64,
    pub taken: bool,
    pub inst_count: u64,
}

/// A branch trace loaded into memory: an ordered, random-access sequence of
/// records in replay order.
#[derive(Debug, Clone)]
pub struct BranchTrace {
    pub path: PathBuf,
    pub records: Vec<TraceRecord>,
}

fn parse_line(path: &Path, line_no: usize, line: &str) -> Result<TraceRecord, Error> {
    let malformed = |reason: String| Error::MalformedRecord {
        path: path.to_path_buf(),
        line: line_no,
        reason,
    };

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(malformed(format!(
            "expected exactly three fields, got {}",
            fields.len()
        )));
    }

    let parse_int = |name: &str, field: &str| -> Result<u64, Error> {
        field
            .parse::<u64>()
            .map_err(|err| malformed(format!("bad {} field {:?}: {}", name, field, err)))
    };

    let pc = parse_int("pc", fields[0])?;
    let taken = match parse_int("taken", fields[1])? {
        0 => false,
        1 => true,
        other => {
            return Err(malformed(format!(
                "taken flag must be 0 or 1, got {}",
                other
            )));
        }
    };
    let inst_count = parse_int("inst_count", fields[2])?;

    Ok(TraceRecord {
        pc,
        taken,
        inst_count,
    })
}

impl BranchTrace {
    /// Load a plain-text trace: one record per line, three whitespace
    /// separated unsigned integers `<pc> <taken:0|1> <cumulative inst count>`.
    ///
    /// When `num_samples` is set, reading stops only after the record with
    /// index `num_samples + 1` has been stored. The original harness checked
    /// the cap after appending, and that off-by-one is kept for parity.
    pub fn load<P: AsRef<Path>>(path: P, num_samples: Option<usize>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::TraceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        let mut records = vec![];
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| Error::TraceUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
            records.push(parse_line(path, i + 1, &line)?);

            if let Some(cap) = num_samples {
                if i > cap {
                    break;
                }
            }
        }

        debug!("loaded {} records from {}", records.len(), path.display());

        Ok(BranchTrace {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Trace name for reporting: the file stem of the trace path.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::io::Write;

    fn write_trace(lines: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(lines.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_records_in_file_order() {
        let file = write_trace("4096 1 10\n4100 0 12\n4096 1 15\n");
        let trace = BranchTrace::load(file.path(), None).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(
            trace.records[0],
            TraceRecord {
                pc: 4096,
                taken: true,
                inst_count: 10
            }
        );
        assert_eq!(trace.records[1].pc, 4100);
        assert!(!trace.records[1].taken);
        assert_eq!(trace.records[2].inst_count, 15);
    }

    #[test]
    fn cap_keeps_original_off_by_one() {
        let file = write_trace("0 1 1\n0 0 2\n1 1 3\n1 0 4\n");

        // cap of 2 loads all four records: the check runs after the push
        let trace = BranchTrace::load(file.path(), Some(2)).unwrap();
        assert_eq!(trace.len(), 4);

        // cap of 1 stops after record index 2 has been stored
        let trace = BranchTrace::load(file.path(), Some(1)).unwrap();
        assert_eq!(trace.len(), 3);
    }

    #[test]
    fn malformed_lines_are_fatal() {
        let file = write_trace("4096 1 10\n4100 2 12\n");
        match BranchTrace::load(file.path(), None) {
            Err(Error::MalformedRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedRecord, got {:?}", other.map(|t| t.len())),
        }

        let file = write_trace("4096 1\n");
        assert!(matches!(
            BranchTrace::load(file.path(), None),
            Err(Error::MalformedRecord { line: 1, .. })
        ));

        let file = write_trace("4096 1 10 99\n");
        assert!(matches!(
            BranchTrace::load(file.path(), None),
            Err(Error::MalformedRecord { line: 1, .. })
        ));

        let file = write_trace("4096 one 10\n");
        assert!(matches!(
            BranchTrace::load(file.path(), None),
            Err(Error::MalformedRecord { line: 1, .. })
        ));
    }

    #[test]
    fn missing_trace_is_unavailable() {
        assert!(matches!(
            BranchTrace::load("/nonexistent/trace.log", None),
            Err(Error::TraceUnavailable { .. })
        ));
    }
}
