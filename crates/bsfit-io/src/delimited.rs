//! Delimited text rows of samples: `x_0, ..., x_{d-1}, y` per line.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use bsfit_core::{BsfitError, Result};
use bsfit_model::SampleStore;

/// How sample rows are laid out in a text file.
#[derive(Debug, Clone, PartialEq)]
pub struct DelimitedOptions {
    /// Field separator. Any whitespace delimiter splits on runs of whitespace.
    pub delimiter: char,
    /// Skip the first line.
    pub has_header: bool,
    /// Lines starting with this character (after leading whitespace) are ignored.
    pub comment: Option<char>,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_header: false,
            comment: Some('#'),
        }
    }
}

impl DelimitedOptions {
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_comment(mut self, comment: Option<char>) -> Self {
        self.comment = comment;
        self
    }

    fn split<'l>(&self, line: &'l str) -> Vec<&'l str> {
        if self.delimiter.is_whitespace() {
            line.split_whitespace().collect()
        } else {
            line.split(self.delimiter).map(str::trim).collect()
        }
    }
}

/// Read one sample per line; the last column is the observed value.
pub fn read_delimited<R: BufRead>(reader: R, options: &DelimitedOptions) -> Result<SampleStore> {
    let mut store = SampleStore::new();
    let mut x = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        if index == 0 && options.has_header {
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || options.comment.is_some_and(|c| trimmed.starts_with(c)) {
            continue;
        }

        let fields = options.split(trimmed);
        if fields.len() < 2 {
            return Err(BsfitError::Parse(format!(
                "line {line_no}: expected at least 2 columns, found {}",
                fields.len()
            )));
        }

        x.clear();
        for (column, field) in fields.iter().enumerate() {
            let value: f64 = field.parse().map_err(|_| {
                BsfitError::Parse(format!(
                    "line {line_no}, column {}: invalid number '{field}'",
                    column + 1
                ))
            })?;
            x.push(value);
        }
        let y = x.pop().unwrap_or_default();
        if let Err(e) = store.add_sample(&x, y) {
            log::warn!("Rejected sample on line {line_no}: {e}");
            return Err(e);
        }
    }

    log::debug!(
        "Read {} samples with {} input dimensions",
        store.len(),
        store.num_variables()
    );
    Ok(store)
}

pub fn load_samples(path: impl AsRef<Path>, options: &DelimitedOptions) -> Result<SampleStore> {
    let file = File::open(path)?;
    read_delimited(BufReader::new(file), options)
}

/// Write every sample as one delimited line, inputs first and the value last.
pub fn write_delimited<W: Write>(mut writer: W, store: &SampleStore, delimiter: char) -> Result<()> {
    let separator = delimiter.to_string();
    for sample in store.iter() {
        let mut fields: Vec<String> = sample.x.iter().map(f64::to_string).collect();
        fields.push(sample.y.to_string());
        writeln!(writer, "{}", fields.join(&separator))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_samples(path: impl AsRef<Path>, store: &SampleStore, delimiter: char) -> Result<()> {
    let file = File::create(path)?;
    write_delimited(BufWriter::new(file), store, delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(text: &str, options: &DelimitedOptions) -> Result<SampleStore> {
        read_delimited(text.as_bytes(), options)
    }

    #[test]
    fn test_reads_rows() {
        let store = read("0, 1, 2.5\n1,0,-3e-1\n", &DelimitedOptions::default()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.num_variables(), 2);
        let table = store.finalize();
        assert_eq!(table.x(), &[0.0, 1.0, 1.0, 0.0]);
        assert_eq!(table.y(), &[2.5, -0.3]);
    }

    #[test]
    fn test_header_comments_and_blank_lines() {
        let text = "x,y\n# generated\n\n  \n0.5,1\n  # indented comment\n1.5,2\n";
        let options = DelimitedOptions::default().with_header(true);
        let store = read(text, &options).unwrap();
        assert_eq!(store.column(0), vec![0.5, 1.5]);
    }

    #[test]
    fn test_whitespace_delimiter() {
        let options = DelimitedOptions::default().with_delimiter('\t');
        let store = read("1\t2   3\n4 5\t6\n", &options).unwrap();
        assert_eq!(store.num_variables(), 2);
        assert_eq!(store.finalize().y(), &[3.0, 6.0]);
    }

    #[test]
    fn test_parse_error_names_line() {
        let err = read("0,1\n1,abc\n", &DelimitedOptions::default()).unwrap_err();
        match err {
            BsfitError::Parse(msg) => {
                assert!(msg.contains("line 2"), "{msg}");
                assert!(msg.contains("abc"), "{msg}");
            }
            other => panic!("expected Parse, got {other:?}"),
        }

        let err = read("0,1\n7\n", &DelimitedOptions::default()).unwrap_err();
        assert!(matches!(err, BsfitError::Parse(msg) if msg.starts_with("line 2")));
    }

    #[test]
    fn test_dimension_change() {
        let err = read("0,1\n1,2,3\n", &DelimitedOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            BsfitError::DimensionMismatch {
                expected: 1,
                found: 2
            }
        ));
    }

    #[test]
    fn test_write_then_read() {
        let store = SampleStore::from_samples(vec![([0.1, -2.0], 3.25), ([1e-9, 4.0], -0.5)]).unwrap();
        let mut out = Vec::new();
        write_delimited(&mut out, &store, ';').unwrap();
        assert_eq!(String::from_utf8(out.clone()).unwrap(), "0.1;-2;3.25\n0.000000001;4;-0.5\n");

        let back = read_delimited(out.as_slice(), &DelimitedOptions::default().with_delimiter(';')).unwrap();
        assert_eq!(back, store);
    }
}
